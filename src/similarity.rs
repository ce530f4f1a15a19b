//! Text agreement scoring between source text and a recognition transcript.
//!
//! Both sides are reduced to lower-cased alphanumeric characters, then compared
//! with a Ratcliff/Obershelp matcher: the longest common block is found, the
//! search recurses on both sides of it, and the score is `2 * matched / total`.

use std::collections::HashMap;

/// Reduce text to the characters that matter for comparison.
pub fn normalize(text: &str) -> Vec<char> {
    text.chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

/// Agreement between `expected` and `actual`, in `[0, 1]`.
///
/// Returns 0.0 when either side has no alphanumeric content.
pub fn score(expected: &str, actual: &str) -> f32 {
    let a = normalize(expected);
    let b = normalize(actual);
    if a.is_empty() || b.is_empty() {
        return 0.0;
    }

    // Block matching picks the earliest longest block, which depends on
    // argument order; a canonical order keeps the score symmetric.
    let (a, b) = if a <= b { (a, b) } else { (b, a) };

    let matched = matching_characters(&a, &b);
    (2.0 * matched as f64 / (a.len() + b.len()) as f64) as f32
}

/// Total size of all matching blocks between `a` and `b`.
fn matching_characters(a: &[char], b: &[char]) -> usize {
    let mut b2j: HashMap<char, Vec<usize>> = HashMap::new();
    for (j, &c) in b.iter().enumerate() {
        b2j.entry(c).or_default().push(j);
    }

    let mut total = 0;
    let mut pending = vec![(0, a.len(), 0, b.len())];
    while let Some((alo, ahi, blo, bhi)) = pending.pop() {
        let (i, j, size) = longest_match(a, &b2j, alo, ahi, blo, bhi);
        if size == 0 {
            continue;
        }
        total += size;
        if alo < i && blo < j {
            pending.push((alo, i, blo, j));
        }
        if i + size < ahi && j + size < bhi {
            pending.push((i + size, ahi, j + size, bhi));
        }
    }
    total
}

/// Longest block `a[i..i+size] == b[j..j+size]` inside the given windows.
///
/// Ties resolve to the block starting earliest in `a`, then earliest in `b`.
fn longest_match(
    a: &[char],
    b2j: &HashMap<char, Vec<usize>>,
    alo: usize,
    ahi: usize,
    blo: usize,
    bhi: usize,
) -> (usize, usize, usize) {
    let (mut best_i, mut best_j, mut best_size) = (alo, blo, 0);
    // run length of the match ending at (i - 1, j), keyed by j
    let mut lengths: HashMap<usize, usize> = HashMap::new();

    for (i, c) in a.iter().enumerate().take(ahi).skip(alo) {
        let mut next = HashMap::new();
        if let Some(positions) = b2j.get(c) {
            for &j in positions {
                if j < blo {
                    continue;
                }
                if j >= bhi {
                    break;
                }
                let run = j
                    .checked_sub(1)
                    .and_then(|prev| lengths.get(&prev))
                    .copied()
                    .unwrap_or(0)
                    + 1;
                next.insert(j, run);
                if run > best_size {
                    best_i = i + 1 - run;
                    best_j = j + 1 - run;
                    best_size = run;
                }
            }
        }
        lengths = next;
    }

    (best_i, best_j, best_size)
}
