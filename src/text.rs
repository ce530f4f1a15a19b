//! Light punctuation cleanup applied to chunk text before generation.

/// Punctuation the speech model renders poorly, with its replacement.
const REPLACEMENTS: &[(&str, &str)] = &[
    ("...", ", "),
    ("…", ", "),
    (":", ","),
    (" - ", ", "),
    (";", ", "),
    ("—", "-"),
    ("–", "-"),
    (" ,", ","),
    ("\u{201c}", "\""),
    ("\u{201d}", "\""),
    ("\u{2018}", "'"),
    ("\u{2019}", "'"),
];

/// Characters accepted as the end of a spoken sentence.
const SENTENCE_ENDERS: &[char] = &['.', '!', '?', '-', ','];

/// Prepare chunk text for the speech model.
///
/// Collapses whitespace, capitalises the first letter, swaps uncommon
/// punctuation for plain equivalents and appends a full stop when the text
/// has no sentence ender.
pub fn normalize_for_speech(text: &str) -> String {
    let mut out = text.split_whitespace().collect::<Vec<_>>().join(" ");

    if let Some(first) = out.chars().next()
        && first.is_lowercase()
    {
        let rest = &out[first.len_utf8()..];
        out = first.to_uppercase().chain(rest.chars()).collect();
    }

    for (from, to) in REPLACEMENTS {
        out = out.replace(from, to);
    }

    let mut out = out.trim_end().to_string();
    if !out.is_empty() && !out.ends_with(SENTENCE_ENDERS) {
        out.push('.');
    }
    out
}
