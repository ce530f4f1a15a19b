//! Concatenation of chunk artifacts into one buffer.
//!
//! Gap rules between consecutive pieces of audio:
//! - inter-chunk silence after every chunk,
//! - paragraph silence instead, after a paragraph's last chunk, when chunks
//!   were not grouped,
//! - chapter silence before and after a chapter heading.
//!
//! Pause markers add their own duration where they sit. A missing artifact is
//! skipped with a warning.

use crate::audio::{AudioBuffer, read_wav};
use crate::config::AssemblySettings;
use crate::defaults;
use crate::error::{NarrateError, Result};
use crate::session::{ArtifactLayout, Chunk, ChunkId};

/// Concatenated audio plus what went into it.
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    pub audio: AudioBuffer,
    pub chunks_used: usize,
    pub missing: Vec<ChunkId>,
}

/// Join the artifacts of `chunks` in sequence order.
///
/// Fails with `EmptyAssembly` when no chunk has audio.
pub fn concatenate(
    chunks: &[&Chunk],
    layout: &ArtifactLayout,
    settings: &AssemblySettings,
) -> Result<Timeline> {
    let mut ordered = chunks.to_vec();
    ordered.sort_by_key(|c| c.sequence);

    let mut audio: Option<AudioBuffer> = None;
    let mut chunks_used = 0;
    let mut missing = Vec::new();
    let mut pause_ms: u32 = 0;
    // Silence owed after the previous piece of audio; None before the first.
    // Headings always get chapter silence in front, even as the first piece.
    let mut gap_ms: Option<u32> = None;

    for chunk in ordered {
        if let Some(duration_ms) = chunk.pause_ms() {
            pause_ms += if duration_ms == 0 {
                defaults::DEFAULT_PAUSE_MS
            } else {
                duration_ms
            };
            continue;
        }

        let path = layout.chunk_audio(&chunk.id);
        let piece = match read_wav(&path) {
            Ok(piece) if !piece.is_empty() => piece,
            Ok(_) => {
                log::warn!("assembly: chunk {} has empty audio; skipped", chunk.sequence);
                missing.push(chunk.id.clone());
                continue;
            }
            Err(e) => {
                log::warn!("assembly: chunk {} skipped: {e}", chunk.sequence);
                missing.push(chunk.id.clone());
                continue;
            }
        };

        let buffer = audio.get_or_insert_with(|| AudioBuffer::empty(piece.sample_rate));
        let gap = gap_ms.unwrap_or(0);
        let lead = if chunk.chapter_heading {
            gap.max(settings.chapter_silence_ms)
        } else {
            gap
        };
        buffer.append_silence(pause_ms + lead);
        buffer.append(&piece);
        chunks_used += 1;
        pause_ms = 0;

        gap_ms = Some(if chunk.chapter_heading {
            settings.chapter_silence_ms
        } else if !settings.grouping_enabled && chunk.paragraph_end {
            settings.paragraph_silence_ms
        } else {
            settings.inter_chunk_silence_ms
        });
    }

    let Some(mut audio) = audio else {
        return Err(NarrateError::EmptyAssembly {
            message: format!("none of {} chunk(s) has generated audio", chunks.len()),
        });
    };
    audio.append_silence(pause_ms);

    Ok(Timeline {
        audio,
        chunks_used,
        missing,
    })
}
