//! Session state: the ordered chunk list plus run-level generation settings.
//!
//! Sequence positions form a dense `1..=N` ordering over the live chunks and are
//! renumbered after every structural edit. Chunk ids never change and are the
//! only key used for on-disk artifacts.

pub mod layout;
pub mod store;

pub use layout::{ArtifactLayout, ScratchDir};
pub use store::{JsonSessionStore, SessionStore};

use crate::config::GenerationSettings;
use crate::error::{NarrateError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Stable, opaque chunk identifier (32 lowercase hex characters).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkId(String);

impl ChunkId {
    /// Fresh random identifier.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().simple().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Leading characters for log lines.
    pub fn short(&self) -> &str {
        self.0.get(..8).unwrap_or(&self.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for ChunkId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for ChunkId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl fmt::Display for ChunkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Generation state of a chunk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationStatus {
    #[default]
    NotGenerated,
    Generated,
    Failed,
}

/// What a chunk contributes to the book.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChunkKind {
    #[default]
    Text,
    Pause { duration_ms: u32 },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Chunk {
    #[serde(default)]
    pub id: ChunkId,
    pub sequence: usize,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub kind: ChunkKind,
    #[serde(default)]
    pub chapter_heading: bool,
    #[serde(default)]
    pub paragraph_end: bool,
    #[serde(default)]
    pub status: GenerationStatus,
    #[serde(default)]
    pub similarity: Option<f32>,
    #[serde(default)]
    pub seed: Option<u64>,
    /// Flagged for regeneration.
    #[serde(default)]
    pub marked: bool,
}

impl Chunk {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            id: ChunkId::generate(),
            sequence: 0,
            text: text.into(),
            kind: ChunkKind::Text,
            chapter_heading: false,
            paragraph_end: false,
            status: GenerationStatus::NotGenerated,
            similarity: None,
            seed: None,
            marked: false,
        }
    }

    pub fn pause(duration_ms: u32) -> Self {
        Self {
            text: format!("--- PAUSE ({duration_ms}ms) ---"),
            kind: ChunkKind::Pause { duration_ms },
            ..Self::text("")
        }
    }

    pub fn chapter(text: impl Into<String>) -> Self {
        Self {
            chapter_heading: true,
            ..Self::text(text)
        }
    }

    pub fn with_paragraph_end(mut self) -> Self {
        self.paragraph_end = true;
        self
    }

    pub fn is_pause(&self) -> bool {
        matches!(self.kind, ChunkKind::Pause { .. })
    }

    pub fn pause_ms(&self) -> Option<u32> {
        match self.kind {
            ChunkKind::Pause { duration_ms } => Some(duration_ms),
            ChunkKind::Text => None,
        }
    }
}

/// Per-status chunk counts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StatusCounts {
    pub generated: usize,
    pub failed: usize,
    pub not_generated: usize,
    pub pauses: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    pub name: String,
    #[serde(default)]
    pub source_file: Option<String>,
    #[serde(default)]
    pub chunks: Vec<Chunk>,
    #[serde(default)]
    pub settings: GenerationSettings,
}

impl Session {
    pub fn new(name: impl Into<String>, settings: GenerationSettings) -> Self {
        Self {
            name: name.into(),
            source_file: None,
            chunks: Vec::new(),
            settings,
        }
    }

    /// Session whose chunks are the given texts, in order.
    pub fn from_texts<I, S>(name: impl Into<String>, settings: GenerationSettings, texts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut session = Self::new(name, settings);
        session.chunks = texts.into_iter().map(Chunk::text).collect();
        session.renumber();
        session
    }

    /// Append an existing chunk record.
    pub fn push(&mut self, chunk: Chunk) -> ChunkId {
        let id = chunk.id.clone();
        self.chunks.push(chunk);
        self.renumber();
        id
    }

    pub fn push_text(&mut self, text: impl Into<String>) -> ChunkId {
        self.push(Chunk::text(text))
    }

    /// Insert a manually written chunk before index `at` (clamped to the end).
    pub fn insert_text(&mut self, at: usize, text: impl Into<String>) -> ChunkId {
        let chunk = Chunk {
            marked: true,
            ..Chunk::text(text.into().trim())
        };
        self.insert(at, chunk)
    }

    pub fn insert_pause(&mut self, at: usize, duration_ms: u32) -> ChunkId {
        self.insert(at, Chunk::pause(duration_ms))
    }

    fn insert(&mut self, at: usize, chunk: Chunk) -> ChunkId {
        let id = chunk.id.clone();
        let at = at.min(self.chunks.len());
        self.chunks.insert(at, chunk);
        self.renumber();
        id
    }

    /// Remove chunks by id. Artifact files are left on disk.
    pub fn delete(&mut self, ids: &[ChunkId]) -> usize {
        let before = self.chunks.len();
        self.chunks.retain(|c| !ids.contains(&c.id));
        self.renumber();
        before - self.chunks.len()
    }

    /// Move a chunk to index `to` (clamped to the end).
    pub fn move_chunk(&mut self, id: &ChunkId, to: usize) -> Result<()> {
        let from = self.index_of(id)?;
        let chunk = self.chunks.remove(from);
        let to = to.min(self.chunks.len());
        self.chunks.insert(to, chunk);
        self.renumber();
        Ok(())
    }

    /// Replace a chunk's text. Returns false when the text is unchanged.
    ///
    /// Changed text invalidates any generated audio: the chunk goes back to
    /// not-generated and is marked for regeneration.
    pub fn edit_text(&mut self, id: &ChunkId, text: &str) -> Result<bool> {
        let chunk = self.chunk_mut(id)?;
        if chunk.is_pause() {
            return Err(NarrateError::Session {
                message: "pause markers carry no text; delete and re-insert instead".to_string(),
            });
        }
        if text.trim().is_empty() || chunk.text == text {
            return Ok(false);
        }
        chunk.text = text.to_string();
        chunk.status = GenerationStatus::NotGenerated;
        chunk.marked = true;
        Ok(true)
    }

    /// Rewrite sequence positions as `1..=N` in list order.
    pub fn renumber(&mut self) {
        for (i, chunk) in self.chunks.iter_mut().enumerate() {
            chunk.sequence = i + 1;
        }
    }

    /// Restore list order from sequence positions, then renumber densely.
    pub fn sort_by_sequence(&mut self) {
        self.chunks.sort_by_key(|c| c.sequence);
        self.renumber();
    }

    pub fn chunk(&self, id: &ChunkId) -> Result<&Chunk> {
        self.chunks
            .iter()
            .find(|c| &c.id == id)
            .ok_or_else(|| NarrateError::UnknownChunk { id: id.to_string() })
    }

    pub fn chunk_mut(&mut self, id: &ChunkId) -> Result<&mut Chunk> {
        self.chunks
            .iter_mut()
            .find(|c| &c.id == id)
            .ok_or_else(|| NarrateError::UnknownChunk { id: id.to_string() })
    }

    fn index_of(&self, id: &ChunkId) -> Result<usize> {
        self.chunks
            .iter()
            .position(|c| &c.id == id)
            .ok_or_else(|| NarrateError::UnknownChunk { id: id.to_string() })
    }

    /// Chunks in sequence order.
    pub fn ordered(&self) -> Vec<&Chunk> {
        let mut chunks: Vec<&Chunk> = self.chunks.iter().collect();
        chunks.sort_by_key(|c| c.sequence);
        chunks
    }

    /// Assign ids to records that predate identifiers. Returns true if any changed.
    pub fn ensure_ids(&mut self) -> bool {
        let mut upgraded = false;
        for chunk in self.chunks.iter_mut().filter(|c| c.id.is_empty()) {
            chunk.id = ChunkId::generate();
            upgraded = true;
        }
        upgraded
    }

    /// Put every text chunk back to not-generated.
    pub fn reset_generation(&mut self) {
        for chunk in self.chunks.iter_mut().filter(|c| !c.is_pause()) {
            chunk.status = GenerationStatus::NotGenerated;
        }
    }

    /// Chunks flagged for regeneration or whose last generation failed.
    pub fn marked_ids(&self) -> Vec<ChunkId> {
        self.ordered()
            .into_iter()
            .filter(|c| !c.is_pause() && (c.marked || c.status == GenerationStatus::Failed))
            .map(|c| c.id.clone())
            .collect()
    }

    pub fn status_counts(&self) -> StatusCounts {
        let mut counts = StatusCounts::default();
        for chunk in &self.chunks {
            if chunk.is_pause() {
                counts.pauses += 1;
                continue;
            }
            match chunk.status {
                GenerationStatus::Generated => counts.generated += 1,
                GenerationStatus::Failed => counts.failed += 1,
                GenerationStatus::NotGenerated => counts.not_generated += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_dense(session: &Session) {
        let sequences: Vec<usize> = session.chunks.iter().map(|c| c.sequence).collect();
        let expected: Vec<usize> = (1..=session.chunks.len()).collect();
        assert_eq!(sequences, expected);
    }

    fn session(texts: &[&str]) -> Session {
        Session::from_texts("book", GenerationSettings::default(), texts.iter().copied())
    }

    #[test]
    fn chunk_ids_are_unique_hex() {
        let a = ChunkId::generate();
        let b = ChunkId::generate();
        assert_ne!(a, b);
        assert_eq!(a.as_str().len(), 32);
        assert!(a.as_str().chars().all(|c| c.is_ascii_hexdigit()));
        assert_eq!(a.short().len(), 8);
    }

    #[test]
    fn from_texts_numbers_densely() {
        let s = session(&["one", "two", "three"]);
        assert_dense(&s);
        assert_eq!(s.chunks[2].text, "three");
    }

    #[test]
    fn insert_delete_and_move_keep_sequence_dense() {
        let mut s = session(&["a", "b", "c", "d"]);
        let pause = s.insert_pause(1, 1500);
        assert_dense(&s);
        let inserted = s.insert_text(100, "  tail  ");
        assert_dense(&s);
        assert_eq!(s.chunk(&inserted).unwrap().text, "tail");
        assert!(s.chunk(&inserted).unwrap().marked);

        let b = s.chunks[2].id.clone();
        s.move_chunk(&b, 0).unwrap();
        assert_dense(&s);
        assert_eq!(s.chunks[0].text, "b");

        let removed = s.delete(&[pause.clone(), b]);
        assert_eq!(removed, 2);
        assert_dense(&s);
        assert!(s.chunk(&pause).is_err());
    }

    #[test]
    fn ids_survive_reordering() {
        let mut s = session(&["a", "b", "c"]);
        let ids: Vec<ChunkId> = s.chunks.iter().map(|c| c.id.clone()).collect();
        s.move_chunk(&ids[2], 0).unwrap();
        assert_eq!(s.chunk(&ids[2]).unwrap().sequence, 1);
        assert_eq!(s.chunk(&ids[2]).unwrap().text, "c");
    }

    #[test]
    fn edit_resets_status_and_marks() {
        let mut s = session(&["original"]);
        let id = s.chunks[0].id.clone();
        s.chunks[0].status = GenerationStatus::Generated;

        assert!(!s.edit_text(&id, "original").unwrap());
        assert_eq!(s.chunks[0].status, GenerationStatus::Generated);

        assert!(s.edit_text(&id, "changed").unwrap());
        assert_eq!(s.chunks[0].status, GenerationStatus::NotGenerated);
        assert!(s.chunks[0].marked);
    }

    #[test]
    fn pause_cannot_be_edited() {
        let mut s = session(&[]);
        let id = s.insert_pause(0, 500);
        assert!(s.edit_text(&id, "words").is_err());
        assert_eq!(s.chunk(&id).unwrap().pause_ms(), Some(500));
    }

    #[test]
    fn unknown_chunk_is_an_error() {
        let mut s = session(&["a"]);
        let missing = ChunkId::from("missing");
        assert!(matches!(
            s.move_chunk(&missing, 0),
            Err(NarrateError::UnknownChunk { .. })
        ));
    }

    #[test]
    fn ensure_ids_fills_missing() {
        let mut s = session(&["a", "b"]);
        s.chunks[1].id = ChunkId::default();
        assert!(s.ensure_ids());
        assert!(!s.chunks[1].id.is_empty());
        assert!(!s.ensure_ids());
    }

    #[test]
    fn marked_ids_include_failed_and_skip_pauses() {
        let mut s = session(&["a", "b", "c"]);
        s.chunks[0].status = GenerationStatus::Failed;
        s.chunks[2].marked = true;
        let pause = s.insert_pause(1, 300);
        s.chunk_mut(&pause).unwrap().marked = true;

        let marked = s.marked_ids();
        assert_eq!(marked, vec![s.chunks[0].id.clone(), s.chunks[3].id.clone()]);
    }

    #[test]
    fn reset_and_counts() {
        let mut s = session(&["a", "b", "c"]);
        s.insert_pause(3, 100);
        s.chunks[0].status = GenerationStatus::Generated;
        s.chunks[1].status = GenerationStatus::Failed;

        let counts = s.status_counts();
        assert_eq!(
            counts,
            StatusCounts {
                generated: 1,
                failed: 1,
                not_generated: 1,
                pauses: 1
            }
        );

        s.reset_generation();
        assert_eq!(s.status_counts().not_generated, 3);
    }

    #[test]
    fn sort_by_sequence_restores_order() {
        let mut s = session(&["a", "b", "c"]);
        s.chunks.swap(0, 2);
        s.sort_by_sequence();
        let texts: Vec<&str> = s.chunks.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["a", "b", "c"]);
        assert_dense(&s);
    }

    #[test]
    fn chunk_serializes_with_snake_case_fields() {
        let chunk = Chunk::pause(750);
        let json = serde_json::to_value(&chunk).unwrap();
        assert_eq!(json["kind"]["type"], "pause");
        assert_eq!(json["kind"]["duration_ms"], 750);
        assert_eq!(json["status"], "not_generated");
    }
}
