//! On-disk layout of a session's artifacts.
//!
//! ```text
//! <root>/<session>/
//!   <session>_session.json
//!   chunks/audio_<chunk id>.wav
//!   run_<k>_temp/                     (removed at the end of run k)
//!   <session>_run<k>_seed<seed>.wav   (auto-assembled output)
//! ```

use crate::error::Result;
use crate::session::ChunkId;
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactLayout {
    root: PathBuf,
    session: String,
}

impl ArtifactLayout {
    pub fn new(root: impl Into<PathBuf>, session: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            session: session.into(),
        }
    }

    pub fn session_name(&self) -> &str {
        &self.session
    }

    pub fn session_dir(&self) -> PathBuf {
        self.root.join(&self.session)
    }

    pub fn session_file(&self) -> PathBuf {
        self.session_dir()
            .join(format!("{}_session.json", self.session))
    }

    pub fn chunk_dir(&self) -> PathBuf {
        self.session_dir().join("chunks")
    }

    /// Permanent audio for a chunk, keyed only by its id.
    pub fn chunk_audio(&self, id: &ChunkId) -> PathBuf {
        self.chunk_dir().join(format!("audio_{id}.wav"))
    }

    /// Scratch space for run `run_index` (zero-based).
    pub fn run_temp_dir(&self, run_index: u32) -> PathBuf {
        self.session_dir()
            .join(format!("run_{}_temp", run_index + 1))
    }

    /// Output path for an automatically assembled run.
    pub fn auto_output(&self, run_index: u32, master_seed: u64) -> PathBuf {
        self.session_dir().join(format!(
            "{}_run{}_seed{}.wav",
            self.session,
            run_index + 1,
            master_seed
        ))
    }

    /// Scratch space for assembly intermediates.
    pub fn assembly_temp_dir(&self) -> PathBuf {
        self.session_dir().join("assembly_temp")
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

/// Scratch directory created on demand and removed with everything in it on drop.
#[derive(Debug)]
pub struct ScratchDir(PathBuf);

impl ScratchDir {
    pub fn create(path: PathBuf) -> Result<Self> {
        fs::create_dir_all(&path)?;
        Ok(Self(path))
    }

    pub fn path(&self) -> &Path {
        &self.0
    }
}

impl Drop for ScratchDir {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.0)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            log::warn!("cannot remove scratch directory {}: {e}", self.0.display());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paths_are_derived_from_session_and_id() {
        let layout = ArtifactLayout::new("/out", "moby");
        let id = ChunkId::from("0123abcd");

        assert_eq!(layout.session_dir(), PathBuf::from("/out/moby"));
        assert_eq!(
            layout.session_file(),
            PathBuf::from("/out/moby/moby_session.json")
        );
        assert_eq!(
            layout.chunk_audio(&id),
            PathBuf::from("/out/moby/chunks/audio_0123abcd.wav")
        );
        assert_eq!(
            layout.run_temp_dir(0),
            PathBuf::from("/out/moby/run_1_temp")
        );
        assert_eq!(
            layout.auto_output(1, 4242),
            PathBuf::from("/out/moby/moby_run2_seed4242.wav")
        );
    }

    #[test]
    fn scratch_dir_is_removed_on_drop() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_1_temp");
        {
            let scratch = ScratchDir::create(path.clone()).unwrap();
            fs::write(scratch.path().join("leftover.wav"), b"x").unwrap();
            assert!(path.exists());
        }
        assert!(!path.exists());
    }
}
