//! Session persistence as pretty-printed JSON.

use crate::config::GenerationSettings;
use crate::error::{NarrateError, Result};
use crate::session::{ArtifactLayout, Session};
use std::fs;
use std::path::{Path, PathBuf};

/// Where the orchestrator writes session state after each run.
pub trait SessionStore: Send + Sync {
    fn save(&self, session: &Session) -> Result<()>;
}

/// Stores each session as `<root>/<name>/<name>_session.json`.
#[derive(Debug, Clone)]
pub struct JsonSessionStore {
    root: PathBuf,
}

impl JsonSessionStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        ArtifactLayout::new(&self.root, name).session_file()
    }

    /// Load a session by name.
    pub fn load(&self, name: &str) -> Result<Session> {
        Self::load_path(&self.path_for(name))
    }

    /// Load a session file, upgrading records that lack chunk ids.
    ///
    /// Upgraded sessions are written back immediately so ids stay stable.
    pub fn load_path(path: &Path) -> Result<Session> {
        Self::load_path_with_defaults(path, &GenerationSettings::default())
    }

    /// Like [`load_path`](Self::load_path), but a record without a
    /// `settings` object takes `defaults` instead of the built-in values.
    pub fn load_path_with_defaults(path: &Path, defaults: &GenerationSettings) -> Result<Session> {
        let contents = fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                NarrateError::SessionNotFound {
                    path: path.display().to_string(),
                }
            } else {
                NarrateError::Io(e)
            }
        })?;
        let mut record: serde_json::Value = serde_json::from_str(&contents)?;
        if let Some(fields) = record.as_object_mut()
            && !fields.contains_key("settings")
        {
            fields.insert("settings".to_string(), serde_json::to_value(defaults)?);
        }
        let mut session: Session = serde_json::from_value(record)?;
        session.sort_by_sequence();
        if session.ensure_ids() {
            log::warn!(
                "session: {} predates chunk ids; assigned new ids and saved",
                path.display()
            );
            write_json(path, &session)?;
        }
        Ok(session)
    }
}

impl SessionStore for JsonSessionStore {
    fn save(&self, session: &Session) -> Result<()> {
        let path = self.path_for(&session.name);
        write_json(&path, session)?;
        log::debug!("session: saved '{}'", session.name);
        Ok(())
    }
}

/// Write through a sibling temp file so a crash never leaves half a session.
fn write_json(path: &Path, session: &Session) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let tmp = path.with_extension("json.tmp");
    fs::write(&tmp, serde_json::to_string_pretty(session)?)?;
    fs::rename(&tmp, path)?;
    Ok(())
}
