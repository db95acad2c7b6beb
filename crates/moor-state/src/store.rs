use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use moor_core::{ConfigSnapshot, GlobalState, MoorError, StateLimits, TrackedRecord};
use tracing::{debug, warn};

/// Durable name → record map backed by a single JSON document.
///
/// The document is read once, mutated in memory and written back whole.
/// Writes go to a temp sibling which is renamed over the target, so a crash
/// never leaves a truncated document behind.
pub struct StateStore {
    path: PathBuf,
    doc: GlobalState,
    limits: StateLimits,
    snapshot: Option<ConfigSnapshot>,
}

fn io_err(path: &Path, what: &str, e: impl std::fmt::Display) -> MoorError {
    MoorError::StateIo { path: path.to_path_buf(), cause: format!("{what}: {e}") }
}

impl StateStore {
    pub fn open(path: impl Into<PathBuf>, limits: StateLimits) -> Result<Self, MoorError> {
        let path = path.into();
        let doc = Self::load(&path)?;
        Ok(Self { path, doc, limits, snapshot: None })
    }

    /// Reads the document, or an empty one when the file does not exist yet.
    pub fn load(path: &Path) -> Result<GlobalState, MoorError> {
        let bytes = match fs::read(path) {
            Ok(b) => b,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = %path.display(), "no state document yet");
                return Ok(GlobalState::default());
            }
            Err(e) => return Err(io_err(path, "read", e)),
        };
        serde_json::from_slice(&bytes)
            .map_err(|e| MoorError::StateCorruption { path: path.to_path_buf(), cause: e.to_string() })
    }

    /// Replaces whatever is at `path` with an empty document. Only ever on explicit request.
    pub fn reset(path: &Path) -> Result<(), MoorError> {
        warn!(path = %path.display(), "resetting state document");
        write_atomic(path, &GlobalState::default())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn limits(&self) -> StateLimits {
        self.limits
    }

    /// Config values written into the document on every save.
    pub fn set_config_snapshot(&mut self, snapshot: ConfigSnapshot) {
        self.snapshot = Some(snapshot);
    }

    pub fn state(&self) -> &GlobalState {
        &self.doc
    }

    pub fn get(&self, name: &str) -> Option<&TrackedRecord> {
        self.doc.get(name)
    }

    pub fn records(&self) -> Vec<TrackedRecord> {
        self.doc.operations.values().cloned().collect()
    }

    pub fn names(&self) -> Vec<String> {
        self.doc.names()
    }

    pub fn last_container(&self) -> Option<&str> {
        self.doc.last_container.as_deref()
    }

    pub fn put(&mut self, record: TrackedRecord) {
        self.doc.upsert(record, self.limits);
    }

    pub fn remove(&mut self, name: &str) -> Option<TrackedRecord> {
        self.doc.remove(name)
    }

    /// Re-reads the document from disk. On failure the in-memory copy is kept.
    pub fn reload(&mut self) -> Result<(), MoorError> {
        self.doc = Self::load(&self.path)?;
        Ok(())
    }

    pub fn save(&mut self) -> Result<(), MoorError> {
        if let Some(s) = &self.snapshot {
            self.doc.config = s.clone();
        }
        write_atomic(&self.path, &self.doc)
    }
}

fn write_atomic(path: &Path, doc: &GlobalState) -> Result<(), MoorError> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| io_err(path, "create parent dir", e))?;
    }
    let mut bytes = serde_json::to_vec_pretty(doc).map_err(|e| io_err(path, "serialize", e))?;
    bytes.push(b'\n');

    let file_name = path.file_name().map(|n| n.to_string_lossy().into_owned()).unwrap_or_else(|| "state".to_string());
    let tmp = path.with_file_name(format!(".{file_name}.tmp.{}", std::process::id()));
    let mut f = fs::File::create(&tmp).map_err(|e| io_err(path, "create temp file", e))?;
    f.write_all(&bytes).map_err(|e| io_err(path, "write temp file", e))?;
    f.sync_all().map_err(|e| io_err(path, "sync temp file", e))?;
    drop(f);

    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(io_err(path, "rename temp file", e));
    }
    debug!(path = %path.display(), records = doc.operations.len(), "state saved");
    Ok(())
}
