//! ProjectStore - atomic JSON persistence for one project directory

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde::de::DeserializeOwned;
use tracing::{debug, warn};

/// File name of the exported graph
pub const GRAPH_FILE: &str = "graph.json";

/// File name of the append-only event log
pub const EVENTS_FILE: &str = "events.log";

/// Directory holding named snapshots
pub const CHECKPOINTS_DIR: &str = "checkpoints";

/// Errors from store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid checkpoint name: {0:?}")]
    InvalidName(String),
}

/// Handle to one project's state directory
///
/// Cheap to clone; all operations are stateless against the filesystem.
#[derive(Debug, Clone)]
pub struct ProjectStore {
    root: PathBuf,
}

impl ProjectStore {
    /// Open (and create if missing) a project state directory
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StoreError> {
        let root = root.as_ref().to_path_buf();
        debug!(root = %root.display(), "ProjectStore::open");
        fs::create_dir_all(root.join(CHECKPOINTS_DIR))?;
        Ok(Self { root })
    }

    /// Root directory of this store
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Write the exported graph atomically
    pub fn write_graph<T: Serialize>(&self, graph: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(graph)?;
        atomic_write(&self.root.join(GRAPH_FILE), &bytes)?;
        debug!(bytes = bytes.len(), "ProjectStore::write_graph: wrote graph.json");
        Ok(())
    }

    /// Read the exported graph, if one has been written
    pub fn read_graph<T: DeserializeOwned>(&self) -> Result<Option<T>, StoreError> {
        let path = self.root.join(GRAPH_FILE);
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Append one event to the log as a JSON line
    pub fn append_event<T: Serialize>(&self, event: &T) -> Result<(), StoreError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let path = self.root.join(EVENTS_FILE);
        let mut file = fs::OpenOptions::new().create(true).append(true).open(&path)?;
        file.write_all(&line)?;
        Ok(())
    }

    /// Read all persisted events in append order
    ///
    /// Unparsable lines (e.g. a torn tail after a crash) are skipped with a
    /// warning rather than failing the whole read.
    pub fn read_events(&self) -> Result<Vec<serde_json::Value>, StoreError> {
        let path = self.root.join(EVENTS_FILE);
        if !path.exists() {
            return Ok(Vec::new());
        }
        let content = fs::read_to_string(&path)?;
        let mut events = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            match serde_json::from_str(line) {
                Ok(value) => events.push(value),
                Err(e) => warn!(line = idx + 1, error = %e, "Skipping unparsable event log line"),
            }
        }
        Ok(events)
    }

    /// Rewrite the event log keeping only the last `keep_last` entries
    ///
    /// Returns the number of entries dropped.
    pub fn rotate_events(&self, keep_last: usize) -> Result<usize, StoreError> {
        let events = self.read_events()?;
        if events.len() <= keep_last {
            return Ok(0);
        }
        let dropped = events.len() - keep_last;
        let mut buf = Vec::new();
        for event in &events[dropped..] {
            buf.extend_from_slice(&serde_json::to_vec(event)?);
            buf.push(b'\n');
        }
        atomic_write(&self.root.join(EVENTS_FILE), &buf)?;
        debug!(dropped, kept = keep_last, "ProjectStore::rotate_events");
        Ok(dropped)
    }

    /// Write a named snapshot atomically
    pub fn write_checkpoint<T: Serialize>(&self, name: &str, snapshot: &T) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(snapshot)?;
        atomic_write(&self.checkpoint_path(name)?, &bytes)?;
        debug!(name, bytes = bytes.len(), "ProjectStore::write_checkpoint");
        Ok(())
    }

    /// Read a named snapshot, if present
    pub fn read_checkpoint<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>, StoreError> {
        let path = self.checkpoint_path(name)?;
        if !path.exists() {
            return Ok(None);
        }
        let bytes = fs::read(&path)?;
        Ok(Some(serde_json::from_slice(&bytes)?))
    }

    /// Names of all stored snapshots, sorted
    pub fn list_checkpoints(&self) -> Result<Vec<String>, StoreError> {
        let dir = self.root.join(CHECKPOINTS_DIR);
        let mut names = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            let file_name = entry.file_name();
            let file_name = file_name.to_string_lossy();
            if let Some(stem) = file_name.strip_suffix(".json") {
                names.push(stem.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    /// Remove a named snapshot; returns true if it existed
    pub fn delete_checkpoint(&self, name: &str) -> Result<bool, StoreError> {
        let path = self.checkpoint_path(name)?;
        if path.exists() {
            fs::remove_file(&path)?;
            return Ok(true);
        }
        Ok(false)
    }

    fn checkpoint_path(&self, name: &str) -> Result<PathBuf, StoreError> {
        // Names become file names directly, so path separators and dot-files
        // are rejected.
        if name.is_empty()
            || name.contains('/')
            || name.contains('\\')
            || name.starts_with('.')
        {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(CHECKPOINTS_DIR).join(format!("{}.json", name)))
    }
}

/// Write bytes to a temp file in the target's directory, then rename over the
/// target. The rename is atomic on POSIX filesystems.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    let tmp = dir.join(format!(
        ".{}.tmp",
        path.file_name().map(|n| n.to_string_lossy()).unwrap_or_default()
    ));
    {
        let mut file = fs::File::create(&tmp)?;
        file.write_all(bytes)?;
        file.sync_all()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
