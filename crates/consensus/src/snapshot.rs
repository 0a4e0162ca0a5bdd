//! Snapshot directory handles
//!
//! Thin handles the consensus service passes to the state machine. The
//! writer records which files a save produced so the service can ship
//! them to lagging followers; the reader only resolves paths.

use parking_lot::Mutex;
use std::path::{Path, PathBuf};

/// Write-side handle for one snapshot save
pub struct SnapshotWriter {
    dir: PathBuf,
    files: Mutex<Vec<String>>,
}

impl SnapshotWriter {
    pub fn new(dir: impl AsRef<Path>) -> std::io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            dir,
            files: Mutex::new(Vec::new()),
        })
    }

    /// Directory the snapshot files belong in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Register a produced file with the snapshot
    pub fn add_file(&self, name: &str) {
        self.files.lock().push(name.to_string());
    }

    /// Files registered so far
    pub fn files(&self) -> Vec<String> {
        self.files.lock().clone()
    }
}

/// Read-side handle for one snapshot load
pub struct SnapshotReader {
    dir: PathBuf,
}

impl SnapshotReader {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    /// Directory the snapshot files live in
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Whether the snapshot contains the named file
    pub fn contains(&self, name: &str) -> bool {
        self.dir.join(name).is_file()
    }
}
