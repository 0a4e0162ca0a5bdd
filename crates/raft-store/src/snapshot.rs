//! Snapshot save and load of the replicated store
//!
//! One `data` file under the snapshot directory holds a serialized
//! two-entry map: the encoded globals keyed by xid and the encoded
//! branches stored flat, keyed by branch id. A `data.meta` sidecar
//! carries size and checksum so a load can spot truncated files.

use crate::store::RaftSessionStore;
use concord_common::{GlobalStatus, Timestamp};
use concord_consensus::{SnapshotDone, SnapshotReader, SnapshotWriter};
use concord_session::{BranchSession, GlobalSession, Result, SessionQueue, SharedSession};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::io;
use std::path::Path;

/// Snapshot data file name, registered with the consensus writer
const SNAPSHOT_FILE: &str = "data";
const SNAPSHOT_META_FILE: &str = "data.meta";

#[derive(Serialize, Deserialize)]
struct SnapshotData {
    #[serde(rename = "rootSessionManager")]
    root: HashMap<String, Vec<u8>>,
    #[serde(rename = "branchSessionMap")]
    branches: HashMap<i64, Vec<u8>>,
}

#[derive(Serialize, Deserialize)]
struct SnapshotMeta {
    size_bytes: u64,
    /// Hex SHA-256 of the data file
    checksum: String,
    created_at: i64,
}

fn sha256_hex(bytes: &[u8]) -> String {
    let digest = Sha256::digest(bytes);
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

fn write_snapshot_files(dir: &Path, data: &SnapshotData) -> io::Result<()> {
    let bytes = serde_json::to_vec(data).map_err(io::Error::other)?;
    let meta = SnapshotMeta {
        size_bytes: bytes.len() as u64,
        checksum: sha256_hex(&bytes),
        created_at: Timestamp::now().as_millis(),
    };
    let meta_bytes = serde_json::to_vec(&meta).map_err(io::Error::other)?;
    std::fs::write(dir.join(SNAPSHOT_FILE), bytes)?;
    std::fs::write(dir.join(SNAPSHOT_META_FILE), meta_bytes)?;
    Ok(())
}

fn read_snapshot_files(dir: &Path) -> io::Result<SnapshotData> {
    let bytes = std::fs::read(dir.join(SNAPSHOT_FILE))?;
    let meta_path = dir.join(SNAPSHOT_META_FILE);
    if meta_path.is_file() {
        let meta: SnapshotMeta =
            serde_json::from_slice(&std::fs::read(&meta_path)?).map_err(io::Error::other)?;
        if meta.checksum != sha256_hex(&bytes) {
            return Err(io::Error::other("snapshot checksum mismatch"));
        }
    }
    serde_json::from_slice(&bytes).map_err(io::Error::other)
}

impl RaftSessionStore {
    /// Consistent encoding of every live session and branch
    async fn collect_snapshot(&self) -> Result<SnapshotData> {
        let mut root = HashMap::new();
        let mut branches = HashMap::new();
        for handle in self.root_snapshot() {
            let session = handle.lock().await;
            root.insert(session.xid.clone(), session.encode()?);
            for branch in session.branches() {
                branches.insert(branch.branch_id, branch.encode()?);
            }
        }
        Ok(SnapshotData { root, branches })
    }

    /// Asynchronous snapshot save; `done` fires exactly once
    ///
    /// The session maps are read into an owned `SnapshotData` before the
    /// file write is dispatched, so later mutations cannot leak into the
    /// snapshot.
    pub(crate) async fn save_snapshot(&self, writer: SnapshotWriter, done: SnapshotDone) {
        if !self.replicated_mode() {
            done(Ok(()));
            return;
        }
        let data = match self.collect_snapshot().await {
            Ok(data) => data,
            Err(e) => {
                done(Err(io::Error::other(e.to_string())));
                return;
            }
        };
        tracing::info!(
            "saving snapshot: {} globals, {} branches",
            data.root.len(),
            data.branches.len()
        );
        tokio::task::spawn_blocking(move || {
            let result = write_snapshot_files(writer.dir(), &data);
            if result.is_ok() {
                writer.add_file(SNAPSHOT_FILE);
            }
            done(result);
        });
    }

    /// Rebuild the replica's maps from a snapshot; the leader refuses
    pub(crate) async fn load_snapshot(&self, reader: SnapshotReader) -> bool {
        if !self.replicated_mode() {
            return false;
        }
        if self.is_leader() {
            tracing::warn!("leader is not supposed to load a snapshot");
            return false;
        }
        if !reader.contains(SNAPSHOT_FILE) {
            tracing::error!("no {} file in {}", SNAPSHOT_FILE, reader.dir().display());
            return false;
        }
        let data = match read_snapshot_files(reader.dir()) {
            Ok(data) => data,
            Err(e) => {
                tracing::error!("failed to read snapshot: {}", e);
                return false;
            }
        };

        let mut loaded: Vec<SharedSession> = Vec::new();
        for (xid, bytes) in &data.root {
            match GlobalSession::decode(bytes) {
                Ok(session) => {
                    let transaction_id = session.transaction_id;
                    let handle = session.into_shared();
                    self.insert_root(xid, transaction_id, handle.clone());
                    loaded.push(handle);
                }
                Err(e) => {
                    tracing::error!("failed to decode global {}: {}", xid, e);
                    return false;
                }
            }
        }

        // Branches are stored flat; ids are monotonic per global, so
        // sorting restores registration order before reattaching.
        let mut branches: Vec<BranchSession> = Vec::with_capacity(data.branches.len());
        for (branch_id, bytes) in &data.branches {
            match BranchSession::decode(bytes) {
                Ok(branch) => branches.push(branch),
                Err(e) => {
                    tracing::error!("failed to decode branch {}: {}", branch_id, e);
                    return false;
                }
            }
        }
        branches.sort_by_key(|b| b.branch_id);
        for branch in branches {
            let Some(handle) = self.find_root(&branch.xid) else {
                tracing::warn!("branch {} has no global {}", branch.branch_id, branch.xid);
                continue;
            };
            let acquired = self.lock_manager().acquire(&branch).await;
            if !matches!(acquired, Ok(true)) {
                tracing::error!(
                    "failed to restore lock of branch {}: {:?}",
                    branch.branch_id,
                    branch.lock_key
                );
            }
            handle.lock().await.add_branch(branch);
        }

        // Sessions caught mid-phase-two resume through their queues.
        for handle in loaded {
            let (xid, status) = {
                let session = handle.lock().await;
                (session.xid.clone(), session.status)
            };
            let queue = match status {
                GlobalStatus::AsyncCommitting => Some(SessionQueue::AsyncCommitting),
                GlobalStatus::CommitRetrying => Some(SessionQueue::RetryCommitting),
                GlobalStatus::RollbackRetrying => Some(SessionQueue::RetryRollbacking),
                _ => None,
            };
            if let Some(queue) = queue {
                self.insert_queued(queue, &xid, handle.clone());
            }
        }
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_checksum_is_stable() {
        assert_eq!(sha256_hex(b"abc").len(), 64);
        assert_eq!(sha256_hex(b"abc"), sha256_hex(b"abc"));
        assert_ne!(sha256_hex(b"abc"), sha256_hex(b"abd"));
    }

    #[test]
    fn test_corrupt_snapshot_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let data = SnapshotData {
            root: HashMap::new(),
            branches: HashMap::new(),
        };
        write_snapshot_files(dir.path(), &data).unwrap();

        // Flip the data file under the metadata's feet.
        std::fs::write(dir.path().join(SNAPSHOT_FILE), b"{}").unwrap();
        assert!(read_snapshot_files(dir.path()).is_err());
    }

    #[test]
    fn test_snapshot_files_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let mut root = HashMap::new();
        root.insert("tc:1".to_string(), b"payload".to_vec());
        let data = SnapshotData {
            root,
            branches: HashMap::new(),
        };
        write_snapshot_files(dir.path(), &data).unwrap();

        let read = read_snapshot_files(dir.path()).unwrap();
        assert_eq!(read.root.get("tc:1").unwrap(), b"payload");
    }
}
