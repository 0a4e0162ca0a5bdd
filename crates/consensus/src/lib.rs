//! Consensus service contracts and the in-process implementation
//!
//! The coordinator never talks to a concrete consensus library; it
//! proposes opaque entries through `ConsensusService` and receives them
//! back, totally ordered, through the `StateMachine` callbacks. The
//! leader-side closure of the underlying log becomes the code that runs
//! after `propose(...).await` resolves.

mod entry;
mod local;
mod snapshot;

use async_trait::async_trait;
use thiserror::Error;

pub use entry::{SessionSyncMessage, SyncBody};
pub use local::{LocalCluster, LocalNode};
pub use snapshot::{SnapshotReader, SnapshotWriter};

/// Result type for consensus operations
pub type ConsensusResult<T> = std::result::Result<T, ConsensusError>;

/// Errors from the consensus layer
///
/// A failed propose must never be treated as applied.
#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("not the leader")]
    NotLeader,

    #[error("proposal failed: {0}")]
    ProposalFailed(String),

    #[error("entry codec failure: {0}")]
    Codec(#[from] serde_json::Error),
}

/// Completion callback of an asynchronous snapshot save; invoked exactly
/// once with success or the I/O error
pub type SnapshotDone = Box<dyn FnOnce(std::io::Result<()>) + Send>;

/// Handle to the replicated log, held by the leader-side store
#[async_trait]
pub trait ConsensusService: Send + Sync {
    /// Append an entry to the log; resolves once the entry is committed
    /// and applied on the followers
    async fn propose(&self, entry: Vec<u8>) -> ConsensusResult<()>;

    /// Whether this node currently leads the group
    fn is_leader(&self) -> bool;
}

/// Callbacks driven by the consensus service on every replica
#[async_trait]
pub trait StateMachine: Send + Sync {
    /// Apply one committed entry; must be idempotent, replay is normal
    async fn on_apply(&self, entry: &[u8]);

    /// This node just became leader of `term`
    async fn on_leader_start(&self, _term: u64) {}

    /// This node stopped leading
    async fn on_leader_stop(&self) {}

    /// Persist a snapshot under the writer's directory; `done` must fire
    /// exactly once
    async fn on_snapshot_save(&self, writer: SnapshotWriter, done: SnapshotDone);

    /// Rebuild state from a snapshot; returns false when the snapshot is
    /// unusable (the leader always refuses)
    async fn on_snapshot_load(&self, reader: SnapshotReader) -> bool;
}
