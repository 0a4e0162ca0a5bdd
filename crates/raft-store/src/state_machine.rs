//! State-machine face of the replicated store
//!
//! The consensus service drives these callbacks on every replica. Apply
//! failures are logged and skipped rather than halting the log: a
//! malformed entry must never wedge the group.

use crate::store::RaftSessionStore;
use concord_consensus::{SessionSyncMessage, SnapshotDone, SnapshotReader, SnapshotWriter, StateMachine};
use async_trait::async_trait;

#[async_trait]
impl StateMachine for RaftSessionStore {
    async fn on_apply(&self, entry: &[u8]) {
        match SessionSyncMessage::decode(entry) {
            Ok(message) => self.apply(message).await,
            Err(e) => tracing::error!("failed to decode replicated entry: {}", e),
        }
    }

    async fn on_leader_start(&self, term: u64) {
        tracing::info!("became leader of term {}, reloading in-flight rollbacks", term);
        self.reload_rollback_retries().await;
    }

    async fn on_leader_stop(&self) {
        tracing::info!("stopped leading");
    }

    async fn on_snapshot_save(&self, writer: SnapshotWriter, done: SnapshotDone) {
        self.save_snapshot(writer, done).await;
    }

    async fn on_snapshot_load(&self, reader: SnapshotReader) -> bool {
        self.load_snapshot(reader).await
    }
}
