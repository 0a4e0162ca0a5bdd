//! Lock manager for replicated mode
//!
//! The leader decides conflicts against its local lock table; winning
//! acquisitions are replicated so every follower feeds its own table
//! from the log and can serve lock checks after a handover. Per-branch
//! releases reach followers through branch-removal entries, so only the
//! global release has a message of its own.

use concord_common::BranchType;
use concord_consensus::{ConsensusService, SessionSyncMessage, SyncBody};
use concord_session::{
    BranchSession, BranchTransactionRecord, GlobalSession, LockManager, Result, TransactionError,
};
use async_trait::async_trait;
use std::sync::{Arc, OnceLock};

/// Replicating wrapper around the node-local lock table
pub struct RaftLockManager {
    inner: Arc<dyn LockManager>,
    consensus: OnceLock<Arc<dyn ConsensusService>>,
}

impl RaftLockManager {
    /// Wrap the local lock table the replicated store also applies into
    pub fn new(inner: Arc<dyn LockManager>) -> Self {
        Self {
            inner,
            consensus: OnceLock::new(),
        }
    }

    /// Attach the node's consensus handle
    pub fn bind(&self, consensus: Arc<dyn ConsensusService>) {
        let _ = self.consensus.set(consensus);
    }

    async fn replicate(&self, body: SyncBody) -> Result<()> {
        let Some(consensus) = self.consensus.get() else {
            return Ok(());
        };
        if !consensus.is_leader() {
            return Ok(());
        }
        let entry = SessionSyncMessage::root(body)
            .encode()
            .map_err(|e| TransactionError::Consensus(e.to_string()))?;
        consensus
            .propose(entry)
            .await
            .map_err(|e| TransactionError::Consensus(e.to_string()))
    }
}

#[async_trait]
impl LockManager for RaftLockManager {
    async fn acquire(&self, branch: &BranchSession) -> Result<bool> {
        if !self.inner.acquire(branch).await? {
            return Ok(false);
        }
        self.replicate(SyncBody::AcquireLock(BranchTransactionRecord::from_session(
            branch,
        )))
        .await?;
        Ok(true)
    }

    async fn release(&self, branch: &BranchSession) -> Result<()> {
        self.inner.release(branch).await
    }

    async fn release_global(&self, global: &GlobalSession) -> Result<()> {
        self.inner.release_global(global).await?;
        self.replicate(SyncBody::ReleaseGlobalLock {
            xid: global.xid.clone(),
        })
        .await
    }

    async fn query(
        &self,
        branch_type: BranchType,
        resource_id: &str,
        xid: &str,
        lock_keys: &str,
    ) -> Result<bool> {
        self.inner
            .query(branch_type, resource_id, xid, lock_keys)
            .await
    }
}
