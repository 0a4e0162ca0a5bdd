//! Replicated session-sync entries
//!
//! Every coordinator mutation becomes one of these messages. `target`
//! names the destination session map on the replicas; `None` addresses
//! the root map. Handlers must treat replayed messages as no-ops: an add
//! of an existing id is an update, a remove of a missing id does nothing.

use crate::{ConsensusError, ConsensusResult};
use concord_session::{BranchTransactionRecord, GlobalTransactionRecord, SessionQueue};
use serde::{Deserialize, Serialize};

/// One replicated coordinator mutation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSyncMessage {
    /// Destination session map; `None` is the root map
    pub target: Option<SessionQueue>,
    pub body: SyncBody,
}

/// The mutation payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SyncBody {
    AddGlobal(GlobalTransactionRecord),
    UpdateGlobalStatus { xid: String, status: i32 },
    RemoveGlobal { xid: String },
    AddBranch(BranchTransactionRecord),
    UpdateBranchStatus { xid: String, branch_id: i64, status: i32 },
    RemoveBranch { xid: String, branch_id: i64 },
    AcquireLock(BranchTransactionRecord),
    ReleaseGlobalLock { xid: String },
    /// Branch statuses observed by the leader's phase-two commit pass
    PhaseTwoCommit { xid: String, branch_statuses: Vec<(i64, i32)> },
    /// Branch statuses observed by the leader's phase-two rollback pass
    PhaseTwoRollback { xid: String, branch_statuses: Vec<(i64, i32)> },
}

impl SessionSyncMessage {
    /// Message addressed to the root map
    pub fn root(body: SyncBody) -> Self {
        Self { target: None, body }
    }

    /// Message addressed to a retry-queue map
    pub fn to_queue(queue: SessionQueue, body: SyncBody) -> Self {
        Self {
            target: Some(queue),
            body,
        }
    }

    /// Serialize into log-entry bytes
    pub fn encode(&self) -> ConsensusResult<Vec<u8>> {
        serde_json::to_vec(self).map_err(ConsensusError::from)
    }

    /// Deserialize from log-entry bytes
    pub fn decode(bytes: &[u8]) -> ConsensusResult<Self> {
        serde_json::from_slice(bytes).map_err(ConsensusError::from)
    }
}
