//! Error taxonomy for coordinator operations

use thiserror::Error;

/// Result type for coordinator and store operations
pub type Result<T> = std::result::Result<T, TransactionError>;

/// Errors surfaced by the coordinator and its stores
///
/// Capability-level branch failures are absorbed by the state machine on
/// the first attempt (the retry queues are the recovery path); store and
/// consensus failures always propagate to the caller.
#[derive(Debug, Error)]
pub enum TransactionError {
    /// Operation referenced an unknown xid
    #[error("global transaction not found: {0}")]
    TransactionNotExist(String),

    /// Branch registration against a closed global
    #[error("global transaction {xid} is not active: {reason}")]
    GlobalTransactionNotActive { xid: String, reason: String },

    /// The lock capability refused the branch's write set
    #[error("lock conflict on keys: {0}")]
    LockConflict(String),

    /// A branch was referenced that its global does not own
    #[error("branch {branch_id} not found under {xid}")]
    BranchNotExist { xid: String, branch_id: i64 },

    /// A branch capability call failed
    #[error("branch {branch_id} of {xid} failed: {reason}")]
    BranchExecution {
        xid: String,
        branch_id: i64,
        reason: String,
    },

    /// No driver is registered for the branch type
    #[error("unsupported branch type: {0}")]
    UnsupportedBranchType(String),

    /// Session store failure; the write may not have taken effect
    #[error("session store failure: {0}")]
    Store(String),

    /// Consensus propose/apply failure; the entry must not be treated
    /// as applied
    #[error("consensus failure: {0}")]
    Consensus(String),

    /// Record encode/decode failure
    #[error("codec failure: {0}")]
    Codec(#[from] serde_json::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}
