//! Session store contract
//!
//! One contract, two backends: the KV store persists every mutation
//! synchronously against a shared remote KV service; the replicated store
//! keeps sessions in memory and orders mutations through the consensus
//! log. The coordinator only ever talks to this trait.

use crate::{BranchSession, GlobalSession, Result};
use async_trait::async_trait;
use concord_common::GlobalStatus;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Shared handle to a live session; the inner mutex is the per-session
/// lock held across store writes and branch capability calls
pub type SharedSession = Arc<tokio::sync::Mutex<GlobalSession>>;

/// Wire name of the root session map
pub const ROOT_SESSION_NAME: &str = "root";

/// The retry side queues kept next to the root live set
///
/// Enqueueing adds a session to the corresponding set in the store;
/// background sweepers drive their members with `retrying = true`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SessionQueue {
    /// Sessions whose remaining phase-two commits are deferred
    #[serde(rename = "asyncCommitting")]
    AsyncCommitting,
    /// Sessions whose commit must be re-driven
    #[serde(rename = "retryCommitting")]
    RetryCommitting,
    /// Sessions whose rollback must be re-driven
    #[serde(rename = "retryRollbacking")]
    RetryRollbacking,
}

impl SessionQueue {
    /// Wire name of the queue's session map
    pub fn name(&self) -> &'static str {
        match self {
            SessionQueue::AsyncCommitting => "asyncCommitting",
            SessionQueue::RetryCommitting => "retryCommitting",
            SessionQueue::RetryRollbacking => "retryRollbacking",
        }
    }

    /// Resolve a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "asyncCommitting" => Some(SessionQueue::AsyncCommitting),
            "retryCommitting" => Some(SessionQueue::RetryCommitting),
            "retryRollbacking" => Some(SessionQueue::RetryRollbacking),
            _ => None,
        }
    }

    /// Statuses that mean "member of this queue" for backends that keep
    /// no queue records and select by status instead
    pub fn statuses(&self) -> &'static [GlobalStatus] {
        match self {
            SessionQueue::AsyncCommitting => &[GlobalStatus::AsyncCommitting],
            SessionQueue::RetryCommitting => {
                &[GlobalStatus::Committing, GlobalStatus::CommitRetrying]
            }
            SessionQueue::RetryRollbacking => &[
                GlobalStatus::Rollbacking,
                GlobalStatus::RollbackRetrying,
                GlobalStatus::TimeoutRollbacking,
                GlobalStatus::TimeoutRollbackRetrying,
            ],
        }
    }
}

/// Selection predicate for `read_by_condition`
///
/// `xid` takes precedence over `transaction_id`, which takes precedence
/// over `statuses`.
#[derive(Debug, Clone, Default)]
pub struct SessionCondition {
    pub xid: Option<String>,
    pub transaction_id: Option<i64>,
    pub statuses: Vec<GlobalStatus>,
}

/// The pluggable session store
///
/// Mutating methods that take a `&GlobalSession` snapshot are called
/// while the caller holds the per-session mutex; implementations must not
/// try to lock the session again on those paths.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Persist a newly begun global session (`ADD_GLOBAL`)
    ///
    /// Takes the shared handle so in-memory backends can index the same
    /// object the coordinator drives; callers must not hold the session
    /// lock.
    async fn add_global(&self, handle: &SharedSession, global: &GlobalSession) -> Result<()>;

    /// Persist a status change of the global (`UPDATE_GLOBAL`)
    async fn update_global_status(&self, global: &GlobalSession) -> Result<()>;

    /// Remove the global and its cleanup records (`REMOVE_GLOBAL`);
    /// also evicts the session from every retry queue
    async fn remove_global(&self, global: &GlobalSession) -> Result<()>;

    /// Persist a newly registered branch (`ADD_BRANCH`)
    async fn add_branch(&self, global: &GlobalSession, branch: &BranchSession) -> Result<()>;

    /// Persist a branch status change (`UPDATE_BRANCH_STATUS`)
    async fn update_branch_status(
        &self,
        global: &GlobalSession,
        branch: &BranchSession,
    ) -> Result<()>;

    /// Remove one branch (`REMOVE_BRANCH`)
    async fn remove_branch(
        &self,
        global: &GlobalSession,
        branch: &BranchSession,
    ) -> Result<()>;

    /// Live handle for an in-flight transaction, if it exists
    async fn find(&self, xid: &str) -> Result<Option<SharedSession>>;

    /// Materialize a session, optionally with its branches
    async fn read_global(&self, xid: &str, with_branches: bool) -> Result<Option<GlobalSession>>;

    /// Materialize every session whose status is in `statuses`
    async fn read_by_statuses(&self, statuses: &[GlobalStatus]) -> Result<Vec<GlobalSession>>;

    /// Materialize sessions matching the condition
    async fn read_by_condition(&self, condition: &SessionCondition) -> Result<Vec<GlobalSession>>;

    /// Add the session to a retry queue; called under the session lock
    async fn enqueue(
        &self,
        queue: SessionQueue,
        handle: &SharedSession,
        global: &GlobalSession,
    ) -> Result<()>;

    /// Drop the session from a retry queue
    async fn dequeue(&self, queue: SessionQueue, xid: &str) -> Result<()>;

    /// Current members of a retry queue
    async fn queued(&self, queue: SessionQueue) -> Result<Vec<SharedSession>>;

    /// Whether a completed rollback must re-read the store to catch
    /// branches registered concurrently on a stale replica
    ///
    /// Only the KV backend answers true; the replicated backend orders
    /// registrations through the log and needs no second read.
    fn recheck_on_rollback(&self) -> bool {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_queue_names_roundtrip() {
        for queue in [
            SessionQueue::AsyncCommitting,
            SessionQueue::RetryCommitting,
            SessionQueue::RetryRollbacking,
        ] {
            assert_eq!(SessionQueue::from_name(queue.name()), Some(queue));
            // The serialized form matches the wire name.
            let json = serde_json::to_string(&queue).unwrap();
            assert_eq!(json, format!("\"{}\"", queue.name()));
        }
        assert_eq!(SessionQueue::from_name("root"), None);
    }

    #[test]
    fn test_queue_statuses_cover_their_phases() {
        assert!(
            SessionQueue::RetryRollbacking
                .statuses()
                .contains(&GlobalStatus::TimeoutRollbackRetrying)
        );
        assert!(
            SessionQueue::RetryCommitting
                .statuses()
                .contains(&GlobalStatus::Committing)
        );
        assert_eq!(
            SessionQueue::AsyncCommitting.statuses(),
            &[GlobalStatus::AsyncCommitting]
        );
    }
}
