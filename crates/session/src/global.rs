//! Global session domain object
//!
//! A global owns its branches as an ordered sequence; branch insertion
//! order defines commit order and its reverse defines rollback order.
//! Shared access goes through `SharedSession` so that every index entry
//! for a transaction refers to the same object behind one mutex.

use crate::BranchSession;
use concord_common::{GlobalStatus, Timestamp};

/// One global transaction tracked by the coordinator
#[derive(Debug, Clone)]
pub struct GlobalSession {
    /// Globally unique transaction identifier
    pub xid: String,
    /// 64-bit id assigned by this coordinator; secondary index key
    pub transaction_id: i64,
    /// Application that started the transaction
    pub application_id: String,
    /// Transaction service group of the application
    pub transaction_service_group: String,
    /// Client-supplied transaction name
    pub transaction_name: String,
    /// Timeout budget in milliseconds
    pub timeout_ms: i64,
    /// When `begin` ran
    pub begin_time: Timestamp,
    /// Opaque application payload
    pub application_data: Option<String>,
    /// Current status
    pub status: GlobalStatus,
    /// Closed sessions refuse new branch registrations
    active: bool,
    /// Owned branches in registration order
    branches: Vec<BranchSession>,
}

impl GlobalSession {
    /// Create a session in status `Begin`, open for registrations
    pub fn new(
        xid: String,
        transaction_id: i64,
        application_id: String,
        transaction_service_group: String,
        transaction_name: String,
        timeout_ms: i64,
    ) -> Self {
        Self {
            xid,
            transaction_id,
            application_id,
            transaction_service_group,
            transaction_name,
            timeout_ms,
            begin_time: Timestamp::now(),
            application_data: None,
            status: GlobalStatus::Begin,
            active: true,
            branches: Vec::new(),
        }
    }

    /// Wrap into the shared per-session handle
    pub fn into_shared(self) -> crate::SharedSession {
        std::sync::Arc::new(tokio::sync::Mutex::new(self))
    }

    /// Whether new branches may still register
    pub fn is_active(&self) -> bool {
        self.active
    }

    /// Close the session to new branch registrations
    pub fn close(&mut self) {
        self.active = false;
    }

    /// Force the registration flag; used when a session is reconstructed
    /// from a record or a snapshot
    pub fn set_active(&mut self, active: bool) {
        self.active = active;
    }

    /// Append a branch; registration order is preserved
    pub fn add_branch(&mut self, branch: BranchSession) {
        self.branches.push(branch);
    }

    /// Remove a branch by id
    pub fn remove_branch(&mut self, branch_id: i64) -> Option<BranchSession> {
        let index = self.branches.iter().position(|b| b.branch_id == branch_id)?;
        Some(self.branches.remove(index))
    }

    /// Look up a branch by id
    pub fn branch(&self, branch_id: i64) -> Option<&BranchSession> {
        self.branches.iter().find(|b| b.branch_id == branch_id)
    }

    /// Look up a branch by id for mutation
    pub fn branch_mut(&mut self, branch_id: i64) -> Option<&mut BranchSession> {
        self.branches.iter_mut().find(|b| b.branch_id == branch_id)
    }

    /// Owned branches in registration order
    pub fn branches(&self) -> &[BranchSession] {
        &self.branches
    }

    /// Whether any branch remains
    pub fn has_branch(&self) -> bool {
        !self.branches.is_empty()
    }

    /// Drop all branches; used when materializing a branchless view
    pub fn clear_branches(&mut self) {
        self.branches.clear();
    }

    /// Snapshot of the branches in commit order
    pub fn branches_snapshot(&self) -> Vec<BranchSession> {
        self.branches.clone()
    }

    /// Snapshot of the branches in rollback order
    pub fn branches_snapshot_reversed(&self) -> Vec<BranchSession> {
        let mut branches = self.branches.clone();
        branches.reverse();
        branches
    }

    /// Whether every branch tolerates a deferred phase-two commit
    pub fn can_be_committed_async(&self) -> bool {
        self.branches.iter().all(|b| b.can_be_committed_async())
    }

    /// Whether the session outlived its timeout budget
    pub fn is_timeout(&self, now: Timestamp) -> bool {
        now > self.begin_time.add_millis(self.timeout_ms)
    }
}
