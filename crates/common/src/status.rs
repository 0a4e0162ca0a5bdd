//! Global and branch transaction statuses
//!
//! The integer codes are the stable wire contract shared with existing
//! deployments; they appear verbatim in stored records and replicated
//! entries and must never be renumbered.

use std::fmt;

/// Status of a global transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GlobalStatus {
    /// Accepting branch registrations
    Begin,
    /// Phase-two commit is being driven synchronously
    Committing,
    /// Commit failed at least once and is queued for retry
    CommitRetrying,
    /// Phase-two rollback is being driven
    Rollbacking,
    /// Rollback failed at least once and is queued for retry
    RollbackRetrying,
    /// Rolled back because the session outlived its timeout
    TimeoutRollbacking,
    /// Timeout rollback failed at least once and is queued for retry
    TimeoutRollbackRetrying,
    /// Every branch can commit asynchronously; a sweeper finishes the work
    AsyncCommitting,
    /// Terminal: all branches committed
    Committed,
    /// Terminal: commit failed on an unretryable branch
    CommitFailed,
    /// Terminal: all branches rolled back
    Rollbacked,
    /// Terminal: rollback failed on an unretryable branch
    RollbackFailed,
    /// Terminal: the transaction is unknown or fully cleaned up
    Finished,
}

impl GlobalStatus {
    /// Stable wire code
    pub fn code(&self) -> i32 {
        match self {
            GlobalStatus::Begin => 1,
            GlobalStatus::Committing => 2,
            GlobalStatus::CommitRetrying => 3,
            GlobalStatus::Rollbacking => 4,
            GlobalStatus::RollbackRetrying => 5,
            GlobalStatus::TimeoutRollbacking => 6,
            GlobalStatus::TimeoutRollbackRetrying => 7,
            GlobalStatus::AsyncCommitting => 8,
            GlobalStatus::Committed => 9,
            GlobalStatus::CommitFailed => 10,
            GlobalStatus::Rollbacked => 11,
            GlobalStatus::RollbackFailed => 12,
            GlobalStatus::Finished => 15,
        }
    }

    /// Resolve a wire code
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            1 => GlobalStatus::Begin,
            2 => GlobalStatus::Committing,
            3 => GlobalStatus::CommitRetrying,
            4 => GlobalStatus::Rollbacking,
            5 => GlobalStatus::RollbackRetrying,
            6 => GlobalStatus::TimeoutRollbacking,
            7 => GlobalStatus::TimeoutRollbackRetrying,
            8 => GlobalStatus::AsyncCommitting,
            9 => GlobalStatus::Committed,
            10 => GlobalStatus::CommitFailed,
            11 => GlobalStatus::Rollbacked,
            12 => GlobalStatus::RollbackFailed,
            15 => GlobalStatus::Finished,
            _ => return None,
        };
        Some(status)
    }

    /// Terminal statuses are sinks: no transition originates from them
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            GlobalStatus::Committed
                | GlobalStatus::CommitFailed
                | GlobalStatus::Rollbacked
                | GlobalStatus::RollbackFailed
                | GlobalStatus::Finished
        )
    }

    /// True for every status on the rollback side of the state machine
    /// that still has work pending
    pub fn is_rollback_pending(&self) -> bool {
        matches!(
            self,
            GlobalStatus::Rollbacking
                | GlobalStatus::RollbackRetrying
                | GlobalStatus::TimeoutRollbacking
                | GlobalStatus::TimeoutRollbackRetrying
        )
    }
}

impl fmt::Display for GlobalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Status of a branch transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchStatus {
    /// Enlisted under its global, phase one not yet reported
    Registered,
    /// Phase one succeeded on the resource
    PhaseOneDone,
    /// Phase one failed; the branch never took effect
    PhaseOneFailed,
    /// Phase-two commit succeeded
    PhaseTwoCommitted,
    /// Phase-two commit failed but may be retried
    PhaseTwoCommitFailedRetryable,
    /// Phase-two commit failed permanently
    PhaseTwoCommitFailedUnretryable,
    /// Phase-two rollback succeeded
    PhaseTwoRollbacked,
    /// Phase-two rollback failed but may be retried
    PhaseTwoRollbackFailedRetryable,
    /// Phase-two rollback failed permanently
    PhaseTwoRollbackFailedUnretryable,
}

impl BranchStatus {
    /// Stable wire code
    pub fn code(&self) -> i32 {
        match self {
            BranchStatus::Registered => 1,
            BranchStatus::PhaseOneDone => 2,
            BranchStatus::PhaseOneFailed => 3,
            BranchStatus::PhaseTwoCommitted => 5,
            BranchStatus::PhaseTwoCommitFailedRetryable => 6,
            BranchStatus::PhaseTwoCommitFailedUnretryable => 7,
            BranchStatus::PhaseTwoRollbacked => 8,
            BranchStatus::PhaseTwoRollbackFailedRetryable => 9,
            BranchStatus::PhaseTwoRollbackFailedUnretryable => 10,
        }
    }

    /// Resolve a wire code
    pub fn from_code(code: i32) -> Option<Self> {
        let status = match code {
            1 => BranchStatus::Registered,
            2 => BranchStatus::PhaseOneDone,
            3 => BranchStatus::PhaseOneFailed,
            5 => BranchStatus::PhaseTwoCommitted,
            6 => BranchStatus::PhaseTwoCommitFailedRetryable,
            7 => BranchStatus::PhaseTwoCommitFailedUnretryable,
            8 => BranchStatus::PhaseTwoRollbacked,
            9 => BranchStatus::PhaseTwoRollbackFailedRetryable,
            10 => BranchStatus::PhaseTwoRollbackFailedUnretryable,
            _ => return None,
        };
        Some(status)
    }
}

impl fmt::Display for BranchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_status_code_roundtrip() {
        let all = [
            GlobalStatus::Begin,
            GlobalStatus::Committing,
            GlobalStatus::CommitRetrying,
            GlobalStatus::Rollbacking,
            GlobalStatus::RollbackRetrying,
            GlobalStatus::TimeoutRollbacking,
            GlobalStatus::TimeoutRollbackRetrying,
            GlobalStatus::AsyncCommitting,
            GlobalStatus::Committed,
            GlobalStatus::CommitFailed,
            GlobalStatus::Rollbacked,
            GlobalStatus::RollbackFailed,
            GlobalStatus::Finished,
        ];
        for status in all {
            assert_eq!(GlobalStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(GlobalStatus::from_code(99), None);
    }

    #[test]
    fn test_branch_status_code_roundtrip() {
        let all = [
            BranchStatus::Registered,
            BranchStatus::PhaseOneDone,
            BranchStatus::PhaseOneFailed,
            BranchStatus::PhaseTwoCommitted,
            BranchStatus::PhaseTwoCommitFailedRetryable,
            BranchStatus::PhaseTwoCommitFailedUnretryable,
            BranchStatus::PhaseTwoRollbacked,
            BranchStatus::PhaseTwoRollbackFailedRetryable,
            BranchStatus::PhaseTwoRollbackFailedUnretryable,
        ];
        for status in all {
            assert_eq!(BranchStatus::from_code(status.code()), Some(status));
        }
        assert_eq!(BranchStatus::from_code(4), None);
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(GlobalStatus::Committed.is_terminal());
        assert!(GlobalStatus::Rollbacked.is_terminal());
        assert!(GlobalStatus::CommitFailed.is_terminal());
        assert!(GlobalStatus::RollbackFailed.is_terminal());
        assert!(GlobalStatus::Finished.is_terminal());
        assert!(!GlobalStatus::Begin.is_terminal());
        assert!(!GlobalStatus::AsyncCommitting.is_terminal());
    }
}
