//! Branch protocol types
//!
//! The coordinator treats every type uniformly except for the async-commit
//! capability, which only AT branches have (their phase-two commit is
//! idempotent and may be deferred to a background sweeper).

use std::fmt;

/// Which resource-manager protocol governs a branch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum BranchType {
    /// Automatic (undo-log based) branches
    At,
    /// Try-confirm-cancel branches
    Tcc,
    /// XA protocol branches
    Xa,
}

impl BranchType {
    /// Wire name of this type
    pub fn name(&self) -> &'static str {
        match self {
            BranchType::At => "AT",
            BranchType::Tcc => "TCC",
            BranchType::Xa => "XA",
        }
    }

    /// Resolve a wire name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "AT" => Some(BranchType::At),
            "TCC" => Some(BranchType::Tcc),
            "XA" => Some(BranchType::Xa),
            _ => None,
        }
    }

    /// Whether phase-two commit for this type may be deferred
    pub fn supports_async_commit(&self) -> bool {
        matches!(self, BranchType::At)
    }
}

impl fmt::Display for BranchType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}
