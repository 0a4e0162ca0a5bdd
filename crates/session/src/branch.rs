//! Branch session domain object

use concord_common::{BranchStatus, BranchType};

/// One branch transaction enlisted under a global
#[derive(Debug, Clone)]
pub struct BranchSession {
    /// Owning global transaction
    pub xid: String,
    /// Unique within the owning global
    pub branch_id: i64,
    /// Transaction id of the owning global
    pub transaction_id: i64,
    /// Protocol governing this branch
    pub branch_type: BranchType,
    /// Resource the branch executed against
    pub resource_id: String,
    /// Resource group, when the client reports one
    pub resource_group_id: Option<String>,
    /// Client connection that registered the branch
    pub client_id: String,
    /// Opaque application payload
    pub application_data: Option<String>,
    /// Row keys the branch holds locks on
    pub lock_key: Option<String>,
    /// Current branch status
    pub status: BranchStatus,
}

impl BranchSession {
    /// Whether phase-two commit of this branch may be deferred to the
    /// async sweeper
    pub fn can_be_committed_async(&self) -> bool {
        self.branch_type.supports_async_commit()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn branch(branch_type: BranchType) -> BranchSession {
        BranchSession {
            xid: "tc:1".to_string(),
            branch_id: 2,
            transaction_id: 1,
            branch_type,
            resource_id: "res".to_string(),
            resource_group_id: None,
            client_id: "client".to_string(),
            application_data: None,
            lock_key: None,
            status: BranchStatus::Registered,
        }
    }

    #[test]
    fn test_async_commit_follows_branch_type() {
        assert!(branch(BranchType::At).can_be_committed_async());
        assert!(!branch(BranchType::Tcc).can_be_committed_async());
    }
}
