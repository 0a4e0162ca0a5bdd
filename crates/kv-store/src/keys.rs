//! Literal key schema of the KV backend
//!
//! These prefixes are the on-the-wire contract with existing deployments
//! and must not change.

/// Global session by xid
pub const GLOBAL_PREFIX: &str = "SEATA_GLOBAL_";

/// Global session by transaction id (secondary index)
pub const TRANSACTION_ID_PREFIX: &str = "SEATA_TRANSACTION_ID_GLOBAL_";

/// List of branch keys owned by a global, LPUSH-ordered (newest first)
pub const BRANCH_LIST_PREFIX: &str = "SEATA_XID_BRANCHS_";

/// Branch session by branch id
pub const BRANCH_PREFIX: &str = "SEATA_BRANCH_";

pub fn global_key(xid: &str) -> String {
    format!("{}{}", GLOBAL_PREFIX, xid)
}

pub fn transaction_id_key(transaction_id: i64) -> String {
    format!("{}{}", TRANSACTION_ID_PREFIX, transaction_id)
}

pub fn branch_list_key(xid: &str) -> String {
    format!("{}{}", BRANCH_LIST_PREFIX, xid)
}

pub fn branch_key(branch_id: i64) -> String {
    format!("{}{}", BRANCH_PREFIX, branch_id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_layout() {
        assert_eq!(global_key("tc:1"), "SEATA_GLOBAL_tc:1");
        assert_eq!(transaction_id_key(1), "SEATA_TRANSACTION_ID_GLOBAL_1");
        assert_eq!(branch_list_key("tc:1"), "SEATA_XID_BRANCHS_tc:1");
        assert_eq!(branch_key(7), "SEATA_BRANCH_7");
    }
}
