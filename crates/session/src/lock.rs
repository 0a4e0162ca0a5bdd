//! Row-lock capability
//!
//! Conflict detection is opaque to the coordinator: it only asks to
//! acquire, release and query. A branch's `lock_key` names the rows of
//! its write set as `table1:pk1,pk2;table2:pk3`.

use crate::{BranchSession, GlobalSession, Result};
use async_trait::async_trait;
use concord_common::BranchType;
use parking_lot::Mutex;
use std::collections::HashMap;

/// The lock capability the coordinator delegates to
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Try to lock the branch's write set for its xid; false on conflict
    async fn acquire(&self, branch: &BranchSession) -> Result<bool>;

    /// Release the branch's row locks
    async fn release(&self, branch: &BranchSession) -> Result<()>;

    /// Release every row lock held by the global
    async fn release_global(&self, global: &GlobalSession) -> Result<()>;

    /// Whether `lock_keys` could be locked for `xid` right now
    async fn query(
        &self,
        branch_type: BranchType,
        resource_id: &str,
        xid: &str,
        lock_keys: &str,
    ) -> Result<bool>;
}

/// Split a lock key into row keys, qualified by resource
fn row_keys(resource_id: &str, lock_key: &str) -> Vec<String> {
    let mut rows = Vec::new();
    for table_entry in lock_key.split(';').filter(|s| !s.is_empty()) {
        let Some((table, pks)) = table_entry.split_once(':') else {
            continue;
        };
        for pk in pks.split(',').filter(|s| !s.is_empty()) {
            rows.push(format!("{}^{}^{}", resource_id, table, pk));
        }
    }
    rows
}

/// In-memory lock table keyed by row, holding the owning xid
///
/// Re-acquisition by the owning xid is a no-op success, which also makes
/// replayed lock entries idempotent on replicas.
#[derive(Default)]
pub struct MemoryLockManager {
    rows: Mutex<HashMap<String, String>>,
}

impl MemoryLockManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of rows currently locked
    pub fn locked_rows(&self) -> usize {
        self.rows.lock().len()
    }
}

#[async_trait]
impl LockManager for MemoryLockManager {
    async fn acquire(&self, branch: &BranchSession) -> Result<bool> {
        let Some(lock_key) = branch.lock_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(true);
        };
        let keys = row_keys(&branch.resource_id, lock_key);
        let mut rows = self.rows.lock();
        if keys
            .iter()
            .any(|k| rows.get(k).is_some_and(|owner| owner != &branch.xid))
        {
            return Ok(false);
        }
        for key in keys {
            rows.insert(key, branch.xid.clone());
        }
        Ok(true)
    }

    async fn release(&self, branch: &BranchSession) -> Result<()> {
        let Some(lock_key) = branch.lock_key.as_deref().filter(|k| !k.is_empty()) else {
            return Ok(());
        };
        let mut rows = self.rows.lock();
        for key in row_keys(&branch.resource_id, lock_key) {
            if rows.get(&key).is_some_and(|owner| owner == &branch.xid) {
                rows.remove(&key);
            }
        }
        Ok(())
    }

    async fn release_global(&self, global: &GlobalSession) -> Result<()> {
        self.rows.lock().retain(|_, owner| owner != &global.xid);
        Ok(())
    }

    async fn query(
        &self,
        _branch_type: BranchType,
        resource_id: &str,
        xid: &str,
        lock_keys: &str,
    ) -> Result<bool> {
        let rows = self.rows.lock();
        Ok(row_keys(resource_id, lock_keys)
            .iter()
            .all(|k| rows.get(k).is_none_or(|owner| owner == xid)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use concord_common::BranchStatus;

    fn branch(xid: &str, lock_key: &str) -> BranchSession {
        BranchSession {
            xid: xid.to_string(),
            branch_id: 1,
            transaction_id: 1,
            branch_type: BranchType::At,
            resource_id: "res".to_string(),
            resource_group_id: None,
            client_id: "client".to_string(),
            application_data: None,
            lock_key: Some(lock_key.to_string()),
            status: BranchStatus::Registered,
        }
    }

    #[tokio::test]
    async fn test_acquire_conflict_and_release() {
        let locks = MemoryLockManager::new();
        assert!(locks.acquire(&branch("tc:1", "t:1,2")).await.unwrap());
        // Another xid conflicts on a shared row.
        assert!(!locks.acquire(&branch("tc:2", "t:2,3")).await.unwrap());
        // Disjoint rows succeed.
        assert!(locks.acquire(&branch("tc:2", "t:3")).await.unwrap());

        locks.release(&branch("tc:1", "t:1,2")).await.unwrap();
        assert!(locks.acquire(&branch("tc:2", "t:2")).await.unwrap());
    }

    #[tokio::test]
    async fn test_reacquire_same_xid_is_noop() {
        let locks = MemoryLockManager::new();
        assert!(locks.acquire(&branch("tc:1", "t:1")).await.unwrap());
        assert!(locks.acquire(&branch("tc:1", "t:1")).await.unwrap());
        assert_eq!(locks.locked_rows(), 1);
    }

    #[tokio::test]
    async fn test_query_does_not_lock() {
        let locks = MemoryLockManager::new();
        assert!(
            locks
                .query(BranchType::At, "res", "tc:1", "t:1")
                .await
                .unwrap()
        );
        assert_eq!(locks.locked_rows(), 0);

        locks.acquire(&branch("tc:1", "t:1")).await.unwrap();
        assert!(
            !locks
                .query(BranchType::At, "res", "tc:2", "t:1")
                .await
                .unwrap()
        );
    }

    #[tokio::test]
    async fn test_empty_lock_key_always_succeeds() {
        let locks = MemoryLockManager::new();
        let mut b = branch("tc:1", "");
        b.lock_key = None;
        assert!(locks.acquire(&b).await.unwrap());
        assert_eq!(locks.locked_rows(), 0);
    }

    #[tokio::test]
    async fn test_release_global() {
        let locks = MemoryLockManager::new();
        locks.acquire(&branch("tc:1", "t:1,2")).await.unwrap();
        locks.acquire(&branch("tc:2", "u:9")).await.unwrap();

        let global = GlobalSession::new(
            "tc:1".to_string(),
            1,
            "app".to_string(),
            "group".to_string(),
            "tx".to_string(),
            1_000,
        );
        locks.release_global(&global).await.unwrap();
        assert_eq!(locks.locked_rows(), 1);
    }
}
