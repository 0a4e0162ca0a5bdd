//! Session store over the remote KV service
//!
//! Every coordinator mutation is persisted synchronously. The primary
//! record (`SEATA_GLOBAL_<xid>`) and the transaction-id index are written
//! and deleted in lock-step; a global's branch keys live in an
//! LPUSH-ordered list next to the branch records themselves.
//!
//! Retry queues have no records of their own in this backend: membership
//! is derived from the session status, so `enqueue`/`dequeue` are no-ops
//! beyond the status write that accompanies them.

use crate::client::KvClient;
use crate::keys;
use async_trait::async_trait;
use concord_common::GlobalStatus;
use concord_session::{
    BranchSession, BranchTransactionRecord, GlobalSession, GlobalTransactionRecord, Result,
    SessionCondition, SessionQueue, SessionStore, SharedSession, TransactionError,
};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Page size for `scan` while collecting global keys
const SCAN_COUNT: usize = 100;

/// Session store backed by the shared remote KV service
pub struct KvSessionStore {
    kv: Arc<dyn KvClient>,
    /// Branch-list page size (`store.redis.queryLimit`)
    query_limit: usize,
    /// Live handles for in-flight transactions, so every caller drives
    /// the same object behind the same per-session mutex
    live: Mutex<HashMap<String, SharedSession>>,
}

impl KvSessionStore {
    pub fn new(kv: Arc<dyn KvClient>, query_limit: usize) -> Self {
        Self {
            kv,
            query_limit: query_limit.max(1),
            live: Mutex::new(HashMap::new()),
        }
    }

    fn store_err(err: crate::client::KvError) -> TransactionError {
        TransactionError::Store(err.to_string())
    }

    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.kv.get(key).await.map_err(Self::store_err)
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.kv.set(key, value).await.map_err(Self::store_err)
    }

    /// Collect the whole branch list in pages of `query_limit`
    ///
    /// Keys are deduplicated while preserving list order (newest first).
    /// The loop ends on an empty window or on a window shorter than the
    /// page, the normal end of the list.
    async fn range(&self, key: &str) -> Result<Vec<String>> {
        let mut collected = Vec::new();
        let mut seen = HashSet::new();
        let mut start = 0i64;
        loop {
            let stop = start + self.query_limit as i64 - 1;
            let window = self
                .kv
                .lrange(key, start, stop)
                .await
                .map_err(Self::store_err)?;
            let window_len = window.len();
            for entry in window {
                if seen.insert(entry.clone()) {
                    collected.push(entry);
                }
            }
            if window_len < self.query_limit {
                break;
            }
            start = collected.len() as i64;
        }
        Ok(collected)
    }

    async fn write_global(&self, record: &GlobalTransactionRecord) -> Result<()> {
        let value = serde_json::to_string(record)?;
        self.set(&keys::global_key(&record.xid), value.clone()).await?;
        self.set(&keys::transaction_id_key(record.transaction_id), value)
            .await
    }

    async fn write_branch(&self, record: &BranchTransactionRecord) -> Result<()> {
        let branch_key = keys::branch_key(record.branch_id);
        if self.get(&branch_key).await?.is_none() {
            self.kv
                .lpush(&keys::branch_list_key(&record.xid), branch_key.clone())
                .await
                .map_err(Self::store_err)?;
        }
        self.set(&branch_key, serde_json::to_string(record)?).await
    }

    /// Materialize the branches of `xid` in registration order
    async fn read_branches(&self, xid: &str) -> Result<Vec<BranchSession>> {
        let branch_keys = self.range(&keys::branch_list_key(xid)).await?;
        let mut branches = Vec::with_capacity(branch_keys.len());
        // The list is LPUSH-ordered, newest first; walk it backwards to
        // recover registration order.
        for key in branch_keys.iter().rev() {
            if let Some(json) = self.get(key).await? {
                let record: BranchTransactionRecord = serde_json::from_str(&json)?;
                branches.push(record.into_session()?);
            }
        }
        Ok(branches)
    }

    async fn read_record(&self, key: &str) -> Result<Option<GlobalTransactionRecord>> {
        match self.get(key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// All global keys currently stored
    async fn scan_global_keys(&self) -> Result<Vec<String>> {
        let pattern = format!("{}*", keys::GLOBAL_PREFIX);
        let mut collected = Vec::new();
        let mut cursor = 0;
        loop {
            let (next, keys) = self
                .kv
                .scan(cursor, &pattern, SCAN_COUNT)
                .await
                .map_err(Self::store_err)?;
            collected.extend(keys);
            cursor = next;
            if cursor == 0 {
                break;
            }
        }
        Ok(collected)
    }
}

#[async_trait]
impl SessionStore for KvSessionStore {
    async fn add_global(&self, handle: &SharedSession, global: &GlobalSession) -> Result<()> {
        self.write_global(&GlobalTransactionRecord::from_session(global))
            .await?;
        self.live
            .lock()
            .insert(global.xid.clone(), handle.clone());
        Ok(())
    }

    async fn update_global_status(&self, global: &GlobalSession) -> Result<()> {
        self.write_global(&GlobalTransactionRecord::from_session(global))
            .await
    }

    async fn remove_global(&self, global: &GlobalSession) -> Result<()> {
        let branch_list_key = keys::branch_list_key(&global.xid);
        let mut doomed = vec![
            keys::global_key(&global.xid),
            keys::transaction_id_key(global.transaction_id),
        ];
        // The branch list goes too, but only once it is empty; a probe of
        // the first entries is enough to tell.
        let probe = self
            .kv
            .lrange(&branch_list_key, 0, 1)
            .await
            .map_err(Self::store_err)?;
        if probe.is_empty() {
            doomed.push(branch_list_key);
        }
        self.kv.del(&doomed).await.map_err(Self::store_err)?;
        self.live.lock().remove(&global.xid);
        Ok(())
    }

    async fn add_branch(&self, _global: &GlobalSession, branch: &BranchSession) -> Result<()> {
        self.write_branch(&BranchTransactionRecord::from_session(branch))
            .await
    }

    async fn update_branch_status(
        &self,
        _global: &GlobalSession,
        branch: &BranchSession,
    ) -> Result<()> {
        self.write_branch(&BranchTransactionRecord::from_session(branch))
            .await
    }

    async fn remove_branch(&self, global: &GlobalSession, branch: &BranchSession) -> Result<()> {
        let branch_key = keys::branch_key(branch.branch_id);
        self.kv
            .lrem(&keys::branch_list_key(&global.xid), 0, &branch_key)
            .await
            .map_err(Self::store_err)?;
        self.kv
            .del(std::slice::from_ref(&branch_key))
            .await
            .map_err(Self::store_err)
    }

    async fn find(&self, xid: &str) -> Result<Option<SharedSession>> {
        if let Some(handle) = self.live.lock().get(xid) {
            return Ok(Some(handle.clone()));
        }
        let Some(session) = self.read_global(xid, true).await? else {
            return Ok(None);
        };
        let mut live = self.live.lock();
        // Another caller may have materialized it while we were reading.
        let handle = live
            .entry(xid.to_string())
            .or_insert_with(|| session.into_shared());
        Ok(Some(handle.clone()))
    }

    async fn read_global(&self, xid: &str, with_branches: bool) -> Result<Option<GlobalSession>> {
        let Some(record) = self.read_record(&keys::global_key(xid)).await? else {
            return Ok(None);
        };
        let mut session = record.into_session()?;
        if with_branches {
            for branch in self.read_branches(xid).await? {
                session.add_branch(branch);
            }
        }
        Ok(Some(session))
    }

    async fn read_by_statuses(&self, statuses: &[GlobalStatus]) -> Result<Vec<GlobalSession>> {
        let wanted: HashSet<i32> = statuses.iter().map(|s| s.code()).collect();
        let mut sessions = Vec::new();
        for key in self.scan_global_keys().await? {
            let Some(record) = self.read_record(&key).await? else {
                continue;
            };
            if !wanted.contains(&record.status) {
                continue;
            }
            let mut session = record.into_session()?;
            let xid = session.xid.clone();
            for branch in self.read_branches(&xid).await? {
                session.add_branch(branch);
            }
            sessions.push(session);
        }
        Ok(sessions)
    }

    async fn read_by_condition(&self, condition: &SessionCondition) -> Result<Vec<GlobalSession>> {
        if let Some(xid) = &condition.xid {
            return Ok(self.read_global(xid, true).await?.into_iter().collect());
        }
        if let Some(transaction_id) = condition.transaction_id {
            let Some(record) = self
                .read_record(&keys::transaction_id_key(transaction_id))
                .await?
            else {
                return Ok(Vec::new());
            };
            let xid = record.xid.clone();
            return Ok(self.read_global(&xid, true).await?.into_iter().collect());
        }
        if !condition.statuses.is_empty() {
            return self.read_by_statuses(&condition.statuses).await;
        }
        Ok(Vec::new())
    }

    async fn enqueue(
        &self,
        _queue: SessionQueue,
        _handle: &SharedSession,
        _global: &GlobalSession,
    ) -> Result<()> {
        // Queue membership is status-derived in this backend.
        Ok(())
    }

    async fn dequeue(&self, _queue: SessionQueue, _xid: &str) -> Result<()> {
        Ok(())
    }

    async fn queued(&self, queue: SessionQueue) -> Result<Vec<SharedSession>> {
        let mut handles = Vec::new();
        for session in self.read_by_statuses(queue.statuses()).await? {
            if let Some(handle) = self.find(&session.xid).await? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    fn recheck_on_rollback(&self) -> bool {
        // Stale replicas of the shared service can surface branches
        // registered while the rollback ran; the coordinator re-reads
        // before declaring the rollback done.
        true
    }
}
