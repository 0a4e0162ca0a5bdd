//! The replicated in-memory session store
//!
//! Four maps per replica: the root live set plus the three retry queues,
//! all holding the same shared session objects. Map lookups are atomic
//! under short `parking_lot` sections; session mutations happen under
//! the per-session mutex, never while a map lock is held across an
//! await.
//!
//! Leader-side writes propose a `SessionSyncMessage` and, once the
//! proposal commits, apply the map effect locally; the session object
//! itself was already mutated by the coordinator under its lock, so the
//! local step never re-locks it. Follower-side writes arrive through
//! `on_apply` and mutate the replica's own objects; every handler is
//! idempotent because log replay is normal after snapshot installs.

use concord_common::{BranchStatus, GlobalStatus, StoreConfig, Timestamp};
use concord_consensus::{ConsensusService, SessionSyncMessage, SyncBody};
use concord_session::{
    BranchSession, BranchTransactionRecord, EventSink, GlobalSession, GlobalTransactionEvent,
    GlobalTransactionRecord, LockManager, Result, ROLE_TC, SessionCondition, SessionQueue,
    SessionStore, SharedSession, TransactionError,
};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::{Arc, OnceLock};

type SessionMap = Mutex<HashMap<String, SharedSession>>;

/// Session store replicated through the consensus log
pub struct RaftSessionStore {
    config: StoreConfig,
    consensus: OnceLock<Arc<dyn ConsensusService>>,
    /// Local lock table; followers feed it from the log
    locks: Arc<dyn LockManager>,
    events: Arc<dyn EventSink>,
    root: SessionMap,
    async_committing: SessionMap,
    retry_committing: SessionMap,
    retry_rollbacking: SessionMap,
    /// Secondary index, kept in lock-step with the root map
    transaction_ids: Mutex<HashMap<i64, String>>,
}

impl RaftSessionStore {
    pub fn new(config: StoreConfig, locks: Arc<dyn LockManager>, events: Arc<dyn EventSink>) -> Self {
        Self {
            config,
            consensus: OnceLock::new(),
            locks,
            events,
            root: Mutex::new(HashMap::new()),
            async_committing: Mutex::new(HashMap::new()),
            retry_committing: Mutex::new(HashMap::new()),
            retry_rollbacking: Mutex::new(HashMap::new()),
            transaction_ids: Mutex::new(HashMap::new()),
        }
    }

    /// Attach the node's consensus handle; must happen before the first
    /// leader-side write
    pub fn bind(&self, consensus: Arc<dyn ConsensusService>) {
        let _ = self.consensus.set(consensus);
    }

    /// Whether this replica currently leads the group
    pub fn is_leader(&self) -> bool {
        self.consensus.get().is_some_and(|c| c.is_leader())
    }

    pub(crate) fn replicated_mode(&self) -> bool {
        self.config.mode.is_replicated()
    }

    pub(crate) fn lock_manager(&self) -> &Arc<dyn LockManager> {
        &self.locks
    }

    fn queue_map(&self, queue: SessionQueue) -> &SessionMap {
        match queue {
            SessionQueue::AsyncCommitting => &self.async_committing,
            SessionQueue::RetryCommitting => &self.retry_committing,
            SessionQueue::RetryRollbacking => &self.retry_rollbacking,
        }
    }

    pub(crate) fn find_root(&self, xid: &str) -> Option<SharedSession> {
        self.root.lock().get(xid).cloned()
    }

    pub(crate) fn root_snapshot(&self) -> Vec<SharedSession> {
        self.root.lock().values().cloned().collect()
    }

    pub(crate) fn insert_root(&self, xid: &str, transaction_id: i64, handle: SharedSession) {
        self.root.lock().insert(xid.to_string(), handle);
        self.transaction_ids
            .lock()
            .insert(transaction_id, xid.to_string());
    }

    pub(crate) fn insert_queued(&self, queue: SessionQueue, xid: &str, handle: SharedSession) {
        self.queue_map(queue)
            .lock()
            .entry(xid.to_string())
            .or_insert(handle);
    }

    /// Current members of a queue map; exposed for handover checks
    pub fn queue_members(&self, queue: SessionQueue) -> Vec<String> {
        self.queue_map(queue).lock().keys().cloned().collect()
    }

    fn remove_everywhere(&self, xid: &str, transaction_id: i64) {
        self.root.lock().remove(xid);
        self.transaction_ids.lock().remove(&transaction_id);
        self.async_committing.lock().remove(xid);
        self.retry_committing.lock().remove(xid);
        self.retry_rollbacking.lock().remove(xid);
    }

    async fn replicate(&self, message: SessionSyncMessage) -> Result<()> {
        let consensus = self
            .consensus
            .get()
            .ok_or_else(|| TransactionError::Consensus("consensus service not bound".to_string()))?;
        let entry = message
            .encode()
            .map_err(|e| TransactionError::Consensus(e.to_string()))?;
        consensus
            .propose(entry)
            .await
            .map_err(|e| TransactionError::Consensus(e.to_string()))
    }

    // === FOLLOWER-SIDE APPLY HANDLERS ===

    pub(crate) async fn apply(&self, message: SessionSyncMessage) {
        match message.body {
            SyncBody::AddGlobal(record) => self.apply_add_global(message.target, record).await,
            SyncBody::UpdateGlobalStatus { xid, status } => {
                self.apply_update_global_status(&xid, status).await
            }
            SyncBody::RemoveGlobal { xid } => self.apply_remove_global(message.target, &xid).await,
            SyncBody::AddBranch(record) => self.apply_add_branch(record).await,
            SyncBody::UpdateBranchStatus {
                xid,
                branch_id,
                status,
            } => self.apply_update_branch_status(&xid, branch_id, status).await,
            SyncBody::RemoveBranch { xid, branch_id } => {
                self.apply_remove_branch(&xid, branch_id).await
            }
            SyncBody::AcquireLock(record) => self.apply_acquire_lock(record).await,
            SyncBody::ReleaseGlobalLock { xid } => self.apply_release_global_lock(&xid).await,
            SyncBody::PhaseTwoCommit {
                xid,
                branch_statuses,
            } => {
                self.apply_phase_two_commit(&xid, &decode_statuses(&branch_statuses))
                    .await
            }
            SyncBody::PhaseTwoRollback {
                xid,
                branch_statuses,
            } => {
                self.apply_phase_two_rollback(&xid, &decode_statuses(&branch_statuses))
                    .await
            }
        }
    }

    async fn apply_add_global(&self, target: Option<SessionQueue>, record: GlobalTransactionRecord) {
        let xid = record.xid.clone();
        let existing = self.find_root(&xid);
        match target {
            None => match existing {
                // Replayed add: treat as an update.
                Some(handle) => {
                    let status = record.status;
                    let mut session = handle.lock().await;
                    if let Some(status) = GlobalStatus::from_code(status) {
                        session.status = status;
                        session.set_active(status == GlobalStatus::Begin);
                    }
                }
                None => match record.into_session() {
                    Ok(session) => {
                        let transaction_id = session.transaction_id;
                        self.insert_root(&xid, transaction_id, session.into_shared());
                    }
                    Err(e) => tracing::error!("failed to apply global session {}: {}", xid, e),
                },
            },
            Some(queue) => {
                let handle = match existing {
                    Some(handle) => handle,
                    None => match record.into_session() {
                        Ok(session) => session.into_shared(),
                        Err(e) => {
                            tracing::error!("failed to apply queued session {}: {}", xid, e);
                            return;
                        }
                    },
                };
                self.insert_queued(queue, &xid, handle);
            }
        }
    }

    async fn apply_update_global_status(&self, xid: &str, status: i32) {
        let Some(status) = GlobalStatus::from_code(status) else {
            tracing::error!("unknown global status code {} for {}", status, xid);
            return;
        };
        let Some(handle) = self.find_root(xid) else {
            return;
        };
        let mut session = handle.lock().await;
        if session.status != status {
            session.status = status;
            session.set_active(status == GlobalStatus::Begin);
        }
    }

    async fn apply_remove_global(&self, target: Option<SessionQueue>, xid: &str) {
        match target {
            None => {
                if let Some(handle) = self.find_root(xid) {
                    let transaction_id = handle.lock().await.transaction_id;
                    self.remove_everywhere(xid, transaction_id);
                }
            }
            Some(queue) => {
                self.queue_map(queue).lock().remove(xid);
            }
        }
    }

    async fn apply_add_branch(&self, record: BranchTransactionRecord) {
        let Some(handle) = self.find_root(&record.xid) else {
            tracing::warn!("branch {} arrived for unknown global {}", record.branch_id, record.xid);
            return;
        };
        let branch_id = record.branch_id;
        match record.into_session() {
            Ok(branch) => {
                let mut session = handle.lock().await;
                match session.branch_mut(branch_id) {
                    Some(existing) => existing.status = branch.status,
                    None => session.add_branch(branch),
                }
            }
            Err(e) => tracing::error!("failed to apply branch {}: {}", branch_id, e),
        }
    }

    async fn apply_update_branch_status(&self, xid: &str, branch_id: i64, status: i32) {
        let Some(status) = BranchStatus::from_code(status) else {
            tracing::error!("unknown branch status code {} for {}", status, branch_id);
            return;
        };
        let Some(handle) = self.find_root(xid) else {
            return;
        };
        let mut session = handle.lock().await;
        if let Some(branch) = session.branch_mut(branch_id) {
            branch.status = status;
        }
    }

    async fn apply_remove_branch(&self, xid: &str, branch_id: i64) {
        let Some(handle) = self.find_root(xid) else {
            return;
        };
        let mut session = handle.lock().await;
        if let Some(branch) = session.remove_branch(branch_id)
            && let Err(e) = self.locks.release(&branch).await
        {
            tracing::error!("failed to release locks of branch {}: {}", branch_id, e);
        }
    }

    async fn apply_acquire_lock(&self, record: BranchTransactionRecord) {
        let branch_id = record.branch_id;
        match record.into_session() {
            Ok(branch) => match self.locks.acquire(&branch).await {
                Ok(true) => {}
                Ok(false) => {
                    tracing::warn!("replayed lock for branch {} conflicts locally", branch_id)
                }
                Err(e) => tracing::error!("failed to apply lock of branch {}: {}", branch_id, e),
            },
            Err(e) => tracing::error!("failed to decode lock entry {}: {}", branch_id, e),
        }
    }

    async fn apply_release_global_lock(&self, xid: &str) {
        let Some(handle) = self.find_root(xid) else {
            return;
        };
        let session = handle.lock().await;
        if let Err(e) = self.locks.release_global(&session).await {
            tracing::error!("failed to release locks of {}: {}", xid, e);
        }
    }

    // === PHASE-TWO APPLICATION ===
    //
    // The leader runs these after its proposal commits; followers run
    // them from the log. Both sides walk the same branch-status map, so
    // the replicas converge on the leader's outcome.

    pub async fn apply_phase_two_commit(&self, xid: &str, statuses: &[(i64, BranchStatus)]) {
        let Some(handle) = self.find_root(xid) else {
            return;
        };
        let mut session = handle.lock().await;
        for (branch_id, status) in statuses {
            let Some(branch) = session.branch(*branch_id).cloned() else {
                continue;
            };
            match status {
                BranchStatus::PhaseTwoCommitted => {
                    if let Err(e) = self.locks.release(&branch).await {
                        tracing::error!("failed to release locks of branch {}: {}", branch_id, e);
                    }
                    session.remove_branch(*branch_id);
                }
                BranchStatus::PhaseTwoCommitFailedUnretryable => {
                    if session.can_be_committed_async() {
                        tracing::error!(
                            "commit of branch {} failed unretryably; orphaned until operator action",
                            branch_id
                        );
                        continue;
                    }
                    self.end_local(&mut session, GlobalStatus::CommitFailed).await;
                    return;
                }
                _ => {
                    tracing::warn!(
                        "commit of branch {} returned {}, queueing {} for retry",
                        branch_id,
                        status,
                        xid
                    );
                    drop(session);
                    self.insert_queued(SessionQueue::RetryCommitting, xid, handle.clone());
                    return;
                }
            }
        }
        if !session.has_branch() {
            self.end_local(&mut session, GlobalStatus::Committed).await;
        }
    }

    pub async fn apply_phase_two_rollback(&self, xid: &str, statuses: &[(i64, BranchStatus)]) {
        let Some(handle) = self.find_root(xid) else {
            return;
        };
        let mut session = handle.lock().await;
        for (branch_id, status) in statuses {
            let Some(branch) = session.branch(*branch_id).cloned() else {
                continue;
            };
            match status {
                BranchStatus::PhaseTwoRollbacked => {
                    if let Err(e) = self.locks.release(&branch).await {
                        tracing::error!("failed to release locks of branch {}: {}", branch_id, e);
                    }
                    session.remove_branch(*branch_id);
                }
                BranchStatus::PhaseTwoRollbackFailedUnretryable => {
                    self.end_local(&mut session, GlobalStatus::RollbackFailed).await;
                    return;
                }
                _ => {
                    tracing::warn!(
                        "rollback of branch {} returned {}, queueing {} for retry",
                        branch_id,
                        status,
                        xid
                    );
                    drop(session);
                    self.insert_queued(SessionQueue::RetryRollbacking, xid, handle.clone());
                    return;
                }
            }
        }
        if !session.has_branch() {
            self.end_local(&mut session, GlobalStatus::Rollbacked).await;
        }
    }

    /// Terminal transition applied identically on every replica
    async fn end_local(&self, session: &mut GlobalSession, status: GlobalStatus) {
        session.status = status;
        if let Err(e) = self.locks.release_global(session).await {
            tracing::error!("failed to release locks of {}: {}", session.xid, e);
        }
        self.remove_everywhere(&session.xid, session.transaction_id);
        self.events.post(GlobalTransactionEvent {
            transaction_id: session.transaction_id,
            role: ROLE_TC,
            name: session.transaction_name.clone(),
            begin_time: session.begin_time.as_millis(),
            end_time: Some(Timestamp::now().as_millis()),
            status,
        });
    }

    // === LEADER-SIDE PHASE-TWO PROPOSALS ===

    /// Replicate the branch statuses observed by the leader's first
    /// commit pass, then apply the same transitions locally
    ///
    /// The caller must not hold the session lock.
    pub async fn propose_phase_two_commit(
        &self,
        xid: &str,
        statuses: &[(i64, BranchStatus)],
    ) -> Result<()> {
        self.replicate(SessionSyncMessage::root(SyncBody::PhaseTwoCommit {
            xid: xid.to_string(),
            branch_statuses: encode_statuses(statuses),
        }))
        .await?;
        self.apply_phase_two_commit(xid, statuses).await;
        Ok(())
    }

    /// Rollback counterpart of `propose_phase_two_commit`
    pub async fn propose_phase_two_rollback(
        &self,
        xid: &str,
        statuses: &[(i64, BranchStatus)],
    ) -> Result<()> {
        self.replicate(SessionSyncMessage::root(SyncBody::PhaseTwoRollback {
            xid: xid.to_string(),
            branch_statuses: encode_statuses(statuses),
        }))
        .await?;
        self.apply_phase_two_rollback(xid, statuses).await;
        Ok(())
    }

    // === LEADER HANDOVER ===

    /// Re-queue every in-flight rollback so the sweeper resumes it on
    /// the new leader; terminal transitions evict them again through
    /// `remove_everywhere`
    pub(crate) async fn reload_rollback_retries(&self) {
        let sessions: Vec<(String, SharedSession)> = self
            .root
            .lock()
            .iter()
            .map(|(xid, handle)| (xid.clone(), handle.clone()))
            .collect();
        for (xid, handle) in sessions {
            let pending = handle.lock().await.status.is_rollback_pending();
            if pending {
                self.insert_queued(SessionQueue::RetryRollbacking, &xid, handle);
            }
        }
    }
}

fn encode_statuses(statuses: &[(i64, BranchStatus)]) -> Vec<(i64, i32)> {
    statuses.iter().map(|(id, s)| (*id, s.code())).collect()
}

fn decode_statuses(codes: &[(i64, i32)]) -> Vec<(i64, BranchStatus)> {
    codes
        .iter()
        .filter_map(|(id, code)| match BranchStatus::from_code(*code) {
            Some(status) => Some((*id, status)),
            None => {
                tracing::error!("unknown branch status code {} for branch {}", code, id);
                None
            }
        })
        .collect()
}

#[async_trait]
impl SessionStore for RaftSessionStore {
    async fn add_global(&self, handle: &SharedSession, global: &GlobalSession) -> Result<()> {
        self.replicate(SessionSyncMessage::root(SyncBody::AddGlobal(
            GlobalTransactionRecord::from_session(global),
        )))
        .await?;
        self.insert_root(&global.xid, global.transaction_id, handle.clone());
        Ok(())
    }

    async fn update_global_status(&self, global: &GlobalSession) -> Result<()> {
        // The leader's object already carries the new status; replicas
        // apply it from the log.
        self.replicate(SessionSyncMessage::root(SyncBody::UpdateGlobalStatus {
            xid: global.xid.clone(),
            status: global.status.code(),
        }))
        .await
    }

    async fn remove_global(&self, global: &GlobalSession) -> Result<()> {
        self.replicate(SessionSyncMessage::root(SyncBody::RemoveGlobal {
            xid: global.xid.clone(),
        }))
        .await?;
        self.remove_everywhere(&global.xid, global.transaction_id);
        Ok(())
    }

    async fn add_branch(&self, _global: &GlobalSession, branch: &BranchSession) -> Result<()> {
        self.replicate(SessionSyncMessage::root(SyncBody::AddBranch(
            BranchTransactionRecord::from_session(branch),
        )))
        .await
    }

    async fn update_branch_status(
        &self,
        global: &GlobalSession,
        branch: &BranchSession,
    ) -> Result<()> {
        self.replicate(SessionSyncMessage::root(SyncBody::UpdateBranchStatus {
            xid: global.xid.clone(),
            branch_id: branch.branch_id,
            status: branch.status.code(),
        }))
        .await
    }

    async fn remove_branch(&self, global: &GlobalSession, branch: &BranchSession) -> Result<()> {
        self.replicate(SessionSyncMessage::root(SyncBody::RemoveBranch {
            xid: global.xid.clone(),
            branch_id: branch.branch_id,
        }))
        .await
    }

    async fn find(&self, xid: &str) -> Result<Option<SharedSession>> {
        Ok(self.find_root(xid))
    }

    async fn read_global(&self, xid: &str, with_branches: bool) -> Result<Option<GlobalSession>> {
        let Some(handle) = self.find_root(xid) else {
            return Ok(None);
        };
        let mut session = handle.lock().await.clone();
        if !with_branches {
            session.clear_branches();
        }
        Ok(Some(session))
    }

    async fn read_by_statuses(&self, statuses: &[GlobalStatus]) -> Result<Vec<GlobalSession>> {
        let mut sessions = Vec::new();
        for handle in self.root_snapshot() {
            let session = handle.lock().await;
            if statuses.contains(&session.status) {
                sessions.push(session.clone());
            }
        }
        Ok(sessions)
    }

    async fn read_by_condition(&self, condition: &SessionCondition) -> Result<Vec<GlobalSession>> {
        if let Some(xid) = &condition.xid {
            return Ok(self.read_global(xid, true).await?.into_iter().collect());
        }
        if let Some(transaction_id) = condition.transaction_id {
            let xid = self.transaction_ids.lock().get(&transaction_id).cloned();
            return match xid {
                Some(xid) => Ok(self.read_global(&xid, true).await?.into_iter().collect()),
                None => Ok(Vec::new()),
            };
        }
        if !condition.statuses.is_empty() {
            return self.read_by_statuses(&condition.statuses).await;
        }
        Ok(Vec::new())
    }

    async fn enqueue(
        &self,
        queue: SessionQueue,
        handle: &SharedSession,
        global: &GlobalSession,
    ) -> Result<()> {
        self.replicate(SessionSyncMessage::to_queue(
            queue,
            SyncBody::AddGlobal(GlobalTransactionRecord::from_session(global)),
        ))
        .await?;
        self.insert_queued(queue, &global.xid, handle.clone());
        Ok(())
    }

    async fn dequeue(&self, queue: SessionQueue, xid: &str) -> Result<()> {
        self.replicate(SessionSyncMessage::to_queue(
            queue,
            SyncBody::RemoveGlobal {
                xid: xid.to_string(),
            },
        ))
        .await?;
        self.queue_map(queue).lock().remove(xid);
        Ok(())
    }

    async fn queued(&self, queue: SessionQueue) -> Result<Vec<SharedSession>> {
        Ok(self.queue_map(queue).lock().values().cloned().collect())
    }
}
