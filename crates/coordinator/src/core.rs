//! Coordinator operations and the phase-two drive loops
//!
//! Every transition of a global runs under its per-session mutex, held
//! across the store writes and branch capability calls it causes. The
//! status check at the top of `commit`/`rollback` is the single arbiter
//! that selects which caller drives phase two; sweepers re-enter
//! through `do_global_commit`/`do_global_rollback` with `retrying`
//! set.

use crate::CoordinatorConfig;
use concord_common::{BranchStatus, BranchType, GlobalStatus, IdGenerator, Timestamp};
use concord_raft_store::RaftSessionStore;
use concord_session::{
    BranchDriverRegistry, BranchSession, EventSink, GlobalSession, GlobalTransactionEvent,
    LockManager, ROLE_TC, Result, SessionQueue, SessionStore, SharedSession, TransactionError,
};
use std::sync::Arc;

/// The transaction coordinator core
pub struct Coordinator {
    config: CoordinatorConfig,
    ids: IdGenerator,
    store: Arc<dyn SessionStore>,
    locks: Arc<dyn LockManager>,
    drivers: BranchDriverRegistry,
    events: Arc<dyn EventSink>,
    /// Set in replicated mode; the same object as `store`
    replication: Option<Arc<RaftSessionStore>>,
}

impl Coordinator {
    /// Coordinator over a plain (KV) session store
    pub fn new(
        config: CoordinatorConfig,
        store: Arc<dyn SessionStore>,
        locks: Arc<dyn LockManager>,
        drivers: BranchDriverRegistry,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let ids = IdGenerator::new(config.node_id);
        Self {
            config,
            ids,
            store,
            locks,
            drivers,
            events,
            replication: None,
        }
    }

    /// Coordinator over the consensus-replicated store
    pub fn new_replicated(
        config: CoordinatorConfig,
        store: Arc<RaftSessionStore>,
        locks: Arc<dyn LockManager>,
        drivers: BranchDriverRegistry,
        events: Arc<dyn EventSink>,
    ) -> Self {
        let ids = IdGenerator::new(config.node_id);
        Self {
            config,
            ids,
            store: store.clone(),
            locks,
            drivers,
            events,
            replication: Some(store),
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn SessionStore> {
        &self.store
    }

    fn post_event(&self, session: &GlobalSession, ended: bool) {
        self.events.post(GlobalTransactionEvent {
            transaction_id: session.transaction_id,
            role: ROLE_TC,
            name: session.transaction_name.clone(),
            begin_time: session.begin_time.as_millis(),
            end_time: ended.then(|| Timestamp::now().as_millis()),
            status: session.status,
        });
    }

    async fn require_session(&self, xid: &str) -> Result<SharedSession> {
        self.store
            .find(xid)
            .await?
            .ok_or_else(|| TransactionError::TransactionNotExist(xid.to_string()))
    }

    // === PUBLIC OPERATIONS ===

    /// Start a global transaction; returns the assigned xid
    pub async fn begin(
        &self,
        application_id: &str,
        transaction_service_group: &str,
        transaction_name: &str,
        timeout_ms: i64,
    ) -> Result<String> {
        self.begin_with_xid(
            None,
            application_id,
            transaction_service_group,
            transaction_name,
            timeout_ms,
        )
        .await
    }

    /// Start a global transaction under a caller-supplied xid
    ///
    /// Replicas re-driving a transaction pass the original xid, which is
    /// used verbatim.
    pub async fn begin_with_xid(
        &self,
        xid: Option<String>,
        application_id: &str,
        transaction_service_group: &str,
        transaction_name: &str,
        timeout_ms: i64,
    ) -> Result<String> {
        let (xid, transaction_id) = match xid {
            Some(xid) => {
                let transaction_id =
                    transaction_id_of(&xid).unwrap_or_else(|| self.ids.next_id());
                (xid, transaction_id)
            }
            None => {
                let transaction_id = self.ids.next_id();
                let xid = format!("{}:{}", self.config.instance_id, transaction_id);
                (xid, transaction_id)
            }
        };
        let session = GlobalSession::new(
            xid.clone(),
            transaction_id,
            application_id.to_string(),
            transaction_service_group.to_string(),
            transaction_name.to_string(),
            timeout_ms,
        );
        let snapshot = session.clone();
        let handle = session.into_shared();
        self.store.add_global(&handle, &snapshot).await?;
        self.post_event(&snapshot, false);
        tracing::info!("began global transaction {} ({})", xid, transaction_name);
        Ok(xid)
    }

    /// Enlist a branch under an open global; returns the branch id
    #[allow(clippy::too_many_arguments)]
    pub async fn branch_register(
        &self,
        xid: &str,
        branch_type: BranchType,
        resource_id: &str,
        client_id: &str,
        application_data: Option<String>,
        lock_key: Option<String>,
        branch_id: Option<i64>,
    ) -> Result<i64> {
        let handle = self.require_session(xid).await?;
        let mut session = handle.lock().await;
        if !session.is_active() {
            return Err(TransactionError::GlobalTransactionNotActive {
                xid: xid.to_string(),
                reason: "closed to new branch registrations".to_string(),
            });
        }
        if session.status != GlobalStatus::Begin {
            return Err(TransactionError::GlobalTransactionNotActive {
                xid: xid.to_string(),
                reason: format!("status is {}", session.status),
            });
        }
        let branch_id = branch_id.unwrap_or_else(|| self.ids.next_id());
        let branch = BranchSession {
            xid: xid.to_string(),
            branch_id,
            transaction_id: session.transaction_id,
            branch_type,
            resource_id: resource_id.to_string(),
            resource_group_id: None,
            client_id: client_id.to_string(),
            application_data,
            lock_key: lock_key.clone(),
            status: BranchStatus::Registered,
        };
        if !self.locks.acquire(&branch).await? {
            return Err(TransactionError::LockConflict(lock_key.unwrap_or_default()));
        }
        session.add_branch(branch.clone());
        if let Err(e) = self.store.add_branch(&session, &branch).await {
            // Undo the registration; the store write did not take.
            session.remove_branch(branch_id);
            let _ = self.locks.release(&branch).await;
            return Err(e);
        }
        tracing::info!("registered branch {} under {}", branch_id, xid);
        Ok(branch_id)
    }

    /// Record a phase-one result reported by the resource manager
    pub async fn branch_report(
        &self,
        xid: &str,
        branch_id: i64,
        status: BranchStatus,
        application_data: Option<String>,
    ) -> Result<()> {
        let handle = self.require_session(xid).await?;
        let mut session = handle.lock().await;
        let branch = {
            let branch = session.branch_mut(branch_id).ok_or_else(|| {
                TransactionError::BranchNotExist {
                    xid: xid.to_string(),
                    branch_id,
                }
            })?;
            branch.status = status;
            if application_data.is_some() {
                branch.application_data = application_data;
            }
            branch.clone()
        };
        self.store.update_branch_status(&session, &branch).await
    }

    /// Whether the given keys could be locked for `xid` right now
    pub async fn lock_query(
        &self,
        branch_type: BranchType,
        resource_id: &str,
        xid: &str,
        lock_keys: &str,
    ) -> Result<bool> {
        self.locks
            .query(branch_type, resource_id, xid, lock_keys)
            .await
    }

    /// Current status of a global; `Finished` when unknown
    pub async fn get_status(&self, xid: &str) -> Result<GlobalStatus> {
        Ok(self
            .store
            .read_global(xid, false)
            .await?
            .map(|s| s.status)
            .unwrap_or(GlobalStatus::Finished))
    }

    /// Client-asserted final status; only meaningful for saga branches,
    /// which this coordinator does not drive, so it reports and returns
    pub async fn global_report(&self, xid: &str, status: GlobalStatus) -> Result<GlobalStatus> {
        tracing::info!("global report for {}: {}", xid, status);
        self.get_status(xid).await
    }

    /// Drive phase-two commit of a global
    pub async fn commit(&self, xid: &str) -> Result<GlobalStatus> {
        let Some(handle) = self.store.find(xid).await? else {
            return Ok(GlobalStatus::Finished);
        };
        let should_commit = {
            let mut session = handle.lock().await;
            // Close first: no further branch can register, and the write
            // set is released since a committing transaction keeps no
            // row locks.
            session.close();
            self.locks.release_global(&session).await?;
            if session.status == GlobalStatus::Begin {
                if session.can_be_committed_async() {
                    self.async_commit(&handle, &mut session).await?;
                    false
                } else {
                    self.change_status(&mut session, GlobalStatus::Committing)
                        .await?;
                    true
                }
            } else {
                false
            }
        };
        if !should_commit {
            let status = handle.lock().await.status;
            return Ok(if status == GlobalStatus::AsyncCommitting {
                GlobalStatus::Committed
            } else {
                status
            });
        }

        let settled = self.do_global_commit(&handle, false).await?;
        let (status, has_branch) = {
            let session = handle.lock().await;
            (session.status, session.has_branch())
        };
        if settled && has_branch {
            // Only async-capable branches remain; the sweeper finishes.
            let mut session = handle.lock().await;
            self.async_commit(&handle, &mut session).await?;
            return Ok(GlobalStatus::Committed);
        }
        Ok(status)
    }

    /// Drive phase-two rollback of a global
    pub async fn rollback(&self, xid: &str) -> Result<GlobalStatus> {
        let Some(handle) = self.store.find(xid).await? else {
            return Ok(GlobalStatus::Finished);
        };
        if let Some(replication) = &self.replication
            && !replication.is_leader()
        {
            // Answer the client without executing; it will be redirected
            // to the leader at a higher layer.
            return Ok(handle.lock().await.status);
        }
        let should_rollback = {
            let mut session = handle.lock().await;
            session.close();
            if session.status == GlobalStatus::Begin {
                self.change_status(&mut session, GlobalStatus::Rollbacking)
                    .await?;
                true
            } else {
                false
            }
        };
        if !should_rollback {
            return Ok(handle.lock().await.status);
        }
        self.do_global_rollback(&handle, false).await?;
        Ok(handle.lock().await.status)
    }

    /// Move a `Begin` session past its timeout into timeout rollback
    pub async fn timeout_check(&self) -> Result<usize> {
        let now = Timestamp::now();
        let mut transitioned = 0;
        for stale in self.store.read_by_statuses(&[GlobalStatus::Begin]).await? {
            if !stale.is_timeout(now) {
                continue;
            }
            let Some(handle) = self.store.find(&stale.xid).await? else {
                continue;
            };
            let mut session = handle.lock().await;
            if session.status != GlobalStatus::Begin || !session.is_timeout(now) {
                continue;
            }
            session.close();
            self.change_status(&mut session, GlobalStatus::TimeoutRollbacking)
                .await?;
            self.store
                .enqueue(SessionQueue::RetryRollbacking, &handle, &session)
                .await?;
            tracing::info!(
                "global transaction {} timed out after {} ms",
                session.xid,
                session.timeout_ms
            );
            transitioned += 1;
        }
        Ok(transitioned)
    }

    // === PHASE-TWO DRIVE LOOPS ===

    /// Walk the branches in registration order and commit each
    ///
    /// Returns true when the commit is settled: every branch is terminal
    /// or only async-capable work remains for the sweeper. Callers must
    /// not hold the session lock.
    pub async fn do_global_commit(&self, handle: &SharedSession, retrying: bool) -> Result<bool> {
        let mut session = handle.lock().await;
        if session.status.is_terminal() {
            return Ok(true);
        }
        self.post_event(&session, false);
        let xid = session.xid.clone();
        let replication = (!retrying)
            .then(|| self.replication.clone())
            .flatten()
            .filter(|r| r.is_leader());
        let mut observed: Vec<(i64, BranchStatus)> = Vec::new();

        for branch in session.branches_snapshot() {
            if !retrying && branch.can_be_committed_async() {
                continue;
            }
            if branch.status == BranchStatus::PhaseOneFailed {
                // Never took effect on the resource.
                self.drop_branch(&mut session, &branch).await?;
                continue;
            }
            let driver = self.drivers.get(branch.branch_type)?;
            match driver.branch_commit(&session, &branch).await {
                // Replicated first pass: collect, decide after the log
                // entry commits.
                Ok(status) if replication.is_some() => observed.push((branch.branch_id, status)),
                Ok(BranchStatus::PhaseTwoCommitted) => {
                    self.drop_branch(&mut session, &branch).await?;
                }
                Ok(BranchStatus::PhaseTwoCommitFailedUnretryable) => {
                    if session.can_be_committed_async() {
                        tracing::error!(
                            "commit of branch {} failed unretryably, check the business log",
                            branch.branch_id
                        );
                        continue;
                    }
                    self.end_commit_failed(&mut session).await?;
                    tracing::error!(
                        "global transaction {} commit finally failed at branch {}",
                        xid,
                        branch.branch_id
                    );
                    return Ok(false);
                }
                Ok(status) => {
                    if !retrying {
                        self.store
                            .enqueue(SessionQueue::RetryCommitting, handle, &session)
                            .await?;
                        tracing::error!(
                            "commit of branch {} returned {}, queued {} for retry",
                            branch.branch_id,
                            status,
                            xid
                        );
                        return Ok(false);
                    }
                    if session.can_be_committed_async() {
                        tracing::error!(
                            "commit of branch {} returned {}, will retry later",
                            branch.branch_id,
                            status
                        );
                        continue;
                    }
                    tracing::error!(
                        "global transaction {} commit failed at branch {}, will retry later",
                        xid,
                        branch.branch_id
                    );
                    return Ok(false);
                }
                Err(e) => {
                    tracing::error!("commit of branch {} raised: {}", branch.branch_id, e);
                    if !retrying {
                        self.store
                            .enqueue(SessionQueue::RetryCommitting, handle, &session)
                            .await?;
                        return Err(e);
                    }
                    // Retrying: the sweeper comes back for this branch.
                }
            }
        }

        if let Some(replication) = replication {
            if !observed.is_empty() {
                drop(session);
                replication.propose_phase_two_commit(&xid, &observed).await?;
                let session = handle.lock().await;
                return Ok(commit_settled(&session));
            }
            if !session.has_branch() {
                self.end_committed(&mut session).await?;
                tracing::info!("global transaction {} committed", xid);
                return Ok(true);
            }
            return Ok(commit_settled(&session));
        }

        if session.has_branch() {
            tracing::info!("global transaction {} commit is not done", xid);
            return Ok(false);
        }
        self.end_committed(&mut session).await?;
        tracing::info!("global transaction {} committed", xid);
        Ok(true)
    }

    /// Walk the branches in reverse registration order and roll back
    /// each; returns true when the rollback is fully done
    pub async fn do_global_rollback(&self, handle: &SharedSession, retrying: bool) -> Result<bool> {
        if let Some(replication) = &self.replication
            && !replication.is_leader()
        {
            // Non-leaders acknowledge but never drive phase two; the
            // client is redirected at a higher layer.
            return Ok(true);
        }
        let mut session = handle.lock().await;
        if session.status.is_terminal() {
            return Ok(true);
        }
        self.post_event(&session, false);
        let xid = session.xid.clone();
        let replication = (!retrying).then(|| self.replication.clone()).flatten();
        let mut observed: Vec<(i64, BranchStatus)> = Vec::new();

        for branch in session.branches_snapshot_reversed() {
            if branch.status == BranchStatus::PhaseOneFailed {
                self.drop_branch(&mut session, &branch).await?;
                continue;
            }
            let driver = self.drivers.get(branch.branch_type)?;
            match driver.branch_rollback(&session, &branch).await {
                Ok(status) if replication.is_some() => observed.push((branch.branch_id, status)),
                Ok(BranchStatus::PhaseTwoRollbacked) => {
                    self.drop_branch(&mut session, &branch).await?;
                    tracing::info!("rolled back branch {} of {}", branch.branch_id, xid);
                }
                Ok(BranchStatus::PhaseTwoRollbackFailedUnretryable) => {
                    self.end_rollback_failed(&mut session).await?;
                    tracing::error!(
                        "rollback of {} stopped unretryably at branch {}",
                        xid,
                        branch.branch_id
                    );
                    return Ok(false);
                }
                Ok(status) => {
                    tracing::info!(
                        "rollback of branch {} returned {}, will retry, xid = {}",
                        branch.branch_id,
                        status,
                        xid
                    );
                    if !retrying {
                        self.store
                            .enqueue(SessionQueue::RetryRollbacking, handle, &session)
                            .await?;
                    }
                    return Ok(false);
                }
                Err(e) => {
                    tracing::error!("rollback of branch {} raised: {}", branch.branch_id, e);
                    if !retrying {
                        self.store
                            .enqueue(SessionQueue::RetryRollbacking, handle, &session)
                            .await?;
                    }
                    return Err(e);
                }
            }
        }

        if let Some(replication) = replication {
            if !observed.is_empty() {
                drop(session);
                replication
                    .propose_phase_two_rollback(&xid, &observed)
                    .await?;
                let session = handle.lock().await;
                return Ok(!session.has_branch());
            }
        } else if self.store.recheck_on_rollback() {
            // Stale replicas of the shared store may have accepted
            // registrations while this rollback ran; read once more
            // before declaring it done.
            if let Some(fresh) = self.store.read_global(&xid, true).await?
                && fresh.has_branch()
            {
                tracing::info!("rollback of {} is not done", xid);
                return Ok(false);
            }
        }

        self.end_rollbacked(&mut session).await?;
        tracing::info!("rolled back global transaction {}", xid);
        Ok(true)
    }

    // === TRANSITION HELPERS ===

    pub(crate) async fn change_status(
        &self,
        session: &mut GlobalSession,
        status: GlobalStatus,
    ) -> Result<()> {
        session.status = status;
        self.store.update_global_status(session).await
    }

    async fn async_commit(
        &self,
        handle: &SharedSession,
        session: &mut GlobalSession,
    ) -> Result<()> {
        self.store
            .enqueue(SessionQueue::AsyncCommitting, handle, session)
            .await?;
        self.change_status(session, GlobalStatus::AsyncCommitting).await
    }

    /// Release the branch's locks, detach it and persist the removal
    async fn drop_branch(
        &self,
        session: &mut GlobalSession,
        branch: &BranchSession,
    ) -> Result<()> {
        self.locks.release(branch).await?;
        session.remove_branch(branch.branch_id);
        self.store.remove_branch(session, branch).await
    }

    async fn end_committed(&self, session: &mut GlobalSession) -> Result<()> {
        self.end_session(session, GlobalStatus::Committed).await
    }

    async fn end_commit_failed(&self, session: &mut GlobalSession) -> Result<()> {
        self.end_session(session, GlobalStatus::CommitFailed).await
    }

    async fn end_rollbacked(&self, session: &mut GlobalSession) -> Result<()> {
        self.end_session(session, GlobalStatus::Rollbacked).await
    }

    async fn end_rollback_failed(&self, session: &mut GlobalSession) -> Result<()> {
        self.end_session(session, GlobalStatus::RollbackFailed).await
    }

    /// Terminal transition: record the status, release every remaining
    /// lock, remove the cleanup records and emit the end event
    async fn end_session(&self, session: &mut GlobalSession, status: GlobalStatus) -> Result<()> {
        session.status = status;
        self.locks.release_global(session).await?;
        self.store.remove_global(session).await?;
        self.post_event(session, true);
        Ok(())
    }
}

/// Whether a commit needs no further synchronous driving
fn commit_settled(session: &GlobalSession) -> bool {
    !session.has_branch() || session.branches().iter().all(|b| b.can_be_committed_async())
}

/// The trailing segment of an xid is the transaction id that minted it
fn transaction_id_of(xid: &str) -> Option<i64> {
    xid.rsplit_once(':').and_then(|(_, id)| id.parse().ok())
}
