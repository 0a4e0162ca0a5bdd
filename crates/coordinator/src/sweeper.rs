//! Retry and async sweeper passes
//!
//! The scheduling lives outside this core; these methods perform one
//! pass over the corresponding queue. A pass that leaves a session
//! unfinished marks it with the retrying status so its membership
//! survives restarts of backends that derive queues from status.

use crate::Coordinator;
use concord_common::GlobalStatus;
use concord_session::{Result, SessionQueue};

impl Coordinator {
    /// Finish deferred phase-two commits; returns how many settled
    pub async fn sweep_async_committing(&self) -> Result<usize> {
        let mut settled = 0;
        for handle in self.store().queued(SessionQueue::AsyncCommitting).await? {
            {
                let session = handle.lock().await;
                if session.status != GlobalStatus::AsyncCommitting {
                    continue;
                }
            }
            match self.do_global_commit(&handle, true).await {
                Ok(true) => settled += 1,
                Ok(false) => {
                    let xid = handle.lock().await.xid.clone();
                    tracing::warn!("async commit of {} is not done", xid);
                }
                Err(e) => tracing::error!("async commit pass failed: {}", e),
            }
        }
        Ok(settled)
    }

    /// Re-drive queued commits; returns how many settled
    pub async fn sweep_retry_committing(&self) -> Result<usize> {
        let mut settled = 0;
        for handle in self.store().queued(SessionQueue::RetryCommitting).await? {
            {
                let session = handle.lock().await;
                if session.status.is_terminal() {
                    continue;
                }
            }
            match self.do_global_commit(&handle, true).await {
                Ok(true) => settled += 1,
                Ok(false) => {
                    let mut session = handle.lock().await;
                    if session.status == GlobalStatus::Committing {
                        self.change_status(&mut session, GlobalStatus::CommitRetrying)
                            .await?;
                    }
                }
                Err(e) => tracing::error!("commit retry pass failed: {}", e),
            }
        }
        Ok(settled)
    }

    /// Re-drive queued rollbacks; returns how many settled
    pub async fn sweep_retry_rollbacking(&self) -> Result<usize> {
        let mut settled = 0;
        for handle in self.store().queued(SessionQueue::RetryRollbacking).await? {
            {
                let session = handle.lock().await;
                if session.status.is_terminal() {
                    continue;
                }
            }
            match self.do_global_rollback(&handle, true).await {
                Ok(true) => settled += 1,
                Ok(false) => {
                    let mut session = handle.lock().await;
                    let retry_status = match session.status {
                        GlobalStatus::TimeoutRollbacking
                        | GlobalStatus::TimeoutRollbackRetrying => {
                            GlobalStatus::TimeoutRollbackRetrying
                        }
                        GlobalStatus::Rollbacking | GlobalStatus::RollbackRetrying => {
                            GlobalStatus::RollbackRetrying
                        }
                        _ => continue,
                    };
                    if session.status != retry_status {
                        self.change_status(&mut session, retry_status).await?;
                    }
                }
                Err(e) => tracing::error!("rollback retry pass failed: {}", e),
            }
        }
        Ok(settled)
    }
}
