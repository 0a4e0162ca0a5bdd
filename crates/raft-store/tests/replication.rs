//! Replication behavior of the raft session store: followers rebuild
//! the leader's sessions from the log, log application is deterministic
//! and replay-safe, and snapshots restore a replica wholesale.

use concord_common::{BranchStatus, BranchType, GlobalStatus, StoreConfig, StoreMode};
use concord_consensus::{LocalCluster, StateMachine};
use concord_raft_store::RaftSessionStore;
use concord_session::{
    BranchSession, GlobalSession, MemoryLockManager, NullEventSink, SessionQueue, SessionStore,
};
use std::sync::Arc;

fn raft_store() -> Arc<RaftSessionStore> {
    Arc::new(RaftSessionStore::new(
        StoreConfig::default().with_mode(StoreMode::Raft),
        Arc::new(MemoryLockManager::new()),
        Arc::new(NullEventSink),
    ))
}

fn global(xid: &str, transaction_id: i64) -> GlobalSession {
    GlobalSession::new(
        xid.to_string(),
        transaction_id,
        "app".to_string(),
        "group".to_string(),
        "tx".to_string(),
        60_000,
    )
}

fn branch(xid: &str, branch_id: i64, lock_key: Option<&str>) -> BranchSession {
    BranchSession {
        xid: xid.to_string(),
        branch_id,
        transaction_id: 1,
        branch_type: BranchType::Tcc,
        resource_id: "res".to_string(),
        resource_group_id: None,
        client_id: "client".to_string(),
        application_data: None,
        lock_key: lock_key.map(str::to_string),
        status: BranchStatus::Registered,
    }
}

/// Stable summary of a store's root sessions for equality checks
async fn summarize(store: &RaftSessionStore) -> Vec<(String, i32, Vec<i64>)> {
    let mut rows = Vec::new();
    for session in store.read_by_statuses(all_statuses()).await.unwrap() {
        rows.push((
            session.xid.clone(),
            session.status.code(),
            session.branches().iter().map(|b| b.branch_id).collect(),
        ));
    }
    rows.sort();
    rows
}

fn all_statuses() -> &'static [GlobalStatus] {
    &[
        GlobalStatus::Begin,
        GlobalStatus::Committing,
        GlobalStatus::CommitRetrying,
        GlobalStatus::Rollbacking,
        GlobalStatus::RollbackRetrying,
        GlobalStatus::TimeoutRollbacking,
        GlobalStatus::TimeoutRollbackRetrying,
        GlobalStatus::AsyncCommitting,
    ]
}

#[tokio::test]
async fn test_followers_mirror_leader_writes() {
    let cluster = LocalCluster::new();
    let leader = raft_store();
    let follower = raft_store();
    let leader_node = Arc::new(cluster.add_node("a", leader.clone()).await);
    cluster.add_node("b", follower.clone()).await;
    leader.bind(leader_node);

    let session = global("tc:1", 1);
    let handle = session.clone().into_shared();
    leader.add_global(&handle, &session).await.unwrap();

    let b = branch("tc:1", 11, None);
    handle.lock().await.add_branch(b.clone());
    leader.add_branch(&session, &b).await.unwrap();

    let mirrored = follower.find("tc:1").await.unwrap().expect("follower session");
    {
        let mirrored = mirrored.lock().await;
        assert_eq!(mirrored.status, GlobalStatus::Begin);
        assert_eq!(mirrored.branches().len(), 1);
        assert_eq!(mirrored.branches()[0].branch_id, 11);
    }

    // Status update and terminal removal propagate too.
    {
        let mut s = handle.lock().await;
        s.status = GlobalStatus::Committing;
        leader.update_global_status(&s).await.unwrap();
    }
    assert_eq!(mirrored.lock().await.status, GlobalStatus::Committing);

    leader.remove_global(&session).await.unwrap();
    assert!(follower.find("tc:1").await.unwrap().is_none());
    assert_eq!(summarize(&leader).await, summarize(&follower).await);
}

#[tokio::test]
async fn test_queue_membership_replicates() {
    let cluster = LocalCluster::new();
    let leader = raft_store();
    let follower = raft_store();
    let leader_node = Arc::new(cluster.add_node("a", leader.clone()).await);
    cluster.add_node("b", follower.clone()).await;
    leader.bind(leader_node);

    let session = global("tc:1", 1);
    let handle = session.clone().into_shared();
    leader.add_global(&handle, &session).await.unwrap();
    leader
        .enqueue(SessionQueue::RetryRollbacking, &handle, &session)
        .await
        .unwrap();

    assert_eq!(
        follower.queue_members(SessionQueue::RetryRollbacking),
        vec!["tc:1".to_string()]
    );
    // The follower's queue holds its own root object, not a copy.
    let queued = follower
        .queued(SessionQueue::RetryRollbacking)
        .await
        .unwrap();
    let rooted = follower.find("tc:1").await.unwrap().unwrap();
    assert!(Arc::ptr_eq(&queued[0], &rooted));

    leader
        .dequeue(SessionQueue::RetryRollbacking, "tc:1")
        .await
        .unwrap();
    assert!(follower.queue_members(SessionQueue::RetryRollbacking).is_empty());
}

#[tokio::test]
async fn test_log_application_is_deterministic_across_splits() {
    let cluster = LocalCluster::new();
    let leader = raft_store();
    let follower = raft_store();
    let leader_node = Arc::new(cluster.add_node("a", leader.clone()).await);
    cluster.add_node("b", follower.clone()).await;
    leader.bind(leader_node);

    // Drive a mixed workload through the leader.
    for (xid, tid) in [("tc:1", 1), ("tc:2", 2), ("tc:3", 3)] {
        let session = global(xid, tid);
        let handle = session.clone().into_shared();
        leader.add_global(&handle, &session).await.unwrap();
        let b = branch(xid, tid * 10, None);
        handle.lock().await.add_branch(b.clone());
        leader.add_branch(&session, &b).await.unwrap();
    }
    {
        let handle = leader.find("tc:2").await.unwrap().unwrap();
        let mut s = handle.lock().await;
        s.close();
        s.status = GlobalStatus::Rollbacking;
        leader.update_global_status(&s).await.unwrap();
    }
    let removed = global("tc:3", 3);
    leader.remove_global(&removed).await.unwrap();

    let log = cluster.log();
    assert!(log.len() >= 5);

    // Applying a prefix and then the remainder must equal applying the
    // whole log in one pass.
    for split in [0, 2, log.len()] {
        let fresh = raft_store();
        for entry in &log[..split] {
            fresh.on_apply(entry).await;
        }
        for entry in &log[split..] {
            fresh.on_apply(entry).await;
        }
        assert_eq!(summarize(&fresh).await, summarize(&follower).await);
    }

    // Replaying a suffix on top of a fully caught-up store changes
    // nothing (apply idempotence).
    let replayed = raft_store();
    for entry in &log {
        replayed.on_apply(entry).await;
    }
    for entry in &log[log.len() - 2..] {
        replayed.on_apply(entry).await;
    }
    assert_eq!(summarize(&replayed).await, summarize(&follower).await);
}

#[tokio::test]
async fn test_snapshot_roundtrip_restores_state_and_queues() {
    let cluster = LocalCluster::new();
    let leader = raft_store();
    let leader_node = Arc::new(cluster.add_node("a", leader.clone()).await);
    leader.bind(leader_node);

    // One in-flight rollback with a locked branch, one open session.
    let mut rolling = global("tc:1", 1);
    rolling.status = GlobalStatus::RollbackRetrying;
    let rolling_handle = rolling.clone().into_shared();
    leader.add_global(&rolling_handle, &rolling).await.unwrap();
    let locked = branch("tc:1", 11, Some("t:1"));
    rolling_handle.lock().await.add_branch(locked.clone());
    leader.add_branch(&rolling, &locked).await.unwrap();

    let open = global("tc:2", 2);
    let open_handle = open.clone().into_shared();
    leader.add_global(&open_handle, &open).await.unwrap();

    let dir = tempfile::tempdir().unwrap();
    cluster.snapshot("a", dir.path()).await.unwrap();

    // A fresh follower restores the same view.
    let restored_locks = Arc::new(MemoryLockManager::new());
    let restored = Arc::new(RaftSessionStore::new(
        StoreConfig::default().with_mode(StoreMode::Raft),
        restored_locks.clone(),
        Arc::new(NullEventSink),
    ));
    cluster.add_node("c", restored.clone()).await;
    assert!(cluster.load_snapshot("c", dir.path()).await);

    assert_eq!(summarize(&leader).await, summarize(&*restored).await);
    // The in-flight rollback resumes through its queue and its branch
    // lock is re-acquired locally.
    assert_eq!(
        restored.queue_members(SessionQueue::RetryRollbacking),
        vec!["tc:1".to_string()]
    );
    assert_eq!(restored_locks.locked_rows(), 1);
}

#[tokio::test]
async fn test_leader_refuses_snapshot_load() {
    let cluster = LocalCluster::new();
    let leader = raft_store();
    let leader_node = Arc::new(cluster.add_node("a", leader.clone()).await);
    leader.bind(leader_node);

    let dir = tempfile::tempdir().unwrap();
    cluster.snapshot("a", dir.path()).await.unwrap();
    assert!(!cluster.load_snapshot("a", dir.path()).await);
}

#[tokio::test]
async fn test_redis_mode_store_skips_snapshot() {
    let store = Arc::new(RaftSessionStore::new(
        StoreConfig::default().with_mode(StoreMode::Redis),
        Arc::new(MemoryLockManager::new()),
        Arc::new(NullEventSink),
    ));
    let cluster = LocalCluster::new();
    cluster.add_node("a", store.clone()).await;

    let dir = tempfile::tempdir().unwrap();
    // Save completes without producing a snapshot, load refuses it.
    cluster.snapshot("a", dir.path()).await.unwrap();
    assert!(!dir.path().join("data").exists());
    assert!(!cluster.load_snapshot("a", dir.path()).await);
}
