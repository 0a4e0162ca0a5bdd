//! Shared harness for coordinator integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use concord_common::{BranchStatus, StoreConfig, StoreMode};
use concord_consensus::LocalCluster;
use concord_coordinator::{Coordinator, CoordinatorConfig};
use concord_kv_store::{KvSessionStore, MemoryKv};
use concord_raft_store::{RaftLockManager, RaftSessionStore};
use concord_session::{
    BranchDriver, BranchDriverRegistry, BranchSession, GlobalSession, MemoryEventSink,
    MemoryLockManager, Result,
};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;

/// Branch driver scripted per branch id; unscripted calls succeed
#[derive(Default)]
pub struct ScriptedDriver {
    commit_outcomes: Mutex<HashMap<i64, VecDeque<BranchStatus>>>,
    rollback_outcomes: Mutex<HashMap<i64, VecDeque<BranchStatus>>>,
    commit_calls: Mutex<Vec<i64>>,
    rollback_calls: Mutex<Vec<i64>>,
}

impl ScriptedDriver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue commit outcomes for one branch, consumed in order
    pub fn script_commit(&self, branch_id: i64, outcomes: &[BranchStatus]) {
        self.commit_outcomes
            .lock()
            .entry(branch_id)
            .or_default()
            .extend(outcomes.iter().copied());
    }

    /// Queue rollback outcomes for one branch, consumed in order
    pub fn script_rollback(&self, branch_id: i64, outcomes: &[BranchStatus]) {
        self.rollback_outcomes
            .lock()
            .entry(branch_id)
            .or_default()
            .extend(outcomes.iter().copied());
    }

    /// Branch ids whose commit was invoked, in call order
    pub fn commit_calls(&self) -> Vec<i64> {
        self.commit_calls.lock().clone()
    }

    /// Branch ids whose rollback was invoked, in call order
    pub fn rollback_calls(&self) -> Vec<i64> {
        self.rollback_calls.lock().clone()
    }
}

#[async_trait]
impl BranchDriver for ScriptedDriver {
    async fn branch_commit(
        &self,
        _global: &GlobalSession,
        branch: &BranchSession,
    ) -> Result<BranchStatus> {
        self.commit_calls.lock().push(branch.branch_id);
        let outcome = self
            .commit_outcomes
            .lock()
            .get_mut(&branch.branch_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(BranchStatus::PhaseTwoCommitted);
        Ok(outcome)
    }

    async fn branch_rollback(
        &self,
        _global: &GlobalSession,
        branch: &BranchSession,
    ) -> Result<BranchStatus> {
        self.rollback_calls.lock().push(branch.branch_id);
        let outcome = self
            .rollback_outcomes
            .lock()
            .get_mut(&branch.branch_id)
            .and_then(VecDeque::pop_front)
            .unwrap_or(BranchStatus::PhaseTwoRollbacked);
        Ok(outcome)
    }
}

/// Coordinator over an in-process KV service
pub struct KvHarness {
    pub kv: Arc<MemoryKv>,
    pub store: Arc<KvSessionStore>,
    pub locks: Arc<MemoryLockManager>,
    pub driver: Arc<ScriptedDriver>,
    pub events: Arc<MemoryEventSink>,
    pub coordinator: Coordinator,
}

pub fn kv_harness() -> KvHarness {
    let kv = Arc::new(MemoryKv::new());
    let store = Arc::new(KvSessionStore::new(
        kv.clone(),
        StoreConfig::default().query_limit,
    ));
    let locks = Arc::new(MemoryLockManager::new());
    let driver = Arc::new(ScriptedDriver::new());
    let events = Arc::new(MemoryEventSink::new());
    let coordinator = Coordinator::new(
        CoordinatorConfig::default(),
        store.clone(),
        locks.clone(),
        BranchDriverRegistry::new().with_default(driver.clone()),
        events.clone(),
    );
    KvHarness {
        kv,
        store,
        locks,
        driver,
        events,
        coordinator,
    }
}

/// One replica: its store, its local lock table and its coordinator
pub struct RaftNode {
    pub store: Arc<RaftSessionStore>,
    pub locks: Arc<MemoryLockManager>,
    pub driver: Arc<ScriptedDriver>,
    pub events: Arc<MemoryEventSink>,
    pub coordinator: Coordinator,
}

/// A consensus group of coordinators over replicated stores
pub struct RaftHarness {
    pub cluster: LocalCluster,
    pub nodes: Vec<RaftNode>,
}

/// Register one replica with the cluster and wire up its coordinator
pub async fn raft_join(cluster: &LocalCluster, id: &str) -> RaftNode {
    let locks = Arc::new(MemoryLockManager::new());
    let events = Arc::new(MemoryEventSink::new());
    let driver = Arc::new(ScriptedDriver::new());
    let store = Arc::new(RaftSessionStore::new(
        StoreConfig::default().with_mode(StoreMode::Raft),
        locks.clone(),
        events.clone(),
    ));
    let node = Arc::new(cluster.add_node(id, store.clone()).await);
    store.bind(node.clone());
    let raft_locks = Arc::new(RaftLockManager::new(locks.clone()));
    raft_locks.bind(node);
    let coordinator = Coordinator::new_replicated(
        CoordinatorConfig::default().with_instance_id(format!("node-{}", id)),
        store.clone(),
        raft_locks,
        BranchDriverRegistry::new().with_default(driver.clone()),
        events.clone(),
    );
    RaftNode {
        store,
        locks,
        driver,
        events,
        coordinator,
    }
}

pub async fn raft_harness(node_ids: &[&str]) -> RaftHarness {
    let cluster = LocalCluster::new();
    let mut nodes = Vec::new();
    for id in node_ids {
        nodes.push(raft_join(&cluster, id).await);
    }
    RaftHarness { cluster, nodes }
}
