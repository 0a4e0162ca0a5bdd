//! In-process consensus for tests and single-node deployments
//!
//! One totally ordered log shared by every registered node. Proposals
//! are serialized, applied synchronously to all follower state machines
//! and only then acknowledged to the proposer, which mirrors how the
//! production service invokes the leader closure after commit.
//! Leadership never moves on its own; tests drive `elect` explicitly.

use crate::{ConsensusError, ConsensusResult, ConsensusService, SnapshotReader, SnapshotWriter, StateMachine};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

struct NodeEntry {
    id: String,
    state_machine: Arc<dyn StateMachine>,
}

struct ClusterInner {
    nodes: Mutex<Vec<NodeEntry>>,
    leader: Mutex<Option<String>>,
    term: AtomicU64,
    log: Mutex<Vec<Vec<u8>>>,
    /// Serializes proposals so the log stays totally ordered
    propose_gate: tokio::sync::Mutex<()>,
}

/// An in-process consensus group
#[derive(Clone)]
pub struct LocalCluster {
    inner: Arc<ClusterInner>,
}

impl LocalCluster {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(ClusterInner {
                nodes: Mutex::new(Vec::new()),
                leader: Mutex::new(None),
                term: AtomicU64::new(0),
                log: Mutex::new(Vec::new()),
                propose_gate: tokio::sync::Mutex::new(()),
            }),
        }
    }

    /// Register a node; the first node becomes leader of term 1
    pub async fn add_node(&self, id: &str, state_machine: Arc<dyn StateMachine>) -> LocalNode {
        let first = {
            let mut nodes = self.inner.nodes.lock();
            nodes.push(NodeEntry {
                id: id.to_string(),
                state_machine: state_machine.clone(),
            });
            nodes.len() == 1
        };
        if first {
            *self.inner.leader.lock() = Some(id.to_string());
            let term = self.inner.term.fetch_add(1, Ordering::SeqCst) + 1;
            state_machine.on_leader_start(term).await;
        }
        LocalNode {
            id: id.to_string(),
            cluster: self.inner.clone(),
        }
    }

    /// Move leadership to `id`, firing the stop/start callbacks
    pub async fn elect(&self, id: &str) {
        let (old, new) = {
            let mut leader = self.inner.leader.lock();
            if leader.as_deref() == Some(id) {
                return;
            }
            let old = leader.take();
            *leader = Some(id.to_string());
            (old, id.to_string())
        };
        if let Some(old_id) = old
            && let Some(sm) = self.state_machine_of(&old_id)
        {
            sm.on_leader_stop().await;
        }
        let term = self.inner.term.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(sm) = self.state_machine_of(&new) {
            sm.on_leader_start(term).await;
        }
    }

    /// Current term
    pub fn term(&self) -> u64 {
        self.inner.term.load(Ordering::SeqCst)
    }

    /// Copy of the whole log
    pub fn log(&self) -> Vec<Vec<u8>> {
        self.inner.log.lock().clone()
    }

    /// Trigger a snapshot save on one node and wait for its completion
    pub async fn snapshot(&self, id: &str, dir: impl AsRef<Path>) -> std::io::Result<()> {
        let sm = self
            .state_machine_of(id)
            .ok_or_else(|| std::io::Error::other(format!("unknown node {}", id)))?;
        let writer = SnapshotWriter::new(dir)?;
        let (tx, rx) = tokio::sync::oneshot::channel();
        let done = Box::new(move |result: std::io::Result<()>| {
            let _ = tx.send(result);
        });
        sm.on_snapshot_save(writer, done).await;
        rx.await
            .map_err(|_| std::io::Error::other("snapshot callback dropped"))?
    }

    /// Load a snapshot into one node's state machine
    pub async fn load_snapshot(&self, id: &str, dir: impl AsRef<Path>) -> bool {
        match self.state_machine_of(id) {
            Some(sm) => sm.on_snapshot_load(SnapshotReader::new(dir)).await,
            None => false,
        }
    }

    fn state_machine_of(&self, id: &str) -> Option<Arc<dyn StateMachine>> {
        self.inner
            .nodes
            .lock()
            .iter()
            .find(|n| n.id == id)
            .map(|n| n.state_machine.clone())
    }
}

impl Default for LocalCluster {
    fn default() -> Self {
        Self::new()
    }
}

/// One node's handle into the cluster
pub struct LocalNode {
    id: String,
    cluster: Arc<ClusterInner>,
}

impl LocalNode {
    pub fn id(&self) -> &str {
        &self.id
    }
}

#[async_trait]
impl ConsensusService for LocalNode {
    async fn propose(&self, entry: Vec<u8>) -> ConsensusResult<()> {
        if !self.is_leader() {
            return Err(ConsensusError::NotLeader);
        }
        let _gate = self.cluster.propose_gate.lock().await;
        // Leadership may have moved while waiting for the gate.
        if self.cluster.leader.lock().as_deref() != Some(self.id.as_str()) {
            return Err(ConsensusError::NotLeader);
        }

        self.cluster.log.lock().push(entry.clone());
        let followers: Vec<Arc<dyn StateMachine>> = self
            .cluster
            .nodes
            .lock()
            .iter()
            .filter(|n| n.id != self.id)
            .map(|n| n.state_machine.clone())
            .collect();
        // The proposer applies its own effects after this resolves, in
        // place of re-decoding its entry from the log.
        for sm in followers {
            sm.on_apply(&entry).await;
        }
        Ok(())
    }

    fn is_leader(&self) -> bool {
        self.cluster.leader.lock().as_deref() == Some(self.id.as_str())
    }
}
