//! Transaction lifecycle events
//!
//! The coordinator posts one event at begin and a start/end pair around
//! phase two. Events are advisory and ordered per session; the sink is
//! an external collaborator (metrics, audit, ...).

use concord_common::GlobalStatus;
use parking_lot::Mutex;

/// Role tag carried by every coordinator-side event
pub const ROLE_TC: &str = "tc";

/// One lifecycle event of a global transaction
#[derive(Debug, Clone)]
pub struct GlobalTransactionEvent {
    pub transaction_id: i64,
    pub role: &'static str,
    pub name: String,
    /// Begin time of the session, epoch ms
    pub begin_time: i64,
    /// Set only on end-of-phase-two events, epoch ms
    pub end_time: Option<i64>,
    pub status: GlobalStatus,
}

/// Sink for transaction events
pub trait EventSink: Send + Sync {
    fn post(&self, event: GlobalTransactionEvent);
}

/// Sink that discards every event
pub struct NullEventSink;

impl EventSink for NullEventSink {
    fn post(&self, _event: GlobalTransactionEvent) {}
}

/// Buffering sink for tests
#[derive(Default)]
pub struct MemoryEventSink {
    events: Mutex<Vec<GlobalTransactionEvent>>,
}

impl MemoryEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Drain everything posted so far
    pub fn take(&self) -> Vec<GlobalTransactionEvent> {
        std::mem::take(&mut *self.events.lock())
    }

    /// Statuses posted so far, in order
    pub fn statuses(&self) -> Vec<GlobalStatus> {
        self.events.lock().iter().map(|e| e.status).collect()
    }
}

impl EventSink for MemoryEventSink {
    fn post(&self, event: GlobalTransactionEvent) {
        self.events.lock().push(event);
    }
}
