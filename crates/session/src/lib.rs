//! Session model and collaborator contracts for the transaction coordinator
//!
//! This crate defines:
//! - The global/branch session domain objects and their wire records
//! - The pluggable `SessionStore` contract both backends implement
//! - The error taxonomy for coordinator operations
//! - Contracts for the external collaborators: row locks, branch
//!   phase-two drivers and the transaction event sink

mod branch;
mod driver;
mod error;
mod event;
mod global;
mod lock;
mod record;
mod store;

pub use branch::BranchSession;
pub use driver::{BranchDriver, BranchDriverRegistry};
pub use error::{Result, TransactionError};
pub use event::{EventSink, GlobalTransactionEvent, MemoryEventSink, NullEventSink, ROLE_TC};
pub use global::GlobalSession;
pub use lock::{LockManager, MemoryLockManager};
pub use record::{BranchTransactionRecord, GlobalTransactionRecord};
pub use store::{
    ROOT_SESSION_NAME, SessionCondition, SessionQueue, SessionStore, SharedSession,
};
