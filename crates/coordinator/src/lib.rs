//! The transaction coordinator state machine
//!
//! Drives global transactions across their branches: identity
//! assignment, branch registration under the per-session mutex,
//! phase-two commit/rollback in registration order, retry queues and
//! the replicated-mode phase-two proposal path. Persistence is
//! delegated to a pluggable session store; branch work, locks and
//! events go to the collaborator contracts.

mod config;
mod core;
mod sweeper;

pub use config::CoordinatorConfig;
pub use core::Coordinator;
