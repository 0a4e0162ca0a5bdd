//! Shared types for the concord transaction coordinator
//!
//! This crate defines:
//! - Stable wire statuses for global and branch transactions
//! - Branch protocol types
//! - The monotonic 64-bit identity source
//! - Physical timestamps (milliseconds since Unix epoch)
//! - Store backend selection and tuning knobs

mod branch_type;
mod config;
mod id;
mod status;
mod timestamp;

pub use branch_type::BranchType;
pub use config::{DEFAULT_QUERY_LIMIT, StoreConfig, StoreMode};
pub use id::IdGenerator;
pub use status::{BranchStatus, GlobalStatus};
pub use timestamp::Timestamp;
