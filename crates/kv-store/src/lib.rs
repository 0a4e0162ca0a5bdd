//! KV-backed session store
//!
//! Implements the full session-store contract against a shared remote KV
//! service using seven primitives (`get`, `set`, `del`, `lpush`,
//! `lrange`, `lrem`, `scan`). The key schema is bit-for-bit compatible
//! with existing deployments.

mod client;
mod keys;
mod store;

pub use client::{KvClient, KvError, KvResult, MemoryKv};
pub use store::KvSessionStore;
