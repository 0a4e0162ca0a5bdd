//! Store backend selection and tuning
//!
//! Two configuration keys are recognized by deployments:
//! `store.mode` selects the session-store backend and
//! `store.redis.queryLimit` bounds branch-list pagination.

/// Default branch-list page size (`store.redis.queryLimit`)
pub const DEFAULT_QUERY_LIMIT: usize = 100;

/// Which session-store backend is active (`store.mode`)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreMode {
    /// Sessions persisted in a shared remote KV service
    Redis,
    /// Sessions held in memory and replicated through the consensus log
    Raft,
}

impl StoreMode {
    /// Canonical mode name as it appears in configuration
    pub fn name(&self) -> &'static str {
        match self {
            StoreMode::Redis => "redis",
            StoreMode::Raft => "raft",
        }
    }

    /// Resolve a configured mode name
    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "redis" => Some(StoreMode::Redis),
            "raft" => Some(StoreMode::Raft),
            _ => None,
        }
    }

    /// Whether this mode replicates sessions through the consensus log
    pub fn is_replicated(&self) -> bool {
        matches!(self, StoreMode::Raft)
    }
}

/// Session-store configuration
#[derive(Debug, Clone)]
pub struct StoreConfig {
    /// Active backend
    pub mode: StoreMode,
    /// Branch-list page size
    pub query_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            mode: StoreMode::Redis,
            query_limit: DEFAULT_QUERY_LIMIT,
        }
    }
}

impl StoreConfig {
    /// Set the backend mode
    pub fn with_mode(mut self, mode: StoreMode) -> Self {
        self.mode = mode;
        self
    }

    /// Set the branch-list page size
    pub fn with_query_limit(mut self, query_limit: usize) -> Self {
        self.query_limit = query_limit;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mode_names() {
        assert_eq!(StoreMode::from_name("redis"), Some(StoreMode::Redis));
        assert_eq!(StoreMode::from_name("raft"), Some(StoreMode::Raft));
        assert_eq!(StoreMode::from_name("file"), None);
        assert!(StoreMode::Raft.is_replicated());
        assert!(!StoreMode::Redis.is_replicated());
    }

    #[test]
    fn test_builders() {
        let config = StoreConfig::default()
            .with_mode(StoreMode::Raft)
            .with_query_limit(10);
        assert_eq!(config.mode, StoreMode::Raft);
        assert_eq!(config.query_limit, 10);
    }
}
