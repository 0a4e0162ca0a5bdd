//! Branch phase-two capability
//!
//! The coordinator never talks to resource managers directly; it invokes
//! an abstract commit-this-branch / rollback-this-branch capability and
//! feeds the returned status into the state machine. One driver is
//! registered per branch type.

use crate::{BranchSession, GlobalSession, Result, TransactionError};
use async_trait::async_trait;
use concord_common::{BranchStatus, BranchType};
use std::collections::HashMap;
use std::sync::Arc;

/// Phase-two driver for one branch type
#[async_trait]
pub trait BranchDriver: Send + Sync {
    /// Drive phase-two commit of the branch on its resource manager
    async fn branch_commit(
        &self,
        global: &GlobalSession,
        branch: &BranchSession,
    ) -> Result<BranchStatus>;

    /// Drive phase-two rollback of the branch on its resource manager
    async fn branch_rollback(
        &self,
        global: &GlobalSession,
        branch: &BranchSession,
    ) -> Result<BranchStatus>;
}

/// Driver lookup by branch type
#[derive(Default)]
pub struct BranchDriverRegistry {
    drivers: HashMap<BranchType, Arc<dyn BranchDriver>>,
}

impl BranchDriverRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the driver for one branch type
    pub fn register(mut self, branch_type: BranchType, driver: Arc<dyn BranchDriver>) -> Self {
        self.drivers.insert(branch_type, driver);
        self
    }

    /// Register one driver for every branch type
    pub fn with_default(self, driver: Arc<dyn BranchDriver>) -> Self {
        self.register(BranchType::At, driver.clone())
            .register(BranchType::Tcc, driver.clone())
            .register(BranchType::Xa, driver)
    }

    /// Driver for a branch type
    pub fn get(&self, branch_type: BranchType) -> Result<&Arc<dyn BranchDriver>> {
        self.drivers
            .get(&branch_type)
            .ok_or_else(|| TransactionError::UnsupportedBranchType(branch_type.name().to_string()))
    }
}
