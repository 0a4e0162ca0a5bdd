//! Wire records for stored and replicated sessions
//!
//! Field names and status codes are the stable contract shared with
//! existing deployments: the KV backend stores these records as JSON and
//! snapshots/consensus entries carry their serialized bytes. A record
//! never includes the branch list; branches are stored and replicated as
//! records of their own, keyed by branch id, and reattached by xid.

use crate::{BranchSession, GlobalSession, Result, TransactionError};
use concord_common::{BranchStatus, BranchType, GlobalStatus, Timestamp};
use serde::{Deserialize, Serialize};

/// Stored form of a global session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GlobalTransactionRecord {
    pub xid: String,
    pub transaction_id: i64,
    pub status: i32,
    pub application_id: String,
    pub begin_time: i64,
    pub timeout: i64,
    pub transaction_name: String,
    pub transaction_service_group: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_data: Option<String>,
}

impl GlobalTransactionRecord {
    /// Snapshot a session into its stored form
    pub fn from_session(session: &GlobalSession) -> Self {
        Self {
            xid: session.xid.clone(),
            transaction_id: session.transaction_id,
            status: session.status.code(),
            application_id: session.application_id.clone(),
            begin_time: session.begin_time.as_millis(),
            timeout: session.timeout_ms,
            transaction_name: session.transaction_name.clone(),
            transaction_service_group: session.transaction_service_group.clone(),
            application_data: session.application_data.clone(),
        }
    }

    /// Reconstruct the session this record was taken from
    ///
    /// Only sessions still in `Begin` accept branch registrations, so the
    /// reconstructed session is active exactly when its status is `Begin`.
    pub fn into_session(self) -> Result<GlobalSession> {
        let status = GlobalStatus::from_code(self.status)
            .ok_or_else(|| TransactionError::Store(format!("unknown global status code {}", self.status)))?;
        let mut session = GlobalSession::new(
            self.xid,
            self.transaction_id,
            self.application_id,
            self.transaction_service_group,
            self.transaction_name,
            self.timeout,
        );
        session.begin_time = Timestamp::from_millis(self.begin_time);
        session.application_data = self.application_data;
        session.status = status;
        session.set_active(status == GlobalStatus::Begin);
        Ok(session)
    }
}

/// Stored form of a branch session
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BranchTransactionRecord {
    pub xid: String,
    pub branch_id: i64,
    pub branch_type: String,
    pub client_id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resource_group_id: Option<String>,
    pub transaction_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub application_data: Option<String>,
    pub resource_id: String,
    pub status: i32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub lock_key: Option<String>,
}

impl BranchTransactionRecord {
    /// Snapshot a branch into its stored form
    pub fn from_session(branch: &BranchSession) -> Self {
        Self {
            xid: branch.xid.clone(),
            branch_id: branch.branch_id,
            branch_type: branch.branch_type.name().to_string(),
            client_id: branch.client_id.clone(),
            resource_group_id: branch.resource_group_id.clone(),
            transaction_id: branch.transaction_id,
            application_data: branch.application_data.clone(),
            resource_id: branch.resource_id.clone(),
            status: branch.status.code(),
            lock_key: branch.lock_key.clone(),
        }
    }

    /// Reconstruct the branch this record was taken from
    pub fn into_session(self) -> Result<BranchSession> {
        let branch_type = BranchType::from_name(&self.branch_type).ok_or_else(|| {
            TransactionError::Store(format!("unknown branch type {}", self.branch_type))
        })?;
        let status = BranchStatus::from_code(self.status)
            .ok_or_else(|| TransactionError::Store(format!("unknown branch status code {}", self.status)))?;
        Ok(BranchSession {
            xid: self.xid,
            branch_id: self.branch_id,
            transaction_id: self.transaction_id,
            branch_type,
            resource_id: self.resource_id,
            resource_group_id: self.resource_group_id,
            client_id: self.client_id,
            application_data: self.application_data,
            lock_key: self.lock_key,
            status,
        })
    }
}

impl GlobalSession {
    /// Serialize into the snapshot/replication encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&GlobalTransactionRecord::from_session(self))?)
    }

    /// Deserialize from the snapshot/replication encoding
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice::<GlobalTransactionRecord>(bytes)?.into_session()
    }
}

impl BranchSession {
    /// Serialize into the snapshot/replication encoding
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(&BranchTransactionRecord::from_session(self))?)
    }

    /// Deserialize from the snapshot/replication encoding
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        serde_json::from_slice::<BranchTransactionRecord>(bytes)?.into_session()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_global_record_roundtrip() {
        let mut session = GlobalSession::new(
            "tc:7".to_string(),
            7,
            "app".to_string(),
            "group".to_string(),
            "tx".to_string(),
            30_000,
        );
        session.status = GlobalStatus::Rollbacking;
        session.application_data = Some("payload".to_string());

        let decoded = GlobalSession::decode(&session.encode().unwrap()).unwrap();
        assert_eq!(decoded.xid, "tc:7");
        assert_eq!(decoded.transaction_id, 7);
        assert_eq!(decoded.status, GlobalStatus::Rollbacking);
        assert_eq!(decoded.application_data.as_deref(), Some("payload"));
        assert_eq!(decoded.begin_time, session.begin_time);
        // Past Begin, a reconstructed session refuses registrations.
        assert!(!decoded.is_active());
    }

    #[test]
    fn test_reconstructed_begin_session_is_active() {
        let session = GlobalSession::new(
            "tc:8".to_string(),
            8,
            "app".to_string(),
            "group".to_string(),
            "tx".to_string(),
            30_000,
        );
        let decoded = GlobalSession::decode(&session.encode().unwrap()).unwrap();
        assert!(decoded.is_active());
    }

    #[test]
    fn test_global_record_field_names() {
        let session = GlobalSession::new(
            "tc:9".to_string(),
            9,
            "app".to_string(),
            "group".to_string(),
            "tx".to_string(),
            30_000,
        );
        let json: serde_json::Value =
            serde_json::from_slice(&session.encode().unwrap()).unwrap();
        assert_eq!(json["xid"], "tc:9");
        assert_eq!(json["transactionId"], 9);
        assert_eq!(json["status"], 1);
        assert_eq!(json["timeout"], 30_000);
        assert!(json.get("transactionServiceGroup").is_some());
    }

    #[test]
    fn test_branch_record_roundtrip() {
        let branch = BranchSession {
            xid: "tc:7".to_string(),
            branch_id: 71,
            transaction_id: 7,
            branch_type: BranchType::Tcc,
            resource_id: "res".to_string(),
            resource_group_id: Some("rg".to_string()),
            client_id: "client".to_string(),
            application_data: None,
            lock_key: Some("t:1".to_string()),
            status: BranchStatus::PhaseOneDone,
        };
        let decoded = BranchSession::decode(&branch.encode().unwrap()).unwrap();
        assert_eq!(decoded.branch_id, 71);
        assert_eq!(decoded.branch_type, BranchType::Tcc);
        assert_eq!(decoded.status, BranchStatus::PhaseOneDone);
        assert_eq!(decoded.lock_key.as_deref(), Some("t:1"));
    }

    #[test]
    fn test_unknown_status_code_is_rejected() {
        let mut record = GlobalTransactionRecord::from_session(&GlobalSession::new(
            "tc:1".to_string(),
            1,
            "app".to_string(),
            "group".to_string(),
            "tx".to_string(),
            1_000,
        ));
        record.status = 99;
        assert!(record.into_session().is_err());
    }
}
