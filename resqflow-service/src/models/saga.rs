//! Durable progress marker for an approval in flight.
//!
//! The marker is inserted before any credential exists and removed once the
//! operator record is written and the pending registration deleted. A marker
//! that outlives its approval identifies exactly where the sequence stopped.

use serde::{Deserialize, Serialize};

use super::PendingRegistration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SagaStage {
    /// Registration claimed; no credential has been requested yet, or the
    /// request's outcome is unknown.
    Claimed,
    /// Credential exists; `uid` is set. Operator record not yet written.
    CredentialProvisioned,
    /// Operator record written; pending registration may still exist.
    RecordWritten,
}

impl std::fmt::Display for SagaStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SagaStage::Claimed => write!(f, "claimed"),
            SagaStage::CredentialProvisioned => write!(f, "credential_provisioned"),
            SagaStage::RecordWritten => write!(f, "record_written"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalSaga {
    /// Id of the pending registration being approved; one marker per record.
    #[serde(rename = "_id")]
    pub pending_id: String,
    pub registration: PendingRegistration,
    pub stage: SagaStage,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    pub claimed_by: String,
    pub started_at: i64,
    pub updated_at: i64,
}

impl ApprovalSaga {
    pub fn claim(
        pending_id: String,
        registration: PendingRegistration,
        claimed_by: String,
        now: i64,
    ) -> Self {
        Self {
            pending_id,
            registration,
            stage: SagaStage::Claimed,
            uid: None,
            claimed_by,
            started_at: now,
            updated_at: now,
        }
    }

    pub fn advance(&mut self, stage: SagaStage, now: i64) {
        self.stage = stage;
        self.updated_at = now;
    }

    /// True when no progress has been recorded since `cutoff`.
    pub fn is_stalled(&self, cutoff: i64) -> bool {
        self.updated_at <= cutoff
    }
}
