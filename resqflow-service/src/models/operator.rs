//! Approved operators and their emergency status.

use serde::{Deserialize, Serialize};

use super::PendingRegistration;

/// Deployment status read by the roadside controller. Two states only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EmergencyStatus {
    #[default]
    Idle,
    Emergency,
}

impl EmergencyStatus {
    pub fn toggled(self) -> Self {
        match self {
            EmergencyStatus::Idle => EmergencyStatus::Emergency,
            EmergencyStatus::Emergency => EmergencyStatus::Idle,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EmergencyStatus::Idle => "idle",
            EmergencyStatus::Emergency => "emergency",
        }
    }
}

impl std::fmt::Display for EmergencyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Operator record keyed by the principal id issued when the login
/// credential was provisioned. One record per credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApprovedOperator {
    pub uid: String,
    pub full_name: String,
    pub email: String,
    pub vehicle_id: String,
    pub status: EmergencyStatus,
    /// Written by the in-vehicle module, never by this service.
    #[serde(rename = "esp32Connected", default)]
    pub device_connected: bool,
}

impl ApprovedOperator {
    pub fn from_registration(uid: String, registration: &PendingRegistration) -> Self {
        Self {
            uid,
            full_name: registration.full_name.clone(),
            email: registration.email.clone(),
            vehicle_id: registration.vehicle_id.clone(),
            status: EmergencyStatus::Idle,
            device_connected: false,
        }
    }

    pub fn is_emergency(&self) -> bool {
        self.status == EmergencyStatus::Emergency
    }
}
