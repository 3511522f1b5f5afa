//! Pending registrations submitted from the public form.

use serde::{Deserialize, Serialize};
use validator::Validate;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PendingStatus {
    #[default]
    Pending,
}

/// A registration waiting in the admin queue. Never mutated in place: it is
/// created by intake and deleted on approval or rejection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PendingRegistration {
    /// Store-assigned; absent until persisted.
    #[serde(rename = "_id", default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub full_name: String,
    pub email: String,
    pub vehicle_id: String,
    #[serde(default)]
    pub status: PendingStatus,
    /// Creation instant, epoch milliseconds.
    pub timestamp: i64,
}

impl PendingRegistration {
    pub fn new(form: RegistrationForm, timestamp: i64) -> Self {
        Self {
            id: None,
            full_name: form.full_name,
            email: form.email,
            vehicle_id: form.vehicle_id,
            status: PendingStatus::Pending,
            timestamp,
        }
    }
}

/// Public registration form.
#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct RegistrationForm {
    #[validate(length(min = 1, max = 120, message = "Full name is required"))]
    pub full_name: String,
    #[validate(email(message = "A valid email address is required"))]
    pub email: String,
    #[validate(length(min = 1, max = 32, message = "Vehicle ID is required"))]
    pub vehicle_id: String,
}

impl RegistrationForm {
    pub fn new(
        full_name: impl Into<String>,
        email: impl Into<String>,
        vehicle_id: impl Into<String>,
    ) -> Self {
        Self {
            full_name: full_name.into(),
            email: email.into(),
            vehicle_id: vehicle_id.into(),
        }
    }

    /// Trim every field and lower-case the email, which later becomes the
    /// login identifier.
    pub fn normalized(self) -> Self {
        Self {
            full_name: self.full_name.trim().to_string(),
            email: self.email.trim().to_lowercase(),
            vehicle_id: self.vehicle_id.trim().to_string(),
        }
    }
}
