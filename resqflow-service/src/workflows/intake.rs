use std::sync::Arc;
use validator::Validate;

use crate::models::{now_millis, PendingRegistration, RegistrationForm};
use crate::services::{metrics, RecordStore, ServiceError};

/// Accepts public registration requests into the pending queue.
#[derive(Clone)]
pub struct RegistrationIntake {
    store: Arc<dyn RecordStore>,
}

impl RegistrationIntake {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Validate the form and persist a `pending` registration stamped with
    /// the current time. Nothing is written when validation or the duplicate
    /// checks fail.
    pub async fn submit(&self, form: RegistrationForm) -> Result<PendingRegistration, ServiceError> {
        let form = form.normalized();
        form.validate()?;

        if self.store.find_pending_by_email(&form.email).await?.is_some() {
            return Err(ServiceError::Conflict(
                "A registration for this email is already awaiting approval".to_string(),
            ));
        }
        if self.store.find_operator_by_email(&form.email).await?.is_some() {
            return Err(ServiceError::Conflict(
                "This email already has operator access".to_string(),
            ));
        }

        let registration = self
            .store
            .insert_pending(PendingRegistration::new(form, now_millis()))
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to submit registration");
                ServiceError::Store(e)
            })?;

        tracing::info!(
            pending_id = registration.id.as_deref().unwrap_or_default(),
            vehicle_id = %registration.vehicle_id,
            "Registration submitted"
        );
        metrics::record_registration();

        Ok(registration)
    }
}
