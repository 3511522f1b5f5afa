use service_core::subscription::LiveQuery;
use std::sync::Arc;

use crate::models::{ApprovedOperator, EmergencyStatus};
use crate::services::{metrics, RecordStore, ServiceError};

/// Emergency control for one approved operator.
///
/// Renders the operator's record from a live subscription; a toggle writes
/// only the `status` field and the new value arrives through that same
/// subscription.
pub struct OperatorConsole {
    store: Arc<dyn RecordStore>,
    uid: String,
    feed: LiveQuery<Option<ApprovedOperator>>,
    record: Option<ApprovedOperator>,
}

impl OperatorConsole {
    pub async fn open(store: Arc<dyn RecordStore>, uid: &str) -> Result<Self, ServiceError> {
        let mut feed = store.watch_operator(uid).await?;
        let record = feed.latest().flatten();
        tracing::debug!(uid, found = record.is_some(), "Operator console opened");
        Ok(Self {
            store,
            uid: uid.to_string(),
            feed,
            record,
        })
    }

    pub fn uid(&self) -> &str {
        &self.uid
    }

    /// `None` while the record does not exist.
    pub fn record(&self) -> Option<&ApprovedOperator> {
        self.record.as_ref()
    }

    pub fn refresh(&mut self) -> bool {
        match self.feed.latest() {
            Some(record) => {
                let changed = record != self.record;
                self.record = record;
                changed
            }
            None => false,
        }
    }

    /// Wait for the next snapshot. `None` once the subscription has ended.
    pub async fn changed(&mut self) -> Option<Option<&ApprovedOperator>> {
        let record = self.feed.next().await?;
        self.record = record;
        Some(self.record.as_ref())
    }

    /// Flip `idle` and `emergency`. On a failed write the rendered status
    /// stays at its previous value.
    pub async fn toggle_emergency(&mut self) -> Result<EmergencyStatus, ServiceError> {
        self.refresh();
        let current = self
            .record
            .as_ref()
            .map(|r| r.status)
            .ok_or_else(|| ServiceError::NotFound(format!("Operator {}", self.uid)))?;

        let next = current.toggled();
        self.store
            .set_operator_status(&self.uid, next)
            .await
            .map_err(|e| {
                tracing::error!(uid = %self.uid, error = %e, "Failed to update emergency status");
                ServiceError::Store(e)
            })?;

        tracing::info!(uid = %self.uid, status = %next, "Emergency status changed");
        metrics::record_toggle(next.as_str());
        self.refresh();
        Ok(next)
    }

    pub fn is_active(&self) -> bool {
        self.feed.is_active()
    }

    pub fn close(&mut self) {
        self.feed.unsubscribe();
    }
}
