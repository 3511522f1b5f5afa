use service_core::subscription::LiveQuery;

use super::approval::{ApprovalOutcome, ApprovalWorkflow, RejectOutcome};
use crate::models::PendingRegistration;
use crate::services::ServiceError;

/// Live view of the approval queue for a signed-in admin.
///
/// Holds a subscription to the pending collection for as long as it lives;
/// dropping the dashboard ends it.
pub struct AdminDashboard {
    workflow: ApprovalWorkflow,
    feed: LiveQuery<Vec<PendingRegistration>>,
    pending: Vec<PendingRegistration>,
}

impl AdminDashboard {
    pub async fn open(workflow: ApprovalWorkflow) -> Result<Self, ServiceError> {
        let mut feed = workflow.store().watch_pending().await?;
        let pending = feed.latest().unwrap_or_default();
        tracing::debug!(count = pending.len(), "Admin dashboard opened");
        Ok(Self {
            workflow,
            feed,
            pending,
        })
    }

    /// Queue as of the last applied snapshot, oldest first.
    pub fn pending(&self) -> &[PendingRegistration] {
        &self.pending
    }

    /// Apply the newest delivered snapshot, if any. Returns whether the view
    /// changed.
    pub fn refresh(&mut self) -> bool {
        match self.feed.latest() {
            Some(pending) => {
                let changed = pending != self.pending;
                self.pending = pending;
                changed
            }
            None => false,
        }
    }

    /// Wait for the next snapshot. `None` once the subscription has ended.
    pub async fn changed(&mut self) -> Option<&[PendingRegistration]> {
        let pending = self.feed.next().await?;
        self.pending = pending;
        Some(&self.pending)
    }

    pub async fn approve(&mut self, pending_id: &str) -> Result<ApprovalOutcome, ServiceError> {
        let registration = self.lookup(pending_id)?;
        let outcome = self.workflow.approve(&registration).await?;
        self.refresh();
        Ok(outcome)
    }

    pub async fn reject(&mut self, pending_id: &str) -> Result<RejectOutcome, ServiceError> {
        let registration = self.lookup(pending_id)?;
        let outcome = self.workflow.reject(&registration).await?;
        self.refresh();
        Ok(outcome)
    }

    pub fn workflow(&self) -> &ApprovalWorkflow {
        &self.workflow
    }

    pub fn is_active(&self) -> bool {
        self.feed.is_active()
    }

    pub fn close(&mut self) {
        self.feed.unsubscribe();
    }

    fn lookup(&mut self, pending_id: &str) -> Result<PendingRegistration, ServiceError> {
        self.refresh();
        self.pending
            .iter()
            .find(|r| r.id.as_deref() == Some(pending_id))
            .cloned()
            .ok_or_else(|| ServiceError::NotFound(format!("Registration {}", pending_id)))
    }
}
