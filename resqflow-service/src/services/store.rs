//! Record store seam.
//!
//! Every write is a single-document operation evaluated atomically by the
//! backend. Live queries deliver the current snapshot and then a fresh
//! snapshot after every committed change to the watched documents.

use async_trait::async_trait;
use service_core::subscription::LiveQuery;

use super::StoreError;
use crate::models::{
    AdminPrincipal, ApprovalSaga, ApprovedOperator, EmergencyStatus, PendingRegistration,
};

pub const PENDING_USERS: &str = "pending_users";
pub const APPROVED_USERS: &str = "approved_users";
pub const ADMINS: &str = "admins";
pub const APPROVAL_SAGAS: &str = "approval_sagas";

#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn health_check(&self) -> Result<(), StoreError>;

    // ==================== Pending registrations ====================

    /// Persist a new registration and return it with its assigned id.
    async fn insert_pending(
        &self,
        registration: PendingRegistration,
    ) -> Result<PendingRegistration, StoreError>;

    async fn find_pending(&self, id: &str) -> Result<Option<PendingRegistration>, StoreError>;

    async fn find_pending_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PendingRegistration>, StoreError>;

    /// The whole queue, oldest first.
    async fn list_pending(&self) -> Result<Vec<PendingRegistration>, StoreError>;

    /// Deleting an id that no longer exists succeeds.
    async fn delete_pending(&self, id: &str) -> Result<(), StoreError>;

    async fn watch_pending(&self) -> Result<LiveQuery<Vec<PendingRegistration>>, StoreError>;

    // ==================== Admins ====================

    /// Matches regardless of letter case.
    async fn find_admin_by_email(&self, email: &str)
        -> Result<Option<AdminPrincipal>, StoreError>;

    // ==================== Approved operators ====================

    async fn find_operator(&self, uid: &str) -> Result<Option<ApprovedOperator>, StoreError>;

    async fn find_operator_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ApprovedOperator>, StoreError>;

    /// Create or replace the record keyed by `operator.uid`.
    async fn put_operator(&self, operator: &ApprovedOperator) -> Result<(), StoreError>;

    /// Write only the `status` field. Fails with `NotFound` when the record
    /// does not exist.
    async fn set_operator_status(
        &self,
        uid: &str,
        status: EmergencyStatus,
    ) -> Result<(), StoreError>;

    /// Point subscription; delivers `None` while the record does not exist.
    async fn watch_operator(
        &self,
        uid: &str,
    ) -> Result<LiveQuery<Option<ApprovedOperator>>, StoreError>;

    // ==================== Approval sagas ====================

    /// Insert the marker. Fails with `Conflict` when one already exists for
    /// the same pending registration.
    async fn claim_approval(&self, saga: &ApprovalSaga) -> Result<(), StoreError>;

    async fn update_approval(&self, saga: &ApprovalSaga) -> Result<(), StoreError>;

    async fn find_approval(&self, pending_id: &str) -> Result<Option<ApprovalSaga>, StoreError>;

    async fn release_approval(&self, pending_id: &str) -> Result<(), StoreError>;

    async fn list_approvals(&self) -> Result<Vec<ApprovalSaga>, StoreError>;
}
