//! In-process record store.
//!
//! Writes and subscription deliveries happen under one lock, so subscribers
//! observe changes in commit order. Failure injection lets callers exercise
//! the partial-failure paths of multi-step workflows.

use async_trait::async_trait;
use service_core::subscription::{LiveQuery, Publisher};
use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use super::store::{ADMINS, APPROVAL_SAGAS, APPROVED_USERS, PENDING_USERS};
use super::{RecordStore, StoreError};
use crate::models::{
    AdminPrincipal, ApprovalSaga, ApprovedOperator, EmergencyStatus, PendingRegistration,
};

#[derive(Default)]
struct State {
    pending: HashMap<String, PendingRegistration>,
    operators: HashMap<String, ApprovedOperator>,
    admins: Vec<AdminPrincipal>,
    approvals: HashMap<String, ApprovalSaga>,
    failing_writes: HashSet<&'static str>,
    failing_reads: HashSet<&'static str>,
    pending_feed: Publisher<Vec<PendingRegistration>>,
    operator_feeds: HashMap<String, Publisher<Option<ApprovedOperator>>>,
}

impl State {
    fn check_write(&self, collection: &'static str) -> Result<(), StoreError> {
        if self.failing_writes.contains(collection) {
            return Err(StoreError::Unavailable(format!("write to {} failed", collection)));
        }
        Ok(())
    }

    fn check_read(&self, collection: &'static str) -> Result<(), StoreError> {
        if self.failing_reads.contains(collection) {
            return Err(StoreError::Unavailable(format!("read from {} failed", collection)));
        }
        Ok(())
    }

    fn pending_snapshot(&self) -> Vec<PendingRegistration> {
        let mut queue: Vec<_> = self.pending.values().cloned().collect();
        queue.sort_by(|a, b| a.timestamp.cmp(&b.timestamp).then_with(|| a.id.cmp(&b.id)));
        queue
    }

    fn publish_pending(&self) {
        self.pending_feed.publish(&self.pending_snapshot());
    }

    /// Publishers left without subscribers are dropped.
    fn publish_operator(&mut self, uid: &str) {
        let record = self.operators.get(uid).cloned();
        let reached = match self.operator_feeds.get(uid) {
            Some(feed) => feed.publish(&record),
            None => return,
        };
        if reached == 0 {
            self.operator_feeds.remove(uid);
        }
    }
}

/// Email addresses compare case-insensitively.
fn same_email(a: &str, b: &str) -> bool {
    a.trim().to_lowercase() == b.trim().to_lowercase()
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Seed an administrator entry.
    pub fn add_admin(&self, email: &str) {
        self.state().admins.push(AdminPrincipal {
            email: email.to_string(),
        });
    }

    /// Make every subsequent write to `collection` fail until restored.
    pub fn fail_writes(&self, collection: &'static str) {
        self.state().failing_writes.insert(collection);
    }

    /// Make every subsequent read from `collection` fail until restored.
    pub fn fail_reads(&self, collection: &'static str) {
        self.state().failing_reads.insert(collection);
    }

    pub fn restore(&self, collection: &'static str) {
        let mut state = self.state();
        state.failing_writes.remove(collection);
        state.failing_reads.remove(collection);
    }

    /// Write performed by the in-vehicle module over its own connection.
    pub fn set_device_connected(&self, uid: &str, connected: bool) -> Result<(), StoreError> {
        let mut state = self.state();
        let operator = state
            .operators
            .get_mut(uid)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", APPROVED_USERS, uid)))?;
        operator.device_connected = connected;
        state.publish_operator(uid);
        Ok(())
    }

    /// Delete an operator record out from under the application, as a
    /// console operator of the backend could.
    pub fn remove_operator(&self, uid: &str) {
        let mut state = self.state();
        state.operators.remove(uid);
        state.publish_operator(uid);
    }

    pub fn pending_count(&self) -> usize {
        self.state().pending.len()
    }

    pub fn operator_count(&self) -> usize {
        self.state().operators.len()
    }

    pub fn pending_subscriber_count(&self) -> usize {
        self.state().pending_feed.subscriber_count()
    }

    pub fn operator_subscriber_count(&self, uid: &str) -> usize {
        let mut state = self.state();
        let count = state
            .operator_feeds
            .get(uid)
            .map(Publisher::subscriber_count)
            .unwrap_or(0);
        if count == 0 {
            state.operator_feeds.remove(uid);
        }
        count
    }

    /// Number of records with a live publisher.
    pub fn watched_operator_count(&self) -> usize {
        self.state().operator_feeds.len()
    }
}

#[async_trait]
impl RecordStore for MemoryStore {
    async fn health_check(&self) -> Result<(), StoreError> {
        Ok(())
    }

    async fn insert_pending(
        &self,
        mut registration: PendingRegistration,
    ) -> Result<PendingRegistration, StoreError> {
        let mut state = self.state();
        state.check_write(PENDING_USERS)?;
        let id = uuid::Uuid::new_v4().simple().to_string();
        registration.id = Some(id.clone());
        state.pending.insert(id, registration.clone());
        state.publish_pending();
        Ok(registration)
    }

    async fn find_pending(&self, id: &str) -> Result<Option<PendingRegistration>, StoreError> {
        let state = self.state();
        state.check_read(PENDING_USERS)?;
        Ok(state.pending.get(id).cloned())
    }

    async fn find_pending_by_email(
        &self,
        email: &str,
    ) -> Result<Option<PendingRegistration>, StoreError> {
        let state = self.state();
        state.check_read(PENDING_USERS)?;
        Ok(state.pending.values().find(|p| p.email == email).cloned())
    }

    async fn list_pending(&self) -> Result<Vec<PendingRegistration>, StoreError> {
        let state = self.state();
        state.check_read(PENDING_USERS)?;
        Ok(state.pending_snapshot())
    }

    async fn delete_pending(&self, id: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check_write(PENDING_USERS)?;
        if state.pending.remove(id).is_some() {
            state.publish_pending();
        }
        Ok(())
    }

    async fn watch_pending(&self) -> Result<LiveQuery<Vec<PendingRegistration>>, StoreError> {
        let state = self.state();
        state.check_read(PENDING_USERS)?;
        Ok(state.pending_feed.subscribe(state.pending_snapshot()))
    }

    async fn find_admin_by_email(
        &self,
        email: &str,
    ) -> Result<Option<AdminPrincipal>, StoreError> {
        let state = self.state();
        state.check_read(ADMINS)?;
        Ok(state
            .admins
            .iter()
            .find(|a| same_email(&a.email, email))
            .cloned())
    }

    async fn find_operator(&self, uid: &str) -> Result<Option<ApprovedOperator>, StoreError> {
        let state = self.state();
        state.check_read(APPROVED_USERS)?;
        Ok(state.operators.get(uid).cloned())
    }

    async fn find_operator_by_email(
        &self,
        email: &str,
    ) -> Result<Option<ApprovedOperator>, StoreError> {
        let state = self.state();
        state.check_read(APPROVED_USERS)?;
        Ok(state.operators.values().find(|o| o.email == email).cloned())
    }

    async fn put_operator(&self, operator: &ApprovedOperator) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check_write(APPROVED_USERS)?;
        state.operators.insert(operator.uid.clone(), operator.clone());
        state.publish_operator(&operator.uid);
        Ok(())
    }

    async fn set_operator_status(
        &self,
        uid: &str,
        status: EmergencyStatus,
    ) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check_write(APPROVED_USERS)?;
        let operator = state
            .operators
            .get_mut(uid)
            .ok_or_else(|| StoreError::NotFound(format!("{}/{}", APPROVED_USERS, uid)))?;
        operator.status = status;
        state.publish_operator(uid);
        Ok(())
    }

    async fn watch_operator(
        &self,
        uid: &str,
    ) -> Result<LiveQuery<Option<ApprovedOperator>>, StoreError> {
        let mut state = self.state();
        state.check_read(APPROVED_USERS)?;
        let snapshot = state.operators.get(uid).cloned();
        Ok(state
            .operator_feeds
            .entry(uid.to_string())
            .or_default()
            .subscribe(snapshot))
    }

    async fn claim_approval(&self, saga: &ApprovalSaga) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check_write(APPROVAL_SAGAS)?;
        if state.approvals.contains_key(&saga.pending_id) {
            return Err(StoreError::Conflict(format!(
                "{}/{}",
                APPROVAL_SAGAS, saga.pending_id
            )));
        }
        state.approvals.insert(saga.pending_id.clone(), saga.clone());
        Ok(())
    }

    async fn update_approval(&self, saga: &ApprovalSaga) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check_write(APPROVAL_SAGAS)?;
        match state.approvals.get_mut(&saga.pending_id) {
            Some(existing) => {
                *existing = saga.clone();
                Ok(())
            }
            None => Err(StoreError::NotFound(format!(
                "{}/{}",
                APPROVAL_SAGAS, saga.pending_id
            ))),
        }
    }

    async fn find_approval(&self, pending_id: &str) -> Result<Option<ApprovalSaga>, StoreError> {
        let state = self.state();
        state.check_read(APPROVAL_SAGAS)?;
        Ok(state.approvals.get(pending_id).cloned())
    }

    async fn release_approval(&self, pending_id: &str) -> Result<(), StoreError> {
        let mut state = self.state();
        state.check_write(APPROVAL_SAGAS)?;
        state.approvals.remove(pending_id);
        Ok(())
    }

    async fn list_approvals(&self) -> Result<Vec<ApprovalSaga>, StoreError> {
        let state = self.state();
        state.check_read(APPROVAL_SAGAS)?;
        let mut sagas: Vec<_> = state.approvals.values().cloned().collect();
        sagas.sort_by_key(|s| s.started_at);
        Ok(sagas)
    }
}
