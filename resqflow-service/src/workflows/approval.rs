//! Admin approval of pending registrations.
//!
//! Approval spans two systems that share no transaction: the identity
//! provider (credential) and the record store (operator record, queue). A
//! saga marker in the store records how far each approval got, so a
//! credential is never created without something pointing at it.

use secrecy::SecretString;
use std::sync::Arc;
use std::time::Duration;

use crate::config::ApprovalConfig;
use crate::models::{now_millis, ApprovalSaga, ApprovedOperator, PendingRegistration, SagaStage};
use crate::services::{
    metrics, Confirm, CredentialDelivery, CredentialMailer, CredentialProvisioner,
    IdentityGateway, RecordStore, ServiceError, StoreError,
};
use crate::utils::generate_temporary_secret;

const REJECT_PROMPT: &str = "Delete this registration request?";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryStatus {
    Delivered,
    Failed(String),
}

/// Result of a completed approval.
pub struct ApprovalReceipt {
    pub pending_id: String,
    pub uid: String,
    pub email: String,
    pub delivery: DeliveryStatus,
    /// Kept so the admin can hand the credential over when delivery fails.
    pub temporary_secret: SecretString,
}

impl std::fmt::Debug for ApprovalReceipt {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApprovalReceipt")
            .field("pending_id", &self.pending_id)
            .field("uid", &self.uid)
            .field("email", &self.email)
            .field("delivery", &self.delivery)
            .field("temporary_secret", &"[REDACTED]")
            .finish()
    }
}

#[derive(Debug)]
pub enum ApprovalOutcome {
    /// The admin declined the prompt. Nothing was touched.
    Declined,
    Approved(ApprovalReceipt),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RejectOutcome {
    Declined,
    Rejected,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The approval was finished. The temporary secret is not recoverable,
    /// so a password reset was requested for the operator instead.
    Completed { uid: String, reset_requested: bool },
    /// The marker never recorded a credential, but one may exist. The marker
    /// is kept until an admin supplies the uid or releases the claim.
    NeedsAttention { pending_id: String },
}

/// Totals from one pass over stalled approvals.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub completed: usize,
    pub needs_attention: Vec<String>,
    pub failed: Vec<String>,
}

impl SweepReport {
    pub fn is_empty(&self) -> bool {
        self.completed == 0 && self.needs_attention.is_empty() && self.failed.is_empty()
    }
}

#[derive(Clone)]
pub struct ApprovalWorkflow {
    store: Arc<dyn RecordStore>,
    identity: Arc<dyn IdentityGateway>,
    provisioner: Arc<dyn CredentialProvisioner>,
    mailer: Arc<dyn CredentialMailer>,
    confirm: Arc<dyn Confirm>,
    actor: String,
    secret_length: usize,
}

impl ApprovalWorkflow {
    /// Credentials are provisioned through the gateway's isolated context so
    /// the acting admin stays signed in.
    pub fn new(
        store: Arc<dyn RecordStore>,
        identity: Arc<dyn IdentityGateway>,
        mailer: Arc<dyn CredentialMailer>,
        confirm: Arc<dyn Confirm>,
        actor: impl Into<String>,
        config: &ApprovalConfig,
    ) -> Self {
        let provisioner = identity.isolated();
        Self {
            store,
            identity,
            provisioner,
            mailer,
            confirm,
            actor: actor.into(),
            secret_length: config.temp_secret_length,
        }
    }

    pub(crate) fn store(&self) -> &Arc<dyn RecordStore> {
        &self.store
    }

    pub async fn approve(
        &self,
        registration: &PendingRegistration,
    ) -> Result<ApprovalOutcome, ServiceError> {
        let pending_id = registration_id(registration)?;

        let prompt = format!(
            "Approve {} for Vehicle {}?",
            registration.full_name, registration.vehicle_id
        );
        if !self.confirm.confirm(&prompt).await {
            tracing::info!(pending_id = %pending_id, "Approval declined at prompt");
            return Ok(ApprovalOutcome::Declined);
        }

        let mut saga = ApprovalSaga::claim(
            pending_id.clone(),
            registration.clone(),
            self.actor.clone(),
            now_millis(),
        );
        match self.store.claim_approval(&saga).await {
            Ok(()) => {}
            Err(StoreError::Conflict(_)) => {
                tracing::warn!(pending_id = %pending_id, "Approval already in progress");
                return Err(ServiceError::ApprovalInProgress { pending_id });
            }
            Err(e) => return Err(e.into()),
        }

        // The queue entry may have been rejected or approved elsewhere since
        // the admin loaded it.
        match self.store.find_pending(&pending_id).await {
            Ok(Some(_)) => {}
            Ok(None) => {
                self.release_quietly(&pending_id).await;
                return Err(ServiceError::NotFound(format!("Registration {}", pending_id)));
            }
            Err(e) => {
                self.release_quietly(&pending_id).await;
                return Err(e.into());
            }
        }

        let secret = generate_temporary_secret(self.secret_length);
        let principal = match self
            .provisioner
            .create_credential(&registration.email, &secret)
            .await
        {
            Ok(principal) => principal,
            Err(e) => {
                tracing::error!(pending_id = %pending_id, error = %e, "Credential provisioning failed");
                self.release_quietly(&pending_id).await;
                metrics::record_approval("failed");
                return Err(e.into());
            }
        };

        saga.uid = Some(principal.uid.clone());
        saga.advance(SagaStage::CredentialProvisioned, now_millis());
        if let Err(e) = self.store.update_approval(&saga).await {
            // Nothing durable names the credential yet. Stop here so the uid
            // reaches the caller before any further step can fail.
            saga.stage = SagaStage::Claimed;
            metrics::record_approval("incomplete");
            return Err(incomplete(&saga, principal.uid, e));
        }

        if let Err((stage, e)) = self.complete(&mut saga).await {
            saga.stage = stage;
            metrics::record_approval("incomplete");
            return Err(incomplete(&saga, principal.uid, e));
        }

        tracing::info!(
            pending_id = %pending_id,
            uid = %principal.uid,
            vehicle_id = %registration.vehicle_id,
            approved_by = %self.actor,
            "Registration approved"
        );
        metrics::record_approval("approved");

        let delivery = CredentialDelivery {
            to: registration.email.clone(),
            full_name: registration.full_name.clone(),
            vehicle_id: registration.vehicle_id.clone(),
            temporary_secret: secret,
        };
        let status = match self.mailer.deliver(&delivery).await {
            Ok(()) => {
                metrics::record_delivery("sent");
                DeliveryStatus::Delivered
            }
            Err(e) => {
                tracing::warn!(uid = %principal.uid, error = %e, "Credential delivery failed");
                metrics::record_delivery("failed");
                DeliveryStatus::Failed(e.to_string())
            }
        };

        Ok(ApprovalOutcome::Approved(ApprovalReceipt {
            pending_id,
            uid: principal.uid,
            email: registration.email.clone(),
            delivery: status,
            temporary_secret: delivery.temporary_secret,
        }))
    }

    /// Delete a pending registration after confirmation. No credential or
    /// operator record is touched.
    pub async fn reject(
        &self,
        registration: &PendingRegistration,
    ) -> Result<RejectOutcome, ServiceError> {
        let pending_id = registration_id(registration)?;

        if !self.confirm.confirm(REJECT_PROMPT).await {
            return Ok(RejectOutcome::Declined);
        }
        if self.store.find_approval(&pending_id).await?.is_some() {
            return Err(ServiceError::ApprovalInProgress { pending_id });
        }

        self.store.delete_pending(&pending_id).await?;

        tracing::info!(pending_id = %pending_id, rejected_by = %self.actor, "Registration rejected");
        metrics::record_rejection();
        Ok(RejectOutcome::Rejected)
    }

    /// Drive an interrupted approval to a consistent end state.
    pub async fn resume(&self, pending_id: &str) -> Result<ResumeOutcome, ServiceError> {
        let mut saga = self
            .store
            .find_approval(pending_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Approval of registration {}", pending_id)))?;

        let uid = match (saga.stage, saga.uid.clone()) {
            (SagaStage::Claimed, _) | (_, None) => {
                tracing::warn!(pending_id, "Approval claim has no recorded credential");
                return Ok(ResumeOutcome::NeedsAttention {
                    pending_id: pending_id.to_string(),
                });
            }
            (_, Some(uid)) => uid,
        };

        self.finish(saga, uid).await
    }

    /// Resume a claimed approval whose credential uid is known out of band,
    /// such as from an `ApprovalIncomplete` error.
    pub async fn resume_with_uid(
        &self,
        pending_id: &str,
        uid: &str,
    ) -> Result<ResumeOutcome, ServiceError> {
        let mut saga = self
            .store
            .find_approval(pending_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Approval of registration {}", pending_id)))?;

        if saga.uid.as_deref().is_some_and(|recorded| recorded != uid) {
            return Err(ServiceError::Conflict(format!(
                "Approval of registration {} is bound to another credential",
                pending_id
            )));
        }

        if saga.stage == SagaStage::Claimed {
            saga.uid = Some(uid.to_string());
            saga.advance(SagaStage::CredentialProvisioned, now_millis());
            if let Err(e) = self.store.update_approval(&saga).await {
                saga.stage = SagaStage::Claimed;
                return Err(incomplete(&saga, uid.to_string(), e));
            }
        }

        self.finish(saga, uid.to_string()).await
    }

    /// Drop a claim that never reached the identity provider, returning the
    /// registration to the queue. Refused once a credential is recorded.
    pub async fn release_claim(&self, pending_id: &str) -> Result<(), ServiceError> {
        let saga = self
            .store
            .find_approval(pending_id)
            .await?
            .ok_or_else(|| ServiceError::NotFound(format!("Approval of registration {}", pending_id)))?;

        if let Some(uid) = saga.uid {
            return Err(ServiceError::Conflict(format!(
                "Approval of registration {} already provisioned credential {}",
                pending_id, uid
            )));
        }

        self.store.release_approval(pending_id).await?;
        tracing::info!(pending_id, actor = %self.actor, "Released approval claim");
        Ok(())
    }

    async fn finish(&self, mut saga: ApprovalSaga, uid: String) -> Result<ResumeOutcome, ServiceError> {
        let pending_id = saga.pending_id.clone();
        if let Err((stage, e)) = self.complete(&mut saga).await {
            saga.stage = stage;
            return Err(incomplete(&saga, uid, e));
        }

        let reset_requested = match self
            .identity
            .request_password_reset(&saga.registration.email)
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(uid = %uid, error = %e, "Password reset request failed");
                false
            }
        };

        tracing::info!(pending_id = %pending_id, uid = %uid, "Resumed approval completed");
        metrics::record_approval("resumed");
        Ok(ResumeOutcome::Completed { uid, reset_requested })
    }

    /// Approvals with no recorded progress for `stall_after`.
    pub async fn stalled(&self, stall_after: Duration) -> Result<Vec<ApprovalSaga>, ServiceError> {
        let cutoff = now_millis() - stall_after.as_millis() as i64;
        Ok(self
            .store
            .list_approvals()
            .await?
            .into_iter()
            .filter(|saga| saga.is_stalled(cutoff))
            .collect())
    }

    pub async fn resume_stalled(&self, stall_after: Duration) -> Result<SweepReport, ServiceError> {
        let mut report = SweepReport::default();

        for saga in self.stalled(stall_after).await? {
            match self.resume(&saga.pending_id).await {
                Ok(ResumeOutcome::Completed { .. }) => report.completed += 1,
                Ok(ResumeOutcome::NeedsAttention { pending_id }) => {
                    report.needs_attention.push(pending_id)
                }
                Err(e) => {
                    tracing::error!(pending_id = %saga.pending_id, error = %e, "Failed to resume approval");
                    report.failed.push(saga.pending_id);
                }
            }
        }

        Ok(report)
    }

    /// Write the operator record, drop the queue entry and release the
    /// marker, starting from the marker's current stage. On failure returns
    /// the last stage reached.
    async fn complete(&self, saga: &mut ApprovalSaga) -> Result<(), (SagaStage, StoreError)> {
        let stage = saga.stage;
        let uid = saga.uid.clone().unwrap_or_default();

        if saga.stage == SagaStage::CredentialProvisioned {
            // A record may already exist if only the marker update was lost.
            // Rewriting it would reset the operator's live status.
            let existing = self.store.find_operator(&uid).await.map_err(|e| (stage, e))?;
            if existing.is_none() {
                let operator = ApprovedOperator::from_registration(uid.clone(), &saga.registration);
                self.store.put_operator(&operator).await.map_err(|e| (stage, e))?;
            }

            saga.advance(SagaStage::RecordWritten, now_millis());
            if let Err(e) = self.store.update_approval(saga).await {
                tracing::warn!(pending_id = %saga.pending_id, error = %e, "Failed to record approval progress");
            }
        }

        self.store
            .delete_pending(&saga.pending_id)
            .await
            .map_err(|e| (SagaStage::RecordWritten, e))?;
        self.store
            .release_approval(&saga.pending_id)
            .await
            .map_err(|e| (SagaStage::RecordWritten, e))?;
        Ok(())
    }

    async fn release_quietly(&self, pending_id: &str) {
        if let Err(e) = self.store.release_approval(pending_id).await {
            tracing::warn!(pending_id, error = %e, "Failed to release approval claim");
        }
    }
}

fn registration_id(registration: &PendingRegistration) -> Result<String, ServiceError> {
    registration
        .id
        .clone()
        .ok_or_else(|| ServiceError::NotFound("Registration without an id".to_string()))
}

fn incomplete(saga: &ApprovalSaga, uid: String, source: StoreError) -> ServiceError {
    tracing::error!(
        pending_id = %saga.pending_id,
        uid = %uid,
        stage = %saga.stage,
        error = %source,
        "Approval stopped after credential was provisioned"
    );
    ServiceError::ApprovalIncomplete {
        pending_id: saga.pending_id.clone(),
        uid,
        stage: saga.stage,
        source,
    }
}
