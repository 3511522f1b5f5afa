use service_core::error::AppError;
use thiserror::Error;

use super::email::DeliveryError;
use crate::models::SagaStage;
use crate::session::Screen;

/// Failures reported by the identity gateway. Shown inline on the form that
/// triggered them; never retried automatically.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum AuthError {
    #[error("Invalid email or password")]
    InvalidCredentials,

    #[error("Unauthorized Admin Credentials.")]
    UnauthorizedAdmin,

    #[error("Password does not meet the minimum strength policy")]
    WeakSecret,

    #[error("An account already exists for this email")]
    EmailExists,

    #[error("Please enter email first")]
    MissingEmail,

    #[error("Account disabled")]
    AccountDisabled,

    #[error("Identity gateway error: {0}")]
    Gateway(String),
}

/// Failures reported by the record store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Record already exists: {0}")]
    Conflict(String),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Record store unavailable: {0}")]
    Unavailable(String),

    #[error("Database error: {0}")]
    Database(#[from] mongodb::error::Error),
}

#[derive(Debug, Error)]
pub enum ServiceError {
    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Validation error: {0}")]
    Validation(#[from] validator::ValidationErrors),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Approval of registration {pending_id} is already in progress")]
    ApprovalInProgress { pending_id: String },

    /// The credential exists but the sequence stopped before the operator
    /// record and the queue were brought in line with it. The saga marker is
    /// left in place for `resume`.
    #[error(
        "Approval of registration {pending_id} stopped at stage {stage} after provisioning credential {uid}: {source}"
    )]
    ApprovalIncomplete {
        pending_id: String,
        uid: String,
        stage: SagaStage,
        source: StoreError,
    },

    #[error("The {0} screen is only reachable after sign-in")]
    ScreenGated(Screen),

    #[error("Delivery error: {0}")]
    Delivery(#[from] DeliveryError),
}

impl ServiceError {
    /// Text surfaced to the user for a failed action.
    pub fn user_message(&self) -> String {
        match self {
            ServiceError::Auth(err) => err.to_string(),
            ServiceError::Store(StoreError::NotFound(what)) => format!("{} no longer exists", what),
            ServiceError::Store(err) => format!("Could not save changes: {}", err),
            ServiceError::Validation(err) => format!("Please check the form: {}", err),
            ServiceError::ApprovalIncomplete { uid, .. } => format!(
                "Approval error: credential {} was created but the approval did not finish. \
                 Resume the approval before retrying.",
                uid
            ),
            other => other.to_string(),
        }
    }
}

impl From<ServiceError> for AppError {
    fn from(err: ServiceError) -> Self {
        match err {
            ServiceError::Auth(e) => AppError::AuthError(anyhow::anyhow!(e)),
            ServiceError::Store(StoreError::Conflict(e)) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::Store(StoreError::NotFound(e)) => AppError::NotFound(anyhow::anyhow!(e)),
            ServiceError::Store(StoreError::Database(e)) => AppError::DatabaseError(anyhow::Error::new(e)),
            ServiceError::Store(e @ StoreError::Unavailable(_)) => {
                AppError::DatabaseError(anyhow::anyhow!(e.to_string()))
            }
            ServiceError::Validation(e) => AppError::ValidationError(e),
            ServiceError::Conflict(e) => AppError::Conflict(anyhow::anyhow!(e)),
            ServiceError::NotFound(e) => AppError::NotFound(anyhow::anyhow!(e)),
            e @ ServiceError::ApprovalInProgress { .. } => AppError::Conflict(anyhow::anyhow!(e.to_string())),
            e @ ServiceError::ApprovalIncomplete { .. } => AppError::InternalError(anyhow::anyhow!(e.to_string())),
            e @ ServiceError::ScreenGated(_) => AppError::Forbidden(anyhow::anyhow!(e.to_string())),
            ServiceError::Delivery(e) => AppError::EmailError(e.to_string()),
        }
    }
}
