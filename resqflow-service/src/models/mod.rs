pub mod admin;
pub mod operator;
pub mod registration;
pub mod saga;

pub use admin::AdminPrincipal;
pub use operator::{ApprovedOperator, EmergencyStatus};
pub use registration::{PendingRegistration, PendingStatus, RegistrationForm};
pub use saga::{ApprovalSaga, SagaStage};

/// Current wall-clock time in epoch milliseconds, the unit every record
/// timestamp uses.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}
