//! Registration, approval and operator control flows.

pub mod approval;
pub mod console;
pub mod dashboard;
pub mod intake;

pub use approval::{
    ApprovalOutcome, ApprovalReceipt, ApprovalWorkflow, DeliveryStatus, RejectOutcome,
    ResumeOutcome, SweepReport,
};
pub use console::OperatorConsole;
pub use dashboard::AdminDashboard;
pub use intake::RegistrationIntake;
