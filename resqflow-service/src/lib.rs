//! ResqFlow - registration, approval and emergency control for vehicle
//! operators.

pub mod config;
pub mod models;
pub mod services;
pub mod session;
pub mod utils;
pub mod workflows;

use std::sync::Arc;

use crate::config::ApprovalConfig;
use crate::services::{Confirm, CredentialMailer, IdentityGateway, RecordStore};

/// Shared handles to the external systems.
#[derive(Clone)]
pub struct Backends {
    pub store: Arc<dyn RecordStore>,
    pub identity: Arc<dyn IdentityGateway>,
    pub mailer: Arc<dyn CredentialMailer>,
    pub confirm: Arc<dyn Confirm>,
    pub approval: ApprovalConfig,
}
