use std::sync::Arc;

use super::Screen;
use crate::models::ApprovedOperator;
use crate::services::{Principal, RecordStore, StoreError};

/// What a signed-in principal is allowed to see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    Admin,
    ApprovedOperator(ApprovedOperator),
    /// Authenticated but neither an admin nor approved. Must be signed out.
    Unrecognized,
}

impl Classification {
    pub fn screen(&self) -> Screen {
        match self {
            Classification::Admin => Screen::AdminDashboard,
            Classification::ApprovedOperator(_) => Screen::UserDashboard,
            Classification::Unrecognized => Screen::Landing,
        }
    }
}

#[derive(Clone)]
pub struct SessionResolver {
    store: Arc<dyn RecordStore>,
}

impl SessionResolver {
    pub fn new(store: Arc<dyn RecordStore>) -> Self {
        Self { store }
    }

    /// Admin membership wins over an operator record for the same principal.
    pub async fn classify(&self, principal: &Principal) -> Result<Classification, StoreError> {
        if self.store.find_admin_by_email(&principal.email).await?.is_some() {
            return Ok(Classification::Admin);
        }
        match self.store.find_operator(&principal.uid).await? {
            Some(operator) => Ok(Classification::ApprovedOperator(operator)),
            None => Ok(Classification::Unrecognized),
        }
    }
}
