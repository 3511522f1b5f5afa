use serde::{Deserialize, Serialize};

/// Pre-seeded administrator entry. Read-only to this service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AdminPrincipal {
    pub email: String,
}
