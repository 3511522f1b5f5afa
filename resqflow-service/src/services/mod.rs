//! Services layer for resqflow-service.
//!
//! Seams to the hosted identity provider, the record store and the mail
//! relay, with production and in-process implementations of each.

mod confirm;
mod database;
pub mod email;
pub mod error;
mod firebase;
pub mod identity;
mod memory;
pub mod metrics;
pub mod store;

pub use confirm::{AutoConfirm, Confirm};
pub use database::MongoStore;
pub use email::{CredentialDelivery, CredentialMailer, DeliveryError, MockMailer, SentCredential, SmtpMailer};
pub use error::{AuthError, ServiceError, StoreError};
pub use firebase::FirebaseIdentity;
pub use identity::{CredentialProvisioner, IdentityGateway, MemoryIdentity, Principal};
pub use memory::MemoryStore;
pub use store::RecordStore;
