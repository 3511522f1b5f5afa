//! Identity gateway seam and the in-process gateway.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use service_core::subscription::{LiveQuery, Publisher};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use super::AuthError;

/// Minimum secret length accepted by the hosted gateway.
pub const MIN_SECRET_LEN: usize = 6;

/// An authenticated identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub uid: String,
    pub email: String,
}

/// Creates login credentials.
#[async_trait]
pub trait CredentialProvisioner: Send + Sync {
    async fn create_credential(
        &self,
        email: &str,
        secret: &SecretString,
    ) -> Result<Principal, AuthError>;
}

/// Client-side view of the hosted identity provider.
///
/// `create_credential` on the gateway itself behaves like the hosted SDK:
/// the new principal becomes the signed-in principal. Use [`isolated`] to
/// provision credentials for someone else without touching the session.
///
/// [`isolated`]: IdentityGateway::isolated
#[async_trait]
pub trait IdentityGateway: CredentialProvisioner {
    async fn sign_in(&self, email: &str, secret: &SecretString) -> Result<Principal, AuthError>;

    async fn sign_out(&self) -> Result<(), AuthError>;

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError>;

    fn current_principal(&self) -> Option<Principal>;

    /// Delivers the current principal, then every change (`None` on sign-out).
    fn watch_principal(&self) -> LiveQuery<Option<Principal>>;

    /// A secondary authentication context sharing the credential backend but
    /// not the session.
    fn isolated(&self) -> Arc<dyn CredentialProvisioner>;
}

/// Signed-in principal plus its change feed.
#[derive(Default)]
pub struct PrincipalSession {
    current: Mutex<Option<Principal>>,
    feed: Publisher<Option<Principal>>,
}

impl PrincipalSession {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_guard(&self) -> MutexGuard<'_, Option<Principal>> {
        self.current.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn current(&self) -> Option<Principal> {
        self.current_guard().clone()
    }

    /// Replace the principal and notify watchers.
    pub fn set(&self, principal: Option<Principal>) {
        let mut current = self.current_guard();
        *current = principal;
        self.feed.publish(&current);
    }

    pub fn watch(&self) -> LiveQuery<Option<Principal>> {
        let current = self.current_guard();
        self.feed.subscribe(current.clone())
    }
}

struct Account {
    uid: String,
    secret: String,
    disabled: bool,
}

#[derive(Default)]
struct Accounts {
    by_email: Mutex<HashMap<String, Account>>,
}

impl Accounts {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, Account>> {
        self.by_email.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn create(&self, email: &str, secret: &SecretString) -> Result<Principal, AuthError> {
        if email.trim().is_empty() {
            return Err(AuthError::MissingEmail);
        }
        if secret.expose_secret().chars().count() < MIN_SECRET_LEN {
            return Err(AuthError::WeakSecret);
        }
        let mut accounts = self.lock();
        if accounts.contains_key(email) {
            return Err(AuthError::EmailExists);
        }
        let uid = uuid::Uuid::new_v4().simple().to_string();
        accounts.insert(
            email.to_string(),
            Account {
                uid: uid.clone(),
                secret: secret.expose_secret().clone(),
                disabled: false,
            },
        );
        Ok(Principal {
            uid,
            email: email.to_string(),
        })
    }
}

/// In-process identity gateway with the hosted provider's observable
/// behaviour.
#[derive(Default)]
pub struct MemoryIdentity {
    accounts: Arc<Accounts>,
    session: PrincipalSession,
    password_resets: Mutex<Vec<String>>,
}

struct IsolatedProvisioner {
    accounts: Arc<Accounts>,
}

#[async_trait]
impl CredentialProvisioner for IsolatedProvisioner {
    async fn create_credential(
        &self,
        email: &str,
        secret: &SecretString,
    ) -> Result<Principal, AuthError> {
        self.accounts.create(email, secret)
    }
}

impl MemoryIdentity {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an account directly, bypassing any session.
    pub fn add_account(&self, email: &str, secret: &str) -> Result<Principal, AuthError> {
        self.accounts.create(email, &SecretString::new(secret.to_string()))
    }

    pub fn has_account(&self, email: &str) -> bool {
        self.accounts.lock().contains_key(email)
    }

    pub fn account_count(&self) -> usize {
        self.accounts.lock().len()
    }

    pub fn uid_for(&self, email: &str) -> Option<String> {
        self.accounts.lock().get(email).map(|a| a.uid.clone())
    }

    /// Disable the account and end its session if it is the signed-in one,
    /// as a revocation issued from another device would.
    pub fn revoke(&self, uid: &str) {
        for account in self.accounts.lock().values_mut() {
            if account.uid == uid {
                account.disabled = true;
            }
        }
        if self.session.current().is_some_and(|p| p.uid == uid) {
            self.session.set(None);
        }
    }

    /// Emails that a password reset was requested for, in order.
    pub fn password_resets(&self) -> Vec<String> {
        self.password_resets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }
}

#[async_trait]
impl CredentialProvisioner for MemoryIdentity {
    async fn create_credential(
        &self,
        email: &str,
        secret: &SecretString,
    ) -> Result<Principal, AuthError> {
        let principal = self.accounts.create(email, secret)?;
        self.session.set(Some(principal.clone()));
        Ok(principal)
    }
}

#[async_trait]
impl IdentityGateway for MemoryIdentity {
    async fn sign_in(&self, email: &str, secret: &SecretString) -> Result<Principal, AuthError> {
        let principal = {
            let accounts = self.accounts.lock();
            let account = accounts.get(email).ok_or(AuthError::InvalidCredentials)?;
            if account.disabled {
                return Err(AuthError::AccountDisabled);
            }
            if account.secret != *secret.expose_secret() {
                return Err(AuthError::InvalidCredentials);
            }
            Principal {
                uid: account.uid.clone(),
                email: email.to_string(),
            }
        };
        self.session.set(Some(principal.clone()));
        Ok(principal)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.session.set(None);
        Ok(())
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        if email.trim().is_empty() {
            return Err(AuthError::MissingEmail);
        }
        self.password_resets
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .push(email.to_string());
        Ok(())
    }

    fn current_principal(&self) -> Option<Principal> {
        self.session.current()
    }

    fn watch_principal(&self) -> LiveQuery<Option<Principal>> {
        self.session.watch()
    }

    fn isolated(&self) -> Arc<dyn CredentialProvisioner> {
        Arc::new(IsolatedProvisioner {
            accounts: self.accounts.clone(),
        })
    }
}
