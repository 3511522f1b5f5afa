//! Identity gateway backed by the Google Identity Toolkit REST API.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use service_core::error::AppError;
use service_core::subscription::LiveQuery;
use std::sync::Arc;
use std::time::Duration;

use super::identity::{CredentialProvisioner, IdentityGateway, Principal, PrincipalSession};
use super::AuthError;
use crate::config::IdentityConfig;

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct PasswordRequest<'a> {
    email: &'a str,
    password: &'a str,
    return_secure_token: bool,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct OobCodeRequest<'a> {
    request_type: &'a str,
    email: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct AccountResponse {
    local_id: String,
    email: String,
}

#[derive(Deserialize)]
struct ErrorEnvelope {
    error: ErrorBody,
}

#[derive(Deserialize)]
struct ErrorBody {
    message: String,
}

/// Map the provider's error codes onto the gateway taxonomy.
fn classify_error(message: &str) -> AuthError {
    let code = message.split(&[' ', ':'][..]).next().unwrap_or_default();
    match code {
        "EMAIL_EXISTS" => AuthError::EmailExists,
        "WEAK_PASSWORD" => AuthError::WeakSecret,
        "MISSING_EMAIL" => AuthError::MissingEmail,
        "USER_DISABLED" => AuthError::AccountDisabled,
        "EMAIL_NOT_FOUND" | "INVALID_PASSWORD" | "INVALID_LOGIN_CREDENTIALS" | "INVALID_EMAIL" => {
            AuthError::InvalidCredentials
        }
        _ => AuthError::Gateway(message.to_string()),
    }
}

#[derive(Clone)]
struct RestClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: String,
}

impl RestClient {
    fn url(&self, method: &str) -> String {
        format!("{}/accounts:{}?key={}", self.endpoint, method, self.api_key)
    }

    async fn call<B, R>(&self, method: &str, body: &B) -> Result<R, AuthError>
    where
        B: Serialize + Sync,
        R: for<'de> Deserialize<'de>,
    {
        let response = self
            .http
            .post(self.url(method))
            .json(body)
            .send()
            .await
            .map_err(|e| {
                tracing::error!(method, error = %e, "Identity gateway request failed");
                AuthError::Gateway(e.to_string())
            })?;

        if response.status().is_success() {
            return response
                .json::<R>()
                .await
                .map_err(|e| AuthError::Gateway(e.to_string()));
        }

        let status = response.status();
        let message = match response.json::<ErrorEnvelope>().await {
            Ok(envelope) => envelope.error.message,
            Err(_) => format!("HTTP {}", status),
        };
        tracing::warn!(method, status = %status, message = %message, "Identity gateway rejected request");
        Err(classify_error(&message))
    }

    async fn sign_up(&self, email: &str, secret: &SecretString) -> Result<Principal, AuthError> {
        let account: AccountResponse = self
            .call(
                "signUp",
                &PasswordRequest {
                    email,
                    password: secret.expose_secret(),
                    return_secure_token: true,
                },
            )
            .await?;
        Ok(Principal {
            uid: account.local_id,
            email: account.email,
        })
    }
}

#[async_trait]
impl CredentialProvisioner for RestClient {
    async fn create_credential(
        &self,
        email: &str,
        secret: &SecretString,
    ) -> Result<Principal, AuthError> {
        // The returned tokens are discarded, so the caller's session is untouched.
        self.sign_up(email, secret).await
    }
}

pub struct FirebaseIdentity {
    client: RestClient,
    session: PrincipalSession,
}

impl FirebaseIdentity {
    pub fn new(config: &IdentityConfig) -> Result<Self, AppError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_seconds))
            .build()?;

        tracing::info!(endpoint = %config.endpoint, "Identity gateway client initialized");

        Ok(Self {
            client: RestClient {
                http,
                endpoint: config.endpoint.trim_end_matches('/').to_string(),
                api_key: config.api_key.clone(),
            },
            session: PrincipalSession::new(),
        })
    }
}

#[async_trait]
impl CredentialProvisioner for FirebaseIdentity {
    async fn create_credential(
        &self,
        email: &str,
        secret: &SecretString,
    ) -> Result<Principal, AuthError> {
        let principal = self.client.sign_up(email, secret).await?;
        self.session.set(Some(principal.clone()));
        Ok(principal)
    }
}

#[async_trait]
impl IdentityGateway for FirebaseIdentity {
    async fn sign_in(&self, email: &str, secret: &SecretString) -> Result<Principal, AuthError> {
        let account: AccountResponse = self
            .client
            .call(
                "signInWithPassword",
                &PasswordRequest {
                    email,
                    password: secret.expose_secret(),
                    return_secure_token: true,
                },
            )
            .await?;
        let principal = Principal {
            uid: account.local_id,
            email: account.email,
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
        let _: serde_json::Value = self
            .client
            .call(
                "sendOobCode",
                &OobCodeRequest {
                    request_type: "PASSWORD_RESET",
                    email,
                },
            )
            .await?;
        Ok(())
    }

    fn current_principal(&self) -> Option<Principal> {
        self.session.current()
    }

    fn watch_principal(&self) -> LiveQuery<Option<Principal>> {
        self.session.watch()
    }

    fn isolated(&self) -> Arc<dyn CredentialProvisioner> {
        Arc::new(self.client.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify_error_codes() {
        assert_eq!(classify_error("EMAIL_EXISTS"), AuthError::EmailExists);
        assert_eq!(
            classify_error("WEAK_PASSWORD : Password should be at least 6 characters"),
            AuthError::WeakSecret
        );
        assert_eq!(
            classify_error("INVALID_LOGIN_CREDENTIALS"),
            AuthError::InvalidCredentials
        );
        assert_eq!(
            classify_error("QUOTA_EXCEEDED"),
            AuthError::Gateway("QUOTA_EXCEEDED".to_string())
        );
    }

    #[test]
    fn test_url_includes_method_and_key() {
        let client = RestClient {
            http: reqwest::Client::new(),
            endpoint: "https://identitytoolkit.googleapis.com/v1".to_string(),
            api_key: "k".to_string(),
        };
        assert_eq!(
            client.url("signUp"),
            "https://identitytoolkit.googleapis.com/v1/accounts:signUp?key=k"
        );
    }
}
