use serde::Deserialize;
use service_core::config as core_config;
use service_core::error::AppError;
use std::env;

use crate::services::identity::MIN_SECRET_LEN;

pub const DEFAULT_IDENTITY_ENDPOINT: &str = "https://identitytoolkit.googleapis.com/v1";

#[derive(Debug, Clone, Deserialize)]
pub struct ResqflowConfig {
    #[serde(flatten)]
    pub common: core_config::Config,
    pub environment: Environment,
    pub service_name: String,
    pub service_version: String,
    pub mongodb: MongoConfig,
    pub identity: IdentityConfig,
    pub smtp: SmtpConfig,
    pub approval: ApprovalConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    Dev,
    Prod,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MongoConfig {
    pub uri: String,
    pub database: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IdentityConfig {
    pub api_key: String,
    pub endpoint: String,
    pub request_timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub user: String,
    pub password: String,
    pub from_email: String,
    pub from_name: String,
    pub enabled: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ApprovalConfig {
    /// A saga marker with no progress for this long is treated as abandoned.
    pub stall_after_seconds: u64,
    pub sweep_interval_seconds: u64,
    pub temp_secret_length: usize,
}

impl Default for ApprovalConfig {
    fn default() -> Self {
        Self {
            stall_after_seconds: 300,
            sweep_interval_seconds: 60,
            temp_secret_length: 10,
        }
    }
}

impl ResqflowConfig {
    pub fn from_env() -> Result<Self, AppError> {
        let mut common = core_config::Config::load()?;

        let env_str = env::var("ENVIRONMENT").unwrap_or_else(|_| "dev".to_string());
        let environment: Environment = env_str
            .parse()
            .map_err(|e: String| AppError::ConfigError(anyhow::anyhow!(e)))?;
        let is_prod = environment == Environment::Prod;

        common.log_level = get_env("LOG_LEVEL", Some(common.log_level.as_str()), is_prod)?;
        if let Ok(endpoint) = env::var("OTLP_ENDPOINT") {
            common.otlp_endpoint = Some(endpoint);
        }

        let defaults = ApprovalConfig::default();

        let config = ResqflowConfig {
            common,
            environment,
            service_name: get_env("SERVICE_NAME", Some("resqflow-service"), is_prod)?,
            service_version: get_env("SERVICE_VERSION", Some(env!("CARGO_PKG_VERSION")), is_prod)?,
            mongodb: MongoConfig {
                uri: get_env("MONGODB_URI", None, is_prod)?,
                database: get_env("MONGODB_DATABASE", Some("resqflow"), is_prod)?,
            },
            identity: IdentityConfig {
                api_key: get_env("FIREBASE_API_KEY", None, is_prod)?,
                endpoint: get_env("IDENTITY_ENDPOINT", Some(DEFAULT_IDENTITY_ENDPOINT), is_prod)?,
                request_timeout_seconds: parse_env("IDENTITY_TIMEOUT_SECONDS", "10", is_prod)?,
            },
            smtp: SmtpConfig {
                host: get_env("SMTP_HOST", Some("smtp.gmail.com"), is_prod)?,
                port: parse_env("SMTP_PORT", "587", is_prod)?,
                user: get_env("SMTP_USER", Some(""), is_prod)?,
                password: get_env("SMTP_PASSWORD", Some(""), is_prod)?,
                from_email: get_env("SMTP_FROM_EMAIL", Some("noreply@resqflow.local"), is_prod)?,
                from_name: get_env("SMTP_FROM_NAME", Some("ResqFlow Control"), is_prod)?,
                enabled: env::var("SMTP_ENABLED")
                    .unwrap_or_else(|_| "false".to_string())
                    .parse()
                    .unwrap_or(false),
            },
            approval: ApprovalConfig {
                stall_after_seconds: parse_env(
                    "APPROVAL_STALL_AFTER_SECONDS",
                    &defaults.stall_after_seconds.to_string(),
                    is_prod,
                )?,
                sweep_interval_seconds: parse_env(
                    "APPROVAL_SWEEP_INTERVAL_SECONDS",
                    &defaults.sweep_interval_seconds.to_string(),
                    is_prod,
                )?,
                temp_secret_length: parse_env(
                    "TEMP_SECRET_LENGTH",
                    &defaults.temp_secret_length.to_string(),
                    is_prod,
                )?,
            },
        };

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), AppError> {
        if self.common.port == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "APP__PORT must be greater than 0"
            )));
        }

        if self.approval.sweep_interval_seconds == 0 {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "APPROVAL_SWEEP_INTERVAL_SECONDS must be positive"
            )));
        }

        if self.approval.temp_secret_length < MIN_SECRET_LEN {
            return Err(AppError::ConfigError(anyhow::anyhow!(
                "TEMP_SECRET_LENGTH must be at least {}",
                MIN_SECRET_LEN
            )));
        }

        if self.environment == Environment::Prod && !self.smtp.enabled {
            tracing::warn!("SMTP is disabled in production - approved operators will not receive credentials by email");
        }

        Ok(())
    }
}

fn get_env(key: &str, default: Option<&str>, is_prod: bool) -> Result<String, AppError> {
    match env::var(key) {
        Ok(val) => Ok(val),
        Err(_) => {
            if is_prod {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required in production but not set",
                    key
                )))
            } else if let Some(def) = default {
                Ok(def.to_string())
            } else {
                Err(AppError::ConfigError(anyhow::anyhow!(
                    "{} is required but not set",
                    key
                )))
            }
        }
    }
}

fn parse_env<T>(key: &str, default: &str, is_prod: bool) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    get_env(key, Some(default), is_prod)?
        .parse()
        .map_err(|e: T::Err| AppError::ConfigError(anyhow::anyhow!("{}: {}", key, e)))
}

impl std::str::FromStr for Environment {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "dev" => Ok(Environment::Dev),
            "prod" => Ok(Environment::Prod),
            _ => Err(format!("Invalid environment: {}", s)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ResqflowConfig {
        ResqflowConfig {
            common: core_config::Config::default(),
            environment: Environment::Dev,
            service_name: "resqflow-service".to_string(),
            service_version: "test".to_string(),
            mongodb: MongoConfig {
                uri: "mongodb://localhost:27017".to_string(),
                database: "resqflow_test".to_string(),
            },
            identity: IdentityConfig {
                api_key: "test-key".to_string(),
                endpoint: DEFAULT_IDENTITY_ENDPOINT.to_string(),
                request_timeout_seconds: 10,
            },
            smtp: SmtpConfig {
                host: "smtp.test.local".to_string(),
                port: 587,
                user: "test".to_string(),
                password: "test".to_string(),
                from_email: "test@example.com".to_string(),
                from_name: "Test".to_string(),
                enabled: false,
            },
            approval: ApprovalConfig::default(),
        }
    }

    #[test]
    fn test_defaults_are_valid() {
        assert!(config().validate().is_ok());
    }

    #[test]
    fn test_short_temp_secret_is_rejected() {
        let mut config = config();
        config.approval.temp_secret_length = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_zero_sweep_interval_is_rejected() {
        let mut config = config();
        config.approval.sweep_interval_seconds = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_environment_parsing() {
        assert_eq!("PROD".parse::<Environment>(), Ok(Environment::Prod));
        assert!("staging".parse::<Environment>().is_err());
    }
}
