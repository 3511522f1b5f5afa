//! Shared harness for resqflow-service integration tests.
//!
//! Wires the controller and workflows to the in-process store, identity
//! gateway and mailer so every test runs without external services.

#![allow(dead_code)]

use async_trait::async_trait;
use resqflow_service::config::ApprovalConfig;
use resqflow_service::models::{ApprovedOperator, PendingRegistration, RegistrationForm};
use resqflow_service::services::{
    AuthError, Confirm, CredentialProvisioner, IdentityGateway, MemoryIdentity, MemoryStore,
    MockMailer, Principal, RecordStore,
};
use resqflow_service::session::AppController;
use resqflow_service::workflows::{ApprovalWorkflow, RegistrationIntake};
use resqflow_service::Backends;
use secrecy::SecretString;
use service_core::subscription::LiveQuery;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

pub const ADMIN_EMAIL: &str = "dispatch@resqflow.org";
pub const ADMIN_SECRET: &str = "control-room-1";

/// Answers prompts from a queue, then falls back to a default. Records
/// every prompt it was shown.
pub struct ScriptedConfirm {
    answers: Mutex<VecDeque<bool>>,
    default: bool,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedConfirm {
    pub fn always(answer: bool) -> Self {
        Self {
            answers: Mutex::new(VecDeque::new()),
            default: answer,
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn push(&self, answer: bool) {
        self.answers.lock().unwrap().push_back(answer);
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

#[async_trait]
impl Confirm for ScriptedConfirm {
    async fn confirm(&self, prompt: &str) -> bool {
        self.prompts.lock().unwrap().push(prompt.to_string());
        self.answers.lock().unwrap().pop_front().unwrap_or(self.default)
    }
}

pub struct TestApp {
    pub store: Arc<MemoryStore>,
    pub identity: Arc<MemoryIdentity>,
    pub mailer: Arc<MockMailer>,
    pub confirm: Arc<ScriptedConfirm>,
    pub backends: Backends,
}

impl TestApp {
    /// Fresh backends with one seeded admin account.
    pub fn new() -> Self {
        init_test_tracing();

        let store = Arc::new(MemoryStore::new());
        let identity = Arc::new(MemoryIdentity::new());
        let mailer = Arc::new(MockMailer::new());
        let confirm = Arc::new(ScriptedConfirm::always(true));

        store.add_admin(ADMIN_EMAIL);
        identity
            .add_account(ADMIN_EMAIL, ADMIN_SECRET)
            .expect("Failed to seed admin account");

        let backends = Backends {
            store: store.clone(),
            identity: identity.clone(),
            mailer: mailer.clone(),
            confirm: confirm.clone(),
            approval: ApprovalConfig::default(),
        };

        Self {
            store,
            identity,
            mailer,
            confirm,
            backends,
        }
    }

    /// A controller that has processed the initial (signed-out) principal.
    pub async fn controller(&self) -> AppController {
        let mut controller = AppController::new(self.backends.clone());
        controller.settle().await.expect("Failed to settle controller");
        controller
    }

    pub fn intake(&self) -> RegistrationIntake {
        RegistrationIntake::new(self.backends.store.clone())
    }

    pub fn workflow(&self) -> ApprovalWorkflow {
        ApprovalWorkflow::new(
            self.backends.store.clone(),
            self.backends.identity.clone(),
            self.backends.mailer.clone(),
            self.backends.confirm.clone(),
            ADMIN_EMAIL,
            &self.backends.approval,
        )
    }

    /// A workflow whose credential provisioning goes through `identity`.
    pub fn workflow_with(&self, identity: Arc<dyn IdentityGateway>) -> ApprovalWorkflow {
        ApprovalWorkflow::new(
            self.backends.store.clone(),
            identity,
            self.backends.mailer.clone(),
            self.backends.confirm.clone(),
            ADMIN_EMAIL,
            &self.backends.approval,
        )
    }

    pub async fn register(&self, name: &str, email: &str, vehicle: &str) -> PendingRegistration {
        self.intake()
            .submit(RegistrationForm::new(name, email, vehicle))
            .await
            .expect("Failed to submit registration")
    }

    /// Create an approved operator directly: credential plus record.
    pub async fn seed_operator(&self, name: &str, email: &str, vehicle: &str, secret: &str) -> ApprovedOperator {
        let principal = self
            .identity
            .add_account(email, secret)
            .expect("Failed to create operator account");
        let registration =
            PendingRegistration::new(RegistrationForm::new(name, email, vehicle).normalized(), 1);
        let operator = ApprovedOperator::from_registration(principal.uid, &registration);
        self.store
            .put_operator(&operator)
            .await
            .expect("Failed to write operator record");
        operator
    }

    pub async fn sign_in(&self, email: &str, secret: &str) -> Principal {
        self.identity
            .sign_in(email, &secret_of(secret))
            .await
            .expect("Failed to sign in")
    }
}

/// Identity gateway that takes the given store collections offline as soon
/// as a credential has been provisioned through its isolated context.
pub struct OutageAfterProvisioning {
    inner: Arc<MemoryIdentity>,
    store: Arc<MemoryStore>,
    collections: Vec<&'static str>,
}

impl OutageAfterProvisioning {
    pub fn new(app: &TestApp, collections: &[&'static str]) -> Arc<Self> {
        Arc::new(Self {
            inner: app.identity.clone(),
            store: app.store.clone(),
            collections: collections.to_vec(),
        })
    }
}

struct OutageProvisioner {
    inner: Arc<dyn CredentialProvisioner>,
    store: Arc<MemoryStore>,
    collections: Vec<&'static str>,
}

#[async_trait]
impl CredentialProvisioner for OutageProvisioner {
    async fn create_credential(&self, email: &str, secret: &SecretString) -> Result<Principal, AuthError> {
        let principal = self.inner.create_credential(email, secret).await?;
        for collection in self.collections.iter().copied() {
            self.store.fail_writes(collection);
        }
        Ok(principal)
    }
}

#[async_trait]
impl CredentialProvisioner for OutageAfterProvisioning {
    async fn create_credential(&self, email: &str, secret: &SecretString) -> Result<Principal, AuthError> {
        self.inner.create_credential(email, secret).await
    }
}

#[async_trait]
impl IdentityGateway for OutageAfterProvisioning {
    async fn sign_in(&self, email: &str, secret: &SecretString) -> Result<Principal, AuthError> {
        self.inner.sign_in(email, secret).await
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.inner.sign_out().await
    }

    async fn request_password_reset(&self, email: &str) -> Result<(), AuthError> {
        self.inner.request_password_reset(email).await
    }

    fn current_principal(&self) -> Option<Principal> {
        self.inner.current_principal()
    }

    fn watch_principal(&self) -> LiveQuery<Option<Principal>> {
        self.inner.watch_principal()
    }

    fn isolated(&self) -> Arc<dyn CredentialProvisioner> {
        Arc::new(OutageProvisioner {
            inner: self.inner.isolated(),
            store: self.store.clone(),
            collections: self.collections.clone(),
        })
    }
}

pub fn secret_of(value: &str) -> SecretString {
    SecretString::new(value.to_string())
}

fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("resqflow_service=debug")
        .with_test_writer()
        .try_init();
}
