//! Application shell state machine.
//!
//! One controller owns the current screen and the component shown on it.
//! Transitions come from two places only: principal changes delivered by the
//! identity gateway, and commands issued by the user. Both are processed one
//! at a time, so a command can never run while a classification is pending.

use secrecy::{ExposeSecret, SecretString};
use service_core::subscription::LiveQuery;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use super::{Classification, Screen, SessionResolver};
use crate::models::{ApprovedOperator, EmergencyStatus, PendingRegistration, RegistrationForm};
use crate::services::{AuthError, Principal, ServiceError};
use crate::workflows::{
    AdminDashboard, ApprovalOutcome, ApprovalWorkflow, DeliveryStatus, OperatorConsole,
    RegistrationIntake, RejectOutcome,
};
use crate::Backends;

/// Bound on [`AppController::settle`]. Sign-in followed by a forced
/// sign-out needs two passes, plus one to observe that nothing is left.
pub const MAX_SETTLE_PASSES: usize = 4;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Role {
    Admin,
    Operator { uid: String },
}

/// Everything a renderer needs, published after every transition.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppSnapshot {
    pub screen: Screen,
    pub principal: Option<Principal>,
    pub role: Option<Role>,
    /// True while a principal change is being classified.
    pub resolving: bool,
    /// Last user-facing message, cleared by the next navigation.
    pub notice: Option<String>,
    /// Live operator record on the user dashboard.
    pub operator: Option<ApprovedOperator>,
    /// Live approval queue on the admin dashboard.
    pub pending: Vec<PendingRegistration>,
}

/// User actions accepted by [`AppController::run`].
pub enum Command {
    Navigate(Screen),
    SignInOperator { email: String, secret: SecretString },
    SignInAdmin { email: String, secret: SecretString },
    RequestPasswordReset { email: String },
    SignOut,
    Register(RegistrationForm),
    ToggleEmergency,
    Approve { pending_id: String },
    Reject { pending_id: String },
}

enum ActiveView {
    Empty,
    Operator(OperatorConsole),
    Admin(AdminDashboard),
}

impl ActiveView {
    async fn changed(&mut self) {
        match self {
            ActiveView::Empty => std::future::pending::<()>().await,
            ActiveView::Operator(console) => {
                if console.changed().await.is_none() {
                    std::future::pending::<()>().await
                }
            }
            ActiveView::Admin(dashboard) => {
                if dashboard.changed().await.is_none() {
                    std::future::pending::<()>().await
                }
            }
        }
    }
}

enum Event {
    Shutdown,
    Principal(Option<Option<Principal>>),
    Command(Option<Command>),
    ViewChanged,
}

pub struct AppController {
    backends: Backends,
    resolver: SessionResolver,
    intake: RegistrationIntake,
    principals: LiveQuery<Option<Principal>>,
    state: AppSnapshot,
    view: ActiveView,
    publisher: watch::Sender<AppSnapshot>,
}

impl AppController {
    /// Starts on `LANDING` with `resolving` set until the gateway reports
    /// the initial principal.
    pub fn new(backends: Backends) -> Self {
        let principals = backends.identity.watch_principal();
        let state = AppSnapshot {
            resolving: true,
            ..AppSnapshot::default()
        };
        let (publisher, _) = watch::channel(state.clone());
        Self {
            resolver: SessionResolver::new(backends.store.clone()),
            intake: RegistrationIntake::new(backends.store.clone()),
            backends,
            principals,
            state,
            view: ActiveView::Empty,
            publisher,
        }
    }

    pub fn snapshot(&self) -> &AppSnapshot {
        &self.state
    }

    pub fn screen(&self) -> Screen {
        self.state.screen
    }

    pub fn subscribe(&self) -> watch::Receiver<AppSnapshot> {
        self.publisher.subscribe()
    }

    pub fn operator_console(&mut self) -> Option<&mut OperatorConsole> {
        match &mut self.view {
            ActiveView::Operator(console) => Some(console),
            _ => None,
        }
    }

    pub fn admin_dashboard(&mut self) -> Option<&mut AdminDashboard> {
        match &mut self.view {
            ActiveView::Admin(dashboard) => Some(dashboard),
            _ => None,
        }
    }

    /// Process the newest principal change delivered so far, if any, and
    /// fold pending component updates into the snapshot. Returns whether a
    /// principal change was handled.
    pub async fn pump(&mut self) -> Result<bool, ServiceError> {
        self.refresh_view().await?;
        match self.principals.latest() {
            Some(principal) => {
                self.on_principal_changed(principal).await?;
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Pump until no principal change is left, at most
    /// [`MAX_SETTLE_PASSES`] times. A forced sign-out queues a follow-up
    /// change, so one pass is not always enough.
    pub async fn settle(&mut self) -> Result<(), ServiceError> {
        for _ in 0..MAX_SETTLE_PASSES {
            if !self.pump().await? {
                return Ok(());
            }
        }
        tracing::warn!(passes = MAX_SETTLE_PASSES, "Principal changes still pending after settle");
        Ok(())
    }

    pub async fn run(mut self, mut commands: mpsc::Receiver<Command>, shutdown: CancellationToken) {
        loop {
            let event = tokio::select! {
                _ = shutdown.cancelled() => Event::Shutdown,
                principal = self.principals.next() => Event::Principal(principal),
                command = commands.recv() => Event::Command(command),
                _ = self.view.changed() => Event::ViewChanged,
            };

            let result = match event {
                Event::Shutdown | Event::Principal(None) | Event::Command(None) => break,
                Event::Principal(Some(principal)) => self.on_principal_changed(principal).await,
                Event::Command(Some(command)) => self.dispatch(command).await,
                Event::ViewChanged => self.refresh_view().await,
            };
            if let Err(e) = result {
                tracing::warn!(screen = %self.state.screen, error = %e, "Action failed");
            }
        }

        self.enter(Screen::Landing, ActiveView::Empty);
        tracing::info!("Controller stopped");
    }

    pub async fn dispatch(&mut self, command: Command) -> Result<(), ServiceError> {
        match command {
            Command::Navigate(screen) => self.navigate(screen).await,
            Command::SignInOperator { email, secret } => self.sign_in_operator(&email, &secret).await,
            Command::SignInAdmin { email, secret } => self.sign_in_admin(&email, &secret).await,
            Command::RequestPasswordReset { email } => self.request_password_reset(&email).await,
            Command::SignOut => self.sign_out().await,
            Command::Register(form) => self.submit_registration(form).await.map(|_| ()),
            Command::ToggleEmergency => self.toggle_emergency().await.map(|_| ()),
            Command::Approve { pending_id } => self.approve(&pending_id).await.map(|_| ()),
            Command::Reject { pending_id } => self.reject(&pending_id).await.map(|_| ()),
        }
    }

    /// Apply an auth-state change. `None` means signed out.
    pub async fn on_principal_changed(
        &mut self,
        principal: Option<Principal>,
    ) -> Result<(), ServiceError> {
        let Some(principal) = principal else {
            self.state.principal = None;
            self.state.role = None;
            self.state.resolving = false;
            if self.state.screen.is_gated() {
                self.enter(Screen::Landing, ActiveView::Empty);
            }
            self.publish();
            return Ok(());
        };

        self.state.resolving = true;
        self.publish();

        let classification = match self.resolver.classify(&principal).await {
            Ok(classification) => classification,
            Err(e) => {
                // The user is not signed out on a lookup failure. A dashboard
                // is closed since its role can no longer be vouched for.
                tracing::error!(uid = %principal.uid, error = %e, "Failed to classify principal");
                self.state.principal = Some(principal);
                self.state.role = None;
                self.state.resolving = false;
                if self.state.screen.is_gated() {
                    self.enter(Screen::Landing, ActiveView::Empty);
                }
                return Err(self.fail(e.into()));
            }
        };

        let result = match classification {
            Classification::Admin => {
                tracing::info!(uid = %principal.uid, "Admin session");
                self.state.principal = Some(principal);
                self.state.role = Some(Role::Admin);
                self.open_admin_dashboard().await
            }
            Classification::ApprovedOperator(operator) => {
                tracing::info!(uid = %principal.uid, vehicle_id = %operator.vehicle_id, "Operator session");
                self.state.principal = Some(principal);
                self.state.role = Some(Role::Operator {
                    uid: operator.uid.clone(),
                });
                self.open_operator_console(&operator.uid).await
            }
            Classification::Unrecognized => {
                tracing::warn!(uid = %principal.uid, "Signed-in principal is neither admin nor approved; signing out");
                if let Err(e) = self.backends.identity.sign_out().await {
                    tracing::error!(error = %e, "Forced sign-out failed");
                }
                self.state.principal = None;
                self.state.role = None;
                self.enter(Screen::Landing, ActiveView::Empty);
                Ok(())
            }
        };

        self.state.resolving = false;
        match result {
            Ok(()) => {
                self.publish();
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Explicit navigation. Dashboards are only reachable with the matching
    /// role.
    pub async fn navigate(&mut self, screen: Screen) -> Result<(), ServiceError> {
        self.state.notice = None;

        let result = match (screen, self.state.role.clone()) {
            (Screen::AdminDashboard, Some(Role::Admin)) => {
                if matches!(self.view, ActiveView::Admin(_)) {
                    Ok(())
                } else {
                    self.open_admin_dashboard().await
                }
            }
            (Screen::UserDashboard, Some(Role::Operator { uid })) => {
                if matches!(self.view, ActiveView::Operator(_)) {
                    Ok(())
                } else {
                    self.open_operator_console(&uid).await
                }
            }
            (gated, _) if gated.is_gated() => Err(ServiceError::ScreenGated(gated)),
            (open, _) => {
                self.enter(open, ActiveView::Empty);
                Ok(())
            }
        };

        match result {
            Ok(()) => {
                self.publish();
                Ok(())
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Success is observed through the principal change, not here.
    pub async fn sign_in_operator(
        &mut self,
        email: &str,
        secret: &SecretString,
    ) -> Result<(), ServiceError> {
        self.state.notice = None;
        let email = normalize_email(email);
        match self.backends.identity.sign_in(&email, secret).await {
            Ok(principal) => {
                tracing::info!(uid = %principal.uid, "Operator signed in");
                self.publish();
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    /// Only emails present in the admin collection reach the gateway.
    pub async fn sign_in_admin(
        &mut self,
        email: &str,
        secret: &SecretString,
    ) -> Result<(), ServiceError> {
        self.state.notice = None;
        let email = normalize_email(email);
        let admin = match self.backends.store.find_admin_by_email(&email).await {
            Ok(admin) => admin,
            Err(e) => return Err(self.fail(e.into())),
        };
        if admin.is_none() {
            tracing::warn!(email = %email, "Admin sign-in refused");
            return Err(self.fail(AuthError::UnauthorizedAdmin.into()));
        }
        match self.backends.identity.sign_in(&email, secret).await {
            Ok(principal) => {
                tracing::info!(uid = %principal.uid, "Admin signed in");
                self.publish();
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    pub async fn request_password_reset(&mut self, email: &str) -> Result<(), ServiceError> {
        let email = normalize_email(email);
        if email.is_empty() {
            return Err(self.fail(AuthError::MissingEmail.into()));
        }
        match self.backends.identity.request_password_reset(&email).await {
            Ok(()) => {
                self.state.notice = Some("Password reset email sent!".to_string());
                self.publish();
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    pub async fn sign_out(&mut self) -> Result<(), ServiceError> {
        match self.backends.identity.sign_out().await {
            Ok(()) => {
                tracing::info!("Signed out");
                Ok(())
            }
            Err(e) => Err(self.fail(e.into())),
        }
    }

    pub async fn submit_registration(
        &mut self,
        form: RegistrationForm,
    ) -> Result<PendingRegistration, ServiceError> {
        self.state.notice = None;
        match self.intake.submit(form).await {
            Ok(registration) => {
                self.enter(Screen::PendingMessage, ActiveView::Empty);
                self.publish();
                Ok(registration)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub async fn toggle_emergency(&mut self) -> Result<EmergencyStatus, ServiceError> {
        if !matches!(self.state.role, Some(Role::Operator { .. })) {
            return Err(self.fail(ServiceError::ScreenGated(Screen::UserDashboard)));
        }
        let ActiveView::Operator(console) = &mut self.view else {
            return Err(self.fail(ServiceError::ScreenGated(Screen::UserDashboard)));
        };
        let result = console.toggle_emergency().await;
        self.state.operator = console.record().cloned();
        match result {
            Ok(status) => {
                self.publish();
                Ok(status)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub async fn approve(&mut self, pending_id: &str) -> Result<ApprovalOutcome, ServiceError> {
        if self.state.role != Some(Role::Admin) {
            return Err(self.fail(ServiceError::ScreenGated(Screen::AdminDashboard)));
        }
        let ActiveView::Admin(dashboard) = &mut self.view else {
            return Err(self.fail(ServiceError::ScreenGated(Screen::AdminDashboard)));
        };
        let result = dashboard.approve(pending_id).await;
        self.state.pending = dashboard.pending().to_vec();
        match result {
            Ok(outcome) => {
                self.state.notice = match &outcome {
                    ApprovalOutcome::Declined => None,
                    ApprovalOutcome::Approved(receipt) => Some(match &receipt.delivery {
                        DeliveryStatus::Delivered => {
                            format!("User Approved! Credentials sent to {}", receipt.email)
                        }
                        DeliveryStatus::Failed(reason) => format!(
                            "User Approved, but the credential email to {} failed ({}). \
                             Share the temporary password manually: {}",
                            receipt.email,
                            reason,
                            receipt.temporary_secret.expose_secret()
                        ),
                    }),
                };
                self.publish();
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    pub async fn reject(&mut self, pending_id: &str) -> Result<RejectOutcome, ServiceError> {
        if self.state.role != Some(Role::Admin) {
            return Err(self.fail(ServiceError::ScreenGated(Screen::AdminDashboard)));
        }
        let ActiveView::Admin(dashboard) = &mut self.view else {
            return Err(self.fail(ServiceError::ScreenGated(Screen::AdminDashboard)));
        };
        let result = dashboard.reject(pending_id).await;
        self.state.pending = dashboard.pending().to_vec();
        match result {
            Ok(outcome) => {
                self.publish();
                Ok(outcome)
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Fold the newest component snapshot into the published state. An
    /// operator whose record disappears is reclassified, which ends the
    /// session.
    async fn refresh_view(&mut self) -> Result<(), ServiceError> {
        let record_lost = match &mut self.view {
            ActiveView::Empty => return Ok(()),
            ActiveView::Operator(console) => {
                console.refresh();
                self.state.operator = console.record().cloned();
                self.state.operator.is_none()
            }
            ActiveView::Admin(dashboard) => {
                dashboard.refresh();
                self.state.pending = dashboard.pending().to_vec();
                false
            }
        };

        if record_lost {
            tracing::warn!("Operator record removed during session");
            let principal = self.state.principal.clone();
            return self.on_principal_changed(principal).await;
        }
        self.publish();
        Ok(())
    }

    async fn open_admin_dashboard(&mut self) -> Result<(), ServiceError> {
        let actor = self
            .state
            .principal
            .as_ref()
            .map(|p| p.email.clone())
            .unwrap_or_default();
        let workflow = ApprovalWorkflow::new(
            self.backends.store.clone(),
            self.backends.identity.clone(),
            self.backends.mailer.clone(),
            self.backends.confirm.clone(),
            actor,
            &self.backends.approval,
        );
        let dashboard = AdminDashboard::open(workflow).await?;
        self.state.pending = dashboard.pending().to_vec();
        self.enter(Screen::AdminDashboard, ActiveView::Admin(dashboard));
        Ok(())
    }

    async fn open_operator_console(&mut self, uid: &str) -> Result<(), ServiceError> {
        let console = OperatorConsole::open(self.backends.store.clone(), uid).await?;
        self.state.operator = console.record().cloned();
        self.enter(Screen::UserDashboard, ActiveView::Operator(console));
        Ok(())
    }

    /// Replacing the view drops the previous component and its
    /// subscription.
    fn enter(&mut self, screen: Screen, view: ActiveView) {
        if !matches!(view, ActiveView::Operator(_)) {
            self.state.operator = None;
        }
        if !matches!(view, ActiveView::Admin(_)) {
            self.state.pending.clear();
        }
        self.view = view;
        if self.state.screen != screen {
            tracing::debug!(from = %self.state.screen, to = %screen, "Screen change");
        }
        self.state.screen = screen;
    }

    fn fail(&mut self, err: ServiceError) -> ServiceError {
        self.state.notice = Some(err.user_message());
        self.publish();
        err
    }

    fn publish(&self) {
        self.publisher.send_replace(self.state.clone());
    }
}

fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}
