mod common;

use common::{secret_of, OutageAfterProvisioning, TestApp, ADMIN_EMAIL, ADMIN_SECRET};
use resqflow_service::models::{EmergencyStatus, SagaStage};
use resqflow_service::services::store::{APPROVAL_SAGAS, APPROVED_USERS, PENDING_USERS};
use resqflow_service::services::{IdentityGateway, RecordStore, ServiceError};
use resqflow_service::session::Screen;
use resqflow_service::workflows::{
    AdminDashboard, ApprovalOutcome, DeliveryStatus, RejectOutcome, ResumeOutcome,
};
use secrecy::ExposeSecret;
use std::time::Duration;

#[tokio::test]
async fn test_approve_binds_credential_record_and_queue() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;

    let outcome = app.workflow().approve(&pending).await.unwrap();
    let ApprovalOutcome::Approved(receipt) = outcome else {
        panic!("expected approval");
    };

    assert_eq!(app.identity.uid_for("asha@resqflow.org"), Some(receipt.uid.clone()));
    let operator = app.store.find_operator(&receipt.uid).await.unwrap().unwrap();
    assert_eq!(operator.email, "asha@resqflow.org");
    assert_eq!(operator.full_name, "Asha Rao");
    assert_eq!(operator.vehicle_id, "AMB-502");
    assert_eq!(operator.status, EmergencyStatus::Idle);
    assert!(!operator.device_connected);
    assert_eq!(app.store.pending_count(), 0);
    assert!(app.store.list_approvals().await.unwrap().is_empty());

    assert_eq!(receipt.delivery, DeliveryStatus::Delivered);
    let sent = app.mailer.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "asha@resqflow.org");
    assert_eq!(sent[0].temporary_secret, *receipt.temporary_secret.expose_secret());
    assert!(receipt.temporary_secret.expose_secret().len() >= 6);
}

#[tokio::test]
async fn test_approval_prompt_names_operator_and_vehicle() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;

    app.workflow().approve(&pending).await.unwrap();

    assert_eq!(app.confirm.prompts(), vec!["Approve Asha Rao for Vehicle AMB-502?"]);
}

#[tokio::test]
async fn test_declined_prompt_changes_nothing() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    app.confirm.push(false);

    let outcome = app.workflow().approve(&pending).await.unwrap();

    assert!(matches!(outcome, ApprovalOutcome::Declined));
    assert!(!app.identity.has_account("asha@resqflow.org"));
    assert_eq!(app.store.pending_count(), 1);
    assert_eq!(app.store.operator_count(), 0);
    assert!(app.mailer.sent().is_empty());
}

#[tokio::test]
async fn test_admin_session_survives_approval() {
    let app = TestApp::new();
    let admin = app.sign_in(ADMIN_EMAIL, ADMIN_SECRET).await;
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;

    app.workflow().approve(&pending).await.unwrap();

    assert_eq!(app.identity.current_principal(), Some(admin));
}

#[tokio::test]
async fn test_existing_credential_fails_without_writes() {
    let app = TestApp::new();
    app.identity.add_account("asha@resqflow.org", "already-there").unwrap();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;

    let err = app.workflow().approve(&pending).await.unwrap_err();

    assert!(matches!(err, ServiceError::Auth(_)));
    assert_eq!(app.store.pending_count(), 1);
    assert_eq!(app.store.operator_count(), 0);
    assert!(app.store.list_approvals().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_second_approval_of_same_record_is_refused() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    app.store.fail_writes(APPROVED_USERS);
    let _ = app.workflow().approve(&pending).await.unwrap_err();
    app.store.restore(APPROVED_USERS);

    let err = app.workflow().approve(&pending).await.unwrap_err();

    assert!(matches!(err, ServiceError::ApprovalInProgress { .. }));
    assert_eq!(app.identity.account_count(), 2);
}

#[tokio::test]
async fn test_record_write_failure_is_reported_and_resumable() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    let pending_id = pending.id.clone().unwrap();
    app.store.fail_writes(APPROVED_USERS);

    let err = app.workflow().approve(&pending).await.unwrap_err();

    let ServiceError::ApprovalIncomplete { uid, stage, .. } = err else {
        panic!("expected incomplete approval");
    };
    assert_eq!(stage, SagaStage::CredentialProvisioned);
    assert_eq!(app.identity.uid_for("asha@resqflow.org"), Some(uid.clone()));
    assert_eq!(app.store.pending_count(), 1);
    let saga = app.store.find_approval(&pending_id).await.unwrap().unwrap();
    assert_eq!(saga.uid.as_deref(), Some(uid.as_str()));

    app.store.restore(APPROVED_USERS);
    let outcome = app.workflow().resume(&pending_id).await.unwrap();

    assert_eq!(
        outcome,
        ResumeOutcome::Completed {
            uid: uid.clone(),
            reset_requested: true
        }
    );
    assert!(app.store.find_operator(&uid).await.unwrap().is_some());
    assert_eq!(app.store.pending_count(), 0);
    assert!(app.store.find_approval(&pending_id).await.unwrap().is_none());
    assert_eq!(app.identity.password_resets(), vec!["asha@resqflow.org"]);
}

#[tokio::test]
async fn test_queue_delete_failure_resumes_without_rewriting_record() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    let pending_id = pending.id.clone().unwrap();
    app.store.fail_writes(PENDING_USERS);

    let err = app.workflow().approve(&pending).await.unwrap_err();
    let ServiceError::ApprovalIncomplete { uid, stage, .. } = err else {
        panic!("expected incomplete approval");
    };
    assert_eq!(stage, SagaStage::RecordWritten);

    // The operator starts using the console before the queue is cleaned up.
    app.store
        .set_operator_status(&uid, EmergencyStatus::Emergency)
        .await
        .unwrap();
    app.store.restore(PENDING_USERS);
    app.workflow().resume(&pending_id).await.unwrap();

    let operator = app.store.find_operator(&uid).await.unwrap().unwrap();
    assert_eq!(operator.status, EmergencyStatus::Emergency);
    assert_eq!(app.store.pending_count(), 0);
}

#[tokio::test]
async fn test_lost_progress_record_stops_approval_and_keeps_claim() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    let pending_id = pending.id.clone().unwrap();
    let identity = OutageAfterProvisioning::new(&app, &[APPROVAL_SAGAS, APPROVED_USERS]);
    let workflow = app.workflow_with(identity);

    let err = workflow.approve(&pending).await.unwrap_err();

    let ServiceError::ApprovalIncomplete { uid, stage, .. } = err else {
        panic!("expected incomplete approval");
    };
    assert_eq!(stage, SagaStage::Claimed);
    assert_eq!(app.identity.uid_for("asha@resqflow.org"), Some(uid.clone()));
    assert!(app.mailer.sent().is_empty());
    app.store.restore(APPROVAL_SAGAS);
    app.store.restore(APPROVED_USERS);

    // The marker never learned the uid, so it must not be dropped blindly.
    let outcome = app.workflow().resume(&pending_id).await.unwrap();
    assert_eq!(
        outcome,
        ResumeOutcome::NeedsAttention {
            pending_id: pending_id.clone()
        }
    );
    assert!(app.store.find_approval(&pending_id).await.unwrap().is_some());
    assert!(app.workflow().release_claim(&pending_id).await.is_err());
    let err = app.workflow().approve(&pending).await.unwrap_err();
    assert!(matches!(err, ServiceError::ApprovalInProgress { .. }));

    let outcome = app.workflow().resume_with_uid(&pending_id, &uid).await.unwrap();

    assert!(matches!(outcome, ResumeOutcome::Completed { uid: ref done, .. } if *done == uid));
    let operator = app.store.find_operator(&uid).await.unwrap().unwrap();
    assert_eq!(operator.email, "asha@resqflow.org");
    assert_eq!(app.store.pending_count(), 0);
    assert!(app.store.find_approval(&pending_id).await.unwrap().is_none());
    assert_eq!(app.identity.account_count(), 2);
}

#[tokio::test]
async fn test_resume_with_uid_refuses_a_different_credential() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    let pending_id = pending.id.clone().unwrap();
    app.store.fail_writes(APPROVED_USERS);
    let err = app.workflow().approve(&pending).await.unwrap_err();
    let ServiceError::ApprovalIncomplete { uid, .. } = err else {
        panic!("expected incomplete approval");
    };
    app.store.restore(APPROVED_USERS);

    let err = app
        .workflow()
        .resume_with_uid(&pending_id, "someone-else")
        .await
        .unwrap_err();

    assert!(matches!(err, ServiceError::Conflict(_)));
    assert!(app.store.find_operator(&uid).await.unwrap().is_none());
    assert!(app.store.find_approval(&pending_id).await.unwrap().is_some());
}

#[tokio::test]
async fn test_claim_without_credential_needs_an_explicit_release() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    let pending_id = pending.id.clone().unwrap();
    app.store.fail_writes(APPROVED_USERS);
    app.store.fail_writes(APPROVAL_SAGAS);

    // The claim itself cannot be written, so nothing starts.
    let err = app.workflow().approve(&pending).await.unwrap_err();
    assert!(matches!(err, ServiceError::Store(_)));
    assert!(!app.identity.has_account("asha@resqflow.org"));
    app.store.restore(APPROVED_USERS);
    app.store.restore(APPROVAL_SAGAS);

    let saga = resqflow_service::models::ApprovalSaga::claim(
        pending_id.clone(),
        pending.clone(),
        ADMIN_EMAIL.to_string(),
        0,
    );
    app.store.claim_approval(&saga).await.unwrap();

    let outcome = app.workflow().resume(&pending_id).await.unwrap();
    assert_eq!(
        outcome,
        ResumeOutcome::NeedsAttention {
            pending_id: pending_id.clone()
        }
    );
    assert!(app.store.find_approval(&pending_id).await.unwrap().is_some());

    app.workflow().release_claim(&pending_id).await.unwrap();

    assert_eq!(app.store.pending_count(), 1);
    assert!(app.store.find_approval(&pending_id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_resume_stalled_only_touches_old_markers() {
    let app = TestApp::new();
    let provisioned = app.register("Old", "old@resqflow.org", "AMB-1").await;
    let claimed = app.register("Stuck", "stuck@resqflow.org", "AMB-3").await;
    let fresh = app.register("Fresh", "fresh@resqflow.org", "AMB-2").await;

    let principal = app.identity.add_account("old@resqflow.org", "Temp-secret-9").unwrap();
    let mut provisioned_claim = resqflow_service::models::ApprovalSaga::claim(
        provisioned.id.clone().unwrap(),
        provisioned.clone(),
        ADMIN_EMAIL.to_string(),
        0,
    );
    provisioned_claim.uid = Some(principal.uid.clone());
    provisioned_claim.advance(SagaStage::CredentialProvisioned, 0);
    let stuck_claim = resqflow_service::models::ApprovalSaga::claim(
        claimed.id.clone().unwrap(),
        claimed.clone(),
        ADMIN_EMAIL.to_string(),
        0,
    );
    let fresh_claim = resqflow_service::models::ApprovalSaga::claim(
        fresh.id.clone().unwrap(),
        fresh.clone(),
        ADMIN_EMAIL.to_string(),
        resqflow_service::models::now_millis(),
    );
    app.store.claim_approval(&provisioned_claim).await.unwrap();
    app.store.claim_approval(&stuck_claim).await.unwrap();
    app.store.claim_approval(&fresh_claim).await.unwrap();

    let report = app
        .workflow()
        .resume_stalled(Duration::from_secs(300))
        .await
        .unwrap();

    assert_eq!(report.completed, 1);
    assert_eq!(report.needs_attention, vec![claimed.id.clone().unwrap()]);
    assert!(report.failed.is_empty());
    assert!(app.store.find_operator(&principal.uid).await.unwrap().is_some());
    let mut remaining: Vec<String> = app
        .store
        .list_approvals()
        .await
        .unwrap()
        .into_iter()
        .map(|saga| saga.pending_id)
        .collect();
    remaining.sort();
    let mut expected = vec![claimed.id.unwrap(), fresh.id.unwrap()];
    expected.sort();
    assert_eq!(remaining, expected);
}

#[tokio::test]
async fn test_delivery_failure_does_not_roll_back() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    app.mailer.set_failing(true);

    let ApprovalOutcome::Approved(receipt) = app.workflow().approve(&pending).await.unwrap() else {
        panic!("expected approval");
    };

    assert!(matches!(receipt.delivery, DeliveryStatus::Failed(_)));
    assert!(app.store.find_operator(&receipt.uid).await.unwrap().is_some());
    assert_eq!(app.store.pending_count(), 0);
}

#[tokio::test]
async fn test_reject_deletes_only_the_pending_record() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    let accounts_before = app.identity.account_count();

    let outcome = app.workflow().reject(&pending).await.unwrap();

    assert_eq!(outcome, RejectOutcome::Rejected);
    assert_eq!(app.store.pending_count(), 0);
    assert_eq!(app.store.operator_count(), 0);
    assert_eq!(app.identity.account_count(), accounts_before);
    assert_eq!(app.confirm.prompts(), vec!["Delete this registration request?"]);
}

#[tokio::test]
async fn test_declined_reject_keeps_record() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    app.confirm.push(false);

    let outcome = app.workflow().reject(&pending).await.unwrap();

    assert_eq!(outcome, RejectOutcome::Declined);
    assert_eq!(app.store.pending_count(), 1);
}

#[tokio::test]
async fn test_reject_refused_while_approval_in_flight() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    app.store.fail_writes(APPROVED_USERS);
    let _ = app.workflow().approve(&pending).await.unwrap_err();

    let err = app.workflow().reject(&pending).await.unwrap_err();

    assert!(matches!(err, ServiceError::ApprovalInProgress { .. }));
    assert_eq!(app.store.pending_count(), 1);
}

#[tokio::test]
async fn test_dashboard_tracks_queue_and_unsubscribes() {
    let app = TestApp::new();
    let first = app.register("One", "one@resqflow.org", "AMB-1").await;
    let mut dashboard = AdminDashboard::open(app.workflow()).await.unwrap();
    assert_eq!(dashboard.pending().len(), 1);
    assert_eq!(app.store.pending_subscriber_count(), 1);

    app.register("Two", "two@resqflow.org", "AMB-2").await;
    assert!(dashboard.refresh());
    assert_eq!(dashboard.pending().len(), 2);

    dashboard.approve(first.id.as_deref().unwrap()).await.unwrap();
    assert_eq!(dashboard.pending().len(), 1);
    assert_eq!(dashboard.pending()[0].email, "two@resqflow.org");

    dashboard.close();
    dashboard.close();
    assert_eq!(app.store.pending_subscriber_count(), 0);
}

#[tokio::test]
async fn test_dashboard_unknown_id_is_not_found() {
    let app = TestApp::new();
    let mut dashboard = AdminDashboard::open(app.workflow()).await.unwrap();

    let err = dashboard.reject("missing").await.unwrap_err();

    assert!(matches!(err, ServiceError::NotFound(_)));
}

#[tokio::test]
async fn test_admin_approves_through_controller_and_stays_signed_in() {
    let app = TestApp::new();
    let pending = app.register("Asha Rao", "asha@resqflow.org", "AMB-502").await;
    let mut controller = app.controller().await;
    controller
        .sign_in_admin(ADMIN_EMAIL, &secret_of(ADMIN_SECRET))
        .await
        .unwrap();
    controller.settle().await.unwrap();
    assert_eq!(controller.snapshot().pending.len(), 1);

    controller
        .approve(pending.id.as_deref().unwrap())
        .await
        .unwrap();
    controller.settle().await.unwrap();

    assert_eq!(controller.screen(), Screen::AdminDashboard);
    assert!(controller.snapshot().pending.is_empty());
    assert!(controller
        .snapshot()
        .notice
        .as_deref()
        .is_some_and(|n| n.contains("asha@resqflow.org")));
    assert_eq!(
        app.identity.current_principal().map(|p| p.email),
        Some(ADMIN_EMAIL.to_string())
    );
}
