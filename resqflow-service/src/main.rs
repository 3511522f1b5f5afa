//! Approval reconciler.
//!
//! Finishes or releases approvals whose progress marker has not moved for
//! the configured stall window, so no provisioned credential is left without
//! an operator record.

use resqflow_service::config::ResqflowConfig;
use resqflow_service::services::{
    metrics, AutoConfirm, CredentialMailer, FirebaseIdentity, MongoStore, RecordStore, SmtpMailer,
};
use resqflow_service::workflows::ApprovalWorkflow;
use service_core::observability::init_tracing;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;

const RECONCILER_ACTOR: &str = "reconciler";

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}

async fn sweep_loop(workflow: ApprovalWorkflow, stall_after: Duration, every: Duration, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(every);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                match workflow.resume_stalled(stall_after).await {
                    Ok(report) if report.is_empty() => tracing::debug!("No stalled approvals"),
                    Ok(report) => tracing::info!(
                        completed = report.completed,
                        needs_attention = report.needs_attention.len(),
                        failed = report.failed.len(),
                        "Stalled approvals reconciled"
                    ),
                    Err(e) => tracing::error!(error = %e, "Failed to list stalled approvals"),
                }
            }
        }
    }

    tracing::info!("Reconciler stopped");
}

#[tokio::main]
async fn main() -> std::io::Result<()> {
    let config = ResqflowConfig::from_env().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    init_tracing(
        &config.service_name,
        &config.common.log_level,
        config.common.otlp_endpoint.as_deref(),
    )
    .map_err(|e| std::io::Error::other(format!("Tracing error: {}", e)))?;

    config.validate().map_err(|e| {
        tracing::error!("Invalid configuration: {}", e);
        std::io::Error::other(format!("Configuration error: {}", e))
    })?;

    metrics::init_metrics(config.common.port).map_err(|e| {
        tracing::error!("Failed to start metrics listener: {}", e);
        std::io::Error::other(format!("Metrics error: {}", e))
    })?;

    let store = MongoStore::connect(&config.mongodb.uri, &config.mongodb.database)
        .await
        .map_err(|e| {
            tracing::error!("Failed to connect to MongoDB: {}", e);
            std::io::Error::other(format!("Database connection error: {}", e))
        })?;

    store.initialize_indexes().await.map_err(|e| {
        tracing::error!("Failed to initialize database indexes: {}", e);
        std::io::Error::other(format!("Database initialization error: {}", e))
    })?;

    let identity = FirebaseIdentity::new(&config.identity).map_err(|e| {
        tracing::error!("Failed to initialize identity client: {}", e);
        std::io::Error::other(format!("Identity client error: {}", e))
    })?;

    let mailer = SmtpMailer::new(config.smtp.clone()).map_err(|e| {
        tracing::error!("Failed to initialize SMTP mailer: {}", e);
        std::io::Error::other(format!("SMTP error: {}", e))
    })?;
    if !mailer.is_enabled() {
        tracing::info!("SMTP delivery disabled");
    }

    let store: Arc<dyn RecordStore> = Arc::new(store);
    let workflow = ApprovalWorkflow::new(
        store,
        Arc::new(identity),
        Arc::new(mailer),
        Arc::new(AutoConfirm(true)),
        RECONCILER_ACTOR,
        &config.approval,
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        stall_after_seconds = config.approval.stall_after_seconds,
        sweep_interval_seconds = config.approval.sweep_interval_seconds,
        "Starting approval reconciler"
    );

    let shutdown = CancellationToken::new();
    let sweeper = tokio::spawn(sweep_loop(
        workflow,
        Duration::from_secs(config.approval.stall_after_seconds),
        Duration::from_secs(config.approval.sweep_interval_seconds),
        shutdown.clone(),
    ));

    shutdown_signal().await;
    shutdown.cancel();
    if let Err(e) = sweeper.await {
        tracing::error!(error = %e, "Reconciler task failed");
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
