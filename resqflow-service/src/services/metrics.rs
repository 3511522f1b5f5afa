//! Counters for registrations, approvals and emergency toggles.

use metrics::counter;
use metrics_exporter_prometheus::PrometheusBuilder;
use service_core::error::AppError;
use std::net::SocketAddr;

/// Install the Prometheus recorder with its scrape listener.
pub fn init_metrics(port: u16) -> Result<(), AppError> {
    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| AppError::ConfigError(anyhow::anyhow!("failed to install Prometheus recorder: {}", e)))?;
    tracing::info!(address = %addr, "Metrics listener started");
    Ok(())
}

pub fn record_registration() {
    counter!("resqflow_registrations_total").increment(1);
}

pub fn record_approval(outcome: &'static str) {
    counter!("resqflow_approvals_total", "outcome" => outcome).increment(1);
}

pub fn record_rejection() {
    counter!("resqflow_rejections_total").increment(1);
}

pub fn record_toggle(status: &'static str) {
    counter!("resqflow_emergency_toggles_total", "status" => status).increment(1);
}

pub fn record_delivery(outcome: &'static str) {
    counter!("resqflow_credential_deliveries_total", "outcome" => outcome).increment(1);
}
