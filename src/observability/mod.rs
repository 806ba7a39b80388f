// src/observability/mod.rs
//! Logging and metrics setup
//!
//! `RUST_LOG` wins over the configured level. Metrics are always recorded
//! through the `metrics` facade; they are only exported when a Prometheus
//! listen address is configured.

use crate::utils::config::ObservabilityConfig;
use crate::utils::errors::{EngineError, Result};
use metrics_exporter_prometheus::PrometheusBuilder;
use tracing::info;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter};

/// Build the filter: `RUST_LOG` when set, else the configured level
pub fn env_filter(config: &ObservabilityConfig) -> Result<EnvFilter> {
    match EnvFilter::try_from_default_env() {
        Ok(filter) => Ok(filter),
        Err(_) => EnvFilter::try_new(&config.log_level).map_err(|e| {
            EngineError::Observability(format!("invalid log level '{}': {}", config.log_level, e))
        }),
    }
}

/// Install the global tracing subscriber
pub fn init_tracing(config: &ObservabilityConfig) -> Result<()> {
    let filter = env_filter(config)?;
    let registry = tracing_subscriber::registry().with(filter);

    let installed = if config.json_logs {
        registry
            .with(
                fmt::layer()
                    .json()
                    .with_writer(std::io::stderr)
                    .with_target(true)
                    .with_current_span(true)
                    .flatten_event(true),
            )
            .try_init()
    } else {
        registry
            .with(fmt::layer().with_writer(std::io::stderr).with_target(true))
            .try_init()
    };

    installed.map_err(|e| EngineError::Observability(e.to_string()))
}

/// Start the Prometheus exporter when configured and describe engine metrics.
/// Must run inside a tokio runtime.
pub fn init_metrics(config: &ObservabilityConfig) -> Result<()> {
    if let Some(addr) = config.metrics_addr {
        PrometheusBuilder::new()
            .with_http_listener(addr)
            .install()
            .map_err(|e| EngineError::Observability(e.to_string()))?;
        info!(%addr, "prometheus exporter listening");
    }

    describe_metrics();
    Ok(())
}

fn describe_metrics() {
    metrics::describe_counter!(
        "multireset_transitions_total",
        "Lifecycle state entries, labelled by state"
    );
    metrics::describe_counter!(
        "multireset_attempts_total",
        "Finished runs and auto-resets"
    );
    metrics::describe_counter!(
        "multireset_step_failures_total",
        "Per-instance tick steps that failed and were retried"
    );
    metrics::describe_counter!(
        "multireset_automation_failures_total",
        "Automation commands that failed on their lane"
    );
    metrics::describe_gauge!("multireset_instances", "Instances per lifecycle state");
    metrics::describe_gauge!("multireset_suspended_instances", "Frozen instances");
}
