//! Tracing and metrics initialization.

use metrics_exporter_prometheus::PrometheusBuilder;
use tracing_subscriber::EnvFilter;

/// Initializes the tracing subscriber.
///
/// The filter comes from `RUST_LOG` (default `info`); setting
/// `GRAPHRAG_LOG_FORMAT=json` switches to structured JSON output.
/// Safe to call more than once; later calls are no-ops.
pub fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let json = std::env::var("GRAPHRAG_LOG_FORMAT").is_ok_and(|format| format == "json");

    let result = if json {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .json()
            .try_init()
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).try_init()
    };
    if result.is_err() {
        tracing::debug!("tracing subscriber already initialized");
    }
}

/// Starts the Prometheus exporter on the given port.
///
/// Failure to bind is logged and tolerated; metrics are an ambient
/// concern, not a startup requirement.
pub fn init_metrics(port: u16) {
    match PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], port))
        .install()
    {
        Ok(()) => tracing::info!(port, "prometheus exporter started"),
        Err(e) => tracing::warn!(port, error = %e, "failed to start prometheus exporter"),
    }
}
