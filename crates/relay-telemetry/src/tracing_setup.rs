//! Subscriber setup: an `EnvFilter` plus a JSON or pretty fmt layer.

use tracing_subscriber::{
    fmt, layer::SubscriberExt, registry::Registry, util::SubscriberInitExt, EnvFilter, Layer,
};

use crate::{TelemetryConfig, TelemetryError};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync>;

/// Pick the output format. JSON records carry call-site and thread data for
/// log shippers; the terminal format stays compact.
fn output_layer(json: bool) -> BoxedLayer {
    if json {
        fmt::layer()
            .json()
            .with_current_span(true)
            .with_thread_ids(true)
            .with_file(true)
            .with_line_number(true)
            .boxed()
    } else {
        fmt::layer().compact().with_ansi(true).boxed()
    }
}

/// Install the global subscriber.
///
/// # Errors
///
/// [`TelemetryError::TracingInit`] on a bad filter directive or if a
/// subscriber is already installed.
pub fn init_tracing(config: &TelemetryConfig) -> Result<(), TelemetryError> {
    let filter = EnvFilter::try_new(&config.log_level)
        .map_err(|e| TelemetryError::TracingInit(format!("filter {:?}: {e}", config.log_level)))?;

    tracing_subscriber::registry()
        .with(output_layer(config.json_logs))
        .with(filter)
        .try_init()
        .map_err(|e| TelemetryError::TracingInit(e.to_string()))?;

    tracing::info!(
        service = %config.service_name,
        json = config.json_logs,
        level = %config.log_level,
        "logging ready"
    );
    Ok(())
}
