//! Prometheus metrics for relay processes.
//!
//! All metrics follow the naming convention: `relay_<metric>_<unit>`
//!
//! Rejections are counted by reason so the audit trail in the logs has a
//! matching time series.

use lazy_static::lazy_static;
use prometheus::{
    exponential_buckets, Counter, CounterVec, Encoder, Gauge, Histogram, HistogramOpts, Opts,
    Registry, TextEncoder,
};

use crate::TelemetryError;

lazy_static! {
    /// Global metrics registry
    pub static ref REGISTRY: Registry = Registry::new();

    // =========================================================================
    // VERIFICATION
    // =========================================================================

    /// Envelopes read from the producer channel
    pub static ref ENVELOPES_RECEIVED: Counter = Counter::new(
        "relay_envelopes_received_total",
        "Envelopes received from the bus"
    ).expect("metric creation failed");

    /// Envelopes that passed verification, by stage (ingress/delivery) and event type
    pub static ref ENVELOPES_ACCEPTED: CounterVec = CounterVec::new(
        Opts::new("relay_envelopes_accepted_total", "Envelopes accepted"),
        &["stage", "event_type"]
    ).expect("metric creation failed");

    /// Envelopes dropped, by stage and rejection reason
    pub static ref ENVELOPES_REJECTED: CounterVec = CounterVec::new(
        Opts::new("relay_envelopes_rejected_total", "Envelopes rejected"),
        &["stage", "reason"]
    ).expect("metric creation failed");

    /// Time from raw bytes to accept/reject, store round-trip included
    pub static ref VERIFICATION_DURATION: Histogram = Histogram::with_opts(
        HistogramOpts::new(
            "relay_verification_duration_seconds",
            "Time spent verifying an envelope"
        ).buckets(exponential_buckets(0.0001, 2.0, 16).expect("bucket creation failed"))
    ).expect("metric creation failed");

    // =========================================================================
    // FAN-OUT
    // =========================================================================

    /// Frames queued to connections, by scope (room/user/global/notify)
    pub static ref DELIVERIES: CounterVec = CounterVec::new(
        Opts::new("relay_deliveries_total", "Frames queued to local connections"),
        &["scope"]
    ).expect("metric creation failed");

    /// Frames dropped because a connection's outbound queue was full or closed
    pub static ref DELIVERIES_DROPPED: Counter = Counter::new(
        "relay_deliveries_dropped_total",
        "Frames dropped at the outbound queue"
    ).expect("metric creation failed");

    /// Connections joined to a room by an administrative force-join
    pub static ref FORCE_JOINS: Counter = Counter::new(
        "relay_force_joins_total",
        "Connections force-joined to a room"
    ).expect("metric creation failed");

    // =========================================================================
    // CONNECTIONS AND STORE
    // =========================================================================

    pub static ref CONNECTIONS_ACTIVE: Gauge = Gauge::new(
        "relay_connections_active",
        "Currently connected WebSocket clients"
    ).expect("metric creation failed");

    /// 1 while the shared nonce store answers probes
    pub static ref STORE_UP: Gauge = Gauge::new(
        "relay_store_up",
        "Shared nonce store reachability (1 = up)"
    ).expect("metric creation failed");
}

/// Register all metrics with the global registry. Safe to call repeatedly.
///
/// # Errors
///
/// [`TelemetryError::MetricsInit`] on a registration conflict other than
/// the metric already being present.
pub fn register_metrics() -> Result<(), TelemetryError> {
    let metrics: Vec<Box<dyn prometheus::core::Collector>> = vec![
        // Verification
        Box::new(ENVELOPES_RECEIVED.clone()),
        Box::new(ENVELOPES_ACCEPTED.clone()),
        Box::new(ENVELOPES_REJECTED.clone()),
        Box::new(VERIFICATION_DURATION.clone()),
        // Fan-out
        Box::new(DELIVERIES.clone()),
        Box::new(DELIVERIES_DROPPED.clone()),
        Box::new(FORCE_JOINS.clone()),
        // Connections and store
        Box::new(CONNECTIONS_ACTIVE.clone()),
        Box::new(STORE_UP.clone()),
    ];

    for metric in metrics {
        match REGISTRY.register(metric) {
            Ok(()) | Err(prometheus::Error::AlreadyReg) => {}
            Err(e) => return Err(TelemetryError::MetricsInit(e.to_string())),
        }
    }
    Ok(())
}

/// Encode all metrics as Prometheus text format.
///
/// # Errors
///
/// [`TelemetryError::MetricsInit`] if encoding fails.
pub fn encode_metrics() -> Result<String, TelemetryError> {
    let encoder = TextEncoder::new();
    let metric_families = REGISTRY.gather();
    let mut buffer = Vec::new();
    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;
    String::from_utf8(buffer).map_err(|e| TelemetryError::MetricsInit(e.to_string()))
}

/// Timer guard for automatic histogram observation.
pub struct HistogramTimer {
    histogram: Histogram,
    start: std::time::Instant,
}

impl HistogramTimer {
    pub fn new(histogram: &Histogram) -> Self {
        Self {
            histogram: histogram.clone(),
            start: std::time::Instant::now(),
        }
    }
}

impl Drop for HistogramTimer {
    fn drop(&mut self) {
        self.histogram.observe(self.start.elapsed().as_secs_f64());
    }
}
