//! Prometheus metrics for Warden.
//!
//! Recording goes through the `metrics` facade and is a no-op until a
//! recorder is installed, so the agent can record unconditionally.
//!
//! # Standard Metrics
//!
//! | Metric | Type | Labels | Description |
//! |--------|------|--------|-------------|
//! | `warden_messages_total` | Counter | `kind`, `outcome` | Messages handled |
//! | `warden_message_duration_seconds` | Histogram | `kind` | Message handling latency |
//! | `warden_interruptions_total` | Counter | `action` | Interruptions returned to the proxy |
//! | `warden_transactions_evicted_total` | Counter | - | Transactions finalized by TTL eviction |
//! | `warden_cached_transactions` | Gauge | `app` | Transactions waiting for their response |

use std::net::SocketAddr;
use std::time::Duration;

use metrics::{counter, describe_counter, describe_gauge, describe_histogram, gauge, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};
use warden_config::MetricsConfig;

use crate::error::TelemetryError;
use crate::TelemetryResult;

/// Message counter.
pub const MESSAGES_TOTAL: &str = "warden_messages_total";
/// Message latency histogram.
pub const MESSAGE_DURATION: &str = "warden_message_duration_seconds";
/// Interruption counter.
pub const INTERRUPTIONS_TOTAL: &str = "warden_interruptions_total";
/// Eviction counter.
pub const EVICTIONS_TOTAL: &str = "warden_transactions_evicted_total";
/// Cached transaction gauge.
pub const CACHED_TRANSACTIONS: &str = "warden_cached_transactions";

/// Installs the Prometheus exporter with its own HTTP listener.
///
/// Must be called from within a tokio runtime. Does nothing when metrics
/// are disabled.
///
/// # Errors
///
/// Returns `TelemetryError` if the address is invalid or the exporter cannot
/// be installed.
pub fn init_metrics(config: &MetricsConfig) -> TelemetryResult<()> {
    if !config.enabled {
        return Ok(());
    }

    let addr: SocketAddr = config
        .addr
        .parse()
        .map_err(|e| TelemetryError::InvalidAddress(format!("{}: {e}", config.addr)))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Full(MESSAGE_DURATION.to_string()),
            &config.histogram_buckets,
        )
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?
        .install()
        .map_err(|e| TelemetryError::MetricsInit(e.to_string()))?;

    register_metric_descriptions();

    Ok(())
}

fn register_metric_descriptions() {
    describe_counter!(MESSAGES_TOTAL, "Total number of proxy messages handled");
    describe_histogram!(
        MESSAGE_DURATION,
        "Time spent handling one proxy message, in seconds"
    );
    describe_counter!(
        INTERRUPTIONS_TOTAL,
        "Total number of interruptions returned to the proxy"
    );
    describe_counter!(
        EVICTIONS_TOTAL,
        "Transactions finalized because their response never arrived"
    );
    describe_gauge!(
        CACHED_TRANSACTIONS,
        "Transactions currently waiting for their response"
    );
}

/// Records a handled message.
///
/// `outcome` is `pass`, `interrupted`, or an error category.
pub fn record_message(kind: &'static str, outcome: &'static str, duration: Duration) {
    counter!(MESSAGES_TOTAL, "kind" => kind, "outcome" => outcome).increment(1);
    histogram!(MESSAGE_DURATION, "kind" => kind).record(duration.as_secs_f64());
}

/// Records an interruption returned to the proxy.
pub fn record_interruption(action: &'static str) {
    counter!(INTERRUPTIONS_TOTAL, "action" => action).increment(1);
}

/// Records a transaction finalized by TTL eviction.
pub fn record_eviction() {
    counter!(EVICTIONS_TOTAL).increment(1);
}

/// Sets the number of cached transactions for an application.
pub fn set_cached_transactions(app: &str, count: usize) {
    gauge!(CACHED_TRANSACTIONS, "app" => app.to_string()).set(count as f64);
}
