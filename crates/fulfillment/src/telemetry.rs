//! Tracing and metrics setup for host applications.

use metrics_exporter_prometheus::{
    BuildError, PrometheusBuilder, PrometheusHandle, PrometheusRecorder,
};
use tracing_subscriber::EnvFilter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::{SubscriberInitExt, TryInitError};

use crate::config::{FulfillmentConfig, LogFormat};

/// Installs the global tracing subscriber. An unparseable level directive
/// falls back to `info`.
pub fn init_tracing(config: &FulfillmentConfig) -> Result<(), TryInitError> {
    let filter = EnvFilter::try_new(&config.log_level).unwrap_or_else(|_| EnvFilter::new("info"));

    let (text, json) = match config.log_format {
        LogFormat::Text => (Some(tracing_subscriber::fmt::layer()), None),
        LogFormat::Json => (None, Some(tracing_subscriber::fmt::layer().json())),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(text)
        .with(json)
        .try_init()
}

/// Builds a Prometheus recorder without installing it, for hosts that
/// manage their own global recorder.
pub fn prometheus_recorder() -> PrometheusRecorder {
    PrometheusBuilder::new().build_recorder()
}

/// Installs a Prometheus recorder as the global metrics recorder.
pub fn install_prometheus() -> Result<PrometheusHandle, BuildError> {
    let handle = PrometheusBuilder::new().install_recorder()?;
    describe_metrics();
    Ok(handle)
}

/// Registers help text for every metric this crate emits.
pub fn describe_metrics() {
    metrics::describe_counter!("reservations_total", "Stock reservations taken");
    metrics::describe_counter!(
        "reservation_conflicts_total",
        "Reservation writes retried after losing a race"
    );
    metrics::describe_counter!(
        "reservation_failures_total",
        "Reservations refused, by reason"
    );
    metrics::describe_counter!("orders_placed_total", "Checkouts that produced an order");
    metrics::describe_counter!("orders_failed_total", "Checkouts rejected, by reason");
    metrics::describe_histogram!(
        "checkout_duration_seconds",
        metrics::Unit::Seconds,
        "Wall time of place_order"
    );
    metrics::describe_counter!("compensations_total", "Compensating steps run, by step");
    metrics::describe_counter!(
        "compensation_failures_total",
        "Compensating steps that failed, by step"
    );
    metrics::describe_counter!("order_transitions_total", "Order status changes");
    metrics::describe_counter!(
        "lifecycle_conflicts_total",
        "Lifecycle writes retried after losing a race"
    );
    metrics::describe_counter!(
        "command_conflicts_total",
        "Aggregate writes rejected by the expected version check"
    );
    metrics::describe_counter!("events_appended_total", "Events written, by store backend");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recorder_renders_emitted_metrics() {
        let recorder = prometheus_recorder();
        let handle = recorder.handle();

        metrics::with_local_recorder(&recorder, || {
            describe_metrics();
            metrics::counter!("orders_placed_total", "mode" => "saga").increment(2);
            metrics::counter!("reservations_total").increment(1);
        });

        let rendered = handle.render();
        assert!(rendered.contains("orders_placed_total{mode=\"saga\"} 2"));
        assert!(rendered.contains("reservations_total 1"));
    }
}
