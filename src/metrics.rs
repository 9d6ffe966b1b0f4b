//! Metrics surface: counters recorded throughout the hub/broker event
//! loops, exported via a Prometheus exporter bound on `metrics.host:port`.

use metrics_exporter_prometheus::PrometheusBuilder;

use crate::config::MetricsSettings;
use crate::error::{NotifierError, Result, TransportError};

/// Counter incremented for every block-events broadcast the facade hands
/// off to a publisher.
pub const EVENTS_HANDLED: &str = "notifier_events_handled_total";
/// Counter incremented when the lock service reports a duplicate.
pub const DEDUP_HITS: &str = "notifier_dedup_hits_total";
/// Counter incremented when a dispatcher delivery fails.
pub const DISPATCH_FAILURES: &str = "notifier_dispatch_failures_total";
/// Counter incremented when a broker exchange publish fails.
pub const PUBLISH_FAILURES: &str = "notifier_publish_failures_total";
/// Counter incremented when the session-bus side channel fails.
pub const SESSION_BUS_FAILURES: &str = "notifier_session_bus_failures_total";

/// Install the Prometheus recorder and bind its HTTP exporter.
///
/// # Errors
/// Returns [`TransportError::Connectivity`] if the exporter cannot bind
/// its socket.
pub fn install(settings: &MetricsSettings) -> Result<()> {
    if !settings.enabled {
        return Ok(());
    }

    let addr: std::net::SocketAddr = settings
        .socket_addr()
        .parse()
        .map_err(|e| TransportError::Connectivity(format!("invalid metrics address: {e}")))?;

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| NotifierError::Transport(TransportError::Connectivity(e.to_string())))?;

    describe();
    Ok(())
}

fn describe() {
    metrics::describe_counter!(EVENTS_HANDLED, "Total block-events broadcasts handled");
    metrics::describe_counter!(DEDUP_HITS, "Total duplicate events dropped by the lock service");
    metrics::describe_counter!(DISPATCH_FAILURES, "Total failed websocket dispatcher deliveries");
    metrics::describe_counter!(PUBLISH_FAILURES, "Total failed broker exchange publishes");
    metrics::describe_counter!(SESSION_BUS_FAILURES, "Total failed session-bus deliveries");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_metrics_skip_installation() {
        let settings = MetricsSettings {
            enabled: false,
            host: "0.0.0.0".into(),
            port: 9090,
        };
        assert!(install(&settings).is_ok());
    }
}
