//! Metrics collection and exposition.
//!
//! # Metrics
//! - `tunnel_proxies_registered_total` (counter)
//! - `tunnel_active_listeners` (gauge): listener tasks currently accepting
//! - `tunnel_connections_dispatched_total` (counter): by proxy
//! - `tunnel_handler_errors_total` (counter): by proxy
//! - `tunnel_listener_failures_total` (counter): by proxy
//! - `tunnel_traffic_bytes_total` (counter): by proxy, direction

use std::net::SocketAddr;

use metrics_exporter_prometheus::PrometheusBuilder;

/// Install the Prometheus recorder and its scrape endpoint.
///
/// Must be called from inside a Tokio runtime.
pub fn init_metrics(addr: SocketAddr) {
    match PrometheusBuilder::new().with_http_listener(addr).install() {
        Ok(()) => tracing::info!(address = %addr, "Metrics endpoint listening"),
        Err(e) => tracing::error!(address = %addr, error = %e, "Failed to install metrics exporter"),
    }
}

pub fn record_proxy_registered() {
    ::metrics::counter!("tunnel_proxies_registered_total").increment(1);
}

pub fn listener_started() {
    ::metrics::gauge!("tunnel_active_listeners").increment(1.0);
}

pub fn listener_stopped() {
    ::metrics::gauge!("tunnel_active_listeners").decrement(1.0);
}

pub fn record_dispatch(proxy: &str) {
    ::metrics::counter!("tunnel_connections_dispatched_total", "proxy" => proxy.to_string()).increment(1);
}

pub fn record_handler_error(proxy: &str) {
    ::metrics::counter!("tunnel_handler_errors_total", "proxy" => proxy.to_string()).increment(1);
}

pub fn record_listener_failure(proxy: &str) {
    ::metrics::counter!("tunnel_listener_failures_total", "proxy" => proxy.to_string()).increment(1);
}

pub fn record_traffic(proxy: &str, direction: &'static str, bytes: u64) {
    ::metrics::counter!(
        "tunnel_traffic_bytes_total",
        "proxy" => proxy.to_string(),
        "direction" => direction
    )
    .increment(bytes);
}
