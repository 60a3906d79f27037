use ::metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use smart_types::now_millis;
use std::net::SocketAddr;

pub const SERVER_START_TIME: &str = "smart_server_start_time_seconds";

/// 初始化 Prometheus metrics exporter
pub fn init_metrics(addr: SocketAddr, role: &'static str) -> anyhow::Result<()> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .install()
        .map_err(|e| anyhow::anyhow!("Failed to install Prometheus exporter: {}", e))?;

    smart_core::metrics::describe_metrics();
    describe_gauge!(SERVER_START_TIME, "Unix time the process started, labelled by role");
    gauge!(SERVER_START_TIME, now_millis() as f64 / 1000.0, "role" => role);

    tracing::info!(role = role, "Metrics exporter started on http://{}/metrics", addr);
    Ok(())
}
