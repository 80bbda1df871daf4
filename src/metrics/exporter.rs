//! Prometheus metrics exporter
//!
//! HTTP endpoint for Prometheus scraping.

use anyhow::Result;
use metrics::{counter, describe_counter, describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::net::SocketAddr;
use tokio::task::JoinHandle;

use crate::config::MetricsConfig;
use super::counters::METRICS;

/// Initialize the Prometheus metrics exporter
pub fn init_metrics(config: &MetricsConfig) -> Result<()> {
    describe_counter!("socks5_connections_total", "Total TCP CONNECT sessions accepted");
    describe_gauge!("socks5_connections_active", "Currently active TCP CONNECT sessions");
    describe_counter!("socks5_bytes_received", "Total bytes relayed from upstream to client");
    describe_counter!("socks5_bytes_sent", "Total bytes relayed from client to upstream");
    describe_counter!("socks5_nat_sessions_opened", "Total UDP NAT sessions opened");
    describe_gauge!("socks5_nat_sessions_active", "Currently active UDP NAT sessions");
    describe_counter!("socks5_datagrams_sent", "Total UDP datagrams forwarded");
    describe_counter!("socks5_datagrams_frag_dropped", "UDP datagrams dropped for nonzero FRAG");
    describe_counter!("socks5_errors_total", "Total session errors");

    PrometheusBuilder::new()
        .with_http_listener(config.bind_addr)
        .install()?;

    tokio::spawn(sync_metrics_task());

    Ok(())
}

/// Background task that periodically syncs our atomic counters to the metrics crate
async fn sync_metrics_task() {
    let mut interval = tokio::time::interval(std::time::Duration::from_secs(1));

    let mut last = METRICS.snapshot();

    loop {
        interval.tick().await;

        let snapshot = METRICS.snapshot();

        let conn_delta = snapshot.connections_total.saturating_sub(last.connections_total);
        if conn_delta > 0 {
            counter!("socks5_connections_total").increment(conn_delta);
        }
        gauge!("socks5_connections_active").set(snapshot.connections_active as f64);

        let rx_delta = snapshot.bytes_received.saturating_sub(last.bytes_received);
        if rx_delta > 0 {
            counter!("socks5_bytes_received").increment(rx_delta);
        }

        let tx_delta = snapshot.bytes_sent.saturating_sub(last.bytes_sent);
        if tx_delta > 0 {
            counter!("socks5_bytes_sent").increment(tx_delta);
        }

        let nat_opened_delta = snapshot.nat_sessions_opened.saturating_sub(last.nat_sessions_opened);
        if nat_opened_delta > 0 {
            counter!("socks5_nat_sessions_opened").increment(nat_opened_delta);
        }
        gauge!("socks5_nat_sessions_active").set(snapshot.nat_sessions_active as f64);

        let dg_tx_delta = snapshot.datagrams_sent.saturating_sub(last.datagrams_sent);
        if dg_tx_delta > 0 {
            counter!("socks5_datagrams_sent").increment(dg_tx_delta);
        }

        let dg_drop_delta = snapshot
            .datagrams_frag_dropped
            .saturating_sub(last.datagrams_frag_dropped);
        if dg_drop_delta > 0 {
            counter!("socks5_datagrams_frag_dropped").increment(dg_drop_delta);
        }

        let errors_delta = snapshot.errors_total.saturating_sub(last.errors_total);
        if errors_delta > 0 {
            counter!("socks5_errors_total").increment(errors_delta);
        }

        last = snapshot;
    }
}

/// Start a simple HTTP server for health checks and metrics
#[allow(dead_code)]
pub fn start_health_server(addr: SocketAddr) -> JoinHandle<()> {
    tokio::spawn(async move {
        // The Prometheus exporter already provides /metrics
        tracing::info!(%addr, "Health server running (metrics at /metrics)");
        std::future::pending::<()>().await;
    })
}
