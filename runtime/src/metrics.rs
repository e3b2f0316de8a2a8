//! Prometheus metrics for inventory operations.
//!
//! Metric names:
//!
//! | name | type | labels |
//! |---|---|---|
//! | `inventory_reservations_total` | counter | `outcome` |
//! | `inventory_ledger_entries_total` | counter | `kind` |
//! | `inventory_swept_total` | counter | |
//! | `inventory_commit_retries_total` | counter | |
//! | `inventory_commit_duration_seconds` | histogram | |
//!
//! # Example
//!
//! ```rust,no_run
//! use drop_inventory_runtime::metrics::MetricsServer;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let mut server = MetricsServer::new("0.0.0.0:9090".parse()?);
//! server.start()?;
//! // Metrics available at http://localhost:9090/metrics
//! # Ok(())
//! # }
//! ```

use drop_inventory_core::ledger::LedgerEventKind;
use metrics::{counter, describe_counter, describe_histogram, histogram};
use metrics_exporter_prometheus::{Matcher, PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Errors from metrics operations.
#[derive(Error, Debug)]
pub enum MetricsError {
    /// Failed to build metrics exporter
    #[error("Failed to build metrics exporter: {0}")]
    Build(String),
    /// Failed to install metrics exporter
    #[error("Failed to install metrics exporter: {0}")]
    Install(String),
}

/// Prometheus metrics server.
///
/// Exposes metrics on an HTTP endpoint for Prometheus scraping.
pub struct MetricsServer {
    addr: SocketAddr,
    handle: Option<PrometheusHandle>,
}

impl MetricsServer {
    /// Create a new metrics server bound to `addr` once started.
    #[must_use]
    pub const fn new(addr: SocketAddr) -> Self {
        Self { addr, handle: None }
    }

    /// Describe all metrics, install the global recorder and spawn the
    /// HTTP listener.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns error if the exporter cannot be built or a different recorder
    /// is already installed.
    pub fn start(&mut self) -> Result<(), MetricsError> {
        let (recorder, exporter) = PrometheusBuilder::new()
            .with_http_listener(self.addr)
            .set_buckets_for_metric(
                Matcher::Suffix("duration_seconds".to_string()),
                &[0.0005, 0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5],
            )
            .map_err(|e| MetricsError::Build(e.to_string()))?
            .build()
            .map_err(|e| MetricsError::Build(e.to_string()))?;

        let handle = recorder.handle();
        metrics::set_global_recorder(recorder)
            .map_err(|e| MetricsError::Install(e.to_string()))?;
        describe_metrics();

        tokio::spawn(async move {
            if exporter.await.is_err() {
                tracing::error!("Metrics exporter stopped");
            }
        });

        self.handle = Some(handle);
        tracing::info!(
            addr = %self.addr,
            "Metrics server started - available at http://{}/metrics",
            self.addr
        );
        Ok(())
    }

    /// Render current metrics in Prometheus format.
    ///
    /// Returns `None` if the server hasn't been started.
    #[must_use]
    pub fn render(&self) -> Option<String> {
        self.handle.as_ref().map(PrometheusHandle::render)
    }
}

/// Register all metric descriptions.
pub fn describe_metrics() {
    describe_counter!(
        "inventory_reservations_total",
        "Reservation attempts by outcome (reserved, insufficient_stock, limit_exceeded, failed, ...)"
    );
    describe_counter!(
        "inventory_ledger_entries_total",
        "Ledger entries committed, by kind"
    );
    describe_counter!(
        "inventory_swept_total",
        "Reservations expired by the sweeper"
    );
    describe_counter!(
        "inventory_commit_retries_total",
        "Commits retried after a version conflict or storage timeout"
    );
    describe_histogram!(
        "inventory_commit_duration_seconds",
        "Time taken by a single successful commit attempt"
    );
}

/// Inventory metrics recorder.
pub struct InventoryMetrics;

impl InventoryMetrics {
    /// Record a reservation attempt outcome.
    pub fn record_reservation(outcome: &'static str) {
        counter!("inventory_reservations_total", "outcome" => outcome).increment(1);
    }

    /// Record a committed ledger entry.
    pub fn record_entry(kind: LedgerEventKind, duration: Duration) {
        counter!("inventory_ledger_entries_total", "kind" => kind.as_str()).increment(1);
        histogram!("inventory_commit_duration_seconds").record(duration.as_secs_f64());
    }

    /// Record a commit retry.
    pub fn record_retry() {
        counter!("inventory_commit_retries_total").increment(1);
    }

    /// Record reservations expired by a sweep.
    pub fn record_swept(count: usize) {
        counter!("inventory_swept_total").increment(count as u64);
    }
}
