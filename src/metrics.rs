//! Provider Metrics
//!
//! Prometheus counters and latency histograms for provider operations,
//! registered on a dedicated registry exposed by the metrics server.

use crate::error::{Error, Result};
use prometheus::{Encoder, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry, TextEncoder};
use std::time::Duration;

/// Outcome label values
pub const OUTCOME_SUCCESS: &str = "success";
pub const OUTCOME_NOT_FOUND: &str = "not_found";
pub const OUTCOME_INSUFFICIENT_CAPACITY: &str = "insufficient_capacity";
pub const OUTCOME_ERROR: &str = "error";

/// Operation metrics
#[derive(Clone)]
pub struct ProviderMetrics {
    registry: Registry,
    operations: IntCounterVec,
    duration: HistogramVec,
}

impl ProviderMetrics {
    /// Create metrics on a fresh registry
    pub fn new() -> Result<Self> {
        let registry = Registry::new();

        let operations = IntCounterVec::new(
            Opts::new(
                "machine_provider_operations_total",
                "Cloud provider operations by outcome",
            ),
            &["operation", "outcome"],
        )
        .map_err(metrics_error)?;

        let duration = HistogramVec::new(
            HistogramOpts::new(
                "machine_provider_operation_duration_seconds",
                "Duration of cloud provider operations",
            ),
            &["operation"],
        )
        .map_err(metrics_error)?;

        registry.register(Box::new(operations.clone())).map_err(metrics_error)?;
        registry.register(Box::new(duration.clone())).map_err(metrics_error)?;

        Ok(Self {
            registry,
            operations,
            duration,
        })
    }

    /// Record one finished operation
    pub fn observe<T>(&self, operation: &str, result: &Result<T>, elapsed: Duration) {
        let outcome = match result {
            Ok(_) => OUTCOME_SUCCESS,
            Err(err) if err.is_not_found() => OUTCOME_NOT_FOUND,
            Err(err) if err.is_insufficient_capacity() => OUTCOME_INSUFFICIENT_CAPACITY,
            Err(_) => OUTCOME_ERROR,
        };
        self.operations.with_label_values(&[operation, outcome]).inc();
        self.duration
            .with_label_values(&[operation])
            .observe(elapsed.as_secs_f64());
    }

    /// Count of recorded operations for an outcome
    pub fn count(&self, operation: &str, outcome: &str) -> u64 {
        self.operations.with_label_values(&[operation, outcome]).get()
    }

    /// Render all metrics in the text exposition format
    pub fn encode(&self) -> Result<Vec<u8>> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .map_err(metrics_error)?;
        Ok(buffer)
    }
}

fn metrics_error(err: prometheus::Error) -> Error {
    Error::Internal(format!("metrics: {}", err))
}
