//! Request-scoped metric set.
//!
//! Every probe request builds its own [`MetricSet`] with a private registry,
//! so concurrent requests never share gauge instances.

use std::collections::HashSet;
use std::sync::atomic::AtomicU64;

use prometheus_client::encoding::text::encode;
use prometheus_client::metrics::gauge::Gauge;
use prometheus_client::registry::Registry;
use thiserror::Error;

use crate::probe::ProbeResult;

/// Prefix shared by every exported metric.
pub const NAMESPACE: &str = "ping";

/// Content type of the encoded registry.
pub const CONTENT_TYPE: &str = "application/openmetrics-text; version=1.0.0; charset=utf-8";

type FloatGauge = Gauge<f64, AtomicU64>;

#[derive(Error, Debug)]
pub enum MetricsError {
    #[error("metric {0} is already registered")]
    DuplicateMetric(String),
    #[error("failed to encode metrics: {0}")]
    Encode(#[from] std::fmt::Error),
}

/// Gauges describing a single probe.
pub struct MetricSet {
    registry: Registry,
    registered: HashSet<String>,
    success: FloatGauge,
    timeout: FloatGauge,
    duration: FloatGauge,
    rtt_min: FloatGauge,
    rtt_avg: FloatGauge,
    rtt_max: FloatGauge,
    rtt_std_dev: FloatGauge,
    loss: FloatGauge,
}

impl MetricSet {
    /// Create a fresh registry with all gauges registered at zero.
    pub fn new() -> Result<Self, MetricsError> {
        let mut set = Self {
            registry: Registry::with_prefix(NAMESPACE),
            registered: HashSet::new(),
            success: FloatGauge::default(),
            timeout: FloatGauge::default(),
            duration: FloatGauge::default(),
            rtt_min: FloatGauge::default(),
            rtt_avg: FloatGauge::default(),
            rtt_max: FloatGauge::default(),
            rtt_std_dev: FloatGauge::default(),
            loss: FloatGauge::default(),
        };

        let gauges = [
            (
                "success",
                "Whether replies were received within the timeout",
                set.success.clone(),
            ),
            (
                "timeout",
                "Whether the probe exceeded its timeout",
                set.timeout.clone(),
            ),
            (
                "duration_seconds",
                "Returns how long the probe took to complete in seconds",
                set.duration.clone(),
            ),
            ("rtt_min_seconds", "Best round trip time", set.rtt_min.clone()),
            ("rtt_avg_seconds", "Mean round trip time", set.rtt_avg.clone()),
            ("rtt_max_seconds", "Worst round trip time", set.rtt_max.clone()),
            (
                "rtt_std_deviation",
                "Standard deviation of the round trip time in nanoseconds",
                set.rtt_std_dev.clone(),
            ),
            ("loss_ratio", "Packet loss from 0 to 100", set.loss.clone()),
        ];
        for (name, help, gauge) in gauges {
            set.register(name, help, gauge)?;
        }

        Ok(set)
    }

    /// Register `gauge` under `name`, refusing duplicates. The underlying
    /// registry does not reject repeated names.
    fn register(&mut self, name: &str, help: &str, gauge: FloatGauge) -> Result<(), MetricsError> {
        let full_name = format!("{}_{}", NAMESPACE, name);
        if !self.registered.insert(full_name.clone()) {
            return Err(MetricsError::DuplicateMetric(full_name));
        }
        self.registry.register(name, help, gauge);
        Ok(())
    }

    /// Overwrite every gauge from `result`.
    pub fn observe(&self, result: &ProbeResult) {
        let stats = &result.statistics;

        self.success.set(if result.is_success() { 1.0 } else { 0.0 });
        self.timeout.set(if result.is_timeout() { 1.0 } else { 0.0 });
        self.duration.set(result.elapsed.as_secs_f64());
        self.rtt_min.set(stats.min_rtt.as_secs_f64());
        self.rtt_avg.set(stats.avg_rtt.as_secs_f64());
        self.rtt_max.set(stats.max_rtt.as_secs_f64());
        self.rtt_std_dev.set(stats.std_dev_rtt.as_nanos() as f64);
        self.loss.set(stats.packet_loss);
    }

    /// Render the registry in the OpenMetrics text format.
    pub fn encode(&self) -> Result<String, MetricsError> {
        let mut body = String::new();
        encode(&mut body, &self.registry)?;
        Ok(body)
    }
}
