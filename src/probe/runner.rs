//! Single probe execution and outcome classification.

use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{resolve_target, PingSettings, Pinger, ProbeError, ProbeRequest, Statistics};

/// How a probe ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Timeout,
    NoReply,
    Error,
}

/// Classify a completed run.
///
/// The timeout check comes first: a run that overran its timeout is a
/// timeout even when no packet came back.
pub fn classify(packets_recv: usize, elapsed: Duration, timeout: Duration) -> Outcome {
    if elapsed > timeout {
        Outcome::Timeout
    } else if packets_recv == 0 {
        Outcome::NoReply
    } else {
        Outcome::Success
    }
}

/// Result of one probe, consumed by the metric set.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeResult {
    /// Wall time of the whole operation, resolution included.
    pub elapsed: Duration,
    pub statistics: Statistics,
    pub outcome: Outcome,
}

impl ProbeResult {
    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Success
    }

    pub fn is_timeout(&self) -> bool {
        self.outcome == Outcome::Timeout
    }
}

/// Drives exactly one [`Pinger`] run per request.
#[derive(Clone)]
pub struct ProbeRunner {
    pinger: Arc<dyn Pinger>,
}

impl ProbeRunner {
    pub fn new(pinger: Arc<dyn Pinger>) -> Self {
        Self { pinger }
    }

    /// Run the probe described by `request`. Never fails: errors are logged
    /// and reported as [`Outcome::Error`] with zeroed statistics.
    pub async fn run(&self, request: &ProbeRequest) -> ProbeResult {
        let start = Instant::now();

        match self.execute(request).await {
            Ok(statistics) => {
                let elapsed = start.elapsed();
                let outcome = classify(statistics.packets_recv, elapsed, request.timeout);
                tracing::debug!(
                    host = %request.target,
                    ?outcome,
                    sent = statistics.packets_sent,
                    received = statistics.packets_recv,
                    "Probe finished in {:?}",
                    elapsed
                );
                ProbeResult {
                    elapsed,
                    statistics,
                    outcome,
                }
            }
            Err(e) => {
                tracing::error!(host = %request.target, error = %e, "Probe failed");
                ProbeResult {
                    elapsed: start.elapsed(),
                    statistics: Statistics::default(),
                    outcome: Outcome::Error,
                }
            }
        }
    }

    async fn execute(&self, request: &ProbeRequest) -> Result<Statistics, ProbeError> {
        let addr = resolve_target(&request.target, request.protocol).await?;
        let settings = PingSettings::from(request);
        let pinger = self.pinger.clone();

        // Blocking ICMP runs on a dedicated thread
        tokio::task::spawn_blocking(move || pinger.ping(addr, &settings))
            .await
            .map_err(|e| ProbeError::Task(format!("spawn_blocking failed: {}", e)))?
    }
}
