//! Probe module for on-demand reachability checks.
//!
//! Turns query parameters into a [`ProbeRequest`], resolves the target and
//! drives a single [`Pinger`] run per request.

mod params;
mod ping;
mod resolve;
mod runner;

pub use params::*;
pub use ping::*;
pub use resolve::*;
pub use runner::*;

use std::fmt;
use std::net::IpAddr;
use std::time::Duration;
use thiserror::Error;

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("failed to resolve {target:?} as {protocol}: {reason}")]
    Resolve {
        target: String,
        protocol: IpProtocol,
        reason: String,
    },
    #[error("socket error: {0}")]
    Socket(String),
    #[error("permission denied: {0}")]
    Permission(String),
    #[error("invalid configuration: {0}")]
    Config(String),
    #[error("probe task failed: {0}")]
    Task(String),
}

/// Address family used for resolution and transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IpProtocol {
    #[default]
    Ip4,
    Ip6,
}

impl IpProtocol {
    /// Whether `ip` belongs to this family.
    pub fn matches(&self, ip: &IpAddr) -> bool {
        matches!(
            (self, ip),
            (IpProtocol::Ip4, IpAddr::V4(_)) | (IpProtocol::Ip6, IpAddr::V6(_))
        )
    }
}

impl fmt::Display for IpProtocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IpProtocol::Ip4 => f.write_str("ip4"),
            IpProtocol::Ip6 => f.write_str("ip6"),
        }
    }
}

/// Settings handed to a [`Pinger`] for one run.
#[derive(Debug, Clone, PartialEq)]
pub struct PingSettings {
    pub count: usize,
    /// Payload size in bytes, excluding the 8 byte ICMP header.
    pub size: usize,
    pub interval: Duration,
    /// Overall deadline for the run.
    pub timeout: Duration,
    pub ttl: i32,
    /// Raw sockets when set, unprivileged datagram ICMP sockets otherwise.
    pub privileged: bool,
}

impl From<&ProbeRequest> for PingSettings {
    fn from(request: &ProbeRequest) -> Self {
        Self {
            count: request.count,
            size: request.size,
            interval: request.interval,
            timeout: request.timeout,
            ttl: request.ttl,
            privileged: request.privileged(),
        }
    }
}

/// Aggregate statistics of one ping run.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Statistics {
    pub packets_sent: usize,
    pub packets_recv: usize,
    /// Percentage of lost packets, 0 to 100.
    pub packet_loss: f64,
    pub min_rtt: Duration,
    pub avg_rtt: Duration,
    pub max_rtt: Duration,
    pub std_dev_rtt: Duration,
}

impl Statistics {
    /// Build statistics from the round trip times of the replies received.
    pub fn from_rtts(packets_sent: usize, rtts: &[Duration]) -> Self {
        let packets_recv = rtts.len();
        let packet_loss = if packets_sent == 0 {
            0.0
        } else {
            packets_sent.saturating_sub(packets_recv) as f64 / packets_sent as f64 * 100.0
        };

        if rtts.is_empty() {
            return Self {
                packets_sent,
                packets_recv,
                packet_loss,
                ..Default::default()
            };
        }

        let secs: Vec<f64> = rtts.iter().map(Duration::as_secs_f64).collect();
        let min = secs.iter().copied().fold(f64::INFINITY, f64::min);
        let max = secs.iter().copied().fold(0.0, f64::max);
        let avg = secs.iter().sum::<f64>() / secs.len() as f64;
        let variance = secs.iter().map(|s| (s - avg).powi(2)).sum::<f64>() / secs.len() as f64;

        Self {
            packets_sent,
            packets_recv,
            packet_loss,
            min_rtt: Duration::from_secs_f64(min),
            avg_rtt: Duration::from_secs_f64(avg),
            max_rtt: Duration::from_secs_f64(max),
            std_dev_rtt: Duration::from_secs_f64(variance.sqrt()),
        }
    }
}

/// Performs the echo exchange against a resolved address.
///
/// Implementations block for the duration of the run; callers are expected
/// to move the call off the async runtime.
pub trait Pinger: Send + Sync {
    fn ping(&self, addr: IpAddr, settings: &PingSettings) -> Result<Statistics, ProbeError>;
}


#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statistics_from_rtts() {
        let rtts = [
            Duration::from_millis(10),
            Duration::from_millis(20),
            Duration::from_millis(30),
        ];
        let stats = Statistics::from_rtts(4, &rtts);

        assert_eq!(stats.packets_sent, 4);
        assert_eq!(stats.packets_recv, 3);
        assert!((stats.packet_loss - 25.0).abs() < 1e-9);
        assert!((stats.min_rtt.as_secs_f64() - 0.010).abs() < 1e-9);
        assert!((stats.avg_rtt.as_secs_f64() - 0.020).abs() < 1e-9);
        assert!((stats.max_rtt.as_secs_f64() - 0.030).abs() < 1e-9);
        // population standard deviation of 10/20/30 ms
        assert!((stats.std_dev_rtt.as_secs_f64() - 0.0081650).abs() < 1e-6);
    }

    #[test]
    fn test_statistics_without_replies() {
        let stats = Statistics::from_rtts(5, &[]);
        assert_eq!(stats.packets_recv, 0);
        assert_eq!(stats.packet_loss, 100.0);
        assert_eq!(stats.min_rtt, Duration::ZERO);
        assert_eq!(stats.std_dev_rtt, Duration::ZERO);

        let nothing_sent = Statistics::from_rtts(0, &[]);
        assert_eq!(nothing_sent.packet_loss, 0.0);
    }

    #[test]
    fn test_protocol_matches_family() {
        let v4: IpAddr = "192.0.2.1".parse().unwrap();
        let v6: IpAddr = "2001:db8::1".parse().unwrap();
        assert!(IpProtocol::Ip4.matches(&v4));
        assert!(!IpProtocol::Ip4.matches(&v6));
        assert!(IpProtocol::Ip6.matches(&v6));
        assert!(!IpProtocol::Ip6.matches(&v4));
        assert_eq!(IpProtocol::Ip6.to_string(), "ip6");
    }
}
