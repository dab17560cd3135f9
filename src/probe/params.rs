//! Query parameter resolution.
//!
//! Every field of a [`ProbeRequest`] is resolved independently. A malformed
//! or out-of-range value never fails the request: the field keeps its default
//! and, where the fallback is worth reporting, a [`Diagnostic`] is attached.

use std::collections::HashSet;
use std::time::Duration;

use super::IpProtocol;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_INTERVAL: Duration = Duration::from_secs(1);
pub const DEFAULT_COUNT: usize = 5;
pub const DEFAULT_SIZE: usize = 56;
pub const DEFAULT_TTL: i32 = 64;
pub const DEFAULT_PACKET: &str = "icmp";

/// Largest accepted count; echo sequence numbers are 16 bits wide.
pub const MAX_COUNT: usize = u16::MAX as usize + 1;

/// Exclusive lower bound for the payload size.
pub const MIN_PACKET_SIZE: i64 = 24;
/// Exclusive upper bound for the payload size.
pub const MAX_PACKET_SIZE: i64 = 1024;

/// Fully resolved configuration for one probe.
#[derive(Debug, Clone, PartialEq)]
pub struct ProbeRequest {
    pub target: String,
    pub timeout: Duration,
    pub interval: Duration,
    pub count: usize,
    pub size: usize,
    pub ttl: i32,
    pub protocol: IpProtocol,
    pub packet: String,
}

impl Default for ProbeRequest {
    fn default() -> Self {
        Self {
            target: String::new(),
            timeout: DEFAULT_TIMEOUT,
            interval: DEFAULT_INTERVAL,
            count: DEFAULT_COUNT,
            size: DEFAULT_SIZE,
            ttl: DEFAULT_TTL,
            protocol: IpProtocol::default(),
            packet: DEFAULT_PACKET.to_string(),
        }
    }
}

impl ProbeRequest {
    /// ICMP probes need raw sockets, anything else runs unprivileged.
    pub fn privileged(&self) -> bool {
        self.packet == "icmp"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Warn,
    Error,
}

/// A rejected parameter value.
#[derive(Debug, Clone, PartialEq)]
pub struct Diagnostic {
    pub field: &'static str,
    pub severity: Severity,
    pub message: String,
}

impl Diagnostic {
    fn warn(field: &'static str, message: String) -> Self {
        Self {
            field,
            severity: Severity::Warn,
            message,
        }
    }

    fn error(field: &'static str, message: String) -> Self {
        Self {
            field,
            severity: Severity::Error,
            message,
        }
    }

    /// Log through `tracing` at the diagnostic's severity.
    pub fn emit(&self) {
        match self.severity {
            Severity::Warn => tracing::warn!(field = self.field, "{}", self.message),
            Severity::Error => tracing::error!(field = self.field, "{}", self.message),
        }
    }
}

/// Outcome of resolving a single field.
#[derive(Debug, Clone, PartialEq)]
pub struct Resolved<T> {
    pub value: T,
    pub defaulted: bool,
    pub diagnostic: Option<Diagnostic>,
}

impl<T> Resolved<T> {
    fn given(value: T) -> Self {
        Self {
            value,
            defaulted: false,
            diagnostic: None,
        }
    }

    fn fallback(value: T, diagnostic: Option<Diagnostic>) -> Self {
        Self {
            value,
            defaulted: true,
            diagnostic,
        }
    }
}

/// A resolved request plus everything that was rejected on the way.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedRequest {
    pub request: ProbeRequest,
    /// Fields whose supplied value was rejected.
    pub defaulted: Vec<&'static str>,
    pub diagnostics: Vec<Diagnostic>,
}

/// Parse a strictly positive duration such as `5s`, `500ms` or `1m30s`.
fn parse_duration(raw: &str) -> Option<Duration> {
    humantime::parse_duration(raw.trim())
        .ok()
        .filter(|d| !d.is_zero())
}

pub fn resolve_timeout(raw: &str) -> Resolved<Duration> {
    match parse_duration(raw) {
        Some(timeout) => Resolved::given(timeout),
        None => Resolved::fallback(
            DEFAULT_TIMEOUT,
            Some(Diagnostic::error(
                "timeout",
                format!("Expected duration (e.g., 5s). Got: {:?}", raw),
            )),
        ),
    }
}

pub fn resolve_interval(raw: &str) -> Resolved<Duration> {
    match parse_duration(raw) {
        Some(interval) => Resolved::given(interval),
        None => Resolved::fallback(
            DEFAULT_INTERVAL,
            Some(Diagnostic::warn(
                "interval",
                format!(
                    "Expected duration (e.g., 5s). Got: {:?}. Using default {}.",
                    raw,
                    humantime::format_duration(DEFAULT_INTERVAL)
                ),
            )),
        ),
    }
}

pub fn resolve_count(raw: &str) -> Resolved<usize> {
    match raw.trim().parse::<usize>() {
        Ok(count) if count > MAX_COUNT => Resolved::fallback(
            DEFAULT_COUNT,
            Some(Diagnostic::warn(
                "count",
                format!(
                    "Count {} above {}. Using default {}.",
                    count, MAX_COUNT, DEFAULT_COUNT
                ),
            )),
        ),
        Ok(count) if count > 0 => Resolved::given(count),
        _ => Resolved::fallback(DEFAULT_COUNT, None),
    }
}

pub fn resolve_size(raw: &str) -> Resolved<usize> {
    match raw.trim().parse::<i64>() {
        Ok(size) if size > MIN_PACKET_SIZE && size < MAX_PACKET_SIZE => {
            Resolved::given(size as usize)
        }
        _ => Resolved::fallback(
            DEFAULT_SIZE,
            Some(Diagnostic::warn(
                "size",
                format!(
                    "Packet size {:?} outside ({}, {}). Using default {}.",
                    raw, MIN_PACKET_SIZE, MAX_PACKET_SIZE, DEFAULT_SIZE
                ),
            )),
        ),
    }
}

pub fn resolve_ttl(raw: &str) -> Resolved<i32> {
    match raw.trim().parse::<i32>() {
        Ok(ttl) => Resolved::given(ttl),
        Err(_) => Resolved::fallback(DEFAULT_TTL, None),
    }
}

pub fn resolve_protocol(raw: &str) -> IpProtocol {
    match raw.to_lowercase().as_str() {
        "v6" | "6" | "ip6" => IpProtocol::Ip6,
        _ => IpProtocol::Ip4,
    }
}

pub fn resolve_packet(raw: &str) -> String {
    let packet = raw.to_lowercase();
    if packet.is_empty() {
        DEFAULT_PACKET.to_string()
    } else {
        packet
    }
}

/// Resolve raw query pairs into a complete [`ProbeRequest`].
///
/// Keys are matched case-insensitively and the first occurrence of a key
/// wins. Unknown keys are ignored.
pub fn resolve_params<'a, I>(pairs: I) -> ResolvedRequest
where
    I: IntoIterator<Item = (&'a str, &'a str)>,
{
    let mut request = ProbeRequest::default();
    let mut resolved = ResolvedRequest {
        request: ProbeRequest::default(),
        defaulted: Vec::new(),
        diagnostics: Vec::new(),
    };
    let mut seen = HashSet::new();

    fn apply<T>(
        field: &'static str,
        slot: &mut T,
        resolved: Resolved<T>,
        out: &mut ResolvedRequest,
    ) {
        *slot = resolved.value;
        if resolved.defaulted {
            out.defaulted.push(field);
        }
        out.diagnostics.extend(resolved.diagnostic);
    }

    for (key, value) in pairs {
        let key = match key.to_lowercase().as_str() {
            "prot" => "protocol".to_string(),
            other => other.to_string(),
        };
        if !seen.insert(key.clone()) {
            continue;
        }

        match key.as_str() {
            "target" => request.target = value.to_string(),
            "timeout" => apply(
                "timeout",
                &mut request.timeout,
                resolve_timeout(value),
                &mut resolved,
            ),
            "interval" => apply(
                "interval",
                &mut request.interval,
                resolve_interval(value),
                &mut resolved,
            ),
            "count" => apply("count", &mut request.count, resolve_count(value), &mut resolved),
            "size" => apply("size", &mut request.size, resolve_size(value), &mut resolved),
            "ttl" => apply("ttl", &mut request.ttl, resolve_ttl(value), &mut resolved),
            "protocol" => request.protocol = resolve_protocol(value),
            "packet" => request.packet = resolve_packet(value),
            _ => {}
        }
    }

    resolved.request = request;
    resolved
}
