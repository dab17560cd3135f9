//! Native ICMP echo implementation of [`Pinger`].
//!
//! Uses blocking sockets; callers run it in spawn_blocking.

use std::collections::HashMap;
use std::io;
use std::mem::MaybeUninit;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};

use socket2::{Domain, Protocol, Socket, Type};

use super::{PingSettings, Pinger, ProbeError, Statistics, MAX_COUNT};

const ICMP_ECHO_REQUEST: u8 = 8;
const ICMP_ECHO_REPLY: u8 = 0;
const ICMPV6_ECHO_REQUEST: u8 = 128;
const ICMPV6_ECHO_REPLY: u8 = 129;
const ICMP_HEADER_LEN: usize = 8;

/// SO_RCVTIMEO truncates to microseconds and treats zero as "block forever".
const MIN_READ_TIMEOUT: Duration = Duration::from_millis(1);

/// Pinger backed by ICMP sockets.
///
/// Privileged runs use RAW sockets (CAP_NET_RAW or root). Unprivileged runs
/// use DGRAM ICMP sockets, which Linux allows within `ping_group_range`.
#[derive(Debug, Default, Clone, Copy)]
pub struct IcmpPinger;

impl Pinger for IcmpPinger {
    fn ping(&self, addr: IpAddr, settings: &PingSettings) -> Result<Statistics, ProbeError> {
        let socket = open_socket(addr, settings)?;
        let identifier: u16 = rand::random();

        tracing::debug!(
            %addr,
            identifier,
            privileged = settings.privileged,
            "Ping probe: socket ready"
        );

        run_session(&socket, addr, identifier, settings)
    }
}

fn socket_error(context: &str, e: io::Error) -> ProbeError {
    if e.kind() == io::ErrorKind::PermissionDenied {
        ProbeError::Permission(format!("{}: {}", context, e))
    } else {
        ProbeError::Socket(format!("{}: {}", context, e))
    }
}

fn open_socket(addr: IpAddr, settings: &PingSettings) -> Result<Socket, ProbeError> {
    let ttl = u32::try_from(settings.ttl)
        .map_err(|_| ProbeError::Config(format!("invalid ttl {}", settings.ttl)))?;

    let ty = if settings.privileged {
        Type::RAW
    } else {
        Type::DGRAM
    };
    let (domain, protocol) = match addr {
        IpAddr::V4(_) => (Domain::IPV4, Protocol::ICMPV4),
        IpAddr::V6(_) => (Domain::IPV6, Protocol::ICMPV6),
    };

    let socket = Socket::new(domain, ty, Some(protocol))
        .map_err(|e| socket_error("Failed to create ICMP socket", e))?;

    match addr {
        IpAddr::V4(_) => socket.set_ttl(ttl),
        IpAddr::V6(_) => socket.set_unicast_hops_v6(ttl),
    }
    .map_err(|e| socket_error("Failed to set ttl", e))?;

    socket
        .connect(&SocketAddr::new(addr, 0).into())
        .map_err(|e| socket_error("Failed to connect", e))?;

    Ok(socket)
}

/// Send `count` echo requests spaced by `interval` and collect replies
/// until every packet is answered or the overall timeout passes.
///
/// `count` may not exceed the 16-bit sequence space, so every outstanding
/// request keeps a unique sequence number.
fn run_session(
    socket: &Socket,
    addr: IpAddr,
    identifier: u16,
    settings: &PingSettings,
) -> Result<Statistics, ProbeError> {
    if settings.count > MAX_COUNT {
        return Err(ProbeError::Config(format!(
            "count {} exceeds {}",
            settings.count, MAX_COUNT
        )));
    }

    let start = Instant::now();
    let deadline = start + settings.timeout;
    // DGRAM sockets get their identifier rewritten by the kernel.
    let expected_id = settings.privileged.then_some(identifier);

    let mut outstanding: HashMap<u16, Instant> = HashMap::new();
    let mut rtts = Vec::new();
    let mut sent = 0usize;
    let mut next_send = start;
    let mut buf = [MaybeUninit::<u8>::uninit(); 2048];

    loop {
        let now = Instant::now();
        if now >= deadline || rtts.len() >= settings.count {
            break;
        }

        if sent < settings.count && now >= next_send {
            let sequence = sent as u16;
            let packet = build_echo_request(addr, identifier, sequence, settings.size);
            socket
                .send(&packet)
                .map_err(|e| socket_error("Failed to send", e))?;
            outstanding.insert(sequence, Instant::now());
            sent += 1;
            next_send += settings.interval;
            continue;
        }

        let wake = if sent < settings.count {
            next_send.min(deadline)
        } else {
            deadline
        };
        let wait = wake.saturating_duration_since(now);
        if wait.is_zero() {
            continue;
        }

        socket
            .set_read_timeout(Some(wait.max(MIN_READ_TIMEOUT)))
            .map_err(|e| socket_error("Failed to set timeout", e))?;

        match socket.recv(&mut buf) {
            Ok(len) => {
                let received_at = Instant::now();
                // SAFETY: recv initialized `len` bytes
                let data: &[u8] =
                    unsafe { std::slice::from_raw_parts(buf.as_ptr() as *const u8, len) };
                if let Some(sequence) = parse_echo_reply(data, addr.is_ipv6(), expected_id) {
                    // Duplicates find nothing outstanding and are dropped.
                    if let Some(sent_at) = outstanding.remove(&sequence) {
                        rtts.push(received_at.duration_since(sent_at));
                    }
                }
            }
            Err(e) if is_wait_expired(&e) => {}
            Err(e) => return Err(socket_error("Failed to receive", e)),
        }
    }

    tracing::debug!(%addr, sent, received = rtts.len(), "Ping probe: session finished");

    Ok(Statistics::from_rtts(sent, &rtts))
}

fn is_wait_expired(e: &io::Error) -> bool {
    matches!(
        e.kind(),
        io::ErrorKind::WouldBlock | io::ErrorKind::TimedOut | io::ErrorKind::Interrupted
    )
}

/// Build an ICMP or ICMPv6 Echo Request with a `size` byte payload.
fn build_echo_request(addr: IpAddr, identifier: u16, sequence: u16, size: usize) -> Vec<u8> {
    let mut packet = vec![0u8; ICMP_HEADER_LEN + size];

    packet[0] = if addr.is_ipv6() {
        ICMPV6_ECHO_REQUEST
    } else {
        ICMP_ECHO_REQUEST
    };
    packet[1] = 0; // Code
    packet[4..6].copy_from_slice(&identifier.to_be_bytes());
    packet[6..8].copy_from_slice(&sequence.to_be_bytes());

    // Payload: send timestamp followed by a repeating byte pattern
    let timestamp = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_nanos() as u64)
        .unwrap_or_default();
    for (i, byte) in packet[ICMP_HEADER_LEN..].iter_mut().enumerate() {
        *byte = i as u8;
    }
    if size >= 8 {
        packet[ICMP_HEADER_LEN..ICMP_HEADER_LEN + 8].copy_from_slice(&timestamp.to_be_bytes());
    }

    // The kernel fills in the ICMPv6 checksum
    if !addr.is_ipv6() {
        let checksum = icmp_checksum(&packet);
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
    }

    packet
}

/// Extract the sequence number of an echo reply meant for us.
///
/// RAW IPv4 sockets deliver the IP header in front of the ICMP message,
/// DGRAM and IPv6 sockets deliver the ICMP message alone.
fn parse_echo_reply(data: &[u8], ipv6: bool, expected_id: Option<u16>) -> Option<u16> {
    let (icmp, reply_type) = if ipv6 {
        (data, ICMPV6_ECHO_REPLY)
    } else {
        let offset = match data.first() {
            Some(b) if b >> 4 == 4 => usize::from(b & 0x0f) * 4,
            _ => 0,
        };
        (data.get(offset..)?, ICMP_ECHO_REPLY)
    };

    if icmp.len() < ICMP_HEADER_LEN || icmp[0] != reply_type {
        return None;
    }

    let id = u16::from_be_bytes([icmp[4], icmp[5]]);
    if expected_id.is_some_and(|expected| expected != id) {
        return None;
    }

    Some(u16::from_be_bytes([icmp[6], icmp[7]]))
}

/// Compute ICMP checksum (RFC 1071).
fn icmp_checksum(data: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let mut chunks = data.chunks_exact(2);
    for chunk in &mut chunks {
        sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
    }

    // Handle odd byte
    if let [last] = chunks.remainder() {
        sum += (*last as u32) << 8;
    }

    // Fold 32-bit sum to 16 bits
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }

    !sum as u16
}

#[cfg(test)]
mod tests {
    use super::*;

    const V4: IpAddr = IpAddr::V4(std::net::Ipv4Addr::new(192, 0, 2, 1));
    const V6: IpAddr = IpAddr::V6(std::net::Ipv6Addr::LOCALHOST);

    fn reply_v4(id: u16, seq: u16) -> Vec<u8> {
        let mut icmp = vec![0u8; 16];
        icmp[0] = ICMP_ECHO_REPLY;
        icmp[4..6].copy_from_slice(&id.to_be_bytes());
        icmp[6..8].copy_from_slice(&seq.to_be_bytes());
        icmp
    }

    #[test]
    fn test_icmp_checksum() {
        let mut packet = vec![0u8; 8];
        packet[0] = 8; // Echo request
        packet[4] = 0x12; // ID high
        packet[5] = 0x34; // ID low
        packet[7] = 0x01; // Seq low

        let checksum = icmp_checksum(&packet);
        assert_eq!(checksum, !(0x0800u16 + 0x1234 + 0x0001));

        // A packet carrying its own checksum sums to zero
        packet[2..4].copy_from_slice(&checksum.to_be_bytes());
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_icmp_checksum_odd_length() {
        let checksum = icmp_checksum(&[0x01, 0x02, 0x03]);
        assert_eq!(checksum, !(0x0102u16 + 0x0300));
    }

    #[test]
    fn test_build_icmp_packet() {
        let packet = build_echo_request(V4, 0x1234, 0x0001, 56);
        assert_eq!(packet.len(), 64);
        assert_eq!(packet[0], 8); // Type
        assert_eq!(packet[1], 0); // Code
        assert_eq!(packet[4..6], [0x12, 0x34]); // ID
        assert_eq!(packet[6..8], [0x00, 0x01]); // Sequence
        assert_eq!(icmp_checksum(&packet), 0);
    }

    #[test]
    fn test_build_icmpv6_packet() {
        let packet = build_echo_request(V6, 0xabcd, 7, 100);
        assert_eq!(packet.len(), 108);
        assert_eq!(packet[0], 128);
        assert_eq!(packet[2..4], [0, 0]);
        assert_eq!(packet[6..8], [0x00, 0x07]);
    }

    #[test]
    fn test_parse_reply_dgram() {
        // kernel rewrote the identifier, so it is not checked
        let data = reply_v4(0x9999, 3);
        assert_eq!(parse_echo_reply(&data, false, None), Some(3));
    }

    #[test]
    fn test_parse_reply_raw_skips_ip_header() {
        let mut data = vec![0u8; 20];
        data[0] = 0x45;
        data.extend(reply_v4(0x1234, 9));
        assert_eq!(parse_echo_reply(&data, false, Some(0x1234)), Some(9));
        assert_eq!(parse_echo_reply(&data, false, Some(0x4321)), None);
    }

    #[test]
    fn test_parse_reply_ignores_other_messages() {
        let mut unreachable = reply_v4(1, 1);
        unreachable[0] = 3;
        assert_eq!(parse_echo_reply(&unreachable, false, None), None);
        assert_eq!(parse_echo_reply(&[0, 0, 0], false, None), None);
        assert_eq!(parse_echo_reply(&[], false, None), None);
    }

    #[test]
    fn test_parse_reply_v6() {
        let mut data = vec![0u8; 8];
        data[0] = ICMPV6_ECHO_REPLY;
        data[4..6].copy_from_slice(&0x0102u16.to_be_bytes());
        data[6..8].copy_from_slice(&0x0004u16.to_be_bytes());
        assert_eq!(parse_echo_reply(&data, true, Some(0x0102)), Some(4));

        data[0] = ICMPV6_ECHO_REQUEST;
        assert_eq!(parse_echo_reply(&data, true, None), None);
    }

    fn settings(count: usize) -> PingSettings {
        PingSettings {
            count,
            size: 56,
            interval: Duration::from_millis(5),
            timeout: Duration::from_millis(30),
            ttl: 64,
            privileged: false,
        }
    }

    /// A UDP socket connected to a silent local peer stands in for ICMP.
    fn silent_socket() -> (Socket, Socket) {
        let bind = |s: &Socket| s.bind(&SocketAddr::from(([127, 0, 0, 1], 0)).into());
        let peer = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        bind(&peer).unwrap();
        let socket = Socket::new(Domain::IPV4, Type::DGRAM, Some(Protocol::UDP)).unwrap();
        bind(&socket).unwrap();
        socket.connect(&peer.local_addr().unwrap()).unwrap();
        (socket, peer)
    }

    #[test]
    fn test_session_rejects_count_beyond_sequence_space() {
        let (socket, _peer) = silent_socket();
        let localhost = IpAddr::from([127, 0, 0, 1]);

        let err = run_session(&socket, localhost, 1, &settings(usize::MAX)).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }

    #[test]
    fn test_session_with_large_count_ends_at_deadline() {
        let (socket, _peer) = silent_socket();
        let localhost = IpAddr::from([127, 0, 0, 1]);

        let stats = run_session(&socket, localhost, 1, &settings(MAX_COUNT)).unwrap();
        assert!(stats.packets_sent > 0);
        assert!(stats.packets_sent < MAX_COUNT);
        assert_eq!(stats.packets_recv, 0);
        assert_eq!(stats.packet_loss, 100.0);
    }

    #[test]
    fn test_permission_denied_maps_to_permission() {
        let denied = io::Error::from(io::ErrorKind::PermissionDenied);
        assert!(matches!(socket_error("open", denied), ProbeError::Permission(_)));

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(socket_error("send", refused), ProbeError::Socket(_)));
    }

    #[test]
    fn test_negative_ttl_is_config_error() {
        let settings = PingSettings {
            count: 1,
            size: 56,
            interval: Duration::from_secs(1),
            timeout: Duration::from_secs(1),
            ttl: -1,
            privileged: false,
        };
        let err = IcmpPinger.ping(V4, &settings).unwrap_err();
        assert!(matches!(err, ProbeError::Config(_)));
    }
}
