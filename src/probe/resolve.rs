//! Target address resolution by address family.

use std::net::IpAddr;

use super::{IpProtocol, ProbeError};

/// Resolve `target` to an address of the requested family.
///
/// The target is taken verbatim. IP literals are used as-is when they match
/// the family. Hostnames go through the system resolver and the first
/// address of the family wins.
pub async fn resolve_target(target: &str, protocol: IpProtocol) -> Result<IpAddr, ProbeError> {
    let fail = |reason: String| ProbeError::Resolve {
        target: target.to_string(),
        protocol,
        reason,
    };

    if target.is_empty() {
        return Err(fail("empty target".to_string()));
    }

    if let Ok(ip) = target.parse::<IpAddr>() {
        return if protocol.matches(&ip) {
            Ok(ip)
        } else {
            Err(fail("address family mismatch".to_string()))
        };
    }

    let addrs = tokio::net::lookup_host((target, 0))
        .await
        .map_err(|e| fail(format!("DNS resolution failed: {}", e)))?;

    addrs
        .map(|sa| sa.ip())
        .find(|ip| protocol.matches(ip))
        .ok_or_else(|| fail("no suitable address found".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{Ipv4Addr, Ipv6Addr};
    use tokio_test::{assert_err, assert_ok};

    #[tokio::test]
    async fn test_resolve_ipv4_literal() {
        let ip = assert_ok!(resolve_target("127.0.0.1", IpProtocol::Ip4).await);
        assert_eq!(ip, IpAddr::V4(Ipv4Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_resolve_ipv6_literal() {
        let ip = assert_ok!(resolve_target("::1", IpProtocol::Ip6).await);
        assert_eq!(ip, IpAddr::V6(Ipv6Addr::LOCALHOST));
    }

    #[tokio::test]
    async fn test_resolve_family_mismatch() {
        let err = assert_err!(resolve_target("127.0.0.1", IpProtocol::Ip6).await);
        assert!(matches!(err, ProbeError::Resolve { .. }));

        let err = resolve_target("::1", IpProtocol::Ip4).await.unwrap_err();
        assert!(err.to_string().contains("ip4"));
    }

    #[tokio::test]
    async fn test_resolve_keeps_surrounding_whitespace() {
        // not an IPv4 literal once the space is kept, so no family mismatch
        let err = assert_err!(resolve_target(" 127.0.0.1", IpProtocol::Ip6).await);
        match err {
            ProbeError::Resolve { target, reason, .. } => {
                assert_eq!(target, " 127.0.0.1");
                assert_ne!(reason, "address family mismatch");
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_resolve_empty_target() {
        let err = resolve_target("", IpProtocol::Ip4).await.unwrap_err();
        assert!(err.to_string().contains("empty target"));
    }
}
