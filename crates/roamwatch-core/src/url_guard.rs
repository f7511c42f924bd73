// # Webhook URL Guard
//
// Rejects webhook destinations that would let a configured endpoint reach
// into the local network or a cloud metadata service.
//
// ## Rules
//
// - Scheme must be http or https, and a host is required
// - Hostnames on the block list are rejected (case-insensitive)
// - Literal IPs in private, loopback, link-local, CGNAT, multicast,
//   reserved, documentation and IPv6 ULA ranges are rejected
// - `validate_resolved` additionally checks every address a hostname
//   resolves to; unresolvable names pass (they may resolve at delivery time)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use url::{Host, Url};

const BLOCKED_HOSTNAMES: &[&str] = &[
    "localhost",
    "localhost.localdomain",
    "metadata.google.internal",
    "metadata.goog",
];

/// (network, prefix length)
const BLOCKED_V4: &[(Ipv4Addr, u8)] = &[
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(224, 0, 0, 0), 4),
    (Ipv4Addr::new(240, 0, 0, 0), 4),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(192, 0, 0, 0), 24),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
];

const BLOCKED_V6: &[(Ipv6Addr, u8)] = &[
    (Ipv6Addr::new(0xfc00, 0, 0, 0, 0, 0, 0, 0), 7),
    (Ipv6Addr::new(0xfe80, 0, 0, 0, 0, 0, 0, 0), 10),
    (Ipv6Addr::LOCALHOST, 128),
];

/// True if `ip` lies in a range webhooks may not target
pub fn is_blocked_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => BLOCKED_V4
            .iter()
            .any(|(net, len)| prefix_match(u32::from(v4).into(), u32::from(*net).into(), *len, 32)),
        IpAddr::V6(v6) => {
            // IPv4-mapped addresses are judged by their IPv4 form
            if let Some(v4) = v6.to_ipv4_mapped() {
                return is_blocked_ip(IpAddr::V4(v4));
            }
            BLOCKED_V6
                .iter()
                .any(|(net, len)| prefix_match(u128::from(v6), u128::from(*net), *len, 128))
        }
    }
}

fn prefix_match(addr: u128, net: u128, len: u8, width: u8) -> bool {
    if len == 0 {
        return true;
    }
    let shift = u32::from(width - len);
    (addr >> shift) == (net >> shift)
}

/// Static checks on a webhook URL. Returns the parsed URL on success.
pub fn validate_webhook_url(raw: &str) -> Result<Url, crate::Error> {
    if raw.trim().is_empty() {
        return Err(crate::Error::invalid_input("URL is required"));
    }

    let url = Url::parse(raw)
        .map_err(|e| crate::Error::invalid_input(format!("Invalid URL format: {}", e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(crate::Error::invalid_input(
            "URL must use http or https scheme",
        ));
    }

    match url.host() {
        None => Err(crate::Error::invalid_input("URL must include a hostname")),
        Some(Host::Domain(domain)) => {
            let lower = domain.trim_end_matches('.').to_ascii_lowercase();
            if BLOCKED_HOSTNAMES.contains(&lower.as_str()) {
                tracing::warn!("Blocked webhook URL with hostname: {}", domain);
                return Err(crate::Error::invalid_input(
                    "This hostname is not allowed for webhooks",
                ));
            }
            Ok(url)
        }
        Some(Host::Ipv4(ip)) => check_literal(IpAddr::V4(ip)).map(|_| url),
        Some(Host::Ipv6(ip)) => check_literal(IpAddr::V6(ip)).map(|_| url),
    }
}

fn check_literal(ip: IpAddr) -> Result<(), crate::Error> {
    if is_blocked_ip(ip) {
        tracing::warn!("Blocked webhook URL with private/reserved IP: {}", ip);
        return Err(crate::Error::invalid_input(
            "Private, reserved, or internal IP addresses are not allowed",
        ));
    }
    Ok(())
}

/// Static checks plus DNS: every resolved address must be allowed.
pub async fn validate_resolved(raw: &str) -> Result<Url, crate::Error> {
    let url = validate_webhook_url(raw)?;

    let Some(Host::Domain(domain)) = url.host().map(|host| host.to_owned()) else {
        return Ok(url);
    };
    let port = url.port_or_known_default().unwrap_or(443);

    match tokio::net::lookup_host((domain.as_str(), port)).await {
        Ok(addrs) => {
            for addr in addrs {
                if is_blocked_ip(addr.ip()) {
                    tracing::warn!(
                        "Blocked webhook URL: {} resolves to blocked IP: {}",
                        domain,
                        addr.ip()
                    );
                    return Err(crate::Error::invalid_input(
                        "URL resolves to a private or reserved IP address",
                    ));
                }
            }
            Ok(url)
        }
        Err(e) => {
            tracing::debug!("Could not resolve webhook hostname {}: {}", domain, e);
            Ok(url)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allows_public_https() {
        assert!(validate_webhook_url("https://hooks.slack.com/services/T/B/X").is_ok());
        assert!(validate_webhook_url("http://8.8.8.8/hook").is_ok());
    }

    #[test]
    fn rejects_bad_scheme_and_missing_host() {
        assert!(validate_webhook_url("ftp://example.com/x").is_err());
        assert!(validate_webhook_url("file:///etc/passwd").is_err());
        assert!(validate_webhook_url("").is_err());
        assert!(validate_webhook_url("not a url").is_err());
    }

    #[test]
    fn rejects_blocked_hostnames() {
        assert!(validate_webhook_url("http://localhost:8123/api").is_err());
        assert!(validate_webhook_url("http://LOCALHOST/api").is_err());
        assert!(validate_webhook_url("http://metadata.google.internal/").is_err());
    }

    #[test]
    fn rejects_internal_literals() {
        for url in [
            "http://10.1.2.3/",
            "http://172.20.0.1/",
            "http://192.168.1.1/",
            "http://127.0.0.1/",
            "http://169.254.169.254/latest/meta-data",
            "http://100.64.1.1/",
            "http://224.0.0.1/",
            "http://203.0.113.9/",
            "http://[::1]/",
            "http://[fd00::1]/",
            "http://[fe80::1]/",
            "http://[::ffff:192.168.1.1]/",
        ] {
            assert!(validate_webhook_url(url).is_err(), "{} should be blocked", url);
        }
    }

    #[tokio::test]
    async fn resolved_check_returns_the_parsed_url() {
        let url = validate_resolved("http://8.8.8.8:8080/hook").await.unwrap();
        assert_eq!(url.port(), Some(8080));
        assert!(validate_resolved("http://10.0.0.7/hook").await.is_err());
    }

    #[test]
    fn range_edges() {
        assert!(!is_blocked_ip("172.32.0.1".parse().unwrap()));
        assert!(is_blocked_ip("172.31.255.255".parse().unwrap()));
        assert!(!is_blocked_ip("100.128.0.1".parse().unwrap()));
        assert!(!is_blocked_ip("2606:4700::1111".parse().unwrap()));
    }
}
