use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};

use once_cell::sync::Lazy;
use regex::Regex;
use tokio::net::lookup_host;
use url::{Host, Url};

static EMAIL_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email regex"));

/// Prefix `https://` when the input carries no scheme.
pub fn normalize_url(input: &str) -> String {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return String::new();
    }
    let lowered = trimmed.to_ascii_lowercase();
    if lowered.starts_with("http://") || lowered.starts_with("https://") {
        return trimmed.to_string();
    }
    format!("https://{}", trimmed)
}

pub fn is_private_ipv4(ip: Ipv4Addr) -> bool {
    let [a, b, _, _] = ip.octets();
    a == 10
        || a == 127
        || (a == 169 && b == 254)
        || (a == 192 && b == 168)
        || (a == 172 && (16..=31).contains(&b))
}

/// Loopback, unique-local (fc00::/7) and link-local (fe80::/10).
pub fn is_private_ipv6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    ip.is_loopback() || (first & 0xfe00) == 0xfc00 || (first & 0xffc0) == 0xfe80
}

pub fn is_private_ip(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => is_private_ipv4(v4),
        IpAddr::V6(v6) => is_private_ipv6(v6),
    }
}

pub fn is_blocked_hostname(hostname: &str) -> bool {
    let lowered = hostname.to_ascii_lowercase();
    lowered == "localhost" || lowered.ends_with(".local") || lowered.ends_with(".internal")
}

/// Classify a user-supplied string as a safe, publicly routable HTTP(S)
/// URL, or reject it with a user-facing reason.
///
/// Hostnames are resolved and every returned address is checked, so a DNS
/// record pointing at a private range cannot bypass the literal-IP rules.
/// This performs network I/O; a resolution failure is a validation failure.
#[tracing::instrument(skip(input))]
pub async fn validate_url(input: &str) -> Result<String, String> {
    let normalized = normalize_url(input);
    if normalized.is_empty() {
        return Err("URL is required.".to_string());
    }

    let parsed = Url::parse(&normalized).map_err(|_| "Invalid URL format.".to_string())?;

    if parsed.scheme() != "http" && parsed.scheme() != "https" {
        return Err("Only HTTP/HTTPS URLs are allowed.".to_string());
    }

    match parsed.host() {
        None => return Err("Invalid URL format.".to_string()),
        Some(Host::Ipv4(ip)) => {
            if is_private_ipv4(ip) {
                return Err("Private IPs are not allowed.".to_string());
            }
        }
        Some(Host::Ipv6(ip)) => {
            if is_private_ipv6(ip) {
                return Err("Private IPs are not allowed.".to_string());
            }
        }
        Some(Host::Domain(domain)) => {
            if is_blocked_hostname(domain) {
                return Err("URL is not allowed.".to_string());
            }
            let port = parsed.port_or_known_default().unwrap_or(443);
            let resolved = lookup_host((domain, port))
                .await
                .map_err(|_| "Unable to resolve URL hostname.".to_string())?
                .collect::<Vec<_>>();
            if resolved.is_empty() {
                return Err("Unable to resolve URL hostname.".to_string());
            }
            if resolved.iter().any(|addr| is_private_ip(addr.ip())) {
                return Err("URL resolves to a private IP.".to_string());
            }
        }
    }

    Ok(normalized)
}

/// Lowercase + trim, then a deliberately loose shape check. Returns the
/// cleaned address when it looks deliverable.
pub fn validate_email(email: &str) -> Option<String> {
    let trimmed = email.trim().to_lowercase();
    if EMAIL_RE.is_match(&trimmed) {
        Some(trimmed)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_adds_https() {
        assert_eq!(normalize_url("example.com/path"), "https://example.com/path");
        assert_eq!(normalize_url("  example.com  "), "https://example.com");
        assert_eq!(normalize_url("http://example.com"), "http://example.com");
        assert_eq!(normalize_url(""), "");
    }

    #[test]
    fn private_ipv4_ranges() {
        for ip in ["10.0.0.5", "127.0.0.1", "169.254.169.254", "192.168.1.1", "172.16.0.1", "172.31.255.255"] {
            assert!(is_private_ipv4(ip.parse().unwrap()), "{ip} should be private");
        }
        for ip in ["8.8.8.8", "172.32.0.1", "93.184.216.34"] {
            assert!(!is_private_ipv4(ip.parse().unwrap()), "{ip} should be public");
        }
    }

    #[test]
    fn private_ipv6_ranges() {
        assert!(is_private_ipv6("::1".parse().unwrap()));
        assert!(is_private_ipv6("fc00::1".parse().unwrap()));
        assert!(is_private_ipv6("fd12:3456::1".parse().unwrap()));
        assert!(is_private_ipv6("fe80::1".parse().unwrap()));
        assert!(!is_private_ipv6("2606:2800:220:1::1".parse().unwrap()));
    }

    #[test]
    fn blocked_hostnames() {
        assert!(is_blocked_hostname("localhost"));
        assert!(is_blocked_hostname("LOCALHOST"));
        assert!(is_blocked_hostname("printer.local"));
        assert!(is_blocked_hostname("db.internal"));
        assert!(!is_blocked_hostname("example.com"));
        assert!(!is_blocked_hostname("internal.example.com"));
    }

    #[test]
    fn email_shapes() {
        assert_eq!(
            validate_email("  User@Example.COM "),
            Some("user@example.com".to_string())
        );
        assert!(validate_email("not-an-email").is_none());
        assert!(validate_email("a@b").is_none());
        assert!(validate_email("a b@c.com").is_none());
    }
}
