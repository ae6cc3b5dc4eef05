use std::net::{IpAddr, Ipv4Addr, Ipv6Addr};
use thiserror::Error;
use url::{Host, Url};

/// Why a feed or page URL was refused.
#[derive(Error, Debug)]
pub enum UrlValidationError {
    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),
    /// Only http and https can be fetched.
    #[error("Unsupported scheme: {0} (only http/https allowed)")]
    UnsupportedScheme(String),
    #[error("URL has no host")]
    MissingHost,
    /// SEC-001: RFC 1918, link-local, unique-local or unspecified address.
    #[error("Private IP address not allowed: {0}")]
    PrivateIp(IpAddr),
    #[error("Localhost not allowed")]
    Localhost,
}

/// Validate a URL before anything is requested from it.
///
/// SEC-001: rejects non-HTTP(S) schemes, loopback hosts and private
/// address ranges, so a feed list or a redirect cannot point the fetcher
/// at internal services. Hostnames are not resolved; only literal
/// addresses and `localhost` are checked.
///
/// # Examples
///
/// ```
/// use feedstash::util::validate_url;
///
/// let url = validate_url("https://example.com/feed.xml").unwrap();
/// assert_eq!(url.host_str(), Some("example.com"));
///
/// assert!(validate_url("http://localhost/feed").is_err());
/// assert!(validate_url("http://192.168.1.1/feed").is_err());
/// assert!(validate_url("file:///etc/passwd").is_err());
/// ```
pub fn validate_url(url_str: &str) -> Result<Url, UrlValidationError> {
    validate_url_with(url_str, false)
}

/// [`validate_url`] with the host check switched off when
/// `allow_private_hosts` is set (local mirrors, tests). The scheme check
/// always applies.
pub fn validate_url_with(
    url_str: &str,
    allow_private_hosts: bool,
) -> Result<Url, UrlValidationError> {
    let url = Url::parse(url_str)?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(UrlValidationError::UnsupportedScheme(url.scheme().to_owned()));
    }
    let host = url.host().ok_or(UrlValidationError::MissingHost)?;

    if !allow_private_hosts {
        check_host(host)?;
    }
    Ok(url)
}

fn check_host(host: Host<&str>) -> Result<(), UrlValidationError> {
    let ip = match host {
        Host::Domain(name) if name.eq_ignore_ascii_case("localhost") => {
            return Err(UrlValidationError::Localhost)
        }
        Host::Domain(_) => return Ok(()),
        Host::Ipv4(v4) => IpAddr::V4(v4),
        Host::Ipv6(v6) => match v6.to_ipv4_mapped() {
            Some(v4) => IpAddr::V4(v4),
            None => IpAddr::V6(v6),
        },
    };

    if ip.is_loopback() {
        return Err(UrlValidationError::Localhost);
    }
    let private = match ip {
        IpAddr::V4(v4) => is_private_v4(v4),
        IpAddr::V6(v6) => is_private_v6(v6),
    };
    if private {
        return Err(UrlValidationError::PrivateIp(ip));
    }
    Ok(())
}

fn is_private_v4(ip: Ipv4Addr) -> bool {
    ip.is_private() || ip.is_link_local() || ip.is_unspecified()
}

fn is_private_v6(ip: Ipv6Addr) -> bool {
    let first = ip.segments()[0];
    let unique_local = first & 0xfe00 == 0xfc00; // fc00::/7
    let link_local = first & 0xffc0 == 0xfe80; // fe80::/10
    ip.is_unspecified() || unique_local || link_local
}
