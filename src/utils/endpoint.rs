//! Signaling endpoint validation.
//!
//! The signaling relay receives the local session description and a bearer
//! credential, so the configured endpoint must be HTTPS. Loopback HTTP is
//! allowed for local relays and tests.

use thiserror::Error;
use url::{Host, Url};

/// Errors that can occur during endpoint validation.
#[derive(Debug, Error)]
pub enum EndpointError {
    #[error("Invalid URL format: {0}")]
    InvalidFormat(#[from] url::ParseError),

    #[error("URL scheme must be HTTPS (or HTTP to loopback), got: {0}")]
    HttpsRequired(String),

    #[error("URL must have a host")]
    MissingHost,
}

/// Validate a signaling relay URL.
///
/// Accepts any HTTPS URL, and HTTP only when the host is loopback.
pub fn validate_signaling_url(raw: &str) -> Result<Url, EndpointError> {
    let url = Url::parse(raw)?;

    let host = url.host().ok_or(EndpointError::MissingHost)?;
    match url.scheme() {
        "https" => Ok(url),
        "http" if is_loopback_host(&host) => Ok(url),
        scheme => Err(EndpointError::HttpsRequired(scheme.to_string())),
    }
}

fn is_loopback_host(host: &Host<&str>) -> bool {
    match host {
        Host::Domain(domain) => *domain == "localhost",
        Host::Ipv4(ip) => ip.is_loopback(),
        Host::Ipv6(ip) => ip.is_loopback(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_https_accepted() {
        assert!(validate_signaling_url("https://relay.example.com/session").is_ok());
    }

    #[test]
    fn test_http_loopback_accepted() {
        assert!(validate_signaling_url("http://127.0.0.1:8080/offer").is_ok());
        assert!(validate_signaling_url("http://localhost:3000/offer").is_ok());
        assert!(validate_signaling_url("http://[::1]:9000/offer").is_ok());
    }

    #[test]
    fn test_plain_http_rejected() {
        let err = validate_signaling_url("http://relay.example.com/session").unwrap_err();
        assert!(matches!(err, EndpointError::HttpsRequired(_)));
    }

    #[test]
    fn test_garbage_rejected() {
        assert!(validate_signaling_url("not a url").is_err());
    }
}
