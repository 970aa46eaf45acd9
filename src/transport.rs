// src/transport.rs

use serde::Deserialize;

/// Body text of the 403 response produced for non-HTTPS requests.
pub const HTTPS_REQUIRED_MESSAGE: &str = "HTTPS is required";

/// Result of checking the inbound request's transport.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportDecision {
    Ok,
    Forbidden,
}

impl TransportDecision {
    pub fn is_forbidden(self) -> bool {
        self == TransportDecision::Forbidden
    }
}

/// What a forbidden transport decision does to the final verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportEnforcement {
    /// Attach the 403 response and let token validity decide the verdict.
    #[default]
    Flag,
    /// Attach the 403 response and deny the request.
    Deny,
}

/// Checks the request scheme against the HTTPS policy.
///
/// A missing scheme counts as plain HTTP.
pub fn check_transport(scheme: Option<&str>, require_https: bool) -> TransportDecision {
    if !require_https {
        return TransportDecision::Ok;
    }
    match scheme {
        Some(s) if s.eq_ignore_ascii_case("https") => TransportDecision::Ok,
        _ => TransportDecision::Forbidden,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn https_passes_and_http_is_forbidden_when_required() {
        assert_eq!(check_transport(Some("https"), true), TransportDecision::Ok);
        assert_eq!(check_transport(Some("HTTPS"), true), TransportDecision::Ok);
        assert_eq!(check_transport(Some("http"), true), TransportDecision::Forbidden);
        assert_eq!(check_transport(None, true), TransportDecision::Forbidden);
    }

    #[test]
    fn anything_passes_when_not_required() {
        assert_eq!(check_transport(Some("http"), false), TransportDecision::Ok);
        assert_eq!(check_transport(None, false), TransportDecision::Ok);
    }
}
