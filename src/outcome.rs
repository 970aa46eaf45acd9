// src/outcome.rs

use serde_json::{Map, Value};
use thiserror::Error;

/// Why a request was denied.
///
/// Reasons are kept for logs only. The gate never writes them into a response
/// body; the single exception is the fixed `HTTPS is required` message that
/// accompanies [`Rejection::TransportPolicyViolation`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejection {
    #[error("malformed token")]
    MalformedToken,

    #[error("signature verification failed")]
    SignatureMismatch,

    #[error("issuer mismatch")]
    IssuerMismatch,

    #[error("audience mismatch")]
    AudienceMismatch,

    #[error("token expired")]
    Expired,

    #[error("token not yet valid")]
    NotYetValid,

    #[error("required scope missing")]
    ScopeMismatch,

    #[error("authorization header is missing or has an invalid scheme")]
    MissingOrWrongScheme,

    #[error("configuration is incomplete: {0}")]
    ConfigurationIncomplete(String),

    #[error("signing key discovery failed: {0}")]
    KeyDiscoveryFailure(String),

    #[error("HTTPS is required")]
    TransportPolicyViolation,
}

/// A token that passed every check.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizedToken {
    /// All claims of the token payload.
    pub claims: Map<String, Value>,
    /// Fingerprint of the key that verified the signature.
    pub key_fingerprint: String,
}

impl AuthorizedToken {
    /// The `sub` claim, if present and a string.
    pub fn subject(&self) -> Option<&str> {
        self.claims.get("sub").and_then(Value::as_str)
    }
}

/// The result of validating one request.
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationOutcome {
    Authorized(AuthorizedToken),
    Unauthorized(Rejection),
    /// Denied because of policy rather than credentials (HTTP 403).
    Forbidden(Rejection),
}

impl ValidationOutcome {
    pub fn is_authorized(&self) -> bool {
        matches!(self, ValidationOutcome::Authorized(_))
    }

    /// The denial reason, or `None` when authorized.
    pub fn rejection(&self) -> Option<&Rejection> {
        match self {
            ValidationOutcome::Authorized(_) => None,
            ValidationOutcome::Unauthorized(reason) | ValidationOutcome::Forbidden(reason) => Some(reason),
        }
    }
}
