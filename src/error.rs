// src/error.rs

use base64::DecodeError;
use std::sync::Arc;
use thiserror::Error;

/// Operational errors raised while building configuration or retrieving keys.
///
/// These never reach the caller of the gate: every one of them is converted
/// into a denial there. They surface directly only from the building blocks
/// (builders, the discovery client, key parsing).
#[derive(Debug, Error)]
pub enum GateError {
    /// A provided URL could not be parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// A required configuration field is missing.
    #[error("A required configuration field is missing: {0}")]
    MissingConfiguration(String),

    /// A configuration value is invalid.
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// An error occurred during an HTTP request (including timeouts).
    #[error("HTTP request error: {0}")]
    HttpError(#[from] reqwest::Error),

    /// HTTPS was required but the URL to fetch uses another scheme.
    #[error("HTTPS is required to fetch {0}")]
    InsecureTransport(String),

    /// The identity provider answered with a non-success status.
    #[error("Unexpected HTTP status {status} from {url}")]
    UnexpectedStatus { status: u16, url: String },

    /// Retrieving a discovery document failed. Shared between every request
    /// that waited on the same fetch.
    #[error("Signing key discovery failed: {0}")]
    KeyDiscovery(Arc<GateError>),

    /// A cryptographic key (PEM, JWK) is malformed or invalid.
    #[error("Invalid key format: {0}")]
    InvalidKeyFormat(String),

    /// Errors originating from the `jsonwebtoken` crate.
    #[error("JWT error: {0}")]
    JwtError(#[from] jsonwebtoken::errors::Error),

    /// An error occurred while decoding a Base64URL encoded string.
    #[error("Base64URL decoding error: {0}")]
    Base64DecodeError(#[from] DecodeError),

    /// A JSON document could not be parsed.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}
