// src/model.rs

use crate::keys::SigningKey;
use serde::Deserialize;
use std::time::SystemTime;

/// Authorization server metadata (RFC 8414), as served from
/// `{authority}/.well-known/oauth-authorization-server`.
///
/// Only the members the gate needs are deserialized.
#[derive(Debug, Deserialize)]
pub struct AuthorizationServerMetadata {
    pub issuer: String,
    pub jwks_uri: String,
}

/// Represents a single JSON Web Key (JWK) as defined in RFC 7517.
#[derive(Debug, Deserialize)]
pub struct JsonWebKey {
    pub kid: Option<String>,
    pub kty: String,
    #[serde(rename = "use")]
    pub use_purpose: Option<String>,
    pub alg: Option<String>,
    pub n: Option<String>,
    pub e: Option<String>,
}

/// Represents a JSON Web Key Set (JWKS), which is a collection of JWKs.
#[derive(Debug, Deserialize)]
pub struct JsonWebKeySet {
    pub keys: Vec<JsonWebKey>,
}

/// The signing-key metadata of an identity provider, as retrieved at one point in time.
///
/// A document is replaced wholesale when it is refreshed; it is never mutated.
#[derive(Debug, Clone)]
pub struct DiscoveryDocument {
    pub issuer: String,
    pub jwks_uri: String,
    /// Keys in the order the provider published them.
    pub signing_keys: Vec<SigningKey>,
    pub fetched_at: SystemTime,
}
