// src/keys.rs

use crate::error::GateError;
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{Algorithm, DecodingKey};
use rsa::pkcs1::DecodeRsaPublicKey;
use rsa::pkcs8::DecodePublicKey;
use rsa::traits::PublicKeyParts;
use rsa::RsaPublicKey;
use serde_json::json;
use sha2::{Digest, Sha256};
use std::fmt;

/// The family of a signing key. A token's `alg` must belong to the family of
/// the key it is verified with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyKind {
    /// Shared secret for HS256/HS384/HS512.
    Symmetric,
    /// RSA public key for RS* and PS* algorithms.
    Rsa,
}

impl KeyKind {
    /// Returns `true` if a token signed with `alg` may be verified with a key of this kind.
    pub fn accepts(self, alg: Algorithm) -> bool {
        match self {
            KeyKind::Symmetric => matches!(alg, Algorithm::HS256 | Algorithm::HS384 | Algorithm::HS512),
            KeyKind::Rsa => matches!(
                alg,
                Algorithm::RS256
                    | Algorithm::RS384
                    | Algorithm::RS512
                    | Algorithm::PS256
                    | Algorithm::PS384
                    | Algorithm::PS512
            ),
        }
    }
}

/// A key a token may be verified against.
///
/// Keys only ever come from configuration or from a discovery document,
/// never from the token being validated.
#[derive(Clone)]
pub struct SigningKey {
    kid: Option<String>,
    kind: KeyKind,
    fingerprint: String,
    decoding_key: DecodingKey,
}

impl SigningKey {
    /// Creates a symmetric key from a shared secret.
    pub fn from_secret(secret: &[u8]) -> Result<Self, GateError> {
        if secret.is_empty() {
            return Err(GateError::InvalidKeyFormat("shared secret is empty".to_string()));
        }
        let digest = Sha256::digest(secret);
        // Only a prefix of the digest, enough to tell keys apart in logs.
        let fingerprint = format!("hs:{}", &URL_SAFE_NO_PAD.encode(digest)[..12]);
        Ok(Self {
            kid: None,
            kind: KeyKind::Symmetric,
            fingerprint,
            decoding_key: DecodingKey::from_secret(secret),
        })
    }

    /// Parses a PEM-encoded RSA public key, either SPKI (`BEGIN PUBLIC KEY`)
    /// or PKCS#1 (`BEGIN RSA PUBLIC KEY`).
    pub fn from_rsa_pem(pem: &str) -> Result<Self, GateError> {
        let pem = pem.trim();
        let public_key = RsaPublicKey::from_public_key_pem(pem)
            .or_else(|_| RsaPublicKey::from_pkcs1_pem(pem))
            .map_err(|e| GateError::InvalidKeyFormat(format!("Failed to parse RSA public key PEM: {}", e)))?;

        let n = URL_SAFE_NO_PAD.encode(public_key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(public_key.e().to_bytes_be());
        Self::from_rsa_components(&n, &e, None)
    }

    /// Builds an RSA key from base64url-encoded JWK components.
    pub fn from_rsa_components(n: &str, e: &str, kid: Option<String>) -> Result<Self, GateError> {
        // Round-trip through the decoder so that padded or non-canonical input
        // yields the same thumbprint as its canonical form.
        let n_bytes = decode_component(n, "n")?;
        let e_bytes = decode_component(e, "e")?;
        if n_bytes.is_empty() || e_bytes.is_empty() {
            return Err(GateError::InvalidKeyFormat("RSA key has an empty component".to_string()));
        }
        let n = URL_SAFE_NO_PAD.encode(trim_leading_zeros(&n_bytes));
        let e = URL_SAFE_NO_PAD.encode(trim_leading_zeros(&e_bytes));

        let decoding_key = DecodingKey::from_rsa_components(&n, &e)?;
        Ok(Self {
            kid,
            kind: KeyKind::Rsa,
            fingerprint: rsa_thumbprint(&n, &e),
            decoding_key,
        })
    }

    /// The `kid` published alongside the key, if any.
    pub fn kid(&self) -> Option<&str> {
        self.kid.as_deref()
    }

    pub fn kind(&self) -> KeyKind {
        self.kind
    }

    /// A stable, non-secret identifier of the key material.
    pub fn fingerprint(&self) -> &str {
        &self.fingerprint
    }

    pub(crate) fn decoding_key(&self) -> &DecodingKey {
        &self.decoding_key
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("kind", &self.kind)
            .field("fingerprint", &self.fingerprint)
            .finish_non_exhaustive()
    }
}

fn decode_component(value: &str, name: &str) -> Result<Vec<u8>, GateError> {
    URL_SAFE_NO_PAD
        .decode(value.trim_end_matches('='))
        .map_err(|e| GateError::InvalidKeyFormat(format!("RSA component '{}' is not base64url: {}", name, e)))
}

fn trim_leading_zeros(bytes: &[u8]) -> &[u8] {
    let first = bytes.iter().position(|b| *b != 0).unwrap_or(bytes.len().saturating_sub(1));
    &bytes[first..]
}

/// JWK thumbprint (RFC 7638) of an RSA key.
fn rsa_thumbprint(n: &str, e: &str) -> String {
    // Members in lexicographic order, no whitespace.
    let canonical_jwk = json!({
        "e": e,
        "kty": "RSA",
        "n": n,
    });
    let mut hasher = Sha256::new();
    hasher.update(canonical_jwk.to_string().as_bytes());
    URL_SAFE_NO_PAD.encode(hasher.finalize())
}
