// src/validator.rs

use crate::config::ValidationConfig;
use crate::error::GateError;
use crate::keys::SigningKey;
use crate::outcome::{AuthorizedToken, Rejection, ValidationOutcome};
use base64::engine::{general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{decode_header, Header};
use serde_json::{Map, Value};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument};

/// A token split into its parts. Nothing in it has been verified yet.
struct ParsedToken<'a> {
    header: Header,
    claims: Map<String, Value>,
    /// `header.payload`, the signed input.
    message: &'a str,
    signature: &'a str,
}

/// Validates `token` against `config` at the current time.
///
/// Never panics and never returns an error: every failure is an
/// [`ValidationOutcome::Unauthorized`] carrying the reason.
pub fn validate(token: &str, config: &ValidationConfig) -> ValidationOutcome {
    validate_at(token, config, unix_now())
}

/// Validates `token` as of `now` (seconds since the Unix epoch).
///
/// Checks run in a fixed order and the first failure decides the reason:
/// 1. structure (three base64url segments, JSON header and claims object)
/// 2. signature, against `config.signing_keys` only, in list order
/// 3. `iss` equals the configured issuer exactly
/// 4. `aud` contains the configured audience
/// 5. `exp` is after `now` (less the leeway)
/// 6. `nbf`, when present, is not after `now` (plus the leeway)
/// 7. the configured scope, if any, is granted in `scp` or `scope`
#[instrument(skip_all, fields(issuer = %config.issuer))]
pub fn validate_at(token: &str, config: &ValidationConfig, now: u64) -> ValidationOutcome {
    match check_token(token, config, now) {
        Ok(authorized) => {
            debug!(key = %authorized.key_fingerprint, "Token validated");
            ValidationOutcome::Authorized(authorized)
        }
        Err(reason) => {
            debug!(%reason, "Token rejected");
            ValidationOutcome::Unauthorized(reason)
        }
    }
}

fn check_token(token: &str, config: &ValidationConfig, now: u64) -> Result<AuthorizedToken, Rejection> {
    let parsed = parse_token(token).map_err(|e| {
        debug!("Token could not be parsed: {}", e);
        Rejection::MalformedToken
    })?;

    let key = verify_signature(&parsed, config).ok_or(Rejection::SignatureMismatch)?;

    let claims = parsed.claims;
    check_issuer(&claims, &config.issuer)?;
    check_audience(&claims, &config.audience)?;
    check_lifetime(&claims, now, config.leeway.as_secs())?;
    if let Some(scope) = &config.scope {
        check_scope(&claims, scope)?;
    }

    Ok(AuthorizedToken { claims, key_fingerprint: key.fingerprint().to_string() })
}

fn parse_token(token: &str) -> Result<ParsedToken<'_>, GateError> {
    let token = token.trim();
    let segments: Vec<&str> = token.split('.').collect();
    if segments.len() != 3 || segments.iter().any(|s| s.is_empty()) {
        return Err(GateError::JwtError(jsonwebtoken::errors::ErrorKind::InvalidToken.into()));
    }

    let header = decode_header(token)?;
    let payload = URL_SAFE_NO_PAD.decode(segments[1])?;
    let claims: Map<String, Value> = serde_json::from_slice(&payload)?;
    // Reject undecodable signatures here so they count as malformed, not as a key mismatch.
    URL_SAFE_NO_PAD.decode(segments[2])?;

    let message = &token[..segments[0].len() + 1 + segments[1].len()];
    Ok(ParsedToken { header, claims, message, signature: segments[2] })
}

/// Returns the first configured key that verifies the signature.
///
/// The token's header only selects the algorithm, and only among the allowed
/// ones; a key is tried only if the algorithm belongs to its family, so an
/// RSA public key is never used as an HMAC secret.
fn verify_signature<'k>(parsed: &ParsedToken<'_>, config: &'k ValidationConfig) -> Option<&'k SigningKey> {
    let alg = parsed.header.alg;
    if !config.algorithms.contains(&alg) {
        debug!(?alg, "Token algorithm is not allowed");
        return None;
    }

    for key in &config.signing_keys {
        if !key.kind().accepts(alg) {
            continue;
        }
        match jsonwebtoken::crypto::verify(parsed.signature, parsed.message.as_bytes(), key.decoding_key(), alg) {
            Ok(true) => return Some(key),
            Ok(false) => {}
            Err(e) => debug!(key = %key.fingerprint(), "Signature check errored: {}", e),
        }
    }

    debug!(?alg, candidates = config.signing_keys.len(), "No configured key verified the signature");
    None
}

fn check_issuer(claims: &Map<String, Value>, issuer: &str) -> Result<(), Rejection> {
    match claims.get("iss").and_then(Value::as_str) {
        Some(iss) if iss == issuer => Ok(()),
        _ => Err(Rejection::IssuerMismatch),
    }
}

fn check_audience(claims: &Map<String, Value>, audience: &str) -> Result<(), Rejection> {
    let contained = match claims.get("aud") {
        Some(Value::String(aud)) => aud == audience,
        Some(Value::Array(auds)) => auds.iter().any(|aud| aud.as_str() == Some(audience)),
        _ => false,
    };
    if contained {
        Ok(())
    } else {
        Err(Rejection::AudienceMismatch)
    }
}

fn check_lifetime(claims: &Map<String, Value>, now: u64, leeway: u64) -> Result<(), Rejection> {
    let now = now as f64;
    let leeway = leeway as f64;

    // A token without a usable `exp` never expires, so it is refused outright.
    let exp = claims.get("exp").and_then(Value::as_f64).ok_or(Rejection::Expired)?;
    if exp + leeway <= now {
        return Err(Rejection::Expired);
    }

    match claims.get("nbf") {
        None => Ok(()),
        Some(nbf) => {
            let nbf = nbf.as_f64().ok_or(Rejection::MalformedToken)?;
            if nbf > now + leeway {
                Err(Rejection::NotYetValid)
            } else {
                Ok(())
            }
        }
    }
}

fn check_scope(claims: &Map<String, Value>, required: &str) -> Result<(), Rejection> {
    let granted = claims.get("scp").or_else(|| claims.get("scope"));
    let has_scope = match granted {
        Some(Value::String(scopes)) => scopes.split_whitespace().any(|s| s == required),
        Some(Value::Array(scopes)) => scopes.iter().any(|s| s.as_str() == Some(required)),
        _ => false,
    };
    if has_scope {
        Ok(())
    } else {
        Err(Rejection::ScopeMismatch)
    }
}

fn unix_now() -> u64 {
    SystemTime::now().duration_since(UNIX_EPOCH).map(|d| d.as_secs()).unwrap_or(0)
}
