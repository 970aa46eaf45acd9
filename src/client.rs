// src/client.rs

use crate::error::GateError;
use crate::keys::SigningKey;
use crate::model::{AuthorizationServerMetadata, DiscoveryDocument, JsonWebKeySet};
use async_trait::async_trait;
use reqwest::redirect::Policy;
use serde::de::DeserializeOwned;
use std::time::{Duration, SystemTime};
use thiserror::Error;
use tracing::{debug, instrument, warn};
use url::Url;

/// Path appended to an authority to locate its metadata document.
pub const METADATA_PATH: &str = "/.well-known/oauth-authorization-server";

/// Upper bound for a single metadata or key-set request.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(5);

/// Retrieves an identity provider's discovery document.
///
/// Implementations must be safe to call from many requests at once. The
/// [`DiscoveryClient`] is the network implementation; tests and embedders can
/// provide their own.
#[async_trait]
pub trait DocumentRetriever: Send + Sync {
    /// Fetches the document for `authority`. When `require_https` is set, any
    /// non-HTTPS URL along the way is refused.
    async fn fetch_configuration(
        &self,
        authority: &str,
        require_https: bool,
    ) -> Result<DiscoveryDocument, GateError>;
}

/// Fetches discovery documents over HTTP(S).
///
/// The client holds no document state; caching lives in
/// [`DiscoveryCache`](crate::key_source::DiscoveryCache).
#[derive(Clone, Debug)]
pub struct DiscoveryClient {
    http_client: reqwest::Client,
    /// Used when HTTPS is required; never follows a redirect to another scheme.
    https_client: reqwest::Client,
}

impl DiscoveryClient {
    /// Creates a client whose requests time out after `timeout`.
    pub fn new(timeout: Duration) -> Result<Self, GateError> {
        let http_client = reqwest::Client::builder().timeout(timeout).build()?;
        let https_client = reqwest::Client::builder()
            .timeout(timeout)
            .redirect(https_only_redirects())
            .build()?;
        Ok(Self { http_client, https_client })
    }

    /// Builds the metadata URL for `authority`.
    ///
    /// A trailing `/` on the authority is ignored, so both
    /// `https://id.example.com` and `https://id.example.com/` resolve to
    /// `https://id.example.com/.well-known/oauth-authorization-server`.
    pub fn metadata_url(authority: &str, require_https: bool) -> Result<Url, GateError> {
        let trimmed = authority.trim().trim_end_matches('/');
        if trimmed.is_empty() {
            return Err(GateError::MissingConfiguration("authority".to_string()));
        }
        let url = Url::parse(&format!("{}{}", trimmed, METADATA_PATH))
            .map_err(|e| GateError::InvalidUrl(e.to_string()))?;
        ensure_https(&url, require_https)?;
        Ok(url)
    }

    async fn get_json<T: DeserializeOwned>(&self, url: Url, require_https: bool) -> Result<T, GateError> {
        let client = if require_https { &self.https_client } else { &self.http_client };
        let response = client.get(url.clone()).send().await.map_err(|e| {
            let downgrade = std::error::Error::source(&e)
                .and_then(|source| source.downcast_ref::<RedirectDowngrade>())
                .map(|refused| refused.0.to_string());
            match downgrade {
                Some(target) => GateError::InsecureTransport(target),
                None => GateError::HttpError(e),
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(GateError::UnexpectedStatus { status: status.as_u16(), url: url.to_string() });
        }

        let body = response.bytes().await?;
        Ok(serde_json::from_slice(&body)?)
    }
}

#[async_trait]
impl DocumentRetriever for DiscoveryClient {
    #[instrument(skip(self), err)]
    async fn fetch_configuration(
        &self,
        authority: &str,
        require_https: bool,
    ) -> Result<DiscoveryDocument, GateError> {
        let metadata_url = Self::metadata_url(authority, require_https)?;
        debug!("Fetching authorization server metadata from: {}", metadata_url);
        let metadata: AuthorizationServerMetadata = self.get_json(metadata_url.clone(), require_https).await?;

        // `join` keeps absolute URIs as they are and resolves relative ones.
        let jwks_uri = metadata_url
            .join(&metadata.jwks_uri)
            .map_err(|e| GateError::InvalidUrl(e.to_string()))?;
        ensure_https(&jwks_uri, require_https)?;

        debug!("Fetching JWKS from: {}", jwks_uri);
        let jwks: JsonWebKeySet = self.get_json(jwks_uri.clone(), require_https).await?;
        let signing_keys = signing_keys_from_jwks(jwks);

        debug!(
            issuer = %metadata.issuer,
            "Fetched discovery document with {} signing keys",
            signing_keys.len()
        );

        Ok(DiscoveryDocument {
            issuer: metadata.issuer,
            jwks_uri: jwks_uri.to_string(),
            signing_keys,
            fetched_at: SystemTime::now(),
        })
    }
}

/// Upper bound on redirects followed for one request, as in reqwest's default policy.
const MAX_REDIRECTS: usize = 10;

/// Raised by [`https_only_redirects`] for a redirect that would leave HTTPS.
#[derive(Debug, Error)]
#[error("refusing redirect to non-HTTPS URL {0}")]
struct RedirectDowngrade(Url);

/// A redirect policy that refuses to leave HTTPS. The downgraded target is
/// never contacted.
fn https_only_redirects() -> Policy {
    Policy::custom(|attempt| {
        if attempt.url().scheme() != "https" {
            let target = attempt.url().clone();
            attempt.error(RedirectDowngrade(target))
        } else if attempt.previous().len() >= MAX_REDIRECTS {
            attempt.error("too many redirects")
        } else {
            attempt.follow()
        }
    })
}

fn ensure_https(url: &Url, require_https: bool) -> Result<(), GateError> {
    if require_https && url.scheme() != "https" {
        return Err(GateError::InsecureTransport(url.to_string()));
    }
    Ok(())
}

/// Converts a published key set into signing keys, keeping the publication order.
///
/// Keys that cannot be used are skipped, so one broken entry does not hide the
/// provider's other keys. An empty result is left to the caller to reject.
fn signing_keys_from_jwks(jwks: JsonWebKeySet) -> Vec<SigningKey> {
    let mut keys = Vec::with_capacity(jwks.keys.len());
    for jwk in jwks.keys {
        if jwk.use_purpose.as_deref().is_some_and(|purpose| purpose != "sig") {
            debug!(kid = ?jwk.kid, "Skipping JWK not meant for signatures");
            continue;
        }
        if jwk.kty != "RSA" {
            debug!(kid = ?jwk.kid, kty = %jwk.kty, "Skipping JWK of unsupported key type");
            continue;
        }
        let (Some(n), Some(e)) = (jwk.n.as_deref(), jwk.e.as_deref()) else {
            warn!(kid = ?jwk.kid, "Skipping RSA JWK without 'n' or 'e' component");
            continue;
        };
        match SigningKey::from_rsa_components(n, e, jwk.kid.clone()) {
            Ok(key) => keys.push(key),
            Err(err) => warn!(kid = ?jwk.kid, "Skipping unusable RSA JWK: {}", err),
        }
    }
    keys
}
