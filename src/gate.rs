// src/gate.rs

use crate::client::{DiscoveryClient, DocumentRetriever, DEFAULT_FETCH_TIMEOUT};
use crate::error::GateError;
use crate::config::ValidationConfig;
use crate::key_source::{DiscoveredKeys, DiscoveryCache, KeySource, StaticKeyCache};
use crate::outcome::{Rejection, ValidationOutcome};
use crate::settings::{GateSettings, SettingsSource, StaticSettings};
use crate::transport::{TransportDecision, TransportEnforcement, HTTPS_REQUIRED_MESSAGE};
use crate::validator::validate;
use http::header::{AUTHORIZATION, CONTENT_TYPE, WWW_AUTHENTICATE};
use http::{HeaderValue, Response, StatusCode, Uri};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

/// Discovered keys younger than this are not refetched when a signature fails.
pub const DEFAULT_KEY_REFRESH_INTERVAL: Duration = Duration::from_secs(30);

/// The parts of an inbound request the gate looks at.
#[derive(Debug, Clone)]
pub struct IncomingRequest {
    authorization: Option<String>,
    uri: Uri,
    scheme: Option<String>,
}

impl IncomingRequest {
    /// Creates a request view. The scheme is taken from `uri` if it has one.
    pub fn new(authorization: Option<String>, uri: Uri) -> Self {
        let scheme = uri.scheme_str().map(str::to_string);
        Self { authorization, uri, scheme }
    }

    /// Builds the view from an `http::Request`.
    ///
    /// Server-side request URIs are usually origin-form and carry no scheme;
    /// use [`with_scheme`](Self::with_scheme) when the connection is known to be TLS.
    pub fn from_http<B>(request: &http::Request<B>) -> Self {
        // A header that is not visible ASCII cannot hold a bearer token.
        let authorization = request
            .headers()
            .get(AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string);
        Self::new(authorization, request.uri().clone())
    }

    /// Overrides the scheme, e.g. with what the listener knows about the connection.
    pub fn with_scheme(mut self, scheme: impl Into<String>) -> Self {
        self.scheme = Some(scheme.into());
        self
    }

    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    pub fn scheme(&self) -> Option<&str> {
        self.scheme.as_deref()
    }

    /// The token of a `Bearer` authorization header. The scheme name is
    /// matched case-insensitively; an empty token counts as no token.
    pub fn bearer_token(&self) -> Option<&str> {
        let value = self.authorization.as_deref()?.trim();
        let (scheme, token) = value.split_once(' ')?;
        if !scheme.eq_ignore_ascii_case("bearer") {
            return None;
        }
        let token = token.trim();
        if token.is_empty() {
            None
        } else {
            Some(token)
        }
    }
}

/// The gate's verdict on one request.
#[derive(Debug, Clone, PartialEq)]
pub struct GateDecision {
    outcome: ValidationOutcome,
    transport: TransportDecision,
}

impl GateDecision {
    fn denied(reason: Rejection) -> Self {
        Self { outcome: ValidationOutcome::Unauthorized(reason), transport: TransportDecision::Ok }
    }

    /// Whether the request may proceed to the protected handler.
    pub fn is_authorized(&self) -> bool {
        self.outcome.is_authorized()
    }

    /// The validation outcome, including the denial reason for logging.
    pub fn outcome(&self) -> &ValidationOutcome {
        &self.outcome
    }

    pub fn transport(&self) -> TransportDecision {
        self.transport
    }

    /// The `403 HTTPS is required` response, when the transport check failed.
    ///
    /// With [`TransportEnforcement::Flag`] this is attached even to an
    /// authorized decision; the hosting framework decides whether to send it.
    pub fn attached_response(&self) -> Option<Response<String>> {
        if !self.transport.is_forbidden() {
            return None;
        }
        let mut response = Response::new(HTTPS_REQUIRED_MESSAGE.to_string());
        *response.status_mut() = StatusCode::FORBIDDEN;
        response
            .headers_mut()
            .insert(CONTENT_TYPE, HeaderValue::from_static("text/plain; charset=utf-8"));
        Some(response)
    }

    /// The response to send instead of calling the handler: the attached 403
    /// if any, otherwise a bare 401 for a denied request. Denial reasons are
    /// never put into the response.
    pub fn rejection_response(&self) -> Option<Response<String>> {
        if let Some(forbidden) = self.attached_response() {
            return Some(forbidden);
        }
        if self.is_authorized() {
            return None;
        }
        let mut response = Response::new(String::new());
        *response.status_mut() = StatusCode::UNAUTHORIZED;
        response.headers_mut().insert(WWW_AUTHENTICATE, HeaderValue::from_static("Bearer"));
        Some(response)
    }
}

/// Authorizes requests carrying bearer tokens.
///
/// One gate serves all requests; it is cheap to share behind an `Arc` and
/// holds only the settings source and the key caches.
pub struct Gate {
    settings: Arc<dyn SettingsSource>,
    discovery: Arc<DiscoveryCache>,
    static_keys: StaticKeyCache,
    key_refresh_interval: Duration,
}

impl Gate {
    pub fn builder() -> GateBuilder {
        GateBuilder::new()
    }

    /// A gate with fixed settings and network key discovery.
    pub fn new(settings: GateSettings) -> Result<Self, GateError> {
        GateBuilder::new().settings(settings).build()
    }

    /// Decides whether `request` may proceed.
    ///
    /// Never fails: configuration, network and token problems all end in a
    /// denial whose reason is available on the decision.
    #[instrument(skip_all, fields(uri = %request.uri()))]
    pub async fn authorize(&self, request: &IncomingRequest) -> GateDecision {
        let Some(token) = request.bearer_token() else {
            debug!("Authorization header is missing or not a bearer token");
            return GateDecision::denied(Rejection::MissingOrWrongScheme);
        };

        let Some(settings) = self.settings.snapshot() else {
            warn!("No gate settings are available; denying request");
            return GateDecision::denied(Rejection::ConfigurationIncomplete("no settings".to_string()));
        };
        if let Err(reason) = check_required_settings(&settings) {
            warn!(%reason, "Gate settings are incomplete; denying request");
            return GateDecision::denied(reason);
        }

        let source = match self.key_source(&settings).await {
            Ok(source) => source,
            Err(reason) => return GateDecision::denied(reason),
        };
        let config = match resolve_config(&source, &settings).await {
            Ok(config) => config,
            Err(reason) => return GateDecision::denied(reason),
        };

        let transport = config.check_transport(request.scheme());
        if transport.is_forbidden() {
            debug!(scheme = ?request.scheme(), "Request did not arrive over HTTPS");
            if settings.transport_enforcement == TransportEnforcement::Deny {
                return GateDecision {
                    outcome: ValidationOutcome::Forbidden(Rejection::TransportPolicyViolation),
                    transport,
                };
            }
        }

        let outcome = self.validate_token(token, &source, &config, &settings).await;
        match outcome.rejection() {
            Some(reason) => debug!(%reason, "Request denied"),
            None => debug!("Request authorized"),
        }
        GateDecision { outcome, transport }
    }

    /// Shorthand for `authorize(request).await.is_authorized()`.
    pub async fn is_authorized(&self, request: &IncomingRequest) -> bool {
        self.authorize(request).await.is_authorized()
    }

    async fn validate_token(
        &self,
        token: &str,
        source: &KeySource,
        config: &ValidationConfig,
        settings: &GateSettings,
    ) -> ValidationOutcome {
        let outcome = validate(token, config);
        if outcome.rejection() == Some(&Rejection::SignatureMismatch)
            && source.is_dynamic()
            && source.invalidate_if_older(self.key_refresh_interval).await
        {
            debug!("No discovered key verified the token; refetching keys in case they rotated");
            return match resolve_config(source, settings).await {
                Ok(config) => validate(token, &config),
                Err(reason) => ValidationOutcome::Unauthorized(reason),
            };
        }
        outcome
    }

    async fn key_source(&self, settings: &Arc<GateSettings>) -> Result<KeySource, Rejection> {
        if settings.has_static_keys() {
            return self.static_keys.get(settings).await.map(KeySource::Static).map_err(|e| {
                warn!("Configured signing keys could not be loaded: {}", e);
                Rejection::ConfigurationIncomplete(e.to_string())
            });
        }
        let authority = settings
            .discovery_authority()
            .ok_or_else(|| Rejection::ConfigurationIncomplete("authority".to_string()))?;
        Ok(KeySource::Discovered(DiscoveredKeys::new(
            Arc::clone(&self.discovery),
            authority,
            settings.discovery_requires_https(),
        )))
    }
}

/// Resolves the candidate keys and combines them with the settings.
async fn resolve_config(source: &KeySource, settings: &GateSettings) -> Result<ValidationConfig, Rejection> {
    let keys = match source.fetch().await {
        Ok(keys) if keys.is_empty() => {
            warn!("Identity provider publishes no usable signing keys");
            return Err(Rejection::KeyDiscoveryFailure("no signing keys published".to_string()));
        }
        Ok(keys) => keys,
        Err(e) => {
            warn!("Failed to retrieve signing keys: {}", e);
            return Err(Rejection::KeyDiscoveryFailure(e.to_string()));
        }
    };

    settings.validation_config(keys).map_err(|e| {
        warn!("Validation config could not be built: {}", e);
        Rejection::ConfigurationIncomplete(e.to_string())
    })
}

fn check_required_settings(settings: &GateSettings) -> Result<(), Rejection> {
    let present = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.trim().is_empty());
    if !present(&settings.issuer) {
        return Err(Rejection::ConfigurationIncomplete("issuer".to_string()));
    }
    if !present(&settings.audience) {
        return Err(Rejection::ConfigurationIncomplete("audience".to_string()));
    }
    Ok(())
}

/// A builder for creating a [`Gate`].
///
/// Only the settings source is required. Without a retriever, keys are
/// discovered over the network with a [`DiscoveryClient`].
pub struct GateBuilder {
    settings: Option<Arc<dyn SettingsSource>>,
    retriever: Option<Arc<dyn DocumentRetriever>>,
    discovery_timeout: Duration,
    discovery_cache_ttl: Option<Duration>,
    key_refresh_interval: Duration,
}

impl Default for GateBuilder {
    fn default() -> Self {
        Self {
            settings: None,
            retriever: None,
            discovery_timeout: DEFAULT_FETCH_TIMEOUT,
            discovery_cache_ttl: None,
            key_refresh_interval: DEFAULT_KEY_REFRESH_INTERVAL,
        }
    }
}

impl GateBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Uses fixed settings.
    pub fn settings(self, settings: GateSettings) -> Self {
        self.settings_source(Arc::new(StaticSettings::new(settings)))
    }

    /// Reads settings from `source` on every request, e.g. a shared
    /// [`ReloadableSettings`](crate::settings::ReloadableSettings).
    pub fn settings_source(mut self, source: Arc<dyn SettingsSource>) -> Self {
        self.settings = Some(source);
        self
    }

    /// Replaces network discovery with a custom retriever.
    pub fn retriever(mut self, retriever: Arc<dyn DocumentRetriever>) -> Self {
        self.retriever = Some(retriever);
        self
    }

    /// Timeout of each discovery request. Defaults to [`DEFAULT_FETCH_TIMEOUT`].
    /// Ignored when a custom retriever is set.
    pub fn discovery_timeout(mut self, timeout: Duration) -> Self {
        self.discovery_timeout = timeout;
        self
    }

    /// Expires discovered documents after `ttl`. By default they are kept
    /// until a key rotation forces a refetch.
    pub fn discovery_cache_ttl(mut self, ttl: Duration) -> Self {
        self.discovery_cache_ttl = Some(ttl);
        self
    }

    /// Minimum age of discovered keys before an unverifiable token triggers a
    /// refetch. Defaults to [`DEFAULT_KEY_REFRESH_INTERVAL`].
    pub fn key_refresh_interval(mut self, interval: Duration) -> Self {
        self.key_refresh_interval = interval;
        self
    }

    /// Consumes the builder and returns a `Gate`.
    ///
    /// # Errors
    ///
    /// Returns an error if no settings source was given or the HTTP client
    /// cannot be created.
    pub fn build(self) -> Result<Gate, GateError> {
        let settings = self
            .settings
            .ok_or_else(|| GateError::MissingConfiguration("settings".to_string()))?;
        let retriever: Arc<dyn DocumentRetriever> = match self.retriever {
            Some(retriever) => retriever,
            None => Arc::new(DiscoveryClient::new(self.discovery_timeout)?),
        };
        Ok(Gate {
            settings,
            discovery: Arc::new(DiscoveryCache::with_ttl(retriever, self.discovery_cache_ttl)),
            static_keys: StaticKeyCache::new(),
            key_refresh_interval: self.key_refresh_interval,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn request(authorization: Option<&str>) -> IncomingRequest {
        IncomingRequest::new(authorization.map(str::to_string), Uri::from_static("https://api.example.com/values"))
    }

    #[test]
    fn bearer_scheme_is_case_insensitive() {
        assert_eq!(request(Some("Bearer abc.def.ghi")).bearer_token(), Some("abc.def.ghi"));
        assert_eq!(request(Some("bearer abc.def.ghi")).bearer_token(), Some("abc.def.ghi"));
        assert_eq!(request(Some("BEARER  abc.def.ghi ")).bearer_token(), Some("abc.def.ghi"));
    }

    #[test]
    fn other_schemes_and_empty_tokens_yield_no_token() {
        assert_eq!(request(None).bearer_token(), None);
        assert_eq!(request(Some("Basic dXNlcjpwYXNz")).bearer_token(), None);
        assert_eq!(request(Some("Bearer")).bearer_token(), None);
        assert_eq!(request(Some("Bearer   ")).bearer_token(), None);
        assert_eq!(request(Some("Bearerabc")).bearer_token(), None);
    }

    #[test]
    fn scheme_comes_from_uri_unless_overridden() {
        assert_eq!(request(None).scheme(), Some("https"));

        let http_request = http::Request::builder()
            .uri("/values")
            .header(AUTHORIZATION, "Bearer token")
            .body(())
            .unwrap();
        let view = IncomingRequest::from_http(&http_request);
        assert_eq!(view.scheme(), None);
        assert_eq!(view.bearer_token(), Some("token"));
        assert_eq!(view.with_scheme("https").scheme(), Some("https"));
    }

    #[test]
    fn denial_without_transport_problem_is_a_bare_401() {
        let decision = GateDecision::denied(Rejection::Expired);
        assert!(decision.attached_response().is_none());

        let response = decision.rejection_response().unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(response.headers()[WWW_AUTHENTICATE], "Bearer");
        assert!(response.body().is_empty());
    }

    #[test]
    fn forbidden_transport_attaches_403() {
        let decision = GateDecision {
            outcome: ValidationOutcome::Unauthorized(Rejection::SignatureMismatch),
            transport: TransportDecision::Forbidden,
        };
        let response = decision.rejection_response().unwrap();
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert!(response.body().contains("HTTPS is required"));
    }

    #[test]
    fn builder_requires_settings() {
        assert!(matches!(Gate::builder().build(), Err(GateError::MissingConfiguration(_))));
    }

    #[tokio::test]
    async fn missing_settings_deny_the_request() {
        let gate = Gate::builder()
            .settings_source(Arc::new(StaticSettings::empty()))
            .build()
            .unwrap();
        let decision = gate.authorize(&request(Some("Bearer abc.def.ghi"))).await;
        assert!(matches!(
            decision.outcome(),
            ValidationOutcome::Unauthorized(Rejection::ConfigurationIncomplete(_))
        ));
    }

    #[tokio::test]
    async fn missing_audience_denies_the_request() {
        let gate = Gate::new(GateSettings {
            issuer: Some("https://id.example.com".into()),
            secret: Some("a-shared-secret".into()),
            ..GateSettings::default()
        })
        .unwrap();
        let decision = gate.authorize(&request(Some("Bearer abc.def.ghi"))).await;
        assert_eq!(
            decision.outcome(),
            &ValidationOutcome::Unauthorized(Rejection::ConfigurationIncomplete("audience".to_string()))
        );
    }
}
