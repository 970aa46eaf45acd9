// src/config.rs

use crate::error::GateError;
use crate::keys::SigningKey;
use crate::transport::{check_transport, TransportDecision};
use jsonwebtoken::Algorithm;
use std::time::Duration;

/// Algorithms accepted when none are configured explicitly.
pub const DEFAULT_ALGORITHMS: [Algorithm; 9] = [
    Algorithm::HS256,
    Algorithm::HS384,
    Algorithm::HS512,
    Algorithm::RS256,
    Algorithm::RS384,
    Algorithm::RS512,
    Algorithm::PS256,
    Algorithm::PS384,
    Algorithm::PS512,
];

/// Everything the validator needs to judge one token.
///
/// Built once per request from a settings snapshot and never modified while
/// a token is being validated. Construct it with [`ValidationConfigBuilder`].
#[derive(Clone, Debug)]
pub struct ValidationConfig {
    /// Expected `iss` claim, compared exactly.
    pub issuer: String,
    /// Value that must appear in the `aud` claim.
    pub audience: String,
    /// Whether inbound requests must arrive over HTTPS. Read by the gate's
    /// transport check through [`ValidationConfig::check_transport`].
    pub require_https: bool,
    /// Candidate keys, tried in order.
    pub signing_keys: Vec<SigningKey>,
    /// Tolerance for `exp` and `nbf`. Zero unless configured.
    pub leeway: Duration,
    /// Scope the token must carry in `scp` or `scope`, if any.
    pub scope: Option<String>,
    /// Signing algorithms a token may use.
    pub algorithms: Vec<Algorithm>,
}

impl ValidationConfig {
    pub fn builder() -> ValidationConfigBuilder {
        ValidationConfigBuilder::new()
    }

    /// Checks a request scheme against this config's HTTPS requirement.
    pub fn check_transport(&self, scheme: Option<&str>) -> TransportDecision {
        check_transport(scheme, self.require_https)
    }
}

/// A builder for creating a `ValidationConfig` instance.
///
/// Issuer, audience and at least one signing key are required.
#[derive(Default)]
pub struct ValidationConfigBuilder {
    issuer: Option<String>,
    audience: Option<String>,
    require_https: bool,
    signing_keys: Vec<SigningKey>,
    leeway: Duration,
    scope: Option<String>,
    algorithms: Option<Vec<Algorithm>>,
}

impl ValidationConfigBuilder {
    /// Creates a new `ValidationConfigBuilder`.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the expected issuer. This is a required field.
    pub fn issuer(mut self, issuer: impl Into<String>) -> Self {
        self.issuer = Some(issuer.into());
        self
    }

    /// Sets the audience that must be present in the token. This is a required field.
    pub fn audience(mut self, audience: impl Into<String>) -> Self {
        self.audience = Some(audience.into());
        self
    }

    pub fn require_https(mut self, require_https: bool) -> Self {
        self.require_https = require_https;
        self
    }

    /// Appends a candidate key. Keys are tried in the order they were added.
    pub fn signing_key(mut self, key: SigningKey) -> Self {
        self.signing_keys.push(key);
        self
    }

    /// Appends several candidate keys, keeping their order.
    pub fn signing_keys(mut self, keys: impl IntoIterator<Item = SigningKey>) -> Self {
        self.signing_keys.extend(keys);
        self
    }

    /// Appends a shared secret for HS* tokens.
    pub fn shared_secret(self, secret: &[u8]) -> Result<Self, GateError> {
        let key = SigningKey::from_secret(secret)?;
        Ok(self.signing_key(key))
    }

    /// Sets the clock skew tolerance for `exp` and `nbf`. Defaults to zero.
    pub fn leeway(mut self, leeway: Duration) -> Self {
        self.leeway = leeway;
        self
    }

    /// Requires the token to carry `scope`. Blank values disable the check.
    pub fn scope(mut self, scope: impl Into<String>) -> Self {
        let scope = scope.into();
        self.scope = if scope.trim().is_empty() { None } else { Some(scope.trim().to_string()) };
        self
    }

    /// Restricts the accepted signing algorithms.
    /// Defaults to [`DEFAULT_ALGORITHMS`] if not set.
    pub fn algorithms(mut self, algorithms: Vec<Algorithm>) -> Self {
        self.algorithms = Some(algorithms);
        self
    }

    /// Consumes the builder and returns a `ValidationConfig`.
    ///
    /// # Errors
    ///
    /// Returns an error if issuer or audience is missing or blank, if no
    /// signing key was added, or if the algorithm list is empty.
    pub fn build(self) -> Result<ValidationConfig, GateError> {
        let issuer = required(self.issuer, "issuer")?;
        let audience = required(self.audience, "audience")?;
        if self.signing_keys.is_empty() {
            return Err(GateError::MissingConfiguration("signing_keys".to_string()));
        }
        let algorithms = self.algorithms.unwrap_or_else(|| DEFAULT_ALGORITHMS.to_vec());
        if algorithms.is_empty() {
            return Err(GateError::InvalidConfiguration("at least one algorithm must be allowed".to_string()));
        }

        Ok(ValidationConfig {
            issuer,
            audience,
            require_https: self.require_https,
            signing_keys: self.signing_keys,
            leeway: self.leeway,
            scope: self.scope,
            algorithms,
        })
    }
}

fn required(value: Option<String>, field: &str) -> Result<String, GateError> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        _ => Err(GateError::MissingConfiguration(field.to_string())),
    }
}
