// src/settings.rs

use crate::config::{ValidationConfig, ValidationConfigBuilder};
use crate::error::GateError;
use crate::keys::SigningKey;
use crate::transport::TransportEnforcement;
use jsonwebtoken::Algorithm;
use serde::Deserialize;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// The `require_https_metadata` setting, which configuration files carry
/// either as a boolean or as a string.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(untagged)]
pub enum RequireHttps {
    Flag(bool),
    Text(String),
}

impl RequireHttps {
    /// `true`/`false` (case-insensitive, surrounding whitespace ignored), or
    /// `None` when the text is neither.
    pub fn parsed(&self) -> Option<bool> {
        match self {
            RequireHttps::Flag(flag) => Some(*flag),
            RequireHttps::Text(text) => {
                let text = text.trim();
                if text.eq_ignore_ascii_case("true") {
                    Some(true)
                } else if text.eq_ignore_ascii_case("false") {
                    Some(false)
                } else {
                    None
                }
            }
        }
    }
}

/// Gate settings as supplied by the embedding application's configuration.
///
/// Field names are snake_case; the PascalCase names used by
/// `OpenIdConnectOptions`-style configuration sections are accepted as aliases.
#[derive(Clone, Default, Deserialize)]
pub struct GateSettings {
    #[serde(default, alias = "Issuer")]
    pub issuer: Option<String>,
    #[serde(default, alias = "Audience")]
    pub audience: Option<String>,
    /// Where signing keys are discovered. Defaults to the issuer.
    #[serde(default, alias = "Authority")]
    pub authority: Option<String>,
    #[serde(default, alias = "RequireHttpsMetadata")]
    pub require_https_metadata: Option<RequireHttps>,
    #[serde(default, alias = "Scope")]
    pub scope: Option<String>,
    /// Shared secret for HS* tokens.
    #[serde(default, alias = "Secret")]
    pub secret: Option<String>,
    /// PEM-encoded RSA public keys.
    #[serde(default)]
    pub rsa_public_keys: Vec<String>,
    #[serde(default)]
    pub algorithms: Option<Vec<Algorithm>>,
    #[serde(default)]
    pub leeway_seconds: u64,
    #[serde(default)]
    pub transport_enforcement: TransportEnforcement,
}

impl GateSettings {
    /// Whether metadata retrieval must use HTTPS. An unparsable or absent
    /// value keeps HTTPS required.
    pub fn discovery_requires_https(&self) -> bool {
        self.require_https_metadata.as_ref().and_then(RequireHttps::parsed).unwrap_or(true)
    }

    /// Whether inbound requests must arrive over HTTPS. Only an explicit
    /// `true` turns the check on.
    pub fn transport_requires_https(&self) -> bool {
        self.require_https_metadata.as_ref().and_then(RequireHttps::parsed).unwrap_or(false)
    }

    /// Whether any key material is configured locally. Without it, keys are discovered.
    pub fn has_static_keys(&self) -> bool {
        self.secret.as_deref().is_some_and(|s| !s.is_empty()) || !self.rsa_public_keys.is_empty()
    }

    /// Parses the locally configured keys: the shared secret first, then the
    /// RSA keys in the order given.
    pub fn static_keys(&self) -> Result<Vec<SigningKey>, GateError> {
        let mut keys = Vec::with_capacity(self.rsa_public_keys.len() + 1);
        if let Some(secret) = self.secret.as_deref().filter(|s| !s.is_empty()) {
            keys.push(SigningKey::from_secret(secret.as_bytes())?);
        }
        for pem in &self.rsa_public_keys {
            keys.push(SigningKey::from_rsa_pem(pem)?);
        }
        Ok(keys)
    }

    /// The authority to discover keys from.
    pub fn discovery_authority(&self) -> Option<&str> {
        self.authority
            .as_deref()
            .or(self.issuer.as_deref())
            .map(str::trim)
            .filter(|a| !a.is_empty())
    }

    /// Combines these settings with resolved keys into a validation config.
    pub fn validation_config(&self, signing_keys: Vec<SigningKey>) -> Result<ValidationConfig, GateError> {
        let mut builder = ValidationConfigBuilder::new()
            .require_https(self.transport_requires_https())
            .signing_keys(signing_keys)
            .leeway(Duration::from_secs(self.leeway_seconds));
        if let Some(issuer) = &self.issuer {
            builder = builder.issuer(issuer.clone());
        }
        if let Some(audience) = &self.audience {
            builder = builder.audience(audience.clone());
        }
        if let Some(scope) = &self.scope {
            builder = builder.scope(scope.clone());
        }
        if let Some(algorithms) = &self.algorithms {
            builder = builder.algorithms(algorithms.clone());
        }
        builder.build()
    }
}

impl fmt::Debug for GateSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GateSettings")
            .field("issuer", &self.issuer)
            .field("audience", &self.audience)
            .field("authority", &self.authority)
            .field("require_https_metadata", &self.require_https_metadata)
            .field("scope", &self.scope)
            .field("secret", &self.secret.as_ref().map(|_| "<redacted>"))
            .field("rsa_public_keys", &self.rsa_public_keys.len())
            .field("algorithms", &self.algorithms)
            .field("leeway_seconds", &self.leeway_seconds)
            .field("transport_enforcement", &self.transport_enforcement)
            .finish()
    }
}

/// Supplies the gate with a consistent settings snapshot per request.
///
/// `None` means no configuration is available; the gate denies in that case.
pub trait SettingsSource: Send + Sync {
    fn snapshot(&self) -> Option<Arc<GateSettings>>;
}

/// Settings fixed at startup.
#[derive(Clone, Debug)]
pub struct StaticSettings(Option<Arc<GateSettings>>);

impl StaticSettings {
    pub fn new(settings: GateSettings) -> Self {
        Self(Some(Arc::new(settings)))
    }

    /// A source that never has settings.
    pub fn empty() -> Self {
        Self(None)
    }
}

impl SettingsSource for StaticSettings {
    fn snapshot(&self) -> Option<Arc<GateSettings>> {
        self.0.clone()
    }
}

/// Settings that can be swapped while the gate is serving.
///
/// Replacement is whole-snapshot: a request sees either the old settings or
/// the new ones, never a mix.
#[derive(Debug)]
pub struct ReloadableSettings {
    current: watch::Sender<Option<Arc<GateSettings>>>,
}

impl ReloadableSettings {
    pub fn new(initial: Option<GateSettings>) -> Self {
        let (current, _) = watch::channel(initial.map(Arc::new));
        Self { current }
    }

    /// Installs new settings for all subsequent requests.
    pub fn replace(&self, settings: GateSettings) {
        self.current.send_replace(Some(Arc::new(settings)));
    }

    /// Removes the settings; requests are denied until new ones are installed.
    pub fn clear(&self) {
        self.current.send_replace(None);
    }
}

impl SettingsSource for ReloadableSettings {
    fn snapshot(&self) -> Option<Arc<GateSettings>> {
        self.current.borrow().clone()
    }
}
