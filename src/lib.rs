// src/lib.rs

//! Bearer-token authorization for HTTP services.
//!
//! A [`Gate`](gate::Gate) takes the `Authorization` header and scheme of an
//! inbound request and decides whether it may reach a protected handler. The
//! token is checked against keys from local configuration or keys discovered
//! from the identity provider's `/.well-known/oauth-authorization-server`
//! document, and plain-HTTP requests can be refused.

pub mod client;
pub mod config;
pub mod error;
pub mod gate;
pub mod key_source;
pub mod keys;
pub mod model;
pub mod outcome;
pub mod settings;
pub mod transport;
pub mod validator;

#[cfg(feature = "pingora-integration")]
pub mod pingora;

/// The public prelude for the `jwt-gate` crate.
///
/// This module re-exports the most commonly used types for convenience.
pub mod prelude {
    pub use crate::client::{DiscoveryClient, DocumentRetriever};
    pub use crate::config::{ValidationConfig, ValidationConfigBuilder};
    pub use crate::error::GateError;
    pub use crate::gate::{Gate, GateBuilder, GateDecision, IncomingRequest};
    pub use crate::keys::SigningKey;
    pub use crate::outcome::{AuthorizedToken, Rejection, ValidationOutcome};
    pub use crate::settings::{GateSettings, ReloadableSettings, SettingsSource, StaticSettings};
    pub use crate::transport::{TransportDecision, TransportEnforcement};
    pub use crate::validator::validate;
    pub use jsonwebtoken::Algorithm;
}
