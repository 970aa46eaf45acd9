// src/key_source.rs

use crate::client::DocumentRetriever;
use crate::error::GateError;
use crate::keys::SigningKey;
use crate::model::DiscoveryDocument;
use crate::settings::GateSettings;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument};

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct DocumentKey {
    authority: String,
    require_https: bool,
}

/// A concurrency-safe cache of discovery documents, shared by all requests.
///
/// Documents are fetched on a miss and replaced when invalidated. Concurrent
/// misses for the same authority wait on a single fetch. There is no expiry
/// unless a TTL is given.
pub struct DiscoveryCache {
    retriever: Arc<dyn DocumentRetriever>,
    documents: Cache<DocumentKey, Arc<DiscoveryDocument>>,
}

impl DiscoveryCache {
    pub fn new(retriever: Arc<dyn DocumentRetriever>) -> Self {
        Self::with_ttl(retriever, None)
    }

    /// Creates a cache whose entries are dropped `ttl` after they were fetched.
    pub fn with_ttl(retriever: Arc<dyn DocumentRetriever>, ttl: Option<Duration>) -> Self {
        // One entry per authority; a handful is plenty.
        let mut builder = Cache::builder().max_capacity(64);
        if let Some(ttl) = ttl {
            builder = builder.time_to_live(ttl);
        }
        Self { retriever, documents: builder.build() }
    }

    /// Returns the cached document for `authority`, fetching it on a miss.
    #[instrument(skip(self), err)]
    pub async fn get(&self, authority: &str, require_https: bool) -> Result<Arc<DiscoveryDocument>, GateError> {
        let key = DocumentKey { authority: authority.to_string(), require_https };
        let retriever = Arc::clone(&self.retriever);
        let authority = authority.to_string();

        self.documents
            .try_get_with(key, async move {
                debug!("Discovery document cache miss for authority: {}. Fetching.", authority);
                retriever.fetch_configuration(&authority, require_https).await.map(Arc::new)
            })
            .await
            .map_err(GateError::KeyDiscovery)
    }

    /// Drops the cached document so the next `get` fetches a fresh one.
    pub async fn invalidate(&self, authority: &str, require_https: bool) {
        let key = DocumentKey { authority: authority.to_string(), require_https };
        self.documents.invalidate(&key).await;
        debug!("Invalidated discovery document for authority: {}", authority);
    }

    /// Drops the cached document only if it was fetched at least `min_age`
    /// ago. Returns `true` when the next `get` will fetch again.
    pub async fn invalidate_if_older(&self, authority: &str, require_https: bool, min_age: Duration) -> bool {
        let key = DocumentKey { authority: authority.to_string(), require_https };
        if let Some(document) = self.documents.get(&key).await {
            let age = document.fetched_at.elapsed().unwrap_or(Duration::ZERO);
            if age < min_age {
                debug!(?age, "Discovery document for {} is too recent to refetch", authority);
                return false;
            }
        }
        self.documents.invalidate(&key).await;
        debug!("Invalidated discovery document for authority: {}", authority);
        true
    }
}

/// Signing keys parsed from configured secrets and PEMs, kept per settings
/// snapshot.
///
/// Snapshots are told apart by their `Arc`, so reloaded settings are parsed
/// once and earlier snapshots age out of the cache.
pub struct StaticKeyCache {
    parsed: Cache<usize, Arc<ParsedKeys>>,
}

struct ParsedKeys {
    // Holding the snapshot keeps its address from being reused while cached.
    _settings: Arc<GateSettings>,
    keys: Vec<SigningKey>,
}

impl Default for StaticKeyCache {
    fn default() -> Self {
        Self::new()
    }
}

impl StaticKeyCache {
    pub fn new() -> Self {
        Self { parsed: Cache::new(8) }
    }

    /// Returns the configured keys of `settings`, parsing them on first use.
    /// Parse failures are not cached.
    pub async fn get(&self, settings: &Arc<GateSettings>) -> Result<Vec<SigningKey>, GateError> {
        let id = Arc::as_ptr(settings) as usize;
        if let Some(parsed) = self.parsed.get(&id).await {
            return Ok(parsed.keys.clone());
        }

        debug!("Parsing configured signing keys for a new settings snapshot");
        let keys = settings.static_keys()?;
        let parsed = ParsedKeys { _settings: Arc::clone(settings), keys: keys.clone() };
        self.parsed.insert(id, Arc::new(parsed)).await;
        Ok(keys)
    }

    #[cfg(test)]
    async fn snapshot_count(&self) -> u64 {
        self.parsed.run_pending_tasks().await;
        self.parsed.entry_count()
    }
}

/// Keys discovered from an authority through a shared cache.
#[derive(Clone)]
pub struct DiscoveredKeys {
    cache: Arc<DiscoveryCache>,
    authority: String,
    require_https: bool,
}

impl DiscoveredKeys {
    pub fn new(cache: Arc<DiscoveryCache>, authority: impl Into<String>, require_https: bool) -> Self {
        Self { cache, authority: authority.into(), require_https }
    }

    pub fn authority(&self) -> &str {
        &self.authority
    }
}

/// Where the candidate signing keys for a request come from.
#[derive(Clone)]
pub enum KeySource {
    /// Keys from local configuration.
    Static(Vec<SigningKey>),
    /// Keys published by an identity provider.
    Discovered(DiscoveredKeys),
}

impl KeySource {
    /// Returns the current candidate keys, in order.
    pub async fn fetch(&self) -> Result<Vec<SigningKey>, GateError> {
        match self {
            KeySource::Static(keys) => Ok(keys.clone()),
            KeySource::Discovered(discovered) => {
                let document = discovered.cache.get(&discovered.authority, discovered.require_https).await?;
                Ok(document.signing_keys.clone())
            }
        }
    }

    /// Forgets discovered keys so the next `fetch` retrieves them again.
    /// Static keys are unaffected.
    pub async fn invalidate(&self) {
        if let KeySource::Discovered(discovered) = self {
            discovered.cache.invalidate(&discovered.authority, discovered.require_https).await;
        }
    }

    /// Like `invalidate`, but keeps keys fetched less than `min_age` ago.
    /// Returns `true` if a following `fetch` will retrieve keys again.
    pub async fn invalidate_if_older(&self, min_age: Duration) -> bool {
        match self {
            KeySource::Static(_) => false,
            KeySource::Discovered(discovered) => {
                discovered
                    .cache
                    .invalidate_if_older(&discovered.authority, discovered.require_https, min_age)
                    .await
            }
        }
    }

    /// Whether `invalidate` followed by `fetch` can yield different keys.
    pub fn is_dynamic(&self) -> bool {
        matches!(self, KeySource::Discovered(_))
    }
}
