//! JWKS (JSON Web Key Set) resolver.
//!
//! Fetches the IdP's signing keys, indexes them by `kid` and serves
//! verification keys from memory.
//!
//! # Cache behavior
//!
//! - The key set is an immutable snapshot behind an `Arc`; a refresh builds
//!   a new snapshot and swaps the pointer, so readers never see a partial
//!   update.
//! - Snapshots expire after the configured TTL and are re-fetched on the
//!   next lookup.
//! - On a `kid` miss (IdP key rotation) one forced re-fetch is performed
//!   before reporting [`KeyResolutionError::NotFound`].
//! - Fetch failures are returned to the caller and never cached as a
//!   permanent miss.
//! - At most one fetch runs at a time. Lookups that miss while a fetch is
//!   running wait for it and use its snapshot.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use jsonwebtoken::DecodingKey;
use jsonwebtoken::jwk::JwkSet;
use parking_lot::RwLock;
use url::Url;

/// Default TTL for a fetched key set (5 minutes).
pub const DEFAULT_JWKS_TTL: Duration = Duration::from_secs(300);

/// Immutable key set snapshot.
struct KeySet {
    keys_by_kid: HashMap<String, DecodingKey>,
    fetched_at: Instant,
}

impl KeySet {
    fn from_jwk_set(jwk_set: &JwkSet) -> Self {
        let mut keys_by_kid = HashMap::new();
        for jwk in &jwk_set.keys {
            let Some(kid) = &jwk.common.key_id else {
                continue;
            };
            match DecodingKey::from_jwk(jwk) {
                Ok(key) => {
                    keys_by_kid.insert(kid.clone(), key);
                }
                Err(e) => {
                    tracing::debug!(kid = kid.as_str(), error = %e, "Skipping unusable JWK");
                }
            }
        }
        Self {
            keys_by_kid,
            fetched_at: Instant::now(),
        }
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.fetched_at.elapsed() < ttl
    }
}

/// Resolves signing keys by `kid` from the IdP's JWKS endpoint.
pub struct JwksResolver {
    http: reqwest::Client,
    jwks_url: Url,
    ttl: Duration,
    snapshot: RwLock<Option<Arc<KeySet>>>,
    fetching: tokio::sync::Mutex<()>,
}

impl JwksResolver {
    /// Create a resolver. Nothing is fetched until the first lookup.
    ///
    /// `http` should carry a request timeout; see
    /// [`OAuthConfig::with_timeout`](crate::oauth::OAuthConfig::with_timeout).
    #[must_use]
    pub fn new(http: reqwest::Client, jwks_url: Url) -> Self {
        Self {
            http,
            jwks_url,
            ttl: DEFAULT_JWKS_TTL,
            snapshot: RwLock::new(None),
            fetching: tokio::sync::Mutex::new(()),
        }
    }

    #[must_use]
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Look up the verification key for `kid`.
    ///
    /// Served from the cached snapshot when it is fresh and contains the
    /// key; otherwise the key set is fetched once and the lookup repeated.
    ///
    /// # Errors
    ///
    /// - [`KeyResolutionError::NotFound`] if the freshly fetched set has no such key.
    /// - [`KeyResolutionError::FetchFailed`] / [`KeyResolutionError::ParseFailed`]
    ///   if the JWKS endpoint is unreachable, times out or returns garbage.
    pub async fn resolve(&self, kid: &str) -> Result<DecodingKey, KeyResolutionError> {
        let cached = self.snapshot.read().clone();
        if let Some(set) = cached.as_ref().filter(|set| set.is_fresh(self.ttl)) {
            if let Some(key) = set.keys_by_kid.get(kid) {
                return Ok(key.clone());
            }
            tracing::debug!(kid, "kid not in cached JWKS, re-fetching");
        }

        let set = self.refetch(cached.as_ref()).await?;
        set.keys_by_kid
            .get(kid)
            .cloned()
            .ok_or_else(|| KeyResolutionError::NotFound {
                kid: kid.to_string(),
            })
    }

    /// Fetch the key set and swap it in.
    ///
    /// # Errors
    ///
    /// Returns [`KeyResolutionError::FetchFailed`] or
    /// [`KeyResolutionError::ParseFailed`]; the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<(), KeyResolutionError> {
        let _fetching = self.fetching.lock().await;
        self.fetch_snapshot().await.map(|_| ())
    }

    /// Replace `stale` with a newer snapshot, fetching only if no other
    /// lookup swapped one in while this one waited.
    async fn refetch(
        &self,
        stale: Option<&Arc<KeySet>>,
    ) -> Result<Arc<KeySet>, KeyResolutionError> {
        let _fetching = self.fetching.lock().await;

        let current = self.snapshot.read().clone();
        if let Some(current) = current {
            let replaced = stale.is_none_or(|stale| !Arc::ptr_eq(stale, &current));
            if replaced && current.is_fresh(self.ttl) {
                return Ok(current);
            }
        }
        self.fetch_snapshot().await
    }

    async fn fetch_snapshot(&self) -> Result<Arc<KeySet>, KeyResolutionError> {
        let jwk_set = self.fetch().await?;
        let set = Arc::new(KeySet::from_jwk_set(&jwk_set));
        tracing::debug!(
            jwks_url = self.jwks_url.as_str(),
            kid_count = set.keys_by_kid.len(),
            "JWKS cached"
        );
        *self.snapshot.write() = Some(Arc::clone(&set));
        Ok(set)
    }

    /// Number of keys in the current snapshot (0 before the first fetch).
    #[must_use]
    pub fn cached_key_count(&self) -> usize {
        self.snapshot
            .read()
            .as_ref()
            .map_or(0, |set| set.keys_by_kid.len())
    }

    async fn fetch(&self) -> Result<JwkSet, KeyResolutionError> {
        let url = self.jwks_url.as_str();
        let response = self
            .http
            .get(self.jwks_url.clone())
            .send()
            .await
            .map_err(|e| KeyResolutionError::FetchFailed {
                url: url.to_string(),
                error: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(KeyResolutionError::FetchFailed {
                url: url.to_string(),
                error: format!("HTTP {}", response.status()),
            });
        }

        response
            .json::<JwkSet>()
            .await
            .map_err(|e| KeyResolutionError::ParseFailed {
                url: url.to_string(),
                error: e.to_string(),
            })
    }
}

impl std::fmt::Debug for JwksResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksResolver")
            .field("jwks_url", &self.jwks_url.as_str())
            .field("cached_keys", &self.cached_key_count())
            .field("ttl", &self.ttl)
            .finish()
    }
}

/// JWKS lookup errors.
#[derive(Debug, Clone, thiserror::Error)]
pub enum KeyResolutionError {
    /// Key ID not present even after re-fetching.
    #[error("Key not found in JWKS: kid={kid}")]
    NotFound { kid: String },

    /// The JWKS endpoint could not be reached or answered with an error.
    #[error("Failed to fetch JWKS from {url}: {error}")]
    FetchFailed { url: String, error: String },

    /// The JWKS document could not be parsed.
    #[error("Failed to parse JWKS from {url}: {error}")]
    ParseFailed { url: String, error: String },
}

impl KeyResolutionError {
    /// `true` when the failure is about reaching the key set rather than the
    /// key itself; such failures are worth one retry.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::NotFound { .. })
    }
}
