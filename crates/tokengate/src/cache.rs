//! JWKS cache: URI → JWKS map with single-flight fetching.
//!
//! # Architecture
//!
//! ```text
//! JWT arrives → extract kid from the header
//!             → check cached JWKS for the URI
//!             → kid present? done
//!             → kid miss? penalty-box gate, then refresh via single-flight fetch
//!             → look the kid up in the fresh set
//!             → register success/failure with the penalty box
//! ```
//!
//! # Guarantees
//!
//! - At most one fetch is in flight per URI. Callers arriving during a
//!   fetch await the same shared future and observe the same result —
//!   success or error alike.
//! - A fetch failure never touches the cache; the pending entry is
//!   removed and the previously cached JWKS (if any) stays served.
//! - A successful fetch replaces the cached JWKS for its URI atomically
//!   (whole-`Arc` swap); readers never observe a partially written set.
//! - A cancelled caller releases nothing it should keep: remaining
//!   callers keep driving the shared fetch, and once every caller has
//!   gone the abandoned future is simply dropped, leaving the slot free.
//!
//! One cache instance may back many verifiers.

use std::{collections::HashMap, sync::Arc};

use futures::{
    FutureExt,
    future::{BoxFuture, Shared},
};
use moka::sync::Cache;
use parking_lot::Mutex;

use crate::{
    error::{Result, VerifyError},
    fetch::JwksFetcher,
    jwk::{JwkWithKid, Jwks},
    jwt::DecomposedJwt,
    penalty::PenaltyBox,
};

/// Default maximum number of cached JWKS documents.
///
/// URIs come from verifier configuration, not from tokens, so the bound is
/// a memory safety net for long-running services with many issuers rather
/// than an eviction policy the verification path relies on.
pub const DEFAULT_JWKS_CACHE_CAPACITY: u64 = 1_000;

type SharedFetch = Shared<BoxFuture<'static, Result<Arc<Jwks>>>>;

/// Maps JWKS URIs to key sets and resolves `(uri, kid)` to a key.
pub struct JwksCache {
    /// Cached JWKS per URI, capacity-bounded, replaced whole on refresh.
    jwks: Cache<String, Arc<Jwks>>,
    /// In-flight fetches, at most one per URI.
    pending: Mutex<HashMap<String, SharedFetch>>,
    fetcher: Arc<dyn JwksFetcher>,
    penalty_box: Arc<dyn PenaltyBox>,
}

impl JwksCache {
    /// Create a cache over the given fetcher and penalty box.
    #[must_use]
    pub fn new(fetcher: Arc<dyn JwksFetcher>, penalty_box: Arc<dyn PenaltyBox>) -> Self {
        Self::with_capacity(fetcher, penalty_box, DEFAULT_JWKS_CACHE_CAPACITY)
    }

    /// Create a cache with a custom capacity bound.
    #[must_use]
    pub fn with_capacity(
        fetcher: Arc<dyn JwksFetcher>,
        penalty_box: Arc<dyn PenaltyBox>,
        max_capacity: u64,
    ) -> Self {
        Self {
            jwks: Cache::builder().max_capacity(max_capacity).build(),
            pending: Mutex::new(HashMap::new()),
            fetcher,
            penalty_box,
        }
    }

    /// Insert a JWKS for a URI, replacing any cached one. Idempotent.
    pub fn add_jwks(&self, uri: &str, jwks: Jwks) {
        self.jwks.insert(uri.to_owned(), Arc::new(jwks));
        tracing::debug!(uri, "Seeded JWKS cache");
    }

    /// The cached JWKS for a URI, if any.
    #[must_use]
    pub fn cached_jwks(&self, uri: &str) -> Option<Arc<Jwks>> {
        self.jwks.get(uri)
    }

    /// Fetch the JWKS for a URI and replace the cached one.
    ///
    /// If a fetch for this URI is already pending, its result is shared;
    /// otherwise a fresh fetch is started. On success the cache entry for
    /// the URI is replaced unconditionally; on failure the pending entry
    /// is cleared and the cache is left untouched, and every sharing
    /// caller observes the same error.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Fetch`] on transport failure and
    /// [`VerifyError::JwksValidation`] if the response is not a valid
    /// JWKS.
    pub async fn get_jwks(&self, uri: &str) -> Result<Arc<Jwks>> {
        let fetch = {
            let mut pending = self.pending.lock();
            match pending.get(uri) {
                Some(fetch) => fetch.clone(),
                None => {
                    let fetcher = Arc::clone(&self.fetcher);
                    let target = uri.to_owned();
                    let fetch: SharedFetch = async move {
                        let bytes = fetcher.fetch(&target).await?;
                        Ok(Arc::new(Jwks::parse(&bytes)?))
                    }
                    .boxed()
                    .shared();
                    pending.insert(uri.to_owned(), fetch.clone());
                    fetch
                },
            }
        };

        let result = fetch.clone().await;

        {
            // Clear the pending slot, but only if it still holds this
            // fetch: a slower sharing caller must not evict a newer fetch
            // started after this one completed.
            let mut pending = self.pending.lock();
            if pending.get(uri).is_some_and(|current| current.ptr_eq(&fetch)) {
                pending.remove(uri);
            }
        }

        match &result {
            Ok(jwks) => {
                self.jwks.insert(uri.to_owned(), Arc::clone(jwks));
                tracing::debug!(uri, keys = jwks.keys.len(), "Cached JWKS");
            },
            Err(error) => {
                tracing::warn!(uri, error = %error, "JWKS fetch failed, cache left untouched");
            },
        }
        result
    }

    /// Resolve the token's `kid` against the cached JWKS only. Never
    /// fetches — this is the `verify_sync` path.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::JwksNotInCache`] if the URI has no cached JWKS.
    /// - [`VerifyError::WithoutValidKid`] if the header has no non-empty
    ///   string `kid`.
    /// - [`VerifyError::KidNotFound`] if the cached set lacks the `kid`.
    pub fn get_cached_jwk(&self, uri: &str, jwt: &DecomposedJwt) -> Result<JwkWithKid> {
        let jwks =
            self.jwks.get(uri).ok_or_else(|| VerifyError::JwksNotInCache { uri: uri.to_owned() })?;
        let kid = jwt.header.valid_kid().ok_or(VerifyError::WithoutValidKid)?;
        match jwks.find(kid) {
            Some(jwk) => JwkWithKid::new(jwk.clone()),
            None => Err(VerifyError::KidNotFound { kid: kid.to_owned() }),
        }
    }

    /// Resolve the token's `kid`, refreshing the JWKS on a miss.
    ///
    /// A `kid` miss does not invalidate the cached JWKS — it only
    /// triggers a refresh attempt, gated by the penalty box. After the
    /// refresh the fresh set replaces the cached one unconditionally, and
    /// each concurrent caller runs its own lookup against the shared
    /// result.
    ///
    /// # Errors
    ///
    /// - [`VerifyError::WithoutValidKid`] if the header has no `kid`.
    /// - [`VerifyError::WaitPeriodNotYetEnded`] if the URI is boxed.
    /// - Fetch/validation errors from the refresh.
    /// - [`VerifyError::KidNotFound`] if the fresh set still lacks the
    ///   `kid` (a failed attempt is registered first).
    pub async fn get_jwk(&self, uri: &str, jwt: &DecomposedJwt) -> Result<JwkWithKid> {
        let kid = jwt.header.valid_kid().ok_or(VerifyError::WithoutValidKid)?;

        if let Some(jwks) = self.jwks.get(uri)
            && let Some(jwk) = jwks.find(kid)
        {
            return JwkWithKid::new(jwk.clone());
        }

        self.penalty_box.wait(uri, kid).await?;
        let jwks = self.get_jwks(uri).await?;
        match jwks.find(kid) {
            Some(jwk) => {
                self.penalty_box.register_successful_attempt(uri, kid);
                JwkWithKid::new(jwk.clone())
            },
            None => {
                self.penalty_box.register_failed_attempt(uri, kid);
                Err(VerifyError::KidNotFound { kid: kid.to_owned() })
            },
        }
    }
}

impl std::fmt::Debug for JwksCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JwksCache")
            .field("cached_uris", &self.jwks.entry_count())
            .field("pending_fetches", &self.pending.lock().len())
            .finish()
    }
}
