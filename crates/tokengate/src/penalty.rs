//! Per-URI back-off gate against JWKS endpoint flooding.
//!
//! When a token arrives with a `kid` that is absent even after a JWKS
//! refresh, an attacker may be probing: every unknown `kid` would
//! otherwise translate into a fetch against the issuer's endpoint. The
//! penalty box bounds that amplification to at most one fetch per wait
//! period per URI.
//!
//! [`PenaltyBox::wait`] fails immediately with
//! [`VerifyError::WaitPeriodNotYetEnded`] while a URI is boxed — it never
//! blocks. Real waiting (user retry, retry middleware) happens upstream.

use std::{
    collections::HashMap,
    time::{Duration, Instant},
};

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::error::{Result, VerifyError};

/// Default back-off period after a failed key lookup.
pub const DEFAULT_WAIT_PERIOD: Duration = Duration::from_secs(10);

/// Cooperative back-off gate, keyed by JWKS URI.
///
/// `kid` is passed through so custom implementations can key on it as
/// well; the default implementation is keyed by URI only.
#[async_trait]
pub trait PenaltyBox: Send + Sync {
    /// Fail fast if `jwks_uri` is currently in its back-off period.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::WaitPeriodNotYetEnded`] while the URI is
    /// boxed.
    async fn wait(&self, jwks_uri: &str, kid: &str) -> Result<()>;

    /// Record that a key lookup against a freshly fetched JWKS failed,
    /// starting the back-off period for `jwks_uri`.
    fn register_failed_attempt(&self, jwks_uri: &str, kid: &str);

    /// Record a successful key lookup, releasing `jwks_uri` immediately.
    fn register_successful_attempt(&self, jwks_uri: &str, kid: &str);
}

/// Default [`PenaltyBox`] implementation.
///
/// Keeps a release deadline per boxed URI and releases lazily once the
/// deadline passes. There is no background timer thread: deadlines are
/// compared against the monotonic clock on access, so an idle process is
/// never kept alive by pending back-off state.
pub struct TimedPenaltyBox {
    wait_period: Duration,
    waiting: Mutex<HashMap<String, Instant>>,
}

impl TimedPenaltyBox {
    /// Create a penalty box with the given back-off period.
    #[must_use]
    pub fn new(wait_period: Duration) -> Self {
        Self { wait_period, waiting: Mutex::new(HashMap::new()) }
    }

    /// Number of URIs currently boxed (expired entries included until
    /// their next access).
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.waiting.lock().len()
    }
}

impl Default for TimedPenaltyBox {
    fn default() -> Self {
        Self::new(DEFAULT_WAIT_PERIOD)
    }
}

impl std::fmt::Debug for TimedPenaltyBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimedPenaltyBox")
            .field("wait_period", &self.wait_period)
            .field("waiting", &self.waiting_count())
            .finish()
    }
}

#[async_trait]
impl PenaltyBox for TimedPenaltyBox {
    async fn wait(&self, jwks_uri: &str, _kid: &str) -> Result<()> {
        let mut waiting = self.waiting.lock();
        match waiting.get(jwks_uri) {
            Some(release_at) if Instant::now() < *release_at => {
                Err(VerifyError::WaitPeriodNotYetEnded { uri: jwks_uri.to_owned() })
            },
            Some(_) => {
                // Deadline passed; the entry releases itself.
                waiting.remove(jwks_uri);
                Ok(())
            },
            None => Ok(()),
        }
    }

    fn register_failed_attempt(&self, jwks_uri: &str, kid: &str) {
        let release_at = Instant::now() + self.wait_period;
        self.waiting.lock().insert(jwks_uri.to_owned(), release_at);
        tracing::warn!(
            uri = jwks_uri,
            kid,
            wait_seconds = self.wait_period.as_secs(),
            "Key lookup failed after refresh, boxing JWKS URI"
        );
    }

    fn register_successful_attempt(&self, jwks_uri: &str, _kid: &str) {
        self.waiting.lock().remove(jwks_uri);
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::panic)]
mod tests {
    use super::*;

    const URI: &str = "https://issuer.example/.well-known/jwks.json";

    #[tokio::test]
    async fn test_wait_passes_when_not_boxed() {
        let penalty_box = TimedPenaltyBox::default();
        assert!(penalty_box.wait(URI, "k1").await.is_ok());
    }

    #[tokio::test]
    async fn test_wait_fails_fast_after_failed_attempt() {
        let penalty_box = TimedPenaltyBox::default();
        penalty_box.register_failed_attempt(URI, "unknown");

        let result = penalty_box.wait(URI, "unknown").await;
        assert!(
            matches!(result, Err(VerifyError::WaitPeriodNotYetEnded { ref uri }) if uri == URI)
        );
    }

    #[tokio::test]
    async fn test_successful_attempt_releases_immediately() {
        let penalty_box = TimedPenaltyBox::default();
        penalty_box.register_failed_attempt(URI, "unknown");
        penalty_box.register_successful_attempt(URI, "k1");

        assert!(penalty_box.wait(URI, "k1").await.is_ok());
        assert_eq!(penalty_box.waiting_count(), 0);
    }

    #[tokio::test]
    async fn test_release_on_deadline_expiry() {
        let penalty_box = TimedPenaltyBox::new(Duration::from_millis(30));
        penalty_box.register_failed_attempt(URI, "unknown");
        assert!(penalty_box.wait(URI, "unknown").await.is_err());

        tokio::time::sleep(Duration::from_millis(60)).await;

        assert!(penalty_box.wait(URI, "unknown").await.is_ok());
        assert_eq!(penalty_box.waiting_count(), 0, "expired entry must release itself");
    }

    #[tokio::test]
    async fn test_state_keyed_by_uri_only() {
        let penalty_box = TimedPenaltyBox::default();
        penalty_box.register_failed_attempt(URI, "kid-a");

        // A different kid on the same URI is still boxed.
        assert!(penalty_box.wait(URI, "kid-b").await.is_err());
        // A different URI is unaffected.
        assert!(penalty_box.wait("https://other.example/jwks.json", "kid-a").await.is_ok());
    }

    #[tokio::test]
    async fn test_repeat_failure_extends_deadline() {
        let penalty_box = TimedPenaltyBox::new(Duration::from_millis(50));
        penalty_box.register_failed_attempt(URI, "a");
        tokio::time::sleep(Duration::from_millis(30)).await;
        penalty_box.register_failed_attempt(URI, "b");
        tokio::time::sleep(Duration::from_millis(30)).await;

        // 60ms after the first failure but only 30ms after the second: the
        // deadline was re-armed by the later failure.
        assert!(penalty_box.wait(URI, "c").await.is_err());
    }
}
