//! Risk score client with TTL cache and graceful degradation
//!
//! Fetches a 0-100 fraud/risk score per principal from the external risk
//! service. The outcome is a tagged result so the audit trail can tell a
//! deliberate operator opt-out (`Disabled`, treated as lowest risk) from a
//! service outage (`Unavailable`, degraded to a neutral medium-risk default).
//! A short-lived per-principal cache bounds call volume to the remote.

use crate::error::{AuthzError, Result};
use crate::types::RiskBucket;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Neutral default used when the risk service is unreachable.
pub const NEUTRAL_SCORE: u8 = 50;

/// Score reported in disabled mode; every principal behaves as lowest-risk.
pub const DISABLED_SCORE: u8 = 100;

/// Hard cap on a single remote score fetch.
pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(2);

/// Default TTL for cached scores.
pub const DEFAULT_SCORE_TTL: Duration = Duration::from_secs(300);

/// Tagged result of a score lookup.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "source", rename_all = "snake_case")]
pub enum RiskOutcome {
    /// The service (or a cached fetch) produced a score.
    Scored { score: u8 },

    /// Risk scoring is switched off for this deployment.
    Disabled,

    /// The service failed or timed out; the neutral default applies.
    Unavailable { default_used: u8 },
}

impl RiskOutcome {
    /// Effective score regardless of source.
    pub fn score(&self) -> u8 {
        match self {
            Self::Scored { score } => *score,
            Self::Disabled => DISABLED_SCORE,
            Self::Unavailable { default_used } => *default_used,
        }
    }

    pub fn bucket(&self) -> RiskBucket {
        RiskBucket::from_score(self.score())
    }
}

/// Remote risk service transport.
#[async_trait]
pub trait RiskService: Send + Sync {
    /// Fetch the current score for a principal. Implementations must return
    /// an error rather than a clamped value for out-of-range scores.
    async fn fetch_score(&self, principal: &str) -> Result<u8>;
}

#[derive(Debug, Deserialize)]
struct ScoreResponse {
    score: i64,
}

/// HTTP transport: `GET {base_url}/score/{principal}` returning `{"score": n}`.
pub struct HttpRiskService {
    client: reqwest::Client,
    base_url: String,
    timeout: Duration,
}

impl HttpRiskService {
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthzError::RiskService(e.to_string()))?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            timeout,
        })
    }
}

#[async_trait]
impl RiskService for HttpRiskService {
    async fn fetch_score(&self, principal: &str) -> Result<u8> {
        let url = format!("{}/score/{}", self.base_url, principal);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    AuthzError::RiskServiceTimeout(self.timeout)
                } else {
                    AuthzError::RiskService(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| AuthzError::RiskService(e.to_string()))?;

        let body: ScoreResponse = response
            .json()
            .await
            .map_err(|e| AuthzError::RiskService(e.to_string()))?;

        u8::try_from(body.score)
            .ok()
            .filter(|s| *s <= 100)
            .ok_or_else(|| {
                AuthzError::RiskService(format!("score {} outside [0,100]", body.score))
            })
    }
}

/// Risk client configuration.
#[derive(Debug, Clone)]
pub struct RiskConfig {
    pub mode: RiskMode,

    /// TTL for cached scores.
    pub cache_ttl: Duration,

    /// Hard cap on a single remote fetch.
    pub fetch_timeout: Duration,
}

/// Explicit operator choice, not a silent failure path.
#[derive(Debug, Clone)]
pub enum RiskMode {
    Enabled { base_url: String },
    Disabled,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            mode: RiskMode::Disabled,
            cache_ttl: DEFAULT_SCORE_TTL,
            fetch_timeout: DEFAULT_FETCH_TIMEOUT,
        }
    }
}

#[derive(Clone)]
struct CachedScore {
    score: u8,
    fetched_at: Instant,
}

/// Score client with per-principal TTL cache.
pub struct RiskScoreClient {
    service: Option<Arc<dyn RiskService>>,
    cache: DashMap<String, CachedScore>,
    ttl: Duration,
}

impl RiskScoreClient {
    pub fn new(config: RiskConfig) -> Result<Self> {
        let service: Option<Arc<dyn RiskService>> = match &config.mode {
            RiskMode::Enabled { base_url } => Some(Arc::new(HttpRiskService::new(
                base_url.clone(),
                config.fetch_timeout,
            )?)),
            RiskMode::Disabled => None,
        };

        Ok(Self {
            service,
            cache: DashMap::new(),
            ttl: config.cache_ttl,
        })
    }

    /// Client over a custom transport, for non-HTTP deployments and tests.
    pub fn with_service(service: Arc<dyn RiskService>, ttl: Duration) -> Self {
        Self { service: Some(service), cache: DashMap::new(), ttl }
    }

    /// Client in disabled mode.
    pub fn disabled() -> Self {
        Self { service: None, cache: DashMap::new(), ttl: DEFAULT_SCORE_TTL }
    }

    /// Current score for a principal, served from cache when fresh.
    ///
    /// Fetch failures are not cached, so the remote is retried on the next
    /// request rather than pinning the neutral default for a full TTL.
    pub async fn score_for(&self, principal: &str) -> RiskOutcome {
        let Some(service) = &self.service else {
            return RiskOutcome::Disabled;
        };

        if let Some(entry) = self.cache.get(principal) {
            if entry.fetched_at.elapsed() <= self.ttl {
                return RiskOutcome::Scored { score: entry.score };
            }
            drop(entry);
            self.cache.remove(principal);
        }

        match service.fetch_score(principal).await {
            Ok(score) => {
                debug!(principal, score, "fetched risk score");
                self.cache.insert(
                    principal.to_string(),
                    CachedScore { score, fetched_at: Instant::now() },
                );
                RiskOutcome::Scored { score }
            }
            Err(e) => {
                warn!(principal, error = %e, "risk service unavailable, using neutral default");
                RiskOutcome::Unavailable { default_used: NEUTRAL_SCORE }
            }
        }
    }

    /// Drop the cached score for exactly one principal (e.g. after a fraud
    /// event), forcing a fresh fetch on the next request.
    pub fn invalidate(&self, principal: &str) {
        self.cache.remove(principal);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingService {
        score: u8,
        calls: AtomicUsize,
    }

    impl CountingService {
        fn new(score: u8) -> Self {
            Self { score, calls: AtomicUsize::new(0) }
        }
    }

    #[async_trait]
    impl RiskService for CountingService {
        async fn fetch_score(&self, _principal: &str) -> Result<u8> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.score)
        }
    }

    struct BrokenService;

    #[async_trait]
    impl RiskService for BrokenService {
        async fn fetch_score(&self, _principal: &str) -> Result<u8> {
            Err(AuthzError::RiskService("503 service unavailable".into()))
        }
    }

    #[tokio::test]
    async fn test_disabled_mode_is_lowest_risk() {
        let client = RiskScoreClient::disabled();
        let outcome = client.score_for("user:alice").await;
        assert_eq!(outcome, RiskOutcome::Disabled);
        assert_eq!(outcome.score(), DISABLED_SCORE);
        assert_eq!(outcome.bucket(), RiskBucket::VeryLow);
    }

    #[tokio::test]
    async fn test_scores_are_cached_within_ttl() {
        let service = Arc::new(CountingService::new(85));
        let client = RiskScoreClient::with_service(service.clone(), Duration::from_secs(60));

        assert_eq!(client.score_for("user:alice").await, RiskOutcome::Scored { score: 85 });
        assert_eq!(client.score_for("user:alice").await, RiskOutcome::Scored { score: 85 });
        assert_eq!(service.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_ttl_expiry_refetches() {
        let service = Arc::new(CountingService::new(85));
        let client = RiskScoreClient::with_service(service.clone(), Duration::from_millis(20));

        client.score_for("user:alice").await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        client.score_for("user:alice").await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_invalidate_removes_exactly_one_principal() {
        let service = Arc::new(CountingService::new(85));
        let client = RiskScoreClient::with_service(service.clone(), Duration::from_secs(60));

        client.score_for("user:alice").await;
        client.score_for("user:bob").await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 2);

        client.invalidate("user:alice");
        client.score_for("user:alice").await;
        client.score_for("user:bob").await;
        assert_eq!(service.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_unavailable_degrades_to_neutral() {
        let client =
            RiskScoreClient::with_service(Arc::new(BrokenService), Duration::from_secs(60));
        let outcome = client.score_for("user:alice").await;
        assert_eq!(outcome, RiskOutcome::Unavailable { default_used: NEUTRAL_SCORE });
        assert_eq!(outcome.bucket(), RiskBucket::Medium);
    }

    #[tokio::test]
    async fn test_failures_are_not_cached() {
        struct FlakyService {
            calls: AtomicUsize,
        }

        #[async_trait]
        impl RiskService for FlakyService {
            async fn fetch_score(&self, _principal: &str) -> Result<u8> {
                if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                    Err(AuthzError::RiskService("flaky".into()))
                } else {
                    Ok(92)
                }
            }
        }

        let client = RiskScoreClient::with_service(
            Arc::new(FlakyService { calls: AtomicUsize::new(0) }),
            Duration::from_secs(60),
        );

        assert!(matches!(
            client.score_for("user:alice").await,
            RiskOutcome::Unavailable { .. }
        ));
        assert_eq!(client.score_for("user:alice").await, RiskOutcome::Scored { score: 92 });
    }

    #[tokio::test]
    async fn test_http_timeout_reports_configured_duration() {
        use tokio::io::AsyncReadExt;
        use tokio::net::TcpListener;

        // Accepts connections but never answers, so the request times out.
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            loop {
                let (mut socket, _) = match listener.accept().await {
                    Ok(pair) => pair,
                    Err(_) => return,
                };
                tokio::spawn(async move {
                    let mut buf = [0u8; 1024];
                    while socket.read(&mut buf).await.is_ok() {
                        tokio::time::sleep(Duration::from_secs(60)).await;
                    }
                });
            }
        });

        let timeout = Duration::from_millis(100);
        let service = HttpRiskService::new(format!("http://{addr}"), timeout).unwrap();

        let err = service.fetch_score("user:alice").await.unwrap_err();
        assert!(
            matches!(err, AuthzError::RiskServiceTimeout(d) if d == timeout),
            "expected timeout error carrying the configured duration, got: {err}"
        );
    }

    #[tokio::test]
    async fn test_http_service_unreachable_host() {
        // Nothing listens on this port; the client must degrade, not panic.
        let service =
            HttpRiskService::new("http://127.0.0.1:1", Duration::from_millis(200)).unwrap();
        let client = RiskScoreClient::with_service(Arc::new(service), Duration::from_secs(60));
        assert!(matches!(
            client.score_for("user:alice").await,
            RiskOutcome::Unavailable { .. }
        ));
    }
}
