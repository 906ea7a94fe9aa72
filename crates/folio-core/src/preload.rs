//! Durable URL preloading
//!
//! After uploads and before the editor is patched, every fresh durable URL is
//! fetched once so the swap from inline to durable source does not flicker.
//! Preloading is best-effort: failures and timeouts are logged, never
//! returned.

use async_trait::async_trait;
use folio_asset::SubstitutionMap;
use moka::future::Cache;
use std::sync::Arc;
use std::time::Duration;

/// Upper bound on remembered URLs
const WARMED_CAPACITY: u64 = 4_096;

/// Why a URL could not be warmed
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PreloadError {
    /// Fetch exceeded its budget
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Server answered with a non-success status
    #[error("http status {0}")]
    Status(u16),

    /// Transport failure
    #[error("network error: {0}")]
    Network(String),
}

/// Something that can fetch a URL ahead of display
#[async_trait]
pub trait UrlWarmer: Send + Sync {
    /// Fetch `url` completely
    async fn warm(&self, url: &str) -> Result<(), PreloadError>;
}

/// Warmer that does nothing (headless sessions, tests)
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopWarmer;

#[async_trait]
impl UrlWarmer for NoopWarmer {
    async fn warm(&self, _url: &str) -> Result<(), PreloadError> {
        Ok(())
    }
}

/// Warmer that issues a GET and drains the body
#[derive(Debug, Clone)]
pub struct HttpWarmer {
    client: reqwest::Client,
}

impl HttpWarmer {
    /// Create warmer with a shared client
    #[must_use]
    pub fn new(client: reqwest::Client) -> Self {
        Self { client }
    }
}

impl Default for HttpWarmer {
    fn default() -> Self {
        Self::new(reqwest::Client::new())
    }
}

#[async_trait]
impl UrlWarmer for HttpWarmer {
    async fn warm(&self, url: &str) -> Result<(), PreloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| PreloadError::Network(e.to_string()))?;
        let status = response.status();
        if !status.is_success() {
            return Err(PreloadError::Status(status.as_u16()));
        }
        response
            .bytes()
            .await
            .map_err(|e| PreloadError::Network(e.to_string()))?;
        Ok(())
    }
}

/// Counts from one preload pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PreloadReport {
    /// URLs fetched successfully
    pub loaded: usize,
    /// URLs that failed or timed out
    pub failed: usize,
    /// URLs warmed recently and skipped
    pub skipped: usize,
}

/// Best-effort, deduplicating preloader
pub struct Preloader {
    warmer: Arc<dyn UrlWarmer>,
    timeout: Duration,
    warmed: Cache<String, ()>,
}

impl Preloader {
    /// Create preloader
    ///
    /// `ttl` is how long a warmed URL is not fetched again.
    #[must_use]
    pub fn new(warmer: Arc<dyn UrlWarmer>, timeout: Duration, ttl: Duration) -> Self {
        Self {
            warmer,
            timeout,
            warmed: Cache::builder()
                .max_capacity(WARMED_CAPACITY)
                .time_to_live(ttl)
                .build(),
        }
    }

    /// Warm every durable URL in the substitutions concurrently
    ///
    /// Completes when each URL has loaded, failed or timed out.
    pub async fn preload(&self, substitutions: &SubstitutionMap) -> PreloadReport {
        let mut report = PreloadReport::default();
        let mut targets = Vec::new();
        for url in substitutions.durable_urls() {
            if self.warmed.contains_key(url) {
                report.skipped += 1;
            } else {
                targets.push(url.to_string());
            }
        }

        let outcomes = futures::future::join_all(targets.into_iter().map(|url| async move {
            let result = match tokio::time::timeout(self.timeout, self.warmer.warm(&url)).await {
                Ok(result) => result,
                Err(_) => Err(PreloadError::Timeout(self.timeout)),
            };
            (url, result)
        }))
        .await;

        for (url, result) in outcomes {
            match result {
                Ok(()) => {
                    self.warmed.insert(url, ()).await;
                    report.loaded += 1;
                }
                Err(error) => {
                    tracing::warn!(url = %url, error = %error, "preload failed");
                    report.failed += 1;
                }
            }
        }
        report
    }
}
