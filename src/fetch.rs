//! Byte sources for encrypted assets and the bounded-retry fetch over them.

use std::path::{Component, Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use async_trait::async_trait;
use tokio::select;
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, trace};

use crate::error::Error;

/// Anything that can hand back the raw bytes behind a locator.
///
/// One call is one attempt; retries belong to [`RetryingFetcher`].
#[async_trait]
pub trait ByteSource: Send + Sync {
    async fn get(&self, locator: &str) -> Result<Vec<u8>>;
}

/// Fetches locators relative to a base URL.
#[derive(Debug, Clone)]
pub struct HttpSource {
    client: reqwest::Client,
    base: reqwest::Url,
}

impl HttpSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self> {
        let mut base = reqwest::Url::parse(base_url)
            .with_context(|| format!("invalid asset base url {base_url}"))?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .context("building http client")?;
        Ok(Self { client, base })
    }
}

#[async_trait]
impl ByteSource for HttpSource {
    async fn get(&self, locator: &str) -> Result<Vec<u8>> {
        let url = self
            .base
            .join(locator.trim_start_matches('/'))
            .with_context(|| format!("invalid locator {locator}"))?;
        let resp = self.client.get(url.clone()).send().await?;
        let status = resp.status();
        if !status.is_success() {
            bail!("GET {url} returned {status}");
        }
        Ok(resp.bytes().await?.to_vec())
    }
}

/// Reads locators as paths below a local directory.
#[derive(Debug, Clone)]
pub struct DirectorySource {
    root: PathBuf,
}

impl DirectorySource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, locator: &str) -> Result<PathBuf> {
        let rel = Path::new(locator);
        if rel
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            bail!("locator escapes the asset root: {locator}");
        }
        Ok(self.root.join(rel))
    }
}

#[async_trait]
impl ByteSource for DirectorySource {
    async fn get(&self, locator: &str) -> Result<Vec<u8>> {
        let path = self.resolve(locator)?;
        tokio::fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Fixed wait between consecutive attempts.
    pub delay: Duration,
    pub max_attempts: u32,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            delay: Duration::from_millis(1000),
            max_attempts: 5,
        }
    }
}

/// A [`ByteSource`] wrapped in a fixed-delay retry policy.
///
/// Cheap to clone; clones share the source.
#[derive(Clone)]
pub struct RetryingFetcher {
    source: Arc<dyn ByteSource>,
    policy: RetryPolicy,
}

impl RetryingFetcher {
    pub fn new(source: Arc<dyn ByteSource>, policy: RetryPolicy) -> Self {
        Self { source, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Fetch `locator`, retrying failed attempts after `policy.delay`.
    ///
    /// Intermediate failures are swallowed; only the last one is reported,
    /// as [`Error::FetchExhausted`]. Cancelling `cancel` abandons the
    /// in-flight attempt or the pending wait with [`Error::FetchCancelled`].
    #[instrument(name = "fetch_with_retries", skip(self, cancel))]
    pub async fn fetch(&self, locator: &str, cancel: &CancellationToken) -> Result<Vec<u8>, Error> {
        let max_attempts = self.policy.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            let res = select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::FetchCancelled(locator.to_string())),
                res = self.source.get(locator) => res,
            };
            match res {
                Ok(bytes) => {
                    trace!(attempt, len = bytes.len(), "fetched");
                    return Ok(bytes);
                }
                Err(err) if attempt >= max_attempts => {
                    return Err(Error::FetchExhausted {
                        locator: locator.to_string(),
                        attempts: attempt,
                        last: format!("{err:#}"),
                    });
                }
                Err(err) => {
                    debug!(attempt, error = %err, "fetch attempt failed; retrying");
                }
            }
            select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::FetchCancelled(locator.to_string())),
                _ = tokio::time::sleep(self.policy.delay) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicU32, Ordering};
    use tokio::time::Instant;

    /// Fails the first `failures` attempts, then serves `b"payload"`.
    struct Flaky {
        failures: u32,
        calls: AtomicU32,
        at: Mutex<Vec<Instant>>,
    }

    impl Flaky {
        fn new(failures: u32) -> Arc<Self> {
            Arc::new(Self {
                failures,
                calls: AtomicU32::new(0),
                at: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl ByteSource for Flaky {
        async fn get(&self, _locator: &str) -> Result<Vec<u8>> {
            self.at.lock().push(Instant::now());
            let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if n <= self.failures {
                bail!("connection reset (attempt {n})");
            }
            Ok(b"payload".to_vec())
        }
    }

    fn fetcher(source: Arc<Flaky>) -> RetryingFetcher {
        RetryingFetcher::new(source, RetryPolicy::default())
    }

    #[tokio::test(start_paused = true)]
    async fn succeeds_on_third_attempt() {
        let source = Flaky::new(2);
        let cancel = CancellationToken::new();
        let bytes = fetcher(source.clone())
            .fetch("ep1/thumbnail-100-200.jpg", &cancel)
            .await
            .unwrap();
        assert_eq!(bytes, b"payload");
        assert_eq!(source.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn does_not_retry_after_success() {
        let source = Flaky::new(0);
        let start = Instant::now();
        fetcher(source.clone())
            .fetch("a.jpg", &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(source.calls.load(Ordering::SeqCst), 1);
        assert_eq!(start.elapsed(), Duration::ZERO);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausts_after_five_spaced_attempts() {
        let source = Flaky::new(u32::MAX);
        let err = fetcher(source.clone())
            .fetch("a.jpg", &CancellationToken::new())
            .await
            .unwrap_err();

        match err {
            Error::FetchExhausted { attempts, last, .. } => {
                assert_eq!(attempts, 5);
                assert!(last.contains("attempt 5"), "last error surfaced: {last}");
            }
            other => panic!("unexpected error {other:?}"),
        }
        let at = source.at.lock();
        assert_eq!(at.len(), 5);
        for pair in at.windows(2) {
            assert!(pair[1] - pair[0] >= Duration::from_millis(1000));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn cancel_during_backoff_stops_retrying() {
        let source = Flaky::new(u32::MAX);
        let cancel = CancellationToken::new();
        let f = fetcher(source.clone());
        let task = tokio::spawn({
            let cancel = cancel.clone();
            async move { f.fetch("a.jpg", &cancel).await }
        });

        tokio::time::sleep(Duration::from_millis(1500)).await;
        cancel.cancel();
        let res = task.await.unwrap();
        assert!(matches!(res, Err(Error::FetchCancelled(_))));

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(source.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn directory_source_reads_below_root_only() {
        let tmp = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(tmp.path().join("ep1")).unwrap();
        std::fs::write(tmp.path().join("ep1").join("001.bin"), b"sealed").unwrap();

        let source = DirectorySource::new(tmp.path());
        assert_eq!(source.get("ep1/001.bin").await.unwrap(), b"sealed");
        assert!(source.get("../etc/passwd").await.is_err());
        assert!(source.get("/etc/passwd").await.is_err());
        assert!(source.get("ep1/missing.bin").await.is_err());
    }
}
