//! Call spacing for the token data provider
//!
//! The upstream API allows one request per second. Every call goes through a
//! single async mutex and waits until `min_interval` has passed since the
//! previous call started, so calls within a cycle are strictly sequential.

use std::collections::HashMap;
use std::time::Duration;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::debug;

use super::TokenDataProvider;
use crate::types::{Candle, TokenDetail, TrendingToken};

/// Default spacing between provider calls
pub const DEFAULT_MIN_INTERVAL: Duration = Duration::from_millis(1000);

/// Wraps a provider and serialises its calls with a minimum spacing
pub struct RateLimitedProvider<P> {
    inner: P,
    min_interval: Duration,
    last_call: Mutex<Option<Instant>>,
}

impl<P: TokenDataProvider> RateLimitedProvider<P> {
    pub fn new(inner: P) -> Self {
        Self::with_interval(inner, DEFAULT_MIN_INTERVAL)
    }

    pub fn with_interval(inner: P, min_interval: Duration) -> Self {
        Self { inner, min_interval, last_call: Mutex::new(None) }
    }

    pub fn inner(&self) -> &P {
        &self.inner
    }

    /// Hold the slot while the call runs so no two calls overlap
    async fn throttled<T, F>(&self, name: &str, call: F) -> Result<T>
    where
        F: std::future::Future<Output = Result<T>>,
    {
        let mut last = self.last_call.lock().await;
        if let Some(prev) = *last {
            let ready_at = prev + self.min_interval;
            if ready_at > Instant::now() {
                debug!("Provider rate limit: delaying {} by {:?}", name, ready_at - Instant::now());
                tokio::time::sleep_until(ready_at).await;
            }
        }
        *last = Some(Instant::now());
        call.await
    }
}

#[async_trait]
impl<P: TokenDataProvider> TokenDataProvider for RateLimitedProvider<P> {
    async fn list_trending(&self) -> Result<Vec<TrendingToken>> {
        self.throttled("list_trending", self.inner.list_trending()).await
    }

    async fn lookup_batch(&self, addresses: &[String]) -> Result<HashMap<String, TokenDetail>> {
        self.throttled("lookup_batch", self.inner.lookup_batch(addresses)).await
    }

    async fn chart(&self, address: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        self.throttled("chart", self.inner.chart(address, interval, limit)).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingProvider {
        calls: StdMutex<Vec<Instant>>,
    }

    #[async_trait]
    impl TokenDataProvider for RecordingProvider {
        async fn list_trending(&self) -> Result<Vec<TrendingToken>> {
            self.calls.lock().unwrap().push(Instant::now());
            Ok(Vec::new())
        }

        async fn lookup_batch(&self, _addresses: &[String]) -> Result<HashMap<String, TokenDetail>> {
            self.calls.lock().unwrap().push(Instant::now());
            Ok(HashMap::new())
        }

        async fn chart(&self, _address: &str, _interval: &str, _limit: u32) -> Result<Vec<Candle>> {
            self.calls.lock().unwrap().push(Instant::now());
            anyhow::bail!("chart unavailable")
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_calls_are_spaced() {
        let provider = RateLimitedProvider::new(RecordingProvider::default());

        provider.list_trending().await.unwrap();
        provider.lookup_batch(&["a".to_string()]).await.unwrap();
        let _ = provider.chart("a", "5m", 10).await;

        let calls = provider.inner().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 3);
        for pair in calls.windows(2) {
            assert!(pair[1] - pair[0] >= DEFAULT_MIN_INTERVAL);
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrent_calls_are_serialised() {
        let provider = Arc::new(RateLimitedProvider::with_interval(
            RecordingProvider::default(),
            Duration::from_millis(500),
        ));

        let a = tokio::spawn({
            let p = provider.clone();
            async move { p.list_trending().await }
        });
        let b = tokio::spawn({
            let p = provider.clone();
            async move { p.list_trending().await }
        });
        a.await.unwrap().unwrap();
        b.await.unwrap().unwrap();

        let calls = provider.inner().calls.lock().unwrap().clone();
        assert_eq!(calls.len(), 2);
        assert!(calls[1] - calls[0] >= Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn test_errors_pass_through() {
        let provider = RateLimitedProvider::new(RecordingProvider::default());
        let err = provider.chart("a", "5m", 1).await.unwrap_err();
        assert!(err.to_string().contains("chart unavailable"));
    }
}
