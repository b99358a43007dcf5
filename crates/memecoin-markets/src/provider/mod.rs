//! Token Data Provider
//!
//! # Components
//! - `TokenDataProvider`: trait seam consumed by the Market Builder and Resolution Checker
//! - `HttpTokenProvider`: REST client for the token data API
//! - `RateLimitedProvider`: serialises calls to stay under the 1 req/sec ceiling
//!
//! Timeouts belong to the provider; callers treat any `Err` as a cycle failure.

mod client;
pub mod rate_limit;

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::types::{Candle, TokenDetail, TrendingToken};

pub use client::HttpTokenProvider;
pub use rate_limit::RateLimitedProvider;

/// Read-only access to live token metrics
#[async_trait]
pub trait TokenDataProvider: Send + Sync {
    /// Current trending tokens, best-ranked first
    async fn list_trending(&self) -> Result<Vec<TrendingToken>>;

    /// Details for several tokens in one call, keyed by address.
    /// Unknown addresses are simply absent from the map.
    async fn lookup_batch(&self, addresses: &[String]) -> Result<HashMap<String, TokenDetail>>;

    /// Most recent `limit` market-cap candles at `interval` (e.g. "5m"), oldest first
    async fn chart(&self, address: &str, interval: &str, limit: u32) -> Result<Vec<Candle>>;
}

#[async_trait]
impl<P: TokenDataProvider + ?Sized> TokenDataProvider for Arc<P> {
    async fn list_trending(&self) -> Result<Vec<TrendingToken>> {
        (**self).list_trending().await
    }

    async fn lookup_batch(&self, addresses: &[String]) -> Result<HashMap<String, TokenDetail>> {
        (**self).lookup_batch(addresses).await
    }

    async fn chart(&self, address: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        (**self).chart(address, interval, limit).await
    }
}
