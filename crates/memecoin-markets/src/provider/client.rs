//! Token data REST client
//!
//! # Endpoints
//! - GET  /tokens/trending - Trending tokens, best-ranked first
//! - POST /tokens/multi - Batched token lookup, body `{"tokens": [...]}`
//! - GET  /chart/{address}?type={interval}&limit={limit}&marketCap=true - OHLCV history
//!
//! Authentication is an optional `x-api-key` header.

use std::collections::HashMap;

use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};
use url::Url;

use super::TokenDataProvider;
use crate::config::ProviderCredentials;
use crate::types::{Candle, TokenDetail, TrendingToken};
use crate::DEFAULT_TOKEN_API_BASE;

#[derive(Serialize)]
struct MultiTokenRequest<'a> {
    tokens: &'a [String],
}

#[derive(Deserialize)]
struct ChartResponse {
    #[serde(default)]
    oclhv: Vec<Candle>,
}

/// REST client for the token data API
#[derive(Clone)]
pub struct HttpTokenProvider {
    client: Client,
    base_url: String,
    credentials: Option<ProviderCredentials>,
}

impl HttpTokenProvider {
    /// Create a new client with the default base URL and no API key
    pub fn new() -> Result<Self> {
        Self::with_base_url(DEFAULT_TOKEN_API_BASE, None)
    }

    /// Create a new client with a custom base URL
    pub fn with_base_url(base_url: &str, credentials: Option<ProviderCredentials>) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self { client, base_url: base_url.trim_end_matches('/').to_string(), credentials })
    }

    fn url(&self, path: &str) -> Result<Url> {
        Url::parse(&format!("{}{}", self.base_url, path))
            .with_context(|| format!("Invalid provider URL for path {}", path))
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.credentials {
            Some(creds) if creds.is_valid() => request.header("x-api-key", &creds.api_key),
            _ => request,
        }
    }

    /// Map non-2xx responses to errors, keeping status and body for the operator
    async fn check_status(response: Response, url: &Url) -> Result<Response> {
        let status = response.status();
        if status == StatusCode::TOO_MANY_REQUESTS {
            anyhow::bail!("Rate limited by token provider (HTTP 429) for {}", url);
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("HTTP {} for {}: {}", status, url, body);
        }
        Ok(response)
    }

    /// Test connectivity to the provider
    pub async fn test_connectivity(&self) -> Result<()> {
        info!("Testing connectivity to {}", self.base_url);
        let url = self.url("/tokens/trending")?;
        let response = self.authorize(self.client.get(url.clone())).send().await.context("Connection test failed")?;
        info!("Token provider connectivity test: HTTP {}", response.status());
        Self::check_status(response, &url).await?;
        Ok(())
    }
}

#[async_trait]
impl TokenDataProvider for HttpTokenProvider {
    async fn list_trending(&self) -> Result<Vec<TrendingToken>> {
        let url = self.url("/tokens/trending")?;
        debug!("GET {}", url);

        let response = self.authorize(self.client.get(url.clone())).send().await.context("HTTP request failed")?;
        let response = Self::check_status(response, &url).await?;

        let tokens: Vec<TrendingToken> = response.json().await.context("Failed to parse trending token list")?;
        Ok(tokens)
    }

    async fn lookup_batch(&self, addresses: &[String]) -> Result<HashMap<String, TokenDetail>> {
        if addresses.is_empty() {
            return Ok(HashMap::new());
        }

        let url = self.url("/tokens/multi")?;
        debug!("POST {} ({} tokens)", url, addresses.len());

        let request = self.client.post(url.clone()).json(&MultiTokenRequest { tokens: addresses });
        let response = self.authorize(request).send().await.context("HTTP request failed")?;
        let response = Self::check_status(response, &url).await?;

        let details: HashMap<String, TokenDetail> =
            response.json().await.context("Failed to parse token lookup response")?;
        Ok(details)
    }

    async fn chart(&self, address: &str, interval: &str, limit: u32) -> Result<Vec<Candle>> {
        let mut url = self.url(&format!("/chart/{}", address))?;
        url.query_pairs_mut()
            .append_pair("type", interval)
            .append_pair("limit", &limit.to_string())
            .append_pair("marketCap", "true");
        debug!("GET {}", url);

        let response = self.authorize(self.client.get(url.clone())).send().await.context("HTTP request failed")?;
        let response = Self::check_status(response, &url).await?;

        let chart: ChartResponse = response.json().await.context("Failed to parse chart response")?;
        let mut candles = chart.oclhv;
        candles.sort_by_key(|c| c.time);
        Ok(candles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MINT: &str = "7GCihgDB8fe6KNjn2MYtkzZcRjQy3t9GHdC8uHYmW2hr";

    #[test]
    fn test_custom_base_url() {
        let client = HttpTokenProvider::with_base_url("https://example.com/", None).unwrap();
        assert_eq!(client.base_url, "https://example.com");
    }

    #[tokio::test]
    async fn test_list_trending() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokens/trending"))
            .and(header("x-api-key", "secret-key"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!([
                {
                    "address": MINT,
                    "name": "Popcat",
                    "symbol": "POPCAT",
                    "marketCap": 300000,
                    "volume24h": 45000,
                    "holders": 812,
                    "createdAt": 1704067200000i64
                }
            ])))
            .mount(&server)
            .await;

        let creds = ProviderCredentials { api_key: "secret-key".to_string() };
        let client = HttpTokenProvider::with_base_url(&server.uri(), Some(creds)).unwrap();
        let tokens = client.list_trending().await.unwrap();

        assert_eq!(tokens.len(), 1);
        assert_eq!(tokens[0].name, "Popcat");
        assert_eq!(tokens[0].market_cap, 300_000.0);
        assert!(tokens[0].image.is_none());
    }

    #[tokio::test]
    async fn test_lookup_batch_posts_addresses() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/tokens/multi"))
            .and(body_json(serde_json::json!({ "tokens": [MINT] })))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                MINT: { "address": MINT, "marketCap": 810000.0, "volume24h": 1.0, "holders": 950 }
            })))
            .mount(&server)
            .await;

        let client = HttpTokenProvider::with_base_url(&server.uri(), None).unwrap();
        let details = client.lookup_batch(&[MINT.to_string()]).await.unwrap();
        assert_eq!(details[MINT].holders, 950);
    }

    #[tokio::test]
    async fn test_lookup_batch_empty_skips_request() {
        // No mock mounted: any request would fail with 404
        let server = MockServer::start().await;
        let client = HttpTokenProvider::with_base_url(&server.uri(), None).unwrap();
        assert!(client.lookup_batch(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_chart_sorted_oldest_first() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(format!("/chart/{}", MINT)))
            .and(query_param("type", "5m"))
            .and(query_param("limit", "3"))
            .and(query_param("marketCap", "true"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "oclhv": [
                    { "open": 2.0, "close": 2.0, "low": 1.0, "high": 3.0, "volume": 5.0, "time": 1704067500 },
                    { "open": 1.0, "close": 2.0, "low": 1.0, "high": 2.0, "volume": 5.0, "time": 1704067200 }
                ]
            })))
            .mount(&server)
            .await;

        let client = HttpTokenProvider::with_base_url(&server.uri(), None).unwrap();
        let candles = client.chart(MINT, "5m", 3).await.unwrap();
        assert_eq!(candles.len(), 2);
        assert!(candles[0].time < candles[1].time);
    }

    #[tokio::test]
    async fn test_rate_limit_status_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokens/trending"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let client = HttpTokenProvider::with_base_url(&server.uri(), None).unwrap();
        let err = client.list_trending().await.unwrap_err();
        assert!(err.to_string().contains("Rate limited"));
    }

    #[tokio::test]
    async fn test_malformed_body_is_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/tokens/trending"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = HttpTokenProvider::with_base_url(&server.uri(), None).unwrap();
        assert!(client.list_trending().await.is_err());
    }
}
