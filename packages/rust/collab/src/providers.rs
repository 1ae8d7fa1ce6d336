//! Fetch collaborators: interchangeable, stateless producers of raw
//! candidate facts.
//!
//! Every provider answers with the same payload shape ([`RawObservation`]);
//! all source-specific parsing stays behind the collaborator endpoint. The
//! set of providers is closed and registered at startup — a tagged variant
//! per source capability — so arbitration priority stays well-defined.

use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, info, instrument};

use mneprofiler_cache::{CacheKey, CacheStore};
use mneprofiler_normalize::RawObservation;
use mneprofiler_shared::{Enterprise, ProfilerError, Result, RetryConfig, SourceKind};

use crate::retry::{check_status, map_reqwest_err, with_retry};

/// Cache namespace for ticker lookups.
pub const TICKER_NAMESPACE: &str = "tickers";

fn build_http(retry: &RetryConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .timeout(Duration::from_secs(retry.timeout_secs))
        .build()
        .map_err(|e| ProfilerError::config(format!("failed to build HTTP client: {e}")))
}

// ---------------------------------------------------------------------------
// JSON API provider (registry, encyclopedic)
// ---------------------------------------------------------------------------

/// Provider backed by a lookup endpoint
/// (`GET <endpoint>?name=<name>[&country=<hint>]` → [`RawObservation`],
/// 404 when the enterprise is unknown to the source).
pub struct JsonApiProvider {
    kind: SourceKind,
    http: reqwest::Client,
    endpoint: String,
    retry: RetryConfig,
}

impl JsonApiProvider {
    /// Build a provider of `kind` against `endpoint`.
    pub fn new(kind: SourceKind, endpoint: String, retry: RetryConfig) -> Result<Self> {
        Ok(Self {
            kind,
            http: build_http(&retry)?,
            endpoint,
            retry,
        })
    }

    async fn observe_once(&self, enterprise: &Enterprise) -> Result<Option<RawObservation>> {
        let op = self.kind.as_str();
        let mut request = self
            .http
            .get(&self.endpoint)
            .query(&[("name", enterprise.name.as_str())]);
        if let Some(country) = &enterprise.country_hint {
            request = request.query(&[("country", country.as_str())]);
        }

        let response = request.send().await.map_err(|e| map_reqwest_err(op, e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }

        let raw: RawObservation = check_status(op, response)?
            .json()
            .await
            .map_err(|e| map_reqwest_err(op, e))?;
        Ok(Some(raw))
    }

    /// Fetch one observation, retried on transient failure.
    #[instrument(skip_all, fields(source = %self.kind, enterprise = %enterprise.id))]
    pub async fn observe(&self, enterprise: &Enterprise) -> Result<Option<RawObservation>> {
        with_retry(&self.retry, self.kind.as_str(), || {
            self.observe_once(enterprise)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Financial feed provider
// ---------------------------------------------------------------------------

/// Financial feed provider: resolves the ticker symbol first (cached, the
/// lookup is the expensive part), then fetches the quote payload.
pub struct FeedProvider {
    http: reqwest::Client,
    endpoint: String,
    retry: RetryConfig,
    cache: Arc<CacheStore>,
}

#[derive(Deserialize)]
struct TickerResponse {
    ticker: Option<String>,
}

impl FeedProvider {
    /// Build a feed provider. `cache` is the shared ticker namespace store.
    pub fn new(endpoint: String, retry: RetryConfig, cache: Arc<CacheStore>) -> Result<Self> {
        Ok(Self {
            http: build_http(&retry)?,
            endpoint,
            retry,
            cache,
        })
    }

    /// Resolve the ticker for an enterprise, consulting the cache first.
    async fn resolve_ticker(&self, enterprise: &Enterprise) -> Result<Option<String>> {
        if let Some(ticker) = &enterprise.ticker_hint {
            return Ok(Some(ticker.clone()));
        }

        let query = format!("ticker for {}", enterprise.name);
        let key = CacheKey::new(&enterprise.name, "ticker_lookup", &query);

        if let Some(entry) = self.cache.get(&key).await {
            debug!(enterprise = %enterprise.id, "ticker served from cache");
            return Ok(entry.artifact.as_str().map(String::from));
        }

        let ticker = with_retry(&self.retry, "ticker_lookup", || {
            self.lookup_once(&enterprise.name)
        })
        .await?;

        // Negative results are cached too: "no ticker" is also expensive.
        self.cache
            .put(&key, serde_json::json!(ticker.clone()))
            .await?;
        Ok(ticker)
    }

    async fn lookup_once(&self, name: &str) -> Result<Option<String>> {
        let url = format!("{}/search", self.endpoint.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .query(&[("q", name)])
            .send()
            .await
            .map_err(|e| map_reqwest_err("ticker_lookup", e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let parsed: TickerResponse = check_status("ticker_lookup", response)?
            .json()
            .await
            .map_err(|e| map_reqwest_err("ticker_lookup", e))?;
        Ok(parsed.ticker)
    }

    async fn quote_once(&self, ticker: &str) -> Result<Option<RawObservation>> {
        let url = format!("{}/quote/{ticker}", self.endpoint.trim_end_matches('/'));
        let response = self
            .http
            .get(&url)
            .send()
            .await
            .map_err(|e| map_reqwest_err("feed_quote", e))?;
        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let raw: RawObservation = check_status("feed_quote", response)?
            .json()
            .await
            .map_err(|e| map_reqwest_err("feed_quote", e))?;
        Ok(Some(raw))
    }

    /// Fetch one observation: ticker resolution, then the quote.
    #[instrument(skip_all, fields(enterprise = %enterprise.id))]
    pub async fn observe(&self, enterprise: &Enterprise) -> Result<Option<RawObservation>> {
        let Some(ticker) = self.resolve_ticker(enterprise).await? else {
            info!(enterprise = %enterprise.id, "no ticker found, feed has nothing");
            return Ok(None);
        };
        with_retry(&self.retry, "feed_quote", || self.quote_once(&ticker)).await
    }
}

// ---------------------------------------------------------------------------
// Closed provider set
// ---------------------------------------------------------------------------

/// One registered fetch collaborator.
pub enum Provider {
    /// Registry or encyclopedic lookup endpoint.
    Api(JsonApiProvider),
    /// Financial feed with cached ticker resolution.
    Feed(FeedProvider),
}

impl Provider {
    /// The source capability this provider supplies.
    pub fn kind(&self) -> SourceKind {
        match self {
            Provider::Api(p) => p.kind,
            Provider::Feed(_) => SourceKind::FinancialFeed,
        }
    }

    /// Fetch one observation for an enterprise.
    pub async fn observe(&self, enterprise: &Enterprise) -> Result<Option<RawObservation>> {
        match self {
            Provider::Api(p) => p.observe(enterprise).await,
            Provider::Feed(p) => p.observe(enterprise).await,
        }
    }
}

/// Register the configured providers. Sources without an endpoint are
/// simply not registered; their fields stay absent.
pub fn build_providers(
    sources: &mneprofiler_shared::SourcesConfig,
    retry: RetryConfig,
    ticker_cache: Arc<CacheStore>,
) -> Result<Vec<Provider>> {
    let mut providers = Vec::new();

    if let Some(endpoint) = &sources.registry_endpoint {
        providers.push(Provider::Api(JsonApiProvider::new(
            SourceKind::Registry,
            endpoint.clone(),
            retry,
        )?));
    }
    if let Some(endpoint) = &sources.feed_endpoint {
        providers.push(Provider::Feed(FeedProvider::new(
            endpoint.clone(),
            retry,
            ticker_cache,
        )?));
    }
    if let Some(endpoint) = &sources.encyclopedic_endpoint {
        providers.push(Provider::Api(JsonApiProvider::new(
            SourceKind::Encyclopedic,
            endpoint.clone(),
            retry,
        )?));
    }

    info!(providers = providers.len(), "fetch collaborators registered");
    Ok(providers)
}
