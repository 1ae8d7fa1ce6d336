//! Web search collaborator used to locate annual-report PDFs.

use std::time::Duration;

use serde::Deserialize;
use tracing::{debug, instrument};

use mneprofiler_shared::{ProfilerError, Result, RetryConfig, SearchConfig};

use crate::retry::{check_status, map_reqwest_err, with_retry};

/// One web search hit.
#[derive(Debug, Clone, Deserialize)]
pub struct SearchHit {
    /// Result title.
    pub title: String,
    /// Result URL.
    pub url: String,
    /// Result snippet/description.
    #[serde(default)]
    pub snippet: String,
}

/// Web search capability.
pub trait WebSearcher {
    /// Run one query, returning ranked hits.
    fn search(&self, query: &str) -> impl Future<Output = Result<Vec<SearchHit>>> + Send;
}

/// Searcher backed by a JSON search endpoint
/// (`GET <endpoint>?q=<query>&count=<n>` → `{"results": [...]}`).
pub struct HttpSearcher {
    http: reqwest::Client,
    endpoint: String,
    max_results: usize,
    retry: RetryConfig,
}

#[derive(Deserialize)]
struct SearchResponse {
    results: Vec<SearchHit>,
}

impl HttpSearcher {
    /// Build a searcher from config.
    pub fn new(config: &SearchConfig, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(retry.timeout_secs))
            .build()
            .map_err(|e| ProfilerError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            endpoint: config.endpoint.clone(),
            max_results: config.max_results,
            retry,
        })
    }

    async fn search_once(&self, query: &str) -> Result<Vec<SearchHit>> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("q", query), ("count", &self.max_results.to_string())])
            .send()
            .await
            .map_err(|e| map_reqwest_err("web_search", e))?;

        let parsed: SearchResponse = check_status("web_search", response)?
            .json()
            .await
            .map_err(|e| map_reqwest_err("web_search", e))?;

        Ok(parsed.results)
    }
}

impl WebSearcher for HttpSearcher {
    #[instrument(skip_all, fields(query = %query))]
    async fn search(&self, query: &str) -> Result<Vec<SearchHit>> {
        let mut hits = with_retry(&self.retry, "web_search", || self.search_once(query)).await?;
        hits.truncate(self.max_results);
        debug!(hits = hits.len(), "search complete");
        Ok(hits)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 1,
            timeout_secs: 5,
        }
    }

    #[tokio::test]
    async fn parses_and_truncates_hits() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .and(query_param("q", "acme annual report"))
            .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
                "results": [
                    {"title": "Annual Report 2024", "url": "https://acme.com/ar.pdf", "snippet": "PDF"},
                    {"title": "Acme investor page", "url": "https://acme.com/ir"},
                    {"title": "Third", "url": "https://x.example/3"},
                ]
            })))
            .mount(&server)
            .await;

        let config = SearchConfig {
            endpoint: format!("{}/search", server.uri()),
            max_results: 2,
        };
        let searcher = HttpSearcher::new(&config, retry()).expect("searcher");

        let hits = searcher.search("acme annual report").await.expect("search");
        assert_eq!(hits.len(), 2);
        assert_eq!(hits[0].url, "https://acme.com/ar.pdf");
        assert_eq!(hits[1].snippet, "");
    }

    #[tokio::test]
    async fn rate_limit_is_transient() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(429))
            .mount(&server)
            .await;

        let config = SearchConfig {
            endpoint: format!("{}/search", server.uri()),
            max_results: 5,
        };
        let searcher = HttpSearcher::new(&config, retry()).expect("searcher");

        let err = searcher.search("acme").await.unwrap_err();
        assert!(err.is_transient());
    }
}
