//! Annual-report resolution: cache-backed search for the one PDF worth
//! extracting from.
//!
//! Resolution order: cache namespace `reports` → web search → probe each
//! hit for an actually-servable PDF → ask the constrained picker to choose
//! among the verified URLs. The picker can only select a URL the probe
//! verified; a malformed or failed pick falls back to the first verified
//! hit. Winners are cached so the search/LLM cost is paid once per
//! enterprise.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use mneprofiler_cache::{CacheKey, CacheStore};
use mneprofiler_shared::{Enterprise, ProfilerError, Result, RetryConfig};

use crate::websearch::{SearchHit, WebSearcher};

/// Cache namespace for resolved report URLs.
pub const REPORT_NAMESPACE: &str = "reports";

/// Years mentioned in a hit title/snippet.
static YEAR_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\b(19|20)\d{2}\b").expect("valid year regex"));

/// Constrained selection capability over verified report URLs.
pub trait ReportPicker {
    /// Pick one URL from the verified candidates.
    fn pick_url(
        &self,
        enterprise_name: &str,
        urls: &[String],
    ) -> impl Future<Output = Result<String>> + Send;
}

impl ReportPicker for crate::llm::LlmClient {
    async fn pick_url(&self, enterprise_name: &str, urls: &[String]) -> Result<String> {
        self.pick_report_url(enterprise_name, urls).await
    }
}

/// A resolved annual report, as cached and handed to extraction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedReport {
    /// Verified PDF URL.
    pub url: String,
    /// Reference year read from the search hit, when stated.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// Cache-backed annual-report resolver.
pub struct ReportResolver<'a, S, P> {
    searcher: &'a S,
    picker: &'a P,
    cache: &'a CacheStore,
    http: reqwest::Client,
}

impl<'a, S: WebSearcher, P: ReportPicker> ReportResolver<'a, S, P> {
    /// Build a resolver sharing the `reports` cache namespace store.
    pub fn new(
        searcher: &'a S,
        picker: &'a P,
        cache: &'a CacheStore,
        retry: RetryConfig,
    ) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(retry.timeout_secs))
            .build()
            .map_err(|e| ProfilerError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            searcher,
            picker,
            cache,
            http,
        })
    }

    /// Resolve the annual-report PDF for one enterprise.
    ///
    /// `website` narrows the search to the company's own domain when known.
    /// Returns `None` when no verifiable PDF exists — that is a data gap,
    /// not an error.
    #[instrument(skip_all, fields(enterprise = %enterprise.id))]
    pub async fn resolve(
        &self,
        enterprise: &Enterprise,
        website: Option<&str>,
    ) -> Result<Option<ResolvedReport>> {
        let site = website
            .and_then(host_of)
            .map(|host| format!(" site:{host}"))
            .unwrap_or_default();
        let query = format!(
            "{} annual report (2024 OR 2023) filetype:pdf{site}",
            enterprise.name
        );
        let key = CacheKey::new(&enterprise.name, "report_search", &query);

        if let Some(entry) = self.cache.get(&key).await {
            if let Ok(report) = serde_json::from_value::<ResolvedReport>(entry.artifact.clone()) {
                debug!(enterprise = %enterprise.id, url = %report.url, "report served from cache");
                return Ok(Some(report));
            }
            warn!(enterprise = %enterprise.id, "unreadable cache artifact, re-resolving");
        }

        let hits = self.searcher.search(&query).await?;
        let mut verified: Vec<&SearchHit> = Vec::new();
        for hit in &hits {
            if self.is_servable_pdf(&hit.url).await {
                verified.push(hit);
            }
        }
        if verified.is_empty() {
            info!(enterprise = %enterprise.id, hits = hits.len(), "no verifiable report PDF");
            return Ok(None);
        }

        let urls: Vec<String> = verified.iter().map(|h| h.url.clone()).collect();
        let picked_url = match self.picker.pick_url(&enterprise.name, &urls).await {
            Ok(reply) => {
                let cleaned = reply.trim().trim_matches('"').to_string();
                if urls.contains(&cleaned) {
                    cleaned
                } else {
                    warn!(
                        reply = %reply,
                        fallback = %urls[0],
                        "picker chose a URL outside the verified set, using first hit"
                    );
                    urls[0].clone()
                }
            }
            Err(e)
                if matches!(
                    e,
                    ProfilerError::Transient { .. } | ProfilerError::Malformed { .. }
                ) =>
            {
                warn!(error = %e, fallback = %urls[0], "picker failed, using first hit");
                urls[0].clone()
            }
            Err(e) => return Err(e),
        };

        let picked_hit = verified
            .iter()
            .find(|h| h.url == picked_url)
            .unwrap_or(&verified[0]);
        let report = ResolvedReport {
            url: picked_url,
            year: latest_year(&format!("{} {}", picked_hit.title, picked_hit.snippet)),
        };

        self.cache
            .put(&key, serde_json::to_value(&report).unwrap_or_default())
            .await?;
        info!(enterprise = %enterprise.id, url = %report.url, year = ?report.year, "report resolved");
        Ok(Some(report))
    }

    /// Probe a URL: does it answer 200 with a PDF content type?
    /// Any failure counts as "not a usable report", never an error.
    async fn is_servable_pdf(&self, url: &str) -> bool {
        match self.http.get(url).send().await {
            Ok(response) => {
                response.status().is_success()
                    && response
                        .headers()
                        .get(reqwest::header::CONTENT_TYPE)
                        .and_then(|v| v.to_str().ok())
                        .is_some_and(|ct| ct.starts_with("application/pdf"))
            }
            Err(e) => {
                debug!(url = %url, error = %e, "PDF probe failed");
                false
            }
        }
    }
}

/// Latest plausible year mentioned in a text.
fn latest_year(text: &str) -> Option<i32> {
    YEAR_RE
        .find_iter(text)
        .filter_map(|m| m.as_str().parse::<i32>().ok())
        .max()
}

/// Host part of a canonical website URL, for `site:` narrowing.
fn host_of(website: &str) -> Option<String> {
    url::Url::parse(website)
        .ok()?
        .host_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    struct StubSearcher {
        hits: Vec<SearchHit>,
    }

    impl WebSearcher for StubSearcher {
        async fn search(&self, _query: &str) -> Result<Vec<SearchHit>> {
            Ok(self.hits.clone())
        }
    }

    enum StubPicker {
        Reply(String),
        Malformed,
    }

    impl ReportPicker for StubPicker {
        async fn pick_url(&self, _name: &str, _urls: &[String]) -> Result<String> {
            match self {
                StubPicker::Reply(s) => Ok(s.clone()),
                StubPicker::Malformed => Err(ProfilerError::malformed("no completion")),
            }
        }
    }

    fn retry() -> RetryConfig {
        RetryConfig {
            max_attempts: 2,
            initial_backoff_ms: 1,
            timeout_secs: 5,
        }
    }

    fn enterprise() -> Enterprise {
        Enterprise {
            id: "MNE001".into(),
            name: "Acme Corp".into(),
            country_hint: None,
            ticker_hint: None,
        }
    }

    async fn pdf_server() -> MockServer {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/ar.pdf"))
            .respond_with(
                ResponseTemplate::new(200)
                    .insert_header("content-type", "application/pdf")
                    .set_body_bytes(b"%PDF-1.7".to_vec()),
            )
            .mount(&server)
            .await;
        Mock::given(method("GET"))
            .and(path("/ir.html"))
            .respond_with(
                ResponseTemplate::new(200).insert_header("content-type", "text/html"),
            )
            .mount(&server)
            .await;
        server
    }

    fn hits_for(server: &MockServer) -> Vec<SearchHit> {
        vec![
            SearchHit {
                title: "Acme investor relations".into(),
                url: format!("{}/ir.html", server.uri()),
                snippet: "HTML page".into(),
            },
            SearchHit {
                title: "Acme Annual Report 2024".into(),
                url: format!("{}/ar.pdf", server.uri()),
                snippet: "Full year 2024 results".into(),
            },
        ]
    }

    #[tokio::test]
    async fn only_verified_pdfs_are_offered_and_cached() {
        let server = pdf_server().await;
        let searcher = StubSearcher {
            hits: hits_for(&server),
        };
        let pdf_url = format!("{}/ar.pdf", server.uri());
        let picker = StubPicker::Reply(pdf_url.clone());

        let dir = tempfile::tempdir().expect("tempdir");
        let cache = CacheStore::open_namespace(dir.path(), REPORT_NAMESPACE).expect("cache");
        let resolver = ReportResolver::new(&searcher, &picker, &cache, retry()).expect("resolver");

        let report = resolver
            .resolve(&enterprise(), None)
            .await
            .expect("resolve")
            .expect("report found");
        assert_eq!(report.url, pdf_url);
        assert_eq!(report.year, Some(2024));
        assert_eq!(cache.len().await, 1);

        // Second resolution must come from the cache (stub searcher would
        // otherwise be consulted again harmlessly, so check via entries).
        let again = resolver
            .resolve(&enterprise(), None)
            .await
            .expect("resolve")
            .expect("cached report");
        assert_eq!(again, report);
    }

    #[tokio::test]
    async fn off_list_pick_falls_back_to_first_verified() {
        let server = pdf_server().await;
        let searcher = StubSearcher {
            hits: hits_for(&server),
        };
        let picker = StubPicker::Reply("https://attacker.example.com/evil.pdf".into());

        let dir = tempfile::tempdir().expect("tempdir");
        let cache = CacheStore::open_namespace(dir.path(), REPORT_NAMESPACE).expect("cache");
        let resolver = ReportResolver::new(&searcher, &picker, &cache, retry()).expect("resolver");

        let report = resolver
            .resolve(&enterprise(), None)
            .await
            .expect("resolve")
            .expect("report found");
        // The only verified PDF, despite the picker going off-list.
        assert_eq!(report.url, format!("{}/ar.pdf", server.uri()));
    }

    #[tokio::test]
    async fn picker_failure_falls_back_not_errors() {
        let server = pdf_server().await;
        let searcher = StubSearcher {
            hits: hits_for(&server),
        };
        let picker = StubPicker::Malformed;

        let dir = tempfile::tempdir().expect("tempdir");
        let cache = CacheStore::open_namespace(dir.path(), REPORT_NAMESPACE).expect("cache");
        let resolver = ReportResolver::new(&searcher, &picker, &cache, retry()).expect("resolver");

        let report = resolver.resolve(&enterprise(), None).await.expect("resolve");
        assert!(report.is_some());
    }

    #[tokio::test]
    async fn no_verified_pdf_means_none() {
        let server = pdf_server().await;
        let searcher = StubSearcher {
            hits: vec![SearchHit {
                title: "Acme investor relations".into(),
                url: format!("{}/ir.html", server.uri()),
                snippet: String::new(),
            }],
        };
        let picker = StubPicker::Reply("unused".into());

        let dir = tempfile::tempdir().expect("tempdir");
        let cache = CacheStore::open_namespace(dir.path(), REPORT_NAMESPACE).expect("cache");
        let resolver = ReportResolver::new(&searcher, &picker, &cache, retry()).expect("resolver");

        assert!(resolver.resolve(&enterprise(), None).await.expect("resolve").is_none());
        assert!(cache.is_empty().await);
    }

    #[test]
    fn year_extraction_takes_latest() {
        assert_eq!(latest_year("Annual Report 2023 and 2024 outlook"), Some(2024));
        assert_eq!(latest_year("no year here"), None);
    }
}
