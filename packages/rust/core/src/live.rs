//! Production wiring of the [`Collaborators`] seam: configured HTTP
//! providers, the shared LLM client, cache-backed report resolution, and
//! the vocabulary index, all built once from [`AppConfig`].

use std::path::Path;
use std::sync::Arc;

use tokio::task::JoinSet;
use tracing::{debug, warn};

use mneprofiler_cache::CacheStore;
use mneprofiler_classifier::{Classification, Classifier, VocabIndex};
use mneprofiler_collab::{
    build_providers, extract_report_fields, HttpPdfText, HttpSearcher, LlmClient, Provider,
    ReportResolver, REPORT_NAMESPACE, TICKER_NAMESPACE,
};
use mneprofiler_normalize::RawObservation;
use mneprofiler_shared::{
    AppConfig, Enterprise, FieldKind, ProfilerError, Result, RetryConfig, SourceKind,
};

use crate::pipeline::Collaborators;

/// All configured external collaborators, ready for a run.
pub struct LiveCollaborators {
    providers: Arc<Vec<Provider>>,
    searcher: HttpSearcher,
    llm: LlmClient,
    pdf_text: Option<HttpPdfText>,
    report_cache: CacheStore,
    index: VocabIndex,
    retry: RetryConfig,
    top_k: usize,
}

impl LiveCollaborators {
    /// Build the full collaborator set. This is where all startup
    /// validation happens: API key, vocabulary file, cache directory.
    pub fn from_config(config: &AppConfig) -> Result<Self> {
        let cache_dir = config.cache.resolved_dir()?;
        std::fs::create_dir_all(&cache_dir).map_err(|e| ProfilerError::io(&cache_dir, e))?;

        let ticker_cache = Arc::new(CacheStore::open_namespace(&cache_dir, TICKER_NAMESPACE)?);
        let providers = build_providers(&config.sources, config.retry, ticker_cache)?;
        if providers.is_empty() {
            warn!("no source endpoints configured, profiles will rely on reports alone");
        }

        let pdf_text = match &config.sources.pdf_text_endpoint {
            Some(endpoint) => Some(HttpPdfText::new(endpoint, config.retry)?),
            None => None,
        };

        Ok(Self {
            providers: Arc::new(providers),
            searcher: HttpSearcher::new(&config.search, config.retry)?,
            llm: LlmClient::new(&config.llm, config.retry)?,
            pdf_text,
            report_cache: CacheStore::open_namespace(&cache_dir, REPORT_NAMESPACE)?,
            index: VocabIndex::load(Path::new(&config.retrieval.vocab_path))?,
            retry: config.retry,
            top_k: config.retrieval.top_k,
        })
    }
}

impl Collaborators for LiveCollaborators {
    /// Query all providers concurrently. An unavailable source is a gap
    /// for this enterprise, not a failure.
    async fn observations(
        &self,
        enterprise: &Enterprise,
    ) -> Result<Vec<(SourceKind, RawObservation)>> {
        let mut tasks = JoinSet::new();
        for idx in 0..self.providers.len() {
            let providers = Arc::clone(&self.providers);
            let enterprise = enterprise.clone();
            tasks.spawn(async move {
                let provider = &providers[idx];
                (idx, provider.kind(), provider.observe(&enterprise).await)
            });
        }

        let mut observed: Vec<(usize, SourceKind, RawObservation)> = Vec::new();
        while let Some(joined) = tasks.join_next().await {
            let (idx, kind, result) = joined
                .map_err(|e| ProfilerError::config(format!("provider task panicked: {e}")))?;
            match result {
                Ok(Some(raw)) => observed.push((idx, kind, raw)),
                Ok(None) => debug!(enterprise = %enterprise.id, source = %kind, "no observation"),
                Err(e @ ProfilerError::Config { .. }) => return Err(e),
                Err(e) => {
                    warn!(enterprise = %enterprise.id, source = %kind, error = %e, "source unavailable, skipped");
                }
            }
        }
        // Provider registration order, regardless of completion order.
        observed.sort_by_key(|(idx, _, _)| *idx);
        Ok(observed.into_iter().map(|(_, kind, raw)| (kind, raw)).collect())
    }

    async fn report_observation(
        &self,
        enterprise: &Enterprise,
        website: Option<&str>,
        missing: &[FieldKind],
    ) -> Result<Option<RawObservation>> {
        let Some(pdf_text) = &self.pdf_text else {
            debug!("no PDF text endpoint configured, skipping report recovery");
            return Ok(None);
        };
        let resolver =
            ReportResolver::new(&self.searcher, &self.llm, &self.report_cache, self.retry)?;
        let Some(report) = resolver.resolve(enterprise, website).await? else {
            return Ok(None);
        };
        extract_report_fields(pdf_text, &self.llm, &report.url, report.year, missing).await
    }

    async fn classify(&self, activity: &str) -> Result<Classification> {
        Classifier::new(&self.index, &self.llm, &self.llm, self.top_k)
            .classify(activity)
            .await
    }
}
