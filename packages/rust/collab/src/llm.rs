//! Client for the OpenAI-compatible chat and embeddings endpoints.
//!
//! Implements the classifier's [`Embedder`] and [`Disambiguator`]
//! capabilities plus the report-URL picker. All calls carry a timeout and
//! go through the retry/backoff policy; malformed completions surface as
//! [`ProfilerError::Malformed`] so callers can take their deterministic
//! fallback.

use std::time::Duration;

use serde::Deserialize;
use serde_json::json;
use tracing::{debug, instrument};

use mneprofiler_classifier::{ClassificationCandidate, Disambiguator, Embedder};
use mneprofiler_shared::{LlmConfig, ProfilerError, Result, RetryConfig};

use crate::retry::{check_status, map_reqwest_err, with_retry};

/// Chat + embeddings client for one configured endpoint.
pub struct LlmClient {
    http: reqwest::Client,
    base_url: String,
    chat_model: String,
    embed_model: String,
    api_key: String,
    retry: RetryConfig,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

#[derive(Deserialize)]
struct ChatMessage {
    content: Option<String>,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    embedding: Vec<f32>,
}

impl LlmClient {
    /// Build a client from config. Fails with a config error when the API
    /// key env var is unset — the one failure class that aborts a run.
    pub fn new(config: &LlmConfig, retry: RetryConfig) -> Result<Self> {
        let api_key = std::env::var(&config.api_key_env).map_err(|_| {
            ProfilerError::config(format!(
                "LLM API key not found. Set the {} environment variable.",
                config.api_key_env
            ))
        })?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(retry.timeout_secs))
            .build()
            .map_err(|e| ProfilerError::config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            chat_model: config.chat_model.clone(),
            embed_model: config.embed_model.clone(),
            api_key,
            retry,
        })
    }

    /// One retried POST returning a decoded JSON body.
    async fn post_json<T: serde::de::DeserializeOwned>(
        &self,
        op: &'static str,
        url: &str,
        body: &serde_json::Value,
    ) -> Result<T> {
        let response = self
            .http
            .post(url)
            .bearer_auth(&self.api_key)
            .json(body)
            .send()
            .await
            .map_err(|e| map_reqwest_err(op, e))?;
        check_status(op, response)?
            .json()
            .await
            .map_err(|e| map_reqwest_err(op, e))
    }

    /// One chat completion, retried on transient failure.
    #[instrument(skip_all)]
    pub async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);
        let body = json!({
            "model": self.chat_model,
            "temperature": 0.1,
            "messages": [
                {"role": "system", "content": system},
                {"role": "user", "content": user},
            ],
        });

        let parsed: ChatResponse = with_retry(&self.retry, "chat", || {
            self.post_json("chat", &url, &body)
        })
        .await?;

        let content = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        if content.trim().is_empty() {
            return Err(ProfilerError::malformed("chat returned an empty completion"));
        }
        debug!(chars = content.len(), "chat completion received");
        Ok(content)
    }

    /// Embed one text, retried on transient failure.
    #[instrument(skip_all)]
    pub async fn embed_text(&self, text: &str) -> Result<Vec<f32>> {
        let url = format!("{}/embeddings", self.base_url);
        let body = json!({
            "model": self.embed_model,
            "input": text,
        });

        let parsed: EmbeddingResponse = with_retry(&self.retry, "embed", || {
            self.post_json("embed", &url, &body)
        })
        .await?;

        parsed
            .data
            .into_iter()
            .next()
            .map(|row| row.embedding)
            .filter(|v| !v.is_empty())
            .ok_or_else(|| ProfilerError::malformed("embeddings response had no vector"))
    }

    /// Ask the model to choose one item from a bounded list. Shared by NACE
    /// disambiguation and report-URL selection; the caller re-validates the
    /// reply against the offered set.
    async fn pick_from(&self, instruction: &str, subject: &str, offered: &[String]) -> Result<String> {
        let list = offered
            .iter()
            .enumerate()
            .map(|(i, item)| format!("{}. {item}", i + 1))
            .collect::<Vec<_>>()
            .join("\n");
        let system = format!(
            "{instruction} Reply with exactly one entry from the list, verbatim, and nothing else."
        );
        let user = format!("{subject}\n\nOptions:\n{list}");
        self.chat(&system, &user).await
    }

    /// Select an annual-report URL among verified candidates.
    pub async fn pick_report_url(&self, enterprise_name: &str, urls: &[String]) -> Result<String> {
        self.pick_from(
            "You select the most recent official annual report PDF for a company.",
            &format!("Company: {enterprise_name}"),
            urls,
        )
        .await
    }
}

impl Embedder for LlmClient {
    async fn embed(&self, text: &str) -> Result<Vec<f32>> {
        self.embed_text(text).await
    }
}

impl Disambiguator for LlmClient {
    async fn pick(
        &self,
        activity: &str,
        candidates: &[ClassificationCandidate],
    ) -> Result<String> {
        let offered: Vec<String> = candidates
            .iter()
            .map(|c| format!("{} — {}", c.code, c.description))
            .collect();
        let reply = self
            .pick_from(
                "You classify a company's main activity into one NACE code.",
                &format!("Activity description: {activity}"),
                &offered,
            )
            .await?;

        // Replies tend to repeat "code — description"; the classifier only
        // needs the code token.
        Ok(reply
            .trim()
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string())
    }
}
