//! Structured extraction from annual-report PDFs.
//!
//! A resolved report goes through two stages: the PDF-to-text service
//! renders the document as plain text, then a constrained chat completion
//! reads only the keyword-relevant excerpts and returns the requested
//! figures as JSON. The reply is parsed into a [`RawObservation`] and fed
//! through the ordinary normalization path, so report-derived figures get
//! the same currency conversion and confidence treatment as everything
//! else. An unreadable reply yields `None`, never an invented figure.

use std::sync::LazyLock;
use std::time::Duration;

use regex::Regex;
use tracing::{debug, instrument, warn};

use mneprofiler_normalize::{RawField, RawObservation};
use mneprofiler_shared::{FieldKind, ProfilerError, Result, RetryConfig};

use crate::llm::LlmClient;
use crate::retry::{check_status, map_reqwest_err, with_retry};

/// Characters of context kept around each keyword match.
const EXCERPT_WINDOW: usize = 400;
/// Upper bound on total excerpt text sent to the model.
const EXCERPT_BUDGET: usize = 12_000;

static FENCE_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)\s*```").expect("valid fence regex"));

/// Plain-text rendering of a remote PDF.
pub trait PdfTextFetcher {
    fn fetch_text(&self, pdf_url: &str) -> impl Future<Output = Result<String>> + Send;
}

/// Chat-completion capability, factored out so extraction is testable
/// without a live endpoint.
pub trait ChatCompleter {
    fn complete(&self, system: &str, user: &str) -> impl Future<Output = Result<String>> + Send;
}

impl ChatCompleter for LlmClient {
    async fn complete(&self, system: &str, user: &str) -> Result<String> {
        self.chat(system, user).await
    }
}

/// Client for the PDF-to-text rendering service.
pub struct HttpPdfText {
    http: reqwest::Client,
    endpoint: String,
    retry: RetryConfig,
}

impl HttpPdfText {
    pub fn new(endpoint: &str, retry: RetryConfig) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(retry.timeout_secs))
            .build()
            .map_err(|e| ProfilerError::config(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            http,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            retry,
        })
    }

    async fn fetch_once(&self, pdf_url: &str) -> Result<String> {
        let response = self
            .http
            .get(&self.endpoint)
            .query(&[("url", pdf_url)])
            .send()
            .await
            .map_err(|e| map_reqwest_err("pdf_text", e))?;
        let text = check_status("pdf_text", response)?
            .text()
            .await
            .map_err(|e| map_reqwest_err("pdf_text", e))?;
        if text.trim().is_empty() {
            return Err(ProfilerError::malformed("PDF rendered to empty text"));
        }
        Ok(text)
    }
}

impl PdfTextFetcher for HttpPdfText {
    async fn fetch_text(&self, pdf_url: &str) -> Result<String> {
        with_retry(&self.retry, "pdf_text", || self.fetch_once(pdf_url)).await
    }
}

/// Keywords that mark passages worth reading for a given field, matched
/// case-insensitively on the report text itself so offsets stay valid for
/// non-ASCII documents.
fn keyword_pattern(kind: FieldKind) -> Option<&'static Regex> {
    static TURNOVER: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)revenue|turnover|net sales|total sales").expect("valid keyword regex")
    });
    static EMPLOYEES: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)employees|headcount|workforce").expect("valid keyword regex")
    });
    static ASSETS: LazyLock<Regex> = LazyLock::new(|| {
        Regex::new(r"(?i)total assets|balance sheet").expect("valid keyword regex")
    });
    match kind {
        FieldKind::Turnover => Some(&TURNOVER),
        FieldKind::Employees => Some(&EMPLOYEES),
        FieldKind::Assets => Some(&ASSETS),
        _ => None,
    }
}

/// Extract the requested figures from a report already rendered to text.
///
/// Returns `None` when the model's reply cannot be read as the expected
/// JSON shape or names none of the requested fields; that is a gap, not an
/// error.
#[instrument(skip_all, fields(pdf_url = %pdf_url))]
pub async fn extract_report_fields<F, C>(
    fetcher: &F,
    completer: &C,
    pdf_url: &str,
    report_year: Option<i32>,
    missing: &[FieldKind],
) -> Result<Option<RawObservation>>
where
    F: PdfTextFetcher,
    C: ChatCompleter,
{
    if missing.is_empty() {
        return Ok(None);
    }

    let text = fetcher.fetch_text(pdf_url).await?;
    let excerpt = relevant_excerpts(&text, missing);
    if excerpt.is_empty() {
        debug!("no keyword-relevant passages in report text");
        return Ok(None);
    }

    let wanted: Vec<&str> = missing.iter().map(|k| k.as_str()).collect();
    let system = format!(
        "You read excerpts of a company's annual report and extract figures. \
         Reply with a single JSON object whose keys are a subset of [{}]. \
         Each value is an object with \"value\" (the figure exactly as written, \
         e.g. \"12.5 billion\"), optional \"currency\" (ISO 4217), and optional \
         \"year\". Omit any figure the excerpts do not state. No prose.",
        wanted.join(", ")
    );

    let reply = match completer.complete(&system, &excerpt).await {
        Ok(reply) => reply,
        Err(e)
            if matches!(
                e,
                ProfilerError::Transient { .. } | ProfilerError::Malformed { .. }
            ) =>
        {
            warn!(error = %e, "report extraction failed, figures stay absent");
            return Ok(None);
        }
        Err(e) => return Err(e),
    };

    let Some(mut observation) = parse_reply(&reply, pdf_url, missing) else {
        warn!(reply = %reply, "unreadable extraction reply, figures stay absent");
        return Ok(None);
    };
    // The search hit's year stands in when the model omitted one.
    if let Some(year) = report_year {
        for field in observation.fields.values_mut() {
            field.year.get_or_insert(year);
        }
    }
    debug!(fields = observation.fields.len(), "report figures extracted");
    Ok(Some(observation))
}

/// Windows of text around keyword matches for the requested fields,
/// concatenated and capped.
fn relevant_excerpts(text: &str, missing: &[FieldKind]) -> String {
    let mut ranges: Vec<(usize, usize)> = Vec::new();
    for kind in missing {
        let Some(pattern) = keyword_pattern(*kind) else {
            continue;
        };
        for found in pattern.find_iter(text) {
            let start = found.start().saturating_sub(EXCERPT_WINDOW);
            let end = (found.end() + EXCERPT_WINDOW).min(text.len());
            ranges.push((floor_char(text, start), ceil_char(text, end)));
        }
    }
    ranges.sort_unstable();

    let mut out = String::new();
    let mut cursor = 0usize;
    for (start, end) in ranges {
        if out.len() >= EXCERPT_BUDGET {
            break;
        }
        let start = start.max(cursor);
        if start >= end {
            continue;
        }
        if !out.is_empty() {
            out.push_str("\n...\n");
        }
        out.push_str(&text[start..end]);
        cursor = end;
    }
    out.truncate(ceil_char(&out, out.len().min(EXCERPT_BUDGET)));
    out
}

fn floor_char(text: &str, mut at: usize) -> usize {
    while at > 0 && !text.is_char_boundary(at) {
        at -= 1;
    }
    at
}

fn ceil_char(text: &str, mut at: usize) -> usize {
    while at < text.len() && !text.is_char_boundary(at) {
        at += 1;
    }
    at
}

/// Parse the model's JSON reply, keeping only the fields that were asked
/// for. Fenced code blocks are tolerated; anything else unreadable is not.
fn parse_reply(reply: &str, pdf_url: &str, missing: &[FieldKind]) -> Option<RawObservation> {
    let body = FENCE_RE
        .captures(reply)
        .and_then(|c| c.get(1))
        .map_or(reply.trim(), |m| m.as_str());
    let parsed: std::collections::BTreeMap<String, RawField> =
        serde_json::from_str(body).ok()?;

    let mut observation = RawObservation::new(pdf_url);
    for (name, field) in parsed {
        let requested = missing
            .iter()
            .any(|k| k.as_str().eq_ignore_ascii_case(&name));
        if requested && !field.value.trim().is_empty() {
            observation.fields.insert(name.to_lowercase(), field);
        }
    }
    if observation.fields.is_empty() {
        return None;
    }
    Some(observation)
}
