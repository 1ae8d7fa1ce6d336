//! Application configuration for the profiler.
//!
//! User config lives at `~/.mneprofiler/mneprofiler.toml`.
//! CLI flags override config file values, which override defaults.
//!
//! Policy knobs (source priority, tolerances, top-K, retry/backoff, cache
//! locations) all live here so the merge and classification logic never
//! hard-codes them.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::{ProfilerError, Result};
use crate::types::{FieldKind, SourceKind};

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "mneprofiler.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".mneprofiler";

// ---------------------------------------------------------------------------
// Config structs (matching mneprofiler.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    /// Pipeline-wide defaults.
    #[serde(default)]
    pub pipeline: PipelineConfig,

    /// Currency reporting settings.
    #[serde(default)]
    pub reporting: ReportingConfig,

    /// Arbitration policy knobs.
    #[serde(default)]
    pub arbitration: ArbitrationConfig,

    /// Retrieval classifier settings.
    #[serde(default)]
    pub retrieval: RetrievalConfig,

    /// LLM / embedding endpoint settings.
    #[serde(default)]
    pub llm: LlmConfig,

    /// Web search collaborator settings.
    #[serde(default)]
    pub search: SearchConfig,

    /// Fetch collaborator endpoints.
    #[serde(default)]
    pub sources: SourcesConfig,

    /// Retry/backoff policy for network and LLM calls.
    #[serde(default)]
    pub retry: RetryConfig,

    /// Cache store locations.
    #[serde(default)]
    pub cache: CacheConfig,
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Maximum enterprises processed concurrently.
    #[serde(default = "default_concurrency")]
    pub concurrency: u32,

    /// Directory for the discovery/extraction output tables.
    #[serde(default = "default_output_dir")]
    pub output_dir: String,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            concurrency: default_concurrency(),
            output_dir: default_output_dir(),
        }
    }
}

fn default_concurrency() -> u32 {
    4
}
fn default_output_dir() -> String {
    "out".into()
}

/// `[reporting]` section — the single reporting currency and fixed rates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportingConfig {
    /// ISO 4217 code of the reporting currency.
    #[serde(default = "default_currency")]
    pub currency: String,

    /// Fixed exchange rates: units of reporting currency per one unit of the
    /// keyed currency. The reporting currency itself is implicitly 1.0.
    #[serde(default = "default_rates")]
    pub rates: BTreeMap<String, f64>,
}

impl Default for ReportingConfig {
    fn default() -> Self {
        Self {
            currency: default_currency(),
            rates: default_rates(),
        }
    }
}

fn default_currency() -> String {
    "EUR".into()
}
fn default_rates() -> BTreeMap<String, f64> {
    BTreeMap::from([
        ("USD".into(), 0.92),
        ("GBP".into(), 1.17),
        ("CHF".into(), 1.04),
        ("JPY".into(), 0.0061),
        ("SEK".into(), 0.087),
    ])
}

/// `[arbitration]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArbitrationConfig {
    /// Source precedence for tie-breaks, highest priority first.
    /// Must be a permutation of all source kinds.
    #[serde(default = "default_priority")]
    pub priority: Vec<SourceKind>,

    /// Relative tolerance within which numeric values count as agreeing.
    #[serde(default = "default_tolerance")]
    pub default_tolerance: f64,

    /// Per-field tolerance overrides.
    #[serde(default)]
    pub tolerance: BTreeMap<FieldKind, f64>,
}

impl Default for ArbitrationConfig {
    fn default() -> Self {
        Self {
            priority: default_priority(),
            default_tolerance: default_tolerance(),
            tolerance: BTreeMap::new(),
        }
    }
}

impl ArbitrationConfig {
    /// Tolerance for one field, falling back to the default.
    pub fn tolerance_for(&self, field: FieldKind) -> f64 {
        self.tolerance
            .get(&field)
            .copied()
            .unwrap_or(self.default_tolerance)
    }
}

fn default_priority() -> Vec<SourceKind> {
    SourceKind::ALL.to_vec()
}
fn default_tolerance() -> f64 {
    0.01
}

/// `[retrieval]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrievalConfig {
    /// Number of nearest-neighbor candidates offered to disambiguation.
    #[serde(default = "default_top_k")]
    pub top_k: usize,

    /// Path to the controlled-vocabulary embedding file.
    #[serde(default = "default_vocab_path")]
    pub vocab_path: String,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            vocab_path: default_vocab_path(),
        }
    }
}

fn default_top_k() -> usize {
    8
}
fn default_vocab_path() -> String {
    "data/nace_vocab.json".into()
}

/// `[llm]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    /// Base URL of the OpenAI-compatible endpoint.
    #[serde(default = "default_llm_base_url")]
    pub base_url: String,

    /// Chat model used for disambiguation and structured extraction.
    #[serde(default = "default_chat_model")]
    pub chat_model: String,

    /// Embedding model used for retrieval.
    #[serde(default = "default_embed_model")]
    pub embed_model: String,

    /// Name of the env var holding the API key (never store the key itself).
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            base_url: default_llm_base_url(),
            chat_model: default_chat_model(),
            embed_model: default_embed_model(),
            api_key_env: default_api_key_env(),
        }
    }
}

fn default_llm_base_url() -> String {
    "https://llm.lab.sspcloud.fr/api".into()
}
fn default_chat_model() -> String {
    "gemma3:27b".into()
}
fn default_embed_model() -> String {
    "bge-m3:latest".into()
}
fn default_api_key_env() -> String {
    "MNEPROFILER_API_KEY".into()
}

/// `[search]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// JSON web-search endpoint used to find annual reports.
    #[serde(default = "default_search_endpoint")]
    pub endpoint: String,

    /// Maximum hits requested per query.
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            endpoint: default_search_endpoint(),
            max_results: default_max_results(),
        }
    }
}

fn default_search_endpoint() -> String {
    "https://search.example.com/api/v1/search".into()
}
fn default_max_results() -> usize {
    6
}

/// `[sources]` section — endpoints of the fetch collaborators. An unset
/// endpoint disables that collaborator; its fields simply stay absent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourcesConfig {
    /// Official business registry lookup endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub registry_endpoint: Option<String>,

    /// Financial data feed endpoint (ticker search + quote).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub feed_endpoint: Option<String>,

    /// Encyclopedic web data endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub encyclopedic_endpoint: Option<String>,

    /// PDF-to-text extraction service endpoint.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pdf_text_endpoint: Option<String>,
}

/// `[retry]` section.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Maximum attempts per network/LLM call (first try included).
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,

    /// Initial backoff in ms; doubles after each failed attempt.
    #[serde(default = "default_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Per-request timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_backoff_ms: default_backoff_ms(),
            timeout_secs: default_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}
fn default_backoff_ms() -> u64 {
    500
}
fn default_timeout_secs() -> u64 {
    30
}

/// `[cache]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory holding one JSON store per cache namespace.
    #[serde(default = "default_cache_dir")]
    pub dir: String,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            dir: default_cache_dir(),
        }
    }
}

fn default_cache_dir() -> String {
    "~/.mneprofiler/cache".into()
}

impl CacheConfig {
    /// Resolve the cache directory, expanding a leading `~/`.
    pub fn resolved_dir(&self) -> Result<PathBuf> {
        match self.dir.strip_prefix("~/") {
            Some(rest) => {
                let home = dirs::home_dir().ok_or_else(|| {
                    ProfilerError::config("could not determine home directory")
                })?;
                Ok(home.join(rest))
            }
            None => Ok(PathBuf::from(&self.dir)),
        }
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.mneprofiler/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ProfilerError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.mneprofiler/mneprofiler.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ProfilerError::io(path, e))?;

    let config: AppConfig = toml::from_str(&content)
        .map_err(|e| ProfilerError::config(format!("failed to parse {}: {e}", path.display())))?;

    validate_priority(&config.arbitration)?;
    Ok(config)
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ProfilerError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ProfilerError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ProfilerError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}

/// Check that the configured priority ordering covers every source kind
/// exactly once. A partial or duplicated ordering makes tie-breaks
/// ill-defined, so it is rejected at load time.
pub fn validate_priority(arbitration: &ArbitrationConfig) -> Result<()> {
    let mut seen = std::collections::BTreeSet::new();
    for kind in &arbitration.priority {
        if !seen.insert(*kind) {
            return Err(ProfilerError::config(format!(
                "arbitration priority lists {kind} twice"
            )));
        }
    }
    if seen.len() != SourceKind::ALL.len() {
        return Err(ProfilerError::config(
            "arbitration priority must list every source kind exactly once",
        ));
    }
    Ok(())
}

/// Check that the LLM API key env var is set and non-empty.
/// The only fatal startup check: a missing key aborts before any
/// enterprise is processed.
pub fn validate_api_key(config: &AppConfig) -> Result<()> {
    let var_name = &config.llm.api_key_env;
    match std::env::var(var_name) {
        Ok(val) if !val.is_empty() => Ok(()),
        _ => Err(ProfilerError::config(format!(
            "LLM API key not found. Set the {var_name} environment variable."
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_config_serializes() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize default config");
        assert!(toml_str.contains("concurrency"));
        assert!(toml_str.contains("MNEPROFILER_API_KEY"));
    }

    #[test]
    fn config_roundtrip() {
        let config = AppConfig::default();
        let toml_str = toml::to_string_pretty(&config).expect("serialize");
        let parsed: AppConfig = toml::from_str(&toml_str).expect("deserialize");
        assert_eq!(parsed.retrieval.top_k, 8);
        assert_eq!(parsed.arbitration.default_tolerance, 0.01);
        assert_eq!(parsed.arbitration.priority, SourceKind::ALL.to_vec());
    }

    #[test]
    fn per_field_tolerance_override() {
        let toml_str = r#"
[arbitration]
default_tolerance = 0.01

[arbitration.tolerance]
turnover = 0.02
"#;
        let config: AppConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.arbitration.tolerance_for(FieldKind::Turnover), 0.02);
        assert_eq!(config.arbitration.tolerance_for(FieldKind::Assets), 0.01);
    }

    #[test]
    fn priority_must_be_a_permutation() {
        let partial = ArbitrationConfig {
            priority: vec![SourceKind::Registry, SourceKind::FinancialFeed],
            ..Default::default()
        };
        assert!(validate_priority(&partial).is_err());

        let duplicated = ArbitrationConfig {
            priority: vec![
                SourceKind::Registry,
                SourceKind::Registry,
                SourceKind::Encyclopedic,
                SourceKind::ReportDerived,
            ],
            ..Default::default()
        };
        assert!(validate_priority(&duplicated).is_err());

        assert!(validate_priority(&ArbitrationConfig::default()).is_ok());
    }

    #[test]
    fn api_key_validation() {
        let mut config = AppConfig::default();
        // Use a unique env var name to avoid interfering with other tests
        config.llm.api_key_env = "MNE_TEST_NONEXISTENT_KEY_98431".into();
        let result = validate_api_key(&config);
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("API key not found"));
    }
}
