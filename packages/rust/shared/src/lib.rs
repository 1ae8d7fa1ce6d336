//! Shared types, error model, and configuration for the MNE profiler.
//!
//! This crate is the foundation depended on by all other profiler crates.
//! It provides:
//! - [`ProfilerError`] — the unified error type
//! - Domain types ([`Enterprise`], [`SourceRecord`], [`MergedProfile`],
//!   [`FieldKind`], [`SourceKind`])
//! - Configuration ([`AppConfig`], config loading, startup validation)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, ArbitrationConfig, CacheConfig, LlmConfig, PipelineConfig, ReportingConfig,
    RetrievalConfig, RetryConfig, SearchConfig, SourcesConfig, config_dir, config_file_path,
    init_config,
    load_config, load_config_from, validate_api_key, validate_priority,
};
pub use error::{ProfilerError, Result};
pub use types::{
    Enterprise, FieldKind, FieldValue, MergedField, MergedProfile, RunId, SourceKind,
    SourceRecord,
};
