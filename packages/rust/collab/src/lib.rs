//! External collaborators: the HTTP-facing half of the profiler.
//!
//! Everything that talks to the outside world lives here, behind small
//! capability traits so the pipeline can be tested without a network:
//! source providers producing raw observations, the chat/embeddings
//! client, web search, annual-report resolution, and PDF extraction.
//! All calls share one retry/backoff policy and one error mapping.

pub mod extract;
pub mod llm;
pub mod providers;
pub mod reports;
pub mod retry;
pub mod websearch;

pub use extract::{extract_report_fields, ChatCompleter, HttpPdfText, PdfTextFetcher};
pub use llm::LlmClient;
pub use providers::{build_providers, Provider, TICKER_NAMESPACE};
pub use reports::{ReportPicker, ReportResolver, ResolvedReport, REPORT_NAMESPACE};
pub use retry::with_retry;
pub use websearch::{HttpSearcher, SearchHit, WebSearcher};
