//! Retrieval classifier: free-text activity description → NACE code and
//! section letter.
//!
//! Two stages. First, embed the activity text and retrieve the top-K
//! nearest controlled-vocabulary candidates from the vector index. Second,
//! ask a disambiguation collaborator to pick exactly one of the K offered
//! codes — never to invent one. The reply is parsed strictly: anything
//! outside the offered set, or any transient/malformed collaborator
//! failure, falls back deterministically to the top-similarity candidate.
//! The output code is therefore always retrieval-verified.

mod index;
mod section;

use tracing::{debug, info, instrument, warn};

use mneprofiler_shared::{ProfilerError, Result};

pub use index::{ClassificationCandidate, VocabEntry, VocabIndex};
pub use section::section_for;

// ---------------------------------------------------------------------------
// Collaborator capabilities
// ---------------------------------------------------------------------------

/// Text-embedding capability.
pub trait Embedder {
    /// Embed one text into a vector.
    fn embed(&self, text: &str) -> impl Future<Output = Result<Vec<f32>>> + Send;
}

/// Constrained text-generation capability: given the activity text and a
/// bounded candidate list, return the chosen code (as free text — callers
/// parse it strictly). May fail or return malformed output.
pub trait Disambiguator {
    /// Pick one candidate code for the activity.
    fn pick(
        &self,
        activity: &str,
        candidates: &[ClassificationCandidate],
    ) -> impl Future<Output = Result<String>> + Send;
}

// ---------------------------------------------------------------------------
// Classifier
// ---------------------------------------------------------------------------

/// A classified activity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    /// Fine-grained NACE code, always one of the retrieved candidates.
    pub code: String,
    /// Coarse section letter from the static mapping.
    pub section: char,
}

/// Retrieval classifier over a vocabulary index and two collaborators.
pub struct Classifier<'a, E, D> {
    index: &'a VocabIndex,
    embedder: &'a E,
    disambiguator: &'a D,
    top_k: usize,
}

impl<'a, E: Embedder, D: Disambiguator> Classifier<'a, E, D> {
    /// Build a classifier. `top_k` bounds the candidate set offered to
    /// disambiguation.
    pub fn new(index: &'a VocabIndex, embedder: &'a E, disambiguator: &'a D, top_k: usize) -> Self {
        Self {
            index,
            embedder,
            disambiguator,
            top_k,
        }
    }

    /// Classify a free-text activity description.
    ///
    /// Bounded-hallucination guarantee: the returned code is one of the
    /// top-K retrieved candidates (the top-similarity one when
    /// disambiguation fails or goes off-script).
    #[instrument(skip_all, fields(chars = activity.len()))]
    pub async fn classify(&self, activity: &str) -> Result<Classification> {
        let query = self.embedder.embed(activity).await?;
        let candidates = self.index.top_k(&query, self.top_k);
        if candidates.is_empty() {
            return Err(ProfilerError::integrity(
                "retrieval returned no candidates from a non-empty vocabulary",
            ));
        }

        debug!(
            top = %candidates[0].code,
            score = candidates[0].score,
            offered = candidates.len(),
            "retrieval candidates ready"
        );

        let code = match self.disambiguator.pick(activity, &candidates).await {
            Ok(reply) => match parse_selection(&reply, &candidates) {
                Some(code) => code,
                None => {
                    warn!(
                        reply = %reply,
                        fallback = %candidates[0].code,
                        "disambiguation reply outside offered candidates, using top similarity"
                    );
                    candidates[0].code.clone()
                }
            },
            Err(e) if matches!(e, ProfilerError::Transient { .. } | ProfilerError::Malformed { .. }) => {
                warn!(
                    error = %e,
                    fallback = %candidates[0].code,
                    "disambiguation failed, using top similarity"
                );
                candidates[0].code.clone()
            }
            Err(e) => return Err(e),
        };

        let section = section_for(&code)?;
        info!(code = %code, section = %section, "activity classified");
        Ok(Classification { code, section })
    }
}

/// Strict parse of a disambiguation reply: after trimming whitespace,
/// surrounding quotes/backticks and a trailing period, the reply must equal
/// one of the offered codes exactly.
fn parse_selection(reply: &str, candidates: &[ClassificationCandidate]) -> Option<String> {
    let cleaned = reply
        .trim()
        .trim_matches(|c| matches!(c, '"' | '\'' | '`'))
        .trim_end_matches('.')
        .trim();

    candidates
        .iter()
        .find(|c| c.code == cleaned)
        .map(|c| c.code.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Embeds by keyword: battery-ish texts point at axis 1, food at axis 0.
    struct StubEmbedder;

    impl Embedder for StubEmbedder {
        async fn embed(&self, text: &str) -> Result<Vec<f32>> {
            if text.contains("batter") {
                Ok(vec![0.1, 1.0])
            } else {
                Ok(vec![1.0, 0.1])
            }
        }
    }

    /// Replies with a fixed string, or fails.
    enum StubPicker {
        Reply(&'static str),
        Fail(fn() -> ProfilerError),
    }

    impl Disambiguator for StubPicker {
        async fn pick(
            &self,
            _activity: &str,
            _candidates: &[ClassificationCandidate],
        ) -> Result<String> {
            match self {
                StubPicker::Reply(s) => Ok((*s).to_string()),
                StubPicker::Fail(make) => Err(make()),
            }
        }
    }

    fn vocab() -> VocabIndex {
        VocabIndex::from_entries(vec![
            VocabEntry {
                code: "10.89".into(),
                description: "Manufacture of other food products".into(),
                embedding: vec![1.0, 0.0],
            },
            VocabEntry {
                code: "27.20".into(),
                description: "Manufacture of batteries and accumulators".into(),
                embedding: vec![0.0, 1.0],
            },
            VocabEntry {
                code: "28.11".into(),
                description: "Manufacture of engines and turbines".into(),
                embedding: vec![0.3, 0.8],
            },
        ])
        .expect("vocab")
    }

    #[tokio::test]
    async fn battery_example_classifies_to_section_c() {
        let index = vocab();
        let embedder = StubEmbedder;
        let picker = StubPicker::Reply("27.20");
        let classifier = Classifier::new(&index, &embedder, &picker, 5);

        let result = classifier
            .classify("manufacture of batteries")
            .await
            .expect("classify");
        assert_eq!(result.code, "27.20");
        assert_eq!(result.section, 'C');
    }

    #[tokio::test]
    async fn reply_decoration_is_tolerated() {
        let index = vocab();
        let embedder = StubEmbedder;
        let picker = StubPicker::Reply("  \"27.20\".  ");
        let classifier = Classifier::new(&index, &embedder, &picker, 5);

        let result = classifier.classify("battery plant").await.expect("classify");
        assert_eq!(result.code, "27.20");
    }

    #[tokio::test]
    async fn off_script_code_falls_back_to_top_similarity() {
        let index = vocab();
        let embedder = StubEmbedder;
        // A plausible code, but not among the offered candidates.
        let picker = StubPicker::Reply("99.99");
        let classifier = Classifier::new(&index, &embedder, &picker, 2);

        let result = classifier
            .classify("manufacture of batteries")
            .await
            .expect("classify");
        assert_eq!(result.code, "27.20");
        assert_eq!(result.section, 'C');
    }

    #[tokio::test]
    async fn malformed_reply_falls_back_not_errors() {
        let index = vocab();
        let embedder = StubEmbedder;
        let picker = StubPicker::Fail(|| ProfilerError::malformed("empty completion"));
        let classifier = Classifier::new(&index, &embedder, &picker, 5);

        let result = classifier
            .classify("manufacture of batteries")
            .await
            .expect("classify");
        assert_eq!(result.code, "27.20");
    }

    #[tokio::test]
    async fn transient_failure_falls_back_too() {
        let index = vocab();
        let embedder = StubEmbedder;
        let picker = StubPicker::Fail(|| ProfilerError::transient("llm timeout"));
        let classifier = Classifier::new(&index, &embedder, &picker, 5);

        let result = classifier.classify("frozen food factory").await.expect("classify");
        assert_eq!(result.code, "10.89");
        assert_eq!(result.section, 'C');
    }

    #[tokio::test]
    async fn bounded_hallucination_property() {
        let index = vocab();
        let embedder = StubEmbedder;
        for reply in ["27.20", "28.11", "not a code", "45.11", ""] {
            let picker = StubPicker::Reply(reply);
            let classifier = Classifier::new(&index, &embedder, &picker, 2);
            let result = classifier
                .classify("manufacture of batteries")
                .await
                .expect("classify");
            // Output is always one of the two offered candidates.
            assert!(
                result.code == "27.20" || result.code == "28.11",
                "code {} escaped the candidate set for reply {reply:?}",
                result.code
            );
        }
    }
}
