//! In-memory vector index over the controlled classification vocabulary.
//!
//! The vocabulary (one entry per NACE code: code, description, pre-computed
//! embedding) is small enough that brute-force cosine scoring beats any
//! index structure. Loaded once per run from a JSON file.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::info;

use mneprofiler_shared::{ProfilerError, Result};

/// One controlled-vocabulary entry with its pre-computed embedding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VocabEntry {
    /// Fine-grained classification code (e.g. `"27.20"`).
    pub code: String,
    /// Official description of the code.
    pub description: String,
    /// Embedding vector of the description.
    pub embedding: Vec<f32>,
}

/// A nearest-neighbor candidate returned by retrieval.
/// Ephemeral, scoped to one classification call.
#[derive(Debug, Clone, PartialEq)]
pub struct ClassificationCandidate {
    /// Fine-grained classification code.
    pub code: String,
    /// Official description of the code.
    pub description: String,
    /// Cosine similarity to the query embedding.
    pub score: f32,
}

/// Brute-force cosine index over [`VocabEntry`] rows.
pub struct VocabIndex {
    entries: Vec<VocabEntry>,
}

impl VocabIndex {
    /// Load the vocabulary from a JSON file (an array of entries).
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProfilerError::config(format!(
                "cannot read vocabulary file {}: {e}",
                path.display()
            ))
        })?;
        let entries: Vec<VocabEntry> = serde_json::from_str(&content).map_err(|e| {
            ProfilerError::integrity(format!(
                "vocabulary file {} is not valid: {e}",
                path.display()
            ))
        })?;
        info!(path = %path.display(), entries = entries.len(), "vocabulary index loaded");
        Self::from_entries(entries)
    }

    /// Build an index from in-memory entries.
    pub fn from_entries(entries: Vec<VocabEntry>) -> Result<Self> {
        if entries.is_empty() {
            return Err(ProfilerError::integrity("vocabulary index is empty"));
        }
        Ok(Self { entries })
    }

    /// Number of vocabulary entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the index holds no entries. Construction forbids this, so
    /// this exists only to pair with [`len`](Self::len).
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Top-K nearest entries to `query` by cosine similarity, best first.
    /// Ties are broken by code so retrieval is deterministic.
    pub fn top_k(&self, query: &[f32], k: usize) -> Vec<ClassificationCandidate> {
        let mut scored: Vec<ClassificationCandidate> = self
            .entries
            .iter()
            .map(|entry| ClassificationCandidate {
                code: entry.code.clone(),
                description: entry.description.clone(),
                score: cosine(query, &entry.embedding),
            })
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.code.cmp(&b.code))
        });
        scored.truncate(k);
        scored
    }
}

/// Cosine similarity; 0.0 for mismatched dimensions or zero vectors.
fn cosine(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }
    dot / (norm_a * norm_b)
}
