//! Arbitration engine: merges normalized source records for one enterprise,
//! field by field, into a single [`MergedProfile`].
//!
//! Policy is quality-first and fully deterministic:
//! 1. partition the records into those supplying the field;
//! 2. zero contributors ⇒ field stays absent;
//! 3. one contributor ⇒ its value, its provenance;
//! 4. several ⇒ sort by (confidence desc, source priority rank asc,
//!    recency desc, source ref) and take the top.
//!
//! Numeric values within the configured relative tolerance of each other
//! count as agreeing, not conflicting — rounding and unit artifacts must not
//! read as source disputes. Re-merging the same records always reproduces
//! the same profile and provenance.

use std::collections::BTreeMap;

use tracing::{debug, instrument, warn};

use mneprofiler_shared::{
    ArbitrationConfig, Enterprise, FieldKind, FieldValue, MergedField, MergedProfile, Result,
    SourceKind, SourceRecord, validate_priority,
};

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// Resolved arbitration policy: priority ranks and tolerances from config.
#[derive(Debug, Clone)]
pub struct ArbitrationPolicy {
    ranks: BTreeMap<SourceKind, usize>,
    config: ArbitrationConfig,
}

impl ArbitrationPolicy {
    /// Build a policy from config, rejecting priority orderings that are
    /// not a permutation of all source kinds.
    pub fn from_config(config: &ArbitrationConfig) -> Result<Self> {
        validate_priority(config)?;
        let ranks = config
            .priority
            .iter()
            .enumerate()
            .map(|(rank, kind)| (*kind, rank))
            .collect();
        Ok(Self {
            ranks,
            config: config.clone(),
        })
    }

    /// Priority rank of a source; lower wins ties.
    pub fn rank(&self, source: SourceKind) -> usize {
        // from_config guarantees every kind is ranked.
        self.ranks.get(&source).copied().unwrap_or(usize::MAX)
    }

    /// Relative tolerance for a numeric field.
    pub fn tolerance_for(&self, field: FieldKind) -> f64 {
        self.config.tolerance_for(field)
    }
}

// ---------------------------------------------------------------------------
// Decisions
// ---------------------------------------------------------------------------

/// How a merged field value came to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Consensus {
    /// Exactly one source supplied the field.
    Single,
    /// Several sources supplied values that agree (within tolerance for
    /// numeric fields, exact equality for text).
    Agreed,
    /// Sources disagreed; the precedence sort picked the winner.
    Arbitrated,
}

/// Outcome of arbitrating one field.
#[derive(Debug, Clone)]
pub struct FieldDecision {
    /// The reconciled value with its provenance.
    pub merged: MergedField,
    /// Whether the value was uncontested, agreed, or arbitrated.
    pub consensus: Consensus,
    /// How many sources supplied the field.
    pub contributors: usize,
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge all records for one enterprise into a single profile.
///
/// Invariant: a field is never absent in the result if at least one record
/// supplied a non-empty value for it.
#[instrument(skip_all, fields(enterprise = %enterprise.id, records = records.len()))]
pub fn merge(
    enterprise: &Enterprise,
    records: &[SourceRecord],
    policy: &ArbitrationPolicy,
) -> MergedProfile {
    let mut fields = BTreeMap::new();

    for kind in FieldKind::ALL {
        if let Some(decision) = decide_field(kind, records, policy) {
            if decision.consensus == Consensus::Arbitrated {
                warn!(
                    enterprise = %enterprise.id,
                    field = %kind,
                    contributors = decision.contributors,
                    winner = %decision.merged.source,
                    "sources disagreed, took highest-precedence value"
                );
            } else {
                debug!(
                    enterprise = %enterprise.id,
                    field = %kind,
                    contributors = decision.contributors,
                    "field reconciled"
                );
            }
            fields.insert(kind, decision.merged);
        }
    }

    MergedProfile {
        enterprise_id: enterprise.id.clone(),
        fields,
    }
}

/// Arbitrate one field across all records. `None` when no record supplies it.
pub fn decide_field(
    kind: FieldKind,
    records: &[SourceRecord],
    policy: &ArbitrationPolicy,
) -> Option<FieldDecision> {
    let mut contributors: Vec<(&SourceRecord, &FieldValue)> = records
        .iter()
        .filter_map(|r| r.field(kind).map(|v| (r, v)))
        .collect();

    let count = contributors.len();
    match count {
        0 => return None,
        1 => {
            let (record, value) = contributors[0];
            return Some(FieldDecision {
                merged: merged_from(record, value),
                consensus: Consensus::Single,
                contributors: 1,
            });
        }
        _ => {}
    }

    // Quality-first precedence: confidence, then configured source priority,
    // then recency, then source ref as a stable final key.
    contributors.sort_by(|(a, _), (b, _)| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| policy.rank(a.source).cmp(&policy.rank(b.source)))
            .then_with(|| b.observed_at.cmp(&a.observed_at))
            .then_with(|| a.source_ref.cmp(&b.source_ref))
    });

    let (winner, value) = contributors[0];
    let consensus = if all_agree(kind, &contributors, policy) {
        Consensus::Agreed
    } else {
        Consensus::Arbitrated
    };

    Some(FieldDecision {
        merged: merged_from(winner, value),
        consensus,
        contributors: count,
    })
}

fn merged_from(record: &SourceRecord, value: &FieldValue) -> MergedField {
    MergedField {
        value: value.clone(),
        source: record.source,
        source_ref: record.source_ref.clone(),
        ref_year: record.ref_year,
    }
}

/// Whether every contributed value agrees with every other: within relative
/// tolerance for numeric fields, exact equality for text.
fn all_agree(
    kind: FieldKind,
    contributors: &[(&SourceRecord, &FieldValue)],
    policy: &ArbitrationPolicy,
) -> bool {
    if kind.is_numeric() {
        let tolerance = policy.tolerance_for(kind);
        let numbers: Vec<f64> = contributors
            .iter()
            .filter_map(|(_, v)| v.as_number())
            .collect();
        numbers
            .iter()
            .all(|a| numbers.iter().all(|b| within_tolerance(*a, *b, tolerance)))
    } else {
        contributors
            .windows(2)
            .all(|pair| pair[0].1 == pair[1].1)
    }
}

/// Relative agreement check: |a − b| ≤ tolerance × max(|a|, |b|).
fn within_tolerance(a: f64, b: f64, tolerance: f64) -> bool {
    (a - b).abs() <= tolerance * a.abs().max(b.abs())
}
