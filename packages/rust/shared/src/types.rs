//! Core domain types for enterprise profiling.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// RunId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for pipeline run identifiers (time-sortable).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RunId(pub Uuid);

impl RunId {
    /// Generate a new time-sortable run identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// Enterprise
// ---------------------------------------------------------------------------

/// One multinational enterprise to profile. Created from the input list,
/// never mutated, lives for one pipeline run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Enterprise {
    /// Stable identifier from the input list.
    pub id: String,
    /// Legal or common name.
    pub name: String,
    /// Optional ISO alpha-2 country hint from the input list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_hint: Option<String>,
    /// Optional stock ticker hint from the input list.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ticker_hint: Option<String>,
}

// ---------------------------------------------------------------------------
// Fields
// ---------------------------------------------------------------------------

/// The closed set of profile fields tracked per enterprise.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    Turnover,
    Employees,
    Assets,
    Website,
    Activity,
    Country,
}

impl FieldKind {
    /// All fields, in output-column order.
    pub const ALL: [FieldKind; 6] = [
        FieldKind::Turnover,
        FieldKind::Employees,
        FieldKind::Assets,
        FieldKind::Website,
        FieldKind::Activity,
        FieldKind::Country,
    ];

    /// Whether values of this field are numeric (subject to tolerance bands).
    pub fn is_numeric(self) -> bool {
        matches!(
            self,
            FieldKind::Turnover | FieldKind::Employees | FieldKind::Assets
        )
    }

    /// Canonical lowercase name, matching config keys and log fields.
    pub fn as_str(self) -> &'static str {
        match self {
            FieldKind::Turnover => "turnover",
            FieldKind::Employees => "employees",
            FieldKind::Assets => "assets",
            FieldKind::Website => "website",
            FieldKind::Activity => "activity",
            FieldKind::Country => "country",
        }
    }
}

impl std::fmt::Display for FieldKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single observed field value. Absence is modeled by the field not being
/// present in a record at all; absent and zero are never conflated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldValue {
    /// Numeric value in reporting-currency units (or a plain count).
    Number(f64),
    /// Free-text value (website, activity description, country code).
    Text(String),
}

impl FieldValue {
    /// Numeric view, if this is a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            FieldValue::Number(n) => Some(*n),
            FieldValue::Text(_) => None,
        }
    }

    /// Text view, if this is text.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            FieldValue::Number(_) => None,
            FieldValue::Text(s) => Some(s),
        }
    }

    /// Render for tabular output. Whole numbers print without a decimal part.
    pub fn to_output_string(&self) -> String {
        match self {
            FieldValue::Number(n) if n.fract() == 0.0 => format!("{}", *n as i64),
            FieldValue::Number(n) => format!("{n}"),
            FieldValue::Text(s) => s.clone(),
        }
    }
}

// ---------------------------------------------------------------------------
// Sources
// ---------------------------------------------------------------------------

/// The closed, versioned set of source capabilities registered at startup.
/// Arbitration priority over these is configured, not hard-coded.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Government/official business registry.
    Registry,
    /// Financial data feed (market/ticker data).
    FinancialFeed,
    /// Encyclopedic web data.
    Encyclopedic,
    /// Values extracted from annual-report documents.
    ReportDerived,
}

impl SourceKind {
    /// All source kinds, in default priority order (highest first).
    pub const ALL: [SourceKind; 4] = [
        SourceKind::Registry,
        SourceKind::FinancialFeed,
        SourceKind::Encyclopedic,
        SourceKind::ReportDerived,
    ];

    /// Canonical lowercase name, matching config keys and output rows.
    pub fn as_str(self) -> &'static str {
        match self {
            SourceKind::Registry => "registry",
            SourceKind::FinancialFeed => "financial_feed",
            SourceKind::Encyclopedic => "encyclopedic",
            SourceKind::ReportDerived => "report_derived",
        }
    }
}

impl std::fmt::Display for SourceKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for SourceKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "registry" => Ok(SourceKind::Registry),
            "financial_feed" => Ok(SourceKind::FinancialFeed),
            "encyclopedic" => Ok(SourceKind::Encyclopedic),
            "report_derived" => Ok(SourceKind::ReportDerived),
            other => Err(format!("unknown source kind: {other}")),
        }
    }
}

// ---------------------------------------------------------------------------
// SourceRecord
// ---------------------------------------------------------------------------

/// One collaborator's normalized observation of an enterprise.
/// Immutable once produced by the normalizer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceRecord {
    /// Which source capability produced this record.
    pub source: SourceKind,
    /// URL or reference identifying the concrete source document.
    pub source_ref: String,
    /// Observation confidence in `[0, 1]`.
    pub confidence: f64,
    /// When the observation was made.
    pub observed_at: DateTime<Utc>,
    /// Reference year the reported figures apply to, when known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_year: Option<i32>,
    /// Observed fields. A field the source could not supply is simply absent.
    pub fields: BTreeMap<FieldKind, FieldValue>,
}

impl SourceRecord {
    /// Value of one field, if the source supplied it.
    pub fn field(&self, kind: FieldKind) -> Option<&FieldValue> {
        self.fields.get(&kind)
    }
}

// ---------------------------------------------------------------------------
// MergedProfile
// ---------------------------------------------------------------------------

/// A reconciled field with its winning provenance, for auditability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MergedField {
    /// The reconciled value.
    pub value: FieldValue,
    /// The source whose value won arbitration.
    pub source: SourceKind,
    /// Reference of the winning source document.
    pub source_ref: String,
    /// Reference year of the winning observation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ref_year: Option<i32>,
}

/// One enterprise's reconciled, single-valued-per-field profile.
/// Built once per enterprise; re-merging the same records is idempotent.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergedProfile {
    /// Identifier of the profiled enterprise.
    pub enterprise_id: String,
    /// Reconciled fields. Absent means no contributing source supplied one.
    pub fields: BTreeMap<FieldKind, MergedField>,
}

impl MergedProfile {
    /// Reconciled value of one field, if any source supplied it.
    pub fn field(&self, kind: FieldKind) -> Option<&MergedField> {
        self.fields.get(&kind)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_id_display_parses_back() {
        let id = RunId::new();
        let parsed = Uuid::parse_str(&id.to_string()).expect("parse uuid");
        assert_eq!(id.0, parsed);
    }

    #[test]
    fn field_value_output_formatting() {
        assert_eq!(FieldValue::Number(120_000_000.0).to_output_string(), "120000000");
        assert_eq!(FieldValue::Number(1.5).to_output_string(), "1.5");
        assert_eq!(
            FieldValue::Text("https://example.com".into()).to_output_string(),
            "https://example.com"
        );
    }

    #[test]
    fn source_kind_roundtrip() {
        for kind in SourceKind::ALL {
            let parsed: SourceKind = kind.as_str().parse().expect("parse source kind");
            assert_eq!(parsed, kind);
        }
        assert!("press_release".parse::<SourceKind>().is_err());
    }

    #[test]
    fn source_record_serialization() {
        let mut fields = BTreeMap::new();
        fields.insert(FieldKind::Turnover, FieldValue::Number(42.0));
        fields.insert(FieldKind::Country, FieldValue::Text("FR".into()));

        let record = SourceRecord {
            source: SourceKind::FinancialFeed,
            source_ref: "https://feed.example.com/q/ACME".into(),
            confidence: 0.9,
            observed_at: Utc::now(),
            ref_year: Some(2024),
            fields,
        };

        let json = serde_json::to_string(&record).expect("serialize");
        let parsed: SourceRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed.source, SourceKind::FinancialFeed);
        assert_eq!(parsed.field(FieldKind::Turnover), Some(&FieldValue::Number(42.0)));
        assert_eq!(parsed.field(FieldKind::Website), None);
    }
}
