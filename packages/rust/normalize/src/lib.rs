//! Source record normalizer.
//!
//! Converts each collaborator's raw payload into a canonical
//! [`SourceRecord`]: quantities parsed and converted to the reporting
//! currency, countries to ISO alpha-2, websites to canonical URLs, plus a
//! deterministic provenance/confidence tag. Fields that cannot be parsed are
//! left absent, never defaulted to zero.

pub mod country;
pub mod numeric;
pub mod website;

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use mneprofiler_shared::{
    FieldKind, FieldValue, ReportingConfig, SourceKind, SourceRecord,
};

pub use country::canonical_country;
pub use numeric::parse_quantity;
pub use website::canonical_website;

// ---------------------------------------------------------------------------
// Raw collaborator payload
// ---------------------------------------------------------------------------

/// One raw field as reported by a collaborator, before normalization.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawField {
    /// Verbatim value text (`"121.5 million"`, `"France"`, ...).
    pub value: String,
    /// ISO 4217 currency the value is denominated in, when the source says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub currency: Option<String>,
    /// Reference year for the figure, when the source says.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub year: Option<i32>,
}

/// A collaborator's raw observation of one enterprise. Collaborators are
/// interchangeable producers; all source-specific shape ends here.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RawObservation {
    /// URL or reference of the concrete source document.
    pub source_ref: String,
    /// When the observation was made; `None` means "now".
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub observed_at: Option<DateTime<Utc>>,
    /// Raw fields keyed by case-insensitive field name
    /// (`turnover`, `EMPLOYEES`, ...). Unknown names are ignored.
    pub fields: BTreeMap<String, RawField>,
}

impl RawObservation {
    /// Convenience constructor for collaborators building observations.
    pub fn new(source_ref: impl Into<String>) -> Self {
        Self {
            source_ref: source_ref.into(),
            ..Default::default()
        }
    }

    /// Add one raw field.
    pub fn with_field(mut self, name: &str, field: RawField) -> Self {
        self.fields.insert(name.to_string(), field);
        self
    }

    /// Add one raw text field with no currency/year.
    pub fn with_text(self, name: &str, value: impl Into<String>) -> Self {
        self.with_field(
            name,
            RawField {
                value: value.into(),
                ..Default::default()
            },
        )
    }
}

// ---------------------------------------------------------------------------
// Normalization
// ---------------------------------------------------------------------------

/// Base reputation per source capability, the fixed half of the confidence
/// score. Registries are authoritative; encyclopedic data is best-effort.
fn base_reputation(source: SourceKind) -> f64 {
    match source {
        SourceKind::Registry => 0.95,
        SourceKind::FinancialFeed => 0.9,
        SourceKind::ReportDerived => 0.75,
        SourceKind::Encyclopedic => 0.6,
    }
}

/// Normalize a raw collaborator payload into a canonical [`SourceRecord`].
///
/// The reporting config supplies the target currency and fixed exchange
/// rates for monetary fields. Confidence is a deterministic function of
/// source reputation and field completeness.
pub fn normalize(
    raw: &RawObservation,
    source: SourceKind,
    reporting: &ReportingConfig,
) -> SourceRecord {
    let mut fields = BTreeMap::new();
    let mut ref_year: Option<i32> = None;

    for (name, raw_field) in &raw.fields {
        let Some(kind) = field_kind(name) else {
            debug!(source = %source, field = %name, "ignoring unknown field name");
            continue;
        };

        let Some(value) = normalize_field(kind, raw_field, reporting) else {
            debug!(
                source = %source,
                field = %kind,
                raw = %raw_field.value,
                "field unparsable, leaving absent"
            );
            continue;
        };

        if let Some(year) = raw_field.year {
            ref_year = Some(ref_year.map_or(year, |y| y.max(year)));
        }
        fields.insert(kind, value);
    }

    let confidence = confidence_score(source, fields.len());

    SourceRecord {
        source,
        source_ref: raw.source_ref.clone(),
        confidence,
        observed_at: raw.observed_at.unwrap_or_else(Utc::now),
        ref_year,
        fields,
    }
}

/// Normalize one raw field according to its kind. `None` means absent.
fn normalize_field(
    kind: FieldKind,
    raw: &RawField,
    reporting: &ReportingConfig,
) -> Option<FieldValue> {
    match kind {
        FieldKind::Turnover | FieldKind::Assets => {
            let amount = parse_quantity(&raw.value)?;
            let converted = match &raw.currency {
                // No currency stated: assume already in the reporting currency.
                None => amount,
                Some(code) => to_reporting_currency(amount, code, reporting)?,
            };
            Some(FieldValue::Number(converted))
        }
        FieldKind::Employees => Some(FieldValue::Number(parse_quantity(&raw.value)?)),
        FieldKind::Website => Some(FieldValue::Text(canonical_website(&raw.value)?)),
        FieldKind::Country => Some(FieldValue::Text(canonical_country(&raw.value)?)),
        FieldKind::Activity => {
            let text = raw.value.trim();
            (!text.is_empty()).then(|| FieldValue::Text(text.to_string()))
        }
    }
}

/// Convert an amount into the reporting currency using the fixed rate
/// table. Unknown currencies yield `None`: an absent value is better than a
/// guessed rate.
fn to_reporting_currency(amount: f64, currency: &str, reporting: &ReportingConfig) -> Option<f64> {
    let code = currency.trim().to_ascii_uppercase();
    if code == reporting.currency {
        return Some(amount);
    }
    reporting.rates.get(&code).map(|rate| amount * rate)
}

/// Deterministic confidence: reputation base scaled by field completeness.
fn confidence_score(source: SourceKind, supplied: usize) -> f64 {
    let completeness = supplied as f64 / FieldKind::ALL.len() as f64;
    (base_reputation(source) * (0.6 + 0.4 * completeness)).clamp(0.0, 1.0)
}

/// Map a case-insensitive field name to its kind.
fn field_kind(name: &str) -> Option<FieldKind> {
    let lowered = name.trim().to_ascii_lowercase();
    FieldKind::ALL
        .into_iter()
        .find(|kind| kind.as_str() == lowered)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reporting() -> ReportingConfig {
        ReportingConfig::default()
    }

    fn obs() -> RawObservation {
        RawObservation::new("https://en.wikipedia.org/wiki/Acme")
    }

    #[test]
    fn monetary_fields_convert_currency() {
        let raw = obs().with_field(
            "TURNOVER",
            RawField {
                value: "100 million".into(),
                currency: Some("USD".into()),
                year: Some(2024),
            },
        );
        let record = normalize(&raw, SourceKind::Encyclopedic, &reporting());

        // 100M USD at the fixed 0.92 rate.
        let turnover = record
            .field(FieldKind::Turnover)
            .and_then(FieldValue::as_number)
            .expect("turnover present");
        assert!((turnover - 92_000_000.0).abs() < 1.0);
        assert_eq!(record.ref_year, Some(2024));
    }

    #[test]
    fn unknown_currency_leaves_field_absent() {
        let raw = obs().with_field(
            "turnover",
            RawField {
                value: "5 billion".into(),
                currency: Some("XXX".into()),
                year: None,
            },
        );
        let record = normalize(&raw, SourceKind::FinancialFeed, &reporting());
        assert_eq!(record.field(FieldKind::Turnover), None);
    }

    #[test]
    fn unparsable_number_is_absent_not_zero() {
        let raw = obs().with_text("employees", "undisclosed");
        let record = normalize(&raw, SourceKind::Encyclopedic, &reporting());
        assert_eq!(record.field(FieldKind::Employees), None);
    }

    #[test]
    fn text_fields_canonicalized() {
        let raw = obs()
            .with_text("website", "WWW.Acme.com/?utm_source=x")
            .with_text("country", "United Kingdom")
            .with_text("activity", "  Manufacture of batteries  ");
        let record = normalize(&raw, SourceKind::Encyclopedic, &reporting());

        assert_eq!(
            record.field(FieldKind::Website).and_then(|v| v.as_text()),
            Some("https://www.acme.com")
        );
        assert_eq!(
            record.field(FieldKind::Country).and_then(|v| v.as_text()),
            Some("GB")
        );
        assert_eq!(
            record.field(FieldKind::Activity).and_then(|v| v.as_text()),
            Some("Manufacture of batteries")
        );
    }

    #[test]
    fn unknown_field_names_ignored() {
        let raw = obs().with_text("share_price", "42");
        let record = normalize(&raw, SourceKind::FinancialFeed, &reporting());
        assert!(record.fields.is_empty());
    }

    #[test]
    fn confidence_is_deterministic_and_ranked() {
        let complete = obs()
            .with_text("country", "France")
            .with_text("website", "acme.com")
            .with_text("activity", "retail");
        let sparse = obs().with_text("country", "France");

        let a = normalize(&complete, SourceKind::Registry, &reporting());
        let b = normalize(&complete, SourceKind::Registry, &reporting());
        let c = normalize(&sparse, SourceKind::Registry, &reporting());
        let d = normalize(&complete, SourceKind::Encyclopedic, &reporting());

        assert_eq!(a.confidence, b.confidence);
        assert!(a.confidence > c.confidence);
        assert!(a.confidence > d.confidence);
        assert!((0.0..=1.0).contains(&a.confidence));
    }
}
