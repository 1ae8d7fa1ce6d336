//! Tolerant numeric parsing for figures lifted from heterogeneous sources.
//!
//! Accepts thousands separators in several locales (`1,234,567`,
//! `1.234.567`, `1 234 567`, `1'234'567`, `1_234_567`), decimal comma or
//! point, and magnitude suffixes (`120.5 million`, `3bn`, `45k`). Returns
//! `None` for anything it cannot parse with confidence — absent and zero
//! are never conflated.

use std::sync::LazyLock;

use regex::Regex;

/// First numeric token in a string: digits possibly interleaved with
/// grouping/decimal characters, ending on a digit.
static NUMBER_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\d[\d.,'_\u{a0} ]*\d|\d").expect("valid number regex"));

/// Magnitude words/suffixes and their multipliers. Longest-match first so
/// `bn` wins over `b` and `million` over `m`.
const MAGNITUDES: &[(&str, f64)] = &[
    ("thousands", 1e3),
    ("thousand", 1e3),
    ("millions", 1e6),
    ("million", 1e6),
    ("billions", 1e9),
    ("billion", 1e9),
    ("trillion", 1e12),
    ("mio", 1e6),
    ("mrd", 1e9),
    ("bn", 1e9),
    ("mn", 1e6),
    ("tn", 1e12),
    ("k", 1e3),
    ("m", 1e6),
    ("b", 1e9),
];

/// Parse a quantity like `"120,000,000"`, `"€121.5 million"` or `"45k"`.
pub fn parse_quantity(text: &str) -> Option<f64> {
    let token = NUMBER_RE.find(text)?.as_str();
    let base = parse_separated(token)?;
    Some(base * magnitude_after(text, token))
}

/// Find the magnitude suffix following the numeric token, if any.
fn magnitude_after(text: &str, token: &str) -> f64 {
    let start = match text.find(token) {
        Some(pos) => pos + token.len(),
        None => return 1.0,
    };
    let rest = text[start..].trim_start().to_ascii_lowercase();

    for (word, multiplier) in MAGNITUDES {
        if let Some(tail) = rest.strip_prefix(word) {
            // Must end at a word boundary: "3m" and "3 million people" count,
            // "3 meters" must not.
            if tail.chars().next().is_none_or(|c| !c.is_ascii_alphanumeric()) {
                return *multiplier;
            }
        }
    }
    1.0
}

/// Parse a digit string with locale-variant grouping and decimal marks.
fn parse_separated(token: &str) -> Option<f64> {
    // Spaces, apostrophes, underscores, and non-breaking spaces only ever
    // group thousands.
    let cleaned: String = token
        .chars()
        .filter(|c| !matches!(c, ' ' | '\'' | '_' | '\u{a0}'))
        .collect();

    let commas = cleaned.matches(',').count();
    let points = cleaned.matches('.').count();

    let normalized = match (commas, points) {
        (0, 0) => cleaned,
        // Both present: the later mark is the decimal separator.
        (c, p) if c > 0 && p > 0 => {
            let last_comma = cleaned.rfind(',').unwrap_or(0);
            let last_point = cleaned.rfind('.').unwrap_or(0);
            if last_point > last_comma {
                cleaned.replace(',', "")
            } else {
                cleaned.replace('.', "").replace(',', ".")
            }
        }
        // A single mark repeated can only be grouping.
        (c, 0) if c > 1 => cleaned.replace(',', ""),
        (0, p) if p > 1 => cleaned.replace('.', ""),
        // One lone mark: groups of exactly three trailing digits read as
        // thousands separators, anything else as a decimal mark.
        (1, 0) => disambiguate_single(&cleaned, ','),
        (0, 1) => disambiguate_single(&cleaned, '.'),
        _ => cleaned,
    };

    normalized.parse::<f64>().ok()
}

fn disambiguate_single(cleaned: &str, mark: char) -> String {
    match cleaned.split(mark).nth(1) {
        Some(trailing) if trailing.len() == 3 => cleaned.replace(mark, ""),
        _ => cleaned.replace(mark, "."),
    }
}
