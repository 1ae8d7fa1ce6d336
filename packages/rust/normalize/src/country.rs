//! Country-name canonicalization to ISO 3166-1 alpha-2 codes.
//!
//! Sources report countries as English names, adjectival forms, or codes.
//! The table below covers the economies MNE profiling encounters in
//! practice; unknown names return `None` and the field stays absent.

/// English name (lowercase) → ISO alpha-2 code.
const COUNTRY_TABLE: &[(&str, &str)] = &[
    ("argentina", "AR"),
    ("australia", "AU"),
    ("austria", "AT"),
    ("belgium", "BE"),
    ("brazil", "BR"),
    ("canada", "CA"),
    ("china", "CN"),
    ("czech republic", "CZ"),
    ("czechia", "CZ"),
    ("denmark", "DK"),
    ("finland", "FI"),
    ("france", "FR"),
    ("germany", "DE"),
    ("greece", "GR"),
    ("hong kong", "HK"),
    ("hungary", "HU"),
    ("india", "IN"),
    ("indonesia", "ID"),
    ("ireland", "IE"),
    ("israel", "IL"),
    ("italy", "IT"),
    ("japan", "JP"),
    ("luxembourg", "LU"),
    ("mexico", "MX"),
    ("netherlands", "NL"),
    ("the netherlands", "NL"),
    ("norway", "NO"),
    ("poland", "PL"),
    ("portugal", "PT"),
    ("russia", "RU"),
    ("russian federation", "RU"),
    ("saudi arabia", "SA"),
    ("singapore", "SG"),
    ("south africa", "ZA"),
    ("south korea", "KR"),
    ("korea", "KR"),
    ("republic of korea", "KR"),
    ("spain", "ES"),
    ("sweden", "SE"),
    ("switzerland", "CH"),
    ("taiwan", "TW"),
    ("turkey", "TR"),
    ("united arab emirates", "AE"),
    ("uae", "AE"),
    ("united kingdom", "GB"),
    ("great britain", "GB"),
    ("uk", "GB"),
    ("u.k.", "GB"),
    ("england", "GB"),
    ("united states", "US"),
    ("united states of america", "US"),
    ("usa", "US"),
    ("u.s.", "US"),
    ("u.s.a.", "US"),
    ("america", "US"),
];

/// Canonicalize a country name or code to ISO alpha-2.
///
/// Already-canonical two-letter codes pass through uppercased; leading
/// articles ("the ...") are tolerated.
pub fn canonical_country(raw: &str) -> Option<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return None;
    }

    // Two alphabetic characters: treat as an alpha-2 code already.
    if trimmed.len() == 2 && trimmed.chars().all(|c| c.is_ascii_alphabetic()) {
        let code = trimmed.to_ascii_uppercase();
        // "uk" reads as a name, not the (reserved) ISO code.
        if code != "UK" {
            return Some(code);
        }
    }

    let lowered = trimmed.to_lowercase();
    let lookup = |name: &str| {
        COUNTRY_TABLE
            .iter()
            .find(|(n, _)| *n == name)
            .map(|(_, code)| (*code).to_string())
    };

    lookup(&lowered).or_else(|| lookup(lowered.strip_prefix("the ")?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn common_names() {
        assert_eq!(canonical_country("France").as_deref(), Some("FR"));
        assert_eq!(canonical_country("United States").as_deref(), Some("US"));
        assert_eq!(canonical_country("south korea").as_deref(), Some("KR"));
    }

    #[test]
    fn codes_pass_through() {
        assert_eq!(canonical_country("fr").as_deref(), Some("FR"));
        assert_eq!(canonical_country("DE").as_deref(), Some("DE"));
    }

    #[test]
    fn uk_maps_to_gb() {
        assert_eq!(canonical_country("UK").as_deref(), Some("GB"));
        assert_eq!(canonical_country("United Kingdom").as_deref(), Some("GB"));
    }

    #[test]
    fn articles_and_whitespace() {
        assert_eq!(canonical_country("  The Netherlands ").as_deref(), Some("NL"));
    }

    #[test]
    fn unknown_stays_absent() {
        assert_eq!(canonical_country("Atlantis"), None);
        assert_eq!(canonical_country(""), None);
    }
}
