//! Static mapping from fine-grained NACE codes to coarse section letters.
//!
//! NACE Rev. 2 groups its two-digit divisions into lettered sections
//! (A–U). The table is closed and read-only; a code whose division falls
//! outside it is a data-integrity defect, not a runtime fluke.

use mneprofiler_shared::{ProfilerError, Result};

/// Division ranges per section, inclusive.
const SECTIONS: &[(u8, u8, char)] = &[
    (1, 3, 'A'),   // agriculture, forestry and fishing
    (5, 9, 'B'),   // mining and quarrying
    (10, 33, 'C'), // manufacturing
    (35, 35, 'D'), // electricity, gas, steam
    (36, 39, 'E'), // water supply, waste management
    (41, 43, 'F'), // construction
    (45, 47, 'G'), // wholesale and retail trade
    (49, 53, 'H'), // transportation and storage
    (55, 56, 'I'), // accommodation and food service
    (58, 63, 'J'), // information and communication
    (64, 66, 'K'), // financial and insurance activities
    (68, 68, 'L'), // real estate
    (69, 75, 'M'), // professional, scientific, technical
    (77, 82, 'N'), // administrative and support service
    (84, 84, 'O'), // public administration
    (85, 85, 'P'), // education
    (86, 88, 'Q'), // human health and social work
    (90, 93, 'R'), // arts, entertainment and recreation
    (94, 96, 'S'), // other service activities
    (97, 98, 'T'), // households as employers
    (99, 99, 'U'), // extraterritorial organisations
];

/// Look up the section letter for a NACE code like `"27.20"` or `"64"`.
pub fn section_for(code: &str) -> Result<char> {
    let division: u8 = code
        .trim()
        .split('.')
        .next()
        .unwrap_or("")
        .parse()
        .map_err(|_| {
            ProfilerError::integrity(format!("NACE code {code:?} has no numeric division"))
        })?;

    SECTIONS
        .iter()
        .find(|(lo, hi, _)| (*lo..=*hi).contains(&division))
        .map(|(_, _, letter)| *letter)
        .ok_or_else(|| {
            ProfilerError::integrity(format!(
                "NACE division {division:02} (from code {code:?}) is not in the section mapping"
            ))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_divisions() {
        assert_eq!(section_for("27.20").unwrap(), 'C');
        assert_eq!(section_for("01.11").unwrap(), 'A');
        assert_eq!(section_for("64").unwrap(), 'K');
        assert_eq!(section_for("99").unwrap(), 'U');
        assert_eq!(section_for(" 47.91 ").unwrap(), 'G');
    }

    #[test]
    fn gap_divisions_are_integrity_errors() {
        // 04, 34, 40, 44 ... are unassigned in NACE Rev. 2.
        for code in ["04.10", "34", "40.00", "76.1"] {
            let err = section_for(code).unwrap_err();
            assert!(
                matches!(err, ProfilerError::DataIntegrity { .. }),
                "{code} must be a data-integrity error"
            );
        }
    }

    #[test]
    fn malformed_codes_are_integrity_errors() {
        assert!(section_for("").is_err());
        assert!(section_for("X.20").is_err());
    }
}
