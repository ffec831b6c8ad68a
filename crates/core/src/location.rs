//! Compiled-in catalog of grid regions the exporter can publish for.

use serde::Serialize;
use thiserror::Error;

pub const DEFAULT_LOCATION: &str = "DE";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Location {
    pub code: &'static str,
    pub name: &'static str,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LocationError {
    #[error("unknown location code {0:?} (see `carbonfeedctl locations`)")]
    Unknown(String),
}

// Ordered by code; codes follow the grid-zone identifiers the forecast providers use.
const CATALOG: &[Location] = &[
    Location { code: "AT", name: "Austria" },
    Location { code: "AU-NSW", name: "New South Wales" },
    Location { code: "AU-VIC", name: "Victoria" },
    Location { code: "BE", name: "Belgium" },
    Location { code: "CA-ON", name: "Ontario" },
    Location { code: "CA-QC", name: "Quebec" },
    Location { code: "CH", name: "Switzerland" },
    Location { code: "CZ", name: "Czechia" },
    Location { code: "DE", name: "Germany" },
    Location { code: "DK-DK1", name: "West Denmark" },
    Location { code: "DK-DK2", name: "East Denmark" },
    Location { code: "ES", name: "Spain" },
    Location { code: "FI", name: "Finland" },
    Location { code: "FR", name: "France" },
    Location { code: "GB", name: "Great Britain" },
    Location { code: "IE", name: "Ireland" },
    Location { code: "IN-WE", name: "Western India" },
    Location { code: "IT-NO", name: "North Italy" },
    Location { code: "JP-TK", name: "Tokyo" },
    Location { code: "NL", name: "Netherlands" },
    Location { code: "NO-NO1", name: "Southeast Norway" },
    Location { code: "PL", name: "Poland" },
    Location { code: "PT", name: "Portugal" },
    Location { code: "SE-SE3", name: "South Central Sweden" },
    Location { code: "SG", name: "Singapore" },
    Location { code: "US-CAL-CISO", name: "California ISO" },
    Location { code: "US-MIDA-PJM", name: "PJM Interconnection" },
    Location { code: "US-NE-ISNE", name: "ISO New England" },
    Location { code: "US-NW-BPAT", name: "Bonneville Power Administration" },
    Location { code: "US-NY-NYIS", name: "New York ISO" },
    Location { code: "US-TEX-ERCO", name: "ERCOT" },
];

/// All known locations, ordered by code.
pub fn catalog() -> &'static [Location] { CATALOG }

/// Resolve a user-supplied code (ASCII case-insensitive, surrounding whitespace ignored).
pub fn resolve(code: &str) -> Result<Location, LocationError> {
    let wanted = code.trim();
    CATALOG
        .iter()
        .find(|l| l.code.eq_ignore_ascii_case(wanted))
        .copied()
        .ok_or_else(|| LocationError::Unknown(code.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolves_known_codes_case_insensitively() {
        assert_eq!(resolve("DE").unwrap().name, "Germany");
        assert_eq!(resolve(" us-cal-ciso ").unwrap().code, "US-CAL-CISO");
    }

    #[test]
    fn unknown_code_is_typed_error() {
        assert_eq!(resolve("XX").unwrap_err(), LocationError::Unknown("XX".into()));
        assert!(matches!(resolve(""), Err(LocationError::Unknown(_))));
    }

    #[test]
    fn catalog_is_sorted_and_contains_default() {
        let codes: Vec<_> = catalog().iter().map(|l| l.code).collect();
        let mut sorted = codes.clone();
        sorted.sort();
        assert_eq!(codes, sorted);
        assert!(resolve(DEFAULT_LOCATION).is_ok());
    }
}
