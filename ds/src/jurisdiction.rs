//! Jurisdiction type - an administrative area whose ordinances are extracted

use std::fmt;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};

/// Kind of administrative area
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JurisdictionType {
    State,
    County,
    Parish,
    City,
    Town,
    Borough,
    Township,
    Gore,
    Other,
}

impl JurisdictionType {
    /// Parse a jurisdiction type label, case-insensitively.
    /// Unrecognized labels map to `Other`.
    pub fn parse(label: &str) -> Self {
        match label.trim().to_lowercase().as_str() {
            "state" => Self::State,
            "county" => Self::County,
            "parish" => Self::Parish,
            "city" => Self::City,
            "town" => Self::Town,
            "borough" => Self::Borough,
            "township" => Self::Township,
            "gore" => Self::Gore,
            _ => Self::Other,
        }
    }

    /// Display label, e.g. "County"
    pub fn label(&self) -> &'static str {
        match self {
            Self::State => "State",
            Self::County => "County",
            Self::Parish => "Parish",
            Self::City => "City",
            Self::Town => "Town",
            Self::Borough => "Borough",
            Self::Township => "Township",
            Self::Gore => "Gore",
            Self::Other => "Jurisdiction",
        }
    }
}

impl fmt::Display for JurisdictionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// An administrative area identified by type, state, optional county,
/// optional subdivision, and a numeric code (FIPS or similar).
///
/// Equality treats jurisdictions with the same type, state, casefolded
/// county and casefolded subdivision as equal; hashing agrees with
/// equality. `full_name` is stable and case-insensitive under equality.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Jurisdiction {
    pub kind: JurisdictionType,
    pub state: String,
    pub county: Option<String>,
    pub subdivision: Option<String>,
    /// Numeric code, unique per jurisdiction (typically FIPS)
    pub code: u64,
}

impl Jurisdiction {
    /// Create a county-level jurisdiction
    pub fn county(county: impl Into<String>, state: impl Into<String>, code: u64) -> Self {
        Self {
            kind: JurisdictionType::County,
            state: state.into(),
            county: Some(county.into()),
            subdivision: None,
            code,
        }
    }

    /// Create a state-level jurisdiction
    pub fn state(state: impl Into<String>, code: u64) -> Self {
        Self {
            kind: JurisdictionType::State,
            state: state.into(),
            county: None,
            subdivision: None,
            code,
        }
    }

    /// Create a subdivision-level jurisdiction (city, town, township, ...)
    pub fn subdivision(
        kind: JurisdictionType,
        name: impl Into<String>,
        county: Option<String>,
        state: impl Into<String>,
        code: u64,
    ) -> Self {
        Self {
            kind,
            state: state.into(),
            county,
            subdivision: Some(name.into()),
            code,
        }
    }

    /// Full, stable display name.
    ///
    /// Examples: `"Decatur County, Indiana"`, `"Acadia Parish, Louisiana"`,
    /// `"Town of Barton, Orleans County, Vermont"`, `"Indiana"`.
    pub fn full_name(&self) -> String {
        match (&self.subdivision, &self.county) {
            (Some(sub), Some(county)) => format!(
                "{} of {}, {} County, {}",
                self.kind.label(),
                sub,
                county,
                self.state
            ),
            (Some(sub), None) => format!("{} of {}, {}", self.kind.label(), sub, self.state),
            (None, Some(county)) => match self.kind {
                JurisdictionType::Parish => format!("{} Parish, {}", county, self.state),
                _ => format!("{} County, {}", county, self.state),
            },
            (None, None) => self.state.clone(),
        }
    }

    /// Phrase naming the county level, used in validation prompts
    pub fn county_phrase(&self) -> Option<String> {
        self.county.as_ref().map(|c| match self.kind {
            JurisdictionType::Parish => format!("{} Parish", c),
            _ => format!("{} County", c),
        })
    }

    /// Phrase naming the subdivision level, used in validation prompts
    pub fn subdivision_phrase(&self) -> Option<String> {
        self.subdivision
            .as_ref()
            .map(|s| format!("{} of {}", self.kind.label(), s))
    }

    fn eq_key(&self) -> (JurisdictionType, String, Option<String>, Option<String>) {
        (
            self.kind,
            self.state.to_lowercase(),
            self.county.as_ref().map(|c| c.to_lowercase()),
            self.subdivision.as_ref().map(|s| s.to_lowercase()),
        )
    }
}

impl PartialEq for Jurisdiction {
    fn eq(&self, other: &Self) -> bool {
        self.eq_key() == other.eq_key()
    }
}

impl Eq for Jurisdiction {}

impl Hash for Jurisdiction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.eq_key().hash(state);
    }
}

impl fmt::Display for Jurisdiction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.full_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_full_name_formats() {
        let county = Jurisdiction::county("Decatur", "Indiana", 18031);
        assert_eq!(county.full_name(), "Decatur County, Indiana");

        let parish = Jurisdiction {
            kind: JurisdictionType::Parish,
            state: "Louisiana".to_string(),
            county: Some("Acadia".to_string()),
            subdivision: None,
            code: 22001,
        };
        assert_eq!(parish.full_name(), "Acadia Parish, Louisiana");

        let town = Jurisdiction::subdivision(
            JurisdictionType::Town,
            "Barton",
            Some("Orleans".to_string()),
            "Vermont",
            5000,
        );
        assert_eq!(town.full_name(), "Town of Barton, Orleans County, Vermont");

        let state = Jurisdiction::state("Indiana", 18);
        assert_eq!(state.full_name(), "Indiana");
    }

    #[test]
    fn test_equality_is_case_insensitive() {
        let a = Jurisdiction::county("Decatur", "Indiana", 18031);
        let b = Jurisdiction::county("DECATUR", "indiana", 99999);
        assert_eq!(a, b);
    }

    #[test]
    fn test_hash_agrees_with_equality() {
        let a = Jurisdiction::county("Decatur", "Indiana", 18031);
        let b = Jurisdiction::county("decatur", "INDIANA", 18031);
        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_different_kinds_are_not_equal() {
        let county = Jurisdiction::county("Madison", "Indiana", 1);
        let parish = Jurisdiction {
            kind: JurisdictionType::Parish,
            state: "Indiana".to_string(),
            county: Some("Madison".to_string()),
            subdivision: None,
            code: 1,
        };
        assert_ne!(county, parish);
    }

    #[test]
    fn test_type_parse() {
        assert_eq!(JurisdictionType::parse("County"), JurisdictionType::County);
        assert_eq!(JurisdictionType::parse("  parish "), JurisdictionType::Parish);
        assert_eq!(JurisdictionType::parse("village"), JurisdictionType::Other);
    }
}
