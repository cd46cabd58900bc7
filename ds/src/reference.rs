//! Jurisdiction reference loading
//!
//! The reference CSV carries one row per known jurisdiction with columns
//! `State`, `County`, `Subdivision`, `Jurisdiction Type`, `FIPS` and
//! `Website`. User-supplied jurisdiction lists only need `State` (and
//! usually `County`); they are joined against the reference by casefolded
//! name to pick up FIPS codes and websites.

use std::collections::HashMap;
use std::path::Path;

use tracing::warn;
use serde::Deserialize;

use crate::error::StoreError;
use crate::jurisdiction::{Jurisdiction, JurisdictionType};

/// A reference entry: the jurisdiction plus its known website, if any
#[derive(Debug, Clone, PartialEq)]
pub struct JurisdictionInfo {
    pub jurisdiction: Jurisdiction,
    pub website: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReferenceRow {
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "County", default)]
    county: Option<String>,
    #[serde(rename = "Subdivision", default)]
    subdivision: Option<String>,
    #[serde(rename = "Jurisdiction Type", default)]
    kind: Option<String>,
    #[serde(rename = "FIPS")]
    fips: u64,
    #[serde(rename = "Website", default)]
    website: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestRow {
    #[serde(rename = "State")]
    state: String,
    #[serde(rename = "County", default)]
    county: Option<String>,
    #[serde(rename = "Subdivision", default)]
    subdivision: Option<String>,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

/// Load the full jurisdiction reference from a CSV file.
pub fn load_reference(path: impl AsRef<Path>) -> Result<Vec<JurisdictionInfo>, StoreError> {
    let mut reader = csv::Reader::from_path(path.as_ref())?;
    require_columns(reader.headers()?, &["State", "FIPS"])?;

    let mut out = Vec::new();
    for row in reader.deserialize::<ReferenceRow>() {
        let row = row?;
        let county = non_empty(row.county);
        let subdivision = non_empty(row.subdivision);
        let kind = row
            .kind
            .as_deref()
            .map(JurisdictionType::parse)
            .unwrap_or(if subdivision.is_some() {
                JurisdictionType::City
            } else if county.is_some() {
                JurisdictionType::County
            } else {
                JurisdictionType::State
            });
        out.push(JurisdictionInfo {
            jurisdiction: Jurisdiction {
                kind,
                state: row.state.trim().to_string(),
                county,
                subdivision,
                code: row.fips,
            },
            website: non_empty(row.website),
        });
    }
    Ok(out)
}

/// Load a user-supplied jurisdiction list and join it against the
/// reference by casefolded `(state, county, subdivision)` name.
///
/// Rows not found in the reference are dropped with a warning. The output
/// order follows the user list.
pub fn select_jurisdictions(
    request_path: impl AsRef<Path>,
    reference: &[JurisdictionInfo],
) -> Result<Vec<JurisdictionInfo>, StoreError> {
    let mut reader = csv::Reader::from_path(request_path.as_ref())?;
    require_columns(reader.headers()?, &["State"])?;

    let by_name: HashMap<_, _> = reference
        .iter()
        .map(|info| (name_key(&info.jurisdiction), info))
        .collect();

    let mut out = Vec::new();
    for row in reader.deserialize::<RequestRow>() {
        let row = row?;
        let key = (
            row.state.trim().to_lowercase(),
            non_empty(row.county).map(|c| c.to_lowercase()),
            non_empty(row.subdivision).map(|s| s.to_lowercase()),
        );
        match by_name.get(&key) {
            Some(info) => out.push((*info).clone()),
            None => warn!(
                "jurisdiction not found in reference: {:?}, {:?}, {:?} \
                 (check spelling)",
                key.2, key.1, key.0
            ),
        }
    }
    Ok(out)
}

fn name_key(j: &Jurisdiction) -> (String, Option<String>, Option<String>) {
    (
        j.state.to_lowercase(),
        j.county.as_ref().map(|c| c.to_lowercase()),
        j.subdivision.as_ref().map(|s| s.to_lowercase()),
    )
}

fn require_columns(headers: &csv::StringRecord, required: &[&str]) -> Result<(), StoreError> {
    let missing: Vec<String> = required
        .iter()
        .filter(|col| !headers.iter().any(|h| h.trim() == **col))
        .map(|col| col.to_string())
        .collect();
    if missing.is_empty() {
        Ok(())
    } else {
        Err(StoreError::MissingColumns(missing))
    }
}
