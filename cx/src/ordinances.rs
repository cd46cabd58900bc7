//! Ordinance value rows and tabular output
//!
//! Structured extraction produces one [`OrdinanceRow`] per feature (or
//! per ownership class of a feature). The run driver joins rows with
//! jurisdiction metadata into [`OrdinanceRecord`]s and splits them into
//! the quantitative and qualitative CSVs with fixed column orders.

use serde_json::{Map, Value};

use docstore::Jurisdiction;

/// Column order of the quantitative output CSV
pub const QUANT_COLS: &[&str] = &[
    "state",
    "county",
    "subdivision",
    "jurisdiction_type",
    "FIPS",
    "feature",
    "value",
    "units",
    "adder",
    "min_dist",
    "max_dist",
    "summary",
    "ord_year",
    "last_updated",
    "section",
    "source",
];

/// Column order of the per-jurisdiction values CSV (both row kinds,
/// with the quantitative flag)
pub const PARSED_COLS: &[&str] = &[
    "state",
    "county",
    "subdivision",
    "jurisdiction_type",
    "FIPS",
    "feature",
    "value",
    "units",
    "adder",
    "min_dist",
    "max_dist",
    "summary",
    "ord_year",
    "last_updated",
    "section",
    "source",
    "quantitative",
];

/// Column order of the qualitative output CSV
pub const QUAL_COLS: &[&str] = &[
    "state",
    "county",
    "subdivision",
    "jurisdiction_type",
    "FIPS",
    "feature",
    "summary",
    "ord_year",
    "last_updated",
    "section",
    "source",
];

/// One extracted ordinance value for a feature.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct OrdinanceRow {
    pub feature: String,
    pub value: Option<f64>,
    pub units: Option<String>,
    pub adder: Option<f64>,
    pub min_dist: Option<f64>,
    pub max_dist: Option<f64>,
    pub summary: Option<String>,
    pub section: Option<String>,
    pub quantitative: bool,
}

impl OrdinanceRow {
    /// A row with only a feature label, used when nothing was found
    pub fn empty(feature: impl Into<String>, quantitative: bool) -> Self {
        Self {
            feature: feature.into(),
            quantitative,
            ..Self::default()
        }
    }

    /// A row is empty when none of value, adder, min_dist, max_dist, or
    /// summary is set. Empty rows do not count as extracted ordinances.
    pub fn is_empty(&self) -> bool {
        self.value.is_none()
            && self.adder.is_none()
            && self.min_dist.is_none()
            && self.max_dist.is_none()
            && self.summary.is_none()
    }

    /// Fold decision-tree JSON output into this row. Recognized keys are
    /// value, units, adder, min_dist, max_dist, summary, and section;
    /// unknown keys are ignored.
    pub fn absorb_json(&mut self, map: &Map<String, Value>) {
        if let Some(v) = map.get("value").and_then(json_num) {
            self.value = Some(v);
        }
        if let Some(v) = map.get("units").and_then(json_str) {
            self.units = Some(v);
        }
        if let Some(v) = map.get("adder").and_then(json_num) {
            self.adder = Some(v);
        }
        if let Some(v) = map.get("min_dist").and_then(json_num) {
            self.min_dist = Some(v);
        }
        if let Some(v) = map.get("max_dist").and_then(json_num) {
            self.max_dist = Some(v);
        }
        if let Some(v) = map.get("summary").and_then(json_str) {
            self.summary = Some(v);
        }
        if let Some(v) = map.get("section").and_then(json_str) {
            self.section = Some(v);
        }
    }
}

/// Read a JSON number, accepting numeric strings the model sometimes
/// returns.
pub fn json_num(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().replace(',', "").parse().ok(),
        _ => None,
    }
}

/// Read a JSON string, rejecting explicit nulls
pub fn json_str(value: &Value) -> Option<String> {
    value.as_str().map(|s| s.to_string()).filter(|s| !s.is_empty())
}

/// Normalize multiplier-dialog output keys: `mult_value` becomes `value`
/// and `mult_type` becomes `units`.
pub fn normalize_multiplier_keys(map: &mut Map<String, Value>) {
    if let Some(v) = map.remove("mult_value") {
        map.insert("value".to_string(), v);
    }
    if let Some(v) = map.remove("mult_type") {
        map.insert("units".to_string(), v);
    }
}

/// Drop stray units/summary when no numeric value was extracted.
pub fn sanitize_numeric_output(map: &mut Map<String, Value>) {
    let has_value = map.get("value").and_then(json_num).is_some()
        || map.get("adder").and_then(json_num).is_some();
    if !has_value {
        map.remove("units");
        map.remove("summary");
    }
}

/// An ordinance row joined with its jurisdiction and document metadata.
#[derive(Debug, Clone)]
pub struct OrdinanceRecord {
    pub row: OrdinanceRow,
    pub state: String,
    pub county: Option<String>,
    pub subdivision: Option<String>,
    pub jurisdiction_type: String,
    pub fips: u64,
    pub ord_year: Option<i64>,
    pub last_updated: String,
    pub source: Option<String>,
}

impl OrdinanceRecord {
    pub fn new(
        row: OrdinanceRow,
        jurisdiction: &Jurisdiction,
        ord_year: Option<i64>,
        last_updated: String,
        source: Option<String>,
    ) -> Self {
        Self {
            row,
            state: jurisdiction.state.clone(),
            county: jurisdiction.county.clone(),
            subdivision: jurisdiction.subdivision.clone(),
            jurisdiction_type: jurisdiction.kind.label().to_string(),
            fips: jurisdiction.code,
            ord_year,
            last_updated,
            source,
        }
    }

    fn field(&self, column: &str) -> String {
        fn num(v: Option<f64>) -> String {
            v.map(fmt_num).unwrap_or_default()
        }
        match column {
            "state" => self.state.clone(),
            "county" => self.county.clone().unwrap_or_default(),
            "subdivision" => self.subdivision.clone().unwrap_or_default(),
            "jurisdiction_type" => self.jurisdiction_type.clone(),
            "FIPS" => self.fips.to_string(),
            "feature" => self.row.feature.clone(),
            "value" => num(self.row.value),
            "units" => self.row.units.clone().unwrap_or_default(),
            "adder" => num(self.row.adder),
            "min_dist" => num(self.row.min_dist),
            "max_dist" => num(self.row.max_dist),
            "summary" => self.row.summary.clone().unwrap_or_default(),
            "ord_year" => self.ord_year.map(|y| y.to_string()).unwrap_or_default(),
            "last_updated" => self.last_updated.clone(),
            "section" => self.row.section.clone().unwrap_or_default(),
            "source" => self.source.clone().unwrap_or_default(),
            "quantitative" => self.row.quantitative.to_string(),
            _ => String::new(),
        }
    }
}

fn fmt_num(v: f64) -> String {
    if v.fract() == 0.0 && v.abs() < 1e15 {
        format!("{}", v as i64)
    } else {
        format!("{v}")
    }
}

/// Post-processing adjustments based on empirical observations.
///
/// Adder values above `max_adder` are nulled: models like to report large
/// numbers here, but observed ordinance adders stay at or below 250 ft,
/// so anything larger is treated as an extraction error. The cutoff is a
/// configuration knob; the boundary value itself is preserved.
pub fn apply_empirical_adjustments(records: &mut [OrdinanceRecord], max_adder: f64) {
    for record in records {
        if record.row.adder.is_some_and(|a| a > max_adder) {
            record.row.adder = None;
        }
    }
}

/// Render records into a CSV string with the given column order. With
/// `quantitative` set, records whose flag does not match are skipped;
/// `None` keeps every record.
pub fn records_to_csv(
    records: &[OrdinanceRecord],
    columns: &[&str],
    quantitative: Option<bool>,
) -> Result<String, csv::Error> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(columns)?;
    for record in records {
        if quantitative.is_some_and(|flag| record.row.quantitative != flag) {
            continue;
        }
        let fields: Vec<String> = columns.iter().map(|col| record.field(col)).collect();
        writer.write_record(&fields)?;
    }
    let bytes = writer.into_inner().map_err(|e| e.into_error())?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Count extracted (non-empty) ordinance values among rows
pub fn num_ordinances(rows: &[OrdinanceRow]) -> usize {
    rows.iter()
        .map(|row| {
            [
                row.value.is_some(),
                row.adder.is_some(),
                row.min_dist.is_some(),
                row.max_dist.is_some(),
                row.summary.is_some(),
            ]
            .into_iter()
            .filter(|set| *set)
            .count()
        })
        .sum()
}
