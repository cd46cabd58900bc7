//! Run directory finalization: meta.json

use chrono::{DateTime, Utc};
use serde_json::{Map, Value, json};

use crate::config::Config;
use crate::services::base::ServiceError;
use crate::services::threaded::atomic_write;

use super::Directories;

/// Counts and cost summarizing one run
#[derive(Debug, Clone, Copy)]
pub struct RunCounts {
    pub searched: usize,
    pub found: usize,
    pub cost: f64,
}

/// Write `meta.json`: who ran it, with what model configuration, when,
/// and where the outputs are relative to the run root.
pub fn save_run_meta(
    dirs: &Directories,
    tech: &str,
    config: &Config,
    start_date: DateTime<Utc>,
    end_date: DateTime<Utc>,
    counts: RunCounts,
) -> Result<(), ServiceError> {
    let username = std::env::var("USER")
        .or_else(|_| std::env::var("USERNAME"))
        .unwrap_or_else(|_| "Unknown".to_string());
    let elapsed = end_date - start_date;

    let meta = json!({
        "username": username,
        "versions": {
            "compass": env!("CARGO_PKG_VERSION"),
        },
        "technology": tech,
        "models": [model_info(config)],
        "time_start_utc": start_date.to_rfc3339(),
        "time_end_utc": end_date.to_rfc3339(),
        "total_time": elapsed.num_seconds(),
        "total_time_string": format_elapsed(elapsed.num_seconds()),
        "num_jurisdictions_searched": counts.searched,
        "num_jurisdictions_found": counts.found,
        "cost": if counts.cost > 0.0 { json!(counts.cost) } else { Value::Null },
        "manifest": manifest(dirs),
    });

    let body = serde_json::to_vec_pretty(&meta).map_err(|e| ServiceError::Other(e.to_string()))?;
    atomic_write(&dirs.out.join("meta.json"), &body)
}

/// Model configuration entry; callers sharing one configuration are
/// grouped with the tasks they serve.
fn model_info(config: &Config) -> Value {
    json!({
        "name": config.llm.model,
        "provider": config.llm.provider,
        "rate_limit": config.llm.rate_limit,
        "text_splitter_chunk_size": config.chunking.chunk_size,
        "text_splitter_chunk_overlap": config.chunking.chunk_overlap,
        "tasks": [
            "document_content_validation",
            "document_location_validation",
            "document_ordinance_summary",
            "ordinance_value_extraction",
            "permitted_use_value_extraction",
        ],
    })
}

fn manifest(dirs: &Directories) -> Map<String, Value> {
    let entries = [
        ("LOG_DIR", dirs.logs.clone()),
        ("CLEAN_FILE_DIR", dirs.clean.clone()),
        ("JURISDICTION_DBS_DIR", dirs.jurisdiction_dbs.clone()),
        ("ORDINANCE_FILES_DIR", dirs.ordinance_files.clone()),
        ("USAGE_FILE", dirs.out.join("usage.json")),
        ("JURISDICTION_FILE", dirs.out.join("jurisdictions.json")),
        ("QUANT_DATA_FILE", dirs.out.join("quantitative_ordinances.csv")),
        ("QUAL_DATA_FILE", dirs.out.join("qualitative_ordinances.csv")),
    ];
    let mut out = Map::new();
    for (name, path) in entries {
        let value = if path.exists() {
            path.strip_prefix(&dirs.out)
                .map(|rel| json!(rel.display().to_string()))
                .unwrap_or_else(|_| json!(path.display().to_string()))
        } else {
            Value::Null
        };
        out.insert(name.to_string(), value);
    }
    out.insert("META_FILE".to_string(), json!("meta.json"));
    out
}

fn format_elapsed(total_seconds: i64) -> String {
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;
    format!("{hours}:{minutes:02}:{seconds:02}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_save_run_meta() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dirs = Directories::create(dir.path()).expect("dirs");
        std::fs::write(dirs.out.join("usage.json"), "{}").expect("usage");

        let start = Utc.with_ymd_and_hms(2026, 1, 15, 10, 0, 0).unwrap();
        let end = Utc.with_ymd_and_hms(2026, 1, 15, 11, 30, 5).unwrap();
        save_run_meta(
            &dirs,
            "wind",
            &Config::default(),
            start,
            end,
            RunCounts {
                searched: 10,
                found: 4,
                cost: 1.25,
            },
        )
        .expect("meta");

        let meta: Value = serde_json::from_str(
            &std::fs::read_to_string(dirs.out.join("meta.json")).expect("read"),
        )
        .expect("json");
        assert_eq!(meta["technology"], "wind");
        assert_eq!(meta["num_jurisdictions_searched"], 10);
        assert_eq!(meta["num_jurisdictions_found"], 4);
        assert_eq!(meta["total_time"], 5405);
        assert_eq!(meta["total_time_string"], "1:30:05");
        assert_eq!(meta["manifest"]["USAGE_FILE"], "usage.json");
        assert_eq!(meta["manifest"]["QUANT_DATA_FILE"], Value::Null);
        assert_eq!(meta["manifest"]["META_FILE"], "meta.json");
        assert_eq!(meta["models"][0]["name"], "gpt-4o");
    }

    #[test]
    fn test_format_elapsed() {
        assert_eq!(format_elapsed(0), "0:00:00");
        assert_eq!(format_elapsed(61), "0:01:01");
        assert_eq!(format_elapsed(3661), "1:01:01");
    }
}
