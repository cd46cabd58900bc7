//! Thread-pool services for blocking file I/O
//!
//! Shared files (the usage file, the jurisdictions manifest, the cleaned
//! and ordinance directories) are only ever written through these
//! services, which serialize writes per file path and always go through a
//! temp-write + rename so concurrent jurisdictions cannot corrupt them.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Local;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tempfile::{NamedTempFile, TempDir};
use tracing::debug;

use super::base::{Service, ServiceError};
use crate::logs::sanitize_file_stem;

/// Write `content` to `path` atomically via a sibling temp file.
pub fn atomic_write(path: &Path, content: &[u8]) -> Result<(), ServiceError> {
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(dir)?;
    let mut tmp = NamedTempFile::new_in(dir)?;
    tmp.write_all(content)?;
    tmp.persist(path)
        .map_err(|err| ServiceError::Io(err.error))?;
    Ok(())
}

fn read_json_object(path: &Path) -> Map<String, Value> {
    std::fs::read_to_string(path)
        .ok()
        .and_then(|text| serde_json::from_str::<Value>(&text).ok())
        .and_then(|value| match value {
            Value::Object(map) => Some(map),
            _ => None,
        })
        .unwrap_or_default()
}

/// A cached raw download
#[derive(Debug, Clone)]
pub struct CachedFile {
    pub path: PathBuf,
    pub checksum: String,
}

/// Request to cache raw document bytes under a temp directory
#[derive(Debug)]
pub struct CacheRequest {
    pub file_stem: String,
    pub extension: String,
    pub bytes: Vec<u8>,
}

/// Caches downloaded documents in a temporary directory until their
/// jurisdiction task decides to keep them. The directory (and everything
/// still in it) is removed when the scope exits.
#[derive(Default)]
pub struct TempFileCache {
    dir: Mutex<Option<TempDir>>,
}

impl TempFileCache {
    fn cache_dir(&self) -> Result<PathBuf, ServiceError> {
        self.dir
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .map(|d| d.path().to_path_buf())
            .ok_or(ServiceError::NotInitialized {
                name: Self::NAME,
            })
    }
}

#[async_trait]
impl Service for TempFileCache {
    const NAME: &'static str = "TempFileCache";
    type Request = CacheRequest;
    type Response = CachedFile;

    async fn acquire_resources(&self) -> Result<(), ServiceError> {
        let tmp = TempDir::new()?;
        *self.dir.lock().unwrap_or_else(|e| e.into_inner()) = Some(tmp);
        Ok(())
    }

    async fn release_resources(&self) -> Result<(), ServiceError> {
        self.dir.lock().unwrap_or_else(|e| e.into_inner()).take();
        Ok(())
    }

    async fn process(&self, request: Self::Request) -> Result<Self::Response, ServiceError> {
        let dir = self.cache_dir()?;
        tokio::task::spawn_blocking(move || {
            let stem = sanitize_file_stem(&request.file_stem);
            let name = if request.extension.is_empty() {
                stem
            } else {
                format!("{stem}.{}", request.extension)
            };
            let path = dir.join(name);
            std::fs::write(&path, &request.bytes)?;
            let checksum = format!("{:x}", Sha256::digest(&request.bytes));
            debug!(path = %path.display(), %checksum, "cached download");
            Ok(CachedFile { path, checksum })
        })
        .await
        .map_err(|err| ServiceError::Other(err.to_string()))?
    }
}

/// Request to move a cached raw document into the run's ordinance dir
#[derive(Debug)]
pub struct MoveRequest {
    pub cache_path: PathBuf,
    pub dest_stem: String,
}

/// Moves a document out of the temp cache into the ordinance files
/// directory, renaming it to `{stem}_downloaded_{date}`.
pub struct FileMover {
    out_dir: PathBuf,
}

impl FileMover {
    pub fn new(out_dir: impl Into<PathBuf>) -> Self {
        Self {
            out_dir: out_dir.into(),
        }
    }
}

#[async_trait]
impl Service for FileMover {
    const NAME: &'static str = "FileMover";
    type Request = MoveRequest;
    type Response = PathBuf;

    async fn process(&self, request: Self::Request) -> Result<Self::Response, ServiceError> {
        let out_dir = self.out_dir.clone();
        tokio::task::spawn_blocking(move || {
            std::fs::create_dir_all(&out_dir)?;
            let date = Local::now().format("%Y_%m_%d");
            let stem = sanitize_file_stem(&request.dest_stem);
            let name = match request.cache_path.extension().and_then(|e| e.to_str()) {
                Some(ext) => format!("{stem}_downloaded_{date}.{ext}"),
                None => format!("{stem}_downloaded_{date}"),
            };
            let dest = out_dir.join(name);
            match std::fs::rename(&request.cache_path, &dest) {
                Ok(()) => {}
                // cross-device fallback
                Err(_) => {
                    std::fs::copy(&request.cache_path, &dest)?;
                    let _ = std::fs::remove_file(&request.cache_path);
                }
            }
            Ok(dest)
        })
        .await
        .map_err(|err| ServiceError::Other(err.to_string()))?
    }
}

/// Request to write a cleaned ordinance text artifact
#[derive(Debug)]
pub struct CleanedTextRequest {
    pub jurisdiction_name: String,
    pub text: String,
    /// Optional per-stage debug texts written alongside the cleaned output
    pub debug_stages: Vec<(String, String)>,
}

/// Writes cleaned ordinance text (and opt-in per-stage debug text) into
/// the cleaned-text directory.
pub struct CleanedFileWriter {
    clean_dir: PathBuf,
}

impl CleanedFileWriter {
    pub fn new(clean_dir: impl Into<PathBuf>) -> Self {
        Self {
            clean_dir: clean_dir.into(),
        }
    }
}

#[async_trait]
impl Service for CleanedFileWriter {
    const NAME: &'static str = "CleanedFileWriter";
    type Request = CleanedTextRequest;
    type Response = PathBuf;

    async fn process(&self, request: Self::Request) -> Result<Self::Response, ServiceError> {
        let clean_dir = self.clean_dir.clone();
        tokio::task::spawn_blocking(move || {
            let stem = sanitize_file_stem(&request.jurisdiction_name);
            let path = clean_dir.join(format!("{stem} Ordinance Summary.txt"));
            atomic_write(&path, request.text.as_bytes())?;
            for (stage, text) in &request.debug_stages {
                let debug_path = clean_dir.join(format!("{stem}_{stage}.txt"));
                atomic_write(&debug_path, text.as_bytes())?;
            }
            Ok(path)
        })
        .await
        .map_err(|err| ServiceError::Other(err.to_string()))?
    }
}

/// Request to write a per-jurisdiction structured values CSV
#[derive(Debug)]
pub struct ValuesCsvRequest {
    pub jurisdiction_name: String,
    pub csv: String,
}

/// Writes the per-jurisdiction ordinance values CSV.
pub struct ValuesCsvWriter {
    db_dir: PathBuf,
}

impl ValuesCsvWriter {
    pub fn new(db_dir: impl Into<PathBuf>) -> Self {
        Self {
            db_dir: db_dir.into(),
        }
    }
}

#[async_trait]
impl Service for ValuesCsvWriter {
    const NAME: &'static str = "ValuesCsvWriter";
    type Request = ValuesCsvRequest;
    type Response = PathBuf;

    async fn process(&self, request: Self::Request) -> Result<Self::Response, ServiceError> {
        let db_dir = self.db_dir.clone();
        tokio::task::spawn_blocking(move || {
            let stem = sanitize_file_stem(&request.jurisdiction_name);
            let path = db_dir.join(format!("{stem}.csv"));
            atomic_write(&path, request.csv.as_bytes())?;
            Ok(path)
        })
        .await
        .map_err(|err| ServiceError::Other(err.to_string()))?
    }
}

/// Merges jurisdiction usage snapshots into the shared `usage.json`.
pub struct UsageUpdater {
    usage_path: PathBuf,
}

impl UsageUpdater {
    pub fn new(usage_path: impl Into<PathBuf>) -> Self {
        Self {
            usage_path: usage_path.into(),
        }
    }
}

#[async_trait]
impl Service for UsageUpdater {
    const NAME: &'static str = "UsageUpdater";
    type Request = Map<String, Value>;
    type Response = ();

    async fn process(&self, request: Self::Request) -> Result<Self::Response, ServiceError> {
        let path = self.usage_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut existing = read_json_object(&path);
            for (key, value) in request {
                existing.insert(key, value);
            }
            let body = serde_json::to_vec_pretty(&Value::Object(existing))
                .map_err(|err| ServiceError::Other(err.to_string()))?;
            atomic_write(&path, &body)
        })
        .await
        .map_err(|err| ServiceError::Other(err.to_string()))?
    }
}

/// One entry in the jurisdictions manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JurisdictionEntry {
    pub full_name: String,
    pub found: bool,
    pub cost: f64,
    #[serde(default)]
    pub documents: Vec<Value>,
}

/// Appends (or replaces by name) entries in the `jurisdictions.json`
/// manifest.
pub struct JurisdictionUpdater {
    manifest_path: PathBuf,
}

impl JurisdictionUpdater {
    pub fn new(manifest_path: impl Into<PathBuf>) -> Self {
        Self {
            manifest_path: manifest_path.into(),
        }
    }
}

#[async_trait]
impl Service for JurisdictionUpdater {
    const NAME: &'static str = "JurisdictionUpdater";
    type Request = JurisdictionEntry;
    type Response = ();

    async fn process(&self, request: Self::Request) -> Result<Self::Response, ServiceError> {
        let path = self.manifest_path.clone();
        tokio::task::spawn_blocking(move || {
            let mut entries: Vec<JurisdictionEntry> = std::fs::read_to_string(&path)
                .ok()
                .and_then(|text| serde_json::from_str(&text).ok())
                .unwrap_or_default();
            match entries.iter_mut().find(|e| e.full_name == request.full_name) {
                Some(existing) => *existing = request,
                None => entries.push(request),
            }
            let body = serde_json::to_vec_pretty(&entries)
                .map_err(|err| ServiceError::Other(err.to_string()))?;
            atomic_write(&path, &body)
        })
        .await
        .map_err(|err| ServiceError::Other(err.to_string()))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_temp_file_cache_lifecycle() {
        let cache = TempFileCache::default();
        cache.acquire_resources().await.expect("acquire");
        let out = cache
            .process(CacheRequest {
                file_stem: "Test County, ST".to_string(),
                extension: "txt".to_string(),
                bytes: b"test".to_vec(),
            })
            .await
            .expect("cache");
        assert!(out.path.exists());
        assert!(out.path.file_name().unwrap().to_str().unwrap().ends_with(".txt"));
        assert_eq!(
            out.checksum,
            format!("{:x}", Sha256::digest(b"test")),
        );
        cache.release_resources().await.expect("release");
        assert!(!out.path.exists());
    }

    #[tokio::test]
    async fn test_file_mover_renames_with_date() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cached = dir.path().join("download.pdf");
        std::fs::write(&cached, "content").expect("write");

        let out_dir = dir.path().join("out");
        let mover = FileMover::new(&out_dir);
        let moved = mover
            .process(MoveRequest {
                cache_path: cached.clone(),
                dest_stem: "Test County, ST".to_string(),
            })
            .await
            .expect("move");

        let date = Local::now().format("%Y_%m_%d");
        assert_eq!(
            moved.file_name().unwrap().to_str().unwrap(),
            format!("Test_County__ST_downloaded_{date}.pdf")
        );
        assert!(!cached.exists());
        assert_eq!(std::fs::read_to_string(&moved).unwrap(), "content");
    }

    #[tokio::test]
    async fn test_file_mover_handles_extensionless_files() {
        let dir = tempfile::tempdir().expect("tempdir");
        let cached = dir.path().join("download");
        std::fs::write(&cached, "content").expect("write");

        let mover = FileMover::new(dir.path().join("out"));
        let moved = mover
            .process(MoveRequest {
                cache_path: cached,
                dest_stem: "x".to_string(),
            })
            .await
            .expect("move");
        let date = Local::now().format("%Y_%m_%d");
        assert_eq!(
            moved.file_name().unwrap().to_str().unwrap(),
            format!("x_downloaded_{date}")
        );
    }

    #[tokio::test]
    async fn test_cleaned_writer_emits_debug_stages() {
        let dir = tempfile::tempdir().expect("tempdir");
        let writer = CleanedFileWriter::new(dir.path());
        let path = writer
            .process(CleanedTextRequest {
                jurisdiction_name: "Test County, ST".to_string(),
                text: "cleaned".to_string(),
                debug_stages: vec![("energy_systems_text".to_string(), "stage".to_string())],
            })
            .await
            .expect("write");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "cleaned");
        let debug_path = dir.path().join("Test_County__ST_energy_systems_text.txt");
        assert_eq!(std::fs::read_to_string(debug_path).unwrap(), "stage");
    }

    #[tokio::test]
    async fn test_usage_updater_merges_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("usage.json");
        let updater = UsageUpdater::new(&path);

        let mut first = Map::new();
        first.insert("Test County".to_string(), json!({"gpt-4o": {}}));
        updater.process(first).await.expect("write");

        let mut second = Map::new();
        second.insert("total_time_seconds".to_string(), json!(12.5));
        updater.process(second).await.expect("write");

        let body = read_json_object(&path);
        assert!(body.contains_key("Test County"));
        assert_eq!(body.get("total_time_seconds"), Some(&json!(12.5)));
    }

    #[tokio::test]
    async fn test_jurisdiction_updater_replaces_by_name() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("jurisdictions.json");
        let updater = JurisdictionUpdater::new(&path);

        updater
            .process(JurisdictionEntry {
                full_name: "Test County, ST".to_string(),
                found: false,
                cost: 0.0,
                documents: vec![],
            })
            .await
            .expect("write");
        updater
            .process(JurisdictionEntry {
                full_name: "Test County, ST".to_string(),
                found: true,
                cost: 1.25,
                documents: vec![json!({"source": "http://example.com"})],
            })
            .await
            .expect("write");

        let entries: Vec<JurisdictionEntry> =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(entries.len(), 1);
        assert!(entries[0].found);
        assert_eq!(entries[0].documents.len(), 1);
    }

    #[test]
    fn test_atomic_write_creates_parents() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("nested/dir/file.txt");
        atomic_write(&path, b"data").expect("write");
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "data");
    }
}
