//! Run configuration types and loading
//!
//! Configuration loads from an explicit path, then a project-local
//! `.compass.yml`, then built-in defaults. CLI flags override individual
//! fields after loading.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

/// Configuration errors abort the run eagerly.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("failed to parse config file {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_yaml::Error,
    },

    #[error("unknown technology: {0:?}; supported: wind, solar")]
    UnknownTech(String),

    #[error("unknown retrieval strategy: {0:?}")]
    UnknownStrategy(String),

    #[error("{0}")]
    Value(String),
}

/// Main configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub llm: LlmConfig,
    pub search: SearchConfig,
    pub chunking: ChunkingConfig,
    pub concurrency: ConcurrencyConfig,
    pub extraction: ExtractionConfig,
}

impl Config {
    /// Load configuration with the fallback chain.
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self, ConfigError> {
        if let Some(path) = config_path {
            return Self::load_from_file(path);
        }

        let local = PathBuf::from(".compass.yml");
        if local.exists() {
            match Self::load_from_file(&local) {
                Ok(config) => return Ok(config),
                Err(err) => warn!(%err, "ignoring unreadable local config"),
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user = config_dir.join("compass").join("compass.yml");
            if user.exists() {
                match Self::load_from_file(&user) {
                    Ok(config) => return Ok(config),
                    Err(err) => warn!(%err, "ignoring unreadable user config"),
                }
            }
        }

        info!("no config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config = serde_yaml::from_str(&content).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        info!(path = %path.display(), "loaded config");
        Ok(config)
    }
}

/// LLM provider and rate limit configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Provider name: "openai" or "azure"
    pub provider: String,

    /// Model identifier
    pub model: String,

    /// Environment variable containing the API key
    #[serde(rename = "api-key-env")]
    pub api_key_env: String,

    /// API base URL
    #[serde(rename = "base-url")]
    pub base_url: String,

    /// Token rate limit per rolling window
    #[serde(rename = "rate-limit")]
    pub rate_limit: f64,

    /// Rolling-window size in seconds
    #[serde(rename = "rate-window-secs")]
    pub rate_window_secs: u64,

    /// Request timeout in milliseconds (classified as retryable)
    #[serde(rename = "timeout-ms")]
    pub timeout_ms: u64,

    /// Max attempts per call for retryable errors
    #[serde(rename = "max-retries")]
    pub max_retries: u32,

    /// Sampling temperature forwarded with every call
    pub temperature: Option<f64>,

    /// Seed forwarded with every call
    pub seed: Option<u64>,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            base_url: "https://api.openai.com/v1".to_string(),
            rate_limit: 4000.0,
            rate_window_secs: 60,
            timeout_ms: 300_000,
            max_retries: 5,
            temperature: Some(0.0),
            seed: None,
        }
    }
}

/// Document retrieval configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    /// Ordered retrieval strategies; later entries are fallbacks
    pub strategies: Vec<String>,

    /// Ordered search engine preference; later entries are fallbacks
    pub engines: Vec<String>,

    /// Unique URLs to check per jurisdiction
    #[serde(rename = "num-urls")]
    pub num_urls: usize,

    /// Max concurrent browser-style fetches
    #[serde(rename = "max-concurrent-browsers")]
    pub max_concurrent_browsers: usize,

    /// URLs containing any of these substrings are skipped
    #[serde(rename = "url-ignore-substrings")]
    pub url_ignore_substrings: Vec<String>,

    /// Page budget for the website crawl strategy
    #[serde(rename = "crawl-max-pages")]
    pub crawl_max_pages: usize,

    /// Optional manifest of known local documents
    #[serde(rename = "known-docs-manifest")]
    pub known_docs_manifest: Option<PathBuf>,

    /// Path to an OCR executable for scanned PDFs; requires an
    /// OCR-capable PDF parser backend
    #[serde(rename = "ocr-exe")]
    pub ocr_exe: Option<PathBuf>,

    /// How many top-ranked documents to keep after filtering
    #[serde(rename = "max-docs")]
    pub max_docs: usize,
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            strategies: vec![
                "search-engine".to_string(),
                "crawl-website".to_string(),
                "known-docs".to_string(),
            ],
            engines: vec!["duckduckgo".to_string()],
            num_urls: 5,
            max_concurrent_browsers: 10,
            url_ignore_substrings: Vec::new(),
            crawl_max_pages: 40,
            known_docs_manifest: None,
            ocr_exe: None,
            max_docs: 1,
        }
    }
}

/// Text chunking configuration (approximate tokens)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChunkingConfig {
    #[serde(rename = "chunk-size")]
    pub chunk_size: usize,

    #[serde(rename = "chunk-overlap")]
    pub chunk_overlap: usize,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            chunk_size: 10_000,
            chunk_overlap: 1_000,
        }
    }
}

/// Concurrency caps
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Max jurisdictions processed at once; unset lets the LLM rate
    /// limiter throttle naturally
    #[serde(rename = "max-concurrent-jurisdictions")]
    pub max_concurrent_jurisdictions: Option<usize>,

    /// Workers in the CPU-bound parse pool
    #[serde(rename = "cpu-pool-workers")]
    pub cpu_pool_workers: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_concurrent_jurisdictions: None,
            cpu_pool_workers: 2,
        }
    }
}

/// Extraction tuning knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtractionConfig {
    /// Look-back window for chunk validation (includes the chunk itself)
    #[serde(rename = "num-to-recall")]
    pub num_to_recall: usize,

    /// Chunks always classified before heuristic skipping kicks in
    #[serde(rename = "min-chunks-to-process")]
    pub min_chunks_to_process: usize,

    /// Adders above this many feet are treated as extraction errors
    #[serde(rename = "max-adder-ft")]
    pub max_adder_ft: f64,

    /// Sentence n-gram size for the containment fidelity score
    #[serde(rename = "ngram-size")]
    pub ngram_size: usize,

    /// Write per-stage narrowing text next to the cleaned output
    #[serde(rename = "debug-stage-text")]
    pub debug_stage_text: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            num_to_recall: 2,
            min_chunks_to_process: 3,
            max_adder_ft: 250.0,
            ngram_size: 4,
            debug_stage_text: false,
        }
    }
}
