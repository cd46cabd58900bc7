//! Command-line interface

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// COMPASS - ordinance extraction for renewable-energy siting
#[derive(Debug, Parser)]
#[command(name = "cx", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Download and extract ordinances for a list of jurisdictions
    Process(ProcessArgs),
}

#[derive(Debug, Args)]
pub struct ProcessArgs {
    /// Path to a YAML config file (defaults to .compass.yml, then
    /// built-in defaults)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Output directory for all run artifacts
    #[arg(short, long)]
    pub out_dir: PathBuf,

    /// Technology to extract ordinances for (wind, solar)
    #[arg(short, long)]
    pub tech: String,

    /// Jurisdiction reference CSV (State/County/Subdivision/Jurisdiction
    /// Type/FIPS/Website)
    #[arg(long)]
    pub reference_file: PathBuf,

    /// CSV listing the jurisdictions to process; omit to process every
    /// reference entry
    #[arg(short, long)]
    pub jurisdiction_file: Option<PathBuf>,

    /// LLM model name override
    #[arg(short, long)]
    pub model: Option<String>,

    /// Token rate limit per rolling window override
    #[arg(long)]
    pub rate_limit: Option<f64>,

    /// Text splitter chunk size override (approximate tokens)
    #[arg(long)]
    pub chunk_size: Option<usize>,

    /// Text splitter chunk overlap override (approximate tokens)
    #[arg(long)]
    pub chunk_overlap: Option<usize>,

    /// Max jurisdictions processed concurrently
    #[arg(long)]
    pub max_concurrent_jurisdictions: Option<usize>,

    /// Max concurrent browser-style document fetches
    #[arg(long)]
    pub max_concurrent_browsers: Option<usize>,

    /// Unique search result URLs to check per jurisdiction
    #[arg(long)]
    pub num_urls: Option<usize>,

    /// Ordered search engines (repeatable): duckduckgo, tavily, brave
    #[arg(long = "search-engine")]
    pub search_engines: Vec<String>,

    /// JSON manifest of known local ordinance documents
    #[arg(long)]
    pub known_docs: Option<PathBuf>,

    /// OCR executable used for scanned PDFs (requires an OCR-capable PDF
    /// parser backend)
    #[arg(long)]
    pub ocr_exe: Option<PathBuf>,

    /// Log level filter (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    pub log_level: String,

    /// Write per-stage narrowing text next to the cleaned output
    #[arg(long)]
    pub debug_stage_text: bool,
}

impl ProcessArgs {
    /// Fold CLI overrides into a loaded config.
    pub fn apply_overrides(&self, config: &mut crate::config::Config) {
        if let Some(model) = &self.model {
            config.llm.model = model.clone();
        }
        if let Some(rate_limit) = self.rate_limit {
            config.llm.rate_limit = rate_limit;
        }
        if let Some(chunk_size) = self.chunk_size {
            config.chunking.chunk_size = chunk_size;
        }
        if let Some(chunk_overlap) = self.chunk_overlap {
            config.chunking.chunk_overlap = chunk_overlap;
        }
        if let Some(max) = self.max_concurrent_jurisdictions {
            config.concurrency.max_concurrent_jurisdictions = Some(max);
        }
        if let Some(max) = self.max_concurrent_browsers {
            config.search.max_concurrent_browsers = max;
        }
        if let Some(num_urls) = self.num_urls {
            config.search.num_urls = num_urls;
        }
        if !self.search_engines.is_empty() {
            config.search.engines = self.search_engines.clone();
        }
        if let Some(known_docs) = &self.known_docs {
            config.search.known_docs_manifest = Some(known_docs.clone());
        }
        if let Some(ocr_exe) = &self.ocr_exe {
            config.search.ocr_exe = Some(ocr_exe.clone());
        }
        if self.debug_stage_text {
            config.extraction.debug_stage_text = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;

    #[test]
    fn test_parse_process_command() {
        let cli = Cli::parse_from([
            "cx",
            "process",
            "--out-dir",
            "/tmp/run",
            "--tech",
            "wind",
            "--reference-file",
            "jurisdictions.csv",
            "--model",
            "gpt-4o-mini",
            "--rate-limit",
            "10000",
            "--search-engine",
            "tavily",
            "--search-engine",
            "duckduckgo",
        ]);
        let Commands::Process(args) = cli.command;
        assert_eq!(args.tech, "wind");
        assert_eq!(args.model.as_deref(), Some("gpt-4o-mini"));
        assert_eq!(args.search_engines, vec!["tavily", "duckduckgo"]);
        assert_eq!(args.log_level, "info");
    }

    #[test]
    fn test_overrides_applied() {
        let cli = Cli::parse_from([
            "cx",
            "process",
            "--out-dir",
            "/tmp/run",
            "--tech",
            "solar",
            "--reference-file",
            "ref.csv",
            "--chunk-size",
            "5000",
            "--max-concurrent-jurisdictions",
            "25",
            "--debug-stage-text",
        ]);
        let Commands::Process(args) = cli.command;
        let mut config = Config::default();
        args.apply_overrides(&mut config);
        assert_eq!(config.chunking.chunk_size, 5000);
        assert_eq!(config.concurrency.max_concurrent_jurisdictions, Some(25));
        assert!(config.extraction.debug_stage_text);
        // untouched fields keep their values
        assert_eq!(config.llm.model, "gpt-4o");
    }
}
