//! Run orchestration: the per-jurisdiction pipeline and the fan-out
//! driver
//!
//! The driver loads the jurisdiction list, stands up the service scope
//! (LLM, file writers, CPU pool), and spawns one task per jurisdiction
//! bounded by the configured cap (or throttled naturally by the LLM rate
//! limiter). Jurisdiction failures are isolated: a crashed task logs its
//! error into its own log file and yields no result, and the driver only
//! dies on configuration or initialization errors.

pub mod finalize;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::{Local, Utc};
use eyre::{Result, WrapErr, bail, eyre};
use serde_json::{Map, Value, json};
use tokio::sync::Semaphore;
use tracing::{error, info, warn};

use docstore::{Document, Jurisdiction, JurisdictionInfo, attrs, load_reference, select_jurisdictions};

use crate::config::Config;
use crate::extraction::{
    PermittedUseDistrictsParser, TechProfile, check_for_ordinance_info, extract_ordinance_text,
    extract_ordinance_values,
};
use crate::llm::client::{CallKwargs, LlmClient};
use crate::llm::{LlmService, RetryPolicy, StructuredLlmCaller, create_client};
use crate::logs::{self, LogListener};
use crate::ordinances::{
    OrdinanceRecord, PARSED_COLS, QUAL_COLS, QUANT_COLS, apply_empirical_adjustments,
    num_ordinances, records_to_csv,
};
use crate::pb;
use crate::retrieval::funnel::{DocumentFilter, RetrievalPlan, RetrievalStrategy};
use crate::retrieval::known::known_paths_for;
use crate::retrieval::{DocumentLoader, SearchEngineChain, build_engines};
use crate::services::base::{ServiceError, ServicesBuilder, call};
use crate::services::cpu::{NoopPdfParser, PdfLoader};
use crate::services::threaded::{
    CleanedFileWriter, CleanedTextRequest, FileMover, JurisdictionEntry, JurisdictionUpdater,
    MoveRequest, TempFileCache, UsageUpdater, ValuesCsvRequest, ValuesCsvWriter, atomic_write,
};
use crate::services::usage::{SharedUsage, UsageTracker, usage_from_response};
use crate::text::TextSplitter;
use crate::validation::location::{JurisdictionNameValidator, JurisdictionValidator};

/// Output directory layout for one run
#[derive(Debug, Clone)]
pub struct Directories {
    pub out: PathBuf,
    pub logs: PathBuf,
    pub clean: PathBuf,
    pub ordinance_files: PathBuf,
    pub jurisdiction_dbs: PathBuf,
}

impl Directories {
    pub fn create(out_dir: &Path) -> Result<Self, ServiceError> {
        let dirs = Self {
            out: out_dir.to_path_buf(),
            logs: out_dir.join("logs"),
            clean: out_dir.join("cleaned_text"),
            ordinance_files: out_dir.join("ordinance_files"),
            jurisdiction_dbs: out_dir.join("jurisdiction_dbs"),
        };
        for dir in [
            &dirs.out,
            &dirs.logs,
            &dirs.clean,
            &dirs.ordinance_files,
            &dirs.jurisdiction_dbs,
        ] {
            std::fs::create_dir_all(dir)?;
        }
        Ok(dirs)
    }
}

/// Summary of one completed run
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub num_jurisdictions_searched: usize,
    pub num_jurisdictions_found: usize,
    pub num_records: usize,
    pub total_cost: f64,
    pub out_dir: PathBuf,
}

/// Shared, read-only context for every jurisdiction task
struct RunContext {
    config: Config,
    profile: TechProfile,
    splitter: TextSplitter,
    loader: DocumentLoader,
    engines: SearchEngineChain,
    strategies: Vec<RetrievalStrategy>,
    kwargs: CallKwargs,
}

struct JurisdictionOutcome {
    found: bool,
    records: Vec<OrdinanceRecord>,
    cost: f64,
}

/// Download and extract ordinances for the configured jurisdictions.
pub async fn process_jurisdictions(
    config: Config,
    tech: &str,
    reference_fp: &Path,
    jurisdiction_fp: Option<&Path>,
    out_dir: &Path,
) -> Result<RunSummary> {
    let client = create_client(&config.llm).map_err(|err| eyre!("LLM client setup: {err}"))?;
    process_jurisdictions_with_client(config, tech, reference_fp, jurisdiction_fp, out_dir, client)
        .await
}

/// Driver variant taking an explicit provider client (the normal entry
/// point builds one from config).
pub async fn process_jurisdictions_with_client(
    config: Config,
    tech: &str,
    reference_fp: &Path,
    jurisdiction_fp: Option<&Path>,
    out_dir: &Path,
    client: Arc<dyn LlmClient>,
) -> Result<RunSummary> {
    let start_instant = Instant::now();
    let start_date = Utc::now();

    let profile = TechProfile::for_tech(tech)?;
    let dirs = Directories::create(out_dir).wrap_err("could not create output directories")?;

    let reference =
        load_reference(reference_fp).wrap_err("could not load jurisdiction reference")?;
    let selected = match jurisdiction_fp {
        Some(fp) => {
            select_jurisdictions(fp, &reference).wrap_err("could not load jurisdiction list")?
        }
        None => reference,
    };
    if selected.is_empty() {
        bail!("no jurisdictions to process");
    }
    info!(
        n = selected.len(),
        tech, "starting ordinance extraction run"
    );

    let llm_service = LlmService::new(
        client,
        config.llm.rate_limit,
        std::time::Duration::from_secs(config.llm.rate_window_secs),
    )
    .with_retry(RetryPolicy {
        max_attempts: config.llm.max_retries,
        ..RetryPolicy::default()
    });

    let splitter = TextSplitter::new(config.chunking.chunk_size, config.chunking.chunk_overlap);
    let strategies: Vec<RetrievalStrategy> = config
        .search
        .strategies
        .iter()
        .map(|s| s.parse())
        .collect::<Result<_, _>>()?;
    let kwargs = CallKwargs {
        temperature: config.llm.temperature,
        seed: config.llm.seed,
        ..CallKwargs::default()
    };
    let ctx = Arc::new(RunContext {
        loader: DocumentLoader::new(&config.search, splitter.clone()),
        engines: build_engines(&config.search)?,
        profile,
        splitter,
        strategies,
        kwargs,
        config,
    });

    pb::start_main_task(selected.len())?;

    let searched = selected.len();
    if ctx.config.search.ocr_exe.is_some() {
        warn!(
            "ocr-exe is set but no OCR-capable PDF parser backend is \
             configured; scanned PDFs will yield no text"
        );
    }
    let pdf_loader = PdfLoader::new(
        ctx.config.concurrency.cpu_pool_workers,
        Arc::new(NoopPdfParser),
    )
    .map_err(|err| eyre!("CPU pool setup: {err}"))?;

    let outcomes = ServicesBuilder::new()
        .with(llm_service)
        .with(TempFileCache::default())
        .with(FileMover::new(&dirs.ordinance_files))
        .with(CleanedFileWriter::new(&dirs.clean))
        .with(ValuesCsvWriter::new(&dirs.jurisdiction_dbs))
        .with(UsageUpdater::new(dirs.out.join("usage.json")))
        .with(JurisdictionUpdater::new(dirs.out.join("jurisdictions.json")))
        .with(pdf_loader)
        .run(run_all(Arc::clone(&ctx), selected))
        .await
        .map_err(|err| eyre!("service scope: {err}"))?;

    pb::finish();

    let found = outcomes.iter().filter(|o| o.found).count();
    let total_cost: f64 = outcomes.iter().map(|o| o.cost).sum();
    let mut records: Vec<OrdinanceRecord> =
        outcomes.into_iter().flat_map(|o| o.records).collect();
    apply_empirical_adjustments(&mut records, ctx.config.extraction.max_adder_ft);

    if !records.is_empty() {
        let quant = records_to_csv(&records, QUANT_COLS, Some(true))?;
        atomic_write(&dirs.out.join("quantitative_ordinances.csv"), quant.as_bytes())?;
        let qual = records_to_csv(&records, QUAL_COLS, Some(false))?;
        atomic_write(&dirs.out.join("qualitative_ordinances.csv"), qual.as_bytes())?;
    }

    record_total_time(&dirs.out.join("usage.json"), start_instant.elapsed())?;
    finalize::save_run_meta(
        &dirs,
        tech,
        &ctx.config,
        start_date,
        Utc::now(),
        finalize::RunCounts {
            searched,
            found,
            cost: total_cost,
        },
    )?;

    info!(
        searched,
        found,
        records = records.len(),
        "run complete"
    );
    Ok(RunSummary {
        num_jurisdictions_searched: searched,
        num_jurisdictions_found: found,
        num_records: records.len(),
        total_cost,
        out_dir: dirs.out,
    })
}

/// Initialize logging for a run: console output plus per-jurisdiction
/// file routing. Returns the listener to close after the run.
pub fn init_run_logging(log_dir: &Path, log_level: &str) -> LogListener {
    use tracing_subscriber::layer::SubscriberExt;

    let listener = LogListener::start(log_dir);
    let filter = tracing_subscriber::EnvFilter::try_new(log_level)
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let subscriber = tracing_subscriber::registry()
        .with(filter)
        .with(listener.layer());
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        warn!("tracing subscriber already set; jurisdiction log files inactive");
    }
    listener
}

async fn run_all(ctx: Arc<RunContext>, selected: Vec<JurisdictionInfo>) -> Vec<JurisdictionOutcome> {
    let semaphore = ctx
        .config
        .concurrency
        .max_concurrent_jurisdictions
        .map(|n| Arc::new(Semaphore::new(n.max(1))));

    let mut tasks = Vec::with_capacity(selected.len());
    for info in selected {
        let ctx = Arc::clone(&ctx);
        let semaphore = semaphore.clone();
        tasks.push(tokio::spawn(async move {
            let _permit = match &semaphore {
                Some(semaphore) => semaphore.acquire().await.ok(),
                None => None,
            };
            let full_name = info.jurisdiction.full_name();
            logs::scope(full_name, process_jurisdiction_guarded(ctx, info)).await
        }));
    }

    let mut outcomes = Vec::with_capacity(tasks.len());
    for task in tasks {
        match task.await {
            Ok(outcome) => outcomes.push(outcome),
            Err(err) => {
                error!(%err, "jurisdiction task panicked");
                outcomes.push(JurisdictionOutcome {
                    found: false,
                    records: Vec::new(),
                    cost: 0.0,
                });
            }
        }
    }
    outcomes
}

/// Process one jurisdiction, isolating failures: any error is logged
/// into the jurisdiction's log, usage accumulated so far is flushed, the
/// main progress bar advances, and the task yields no result.
async fn process_jurisdiction_guarded(
    ctx: Arc<RunContext>,
    info: JurisdictionInfo,
) -> JurisdictionOutcome {
    let full_name = info.jurisdiction.full_name();
    let usage = UsageTracker::shared(full_name.clone(), usage_from_response);

    let outcome = process_jurisdiction(&ctx, &info, Arc::clone(&usage)).await;
    let (found, records) = match outcome {
        Ok((found, records)) => (found, records),
        Err(err) => {
            error!(%err, jurisdiction = %full_name, "jurisdiction processing failed");
            let _ = call::<JurisdictionUpdater>(JurisdictionEntry {
                full_name: full_name.clone(),
                found: false,
                cost: current_cost(&usage),
                documents: Vec::new(),
            })
            .await;
            (false, Vec::new())
        }
    };

    // flush usage regardless of outcome so aggregate reporting stays
    // fail-open
    let cost = current_cost(&usage);
    let snapshot = {
        let tracker = usage.lock().unwrap_or_else(|e| e.into_inner());
        if tracker.is_empty() {
            None
        } else {
            let mut map = Map::new();
            tracker.add_to(&mut map);
            Some(map)
        }
    };
    if let Some(map) = snapshot {
        if let Err(err) = call::<UsageUpdater>(map).await {
            warn!(%err, "could not flush usage");
        }
    }
    pb::advance_main_task();

    JurisdictionOutcome {
        found,
        records,
        cost,
    }
}

fn current_cost(usage: &SharedUsage) -> f64 {
    usage.lock().unwrap_or_else(|e| e.into_inner()).cost()
}

/// The C6 -> C7 -> C8 composition for a single jurisdiction.
async fn process_jurisdiction(
    ctx: &RunContext,
    info: &JurisdictionInfo,
    usage: SharedUsage,
) -> Result<(bool, Vec<OrdinanceRecord>)> {
    let jurisdiction = &info.jurisdiction;
    let full_name = jurisdiction.full_name();
    info!(%full_name, "searching for ordinance documents");

    let known_docs = ctx
        .config
        .search
        .known_docs_manifest
        .as_deref()
        .map(|manifest| known_paths_for(manifest, &full_name))
        .unwrap_or_default();

    let plan = RetrievalPlan {
        strategies: &ctx.strategies,
        engines: &ctx.engines,
        queries: ctx.profile.queries_for(&full_name),
        num_urls: ctx.config.search.num_urls,
        loader: &ctx.loader,
        splitter: &ctx.splitter,
        website: info.website.clone(),
        crawl_max_pages: ctx.config.search.crawl_max_pages,
        known_docs,
        heuristic: ctx.profile.heuristic,
        tech_keyword: ctx.profile.keyword,
    };

    let location_filter = LocationFilter {
        validator: JurisdictionValidator::new(Some(Arc::clone(&usage)), ctx.kwargs.clone()),
        name_validator: JurisdictionNameValidator::new(StructuredLlmCaller::new(
            Some(Arc::clone(&usage)),
            ctx.kwargs.clone(),
        )),
        jurisdiction,
    };
    let content_filter = ContentFilter {
        ctx,
        usage: Arc::clone(&usage),
    };

    let mut docs = plan.run(&location_filter, &content_filter).await?;
    docs.truncate(ctx.config.search.max_docs.max(1));
    let Some(mut doc) = docs.into_iter().next() else {
        info!(%full_name, "no ordinance document found");
        call::<JurisdictionUpdater>(JurisdictionEntry {
            full_name,
            found: false,
            cost: current_cost(&usage),
            documents: Vec::new(),
        })
        .await?;
        return Ok((false, Vec::new()));
    };

    doc.set_attr(attrs::JURISDICTION_NAME, full_name.clone());
    extract_ordinance_text(
        &mut doc,
        &ctx.profile,
        &ctx.splitter,
        &ctx.config.extraction,
        Some(Arc::clone(&usage)),
        ctx.kwargs.clone(),
    )
    .await?;

    let cleaned = doc
        .attr_str(attrs::CLEANED_ORDINANCE_TEXT)
        .unwrap_or_default()
        .to_string();

    let mut debug_stages = Vec::new();
    if ctx.config.extraction.debug_stage_text {
        for stage in &ctx.profile.narrowing_stages {
            if let Some(text) = doc.attr_str(stage.key) {
                debug_stages.push((stage.key.to_string(), text.to_string()));
            }
        }
    }
    let districts_parser = PermittedUseDistrictsParser::new(
        &ctx.profile,
        Some(Arc::clone(&usage)),
        ctx.kwargs.clone(),
    );
    if let Some(districts) = districts_parser.parse(&cleaned).await? {
        debug_stages.push(("districts_summary".to_string(), districts));
    }

    let cleaned_path = call::<CleanedFileWriter>(CleanedTextRequest {
        jurisdiction_name: full_name.clone(),
        text: cleaned,
        debug_stages,
    })
    .await?;
    doc.set_attr(attrs::CLEANED_PATH, cleaned_path.display().to_string());

    let rows = extract_ordinance_values(
        &doc,
        &ctx.profile,
        Some(Arc::clone(&usage)),
        ctx.kwargs.clone(),
    )
    .await?;
    let ord_count = num_ordinances(&rows);

    let records = if ord_count == 0 {
        info!(%full_name, "no ordinance values found in document");
        Vec::new()
    } else {
        let last_updated = Local::now().format("%m/%d/%Y").to_string();
        let source = doc.attr_str(attrs::SOURCE).map(|s| s.to_string());
        let records: Vec<OrdinanceRecord> = rows
            .into_iter()
            .map(|row| {
                OrdinanceRecord::new(
                    row,
                    jurisdiction,
                    doc.ord_year(),
                    last_updated.clone(),
                    source.clone(),
                )
            })
            .collect();

        let csv = records_to_csv(&records, PARSED_COLS, None)?;
        let values_path = call::<ValuesCsvWriter>(ValuesCsvRequest {
            jurisdiction_name: full_name.clone(),
            csv,
        })
        .await?;
        doc.set_attr(attrs::VALUES_PATH, values_path.display().to_string());

        if let Some(cache_path) = doc.attr_str(attrs::CACHE_PATH).map(PathBuf::from) {
            let moved = call::<FileMover>(MoveRequest {
                cache_path,
                dest_stem: full_name.clone(),
            })
            .await?;
            doc.set_attr(attrs::OUT_PATH, moved.display().to_string());
        }
        info!(%full_name, ord_count, "ordinance values extracted");
        records
    };

    call::<JurisdictionUpdater>(JurisdictionEntry {
        full_name: full_name.clone(),
        found: true,
        cost: current_cost(&usage),
        documents: vec![document_manifest(&doc, ord_count)],
    })
    .await?;

    Ok((true, records))
}

fn document_manifest(doc: &Document, ord_count: usize) -> Value {
    json!({
        "source": doc.attr_str(attrs::SOURCE),
        "ord_filename": doc
            .attr_str(attrs::OUT_PATH)
            .and_then(|p| Path::new(p).file_name().map(|f| f.to_string_lossy().into_owned())),
        "effective_year": doc.ord_year(),
        "num_pages": doc.pages().len(),
        "checksum": doc.attr_str(attrs::CHECKSUM),
        "from_ocr": doc.attr_bool(attrs::FROM_OCR).unwrap_or(false),
        "ngram_score": doc.attr_f64(attrs::NGRAM_SCORE),
        "num_ordinance_values": ord_count,
    })
}

/// Append total wall time to the shared usage file.
fn record_total_time(
    usage_path: &Path,
    elapsed: std::time::Duration,
) -> Result<(), ServiceError> {
    let mut existing: Map<String, Value> = std::fs::read_to_string(usage_path)
        .ok()
        .and_then(|text| serde_json::from_str(&text).ok())
        .unwrap_or_default();
    let seconds = elapsed.as_secs_f64();
    existing.insert("total_time_seconds".to_string(), json!(seconds));
    existing.insert(
        "total_time".to_string(),
        json!(finalize_elapsed_string(seconds)),
    );
    let body = serde_json::to_vec_pretty(&Value::Object(existing))
        .map_err(|err| ServiceError::Other(err.to_string()))?;
    atomic_write(usage_path, &body)
}

fn finalize_elapsed_string(seconds: f64) -> String {
    let total = seconds as i64;
    format!(
        "{}:{:02}:{:02}",
        total / 3600,
        (total % 3600) / 60,
        total % 60
    )
}

/// Location filter: weighted-vote jurisdiction validation plus the name
/// screen used for ranking.
struct LocationFilter<'a> {
    validator: JurisdictionValidator,
    name_validator: JurisdictionNameValidator,
    jurisdiction: &'a Jurisdiction,
}

#[async_trait]
impl DocumentFilter for LocationFilter<'_> {
    async fn keep(&self, doc: &mut Document) -> Result<bool, ServiceError> {
        // the name score is advisory (used in ranking); the weighted
        // jurisdiction vote gates
        let _ = self.name_validator.check(doc, self.jurisdiction).await?;
        self.validator.check(doc, self.jurisdiction).await
    }
}

/// Content filter: cheap heuristic reject, then staged LLM validation.
struct ContentFilter<'a> {
    ctx: &'a RunContext,
    usage: SharedUsage,
}

#[async_trait]
impl DocumentFilter for ContentFilter<'_> {
    async fn keep(&self, doc: &mut Document) -> Result<bool, ServiceError> {
        if !self.ctx.profile.heuristic.check(&doc.text()) {
            return Ok(false);
        }
        check_for_ordinance_info(
            doc,
            &self.ctx.profile,
            &self.ctx.splitter,
            &self.ctx.config.extraction,
            Some(Arc::clone(&self.usage)),
            self.ctx.kwargs.clone(),
        )
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_directories_create() {
        let dir = tempfile::tempdir().expect("tempdir");
        let dirs = Directories::create(dir.path()).expect("dirs");
        assert!(dirs.logs.is_dir());
        assert!(dirs.clean.is_dir());
        assert!(dirs.ordinance_files.is_dir());
        assert!(dirs.jurisdiction_dbs.is_dir());
    }

    #[test]
    fn test_record_total_time_preserves_existing_keys() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("usage.json");
        std::fs::write(&path, r#"{"Test County": {"gpt-4o": {}}}"#).expect("seed");

        record_total_time(&path, std::time::Duration::from_secs(3661)).expect("record");

        let body: Value =
            serde_json::from_str(&std::fs::read_to_string(&path).expect("read")).expect("json");
        assert!(body.get("Test County").is_some());
        assert_eq!(body["total_time_seconds"], 3661.0);
        assert_eq!(body["total_time"], "1:01:01");
    }

    #[test]
    fn test_document_manifest_shape() {
        let mut doc = Document::from_text("text");
        doc.set_attr(attrs::SOURCE, "http://example.com/ord.pdf");
        doc.set_attr(attrs::CHECKSUM, "abc123");
        doc.set_attr(attrs::NGRAM_SCORE, 0.95);
        doc.set_attr(attrs::OUT_PATH, "/out/Test_County_downloaded_2026_01_15.pdf");
        doc.set_date(Some(2023), Some(1), Some(1));

        let manifest = document_manifest(&doc, 4);
        assert_eq!(manifest["source"], "http://example.com/ord.pdf");
        assert_eq!(
            manifest["ord_filename"],
            "Test_County_downloaded_2026_01_15.pdf"
        );
        assert_eq!(manifest["effective_year"], 2023);
        assert_eq!(manifest["num_pages"], 1);
        assert_eq!(manifest["checksum"], "abc123");
        assert_eq!(manifest["from_ocr"], false);
        assert_eq!(manifest["num_ordinance_values"], 4);
    }
}
