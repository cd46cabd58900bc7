//! Usage accounting: rolling-window counters and per-jurisdiction trackers

use std::collections::{BTreeMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value, json};

/// Usage categories under which token counts are filed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UsageCategory {
    Default,
    Chat,
    DocumentContentValidation,
    DocumentLocationValidation,
    DocumentOrdinanceSummary,
    OrdinanceValueExtraction,
    PermittedUseValueExtraction,
}

impl UsageCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Default => "default",
            Self::Chat => "chat",
            Self::DocumentContentValidation => "document_content_validation",
            Self::DocumentLocationValidation => "document_location_validation",
            Self::DocumentOrdinanceSummary => "document_ordinance_summary",
            Self::OrdinanceValueExtraction => "ordinance_value_extraction",
            Self::PermittedUseValueExtraction => "permitted_use_value_extraction",
        }
    }
}

/// A value recorded at a monotonic timestamp
#[derive(Debug, Clone, Copy)]
pub struct TimedEntry {
    pub at: Instant,
    pub value: f64,
}

impl TimedEntry {
    pub fn new(value: f64) -> Self {
        Self {
            at: Instant::now(),
            value,
        }
    }
}

/// Rolling-window counter: entries older than `max_seconds` are discarded
/// on read, and `total` is the sum of live entries.
#[derive(Debug)]
pub struct TimeBoundedUsageTracker {
    window: Duration,
    entries: VecDeque<TimedEntry>,
}

impl TimeBoundedUsageTracker {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            entries: VecDeque::new(),
        }
    }

    /// Record a value at the current time
    pub fn add(&mut self, value: f64) {
        self.entries.push_back(TimedEntry::new(value));
    }

    /// Sum of values recorded within the window
    pub fn total(&mut self) -> f64 {
        let cutoff = Instant::now() - self.window;
        while self.entries.front().is_some_and(|e| e.at < cutoff) {
            self.entries.pop_front();
        }
        self.entries.iter().map(|e| e.value).sum()
    }
}

/// Request/token counts for one `(model, category)` cell
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct UsageCounts {
    pub requests: u64,
    pub prompt_tokens: u64,
    pub response_tokens: u64,
}

impl UsageCounts {
    fn absorb(&mut self, other: &UsageCounts) {
        self.requests += other.requests;
        self.prompt_tokens += other.prompt_tokens;
        self.response_tokens += other.response_tokens;
    }
}

/// Parser that knows the provider's raw response shape and folds it into a
/// usage cell. The tracker owns aggregation; the parser owns the shape.
pub type ResponseParser = fn(&mut UsageCounts, &Value);

/// Default parser for OpenAI-style `usage` metadata.
pub fn usage_from_response(counts: &mut UsageCounts, response: &Value) {
    counts.requests += 1;
    let usage = &response["usage"];
    counts.prompt_tokens += usage["prompt_tokens"].as_u64().unwrap_or(0);
    counts.response_tokens += usage["completion_tokens"]
        .as_u64()
        .or_else(|| usage["response_tokens"].as_u64())
        .unwrap_or(0);
}

/// Per-jurisdiction usage tracker holding the nested
/// `{model -> {category -> counts}}` record. Updates are additive only.
#[derive(Debug)]
pub struct UsageTracker {
    label: String,
    parser: ResponseParser,
    usage: BTreeMap<String, BTreeMap<String, UsageCounts>>,
}

/// Tracker handle shared between the callers of one jurisdiction task
pub type SharedUsage = Arc<Mutex<UsageTracker>>;

impl UsageTracker {
    pub fn new(label: impl Into<String>, parser: ResponseParser) -> Self {
        Self {
            label: label.into(),
            parser,
            usage: BTreeMap::new(),
        }
    }

    /// Wrap a tracker for sharing across tasks
    pub fn shared(label: impl Into<String>, parser: ResponseParser) -> SharedUsage {
        Arc::new(Mutex::new(Self::new(label, parser)))
    }

    /// Jurisdiction label used to namespace output
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Fold a raw provider response into the `(model, category)` cell.
    pub fn update_from_response(&mut self, model: &str, category: UsageCategory, response: &Value) {
        let cell = self
            .usage
            .entry(model.to_string())
            .or_default()
            .entry(category.as_str().to_string())
            .or_default();
        (self.parser)(cell, response);
    }

    /// Per-model totals derived by summing categories
    pub fn totals(&self) -> BTreeMap<String, UsageCounts> {
        let mut out = BTreeMap::new();
        for (model, categories) in &self.usage {
            let entry: &mut UsageCounts = out.entry(model.clone()).or_default();
            for counts in categories.values() {
                entry.absorb(counts);
            }
        }
        out
    }

    /// Total dollar cost across models, per the static cost registry
    pub fn cost(&self) -> f64 {
        self.totals()
            .iter()
            .map(|(model, counts)| {
                let (prompt_rate, response_rate) = model_cost_per_million(model);
                (counts.prompt_tokens as f64 / 1_000_000.0) * prompt_rate
                    + (counts.response_tokens as f64 / 1_000_000.0) * response_rate
            })
            .sum()
    }

    /// Embed this tracker (with derived totals) into an output map under
    /// its jurisdiction label.
    pub fn add_to(&self, out: &mut Map<String, Value>) {
        let mut body = serde_json::to_value(&self.usage).unwrap_or_else(|_| json!({}));
        if let Some(obj) = body.as_object_mut() {
            obj.insert(
                "tracker_totals".to_string(),
                serde_json::to_value(self.totals()).unwrap_or_else(|_| json!({})),
            );
        }
        out.insert(self.label.clone(), body);
    }

    /// Merge this tracker's per-model totals into a process-wide summary.
    pub fn merge_totals_into(&self, summary: &mut BTreeMap<String, UsageCounts>) {
        for (model, counts) in self.totals() {
            summary.entry(model).or_default().absorb(&counts);
        }
    }

    /// True when no usage has been recorded
    pub fn is_empty(&self) -> bool {
        self.usage.is_empty()
    }
}

/// Static cost registry: `$ per million (prompt, response)` tokens.
/// Unknown models contribute zero cost.
pub fn model_cost_per_million(model: &str) -> (f64, f64) {
    match model {
        m if m.contains("gpt-4o-mini") => (0.15, 0.60),
        m if m.contains("gpt-4o") => (2.50, 10.00),
        m if m.contains("gpt-4") => (30.00, 60.00),
        m if m.contains("o1") => (15.00, 60.00),
        _ => (0.0, 0.0),
    }
}
