//! Structured ordinance extraction
//!
//! Drives the per-feature decision-tree dialogs against the narrowed
//! ordinance text. Every feature runs concurrently; within one feature
//! the base setback dialog produces a seed transcript that is forked
//! into the ownership-class split and the multiplier / conditional-min /
//! conditional-max dialogs.

use futures::future::join_all;
use serde_json::{Map, Value, json};
use tracing::{debug, info};

use crate::llm::client::{CallKwargs, ChatMessage};
use crate::llm::ChatLlmCaller;
use crate::ordinances::{
    OrdinanceRow, json_str, normalize_multiplier_keys, sanitize_numeric_output,
};
use crate::pb;
use crate::services::base::ServiceError;
use crate::services::usage::{SharedUsage, UsageCategory};
use crate::tree::{AsyncDecisionTree, DecisionGraph, TreeError, render};

use super::features::{FeatureSpec, RestrictionSpec};
use super::graphs::{
    EXTRACT_ORIGINAL_TEXT_PROMPT, RestrictionKind, found_ord, run_tree, run_tree_raw,
    run_tree_with_seed, setup_base_setback_graph, setup_conditional_max, setup_conditional_min,
    setup_graph_extra_restriction, setup_graph_permitted_use_districts, setup_graph_system_types,
    setup_multiplier, setup_participating_owner,
};
use super::tech::TechProfile;

const DEFAULT_SYSTEM_MESSAGE: &str =
    "You are a legal scholar informing a commercial energy developer \
     about local zoning ordinances. ";

const SETBACKS_SYSTEM_MESSAGE: &str =
    "You are a legal scholar informing a commercial energy developer \
     about local zoning ordinances. For the duration of this \
     conversation, only focus on ordinances relating to setbacks from \
     {{feature}}; do not respond based on any text related to \
     {{ignore_features}}. Please only consider ordinances for systems \
     that would typically be defined as {{tech}} based on the text \
     itself.";

const RESTRICTIONS_SYSTEM_MESSAGE: &str =
    "You are a legal scholar informing a commercial energy developer \
     about local zoning ordinances. For the duration of this \
     conversation, only focus on ordinances relating to {{restriction}} \
     for systems that would typically be defined as {{tech}} based on \
     the text itself.";

/// System-class labels that mean the text regulates only small systems
const NON_TARGET_MARKERS: &[&str] = &["small", "private", "residential", "accessory", "micro"];
const TARGET_MARKERS: &[&str] = &["large", "commercial", "utility"];

/// LLM ordinance structured-data parser for one technology.
pub struct StructuredOrdinanceParser<'a> {
    profile: &'a TechProfile,
    usage: Option<SharedUsage>,
    kwargs: CallKwargs,
}

impl<'a> StructuredOrdinanceParser<'a> {
    pub fn new(
        profile: &'a TechProfile,
        usage: Option<SharedUsage>,
        kwargs: CallKwargs,
    ) -> Self {
        Self {
            profile,
            usage,
            kwargs,
        }
    }

    fn chat(&self, system_message: &str) -> ChatLlmCaller {
        ChatLlmCaller::new(system_message, self.usage.clone(), self.kwargs.clone())
    }

    fn tree(&self, graph: DecisionGraph, system_message: &str) -> AsyncDecisionTree {
        AsyncDecisionTree::new(
            graph,
            self.chat(system_message),
            UsageCategory::OrdinanceValueExtraction,
        )
    }

    /// Parse the narrowed ordinance text into per-feature rows. Returns
    /// an empty list when the text does not regulate the target system
    /// class.
    pub async fn parse(&self, text: &str) -> Result<Vec<OrdinanceRow>, ServiceError> {
        let Some(tech) = self.check_system_type(text).await? else {
            info!("text does not regulate the target system class");
            return Ok(Vec::new());
        };
        info!(%tech, "extracting ordinance values");

        let features = &self.profile.features;
        let sub_bar = pb::jurisdiction_sub_bar(
            "Extracting ordinance values",
            features.num_to_process(),
        );

        let setback_runs = features.setbacks.iter().map(|spec| {
            let tech = tech.clone();
            let sub_bar = sub_bar.clone();
            async move {
                let rows = self.parse_setback_feature(spec, &tech, text).await;
                if let Some(bar) = &sub_bar {
                    bar.inc(1);
                }
                rows
            }
        });
        let restriction_runs = features.restrictions.iter().map(|spec| {
            let tech = tech.clone();
            let sub_bar = sub_bar.clone();
            async move {
                let rows = self.parse_extra_restriction(spec, &tech, text).await;
                if let Some(bar) = &sub_bar {
                    bar.inc(1);
                }
                rows
            }
        });

        let (setback_rows, restriction_rows) =
            futures::join!(join_all(setback_runs), join_all(restriction_runs));

        if let Some(bar) = sub_bar {
            bar.finish_and_clear();
        }

        let mut rows = Vec::new();
        for outcome in setback_rows.into_iter().chain(restriction_rows) {
            rows.extend(outcome?);
        }
        Ok(rows)
    }

    /// Classify the largest regulated system class. `None` means the text
    /// only regulates classes the extraction does not target.
    async fn check_system_type(&self, text: &str) -> Result<Option<String>, ServiceError> {
        let bindings = json!({
            "system_noun": self.profile.system_noun,
            "text": text,
        })
        .as_object()
        .cloned()
        .unwrap_or_default();

        let graph = match setup_graph_system_types(bindings) {
            Ok(graph) => graph,
            Err(TreeError::Service(err)) => return Err(err),
            Err(err) => {
                debug!(%err, "system type graph setup failed");
                return Ok(Some(self.profile.default_tech_phrase.to_string()));
            }
        };
        let mut tree = self.tree(graph, DEFAULT_SYSTEM_MESSAGE);
        let out = run_tree(&mut tree).await?;

        let Some(label) = out.get("largest_system_type").and_then(json_str) else {
            // no size distinctions in the text; the document already
            // passed utility-scale validation
            return Ok(Some(self.profile.default_tech_phrase.to_string()));
        };

        let lowered = label.to_lowercase();
        let non_target = NON_TARGET_MARKERS.iter().any(|m| lowered.contains(m));
        let target = TARGET_MARKERS.iter().any(|m| lowered.contains(m));
        if non_target && !target {
            debug!(%label, "largest regulated class is below target scale");
            return Ok(None);
        }
        Ok(Some(label))
    }

    /// Parse one setback feature: base dialog, optional ownership-class
    /// fork, then value extraction on the forked seed.
    async fn parse_setback_feature(
        &self,
        spec: &FeatureSpec,
        tech: &str,
        text: &str,
    ) -> Result<Vec<OrdinanceRow>, ServiceError> {
        debug!(feature = spec.id, "parsing setback feature");
        let bindings = self.profile.features.setback_bindings(spec, tech, text);
        let system_message = render_or_default(SETBACKS_SYSTEM_MESSAGE, &bindings);

        let graph = match setup_base_setback_graph(bindings.clone()) {
            Ok(graph) => graph,
            Err(TreeError::Service(err)) => return Err(err),
            Err(err) => {
                debug!(%err, "base setback graph setup failed");
                return Ok(empty_output(spec));
            }
        };
        let mut base_tree = self.tree(graph, &system_message);
        let base_out = run_tree_raw(&mut base_tree).await?;
        let seed = base_tree.fork_messages();

        if base_out.is_none() || !found_ord(&seed) {
            debug!(feature = spec.id, "no setback ordinance found");
            return Ok(empty_output(spec));
        }

        if !spec.has_ownership_classes() {
            let mut row = OrdinanceRow::empty(spec.id, true);
            let values = self
                .extract_setback_values(&bindings, &system_message, seed)
                .await?;
            row.absorb_json(&values);
            return Ok(vec![row]);
        }

        self.extract_for_ownership_classes(spec, &bindings, &system_message, text, seed)
            .await
    }

    /// Fork the seed into participating / non-participating dialogs.
    async fn extract_for_ownership_classes(
        &self,
        spec: &FeatureSpec,
        bindings: &Map<String, Value>,
        system_message: &str,
        text: &str,
        seed: Vec<ChatMessage>,
    ) -> Result<Vec<OrdinanceRow>, ServiceError> {
        let mut ownership_bindings = bindings.clone();
        ownership_bindings.insert("owned_type".to_string(), json!(spec.owned_type()));

        let participating_out = match setup_participating_owner(ownership_bindings) {
            Ok(graph) => {
                let mut tree = self.tree(graph, system_message);
                run_tree_with_seed(&mut tree, seed.clone()).await?
            }
            Err(TreeError::Service(err)) => return Err(err),
            Err(err) => {
                debug!(%err, "participating owner graph setup failed");
                Map::new()
            }
        };

        let mut class_texts = vec![
            ("participating", String::new()),
            ("non-participating", text.to_string()),
        ];
        for (class, sub_text) in &mut class_texts {
            if let Some(extracted) = participating_out.get(*class).and_then(json_str) {
                *sub_text = extracted;
            }
        }

        let class_runs = class_texts.into_iter().map(|(class, sub_text)| {
            self.parse_ownership_class(spec, bindings, system_message, class, sub_text, &seed)
        });
        let outcomes = join_all(class_runs).await;
        outcomes.into_iter().collect()
    }

    /// Parse one ownership class's sub-text for setback values.
    async fn parse_ownership_class(
        &self,
        spec: &FeatureSpec,
        bindings: &Map<String, Value>,
        system_message: &str,
        class: &str,
        sub_text: String,
        seed: &[ChatMessage],
    ) -> Result<OrdinanceRow, ServiceError> {
        let mut row = OrdinanceRow::empty(format!("{} ({class})", spec.id), true);
        if sub_text.trim().is_empty() {
            return Ok(row);
        }

        let mut class_bindings = bindings.clone();
        let compact = sub_text.to_lowercase().replace(['\n', ' '], "-");
        if class == "participating" || compact.contains("non-participating") {
            let feature = class_bindings
                .get("feature")
                .and_then(Value::as_str)
                .unwrap_or_default();
            class_bindings.insert(
                "feature".to_string(),
                json!(format!("**{class}** {feature}")),
            );
        }

        // rewrite the fork so the assistant appears to have extracted
        // exactly this class's text
        let mut class_seed = seed.to_vec();
        let n = class_seed.len();
        if n >= 2 {
            class_seed[n - 2].content =
                render_or_default(EXTRACT_ORIGINAL_TEXT_PROMPT, &class_bindings);
            class_seed[n - 1].content = sub_text;
        }

        let values = self
            .extract_setback_values(&class_bindings, system_message, class_seed)
            .await?;
        row.absorb_json(&values);
        Ok(row)
    }

    /// Multiplier dialog, then conditional min/max when a value came out.
    async fn extract_setback_values(
        &self,
        bindings: &Map<String, Value>,
        system_message: &str,
        seed: Vec<ChatMessage>,
    ) -> Result<Map<String, Value>, ServiceError> {
        let mut out = match setup_multiplier(bindings.clone()) {
            Ok(graph) => {
                let mut tree = self.tree(graph, system_message);
                run_tree_with_seed(&mut tree, seed.clone()).await?
            }
            Err(TreeError::Service(err)) => return Err(err),
            Err(err) => {
                debug!(%err, "multiplier graph setup failed");
                return Ok(Map::new());
            }
        };
        normalize_multiplier_keys(&mut out);
        sanitize_numeric_output(&mut out);

        if out.get("value").map_or(true, Value::is_null) {
            return Ok(out);
        }

        let conditionals: [fn(Map<String, Value>) -> Result<DecisionGraph, TreeError>; 2] =
            [setup_conditional_min, setup_conditional_max];
        for setup in conditionals {
            match setup(bindings.clone()) {
                Ok(graph) => {
                    let mut tree = self.tree(graph, system_message);
                    let conditional = run_tree_with_seed(&mut tree, seed.clone()).await?;
                    out.extend(conditional);
                }
                Err(TreeError::Service(err)) => return Err(err),
                Err(err) => debug!(%err, "conditional graph setup failed"),
            }
        }
        Ok(out)
    }

    /// Parse one non-setback restriction.
    async fn parse_extra_restriction(
        &self,
        spec: &RestrictionSpec,
        tech: &str,
        text: &str,
    ) -> Result<Vec<OrdinanceRow>, ServiceError> {
        debug!(restriction = spec.id, "parsing extra restriction");
        let bindings = json!({
            "tech": tech,
            "restriction": spec.text,
            "text": text,
            "unit_clarification": spec.unit_clarification,
            "feature_clarifications": spec.clarifications,
        })
        .as_object()
        .cloned()
        .unwrap_or_default();
        let system_message = render_or_default(RESTRICTIONS_SYSTEM_MESSAGE, &bindings);

        let quantitative = spec.kind == RestrictionKind::Numerical;
        let mut row = OrdinanceRow::empty(spec.id, quantitative);

        let mut out = match setup_graph_extra_restriction(spec.kind, bindings) {
            Ok(graph) => {
                let mut tree = self.tree(graph, &system_message);
                run_tree(&mut tree).await?
            }
            Err(TreeError::Service(err)) => return Err(err),
            Err(err) => {
                debug!(%err, "extra restriction graph setup failed");
                Map::new()
            }
        };
        if quantitative {
            sanitize_numeric_output(&mut out);
        }
        row.absorb_json(&out);
        Ok(vec![row])
    }
}

/// Empty rows for a feature with no ordinance in the text.
fn empty_output(spec: &FeatureSpec) -> Vec<OrdinanceRow> {
    if spec.has_ownership_classes() {
        vec![
            OrdinanceRow::empty(format!("{} (participating)", spec.id), true),
            OrdinanceRow::empty(format!("{} (non-participating)", spec.id), true),
        ]
    } else {
        vec![OrdinanceRow::empty(spec.id, true)]
    }
}

fn render_or_default(template: &str, bindings: &Map<String, Value>) -> String {
    render(template, bindings).unwrap_or_else(|err| {
        debug!(%err, "system message render failed, using default");
        DEFAULT_SYSTEM_MESSAGE.to_string()
    })
}

/// Extracts permitted / prohibited use districts from narrowed district
/// text and renders a plain-text summary artifact.
pub struct PermittedUseDistrictsParser<'a> {
    profile: &'a TechProfile,
    usage: Option<SharedUsage>,
    kwargs: CallKwargs,
}

impl<'a> PermittedUseDistrictsParser<'a> {
    pub fn new(
        profile: &'a TechProfile,
        usage: Option<SharedUsage>,
        kwargs: CallKwargs,
    ) -> Self {
        Self {
            profile,
            usage,
            kwargs,
        }
    }

    const USE_TYPES: &'static [(&'static str, &'static str)] = &[
        (
            "permitted use districts",
            "permitted as a primary or special/conditional use",
        ),
        (
            "prohibited use districts",
            "prohibited or similar (e.g., where the systems are not allowed or banned)",
        ),
    ];

    /// Returns a districts summary, or `None` when nothing was found.
    pub async fn parse(&self, text: &str) -> Result<Option<String>, ServiceError> {
        let runs = Self::USE_TYPES
            .iter()
            .map(|(label, use_type)| self.parse_use_type(label, use_type, text));
        let outcomes = join_all(runs).await;

        let mut sections = Vec::new();
        for outcome in outcomes {
            if let Some(section) = outcome? {
                sections.push(section);
            }
        }
        if sections.is_empty() {
            Ok(None)
        } else {
            Ok(Some(sections.join("\n\n")))
        }
    }

    async fn parse_use_type(
        &self,
        label: &str,
        use_type: &str,
        text: &str,
    ) -> Result<Option<String>, ServiceError> {
        let bindings = json!({
            "tech": self.profile.default_tech_phrase,
            "use_type": use_type,
            "text": text,
        })
        .as_object()
        .cloned()
        .unwrap_or_default();

        let out = match setup_graph_permitted_use_districts(bindings) {
            Ok(graph) => {
                let chat =
                    ChatLlmCaller::new(DEFAULT_SYSTEM_MESSAGE, self.usage.clone(), self.kwargs.clone());
                let mut tree =
                    AsyncDecisionTree::new(graph, chat, UsageCategory::PermittedUseValueExtraction);
                run_tree(&mut tree).await?
            }
            Err(TreeError::Service(err)) => return Err(err),
            Err(err) => {
                debug!(%err, "permitted use graph setup failed");
                Map::new()
            }
        };

        let districts = match out.get("value") {
            Some(Value::Array(values)) => values
                .iter()
                .filter_map(|v| v.as_str())
                .collect::<Vec<_>>()
                .join(", "),
            Some(Value::String(s)) if !s.is_empty() => s.clone(),
            _ => return Ok(None),
        };
        if districts.is_empty() {
            return Ok(None);
        }
        let summary = out.get("summary").and_then(json_str).unwrap_or_default();
        Ok(Some(format!("## {label}\n{districts}\n{summary}")))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_output_for_ownership_features() {
        let spec = FeatureSpec {
            id: "property line",
            descriptions: &["property lines"],
            as_ignore: "property lines",
            clarifications: "",
        };
        let rows = empty_output(&spec);
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].feature, "property line (participating)");
        assert_eq!(rows[1].feature, "property line (non-participating)");
        assert!(rows.iter().all(OrdinanceRow::is_empty));
    }

    #[test]
    fn test_empty_output_for_plain_features() {
        let spec = FeatureSpec {
            id: "roads",
            descriptions: &["roads"],
            as_ignore: "roads",
            clarifications: "",
        };
        let rows = empty_output(&spec);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].feature, "roads");
    }

    #[test]
    fn test_system_message_rendering() {
        let bindings = json!({
            "feature": "property lines",
            "ignore_features": "roads",
            "tech": "large wind energy systems",
        })
        .as_object()
        .cloned()
        .expect("map");
        let rendered = render_or_default(SETBACKS_SYSTEM_MESSAGE, &bindings);
        assert!(rendered.contains("property lines"));
        assert!(rendered.contains("large wind energy systems"));

        // missing bindings fall back to the generic system message
        let rendered = render_or_default(SETBACKS_SYSTEM_MESSAGE, &Map::new());
        assert_eq!(rendered, DEFAULT_SYSTEM_MESSAGE);
    }
}
