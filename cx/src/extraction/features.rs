//! Feature enumerations for structured extraction
//!
//! Every technology extracts a fixed set of setback features plus
//! numerical and qualitative non-setback restrictions. Setback features
//! are mutually exclusive: each carries alias descriptions for its own
//! prompt and an ignore phrase so sibling features stay out of scope.

use serde_json::{Map, Value, json};

use super::graphs::RestrictionKind;

/// A setback feature (has a physical reference object).
#[derive(Debug, Clone)]
pub struct FeatureSpec {
    /// Stable feature id used in output rows (e.g. "property line")
    pub id: &'static str,
    /// Aliases describing the feature in prompts
    pub descriptions: &'static [&'static str],
    /// How this feature appears inside other features' ignore phrases
    pub as_ignore: &'static str,
    /// Extra prompt clarifications, empty when none apply
    pub clarifications: &'static str,
}

impl FeatureSpec {
    /// Feature phrase used in prompts, joining the aliases
    pub fn feature_phrase(&self) -> String {
        match self.descriptions {
            [] => self.id.to_string(),
            [single] => (*single).to_string(),
            [head @ .., tail] => format!("{} or {}", head.join(", "), tail),
        }
    }

    /// Whether this feature distinguishes participating from
    /// non-participating owners
    pub fn has_ownership_classes(&self) -> bool {
        matches!(self.id, "structures" | "property line")
    }

    /// The owned-object noun used by the participating-owner dialog
    pub fn owned_type(&self) -> &'static str {
        match self.id {
            "structures" => "structure",
            _ => "property",
        }
    }
}

/// A non-setback restriction.
#[derive(Debug, Clone)]
pub struct RestrictionSpec {
    /// Stable id used in output rows (e.g. "noise")
    pub id: &'static str,
    /// Restriction phrase for prompts
    pub text: &'static str,
    pub kind: RestrictionKind,
    /// Standard-unit guidance, empty when none applies
    pub unit_clarification: &'static str,
    /// Extra prompt clarifications, empty when none apply
    pub clarifications: &'static str,
}

/// The feature enumeration for one technology.
#[derive(Debug, Clone)]
pub struct TechFeatures {
    pub setbacks: Vec<FeatureSpec>,
    pub restrictions: Vec<RestrictionSpec>,
}

impl TechFeatures {
    /// Ignore phrase for one setback feature: every *other* feature's
    /// ignore form, comma-joined.
    pub fn ignore_phrase_for(&self, feature_id: &str) -> String {
        let others: Vec<&str> = self
            .setbacks
            .iter()
            .filter(|spec| spec.id != feature_id)
            .map(|spec| spec.as_ignore)
            .collect();
        others.join(", ")
    }

    /// Graph bindings for one setback feature.
    pub fn setback_bindings(&self, spec: &FeatureSpec, tech: &str, text: &str) -> Map<String, Value> {
        json!({
            "tech": tech,
            "feature": spec.feature_phrase(),
            "feature_clarifications": spec.clarifications,
            "ignore_features": self.ignore_phrase_for(spec.id),
            "text": text,
        })
        .as_object()
        .cloned()
        .unwrap_or_default()
    }

    /// Total number of features processed per document, for progress
    /// accounting.
    pub fn num_to_process(&self) -> usize {
        self.setbacks.len() + self.restrictions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> TechFeatures {
        TechFeatures {
            setbacks: vec![
                FeatureSpec {
                    id: "structures",
                    descriptions: &["occupied dwellings", "residences"],
                    as_ignore: "occupied dwellings",
                    clarifications: "",
                },
                FeatureSpec {
                    id: "property line",
                    descriptions: &["property lines"],
                    as_ignore: "property lines",
                    clarifications: "Dwellings are not property lines. ",
                },
                FeatureSpec {
                    id: "roads",
                    descriptions: &["roads"],
                    as_ignore: "roads",
                    clarifications: "",
                },
            ],
            restrictions: vec![RestrictionSpec {
                id: "noise",
                text: "maximum noise level allowed",
                kind: RestrictionKind::Numerical,
                unit_clarification: "",
                clarifications: "",
            }],
        }
    }

    #[test]
    fn test_feature_phrase_joins_aliases() {
        let features = sample();
        assert_eq!(
            features.setbacks[0].feature_phrase(),
            "occupied dwellings or residences"
        );
        assert_eq!(features.setbacks[2].feature_phrase(), "roads");
    }

    #[test]
    fn test_ignore_phrase_excludes_self() {
        let features = sample();
        let ignore = features.ignore_phrase_for("property line");
        assert!(ignore.contains("occupied dwellings"));
        assert!(ignore.contains("roads"));
        assert!(!ignore.contains("property lines"));
    }

    #[test]
    fn test_ownership_classes() {
        let features = sample();
        assert!(features.setbacks[0].has_ownership_classes());
        assert!(features.setbacks[1].has_ownership_classes());
        assert!(!features.setbacks[2].has_ownership_classes());
        assert_eq!(features.setbacks[0].owned_type(), "structure");
        assert_eq!(features.setbacks[1].owned_type(), "property");
    }

    #[test]
    fn test_bindings_carry_feature_context() {
        let features = sample();
        let bindings =
            features.setback_bindings(&features.setbacks[1], "large WECS", "ordinance text");
        assert_eq!(bindings.get("tech"), Some(&json!("large WECS")));
        assert_eq!(bindings.get("feature"), Some(&json!("property lines")));
        assert_eq!(bindings.get("text"), Some(&json!("ordinance text")));
    }

    #[test]
    fn test_num_to_process() {
        assert_eq!(sample().num_to_process(), 4);
    }
}
