//! Wind technology profile: heuristics, validator prompts, narrowing
//! instructions, and the feature enumeration for utility-scale wind
//! energy systems

use crate::validation::content::{Heuristic, ValidatorPrompts};

use super::features::{FeatureSpec, RestrictionSpec, TechFeatures};
use super::graphs::RestrictionKind;
use super::tech::{NarrowingStage, TechProfile};

const LARGE_WES_DESCRIPTION: &str =
    "Large wind energy systems (WES) may also be referred to as wind \
     turbines, wind energy conversion systems (WECS), wind energy \
     facilities (WEF), wind energy turbines (WET), large wind energy \
     turbines (LWET), utility-scale wind energy turbines (UWET), \
     commercial wind energy systems, or similar. ";

const SEARCH_TERMS_OR: &str = "zoning, special permitting, siting and setback, system design, or \
     operational requirements/restrictions";

const SEARCH_TERMS_AND: &str = "zoning, special permitting, siting and setback, system design, and \
     operational requirements/restrictions";

const RESTRICTIONS_LIST: &str = "- buildings / structures / residences\n\
     - property lines / parcels / subdivisions\n\
     - roads / rights-of-way\n\
     - railroads\n\
     - overhead electrical transmission wires\n\
     - bodies of water including wetlands, lakes, reservoirs, streams, and rivers\n\
     - noise limits\n\
     - shadow flicker limits\n\
     - density limits\n\
     - turbine height limits\n\
     - minimum/maximum lot size\n\
     - moratorium or bans\n\
     - decommissioning requirements\n\
     - lighting requirements\n\
     - blade ground clearance limits\n\
     - visual impact assessment requirements\n";

/// Heuristic check for mention of wind energy in text.
///
/// Look-alike words ("window", "wind erosion", ...) are stripped before
/// keywords are counted so boilerplate building codes do not pass.
pub static WIND_HEURISTIC: Heuristic = Heuristic {
    not_tech_words: &[
        "mini wecs",
        "private wecs",
        "pwecs",
        "rewind",
        "small wind",
        "swecs",
        "windbreak",
        "windiest",
        "winds",
        "windshield",
        "window",
        "windy",
        "wind attribute",
        "wind blow",
        "wind damage",
        "wind direction",
        "wind erosion",
        "wind load",
        "wind movement",
        "wind orient",
        "wind runway",
    ],
    keywords: &["wind", "setback"],
    acronyms: &["wecs", "wes", "lwet", "uwet", "wef"],
    phrases: &[
        "wind energy conversion",
        "wind turbine",
        "wind tower",
        "wind farm",
        "wind energy system",
        "wind energy farm",
        "utility wind energy system",
    ],
    match_count_threshold: 1,
};

const IS_LEGAL_TEXT_PROMPT: &str =
    "You extract structured data from text. Return your answer in JSON \
     format (not markdown). Your JSON file must include exactly three \
     keys. The first key is 'summary', which is a string that provides a \
     short summary of the text. The second key is 'type', which is a \
     string that best represents the type of document this text belongs \
     to. The third key is '{key}', which is a boolean that is set to True \
     if the type of the text (as you previously determined) is a \
     legally-binding statute or code and False if the text is an excerpt \
     from other non-legal text such as a news article, survey, summary, \
     application, public notice, etc.";

/// Built at first use so the search-term constants can be spliced in.
fn contains_ord_prompt() -> String {
    format!(
        "You extract structured data from text. Return your answer in \
         JSON format (not markdown). Your JSON file must include exactly \
         two keys. The first key is 'wind_reqs', which is a string that \
         summarizes all {SEARCH_TERMS_AND} (if given) in the text for a \
         wind energy system (or wind turbine/tower). Note that wind \
         energy bans are an important restriction to track. The last key \
         is '{{key}}', which is a boolean that is set to True if the text \
         excerpt describes {SEARCH_TERMS_OR} for a wind energy system (or \
         wind turbine/tower) and False otherwise."
    )
}

fn is_utility_scale_prompt() -> String {
    format!(
        "You are a legal scholar that reads ordinance text and determines \
         whether any of it applies to {SEARCH_TERMS_OR} for large wind \
         energy systems. {LARGE_WES_DESCRIPTION}Your client is a \
         commercial wind developer that does not care about ordinances \
         related to private, residential, micro, small, or medium sized \
         wind energy systems. Ignore any text related to such systems. \
         Return your answer in JSON format (not markdown). Your JSON file \
         must include exactly two keys. The first key is 'summary' which \
         contains a string that lists all of the types of wind energy \
         systems the text applies to (if any). The second key is \
         '{{key}}', which is a boolean that is set to True if any part of \
         the text excerpt mentions {SEARCH_TERMS_OR} for the large wind \
         energy conversion systems that the client is interested in and \
         False otherwise."
    )
}

fn narrowing_stages() -> Vec<NarrowingStage> {
    vec![
        NarrowingStage {
            key: "energy_systems_text",
            instructions: "Extract all portions of the text related to the siting, \
                 permitting, or operation of energy generation systems of \
                 any kind. Include section headers (if any) for the text \
                 excerpts. If there is no text related to energy systems, \
                 simply say: \"No relevant text.\""
                .to_string(),
        },
        NarrowingStage {
            key: "restrictions_ordinance_text",
            instructions: format!(
                "Extract all portions of the text related to the \
                 restrictions of large wind energy systems with respect to \
                 any of the following:\n{RESTRICTIONS_LIST}Include section \
                 headers (if any) for the text excerpts. Also include any \
                 text excerpts that define what kind of large wind energy \
                 conversion system the restriction applies to. If there is \
                 no text related to siting restrictions of large wind \
                 systems, simply say: \"No relevant text.\""
            ),
        },
        NarrowingStage {
            key: "cleaned_ordinance_text",
            instructions: format!(
                "Extract all portions of the text that apply to large wind \
                 energy systems. {LARGE_WES_DESCRIPTION}Remove all text \
                 that only applies to private, micro, small, or medium \
                 sized wind energy systems. Include section headers (if \
                 any) for the text excerpts. Also include any text \
                 excerpts that define what kind of large wind energy \
                 conversion system the restriction applies to. If there is \
                 no text pertaining to large wind systems, simply say: \
                 \"No relevant text.\""
            ),
        },
    ]
}

fn features() -> TechFeatures {
    TechFeatures {
        setbacks: vec![
            FeatureSpec {
                id: "structures",
                descriptions: &["occupied dwellings", "occupied buildings", "residences"],
                as_ignore: "occupied dwellings",
                clarifications: "",
            },
            FeatureSpec {
                id: "property line",
                descriptions: &[
                    "property lines",
                    "lot lines",
                    "facility perimeters",
                    "parcels",
                    "subdivisions",
                ],
                as_ignore: "property lines",
                clarifications: "Dwelling units, structures, occupied buildings, residences, \
                     and other buildings **are not equivalent** to property \
                     lines or parcel boundaries unless the text \
                     **explicitly** makes that connection. ",
            },
            FeatureSpec {
                id: "roads",
                descriptions: &["roads"],
                as_ignore: "roads",
                clarifications: "Roads may also be labeled as rights-of-way. ",
            },
            FeatureSpec {
                id: "railroads",
                descriptions: &["railroads"],
                as_ignore: "railroads",
                clarifications: "",
            },
            FeatureSpec {
                id: "transmission",
                descriptions: &[
                    "overhead electrical transmission lines",
                    "utility easements",
                    "power lines",
                ],
                as_ignore: "transmission lines",
                clarifications: "",
            },
            FeatureSpec {
                id: "water",
                descriptions: &["lakes", "reservoirs", "streams", "rivers", "wetlands"],
                as_ignore: "wetlands",
                clarifications: "",
            },
        ],
        restrictions: vec![
            RestrictionSpec {
                id: "noise",
                text: "maximum noise level allowed",
                kind: RestrictionKind::Numerical,
                unit_clarification: "For the purposes of this extraction, assume the standard \
                     units for noise are 'dBA'.",
                clarifications: "",
            },
            RestrictionSpec {
                id: "shadow flicker",
                text: "maximum shadow flicker allowed",
                kind: RestrictionKind::Numerical,
                unit_clarification: "For the purposes of this extraction, assume the standard \
                     units for shadow flicker are 'hr/year'.",
                clarifications: "If the text prohibits shadow flicker, treat this as a max \
                     value of 0 hours per year. ",
            },
            RestrictionSpec {
                id: "maximum height",
                text: "maximum turbine height allowed",
                kind: RestrictionKind::Numerical,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "minimum lot size",
                text: "**minimum** lot, parcel, or tract size allowed",
                kind: RestrictionKind::Numerical,
                unit_clarification: "Minimum lot size should **always** be specified as an \
                     area value.",
                clarifications: "",
            },
            RestrictionSpec {
                id: "density",
                text: "maximum turbine density allowed",
                kind: RestrictionKind::Numerical,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "blade clearance",
                text: "minimum blade ground clearance allowed",
                kind: RestrictionKind::Numerical,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "decommissioning",
                text: "decommissioning requirements",
                kind: RestrictionKind::Qualitative,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "lighting",
                text: "lighting requirements",
                kind: RestrictionKind::Qualitative,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "signage",
                text: "signage requirements",
                kind: RestrictionKind::Qualitative,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "visual impact",
                text: "visual impact assessment requirements",
                kind: RestrictionKind::Qualitative,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "prohibitions",
                text: "prohibitions, moratoria, or bans",
                kind: RestrictionKind::Prohibition,
                unit_clarification: "",
                clarifications: "",
            },
        ],
    }
}

/// The wind technology profile.
pub fn profile() -> TechProfile {
    TechProfile {
        name: "wind",
        keyword: "wind",
        system_noun: "wind energy system",
        default_tech_phrase: "large wind energy systems",
        heuristic: &WIND_HEURISTIC,
        validator_prompts: ValidatorPrompts {
            is_legal_text: IS_LEGAL_TEXT_PROMPT.to_string(),
            contains_ord: contains_ord_prompt(),
            is_utility_scale: is_utility_scale_prompt(),
        },
        narrowing_stages: narrowing_stages(),
        features: features(),
        question_templates: &[
            "{location} wind energy conversion system ordinance",
            "{location} wind WECS ordinance",
            "{location} wind energy ordinance",
            "{location} zoning ordinance wind turbines",
            "wind energy setback requirements {location}",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_rejects_lookalike_words() {
        assert!(!WIND_HEURISTIC.check("The window faces areas prone to wind erosion."));
        assert!(!WIND_HEURISTIC.check("Windshield surveys of windy roads."));
    }

    #[test]
    fn test_heuristic_accepts_ordinance_text() {
        assert!(WIND_HEURISTIC.check(
            "Wind energy conversion systems shall observe a setback of \
             1,000 feet from all property lines."
        ));
        assert!(WIND_HEURISTIC.check("All WECS . shall comply with setback requirements."));
    }

    #[test]
    fn test_validator_prompts_carry_key_placeholder() {
        let profile = profile();
        assert!(profile.validator_prompts.is_legal_text.contains("{key}"));
        assert!(profile.validator_prompts.contains_ord.contains("{key}"));
        assert!(profile.validator_prompts.is_utility_scale.contains("{key}"));
    }

    #[test]
    fn test_narrowing_stages_broadest_to_narrowest() {
        let stages = narrowing_stages();
        assert_eq!(stages[0].key, "energy_systems_text");
        assert_eq!(stages.last().expect("stage").key, "cleaned_ordinance_text");
        assert!(stages.iter().all(|s| s.instructions.contains("No relevant text")));
    }

    #[test]
    fn test_feature_enumeration_is_fixed() {
        let features = features();
        assert_eq!(features.setbacks.len(), 6);
        assert!(features.setbacks.iter().any(|f| f.id == "property line"));
        assert!(
            features
                .restrictions
                .iter()
                .any(|r| r.id == "shadow flicker" && r.kind == RestrictionKind::Numerical)
        );
        assert!(
            features
                .restrictions
                .iter()
                .any(|r| r.id == "prohibitions" && r.kind == RestrictionKind::Prohibition)
        );
    }
}
