//! Solar technology profile: heuristics, validator prompts, narrowing
//! instructions, and the feature enumeration for utility-scale solar
//! energy systems

use crate::validation::content::{Heuristic, ValidatorPrompts};

use super::features::{FeatureSpec, RestrictionSpec, TechFeatures};
use super::graphs::RestrictionKind;
use super::tech::{NarrowingStage, TechProfile};

const LARGE_SES_DESCRIPTION: &str =
    "Large solar energy systems (SES) may also be referred to as solar \
     farms, solar gardens, solar arrays, solar energy facilities (SEF), \
     solar energy conversion systems (SECS), utility-scale solar energy \
     systems, commercial solar energy systems, ground-mounted solar \
     installations, or similar. ";

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
     - panel height limits\n\
     - minimum/maximum lot size\n\
     - maximum lot coverage\n\
     - fencing and screening requirements\n\
     - glare limits\n\
     - moratorium or bans\n\
     - decommissioning requirements\n\
     - vegetation and ground cover requirements\n\
     - signage requirements\n";

/// Heuristic check for mention of solar energy in text.
pub static SOLAR_HEURISTIC: Heuristic = Heuristic {
    not_tech_words: &[
        "solarium",
        "small ses",
        "private ses",
        "rooftop solar",
        "roof-mounted solar",
        "accessory solar",
    ],
    keywords: &["solar", "setback"],
    acronyms: &["ses", "secs", "sef", "pv"],
    phrases: &[
        "solar energy system",
        "solar farm",
        "solar array",
        "solar panel",
        "solar energy conversion",
        "solar garden",
        "photovoltaic system",
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

fn contains_ord_prompt() -> String {
    format!(
        "You extract structured data from text. Return your answer in \
         JSON format (not markdown). Your JSON file must include exactly \
         two keys. The first key is 'solar_reqs', which is a string that \
         summarizes all {SEARCH_TERMS_AND} (if given) in the text for a \
         solar energy system (or solar farm/array). Note that solar \
         energy bans are an important restriction to track. The last key \
         is '{{key}}', which is a boolean that is set to True if the text \
         excerpt describes {SEARCH_TERMS_OR} for a solar energy system \
         (or solar farm/array) and False otherwise."
    )
}

fn is_utility_scale_prompt() -> String {
    format!(
        "You are a legal scholar that reads ordinance text and determines \
         whether any of it applies to {SEARCH_TERMS_OR} for large solar \
         energy systems. {LARGE_SES_DESCRIPTION}Your client is a \
         commercial solar developer that does not care about ordinances \
         related to private, residential, rooftop, or accessory solar \
         energy systems. Ignore any text related to such systems. Return \
         your answer in JSON format (not markdown). Your JSON file must \
         include exactly two keys. The first key is 'summary' which \
         contains a string that lists all of the types of solar energy \
         systems the text applies to (if any). The second key is \
         '{{key}}', which is a boolean that is set to True if any part of \
         the text excerpt mentions {SEARCH_TERMS_OR} for the large solar \
         energy systems that the client is interested in and False \
         otherwise."
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
                 restrictions of large solar energy systems with respect \
                 to any of the following:\n{RESTRICTIONS_LIST}Include \
                 section headers (if any) for the text excerpts. Also \
                 include any text excerpts that define what kind of large \
                 solar energy system the restriction applies to. If there \
                 is no text related to siting restrictions of large solar \
                 systems, simply say: \"No relevant text.\""
            ),
        },
        NarrowingStage {
            key: "cleaned_ordinance_text",
            instructions: format!(
                "Extract all portions of the text that apply to large \
                 solar energy systems. {LARGE_SES_DESCRIPTION}Remove all \
                 text that only applies to private, rooftop, or accessory \
                 solar energy systems. Include section headers (if any) \
                 for the text excerpts. Also include any text excerpts \
                 that define what kind of large solar energy system the \
                 restriction applies to. If there is no text pertaining to \
                 large solar systems, simply say: \"No relevant text.\""
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
                id: "maximum height",
                text: "maximum panel or system height allowed",
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
                id: "maximum lot coverage",
                text: "maximum lot or ground coverage allowed",
                kind: RestrictionKind::Numerical,
                unit_clarification: "For the purposes of this extraction, assume the standard \
                     units for lot coverage are percent ('%').",
                clarifications: "",
            },
            RestrictionSpec {
                id: "glare",
                text: "glare limits or glare study requirements",
                kind: RestrictionKind::Qualitative,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "fencing",
                text: "fencing requirements",
                kind: RestrictionKind::Qualitative,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "screening",
                text: "screening, landscaping, or visual buffer requirements",
                kind: RestrictionKind::Qualitative,
                unit_clarification: "",
                clarifications: "",
            },
            RestrictionSpec {
                id: "vegetation",
                text: "vegetation and ground cover requirements",
                kind: RestrictionKind::Qualitative,
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
                id: "signage",
                text: "signage requirements",
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

/// The solar technology profile.
pub fn profile() -> TechProfile {
    TechProfile {
        name: "solar",
        keyword: "solar",
        system_noun: "solar energy system",
        default_tech_phrase: "large solar energy systems",
        heuristic: &SOLAR_HEURISTIC,
        validator_prompts: ValidatorPrompts {
            is_legal_text: IS_LEGAL_TEXT_PROMPT.to_string(),
            contains_ord: contains_ord_prompt(),
            is_utility_scale: is_utility_scale_prompt(),
        },
        narrowing_stages: narrowing_stages(),
        features: features(),
        question_templates: &[
            "{location} solar energy system ordinance",
            "{location} solar farm ordinance",
            "{location} solar energy ordinance",
            "{location} zoning ordinance solar",
            "solar energy setback requirements {location}",
        ],
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_heuristic_rejects_accessory_systems() {
        assert!(!SOLAR_HEURISTIC.check("The solarium addition requires a permit."));
        assert!(!SOLAR_HEURISTIC.check("Rooftop solar panels are exempt."));
    }

    #[test]
    fn test_heuristic_accepts_utility_scale_text() {
        assert!(SOLAR_HEURISTIC.check(
            "Solar energy systems shall be set back 300 feet from all \
             property lines."
        ));
    }

    #[test]
    fn test_profile_shape() {
        let profile = profile();
        assert_eq!(profile.name, "solar");
        assert_eq!(profile.narrowing_stages.len(), 3);
        assert_eq!(profile.features.setbacks.len(), 6);
        assert!(
            profile
                .features
                .restrictions
                .iter()
                .any(|r| r.id == "maximum lot coverage")
        );
    }
}
