//! Shared decision-graph builders for ordinance extraction
//!
//! Each builder wires a chain-of-reasoning dialog: a yes/no gate on the
//! raw text, intermediate narrowing questions, and a final node that asks
//! for JSON output summarizing the whole conversation. Graph-wide
//! bindings (`tech`, `feature`, `ignore_features`, ...) parameterize the
//! prompts per feature and technology.

use chrono::Local;
use serde_json::{Map, Value};
use tracing::debug;

use crate::llm::client::ChatMessage;
use crate::services::base::ServiceError;
use crate::text::llm_response_as_json;
use crate::tree::{AsyncDecisionTree, DecisionGraph, Predicate, TreeError, starts_with_yes};

const SECTION_PROMPT: &str = "The value of the 'section' key should be a string representing the \
     title of the section (including numerical labels), if it's given, and \
     `null` otherwise.";

const SUMMARY_PROMPT: &str = "The value of the 'summary' key should be a short summary of the \
     ordinance, using direct text excerpts as much as possible.";

const UNITS_IN_SUMMARY_PROMPT: &str =
    "Include any clarifications about the units in the summary.";

const SIZE_REMINDER: &str = "Please only consider setbacks specifically for systems that would \
     typically be defined as {{tech}} based on the text itself - for \
     example, systems intended for electricity generation or sale, or \
     those above thresholds such as height or rated capacity. Ignore any \
     requirements that apply only to smaller or clearly non-commercial \
     systems. ";

/// Prompt asking for a verbatim extract of the setback text for a
/// feature. Also used to rewrite forked transcripts when an ownership
/// class is isolated.
pub const EXTRACT_ORIGINAL_TEXT_PROMPT: &str =
    "Extract all portions of the text (with original formatting) that \
     state how close I can site {{tech}} to {{feature}}. \
     {{feature_clarifications}}Focus on ordinances relating to setbacks \
     from {{feature}}; do not respond based on any text related to \
     {{ignore_features}}. The extracted text will be used for structured \
     data extraction, so it must be both **comprehensive** (retaining all \
     relevant details) and **focused** (excluding unrelated content). \
     Ensure that all retained information is **directly applicable** to \
     systems that would typically be defined as {{tech}} based on the \
     text itself. Ignore any text that applies **only** to smaller or \
     clearly non-commercial systems.";

/// Graph with no nodes but the shared prompt-fragment bindings set.
pub fn setup_graph_no_nodes(bindings: Map<String, Value>) -> DecisionGraph {
    let mut graph = DecisionGraph::new();
    graph.set_binding("section_prompt", SECTION_PROMPT);
    graph.set_binding("summary_prompt", SUMMARY_PROMPT);
    graph.set_binding("units_in_summary_prompt", UNITS_IN_SUMMARY_PROMPT);
    graph.set_binding("feature_clarifications", "");
    graph.set_binding("unit_clarification", "");
    graph.set_binding("clarifications", "");
    graph.set_bindings(bindings);
    graph
}

/// Gate-then-extract graph for one setback feature.
pub fn setup_base_setback_graph(bindings: Map<String, Value>) -> Result<DecisionGraph, TreeError> {
    let mut graph = setup_graph_no_nodes(bindings);
    graph.add_node(
        "init",
        &format!(
            "Is there text in the following legal document that describes \
             how far I have to setback {{{{tech}}}} from {{{{feature}}}}? \
             {{{{feature_clarifications}}}}Focus only on setbacks from \
             {{{{feature}}}}; do not respond based on any text related to \
             {{{{ignore_features}}}}. {SIZE_REMINDER}Don't forget to pay \
             extra attention to clarifying text found in parentheses and \
             footnotes. Please start your response with either 'Yes' or \
             'No' and briefly explain your answer.\
             \n\n\"\"\"\n{{{{text}}}}\n\"\"\""
        ),
    )?;
    graph.add_node("get_text", EXTRACT_ORIGINAL_TEXT_PROMPT)?;
    graph.add_edge("init", "get_text", Predicate::DoesNotStartWithNo)?;
    Ok(graph)
}

/// Graph asking whether the setback distinguishes participating from
/// non-participating owners, returning both raw texts.
pub fn setup_participating_owner(bindings: Map<String, Value>) -> Result<DecisionGraph, TreeError> {
    let mut graph = setup_graph_no_nodes(bindings);
    graph.add_node(
        "init",
        &format!(
            "Does the ordinance for {{{{feature}}}} setbacks explicitly \
             specify a value that applies to **participating** \
             {{{{owned_type}}}} owners? {{{{feature_clarifications}}}}Focus \
             only on setbacks from {{{{feature}}}}; do not respond based on \
             any text related to {{{{ignore_features}}}}. {SIZE_REMINDER}\
             If your answer is 'yes', justify it by quoting the raw text \
             directly."
        ),
    )?;
    graph.add_node(
        "non_part",
        &format!(
            "Does the ordinance for {{{{feature}}}} setbacks explicitly \
             specify a value that applies to **non-participating** \
             {{{{owned_type}}}} owners? {{{{feature_clarifications}}}}Focus \
             only on setbacks from {{{{feature}}}}; do not respond based on \
             any text related to {{{{ignore_features}}}}. {SIZE_REMINDER}\
             If your answer is 'yes', justify it by quoting the raw text \
             directly."
        ),
    )?;
    graph.add_node(
        "final",
        "Please respond based on our entire conversation so far. Return \
         your answer as a single dictionary in JSON format (not markdown). \
         Your JSON file must include exactly two keys. The keys are \
         'participating' and 'non-participating'. The value of the \
         'participating' key should be a string containing the raw text \
         with original formatting from the ordinance that applies to \
         **participating** owners if you answered 'yes' to the first \
         question or `null` if you answered 'no'. The value of the \
         'non-participating' key should be a string containing the raw \
         text with original formatting from the ordinance that applies to \
         **non-participating** owners _or_ simply the full ordinance for \
         {{feature}} setbacks if the text did not make the distinction \
         between **participating** and **non-participating** owners.",
    )?;
    graph.add_edge("init", "non_part", Predicate::Always)?;
    graph.add_edge("non_part", "final", Predicate::Always)?;
    Ok(graph)
}

/// Graph extracting a setback multiplier (or fixed distance) for a
/// feature, including the optional static adder and unit conversion.
pub fn setup_multiplier(bindings: Map<String, Value>) -> Result<DecisionGraph, TreeError> {
    let mut graph = setup_graph_no_nodes(bindings);
    graph.add_node(
        "init",
        &format!(
            "Does the text mention a multiplier that should be applied to \
             a system dimension (e.g. height, rotor diameter, etc) to \
             compute the setback distance from {{{{feature}}}} for \
             {{{{tech}}}}? Focus only on {{{{feature}}}}; do not respond \
             based on any text related to {{{{ignore_features}}}}. \
             {SIZE_REMINDER}Remember that 1 is a valid multiplier, and \
             treat any mention of 'fall zone' as a system height \
             multiplier of 1. Please start your response with either 'Yes' \
             or 'No' and briefly explain your answer."
        ),
    )?;

    // fixed-distance branch
    graph.add_node(
        "no_multiplier",
        &format!(
            "Does the ordinance give the setback from {{{{feature}}}} as a \
             fixed distance value? Focus only on {{{{feature}}}}; do not \
             respond based on any text related to {{{{ignore_features}}}}. \
             {SIZE_REMINDER}Please start your response with either 'Yes' \
             or 'No' and briefly explain your answer."
        ),
    )?;
    graph.add_node(
        "units",
        "What are the units for the setback from {{feature}}? Ensure \
         that:\n1) You accurately identify the unit value associated with \
         the setback.\n2) The unit is expressed using standard, \
         conventional unit names (e.g., 'feet', 'meters', 'miles', etc.)\n\
         3) If multiple values are mentioned, return only the units for \
         the most restrictive value that directly pertains to the \
         setback.\n\nExample Inputs and Outputs:\nText: 'All Solar Farms \
         shall be set back a distance of at least one thousand (1000) \
         feet, from any primary structure'\nOutput: 'feet'",
    )?;
    graph.add_node(
        "out_static",
        "Please respond based on our entire conversation so far. Return \
         your answer in JSON format (not markdown). Your JSON file must \
         include exactly four keys. The keys are 'value', 'units', \
         'summary', and 'section'. The value of the 'value' key should be \
         a **numerical** value corresponding to the setback distance value \
         from {{feature}} or `null` if there was no such value. The value \
         of the 'units' key should be a string corresponding to the \
         (standard) units of the setback distance value from {{feature}} \
         or `null` if there was no such value. As before, focus only on \
         setbacks specifically for systems that would typically be defined \
         as {{tech}} based on the text itself. {{summary_prompt}} \
         {{section_prompt}}",
    )?;

    // multiplier branch
    graph.add_node(
        "m_single",
        "Are multiple values given for the multiplier used to compute the \
         setback distance value from {{feature}} for {{tech}}? Remember to \
         ignore any text related to {{ignore_features}}. If so, select and \
         state the largest one. Otherwise, repeat the single multiplier \
         value that was given in the text.",
    )?;
    graph.add_node(
        "m_type",
        "What kind of multiplier is stated in the text to compute the \
         setback distance from {{feature}}? Select a value from the \
         following list: ['tip-height-multiplier', \
         'hub-height-multiplier', 'rotor-diameter-multiplier']. Default to \
         'tip-height-multiplier' unless the text explicitly explains that \
         the multiplier should be applied to the distance up to the \
         turbine hub or to the diameter of the rotors. Briefly justify \
         your answer.",
    )?;
    graph.add_node(
        "adder",
        "Does the ordinance for the setback from {{feature}} include a \
         static distance value that should be added to the result of the \
         multiplication? Do not confuse this value with static setback \
         requirements. Ignore text with clauses such as 'no lesser than', \
         'no greater than', 'the lesser of', or 'the greater of'. Please \
         start your response with either 'Yes' or 'No' and briefly explain \
         your answer, stating the adder value if it exists.",
    )?;
    graph.add_node(
        "adder_eq",
        "Does the adder value you identified satisfy the following \
         equation: `multiplier * height + <adder>`? Please begin your \
         response with either 'Yes' or 'No' and briefly explain your \
         answer.",
    )?;
    graph.add_node(
        "conversion",
        "If the adder value is not given in feet, convert it to feet \
         (remember that there are 3.28084 feet in one meter and 5280 feet \
         in one mile). Show your work step-by-step if you had to perform a \
         conversion.",
    )?;
    graph.add_node(
        "out_m",
        "Please respond based on our entire conversation so far. Return \
         your answer as a single dictionary in JSON format (not markdown). \
         Your JSON file must include exactly five keys. The keys are \
         'mult_value', 'mult_type', 'adder', 'summary', and 'section'. The \
         value of the 'mult_value' key should be a **numerical** value \
         corresponding to the multiplier value we determined earlier. The \
         value of the 'mult_type' key should be a string corresponding to \
         the dimension that the multiplier should be applied to, as we \
         determined earlier. The value of the 'adder' key should be a \
         **numerical** value corresponding to the static value to be added \
         to the total setback distance after multiplication, as we \
         determined earlier, or `null` if there is no such value. \
         {{summary_prompt}} {{section_prompt}}",
    )?;
    graph.add_node(
        "out_no_adder",
        "Please respond based on our entire conversation so far. Return \
         your answer as a single dictionary in JSON format (not markdown). \
         Your JSON file must include exactly four keys. The keys are \
         'mult_value', 'mult_type', 'summary', and 'section'. The value of \
         the 'mult_value' key should be a **numerical** value \
         corresponding to the multiplier value we determined earlier. The \
         value of the 'mult_type' key should be a string corresponding to \
         the dimension that the multiplier should be applied to, as we \
         determined earlier. {{summary_prompt}} {{section_prompt}}",
    )?;

    graph.add_edge("init", "no_multiplier", Predicate::StartsWithNo)?;
    graph.add_edge("init", "m_single", Predicate::StartsWithYes)?;
    graph.add_edge("no_multiplier", "units", Predicate::StartsWithYes)?;
    graph.add_edge("no_multiplier", "out_static", Predicate::StartsWithNo)?;
    graph.add_edge("units", "out_static", Predicate::Always)?;
    graph.add_edge("m_single", "m_type", Predicate::Always)?;
    graph.add_edge("m_type", "adder", Predicate::Always)?;
    graph.add_edge("adder", "out_no_adder", Predicate::StartsWithNo)?;
    graph.add_edge("adder", "adder_eq", Predicate::StartsWithYes)?;
    graph.add_edge("adder_eq", "out_no_adder", Predicate::StartsWithNo)?;
    graph.add_edge("adder_eq", "conversion", Predicate::StartsWithYes)?;
    graph.add_edge("conversion", "out_m", Predicate::Always)?;
    Ok(graph)
}

/// Graph extracting a "greater of" minimum threshold that applies
/// regardless of the multiplier outcome.
pub fn setup_conditional_min(bindings: Map<String, Value>) -> Result<DecisionGraph, TreeError> {
    setup_conditional(bindings, ConditionalKind::Min)
}

/// Graph extracting a "lesser of" maximum limit that applies regardless
/// of the multiplier outcome.
pub fn setup_conditional_max(bindings: Map<String, Value>) -> Result<DecisionGraph, TreeError> {
    setup_conditional(bindings, ConditionalKind::Max)
}

enum ConditionalKind {
    Min,
    Max,
}

fn setup_conditional(
    bindings: Map<String, Value>,
    kind: ConditionalKind,
) -> Result<DecisionGraph, TreeError> {
    let (noun, phrase, eq, key) = match kind {
        ConditionalKind::Min => (
            "minimum",
            "This value acts like a threshold and is often found within \
             phrases like 'the greater of'.",
            "`setback_distance = max(<threshold>, multiplier_setback)`",
            "min_dist",
        ),
        ConditionalKind::Max => (
            "maximum",
            "This value acts like a limit and is often found within \
             phrases like 'the lesser of'.",
            "`setback_distance = min(multiplier_setback, <limit>)`",
            "max_dist",
        ),
    };

    let mut graph = setup_graph_no_nodes(bindings);
    graph.add_node(
        "init",
        &format!(
            "Focus only on setbacks from {{{{feature}}}}; do not respond \
             based on any text related to {{{{ignore_features}}}}. \
             {SIZE_REMINDER}Does the setback from {{{{feature}}}} for \
             {{{{tech}}}} mention a {noun} setback distance **regardless \
             of the outcome** of the multiplier calculation? {phrase} \
             Begin your response with either 'Yes' or 'No' and briefly \
             explain your answer."
        ),
    )?;
    graph.add_node(
        "check_eq",
        &format!(
            "Does the value you identified satisfy the following equation: \
             {eq}? Please begin your response with either 'Yes' or 'No' \
             and briefly explain your answer."
        ),
    )?;
    graph.add_node(
        "conversion",
        "If the value is not given in feet, convert it to feet (remember \
         that there are 3.28084 feet in one meter and 5280 feet in one \
         mile). Show your work step-by-step if you had to perform a \
         conversion.",
    )?;
    graph.add_node(
        "out",
        &format!(
            "Please respond based on our entire conversation so far. \
             Return your answer as a single dictionary in JSON format (not \
             markdown). Your JSON file must include exactly two keys. The \
             keys are '{key}' and 'summary'. The value of the '{key}' key \
             should be a **numerical** value corresponding to the {noun} \
             setback value from {{{{feature}}}} that we determined \
             earlier, or `null` if no such value exists. {{{{summary_prompt}}}}"
        ),
    )?;
    graph.add_edge("init", "check_eq", Predicate::StartsWithYes)?;
    graph.add_edge("check_eq", "conversion", Predicate::StartsWithYes)?;
    graph.add_edge("conversion", "out", Predicate::Always)?;
    Ok(graph)
}

/// Kind of non-setback restriction dialog
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestrictionKind {
    /// Numeric value + units (height, noise, shadow flicker, ...)
    Numerical,
    /// Summary/section only (lighting, signage, decommissioning, ...)
    Qualitative,
    /// Prohibitions/moratoria with conditional and expiry checks
    Prohibition,
}

/// Graph extracting a non-setback restriction.
pub fn setup_graph_extra_restriction(
    kind: RestrictionKind,
    bindings: Map<String, Value>,
) -> Result<DecisionGraph, TreeError> {
    let mut graph = setup_graph_no_nodes(bindings);
    graph.add_node(
        "init",
        "Does the following legal text explicitly enact {{restriction}} \
         for {{tech}} for a particular jurisdiction that an energy system \
         developer would have to abide to? {{feature_clarifications}}\n\
         Make sure your answer adheres to these guidelines:\n1) Respond \
         based only on the explicit text provided for {{restriction}}. Do \
         not infer or assume relevance based on general definitions, \
         interpretations, or overlap with other categories. If the text \
         does not directly mention or clearly describe {{restriction}} for \
         {{tech}}, respond with 'No'.\n2) If the text only provides a \
         definition of what {{restriction}} are without providing \
         specifics, please respond with 'No'.\n3) Focus only on \
         {{restriction}} specifically for systems that would typically be \
         defined as {{tech}} based on the text itself. Ignore any \
         requirements that apply only to smaller or clearly non-commercial \
         systems.\n4) Pay close attention to clarifying details in \
         parentheses, footnotes, or additional explanatory text.\n5) \
         Please start your response with either 'Yes' or 'No' and briefly \
         explain your answer.\n\n\"\"\"\n{{text}}\n\"\"\"",
    )?;

    match kind {
        RestrictionKind::Numerical => {
            graph.add_node(
                "value",
                "What is the **numerical** value given for the \
                 {{restriction}} for {{tech}}? Follow these guidelines:\n\
                 1) Extract only the explicit numerical value provided for \
                 the restriction. Do not infer values from related \
                 restrictions.\n2) If multiple values are given, select \
                 the most restrictive one (i.e., the smallest allowable \
                 limit, the lowest maximum, etc.).\n3) Focus only on \
                 {{restriction}} specifically for systems that would \
                 typically be defined as {{tech}} based on the text \
                 itself.\n\nExample Inputs and Outputs:\nText: 'For all \
                 WES there is a limitation of overall height of 200 feet \
                 (including blades).'\nOutput: 200\nText: 'At no time \
                 shall a wind turbine tower, nacelle, or blade create \
                 shadow flicker on any non-participating landowner \
                 property'\nOutput: 0",
            )?;
            graph.add_node(
                "units",
                "What are the units for the {{restriction}} for {{tech}}? \
                 Ensure that:\n1) You accurately identify the unit value \
                 associated with the restriction.\n2) The unit is \
                 expressed using standard, conventional unit names (e.g., \
                 'feet', 'meters', 'acres', 'dBA', etc.). \
                 {{unit_clarification}}\n3) If multiple values are \
                 mentioned, return only the units for the most restrictive \
                 value that directly pertains to the restriction.\n\n\
                 Example Inputs and Outputs:\nText: 'The noise level of \
                 all SES shall be no greater than thirty-two (32) decibels \
                 measured from the nearest property line.'\nOutput: 'dBA'\n\
                 Text: 'At no time shall a wind turbine tower, nacelle, or \
                 blade create shadow flicker on any non-participating \
                 landowner property'\nOutput: 'hr/year'",
            )?;
            graph.add_node(
                "final",
                "Please respond based on our entire conversation so far. \
                 Return your answer as a dictionary in JSON format (not \
                 markdown). Your JSON file must include exactly four keys. \
                 The keys are 'value', 'units', 'summary', and 'section'. \
                 The value of the 'value' key should be a numerical value \
                 corresponding to the {{restriction}} for {{tech}}, or \
                 `null` if the text does not mention such a restriction. \
                 Use our conversation to fill out this value. The value of \
                 the 'units' key should be a string corresponding to the \
                 (standard) units for the {{restriction}} allowed for \
                 {{tech}} by the text below, or `null` if the text does \
                 not mention such a restriction. {{summary_prompt}} \
                 {{units_in_summary_prompt}} {{section_prompt}}",
            )?;
            graph.add_edge("init", "value", Predicate::StartsWithYes)?;
            graph.add_edge("value", "units", Predicate::Always)?;
            graph.add_edge("units", "final", Predicate::Always)?;
        }
        RestrictionKind::Qualitative => {
            graph.add_node(
                "final",
                "Please respond based on our entire conversation so far. \
                 Return your answer as a dictionary in JSON format (not \
                 markdown). Your JSON file must include exactly two keys. \
                 The keys are 'summary' and 'section'. {{summary_prompt}} \
                 {{section_prompt}}",
            )?;
            graph.add_edge("init", "final", Predicate::StartsWithYes)?;
        }
        RestrictionKind::Prohibition => {
            let today = Local::now().format("%B %d, %Y");
            graph.add_node(
                "is_conditional",
                "Does the prohibition, moratorium, or ban only apply \
                 conditionally? For example, does it only apply to those \
                 who have not complied with the provisions in this text? \
                 Please start your response with either 'Yes' or 'No' and \
                 briefly explain your answer.",
            )?;
            graph.add_node(
                "has_end_date",
                "Does the legal text give an expiration date for the \
                 prohibition, moratorium, or ban? Please start your \
                 response with either 'Yes' or 'No' and briefly explain \
                 your answer.",
            )?;
            graph.add_node(
                "check_end_date",
                &format!(
                    "Today is {today}. Has the prohibition, moratorium, or \
                     ban expired? Please start your response with either \
                     'Yes' or 'No' and briefly explain your answer."
                ),
            )?;
            graph.add_node(
                "final",
                "Please respond based on our entire conversation so far. \
                 Return your answer as a dictionary in JSON format (not \
                 markdown). Your JSON file must include exactly two keys. \
                 The keys are 'summary' and 'section'. {{summary_prompt}} \
                 If the prohibition is a moratorium, be sure to include \
                 that distinction in your summary and provide any relevant \
                 expiration dates. {{section_prompt}}",
            )?;
            graph.add_edge("init", "is_conditional", Predicate::StartsWithYes)?;
            graph.add_edge("is_conditional", "has_end_date", Predicate::StartsWithNo)?;
            graph.add_edge("has_end_date", "final", Predicate::StartsWithNo)?;
            graph.add_edge("has_end_date", "check_end_date", Predicate::StartsWithYes)?;
            graph.add_edge("check_end_date", "final", Predicate::StartsWithNo)?;
        }
    }
    Ok(graph)
}

/// Graph extracting the largest regulated system class from the text.
pub fn setup_graph_system_types(bindings: Map<String, Value>) -> Result<DecisionGraph, TreeError> {
    let mut graph = setup_graph_no_nodes(bindings);
    graph.add_node(
        "init",
        "Does the following text distinguish between multiple \
         {{system_noun}} sizes? Distinctions are often made as 'small', \
         'personal', or 'private' vs 'large', 'commercial', or 'utility'. \
         Sometimes the distinction uses actual MW values. Please start \
         your response with either 'Yes' or 'No' and briefly explain your \
         answer.\n\n\"\"\"\n{{text}}\n\"\"\"",
    )?;
    graph.add_node(
        "get_text",
        "What are the different {{system_noun}} sizes regulated by this \
         ordinance? List them in order of increasing size. Include any \
         relevant numerical qualifiers in the name, if appropriate. Only \
         list {{system_noun}} types; do not include generic types or other \
         energy system types.",
    )?;
    graph.add_node(
        "final",
        "Respond based on our entire conversation so far. Return your \
         answer as a dictionary in JSON format (not markdown). Your JSON \
         file must include exactly two keys. The keys are \
         'largest_system_type' and 'explanation'. The value of the \
         'largest_system_type' key should be a string that labels the \
         largest {{system_noun}} size regulated by this ordinance. The \
         value of the 'explanation' key should be a string containing a \
         short explanation for your choice.",
    )?;
    graph.add_edge("init", "get_text", Predicate::StartsWithYes)?;
    graph.add_edge("get_text", "final", Predicate::Always)?;
    Ok(graph)
}

/// Graph extracting districts where the technology is permitted for a
/// given use type.
pub fn setup_graph_permitted_use_districts(
    bindings: Map<String, Value>,
) -> Result<DecisionGraph, TreeError> {
    let mut graph = setup_graph_no_nodes(bindings);
    graph.add_node(
        "init",
        "Does the following legal text explicitly define districts where \
         {{tech}} (or similar) are permitted as {{use_type}}? \
         {{clarifications}}Pay extra attention to titles and clarifying \
         text found in parentheses and footnotes. Please start your \
         response with either 'Yes' or 'No' and briefly explain your \
         answer.\n\n\"\"\"\n{{text}}\n\"\"\"",
    )?;
    graph.add_node(
        "district_names",
        "What are all of the district names (and abbreviations if given) \
         where {{tech}} (or similar) are permitted as {{use_type}}?",
    )?;
    graph.add_node(
        "final",
        "Please respond based on our entire conversation so far. Return \
         your answer as a dictionary in JSON format (not markdown). Your \
         JSON file must include exactly three keys. The keys are 'value', \
         'summary', and 'section'. The value of the 'value' key should be \
         a list of all district names (and abbreviations if given) where \
         {{tech}} (or similar) are permitted as {{use_type}}, or `null` if \
         the text does not mention this use type for {{tech}} (or \
         similar). Use our conversation to fill out this value. \
         {{summary_prompt}} {{section_prompt}}",
    )?;
    graph.add_edge("init", "district_names", Predicate::StartsWithYes)?;
    graph.add_edge("district_names", "final", Predicate::Always)?;
    Ok(graph)
}

/// Run a tree, mapping recoverable dialog failures (dead ends, exhausted
/// retries) to an empty JSON result.
pub async fn run_tree(tree: &mut AsyncDecisionTree) -> Result<Map<String, Value>, ServiceError> {
    match tree.run().await {
        Ok(response) => Ok(llm_response_as_json(&response)),
        Err(err) if err.is_recoverable() => {
            debug!(%err, "dialog ended without output");
            Ok(Map::new())
        }
        Err(TreeError::Service(err)) => Err(err),
        Err(err) => {
            debug!(%err, "dialog failed");
            Ok(Map::new())
        }
    }
}

/// Run a tree and return the raw terminal response (no JSON parsing).
pub async fn run_tree_raw(tree: &mut AsyncDecisionTree) -> Result<Option<String>, ServiceError> {
    match tree.run().await {
        Ok(response) => Ok(Some(response)),
        Err(err) if err.is_recoverable() => Ok(None),
        Err(TreeError::Service(err)) => Err(err),
        Err(err) => {
            debug!(%err, "dialog failed");
            Ok(None)
        }
    }
}

/// Seed the tree with a transcript prefix, then run it.
pub async fn run_tree_with_seed(
    tree: &mut AsyncDecisionTree,
    seed: Vec<ChatMessage>,
) -> Result<Map<String, Value>, ServiceError> {
    tree.seed(seed);
    run_tree(tree).await
}

/// Check the base setback transcript to see whether an ordinance was
/// found: the first assistant reply (index 2) must start with "yes".
pub fn found_ord(messages: &[ChatMessage]) -> bool {
    messages
        .get(2)
        .is_some_and(|message| starts_with_yes(&message.content))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn setback_bindings() -> Map<String, Value> {
        json!({
            "tech": "large wind energy systems",
            "feature": "property lines",
            "ignore_features": "roads, railroads",
            "text": "All WECS shall be set back 1,000 feet.",
        })
        .as_object()
        .cloned()
        .expect("map")
    }

    #[test]
    fn test_base_setback_graph_structure() {
        let graph = setup_base_setback_graph(setback_bindings()).expect("graph");
        let rendered = graph
            .render_prompt(&"init".to_string(), &Map::new())
            .expect("render");
        assert!(rendered.contains("property lines"));
        assert!(rendered.contains("All WECS shall be set back 1,000 feet."));

        let edges = graph
            .edges_in_insertion_order(&"init".to_string())
            .expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].0, "get_text");
    }

    #[test]
    fn test_multiplier_graph_branches() {
        let graph = setup_multiplier(setback_bindings()).expect("graph");
        let init_edges = graph
            .edges_in_insertion_order(&"init".to_string())
            .expect("edges");
        assert_eq!(init_edges.len(), 2);
        // No -> fixed-distance branch first, Yes -> multiplier branch
        assert_eq!(init_edges[0].0, "no_multiplier");
        assert_eq!(init_edges[1].0, "m_single");

        // terminal nodes have no outgoing edges
        for terminal in ["out_static", "out_m", "out_no_adder"] {
            let edges = graph
                .edges_in_insertion_order(&terminal.to_string())
                .expect("edges");
            assert!(edges.is_empty(), "{terminal} must be terminal");
        }
    }

    #[test]
    fn test_conditional_graphs_yield_expected_keys() {
        let min = setup_conditional_min(setback_bindings()).expect("graph");
        let out = min
            .render_prompt(&"out".to_string(), &Map::new())
            .expect("render");
        assert!(out.contains("'min_dist'"));

        let max = setup_conditional_max(setback_bindings()).expect("graph");
        let out = max
            .render_prompt(&"out".to_string(), &Map::new())
            .expect("render");
        assert!(out.contains("'max_dist'"));
    }

    #[test]
    fn test_extra_restriction_kinds() {
        let bindings = json!({
            "tech": "large wind energy systems",
            "restriction": "maximum noise levels",
            "text": "Noise shall not exceed 32 dBA.",
        })
        .as_object()
        .cloned()
        .expect("map");

        let numerical =
            setup_graph_extra_restriction(RestrictionKind::Numerical, bindings.clone())
                .expect("graph");
        let edges = numerical
            .edges_in_insertion_order(&"init".to_string())
            .expect("edges");
        assert_eq!(edges[0].0, "value");

        let qualitative =
            setup_graph_extra_restriction(RestrictionKind::Qualitative, bindings.clone())
                .expect("graph");
        let edges = qualitative
            .edges_in_insertion_order(&"init".to_string())
            .expect("edges");
        assert_eq!(edges[0].0, "final");

        let prohibition =
            setup_graph_extra_restriction(RestrictionKind::Prohibition, bindings).expect("graph");
        let edges = prohibition
            .edges_in_insertion_order(&"init".to_string())
            .expect("edges");
        assert_eq!(edges[0].0, "is_conditional");
    }

    #[test]
    fn test_found_ord() {
        let yes = vec![
            ChatMessage::system("s"),
            ChatMessage::user("q"),
            ChatMessage::assistant("Yes, there is a setback."),
        ];
        assert!(found_ord(&yes));

        let no = vec![
            ChatMessage::system("s"),
            ChatMessage::user("q"),
            ChatMessage::assistant("No."),
        ];
        assert!(!found_ord(&no));

        assert!(!found_ord(&[ChatMessage::system("s")]));
    }
}
