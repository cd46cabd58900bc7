//! Decision graphs for document location validation

use docstore::Jurisdiction;

use crate::tree::{DecisionGraph, Predicate, TreeError};

/// Build the graph that checks whether legal text applies to the entire
/// area governed by the given jurisdiction.
///
/// The graph narrows level by level: does the text name a jurisdiction
/// type at all, is it the right state, the right county, the right
/// subdivision. Only the levels the jurisdiction actually has are wired
/// in. The `text` binding must carry the page under test.
pub fn setup_graph_correct_jurisdiction_type(
    jurisdiction: &Jurisdiction,
    text: &str,
) -> Result<DecisionGraph, TreeError> {
    let mut graph = DecisionGraph::new();
    graph.set_binding("text", text);

    graph.add_node(
        "init",
        "Does the following legal text explicitly outline the type of \
         jurisdiction it applies to? Common types of jurisdictions include \
         'state', 'county', 'city', 'township', 'borough', etc. Begin your \
         response with either 'Yes' or 'No' and explain your answer.\
         \n\n\"\"\"\n{{text}}\n\"\"\"",
    )?;

    graph.add_node(
        "is_state",
        &format!(
            "Does the legal text explicitly state that the statutes within \
             apply to **the entire area** governed by {state} state? If the \
             legal text applies to a different state or only to a \
             subdivision like a county or township within {state} state, \
             say 'No'. Begin your response with either 'Yes' or 'No' and \
             explain your answer.",
            state = jurisdiction.state
        ),
    )?;
    graph.add_edge("init", "is_state", Predicate::StartsWithYes)?;

    graph.add_node(
        "final",
        &format!(
            "Respond based on our entire conversation so far. Return your \
             answer as a dictionary in JSON format (not markdown). Your \
             JSON file must include exactly two keys. The keys are \
             'correct_jurisdiction' and 'explanation'. The value of the \
             'correct_jurisdiction' key should be a boolean that is set to \
             `true` **only if** the text explicitly states that the \
             statutes within apply to **the entire area** governed by \
             {full_name} (`false` otherwise). The value of the \
             'explanation' key should be a string containing a short \
             explanation for your choice.",
            full_name = jurisdiction.full_name()
        ),
    )?;

    let mut node_to_connect = "is_state".to_string();

    if let Some(county_phrase) = jurisdiction.county_phrase() {
        graph.add_node(
            "is_county",
            &format!(
                "Does the legal text explicitly state that the statutes \
                 within apply to **the entire area** governed by \
                 {county_phrase}? If the legal text applies to a different \
                 county or only to a subdivision like a township or borough \
                 within {county_phrase}, say 'No'. Begin your response with \
                 either 'Yes' or 'No' and explain your answer."
            ),
        )?;
        graph.add_edge(&node_to_connect, "is_county", Predicate::StartsWithNo)?;
        graph.add_edge(&node_to_connect, "final", Predicate::StartsWithYes)?;
        node_to_connect = "is_county".to_string();
    }

    if let Some(subdivision_phrase) = jurisdiction.subdivision_phrase() {
        graph.add_node(
            "is_city",
            &format!(
                "Does the legal text explicitly state that the statutes \
                 within apply to **the entire area** governed by the \
                 {subdivision_phrase}? If the legal text applies to a \
                 different city, township, etc, say 'No'. Begin your \
                 response with either 'Yes' or 'No' and explain your answer."
            ),
        )?;
        graph.add_edge(&node_to_connect, "is_city", Predicate::StartsWithNo)?;
        graph.add_edge(&node_to_connect, "final", Predicate::StartsWithYes)?;
        node_to_connect = "is_city".to_string();
    }

    graph.add_edge(&node_to_connect, "final", Predicate::Always)?;

    Ok(graph)
}

#[cfg(test)]
mod tests {
    use super::*;
    use docstore::JurisdictionType;
    use serde_json::Map;

    #[test]
    fn test_county_graph_wires_county_level() {
        let jurisdiction = Jurisdiction::county("Decatur", "Indiana", 18031);
        let graph =
            setup_graph_correct_jurisdiction_type(&jurisdiction, "text body").expect("graph");
        assert!(graph.init_node().is_ok());

        let edges = graph
            .edges_in_insertion_order(&"is_state".to_string())
            .expect("edges");
        // wrong state -> check county; right state -> final
        assert_eq!(edges.len(), 2);
        assert_eq!(edges[0].0, "is_county");
        assert_eq!(edges[1].0, "final");

        let rendered = graph
            .render_prompt(&"init".to_string(), &Map::new())
            .expect("render");
        assert!(rendered.contains("text body"));
    }

    #[test]
    fn test_state_only_graph_skips_lower_levels() {
        let jurisdiction = Jurisdiction::state("Indiana", 18);
        let graph = setup_graph_correct_jurisdiction_type(&jurisdiction, "text").expect("graph");
        let edges = graph
            .edges_in_insertion_order(&"is_state".to_string())
            .expect("edges");
        assert_eq!(edges.len(), 1);
        assert_eq!(edges[0].0, "final");
    }

    #[test]
    fn test_subdivision_graph_reaches_city_level() {
        let jurisdiction = Jurisdiction::subdivision(
            JurisdictionType::Town,
            "Barton",
            Some("Orleans".to_string()),
            "Vermont",
            5000,
        );
        let graph = setup_graph_correct_jurisdiction_type(&jurisdiction, "text").expect("graph");
        let edges = graph
            .edges_in_insertion_order(&"is_county".to_string())
            .expect("edges");
        assert_eq!(edges[0].0, "is_city");
        let final_prompt = graph
            .render_prompt(&"final".to_string(), &Map::new())
            .expect("render");
        assert!(final_prompt.contains("Town of Barton, Orleans County, Vermont"));
    }
}
