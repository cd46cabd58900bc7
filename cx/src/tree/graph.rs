//! Decision graph storage and prompt rendering

use std::collections::HashMap;

use handlebars::Handlebars;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde_json::{Map, Value};
use thiserror::Error;

use super::predicates::Predicate;
use crate::services::base::ServiceError;

/// Errors raised while building or traversing a decision graph
#[derive(Debug, Error)]
pub enum TreeError {
    #[error("decision graph has no 'init' node")]
    MissingInit,

    #[error("node {0:?} already exists in the decision graph")]
    DuplicateNode(String),

    #[error("node {0:?} does not exist in the decision graph")]
    UnknownNode(String),

    #[error("prompt binding missing while rendering node: {0}")]
    MissingBinding(String),

    #[error("no edge matched the reply at node {node:?}")]
    DeadEnd { node: String },

    #[error("LLM call yielded no response at node {node:?}")]
    CallFailed { node: String },

    #[error(transparent)]
    Service(ServiceError),
}

impl TreeError {
    /// Dead ends and exhausted-retry call failures are recoverable: the
    /// dialog simply has no output. Everything else propagates.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::DeadEnd { .. } | Self::CallFailed { .. })
    }
}

/// Render a standalone prompt template against a binding map, with the
/// same strict missing-key semantics as graph node rendering.
pub fn render(template: &str, data: &Map<String, Value>) -> Result<String, TreeError> {
    let mut renderer = Handlebars::new();
    renderer.set_strict_mode(true);
    renderer.register_escape_fn(handlebars::no_escape);
    renderer
        .render_template(template, data)
        .map_err(|err| TreeError::MissingBinding(err.to_string()))
}

/// A graph node: a prompt template parameterized by graph-wide bindings
#[derive(Debug, Clone)]
pub struct DialogNode {
    pub name: String,
    pub prompt: String,
}

/// A predicate-guarded transition
#[derive(Debug, Clone)]
pub struct DialogEdge {
    pub predicate: Predicate,
}

/// A directed dialog graph with graph-wide keyword bindings.
///
/// Exactly one node must be named `init`. Edges are evaluated in insertion
/// order; graph authors are responsible for predicates being mutually
/// exclusive on any single reply.
pub struct DecisionGraph {
    graph: DiGraph<DialogNode, DialogEdge>,
    index: HashMap<String, NodeIndex>,
    bindings: Map<String, Value>,
    renderer: Handlebars<'static>,
}

impl Default for DecisionGraph {
    fn default() -> Self {
        Self::new()
    }
}

impl DecisionGraph {
    pub fn new() -> Self {
        let mut renderer = Handlebars::new();
        renderer.set_strict_mode(true);
        renderer.register_escape_fn(handlebars::no_escape);
        Self {
            graph: DiGraph::new(),
            index: HashMap::new(),
            bindings: Map::new(),
            renderer,
        }
    }

    /// Set a graph-wide binding available to every node prompt.
    pub fn set_binding(&mut self, key: &str, value: impl Into<Value>) {
        self.bindings.insert(key.to_string(), value.into());
    }

    /// Merge a map of bindings into the graph.
    pub fn set_bindings(&mut self, bindings: Map<String, Value>) {
        self.bindings.extend(bindings);
    }

    /// Current graph-wide bindings
    pub fn bindings(&self) -> &Map<String, Value> {
        &self.bindings
    }

    /// Add a named node with a prompt template.
    pub fn add_node(&mut self, name: &str, prompt: &str) -> Result<(), TreeError> {
        if self.index.contains_key(name) {
            return Err(TreeError::DuplicateNode(name.to_string()));
        }
        let idx = self.graph.add_node(DialogNode {
            name: name.to_string(),
            prompt: prompt.to_string(),
        });
        self.index.insert(name.to_string(), idx);
        Ok(())
    }

    /// Add a predicate-guarded edge between two existing nodes.
    pub fn add_edge(&mut self, from: &str, to: &str, predicate: Predicate) -> Result<(), TreeError> {
        let from_idx = self.node_index(from)?;
        let to_idx = self.node_index(to)?;
        self.graph.add_edge(from_idx, to_idx, DialogEdge { predicate });
        Ok(())
    }

    fn node_index(&self, name: &str) -> Result<NodeIndex, TreeError> {
        self.index
            .get(name)
            .copied()
            .ok_or_else(|| TreeError::UnknownNode(name.to_string()))
    }

    /// Name of the entry node, verifying it exists
    pub fn init_node(&self) -> Result<String, TreeError> {
        if self.index.contains_key("init") {
            Ok("init".to_string())
        } else {
            Err(TreeError::MissingInit)
        }
    }

    /// Outgoing edges of a node as `(target, predicate)` pairs, in the
    /// order the edges were added.
    pub fn edges_in_insertion_order(
        &self,
        node: &String,
    ) -> Result<Vec<(String, Predicate)>, TreeError> {
        let idx = self.node_index(node)?;
        let mut edges: Vec<_> = self
            .graph
            .edges(idx)
            .map(|edge| {
                (
                    edge.id(),
                    self.graph[edge.target()].name.clone(),
                    edge.weight().predicate,
                )
            })
            .collect();
        // petgraph iterates adjacency most-recent first; edge indices are
        // assigned in insertion order, so sort by them
        edges.sort_by_key(|(id, _, _)| *id);
        Ok(edges.into_iter().map(|(_, name, p)| (name, p)).collect())
    }

    /// Render a node's prompt from the union of graph bindings and
    /// collected assistant responses. A missing key is a programmer error
    /// (graph/binding mismatch), not a silent blank.
    pub fn render_prompt(
        &self,
        node: &String,
        responses: &Map<String, Value>,
    ) -> Result<String, TreeError> {
        let idx = self.node_index(node)?;
        let mut data = self.bindings.clone();
        data.extend(responses.clone());
        self.renderer
            .render_template(&self.graph[idx].prompt, &data)
            .map_err(|err| TreeError::MissingBinding(err.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_merges_responses_over_bindings() {
        let mut graph = DecisionGraph::new();
        graph.set_binding("tech", "solar energy systems");
        graph
            .add_node("init", "Tech is {{tech}}; earlier reply: {{prior}}")
            .expect("node");

        let mut responses = Map::new();
        responses.insert("prior".to_string(), Value::String("Yes.".to_string()));
        let rendered = graph
            .render_prompt(&"init".to_string(), &responses)
            .expect("render");
        assert_eq!(rendered, "Tech is solar energy systems; earlier reply: Yes.");
    }

    #[test]
    fn test_no_html_escaping() {
        let mut graph = DecisionGraph::new();
        graph.set_binding("text", "setbacks > 1,000 feet & \"more\"");
        graph.add_node("init", "{{text}}").expect("node");
        let rendered = graph
            .render_prompt(&"init".to_string(), &Map::new())
            .expect("render");
        assert_eq!(rendered, "setbacks > 1,000 feet & \"more\"");
    }

    #[test]
    fn test_recoverable_classification() {
        assert!(TreeError::DeadEnd { node: "a".into() }.is_recoverable());
        assert!(TreeError::CallFailed { node: "a".into() }.is_recoverable());
        assert!(!TreeError::MissingInit.is_recoverable());
    }
}
