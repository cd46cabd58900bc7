//! Decision-tree dialog engine
//!
//! A decision graph is a directed graph of named nodes, each carrying a
//! prompt template, with predicate-guarded edges evaluated against the
//! most recent assistant reply. Traversal drives a chat caller from the
//! `init` node until a terminal node is reached; the terminal reply is the
//! dialog output.

mod graph;
mod predicates;

pub use graph::{DecisionGraph, DialogEdge, DialogNode, TreeError, render};
pub use predicates::{
    Predicate, starts_with_no, starts_with_yes, does_not_start_with_no,
};

use serde_json::{Map, Value};
use tracing::debug;

use crate::llm::ChatLlmCaller;
use crate::llm::client::ChatMessage;
use crate::services::usage::UsageCategory;

/// Async traversal of a [`DecisionGraph`] against a chat caller.
///
/// Traversal is single-threaded cooperative per dialog: turns within one
/// dialog are strictly sequential, and suspensions occur only at LLM
/// calls. A dialog may be seeded with a clone of an earlier transcript
/// before the first run; this is how the structured-extraction stage forks
/// a base reasoning prefix into specialized branches.
pub struct AsyncDecisionTree {
    graph: DecisionGraph,
    chat: ChatLlmCaller,
    category: UsageCategory,
    responses: Map<String, Value>,
}

impl AsyncDecisionTree {
    pub fn new(graph: DecisionGraph, chat: ChatLlmCaller, category: UsageCategory) -> Self {
        Self {
            graph,
            chat,
            category,
            responses: Map::new(),
        }
    }

    /// Seed the dialog with a transcript prefix cloned from another
    /// dialog.
    pub fn seed(&mut self, messages: Vec<ChatMessage>) {
        self.chat.set_messages(messages);
    }

    /// The chat transcript accumulated so far
    pub fn messages(&self) -> &[ChatMessage] {
        self.chat.messages()
    }

    /// Deep-clone the transcript for forking
    pub fn fork_messages(&self) -> Vec<ChatMessage> {
        self.chat.fork_messages()
    }

    /// Walk the graph from `init` and return the terminal assistant reply.
    pub async fn run(&mut self) -> Result<String, TreeError> {
        let mut current = self.graph.init_node()?;
        loop {
            let prompt = self.graph.render_prompt(&current, &self.responses)?;
            let reply = match self.chat.call(&prompt, self.category).await {
                Ok(Some(reply)) => reply,
                Ok(None) => return Err(TreeError::CallFailed { node: current }),
                Err(err) => return Err(TreeError::Service(err)),
            };
            self.responses
                .insert(current.clone(), Value::String(reply.clone()));

            let edges = self.graph.edges_in_insertion_order(&current)?;
            if edges.is_empty() {
                debug!(node = %current, "reached terminal node");
                return Ok(reply);
            }
            match edges
                .iter()
                .find(|(_, predicate)| predicate.matches(&reply))
            {
                Some((next, _)) => {
                    debug!(from = %current, to = %next, "following edge");
                    current = next.clone();
                }
                None => return Err(TreeError::DeadEnd { node: current }),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::client::{CallKwargs, Role};

    fn graph_yes_no() -> DecisionGraph {
        let mut graph = DecisionGraph::new();
        graph.set_binding("tech", "large wind energy systems");
        graph
            .add_node("init", "Does the text mention {{tech}}? Start with Yes or No.")
            .expect("node");
        graph
            .add_node("affirm", "Extract the relevant text.")
            .expect("node");
        graph
            .add_edge("init", "affirm", Predicate::StartsWithYes)
            .expect("edge");
        graph
    }

    #[test]
    fn test_graph_requires_init() {
        let mut graph = DecisionGraph::new();
        graph.add_node("start", "prompt").expect("node");
        assert!(matches!(graph.init_node(), Err(TreeError::MissingInit)));
    }

    #[test]
    fn test_duplicate_node_is_error() {
        let mut graph = DecisionGraph::new();
        graph.add_node("init", "prompt").expect("node");
        let err = graph.add_node("init", "other").unwrap_err();
        assert!(matches!(err, TreeError::DuplicateNode(name) if name == "init"));
    }

    #[test]
    fn test_edge_to_unknown_node_is_error() {
        let mut graph = DecisionGraph::new();
        graph.add_node("init", "prompt").expect("node");
        let err = graph
            .add_edge("init", "missing", Predicate::Always)
            .unwrap_err();
        assert!(matches!(err, TreeError::UnknownNode(name) if name == "missing"));
    }

    #[test]
    fn test_missing_binding_is_programmer_error() {
        let graph = graph_yes_no();
        // "affirm" renders fine; drop the binding and re-render "init"
        let mut bare = DecisionGraph::new();
        bare.add_node("init", "Mention of {{tech}}?").expect("node");
        let err = bare.render_prompt(&"init".to_string(), &Map::new()).unwrap_err();
        assert!(matches!(err, TreeError::MissingBinding(_)));

        let ok = graph
            .render_prompt(&"init".to_string(), &Map::new())
            .expect("render");
        assert!(ok.contains("large wind energy systems"));
    }

    #[test]
    fn test_edges_evaluated_in_insertion_order() {
        let mut graph = DecisionGraph::new();
        graph.add_node("init", "prompt").expect("node");
        graph.add_node("first", "prompt").expect("node");
        graph.add_node("second", "prompt").expect("node");
        // both edges match any reply; the first added must win
        graph
            .add_edge("init", "first", Predicate::Always)
            .expect("edge");
        graph
            .add_edge("init", "second", Predicate::Always)
            .expect("edge");

        let edges = graph
            .edges_in_insertion_order(&"init".to_string())
            .expect("edges");
        assert_eq!(edges[0].0, "first");
        assert_eq!(edges[1].0, "second");
    }

    #[test]
    fn test_seeding_replaces_transcript() {
        let chat = ChatLlmCaller::new("system", None, CallKwargs::default());
        let mut tree = AsyncDecisionTree::new(graph_yes_no(), chat, UsageCategory::Default);
        tree.seed(vec![
            ChatMessage::system("system"),
            ChatMessage::user("q"),
            ChatMessage::assistant("Yes, it does."),
        ]);
        assert_eq!(tree.messages().len(), 3);
        assert_eq!(tree.messages()[2].role, Role::Assistant);
    }
}
