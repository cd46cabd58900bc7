//! Jurisdiction (location) validation of retrieved documents
//!
//! A document is kept only when a weighted vote across its pages says the
//! legal text applies to the target jurisdiction. Weights are page text
//! lengths; pages whose dialog abstains (dead end, empty output) are
//! excluded from both numerator and denominator.

use futures::future::join_all;
use serde_json::Value;
use tracing::debug;

use docstore::{Document, Jurisdiction, attrs};

use crate::llm::client::CallKwargs;
use crate::llm::{ChatLlmCaller, StructuredLlmCaller};
use crate::services::base::ServiceError;
use crate::services::usage::{SharedUsage, UsageCategory};
use crate::text::llm_response_as_json;
use crate::tree::{AsyncDecisionTree, TreeError};
use crate::validation::graphs::setup_graph_correct_jurisdiction_type;

const VOTE_THRESHOLD: f64 = 0.5;

/// Weighted vote over `(vote, weight)` pairs; `None` votes abstain.
/// Returns the weighted fraction of `true` votes, or 0.0 when every vote
/// abstained.
pub fn weighted_vote(votes: &[(Option<bool>, f64)]) -> f64 {
    let mut yes = 0.0;
    let mut total = 0.0;
    for (vote, weight) in votes {
        if let Some(vote) = vote {
            total += weight;
            if *vote {
                yes += weight;
            }
        }
    }
    if total == 0.0 { 0.0 } else { yes / total }
}

/// Validates that a document's legal text applies to the target
/// jurisdiction, page by page.
pub struct JurisdictionValidator {
    usage: Option<SharedUsage>,
    kwargs: CallKwargs,
}

impl JurisdictionValidator {
    pub fn new(usage: Option<SharedUsage>, kwargs: CallKwargs) -> Self {
        Self { usage, kwargs }
    }

    /// Run the jurisdiction dialog against every page, combine the votes,
    /// and stamp the score onto the document. Returns whether the document
    /// passes the vote threshold.
    pub async fn check(
        &self,
        doc: &mut Document,
        jurisdiction: &Jurisdiction,
    ) -> Result<bool, ServiceError> {
        let checks = doc
            .pages()
            .iter()
            .map(|page| self.check_page(page, jurisdiction));
        let outcomes = join_all(checks).await;

        let mut votes = Vec::with_capacity(outcomes.len());
        for (page, outcome) in doc.pages().iter().zip(outcomes) {
            let vote = outcome?;
            votes.push((vote, page.len() as f64));
        }
        let score = weighted_vote(&votes);
        doc.set_attr(attrs::JURISDICTION_SCORE, score);
        debug!(
            jurisdiction = %jurisdiction.full_name(),
            score,
            "jurisdiction vote complete"
        );
        Ok(score > VOTE_THRESHOLD)
    }

    /// One page's vote: `None` when the dialog abstained.
    async fn check_page(
        &self,
        page: &str,
        jurisdiction: &Jurisdiction,
    ) -> Result<Option<bool>, ServiceError> {
        let graph = match setup_graph_correct_jurisdiction_type(jurisdiction, page) {
            Ok(graph) => graph,
            Err(TreeError::Service(err)) => return Err(err),
            Err(_) => return Ok(None),
        };
        let chat = ChatLlmCaller::new(
            "You are a legal scholar that reads ordinance text and \
             determines which jurisdiction it applies to.",
            self.usage.clone(),
            self.kwargs.clone(),
        );
        let mut tree =
            AsyncDecisionTree::new(graph, chat, UsageCategory::DocumentLocationValidation);
        match tree.run().await {
            Ok(response) => {
                let parsed = llm_response_as_json(&response);
                Ok(parsed
                    .get("correct_jurisdiction")
                    .and_then(Value::as_bool))
            }
            Err(err) if err.is_recoverable() => Ok(None),
            Err(TreeError::Service(err)) => Err(err),
            Err(err) => {
                debug!(%err, "jurisdiction dialog failed");
                Ok(None)
            }
        }
    }
}

/// Quick name screen used alongside the full jurisdiction dialog: a
/// structured per-page check that the jurisdiction is actually named.
pub struct JurisdictionNameValidator {
    caller: StructuredLlmCaller,
}

impl JurisdictionNameValidator {
    pub fn new(caller: StructuredLlmCaller) -> Self {
        Self { caller }
    }

    pub async fn check(
        &self,
        doc: &mut Document,
        jurisdiction: &Jurisdiction,
    ) -> Result<bool, ServiceError> {
        let sys_msg = format!(
            "You extract structured data from legal text. Return your \
             answer in JSON format (not markdown). Your JSON file must \
             include exactly one key, '{{key}}', a boolean set to true only \
             if the text names or unambiguously refers to {}.",
            jurisdiction.full_name()
        )
        .replace("{key}", "mentions_jurisdiction");

        let checks = doc.pages().iter().map(|page| {
            self.caller
                .call(&sys_msg, page, UsageCategory::DocumentLocationValidation)
        });
        let outcomes = join_all(checks).await;

        let mut votes = Vec::with_capacity(outcomes.len());
        for (page, outcome) in doc.pages().iter().zip(outcomes) {
            let parsed = outcome?;
            let vote = parsed.get("mentions_jurisdiction").and_then(Value::as_bool);
            votes.push((vote, page.len() as f64));
        }
        let score = weighted_vote(&votes);
        doc.set_attr(attrs::NAME_SCORE, score);
        Ok(score > VOTE_THRESHOLD)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weighted_vote_basic() {
        let votes = [(Some(true), 100.0), (Some(false), 50.0)];
        assert!((weighted_vote(&votes) - 100.0 / 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_vote_excludes_abstentions() {
        let votes = [
            (Some(true), 10.0),
            (None, 1_000_000.0),
            (Some(false), 10.0),
        ];
        assert!((weighted_vote(&votes) - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_weighted_vote_all_abstain_is_zero() {
        let votes = [(None, 10.0), (None, 20.0)];
        assert_eq!(weighted_vote(&votes), 0.0);
        assert_eq!(weighted_vote(&[]), 0.0);
    }

    #[test]
    fn test_weighted_vote_favors_long_pages() {
        // a long affirming page outvotes several short dissenting ones
        let votes = [
            (Some(true), 5000.0),
            (Some(false), 100.0),
            (Some(false), 100.0),
        ];
        assert!(weighted_vote(&votes) > VOTE_THRESHOLD);
    }
}
