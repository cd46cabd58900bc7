//! LLM caller flavors: one-shot, chat (transcript), and structured JSON
//!
//! Callers carry the per-task context (usage tracker, extra call kwargs)
//! so call sites only supply the message content. All three submit through
//! the running [`LlmService`](super::service::LlmService) queue.

use serde_json::{Map, Value};
use tracing::debug;

use super::client::{CallKwargs, ChatMessage, Role};
use super::service::{LlmRequest, LlmService};
use crate::services::base::{ServiceError, call};
use crate::services::usage::{SharedUsage, UsageCategory};

const JSON_INSTRUCTIONS: &str = "Return your answer in JSON format";

/// Simple one-shot caller with no memory and no parsing utilities.
#[derive(Clone, Default)]
pub struct LlmCaller {
    pub usage: Option<SharedUsage>,
    pub kwargs: CallKwargs,
}

impl LlmCaller {
    pub fn new(usage: Option<SharedUsage>, kwargs: CallKwargs) -> Self {
        Self { usage, kwargs }
    }

    /// Call the LLM with a system and a user message.
    ///
    /// Returns `None` when the service exhausted its retry budget; terminal
    /// provider errors propagate.
    pub async fn call(
        &self,
        sys_msg: &str,
        content: &str,
        category: UsageCategory,
    ) -> Result<Option<String>, ServiceError> {
        call::<LlmService>(LlmRequest {
            messages: vec![ChatMessage::system(sys_msg), ChatMessage::user(content)],
            category,
            usage: self.usage.clone(),
            kwargs: self.kwargs.clone(),
        })
        .await
    }
}

/// Chat caller holding a mutable transcript.
///
/// The transcript starts with exactly one system message; afterwards user
/// and assistant messages alternate strictly. A failed call rolls back the
/// appended user message so the transcript stays valid. Cloning is a deep
/// structural copy, which is how dialog forks are seeded.
#[derive(Clone)]
pub struct ChatLlmCaller {
    pub usage: Option<SharedUsage>,
    pub kwargs: CallKwargs,
    messages: Vec<ChatMessage>,
}

impl ChatLlmCaller {
    pub fn new(
        system_message: impl Into<String>,
        usage: Option<SharedUsage>,
        kwargs: CallKwargs,
    ) -> Self {
        Self {
            usage,
            kwargs,
            messages: vec![ChatMessage::system(system_message)],
        }
    }

    /// The current transcript
    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    /// Replace the transcript wholesale (dialog seeding). The replacement
    /// must itself be a valid transcript prefix.
    pub fn set_messages(&mut self, messages: Vec<ChatMessage>) {
        debug_assert!(matches!(
            messages.first().map(|m| m.role),
            Some(Role::System)
        ));
        self.messages = messages;
    }

    /// Deep-clone the transcript for seeding a fork.
    pub fn fork_messages(&self) -> Vec<ChatMessage> {
        self.messages.clone()
    }

    /// Chat with the LLM; appends the user message and, on success, the
    /// assistant reply.
    pub async fn call(
        &mut self,
        content: &str,
        category: UsageCategory,
    ) -> Result<Option<String>, ServiceError> {
        self.messages.push(ChatMessage::user(content));
        let outcome = call::<LlmService>(LlmRequest {
            messages: self.messages.clone(),
            category,
            usage: self.usage.clone(),
            kwargs: self.kwargs.clone(),
        })
        .await;

        match outcome {
            Ok(Some(response)) => {
                self.messages.push(ChatMessage::assistant(response.clone()));
                Ok(Some(response))
            }
            Ok(None) => {
                self.messages.pop();
                Ok(None)
            }
            Err(err) => {
                self.messages.pop();
                Err(err)
            }
        }
    }
}

/// Structured caller: like the one-shot caller, but guarantees the system
/// message requests JSON and parses the reply into a JSON object.
#[derive(Clone, Default)]
pub struct StructuredLlmCaller {
    pub usage: Option<SharedUsage>,
    pub kwargs: CallKwargs,
}

impl StructuredLlmCaller {
    pub fn new(usage: Option<SharedUsage>, kwargs: CallKwargs) -> Self {
        Self { usage, kwargs }
    }

    /// Call the LLM and parse the response as a JSON object. A missing or
    /// unparseable response yields an empty map.
    pub async fn call(
        &self,
        sys_msg: &str,
        content: &str,
        category: UsageCategory,
    ) -> Result<Map<String, Value>, ServiceError> {
        let sys_msg = add_json_instructions_if_needed(sys_msg);
        let response = call::<LlmService>(LlmRequest {
            messages: vec![ChatMessage::system(sys_msg), ChatMessage::user(content)],
            category,
            usage: self.usage.clone(),
            kwargs: self.kwargs.clone(),
        })
        .await?;
        Ok(match response {
            Some(text) => crate::text::llm_response_as_json(&text),
            None => Map::new(),
        })
    }
}

fn add_json_instructions_if_needed(sys_msg: &str) -> String {
    if sys_msg.contains("JSON format") {
        sys_msg.to_string()
    } else {
        debug!("JSON instructions not found in system message; adding");
        format!("{sys_msg}\n{JSON_INSTRUCTIONS}.")
    }
}
