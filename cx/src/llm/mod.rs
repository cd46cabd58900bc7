//! LLM plumbing: provider client, rate-limited service, and callers
//!
//! The provider client speaks the wire protocol; the [`LlmService`] fronts
//! it with a token rolling-window rate limit and the retry policy; the
//! callers add transcript and structured-JSON conveniences on top.

pub mod calling;
pub mod client;
mod error;
pub mod service;

pub use calling::{ChatLlmCaller, LlmCaller, StructuredLlmCaller};
pub use client::{CallKwargs, ChatMessage, Completion, LlmClient, OpenAiClient, Role, create_client};
pub use error::LlmError;
pub use service::{LlmRequest, LlmService, RetryPolicy};
