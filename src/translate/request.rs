//! Build the upstream request from an inbound Chat Completions request.
//!
//! Injects the policy prompt when the caller did not supply a system message,
//! fills in default sampling parameters, and sets the extended-reasoning
//! parameter when thinking mode is enabled.

use super::chat_types::{ChatCompletionRequest, ChatMessage};
use super::upstream_types::UpstreamRequest;
use crate::config::RelayConfig;

pub const DEFAULT_TEMPERATURE: f64 = 0.5;
pub const DEFAULT_MAX_TOKENS: u64 = 16384;

/// Standing instructions sent as the leading system message whenever the
/// caller did not provide their own.
pub const POLICY_PROMPT: &str = "\
You are a capable, careful assistant served through an inference relay. \
Follow these standing instructions for every conversation:

1. Answer the user's actual question directly before adding background. \
Prefer concrete, verifiable statements over hedging.
2. When a request is ambiguous, state the interpretation you are answering \
under rather than asking a clarifying question for trivial gaps.
3. Use plain Markdown. Put code in fenced blocks with a language tag. Do not \
wrap prose in code fences.
4. If you are asked for something you cannot know (private data, future \
events, live information), say so plainly instead of guessing.
5. Decline requests for clearly harmful content, and keep the refusal to one \
short sentence followed by a safer alternative when one exists.
6. Keep answers as short as correctness allows. Do not restate the question \
or pad with summaries of your own answer.";

/// Translate an inbound request into the upstream shape. Pure function: the
/// inbound request is not mutated, `resolved_model` comes from the resolver.
pub fn build_upstream_request(
    req: &ChatCompletionRequest,
    resolved_model: &str,
    config: &RelayConfig,
) -> UpstreamRequest {
    let mut messages = Vec::with_capacity(req.messages.len() + 1);

    let has_system = req
        .messages
        .first()
        .is_some_and(|m| m.role == "system");

    if !has_system {
        messages.push(ChatMessage::new("system", POLICY_PROMPT));
    }
    messages.extend(req.messages.iter().cloned());

    UpstreamRequest {
        model: resolved_model.to_string(),
        messages,
        temperature: req.temperature.unwrap_or(DEFAULT_TEMPERATURE),
        max_tokens: req.max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        stream: req.stream.unwrap_or(false),
        enable_thinking: config.thinking_mode.then_some(true),
    }
}
