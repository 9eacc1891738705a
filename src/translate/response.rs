//! Reshape the upstream's non-streaming JSON reply into the inbound
//! Chat Completions shape.

use super::chat_types::{ChatCompletionResponse, ChatMessage, Choice};
use super::upstream_types::UpstreamResponse;
use crate::config::RelayConfig;

/// Translate an upstream response into the inbound shape. Pure function:
/// `original_model` is what the caller originally requested and is echoed
/// back regardless of what the resolver picked.
pub fn upstream_to_chat(
    resp: &UpstreamResponse,
    original_model: &str,
    config: &RelayConfig,
) -> ChatCompletionResponse {
    let choices = resp
        .choices
        .iter()
        .map(|c| {
            let content = c.message.content.clone().unwrap_or_default();
            let reasoning = c.message.reasoning.as_deref().filter(|r| !r.is_empty());

            let content = match reasoning {
                Some(r) if config.show_reasoning => fold_reasoning(r, &content),
                _ => content,
            };

            Choice {
                index: c.index,
                message: ChatMessage::new(c.message.role.clone(), content),
                finish_reason: c.finish_reason.clone(),
            }
        })
        .collect();

    ChatCompletionResponse {
        id: fresh_response_id(),
        object: "chat.completion".to_string(),
        created: chrono::Utc::now().timestamp(),
        model: original_model.to_string(),
        choices,
        usage: resp.usage.clone().unwrap_or_default(),
    }
}

/// Wrap reasoning text in `<think>` markers and prepend it to the answer.
fn fold_reasoning(reasoning: &str, content: &str) -> String {
    format!("<think>\n{reasoning}\n</think>\n\n{content}")
}

fn fresh_response_id() -> String {
    format!(
        "chatcmpl-{}",
        uuid::Uuid::new_v4().to_string().replace('-', "")
    )
}
