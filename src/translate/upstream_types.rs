//! Type definitions for the upstream inference API.
//!
//! The upstream speaks a Chat Completions dialect with one addition: messages
//! and deltas may carry a `reasoning` field (chain-of-thought text distinct
//! from the final answer). Some deployments name the field
//! `reasoning_content`; both spellings are accepted on deserialization.

use super::chat_types::{ChatMessage, Usage};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Request types (what we send TO the upstream)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    pub temperature: f64,
    pub max_tokens: u64,
    pub stream: bool,
    /// Extended-reasoning request. Omitted entirely when thinking mode is
    /// off; the upstream treats `false` and absent differently.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub enable_thinking: Option<bool>,
}

// ---------------------------------------------------------------------------
// Response types (what we receive FROM the upstream)
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamResponse {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<UpstreamChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamChoice {
    pub index: u64,
    pub message: UpstreamMessage,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamMessage {
    pub role: String,
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, alias = "reasoning_content")]
    pub reasoning: Option<String>,
}

// ---------------------------------------------------------------------------
// Streaming chunk types
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamChunk {
    #[serde(default)]
    pub id: String,
    #[serde(default)]
    pub object: String,
    #[serde(default)]
    pub created: i64,
    #[serde(default)]
    pub model: String,
    pub choices: Vec<UpstreamChunkChoice>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamChunkChoice {
    pub index: u64,
    #[serde(default)]
    pub delta: UpstreamDelta,
    pub finish_reason: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpstreamDelta {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content: Option<String>,
    #[serde(default, alias = "reasoning_content")]
    pub reasoning: Option<String>,
}

// ---------------------------------------------------------------------------
// Error body
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamErrorResponse {
    pub error: UpstreamError,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamError {
    pub message: String,
    #[serde(rename = "type")]
    #[serde(default)]
    pub error_type: String,
}
