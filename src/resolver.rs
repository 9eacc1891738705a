//! Model resolution: map an inbound model identifier to an upstream one.
//!
//! Resolution never fails. In order: exact-match lookup in the configured
//! mapping, a one-shot probe of the upstream with the inbound identifier
//! verbatim, then a substring heuristic picking one of the three fallback
//! tiers. Probe failures of any kind are swallowed; the heuristic always
//! produces something usable.

use crate::config::{FallbackModels, RelayConfig};
use crate::translate::chat_types::ChatMessage;
use crate::translate::upstream_types::UpstreamRequest;

const LARGE_HINTS: [&str; 3] = ["gpt-4", "claude-opus", "405b"];
const MEDIUM_HINTS: [&str; 3] = ["claude", "gemini", "70b"];

/// Resolve an inbound model identifier to an upstream one.
pub async fn resolve_model(
    inbound: &str,
    config: &RelayConfig,
    client: &reqwest::Client,
) -> String {
    if let Some(mapped) = config.models.get(inbound) {
        tracing::debug!(model = inbound, upstream = %mapped, "resolved via mapping");
        return mapped.clone();
    }

    if probe_model(inbound, config, client).await {
        tracing::info!(model = inbound, "unmapped model accepted by upstream probe");
        return inbound.to_string();
    }

    let fallback = heuristic_fallback(inbound, &config.fallback);
    tracing::info!(model = inbound, fallback, "unmapped model, using heuristic fallback");
    fallback.to_string()
}

/// One-shot probe: a single-token completion with the inbound identifier
/// verbatim. Any 2xx accepts the identifier; network errors and non-2xx are
/// treated as a non-match and never propagated.
async fn probe_model(model: &str, config: &RelayConfig, client: &reqwest::Client) -> bool {
    let Ok(url) = config.chat_completions_url() else {
        return false;
    };
    let Ok(api_key) = config.resolve_api_key() else {
        return false;
    };

    let probe = UpstreamRequest {
        model: model.to_string(),
        messages: vec![ChatMessage::new("user", "Hi")],
        temperature: 0.0,
        max_tokens: 1,
        stream: false,
        enable_thinking: None,
    };

    match client
        .post(&url)
        .header("Authorization", format!("Bearer {api_key}"))
        .json(&probe)
        .send()
        .await
    {
        Ok(resp) => resp.status().is_success(),
        Err(e) => {
            tracing::debug!(model, error = %e, "model probe failed");
            false
        }
    }
}

/// Case-insensitive substring heuristic. Flagship hints take precedence over
/// mid-tier hints; everything else lands on the small model.
pub fn heuristic_fallback<'a>(model: &str, fallback: &'a FallbackModels) -> &'a str {
    let lowered = model.to_lowercase();

    if LARGE_HINTS.iter().any(|hint| lowered.contains(hint)) {
        &fallback.large
    } else if MEDIUM_HINTS.iter().any(|hint| lowered.contains(hint)) {
        &fallback.medium
    } else {
        &fallback.small
    }
}
