use crate::error::{RelayError, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Immutable relay configuration, loaded once at startup and passed by
/// reference into each component. Nothing here changes after `main` builds
/// the app state, which keeps the two display toggles testable without
/// process restarts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    /// Static inbound-model → upstream-model mapping. Exact-match only.
    #[serde(default = "default_models")]
    pub models: HashMap<String, String>,
    #[serde(default)]
    pub fallback: FallbackModels,
    /// When true, upstream reasoning text is folded into content between
    /// `<think>` markers; when false it is dropped.
    #[serde(default = "default_true")]
    pub show_reasoning: bool,
    /// When true, upstream requests ask for extended reasoning.
    #[serde(default)]
    pub thinking_mode: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
}

/// Heuristic fallback targets used when an inbound model is unmapped and the
/// probe is inconclusive.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FallbackModels {
    #[serde(default = "default_large")]
    pub large: String,
    #[serde(default = "default_medium")]
    pub medium: String,
    #[serde(default = "default_small")]
    pub small: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            api_key_env: default_api_key_env(),
        }
    }
}

impl Default for FallbackModels {
    fn default() -> Self {
        Self {
            large: default_large(),
            medium: default_medium(),
            small: default_small(),
        }
    }
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig::default(),
            models: default_models(),
            fallback: FallbackModels::default(),
            show_reasoning: true,
            thinking_mode: false,
        }
    }
}

fn default_port() -> u16 {
    8787
}

fn default_api_key_env() -> String {
    "UPSTREAM_API_KEY".to_string()
}

fn default_true() -> bool {
    true
}

fn default_large() -> String {
    "llama-3.1-405b-instruct".to_string()
}

fn default_medium() -> String {
    "llama-3.3-70b-instruct".to_string()
}

fn default_small() -> String {
    "llama-3.1-8b-instruct".to_string()
}

fn default_models() -> HashMap<String, String> {
    let mut models = HashMap::new();
    models.insert("gpt-4o".to_string(), default_large());
    models.insert("gpt-4o-mini".to_string(), default_small());
    models.insert("gpt-3.5-turbo".to_string(), default_small());
    models
}

impl RelayConfig {
    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            RelayError::config(format!(
                "Failed to read config file {}: {}",
                path.display(),
                e
            ))
        })?;
        let mut config: Self = toml::from_str(&content)?;
        config.apply_env();
        Ok(config)
    }

    /// Load from an explicit path, from `chat-relay.toml` in the current
    /// directory, or fall back to built-in defaults. Environment variables
    /// are applied on top in every case.
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidate = Path::new("chat-relay.toml");
        if candidate.exists() {
            tracing::info!(path = %candidate.display(), "Loading config");
            return Self::load(candidate);
        }

        let mut config = Self::default();
        config.apply_env();
        Ok(config)
    }

    /// Overlay environment variables: `UPSTREAM_BASE_URL` and `PORT`.
    /// The API key itself is resolved lazily via [`Self::resolve_api_key`].
    fn apply_env(&mut self) {
        if let Ok(url) = std::env::var("UPSTREAM_BASE_URL") {
            if !url.is_empty() {
                self.upstream.base_url = Some(url);
            }
        }
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(port) = port.parse() {
                self.port = port;
            }
        }
    }

    /// The upstream base URL. Required: there is no preset to fall back to,
    /// this relay targets exactly one upstream.
    pub fn effective_base_url(&self) -> Result<String> {
        self.upstream.base_url.clone().ok_or_else(|| {
            RelayError::config(
                "No upstream base URL configured. Set UPSTREAM_BASE_URL or \
                 [upstream].base_url in chat-relay.toml",
            )
        })
    }

    /// Full URL of the upstream chat completions endpoint.
    pub fn chat_completions_url(&self) -> Result<String> {
        let base = self.effective_base_url()?;
        Ok(format!("{}/chat/completions", base.trim_end_matches('/')))
    }

    /// Resolve the API key from the configured environment variable.
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.upstream.api_key_env).map_err(|_| {
            RelayError::config(format!(
                "Environment variable '{}' not set. Set it with your upstream API key.",
                self.upstream.api_key_env
            ))
        })
    }
}
