//! Error types for the relay.

use thiserror::Error;

#[derive(Error, Debug)]
#[non_exhaustive]
pub enum RelayError {
    #[error("Configuration error: {message}")]
    Config { message: String },

    #[error("Upstream error: {message}")]
    Upstream { message: String },

    /// Non-2xx reply from the upstream, with a status the caller can mirror.
    #[error("Upstream returned status {status}: {message}")]
    UpstreamStatus { status: u16, message: String },

    #[error("Translation error: {message}")]
    Translation { message: String },

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),
}

impl RelayError {
    pub fn config(msg: impl Into<String>) -> Self {
        Self::Config {
            message: msg.into(),
        }
    }

    pub fn upstream(msg: impl Into<String>) -> Self {
        Self::Upstream {
            message: msg.into(),
        }
    }

    pub fn upstream_status(status: u16, msg: impl Into<String>) -> Self {
        Self::UpstreamStatus {
            status,
            message: msg.into(),
        }
    }

    pub fn translation(msg: impl Into<String>) -> Self {
        Self::Translation {
            message: msg.into(),
        }
    }

    /// HTTP status to mirror back to the client for errors raised before any
    /// response bytes were sent.
    pub fn mirror_status(&self) -> u16 {
        match self {
            Self::UpstreamStatus { status, .. } => *status,
            _ => 500,
        }
    }
}

pub type Result<T> = std::result::Result<T, RelayError>;
