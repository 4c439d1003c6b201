//! # Error Types
//!
//! Typed errors for configuration and transform setup. Runtime paths
//! (device capture, sinks) report through `anyhow` instead.

use thiserror::Error;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A note name such as `E2` or `F#3` could not be parsed.
    #[error("invalid note name `{0}`")]
    InvalidNote(String),

    /// A numeric parameter is outside its usable range.
    #[error("invalid parameter `{name}`: {reason}")]
    InvalidParameter {
        name: &'static str,
        reason: String,
    },

    /// The highest analysis bin lies at or above the Nyquist frequency.
    #[error("top bin at {top_hz:.1} Hz is not below Nyquist ({nyquist_hz:.1} Hz)")]
    NyquistExceeded { top_hz: f32, nyquist_hz: f32 },

    #[error("failed to read config: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Json(#[from] serde_json::Error),
}

impl ConfigError {
    pub(crate) fn invalid(name: &'static str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidParameter {
            name,
            reason: reason.into(),
        }
    }
}
