//! Errors raised while decoding job envelopes and validating configuration.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum EnvelopeError {
    #[error("job message is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("job message is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("job message field '{field}' is invalid: {reason}")]
    InvalidField { field: &'static str, reason: String },
    #[error("unsupported assessment type '{0}'")]
    UnsupportedAssessmentType(String),
}

impl EnvelopeError {
    pub fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        EnvelopeError::InvalidField {
            field,
            reason: reason.into(),
        }
    }
}

/// A configuration value outside its accepted range.
#[derive(Debug, Error)]
#[error("invalid configuration for {setting}: {reason}")]
pub struct ConfigError {
    pub setting: &'static str,
    pub reason: String,
}

impl ConfigError {
    pub fn new(setting: &'static str, reason: impl Into<String>) -> Self {
        Self {
            setting,
            reason: reason.into(),
        }
    }
}
