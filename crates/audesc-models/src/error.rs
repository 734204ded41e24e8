//! Caller-facing error taxonomy.
//!
//! Errors returned to callers use a stable `{code, message, suggestion}`
//! shape. Raw provider error text never appears in `message`.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Submit-time input validation failures.
///
/// These surface immediately; the job never reaches `processing`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum InputError {
    #[error("input source locator is empty")]
    MissingSource,

    #[error("input is empty")]
    EmptyInput,

    #[error("input size {size_bytes} bytes exceeds maximum {max_bytes}")]
    Oversized { size_bytes: u64, max_bytes: u64 },

    #[error("input duration {duration}s is not a valid duration")]
    InvalidDuration { duration: f64 },

    #[error("input duration {duration}s exceeds maximum {max_secs}s")]
    TooLong { duration: f64, max_secs: f64 },

    #[error("image inputs must not declare a duration")]
    ImageWithDuration,
}

/// Stable error codes exposed at the boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed or out-of-bounds input descriptor
    InvalidInput,
    /// No job with that ID
    NotFound,
    /// Job exists but has no result yet
    NotReady,
    /// Job is already in a terminal state
    AlreadyTerminal,
    /// A provider stayed unavailable past the retry budget
    ProviderUnavailable,
    /// A provider rejected the content
    ContentRejected,
    /// The media format is not supported
    UnsupportedFormat,
    /// The job was cancelled
    Cancelled,
    /// Anything the taxonomy cannot name more precisely
    Internal,
}

impl ErrorCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "invalid_input",
            ErrorCode::NotFound => "not_found",
            ErrorCode::NotReady => "not_ready",
            ErrorCode::AlreadyTerminal => "already_terminal",
            ErrorCode::ProviderUnavailable => "provider_unavailable",
            ErrorCode::ContentRejected => "content_rejected",
            ErrorCode::UnsupportedFormat => "unsupported_format",
            ErrorCode::Cancelled => "cancelled",
            ErrorCode::Internal => "internal",
        }
    }

    /// Default suggestion for this code.
    pub fn suggestion(&self) -> &'static str {
        match self {
            ErrorCode::InvalidInput => "Check the input descriptor and resubmit.",
            ErrorCode::NotFound => "Verify the job ID; the job may have been archived.",
            ErrorCode::NotReady => "Poll the job status until it completes.",
            ErrorCode::AlreadyTerminal => "The job already finished; fetch its result instead.",
            ErrorCode::ProviderUnavailable => "Try again later; the provider is overloaded.",
            ErrorCode::ContentRejected => "The content was rejected by the provider's policy.",
            ErrorCode::UnsupportedFormat => "Re-encode the media to a supported format.",
            ErrorCode::Cancelled => "Resubmit the job if narration is still needed.",
            ErrorCode::Internal => "Contact support if the problem persists.",
        }
    }
}

/// Error shape returned at the boundary.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema, Error)]
#[error("{code:?}: {message}")]
pub struct ApiError {
    /// Taxonomy code
    pub code: ErrorCode,
    /// Human-readable message derived from the taxonomy, never raw
    /// provider text
    pub message: String,
    /// Actionable next step for the caller
    pub suggestion: String,
}

impl ApiError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            suggestion: code.suggestion().to_string(),
        }
    }

    pub fn not_found(job_id: impl std::fmt::Display) -> Self {
        Self::new(ErrorCode::NotFound, format!("job {job_id} not found"))
    }

    pub fn not_ready(job_id: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::NotReady,
            format!("job {job_id} has not completed yet"),
        )
    }

    pub fn already_terminal(job_id: impl std::fmt::Display) -> Self {
        Self::new(
            ErrorCode::AlreadyTerminal,
            format!("job {job_id} is already in a terminal state"),
        )
    }
}

impl From<InputError> for ApiError {
    fn from(err: InputError) -> Self {
        Self::new(ErrorCode::InvalidInput, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_shape() {
        let err = ApiError::new(ErrorCode::InvalidInput, "input size exceeds maximum");
        let value = serde_json::to_value(&err).unwrap();

        assert_eq!(value["code"], "invalid_input");
        assert!(value["message"].as_str().unwrap().contains("size"));
        assert!(!value["suggestion"].as_str().unwrap().is_empty());
    }

    #[test]
    fn test_input_error_maps_to_invalid_input() {
        let err: ApiError = InputError::MissingSource.into();
        assert_eq!(err.code, ErrorCode::InvalidInput);
    }
}
