//! Provider error taxonomy.
//!
//! Every external call resolves to one of these kinds; the retry executor
//! consults [`ProviderError::is_retryable`] to decide whether an attempt
//! may be repeated. Non-retryable failures propagate without consuming
//! further attempts.

use thiserror::Error;

pub type ProviderResult<T> = Result<T, ProviderError>;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ProviderError {
    /// Provider asked us to slow down (segmentation/speech wording)
    #[error("provider throttled the request: {0}")]
    Throttled(String),

    /// Vision provider rate limit hit
    #[error("provider rate limit exceeded: {0}")]
    RateLimited(String),

    /// Call exceeded its deadline
    #[error("provider call timed out after {0}ms")]
    Timeout(u64),

    /// Transient network failure
    #[error("network error: {0}")]
    Network(String),

    /// Provider policy rejected the content; retrying cannot help
    #[error("content rejected by provider: {0}")]
    ContentRejected(String),

    /// Media format the provider cannot process
    #[error("unsupported media format: {0}")]
    UnsupportedFormat(String),

    /// Text exceeds the synthesis limit. The engine prevents this by
    /// pre-chunking; seeing it at runtime means a chunking bug upstream.
    #[error("text of {len} chars exceeds synthesis limit of {max}")]
    TextTooLong { len: usize, max: usize },
}

impl ProviderError {
    /// Whether the retry executor may repeat the attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::Throttled(_)
                | ProviderError::RateLimited(_)
                | ProviderError::Timeout(_)
                | ProviderError::Network(_)
        )
    }

    /// Short taxonomy label for unit error details and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            ProviderError::Throttled(_) => "throttled",
            ProviderError::RateLimited(_) => "rate_limited",
            ProviderError::Timeout(_) => "timeout",
            ProviderError::Network(_) => "network",
            ProviderError::ContentRejected(_) => "content_rejected",
            ProviderError::UnsupportedFormat(_) => "unsupported_format",
            ProviderError::TextTooLong { .. } => "text_too_long",
        }
    }
}
