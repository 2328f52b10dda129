//! Response generator trait and common types.

use crate::session::Turn;
use async_trait::async_trait;

/// Error type for generation operations.
#[derive(Debug, thiserror::Error)]
pub enum GenerateError {
    /// API key not configured.
    #[error("API key not configured")]
    MissingApiKey,
    /// The requested model is not available from the service.
    #[error("model unavailable: {0}")]
    ModelUnavailable(String),
    /// The service rejected the request (rate limit, invalid input, ...).
    #[error("API error: {0}")]
    Api(String),
    /// Transport-level request failure.
    #[error("request error: {0}")]
    Request(String),
    /// The service answered with a payload we could not use.
    #[error("invalid response: {0}")]
    InvalidResponse(String),
}

/// Result type for generation operations.
pub type GenerateResult<T> = Result<T, GenerateError>;

/// Trait for response generation providers.
///
/// Implementations build a prompt from the prior turn history (oldest to
/// newest) followed by the new user message, and return the reply text.
#[async_trait]
pub trait Generator: Send + Sync {
    /// Get the provider name.
    fn name(&self) -> &str;

    /// Check if the provider is configured and ready.
    fn is_available(&self) -> bool;

    /// Generate a reply to `message` in the context of `history`.
    async fn generate(&self, history: &[Turn], message: &str) -> GenerateResult<String>;
}
