use std::{any::Any, backtrace::Backtrace};

use schema::ConcatError;
use thiserror::Error;

pub type LlmResult<T> = std::result::Result<T, LlmError>;

/// Errors returned by chat models and embedders.
///
/// Errors travel through fanned-out message readers, so they are cheap to clone.
#[derive(Debug, Clone, Error)]
pub enum LlmError {
    /// Provider not found in configuration.
    #[error("Provider '{0}' not found")]
    ProviderNotFound(String),

    /// Model not found at the provider.
    #[error("{0}")]
    ModelNotFound(String),

    /// Authentication failed (missing or invalid API key).
    #[error("Authentication failed: {0}")]
    AuthenticationFailed(String),

    /// Invalid request parameters.
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// Rate limit exceeded.
    #[error("Rate limit exceeded: {message}")]
    RateLimitExceeded { message: String },

    /// Insufficient quota or credits.
    #[error("Insufficient quota: {0}")]
    InsufficientQuota(String),

    /// Provider API returned an error.
    #[error("Provider API error ({status}): {message}")]
    ProviderApiError { status: u16, message: String },

    /// Network or connection error.
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// The provider reported an error or the transport failed after streaming started.
    #[error("Stream error: {0}")]
    StreamError(String),

    /// The provider answered with a body of an unexpected shape.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),

    /// A stream producer panicked.
    #[error(transparent)]
    Panic(#[from] PanicError),

    /// Streamed deltas could not be folded into one message.
    #[error("Failed to concatenate messages: {0}")]
    Concat(#[from] ConcatError),

    /// The provider configuration cannot be used.
    #[error("Invalid configuration: {0}")]
    Config(String),
}

impl LlmError {
    /// Maps a non-success HTTP status and its body to an error.
    pub fn from_status(status: u16, message: String) -> Self {
        match status {
            400 => Self::InvalidRequest(message),
            401 => Self::AuthenticationFailed(message),
            403 => Self::InsufficientQuota(message),
            404 => Self::ModelNotFound(message),
            429 => Self::RateLimitExceeded { message },
            _ => Self::ProviderApiError { status, message },
        }
    }

    /// Get the error type string, following the OpenAI error taxonomy.
    pub fn error_type(&self) -> &str {
        match self {
            Self::InvalidRequest(_) | Self::Config(_) => "invalid_request_error",
            Self::AuthenticationFailed(_) => "authentication_error",
            Self::InsufficientQuota(_) => "insufficient_quota",
            Self::ProviderNotFound(_) | Self::ModelNotFound(_) => "not_found_error",
            Self::RateLimitExceeded { .. } => "rate_limit_error",
            Self::ConnectionError(_) | Self::ProviderApiError { .. } | Self::StreamError(_) => "api_error",
            Self::InvalidResponse(_) => "invalid_response_error",
            Self::Panic(_) | Self::Concat(_) => "internal_error",
        }
    }
}

/// A panic caught at a stream producer boundary.
#[derive(Debug, Clone, Error)]
#[error("stream producer panicked: {payload}")]
pub struct PanicError {
    /// The panic message, when the payload was a string.
    pub payload: String,
    /// Stack captured where the panic was caught.
    pub backtrace: String,
}

impl PanicError {
    pub(crate) fn new(payload: Box<dyn Any + Send>) -> Self {
        let payload = match payload.downcast::<String>() {
            Ok(message) => *message,
            Err(payload) => match payload.downcast::<&'static str>() {
                Ok(message) => (*message).to_string(),
                Err(_) => "non-string panic payload".to_string(),
            },
        };

        Self {
            payload,
            backtrace: Backtrace::force_capture().to_string(),
        }
    }
}
