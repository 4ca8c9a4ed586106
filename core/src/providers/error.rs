// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Error types for LLM providers.
//!
//! The retry layer classifies failures by substring-matching the rendered
//! message, so each variant's `Display` output deliberately carries the
//! markers it should be classified by (status codes, `timeout`,
//! `context canceled`, and so on).

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur when interacting with LLM providers.
///
/// Provider implementations map their API-specific failures to these
/// variants. The rendered message is the classification surface for
/// [`crate::providers::retry`].
#[derive(Debug, Error)]
pub enum ProviderError {
    /// Authentication with the provider failed (bad or missing credentials).
    #[error("authentication failed (401): {0}")]
    Authentication(String),

    /// The provider's rate limit has been exceeded.
    #[error("rate limit exceeded (429): {0}")]
    RateLimit(String),

    /// The specified model was not found or is not available.
    #[error("model not found: {model}")]
    ModelNotFound {
        /// The model identifier that was rejected
        model: String,
    },

    /// The request parameters were rejected by the provider.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The prompt exceeds the model's maximum context length.
    #[error("context length exceeded: {0}")]
    ContextLength(String),

    /// The provider returned a non-2xx HTTP status.
    ///
    /// The body is surfaced verbatim so status digits stay matchable.
    #[error("http {status}: {body}")]
    Http {
        /// HTTP status code
        status: u16,
        /// Error body or extracted message from the provider
        body: String,
    },

    /// A network-level failure (DNS, connect, reset) reaching the provider.
    #[error("network error: {0}")]
    Network(String),

    /// The request timed out.
    #[error("timeout after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the request.
    #[error("context canceled")]
    Cancelled,

    /// The provider's response could not be interpreted.
    #[error("unexpected response: {0}")]
    Response(String),
}

impl ProviderError {
    /// Wraps a `reqwest` error, preserving its source chain in the message
    /// so markers like `connection refused` survive into classification.
    /// Client-side timeouts become [`ProviderError::Timeout`].
    pub fn from_transport(err: reqwest::Error, timeout: Duration) -> Self {
        if err.is_timeout() {
            return ProviderError::Timeout(timeout);
        }
        let mut message = err.to_string();
        let mut source = std::error::Error::source(&err);
        while let Some(inner) = source {
            message.push_str(": ");
            message.push_str(&inner.to_string());
            source = inner.source();
        }
        ProviderError::Network(message)
    }

    /// Returns `true` if this error represents cooperative cancellation.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, ProviderError::Cancelled)
    }
}
