// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! LLM provider adapters and abstractions.
//!
//! Every adapter implements the [`Provider`] trait: a stable display name,
//! an enabled flag, and a cancellable `generate` call. Providers are built
//! once at startup from [`ProviderOptions`] and shared read-only across
//! runner tasks; a provider whose options are incomplete is constructed in
//! the disabled state instead of failing.
//!
//! ```text
//! ┌───────────────────────────────────────────┐
//! │              Provider trait               │
//! └───────────────────────────────────────────┘
//!     ↓          ↓          ↓          ↓
//!  OpenAI    Anthropic    Google    Custom (OpenAI-compatible)
//!                  ↑ wrapped by ↑
//!              RetryProvider (opt-in)
//! ```

use async_trait::async_trait;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

pub mod anthropic;
pub mod custom;
pub mod error;
pub mod google;
pub mod openai;
pub mod retry;
pub mod types;

pub use anthropic::AnthropicProvider;
pub use custom::CustomProvider;
pub use error::ProviderError;
pub use google::GoogleProvider;
pub use openai::OpenAiProvider;
pub use retry::{RetryConfig, RetryProvider};
pub use types::{EndpointType, ProviderOptions, TEMPERATURE_UNSET};

/// Safety net on the HTTP client itself; the caller's cancellation context
/// is the real deadline.
pub(crate) const HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// Uniform capability exposed by every LLM adapter.
///
/// `generate` must be side-effect-free from the caller's perspective and
/// must return promptly with [`ProviderError::Cancelled`] once the token
/// fires; the runner relies on that to drain its tasks after cancellation.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Stable display name; may encode the model for disambiguation.
    fn name(&self) -> &str;

    /// False when required options were missing at construction.
    fn enabled(&self) -> bool;

    /// Produce a completion for `prompt`, honoring `cancel`.
    async fn generate(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<String, ProviderError>;
}

/// Builds the shared HTTP client for a provider, preferring an injected
/// one from the options. Returns `None` (provider stays disabled) if the
/// TLS stack cannot be initialized.
pub(crate) fn build_http_client(options: &ProviderOptions) -> Option<reqwest::Client> {
    if let Some(client) = &options.http_client {
        return Some(client.clone());
    }
    match reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .use_rustls_tls()
        .build()
    {
        Ok(client) => Some(client),
        Err(err) => {
            tracing::warn!("failed to build HTTP client: {err}");
            None
        }
    }
}

/// Sends a prepared request, racing the round-trip against cancellation.
/// Returns the status code and the full body text.
pub(crate) async fn send_request(
    cancel: &CancellationToken,
    request: reqwest::RequestBuilder,
) -> Result<(u16, String), ProviderError> {
    let round_trip = async {
        let response = request.send().await?;
        let status = response.status().as_u16();
        let body = response.text().await?;
        Ok::<_, reqwest::Error>((status, body))
    };
    tokio::select! {
        () = cancel.cancelled() => Err(ProviderError::Cancelled),
        result = round_trip => result.map_err(|e| ProviderError::from_transport(e, HTTP_TIMEOUT)),
    }
}
