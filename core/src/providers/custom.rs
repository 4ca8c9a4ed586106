// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Generic OpenAI-compatible provider for self-hosted or third-party
//! endpoints, configured from a [`CustomSpec`].
//!
//! Shares the wire implementation with [`super::openai`]; the only
//! differences are that the API key is optional (the `Authorization`
//! header is sent only when one is configured) and the endpoint type
//! comes from the spec instead of model-name routing.

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::config::CustomSpec;

use super::error::ProviderError;
use super::openai::generate_compatible;
use super::types::ProviderOptions;
use super::{build_http_client, Provider};

/// Provider for an OpenAI-compatible endpoint described by a custom spec.
pub struct CustomProvider {
    name: String,
    options: ProviderOptions,
    base_url: String,
    client: Option<reqwest::Client>,
}

impl CustomProvider {
    /// Build a provider from a merged catalog spec.
    ///
    /// The display name is the spec's `name` when set, the `id` otherwise.
    /// A spec with no URL or model, or a token ceiling that does not fit in
    /// 32 bits, produces a disabled provider.
    pub fn from_spec(spec: &CustomSpec) -> Self {
        let name = if spec.name.is_empty() {
            spec.id.clone()
        } else {
            spec.name.clone()
        };

        let max_tokens = match i32::try_from(spec.max_tokens) {
            Ok(value) if value >= 0 => Some(value),
            _ => {
                warn!(
                    id = %spec.id,
                    max_tokens = spec.max_tokens,
                    "custom provider max-tokens out of range, disabling"
                );
                None
            }
        };

        let options = ProviderOptions {
            api_key: spec.api_key.clone(),
            model: spec.model.clone(),
            enabled: spec.enabled && !spec.url.is_empty() && max_tokens.is_some(),
            max_tokens: max_tokens.unwrap_or(0),
            temperature: spec.temperature,
            base_url: Some(spec.url.clone()),
            endpoint_type: spec.endpoint_type,
            http_client: None,
        };

        let client = if options.usable(false) {
            build_http_client(&options)
        } else {
            None
        };

        Self {
            name,
            base_url: spec.url.clone(),
            options,
            client,
        }
    }
}

#[async_trait]
impl Provider for CustomProvider {
    fn name(&self) -> &str {
        &self.name
    }

    fn enabled(&self) -> bool {
        self.client.is_some()
    }

    async fn generate(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<String, ProviderError> {
        let client = self
            .client
            .as_ref()
            .ok_or_else(|| ProviderError::InvalidRequest("provider is disabled".to_string()))?;
        generate_compatible(
            client,
            cancel,
            &self.base_url,
            &self.options.api_key,
            &self.options,
            prompt,
        )
        .await
    }
}
