// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Anthropic Claude provider implementation.
//!
//! Talks to the Messages API with `x-api-key` auth and a pinned
//! `anthropic-version` header.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::ProviderError;
use super::types::ProviderOptions;
use super::{build_http_client, send_request, Provider};

const DEFAULT_BASE_URL: &str = "https://api.anthropic.com/v1";
const ANTHROPIC_API_VERSION: &str = "2023-06-01";

// The Messages API rejects requests without max_tokens, so a zero
// ("use model maximum") configuration falls back to this value.
const FALLBACK_MAX_TOKENS: i32 = 4096;

/// Anthropic Claude provider.
pub struct AnthropicProvider {
    name: String,
    options: ProviderOptions,
    base_url: String,
    client: Option<reqwest::Client>,
}

impl AnthropicProvider {
    /// Create the provider. Missing API key or model leaves it disabled.
    pub fn new(options: ProviderOptions) -> Self {
        let client = if options.usable(true) {
            build_http_client(&options)
        } else {
            None
        };
        let base_url = options
            .base_url
            .clone()
            .unwrap_or_else(|| DEFAULT_BASE_URL.to_string());
        Self {
            name: "Anthropic".to_string(),
            options,
            base_url,
            client,
        }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let max_tokens = if self.options.max_tokens > 0 {
            self.options.max_tokens
        } else {
            FALLBACK_MAX_TOKENS
        };
        let mut body = serde_json::json!({
            "model": self.options.model,
            "max_tokens": max_tokens,
            "messages": [
                {
                    "role": "user",
                    "content": prompt
                }
            ],
        });
        if self.options.temperature >= 0.0 {
            body["temperature"] = serde_json::json!(self.options.temperature);
        }
        body
    }
}

#[async_trait]
impl Provider for AnthropicProvider {
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

        let url = format!("{}/messages", self.base_url.trim_end_matches('/'));
        debug!(model = %self.options.model, %url, "anthropic request");

        let request = client
            .post(&url)
            .header("Content-Type", "application/json")
            .header("x-api-key", &self.options.api_key)
            .header("anthropic-version", ANTHROPIC_API_VERSION)
            .json(&self.request_body(prompt));

        let (status, text) = send_request(cancel, request).await?;
        if !(200..300).contains(&status) {
            return Err(parse_error(status, &text));
        }
        parse_message(&text)
    }
}

fn parse_error(status: u16, body: &str) -> ProviderError {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: ErrorDetail,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        #[serde(rename = "type")]
        error_type: Option<String>,
        message: String,
    }

    let trimmed = body.trim_start();
    if !(trimmed.starts_with('{') || trimmed.starts_with('[')) {
        return ProviderError::Http {
            status,
            body: body.to_string(),
        };
    }
    let Ok(parsed) = serde_json::from_str::<ErrorResponse>(body) else {
        return ProviderError::Http {
            status,
            body: body.to_string(),
        };
    };

    let error_type = parsed.error.error_type.as_deref().unwrap_or("");
    match (status, error_type) {
        (401, _) => ProviderError::Authentication(parsed.error.message),
        (429, _) => ProviderError::RateLimit(parsed.error.message),
        (404, "not_found_error") => ProviderError::ModelNotFound {
            model: parsed.error.message,
        },
        _ => ProviderError::Http {
            status,
            body: parsed.error.message,
        },
    }
}

fn parse_message(body: &str) -> Result<String, ProviderError> {
    #[derive(Deserialize)]
    struct MessageResponse {
        #[serde(default)]
        content: Vec<ContentBlock>,
    }

    #[derive(Deserialize)]
    struct ContentBlock {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        text: String,
    }

    let parsed: MessageResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Response(format!("failed to parse message: {e}")))?;
    parsed
        .content
        .into_iter()
        .find(|block| block.kind == "text")
        .map(|block| block.text)
        .ok_or_else(|| ProviderError::Response("no text content in response".to_string()))
}
