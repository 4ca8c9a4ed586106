// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Google AI (Gemini) provider implementation.

use async_trait::async_trait;
use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::ProviderError;
use super::types::ProviderOptions;
use super::{build_http_client, send_request, Provider};

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Google AI provider for Gemini models.
pub struct GoogleProvider {
    name: String,
    options: ProviderOptions,
    base_url: String,
    client: Option<reqwest::Client>,
}

impl GoogleProvider {
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
            name: "Google".to_string(),
            options,
            base_url,
            client,
        }
    }

    fn request_body(&self, prompt: &str) -> serde_json::Value {
        let mut body = serde_json::json!({
            "contents": [
                {
                    "parts": [
                        {
                            "text": prompt
                        }
                    ]
                }
            ]
        });
        let mut generation_config = serde_json::Map::new();
        if self.options.temperature >= 0.0 {
            generation_config.insert(
                "temperature".to_string(),
                serde_json::json!(self.options.temperature),
            );
        }
        if self.options.max_tokens > 0 {
            generation_config.insert(
                "maxOutputTokens".to_string(),
                serde_json::json!(self.options.max_tokens),
            );
        }
        if !generation_config.is_empty() {
            body["generationConfig"] = serde_json::Value::Object(generation_config);
        }
        body
    }
}

#[async_trait]
impl Provider for GoogleProvider {
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

        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.options.model,
            self.options.api_key
        );
        debug!(model = %self.options.model, "google request");

        let request = client
            .post(&url)
            .header("Content-Type", "application/json")
            .json(&self.request_body(prompt));

        let (status, text) = send_request(cancel, request).await?;
        if !(200..300).contains(&status) {
            return Err(parse_error(status, &text));
        }
        parse_candidates(&text)
    }
}

fn parse_error(status: u16, body: &str) -> ProviderError {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: ErrorDetail,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
        #[serde(default)]
        status: String,
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

    match (status, parsed.error.status.as_str()) {
        (401, _) | (403, "PERMISSION_DENIED") | (_, "UNAUTHENTICATED") => {
            ProviderError::Authentication(parsed.error.message)
        }
        (429, _) | (_, "RESOURCE_EXHAUSTED") => ProviderError::RateLimit(parsed.error.message),
        (404, _) => ProviderError::ModelNotFound {
            model: parsed.error.message,
        },
        _ => ProviderError::Http {
            status,
            body: parsed.error.message,
        },
    }
}

fn parse_candidates(body: &str) -> Result<String, ProviderError> {
    #[derive(Deserialize)]
    struct GenerateResponse {
        #[serde(default)]
        candidates: Vec<Candidate>,
    }

    #[derive(Deserialize)]
    struct Candidate {
        content: Content,
    }

    #[derive(Deserialize)]
    struct Content {
        #[serde(default)]
        parts: Vec<Part>,
    }

    #[derive(Deserialize)]
    struct Part {
        #[serde(default)]
        text: String,
    }

    let parsed: GenerateResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Response(format!("failed to parse candidates: {e}")))?;
    let candidate = parsed
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Response("no candidates in response".to_string()))?;
    let text = candidate
        .content
        .parts
        .into_iter()
        .map(|part| part.text)
        .collect::<Vec<_>>()
        .join("");
    if text.is_empty() {
        return Err(ProviderError::Response(
            "no text parts in candidate".to_string(),
        ));
    }
    Ok(text)
}
