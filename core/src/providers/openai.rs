// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! OpenAI provider implementation.
//!
//! Speaks both the chat-completions and the responses endpoints. Under
//! [`EndpointType::Auto`] the endpoint is picked from the model name
//! (`gpt-5` family → responses); a forced endpoint is used verbatim.
//! The wire helpers here are shared with [`super::custom`], which talks
//! to self-hosted OpenAI-compatible services.

use serde::Deserialize;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::error::ProviderError;
use super::types::{is_reasoning_model, resolve_endpoint, EndpointType, ProviderOptions};
use super::{build_http_client, send_request, Provider};
use async_trait::async_trait;

const DEFAULT_BASE_URL: &str = "https://api.openai.com";

/// OpenAI provider.
pub struct OpenAiProvider {
    name: String,
    options: ProviderOptions,
    base_url: String,
    client: Option<reqwest::Client>,
}

impl OpenAiProvider {
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
            name: "OpenAI".to_string(),
            options,
            base_url,
            client,
        }
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
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

/// One round-trip against an OpenAI-compatible endpoint, with routing.
///
/// Shared by the built-in OpenAI provider and by custom providers.
pub(crate) async fn generate_compatible(
    client: &reqwest::Client,
    cancel: &CancellationToken,
    base_url: &str,
    api_key: &str,
    options: &ProviderOptions,
    prompt: &str,
) -> Result<String, ProviderError> {
    let endpoint = resolve_endpoint(options.endpoint_type, &options.model);
    let path = match endpoint {
        EndpointType::Responses => "/v1/responses",
        _ => "/v1/chat/completions",
    };
    let url = format!("{}{}", base_url.trim_end_matches('/'), path);
    let body = match endpoint {
        EndpointType::Responses => responses_body(options, prompt),
        _ => chat_completions_body(options, prompt),
    };

    debug!(model = %options.model, %url, "openai-compatible request");

    let mut request = client
        .post(&url)
        .header("Content-Type", "application/json")
        .json(&body);
    if !api_key.is_empty() {
        request = request.bearer_auth(api_key);
    }

    let (status, text) = send_request(cancel, request).await?;
    if !(200..300).contains(&status) {
        return Err(error_from_response(status, &text));
    }

    match endpoint {
        EndpointType::Responses => parse_responses(&text),
        _ => parse_chat_completions(&text),
    }
}

/// Build the chat-completions payload.
///
/// Reasoning models (`o1`/`o3`/`o4`) take `max_completion_tokens` and no
/// temperature; everything else takes `max_tokens` and an explicit
/// temperature whenever it is non-negative, zero included. A zero token
/// ceiling omits the field so the model's maximum applies.
fn chat_completions_body(options: &ProviderOptions, prompt: &str) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": options.model,
        "messages": [
            {
                "role": "user",
                "content": prompt
            }
        ],
    });
    if is_reasoning_model(&options.model) {
        if options.max_tokens > 0 {
            body["max_completion_tokens"] = serde_json::json!(options.max_tokens);
        }
    } else {
        if options.max_tokens > 0 {
            body["max_tokens"] = serde_json::json!(options.max_tokens);
        }
        if options.temperature >= 0.0 {
            body["temperature"] = serde_json::json!(options.temperature);
        }
    }
    body
}

/// Build the responses payload.
fn responses_body(options: &ProviderOptions, prompt: &str) -> serde_json::Value {
    let mut body = serde_json::json!({
        "model": options.model,
        "input": prompt,
    });
    if options.max_tokens > 0 {
        body["max_output_tokens"] = serde_json::json!(options.max_tokens);
    }
    if !is_reasoning_model(&options.model) && options.temperature >= 0.0 {
        body["temperature"] = serde_json::json!(options.temperature);
    }
    body
}

/// Map a non-2xx reply to a [`ProviderError`].
///
/// Bodies that look like JSON are parsed for the standard
/// `{"error": {"message", "type"}}` shape; anything else is surfaced
/// verbatim as `http <code>: <body>`.
pub(crate) fn error_from_response(status: u16, body: &str) -> ProviderError {
    #[derive(Deserialize)]
    struct ErrorResponse {
        error: ErrorDetail,
    }

    #[derive(Deserialize)]
    struct ErrorDetail {
        message: String,
        #[serde(rename = "type")]
        error_type: Option<String>,
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
        (_, "context_length_exceeded") => ProviderError::ContextLength(parsed.error.message),
        (_, "model_not_found") => ProviderError::ModelNotFound {
            model: parsed.error.message,
        },
        _ => ProviderError::Http {
            status,
            body: parsed.error.message,
        },
    }
}

/// Extract `choices[0].message.content` from a chat-completions reply.
fn parse_chat_completions(body: &str) -> Result<String, ProviderError> {
    #[derive(Deserialize)]
    struct ChatResponse {
        choices: Vec<Choice>,
    }

    #[derive(Deserialize)]
    struct Choice {
        message: Message,
    }

    #[derive(Deserialize)]
    struct Message {
        #[serde(default)]
        content: String,
    }

    let parsed: ChatResponse = serde_json::from_str(body)
        .map_err(|e| ProviderError::Response(format!("failed to parse completion: {e}")))?;
    let choice = parsed
        .choices
        .into_iter()
        .next()
        .ok_or_else(|| ProviderError::Response("no choices in response".to_string()))?;
    Ok(choice.message.content)
}

/// Extract the first `output_text` block of the first `message` item from
/// a responses reply. The response must report `status: "completed"`.
fn parse_responses(body: &str) -> Result<String, ProviderError> {
    #[derive(Deserialize)]
    struct ResponsesReply {
        #[serde(default)]
        status: String,
        #[serde(default)]
        output: Vec<OutputItem>,
    }

    #[derive(Deserialize)]
    struct OutputItem {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        content: Vec<ContentItem>,
    }

    #[derive(Deserialize)]
    struct ContentItem {
        #[serde(rename = "type")]
        kind: String,
        #[serde(default)]
        text: String,
    }

    let parsed: ResponsesReply = serde_json::from_str(body)
        .map_err(|e| ProviderError::Response(format!("failed to parse response: {e}")))?;
    if parsed.status != "completed" {
        return Err(ProviderError::Response(format!(
            "response status is {:?}, not completed",
            parsed.status
        )));
    }
    parsed
        .output
        .into_iter()
        .find(|item| item.kind == "message")
        .and_then(|item| {
            item.content
                .into_iter()
                .find(|content| content.kind == "output_text")
        })
        .map(|content| content.text)
        .ok_or_else(|| ProviderError::Response("no output_text in response".to_string()))
}
