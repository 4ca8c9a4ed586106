// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Shared types for LLM provider construction.
//!
//! This module defines the common options record consumed by every provider
//! constructor, the endpoint selector for OpenAI-compatible APIs, and the
//! model-name routing helpers.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Which OpenAI-compatible endpoint a provider should call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum EndpointType {
    /// Route by model name: models containing `gpt-5` use the responses
    /// endpoint, everything else uses chat completions.
    Auto,
    /// Always use `/v1/responses`.
    Responses,
    /// Always use `/v1/chat/completions`.
    #[default]
    ChatCompletions,
}

impl FromStr for EndpointType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "auto" => Ok(EndpointType::Auto),
            "responses" => Ok(EndpointType::Responses),
            "chat_completions" | "chat-completions" => Ok(EndpointType::ChatCompletions),
            other => Err(format!(
                "unknown endpoint type {other:?}, expected auto, responses or chat_completions"
            )),
        }
    }
}

impl fmt::Display for EndpointType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EndpointType::Auto => write!(f, "auto"),
            EndpointType::Responses => write!(f, "responses"),
            EndpointType::ChatCompletions => write!(f, "chat_completions"),
        }
    }
}

/// Construction options shared by all provider variants.
///
/// A provider built from options that fail its own requirements (missing
/// API key where one is mandatory, empty model, `enabled` unset) is created
/// in the disabled state rather than rejected, so the caller can always
/// build the full set and filter afterwards.
#[derive(Debug, Clone, Default)]
pub struct ProviderOptions {
    /// Bearer credential; required by the hosted providers, optional for
    /// self-hosted OpenAI-compatible endpoints.
    pub api_key: String,
    /// Model identifier sent with every request.
    pub model: String,
    /// Whether the caller asked for this provider at all.
    pub enabled: bool,
    /// Completion token ceiling; `0` means "omit the field, use the
    /// model's maximum".
    pub max_tokens: i32,
    /// Sampling temperature; negative means "unset, use provider default".
    pub temperature: f32,
    /// Override for the provider's default API root.
    pub base_url: Option<String>,
    /// Endpoint selection for OpenAI-compatible providers.
    pub endpoint_type: EndpointType,
    /// Pre-built HTTP client, mainly for tests; a fresh one is built when
    /// absent.
    pub http_client: Option<reqwest::Client>,
}

impl ProviderOptions {
    /// True when the options satisfy the construction invariant:
    /// enabled, a model name, and (if `key_required`) an API key.
    pub fn usable(&self, key_required: bool) -> bool {
        self.enabled && !self.model.is_empty() && (!key_required || !self.api_key.is_empty())
    }
}

/// Temperature sentinel meaning "unset, use the provider default".
pub const TEMPERATURE_UNSET: f32 = -1.0;

/// True when the model should be routed to the responses endpoint under
/// [`EndpointType::Auto`].
pub fn wants_responses_endpoint(model: &str) -> bool {
    model.to_lowercase().contains("gpt-5")
}

/// True for reasoning-class models, which take `max_completion_tokens`
/// and reject an explicit temperature.
pub fn is_reasoning_model(model: &str) -> bool {
    let m = model.to_lowercase();
    m.starts_with("o1") || m.starts_with("o3") || m.starts_with("o4")
}

/// Resolve the endpoint to call for a given configuration and model.
pub fn resolve_endpoint(endpoint_type: EndpointType, model: &str) -> EndpointType {
    match endpoint_type {
        EndpointType::Auto => {
            if wants_responses_endpoint(model) {
                EndpointType::Responses
            } else {
                EndpointType::ChatCompletions
            }
        }
        forced => forced,
    }
}
