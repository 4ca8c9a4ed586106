// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Custom-provider specs and the parsers behind them.
//!
//! A spec arrives either as a comma-separated `key=value` string on the
//! command line or as individual `CUSTOM_<ID>_<FIELD>` environment
//! variables. Token ceilings accept binary size suffixes (`8k` → 8192).

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

use crate::providers::types::{EndpointType, TEMPERATURE_UNSET};

/// Default completion token ceiling for custom providers.
pub const DEFAULT_MAX_TOKENS: i64 = 16384;

/// Errors produced while parsing spec strings and their values.
#[derive(Debug, Error, PartialEq)]
pub enum SpecError {
    /// A `key=value` pair had no `=`.
    #[error("invalid spec entry {0:?}: expected key=value")]
    MissingEquals(String),

    /// A size value could not be parsed.
    #[error("invalid size {value:?}: {reason}")]
    InvalidSize {
        /// The offending input
        value: String,
        /// What was wrong with it
        reason: String,
    },

    /// A temperature was outside `[0, 2]` or not a number.
    #[error("invalid temperature {0:?}: must be a number in [0, 2]")]
    InvalidTemperature(String),

    /// A boolean value was not recognized.
    #[error("invalid boolean {0:?}")]
    InvalidBool(String),

    /// An endpoint type was not recognized.
    #[error("{0}")]
    InvalidEndpointType(String),

    /// A provider id failed normalization.
    #[error("invalid provider id {0:?}: must match [a-z0-9_-]+")]
    InvalidId(String),
}

/// Per-provider configuration record for OpenAI-compatible endpoints.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CustomSpec {
    /// Catalog key, normalized to `[a-z0-9_-]+` for CLI and env sources.
    pub id: String,
    /// Display name; falls back to the id when empty.
    pub name: String,
    /// API root, e.g. `https://api.example.com`.
    pub url: String,
    /// Optional bearer credential.
    pub api_key: String,
    /// Model identifier.
    pub model: String,
    /// Completion token ceiling.
    pub max_tokens: i64,
    /// Sampling temperature; `-1` means "unset, use provider default".
    pub temperature: f32,
    /// Endpoint selection.
    pub endpoint_type: EndpointType,
    /// Whether the provider takes part in runs.
    pub enabled: bool,
}

impl CustomSpec {
    /// A spec with defaults for everything but the id.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: String::new(),
            url: String::new(),
            api_key: String::new(),
            model: String::new(),
            max_tokens: DEFAULT_MAX_TOKENS,
            temperature: TEMPERATURE_UNSET,
            endpoint_type: EndpointType::ChatCompletions,
            enabled: false,
        }
    }
}

/// Normalize and validate a provider id: trimmed, lowercased, and
/// restricted to `[a-z0-9_-]+`.
pub fn normalize_id(raw: &str) -> Result<String, SpecError> {
    let id = raw.trim().to_lowercase();
    if id.is_empty()
        || !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' || c == '-')
    {
        return Err(SpecError::InvalidId(raw.to_string()));
    }
    Ok(id)
}

/// Parse a size with an optional binary suffix (`k`, `kb`, `m`, `mb`,
/// `g`, `gb`, case-insensitive) into a non-negative 64-bit value.
///
/// Rejects empty input, negatives, decimals, unknown suffixes, and
/// anything that overflows.
pub fn parse_size(input: &str) -> Result<i64, SpecError> {
    let err = |reason: &str| SpecError::InvalidSize {
        value: input.to_string(),
        reason: reason.to_string(),
    };

    let s = input.trim().to_lowercase();
    if s.is_empty() {
        return Err(err("empty value"));
    }
    if s.starts_with('-') {
        return Err(err("negative sizes are not allowed"));
    }
    if s.contains('.') {
        return Err(err("decimals are not allowed"));
    }

    // longest suffix first so "kb" is not read as digits followed by "b"
    const SUFFIXES: &[(&str, i64)] = &[
        ("kb", 1024),
        ("mb", 1024 * 1024),
        ("gb", 1024 * 1024 * 1024),
        ("k", 1024),
        ("m", 1024 * 1024),
        ("g", 1024 * 1024 * 1024),
    ];

    let (digits, multiplier) = SUFFIXES
        .iter()
        .find_map(|(suffix, multiplier)| {
            s.strip_suffix(suffix).map(|digits| (digits, *multiplier))
        })
        .unwrap_or((s.as_str(), 1));

    if digits.is_empty() {
        return Err(err("missing number"));
    }
    if !digits.bytes().all(|b| b.is_ascii_digit()) {
        return Err(err("not a number"));
    }
    let value: i64 = digits.parse().map_err(|_| err("number out of range"))?;
    value
        .checked_mul(multiplier)
        .ok_or_else(|| err("number out of range"))
}

/// Parse a temperature value, enforcing the `[0, 2]` range.
pub fn parse_temperature(input: &str) -> Result<f32, SpecError> {
    let value: f32 = input
        .trim()
        .parse()
        .map_err(|_| SpecError::InvalidTemperature(input.to_string()))?;
    if !(0.0..=2.0).contains(&value) {
        return Err(SpecError::InvalidTemperature(input.to_string()));
    }
    Ok(value)
}

/// Parse a boolean value (`true`/`false`/`1`/`0`/`yes`/`no`).
pub fn parse_bool(input: &str) -> Result<bool, SpecError> {
    match input.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" => Ok(true),
        "false" | "0" | "no" => Ok(false),
        _ => Err(SpecError::InvalidBool(input.to_string())),
    }
}

/// Apply a single `key=value` field to a spec.
///
/// Keys are case-insensitive and aliased; unknown keys are logged at warn
/// level and skipped so newer flags can be fed to older binaries.
fn apply_field(spec: &mut CustomSpec, key: &str, value: &str) -> Result<(), SpecError> {
    match key.to_lowercase().as_str() {
        "url" | "base-url" | "base_url" | "baseurl" => spec.url = value.trim().to_string(),
        "api-key" | "api_key" | "apikey" => spec.api_key = value.trim().to_string(),
        "model" => spec.model = value.trim().to_string(),
        "name" => spec.name = value.trim().to_string(),
        "max-tokens" | "max_tokens" | "maxtokens" => spec.max_tokens = parse_size(value)?,
        "temperature" | "temp" => spec.temperature = parse_temperature(value)?,
        "endpoint-type" | "endpoint_type" => {
            spec.endpoint_type = value
                .parse()
                .map_err(SpecError::InvalidEndpointType)?;
        }
        "enabled" => spec.enabled = parse_bool(value)?,
        other => {
            warn!(key = other, "unknown custom provider spec key, ignoring");
        }
    }
    Ok(())
}

/// Parse a comma-separated `key=value,...` spec string for provider `id`.
pub fn parse_spec(id: &str, input: &str) -> Result<CustomSpec, SpecError> {
    let mut spec = CustomSpec::new(normalize_id(id)?);
    for pair in input.split(',') {
        let pair = pair.trim();
        if pair.is_empty() {
            continue;
        }
        let Some((key, value)) = pair.split_once('=') else {
            return Err(SpecError::MissingEquals(pair.to_string()));
        };
        apply_field(&mut spec, key.trim(), value)?;
    }
    Ok(spec)
}

/// Set one field of a spec by its environment suffix (`url`, `api_key`,
/// `model`, `name`, `max_tokens`, `temperature`, `endpoint_type`,
/// `enabled`).
pub(crate) fn apply_env_field(
    spec: &mut CustomSpec,
    field: &str,
    value: &str,
) -> Result<(), SpecError> {
    apply_field(spec, field, value)
}
