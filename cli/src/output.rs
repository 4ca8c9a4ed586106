//! Output formatting for run results.
//!
//! Two modes: plain text (the runner's combined output, trailing
//! whitespace trimmed, newline-terminated) and a pretty-printed JSON
//! envelope with per-provider responses and an RFC 3339 timestamp.

use anyhow::Result;
use chrono::{SecondsFormat, Utc};
use mpt_core::orchestration::GenResult;
use serde::Serialize;

/// JSON envelope for `--json` mode.
#[derive(Serialize)]
struct JsonEnvelope<'a> {
    responses: &'a [GenResult],
    timestamp: String,
}

/// Render the combined text for stdout.
pub fn render_text(combined: &str) -> String {
    format!("{}\n", combined.trim_end())
}

/// Render the JSON envelope for stdout.
pub fn render_json(results: &[GenResult]) -> Result<String> {
    let envelope = JsonEnvelope {
        responses: results,
        timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
    };
    Ok(format!("{}\n", serde_json::to_string_pretty(&envelope)?))
}

/// The preamble echoed before results in verbose mode.
pub fn verbose_preamble(prompt: &str) -> String {
    format!("=== Prompt sent to models ===\n{prompt}\n=============================\n\n")
}
