// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Result and error types shared across the orchestration engines.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// One provider's outcome for a single prompt.
///
/// Exactly one of `text` and `error` is meaningful.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GenResult {
    /// Provider display name.
    pub provider: String,
    /// Generated text; empty when `error` is set.
    pub text: String,
    /// Rendered failure, if the provider failed.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl GenResult {
    /// A successful result.
    pub fn ok(provider: impl Into<String>, text: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            text: text.into(),
            error: None,
        }
    }

    /// A failed result.
    pub fn err(provider: impl Into<String>, error: impl Into<String>) -> Self {
        Self {
            provider: provider.into(),
            text: String::new(),
            error: Some(error.into()),
        }
    }

    /// True when the provider produced text.
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// The runner's output: per-provider results in input order plus the
/// combined formatted text.
#[derive(Debug, Clone)]
pub struct RunnerOutput {
    results: Vec<GenResult>,
    combined: String,
}

impl RunnerOutput {
    pub(crate) fn new(results: Vec<GenResult>, combined: String) -> Self {
        Self { results, combined }
    }

    /// All results, failed ones included, in provider input order.
    pub fn results(&self) -> &[GenResult] {
        &self.results
    }

    /// Only the successful results, still in input order.
    pub fn succeeded(&self) -> impl Iterator<Item = &GenResult> {
        self.results.iter().filter(|r| r.is_ok())
    }

    /// The formatted combined text. A single successful result is passed
    /// through raw; multiple results get per-provider headers.
    pub fn combined(&self) -> &str {
        &self.combined
    }

    /// Consume into the underlying results.
    pub fn into_results(self) -> Vec<GenResult> {
        self.results
    }
}

/// Errors from the runner itself (per-provider failures live in
/// [`GenResult::error`] unless every provider failed).
#[derive(Debug, Error)]
pub enum RunError {
    /// No enabled providers were handed to the runner.
    #[error("no providers to run")]
    NoProviders,

    /// Every provider failed; the message carries the underlying errors.
    #[error("all providers failed: {0}")]
    AllProvidersFailed(String),

    /// The caller's deadline elapsed; carries the configured duration so
    /// the CLI can hint at raising it.
    #[error("run timed out after {0:?}")]
    Timeout(Duration),

    /// The caller cancelled the run.
    #[error("run canceled")]
    Cancelled,
}

/// Outcome of a consensus attempt sequence.
#[derive(Debug, Clone)]
pub struct ConsensusOutcome {
    /// The result set after the final attempt (or the input set when
    /// consensus was skipped).
    pub final_results: Vec<GenResult>,
    /// Number of CHECK attempts issued; never exceeds the configured
    /// maximum, and agreement implies at least one.
    pub attempts: u32,
    /// Whether the checker reported agreement.
    pub achieved: bool,
}

/// Consensus failures; these never abort mixing, they are attached to
/// the mix response instead.
#[derive(Debug, Error)]
pub enum ConsensusError {
    /// Every agreement check errored and no convergence was observed.
    #[error("consensus checking failed: {0}")]
    CheckFailed(String),
}

/// Output of the mix engine.
#[derive(Debug, Clone)]
pub struct MixResponse {
    /// Synthesized text prefixed with the `== mixed results by ... ==`
    /// header line.
    pub text_with_header: String,
    /// Synthesized text as returned by the mixer.
    pub raw_text: String,
    /// Display name of the provider that produced the synthesis.
    pub mix_provider_name: String,
    /// Whether the consensus loop (if enabled) reported agreement.
    pub consensus_achieved: bool,
    /// Number of consensus attempts issued.
    pub consensus_attempts: u32,
    /// Consensus failure, when the loop errored out.
    pub consensus_error: Option<String>,
}

/// Errors that abort the mix call.
#[derive(Debug, Error)]
pub enum MixError {
    /// Fewer than two successful results to synthesize.
    #[error("mixing requires at least two successful results, got {0}")]
    NotEnoughResults(usize),

    /// No enabled provider was available to act as the mixer.
    #[error("no enabled provider available for mixing")]
    NoMixer,

    /// The mixer itself failed.
    #[error("mix provider {provider} failed: {message}")]
    MixerFailed {
        /// Mixer display name
        provider: String,
        /// Rendered provider error
        message: String,
    },
}
