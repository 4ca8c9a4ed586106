// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Post-aggregation synthesis of provider results.
//!
//! The mixer provider is selected by case-insensitive substring against
//! the configured name, falling back to the first enabled provider. When
//! consensus is enabled it runs first and its final results are the ones
//! mixed; a consensus failure is recorded on the response but never
//! aborts the synthesis.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::providers::Provider;

use super::consensus::{ConsensusConfig, ConsensusEngine};
use super::select_provider;
use super::types::{GenResult, MixError, MixResponse};

/// Default instruction put in front of the collected results.
pub const DEFAULT_MIX_PROMPT: &str =
    "Merge the following responses into a single, coherent answer. Resolve minor \
     disagreements and keep the strongest points from each response.";

/// Configuration for the mix engine.
#[derive(Debug, Clone)]
pub struct MixConfig {
    /// Case-insensitive substring selecting the mixer provider.
    pub provider: String,
    /// Synthesis instruction prepended to the collected results.
    pub prompt: String,
    /// Consensus loop settings; disabled by default.
    pub consensus: ConsensusConfig,
}

impl Default for MixConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            prompt: DEFAULT_MIX_PROMPT.to_string(),
            consensus: ConsensusConfig::default(),
        }
    }
}

/// Synthesis engine over the runner's providers.
pub struct MixEngine {
    config: MixConfig,
}

impl MixEngine {
    /// Create the engine.
    pub fn new(config: MixConfig) -> Self {
        Self { config }
    }

    /// Synthesize `results` into a single answer.
    ///
    /// Requires at least two successful results. Runs the consensus loop
    /// first when enabled, then prompts the mixer with every successful
    /// result. Mixer failure aborts the call.
    pub async fn mix(
        &self,
        cancel: &CancellationToken,
        providers: &[Arc<dyn Provider>],
        original_prompt: &str,
        results: &[GenResult],
    ) -> Result<MixResponse, MixError> {
        let successful = results.iter().filter(|r| r.is_ok()).count();
        if successful < 2 {
            return Err(MixError::NotEnoughResults(successful));
        }

        let mut mixed_input: Vec<GenResult> = results.to_vec();
        let mut consensus_achieved = false;
        let mut consensus_attempts = 0;
        let mut consensus_error = None;

        if self.config.consensus.enabled {
            let engine = ConsensusEngine::new(providers, self.config.consensus.clone());
            match engine.run(cancel, original_prompt, results).await {
                Ok(outcome) => {
                    consensus_achieved = outcome.achieved;
                    consensus_attempts = outcome.attempts;
                    mixed_input = outcome.final_results;
                }
                Err(err) => {
                    // recorded, not fatal: mixing proceeds on the original set
                    consensus_attempts = self.config.consensus.attempts;
                    consensus_error = Some(err.to_string());
                }
            }
        }

        let mixer =
            select_provider(providers, &self.config.provider).ok_or(MixError::NoMixer)?;
        debug!(mixer = mixer.name(), "mixing results");

        let prompt = build_mix_prompt(&self.config.prompt, &mixed_input);
        let raw_text =
            mixer
                .generate(cancel, &prompt)
                .await
                .map_err(|err| MixError::MixerFailed {
                    provider: mixer.name().to_string(),
                    message: err.to_string(),
                })?;

        Ok(MixResponse {
            text_with_header: format!("== mixed results by {} ==\n{}", mixer.name(), raw_text),
            raw_text,
            mix_provider_name: mixer.name().to_string(),
            consensus_achieved,
            consensus_attempts,
            consensus_error,
        })
    }
}

/// The synthesis prompt: instruction, blank line, then each successful
/// result as a numbered section.
fn build_mix_prompt(instruction: &str, results: &[GenResult]) -> String {
    let mut prompt = format!("{instruction}\n\n");
    for (index, result) in results.iter().filter(|r| r.is_ok()).enumerate() {
        prompt.push_str(&format!(
            "=== Result {} from {} ===\n{}\n\n",
            index + 1,
            result.provider,
            result.text
        ));
    }
    prompt
}
