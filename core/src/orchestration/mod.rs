// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Orchestration engines: parallel fan-out, consensus, and mixing.
//!
//! The [`Runner`] executes one prompt against every provider at once and
//! captures results in input order. The [`MixEngine`] post-processes a
//! result set into one synthesized answer, optionally after the
//! [`consensus::ConsensusEngine`] has iterated the providers toward
//! agreement.

use std::sync::Arc;

use tracing::warn;

use crate::providers::Provider;

pub mod consensus;
pub mod mix;
pub mod runner;
pub mod types;

pub use consensus::{classify_verdict, ConsensusConfig, ConsensusEngine};
pub use mix::{MixConfig, MixEngine, DEFAULT_MIX_PROMPT};
pub use runner::Runner;
pub use types::{
    ConsensusError, ConsensusOutcome, GenResult, MixError, MixResponse, RunError, RunnerOutput,
};

/// Pick a provider by case-insensitive substring of its display name,
/// falling back to the first enabled provider (the substitution is
/// logged).
pub(crate) fn select_provider<'a>(
    providers: &'a [Arc<dyn Provider>],
    name: &str,
) -> Option<&'a Arc<dyn Provider>> {
    let needle = name.to_lowercase();
    if !needle.is_empty() {
        if let Some(found) = providers
            .iter()
            .find(|p| p.enabled() && p.name().to_lowercase().contains(&needle))
        {
            return Some(found);
        }
    }
    let fallback = providers.iter().find(|p| p.enabled())?;
    warn!(
        requested = name,
        substitute = fallback.name(),
        "requested mix provider not found, using first enabled provider"
    );
    Some(fallback)
}

#[cfg(test)]
mod tests {
    use super::runner::stub::StubProvider;
    use super::*;

    #[test]
    fn test_select_provider_substring_case_insensitive() {
        let provs: Vec<Arc<dyn Provider>> = vec![
            StubProvider::new("Anthropic", vec![]),
            StubProvider::new("OpenAI (gpt-4o)", vec![]),
        ];
        let selected = select_provider(&provs, "openai").unwrap();
        assert_eq!(selected.name(), "OpenAI (gpt-4o)");
    }

    #[test]
    fn test_select_provider_fallback() {
        let provs: Vec<Arc<dyn Provider>> = vec![
            StubProvider::new("Anthropic", vec![]),
            StubProvider::new("Google", vec![]),
        ];
        let selected = select_provider(&provs, "openai").unwrap();
        assert_eq!(selected.name(), "Anthropic");
    }

    #[test]
    fn test_select_provider_empty_list() {
        let provs: Vec<Arc<dyn Provider>> = vec![];
        assert!(select_provider(&provs, "openai").is_none());
    }
}
