// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Iterative consensus over provider results.
//!
//! Each attempt asks the checker provider whether the current answers
//! agree. On disagreement every provider is re-run with the other
//! providers' last answers appended to the original prompt, and the next
//! attempt observes the full new result set.
//!
//! The reply classifier works through ordered phrase tables. The order is
//! a contract: negated agreement ("don't agree") must be recognized
//! before the positive tokens it contains, and negated disagreement
//! ("not different") before the bare negative tokens.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::providers::Provider;

use super::runner::fan_out;
use super::select_provider;
use super::types::{ConsensusError, ConsensusOutcome, GenResult};

/// Configuration for the consensus loop.
#[derive(Debug, Clone)]
pub struct ConsensusConfig {
    /// Master switch; disabled means results pass through untouched.
    pub enabled: bool,
    /// Maximum number of agreement checks (and thus reruns minus one).
    pub attempts: u32,
    /// Case-insensitive substring selecting the checking provider; the
    /// first enabled provider is the fallback.
    pub mix_provider: String,
}

impl Default for ConsensusConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            attempts: 3,
            mix_provider: "openai".to_string(),
        }
    }
}

/// Phrases that negate agreement; checked before the positive tokens.
const NEGATED_AGREEMENT: &[&str] = &[
    "don't agree",
    "do not agree",
    "does not agree",
    "doesn't agree",
    "not agree",
    "not the same",
    "aren't the same",
    "are not the same",
    "no consensus",
    "no agreement",
    "lack of consensus",
    "not in agreement",
    "not similar",
    "not consistent",
    "not aligned",
];

/// Phrases that negate disagreement; checked before the negative tokens.
const NEGATED_DISAGREEMENT: &[&str] = &[
    "not different",
    "aren't different",
    "are not different",
    "don't conflict",
    "do not conflict",
    "doesn't conflict",
    "no conflict",
    "don't contradict",
    "do not contradict",
    "don't differ",
    "do not differ",
    "not contradictory",
    "not inconsistent",
];

/// Standalone disagreement words, matched at word boundaries.
const NEGATIVE_TOKENS: &[&str] = &[
    "disagree",
    "conflict",
    "different",
    "contradict",
    "inconsistent",
    "diverge",
    "vary",
    "differ",
    "oppose",
    "disagreeable",
    "dissimilar",
];

/// Agreement words matched as word prefixes ("agrees", "similarity",
/// "consistently", "aligned" all count).
const POSITIVE_PREFIXES: &[&str] = &["agree", "similar", "consistent", "align"];

/// Agreement words matched as whole words.
const POSITIVE_TOKENS: &[&str] = &[
    "consensus",
    "same",
    "concur",
    "unanimous",
    "accord",
    "harmony",
    "unified",
];

/// Multi-word agreement phrases.
const AGREEMENT_PHRASES: &[&str] = &[
    "responses agree",
    "they agree",
    "models agree",
    "answers agree",
    "providers agree",
    "all agree",
];

/// True when `haystack` contains `needle` delimited by non-alphanumeric
/// characters. With `prefix` set, only the left boundary is required, so
/// "agrees" matches the needle "agree".
fn contains_word(haystack: &str, needle: &str, prefix: bool) -> bool {
    let bytes = haystack.as_bytes();
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(needle) {
        let start = from + pos;
        let end = start + needle.len();
        let left_ok = start == 0 || !bytes[start - 1].is_ascii_alphanumeric();
        let right_ok = prefix || end == bytes.len() || !bytes[end].is_ascii_alphanumeric();
        if left_ok && right_ok {
            return true;
        }
        from = start + 1;
    }
    false
}

/// Interpret a checker reply as agreement (`true`) or not.
///
/// Falls back to "no consensus" when nothing matches.
pub fn classify_verdict(reply: &str) -> bool {
    let normalized = reply.trim().to_lowercase();
    let stripped = normalized.trim_end_matches(['.', '!', '?']);

    if let Some(first) = stripped.split_whitespace().next() {
        let first = first.trim_matches(|c: char| !c.is_ascii_alphanumeric());
        if first == "yes" {
            return true;
        }
        if first == "no" {
            return false;
        }
    }

    if NEGATED_AGREEMENT.iter().any(|p| stripped.contains(p)) {
        return false;
    }
    if NEGATED_DISAGREEMENT.iter().any(|p| stripped.contains(p)) {
        return true;
    }
    if NEGATIVE_TOKENS
        .iter()
        .any(|t| contains_word(stripped, t, false))
    {
        return false;
    }
    if AGREEMENT_PHRASES.iter().any(|p| stripped.contains(p))
        || POSITIVE_PREFIXES
            .iter()
            .any(|t| contains_word(stripped, t, true))
        || POSITIVE_TOKENS
            .iter()
            .any(|t| contains_word(stripped, t, false))
    {
        return true;
    }

    false
}

/// Iterative agreement engine over a shared provider list.
pub struct ConsensusEngine<'a> {
    providers: &'a [Arc<dyn Provider>],
    config: ConsensusConfig,
}

impl<'a> ConsensusEngine<'a> {
    /// Create an engine over the runner's providers.
    pub fn new(providers: &'a [Arc<dyn Provider>], config: ConsensusConfig) -> Self {
        Self { providers, config }
    }

    /// Run the agreement loop.
    ///
    /// Disabled configuration or fewer than two successful results skip
    /// the loop and hand the input back untouched. An error is returned
    /// only when every single check call failed.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        original_prompt: &str,
        results: &[GenResult],
    ) -> Result<ConsensusOutcome, ConsensusError> {
        let successful = results.iter().filter(|r| r.is_ok()).count();
        if !self.config.enabled || successful < 2 {
            return Ok(ConsensusOutcome {
                final_results: results.to_vec(),
                attempts: 0,
                achieved: false,
            });
        }

        let Some(checker) = select_provider(self.providers, &self.config.mix_provider) else {
            return Err(ConsensusError::CheckFailed(
                "no enabled provider available for checking".to_string(),
            ));
        };

        let mut current = results.to_vec();
        let mut last_error: Option<String> = None;
        let mut any_check_succeeded = false;
        let attempts = self.config.attempts.max(1);

        for attempt in 1..=attempts {
            let check_prompt = build_check_prompt(&current);
            match checker.generate(cancel, &check_prompt).await {
                Ok(reply) => {
                    any_check_succeeded = true;
                    let agreed = classify_verdict(&reply);
                    debug!(attempt, agreed, "consensus check");
                    if agreed {
                        return Ok(ConsensusOutcome {
                            final_results: current,
                            attempts: attempt,
                            achieved: true,
                        });
                    }
                }
                Err(err) => {
                    warn!(attempt, error = %err, "consensus check failed");
                    last_error = Some(err.to_string());
                }
            }

            if attempt == attempts {
                break;
            }
            current = self.rerun(cancel, original_prompt, &current).await;
        }

        if !any_check_succeeded {
            if let Some(err) = last_error {
                return Err(ConsensusError::CheckFailed(err));
            }
        }

        Ok(ConsensusOutcome {
            final_results: current,
            attempts,
            achieved: false,
        })
    }

    /// Re-run every provider with the other providers' last answers
    /// appended to the original prompt. Failed results contribute no
    /// context.
    async fn rerun(
        &self,
        cancel: &CancellationToken,
        original_prompt: &str,
        current: &[GenResult],
    ) -> Vec<GenResult> {
        let prompts: Vec<String> = self
            .providers
            .iter()
            .map(|p| build_rerun_prompt(original_prompt, p.name(), current))
            .collect();

        match fan_out(self.providers, cancel, prompts).await {
            Ok(results) => results,
            // fan_out only fails on an empty provider list, which the
            // caller has already excluded
            Err(_) => current.to_vec(),
        }
    }
}

/// The YES/NO question put to the checker.
fn build_check_prompt(results: &[GenResult]) -> String {
    let mut prompt = String::from(
        "Compare the following responses from different AI models to the same prompt \
         and decide whether they agree on the substance of the answer.\n\
         Reply with only YES if they agree, or NO if they do not.\n\n",
    );
    for result in results.iter().filter(|r| r.is_ok()) {
        prompt.push_str(&format!(
            "=== Response from {} ===\n{}\n\n",
            result.provider, result.text
        ));
    }
    prompt
}

/// The rerun prompt for one provider: the original prompt, the other
/// providers' answers, and an instruction to reconsider.
fn build_rerun_prompt(original_prompt: &str, provider_name: &str, results: &[GenResult]) -> String {
    let mut prompt = format!(
        "{original_prompt}\n\nHere are responses from other AI models to the same prompt:\n\n"
    );
    for result in results
        .iter()
        .filter(|r| r.is_ok() && r.provider != provider_name)
    {
        prompt.push_str(&format!(
            "--- {}'s response ---\n{}\n\n",
            result.provider, result.text
        ));
    }
    prompt.push_str(
        "Considering these perspectives, reconsider your answer and respond again. \
         Keep your answer if you still believe it is correct.",
    );
    prompt
}

#[cfg(test)]
mod tests {
    use super::super::runner::stub::StubProvider;
    use super::*;

    #[test]
    fn test_verdict_yes_no_prefix() {
        assert!(classify_verdict("YES"));
        assert!(classify_verdict("yes."));
        assert!(classify_verdict("Yes, they agree"));
        assert!(!classify_verdict("NO"));
        assert!(!classify_verdict("No, they differ"));
        // "no" must be a whole first word, not a prefix of "not..."
        assert!(!classify_verdict("Nothing in common between them: they differ"));
    }

    #[test]
    fn test_verdict_negated_agreement_before_positives() {
        assert!(!classify_verdict("The responses don't agree at all"));
        assert!(!classify_verdict("They are not the same"));
        assert!(!classify_verdict("There is no consensus here"));
    }

    #[test]
    fn test_verdict_negated_disagreement_before_negatives() {
        assert!(classify_verdict("The answers are not different in substance"));
        assert!(classify_verdict("These responses don't conflict"));
        assert!(classify_verdict("The claims do not contradict each other"));
    }

    #[test]
    fn test_verdict_negative_tokens() {
        assert!(!classify_verdict("The responses conflict"));
        assert!(!classify_verdict("They disagree on the key point"));
        assert!(!classify_verdict("The answers are entirely different"));
        assert!(!classify_verdict("The two answers diverge"));
        assert!(!classify_verdict("Their conclusions are dissimilar"));
        // word boundary: "vary" must not fire inside other words
        assert!(classify_verdict("In summary, the responses agree"));
    }

    #[test]
    fn test_verdict_positive_tokens() {
        assert!(classify_verdict("The models agree"));
        assert!(classify_verdict("Both responses reach the same conclusion"));
        assert!(classify_verdict("The answers are similar"));
        assert!(classify_verdict("They are consistent with each other"));
        assert!(classify_verdict("The responses are aligned"));
        assert!(classify_verdict("The answers concur"));
        assert!(classify_verdict("There is clear consensus"));
    }

    #[test]
    fn test_verdict_unknown_is_no_consensus() {
        assert!(!classify_verdict(""));
        assert!(!classify_verdict("As an AI model I cannot evaluate this"));
    }

    fn providers(
        a: Vec<Result<String, String>>,
        b: Vec<Result<String, String>>,
        checker: Vec<Result<String, String>>,
    ) -> Vec<Arc<dyn Provider>> {
        vec![
            StubProvider::new("Alpha", a),
            StubProvider::new("Beta", b),
            StubProvider::new("OpenAI Checker", checker),
        ]
    }

    fn results() -> Vec<GenResult> {
        vec![
            GenResult::ok("Alpha", "Paris is the capital"),
            GenResult::ok("Beta", "The capital is Paris"),
        ]
    }

    fn config(attempts: u32) -> ConsensusConfig {
        ConsensusConfig {
            enabled: true,
            attempts,
            mix_provider: "openai".to_string(),
        }
    }

    #[tokio::test]
    async fn test_agreement_on_first_attempt() {
        let provs = providers(vec![], vec![], vec![Ok("YES".into())]);
        let engine = ConsensusEngine::new(&provs, config(2));
        let cancel = CancellationToken::new();
        let outcome = engine.run(&cancel, "prompt", &results()).await.unwrap();
        assert!(outcome.achieved);
        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.final_results, results());
    }

    #[tokio::test]
    async fn test_disagree_then_converge() {
        let provs = providers(
            vec![Ok("Paris, reconsidered".into())],
            vec![Ok("Paris, reconsidered too".into())],
            vec![Ok("NO".into()), Ok("YES".into())],
        );
        let engine = ConsensusEngine::new(&provs, config(3));
        let cancel = CancellationToken::new();
        let input = results();
        let outcome = engine.run(&cancel, "prompt", &input).await.unwrap();
        assert!(outcome.achieved);
        assert_eq!(outcome.attempts, 2);
        assert_ne!(outcome.final_results, input);
        assert_eq!(outcome.final_results[0].text, "Paris, reconsidered");
    }

    #[tokio::test]
    async fn test_no_rerun_after_agreement() {
        let alpha = StubProvider::new("Alpha", vec![Ok("should never run".into())]);
        let beta = StubProvider::new("Beta", vec![Ok("should never run".into())]);
        let checker = StubProvider::new("OpenAI Checker", vec![Ok("YES".into()), Ok("NO".into())]);
        let provs: Vec<Arc<dyn Provider>> = vec![alpha.clone(), beta.clone(), checker];
        let engine = ConsensusEngine::new(&provs, config(3));
        let cancel = CancellationToken::new();
        let outcome = engine.run(&cancel, "prompt", &results()).await.unwrap();
        assert!(outcome.achieved);
        // the answer providers were never re-invoked
        assert_eq!(alpha.calls(), 0);
        assert_eq!(beta.calls(), 0);
    }

    #[tokio::test]
    async fn test_exhausted_attempts() {
        let provs = providers(
            vec![Ok("v2".into()), Ok("v3".into())],
            vec![Ok("w2".into()), Ok("w3".into())],
            vec![Ok("NO".into())],
        );
        let engine = ConsensusEngine::new(&provs, config(2));
        let cancel = CancellationToken::new();
        let outcome = engine.run(&cancel, "prompt", &results()).await.unwrap();
        assert!(!outcome.achieved);
        assert_eq!(outcome.attempts, 2);
    }

    #[tokio::test]
    async fn test_skip_when_disabled() {
        let provs = providers(vec![], vec![], vec![Ok("YES".into())]);
        let engine = ConsensusEngine::new(
            &provs,
            ConsensusConfig {
                enabled: false,
                ..config(3)
            },
        );
        let cancel = CancellationToken::new();
        let outcome = engine.run(&cancel, "prompt", &results()).await.unwrap();
        assert!(!outcome.achieved);
        assert_eq!(outcome.attempts, 0);
        assert_eq!(outcome.final_results, results());
    }

    #[tokio::test]
    async fn test_skip_with_single_result() {
        let provs = providers(vec![], vec![], vec![Ok("YES".into())]);
        let engine = ConsensusEngine::new(&provs, config(3));
        let cancel = CancellationToken::new();
        let single = vec![GenResult::ok("Alpha", "only answer")];
        let outcome = engine.run(&cancel, "prompt", &single).await.unwrap();
        assert!(!outcome.achieved);
        assert_eq!(outcome.attempts, 0);
    }

    #[tokio::test]
    async fn test_all_checks_error() {
        let provs = providers(
            vec![Ok("v2".into())],
            vec![Ok("w2".into())],
            vec![Err("checker down".into())],
        );
        let engine = ConsensusEngine::new(&provs, config(2));
        let cancel = CancellationToken::new();
        let err = engine.run(&cancel, "prompt", &results()).await.unwrap_err();
        assert!(err
            .to_string()
            .starts_with("consensus checking failed:"));
        assert!(err.to_string().contains("checker down"));
    }

    #[test]
    fn test_rerun_prompt_excludes_own_and_failed() {
        let results = vec![
            GenResult::ok("Alpha", "answer a"),
            GenResult::ok("Beta", "answer b"),
            GenResult::err("Gamma", "boom"),
        ];
        let prompt = build_rerun_prompt("original question", "Alpha", &results);
        assert!(prompt.starts_with("original question"));
        assert!(prompt.contains("--- Beta's response ---\nanswer b"));
        assert!(!prompt.contains("answer a"));
        assert!(!prompt.contains("Gamma"));
    }

    #[test]
    fn test_check_prompt_lists_successes() {
        let prompt = build_check_prompt(&results());
        assert!(prompt.contains("=== Response from Alpha ===\nParis is the capital"));
        assert!(prompt.contains("=== Response from Beta ===\nThe capital is Paris"));
    }
}
