// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// https://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or https://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Parallel prompt fan-out with ordered result capture.
//!
//! One task is spawned per provider; all of them share the caller's
//! cancellation token. Completion order is whatever the network gives
//! us, but results are captured back in provider input order. The runner
//! adds no deadline of its own and does not kill tasks on cancellation;
//! providers are responsible for observing the token, and the runner
//! simply waits for every task to return before reporting.

use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::providers::Provider;

use super::types::{GenResult, RunError, RunnerOutput};

/// Parallel fan-out engine over an ordered provider list.
pub struct Runner {
    providers: Vec<Arc<dyn Provider>>,
}

impl Runner {
    /// Create a runner over the given providers. Order is preserved into
    /// the output.
    pub fn new(providers: Vec<Arc<dyn Provider>>) -> Self {
        Self { providers }
    }

    /// The providers this runner fans out to.
    pub fn providers(&self) -> &[Arc<dyn Provider>] {
        &self.providers
    }

    /// Execute `prompt` against every provider concurrently.
    ///
    /// Succeeds when at least one provider produced text; the failed
    /// results stay accessible through [`RunnerOutput::results`]. When
    /// every provider fails the aggregated error carries their messages.
    pub async fn run(
        &self,
        cancel: &CancellationToken,
        prompt: &str,
    ) -> Result<RunnerOutput, RunError> {
        let prompts: Vec<String> = self
            .providers
            .iter()
            .map(|_| prompt.to_string())
            .collect();
        let results = fan_out(&self.providers, cancel, prompts).await?;
        let combined = combine_results(&results);

        if combined.is_none() {
            let details = results
                .iter()
                .filter_map(|r| {
                    r.error
                        .as_ref()
                        .map(|e| format!("{}: {}", r.provider, e))
                })
                .collect::<Vec<_>>()
                .join("; ");
            return Err(RunError::AllProvidersFailed(details));
        }

        Ok(RunnerOutput::new(results, combined.unwrap_or_default()))
    }
}

/// Spawn one task per provider, each with its own prompt, and collect the
/// outcomes in provider order. Used directly by the consensus engine,
/// which feeds every provider a different rerun prompt.
pub(crate) async fn fan_out(
    providers: &[Arc<dyn Provider>],
    cancel: &CancellationToken,
    prompts: Vec<String>,
) -> Result<Vec<GenResult>, RunError> {
    if providers.is_empty() {
        return Err(RunError::NoProviders);
    }
    debug_assert_eq!(providers.len(), prompts.len());

    let mut handles = Vec::with_capacity(providers.len());
    for (provider, prompt) in providers.iter().zip(prompts) {
        let provider = provider.clone();
        let cancel = cancel.clone();
        handles.push(tokio::spawn(async move {
            debug!(provider = provider.name(), "dispatching prompt");
            match provider.generate(&cancel, &prompt).await {
                Ok(text) => GenResult::ok(provider.name(), text),
                Err(err) => GenResult::err(provider.name(), err.to_string()),
            }
        }));
    }

    // awaiting in spawn order restores input order regardless of which
    // provider finished first
    let mut results = Vec::with_capacity(handles.len());
    for (provider, handle) in providers.iter().zip(handles) {
        let result = handle
            .await
            .unwrap_or_else(|err| GenResult::err(provider.name(), format!("task failed: {err}")));
        results.push(result);
    }
    Ok(results)
}

/// Format the combined text over the successful results.
///
/// Returns `None` when nothing succeeded. A single surviving result is
/// passed through raw, with no header; two or more get per-provider
/// sections separated by a blank line. Failed results are left out.
fn combine_results(results: &[GenResult]) -> Option<String> {
    let ok: Vec<&GenResult> = results.iter().filter(|r| r.is_ok()).collect();
    match ok.as_slice() {
        [] => None,
        [only] => Some(only.text.clone()),
        many => Some(
            many.iter()
                .map(|r| format!("== generated by {} ==\n{}\n", r.provider, r.text))
                .collect::<Vec<_>>()
                .join("\n"),
        ),
    }
}


#[cfg(test)]
mod tests {
    use super::stub::StubProvider;
    use super::*;
    use std::time::Duration;

    fn runner_of(providers: Vec<Arc<dyn Provider>>) -> Runner {
        Runner::new(providers)
    }

    #[tokio::test]
    async fn test_single_provider_no_header() {
        let runner = runner_of(vec![StubProvider::new("Solo", vec![Ok("raw text".into())])]);
        let cancel = CancellationToken::new();
        let output = runner.run(&cancel, "p").await.unwrap();
        assert_eq!(output.combined(), "raw text");
        assert_eq!(output.results().len(), 1);
    }

    #[tokio::test]
    async fn test_two_providers_with_headers() {
        let runner = runner_of(vec![
            StubProvider::new("Alpha", vec![Ok("first".into())]),
            StubProvider::new("Beta", vec![Ok("second".into())]),
        ]);
        let cancel = CancellationToken::new();
        let output = runner.run(&cancel, "p").await.unwrap();
        assert_eq!(
            output.combined(),
            "== generated by Alpha ==\nfirst\n\n== generated by Beta ==\nsecond\n"
        );
    }

    #[tokio::test]
    async fn test_order_preserved_despite_completion_order() {
        // the first provider is the slowest; output order must still match
        // input order
        let runner = runner_of(vec![
            StubProvider::with_delay(
                "Slow",
                vec![Ok("s".into())],
                Duration::from_millis(80),
            ),
            StubProvider::with_delay(
                "Medium",
                vec![Ok("m".into())],
                Duration::from_millis(40),
            ),
            StubProvider::new("Fast", vec![Ok("f".into())]),
        ]);
        let cancel = CancellationToken::new();
        let output = runner.run(&cancel, "p").await.unwrap();
        let names: Vec<_> = output.results().iter().map(|r| r.provider.as_str()).collect();
        assert_eq!(names, vec!["Slow", "Medium", "Fast"]);
    }

    #[tokio::test]
    async fn test_partial_failure_excluded_from_combined() {
        let runner = runner_of(vec![
            StubProvider::new("Good", vec![Ok("fine".into())]),
            StubProvider::new("Bad", vec![Err("boom".into())]),
        ]);
        let cancel = CancellationToken::new();
        let output = runner.run(&cancel, "p").await.unwrap();
        // only one success remains, so no header
        assert_eq!(output.combined(), "fine");
        // the failure stays visible through the results accessor
        let failed: Vec<_> = output.results().iter().filter(|r| !r.is_ok()).collect();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].provider, "Bad");
        assert!(failed[0].error.as_deref().unwrap().contains("boom"));
    }

    #[tokio::test]
    async fn test_all_failed_returns_error() {
        let runner = runner_of(vec![
            StubProvider::new("One", vec![Err("boom".into())]),
            StubProvider::new("Two", vec![Err("boom".into())]),
        ]);
        let cancel = CancellationToken::new();
        let err = runner.run(&cancel, "p").await.unwrap_err();
        match err {
            RunError::AllProvidersFailed(message) => {
                assert!(message.contains("boom"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[tokio::test]
    async fn test_empty_provider_list() {
        let runner = runner_of(vec![]);
        let cancel = CancellationToken::new();
        assert!(matches!(
            runner.run(&cancel, "p").await,
            Err(RunError::NoProviders)
        ));
    }

    #[tokio::test]
    async fn test_cancellation_drains_all_tasks() {
        let runner = runner_of(vec![
            StubProvider::with_delay("A", vec![Ok("a".into())], Duration::from_secs(30)),
            StubProvider::with_delay("B", vec![Ok("b".into())], Duration::from_secs(30)),
        ]);
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            cancel_clone.cancel();
        });

        let started = std::time::Instant::now();
        let err = runner.run(&cancel, "p").await.unwrap_err();
        assert!(started.elapsed() < Duration::from_secs(5));
        match err {
            RunError::AllProvidersFailed(message) => {
                assert!(message.contains("context canceled"));
            }
            other => panic!("unexpected error: {other}"),
        }
    }
}
