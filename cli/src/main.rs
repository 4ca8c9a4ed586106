//! `mpt` - run one prompt against several LLM providers concurrently.

use std::io::{IsTerminal, Read, Write};
use std::path::PathBuf;
use std::process;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Parser;
use tokio_util::sync::CancellationToken;

use mpt_core::config::{parse_size, resolve_catalog, Catalog, LegacyCustom, DEFAULT_MAX_TOKENS};
use mpt_core::mcp::McpServer;
use mpt_core::orchestration::{
    ConsensusConfig, MixConfig, MixEngine, RunError, Runner, DEFAULT_MIX_PROMPT,
};
use mpt_core::providers::{
    AnthropicProvider, CustomProvider, EndpointType, GoogleProvider, OpenAiProvider, Provider,
    ProviderOptions, RetryConfig, RetryProvider, TEMPERATURE_UNSET,
};

mod logging;
mod output;

/// Multi-provider prompt tool: sends one prompt to every enabled LLM
/// provider in parallel, optionally mixes the answers, and can serve the
/// same fan-out as an MCP tool over stdio.
#[derive(Parser, Debug)]
#[command(name = "mpt")]
#[command(version)]
#[command(about = "Run a prompt against multiple LLM providers concurrently")]
struct Cli {
    /// Prompt text; stdin is appended when piped
    #[arg(short = 'p', long)]
    prompt: Option<String>,

    /// Files whose contents are appended to the prompt (repeatable)
    #[arg(short = 'f', long = "file")]
    files: Vec<PathBuf>,

    /// Skip listed files whose path contains this pattern (repeatable)
    #[arg(short = 'x', long = "exclude")]
    excludes: Vec<String>,

    /// Overall timeout for the run (e.g. 60s, 2m)
    #[arg(short = 't', long, default_value = "60s", value_parser = parse_duration_flag)]
    timeout: Duration,

    /// Echo the prompt and raise the log level
    #[arg(short = 'v', long)]
    verbose: bool,

    /// Emit per-provider results as JSON
    #[arg(long)]
    json: bool,

    /// Enable the OpenAI provider
    #[arg(long = "openai.enabled")]
    openai_enabled: bool,

    /// OpenAI API key
    #[arg(long = "openai.api-key", env = "OPENAI_API_KEY", hide_env_values = true)]
    openai_api_key: Option<String>,

    /// OpenAI model
    #[arg(long = "openai.model", default_value = "gpt-4o")]
    openai_model: String,

    /// OpenAI completion token ceiling (accepts k/m/g suffixes, 0 = model maximum)
    #[arg(long = "openai.max-tokens", default_value = "16k", value_parser = parse_max_tokens_flag)]
    openai_max_tokens: i32,

    /// OpenAI sampling temperature (-1 = provider default)
    #[arg(long = "openai.temperature", default_value_t = TEMPERATURE_UNSET, allow_hyphen_values = true)]
    openai_temperature: f32,

    /// Enable the Anthropic provider
    #[arg(long = "anthropic.enabled")]
    anthropic_enabled: bool,

    /// Anthropic API key
    #[arg(long = "anthropic.api-key", env = "ANTHROPIC_API_KEY", hide_env_values = true)]
    anthropic_api_key: Option<String>,

    /// Anthropic model
    #[arg(long = "anthropic.model", default_value = "claude-3-5-sonnet-20241022")]
    anthropic_model: String,

    /// Anthropic completion token ceiling
    #[arg(long = "anthropic.max-tokens", default_value = "16k", value_parser = parse_max_tokens_flag)]
    anthropic_max_tokens: i32,

    /// Anthropic sampling temperature (-1 = provider default)
    #[arg(long = "anthropic.temperature", default_value_t = TEMPERATURE_UNSET, allow_hyphen_values = true)]
    anthropic_temperature: f32,

    /// Enable the Google provider
    #[arg(long = "google.enabled")]
    google_enabled: bool,

    /// Google API key
    #[arg(long = "google.api-key", env = "GOOGLE_API_KEY", hide_env_values = true)]
    google_api_key: Option<String>,

    /// Google model
    #[arg(long = "google.model", default_value = "gemini-1.5-pro")]
    google_model: String,

    /// Google completion token ceiling
    #[arg(long = "google.max-tokens", default_value = "16k", value_parser = parse_max_tokens_flag)]
    google_max_tokens: i32,

    /// Google sampling temperature (-1 = provider default)
    #[arg(long = "google.temperature", default_value_t = TEMPERATURE_UNSET, allow_hyphen_values = true)]
    google_temperature: f32,

    /// Custom provider as id:key=value,... (repeatable)
    #[arg(long = "customs", value_name = "ID:SPEC")]
    customs: Vec<String>,

    /// Legacy custom provider: display name (also its catalog id)
    #[arg(long = "custom.name", env = "CUSTOM_NAME")]
    custom_name: Option<String>,

    /// Legacy custom provider: API root URL
    #[arg(long = "custom.url", env = "CUSTOM_URL")]
    custom_url: Option<String>,

    /// Legacy custom provider: API key
    #[arg(long = "custom.api-key", env = "CUSTOM_API_KEY", hide_env_values = true)]
    custom_api_key: Option<String>,

    /// Legacy custom provider: model
    #[arg(long = "custom.model", env = "CUSTOM_MODEL")]
    custom_model: Option<String>,

    /// Legacy custom provider: completion token ceiling
    #[arg(long = "custom.max-tokens", env = "CUSTOM_MAX_TOKENS", value_parser = parse_size_flag)]
    custom_max_tokens: Option<i64>,

    /// Legacy custom provider: sampling temperature
    #[arg(long = "custom.temperature", env = "CUSTOM_TEMPERATURE", allow_hyphen_values = true)]
    custom_temperature: Option<f32>,

    /// Legacy custom provider: enable it
    #[arg(
        long = "custom.enabled",
        env = "CUSTOM_ENABLED",
        num_args = 0..=1,
        default_missing_value = "true"
    )]
    custom_enabled: Option<bool>,

    /// Attempts per provider call, including the first (1 = no retry)
    #[arg(long = "retry.attempts", default_value_t = 1)]
    retry_attempts: u32,

    /// Delay before the first retry
    #[arg(long = "retry.delay", default_value = "1s", value_parser = parse_duration_flag)]
    retry_delay: Duration,

    /// Ceiling for the growing retry delay
    #[arg(long = "retry.max-delay", default_value = "30s", value_parser = parse_duration_flag)]
    retry_max_delay: Duration,

    /// Retry backoff multiplier (<= 1 keeps the delay constant)
    #[arg(long = "retry.factor", default_value_t = 2.0)]
    retry_factor: f64,

    /// Mix all responses into a single answer
    #[arg(long)]
    mix: bool,

    /// Substring selecting the mixing provider
    #[arg(long = "mix.provider", default_value = "openai")]
    mix_provider: String,

    /// Instruction used for the synthesis prompt
    #[arg(long = "mix.prompt")]
    mix_prompt: Option<String>,

    /// Iterate providers toward agreement before mixing
    #[arg(long)]
    consensus: bool,

    /// Maximum consensus attempts
    #[arg(long = "consensus.attempts", default_value_t = 3)]
    consensus_attempts: u32,

    /// Serve the fan-out as an MCP tool over stdio instead of running once
    #[arg(long = "mcp.server")]
    mcp_server: bool,

    /// Server name reported to MCP clients
    #[arg(long = "mcp.server-name", default_value = "mpt")]
    mcp_server_name: String,
}

fn parse_duration_flag(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).map_err(|e| e.to_string())
}

fn parse_size_flag(value: &str) -> Result<i64, String> {
    parse_size(value).map_err(|e| e.to_string())
}

fn parse_max_tokens_flag(value: &str) -> Result<i32, String> {
    let size = parse_size(value).map_err(|e| e.to_string())?;
    i32::try_from(size).map_err(|_| format!("{value}: exceeds the 32-bit token ceiling"))
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let verbose = cli.verbose;

    if let Err(err) = run(cli).await {
        eprintln!("Error: {err}");
        if verbose {
            for cause in err.chain().skip(1) {
                eprintln!("  caused by: {cause}");
            }
        }
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let builtin_keys: Vec<String> = [
        &cli.openai_api_key,
        &cli.anthropic_api_key,
        &cli.google_api_key,
        &cli.custom_api_key,
    ]
    .into_iter()
    .flatten()
    .cloned()
    .collect();
    let secrets = logging::init(cli.verbose, builtin_keys);

    let legacy = legacy_custom(&cli);
    let catalog = resolve_catalog(std::env::vars(), legacy.as_ref(), &cli.customs);
    secrets.add(catalog.secrets.clone());

    for warning in &catalog.warnings {
        tracing::warn!("{warning}");
    }
    for error in &catalog.errors {
        tracing::warn!("{error}");
    }

    let providers = build_providers(&cli, &catalog);
    let enabled: Vec<Arc<dyn Provider>> = providers.into_iter().filter(|p| p.enabled()).collect();
    if enabled.is_empty() {
        bail!(
            "no providers enabled; enable one with --openai.enabled, --anthropic.enabled, \
             --google.enabled or --customs"
        );
    }

    let retry = RetryConfig {
        attempts: cli.retry_attempts.max(1),
        delay: cli.retry_delay,
        max_delay: cli.retry_max_delay,
        factor: cli.retry_factor,
    };
    let wrapped: Vec<Arc<dyn Provider>> = enabled
        .into_iter()
        .map(|p| RetryProvider::wrap(p, retry.clone()))
        .collect();
    let runner = Runner::new(wrapped);

    if cli.mcp_server {
        let cancel = CancellationToken::new();
        let server = McpServer::new(runner, &cli.mcp_server_name);
        return server
            .serve_stdio(&cancel)
            .await
            .context("MCP server failed");
    }

    let prompt = assemble_prompt(&cli)?;
    if prompt.trim().is_empty() {
        bail!("no prompt given; pass -p, -f or pipe text on stdin");
    }

    let cancel = CancellationToken::new();
    let run_output = tokio::select! {
        result = runner.run(&cancel, &prompt) => result?,
        () = tokio::time::sleep(cli.timeout) => {
            cancel.cancel();
            return Err(RunError::Timeout(cli.timeout))
                .context("run did not finish in time; raise -t to allow more");
        }
    };

    let mut stdout = std::io::stdout().lock();
    if cli.verbose && !cli.json {
        write!(stdout, "{}", output::verbose_preamble(&prompt))?;
    }

    if cli.json {
        write!(stdout, "{}", output::render_json(run_output.results())?)?;
        return Ok(());
    }

    if cli.mix {
        let engine = MixEngine::new(MixConfig {
            provider: cli.mix_provider.clone(),
            prompt: cli
                .mix_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_MIX_PROMPT.to_string()),
            consensus: ConsensusConfig {
                enabled: cli.consensus,
                attempts: cli.consensus_attempts.max(1),
                mix_provider: cli.mix_provider.clone(),
            },
        });
        let response = engine
            .mix(&cancel, runner.providers(), &prompt, run_output.results())
            .await?;
        if let Some(error) = &response.consensus_error {
            tracing::warn!("{error}");
        }
        write!(stdout, "{}", output::render_text(&response.text_with_header))?;
        return Ok(());
    }

    write!(stdout, "{}", output::render_text(run_output.combined()))?;
    Ok(())
}

/// The legacy `--custom.*` record, present when any of its flags or env
/// keys were given.
fn legacy_custom(cli: &Cli) -> Option<LegacyCustom> {
    if cli.custom_name.is_none()
        && cli.custom_url.is_none()
        && cli.custom_api_key.is_none()
        && cli.custom_model.is_none()
        && cli.custom_max_tokens.is_none()
        && cli.custom_temperature.is_none()
        && cli.custom_enabled.is_none()
    {
        return None;
    }
    Some(LegacyCustom {
        name: cli.custom_name.clone().unwrap_or_default(),
        url: cli.custom_url.clone().unwrap_or_default(),
        api_key: cli.custom_api_key.clone().unwrap_or_default(),
        model: cli.custom_model.clone().unwrap_or_default(),
        max_tokens: cli.custom_max_tokens.unwrap_or(DEFAULT_MAX_TOKENS),
        temperature: cli.custom_temperature.unwrap_or(TEMPERATURE_UNSET),
        enabled: cli.custom_enabled.unwrap_or(false),
    })
}

/// Built-in providers in fixed order, then catalog customs in id order.
fn build_providers(cli: &Cli, catalog: &Catalog) -> Vec<Arc<dyn Provider>> {
    let mut providers: Vec<Arc<dyn Provider>> = Vec::new();

    providers.push(Arc::new(OpenAiProvider::new(ProviderOptions {
        api_key: cli.openai_api_key.clone().unwrap_or_default(),
        model: cli.openai_model.clone(),
        enabled: cli.openai_enabled,
        max_tokens: cli.openai_max_tokens,
        temperature: cli.openai_temperature,
        // the hosted endpoint routes by model name unless forced
        endpoint_type: EndpointType::Auto,
        ..ProviderOptions::default()
    })));

    providers.push(Arc::new(AnthropicProvider::new(ProviderOptions {
        api_key: cli.anthropic_api_key.clone().unwrap_or_default(),
        model: cli.anthropic_model.clone(),
        enabled: cli.anthropic_enabled,
        max_tokens: cli.anthropic_max_tokens,
        temperature: cli.anthropic_temperature,
        ..ProviderOptions::default()
    })));

    providers.push(Arc::new(GoogleProvider::new(ProviderOptions {
        api_key: cli.google_api_key.clone().unwrap_or_default(),
        model: cli.google_model.clone(),
        enabled: cli.google_enabled,
        max_tokens: cli.google_max_tokens,
        temperature: cli.google_temperature,
        ..ProviderOptions::default()
    })));

    for spec in &catalog.specs {
        providers.push(Arc::new(CustomProvider::from_spec(spec)));
    }

    providers
}

/// Assemble the prompt from `-p`, listed files, and piped stdin.
fn assemble_prompt(cli: &Cli) -> Result<String> {
    let mut parts: Vec<String> = Vec::new();

    if let Some(prompt) = &cli.prompt {
        if !prompt.is_empty() {
            parts.push(prompt.clone());
        }
    }

    for path in &cli.files {
        let shown = path.display().to_string();
        if cli.excludes.iter().any(|pattern| shown.contains(pattern)) {
            tracing::debug!(path = %shown, "excluded from prompt");
            continue;
        }
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {shown}"))?;
        parts.push(content.trim_end().to_string());
    }

    if !std::io::stdin().is_terminal() {
        let mut piped = String::new();
        std::io::stdin()
            .read_to_string(&mut piped)
            .context("failed to read stdin")?;
        if !piped.trim().is_empty() {
            parts.push(piped.trim_end().to_string());
        }
    }

    Ok(parts.join("\n\n"))
}
