use anyhow::{Context, Result, anyhow};
use clap::{Parser, Subcommand, ValueEnum};
use remend_analysis::{classify_error, extract_code_blocks, should_show_recovery_ui};
use remend_config::{
    CliRunOverrides, EnvConfig, ProgressSetting, ProviderSetting, RunDefaults, load_file_config,
    resolve_run_defaults,
};
use remend_core::{RecoveryRequest, RecoveryStage, StageStatus};
use remend_engine::{EngineConfig, RecoveryEngine};
use remend_guard::{CircuitBreaker, CircuitBreakerConfig, RetryLoopMonitor, RetryMonitorConfig};
use remend_llm::{
    CachedFixService, FileFixCache, FixClient, FixRouter, FixService, LlmFixRequest,
    ProviderSelection, ReachabilityProbe,
};
use remend_llm_ollama::OllamaFixClient;
use remend_llm_openai::OpenAiFixClient;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::time::{SystemTime, UNIX_EPOCH};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum ProviderArg {
    Auto,
    Ollama,
    Openai,
}

impl ProviderArg {
    fn as_setting(self) -> ProviderSetting {
        match self {
            ProviderArg::Auto => ProviderSetting::Auto,
            ProviderArg::Ollama => ProviderSetting::Ollama,
            ProviderArg::Openai => ProviderSetting::Openai,
        }
    }
}

fn selection_for(provider: ProviderSetting) -> ProviderSelection {
    match provider {
        ProviderSetting::Auto => ProviderSelection::Auto,
        ProviderSetting::Ollama => ProviderSelection::Ollama,
        ProviderSetting::Openai => ProviderSelection::OpenAiCompatible,
    }
}

#[derive(Debug, Parser)]
#[command(name = "remend", version, about = "Recovers broken generated UI artifacts")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run the recovery pipeline for one broken artifact.
    Recover {
        /// Chat message the artifact was generated in.
        message_file: PathBuf,
        /// The broken artifact source.
        artifact_file: PathBuf,
        /// Error message reported by the artifact preview.
        #[arg(long)]
        error: String,
        #[arg(long, default_value = "jsx")]
        language: String,
        /// Defaults to the artifact file stem.
        #[arg(long)]
        artifact_id: Option<String>,
        /// Print the full recovery result as JSON.
        #[arg(long)]
        json: bool,
        #[arg(long)]
        no_progress: bool,
        /// Allow the LLM fallback when every transformation fails.
        #[arg(long)]
        llm: bool,
        #[arg(long, value_enum)]
        provider: Option<ProviderArg>,
        #[arg(long)]
        model: Option<String>,
        #[arg(long)]
        ollama_url: Option<String>,
        #[arg(long)]
        no_cache: bool,
        #[arg(long)]
        min_confidence: Option<f64>,
        /// Config file path; defaults to remend.json in the working directory.
        #[arg(long)]
        config: Option<PathBuf>,
    },
    /// Classify an error message without attempting recovery.
    Classify {
        #[arg(long)]
        error: String,
        /// Optional artifact source used as classification context.
        artifact_file: Option<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// List the code blocks found in a chat message.
    Blocks {
        message_file: PathBuf,
        #[arg(long)]
        json: bool,
    },
}

struct OllamaProbe {
    client: OllamaFixClient,
}

impl ReachabilityProbe for OllamaProbe {
    fn ollama_reachable(&self) -> bool {
        self.client.is_reachable()
    }
}

struct MaybeOpenAiFixClient {
    inner: Option<OpenAiFixClient>,
}

impl FixClient for MaybeOpenAiFixClient {
    fn fix_code(&self, req: &LlmFixRequest, model: &str) -> Result<String> {
        let client = self
            .inner
            .as_ref()
            .ok_or_else(|| anyhow!("OPENAI_API_KEY is required for OpenAI-compatible fixes"))?;
        client.fix_code(req, model)
    }
}

fn build_fix_service(defaults: &RunDefaults) -> Box<dyn FixService + Send + Sync> {
    let ollama_client = OllamaFixClient::new(defaults.ollama_url.clone());
    let openai_client = MaybeOpenAiFixClient {
        inner: std::env::var("OPENAI_API_KEY").ok().map(|api_key| OpenAiFixClient {
            base_url: defaults.openai_base_url.clone(),
            api_key,
        }),
    };

    let router = FixRouter {
        ollama: ollama_client.clone(),
        openai: openai_client,
        reachability: OllamaProbe {
            client: ollama_client,
        },
        ollama_model: defaults.ollama_model.clone(),
        openai_model: defaults.openai_model.clone(),
    };

    Box::new(CachedFixService {
        inner: router,
        cache: FileFixCache::default(),
        no_cache: defaults.no_cache,
    })
}

fn new_attempt_id() -> String {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_nanos())
        .unwrap_or(0);
    format!("{}-{nanos}", std::process::id())
}

fn artifact_id_from_path(path: &Path) -> String {
    path.file_stem()
        .map(|stem| stem.to_string_lossy().into_owned())
        .unwrap_or_else(|| "artifact".to_string())
}

fn render_stage(stage: &RecoveryStage) -> String {
    let status = match stage.status {
        StageStatus::Pending => "pending",
        StageStatus::Running => "running",
        StageStatus::Completed => "completed",
        StageStatus::Failed => "failed",
        StageStatus::Skipped => "skipped",
    };
    let mut line = format!("{}: {status}", stage.name);
    if let Some(detail) = &stage.detail {
        line.push_str(&format!(" ({detail})"));
    }
    if let Some(error) = &stage.error {
        line.push_str(&format!(" [{error}]"));
    }
    line
}

#[allow(clippy::too_many_arguments)]
fn recover_command(
    message_file: PathBuf,
    artifact_file: PathBuf,
    error: String,
    language: String,
    artifact_id: Option<String>,
    json: bool,
    no_progress: bool,
    llm: bool,
    provider: Option<ProviderArg>,
    model: Option<String>,
    ollama_url: Option<String>,
    no_cache: bool,
    min_confidence: Option<f64>,
    config: Option<PathBuf>,
) -> Result<ExitCode> {
    let message_content = fs::read_to_string(&message_file)
        .with_context(|| format!("failed reading {}", message_file.display()))?;
    let artifact_code = fs::read_to_string(&artifact_file)
        .with_context(|| format!("failed reading {}", artifact_file.display()))?;

    let cwd = std::env::current_dir().context("failed to resolve working directory")?;
    let file_cfg = load_file_config(config.as_deref(), &cwd)?;
    let overrides = CliRunOverrides {
        provider: provider.map(ProviderArg::as_setting),
        ollama_url,
        model,
        llm: llm.then_some(true),
        no_cache: no_cache.then_some(true),
        min_confidence,
        no_progress: no_progress.then_some(true),
    };
    let defaults = resolve_run_defaults(
        &overrides,
        &EnvConfig::from_current_env(),
        file_cfg.as_ref(),
    );

    let engine = RecoveryEngine::new(
        EngineConfig {
            min_confidence: defaults.min_confidence,
            llm_enabled: defaults.llm,
        },
        CircuitBreaker::new(CircuitBreakerConfig::default()),
        RetryLoopMonitor::new(RetryMonitorConfig::default()),
    )
    .with_fix_service(build_fix_service(&defaults), selection_for(defaults.provider));

    let request = RecoveryRequest {
        artifact_id: artifact_id.unwrap_or_else(|| artifact_id_from_path(&artifact_file)),
        artifact_code,
        error_message: error,
        message_content,
        language,
        attempt_id: new_attempt_id(),
    };

    let result = engine.execute_recovery(&request);

    if defaults.progress != ProgressSetting::Silent {
        for stage in &result.stages {
            eprintln!("[remend] {}", render_stage(stage));
        }
        eprintln!(
            "[remend] outcome: {} (confidence {:.2}, circuit {})",
            result.strategy,
            result.confidence,
            result.circuit_state.as_str()
        );
    }

    if json {
        let rendered =
            serde_json::to_string_pretty(&result).context("failed to serialize result")?;
        println!("{rendered}");
    } else if result.success {
        if let Some(code) = &result.final_code {
            println!("{code}");
        }
    } else {
        for message in &result.errors {
            eprintln!("remend: {message}");
        }
    }

    Ok(if result.success {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}

fn classify_command(error: String, artifact_file: Option<PathBuf>, json: bool) -> Result<ExitCode> {
    let artifact_code = match &artifact_file {
        Some(path) => fs::read_to_string(path)
            .with_context(|| format!("failed reading {}", path.display()))?,
        None => String::new(),
    };

    let classification = classify_error(&error, &artifact_code);

    if json {
        let rendered = serde_json::to_string_pretty(&classification)
            .context("failed to serialize classification")?;
        println!("{rendered}");
        return Ok(ExitCode::SUCCESS);
    }

    println!(
        "{} (confidence {:.2})",
        classification.error_type, classification.confidence
    );
    println!(
        "resolvable: {}",
        if classification.can_resolve { "yes" } else { "no" }
    );
    if let Some(strategy) = classification.suggested_strategy {
        println!("suggested strategy: {strategy}");
    }
    if let Some(reasoning) = &classification.reasoning {
        println!("reasoning: {reasoning}");
    }
    if should_show_recovery_ui(&classification) {
        println!("recovery UI: show");
    }

    Ok(ExitCode::SUCCESS)
}

fn blocks_command(message_file: PathBuf, json: bool) -> Result<ExitCode> {
    let message = fs::read_to_string(&message_file)
        .with_context(|| format!("failed reading {}", message_file.display()))?;
    let blocks = extract_code_blocks(&message);

    if json {
        let rendered =
            serde_json::to_string_pretty(&blocks).context("failed to serialize blocks")?;
        println!("{rendered}");
        return Ok(ExitCode::SUCCESS);
    }

    if blocks.is_empty() {
        println!("no code blocks");
        return Ok(ExitCode::SUCCESS);
    }

    for (index, block) in blocks.iter().enumerate() {
        println!(
            "{index}: {} ({} lines)",
            block.language_tag().unwrap_or("plain"),
            block.content.lines().count()
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Recover {
            message_file,
            artifact_file,
            error,
            language,
            artifact_id,
            json,
            no_progress,
            llm,
            provider,
            model,
            ollama_url,
            no_cache,
            min_confidence,
            config,
        } => recover_command(
            message_file,
            artifact_file,
            error,
            language,
            artifact_id,
            json,
            no_progress,
            llm,
            provider,
            model,
            ollama_url,
            no_cache,
            min_confidence,
            config,
        ),
        Commands::Classify {
            error,
            artifact_file,
            json,
        } => classify_command(error, artifact_file, json),
        Commands::Blocks { message_file, json } => blocks_command(message_file, json),
    }
}
