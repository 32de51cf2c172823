//! Layered configuration for the recovery CLI: command-line flags override
//! environment variables, which override `remend.json`, which overrides the
//! built-in defaults.

use anyhow::{Context, Result};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderSetting {
    Auto,
    Ollama,
    Openai,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProgressSetting {
    Auto,
    Silent,
    Verbose,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    pub provider: Option<ProviderSetting>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub llm: Option<bool>,
    pub no_cache: Option<bool>,
    pub min_confidence: Option<f64>,
    pub progress: Option<ProgressSetting>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct EnvConfig {
    pub provider: Option<ProviderSetting>,
    pub ollama_url: Option<String>,
    pub ollama_model: Option<String>,
    pub openai_base_url: Option<String>,
    pub openai_model: Option<String>,
    pub llm: Option<bool>,
    pub no_cache: Option<bool>,
    pub min_confidence: Option<f64>,
    pub progress: Option<ProgressSetting>,
}

#[derive(Debug, Clone, PartialEq, Default)]
pub struct CliRunOverrides {
    pub provider: Option<ProviderSetting>,
    pub ollama_url: Option<String>,
    pub model: Option<String>,
    pub llm: Option<bool>,
    pub no_cache: Option<bool>,
    pub min_confidence: Option<f64>,
    pub no_progress: Option<bool>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct RunDefaults {
    pub provider: ProviderSetting,
    pub ollama_url: String,
    pub ollama_model: String,
    pub openai_base_url: String,
    pub openai_model: String,
    pub llm: bool,
    pub no_cache: bool,
    pub min_confidence: f64,
    pub progress: ProgressSetting,
}

impl Default for RunDefaults {
    fn default() -> Self {
        Self {
            provider: ProviderSetting::Auto,
            ollama_url: "http://127.0.0.1:11434".to_string(),
            ollama_model: "qwen2.5-coder:7b".to_string(),
            openai_base_url: "https://api.openai.com/v1".to_string(),
            openai_model: "gpt-4.1-mini".to_string(),
            llm: false,
            no_cache: false,
            min_confidence: 0.5,
            progress: ProgressSetting::Auto,
        }
    }
}

pub fn load_file_config(explicit_path: Option<&Path>, cwd: &Path) -> Result<Option<FileConfig>> {
    let path = match explicit_path {
        Some(p) => p.to_path_buf(),
        None => {
            let candidate = cwd.join("remend.json");
            if !candidate.exists() {
                return Ok(None);
            }
            candidate
        }
    };

    let raw = fs::read_to_string(&path)
        .with_context(|| format!("failed reading config file {}", path.display()))?;
    let parsed: FileConfig = serde_json::from_str(&raw)
        .with_context(|| format!("failed parsing config file {}", path.display()))?;
    Ok(Some(parsed))
}

impl EnvConfig {
    pub fn from_current_env() -> Self {
        Self {
            provider: env::var("REMEND_PROVIDER")
                .ok()
                .and_then(|v| parse_provider(&v)),
            ollama_url: env::var("REMEND_OLLAMA_URL").ok(),
            ollama_model: env::var("REMEND_OLLAMA_MODEL").ok(),
            openai_base_url: env::var("OPENAI_BASE_URL").ok(),
            openai_model: env::var("REMEND_MODEL").ok(),
            llm: env::var("REMEND_LLM").ok().and_then(|v| parse_bool(&v)),
            no_cache: env::var("REMEND_NO_CACHE").ok().and_then(|v| parse_bool(&v)),
            min_confidence: env::var("REMEND_MIN_CONFIDENCE")
                .ok()
                .and_then(|v| v.trim().parse().ok()),
            progress: env::var("REMEND_PROGRESS")
                .ok()
                .and_then(|v| parse_progress(&v)),
        }
    }
}

pub fn resolve_run_defaults(
    cli: &CliRunOverrides,
    env_cfg: &EnvConfig,
    file_cfg: Option<&FileConfig>,
) -> RunDefaults {
    let base = RunDefaults::default();

    let provider = cli
        .provider
        .or(env_cfg.provider)
        .or(file_cfg.and_then(|c| c.provider))
        .unwrap_or(base.provider);

    let ollama_url = cli
        .ollama_url
        .clone()
        .or_else(|| env_cfg.ollama_url.clone())
        .or_else(|| file_cfg.and_then(|c| c.ollama_url.clone()))
        .unwrap_or(base.ollama_url);

    let ollama_model = cli
        .model
        .clone()
        .or_else(|| env_cfg.ollama_model.clone())
        .or_else(|| file_cfg.and_then(|c| c.ollama_model.clone()))
        .unwrap_or(base.ollama_model);

    let openai_base_url = env_cfg
        .openai_base_url
        .clone()
        .or_else(|| file_cfg.and_then(|c| c.openai_base_url.clone()))
        .unwrap_or(base.openai_base_url);

    let openai_model = cli
        .model
        .clone()
        .or_else(|| env_cfg.openai_model.clone())
        .or_else(|| file_cfg.and_then(|c| c.openai_model.clone()))
        .unwrap_or(base.openai_model);

    let llm = cli
        .llm
        .or(env_cfg.llm)
        .or(file_cfg.and_then(|c| c.llm))
        .unwrap_or(base.llm);

    let no_cache = cli
        .no_cache
        .or(env_cfg.no_cache)
        .or(file_cfg.and_then(|c| c.no_cache))
        .unwrap_or(base.no_cache);

    let min_confidence = cli
        .min_confidence
        .or(env_cfg.min_confidence)
        .or(file_cfg.and_then(|c| c.min_confidence))
        .unwrap_or(base.min_confidence)
        .clamp(0.0, 1.0);

    let mut progress = env_cfg
        .progress
        .or(file_cfg.and_then(|c| c.progress))
        .unwrap_or(base.progress);

    if cli.no_progress == Some(true) {
        progress = ProgressSetting::Silent;
    }

    RunDefaults {
        provider,
        ollama_url,
        ollama_model,
        openai_base_url,
        openai_model,
        llm,
        no_cache,
        min_confidence,
        progress,
    }
}

fn parse_bool(input: &str) -> Option<bool> {
    match input.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

fn parse_provider(input: &str) -> Option<ProviderSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ProviderSetting::Auto),
        "ollama" => Some(ProviderSetting::Ollama),
        "openai" | "openai-compatible" => Some(ProviderSetting::Openai),
        _ => None,
    }
}

fn parse_progress(input: &str) -> Option<ProgressSetting> {
    match input.trim().to_ascii_lowercase().as_str() {
        "auto" => Some(ProgressSetting::Auto),
        "silent" => Some(ProgressSetting::Silent),
        "verbose" => Some(ProgressSetting::Verbose),
        _ => None,
    }
}
