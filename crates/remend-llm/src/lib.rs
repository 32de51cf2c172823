use anyhow::{Result, anyhow};
use remend_core::{ErrorType, validate_code};
use thiserror::Error;

mod cache;
mod prompt;
mod scoring;

pub use cache::{FileFixCache, FixCache};
pub use prompt::build_fix_prompt;
pub use scoring::{extract_failing_token, score_fix_confidence};

/// Bumped whenever the fix prompt changes, so cached fixes from older
/// prompts never shadow new ones.
pub const PROMPT_VERSION: &str = "fix-v1";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Provider {
    Ollama,
    OpenAiCompatible,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderSelection {
    Auto,
    Ollama,
    OpenAiCompatible,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderDescriptor {
    pub provider: Provider,
    pub model: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LlmFixRequest {
    pub artifact_code: String,
    pub error_message: String,
    pub error_type: ErrorType,
    pub artifact_id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LlmFixResponse {
    pub fixed_code: String,
    pub confidence: f64,
    pub provider: Provider,
    pub model: String,
    pub cache_hit: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProviderAttempt {
    pub provider: Provider,
    pub stage: &'static str,
    pub error: String,
}

#[derive(Debug, Error)]
#[error("LLM fix routing failed after {attempts:?}")]
pub struct ProviderRoutingError {
    pub attempts: Vec<ProviderAttempt>,
}

pub trait FixClient {
    fn fix_code(&self, req: &LlmFixRequest, model: &str) -> Result<String>;
}

pub trait ReachabilityProbe {
    fn ollama_reachable(&self) -> bool;
}

/// The seam the recovery engine calls: a provider-routed, possibly cached
/// LLM fix attempt for one broken artifact.
pub trait FixService {
    fn candidate_chain(&self, selection: ProviderSelection) -> Vec<ProviderDescriptor>;
    fn fix(
        &self,
        selection: ProviderSelection,
        req: &LlmFixRequest,
        model_override: Option<&str>,
    ) -> Result<LlmFixResponse>;
}

/// Strips a single surrounding code fence if the model added one.
pub fn normalize_code_output(raw: &str) -> Result<String> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("LLM returned empty output"));
    }

    if let Some(block) = extract_fenced_code(trimmed) {
        if block.trim().is_empty() {
            return Err(anyhow!("LLM returned empty fenced output"));
        }
        return Ok(block.trim().to_string());
    }

    Ok(trimmed.to_string())
}

fn extract_fenced_code(input: &str) -> Option<String> {
    let start = input.find("```")?;
    let remainder = &input[start + 3..];
    let body_start = remainder.find('\n')? + 1;
    let body = &remainder[body_start..];
    let end = body.find("```")?;
    Some(body[..end].to_string())
}

/// Failures the routing chain should not retry on another provider, and the
/// UI should explain rather than show raw provider text for.
pub fn is_non_recoverable_provider_error(error_text: &str) -> bool {
    let lowered = error_text.to_ascii_lowercase();
    lowered.contains("401")
        || lowered.contains("403")
        || lowered.contains("unauthorized")
        || lowered.contains("api key")
        || lowered.contains("api_key")
}

/// Maps raw provider errors onto the short messages the UI shows users.
pub fn user_facing_failure(error_text: &str) -> String {
    let lowered = error_text.to_ascii_lowercase();
    if lowered.contains("429") || lowered.contains("rate limit") {
        return "The automatic fix service is temporarily unavailable. Try again in a moment.".to_string();
    }
    if is_non_recoverable_provider_error(error_text) {
        return "No automatic fix provider is configured.".to_string();
    }
    "The automatic fix attempt failed.".to_string()
}

pub struct FixRouter<O, P, R>
where
    O: FixClient,
    P: FixClient,
    R: ReachabilityProbe,
{
    pub ollama: O,
    pub openai: P,
    pub reachability: R,
    pub ollama_model: String,
    pub openai_model: String,
}

impl<O, P, R> FixRouter<O, P, R>
where
    O: FixClient,
    P: FixClient,
    R: ReachabilityProbe,
{
    fn call_provider(
        &self,
        provider: Provider,
        req: &LlmFixRequest,
        model_override: Option<&str>,
    ) -> Result<LlmFixResponse> {
        let (output, model) = match provider {
            Provider::Ollama => {
                let model = model_override.unwrap_or(&self.ollama_model);
                (self.ollama.fix_code(req, model)?, model)
            }
            Provider::OpenAiCompatible => {
                let model = model_override.unwrap_or(&self.openai_model);
                (self.openai.fix_code(req, model)?, model)
            }
        };

        let fixed_code = normalize_code_output(&output)?;
        let report = validate_code(&fixed_code);
        if !report.is_valid {
            return Err(anyhow!(
                "LLM fix is not syntactically valid: {}",
                report.errors.join("; ")
            ));
        }

        Ok(LlmFixResponse {
            confidence: score_fix_confidence(&req.artifact_code, &fixed_code, &req.error_message),
            fixed_code,
            provider,
            model: model.to_string(),
            cache_hit: false,
        })
    }
}

impl<O, P, R> FixService for FixRouter<O, P, R>
where
    O: FixClient,
    P: FixClient,
    R: ReachabilityProbe,
{
    fn candidate_chain(&self, selection: ProviderSelection) -> Vec<ProviderDescriptor> {
        match selection {
            ProviderSelection::Ollama => vec![ProviderDescriptor {
                provider: Provider::Ollama,
                model: self.ollama_model.clone(),
            }],
            ProviderSelection::OpenAiCompatible => vec![ProviderDescriptor {
                provider: Provider::OpenAiCompatible,
                model: self.openai_model.clone(),
            }],
            ProviderSelection::Auto => {
                if self.reachability.ollama_reachable() {
                    vec![
                        ProviderDescriptor {
                            provider: Provider::Ollama,
                            model: self.ollama_model.clone(),
                        },
                        ProviderDescriptor {
                            provider: Provider::OpenAiCompatible,
                            model: self.openai_model.clone(),
                        },
                    ]
                } else {
                    vec![ProviderDescriptor {
                        provider: Provider::OpenAiCompatible,
                        model: self.openai_model.clone(),
                    }]
                }
            }
        }
    }

    fn fix(
        &self,
        selection: ProviderSelection,
        req: &LlmFixRequest,
        model_override: Option<&str>,
    ) -> Result<LlmFixResponse> {
        let chain = self.candidate_chain(selection);
        let mut attempts = Vec::new();

        for entry in chain {
            match self.call_provider(entry.provider, req, model_override) {
                Ok(response) => return Ok(response),
                Err(err) => {
                    let stop = is_non_recoverable_provider_error(&err.to_string());
                    attempts.push(ProviderAttempt {
                        provider: entry.provider,
                        stage: "fix",
                        error: err.to_string(),
                    });
                    if stop {
                        break;
                    }
                }
            }
        }

        Err(ProviderRoutingError { attempts }.into())
    }
}

/// Wraps a [`FixService`] with the content-addressed file cache; identical
/// fix requests against the same provider, model, and prompt never pay for a
/// second round trip.
pub struct CachedFixService<S, C>
where
    S: FixService,
    C: FixCache,
{
    pub inner: S,
    pub cache: C,
    pub no_cache: bool,
}

impl<S, C> FixService for CachedFixService<S, C>
where
    S: FixService,
    C: FixCache,
{
    fn candidate_chain(&self, selection: ProviderSelection) -> Vec<ProviderDescriptor> {
        self.inner.candidate_chain(selection)
    }

    fn fix(
        &self,
        selection: ProviderSelection,
        req: &LlmFixRequest,
        model_override: Option<&str>,
    ) -> Result<LlmFixResponse> {
        if !self.no_cache {
            for candidate in self.inner.candidate_chain(selection) {
                let model = model_override.unwrap_or(&candidate.model);
                let key = cache::fix_cache_key(req, candidate.provider, model);
                if let Some(cached) = self.cache.get(&key) {
                    return Ok(cached);
                }
            }
        }

        let response = self.inner.fix(selection, req, model_override)?;

        if !self.no_cache {
            let key = cache::fix_cache_key(req, response.provider, &response.model);
            self.cache.put(&key, &response)?;
        }

        Ok(response)
    }
}

pub(crate) fn format_provider(provider: Provider) -> &'static str {
    match provider {
        Provider::Ollama => "ollama",
        Provider::OpenAiCompatible => "openai-compatible",
    }
}

pub(crate) fn parse_provider(value: &str) -> Provider {
    if value == "ollama" {
        Provider::Ollama
    } else {
        Provider::OpenAiCompatible
    }
}
