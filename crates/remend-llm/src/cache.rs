use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::PathBuf;

use crate::{LlmFixRequest, LlmFixResponse, PROMPT_VERSION, Provider, format_provider, parse_provider};

pub trait FixCache {
    fn get(&self, key: &str) -> Option<LlmFixResponse>;
    fn put(&self, key: &str, response: &LlmFixResponse) -> Result<()>;
}

pub(crate) fn fix_cache_key(req: &LlmFixRequest, provider: Provider, model: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(req.artifact_code.as_bytes());
    hasher.update(b"\n--error--\n");
    hasher.update(req.error_message.as_bytes());
    hasher.update(b"\n--category--\n");
    hasher.update(req.error_type.as_str().as_bytes());
    hasher.update(b"\n--provider--\n");
    hasher.update(format_provider(provider).as_bytes());
    hasher.update(b"\n--model--\n");
    hasher.update(model.as_bytes());
    hasher.update(b"\n--prompt-version--\n");
    hasher.update(PROMPT_VERSION.as_bytes());
    format!("{:x}", hasher.finalize())
}

#[derive(Debug, Clone)]
pub struct FileFixCache {
    root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CachedFix {
    fixed_code: String,
    confidence: f64,
    provider: String,
    model: String,
    prompt_version: String,
}

impl FileFixCache {
    pub fn default_root() -> Result<PathBuf> {
        let home = dirs::home_dir().context("failed to resolve home directory")?;
        Ok(home.join(".remend").join("cache").join("fixes"))
    }

    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }
}

impl Default for FileFixCache {
    fn default() -> Self {
        let root = Self::default_root().unwrap_or_else(|_| PathBuf::from(".remend-cache"));
        Self { root }
    }
}

impl FixCache for FileFixCache {
    fn get(&self, key: &str) -> Option<LlmFixResponse> {
        let path = self.root.join(format!("{key}.json"));
        let raw = fs::read_to_string(path).ok()?;
        let parsed: CachedFix = serde_json::from_str(&raw).ok()?;
        if parsed.prompt_version != PROMPT_VERSION {
            return None;
        }

        Some(LlmFixResponse {
            fixed_code: parsed.fixed_code,
            confidence: parsed.confidence,
            provider: parse_provider(&parsed.provider),
            model: parsed.model,
            cache_hit: true,
        })
    }

    fn put(&self, key: &str, response: &LlmFixResponse) -> Result<()> {
        fs::create_dir_all(&self.root)
            .with_context(|| format!("failed creating cache dir {}", self.root.display()))?;
        let path = self.root.join(format!("{key}.json"));

        let payload = CachedFix {
            fixed_code: response.fixed_code.clone(),
            confidence: response.confidence,
            provider: format_provider(response.provider).to_string(),
            model: response.model.clone(),
            prompt_version: PROMPT_VERSION.to_string(),
        };

        let raw = serde_json::to_string_pretty(&payload).context("failed serializing cache payload")?;
        fs::write(path, raw).context("failed writing cache file")?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use remend_core::ErrorType;
    use tempfile::tempdir;

    fn req() -> LlmFixRequest {
        LlmFixRequest {
            artifact_code: "import x from './x.json';".to_string(),
            error_message: "Cannot find module './x.json'".to_string(),
            error_type: ErrorType::Import,
            artifact_id: "a".to_string(),
        }
    }

    #[test]
    fn file_cache_round_trips_and_marks_hits() {
        let temp = tempdir().expect("tempdir should work");
        let cache = FileFixCache::new(temp.path().to_path_buf());
        let key = fix_cache_key(&req(), Provider::Ollama, "qwen");

        assert!(cache.get(&key).is_none());
        let response = LlmFixResponse {
            fixed_code: "const x = {};".to_string(),
            confidence: 0.8,
            provider: Provider::Ollama,
            model: "qwen".to_string(),
            cache_hit: false,
        };
        cache.put(&key, &response).expect("put should work");

        let cached = cache.get(&key).expect("get should hit");
        assert!(cached.cache_hit);
        assert_eq!(cached.fixed_code, "const x = {};");
        assert_eq!(cached.provider, Provider::Ollama);
    }

    #[test]
    fn key_varies_with_code_error_and_model() {
        let base = fix_cache_key(&req(), Provider::Ollama, "qwen");

        let mut other_code = req();
        other_code.artifact_code.push('\n');
        assert_ne!(base, fix_cache_key(&other_code, Provider::Ollama, "qwen"));

        let mut other_error = req();
        other_error.error_message = "different".to_string();
        assert_ne!(base, fix_cache_key(&other_error, Provider::Ollama, "qwen"));

        assert_ne!(base, fix_cache_key(&req(), Provider::Ollama, "llama"));
        assert_ne!(base, fix_cache_key(&req(), Provider::OpenAiCompatible, "qwen"));
    }
}
