use anyhow::{Context, Result, anyhow};
use remend_llm::{FixClient, LlmFixRequest, ReachabilityProbe, build_fix_prompt};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct OllamaFixClient {
    pub base_url: String,
    pub probe_timeout: Duration,
}

impl OllamaFixClient {
    pub fn new(base_url: String) -> Self {
        Self {
            base_url,
            probe_timeout: Duration::from_secs(2),
        }
    }

    pub fn is_reachable(&self) -> bool {
        let client = match Client::builder().timeout(self.probe_timeout).build() {
            Ok(c) => c,
            Err(_) => return false,
        };

        let url = format!("{}/api/tags", self.base_url.trim_end_matches('/'));
        client
            .get(url)
            .send()
            .map(|r| r.status().is_success())
            .unwrap_or(false)
    }
}

impl ReachabilityProbe for OllamaFixClient {
    fn ollama_reachable(&self) -> bool {
        self.is_reachable()
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

impl FixClient for OllamaFixClient {
    fn fix_code(&self, req: &LlmFixRequest, model: &str) -> Result<String> {
        let prompt = build_fix_prompt(req);
        let client = Client::builder()
            .timeout(Duration::from_secs(30))
            .build()
            .context("failed to build HTTP client")?;

        let url = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let response = client
            .post(url)
            .json(&GenerateRequest {
                model,
                prompt: &prompt,
                stream: false,
            })
            .send()
            .context("failed calling Ollama")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_else(|_| "<unavailable>".to_string());
            return Err(anyhow!("Ollama request failed ({status}): {body}"));
        }

        let parsed: GenerateResponse = response
            .json()
            .context("failed to decode Ollama response")?;

        Ok(parsed.response)
    }
}

#[cfg(test)]
mod tests {
    use super::OllamaFixClient;
    use remend_core::ErrorType;
    use remend_llm::{FixClient, LlmFixRequest};

    #[test]
    #[ignore]
    fn live_ollama_fix_if_enabled() {
        if std::env::var("REMEND_RUN_LIVE_TESTS").ok().as_deref() != Some("1") {
            return;
        }

        let base = std::env::var("REMEND_OLLAMA_URL")
            .unwrap_or_else(|_| "http://127.0.0.1:11434".to_string());
        let model = std::env::var("REMEND_OLLAMA_MODEL")
            .unwrap_or_else(|_| "qwen2.5-coder:7b".to_string());

        let client = OllamaFixClient::new(base);
        let req = LlmFixRequest {
            artifact_code: "import styles from './A.module.css';\nexport default () => <div className={styles.a}>hi</div>;".to_string(),
            error_message: "Cannot resolve './A.module.css'".to_string(),
            error_type: ErrorType::CssModule,
            artifact_id: "live-artifact".to_string(),
        };

        let out = client
            .fix_code(&req, &model)
            .expect("ollama live request should succeed");
        assert!(!out.trim().is_empty());
    }
}
