use anyhow::{Context, Result, anyhow};
use remend_llm::{FixClient, LlmFixRequest, build_fix_prompt};
use reqwest::blocking::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Clone)]
pub struct OpenAiFixClient {
    pub base_url: String,
    pub api_key: String,
}

impl OpenAiFixClient {
    pub fn from_env() -> Result<Self> {
        let base_url = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let api_key = std::env::var("OPENAI_API_KEY")
            .context("OPENAI_API_KEY is required for OpenAI-compatible provider")?;

        Ok(Self { base_url, api_key })
    }
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    temperature: f32,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: ChatMessage,
}

#[derive(Debug, Deserialize)]
struct ChatMessage {
    content: String,
}

impl FixClient for OpenAiFixClient {
    fn fix_code(&self, req: &LlmFixRequest, model: &str) -> Result<String> {
        let prompt = build_fix_prompt(req);
        let body = ChatRequest {
            model: model.to_string(),
            temperature: 0.0,
            messages: vec![
                Message {
                    role: "system".to_string(),
                    content: "You repair broken generated UI code. Return only the corrected source file, no prose."
                        .to_string(),
                },
                Message {
                    role: "user".to_string(),
                    content: prompt,
                },
            ],
        };

        let client = Client::builder()
            .timeout(Duration::from_secs(45))
            .build()
            .context("failed to build HTTP client")?;
        let url = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));

        let response = client
            .post(url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .context("failed calling OpenAI-compatible endpoint")?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().unwrap_or_else(|_| "<unavailable>".to_string());
            return Err(anyhow!(
                "OpenAI-compatible request failed ({status}): {body}"
            ));
        }

        let parsed: ChatResponse = response
            .json()
            .context("failed to decode OpenAI-compatible response")?;
        let content = parsed
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .ok_or_else(|| anyhow!("OpenAI-compatible response had no choices"))?;

        Ok(content)
    }
}

#[cfg(test)]
mod tests {
    use super::OpenAiFixClient;
    use remend_core::ErrorType;
    use remend_llm::{FixClient, LlmFixRequest};

    #[test]
    #[ignore]
    fn live_openai_fix_if_enabled() {
        if std::env::var("REMEND_RUN_LIVE_TESTS").ok().as_deref() != Some("1") {
            return;
        }

        let client = match OpenAiFixClient::from_env() {
            Ok(c) => c,
            Err(_) => return,
        };

        let model = std::env::var("REMEND_MODEL").unwrap_or_else(|_| "gpt-4.1-mini".to_string());
        let req = LlmFixRequest {
            artifact_code: "import data from './data.json';\nexport default () => <div>{data.title}</div>;".to_string(),
            error_message: "Cannot find module './data.json'".to_string(),
            error_type: ErrorType::Import,
            artifact_id: "live-artifact".to_string(),
        };

        let out = client
            .fix_code(&req, &model)
            .expect("openai live request should succeed");
        assert!(!out.trim().is_empty());
    }
}
