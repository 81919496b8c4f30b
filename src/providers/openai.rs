//! OpenAI chat completions backend.

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::prompt::Prompt;
use crate::providers::{Provider, ProviderKind, RawResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "https://api.openai.com";
const DEFAULT_MODEL: &str = "gpt-4o-mini";

#[derive(Debug)]
pub struct OpenAiProvider {
    endpoint: String,
    model: String,
    api_key_env: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
}

#[derive(Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Deserialize)]
struct ChoiceMessage {
    #[serde(default)]
    content: String,
}

impl OpenAiProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key_env = config
            .api_key_env
            .clone()
            .ok_or_else(|| Error::Config("openai provider requires api_key_env".into()))?;
        Ok(Self {
            endpoint: config
                .endpoint
                .clone()
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string())
                .trim_end_matches('/')
                .to_string(),
            model: config
                .model
                .clone()
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            api_key_env,
            client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        })
    }

    fn api_key(&self) -> Option<String> {
        std::env::var(&self.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty())
    }
}

#[async_trait]
impl Provider for OpenAiProvider {
    fn name(&self) -> &str {
        "openai"
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Remote
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn target(&self) -> String {
        self.endpoint.clone()
    }

    async fn health_check(&self) -> std::result::Result<(), String> {
        if self.api_key().is_some() {
            Ok(())
        } else {
            Err(format!("{} is not set", self.api_key_env))
        }
    }

    async fn infer(&self, prompt: &Prompt) -> anyhow::Result<RawResponse> {
        let key = self
            .api_key()
            .ok_or_else(|| anyhow::anyhow!("{} is not set", self.api_key_env))?;
        let url = format!("{}/v1/chat/completions", self.endpoint);
        let body = ChatRequest {
            model: self.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: prompt.system.clone(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: prompt.user.clone(),
                },
            ],
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(key)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("openai returned status {}", resp.status());
        }

        let parsed: ChatResponse = resp.json().await?;
        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.trim().to_string())
            .unwrap_or_default();
        if text.is_empty() {
            anyhow::bail!("openai returned empty response");
        }
        Ok(RawResponse {
            text,
            provider: self.name().to_string(),
            model: self.model.clone(),
        })
    }
}
