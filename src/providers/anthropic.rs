//! Anthropic Messages API backend.

use crate::config::ProviderConfig;
use crate::error::{Error, Result};
use crate::prompt::Prompt;
use crate::providers::{Provider, ProviderKind, RawResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "https://api.anthropic.com";
const DEFAULT_MODEL: &str = "claude-sonnet-4-20250514";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 2048;

#[derive(Debug)]
pub struct AnthropicProvider {
    endpoint: String,
    model: String,
    /// Env var name holding the key; the key itself is read per call so a
    /// long-lived process picks up rotations.
    api_key_env: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct MessagesRequest {
    model: String,
    max_tokens: u32,
    system: String,
    messages: Vec<Message>,
}

#[derive(Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: String,
}

impl AnthropicProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
        let api_key_env = config
            .api_key_env
            .clone()
            .ok_or_else(|| Error::Config("anthropic provider requires api_key_env".into()))?;
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
impl Provider for AnthropicProvider {
    fn name(&self) -> &str {
        "anthropic"
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

    /// Key presence only. A real request is the reachability probe; probing
    /// the paid API on every run would cost a round trip for nothing.
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
        let url = format!("{}/v1/messages", self.endpoint);
        let body = MessagesRequest {
            model: self.model.clone(),
            max_tokens: MAX_TOKENS,
            system: prompt.system.clone(),
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.user.clone(),
            }],
        };

        let resp = self
            .client
            .post(&url)
            .header("x-api-key", key)
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await?;
        if !resp.status().is_success() {
            anyhow::bail!("anthropic returned status {}", resp.status());
        }

        let parsed: MessagesResponse = resp.json().await?;
        let text = parsed
            .content
            .iter()
            .map(|b| b.text.as_str())
            .collect::<Vec<_>>()
            .join("")
            .trim()
            .to_string();
        if text.is_empty() {
            anyhow::bail!("anthropic returned empty response");
        }
        Ok(RawResponse {
            text,
            provider: self.name().to_string(),
            model: self.model.clone(),
        })
    }
}
