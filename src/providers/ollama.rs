//! Ollama backend (self-hosted, no API key).

use crate::config::ProviderConfig;
use crate::error::Result;
use crate::prompt::Prompt;
use crate::providers::{Provider, ProviderKind, RawResponse};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

const DEFAULT_ENDPOINT: &str = "http://127.0.0.1:11434";
const DEFAULT_MODEL: &str = "llama3";

#[derive(Debug)]
pub struct OllamaProvider {
    endpoint: String,
    model: String,
    client: reqwest::Client,
}

#[derive(Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Deserialize)]
struct ChatResponse {
    message: ResponseMessage,
}

#[derive(Deserialize)]
struct ResponseMessage {
    content: String,
}

impl OllamaProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self> {
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
            client: reqwest::Client::builder()
                .connect_timeout(std::time::Duration::from_secs(5))
                .build()
                .unwrap_or_else(|_| reqwest::Client::new()),
        })
    }
}

#[async_trait]
impl Provider for OllamaProvider {
    fn name(&self) -> &str {
        "ollama"
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

    /// Ollama health check: GET /api/tags.
    async fn health_check(&self) -> std::result::Result<(), String> {
        let url = format!("{}/api/tags", self.endpoint);
        match self.client.get(&url).send().await {
            Ok(resp) if resp.status().is_success() => Ok(()),
            Ok(resp) => Err(format!("ollama returned status {}", resp.status())),
            Err(e) => Err(format!("ollama unreachable: {e}")),
        }
    }

    async fn infer(&self, prompt: &Prompt) -> anyhow::Result<RawResponse> {
        let url = format!("{}/api/chat", self.endpoint);
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
            stream: false,
        };

        let resp = self.client.post(&url).json(&body).send().await?;
        if !resp.status().is_success() {
            anyhow::bail!("ollama returned status {}", resp.status());
        }

        let chat: ChatResponse = resp.json().await?;
        let text = chat.message.content.trim().to_string();
        if text.is_empty() {
            anyhow::bail!("ollama returned empty response");
        }
        Ok(RawResponse {
            text,
            provider: self.name().to_string(),
            model: self.model.clone(),
        })
    }
}
