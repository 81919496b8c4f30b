//! Local engine exposed through the provider seam.
//!
//! Wraps `LocalInferenceEngine` so the router treats the offline fallback
//! exactly like any remote backend. The model file is loaded lazily on the
//! first inference so runs that hit the cache or a remote never touch disk.

use crate::config::LOCAL_PROVIDER_NAME;
use crate::engine::LocalInferenceEngine;
use crate::prompt::Prompt;
use crate::providers::{Provider, ProviderKind, RawResponse};
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

pub struct LocalProvider {
    engine: Arc<LocalInferenceEngine>,
    model_path: PathBuf,
}

impl LocalProvider {
    pub fn new(engine: Arc<LocalInferenceEngine>, model_path: PathBuf) -> Self {
        Self { engine, model_path }
    }

    async fn ensure_loaded(&self) -> anyhow::Result<()> {
        if self.engine.is_loaded().await {
            return Ok(());
        }
        self.engine
            .load(&self.model_path)
            .await
            .map_err(|e| anyhow::anyhow!("failed to load local model: {e}"))
    }
}

#[async_trait]
impl Provider for LocalProvider {
    fn name(&self) -> &str {
        LOCAL_PROVIDER_NAME
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model(&self) -> &str {
        "sherlog-compact"
    }

    fn target(&self) -> String {
        self.model_path.display().to_string()
    }

    async fn health_check(&self) -> std::result::Result<(), String> {
        if self.engine.is_loaded().await || self.model_path.is_file() {
            Ok(())
        } else {
            Err(format!(
                "model file not found: {}",
                self.model_path.display()
            ))
        }
    }

    async fn infer(&self, prompt: &Prompt) -> anyhow::Result<RawResponse> {
        self.ensure_loaded().await?;
        let text = self.engine.infer(prompt).await?;
        Ok(RawResponse {
            text,
            provider: self.name().to_string(),
            model: self.model().to_string(),
        })
    }
}
