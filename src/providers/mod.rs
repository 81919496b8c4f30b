//! Backend providers and routing.
//!
//! Every backend — remote API or local engine — exposes exactly one
//! capability: turn a prompt into a raw text response, or fail. The router
//! owns the fallback policy; providers own nothing but their own call.

pub mod anthropic;
pub mod local;
pub mod ollama;
pub mod openai;

use crate::config::{Config, LOCAL_PROVIDER_NAME};
use crate::engine::LocalInferenceEngine;
use crate::error::{Error, Result};
use crate::prompt::Prompt;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

/// Unmodified provider output plus its origin, as cached and formatted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawResponse {
    pub text: String,
    pub provider: String,
    pub model: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    Remote,
    Local,
}

/// A provider as seen by status output: configuration identity plus the
/// last lazily checked availability.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderDescriptor {
    pub name: String,
    pub kind: ProviderKind,
    /// Endpoint URL for remotes, model path for the local engine.
    pub target: String,
    pub available: bool,
}

/// The one capability the router depends on.
#[async_trait]
pub trait Provider: Send + Sync {
    fn name(&self) -> &str;
    fn kind(&self) -> ProviderKind;
    fn model(&self) -> &str;
    /// Endpoint or model path, for status display.
    fn target(&self) -> String;
    /// Cheap availability probe: API reachability for remotes, model file
    /// presence for the local engine.
    async fn health_check(&self) -> std::result::Result<(), String>;
    async fn infer(&self, prompt: &Prompt) -> anyhow::Result<RawResponse>;
}

/// Selects and invokes a backend with fallback ordering:
/// explicit override → configured default → configured priority order →
/// local engine last. Each provider is attempted at most once per request;
/// a failing remote falls through to the next candidate.
pub struct ProviderRouter {
    providers: Vec<Arc<dyn Provider>>,
    default_provider: Option<String>,
    offline: bool,
    call_timeout: Duration,
}

impl ProviderRouter {
    /// Build the provider set from configuration. The local engine is
    /// always present as the final fallback, even when not listed.
    pub fn from_config(config: &Config, engine: Arc<LocalInferenceEngine>) -> Result<Self> {
        let mut providers: Vec<Arc<dyn Provider>> = Vec::new();
        for pc in &config.providers {
            match pc.name.as_str() {
                "anthropic" => providers.push(Arc::new(anthropic::AnthropicProvider::new(pc)?)),
                "openai" => providers.push(Arc::new(openai::OpenAiProvider::new(pc)?)),
                "ollama" => providers.push(Arc::new(ollama::OllamaProvider::new(pc)?)),
                LOCAL_PROVIDER_NAME => {} // appended below regardless
                other => {
                    return Err(Error::Config(format!("unknown provider '{other}'")));
                }
            }
        }
        providers.push(Arc::new(local::LocalProvider::new(
            engine,
            config.local.model_path.clone(),
        )));

        Ok(Self {
            providers,
            default_provider: config.default_provider().map(str::to_string),
            offline: config.offline,
            call_timeout: Duration::from_secs(config.provider_timeout_secs),
        })
    }

    /// Test constructor with an explicit provider list.
    #[cfg(test)]
    pub fn with_providers(
        providers: Vec<Arc<dyn Provider>>,
        default_provider: Option<String>,
        offline: bool,
        call_timeout: Duration,
    ) -> Self {
        Self {
            providers,
            default_provider,
            offline,
            call_timeout,
        }
    }

    /// Whether a backend with this name is configured. Overrides naming a
    /// nonexistent backend are rejected up front rather than silently
    /// falling through routing (and polluting fingerprints with a phantom
    /// provider identity).
    pub fn has_provider(&self, name: &str) -> bool {
        self.providers.iter().any(|p| p.name() == name)
    }

    /// The identity a request will be billed to for fingerprinting: the
    /// preferred provider (or the default) and its configured model.
    pub fn identity_for(&self, preferred: Option<&str>) -> (String, String) {
        let name = preferred
            .map(str::to_string)
            .or_else(|| {
                if self.offline {
                    Some(LOCAL_PROVIDER_NAME.to_string())
                } else {
                    self.default_provider.clone()
                }
            })
            .unwrap_or_else(|| LOCAL_PROVIDER_NAME.to_string());
        let model = self
            .providers
            .iter()
            .find(|p| p.name() == name)
            .map(|p| p.model().to_string())
            .unwrap_or_default();
        (name, model)
    }

    /// Candidate order for one request, deduplicated, local last. Offline
    /// mode admits only local backends.
    fn candidates(&self, preferred: Option<&str>) -> Vec<Arc<dyn Provider>> {
        let mut names: Vec<&str> = Vec::new();
        if let Some(p) = preferred {
            names.push(p);
        }
        if let Some(d) = self.default_provider.as_deref() {
            names.push(d);
        }
        for p in &self.providers {
            names.push(p.name());
        }

        let mut seen = std::collections::HashSet::new();
        let mut out: Vec<Arc<dyn Provider>> = Vec::new();
        for name in names {
            if !seen.insert(name.to_string()) {
                continue;
            }
            if let Some(p) = self.providers.iter().find(|p| p.name() == name) {
                if self.offline && p.kind() != ProviderKind::Local {
                    continue;
                }
                out.push(p.clone());
            }
        }
        out
    }

    /// Route a prompt to the first candidate that can answer. Unavailable
    /// providers are skipped without retry; call failures and timeouts fall
    /// through to the next candidate. Exhaustion is the only fatal outcome.
    pub async fn route(&self, prompt: &Prompt, preferred: Option<&str>) -> Result<RawResponse> {
        let candidates = self.candidates(preferred);
        if candidates.is_empty() {
            return Err(Error::AllProvidersExhausted);
        }

        for provider in candidates {
            if let Err(reason) = provider.health_check().await {
                let skip = Error::ProviderUnavailable {
                    name: provider.name().to_string(),
                    reason,
                };
                tracing::warn!("{skip}; skipping");
                continue;
            }

            match tokio::time::timeout(self.call_timeout, provider.infer(prompt)).await {
                Ok(Ok(response)) => {
                    tracing::info!(
                        provider = provider.name(),
                        model = provider.model(),
                        "provider answered"
                    );
                    return Ok(response);
                }
                Ok(Err(e)) => {
                    tracing::warn!(
                        provider = provider.name(),
                        "provider call failed, falling through: {e:#}"
                    );
                }
                Err(_) => {
                    tracing::warn!(
                        provider = provider.name(),
                        timeout_secs = self.call_timeout.as_secs(),
                        "provider call timed out, falling through"
                    );
                }
            }
        }

        Err(Error::AllProvidersExhausted)
    }

    /// Current descriptors with freshly probed availability.
    pub async fn describe(&self) -> Vec<ProviderDescriptor> {
        let mut out = Vec::with_capacity(self.providers.len());
        for p in &self.providers {
            out.push(ProviderDescriptor {
                name: p.name().to_string(),
                kind: p.kind(),
                target: p.target(),
                available: p.health_check().await.is_ok(),
            });
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ToolClassification, ToolKind};
    use crate::report::ReportMode;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn test_prompt() -> Prompt {
        let c = ToolClassification {
            tool: ToolKind::Nmap,
            confidence: 0.9,
        };
        crate::prompt::build(&c, "22/tcp open ssh", ReportMode::Explain, 8192, "en").unwrap()
    }

    /// Scripted provider: optionally unhealthy, optionally failing, and it
    /// counts how often it was probed and called.
    struct FakeProvider {
        name: &'static str,
        kind: ProviderKind,
        healthy: bool,
        fails: bool,
        health_checks: AtomicUsize,
        calls: AtomicUsize,
    }

    impl FakeProvider {
        fn new(name: &'static str, healthy: bool, fails: bool) -> Arc<Self> {
            Arc::new(Self {
                name,
                kind: ProviderKind::Remote,
                healthy,
                fails,
                health_checks: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }

        fn local(name: &'static str) -> Arc<Self> {
            Arc::new(Self {
                name,
                kind: ProviderKind::Local,
                healthy: true,
                fails: false,
                health_checks: AtomicUsize::new(0),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Provider for FakeProvider {
        fn name(&self) -> &str {
            self.name
        }
        fn kind(&self) -> ProviderKind {
            self.kind
        }
        fn model(&self) -> &str {
            "fake-model"
        }
        fn target(&self) -> String {
            "fake://".into()
        }
        async fn health_check(&self) -> std::result::Result<(), String> {
            self.health_checks.fetch_add(1, Ordering::SeqCst);
            if self.healthy {
                Ok(())
            } else {
                Err("scripted as down".into())
            }
        }
        async fn infer(&self, _prompt: &Prompt) -> anyhow::Result<RawResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fails {
                anyhow::bail!("scripted call failure");
            }
            Ok(RawResponse {
                text: format!("answer from {}", self.name),
                provider: self.name.to_string(),
                model: "fake-model".to_string(),
            })
        }
    }

    fn router(providers: Vec<Arc<dyn Provider>>, default: Option<&str>, offline: bool) -> ProviderRouter {
        ProviderRouter::with_providers(
            providers,
            default.map(str::to_string),
            offline,
            Duration::from_secs(2),
        )
    }

    #[tokio::test]
    async fn unavailable_provider_skipped_once_then_next_selected() {
        let a = FakeProvider::new("a", false, false);
        let b = FakeProvider::new("b", true, false);
        let r = router(vec![a.clone(), b.clone()], None, false);

        let resp = r.route(&test_prompt(), None).await.unwrap();
        assert_eq!(resp.provider, "b");
        assert_eq!(a.health_checks.load(Ordering::SeqCst), 1);
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
        assert_eq!(b.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn explicit_override_wins() {
        let a = FakeProvider::new("a", true, false);
        let b = FakeProvider::new("b", true, false);
        let r = router(vec![a.clone(), b.clone()], Some("a"), false);

        let resp = r.route(&test_prompt(), Some("b")).await.unwrap();
        assert_eq!(resp.provider, "b");
        assert_eq!(a.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn default_beats_priority_order() {
        let a = FakeProvider::new("a", true, false);
        let b = FakeProvider::new("b", true, false);
        let r = router(vec![a.clone(), b.clone()], Some("b"), false);

        let resp = r.route(&test_prompt(), None).await.unwrap();
        assert_eq!(resp.provider, "b");
    }

    #[tokio::test]
    async fn call_failure_falls_through() {
        let a = FakeProvider::new("a", true, true);
        let b = FakeProvider::new("b", true, false);
        let r = router(vec![a.clone(), b.clone()], None, false);

        let resp = r.route(&test_prompt(), None).await.unwrap();
        assert_eq!(resp.provider, "b");
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn exhaustion_when_every_provider_fails() {
        let a = FakeProvider::new("a", false, false);
        let b = FakeProvider::new("b", true, true);
        let r = router(vec![a, b], None, false);

        let err = r.route(&test_prompt(), None).await.unwrap_err();
        assert!(matches!(err, Error::AllProvidersExhausted));
    }

    #[tokio::test]
    async fn offline_mode_admits_only_local() {
        let remote = FakeProvider::new("remote", true, false);
        let local = FakeProvider::local("local");
        let r = router(vec![remote.clone(), local], Some("remote"), true);

        let resp = r.route(&test_prompt(), None).await.unwrap();
        assert_eq!(resp.provider, "local");
        assert_eq!(remote.health_checks.load(Ordering::SeqCst), 0);
        assert_eq!(remote.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn each_provider_attempted_at_most_once() {
        // preferred == default == first in list; must still only be tried once
        let a = FakeProvider::new("a", true, true);
        let local = FakeProvider::local("local");
        let r = router(vec![a.clone(), local], Some("a"), false);

        let resp = r.route(&test_prompt(), Some("a")).await.unwrap();
        assert_eq!(resp.provider, "local");
        assert_eq!(a.calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.health_checks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn identity_for_prefers_override_then_default() {
        let a = FakeProvider::new("a", true, false);
        let r = router(vec![a], Some("a"), false);
        assert_eq!(r.identity_for(Some("b")).0, "b");
        assert_eq!(r.identity_for(None).0, "a");
        assert_eq!(r.identity_for(None).1, "fake-model");
    }

    #[tokio::test]
    async fn identity_for_offline_is_local() {
        let a = FakeProvider::new("a", true, false);
        let local = FakeProvider::local("local");
        let r = router(vec![a, local], Some("a"), true);
        assert_eq!(r.identity_for(None).0, "local");
    }

    #[tokio::test]
    async fn describe_reports_probed_availability() {
        let a = FakeProvider::new("a", false, false);
        let b = FakeProvider::new("b", true, false);
        let r = router(vec![a, b], None, false);

        let described = r.describe().await;
        assert_eq!(described.len(), 2);
        assert!(!described[0].available);
        assert!(described[1].available);
    }
}
