//! End-to-end analysis: classify, fingerprint, cache, route, format.
//!
//! The cache stores the provider's raw text keyed by fingerprint; report
//! formatting runs on every request, hit or miss. The mode is part of the
//! fingerprint, so a cached entry is always formatted the same way it was
//! requested.

use crate::cache::{CacheStore, ComputedResponse};
use crate::classifier::{self, ToolClassification};
use crate::config::Config;
use crate::engine::LocalInferenceEngine;
use crate::error::{Error, Result};
use crate::fingerprint::{self, Fingerprint};
use crate::prompt::{self, PROMPT_TEMPLATE_VERSION};
use crate::providers::{ProviderRouter, RawResponse};
use crate::report::{self, Report, ReportMode};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

pub struct AnalysisRequest {
    pub payload: Vec<u8>,
    pub mode: ReportMode,
    /// Provider override from the CLI; None routes per configuration.
    pub provider: Option<String>,
    /// Skip cache lookup and storage for this request.
    pub no_cache: bool,
}

#[derive(Debug)]
pub struct AnalysisOutput {
    pub report: Report,
    pub classification: ToolClassification,
    pub fingerprint: Fingerprint,
    /// True when the response came from the cache rather than a backend.
    pub cached: bool,
}

pub struct Analyzer {
    cache: CacheStore,
    router: ProviderRouter,
    max_context: usize,
    language: String,
}

impl Analyzer {
    pub fn from_config(config: &Config) -> Result<Self> {
        let engine = Arc::new(LocalInferenceEngine::new(config.local.max_tokens));
        let router = ProviderRouter::from_config(config, engine)?;
        let cache = CacheStore::open(
            &config.cache_dir,
            config.cache_capacity,
            Duration::from_secs(config.cache_ttl_secs),
            Duration::from_secs(config.cache_wait_secs),
        );
        Ok(Self {
            cache,
            router,
            max_context: config.max_context,
            language: config.language.clone(),
        })
    }

    #[cfg(test)]
    pub fn new(
        cache: CacheStore,
        router: ProviderRouter,
        max_context: usize,
        language: &str,
    ) -> Self {
        Self {
            cache,
            router,
            max_context,
            language: language.to_string(),
        }
    }

    pub fn cache(&self) -> &CacheStore {
        &self.cache
    }

    pub fn router(&self) -> &ProviderRouter {
        &self.router
    }

    pub async fn analyze(&self, request: &AnalysisRequest) -> Result<AnalysisOutput> {
        let normalized = fingerprint::normalize(&request.payload);
        if normalized.is_empty() {
            return Err(Error::EmptyInput);
        }

        if let Some(name) = request.provider.as_deref() {
            if !self.router.has_provider(name) {
                return Err(Error::Config(format!(
                    "unknown provider '{name}'; run `sherlog status` to list configured backends"
                )));
            }
        }

        let classification = classifier::classify(&request.payload);
        tracing::info!(
            tool = classification.tool.as_str(),
            confidence = classification.confidence,
            "classified input"
        );

        // Prompt construction happens before the cache so a budget that can
        // no longer fit the scaffold fails identically on hits and misses.
        let prompt = prompt::build(
            &classification,
            &normalized,
            request.mode,
            self.max_context,
            &self.language,
        )?;

        let (provider_id, model_id) = self.router.identity_for(request.provider.as_deref());
        let fp = fingerprint::fingerprint(
            &request.payload,
            request.mode,
            &provider_id,
            &model_id,
            PROMPT_TEMPLATE_VERSION,
        )?;

        let computed_fresh = AtomicBool::new(false);
        let raw = if request.no_cache {
            computed_fresh.store(true, Ordering::SeqCst);
            self.router.route(&prompt, request.provider.as_deref()).await?
        } else {
            let entry = self
                .cache
                .get_or_compute(&fp, async {
                    computed_fresh.store(true, Ordering::SeqCst);
                    let resp = self
                        .router
                        .route(&prompt, request.provider.as_deref())
                        .await?;
                    Ok(ComputedResponse {
                        response: resp.text,
                        provider: resp.provider,
                        model: resp.model,
                    })
                })
                .await?;
            RawResponse {
                text: entry.response,
                provider: entry.provider,
                model: entry.model,
            }
        };

        let report = report::format(&raw, request.mode, &classification, &normalized);
        Ok(AnalysisOutput {
            report,
            classification,
            fingerprint: fp,
            cached: !computed_fresh.load(Ordering::SeqCst),
        })
    }
}
