//! Local inference engine for fully air-gapped operation.
//!
//! The compact model is a JSON file: a tokenizer vocabulary, a token
//! transition table, and per-tool advisory snippets. Loading is an
//! explicit, expensive acquisition done once; the loaded model is shared
//! read-only across concurrent inferences behind an `RwLock`, and `unload`
//! takes the write half, which drains all in-flight inferences before the
//! handle is released.

pub mod tokenizer;

use crate::error::{Error, Result};
use crate::prompt::Prompt;
use anyhow::Context;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use tokio::sync::RwLock;
use tokenizer::Tokenizer;

/// On-disk model layout. Transition keys are stringly typed because JSON
/// object keys are strings.
#[derive(Debug, Deserialize)]
struct ModelFile {
    vocab: Vec<String>,
    #[serde(default)]
    transitions: HashMap<String, Vec<(u32, f64)>>,
    #[serde(default)]
    advisories: HashMap<String, String>,
}

struct LoadedModel {
    tokenizer: Tokenizer,
    transitions: HashMap<u32, Vec<(u32, f64)>>,
    advisories: HashMap<String, String>,
}

pub struct LocalInferenceEngine {
    state: RwLock<Option<LoadedModel>>,
    max_tokens: usize,
}

impl LocalInferenceEngine {
    pub fn new(max_tokens: usize) -> Self {
        Self {
            state: RwLock::new(None),
            max_tokens: max_tokens.max(1),
        }
    }

    /// Load the model file, replacing any previously loaded model.
    pub async fn load(&self, path: &Path) -> Result<()> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read model file {}", path.display()))?;
        let file: ModelFile = serde_json::from_str(&raw)
            .with_context(|| format!("failed to parse model file {}", path.display()))?;
        let model = Self::assemble(file)?;

        let mut state = self.state.write().await;
        *state = Some(model);
        tracing::info!(path = %path.display(), "local model loaded");
        Ok(())
    }

    fn assemble(file: ModelFile) -> Result<LoadedModel> {
        let tokenizer = Tokenizer::new(file.vocab)?;
        let vocab_size = tokenizer.vocab_size() as u32;

        let mut transitions = HashMap::with_capacity(file.transitions.len());
        for (key, nexts) in file.transitions {
            let from: u32 = key
                .parse()
                .with_context(|| format!("non-numeric transition key {key:?}"))?;
            if from >= vocab_size || nexts.iter().any(|(to, _)| *to >= vocab_size) {
                return Err(anyhow_out_of_range(from).into());
            }
            transitions.insert(from, nexts);
        }

        Ok(LoadedModel {
            tokenizer,
            transitions,
            advisories: file.advisories,
        })
    }

    /// Release the model. Waits for every in-flight inference to finish.
    pub async fn unload(&self) {
        let mut state = self.state.write().await;
        if state.take().is_some() {
            tracing::info!("local model unloaded");
        }
    }

    pub async fn is_loaded(&self) -> bool {
        self.state.read().await.is_some()
    }

    /// Run a bounded, deterministic generation for the prompt.
    pub async fn infer(&self, prompt: &Prompt) -> Result<String> {
        let state = self.state.read().await;
        let model = state.as_ref().ok_or(Error::ModelNotLoaded)?;

        let advisory = model
            .advisories
            .get(prompt.tool.as_str())
            .or_else(|| model.advisories.get("default"))
            .map(|s| s.trim().to_string())
            .unwrap_or_default();

        let generated = self.generate(model, &prompt.user);

        let text = match (advisory.is_empty(), generated.is_empty()) {
            (false, false) => format!("{advisory}\n\n{generated}"),
            (false, true) => advisory,
            (true, false) => generated,
            (true, true) => {
                "The local model produced no additional commentary for this input.".to_string()
            }
        };
        Ok(text)
    }

    /// Greedy walk of the transition table seeded by the prompt's last
    /// token. Halts on the end marker or the generation bound, whichever
    /// comes first. Ties in transition weight break toward the lower id,
    /// so generation is fully deterministic.
    fn generate(&self, model: &LoadedModel, seed_text: &str) -> String {
        let seed_ids = model.tokenizer.encode(seed_text);
        let mut current = match seed_ids.iter().rev().find(|&&id| id != model.tokenizer.unk_id()) {
            Some(&id) => id,
            None => return String::new(),
        };

        let end_id = model.tokenizer.end_id();
        let mut generated = Vec::new();
        while generated.len() < self.max_tokens {
            let next = model.transitions.get(&current).and_then(|nexts| {
                nexts
                    .iter()
                    .copied()
                    .max_by(|(a_id, a_w), (b_id, b_w)| {
                        a_w.total_cmp(b_w).then(b_id.cmp(a_id))
                    })
                    .map(|(id, _)| id)
            });
            match next {
                Some(id) if id != end_id => {
                    generated.push(id);
                    current = id;
                }
                _ => break,
            }
        }
        model.tokenizer.decode(&generated)
    }
}

fn anyhow_out_of_range(from: u32) -> anyhow::Error {
    anyhow::anyhow!("transition table references token id out of vocabulary range (from {from})")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::{ToolClassification, ToolKind};
    use crate::report::ReportMode;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn model_json() -> String {
        // vocab ids: 0 <unk>, 1 <end>, 2 " ", 3 "check", 4 "the", 5 "ssh",
        // 6 "config", 7..: chars
        let mut vocab = vec![
            "<unk>".to_string(),
            "<end>".to_string(),
            " ".to_string(),
            "check".to_string(),
            "the".to_string(),
            "ssh".to_string(),
            "config".to_string(),
        ];
        vocab.extend("abcdefghijklmnopqrstuvwxyz:./0123456789\n".chars().map(String::from));

        serde_json::json!({
            "vocab": vocab,
            "transitions": {
                // "config" -> " " -> "check" -> " " -> "the" -> " " -> "ssh" -> <end>
                "6": [[2, 1.0]],
                "2": [[3, 0.9], [4, 0.1]],
                "3": [[2, 1.0]],
                // after "check" we always emit a space, then "the"; steer via weights
                "4": [[2, 0.2], [5, 0.8]],
                "5": [[1, 1.0]]
            },
            "advisories": {
                "nmap": "Review each open port and confirm it is intentionally exposed.",
                "default": "Review the findings below."
            }
        })
        .to_string()
    }

    fn model_file() -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(model_json().as_bytes()).unwrap();
        file
    }

    fn prompt_for(tool: ToolKind, text: &str) -> Prompt {
        let c = ToolClassification {
            tool,
            confidence: 0.9,
        };
        crate::prompt::build(&c, text, ReportMode::Explain, 8192, "en").unwrap()
    }

    #[tokio::test]
    async fn infer_before_load_fails() {
        let engine = LocalInferenceEngine::new(32);
        let err = engine
            .infer(&prompt_for(ToolKind::Nmap, "22/tcp open ssh"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelNotLoaded));
    }

    #[tokio::test]
    async fn load_then_infer_includes_tool_advisory() {
        let file = model_file();
        let engine = LocalInferenceEngine::new(32);
        engine.load(file.path()).await.unwrap();
        assert!(engine.is_loaded().await);

        let out = engine
            .infer(&prompt_for(ToolKind::Nmap, "22/tcp open ssh"))
            .await
            .unwrap();
        assert!(out.contains("open port"));
    }

    #[tokio::test]
    async fn unknown_tool_uses_default_advisory() {
        let file = model_file();
        let engine = LocalInferenceEngine::new(32);
        engine.load(file.path()).await.unwrap();

        let out = engine
            .infer(&prompt_for(ToolKind::Unknown, "mystery text"))
            .await
            .unwrap();
        assert!(out.contains("Review the findings below."));
    }

    #[tokio::test]
    async fn unload_then_infer_fails() {
        let file = model_file();
        let engine = LocalInferenceEngine::new(32);
        engine.load(file.path()).await.unwrap();
        engine.unload().await;
        assert!(!engine.is_loaded().await);

        let err = engine
            .infer(&prompt_for(ToolKind::Nmap, "x"))
            .await
            .unwrap_err();
        assert!(matches!(err, Error::ModelNotLoaded));
    }

    #[tokio::test]
    async fn inference_is_deterministic() {
        let file = model_file();
        let engine = LocalInferenceEngine::new(32);
        engine.load(file.path()).await.unwrap();

        let prompt = prompt_for(ToolKind::Nmap, "scan output here");
        let a = engine.infer(&prompt).await.unwrap();
        let b = engine.infer(&prompt).await.unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn generation_respects_token_bound() {
        // A self-loop that never reaches <end>: id 2 (" ") -> id 2 forever.
        let mut vocab = vec!["<unk>".to_string(), "<end>".to_string(), " ".to_string()];
        vocab.push("x".to_string());
        let json = serde_json::json!({
            "vocab": vocab,
            "transitions": { "2": [[2, 1.0]], "3": [[2, 1.0]] },
            "advisories": {}
        })
        .to_string();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let engine = LocalInferenceEngine::new(5);
        engine.load(file.path()).await.unwrap();
        let out = engine.infer(&prompt_for(ToolKind::Unknown, "x")).await.unwrap();
        // no advisory configured, so the output is exactly the generated
        // pieces: five single-space tokens
        assert_eq!(out, " ".repeat(5));
    }

    #[tokio::test]
    async fn missing_model_file_errors() {
        let engine = LocalInferenceEngine::new(32);
        assert!(engine.load(Path::new("/nonexistent/model.json")).await.is_err());
        assert!(!engine.is_loaded().await);
    }

    #[tokio::test]
    async fn out_of_range_transition_rejected() {
        let json = serde_json::json!({
            "vocab": ["<unk>", "<end>"],
            "transitions": { "0": [[99, 1.0]] },
            "advisories": {}
        })
        .to_string();
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();

        let engine = LocalInferenceEngine::new(32);
        assert!(engine.load(file.path()).await.is_err());
    }

    #[tokio::test]
    async fn reload_replaces_previous_model() {
        let file = model_file();
        let engine = LocalInferenceEngine::new(32);
        engine.load(file.path()).await.unwrap();
        engine.load(file.path()).await.unwrap();
        assert!(engine.is_loaded().await);
    }
}
