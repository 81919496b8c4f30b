//! Configuration loading for sherlog.
//!
//! A single TOML file supplies the provider priority list, cache location
//! and limits, and the prompt budget. The parsed `Config` is an explicit
//! object handed to each component at construction; nothing reads it from
//! ambient global state.

use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Remote provider names the router knows how to construct.
pub const KNOWN_REMOTE_PROVIDERS: &[&str] = &["anthropic", "openai", "ollama"];

/// Name reserved for the local inference engine in priority lists.
pub const LOCAL_PROVIDER_NAME: &str = "local";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    /// Where cache entries persist across runs.
    pub cache_dir: PathBuf,
    /// Default output shape: "detailed" or "summary".
    pub response_format: String,
    /// Prompt byte budget, template scaffolding included.
    pub max_context: usize,
    /// Default backend name; empty means "first configured".
    pub provider: String,
    /// Force local-only routing regardless of configured remotes.
    pub offline: bool,
    /// Language hint injected into prompts (ISO 639-1).
    pub language: String,
    /// LRU capacity of the response cache.
    pub cache_capacity: usize,
    /// Absolute TTL for cache entries, in seconds.
    pub cache_ttl_secs: u64,
    /// Upper bound on stdin/file reads.
    pub max_input_bytes: usize,
    /// Per-call timeout for remote providers, in seconds.
    pub provider_timeout_secs: u64,
    /// How long a request waits on an identical in-flight computation.
    pub cache_wait_secs: u64,
    /// Remote backends in priority order.
    pub providers: Vec<ProviderConfig>,
    /// Local engine settings.
    pub local: LocalConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ProviderConfig {
    pub name: String,
    /// Env var holding the API key. Keys are never stored inline.
    #[serde(default)]
    pub api_key_env: Option<String>,
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct LocalConfig {
    /// Path to the compact model file (vocab + transitions + advisories).
    pub model_path: PathBuf,
    /// Generation bound for the local engine.
    pub max_tokens: usize,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_dir: default_cache_dir(),
            response_format: "detailed".into(),
            max_context: 8192,
            provider: String::new(),
            offline: false,
            language: "en".into(),
            cache_capacity: 512,
            cache_ttl_secs: 86_400,
            max_input_bytes: 1_048_576,
            provider_timeout_secs: 60,
            cache_wait_secs: 120,
            providers: Vec::new(),
            local: LocalConfig::default(),
        }
    }
}

impl Default for LocalConfig {
    fn default() -> Self {
        Self {
            model_path: default_data_dir().join("model.json"),
            max_tokens: 256,
        }
    }
}

fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "sherlog", "sherlog")
        .map(|d| d.cache_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".sherlog/cache"))
}

fn default_data_dir() -> PathBuf {
    directories::ProjectDirs::from("dev", "sherlog", "sherlog")
        .map(|d| d.data_dir().to_path_buf())
        .unwrap_or_else(|| PathBuf::from(".sherlog"))
}

/// Default config file location (`~/.config/sherlog/config.toml` on Linux).
pub fn default_config_path() -> Option<PathBuf> {
    directories::ProjectDirs::from("dev", "sherlog", "sherlog")
        .map(|d| d.config_dir().join("config.toml"))
}

impl Config {
    /// Load from an explicit path, or the default location. A missing
    /// default file yields `Config::default()`; a missing explicit path is
    /// an error.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let (path, required) = match path {
            Some(p) => (p.to_path_buf(), true),
            None => match default_config_path() {
                Some(p) => (p, false),
                None => return Ok(Self::default()),
            },
        };

        if !path.exists() {
            if required {
                return Err(Error::Config(format!(
                    "config file not found: {}",
                    path.display()
                )));
            }
            tracing::debug!(path = %path.display(), "no config file, using defaults");
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(&path)
            .map_err(|e| Error::Config(format!("failed to read {}: {e}", path.display())))?;
        let mut config: Config = toml::from_str(&raw)
            .map_err(|e| Error::Config(format!("failed to parse {}: {e}", path.display())))?;
        config.expand_paths();
        config.validate()?;
        Ok(config)
    }

    /// Expand `~` in user-supplied paths.
    fn expand_paths(&mut self) {
        self.cache_dir = expand_tilde(&self.cache_dir);
        self.local.model_path = expand_tilde(&self.local.model_path);
    }

    fn validate(&self) -> Result<()> {
        for p in &self.providers {
            if !KNOWN_REMOTE_PROVIDERS.contains(&p.name.as_str())
                && p.name != LOCAL_PROVIDER_NAME
            {
                return Err(Error::Config(format!(
                    "unknown provider '{}' (expected one of: {}, local)",
                    p.name,
                    KNOWN_REMOTE_PROVIDERS.join(", ")
                )));
            }
        }
        if !matches!(self.response_format.as_str(), "detailed" | "summary") {
            return Err(Error::Config(format!(
                "response_format must be \"detailed\" or \"summary\", got \"{}\"",
                self.response_format
            )));
        }
        if self.max_context < 256 {
            return Err(Error::Config(
                "max_context must be at least 256 bytes".into(),
            ));
        }
        Ok(())
    }

    /// Configured model name for a provider, if any.
    pub fn provider_model(&self, name: &str) -> Option<&str> {
        self.providers
            .iter()
            .find(|p| p.name == name)
            .and_then(|p| p.model.as_deref())
    }

    /// The backend a request without an override should prefer.
    pub fn default_provider(&self) -> Option<&str> {
        if !self.provider.is_empty() {
            return Some(self.provider.as_str());
        }
        self.providers.first().map(|p| p.name.as_str())
    }
}

fn expand_tilde(path: &Path) -> PathBuf {
    let s = path.to_string_lossy();
    PathBuf::from(shellexpand::tilde(s.as_ref()).into_owned())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.response_format, "detailed");
        assert!(config.max_context >= 256);
        assert!(!config.offline);
        assert!(config.providers.is_empty());
    }

    #[test]
    fn load_full_config() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
cache_dir = "/tmp/sherlog-test-cache"
response_format = "summary"
max_context = 4096
provider = "ollama"
offline = false
language = "fi"

[[providers]]
name = "anthropic"
api_key_env = "ANTHROPIC_API_KEY"
model = "claude-sonnet-4-20250514"

[[providers]]
name = "ollama"
endpoint = "http://127.0.0.1:11434"
model = "llama3"

[local]
model_path = "/tmp/model.json"
max_tokens = 128
"#
        )
        .unwrap();

        let config = Config::load(Some(file.path())).unwrap();
        assert_eq!(config.response_format, "summary");
        assert_eq!(config.default_provider(), Some("ollama"));
        assert_eq!(config.provider_model("ollama"), Some("llama3"));
        assert_eq!(config.local.max_tokens, 128);
        assert_eq!(config.language, "fi");
    }

    #[test]
    fn unknown_provider_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "[[providers]]\nname = \"skynet\"\n").unwrap();
        let err = Config::load(Some(file.path())).unwrap_err();
        assert!(err.to_string().contains("skynet"));
        assert_eq!(err.exit_code(), 2);
    }

    #[test]
    fn bad_response_format_rejected() {
        let mut file = NamedTempFile::new().unwrap();
        write!(file, "response_format = \"haiku\"\n").unwrap();
        assert!(Config::load(Some(file.path())).is_err());
    }

    #[test]
    fn missing_explicit_path_is_error() {
        let err = Config::load(Some(Path::new("/nonexistent/sherlog.toml"))).unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[test]
    fn default_provider_falls_back_to_first_configured() {
        let mut config = Config::default();
        config.providers.push(ProviderConfig {
            name: "openai".into(),
            api_key_env: Some("OPENAI_API_KEY".into()),
            endpoint: None,
            model: None,
        });
        assert_eq!(config.default_provider(), Some("openai"));
    }
}
