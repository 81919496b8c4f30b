//! Pipeline error taxonomy.
//!
//! Per-provider failures are absorbed inside the router and retried against
//! the next backend; only input-level errors and full exhaustion reach the
//! caller. Every fatal variant maps to a distinct exit status so shell
//! callers can branch on `$?`.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    /// Nothing to analyze after normalization. User error, surfaced immediately.
    #[error("nothing to analyze: input was empty")]
    EmptyInput,

    /// The payload cannot fit the prompt template even after truncation.
    #[error(
        "input cannot fit the prompt template within max_context = {budget} bytes; \
         raise max_context in the config or pre-filter the input"
    )]
    ContextOverflow { budget: usize },

    /// A single backend failed its health check or call. Absorbed by the
    /// router during fallback; only surfaced when logging the skip.
    #[error("provider '{name}' unavailable: {reason}")]
    ProviderUnavailable { name: String, reason: String },

    /// Every candidate backend was tried and none produced a response.
    #[error("all configured providers exhausted; no backend could produce a response")]
    AllProvidersExhausted,

    /// The local engine was invoked before `load` or after `unload`.
    #[error("local model not loaded; check [local].model_path in the config")]
    ModelNotLoaded,

    /// A concurrent computation for the same fingerprint failed; all waiters
    /// observe the leader's failure message.
    #[error("analysis failed: {0}")]
    Compute(String),

    /// Waiting on an in-flight computation exceeded the cache wait timeout.
    #[error("timed out waiting for an in-flight computation of the same request")]
    CacheWaitTimeout,

    #[error("config: {0}")]
    Config(String),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Exit status for the CLI. Input-level mistakes exit 2, everything
    /// else fatal exits 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::EmptyInput | Self::ContextOverflow { .. } | Self::Config(_) => 2,
            _ => 1,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
