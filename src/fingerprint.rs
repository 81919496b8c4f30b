//! Content-addressed request fingerprints.
//!
//! A fingerprint is a SHA-256 digest over the normalized payload plus every
//! input that changes the answer: report mode, provider identity, model
//! identity, and the prompt template version. Identical logical requests
//! always hash the same; bumping the template version invalidates every
//! prior cache entry by design.

use crate::error::{Error, Result};
use crate::report::ReportMode;
use sha2::{Digest, Sha256};

/// Hex-encoded SHA-256 cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Normalize a payload so byte-identical logical content from different
/// line-ending conventions maps to one fingerprint: CRLF/CR become LF,
/// trailing whitespace is stripped per line, trailing blank lines dropped.
pub fn normalize(payload: &[u8]) -> String {
    let text = String::from_utf8_lossy(payload);
    let unified = text.replace("\r\n", "\n").replace('\r', "\n");
    let mut lines: Vec<&str> = unified.lines().map(|l| l.trim_end()).collect();
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    lines.join("\n")
}

/// Compute the fingerprint for a logical request. Pure and deterministic;
/// fails only on an empty (post-normalization) payload.
pub fn fingerprint(
    payload: &[u8],
    mode: ReportMode,
    provider_id: &str,
    model_id: &str,
    template_version: &str,
) -> Result<Fingerprint> {
    let normalized = normalize(payload);
    if normalized.trim().is_empty() {
        return Err(Error::EmptyInput);
    }

    // Length-prefixed fields so "ab"+"c" and "a"+"bc" cannot collide.
    let mut hasher = Sha256::new();
    for field in [
        normalized.as_str(),
        mode.as_str(),
        provider_id,
        model_id,
        template_version,
    ] {
        hasher.update((field.len() as u64).to_le_bytes());
        hasher.update(field.as_bytes());
    }
    Ok(Fingerprint(hex::encode(hasher.finalize())))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn deterministic_across_calls() {
        let a = fingerprint(b"Nmap scan report", ReportMode::Summary, "ollama", "llama3", "v1")
            .unwrap();
        let b = fingerprint(b"Nmap scan report", ReportMode::Summary, "ollama", "llama3", "v1")
            .unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn line_endings_normalize_to_same_key() {
        let unix = fingerprint(b"line one\nline two\n", ReportMode::Explain, "p", "m", "v1").unwrap();
        let dos = fingerprint(b"line one\r\nline two\r\n", ReportMode::Explain, "p", "m", "v1").unwrap();
        let mac = fingerprint(b"line one\rline two\r", ReportMode::Explain, "p", "m", "v1").unwrap();
        assert_eq!(unix, dos);
        assert_eq!(unix, mac);
    }

    #[test]
    fn trailing_whitespace_ignored() {
        let a = fingerprint(b"payload   \n\n\n", ReportMode::Explain, "p", "m", "v1").unwrap();
        let b = fingerprint(b"payload", ReportMode::Explain, "p", "m", "v1").unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn mode_changes_key() {
        let a = fingerprint(b"payload", ReportMode::Explain, "p", "m", "v1").unwrap();
        let b = fingerprint(b"payload", ReportMode::Summary, "p", "m", "v1").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn template_version_changes_key() {
        let a = fingerprint(b"payload", ReportMode::Explain, "p", "m", "v1").unwrap();
        let b = fingerprint(b"payload", ReportMode::Explain, "p", "m", "v2").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn provider_and_model_change_key() {
        let a = fingerprint(b"payload", ReportMode::Explain, "ollama", "llama3", "v1").unwrap();
        let b = fingerprint(b"payload", ReportMode::Explain, "openai", "llama3", "v1").unwrap();
        let c = fingerprint(b"payload", ReportMode::Explain, "ollama", "qwen3", "v1").unwrap();
        assert_ne!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn empty_payload_rejected() {
        assert!(matches!(
            fingerprint(b"", ReportMode::Explain, "p", "m", "v1"),
            Err(Error::EmptyInput)
        ));
        assert!(matches!(
            fingerprint(b"  \r\n \n", ReportMode::Explain, "p", "m", "v1"),
            Err(Error::EmptyInput)
        ));
    }

    #[test]
    fn field_boundaries_do_not_collide() {
        let a = fingerprint(b"ab", ReportMode::Explain, "c", "m", "v1").unwrap();
        let b = fingerprint(b"a", ReportMode::Explain, "bc", "m", "v1").unwrap();
        assert_ne!(a, b);
    }
}
