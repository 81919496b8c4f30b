//! Prompt construction.
//!
//! Turns (classification, payload, mode) into a system + user prompt pair.
//! The payload is truncated to the configured context budget: scan reports
//! keep their head (the summary banner matters most), logs keep their tail
//! (the most recent lines matter most).

use crate::classifier::{ToolClassification, ToolKind};
use crate::error::{Error, Result};
use crate::report::ReportMode;

/// Version of the prompt templates below. Included in every fingerprint,
/// so bumping it invalidates all previously cached responses. Bump on any
/// change to the template text or truncation behavior.
pub const PROMPT_TEMPLATE_VERSION: &str = "2026.08.1";

/// Truncation never goes below this many payload bytes; if even that does
/// not fit the budget alongside the scaffolding, the request fails.
const MIN_PAYLOAD_BYTES: usize = 64;

const TRUNCATION_MARKER: &str = "[... truncated ...]";

/// A structured prompt ready for any provider.
#[derive(Debug, Clone)]
pub struct Prompt {
    pub system: String,
    pub user: String,
    pub tool: ToolKind,
}

impl Prompt {
    /// Total byte size, which is what the context budget constrains.
    pub fn len(&self) -> usize {
        self.system.len() + self.user.len()
    }

    pub fn is_empty(&self) -> bool {
        self.system.is_empty() && self.user.is_empty()
    }
}

fn system_for(mode: ReportMode, language: &str) -> String {
    let task = match mode {
        ReportMode::Explain => {
            "Explain what this security tool output shows: what was scanned or logged, \
             what stands out, and what it means for the operator. Be precise and technical."
        }
        ReportMode::Summary => {
            "Summarize this security tool output: the key findings, exposed services or \
             suspicious events, and their severity. Keep it short and factual."
        }
        ReportMode::NextSteps => {
            "Given this security tool output, produce an ordered list of concrete follow-up \
             commands. Format each step as a numbered line: the command, then ' -- ', then a \
             one-sentence rationale. Suggest only investigation and hardening actions."
        }
    };
    let mut system = format!(
        "You are a security analysis assistant reviewing output from defensive \
         assessments the operator is authorized to run. {task}"
    );
    if !language.is_empty() && language != "en" {
        system.push_str(&format!(" Respond in language code '{language}'."));
    }
    system
}

fn describe_tool(classification: &ToolClassification) -> String {
    match classification.tool {
        ToolKind::Unknown => "unrecognized (treat as a generic security log)".to_string(),
        tool => format!(
            "{} (detected with confidence {:.2})",
            tool.as_str(),
            classification.confidence
        ),
    }
}

/// Build the prompt, truncating the payload to fit `max_context` bytes of
/// total prompt. Fails with `ContextOverflow` only when the minimal
/// scaffolding plus `MIN_PAYLOAD_BYTES` of payload cannot fit.
pub fn build(
    classification: &ToolClassification,
    payload: &str,
    mode: ReportMode,
    max_context: usize,
    language: &str,
) -> Result<Prompt> {
    let system = system_for(mode, language);
    let header = format!("Tool: {}\n\nOutput:\n", describe_tool(classification));
    let scaffold = system.len() + header.len() + TRUNCATION_MARKER.len() + 1;

    if max_context < scaffold + MIN_PAYLOAD_BYTES {
        return Err(Error::ContextOverflow { budget: max_context });
    }

    let budget = max_context - scaffold;
    let body = if payload.len() <= budget {
        payload.to_string()
    } else if classification.tool.is_head_weighted() {
        let head = take_prefix(payload, budget);
        format!("{head}\n{TRUNCATION_MARKER}")
    } else {
        let tail = take_suffix(payload, budget);
        format!("{TRUNCATION_MARKER}\n{tail}")
    };

    Ok(Prompt {
        system,
        user: format!("{header}{body}"),
        tool: classification.tool,
    })
}

/// Longest prefix within `budget` bytes, cut at a line boundary when one
/// exists, otherwise at a char boundary.
fn take_prefix(text: &str, budget: usize) -> &str {
    if text.len() <= budget {
        return text;
    }
    let cut = floor_char_boundary(text, budget);
    match text[..cut].rfind('\n') {
        Some(nl) if nl > 0 => &text[..nl],
        _ => &text[..cut],
    }
}

/// Longest suffix within `budget` bytes, cut at a line boundary when one
/// exists.
fn take_suffix(text: &str, budget: usize) -> &str {
    if text.len() <= budget {
        return text;
    }
    let start = ceil_char_boundary(text, text.len() - budget);
    match text[start..].find('\n') {
        Some(nl) if start + nl + 1 < text.len() => &text[start + nl + 1..],
        _ => &text[start..],
    }
}

fn floor_char_boundary(text: &str, mut idx: usize) -> usize {
    if idx >= text.len() {
        return text.len();
    }
    while !text.is_char_boundary(idx) {
        idx -= 1;
    }
    idx
}

fn ceil_char_boundary(text: &str, mut idx: usize) -> usize {
    while idx < text.len() && !text.is_char_boundary(idx) {
        idx += 1;
    }
    idx
}
