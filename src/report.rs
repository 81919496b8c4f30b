//! Report shaping.
//!
//! Takes a provider's raw text and renders the requested output shape:
//! a detailed explanation, a vulnerability summary with findings lifted
//! straight from the payload, or an ordered command playbook. Playbook
//! parsing tolerates free-text responses by degrading to one unstructured
//! block instead of failing.

use crate::classifier::{ToolClassification, ToolKind};
use crate::providers::RawResponse;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt::Write;
use std::sync::LazyLock;

/// What the caller wants out of the analysis.
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ReportMode {
    /// Detailed natural-language explanation.
    Explain,
    /// Condensed vulnerability summary.
    Summary,
    /// Ordered follow-up command playbook.
    NextSteps,
}

impl ReportMode {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Explain => "explain",
            Self::Summary => "summary",
            Self::NextSteps => "next-steps",
        }
    }
}

impl std::fmt::Display for ReportMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One suggested follow-up action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlaybookStep {
    pub command: String,
    pub rationale: String,
}

/// Ordered follow-up actions parsed from provider output.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Playbook {
    pub steps: Vec<PlaybookStep>,
    /// Set when the provider's text did not parse into discrete steps and
    /// is carried verbatim instead.
    pub freeform: Option<String>,
}

/// The formatted result handed back to the caller.
#[derive(Debug, Clone)]
pub struct Report {
    pub body: String,
    pub provider: String,
    pub model: String,
}

// Numbered step: "1. nmap -sV host -- confirm service versions"
// The command may be wrapped in backticks; the rationale separator is
// " -- " or its em-dash variant, matching the shape the next-steps
// template asks for.
static NUMBERED_STEP: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^\s*\d+[.)]\s+(.+)$").expect("static regex")
});
static SHELL_STEP: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?m)^\s*\$\s+(.+)$").expect("static regex"));

/// Render the provider response into the requested shape.
pub fn format(
    raw: &RawResponse,
    mode: ReportMode,
    classification: &ToolClassification,
    payload: &str,
) -> Report {
    let body = match mode {
        ReportMode::Explain => render_explain(raw, classification),
        ReportMode::Summary => render_summary(raw, classification, payload),
        ReportMode::NextSteps => render_playbook(&parse_playbook(&raw.text)),
    };
    Report {
        body,
        provider: raw.provider.clone(),
        model: raw.model.clone(),
    }
}

fn render_explain(raw: &RawResponse, classification: &ToolClassification) -> String {
    format!(
        "# Analysis — {}\n\n{}\n",
        classification.tool.as_str(),
        raw.text.trim()
    )
}

fn render_summary(
    raw: &RawResponse,
    classification: &ToolClassification,
    payload: &str,
) -> String {
    let mut out = format!("# Summary — {}\n", classification.tool.as_str());
    let highlights = extract_highlights(classification.tool, payload);
    if !highlights.is_empty() {
        out.push_str("\n## Key findings\n");
        for line in &highlights {
            let _ = writeln!(out, "- {line}");
        }
    }
    out.push_str("\n## Assessment\n");
    out.push_str(raw.text.trim());
    out.push('\n');
    out
}

fn render_playbook(playbook: &Playbook) -> String {
    if let Some(text) = &playbook.freeform {
        return format!("# Next steps\n\n{}\n", text.trim());
    }
    let mut out = String::from("# Next steps\n\n");
    for (i, step) in playbook.steps.iter().enumerate() {
        let _ = writeln!(out, "{}. `{}`", i + 1, step.command);
        if !step.rationale.is_empty() {
            let _ = writeln!(out, "   {}", step.rationale);
        }
    }
    out
}

/// Lines worth surfacing verbatim in a summary, selected per tool. Capped
/// so a huge scan cannot flood the report.
pub fn extract_highlights(tool: ToolKind, payload: &str) -> Vec<String> {
    const MAX_HIGHLIGHTS: usize = 20;

    let keep: fn(&str) -> bool = match tool {
        ToolKind::Nmap => |l| (l.contains("/tcp") || l.contains("/udp")) && l.contains("open"),
        ToolKind::Nikto => |l| l.trim_start().starts_with("+ "),
        ToolKind::Dirb => {
            |l| l.contains("==> DIRECTORY") || l.contains("CODE:") || l.contains("(Status:")
        }
        ToolKind::Metasploit => |l| {
            let t = l.trim_start();
            t.starts_with("[+]") || t.starts_with("[*]")
        },
        ToolKind::Syslog => |l| {
            let lower = l.to_lowercase();
            ["failed", "invalid", "denied", "error", "refused"]
                .iter()
                .any(|kw| lower.contains(kw))
        },
        ToolKind::Pcap | ToolKind::Unknown => return Vec::new(),
    };

    payload
        .lines()
        .filter(|l| keep(l))
        .take(MAX_HIGHLIGHTS)
        .map(|l| l.trim().to_string())
        .collect()
}

/// Parse provider text into discrete steps. Accepts numbered lists and
/// `$`-prefixed shell lines; anything else becomes a single freeform block.
pub fn parse_playbook(text: &str) -> Playbook {
    let mut steps = Vec::new();

    for cap in NUMBERED_STEP.captures_iter(text) {
        steps.push(split_step(&cap[1]));
    }
    if steps.is_empty() {
        for cap in SHELL_STEP.captures_iter(text) {
            steps.push(split_step(&cap[1]));
        }
    }

    if steps.is_empty() {
        Playbook {
            steps,
            freeform: Some(text.to_string()),
        }
    } else {
        Playbook {
            steps,
            freeform: None,
        }
    }
}

/// Split "command -- rationale" (or the em-dash variant), stripping
/// backticks around the command. Separators require surrounding spaces so
/// long flags like `--script` are never mistaken for one.
fn split_step(line: &str) -> PlaybookStep {
    let (command, rationale) = [" -- ", " — "]
        .iter()
        .filter_map(|sep| line.split_once(sep))
        .next()
        .map(|(c, r)| (c, r.trim().to_string()))
        .unwrap_or((line, String::new()));

    PlaybookStep {
        command: command.trim().trim_matches('`').trim().to_string(),
        rationale,
    }
}
