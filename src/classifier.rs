//! Heuristic detection of the tool that produced a payload.
//!
//! Rules are checked in a fixed priority order; the first match wins, so a
//! payload containing both nmap and syslog markers is attributed to the
//! higher-priority rule, not to whichever token appears first. No match is
//! not an error: the pipeline degrades to a generic prompt template.

use serde::{Deserialize, Serialize};

/// pcap magic numbers: classic little/big endian, nanosecond variants,
/// and the pcapng section header block type.
const PCAP_MAGICS: &[[u8; 4]] = &[
    [0xd4, 0xc3, 0xb2, 0xa1],
    [0xa1, 0xb2, 0xc3, 0xd4],
    [0x4d, 0x3c, 0xb2, 0xa1],
    [0xa1, 0xb2, 0x3c, 0x4d],
    [0x0a, 0x0d, 0x0d, 0x0a],
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolKind {
    Nmap,
    Dirb,
    Nikto,
    Pcap,
    Metasploit,
    Syslog,
    Unknown,
}

impl ToolKind {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Nmap => "nmap",
            Self::Dirb => "dirb",
            Self::Nikto => "nikto",
            Self::Pcap => "pcap",
            Self::Metasploit => "metasploit",
            Self::Syslog => "syslog",
            Self::Unknown => "unknown",
        }
    }

    /// Scan reports carry their most important content up front (summary
    /// header); logs carry it at the tail (most recent events). Truncation
    /// strategy follows suit.
    pub fn is_head_weighted(&self) -> bool {
        matches!(self, Self::Nmap | Self::Dirb | Self::Nikto | Self::Metasploit)
    }
}

/// Classification result: detected tool plus a confidence score in [0, 1].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ToolClassification {
    pub tool: ToolKind,
    pub confidence: f64,
}

impl ToolClassification {
    fn unknown() -> Self {
        Self {
            tool: ToolKind::Unknown,
            confidence: 0.0,
        }
    }
}

/// One signature rule: tool, base confidence, and the tokens that vote for
/// it. A rule matches if any token is present; each extra token nudges the
/// confidence up slightly (capped below 1.0).
struct Rule {
    tool: ToolKind,
    base_confidence: f64,
    tokens: &'static [&'static str],
}

/// Priority order. Earlier rules win on multi-tool payloads: a metasploit
/// session quoting nmap output is still a metasploit transcript only if
/// nothing above it matched, so nmap outranks it here.
const RULES: &[Rule] = &[
    Rule {
        tool: ToolKind::Nmap,
        base_confidence: 0.85,
        tokens: &[
            "nmap scan report",
            "starting nmap",
            "nmap done:",
            "port     state service",
            "port   state service",
        ],
    },
    Rule {
        tool: ToolKind::Nikto,
        base_confidence: 0.8,
        tokens: &["- nikto v", "+ server:", "+ target ip:", "+ target hostname:"],
    },
    Rule {
        tool: ToolKind::Dirb,
        base_confidence: 0.8,
        tokens: &[
            "dirb v",
            "---- scanning url",
            "==> directory:",
            "gobuster v",
            "[+] url:",
            "(status:",
        ],
    },
    Rule {
        tool: ToolKind::Metasploit,
        base_confidence: 0.75,
        tokens: &[
            "msf6",
            "msf5",
            "msf >",
            "meterpreter >",
            "exploit completed",
            "[*] started reverse tcp handler",
        ],
    },
    Rule {
        tool: ToolKind::Pcap,
        base_confidence: 0.7,
        tokens: &["tcpdump: listening on", "packets captured", "wireshark", "tshark"],
    },
    Rule {
        tool: ToolKind::Syslog,
        base_confidence: 0.65,
        tokens: &[
            "sshd[",
            "kernel:",
            "systemd[1]:",
            "fail2ban",
            "sudo:",
            "pam_unix(",
            "cron[",
        ],
    },
];

/// Classify a payload. Binary pcap is recognized by magic bytes before any
/// text heuristics run; everything else is matched case-insensitively
/// against the rule table. Pure, so classifying twice always agrees.
pub fn classify(payload: &[u8]) -> ToolClassification {
    if payload.len() >= 4 && PCAP_MAGICS.iter().any(|m| payload.starts_with(m)) {
        return ToolClassification {
            tool: ToolKind::Pcap,
            confidence: 0.95,
        };
    }

    let text = String::from_utf8_lossy(payload).to_lowercase();
    for rule in RULES {
        let hits = rule.tokens.iter().filter(|t| text.contains(**t)).count();
        if hits > 0 {
            let confidence =
                (rule.base_confidence + 0.05 * (hits.saturating_sub(1)) as f64).min(0.99);
            return ToolClassification {
                tool: rule.tool,
                confidence,
            };
        }
    }

    ToolClassification::unknown()
}
