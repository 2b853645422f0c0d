//! Structure checks and extraction for role responses.
//!
//! Responses are expected to open with `## Design`, follow it with meta
//! sections (rationale, changes, convergence status) and close with the
//! role's hand-off marker. Nothing here fails hard: deviations become turn
//! warnings and extraction falls back to the whole response.

use parley_proto::Role;
use std::fmt;

/// Headings that end the design body.
const META_SECTIONS: &[&str] = &[
    "rationale",
    "what i changed",
    "what i kept",
    "what i incorporated",
    "what i improved",
    "open questions",
    "convergence",
    "prompt for",
    "prompt_for",
    "remaining",
];

const PREVIEW_LINES: usize = 5;
const PREVIEW_WIDTH: usize = 80;

/// A deviation from the expected response layout.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FormatViolation {
    /// Text appeared before the `## Design` header.
    Preamble {
        /// 1-based line of the design header.
        header_line: usize,
        /// First preamble lines, trimmed for display.
        preview: Vec<String>,
    },
    /// No `## Design` header at all.
    MissingHeader,
}

impl FormatViolation {
    /// Renders the violation for a specific role.
    pub fn message(&self, role: Role) -> String {
        match self {
            FormatViolation::Preamble {
                header_line,
                preview,
            } => {
                let mut msg = format!(
                    "{} violated format requirements: preamble before '## Design' (found at line {})",
                    role.label(),
                    header_line
                );
                for line in preview {
                    msg.push_str("\n  > ");
                    msg.push_str(line);
                }
                msg
            }
            FormatViolation::MissingHeader => {
                format!("{} response missing '## Design' section header", role.label())
            }
        }
    }
}

impl fmt::Display for FormatViolation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FormatViolation::Preamble { header_line, .. } => {
                write!(f, "preamble before design header at line {}", header_line)
            }
            FormatViolation::MissingHeader => f.write_str("missing design header"),
        }
    }
}

fn is_design_header(line: &str) -> bool {
    let trimmed = line.trim();
    (trimmed.starts_with("## ") || trimmed.starts_with("### "))
        && trimmed.trim_start_matches('#').trim().eq_ignore_ascii_case("design")
}

fn is_meta_heading(line: &str) -> bool {
    let trimmed = line.trim();
    if !trimmed.starts_with('#') {
        return false;
    }
    let lower = trimmed.to_lowercase();
    META_SECTIONS.iter().any(|meta| lower.contains(meta))
}

fn is_handoff_line(line: &str) -> bool {
    line.trim().trim_start_matches('*').starts_with("PROMPT_FOR_")
}

/// Checks the response layout.
pub fn check_format(raw: &str) -> Option<FormatViolation> {
    let lines: Vec<&str> = raw.lines().collect();
    let Some(header) = lines.iter().position(|line| is_design_header(line)) else {
        return Some(FormatViolation::MissingHeader);
    };

    let preview: Vec<String> = lines[..header]
        .iter()
        .map(|line| line.trim())
        .filter(|line| !line.is_empty())
        .take(PREVIEW_LINES)
        .map(|line| line.chars().take(PREVIEW_WIDTH).collect())
        .collect();

    if preview.is_empty() {
        None
    } else {
        Some(FormatViolation::Preamble {
            header_line: header + 1,
            preview,
        })
    }
}

/// Extracts the design body.
///
/// Takes everything after the design header up to the first meta heading or
/// hand-off marker. Without a header, the response is cut at the first meta
/// heading instead. Never returns an empty string for a non-empty response.
pub fn extract_design(raw: &str) -> String {
    let lines: Vec<&str> = raw.lines().collect();
    let start = lines
        .iter()
        .position(|line| is_design_header(line))
        .map_or(0, |header| header + 1);

    let body: Vec<&str> = lines[start..]
        .iter()
        .take_while(|line| !is_meta_heading(line) && !is_handoff_line(line))
        .copied()
        .collect();

    let design = body.join("\n").trim().to_string();
    if design.is_empty() {
        raw.trim().to_string()
    } else {
        design
    }
}

/// Extracts the message a role addressed to the other role.
pub fn extract_handoff(raw: &str, role: Role) -> Option<String> {
    let marker = role.handoff_marker();
    let pos = raw.find(marker)?;
    let rest = raw[pos + marker.len()..].trim_start_matches('*').trim();
    if rest.is_empty() {
        None
    } else {
        Some(rest.to_string())
    }
}
