//! Convergence status parsing from role output.
//!
//! A role reports its status in a dedicated section:
//! ```text
//! ## Convergence Status
//! **PROPOSING_FINAL** - the schema and retry policy are settled.
//! ```
//! The section heading is matched case-insensitively. The section ends at the
//! next heading or at a hand-off marker. Status keywords are upper-case tags;
//! `ACCEPTING_FINAL` counts as `PROPOSING_FINAL`.

use parley_proto::{Ambiguity, ConvergenceReading};
use regex::Regex;
use std::sync::LazyLock;

static KEYWORD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(ITERATING|PROPOSING_FINAL|ACCEPTING_FINAL)\b")
        .expect("KEYWORD regex should compile")
});

const MARKER: &str = "convergence status";

/// Extracts convergence readings from raw output.
pub struct ConvergenceParser;

impl ConvergenceParser {
    /// Parses one role's output into a strict reading.
    ///
    /// Returns `Ambiguous` when the marker section is missing, holds no
    /// keyword, or holds both statuses.
    pub fn parse(output: &str) -> ConvergenceReading {
        let clean = strip_ansi_escapes::strip_str(output);

        let mut found_marker = false;
        let mut in_section = false;
        let mut iterating = false;
        let mut final_ = false;

        for line in clean.lines() {
            let trimmed = line.trim();

            if let Some(rest) = marker_remainder(trimmed) {
                found_marker = true;
                in_section = true;
                scan(rest, &mut iterating, &mut final_);
                continue;
            }

            if in_section && ends_section(trimmed) {
                in_section = false;
            }

            if in_section {
                scan(trimmed, &mut iterating, &mut final_);
            }
        }

        match (found_marker, iterating, final_) {
            (false, _, _) => ConvergenceReading::Ambiguous {
                reason: Ambiguity::MissingMarker,
            },
            (true, true, true) => ConvergenceReading::Ambiguous {
                reason: Ambiguity::Conflicting,
            },
            (true, true, false) => ConvergenceReading::Iterating,
            (true, false, true) => ConvergenceReading::ProposingFinal,
            (true, false, false) => ConvergenceReading::Ambiguous {
                reason: Ambiguity::NoKeyword,
            },
        }
    }
}

/// If the line opens a convergence section, returns the text after the marker.
fn marker_remainder(line: &str) -> Option<&str> {
    let stripped = line.trim_start_matches(['#', '*', ' ', '\t']);
    let head = stripped.get(..MARKER.len())?;
    if !head.eq_ignore_ascii_case(MARKER) {
        return None;
    }
    let rest = &stripped[MARKER.len()..];
    Some(rest.trim_start_matches(['*', ':', ' ', '\t']))
}

fn ends_section(line: &str) -> bool {
    line.starts_with('#') || line.trim_start_matches('*').starts_with("PROMPT_FOR_")
}

fn scan(text: &str, iterating: &mut bool, final_: &mut bool) {
    for cap in KEYWORD.find_iter(text) {
        match cap.as_str() {
            "ITERATING" => *iterating = true,
            _ => *final_ = true,
        }
    }
}
