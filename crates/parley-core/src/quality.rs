//! Heuristic quality checks for concluded debates.
//!
//! The validator never calls a backend. It looks at the round history and
//! the final artifact and emits one finding per check, in a fixed order.
//! The report carries no timestamps, so running it twice on the same
//! transcript serializes to identical bytes.

use crate::config::QualityConfig;
use crate::store::Session;
use parley_proto::Round;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::sync::LazyLock;

static SCHEMA_MARKERS: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?m)(^\s*(CREATE TABLE|create table|interface|struct|enum|pub struct|pub enum|message)\s+\w+)|(\b(GET|POST|PUT|PATCH|DELETE)\s+/)|(^\s*[\w.]+\s*:\s*(string|int|integer|uuid|bool|boolean|timestamp|varchar|text|number)\b)",
    )
    .expect("SCHEMA_MARKERS regex should compile")
});

static TRADE_OFF: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\b(versus|vs|trade-?offs?|alternatives?|pros and cons|compared (to|with)|instead of|rather than)\b",
    )
    .expect("TRADE_OFF regex should compile")
});

static EVOLUTION: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)(what i changed|what i improved|what i incorporated|what i added|changes since|changed since|since (the )?last round)",
    )
    .expect("EVOLUTION regex should compile")
});

const STOPWORDS: &[&str] = &[
    "about", "after", "again", "being", "before", "could", "doing", "does", "ensure",
    "every", "going", "handle", "happens", "might", "other", "should", "their", "there",
    "these", "thing", "think", "those", "through", "under", "using", "where", "which",
    "while", "would", "your", "yours",
];

const MIN_TERM_LEN: usize = 5;
const TERMS_PER_CONCERN: usize = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Positive,
    Info,
    Warning,
}

impl Severity {
    fn weight(self) -> i32 {
        match self {
            Severity::Positive => 1,
            Severity::Info => 0,
            Severity::Warning => -1,
        }
    }

    fn symbol(self) -> &'static str {
        match self {
            Severity::Positive => "+",
            Severity::Info => "·",
            Severity::Warning => "!",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Check {
    RoundCount,
    Concreteness,
    TradeOffs,
    Evolution,
    ConcernResolution,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Finding {
    pub check: Check,
    pub severity: Severity,
    pub message: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remedy: Option<String>,
}

impl Finding {
    fn new(check: Check, severity: Severity, message: impl Into<String>) -> Self {
        Self {
            check,
            severity,
            message: message.into(),
            remedy: None,
        }
    }

    fn with_remedy(mut self, remedy: impl Into<String>) -> Self {
        self.remedy = Some(remedy.into());
        self
    }
}

/// Coarse overall rating, ordered from worst to best.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Rating {
    Poor,
    NeedsWork,
    Fair,
    Good,
    Excellent,
}

impl Rating {
    /// Maps `positives - warnings` to a rating. Non-decreasing in `score`.
    pub fn from_score(score: i32) -> Self {
        match score {
            i32::MIN..=-3 => Rating::Poor,
            -2..=-1 => Rating::NeedsWork,
            0..=1 => Rating::Fair,
            2..=3 => Rating::Good,
            _ => Rating::Excellent,
        }
    }

    pub fn is_below_median(self) -> bool {
        self < Rating::Fair
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Rating::Poor => "poor",
            Rating::NeedsWork => "needs work",
            Rating::Fair => "fair",
            Rating::Good => "good",
            Rating::Excellent => "excellent",
        }
    }
}

impl fmt::Display for Rating {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConcernTally {
    pub resolved: usize,
    pub total: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityReport {
    pub session_id: String,
    pub rounds: u32,
    pub findings: Vec<Finding>,
    pub concerns: ConcernTally,
    pub score: i32,
    pub rating: Rating,
}

impl QualityReport {
    pub fn positives(&self) -> usize {
        self.count(Severity::Positive)
    }

    pub fn warnings(&self) -> usize {
        self.count(Severity::Warning)
    }

    fn count(&self, severity: Severity) -> usize {
        self.findings.iter().filter(|f| f.severity == severity).count()
    }

    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Quality Report: {}\n\nRating: **{}** (score {:+}, {} positive, {} warnings)\n\n",
            self.session_id,
            self.rating,
            self.score,
            self.positives(),
            self.warnings()
        );
        for finding in &self.findings {
            out.push_str(&format!("- [{}] {}\n", finding.severity.symbol(), finding.message));
            if let Some(remedy) = &finding.remedy {
                out.push_str(&format!("  - try: `{remedy}`\n"));
            }
        }
        out
    }
}

/// Runs the quality heuristics.
#[derive(Debug, Clone, Copy, Default)]
pub struct QualityValidator {
    thresholds: QualityConfig,
}

impl QualityValidator {
    pub fn new(thresholds: QualityConfig) -> Self {
        Self { thresholds }
    }

    pub fn run(&self, session: &Session) -> QualityReport {
        let artifact = session
            .final_artifact
            .as_deref()
            .or_else(|| session.last_round().map(Round::latest_design))
            .unwrap_or_default();

        let (concern_finding, concerns) = check_concerns(&session.rounds, artifact);
        let findings = vec![
            self.check_round_count(
                session.rounds.len() as u32,
                session.last_round().is_some_and(Round::is_consensus),
            ),
            check_concreteness(artifact),
            check_trade_offs(artifact),
            check_evolution(&session.rounds),
            concern_finding,
        ];

        let score = findings.iter().map(|f| f.severity.weight()).sum();
        QualityReport {
            session_id: session.id().to_string(),
            rounds: session.rounds.len() as u32,
            findings,
            concerns,
            score,
            rating: Rating::from_score(score),
        }
    }

    fn check_round_count(&self, rounds: u32, converged: bool) -> Finding {
        let QualityConfig {
            min_rounds,
            max_rounds,
        } = self.thresholds;

        if rounds < min_rounds {
            let ended = if converged { "Converged" } else { "Debate ended" };
            Finding::new(
                Check::RoundCount,
                Severity::Warning,
                format!("{ended} unusually fast ({rounds} rounds, expected at least {min_rounds})"),
            )
            .with_remedy(format!(
                "parley run --max-rounds {} \"<task with explicit constraints>\"",
                max_rounds.max(min_rounds)
            ))
        } else if rounds > max_rounds {
            Finding::new(
                Check::RoundCount,
                Severity::Warning,
                format!("Unusually long debate ({rounds} rounds), may indicate unclear scope"),
            )
            .with_remedy("parley run \"<narrower task>\"")
        } else {
            Finding::new(
                Check::RoundCount,
                Severity::Positive,
                format!("Debate length of {rounds} rounds is within the expected range"),
            )
        }
    }
}

fn check_concreteness(artifact: &str) -> Finding {
    let fences = artifact.matches("```").count() / 2;
    let schema = SCHEMA_MARKERS.find_iter(artifact).count();
    if fences > 0 || schema > 0 {
        Finding::new(
            Check::Concreteness,
            Severity::Positive,
            format!("Design is concrete ({fences} code blocks, {schema} schema markers)"),
        )
    } else {
        Finding::new(
            Check::Concreteness,
            Severity::Warning,
            "Design has no code blocks or schema definitions",
        )
    }
}

fn check_trade_offs(artifact: &str) -> Finding {
    let mentions = TRADE_OFF.find_iter(artifact).count();
    if mentions > 0 {
        Finding::new(
            Check::TradeOffs,
            Severity::Positive,
            format!("Design discusses trade-offs ({mentions} comparisons)"),
        )
    } else {
        Finding::new(
            Check::TradeOffs,
            Severity::Warning,
            "Design does not compare alternatives or name trade-offs",
        )
    }
}

fn check_evolution(rounds: &[Round]) -> Finding {
    let revisions = rounds.len().saturating_sub(1);
    if revisions == 0 {
        return Finding::new(
            Check::Evolution,
            Severity::Info,
            "Single round, no revisions to compare",
        );
    }

    let documented = rounds
        .iter()
        .skip(1)
        .filter(|r| EVOLUTION.is_match(&r.architect.raw) || EVOLUTION.is_match(&r.reviewer.raw))
        .count();

    if documented > 0 {
        Finding::new(
            Check::Evolution,
            Severity::Positive,
            format!("{documented} of {revisions} revised rounds document what changed"),
        )
    } else {
        Finding::new(
            Check::Evolution,
            Severity::Warning,
            "No revised round documents what changed since the previous round",
        )
    }
}

/// Questions the reviewer raised in the first half of the debate, checked
/// against the final artifact by key term.
fn check_concerns(rounds: &[Round], artifact: &str) -> (Finding, ConcernTally) {
    let early = rounds.len().div_ceil(2);
    let mut seen = BTreeSet::new();
    let mut concerns = Vec::new();
    for round in rounds.iter().take(early) {
        for question in questions(&round.reviewer.raw) {
            let terms = key_terms(question);
            if !terms.is_empty() && seen.insert(terms.clone()) {
                concerns.push(terms);
            }
        }
    }

    let artifact = artifact.to_lowercase();
    let resolved = concerns
        .iter()
        .filter(|terms| {
            let hits = terms.iter().filter(|t| artifact.contains(t.as_str())).count();
            hits * 2 >= terms.len()
        })
        .count();
    let tally = ConcernTally {
        resolved,
        total: concerns.len(),
    };

    let finding = if tally.total == 0 {
        Finding::new(
            Check::ConcernResolution,
            Severity::Info,
            "Reviewer raised no explicit questions in early rounds",
        )
    } else if resolved * 2 >= tally.total {
        Finding::new(
            Check::ConcernResolution,
            Severity::Positive,
            format!("{resolved}/{} early reviewer concerns are addressed in the final design", tally.total),
        )
    } else {
        Finding::new(
            Check::ConcernResolution,
            Severity::Warning,
            format!("Only {resolved}/{} early reviewer concerns are addressed in the final design", tally.total),
        )
    };
    (finding, tally)
}

fn questions(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for line in text.lines() {
        for piece in line.split_inclusive('?') {
            if !piece.ends_with('?') {
                continue;
            }
            let sentence = piece.rsplit(['.', '!', ':']).next().unwrap_or(piece).trim();
            if !sentence.is_empty() {
                out.push(sentence);
            }
        }
    }
    out
}

fn key_terms(question: &str) -> Vec<String> {
    let mut terms: Vec<String> = Vec::new();
    for word in question.split(|c: char| !(c.is_alphanumeric() || c == '_' || c == '-')) {
        let word = word.trim_matches('-').to_lowercase();
        if word.chars().count() < MIN_TERM_LEN || STOPWORDS.contains(&word.as_str()) {
            continue;
        }
        if !terms.contains(&word) {
            terms.push(word);
        }
        if terms.len() == TERMS_PER_CONCERN {
            break;
        }
    }
    terms
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{sample_round, sample_session};

    #[test]
    fn test_rating_is_monotonic() {
        let mut previous = Rating::from_score(-10);
        for score in -9..=10 {
            let rating = Rating::from_score(score);
            assert!(rating >= previous, "score {score} lowered the rating");
            previous = rating;
        }
        assert!(Rating::NeedsWork.is_below_median());
        assert!(!Rating::Fair.is_below_median());
    }

    #[test]
    fn test_questions_and_key_terms() {
        let text = "I like it. How does token revocation propagate to caches? Also: what about retries?";
        let qs = questions(text);
        assert_eq!(
            qs,
            vec!["How does token revocation propagate to caches?", "what about retries?"]
        );
        assert_eq!(key_terms(qs[0]), vec!["token", "revocation", "propagate"]);
        assert_eq!(key_terms(qs[1]), vec!["retries"]);
    }

    #[test]
    fn test_round_count_thresholds() {
        let validator = QualityValidator::default();
        assert_eq!(validator.check_round_count(2, true).severity, Severity::Warning);
        assert!(validator.check_round_count(2, true).remedy.is_some());
        assert_eq!(validator.check_round_count(3, true).severity, Severity::Positive);
        assert_eq!(validator.check_round_count(10, false).severity, Severity::Positive);
        let long = validator.check_round_count(11, false);
        assert_eq!(long.severity, Severity::Warning);
        assert!(long.message.contains("unclear scope"));
    }

    #[test]
    fn test_concreteness() {
        assert_eq!(
            check_concreteness("```rust\nfn main() {}\n```").severity,
            Severity::Positive
        );
        assert_eq!(
            check_concreteness("CREATE TABLE orders (id UUID)").severity,
            Severity::Positive
        );
        assert_eq!(check_concreteness("POST /v1/tokens issues a token").severity, Severity::Positive);
        assert_eq!(
            check_concreteness("Use a service that stores users.").severity,
            Severity::Warning
        );
    }

    #[test]
    fn test_trade_offs() {
        assert_eq!(
            check_trade_offs("Redis versus Postgres for sessions").severity,
            Severity::Positive
        );
        assert_eq!(check_trade_offs("The trade-off is latency").severity, Severity::Positive);
        assert_eq!(check_trade_offs("Store sessions in Redis.").severity, Severity::Warning);
    }

    #[test]
    fn test_evolution_needs_markers_after_round_one() {
        let mut rounds = vec![sample_round(1, false), sample_round(2, false)];
        assert_eq!(check_evolution(&rounds[..1]).severity, Severity::Info);
        assert_eq!(check_evolution(&rounds).severity, Severity::Warning);

        rounds[1].architect.raw.push_str("\n### What I Changed\nAdded rate limits.");
        let finding = check_evolution(&rounds);
        assert_eq!(finding.severity, Severity::Positive);
        assert!(finding.message.starts_with("1 of 1"));
    }

    #[test]
    fn test_concern_resolution_ratio() {
        let mut rounds = vec![sample_round(1, false), sample_round(2, false)];
        rounds[0].reviewer.raw =
            "How are refresh tokens rotated? What about audit logging retention?".to_string();
        let (finding, tally) = check_concerns(&rounds, "Refresh tokens are rotated on every use.");
        assert_eq!(tally, ConcernTally { resolved: 1, total: 2 });
        assert_eq!(finding.severity, Severity::Positive);

        let (finding, tally) = check_concerns(&rounds, "Nothing relevant here.");
        assert_eq!(tally.resolved, 0);
        assert_eq!(finding.severity, Severity::Warning);
    }

    #[test]
    fn test_report_is_deterministic() {
        let session = sample_session(
            "session_20260101_000000_000",
            vec![sample_round(1, false), sample_round(2, false), sample_round(3, true)],
        );
        let validator = QualityValidator::default();
        let first = serde_json::to_string_pretty(&validator.run(&session)).unwrap();
        let second = serde_json::to_string_pretty(&validator.run(&session)).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_plain_short_debate_rates_below_median() {
        let mut session = sample_session(
            "session_20260101_000000_000",
            vec![sample_round(1, false), sample_round(2, true)],
        );
        session.final_artifact =
            Some("Use a single service that stores users and issues tokens.".to_string());

        let report = QualityValidator::default().run(&session);
        assert!(report.warnings() >= 2);
        assert!(report.rating.is_below_median());
        assert_eq!(report.findings.len(), 5);
        assert!(report.to_markdown().contains("Converged unusually fast"));
    }

    #[test]
    fn test_short_debate_without_consensus_is_not_called_converged() {
        let session = sample_session(
            "session_20260101_000000_000",
            vec![sample_round(1, false), sample_round(2, false)],
        );

        let report = QualityValidator::default().run(&session);
        let round_count = &report.findings[0];
        assert_eq!(round_count.severity, Severity::Warning);
        assert!(round_count.message.starts_with("Debate ended unusually fast"), "{}", round_count.message);
        assert!(!report.to_markdown().contains("Converged"));
    }
}
