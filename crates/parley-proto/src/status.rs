//! Convergence signals and session lifecycle states.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The self-assessment a role attaches to its output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ConvergenceStatus {
    /// The artifact needs another pass.
    Iterating,
    /// The role considers the artifact ready and waits for agreement.
    ProposingFinal,
}

impl ConvergenceStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ConvergenceStatus::Iterating => "ITERATING",
            ConvergenceStatus::ProposingFinal => "PROPOSING_FINAL",
        }
    }
}

impl fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a convergence reading could not be resolved to a single status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Ambiguity {
    /// No convergence status section was found.
    MissingMarker,
    /// The section exists but holds no status keyword.
    NoKeyword,
    /// The section holds both status keywords.
    Conflicting,
}

impl Ambiguity {
    pub fn describe(self) -> &'static str {
        match self {
            Ambiguity::MissingMarker => "convergence status section missing",
            Ambiguity::NoKeyword => "convergence status section has no status keyword",
            Ambiguity::Conflicting => "convergence status section has conflicting keywords",
        }
    }
}

/// Strict result of parsing one role's output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ConvergenceReading {
    Iterating,
    ProposingFinal,
    Ambiguous { reason: Ambiguity },
}

impl ConvergenceReading {
    /// The status the scheduler acts on. Ambiguous readings never count as final.
    pub fn effective(self) -> ConvergenceStatus {
        match self {
            ConvergenceReading::ProposingFinal => ConvergenceStatus::ProposingFinal,
            ConvergenceReading::Iterating | ConvergenceReading::Ambiguous { .. } => {
                ConvergenceStatus::Iterating
            }
        }
    }

    pub fn is_ambiguous(self) -> bool {
        matches!(self, ConvergenceReading::Ambiguous { .. })
    }
}

impl From<ConvergenceStatus> for ConvergenceReading {
    fn from(status: ConvergenceStatus) -> Self {
        match status {
            ConvergenceStatus::Iterating => ConvergenceReading::Iterating,
            ConvergenceStatus::ProposingFinal => ConvergenceReading::ProposingFinal,
        }
    }
}

/// Lifecycle status of a debate session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Running,
    Converged,
    Exhausted,
    Interrupted,
    Failed,
}

impl SessionStatus {
    /// Terminal sessions never run again.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            SessionStatus::Converged | SessionStatus::Exhausted | SessionStatus::Failed
        )
    }

    /// Whether the session has finished with a result worth reading.
    pub fn is_success(self) -> bool {
        matches!(self, SessionStatus::Converged | SessionStatus::Exhausted)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SessionStatus::Running => "running",
            SessionStatus::Converged => "converged",
            SessionStatus::Exhausted => "exhausted",
            SessionStatus::Interrupted => "interrupted",
            SessionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
