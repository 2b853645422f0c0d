//! Round and turn records.

use crate::{ConvergenceReading, ConvergenceStatus, Role};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One role's completed contribution to a round.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleTurn {
    pub role: Role,

    /// Raw backend output, kept verbatim for audit.
    pub raw: String,

    /// Design body extracted from the raw output.
    pub design: String,

    /// Message addressed to the other role, if the output carried one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub handoff: Option<String>,

    pub reading: ConvergenceReading,

    /// Wall-clock time of the successful call.
    pub duration_ms: u64,

    /// Number of backend calls made, including the successful one.
    pub attempts: u32,

    /// Parser and format warnings recorded for this turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,
}

impl RoleTurn {
    pub fn status(&self) -> ConvergenceStatus {
        self.reading.effective()
    }
}

/// Where a round leaves the debate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RoundPhase {
    /// Neither role proposed the artifact as final.
    Debating,
    /// Exactly one role proposed the artifact as final.
    Converging,
    /// Both roles proposed the artifact as final.
    Consensus,
}

impl RoundPhase {
    pub fn as_str(self) -> &'static str {
        match self {
            RoundPhase::Debating => "debating",
            RoundPhase::Converging => "converging",
            RoundPhase::Consensus => "consensus",
        }
    }
}

/// A completed pair of turns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Round {
    /// 1-based, contiguous within a session.
    pub index: u32,
    pub architect: RoleTurn,
    pub reviewer: RoleTurn,
    pub completed_at: DateTime<Utc>,
}

impl Round {
    pub fn turn(&self, role: Role) -> &RoleTurn {
        match role {
            Role::Architect => &self.architect,
            Role::Reviewer => &self.reviewer,
        }
    }

    pub fn phase(&self) -> RoundPhase {
        let finals = Role::ALL
            .iter()
            .filter(|role| self.turn(**role).status() == ConvergenceStatus::ProposingFinal)
            .count();
        match finals {
            0 => RoundPhase::Debating,
            1 => RoundPhase::Converging,
            _ => RoundPhase::Consensus,
        }
    }

    pub fn is_consensus(&self) -> bool {
        self.phase() == RoundPhase::Consensus
    }

    /// The most recent design in this round: the reviewer's, unless it is empty.
    pub fn latest_design(&self) -> &str {
        if self.reviewer.design.trim().is_empty() {
            &self.architect.design
        } else {
            &self.reviewer.design
        }
    }

    pub fn duration_ms(&self) -> u64 {
        self.architect.duration_ms + self.reviewer.duration_ms
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Ambiguity;

    fn turn(role: Role, reading: ConvergenceReading, design: &str) -> RoleTurn {
        RoleTurn {
            role,
            raw: String::new(),
            design: design.to_string(),
            handoff: None,
            reading,
            duration_ms: 10,
            attempts: 1,
            warnings: Vec::new(),
        }
    }

    fn round(a: ConvergenceReading, b: ConvergenceReading) -> Round {
        Round {
            index: 1,
            architect: turn(Role::Architect, a, "architect design"),
            reviewer: turn(Role::Reviewer, b, "reviewer design"),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_phase_counts_final_proposals() {
        use ConvergenceReading::{Iterating, ProposingFinal};
        assert_eq!(round(Iterating, Iterating).phase(), RoundPhase::Debating);
        assert_eq!(round(ProposingFinal, Iterating).phase(), RoundPhase::Converging);
        assert_eq!(round(Iterating, ProposingFinal).phase(), RoundPhase::Converging);
        assert_eq!(round(ProposingFinal, ProposingFinal).phase(), RoundPhase::Consensus);
    }

    #[test]
    fn test_ambiguous_turn_blocks_consensus() {
        let ambiguous = ConvergenceReading::Ambiguous {
            reason: Ambiguity::MissingMarker,
        };
        let r = round(ConvergenceReading::ProposingFinal, ambiguous);
        assert!(!r.is_consensus());
    }

    #[test]
    fn test_latest_design_falls_back_to_architect() {
        let mut r = round(ConvergenceReading::Iterating, ConvergenceReading::Iterating);
        assert_eq!(r.latest_design(), "reviewer design");
        r.reviewer.design = "  ".to_string();
        assert_eq!(r.latest_design(), "architect design");
    }
}
