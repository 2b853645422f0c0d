//! Canned responses, rounds and debate scripts.

use super::mock_backend::{MockBackend, MockReply};
use crate::config::SessionConfig;
use crate::store::{Session, SessionMeta};
use chrono::{TimeZone, Utc};
use parley_proto::{ConvergenceReading, ConvergenceStatus, Role, RoleTurn, Round, SessionStatus};
use std::path::PathBuf;

/// A well-formed role response carrying `status`.
pub fn response(role: Role, status: ConvergenceStatus, design: &str) -> String {
    format!(
        "## Design\n\n{design}\n\n## Rationale\n\nKeeps the moving parts small.\n\n## Convergence Status\n\n**{status}**\n\n{marker}\nLook at the failure handling next.\n",
        marker = role.handoff_marker(),
    )
}

fn turn(role: Role, status: ConvergenceStatus, index: u32) -> RoleTurn {
    let design = format!("{} design for round {index}", role.as_str());
    RoleTurn {
        role,
        raw: response(role, status, &design),
        design,
        handoff: Some("Look at the failure handling next.".to_string()),
        reading: ConvergenceReading::from(status),
        duration_ms: 1200,
        attempts: 1,
        warnings: Vec::new(),
    }
}

/// A completed round. Both roles propose final when `final_` is set.
pub fn sample_round(index: u32, final_: bool) -> Round {
    let status = if final_ {
        ConvergenceStatus::ProposingFinal
    } else {
        ConvergenceStatus::Iterating
    };
    Round {
        index,
        architect: turn(Role::Architect, status, index),
        reviewer: turn(Role::Reviewer, status, index),
        completed_at: Utc
            .with_ymd_and_hms(2026, 1, 1, 12, 0, index)
            .single()
            .unwrap_or_default(),
    }
}

/// An in-memory session holding `rounds`.
pub fn sample_session(id: &str, rounds: Vec<Round>) -> Session {
    let created = Utc
        .with_ymd_and_hms(2026, 1, 1, 12, 0, 0)
        .single()
        .unwrap_or_default();
    Session {
        meta: SessionMeta {
            id: id.to_string(),
            task: "Design a rate limiter for the public API".to_string(),
            config: SessionConfig {
                max_rounds: 8,
                timeout_secs: 300,
                max_retries: 2,
                model: None,
                output_dir: PathBuf::from("./debate_output"),
                backend: "mock".to_string(),
            },
            status: SessionStatus::Running,
            round_count: rounds.len() as u32,
            created_at: created,
            updated_at: created,
            finalized: false,
            cause: None,
        },
        rounds,
        final_artifact: None,
        discarded_round: None,
    }
}

/// A scripted debate: the statuses each role reports, round by round.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: String,
    rounds: Vec<(ConvergenceStatus, ConvergenceStatus)>,
}

impl Scenario {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            rounds: Vec::new(),
        }
    }

    pub fn round(mut self, architect: ConvergenceStatus, reviewer: ConvergenceStatus) -> Self {
        self.rounds.push((architect, reviewer));
        self
    }

    /// Appends `count` rounds where both roles keep iterating.
    pub fn iterating(mut self, count: usize) -> Self {
        for _ in 0..count {
            self.rounds
                .push((ConvergenceStatus::Iterating, ConvergenceStatus::Iterating));
        }
        self
    }

    /// Appends a round where both roles propose final.
    pub fn consensus(self) -> Self {
        self.round(
            ConvergenceStatus::ProposingFinal,
            ConvergenceStatus::ProposingFinal,
        )
    }

    /// Backend replies in call order.
    pub fn replies(&self) -> Vec<MockReply> {
        let mut replies = Vec::with_capacity(self.rounds.len() * 2);
        for (i, (architect, reviewer)) in self.rounds.iter().enumerate() {
            let index = i + 1;
            replies.push(MockReply::Text(response(
                Role::Architect,
                *architect,
                &format!("{} architect design v{index}", self.name),
            )));
            replies.push(MockReply::Text(response(
                Role::Reviewer,
                *reviewer,
                &format!("{} reviewer design v{index}", self.name),
            )));
        }
        replies
    }

    pub fn backend(&self) -> MockBackend {
        MockBackend::new(self.replies())
    }
}
