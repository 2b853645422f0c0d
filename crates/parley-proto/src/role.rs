//! The two debate participants.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One of the two fixed debate roles.
///
/// The architect always speaks first in a round; the reviewer answers the
/// architect's output from the same round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    Architect,
    Reviewer,
}

impl Role {
    /// Both roles in speaking order.
    pub const ALL: [Role; 2] = [Role::Architect, Role::Reviewer];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::Architect => "architect",
            Role::Reviewer => "reviewer",
        }
    }

    /// Display label used in transcripts and progress output.
    pub fn label(self) -> &'static str {
        match self {
            Role::Architect => "Agent A (Architect)",
            Role::Reviewer => "Agent B (Reviewer)",
        }
    }

    pub fn other(self) -> Role {
        match self {
            Role::Architect => Role::Reviewer,
            Role::Reviewer => Role::Architect,
        }
    }

    /// Marker that introduces this role's message to the other role.
    pub fn handoff_marker(self) -> &'static str {
        match self {
            Role::Architect => "PROMPT_FOR_CRITIC:",
            Role::Reviewer => "PROMPT_FOR_ARCHITECT:",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
