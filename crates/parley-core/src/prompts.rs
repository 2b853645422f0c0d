//! Prompt builder for the two debate roles.
//!
//! Prompts are a pure function of the task, the completed rounds and the
//! other role's latest turn. The same inputs always produce the same text,
//! which is what makes retries reproducible.

use parley_proto::{Role, RoleTurn, Round};

/// Builds role prompts for one session.
#[derive(Debug, Clone)]
pub struct PromptBuilder {
    task: String,
}

impl PromptBuilder {
    pub fn new(task: impl Into<String>) -> Self {
        Self { task: task.into() }
    }

    /// Builds the prompt for `role` in the round after `history`.
    ///
    /// `pending` is the architect's turn from the round in progress and is
    /// only used for the reviewer.
    pub fn build(&self, role: Role, history: &[Round], pending: Option<&RoleTurn>) -> String {
        let round = history.len() + 1;
        let mut prompt = String::new();

        prompt.push_str(&format!("You are {} in a structured design debate.\n", role.label()));
        prompt.push_str(role_brief(role));
        prompt.push_str("\n\n## TASK\n\n");
        prompt.push_str(self.task.trim());
        prompt.push_str("\n\n");

        if !history.is_empty() {
            prompt.push_str(&format!("## PROGRESS (round {} so far)\n\n", round - 1));
            for r in history {
                prompt.push_str(&format!(
                    "- Round {}: architect {}, reviewer {}\n",
                    r.index,
                    r.architect.status(),
                    r.reviewer.status()
                ));
            }
            prompt.push('\n');
        }

        let previous = match role {
            Role::Architect => history.last().map(|r| &r.reviewer),
            Role::Reviewer => pending,
        };

        match previous {
            Some(turn) => {
                prompt.push_str(&format!("## LATEST DESIGN FROM {}\n\n", turn.role.label().to_uppercase()));
                prompt.push_str(turn.design.trim());
                prompt.push_str("\n\n");
                if let Some(handoff) = &turn.handoff {
                    prompt.push_str("## MESSAGE FOR YOU\n\n");
                    prompt.push_str(handoff.trim());
                    prompt.push_str("\n\n");
                }
            }
            None => {
                prompt.push_str("## YOUR JOB\n\nThis is round 1. Propose the initial design.\n\n");
            }
        }

        prompt.push_str(&format!("## THIS ROUND\n\nRound {round}. "));
        prompt.push_str(round_instruction(role, round));
        prompt.push_str("\n\n");
        prompt.push_str(&format_rules(role));
        prompt
    }
}

fn role_brief(role: Role) -> &'static str {
    match role {
        Role::Architect => {
            "You own the design. Propose a concrete, implementable design and revise it \
             in response to the reviewer's critique. Keep what works, fix what does not."
        }
        Role::Reviewer => {
            "You own the critique. Find gaps, risks and unclear decisions in the architect's \
             design, then return an improved version of the full design rather than a list of complaints."
        }
    }
}

fn round_instruction(role: Role, round: usize) -> &'static str {
    match (role, round) {
        (Role::Architect, 1) => "Produce a complete first design.",
        (Role::Architect, _) => {
            "Address every point in the reviewer's message. Say what you changed and what you kept."
        }
        (Role::Reviewer, _) => {
            "Critique the architect's design above, then give your improved design. \
             Say what you improved and what you kept."
        }
    }
}

fn format_rules(role: Role) -> String {
    let sections = match role {
        Role::Architect => "## Rationale\n\n### What I Changed\n",
        Role::Reviewer => "### What I Improved\n\n### What I Kept\n",
    };
    format!(
        "## RESPONSE FORMAT\n\n\
         Start your response with the line `## Design`. Do not write anything before it.\n\n\
         ## Design\n<the full design: components, interfaces, data models, code blocks>\n\n\
         {sections}\n\
         ## Convergence Status\n\
         Exactly one of: ITERATING (needs another round) or PROPOSING_FINAL (ready, pending the other side's agreement).\n\n\
         {marker}\n<what the other side should focus on next>\n",
        marker = role.handoff_marker(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use parley_proto::ConvergenceReading;

    fn turn(role: Role, design: &str, handoff: Option<&str>) -> RoleTurn {
        RoleTurn {
            role,
            raw: String::new(),
            design: design.to_string(),
            handoff: handoff.map(str::to_string),
            reading: ConvergenceReading::Iterating,
            duration_ms: 1,
            attempts: 1,
            warnings: Vec::new(),
        }
    }

    fn round(index: u32) -> Round {
        Round {
            index,
            architect: turn(Role::Architect, &format!("architect design {index}"), None),
            reviewer: turn(
                Role::Reviewer,
                &format!("reviewer design {index}"),
                Some("Tighten the cache invalidation story."),
            ),
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn test_first_architect_prompt() {
        let builder = PromptBuilder::new("Design a rate limiter for the public API");
        let prompt = builder.build(Role::Architect, &[], None);
        assert!(prompt.contains("You are Agent A (Architect)"));
        assert!(prompt.contains("Design a rate limiter for the public API"));
        assert!(prompt.contains("This is round 1"));
        assert!(prompt.contains("PROMPT_FOR_CRITIC:"));
        assert!(!prompt.contains("## PROGRESS"));
    }

    #[test]
    fn test_architect_sees_previous_reviewer_turn() {
        let builder = PromptBuilder::new("Design a rate limiter for the public API");
        let history = vec![round(1), round(2)];
        let prompt = builder.build(Role::Architect, &history, None);
        assert!(prompt.contains("reviewer design 2"));
        assert!(!prompt.contains("reviewer design 1"));
        assert!(prompt.contains("Tighten the cache invalidation story."));
        assert!(prompt.contains("- Round 1: architect ITERATING, reviewer ITERATING"));
        assert!(prompt.contains("Round 3."));
    }

    #[test]
    fn test_reviewer_sees_pending_architect_turn() {
        let builder = PromptBuilder::new("Design a rate limiter for the public API");
        let pending = turn(Role::Architect, "token bucket per key", Some("Check burst sizes."));
        let prompt = builder.build(Role::Reviewer, &[round(1)], Some(&pending));
        assert!(prompt.contains("LATEST DESIGN FROM AGENT A (ARCHITECT)"));
        assert!(prompt.contains("token bucket per key"));
        assert!(prompt.contains("Check burst sizes."));
        assert!(prompt.contains("PROMPT_FOR_ARCHITECT:"));
    }

    #[test]
    fn test_prompt_is_deterministic() {
        let builder = PromptBuilder::new("Design a rate limiter for the public API");
        let history = vec![round(1)];
        assert_eq!(
            builder.build(Role::Architect, &history, None),
            builder.build(Role::Architect, &history, None)
        );
    }
}
