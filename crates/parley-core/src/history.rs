//! Markdown rendering of a debate transcript.

use crate::store::Session;
use parley_proto::{Role, RoleTurn};

/// Renders the full debate as `debate_history.md`.
pub fn render_history(session: &Session) -> String {
    let meta = &session.meta;
    let mut out = String::new();

    out.push_str(&format!("# Design Debate: {}\n\n", meta.id));
    out.push_str(&format!("**Task:** {}\n\n", meta.task.trim()));
    out.push_str(&format!(
        "**Status:** {} after {} of {} rounds\n\n",
        meta.status,
        session.rounds.len(),
        meta.config.max_rounds
    ));
    out.push_str(&format!("**Started:** {}\n\n", meta.created_at.format("%Y-%m-%d %H:%M:%S UTC")));
    if let Some(cause) = &meta.cause {
        out.push_str(&format!("**Note:** {cause}\n\n"));
    }

    for round in &session.rounds {
        out.push_str("---\n\n");
        out.push_str(&format!("## Round {} ({})\n\n", round.index, round.phase().as_str()));
        for role in Role::ALL {
            render_turn(&mut out, round.turn(role));
        }
    }

    if let Some(artifact) = &session.final_artifact {
        out.push_str("---\n\n## Final Design\n\n");
        out.push_str(artifact.trim());
        out.push('\n');
    }

    out
}

fn render_turn(out: &mut String, turn: &RoleTurn) {
    out.push_str(&format!(
        "### {}\n\n*{} · {:.1}s",
        turn.role.label(),
        turn.status(),
        turn.duration_ms as f64 / 1000.0
    ));
    if turn.attempts > 1 {
        out.push_str(&format!(" · {} attempts", turn.attempts));
    }
    out.push_str("*\n\n");

    for warning in &turn.warnings {
        out.push_str(&format!("> ⚠ {}\n", warning.replace('\n', "\n> ")));
    }
    if !turn.warnings.is_empty() {
        out.push('\n');
    }

    out.push_str(turn.design.trim());
    out.push_str("\n\n");
}
