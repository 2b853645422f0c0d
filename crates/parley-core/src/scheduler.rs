//! The round loop.
//!
//! Each round runs the architect, then the reviewer, against the backend.
//! A round is persisted only after both calls succeed; the loop then checks
//! for consensus and the round cap. The interrupt flag is read before every
//! backend call, never during one, so an interrupt can only ever drop an
//! unpersisted partial round.

use crate::config::SessionConfig;
use crate::convergence::ConvergenceParser;
use crate::prompts::PromptBuilder;
use crate::response::{check_format, extract_design, extract_handoff};
use crate::store::{Session, StoreError, TranscriptStore};
use chrono::Utc;
use parley_proto::{
    Backend, BackendError, ConvergenceReading, InvokeOptions, Role, RoleTurn, Round, RoundPhase,
    SessionStatus,
};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Headroom past the configured timeout before the scheduler abandons a
/// call, so a backend can stop its own work cleanly at the deadline.
pub const BACKEND_GRACE: Duration = Duration::from_secs(5);

/// Why the round loop stopped.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Termination {
    /// Both roles proposed final in the same round.
    Converged,
    /// The round cap was reached without consensus.
    Exhausted,
    /// The interrupt flag was observed between calls.
    Interrupted,
    /// A backend call kept failing.
    Failed { cause: String },
}

impl Termination {
    pub fn status(&self) -> SessionStatus {
        match self {
            Termination::Converged => SessionStatus::Converged,
            Termination::Exhausted => SessionStatus::Exhausted,
            Termination::Interrupted => SessionStatus::Interrupted,
            Termination::Failed { .. } => SessionStatus::Failed,
        }
    }

    pub fn as_str(&self) -> &'static str {
        self.status().as_str()
    }
}

/// Progress notifications for observers such as the CLI.
#[derive(Debug, Clone)]
pub enum SchedulerEvent {
    RoundStarted {
        round: u32,
        max_rounds: u32,
    },
    TurnStarted {
        round: u32,
        role: Role,
        attempt: u32,
    },
    TurnFailed {
        round: u32,
        role: Role,
        attempt: u32,
        error: BackendError,
        will_retry: bool,
    },
    TurnCompleted {
        round: u32,
        role: Role,
        reading: ConvergenceReading,
        duration_ms: u64,
    },
    RoundPersisted {
        round: u32,
        phase: RoundPhase,
    },
}

/// Observer callback for scheduler events.
pub type Observer = Arc<dyn Fn(&SchedulerEvent) + Send + Sync>;

/// Errors that abort the loop. Backend failures are not errors here; they
/// end the loop as `Termination::Failed`.
#[derive(Debug, thiserror::Error)]
pub enum SchedulerError {
    #[error(transparent)]
    Storage(#[from] StoreError),
}

enum TurnOutcome {
    Completed(RoleTurn),
    Interrupted,
    Failed { error: BackendError, attempts: u32 },
}

/// Drives rounds for one session.
pub struct RoundScheduler<'a> {
    backend: &'a dyn Backend,
    store: &'a TranscriptStore,
    prompts: PromptBuilder,
    config: SessionConfig,
    interrupted: Arc<AtomicBool>,
    observer: Option<Observer>,
}

impl<'a> RoundScheduler<'a> {
    pub fn new(
        backend: &'a dyn Backend,
        store: &'a TranscriptStore,
        task: &str,
        config: SessionConfig,
        interrupted: Arc<AtomicBool>,
    ) -> Self {
        Self {
            backend,
            store,
            prompts: PromptBuilder::new(task),
            config,
            interrupted,
            observer: None,
        }
    }

    /// Sets an observer that receives every scheduler event.
    pub fn set_observer(&mut self, observer: Observer) {
        self.observer = Some(observer);
    }

    fn emit(&self, event: SchedulerEvent) {
        if let Some(observer) = &self.observer {
            observer(&event);
        }
    }

    fn is_interrupted(&self) -> bool {
        self.interrupted.load(Ordering::SeqCst)
    }

    /// Decides whether the loop ends after `round`.
    pub fn check_termination(round: &Round, max_rounds: u32) -> Option<Termination> {
        if round.is_consensus() {
            return Some(Termination::Converged);
        }
        if round.index >= max_rounds {
            return Some(Termination::Exhausted);
        }
        None
    }

    /// Runs rounds until the session terminates or is interrupted.
    ///
    /// Persisted rounds are appended to `session.rounds`. A resumed session
    /// continues from its next round index.
    pub async fn run(&self, session: &mut Session) -> Result<Termination, SchedulerError> {
        loop {
            if let Some(last) = session.last_round() {
                if let Some(termination) = Self::check_termination(last, self.config.max_rounds) {
                    info!(
                        session_id = %session.id(),
                        rounds = last.index,
                        reason = termination.as_str(),
                        "Debate finished"
                    );
                    return Ok(termination);
                }
            }

            let index = session.next_round_index();
            if self.is_interrupted() {
                info!(session_id = %session.id(), next_round = index, "Interrupted at round boundary");
                return Ok(Termination::Interrupted);
            }

            self.emit(SchedulerEvent::RoundStarted {
                round: index,
                max_rounds: self.config.max_rounds,
            });

            let architect = match self.run_turn(index, Role::Architect, &session.rounds, None).await {
                TurnOutcome::Completed(turn) => turn,
                TurnOutcome::Interrupted => return Ok(Termination::Interrupted),
                TurnOutcome::Failed { error, attempts } => {
                    return Ok(failed(index, Role::Architect, &error, attempts));
                }
            };

            if self.is_interrupted() {
                info!(
                    session_id = %session.id(),
                    round = index,
                    "Interrupted mid-round; discarding unpersisted architect turn"
                );
                return Ok(Termination::Interrupted);
            }

            let reviewer = match self
                .run_turn(index, Role::Reviewer, &session.rounds, Some(&architect))
                .await
            {
                TurnOutcome::Completed(turn) => turn,
                TurnOutcome::Interrupted => return Ok(Termination::Interrupted),
                TurnOutcome::Failed { error, attempts } => {
                    return Ok(failed(index, Role::Reviewer, &error, attempts));
                }
            };

            let round = Round {
                index,
                architect,
                reviewer,
                completed_at: Utc::now(),
            };
            self.store.append_round(session.id(), &round)?;

            let phase = round.phase();
            debug!(session_id = %session.id(), round = index, phase = phase.as_str(), "Round complete");
            self.emit(SchedulerEvent::RoundPersisted {
                round: index,
                phase,
            });

            session.meta.round_count = index;
            session.rounds.push(round);
        }
    }

    /// Runs one role's call with retries. The prompt is built once and
    /// reused verbatim for every attempt.
    async fn run_turn(
        &self,
        round: u32,
        role: Role,
        history: &[Round],
        pending: Option<&RoleTurn>,
    ) -> TurnOutcome {
        let prompt = self.prompts.build(role, history, pending);
        let options = InvokeOptions {
            model: self.config.model.clone(),
            timeout: self.config.timeout(),
        };
        let max_attempts = self.config.max_retries + 1;

        for attempt in 1..=max_attempts {
            if attempt > 1 && self.is_interrupted() {
                return TurnOutcome::Interrupted;
            }

            self.emit(SchedulerEvent::TurnStarted {
                round,
                role,
                attempt,
            });
            debug!(round, role = %role, attempt, backend = self.backend.name(), "Invoking backend");

            let started = Instant::now();
            let deadline = options.timeout + BACKEND_GRACE;
            let result = match tokio::time::timeout(deadline, self.backend.invoke(&prompt, &options)).await {
                Ok(Ok(raw)) if raw.trim().is_empty() => {
                    Err(BackendError::Transient("backend returned an empty response".to_string()))
                }
                Ok(result) => result,
                Err(_) => Err(BackendError::Timeout(options.timeout)),
            };
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(raw) => {
                    let turn = build_turn(role, raw, duration_ms, attempt);
                    self.emit(SchedulerEvent::TurnCompleted {
                        round,
                        role,
                        reading: turn.reading,
                        duration_ms,
                    });
                    return TurnOutcome::Completed(turn);
                }
                Err(error) => {
                    let will_retry = error.is_retryable() && attempt < max_attempts;
                    warn!(
                        round,
                        role = %role,
                        attempt,
                        duration_ms,
                        will_retry,
                        error = %error,
                        "Backend call failed"
                    );
                    self.emit(SchedulerEvent::TurnFailed {
                        round,
                        role,
                        attempt,
                        error: error.clone(),
                        will_retry,
                    });
                    if !will_retry {
                        return TurnOutcome::Failed {
                            error,
                            attempts: attempt,
                        };
                    }
                }
            }
        }

        // max_attempts >= 1, so the loop always returns.
        TurnOutcome::Failed {
            error: BackendError::Transient("no attempts were made".to_string()),
            attempts: 0,
        }
    }
}

fn failed(round: u32, role: Role, error: &BackendError, attempts: u32) -> Termination {
    Termination::Failed {
        cause: format!(
            "{} call in round {round} failed after {attempts} attempt(s): {error}",
            role.label()
        ),
    }
}

/// Parses a successful response into a turn, recording parser and format
/// warnings instead of failing.
fn build_turn(role: Role, raw: String, duration_ms: u64, attempts: u32) -> RoleTurn {
    let reading = ConvergenceParser::parse(&raw);
    let mut warnings = Vec::new();

    if let ConvergenceReading::Ambiguous { reason } = reading {
        warn!(role = %role, reason = reason.describe(), "Ambiguous convergence status; treating as ITERATING");
        warnings.push(format!("{}; treated as ITERATING", reason.describe()));
    }
    if let Some(violation) = check_format(&raw) {
        debug!(role = %role, violation = %violation, "Response format violation");
        warnings.push(violation.message(role));
    }

    RoleTurn {
        role,
        design: extract_design(&raw),
        handoff: extract_handoff(&raw, role),
        raw,
        reading,
        duration_ms,
        attempts,
        warnings,
    }
}
