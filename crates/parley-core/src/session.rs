//! Session lifecycle: start, resume, conclude, report.
//!
//! The manager is the only component that changes a session's status or
//! calls `finalize`. It holds the session's writer lease for the whole run.

use crate::config::{ConfigError, QualityConfig, SessionConfig};
use crate::history::render_history;
use crate::quality::{QualityReport, QualityValidator};
use crate::scheduler::{Observer, RoundScheduler, SchedulerError, SchedulerEvent, Termination};
use crate::store::{InvariantViolation, Session, StoreError, TranscriptStore, WriterLease};
use crate::task::{InputError, validate_task};
use parley_proto::{Backend, SessionStatus};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::AtomicBool;
use tracing::{info, warn};

/// Which stored session to act on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionTarget {
    Latest,
    Id(String),
}

impl SessionTarget {
    pub fn parse(s: &str) -> Self {
        if s.eq_ignore_ascii_case("latest") {
            SessionTarget::Latest
        } else {
            SessionTarget::Id(s.to_string())
        }
    }

    /// Resolves the target to a session id in `store`.
    pub fn resolve(&self, store: &TranscriptStore) -> Result<String, SessionError> {
        match self {
            SessionTarget::Id(id) => Ok(id.clone()),
            SessionTarget::Latest => store
                .latest()?
                .map(|handle| handle.id)
                .ok_or_else(|| InputError::NoSessions(store.root().to_path_buf()).into()),
        }
    }
}

/// Settings a resume may change. Unset fields keep the stored snapshot.
#[derive(Debug, Clone, Default)]
pub struct ResumeOverrides {
    pub max_rounds: Option<u32>,
    pub timeout_secs: Option<u64>,
    pub model: Option<String>,
}

/// Coarse error classes, for exit codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Input,
    Storage,
    Invariant,
}

#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error(transparent)]
    Input(#[from] InputError),

    #[error("session '{id}' is {status} and cannot be resumed")]
    NotResumable { id: String, status: SessionStatus },

    #[error("session '{id}' is {status}; only converged or exhausted sessions have a quality report")]
    NoReport { id: String, status: SessionStatus },

    #[error(transparent)]
    Storage(StoreError),

    #[error("internal invariant violated: {0}")]
    Invariant(InvariantViolation),
}

impl SessionError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            SessionError::Input(_)
            | SessionError::NotResumable { .. }
            | SessionError::NoReport { .. } => ErrorKind::Input,
            SessionError::Storage(_) => ErrorKind::Storage,
            SessionError::Invariant(_) => ErrorKind::Invariant,
        }
    }

    /// A command that may fix the problem.
    pub fn hint(&self) -> Option<String> {
        match self {
            SessionError::NotResumable { id, status } => Some(match status {
                SessionStatus::Running => "wait for the running process to finish".to_string(),
                _ => format!("read the result with `parley report {id}` or start a new run"),
            }),
            SessionError::NoReport { id, status: SessionStatus::Interrupted } => {
                Some(format!("finish the debate first with `parley resume {id}`"))
            }
            SessionError::Storage(StoreError::Busy { .. }) => {
                Some("another parley process is writing this session".to_string())
            }
            SessionError::Storage(StoreError::UnreadableLease { path, .. }) => Some(format!(
                "if no parley process is using this session, remove {}",
                path.display()
            )),
            SessionError::Storage(StoreError::NotFound(_)) => {
                Some("list known sessions with `parley list`".to_string())
            }
            SessionError::Storage(StoreError::CorruptSession { .. }) => {
                Some("start a fresh run with `parley run \"<task>\"`".to_string())
            }
            SessionError::Storage(StoreError::StorageUnavailable { .. }) => {
                Some("check permissions and free space, or pass --output-dir".to_string())
            }
            _ => None,
        }
    }
}

impl From<StoreError> for SessionError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Invariant(violation) => SessionError::Invariant(violation),
            other => SessionError::Storage(other),
        }
    }
}

impl From<ConfigError> for SessionError {
    fn from(err: ConfigError) -> Self {
        SessionError::Input(InputError::Config(err))
    }
}

/// How a run ended, for display.
#[derive(Debug, Clone)]
pub struct SessionOutcome {
    pub session_id: String,
    pub dir: PathBuf,
    pub status: SessionStatus,
    pub rounds: u32,
    pub explanation: String,
    pub next_step: Option<String>,
    pub quality: Option<QualityReport>,
}

/// Creates, resumes and concludes sessions.
pub struct SessionManager {
    store: TranscriptStore,
    backend: Arc<dyn Backend>,
    interrupted: Arc<AtomicBool>,
    quality: QualityConfig,
    observer: Option<Observer>,
}

impl SessionManager {
    pub fn new(store: TranscriptStore, backend: Arc<dyn Backend>, interrupted: Arc<AtomicBool>) -> Self {
        Self {
            store,
            backend,
            interrupted,
            quality: QualityConfig::default(),
            observer: None,
        }
    }

    pub fn with_quality(mut self, quality: QualityConfig) -> Self {
        self.quality = quality;
        self
    }

    pub fn set_observer<F>(&mut self, observer: F)
    where
        F: Fn(&SchedulerEvent) + Send + Sync + 'static,
    {
        self.observer = Some(Arc::new(observer));
    }

    pub fn store(&self) -> &TranscriptStore {
        &self.store
    }

    /// Resolves a target to a session id.
    pub fn resolve(&self, target: &SessionTarget) -> Result<String, SessionError> {
        target.resolve(&self.store)
    }

    /// Validates input, creates a session and runs it to a stop.
    pub async fn start(&self, task: &str, config: SessionConfig) -> Result<SessionOutcome, SessionError> {
        for warning in validate_task(task)? {
            warn!("{warning}");
        }
        config.validate()?;

        let handle = self.store.create(task.trim(), &config)?;
        let lease = self.store.acquire_writer(&handle.id)?;
        let session = self.store.load(&handle.id)?;
        self.drive(session, lease).await
    }

    /// Continues an interrupted session from its next round.
    pub async fn resume(
        &self,
        target: &SessionTarget,
        overrides: &ResumeOverrides,
    ) -> Result<SessionOutcome, SessionError> {
        let id = self.resolve(target)?;
        if self.store.handle(&id).is_none() {
            return Err(StoreError::NotFound(id).into());
        }
        let lease = self.store.acquire_writer(&id)?;
        let mut session = self.store.load(&id)?;

        match session.status() {
            SessionStatus::Interrupted => {}
            SessionStatus::Running => {
                warn!(session_id = %id, "Previous run stopped without recording a status; resuming");
            }
            status => return Err(SessionError::NotResumable { id, status }),
        }

        let mut config = session.meta.config.clone();
        if let Some(max_rounds) = overrides.max_rounds {
            config.max_rounds = max_rounds;
        }
        if let Some(timeout_secs) = overrides.timeout_secs {
            config.timeout_secs = timeout_secs;
        }
        if let Some(model) = &overrides.model {
            config.model = Some(model.clone());
        }
        config.validate()?;

        // A run that crashed after its deciding round has nothing left to
        // execute; the scheduler concludes it straight away.
        let decided = overrides.max_rounds.is_none()
            && session
                .last_round()
                .is_some_and(|last| RoundScheduler::check_termination(last, config.max_rounds).is_some());
        let next = session.next_round_index();
        if !decided && config.max_rounds < next {
            return Err(InputError::RoundCapTooLow {
                requested: config.max_rounds,
                next,
            }
            .into());
        }

        if config != session.meta.config {
            info!(session_id = %id, max_rounds = config.max_rounds, "Applying resume overrides");
            self.store.update_config(&id, &config)?;
            session.meta.config = config;
        }

        if let Some(dropped) = session.discarded_round {
            warn!(session_id = %id, round = dropped, "Re-running round that was cut off mid-write");
        }

        self.store.update_status(&id, SessionStatus::Running, None)?;
        session.meta.status = SessionStatus::Running;
        session.meta.cause = None;

        info!(session_id = %id, next_round = next, "Resuming session");
        self.drive(session, lease).await
    }

    /// Regenerates and stores the quality report of a concluded session.
    pub fn report(&self, target: &SessionTarget) -> Result<QualityReport, SessionError> {
        regenerate_report(&self.store, target, self.quality)
    }

    async fn drive(&self, mut session: Session, _lease: WriterLease) -> Result<SessionOutcome, SessionError> {
        let mut scheduler = RoundScheduler::new(
            self.backend.as_ref(),
            &self.store,
            &session.meta.task,
            session.meta.config.clone(),
            self.interrupted.clone(),
        );
        if let Some(observer) = &self.observer {
            scheduler.set_observer(observer.clone());
        }

        let termination = match scheduler.run(&mut session).await {
            Ok(termination) => termination,
            Err(SchedulerError::Storage(StoreError::Invariant(violation))) => {
                return Err(SessionError::Invariant(violation));
            }
            Err(SchedulerError::Storage(err)) => {
                let cause = format!("storage error: {err}");
                if let Err(status_err) =
                    self.store
                        .finalize(session.id(), SessionStatus::Failed, None, Some(&cause))
                {
                    warn!(session_id = %session.id(), error = %status_err, "Could not record failed status");
                }
                return Err(SessionError::Storage(err));
            }
        };

        self.conclude(session, termination)
    }

    fn conclude(&self, mut session: Session, termination: Termination) -> Result<SessionOutcome, SessionError> {
        let id = session.id().to_string();
        let status = termination.status();
        let rounds = session.rounds.len() as u32;
        let max_rounds = session.meta.config.max_rounds;

        let (explanation, next_step) = match &termination {
            Termination::Converged => (
                format!("Both agents proposed the design as final in round {rounds}."),
                Some(format!("parley report {id}")),
            ),
            Termination::Exhausted => (
                format!("Reached the cap of {max_rounds} rounds without both agents proposing final."),
                Some(format!(
                    "parley run --max-rounds {} {:?}",
                    (max_rounds * 2).min(crate::config::MAX_ROUNDS_LIMIT),
                    session.meta.task
                )),
            ),
            Termination::Interrupted => (
                format!("Interrupted after {rounds} completed rounds; progress is saved."),
                Some(format!("parley resume {id}")),
            ),
            Termination::Failed { cause } => (
                cause.clone(),
                Some(format!("parley run {:?}", session.meta.task)),
            ),
        };

        let mut quality = None;
        if termination == Termination::Interrupted {
            self.store
                .update_status(&id, SessionStatus::Interrupted, Some(&explanation))?;
            session.meta.status = SessionStatus::Interrupted;
            session.meta.cause = Some(explanation.clone());
        } else {
            let artifact = session.last_round().map(|r| r.latest_design().to_string());
            let cause = match &termination {
                Termination::Failed { cause } => Some(cause.as_str()),
                _ => None,
            };
            self.store.finalize(&id, status, artifact.as_deref(), cause)?;
            session.meta.status = status;
            session.meta.finalized = true;
            session.meta.cause = cause.map(str::to_string);
            session.final_artifact = artifact;

            if status.is_success() {
                let report = QualityValidator::new(self.quality).run(&session);
                self.store.write_quality_report(&id, &report)?;
                quality = Some(report);
            }
        }

        self.store.write_history(&id, &render_history(&session))?;
        info!(session_id = %id, status = %status, rounds, "Session concluded");

        let dir = self
            .store
            .handle(&id)
            .map(|h| h.dir)
            .unwrap_or_else(|| self.store.root().join(&id));
        Ok(SessionOutcome {
            session_id: id,
            dir,
            status,
            rounds,
            explanation,
            next_step,
            quality,
        })
    }
}

/// Recomputes a concluded session's quality report and stores it.
///
/// Reports are a pure function of the stored transcript, so regenerating
/// one never changes it.
pub fn regenerate_report(
    store: &TranscriptStore,
    target: &SessionTarget,
    thresholds: QualityConfig,
) -> Result<QualityReport, SessionError> {
    let id = target.resolve(store)?;
    let session = store.load(&id)?;
    if !session.status().is_success() {
        return Err(SessionError::NoReport {
            id,
            status: session.status(),
        });
    }
    let report = QualityValidator::new(thresholds).run(&session);
    store.write_quality_report(&id, &report)?;
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_parsing() {
        assert_eq!(SessionTarget::parse("latest"), SessionTarget::Latest);
        assert_eq!(SessionTarget::parse("LATEST"), SessionTarget::Latest);
        assert_eq!(
            SessionTarget::parse("session_20260101_120000_000"),
            SessionTarget::Id("session_20260101_120000_000".to_string())
        );
    }

    #[test]
    fn test_store_invariants_are_classified_separately() {
        let err: SessionError = StoreError::Invariant(InvariantViolation::DoubleFinalize {
            id: "s".to_string(),
        })
        .into();
        assert_eq!(err.kind(), ErrorKind::Invariant);

        let err: SessionError = StoreError::NotFound("s".to_string()).into();
        assert_eq!(err.kind(), ErrorKind::Storage);
        assert!(err.hint().unwrap().contains("parley list"));

        let err: SessionError = InputError::EmptyTask.into();
        assert_eq!(err.kind(), ErrorKind::Input);
    }
}
