//! # parley-core
//!
//! Debate orchestration for Parley.
//!
//! This crate provides:
//! - The round scheduler that alternates architect and reviewer turns
//! - Convergence status parsing and response format checks
//! - The durable transcript store with single-writer leases
//! - Session start, resume and conclusion
//! - Post-debate quality validation

pub mod config;
mod convergence;
mod history;
mod prompts;
mod quality;
mod response;
mod scheduler;
mod session;
mod store;
pub mod task;
pub mod testing;

pub use config::{
    CliConfig, ConfigError, ConfigWarning, DebateConfig, OutputConfig, ParleyConfig, QualityConfig,
    SessionConfig,
};
pub use convergence::ConvergenceParser;
pub use history::render_history;
pub use prompts::PromptBuilder;
pub use quality::{
    Check, ConcernTally, Finding, QualityReport, QualityValidator, Rating, Severity,
};
pub use response::{FormatViolation, check_format, extract_design, extract_handoff};
pub use scheduler::{Observer, RoundScheduler, SchedulerError, SchedulerEvent, Termination};
pub use session::{
    ErrorKind, ResumeOverrides, SessionError, SessionManager, SessionOutcome, SessionTarget,
    regenerate_report,
};
pub use store::{
    InvariantViolation, Session, SessionHandle, SessionMeta, StoreError, TranscriptStore,
    WriterLease,
};
pub use task::{InputError, read_task_file, validate_task};
