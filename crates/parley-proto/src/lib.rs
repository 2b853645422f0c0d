//! # parley-proto
//!
//! Shared types, error definitions, and traits for Parley.
//!
//! This crate provides the vocabulary used across all Parley crates:
//! - The two debate roles and their hand-off markers
//! - Convergence signals as parsed from role output
//! - Round and session status types
//! - The `Backend` trait that language-model adapters implement

mod backend;
mod error;
mod role;
mod round;
mod status;

pub use backend::{Backend, InvokeOptions};
pub use error::BackendError;
pub use role::Role;
pub use round::{RoleTurn, Round, RoundPhase};
pub use status::{Ambiguity, ConvergenceReading, ConvergenceStatus, SessionStatus};
