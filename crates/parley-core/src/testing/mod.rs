//! Testing utilities for deterministic debate runs.

pub mod fixtures;
pub mod mock_backend;

pub use fixtures::{Scenario, response, sample_round, sample_session};
pub use mock_backend::{ExecutionRecord, MockBackend, MockReply};
