//! # parley-adapters
//!
//! Agent CLI backends for Parley.
//!
//! Built-in command shapes exist for Claude, Gemini and Codex; any other
//! tool can be driven as a `custom` backend. Every backend is executed by
//! [`CliExecutor`], which implements the `Backend` trait from
//! `parley-proto`.
//!
//! ## Auto-Detection
//!
//! When config specifies `backend: auto`, the `auto_detect` module picks
//! the first installed tool in [`DEFAULT_PRIORITY`] order.

mod auto_detect;
mod cli_backend;
mod cli_executor;

pub use auto_detect::{
    DEFAULT_PRIORITY, NoBackendError, detect_backend, detect_backend_default, is_backend_available,
};
pub use cli_backend::{
    BackendConfigError, BuiltCommand, CliBackend, MAX_INLINE_PROMPT_BYTES, ModelPlacement,
    PromptMode,
};
pub use cli_executor::{CliExecutor, ExecutionResult};
