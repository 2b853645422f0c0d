//! Task description validation.

use crate::config::ConfigError;
use std::path::{Path, PathBuf};

pub const MIN_TASK_WORDS: usize = 3;
pub const MIN_TASK_CHARS: usize = 15;
const TERSE_TASK_WORDS: usize = 6;
const LONG_TASK_CHARS: usize = 2000;

/// Problems with user input, raised before any session exists.
#[derive(Debug, thiserror::Error)]
pub enum InputError {
    #[error("task description is empty")]
    EmptyTask,

    #[error(
        "task description is too short ({words} words, {chars} characters); \
         describe what to design in at least {} words and {} characters",
        MIN_TASK_WORDS,
        MIN_TASK_CHARS
    )]
    TaskTooShort { words: usize, chars: usize },

    #[error("cannot read task file {}: {source}", path.display())]
    TaskFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("no sessions found in {}", .0.display())]
    NoSessions(PathBuf),

    #[error("max rounds {requested} leaves no room for round {next}; raise it to at least {next}")]
    RoundCapTooLow { requested: u32, next: u32 },
}

/// Reads a task description from a file.
pub fn read_task_file(path: &Path) -> Result<String, InputError> {
    std::fs::read_to_string(path).map_err(|source| InputError::TaskFile {
        path: path.to_path_buf(),
        source,
    })
}

/// Checks a task description. Returns advisory warnings for usable tasks.
pub fn validate_task(task: &str) -> Result<Vec<String>, InputError> {
    let task = task.trim();
    if task.is_empty() {
        return Err(InputError::EmptyTask);
    }

    let words = task.split_whitespace().count();
    let chars = task.chars().count();
    if words < MIN_TASK_WORDS || chars < MIN_TASK_CHARS {
        return Err(InputError::TaskTooShort { words, chars });
    }

    let mut warnings = Vec::new();
    if words < TERSE_TASK_WORDS {
        warnings.push(format!(
            "task is terse ({words} words); constraints and scale help the agents converge on something concrete"
        ));
    }
    if chars > LONG_TASK_CHARS {
        warnings.push(format!(
            "task is long ({chars} characters); consider splitting it into separate debates"
        ));
    }
    Ok(warnings)
}
