//! Auto-detection of installed agent CLIs.
//!
//! When config specifies `backend: auto`, the first tool in the priority
//! list that answers `--version` is used.

use std::process::Command;
use std::sync::OnceLock;
use tracing::debug;

/// Default priority order for backend detection.
pub const DEFAULT_PRIORITY: &[&str] = &["claude", "gemini", "codex"];

/// Cached result of the default detection for the process lifetime.
static DETECTED_BACKEND: OnceLock<Option<String>> = OnceLock::new();

/// Error returned when no backends are available.
#[derive(Debug, Clone)]
pub struct NoBackendError {
    /// Backends that were checked.
    pub checked: Vec<String>,
}

impl std::fmt::Display for NoBackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "No supported agent CLI found in PATH.")?;
        writeln!(f)?;
        writeln!(f, "Checked backends: {}", self.checked.join(", "))?;
        writeln!(f)?;
        writeln!(f, "Install one of them, or configure a custom command:")?;
        writeln!(f, "  cli:")?;
        writeln!(f, "    backend: custom")?;
        write!(f, "    command: my-agent")
    }
}

impl std::error::Error for NoBackendError {}

/// Checks if a backend is available by running `<command> --version`.
pub fn is_backend_available(backend: &str) -> bool {
    match Command::new(backend).arg("--version").output() {
        Ok(output) => {
            let available = output.status.success();
            debug!(backend = backend, available = available, "Backend availability check");
            available
        }
        Err(_) => {
            debug!(backend = backend, available = false, "Backend not found in PATH");
            false
        }
    }
}

/// Returns the first available backend from `priority`.
pub fn detect_backend(priority: &[&str]) -> Result<String, NoBackendError> {
    debug!(priority = ?priority, "Starting backend auto-detection");

    let mut checked = Vec::new();
    for &backend in priority {
        checked.push(backend.to_string());
        if is_backend_available(backend) {
            debug!(backend = backend, "Backend detected and selected");
            return Ok(backend.to_string());
        }
    }

    debug!(checked = ?checked, "No backends available");
    Err(NoBackendError { checked })
}

/// Detects a backend using the default priority. The result is cached.
pub fn detect_backend_default() -> Result<String, NoBackendError> {
    let cached = DETECTED_BACKEND.get_or_init(|| detect_backend(DEFAULT_PRIORITY).ok());
    cached.clone().ok_or_else(|| NoBackendError {
        checked: DEFAULT_PRIORITY.iter().map(|s| (*s).to_string()).collect(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_backend_available_nonexistent() {
        assert!(!is_backend_available("definitely_not_a_real_command_xyz123"));
    }

    #[test]
    fn test_detect_backend_skips_missing_tools() {
        let result = detect_backend(&["definitely_not_a_real_command_xyz123", "true"]);
        assert_eq!(result.unwrap(), "true");
    }

    #[test]
    fn test_detect_backend_reports_everything_checked() {
        let err = detect_backend(&["missing_one_xyz", "missing_two_xyz"]).unwrap_err();
        assert_eq!(err.checked, vec!["missing_one_xyz", "missing_two_xyz"]);
    }

    #[test]
    fn test_no_backend_error_display() {
        let err = NoBackendError {
            checked: vec!["claude".to_string(), "gemini".to_string()],
        };
        let msg = format!("{}", err);
        assert!(msg.contains("No supported agent CLI found"));
        assert!(msg.contains("claude, gemini"));
        assert!(msg.contains("backend: custom"));
    }
}
