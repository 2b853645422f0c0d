//! Configuration types for Parley.
//!
//! Configuration is read from an optional YAML file. Every field has a
//! default, so an empty file (or none at all) yields a working setup.
//! Command-line flags are applied on top before validation.

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Upper bound for `debate.max_rounds`.
pub const MAX_ROUNDS_LIMIT: u32 = 30;

/// Upper bound for `debate.timeout_secs`.
pub const TIMEOUT_LIMIT_SECS: u64 = 3600;

/// Upper bound for `debate.max_retries`.
pub const MAX_RETRIES_LIMIT: u32 = 5;

/// Top-level configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ParleyConfig {
    #[serde(default)]
    pub debate: DebateConfig,

    #[serde(default)]
    pub cli: CliConfig,

    #[serde(default)]
    pub output: OutputConfig,

    #[serde(default)]
    pub quality: QualityConfig,

    /// Verbose logging.
    #[serde(default)]
    pub verbose: bool,
}

impl ParleyConfig {
    /// Loads configuration from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path_ref = path.as_ref();
        debug!(path = %path_ref.display(), "Loading configuration from file");
        let content = std::fs::read_to_string(path_ref)?;
        let config = Self::parse_yaml(&content)?;
        debug!(
            backend = %config.cli.backend,
            max_rounds = config.debate.max_rounds,
            timeout_secs = config.debate.timeout_secs,
            "Configuration loaded"
        );
        Ok(config)
    }

    /// Parses configuration from a YAML string. Empty input yields defaults.
    pub fn parse_yaml(content: &str) -> Result<Self, ConfigError> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Validates the configuration.
    ///
    /// Out-of-range values are errors. Questionable but usable values come
    /// back as warnings.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, ConfigError> {
        let mut warnings = Vec::new();

        check_range(
            "debate.max_rounds",
            u64::from(self.debate.max_rounds),
            1,
            u64::from(MAX_ROUNDS_LIMIT),
        )?;
        check_range("debate.timeout_secs", self.debate.timeout_secs, 1, TIMEOUT_LIMIT_SECS)?;
        check_range(
            "debate.max_retries",
            u64::from(self.debate.max_retries),
            0,
            u64::from(MAX_RETRIES_LIMIT),
        )?;

        if self.cli.backend == "custom" && self.cli.command.is_none() {
            return Err(ConfigError::MissingCommand);
        }

        if !["arg", "stdin"].contains(&self.cli.prompt_mode.as_str()) {
            return Err(ConfigError::InvalidValue {
                field: "cli.prompt_mode".to_string(),
                message: format!("expected 'arg' or 'stdin', got '{}'", self.cli.prompt_mode),
            });
        }

        if self.debate.timeout_secs < 30 {
            warnings.push(ConfigWarning::InvalidValue {
                field: "debate.timeout_secs".to_string(),
                message: format!(
                    "{}s is very short for a full design response",
                    self.debate.timeout_secs
                ),
            });
        }

        if self.quality.min_rounds > self.quality.max_rounds {
            warnings.push(ConfigWarning::InvalidValue {
                field: "quality".to_string(),
                message: format!(
                    "min_rounds ({}) is above max_rounds ({}); every round count will be flagged",
                    self.quality.min_rounds, self.quality.max_rounds
                ),
            });
        }

        Ok(warnings)
    }

    /// Snapshot of the settings a session needs to run or resume.
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            max_rounds: self.debate.max_rounds,
            timeout_secs: self.debate.timeout_secs,
            max_retries: self.debate.max_retries,
            model: self.debate.model.clone(),
            output_dir: PathBuf::from(&self.output.dir),
            backend: self.cli.backend.clone(),
        }
    }
}

fn check_range(field: &str, value: u64, min: u64, max: u64) -> Result<(), ConfigError> {
    if value < min || value > max {
        return Err(ConfigError::OutOfRange {
            field: field.to_string(),
            value,
            min,
            max,
        });
    }
    Ok(())
}

/// Debate loop settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DebateConfig {
    /// Round cap. Reaching it without consensus exhausts the session.
    #[serde(default = "default_max_rounds")]
    pub max_rounds: u32,

    /// Per-call backend timeout in seconds.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Extra attempts per call after a timeout or transient failure.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,

    /// Model selector passed to the backend.
    #[serde(default)]
    pub model: Option<String>,
}

fn default_max_rounds() -> u32 {
    8
}

fn default_timeout_secs() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    2
}

impl Default for DebateConfig {
    fn default() -> Self {
        Self {
            max_rounds: default_max_rounds(),
            timeout_secs: default_timeout_secs(),
            max_retries: default_max_retries(),
            model: None,
        }
    }
}

/// CLI backend configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CliConfig {
    /// Backend to use: "auto", "claude", "gemini", "codex", or "custom".
    #[serde(default = "default_backend")]
    pub backend: String,

    /// Custom command (for backend: "custom").
    #[serde(default)]
    pub command: Option<String>,

    /// Extra arguments placed before the prompt (for backend: "custom").
    #[serde(default)]
    pub args: Vec<String>,

    /// How to pass prompts: "arg" or "stdin".
    #[serde(default = "default_prompt_mode")]
    pub prompt_mode: String,

    /// Flag placed before the prompt in arg mode, e.g. "-p".
    #[serde(default)]
    pub prompt_flag: Option<String>,
}

fn default_backend() -> String {
    "auto".to_string()
}

fn default_prompt_mode() -> String {
    "arg".to_string()
}

impl Default for CliConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            command: None,
            args: Vec::new(),
            prompt_mode: default_prompt_mode(),
            prompt_flag: None,
        }
    }
}

/// Where session directories are written.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutputConfig {
    #[serde(default = "default_output_dir")]
    pub dir: String,
}

fn default_output_dir() -> String {
    "./debate_output".to_string()
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            dir: default_output_dir(),
        }
    }
}

/// Thresholds for the round-count quality check.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct QualityConfig {
    /// Fewer rounds than this is flagged as converging unusually fast.
    #[serde(default = "default_quality_min_rounds")]
    pub min_rounds: u32,

    /// More rounds than this is flagged as unusually long.
    #[serde(default = "default_quality_max_rounds")]
    pub max_rounds: u32,
}

fn default_quality_min_rounds() -> u32 {
    3
}

fn default_quality_max_rounds() -> u32 {
    10
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            min_rounds: default_quality_min_rounds(),
            max_rounds: default_quality_max_rounds(),
        }
    }
}

/// Settings captured in a session's metadata at creation time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionConfig {
    pub max_rounds: u32,
    pub timeout_secs: u64,
    pub max_retries: u32,
    #[serde(default)]
    pub model: Option<String>,
    pub output_dir: PathBuf,
    pub backend: String,
}

impl SessionConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    /// Checks the bounds that also apply to the file configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_range("max_rounds", u64::from(self.max_rounds), 1, u64::from(MAX_ROUNDS_LIMIT))?;
        check_range("timeout_secs", self.timeout_secs, 1, TIMEOUT_LIMIT_SECS)?;
        check_range(
            "max_retries",
            u64::from(self.max_retries),
            0,
            u64::from(MAX_RETRIES_LIMIT),
        )
    }
}

/// Configuration warnings emitted during validation.
#[derive(Debug, Clone)]
pub enum ConfigWarning {
    /// Field has a usable but questionable value.
    InvalidValue { field: String, message: String },
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigWarning::InvalidValue { field, message } => {
                write!(f, "Warning [{}]: {}", field, message)
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("YAML parse error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    #[error("{field} must be between {min} and {max}, got {value}")]
    OutOfRange {
        field: String,
        value: u64,
        min: u64,
        max: u64,
    },

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },

    #[error("cli.command is required when cli.backend is 'custom'")]
    MissingCommand,
}
