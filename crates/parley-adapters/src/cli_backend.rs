//! Command shapes for the supported agent CLIs.

use crate::auto_detect::{NoBackendError, detect_backend_default};
use parley_core::CliConfig;
use std::io::Write;
use tempfile::NamedTempFile;

/// Prompts longer than this many bytes are passed through a temp file.
pub const MAX_INLINE_PROMPT_BYTES: usize = 7000;

/// Error when a backend cannot be built from configuration.
#[derive(Debug, thiserror::Error)]
pub enum BackendConfigError {
    #[error("custom backend requires a command to be specified")]
    MissingCommand,

    #[error("unknown backend '{0}' (expected auto, claude, gemini, codex, or custom)")]
    Unknown(String),

    #[error(transparent)]
    NoBackend(#[from] NoBackendError),
}

/// How to pass prompts to the CLI tool.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromptMode {
    /// Pass prompt as a command-line argument.
    Arg,
    /// Write prompt to stdin.
    Stdin,
}

/// Where the model flag goes relative to the prompt argument.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelPlacement {
    BeforePrompt,
    AfterPrompt,
}

/// A CLI backend configuration for executing prompts.
#[derive(Debug, Clone)]
pub struct CliBackend {
    /// Name shown in logs and session metadata.
    pub name: String,
    /// The command to execute.
    pub command: String,
    /// Arguments placed before everything else.
    pub args: Vec<String>,
    /// How to pass the prompt.
    pub prompt_mode: PromptMode,
    /// Argument flag for prompt (if prompt_mode is Arg).
    pub prompt_flag: Option<String>,
    /// Flag that selects a model, if the tool supports one.
    pub model_flag: Option<String>,
    pub model_placement: ModelPlacement,
}

/// A fully built invocation. Holds the prompt temp file, if any, so it
/// outlives the child process.
#[derive(Debug)]
pub struct BuiltCommand {
    pub program: String,
    pub args: Vec<String>,
    pub stdin: Option<String>,
    pub temp_file: Option<NamedTempFile>,
}

impl CliBackend {
    /// Creates a backend from configuration. `auto` probes the PATH.
    pub fn from_config(config: &CliConfig) -> Result<Self, BackendConfigError> {
        match config.backend.as_str() {
            "auto" => {
                let name = detect_backend_default()?;
                Self::from_name(&name)
            }
            "custom" => Self::custom(config),
            name => Self::from_name(name),
        }
    }

    /// Creates one of the built-in backends by name.
    pub fn from_name(name: &str) -> Result<Self, BackendConfigError> {
        match name {
            "claude" => Ok(Self::claude()),
            "gemini" => Ok(Self::gemini()),
            "codex" => Ok(Self::codex()),
            other => Err(BackendConfigError::Unknown(other.to_string())),
        }
    }

    /// Claude in print mode: `claude -p --model M PROMPT`.
    pub fn claude() -> Self {
        Self {
            name: "claude".to_string(),
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: None,
            model_flag: Some("--model".to_string()),
            model_placement: ModelPlacement::BeforePrompt,
        }
    }

    /// Gemini in headless mode: `gemini -p PROMPT -m M`.
    pub fn gemini() -> Self {
        Self {
            name: "gemini".to_string(),
            command: "gemini".to_string(),
            args: Vec::new(),
            prompt_mode: PromptMode::Arg,
            prompt_flag: Some("-p".to_string()),
            model_flag: Some("-m".to_string()),
            model_placement: ModelPlacement::AfterPrompt,
        }
    }

    /// Codex non-interactive: `codex exec --model M PROMPT`.
    pub fn codex() -> Self {
        Self {
            name: "codex".to_string(),
            command: "codex".to_string(),
            args: vec!["exec".to_string()],
            prompt_mode: PromptMode::Arg,
            prompt_flag: None, // Positional argument
            model_flag: Some("--model".to_string()),
            model_placement: ModelPlacement::BeforePrompt,
        }
    }

    /// Creates a custom backend from configuration. Custom tools get no
    /// model flag; put one in `args` if the tool needs it.
    pub fn custom(config: &CliConfig) -> Result<Self, BackendConfigError> {
        let command = config
            .command
            .clone()
            .filter(|c| !c.trim().is_empty())
            .ok_or(BackendConfigError::MissingCommand)?;
        let prompt_mode = if config.prompt_mode == "stdin" {
            PromptMode::Stdin
        } else {
            PromptMode::Arg
        };

        Ok(Self {
            name: "custom".to_string(),
            command,
            args: config.args.clone(),
            prompt_mode,
            prompt_flag: config.prompt_flag.clone(),
            model_flag: None,
            model_placement: ModelPlacement::BeforePrompt,
        })
    }

    /// Builds the full command for one invocation.
    pub fn build_command(&self, prompt: &str, model: Option<&str>) -> BuiltCommand {
        let mut args = self.args.clone();
        let model_args: Vec<String> = match (&self.model_flag, model) {
            (Some(flag), Some(model)) => vec![flag.clone(), model.to_string()],
            _ => Vec::new(),
        };

        if self.model_placement == ModelPlacement::BeforePrompt || self.prompt_mode == PromptMode::Stdin {
            args.extend(model_args.iter().cloned());
        }

        let (stdin, temp_file) = match self.prompt_mode {
            PromptMode::Arg => {
                let (prompt_text, temp_file) = inline_or_temp_file(prompt);
                if let Some(ref flag) = self.prompt_flag {
                    args.push(flag.clone());
                }
                args.push(prompt_text);
                if self.model_placement == ModelPlacement::AfterPrompt {
                    args.extend(model_args);
                }
                (None, temp_file)
            }
            PromptMode::Stdin => (Some(prompt.to_string()), None),
        };

        tracing::debug!(
            command = %self.command,
            args_count = args.len(),
            prompt_len = prompt.len(),
            uses_stdin = stdin.is_some(),
            uses_temp_file = temp_file.is_some(),
            "Built CLI command"
        );
        tracing::trace!(prompt = %prompt, "Full prompt content");

        BuiltCommand {
            program: self.command.clone(),
            args,
            stdin,
            temp_file,
        }
    }
}

fn inline_or_temp_file(prompt: &str) -> (String, Option<NamedTempFile>) {
    if prompt.len() <= MAX_INLINE_PROMPT_BYTES {
        return (prompt.to_string(), None);
    }
    match NamedTempFile::new() {
        Ok(mut file) => {
            if let Err(e) = file.write_all(prompt.as_bytes()).and_then(|()| file.flush()) {
                tracing::warn!("Failed to write prompt to temp file: {}", e);
                return (prompt.to_string(), None);
            }
            let path = file.path().display().to_string();
            (
                format!("Read the complete instructions in {path} and respond exactly as they ask."),
                Some(file),
            )
        }
        Err(e) => {
            tracing::warn!("Failed to create temp file: {}", e);
            (prompt.to_string(), None)
        }
    }
}
