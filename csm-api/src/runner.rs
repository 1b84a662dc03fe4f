//! External inference command runner.
//!
//! Runs the configured command template once per request:
//! - Placeholder validation before anything is spawned
//! - Direct argv spawning (no shell) unless shell mode is enabled
//! - Timeout handling with the child killed on expiry
//! - Output resolution through an ordered list of parse strategies

use csm_common::config::{
    InferenceConfig, DEFAULT_TIMEOUT_SECS, INPUT_PLACEHOLDER, OUTPUT_PLACEHOLDER,
};
use csm_common::util::truncate_chars;
use serde_json::{json, Value};
use std::fmt;
use std::path::Path;
use std::process::Stdio;
use std::time::{Duration, Instant};
use tokio::process::Command;

/// Characters of stdout/stderr kept in logs.
const LOG_PREVIEW_CHARS: usize = 2000;

/// Key used when raw stdout is returned as the result.
pub const RAW_STDOUT_KEY: &str = "stdout";

/// Inference command failures.
#[derive(Debug, thiserror::Error)]
pub enum InferenceError {
    #[error("INFERENCE_CMD must contain {{input}} and {{output}} placeholders")]
    MissingPlaceholders,

    #[error("Invalid inference command template: {0}")]
    InvalidTemplate(String),

    #[error("Failed to execute inference command `{program}`: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Inference command timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    #[error("Inference command failed (rc={code}): {stderr}")]
    Failed { code: i32, stderr: String },
}

/// A concrete command line ready to spawn.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Invocation {
    /// Program and arguments passed straight to the OS.
    Exec { program: String, args: Vec<String> },
    /// A line handed to `sh -c`.
    Shell(String),
}

impl Invocation {
    pub fn program(&self) -> &str {
        match self {
            Self::Exec { program, .. } => program,
            Self::Shell(_) => "sh",
        }
    }

    fn command(&self) -> Command {
        match self {
            Self::Exec { program, args } => {
                let mut cmd = Command::new(program);
                cmd.args(args);
                cmd
            }
            Self::Shell(line) => {
                let mut cmd = Command::new("sh");
                cmd.arg("-c").arg(line);
                cmd
            }
        }
    }
}

impl fmt::Display for Invocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exec { program, args } => {
                let words =
                    std::iter::once(program.as_str()).chain(args.iter().map(String::as_str));
                f.write_str(&shell_words::join(words))
            }
            Self::Shell(line) => f.write_str(line),
        }
    }
}

/// What the command left at the output path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutputFile {
    Missing,
    Present(Vec<u8>),
    /// The path exists but could not be read.
    Unreadable,
}

/// Everything the parse strategies look at once the command succeeded.
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub stdout: String,
    pub output_file: OutputFile,
}

/// One way of turning command output into a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseStrategy {
    /// Parse the output file as JSON.
    OutputFile,
    /// Parse stdout as JSON; only applies when no output file was written.
    StdoutJson,
    /// Wrap raw stdout under [`RAW_STDOUT_KEY`]. Always succeeds.
    RawStdout,
}

/// Strategies in the order they are tried.
pub const PARSE_ORDER: [ParseStrategy; 3] = [
    ParseStrategy::OutputFile,
    ParseStrategy::StdoutJson,
    ParseStrategy::RawStdout,
];

impl ParseStrategy {
    pub fn apply(self, output: &CommandOutput) -> Option<Value> {
        match self {
            Self::OutputFile => match &output.output_file {
                OutputFile::Present(bytes) => serde_json::from_slice(bytes).ok(),
                OutputFile::Missing | OutputFile::Unreadable => None,
            },
            Self::StdoutJson => match output.output_file {
                OutputFile::Missing => serde_json::from_str(&output.stdout).ok(),
                OutputFile::Present(_) | OutputFile::Unreadable => None,
            },
            Self::RawStdout => Some(raw_stdout(&output.stdout)),
        }
    }
}

fn raw_stdout(stdout: &str) -> Value {
    json!({ RAW_STDOUT_KEY: stdout })
}

/// Pick the result using the first strategy in [`PARSE_ORDER`] that yields one.
pub fn resolve_output(output: &CommandOutput) -> Value {
    PARSE_ORDER
        .iter()
        .find_map(|strategy| {
            let value = strategy.apply(output)?;
            tracing::debug!(strategy = ?strategy, "Resolved inference output");
            Some(value)
        })
        .unwrap_or_else(|| raw_stdout(&output.stdout))
}

/// Replace both placeholders in a single left-to-right pass, so substituted
/// paths are never scanned for placeholders themselves.
fn substitute(template: &str, input: &str, output: &str) -> String {
    let mut result = String::with_capacity(template.len() + input.len() + output.len());
    let mut rest = template;

    loop {
        let next = [(INPUT_PLACEHOLDER, input), (OUTPUT_PLACEHOLDER, output)]
            .into_iter()
            .filter_map(|(placeholder, value)| {
                rest.find(placeholder).map(|pos| (pos, placeholder, value))
            })
            .min_by_key(|(pos, _, _)| *pos);

        match next {
            Some((pos, placeholder, value)) => {
                result.push_str(&rest[..pos]);
                result.push_str(value);
                rest = &rest[pos + placeholder.len()..];
            }
            None => {
                result.push_str(rest);
                return result;
            }
        }
    }
}

/// Runs the configured inference command.
#[derive(Debug, Clone)]
pub struct InferenceRunner {
    template: String,
    shell: bool,
    timeout: Duration,
}

impl InferenceRunner {
    /// Create a runner in exec mode with the default one hour timeout.
    pub fn new(template: impl Into<String>) -> Self {
        Self {
            template: template.into(),
            shell: false,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECS),
        }
    }

    pub fn from_config(config: &InferenceConfig) -> Self {
        Self::new(config.command.clone())
            .with_shell(config.shell)
            .with_timeout(config.timeout())
    }

    /// Run through `sh -c` instead of spawning directly.
    pub fn with_shell(mut self, shell: bool) -> Self {
        self.shell = shell;
        self
    }

    /// Set the command timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn template(&self) -> &str {
        &self.template
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn has_placeholders(&self) -> bool {
        self.template.contains(INPUT_PLACEHOLDER) && self.template.contains(OUTPUT_PLACEHOLDER)
    }

    /// Build the concrete command for a pair of paths.
    pub fn invocation(&self, input: &Path, output: &Path) -> Result<Invocation, InferenceError> {
        if !self.has_placeholders() {
            return Err(InferenceError::MissingPlaceholders);
        }

        let input = input.to_string_lossy();
        let output = output.to_string_lossy();

        if self.shell {
            let line = substitute(
                &self.template,
                &shell_words::quote(&input),
                &shell_words::quote(&output),
            );
            return Ok(Invocation::Shell(line));
        }

        let tokens = shell_words::split(&self.template)
            .map_err(|e| InferenceError::InvalidTemplate(e.to_string()))?;
        let mut words = tokens
            .iter()
            .map(|word| substitute(word, &input, &output));

        let program = words
            .next()
            .ok_or_else(|| InferenceError::InvalidTemplate("command is empty".into()))?;

        Ok(Invocation::Exec {
            program,
            args: words.collect(),
        })
    }

    /// Run the command for one input and resolve its JSON result.
    pub async fn run(&self, input: &Path, output: &Path) -> Result<Value, InferenceError> {
        let invocation = self.invocation(input, output)?;
        tracing::info!(command = %invocation, "Running inference command");

        let mut cmd = invocation.command();
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        let started = Instant::now();
        let result = tokio::time::timeout(self.timeout, cmd.output()).await;

        let completed = match result {
            Ok(Ok(completed)) => completed,
            Ok(Err(source)) => {
                return Err(InferenceError::Spawn {
                    program: invocation.program().to_string(),
                    source,
                })
            }
            Err(_) => {
                tracing::warn!(
                    timeout_secs = self.timeout.as_secs_f64(),
                    "Inference command timed out, killing it"
                );
                return Err(InferenceError::Timeout {
                    timeout: self.timeout,
                });
            }
        };

        let stdout = String::from_utf8_lossy(&completed.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&completed.stderr).into_owned();

        tracing::info!(
            duration_ms = started.elapsed().as_millis() as u64,
            status = %completed.status,
            "Inference command finished"
        );
        tracing::info!("[stdout] {}", truncate_chars(&stdout, LOG_PREVIEW_CHARS));
        tracing::info!("[stderr] {}", truncate_chars(&stderr, LOG_PREVIEW_CHARS));

        if !completed.status.success() {
            let code = completed.status.code().unwrap_or(-1);
            return Err(InferenceError::Failed { code, stderr });
        }

        let output_file = match tokio::fs::read(output).await {
            Ok(bytes) => OutputFile::Present(bytes),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => OutputFile::Missing,
            Err(e) => {
                tracing::warn!(path = %output.display(), error = %e, "Output file unreadable");
                OutputFile::Unreadable
            }
        };

        Ok(resolve_output(&CommandOutput {
            stdout,
            output_file,
        }))
    }
}
