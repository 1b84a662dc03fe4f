//! Process-wide configuration, resolved once from the environment at startup.
//!
//! There is no configuration file. Every field has a default and can be
//! overridden by a single environment variable:
//!
//! | Variable | Default |
//! |---|---|
//! | `INFERENCE_CMD` | stub command writing a placeholder JSON to `{output}` |
//! | `INFERENCE_SHELL` | `false` |
//! | `INFERENCE_TIMEOUT_SECS` | `3600` |
//! | `WORK_DIR` | `/tmp/csm_api` |
//! | `MAX_UPLOAD_BYTES` | 1 GiB |
//! | `BIND_ADDRESS` | `0.0.0.0` |
//! | `PORT` | `8000` |
//! | `LOG_LEVEL` | `info` |
//! | `LOG_FORMAT` | `pretty` |

use crate::error::{Error, Result, ResultExt};
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Placeholder replaced by the uploaded audio path.
pub const INPUT_PLACEHOLDER: &str = "{input}";

/// Placeholder replaced by the expected JSON output path.
pub const OUTPUT_PLACEHOLDER: &str = "{output}";

/// Command used when `INFERENCE_CMD` is unset. Writes a stub result so a fresh
/// deployment answers `/infer` before the real transcriber is wired in.
pub const DEFAULT_INFERENCE_CMD: &str = r#"sh -c 'printf "%s\n" "{\"ok\": true, \"note\": \"Set INFERENCE_CMD to your transcribe command\"}" > "$2"' sh {input} {output}"#;

/// Default command timeout in seconds (one hour).
pub const DEFAULT_TIMEOUT_SECS: u64 = 3600;

/// Default max upload size in bytes (1 GiB).
pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 1024 * 1024 * 1024;

/// Default HTTP port.
pub const DEFAULT_PORT: u16 = 8000;

/// Root configuration structure.
#[derive(Debug, Clone, Default)]
pub struct Config {
    pub inference: InferenceConfig,
    pub storage: StorageConfig,
    pub server: ServerConfig,
    pub observability: ObservabilityConfig,
}

/// External command settings.
#[derive(Debug, Clone)]
pub struct InferenceConfig {
    /// Command template with `{input}` and `{output}` placeholders
    pub command: String,

    /// Run the template through `sh -c` instead of spawning it directly
    pub shell: bool,

    /// Seconds to wait for the command before killing it
    pub timeout_secs: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            command: DEFAULT_INFERENCE_CMD.to_string(),
            shell: false,
            timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }
}

impl InferenceConfig {
    /// Whether the template carries both placeholders.
    pub fn has_placeholders(&self) -> bool {
        self.command.contains(INPUT_PLACEHOLDER) && self.command.contains(OUTPUT_PLACEHOLDER)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

/// Scratch storage settings.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// Root under which per-request scratch directories are created
    pub work_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            work_dir: PathBuf::from("/tmp/csm_api"),
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind: String,
    pub port: u16,
    /// Largest accepted request body in bytes
    pub max_upload_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
        }
    }
}

impl ServerConfig {
    /// Address the HTTP listener binds to.
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        let ip: IpAddr = self.bind.parse().map_err(|_| {
            Error::Config(format!(
                "BIND_ADDRESS must be an IP address, got {:?}",
                self.bind
            ))
        })?;
        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Logging settings.
#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Log format (json, pretty)
    pub log_format: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
        }
    }
}

impl Config {
    /// Resolve configuration from the process environment.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Resolve configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut config = Self::default();
        config.apply_overrides(lookup)?;
        Ok(config)
    }

    /// Apply variable overrides on top of the current values.
    ///
    /// Empty variables count as unset.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(cmd) = get("INFERENCE_CMD") {
            self.inference.command = cmd;
        }
        if let Some(shell) = get("INFERENCE_SHELL") {
            self.inference.shell = parse_bool("INFERENCE_SHELL", &shell)?;
        }
        if let Some(timeout) = get("INFERENCE_TIMEOUT_SECS") {
            self.inference.timeout_secs = parse_var("INFERENCE_TIMEOUT_SECS", &timeout)?;
            if self.inference.timeout_secs == 0 {
                return Err(Error::Config(
                    "INFERENCE_TIMEOUT_SECS must be greater than zero".into(),
                ));
            }
        }

        if let Some(dir) = get("WORK_DIR") {
            self.storage.work_dir = PathBuf::from(dir);
        }

        if let Some(bind) = get("BIND_ADDRESS") {
            self.server.bind = bind.trim().to_string();
            self.server.socket_addr()?;
        }
        if let Some(port) = get("PORT") {
            self.server.port = parse_var("PORT", &port)?;
        }
        if let Some(limit) = get("MAX_UPLOAD_BYTES") {
            self.server.max_upload_bytes = parse_var("MAX_UPLOAD_BYTES", &limit)?;
            if self.server.max_upload_bytes == 0 {
                return Err(Error::Config(
                    "MAX_UPLOAD_BYTES must be greater than zero".into(),
                ));
            }
        }

        if let Some(level) = get("LOG_LEVEL") {
            self.observability.log_level = normalize_log_level(&level).to_string();
        }
        if let Some(format) = get("LOG_FORMAT") {
            self.observability.log_format = format.trim().to_ascii_lowercase();
        }

        Ok(())
    }

    /// Create the scratch root (and parents) if it does not exist yet.
    pub fn ensure_work_dir(&self) -> Result<()> {
        std::fs::create_dir_all(&self.storage.work_dir).context(format!(
            "Failed to create work directory {}",
            self.storage.work_dir.display()
        ))
    }
}

/// Map a user-facing level name onto a `tracing` level.
///
/// Accepts any case plus the `warning`/`critical` spellings; anything
/// unrecognized becomes `info`.
pub fn normalize_log_level(level: &str) -> &'static str {
    match level.trim().to_ascii_lowercase().as_str() {
        "trace" => "trace",
        "debug" => "debug",
        "info" => "info",
        "warn" | "warning" => "warn",
        "error" | "critical" | "fatal" => "error",
        _ => "info",
    }
}

fn parse_var<T: FromStr>(name: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| Error::Config(format!("{name} must be a non-negative integer, got {value:?}")))
}

fn parse_bool(name: &str, value: &str) -> Result<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(Error::Config(format!(
            "{name} must be a boolean, got {value:?}"
        ))),
    }
}
