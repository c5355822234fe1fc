//! Session configuration
//!
//! One `SessionConfig` is bound to a project directory at startup and
//! threaded into the orchestrator; switching projects means a new config
//! and a new orchestrator.

use std::path::{Path, PathBuf};
use std::time::Duration;

/// Default grace period between SIGTERM and SIGKILL on cancellation
const DEFAULT_KILL_GRACE: Duration = Duration::from_millis(2000);

/// Environment override for the Terraform binary path
pub const TERRAFORM_BIN_ENV: &str = "TERRADECK_TERRAFORM_BIN";
/// Environment override for the cancellation grace period (milliseconds)
pub const KILL_GRACE_ENV: &str = "TERRADECK_KILL_GRACE_MS";

/// Process-wide session settings for one project directory
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Root directory all Terraform commands run against
    pub working_dir: PathBuf,
    /// Terraform executable (name resolved via PATH, or absolute path)
    pub terraform_bin: String,
    /// How long a cancelled process gets to exit before being killed
    pub kill_grace: Duration,
    /// Extra environment variables injected into spawned processes
    pub env_vars: Vec<(String, String)>,
}

impl SessionConfig {
    /// Create a config with defaults for the given project directory
    pub fn new(working_dir: impl Into<PathBuf>) -> Self {
        Self {
            working_dir: working_dir.into(),
            terraform_bin: "terraform".to_string(),
            kill_grace: DEFAULT_KILL_GRACE,
            env_vars: Vec::new(),
        }
    }

    /// Create a config applying `TERRADECK_*` environment overrides
    pub fn from_env(working_dir: impl Into<PathBuf>) -> Self {
        let mut config = Self::new(working_dir);
        if let Ok(bin) = std::env::var(TERRAFORM_BIN_ENV) {
            if !bin.trim().is_empty() {
                config.terraform_bin = bin;
            }
        }
        if let Ok(ms) = std::env::var(KILL_GRACE_ENV) {
            if let Ok(ms) = ms.trim().parse::<u64>() {
                config.kill_grace = Duration::from_millis(ms);
            }
        }
        config
    }

    /// Override the Terraform binary
    pub fn with_terraform_bin(mut self, bin: impl Into<String>) -> Self {
        self.terraform_bin = bin.into();
        self
    }

    /// Override the cancellation grace period
    pub fn with_kill_grace(mut self, grace: Duration) -> Self {
        self.kill_grace = grace;
        self
    }

    /// Add an environment variable for spawned processes
    pub fn with_env_var(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.env_vars.push((name.into(), value.into()));
        self
    }

    pub fn working_dir(&self) -> &Path {
        &self.working_dir
    }
}
