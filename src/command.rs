//! Command model and Terraform argument builders
//!
//! A `Command` is an immutable description of one Terraform invocation;
//! a `CommandExecution` is its mutable lifecycle record, owned by the
//! execution pipeline and handed to history once terminal.
//! Builders mirror the flags of the supported subcommands.

use std::fmt;
use std::path::PathBuf;
use std::time::SystemTime;

use serde::{Deserialize, Serialize};

/// Opaque, monotonically assigned command identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CommandId(pub u64);

impl fmt::Display for CommandId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Whether an invocation can alter state/lock semantics
///
/// Terraform takes an advisory state lock for init/plan/apply and
/// workspace selection; those must be serialized per directory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CommandKind {
    ReadOnly,
    Mutating,
}

/// One Terraform invocation, immutable once created
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Command {
    pub id: CommandId,
    /// Executable name or path
    pub program: String,
    /// Arguments after the program, e.g. `["workspace", "list"]`
    pub args: Vec<String>,
    pub working_dir: PathBuf,
    pub requested_at: SystemTime,
    pub kind: CommandKind,
}

impl Command {
    pub fn new(
        id: CommandId,
        program: impl Into<String>,
        args: Vec<String>,
        working_dir: impl Into<PathBuf>,
        kind: CommandKind,
    ) -> Self {
        Self {
            id,
            program: program.into(),
            args,
            working_dir: working_dir.into(),
            requested_at: SystemTime::now(),
            kind,
        }
    }

    /// Display form, e.g. `terraform workspace list`
    pub fn display_line(&self) -> String {
        let mut line = self.program.clone();
        for arg in &self.args {
            line.push(' ');
            line.push_str(arg);
        }
        line
    }

    /// First argument, i.e. the Terraform subcommand
    pub fn subcommand(&self) -> Option<&str> {
        self.args.first().map(String::as_str)
    }

    /// Whether this is a `workspace ...` invocation
    pub fn is_workspace_op(&self) -> bool {
        self.subcommand() == Some("workspace")
    }
}

/// Lifecycle state of an execution; the last four variants are terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Succeeded,
    Failed { exit_code: i32 },
    Cancelled,
    LaunchFailed { error: String },
}

impl ExecutionStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending | Self::Running)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, Self::Succeeded)
    }

    /// Short label for filtering and display
    pub fn label(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Succeeded => "succeeded",
            Self::Failed { .. } => "failed",
            Self::Cancelled => "cancelled",
            Self::LaunchFailed { .. } => "launch_failed",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Failed { exit_code } => write!(f, "failed (exit code {exit_code})"),
            Self::LaunchFailed { error } => write!(f, "launch failed ({error})"),
            other => f.write_str(other.label()),
        }
    }
}

/// Lifecycle record of one command
///
/// Mutated only by the execution pipeline; presentation code sees clones.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandExecution {
    pub command: Command,
    pub status: ExecutionStatus,
    pub started_at: Option<SystemTime>,
    pub ended_at: Option<SystemTime>,
    pub captured_stdout: Vec<String>,
    pub captured_stderr: Vec<String>,
}

impl CommandExecution {
    pub fn pending(command: Command) -> Self {
        Self {
            command,
            status: ExecutionStatus::Pending,
            started_at: None,
            ended_at: None,
            captured_stdout: Vec::new(),
            captured_stderr: Vec::new(),
        }
    }

    /// Joined stderr for error reporting
    pub fn stderr_text(&self) -> String {
        self.captured_stderr.join("\n")
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Inline variables
// ─────────────────────────────────────────────────────────────────────────────

/// A `-var name=value` pair
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InlineVar {
    pub name: String,
    pub value: String,
}

fn push_vars(args: &mut Vec<String>, vars: &[InlineVar], var_files: &[String]) {
    for var in vars {
        if var.name.is_empty() || var.value.is_empty() {
            continue;
        }
        args.push("-var".to_string());
        args.push(format!("{}={}", var.name, var.value));
    }
    for file in var_files {
        args.push("-var-file".to_string());
        args.push(file.clone());
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// init
// ─────────────────────────────────────────────────────────────────────────────

/// Settings for `terraform init`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InitSettings {
    pub disable_backend: bool,
    /// `-backend-config key=value` pairs
    pub backend_config: Vec<(String, String)>,
    /// `-backend-config <path>` files
    pub backend_config_paths: Vec<PathBuf>,
    pub force_copy: bool,
    pub disable_download: bool,
    pub disable_input: bool,
    pub disable_hold_lock: bool,
    pub plugin_dirs: Vec<PathBuf>,
    pub reconfigure: bool,
    pub migrate_state: bool,
    pub upgrade: bool,
    pub ignore_remote_version: bool,
    pub test_directories: Vec<PathBuf>,
}

/// Builder for `terraform init` argument vectors
pub struct InitCommandBuilder {
    args: Vec<String>,
}

impl InitCommandBuilder {
    pub fn new() -> Self {
        Self {
            args: vec!["init".to_string()],
        }
    }

    pub fn disable_backend(mut self) -> Self {
        self.args.push("-backend=false".to_string());
        self
    }

    pub fn backend_config(mut self, key: &str, value: &str) -> Self {
        self.args.push("-backend-config".to_string());
        self.args.push(format!("{key}={value}"));
        self
    }

    pub fn backend_config_path(mut self, path: &PathBuf) -> Self {
        self.args.push("-backend-config".to_string());
        self.args.push(path.display().to_string());
        self
    }

    pub fn force_copy(mut self) -> Self {
        self.args.push("-force-copy".to_string());
        self
    }

    pub fn disable_download(mut self) -> Self {
        self.args.push("-get=false".to_string());
        self
    }

    pub fn disable_input(mut self) -> Self {
        self.args.push("-input=false".to_string());
        self
    }

    pub fn disable_hold_lock(mut self) -> Self {
        self.args.push("-lock=false".to_string());
        self
    }

    pub fn plugin_dir(mut self, dir: &PathBuf) -> Self {
        self.args.push("-plugin-dir".to_string());
        self.args.push(dir.display().to_string());
        self
    }

    pub fn reconfigure(mut self) -> Self {
        self.args.push("-reconfigure".to_string());
        self
    }

    pub fn migrate_state(mut self) -> Self {
        self.args.push("-migrate-state".to_string());
        self
    }

    pub fn upgrade(mut self) -> Self {
        self.args.push("-upgrade".to_string());
        self
    }

    pub fn ignore_remote_version(mut self) -> Self {
        self.args.push("-ignore-remote-version".to_string());
        self
    }

    pub fn test_directory(mut self, dir: &PathBuf) -> Self {
        self.args.push("-test-directory".to_string());
        self.args.push(dir.display().to_string());
        self
    }

    pub fn build(self) -> Vec<String> {
        self.args
    }

    pub fn from_settings(settings: &InitSettings) -> Vec<String> {
        let mut builder = Self::new();
        if settings.disable_backend {
            builder = builder.disable_backend();
        }
        for (key, value) in &settings.backend_config {
            builder = builder.backend_config(key, value);
        }
        for path in &settings.backend_config_paths {
            builder = builder.backend_config_path(path);
        }
        if settings.force_copy {
            builder = builder.force_copy();
        }
        if settings.disable_download {
            builder = builder.disable_download();
        }
        if settings.disable_input {
            builder = builder.disable_input();
        }
        if settings.disable_hold_lock {
            builder = builder.disable_hold_lock();
        }
        for dir in &settings.plugin_dirs {
            builder = builder.plugin_dir(dir);
        }
        if settings.reconfigure {
            builder = builder.reconfigure();
        }
        if settings.migrate_state {
            builder = builder.migrate_state();
        }
        if settings.upgrade {
            builder = builder.upgrade();
        }
        if settings.ignore_remote_version {
            builder = builder.ignore_remote_version();
        }
        for dir in &settings.test_directories {
            builder = builder.test_directory(dir);
        }
        builder.build()
    }
}

impl Default for InitCommandBuilder {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// plan
// ─────────────────────────────────────────────────────────────────────────────

/// Settings for `terraform plan`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PlanSettings {
    pub refresh_only: bool,
    pub destroy: bool,
    pub no_refresh: bool,
    pub inline_vars: Vec<InlineVar>,
    pub var_files: Vec<String>,
    pub out: Option<String>,
}

/// Build `terraform plan` arguments
pub fn plan_args(settings: &PlanSettings) -> Vec<String> {
    let mut args = vec!["plan".to_string()];
    if settings.refresh_only {
        args.push("-refresh-only".to_string());
    }
    if settings.destroy {
        args.push("-destroy".to_string());
    }
    if settings.no_refresh {
        args.push("-refresh=false".to_string());
    }
    push_vars(&mut args, &settings.inline_vars, &settings.var_files);
    if let Some(out) = &settings.out {
        args.push("-out".to_string());
        args.push(out.clone());
    }
    args
}

// ─────────────────────────────────────────────────────────────────────────────
// apply
// ─────────────────────────────────────────────────────────────────────────────

/// Settings for `terraform apply`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ApplySettings {
    pub auto_approve: bool,
    pub backup: Option<PathBuf>,
    pub disable_backup: bool,
    pub destroy: bool,
    pub disable_lock: bool,
    pub input: bool,
    pub state: Option<PathBuf>,
    pub state_out: Option<PathBuf>,
    pub inline_vars: Vec<InlineVar>,
    pub var_files: Vec<String>,
    /// Saved plan file to apply
    pub plan_file: Option<PathBuf>,
}

/// Build `terraform apply` arguments
pub fn apply_args(settings: &ApplySettings) -> Vec<String> {
    let mut args = vec!["apply".to_string()];
    if settings.auto_approve {
        args.push("-auto-approve".to_string());
    }
    if let Some(backup) = &settings.backup {
        args.push("-backup".to_string());
        args.push(backup.display().to_string());
    }
    if settings.disable_backup {
        args.push("-backup=-".to_string());
    }
    if settings.destroy {
        args.push("-destroy".to_string());
    }
    if settings.disable_lock {
        args.push("-lock=false".to_string());
    }
    if settings.input {
        args.push("-input".to_string());
    }
    if let Some(state) = &settings.state {
        args.push("-state".to_string());
        args.push(state.display().to_string());
    }
    if let Some(state_out) = &settings.state_out {
        args.push("-state-out".to_string());
        args.push(state_out.display().to_string());
    }
    push_vars(&mut args, &settings.inline_vars, &settings.var_files);
    if let Some(plan_file) = &settings.plan_file {
        args.push(plan_file.display().to_string());
    }
    args
}

// ─────────────────────────────────────────────────────────────────────────────
// validate / fmt / version / workspace
// ─────────────────────────────────────────────────────────────────────────────

/// Settings for `terraform validate`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ValidateSettings {
    pub no_tests: bool,
    pub test_directories: Vec<PathBuf>,
    /// Machine-readable output mode requested by the caller
    pub json: bool,
}

/// Build `terraform validate` arguments
pub fn validate_args(settings: &ValidateSettings) -> Vec<String> {
    let mut args = vec!["validate".to_string()];
    if settings.no_tests {
        args.push("-no-tests".to_string());
    }
    for dir in &settings.test_directories {
        args.push("-test-directory".to_string());
        args.push(dir.display().to_string());
    }
    if settings.json {
        args.push("-json".to_string());
    }
    args
}

/// Settings for `terraform fmt`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FormatSettings {
    /// Restrict formatting to one path
    pub path: Option<PathBuf>,
    /// Check only, do not rewrite files
    pub check: bool,
    pub recursive: bool,
}

/// Build `terraform fmt` arguments
pub fn format_args(settings: &FormatSettings) -> Vec<String> {
    let mut args = vec!["fmt".to_string()];
    if settings.check {
        args.push("-check".to_string());
    }
    if settings.recursive {
        args.push("-recursive".to_string());
    }
    if let Some(path) = &settings.path {
        args.push(path.display().to_string());
    }
    args
}

/// Build `terraform version` arguments
pub fn version_args() -> Vec<String> {
    vec!["version".to_string()]
}

/// Build `terraform workspace list` arguments
pub fn workspace_list_args() -> Vec<String> {
    vec!["workspace".to_string(), "list".to_string()]
}

/// Build `terraform workspace select <name>` arguments
pub fn workspace_select_args(name: &str) -> Vec<String> {
    vec!["workspace".to_string(), "select".to_string(), name.to_string()]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_display_line_joins_args() {
        let cmd = Command::new(
            CommandId(1),
            "terraform",
            workspace_list_args(),
            "/tmp/project",
            CommandKind::ReadOnly,
        );
        assert_eq!(cmd.display_line(), "terraform workspace list");
        assert!(cmd.is_workspace_op());
        assert_eq!(cmd.subcommand(), Some("workspace"));
    }

    #[test]
    fn status_terminal_classification() {
        assert!(!ExecutionStatus::Pending.is_terminal());
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Succeeded.is_terminal());
        assert!(ExecutionStatus::Failed { exit_code: 1 }.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
        assert!(ExecutionStatus::LaunchFailed {
            error: "not found".to_string()
        }
        .is_terminal());
    }

    #[test]
    fn status_serializes_with_state_tag() {
        let json = serde_json::to_value(ExecutionStatus::Failed { exit_code: 2 }).unwrap();
        assert_eq!(json["state"], "failed");
        assert_eq!(json["exit_code"], 2);
    }

    #[test]
    fn init_builder_from_settings() {
        let settings = InitSettings {
            disable_backend: true,
            backend_config: vec![("bucket".to_string(), "tf-state".to_string())],
            upgrade: true,
            ..Default::default()
        };
        let args = InitCommandBuilder::from_settings(&settings);
        assert_eq!(
            args,
            vec!["init", "-backend=false", "-backend-config", "bucket=tf-state", "-upgrade"]
        );
    }

    #[test]
    fn plan_args_with_vars_and_out() {
        let settings = PlanSettings {
            destroy: true,
            inline_vars: vec![InlineVar {
                name: "region".to_string(),
                value: "eu-west-1".to_string(),
            }],
            var_files: vec!["prod.tfvars".to_string()],
            out: Some("plan.out".to_string()),
            ..Default::default()
        };
        assert_eq!(
            plan_args(&settings),
            vec![
                "plan",
                "-destroy",
                "-var",
                "region=eu-west-1",
                "-var-file",
                "prod.tfvars",
                "-out",
                "plan.out"
            ]
        );
    }

    #[test]
    fn plan_args_skip_empty_inline_vars() {
        let settings = PlanSettings {
            inline_vars: vec![InlineVar::default()],
            ..Default::default()
        };
        assert_eq!(plan_args(&settings), vec!["plan"]);
    }

    #[test]
    fn apply_args_with_plan_file_last() {
        let settings = ApplySettings {
            auto_approve: true,
            disable_lock: true,
            plan_file: Some(PathBuf::from("plan.out")),
            ..Default::default()
        };
        assert_eq!(
            apply_args(&settings),
            vec!["apply", "-auto-approve", "-lock=false", "plan.out"]
        );
    }

    #[test]
    fn validate_args_json_mode() {
        let settings = ValidateSettings {
            json: true,
            no_tests: true,
            ..Default::default()
        };
        assert_eq!(validate_args(&settings), vec!["validate", "-no-tests", "-json"]);
    }

    #[test]
    fn format_args_check_and_path() {
        let settings = FormatSettings {
            path: Some(PathBuf::from("main.tf")),
            check: true,
            recursive: false,
        };
        assert_eq!(format_args(&settings), vec!["fmt", "-check", "main.tf"]);
    }

    #[test]
    fn workspace_select_args_include_name() {
        assert_eq!(
            workspace_select_args("staging"),
            vec!["workspace", "select", "staging"]
        );
    }
}
