//! Error types with fix suggestions

use thiserror::Error;

/// Trait for errors that provide fix suggestions
pub trait FixSuggestion {
    fn fix_suggestion(&self) -> Option<&str>;
}

/// All error variants are part of the public API.
#[derive(Error, Debug)]
pub enum TerradeckError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to launch '{program}': {message}")]
    Launch { program: String, message: String },

    #[error("Command '{command}' failed with exit code {exit_code}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    #[error("Command '{command}' was cancelled")]
    Cancelled { command: String },

    #[error("Reconciliation anomaly in {context}: {details}")]
    ReconciliationAnomaly { context: String, details: String },

    #[error("No history entry with id {id}")]
    HistoryEntryNotFound { id: u64 },

    #[error("Workspace name cannot be empty")]
    InvalidWorkspaceName,

    #[error("Project root '{path}' is not a directory")]
    InvalidProjectRoot { path: String },

    #[error("Execution pipeline channel closed unexpectedly")]
    ChannelClosed,
}

impl FixSuggestion for TerradeckError {
    fn fix_suggestion(&self) -> Option<&str> {
        match self {
            TerradeckError::Io(_) => Some("Check file path and permissions"),
            TerradeckError::Launch { .. } => {
                Some("Is Terraform installed and in PATH? Set TERRADECK_TERRAFORM_BIN to override")
            }
            TerradeckError::CommandFailed { .. } => {
                Some("Inspect the captured stderr for the Terraform diagnostic")
            }
            TerradeckError::Cancelled { .. } => None,
            TerradeckError::ReconciliationAnomaly { .. } => {
                Some("Re-run `terraform workspace list` in the project directory to verify tool output")
            }
            TerradeckError::HistoryEntryNotFound { .. } => {
                Some("List history to find a valid entry id")
            }
            TerradeckError::InvalidWorkspaceName => Some("Provide a non-empty workspace name"),
            TerradeckError::InvalidProjectRoot { .. } => {
                Some("Point --chdir at an existing Terraform project directory")
            }
            TerradeckError::ChannelClosed => None,
        }
    }
}
