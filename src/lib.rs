//! Terradeck - command orchestration core for a terminal Terraform front-end
//!
//! Spawns `terraform` processes, streams their output live, serializes
//! conflicting operations per working directory, keeps a replayable
//! command history, and reconciles workspace and project-tree snapshots
//! from what the tool reports.

pub mod command;
pub mod config;
pub mod error;
pub mod event;
pub mod facade;
pub mod history;
pub mod process;
pub mod project;
pub mod queue;
pub mod workspace;

pub use command::{
    ApplySettings, Command, CommandExecution, CommandId, CommandKind, ExecutionStatus,
    FormatSettings, InitSettings, InlineVar, PlanSettings, ValidateSettings,
};
pub use config::SessionConfig;
pub use error::{FixSuggestion, TerradeckError};
pub use event::{OrchestratorEvent, OutputStream};
pub use facade::{Orchestrator, Submission};
pub use history::{CommandHistory, HistoryEntry, HistoryFilter, HistoryOrder};
pub use process::{ProcessResult, ProcessRunner};
pub use project::{NodeKind, ProjectFileNode, ProjectState, ValidationOutcome};
pub use queue::CommandQueue;
pub use workspace::{Workspace, WorkspaceManager, WorkspaceSnapshot};
