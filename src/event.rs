//! Events published to presentation subscribers
//!
//! Output lines are pushed incrementally as they arrive from the
//! process; lifecycle events fire on queue admission and terminal
//! transitions. Snapshots travel as `Arc`s, subscribers never see a
//! partially updated view.

use std::sync::Arc;

use crate::command::{CommandId, ExecutionStatus};
use crate::workspace::WorkspaceSnapshot;

/// Which stream a live output line came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputStream {
    Stdout,
    Stderr,
}

/// Everything the presentation layer can subscribe to
#[derive(Debug, Clone)]
pub enum OrchestratorEvent {
    /// Command accepted and waiting for (or bypassing) admission
    CommandQueued { id: CommandId, command: String },
    /// Process spawned
    CommandStarted { id: CommandId },
    /// One live output line
    CommandOutput {
        id: CommandId,
        stream: OutputStream,
        line: String,
    },
    /// Terminal transition; the execution is now in history
    CommandCompleted {
        id: CommandId,
        status: ExecutionStatus,
    },
    /// Workspace set was reconciled from tool output
    WorkspaceSnapshotChanged { snapshot: Arc<WorkspaceSnapshot> },
    /// Project tree was rebuilt
    ProjectTreeChanged { generation: u64 },
}

impl OrchestratorEvent {
    /// Short description for logging
    pub fn description(&self) -> String {
        match self {
            Self::CommandQueued { id, command } => format!("{id} queued: {command}"),
            Self::CommandStarted { id } => format!("{id} started"),
            Self::CommandOutput { id, stream, line } => {
                let tag = match stream {
                    OutputStream::Stdout => "out",
                    OutputStream::Stderr => "err",
                };
                format!("{id} {tag}: {line}")
            }
            Self::CommandCompleted { id, status } => format!("{id} completed: {status}"),
            Self::WorkspaceSnapshotChanged { snapshot } => {
                format!("workspace snapshot changed ({} workspaces)", snapshot.len())
            }
            Self::ProjectTreeChanged { generation } => {
                format!("project tree rebuilt (generation {generation})")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptions_identify_the_command() {
        let event = OrchestratorEvent::CommandQueued {
            id: CommandId(4),
            command: "terraform plan".to_string(),
        };
        assert_eq!(event.description(), "#4 queued: terraform plan");

        let event = OrchestratorEvent::CommandCompleted {
            id: CommandId(4),
            status: ExecutionStatus::Failed { exit_code: 1 },
        };
        assert!(event.description().contains("exit code 1"));
    }

    #[test]
    fn output_lines_carry_stream_tag() {
        let event = OrchestratorEvent::CommandOutput {
            id: CommandId(2),
            stream: OutputStream::Stderr,
            line: "Error: oops".to_string(),
        };
        assert_eq!(event.description(), "#2 err: Error: oops");
    }
}
