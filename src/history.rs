//! Command history
//!
//! Append-only record of every terminal execution, retained for audit
//! and replay. Entries are never mutated or removed; ordering is the
//! order executions reached a terminal state.

use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};

use crate::command::{CommandExecution, CommandId, ExecutionStatus};
use crate::error::TerradeckError;

/// One retained terminal execution
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryEntry {
    pub execution: CommandExecution,
}

impl HistoryEntry {
    pub fn id(&self) -> CommandId {
        self.execution.command.id
    }

    pub fn status(&self) -> &ExecutionStatus {
        &self.execution.status
    }
}

/// Listing order; entries are stored oldest-first
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum HistoryOrder {
    #[default]
    NewestFirst,
    OldestFirst,
}

/// Optional filters for `list`
#[derive(Debug, Clone, Default)]
pub struct HistoryFilter {
    /// Match on the Terraform subcommand, e.g. "plan"
    pub subcommand: Option<String>,
    /// Match on the terminal status label, e.g. "failed"
    pub status: Option<&'static str>,
}

impl HistoryFilter {
    fn matches(&self, entry: &HistoryEntry) -> bool {
        if let Some(subcommand) = &self.subcommand {
            if entry.execution.command.subcommand() != Some(subcommand.as_str()) {
                return false;
            }
        }
        if let Some(status) = self.status {
            if entry.status().label() != status {
                return false;
            }
        }
        true
    }
}

/// Thread-safe, append-only execution log
///
/// Retention is unbounded; see DESIGN.md for the eviction decision.
#[derive(Clone, Default)]
pub struct CommandHistory {
    entries: Arc<RwLock<Vec<HistoryEntry>>>,
}

impl CommandHistory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a terminal execution. Non-terminal records are a pipeline
    /// bug; they are rejected in debug builds.
    pub fn record(&self, execution: CommandExecution) {
        debug_assert!(execution.status.is_terminal());
        self.entries.write().push(HistoryEntry { execution });
    }

    /// List entries matching `filter`, in the requested order
    pub fn list(&self, filter: &HistoryFilter, order: HistoryOrder) -> Vec<HistoryEntry> {
        let entries = self.entries.read();
        let mut matched: Vec<HistoryEntry> = entries
            .iter()
            .filter(|entry| filter.matches(entry))
            .cloned()
            .collect();
        if order == HistoryOrder::NewestFirst {
            matched.reverse();
        }
        matched
    }

    /// Serialize matching entries to pretty JSON, for export or audit
    pub fn export_json(
        &self,
        filter: &HistoryFilter,
        order: HistoryOrder,
    ) -> Result<String, TerradeckError> {
        let entries = self.list(filter, order);
        serde_json::to_string_pretty(&entries)
            .map_err(|err| TerradeckError::Io(err.into()))
    }

    /// Look up one entry by the id of its command
    pub fn find(&self, id: CommandId) -> Option<HistoryEntry> {
        self.entries
            .read()
            .iter()
            .find(|entry| entry.id() == id)
            .cloned()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl std::fmt::Debug for CommandHistory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandHistory")
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command::{Command, CommandKind};

    fn execution(id: u64, args: &[&str], status: ExecutionStatus) -> CommandExecution {
        let command = Command::new(
            CommandId(id),
            "terraform",
            args.iter().map(|s| s.to_string()).collect(),
            "/tmp/project",
            CommandKind::ReadOnly,
        );
        let mut execution = CommandExecution::pending(command);
        execution.status = status;
        execution
    }

    #[test]
    fn starts_empty() {
        let history = CommandHistory::new();
        assert!(history.is_empty());
        assert_eq!(history.len(), 0);
    }

    #[test]
    fn record_appends_in_order() {
        let history = CommandHistory::new();
        history.record(execution(1, &["version"], ExecutionStatus::Succeeded));
        history.record(execution(2, &["plan"], ExecutionStatus::Failed { exit_code: 1 }));

        let oldest = history.list(&HistoryFilter::default(), HistoryOrder::OldestFirst);
        assert_eq!(oldest.len(), 2);
        assert_eq!(oldest[0].id(), CommandId(1));
        assert_eq!(oldest[1].id(), CommandId(2));

        let newest = history.list(&HistoryFilter::default(), HistoryOrder::NewestFirst);
        assert_eq!(newest[0].id(), CommandId(2));
    }

    #[test]
    fn filter_by_subcommand() {
        let history = CommandHistory::new();
        history.record(execution(1, &["plan"], ExecutionStatus::Succeeded));
        history.record(execution(2, &["apply"], ExecutionStatus::Succeeded));
        history.record(execution(3, &["plan", "-destroy"], ExecutionStatus::Succeeded));

        let filter = HistoryFilter {
            subcommand: Some("plan".to_string()),
            ..Default::default()
        };
        let plans = history.list(&filter, HistoryOrder::OldestFirst);
        assert_eq!(plans.len(), 2);
        assert!(plans.iter().all(|e| e.execution.command.subcommand() == Some("plan")));
    }

    #[test]
    fn filter_by_status() {
        let history = CommandHistory::new();
        history.record(execution(1, &["validate"], ExecutionStatus::Failed { exit_code: 1 }));
        history.record(execution(2, &["validate"], ExecutionStatus::Succeeded));
        history.record(execution(3, &["init"], ExecutionStatus::Cancelled));

        let filter = HistoryFilter {
            status: Some("failed"),
            ..Default::default()
        };
        let failed = history.list(&filter, HistoryOrder::NewestFirst);
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].id(), CommandId(1));
    }

    #[test]
    fn find_by_id() {
        let history = CommandHistory::new();
        history.record(execution(7, &["fmt"], ExecutionStatus::Succeeded));
        assert!(history.find(CommandId(7)).is_some());
        assert!(history.find(CommandId(99)).is_none());
    }

    #[test]
    fn stderr_retrievable_after_completion() {
        let history = CommandHistory::new();
        let mut exec = execution(1, &["validate"], ExecutionStatus::Failed { exit_code: 1 });
        exec.captured_stderr = vec!["Error: Invalid block".to_string()];
        history.record(exec);

        let entry = history.find(CommandId(1)).unwrap();
        assert_eq!(entry.execution.stderr_text(), "Error: Invalid block");
    }

    #[test]
    fn export_json_round_trips_entries() {
        let history = CommandHistory::new();
        history.record(execution(1, &["plan"], ExecutionStatus::Succeeded));

        let json = history
            .export_json(&HistoryFilter::default(), HistoryOrder::OldestFirst)
            .unwrap();
        let parsed: Vec<HistoryEntry> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed.len(), 1);
        assert_eq!(parsed[0].id(), CommandId(1));
    }

    #[test]
    fn clones_share_the_log() {
        let history = CommandHistory::new();
        let cloned = history.clone();
        history.record(execution(1, &["version"], ExecutionStatus::Succeeded));
        assert_eq!(cloned.len(), 1);
    }
}
