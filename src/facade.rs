//! Orchestration facade
//!
//! The single entry point the presentation layer drives. One
//! `Orchestrator` is the session: it owns the working directory, the
//! admission queue, the history log, and the workspace/project caches,
//! and runs the execution pipeline for every submitted command.
//!
//! Pipeline per submission: queue admission (cancellable, no process is
//! ever spawned for a cancelled-while-queued command) → spawn → live
//! line fan-out + capture → terminal transition → completion handling
//! (history append, workspace/project reconciliation, event publish).
//! Only the completion handler mutates the shared snapshots.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, oneshot};
use tracing::{debug, instrument, warn};

use crate::command::{
    apply_args, format_args, plan_args, validate_args, version_args, workspace_list_args,
    workspace_select_args, ApplySettings, Command, CommandExecution, CommandId, CommandKind,
    ExecutionStatus, FormatSettings, InitCommandBuilder, InitSettings, PlanSettings,
    ValidateSettings,
};
use crate::config::SessionConfig;
use crate::error::TerradeckError;
use crate::event::{OrchestratorEvent, OutputStream};
use crate::history::{CommandHistory, HistoryEntry, HistoryFilter, HistoryOrder};
use crate::process::{ProcessResult, ProcessRunner};
use crate::project::{ProjectFileNode, ProjectState, ValidationOutcome};
use crate::queue::CommandQueue;
use crate::workspace::{parse_workspace_list, WorkspaceManager, WorkspaceSnapshot};

const EVENT_CHANNEL_CAPACITY: usize = 1024;

/// Handle for one submitted command
///
/// Completion can also be observed on the event bus; this handle saves
/// callers from filtering it for their own command.
#[derive(Debug)]
pub struct Submission {
    id: CommandId,
    done: oneshot::Receiver<CommandExecution>,
}

impl Submission {
    pub fn id(&self) -> CommandId {
        self.id
    }

    /// Await the terminal execution record
    pub async fn wait(self) -> Result<CommandExecution, TerradeckError> {
        self.done.await.map_err(|_| TerradeckError::ChannelClosed)
    }
}

struct Inner {
    config: SessionConfig,
    queue: CommandQueue,
    runner: ProcessRunner,
    history: CommandHistory,
    workspaces: WorkspaceManager,
    project: ProjectState,
    events: broadcast::Sender<OrchestratorEvent>,
    /// Cancellation senders for pending/running executions
    active: DashMap<u64, mpsc::Sender<()>>,
    next_id: AtomicU64,
}

/// Session-wide orchestrator; cheap to clone, clones share all state
#[derive(Clone)]
pub struct Orchestrator {
    inner: Arc<Inner>,
}

impl Orchestrator {
    /// Bind a new session to the configured project directory and build
    /// the initial project snapshot.
    pub fn new(config: SessionConfig) -> Result<Self, TerradeckError> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let runner =
            ProcessRunner::new(config.kill_grace).with_env_vars(config.env_vars.clone());
        let project = ProjectState::new(&config.working_dir);
        project.rebuild()?;

        Ok(Self {
            inner: Arc::new(Inner {
                runner,
                project,
                config,
                queue: CommandQueue::new(),
                history: CommandHistory::new(),
                workspaces: WorkspaceManager::new(),
                events,
                active: DashMap::new(),
                next_id: AtomicU64::new(0),
            }),
        })
    }

    pub fn config(&self) -> &SessionConfig {
        &self.inner.config
    }

    /// Subscribe to live output and lifecycle events
    pub fn subscribe(&self) -> broadcast::Receiver<OrchestratorEvent> {
        self.inner.events.subscribe()
    }

    fn publish(&self, event: OrchestratorEvent) {
        debug!("{}", event.description());
        let _ = self.inner.events.send(event);
    }

    // ─────────────────────────────────────────────────────────────────
    // Request API
    // ─────────────────────────────────────────────────────────────────

    /// Submit raw Terraform arguments. Typed helpers below cover the
    /// supported subcommands.
    pub fn submit(&self, args: Vec<String>, kind: CommandKind) -> Submission {
        let id = CommandId(self.inner.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        let command = Command::new(
            id,
            &self.inner.config.terraform_bin,
            args,
            &self.inner.config.working_dir,
            kind,
        );

        let (done_tx, done_rx) = oneshot::channel();
        let (cancel_tx, cancel_rx) = mpsc::channel(1);
        self.inner.active.insert(id.0, cancel_tx);
        self.publish(OrchestratorEvent::CommandQueued {
            id,
            command: command.display_line(),
        });

        let this = self.clone();
        tokio::spawn(async move {
            this.run_pipeline(command, cancel_rx, done_tx).await;
        });

        Submission { id, done: done_rx }
    }

    pub fn init(&self, settings: &InitSettings) -> Submission {
        self.submit(InitCommandBuilder::from_settings(settings), CommandKind::Mutating)
    }

    pub fn plan(&self, settings: &PlanSettings) -> Submission {
        self.submit(plan_args(settings), CommandKind::Mutating)
    }

    pub fn apply(&self, settings: &ApplySettings) -> Submission {
        self.submit(apply_args(settings), CommandKind::Mutating)
    }

    pub fn validate(&self, settings: &ValidateSettings) -> Submission {
        self.submit(validate_args(settings), CommandKind::ReadOnly)
    }

    /// `fmt` rewrites files in place, so it serializes and triggers a
    /// project rebuild like any other mutating command.
    pub fn fmt(&self, settings: &FormatSettings) -> Submission {
        self.submit(format_args(settings), CommandKind::Mutating)
    }

    pub fn version(&self) -> Submission {
        self.submit(version_args(), CommandKind::ReadOnly)
    }

    /// Request cancellation. Queued commands resolve cancelled without a
    /// process ever starting; running commands terminate best-effort and
    /// the caller learns of it via the completion event, not here.
    pub fn cancel(&self, id: CommandId) -> bool {
        match self.inner.active.get(&id.0) {
            Some(cancel) => {
                let _ = cancel.try_send(());
                true
            }
            None => false,
        }
    }

    /// Re-submit a past command as a fresh execution. The new command
    /// gets its own id and timestamps; the original entry is untouched.
    pub fn replay(&self, entry_id: CommandId) -> Result<Submission, TerradeckError> {
        let entry = self
            .inner
            .history
            .find(entry_id)
            .ok_or(TerradeckError::HistoryEntryNotFound { id: entry_id.0 })?;
        let command = &entry.execution.command;
        Ok(self.submit(command.args.clone(), command.kind))
    }

    /// Re-read the workspace set from the tool and replace the snapshot
    #[instrument(skip(self))]
    pub async fn refresh_workspaces(&self) -> Result<Arc<WorkspaceSnapshot>, TerradeckError> {
        let execution = self
            .submit(workspace_list_args(), CommandKind::ReadOnly)
            .wait()
            .await?;
        ensure_success(&execution)?;

        let snapshot = parse_workspace_list(&execution.captured_stdout)?;
        self.inner.workspaces.apply_listing(snapshot);
        let snapshot = self.inner.workspaces.snapshot();
        self.publish(OrchestratorEvent::WorkspaceSnapshotChanged {
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Switch the active workspace. On failure the snapshot is left
    /// unchanged and the error carries the tool's stderr.
    #[instrument(skip(self))]
    pub async fn select_workspace(
        &self,
        name: &str,
    ) -> Result<Arc<WorkspaceSnapshot>, TerradeckError> {
        if name.trim().is_empty() {
            return Err(TerradeckError::InvalidWorkspaceName);
        }

        let execution = self
            .submit(workspace_select_args(name), CommandKind::Mutating)
            .wait()
            .await?;
        ensure_success(&execution)?;

        self.inner.workspaces.mark_active(name);
        let snapshot = self.inner.workspaces.snapshot();
        self.publish(OrchestratorEvent::WorkspaceSnapshotChanged {
            snapshot: snapshot.clone(),
        });
        Ok(snapshot)
    }

    /// Last known-good workspace snapshot
    pub fn workspaces(&self) -> Arc<WorkspaceSnapshot> {
        self.inner.workspaces.snapshot()
    }

    /// Rebuild the project tree off the runtime threads. Returns the
    /// published generation, or `None` if a newer rebuild won.
    pub async fn rebuild_project(&self) -> Result<Option<u64>, TerradeckError> {
        let project = self.inner.project.clone();
        let generation = tokio::task::spawn_blocking(move || project.rebuild())
            .await
            .map_err(|_| TerradeckError::ChannelClosed)??;
        if let Some(generation) = generation {
            self.publish(OrchestratorEvent::ProjectTreeChanged { generation });
        }
        Ok(generation)
    }

    /// Cached project tree snapshot
    pub fn project_tree(&self) -> Arc<ProjectFileNode> {
        self.inner.project.tree()
    }

    /// Case-insensitive search over the cached project tree
    pub fn search(&self, query: &str) -> Vec<std::path::PathBuf> {
        self.inner.project.search(query)
    }

    /// Record a per-file validation outcome reported by a collaborator
    pub fn mark_validation(&self, path: &std::path::Path, outcome: ValidationOutcome) -> bool {
        self.inner.project.mark_validation(path, outcome)
    }

    pub fn history(&self, filter: &HistoryFilter, order: HistoryOrder) -> Vec<HistoryEntry> {
        self.inner.history.list(filter, order)
    }

    pub fn history_entry(&self, id: CommandId) -> Option<HistoryEntry> {
        self.inner.history.find(id)
    }

    /// Cancel all in-flight commands and wait for them to drain.
    /// Returns false if something was still active at the deadline.
    pub async fn shutdown(&self) -> bool {
        for entry in self.inner.active.iter() {
            let _ = entry.value().try_send(());
        }
        let deadline =
            tokio::time::Instant::now() + self.inner.config.kill_grace + Duration::from_secs(2);
        while !self.inner.active.is_empty() {
            if tokio::time::Instant::now() >= deadline {
                warn!("shutdown deadline reached with commands still active");
                return false;
            }
            tokio::time::sleep(Duration::from_millis(25)).await;
        }
        true
    }

    // ─────────────────────────────────────────────────────────────────
    // Execution pipeline
    // ─────────────────────────────────────────────────────────────────

    async fn run_pipeline(
        &self,
        command: Command,
        mut cancel_rx: mpsc::Receiver<()>,
        done_tx: oneshot::Sender<CommandExecution>,
    ) {
        let mut execution = CommandExecution::pending(command.clone());

        // Admission; a cancel here means the process never starts
        let permit = tokio::select! {
            permit = self.inner.queue.admit(&command.working_dir, command.kind) => Some(permit),
            _ = cancel_rx.recv() => None,
        };
        let Some(permit) = permit else {
            debug!(id = %command.id, "cancelled while queued");
            execution.status = ExecutionStatus::Cancelled;
            execution.ended_at = Some(SystemTime::now());
            self.finish(execution, done_tx);
            return;
        };

        execution.status = ExecutionStatus::Running;
        execution.started_at = Some(SystemTime::now());
        self.publish(OrchestratorEvent::CommandStarted { id: command.id });

        let mut handle = self.inner.runner.spawn(
            &command.program,
            &command.args,
            &command.working_dir,
            cancel_rx,
        );

        // Fan lines out live while capturing them; per-stream order is
        // preserved, cross-stream interleaving is not guaranteed.
        let mut stdout_open = true;
        let mut stderr_open = true;
        while stdout_open || stderr_open {
            tokio::select! {
                line = handle.stdout.recv(), if stdout_open => match line {
                    Some(line) => {
                        execution.captured_stdout.push(line.clone());
                        self.publish(OrchestratorEvent::CommandOutput {
                            id: command.id,
                            stream: OutputStream::Stdout,
                            line,
                        });
                    }
                    None => stdout_open = false,
                },
                line = handle.stderr.recv(), if stderr_open => match line {
                    Some(line) => {
                        execution.captured_stderr.push(line.clone());
                        self.publish(OrchestratorEvent::CommandOutput {
                            id: command.id,
                            stream: OutputStream::Stderr,
                            line,
                        });
                    }
                    None => stderr_open = false,
                },
            }
        }

        execution.status = match handle.wait().await {
            ProcessResult::Exited { code: 0 } => ExecutionStatus::Succeeded,
            ProcessResult::Exited { code } => {
                ExecutionStatus::Failed { exit_code: code }
            }
            ProcessResult::Cancelled => ExecutionStatus::Cancelled,
            ProcessResult::LaunchFailed { error } => {
                ExecutionStatus::LaunchFailed { error }
            }
        };
        execution.ended_at = Some(SystemTime::now());

        drop(permit);
        self.finish(execution, done_tx);
    }

    /// Terminal transition: record, reconcile, publish. The only place
    /// that writes to history or triggers snapshot updates.
    fn finish(&self, execution: CommandExecution, done_tx: oneshot::Sender<CommandExecution>) {
        let command = execution.command.clone();
        let status = execution.status.clone();

        self.inner.active.remove(&command.id.0);
        self.inner.history.record(execution.clone());
        self.publish(OrchestratorEvent::CommandCompleted {
            id: command.id,
            status: status.clone(),
        });

        // A successful mutating workspace op changes the selection; the
        // listing that follows is the authoritative reconciliation.
        if command.is_workspace_op()
            && command.kind == CommandKind::Mutating
            && status.is_success()
        {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.refresh_workspaces().await {
                    warn!(error = %err, "workspace refresh after select failed");
                }
            });
        }

        // Any mutating command that actually ran may have touched files,
        // whether it succeeded or not
        if command.kind == CommandKind::Mutating
            && !matches!(status, ExecutionStatus::LaunchFailed { .. })
        {
            let this = self.clone();
            tokio::spawn(async move {
                if let Err(err) = this.rebuild_project().await {
                    warn!(error = %err, "project rebuild after command failed");
                }
            });
        }

        let _ = done_tx.send(execution);
    }
}

/// Map a non-success terminal execution to its error
fn ensure_success(execution: &CommandExecution) -> Result<(), TerradeckError> {
    match &execution.status {
        ExecutionStatus::Succeeded => Ok(()),
        ExecutionStatus::Failed { exit_code } => {
            Err(TerradeckError::CommandFailed {
                command: execution.command.display_line(),
                exit_code: *exit_code,
                stderr: execution.stderr_text(),
            })
        }
        ExecutionStatus::Cancelled => Err(TerradeckError::Cancelled {
            command: execution.command.display_line(),
        }),
        ExecutionStatus::LaunchFailed { error } => Err(TerradeckError::Launch {
            program: execution.command.program.clone(),
            message: error.clone(),
        }),
        // Pending/Running never reach callers of wait()
        _ => Err(TerradeckError::ChannelClosed),
    }
}
