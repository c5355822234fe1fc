//! Terradeck CLI - drives the orchestration facade from the terminal
//!
//! A thin stand-in for the full-screen presentation layer: it submits
//! one command per invocation, streams live output from the event bus,
//! and reports the terminal status.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::Colorize;

use terradeck::{
    ApplySettings, FixSuggestion, FormatSettings, InitSettings, InlineVar, Orchestrator,
    OrchestratorEvent, OutputStream, PlanSettings, SessionConfig, Submission, TerradeckError,
    ValidateSettings,
};

#[derive(Parser)]
#[command(name = "terradeck")]
#[command(about = "Terradeck - drive the Terraform CLI workflow from a terminal front-end")]
#[command(version)]
struct Cli {
    /// Project directory to run against
    #[arg(long, default_value = ".", global = true)]
    chdir: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run `terraform init`
    Init {
        #[arg(long)]
        upgrade: bool,
        #[arg(long)]
        reconfigure: bool,
        #[arg(long)]
        migrate_state: bool,
        /// Pass -input=false
        #[arg(long)]
        no_input: bool,
    },

    /// Run `terraform plan`
    Plan {
        #[arg(long)]
        destroy: bool,
        #[arg(long)]
        refresh_only: bool,
        /// Pass -refresh=false
        #[arg(long)]
        no_refresh: bool,
        /// Inline variable, NAME=VALUE (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<InlineVar>,
        /// Variable file (repeatable)
        #[arg(long = "var-file")]
        var_files: Vec<String>,
        /// Write the plan to a file
        #[arg(long)]
        out: Option<String>,
    },

    /// Run `terraform apply`
    Apply {
        #[arg(long)]
        auto_approve: bool,
        #[arg(long)]
        destroy: bool,
        /// Inline variable, NAME=VALUE (repeatable)
        #[arg(long = "var", value_parser = parse_var)]
        vars: Vec<InlineVar>,
        /// Variable file (repeatable)
        #[arg(long = "var-file")]
        var_files: Vec<String>,
        /// Apply a saved plan file
        plan_file: Option<PathBuf>,
    },

    /// Run `terraform validate`
    Validate {
        #[arg(long)]
        json: bool,
        #[arg(long)]
        no_tests: bool,
    },

    /// Run `terraform fmt`
    Fmt {
        #[arg(long)]
        check: bool,
        #[arg(long)]
        recursive: bool,
        path: Option<PathBuf>,
    },

    /// Run `terraform version`
    Version,

    /// Workspace operations
    Workspace {
        #[command(subcommand)]
        command: WorkspaceCommands,
    },

    /// Search the cached project tree
    Search { query: String },

    /// Print the project tree
    Tree,
}

#[derive(Subcommand)]
enum WorkspaceCommands {
    /// List workspaces and mark the active one
    List,
    /// Switch the active workspace
    Select { name: String },
}

fn parse_var(raw: &str) -> Result<InlineVar, String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.is_empty() && !value.is_empty() => Ok(InlineVar {
            name: name.to_string(),
            value: value.to_string(),
        }),
        _ => Err(format!("expected NAME=VALUE, got '{raw}'")),
    }
}

#[tokio::main]
async fn main() {
    // Load .env file (ignore if not present)
    let _ = dotenvy::dotenv();

    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    if let Err(e) = run(cli).await {
        eprintln!("{} {}", "Error:".red().bold(), e);
        if let Some(suggestion) = e.fix_suggestion() {
            eprintln!("  {} {}", "Fix:".yellow(), suggestion);
        }
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), TerradeckError> {
    let config = SessionConfig::from_env(&cli.chdir);
    let orchestrator = Orchestrator::new(config)?;

    match cli.command {
        Commands::Init {
            upgrade,
            reconfigure,
            migrate_state,
            no_input,
        } => {
            let settings = InitSettings {
                upgrade,
                reconfigure,
                migrate_state,
                disable_input: no_input,
                ..Default::default()
            };
            run_streamed(&orchestrator, |o| o.init(&settings)).await
        }
        Commands::Plan {
            destroy,
            refresh_only,
            no_refresh,
            vars,
            var_files,
            out,
        } => {
            let settings = PlanSettings {
                destroy,
                refresh_only,
                no_refresh,
                inline_vars: vars,
                var_files,
                out,
            };
            run_streamed(&orchestrator, |o| o.plan(&settings)).await
        }
        Commands::Apply {
            auto_approve,
            destroy,
            vars,
            var_files,
            plan_file,
        } => {
            let settings = ApplySettings {
                auto_approve,
                destroy,
                inline_vars: vars,
                var_files,
                plan_file,
                ..Default::default()
            };
            run_streamed(&orchestrator, |o| o.apply(&settings)).await
        }
        Commands::Validate { json, no_tests } => {
            let settings = ValidateSettings {
                json,
                no_tests,
                ..Default::default()
            };
            run_streamed(&orchestrator, |o| o.validate(&settings)).await
        }
        Commands::Fmt {
            check,
            recursive,
            path,
        } => {
            let settings = FormatSettings {
                check,
                recursive,
                path,
            };
            run_streamed(&orchestrator, |o| o.fmt(&settings)).await
        }
        Commands::Version => run_streamed(&orchestrator, |o| o.version()).await,
        Commands::Workspace { command } => match command {
            WorkspaceCommands::List => {
                let snapshot = orchestrator.refresh_workspaces().await?;
                for workspace in &snapshot.workspaces {
                    let marker = if workspace.is_active { "*" } else { " " };
                    if workspace.is_active {
                        println!("{marker} {}", workspace.name.cyan().bold());
                    } else {
                        println!("{marker} {}", workspace.name);
                    }
                }
                Ok(())
            }
            WorkspaceCommands::Select { name } => {
                let snapshot = orchestrator.select_workspace(&name).await?;
                let active = snapshot.active().map(|w| w.name.clone()).unwrap_or(name);
                println!("{} Switched to workspace {}", "✓".green(), active.cyan().bold());
                Ok(())
            }
        },
        Commands::Search { query } => {
            for path in orchestrator.search(&query) {
                println!("{}", path.display());
            }
            Ok(())
        }
        Commands::Tree => {
            let tree = orchestrator.project_tree();
            println!("{}", orchestrator.config().working_dir.display());
            print_tree(&tree, 0);
            Ok(())
        }
    }
}

/// Submit one command and stream its output until completion
async fn run_streamed<F>(
    orchestrator: &Orchestrator,
    submit: F,
) -> Result<(), TerradeckError>
where
    F: FnOnce(&Orchestrator) -> Submission,
{
    // Subscribe before submitting so no line is missed
    let mut events = orchestrator.subscribe();
    let submission = submit(orchestrator);
    let id = submission.id();

    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(OrchestratorEvent::CommandOutput {
                    id: event_id,
                    stream,
                    line,
                }) if event_id == id => match stream {
                    OutputStream::Stdout => println!("{line}"),
                    OutputStream::Stderr => eprintln!("{}", line.red()),
                },
                // Broadcast is ordered: every line was printed by now
                Ok(OrchestratorEvent::CommandCompleted { id: event_id, .. })
                    if event_id == id =>
                {
                    break;
                }
                Ok(_) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    });

    let execution = submission.wait().await?;
    let _ = printer.await;

    let command = execution.command.display_line();
    if execution.status.is_success() {
        println!("{} {}", "✓".green(), command);
        Ok(())
    } else {
        match execution.status {
            terradeck::ExecutionStatus::Failed { exit_code } => {
                Err(TerradeckError::CommandFailed {
                    command,
                    exit_code,
                    stderr: execution.stderr_text(),
                })
            }
            terradeck::ExecutionStatus::Cancelled => Err(TerradeckError::Cancelled { command }),
            terradeck::ExecutionStatus::LaunchFailed { error } => Err(TerradeckError::Launch {
                program: execution.command.program,
                message: error,
            }),
            _ => Err(TerradeckError::ChannelClosed),
        }
    }
}

fn print_tree(node: &terradeck::ProjectFileNode, depth: usize) {
    for child in &node.children {
        let name = child
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| child.path.display().to_string());
        let indent = "  ".repeat(depth + 1);
        match child.kind {
            terradeck::NodeKind::Directory => {
                println!("{indent}{}/", name.cyan());
                print_tree(child, depth + 1);
            }
            terradeck::NodeKind::File => println!("{indent}{name}"),
        }
    }
}
