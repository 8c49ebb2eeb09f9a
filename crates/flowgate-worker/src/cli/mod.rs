//! CLI command definitions for the `flowgate` binary.
//!
//! Uses clap derive macros. Every command reads and writes the same SQLite
//! database (and optional PostgreSQL queue) configured in `flowgate.toml`.

pub mod definition;
pub mod execution;
pub mod queue;
pub mod run;

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Durable workflow orchestration: publish DAG definitions, queue runs and
/// dispatch them.
#[derive(Parser)]
#[command(name = "flowgate", version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the configuration file (default: {data_dir}/flowgate.toml).
    #[arg(long, global = true, env = "FLOWGATE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Output machine-readable JSON instead of styled text.
    #[arg(long, global = true)]
    pub json: bool,

    /// Detailed output (-v for debug, -vv for trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Validate and publish a workflow definition from a YAML or JSON file.
    Publish {
        /// Path to the definition file.
        file: PathBuf,
    },

    /// Queue a manual run of a published definition version.
    Submit {
        /// Definition version UUID.
        definition_version_id: Uuid,

        /// Workspace the run belongs to.
        #[arg(long)]
        workspace: Uuid,

        /// JSON payload exposed to templates as `trigger.payload`.
        #[arg(long)]
        payload: Option<String>,
    },

    /// Run the dispatcher with the in-process execution host until Ctrl+C.
    Run,

    /// Reset stale queue claims to pending once and exit.
    Sweep,

    /// Show an execution's state and node audit records.
    Status {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// Show an execution's state-machine event log.
    History {
        /// Execution UUID.
        execution_id: Uuid,
    },

    /// List admission queue entries, newest first.
    Queue {
        /// Only entries of this workspace.
        #[arg(long)]
        workspace: Option<Uuid>,

        /// Maximum number of entries to display.
        #[arg(long, default_value = "20")]
        limit: u32,
    },
}

impl Commands {
    /// Long-running commands log at the configured level; one-shot commands
    /// stay quiet unless `-v` is given.
    pub fn is_long_running(&self) -> bool {
        matches!(self, Self::Run)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_definition_is_consistent() {
        <Cli as clap::CommandFactory>::command().debug_assert();
    }

    #[test]
    fn test_parse_submit_with_payload() {
        let def = Uuid::now_v7();
        let ws = Uuid::now_v7();
        let cli = Cli::try_parse_from([
            "flowgate",
            "submit",
            &def.to_string(),
            "--workspace",
            &ws.to_string(),
            "--payload",
            r#"{"priority": 3}"#,
            "--json",
        ])
        .unwrap();

        assert!(cli.json);
        match cli.command {
            Commands::Submit {
                definition_version_id,
                workspace,
                payload,
            } => {
                assert_eq!(definition_version_id, def);
                assert_eq!(workspace, ws);
                assert_eq!(payload.as_deref(), Some(r#"{"priority": 3}"#));
            }
            _ => panic!("expected submit"),
        }
    }

    #[test]
    fn test_parse_rejects_invalid_uuid() {
        assert!(Cli::try_parse_from(["flowgate", "status", "not-a-uuid"]).is_err());
    }

    #[test]
    fn test_queue_defaults_and_verbosity() {
        let cli = Cli::try_parse_from(["flowgate", "-vv", "queue"]).unwrap();
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Queue { workspace, limit } => {
                assert!(workspace.is_none());
                assert_eq!(limit, 20);
            }
            _ => panic!("expected queue"),
        }
        assert!(!Commands::Sweep.is_long_running());
        assert!(Commands::Run.is_long_running());
    }
}
