//! Flowgate CLI and dispatcher worker entry point.
//!
//! Binary name: `flowgate`
//!
//! Loads configuration, initializes logging and storage, then dispatches to
//! the command handler.

mod cli;
mod state;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands};
use flowgate_infra::config::load_engine_config;
use flowgate_infra::sqlite::pool::default_data_dir;
use flowgate_observe::tracing_setup::{init_tracing, shutdown_tracing};
use flowgate_types::config::LoggingConfig;
use state::AppState;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let data_dir = default_data_dir();

    // Config problems are reported before the configured subscriber exists.
    let mut config = {
        let bootstrap = tracing_subscriber::fmt()
            .with_writer(std::io::stderr)
            .with_env_filter(EnvFilter::new("warn"))
            .finish();
        let _guard = tracing::subscriber::set_default(bootstrap);
        load_engine_config(&data_dir, cli.config.as_deref()).await
    };

    apply_verbosity(&mut config.logging, cli.verbose, cli.command.is_long_running());
    if let Err(e) = init_tracing(&config.logging) {
        eprintln!("Warning: failed to initialize tracing: {e}");
    }

    let result = dispatch(cli, AppState::init(config, data_dir).await?).await;
    shutdown_tracing();
    result
}

async fn dispatch(cli: Cli, state: AppState) -> anyhow::Result<()> {
    match cli.command {
        Commands::Publish { file } => {
            cli::definition::handle_publish(&state, &file, cli.json).await
        }
        Commands::Submit {
            definition_version_id,
            workspace,
            payload,
        } => {
            cli::queue::handle_submit(
                &state,
                definition_version_id,
                workspace,
                payload.as_deref(),
                cli.json,
            )
            .await
        }
        Commands::Run => cli::run::handle_run(&state).await,
        Commands::Sweep => cli::queue::handle_sweep(&state, cli.json).await,
        Commands::Status { execution_id } => {
            cli::execution::handle_status(&state, execution_id, cli.json).await
        }
        Commands::History { execution_id } => {
            cli::execution::handle_history(&state, execution_id, cli.json).await
        }
        Commands::Queue { workspace, limit } => {
            cli::queue::handle_list(&state, workspace, limit, cli.json).await
        }
    }
}

/// `-v` raises Flowgate's own crates to debug, `-vv` everything to trace.
/// Without it, one-shot commands only log warnings.
fn apply_verbosity(logging: &mut LoggingConfig, verbose: u8, long_running: bool) {
    match verbose {
        0 if long_running => {}
        0 => logging.filter = "warn".to_string(),
        1 => {
            logging.filter = concat!(
                "info,flowgate_core=debug,flowgate_infra=debug,",
                "flowgate_observe=debug,flowgate=debug"
            )
            .to_string()
        }
        _ => logging.filter = "trace".to_string(),
    }
}
