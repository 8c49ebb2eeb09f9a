//! `flowgate run`: the dispatcher loop.
//!
//! Claims pending queue rows, starts them on the in-process execution host
//! and periodically resets stale claims. On Ctrl+C or SIGTERM the loop stops
//! claiming, the host refuses new runs, and runs already started are allowed
//! to finish.

use std::sync::Arc;

use anyhow::Result;
use console::style;
use tokio_util::sync::CancellationToken;

use flowgate_observe::event_log::spawn_event_logger;

use crate::state::AppState;

pub async fn handle_run(state: &AppState) -> Result<()> {
    let host = Arc::new(state.local_host());
    let dispatcher = state.dispatcher(Arc::clone(&host));
    let logger = spawn_event_logger(state.event_bus.subscribe());

    let shutdown = CancellationToken::new();
    let signal = shutdown.clone();
    tokio::spawn(async move {
        shutdown_signal().await;
        signal.cancel();
    });

    println!(
        "  {} Flowgate worker dispatching from the {} queue (data: {})",
        style("*").green().bold(),
        style(state.queue.name()).cyan(),
        state.data_dir.display()
    );
    println!("  {}", style("Press Ctrl+C to stop").dim());

    dispatcher.run(shutdown).await;

    host.close();
    let active = host.active_runs().await;
    if active > 0 {
        println!("\n  Waiting for {active} run(s) to finish...");
    }
    host.wait_idle().await;
    logger.abort();
    state.db_pool.close().await;

    println!("\n  Worker stopped.");
    Ok(())
}

/// Wait for Ctrl+C or SIGTERM. A signal that cannot be installed is logged
/// and never fires.
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    tracing::info!("shutdown signal received");
}
