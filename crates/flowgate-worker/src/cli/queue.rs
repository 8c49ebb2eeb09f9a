//! Admission queue commands: `submit`, `queue` and `sweep`.

use std::sync::Arc;

use anyhow::{Context, Result, anyhow, bail};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use flowgate_core::repository::queue::ExecutionQueueRepository;
use flowgate_core::repository::workflow::WorkflowRepository;
use flowgate_types::output::TriggerContext;
use flowgate_types::queue::{ExecutionQueueEntry, QueueStatus};

use crate::state::AppState;

// ---------------------------------------------------------------------------
// Submit
// ---------------------------------------------------------------------------

pub async fn handle_submit(
    state: &AppState,
    definition_version_id: Uuid,
    workspace_id: Uuid,
    payload: Option<&str>,
    json: bool,
) -> Result<()> {
    let def = state
        .workflows
        .get_definition_version(&definition_version_id)
        .await
        .map_err(|e| anyhow!("Failed to look up definition: {e}"))?
        .ok_or_else(|| anyhow!("Definition version {definition_version_id} not found"))?;
    if def.workspace_id != workspace_id {
        bail!(
            "Definition version {definition_version_id} is in workspace {}, not {workspace_id}",
            def.workspace_id
        );
    }

    let payload = parse_payload(payload)?;
    let dispatcher = state.dispatcher(Arc::new(state.local_host()));
    let entry = dispatcher
        .submit(workspace_id, definition_version_id, TriggerContext::manual(payload))
        .await
        .map_err(|e| anyhow!("Failed to enqueue run: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entry)?);
    } else {
        println!();
        println!(
            "  {} Queued run of '{}' version {}",
            style("*").green().bold(),
            style(&def.name).cyan(),
            def.version
        );
        println!("  Queue entry: {}", entry.id);
        println!("  Status: {}", entry.status);
        println!();
        println!(
            "  Start a worker: {}",
            style("flowgate run").dim()
        );
        println!();
    }
    Ok(())
}

fn parse_payload(raw: Option<&str>) -> Result<serde_json::Value> {
    match raw {
        Some(raw) => serde_json::from_str(raw).context("Invalid JSON payload"),
        None => Ok(serde_json::json!({})),
    }
}

// ---------------------------------------------------------------------------
// List
// ---------------------------------------------------------------------------

pub async fn handle_list(
    state: &AppState,
    workspace_id: Option<Uuid>,
    limit: u32,
    json: bool,
) -> Result<()> {
    let entries = state
        .queue
        .list(workspace_id.as_ref(), limit)
        .await
        .map_err(|e| anyhow!("Failed to list queue entries: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }

    if entries.is_empty() {
        println!();
        println!("  Queue is empty.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Entry").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Claims"),
            Cell::new("Execution"),
            Cell::new("Created"),
            Cell::new("Error"),
        ]);

    for entry in &entries {
        table.add_row(queue_row(entry));
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn queue_row(entry: &ExecutionQueueEntry) -> Vec<Cell> {
    vec![
        Cell::new(entry.id),
        Cell::new(entry.status).fg(status_color(entry.status)),
        Cell::new(entry.claim_count),
        Cell::new(
            entry
                .execution_id
                .map_or_else(|| "-".to_string(), |id| id.to_string()),
        ),
        Cell::new(entry.created_at.format("%Y-%m-%d %H:%M:%S")),
        Cell::new(entry.last_error.as_deref().unwrap_or("")),
    ]
}

fn status_color(status: QueueStatus) -> Color {
    match status {
        QueueStatus::Pending => Color::Yellow,
        QueueStatus::Claimed | QueueStatus::Dispatched => Color::Blue,
        QueueStatus::Completed => Color::Green,
        QueueStatus::Failed => Color::Red,
    }
}

// ---------------------------------------------------------------------------
// Sweep
// ---------------------------------------------------------------------------

pub async fn handle_sweep(state: &AppState, json: bool) -> Result<()> {
    let dispatcher = state.dispatcher(Arc::new(state.local_host()));
    let reset = dispatcher
        .recover_stale()
        .await
        .map_err(|e| anyhow!("Stale sweep failed: {e}"))?;

    if json {
        let out = serde_json::json!({
            "reset": reset.iter().map(Uuid::to_string).collect::<Vec<_>>(),
            "stale_after_secs": state.config.dispatcher.stale_after_secs,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    if reset.is_empty() {
        println!(
            "  No claims older than {}s.",
            state.config.dispatcher.stale_after_secs
        );
    } else {
        println!(
            "  {} Reset {} stale claim(s) to pending",
            style("*").yellow().bold(),
            reset.len()
        );
        for id in &reset {
            println!("    {id}");
        }
    }
    println!();
    Ok(())
}
