//! Execution inspection: `status` (state + node audit records) and
//! `history` (the state-machine event log).

use anyhow::{Result, anyhow};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;
use uuid::Uuid;

use flowgate_core::repository::workflow::WorkflowRepository;
use flowgate_types::execution::{NodeExecutionStatus, WorkflowExecution, WorkflowExecutionNode};
use flowgate_types::state::{WorkflowEvent, WorkflowPhase};

use crate::state::AppState;

async fn load_execution(state: &AppState, execution_id: &Uuid) -> Result<WorkflowExecution> {
    state
        .workflows
        .get_execution(execution_id)
        .await
        .map_err(|e| anyhow!("Failed to get execution: {e}"))?
        .ok_or_else(|| anyhow!("Execution {execution_id} not found"))
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

pub async fn handle_status(state: &AppState, execution_id: Uuid, json: bool) -> Result<()> {
    let execution = load_execution(state, &execution_id).await?;
    let nodes = state
        .workflows
        .list_node_executions(&execution_id)
        .await
        .map_err(|e| anyhow!("Failed to list node records: {e}"))?;

    if json {
        let out = serde_json::json!({
            "execution": execution,
            "nodes": nodes,
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    let phase = execution.state.phase;
    println!();
    println!(
        "  {} Execution {}",
        style("*").bold(),
        style(execution.id).cyan()
    );
    println!("  Definition version: {}", execution.definition_version_id);
    println!("  Workspace: {}", execution.workspace_id);
    println!("  Trigger: {}", execution.trigger.source());
    println!("  Phase: {}", style(phase).fg(phase_color(phase)));
    println!("  Started: {}", execution.started_at.format("%Y-%m-%d %H:%M:%S"));
    if let Some(done) = execution.completed_at {
        let secs = (done - execution.started_at).num_milliseconds() as f64 / 1000.0;
        println!("  Completed: {} ({secs:.1}s)", done.format("%Y-%m-%d %H:%M:%S"));
    }
    if let Some(error) = &execution.state.error {
        println!("  Error: {}", style(error).red());
    }

    if nodes.is_empty() {
        println!();
        println!("  No node records.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Node").fg(Color::Cyan),
            Cell::new("Status"),
            Cell::new("Attempt"),
            Cell::new("Duration"),
            Cell::new("Error"),
        ]);
    for node in &nodes {
        table.add_row(node_row(node));
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn node_row(node: &WorkflowExecutionNode) -> Vec<Cell> {
    let color = match node.status {
        NodeExecutionStatus::Running => Color::Blue,
        NodeExecutionStatus::Completed => Color::Green,
        NodeExecutionStatus::Failed => Color::Red,
        NodeExecutionStatus::Skipped => Color::DarkGrey,
    };
    vec![
        Cell::new(&node.node_key),
        Cell::new(node.status.as_str()).fg(color),
        Cell::new(node.attempt),
        Cell::new(
            node.duration_ms
                .map_or_else(|| "-".to_string(), |ms| format!("{ms}ms")),
        ),
        Cell::new(node.error.as_deref().unwrap_or("")),
    ]
}

fn phase_color(phase: WorkflowPhase) -> console::Color {
    match phase {
        WorkflowPhase::Completed => console::Color::Green,
        WorkflowPhase::Failed => console::Color::Red,
        _ => console::Color::Yellow,
    }
}

// ---------------------------------------------------------------------------
// History
// ---------------------------------------------------------------------------

pub async fn handle_history(state: &AppState, execution_id: Uuid, json: bool) -> Result<()> {
    load_execution(state, &execution_id).await?;
    let events = state
        .workflows
        .list_events(&execution_id)
        .await
        .map_err(|e| anyhow!("Failed to list events: {e}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&events)?);
        return Ok(());
    }

    if events.is_empty() {
        println!();
        println!("  No events recorded for {execution_id}.");
        println!();
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("#").fg(Color::Cyan),
            Cell::new("Event"),
            Cell::new("Detail"),
            Cell::new("Recorded"),
        ]);
    for recorded in &events {
        table.add_row(vec![
            Cell::new(recorded.sequence),
            Cell::new(recorded.event.name()),
            Cell::new(event_detail(&recorded.event)),
            Cell::new(recorded.recorded_at.format("%H:%M:%S%.3f")),
        ]);
    }

    println!();
    println!("{table}");
    println!();
    Ok(())
}

fn event_detail(event: &WorkflowEvent) -> String {
    match event {
        WorkflowEvent::NodesReady { node_ids } => node_ids
            .iter()
            .map(Uuid::to_string)
            .collect::<Vec<_>>()
            .join(", "),
        WorkflowEvent::NodeCompleted { node_id } => node_id.to_string(),
        WorkflowEvent::NodeFailed { node_id, error } => format!("{node_id}: {error}"),
        WorkflowEvent::AllNodesCompleted => String::new(),
        WorkflowEvent::WorkflowFailed { reason } => reason.clone(),
    }
}
