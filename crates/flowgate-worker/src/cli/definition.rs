//! `flowgate publish`: validate a definition file and store it as the next
//! version of its workflow.

use std::path::Path;

use anyhow::{Result, anyhow};
use console::style;

use flowgate_core::workflow::definition::{WorkflowError, load_definition_file, publish_definition};
use flowgate_types::workflow::WorkflowDefinitionVersion;

use crate::state::AppState;

pub async fn handle_publish(state: &AppState, file: &Path, json: bool) -> Result<()> {
    let doc = load_definition_file(file).map_err(|e| match e {
        WorkflowError::ParseError(msg) => anyhow!("Failed to parse {}: {msg}", file.display()),
        other => anyhow!("Failed to load {}: {other}", file.display()),
    })?;

    let def = publish_definition(state.workflows.as_ref(), &state.services, doc)
        .await
        .map_err(|e| anyhow!("Definition rejected: {e}"))?;

    print_published(&def, json)
}

fn print_published(def: &WorkflowDefinitionVersion, json: bool) -> Result<()> {
    if json {
        let out = serde_json::json!({
            "definition_version_id": def.id.to_string(),
            "workflow_id": def.workflow_id.to_string(),
            "workspace_id": def.workspace_id.to_string(),
            "name": def.name,
            "version": def.version,
            "nodes": def.nodes.len(),
            "edges": def.edges.len(),
        });
        println!("{}", serde_json::to_string_pretty(&out)?);
        return Ok(());
    }

    println!();
    println!(
        "  {} Published '{}' version {}",
        style("*").green().bold(),
        style(&def.name).cyan(),
        def.version
    );
    println!("  Definition version: {}", def.id);
    println!("  Workflow: {}", def.workflow_id);
    println!("  Nodes: {}  Edges: {}", def.nodes.len(), def.edges.len());
    println!();
    println!(
        "  Queue a run: {}",
        style(format!("flowgate submit {} --workspace {}", def.id, def.workspace_id)).dim()
    );
    println!();
    Ok(())
}
