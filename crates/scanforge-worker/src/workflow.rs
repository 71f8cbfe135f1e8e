//! Workflow run orchestration on top of the engine.
//!
//! These helpers build an engine instance per run and drive it through
//! the task queue: starting new runs, resuming suspended ones, and
//! cancelling.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde_json::{json, Value};
use tracing::info;
use uuid::Uuid;

use scanforge_core::model::{WorkflowRun, WorkflowStatus};
use scanforge_engine::{cancel_workflow_run, validate_definition};

use crate::App;

/// Create a run for a workflow and enqueue its execution.
pub async fn start_workflow_run(
    app: &Arc<App>,
    workflow_id: Uuid,
    project_id: Uuid,
    input_params: Value,
) -> Result<Uuid> {
    let Some(workflow) = app
        .store
        .get_workflow(workflow_id)
        .await
        .map_err(anyhow::Error::msg)?
    else {
        bail!("Workflow {workflow_id} not found");
    };
    validate_definition(&workflow.definition).context("invalid workflow definition")?;

    let run = WorkflowRun::new(workflow_id, project_id, input_params);
    let run_id = run.id;
    app.store
        .create_workflow_run(run.clone())
        .await
        .context("failed to create workflow run")?;

    let engine = Arc::new(app.build_engine(workflow, run));
    app.queue
        .enqueue(&format!("workflow:{run_id}"), async move {
            engine
                .execute()
                .await
                .map(|completed| json!({"completed": completed}))
                .map_err(|e| e.to_string())
        });

    info!(%run_id, %workflow_id, "workflow run started");
    Ok(run_id)
}

/// Resume a run suspended on a manual-approval node.
pub async fn resume_workflow_run(
    app: &Arc<App>,
    run_id: Uuid,
    node_id: &str,
    approval_data: Value,
) -> Result<()> {
    let Some(run) = app
        .store
        .get_workflow_run(run_id)
        .await
        .map_err(anyhow::Error::msg)?
    else {
        bail!("Workflow run {run_id} not found");
    };
    if run.status != WorkflowStatus::WaitingApproval {
        bail!(
            "Workflow run {run_id} is not waiting for approval (status: {})",
            run.status
        );
    }
    let Some(workflow) = app
        .store
        .get_workflow(run.workflow_id)
        .await
        .map_err(anyhow::Error::msg)?
    else {
        bail!("Workflow {} not found", run.workflow_id);
    };

    let engine = Arc::new(app.build_engine(workflow, run));
    let node_id = node_id.to_string();
    app.queue
        .enqueue(&format!("workflow-resume:{run_id}"), async move {
            engine
                .resume(&node_id, approval_data)
                .await
                .map(|completed| json!({"completed": completed}))
                .map_err(|e| e.to_string())
        });

    info!(%run_id, "workflow run resumed");
    Ok(())
}

/// Cancel a run. Idempotent on terminal runs; jobs already spawned by the
/// run are left to finish on their own.
pub async fn cancel_run(app: &Arc<App>, run_id: Uuid) -> Result<()> {
    cancel_workflow_run(&app.store, &app.bus, run_id)
        .await
        .map_err(|e| anyhow::anyhow!(e.to_string()))
}
