//! Graph traversal and node dispatch.
//!
//! The engine executes one workflow run. Graph structure stays plain data
//! (node map + adjacency list); execution state (run record, context,
//! executed set) lives behind a single async mutex so parallel nodes can
//! drive sub-graphs concurrently. Manual-approval nodes suspend the run by
//! persisting the context; resume re-instantiates the engine from the
//! stored run record, so suspension survives process restarts.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::BoxFuture;
use serde_json::{json, Value};
use tokio::sync::{Mutex, Semaphore};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use scanforge_core::model::{
    EdgeDef, ExecutionLogEntry, Job, JobStatus, NodeDef, NodeType, Workflow, WorkflowRun,
    WorkflowStatus,
};
use scanforge_core::{EventBus, ToolRegistry};
use scanforge_storage::{Store, StoreError};

use crate::context::WorkflowContext;
use crate::node::{NodeData, NodeResult};

/// Interval between job status polls under a tool node.
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Extra budget beyond the job's own timeout before a tool node gives up
/// polling.
const POLL_GRACE_SECS: u64 = 60;

/// Errors from engine operations
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Store error
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Workflow run not found
    #[error("workflow run not found: {0}")]
    RunNotFound(Uuid),

    /// Job dispatch failed
    #[error("dispatch error: {0}")]
    Dispatch(String),
}

/// Seam to the job pipeline: the engine creates queued jobs and hands
/// their ids to a dispatcher, which enqueues the executor task.
#[async_trait::async_trait]
pub trait JobDispatcher: Send + Sync {
    async fn dispatch_job(&self, job_id: Uuid) -> Result<(), String>;
}

struct RunState {
    run: WorkflowRun,
    context: WorkflowContext,
    executed: HashSet<String>,
}

/// Workflow execution engine for a single run.
pub struct WorkflowEngine {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    tools: Arc<ToolRegistry>,
    dispatcher: Arc<dyn JobDispatcher>,
    workflow: Workflow,
    nodes: HashMap<String, NodeDef>,
    adjacency: HashMap<String, Vec<EdgeDef>>,
    poll_interval: Duration,
    state: Mutex<RunState>,
}

impl WorkflowEngine {
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        tools: Arc<ToolRegistry>,
        dispatcher: Arc<dyn JobDispatcher>,
        workflow: Workflow,
        run: WorkflowRun,
    ) -> Self {
        let mut context = WorkflowContext::new(Some(&run.input_params));
        context.set("project_id", json!(run.project_id.to_string()));
        context.set("workflow_id", json!(workflow.id.to_string()));
        context.set("workflow_run_id", json!(run.id.to_string()));
        context.set("workflow_name", json!(workflow.name.clone()));

        let nodes = workflow
            .definition
            .nodes
            .iter()
            .map(|n| (n.id.clone(), n.clone()))
            .collect();
        let mut adjacency: HashMap<String, Vec<EdgeDef>> = HashMap::new();
        for edge in &workflow.definition.edges {
            adjacency
                .entry(edge.source.clone())
                .or_default()
                .push(edge.clone());
        }

        Self {
            store,
            bus,
            tools,
            dispatcher,
            workflow,
            nodes,
            adjacency,
            poll_interval: DEFAULT_POLL_INTERVAL,
            state: Mutex::new(RunState {
                run,
                context,
                executed: HashSet::new(),
            }),
        }
    }

    /// Override the tool-node poll interval (tests).
    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Execute the workflow from its start nodes.
    ///
    /// Returns true when the run completed, false when it suspended on a
    /// manual approval or failed.
    #[instrument(skip(self), fields(run_id = %self.run_id()))]
    pub async fn execute(self: Arc<Self>) -> Result<bool, EngineError> {
        info!("starting workflow execution");
        {
            let mut st = self.state.lock().await;
            st.run.status = WorkflowStatus::Running;
            st.run.started_at = Some(Utc::now());
            self.store.update_workflow_run(st.run.clone()).await?;
        }
        self.emit_status("running", None).await;

        // Start nodes: every node with no incoming edge, falling back to
        // the first node in definition order.
        let targets: HashSet<&str> = self
            .workflow
            .definition
            .edges
            .iter()
            .map(|e| e.target.as_str())
            .collect();
        let mut start_ids: Vec<String> = self
            .workflow
            .definition
            .nodes
            .iter()
            .filter(|n| !targets.contains(n.id.as_str()))
            .map(|n| n.id.clone())
            .collect();
        if start_ids.is_empty() {
            start_ids = self
                .workflow
                .definition
                .nodes
                .first()
                .map(|n| vec![n.id.clone()])
                .unwrap_or_default();
        }

        for node_id in start_ids {
            match self.clone().execute_node(node_id.clone()).await {
                Ok(Some(result)) if result.approval_required() => {
                    self.suspend(&result).await?;
                    return Ok(false);
                }
                Ok(Some(result)) if result.success => {}
                Ok(_) => {
                    self.fail_run(&format!("Start node {node_id} failed")).await?;
                    return Ok(false);
                }
                Err(e) => {
                    self.fail_run(&e.to_string()).await?;
                    return Ok(false);
                }
            }
        }

        self.complete_run().await?;
        Ok(true)
    }

    /// Resume a run suspended on a manual-approval node.
    #[instrument(skip(self, approval_data), fields(run_id = %self.run_id()))]
    pub async fn resume(
        self: Arc<Self>,
        node_id: &str,
        approval_data: Value,
    ) -> Result<bool, EngineError> {
        info!(node_id, "resuming workflow run");
        {
            let mut st = self.state.lock().await;

            // Reconstitute the context from the persisted run plus the
            // standard bindings.
            let saved = st.run.context.clone();
            st.context = WorkflowContext::from_saved(&saved);
            let project_id = st.run.project_id.to_string();
            let run_id = st.run.id.to_string();
            st.context.set("project_id", json!(project_id));
            st.context.set("workflow_id", json!(self.workflow.id.to_string()));
            st.context.set("workflow_run_id", json!(run_id));
            st.context.set("workflow_name", json!(self.workflow.name.clone()));

            st.context
                .set(format!("node_{node_id}_approval"), approval_data.clone());
            st.context.set_node_result(
                node_id,
                json!({"approved": true, "approval_data": approval_data}),
            );
            st.executed.insert(node_id.to_string());

            st.run.status = WorkflowStatus::Running;
            self.store.update_workflow_run(st.run.clone()).await?;
        }
        self.emit_status("running", None).await;

        let edges = self.adjacency.get(node_id).cloned().unwrap_or_default();
        for edge in edges {
            match self.clone().execute_node(edge.target.clone()).await {
                Ok(Some(result)) if result.approval_required() => {
                    self.suspend(&result).await?;
                    return Ok(false);
                }
                Ok(_) => {}
                Err(e) => {
                    self.fail_run(&e.to_string()).await?;
                    return Ok(false);
                }
            }
        }

        self.complete_run().await?;
        Ok(true)
    }

    fn run_id(&self) -> Uuid {
        // Only for tracing fields; the lock is uncontended at entry.
        self.state
            .try_lock()
            .map(|st| st.run.id)
            .unwrap_or_default()
    }

    // =========================================================================
    // Node traversal
    // =========================================================================

    fn execute_node(
        self: Arc<Self>,
        node_id: String,
    ) -> BoxFuture<'static, Result<Option<NodeResult>, EngineError>> {
        Box::pin(async move {
            {
                let st = self.state.lock().await;
                if st.executed.contains(&node_id) {
                    return Ok(Some(NodeResult::ok(json!({"skipped": true}))));
                }
            }

            let Some(node) = self.nodes.get(&node_id).cloned() else {
                error!(node_id, "node not found in workflow definition");
                return Ok(None);
            };
            let Ok(node_type) = node.node_type.parse::<NodeType>() else {
                warn!(node_id, node_type = %node.node_type, "unknown node type");
                return Ok(None);
            };

            // Log entry and current pointers are persisted before any
            // successor may be dispatched.
            {
                let mut st = self.state.lock().await;
                st.run.execution_log.push(ExecutionLogEntry {
                    node_id: node_id.clone(),
                    node_type: node.node_type.clone(),
                    status: "running".to_string(),
                    started_at: Utc::now(),
                    completed_at: None,
                    result: None,
                    error: None,
                });
                st.run.current_node_id = Some(node_id.clone());
                st.run.current_step += 1;
                self.store.update_workflow_run(st.run.clone()).await?;
            }
            self.emit_node_status(&node_id, "running", None).await;

            let dispatched: Result<NodeResult, EngineError> = match node_type {
                NodeType::Tool => self.execute_tool_node(&node).await,
                NodeType::Condition => Ok(self.execute_condition_node(&node).await),
                NodeType::Delay => Ok(self.execute_delay_node(&node).await),
                NodeType::Notification => Ok(self.execute_notification_node(&node).await),
                NodeType::Parallel => self.clone().execute_parallel_node(&node).await,
                NodeType::Loop => self.clone().execute_loop_node(&node).await,
                NodeType::Manual => Ok(self.execute_manual_node(&node).await),
            };

            let result = match dispatched {
                Ok(result) => result,
                Err(e) => {
                    let message = e.to_string();
                    error!(node_id, error = %message, "error executing node");
                    {
                        let mut st = self.state.lock().await;
                        if let Some(entry) = running_entry(&mut st.run, &node_id) {
                            entry.status = "failed".to_string();
                            entry.error = Some(message.clone());
                            entry.completed_at = Some(Utc::now());
                        }
                        st.run.error_node_id = Some(node_id.clone());
                        let _ = self.store.update_workflow_run(st.run.clone()).await;
                    }
                    self.emit_node_status(&node_id, "failed", Some(json!({"error": message})))
                        .await;
                    return Ok(Some(NodeResult::fail(message)));
                }
            };

            {
                let mut st = self.state.lock().await;
                if let Some(entry) = running_entry(&mut st.run, &node_id) {
                    entry.status = if result.success {
                        "completed".to_string()
                    } else {
                        "failed".to_string()
                    };
                    entry.completed_at = Some(Utc::now());
                    entry.result = Some(result.data.clone());
                    entry.error = result.error.clone();
                }
                self.store.update_workflow_run(st.run.clone()).await?;

                st.context.set_node_result(&node_id, result.data.clone());
                if !result.approval_required() {
                    st.executed.insert(node_id.clone());
                }
            }

            self.emit_node_status(
                &node_id,
                if result.success { "completed" } else { "failed" },
                Some(result.data.clone()),
            )
            .await;

            if !result.success {
                return Ok(Some(result));
            }
            if result.approval_required() {
                return Ok(Some(result));
            }

            // Condition nodes follow only the matching-branch (or
            // unlabelled) edges.
            if node_type == NodeType::Condition {
                if let Some(branch) = result.branch.clone() {
                    let edges = self.adjacency.get(&node_id).cloned().unwrap_or_default();
                    for edge in edges {
                        let label = edge.branch_label();
                        if label == branch || label.is_empty() {
                            if let Some(child) =
                                self.clone().execute_node(edge.target.clone()).await?
                            {
                                if child.approval_required() {
                                    return Ok(Some(child));
                                }
                            }
                        }
                    }
                    return Ok(Some(result));
                }
            }

            // Every other node follows all outgoing edges. Nodes a special
            // handler already ran (loop bodies, parallel children) sit in
            // the executed set and fall out as skips.
            let edges = self.adjacency.get(&node_id).cloned().unwrap_or_default();
            for edge in edges {
                if let Some(child) = self.clone().execute_node(edge.target.clone()).await? {
                    if child.approval_required() {
                        return Ok(Some(child));
                    }
                }
            }

            Ok(Some(result))
        })
    }

    // =========================================================================
    // Node semantics
    // =========================================================================

    /// Create a job bound to this run, dispatch it, then poll its status
    /// until terminal or the poll budget runs out.
    async fn execute_tool_node(&self, node: &NodeDef) -> Result<NodeResult, EngineError> {
        let data = NodeData(&node.data);
        let Some(tool_name) = data.str("tool") else {
            return Ok(NodeResult::fail("No tool specified"));
        };
        let Some(tool) = self.tools.get(tool_name) else {
            return Ok(NodeResult::fail(format!("Tool '{tool_name}' not found")));
        };
        let timeout = data.int_or("timeout", 3600).max(0) as u64;
        let params = data
            .value("parameters")
            .cloned()
            .unwrap_or_else(|| json!({}));

        let (resolved_params, project_id, run_id) = {
            let st = self.state.lock().await;
            (
                st.context.resolve_value(&params),
                st.context
                    .get("project_id")
                    .and_then(Value::as_str)
                    .and_then(|s| Uuid::parse_str(s).ok()),
                st.run.id,
            )
        };
        let Some(project_id) = project_id else {
            return Ok(NodeResult::fail("No project_id in context"));
        };

        let command = tool.render_command(&resolved_params);

        let mut job = Job::new(project_id, tool_name, resolved_params);
        job.command = Some(command);
        job.status = JobStatus::Queued;
        job.timeout_seconds = timeout;
        job.workflow_run_id = Some(run_id);
        let job_id = job.id;

        self.store.create_job(job).await?;
        self.dispatcher
            .dispatch_job(job_id)
            .await
            .map_err(EngineError::Dispatch)?;

        info!(%job_id, tool_name, "waiting for job to complete");
        let budget = Duration::from_secs(timeout + POLL_GRACE_SECS);
        let started = tokio::time::Instant::now();

        loop {
            tokio::time::sleep(self.poll_interval).await;

            let Some(job) = self.store.get_job(job_id).await? else {
                return Ok(NodeResult::fail_with_data(
                    "Job disappeared",
                    json!({"job_id": job_id.to_string()}),
                ));
            };

            if job.status.is_terminal() {
                let data = json!({
                    "job_id": job_id.to_string(),
                    "exit_code": job.exit_code,
                    "status": job.status.to_string(),
                });
                if job.status == JobStatus::Completed {
                    return Ok(NodeResult::ok(data));
                }
                let message = job
                    .error_message
                    .unwrap_or_else(|| format!("Job ended with status: {}", job.status));
                return Ok(NodeResult::fail_with_data(message, data));
            }

            if started.elapsed() >= budget {
                return Ok(NodeResult::fail_with_data(
                    format!("Job did not finish within {} seconds", timeout + POLL_GRACE_SECS),
                    json!({"job_id": job_id.to_string(), "status": job.status.to_string()}),
                ));
            }
        }
    }

    async fn execute_condition_node(&self, node: &NodeDef) -> NodeResult {
        let data = NodeData(&node.data);
        let condition = data.str_or("condition", "");
        if condition.is_empty() {
            return NodeResult::fail("No condition specified");
        }
        let true_label = data.str_or("true_label", "true");
        let false_label = data.str_or("false_label", "false");

        let outcome = {
            let st = self.state.lock().await;
            st.context.evaluate_condition(&condition)
        };
        let branch = if outcome { true_label } else { false_label };

        NodeResult {
            success: true,
            data: json!({
                "condition": condition,
                "result": outcome,
                "branch": branch.clone(),
            }),
            error: None,
            branch: Some(branch),
        }
    }

    async fn execute_delay_node(&self, node: &NodeDef) -> NodeResult {
        let delay_seconds = NodeData(&node.data).int_or("delay_seconds", 0).max(0) as u64;
        if delay_seconds > 0 {
            info!(delay_seconds, "delay node waiting");
            tokio::time::sleep(Duration::from_secs(delay_seconds)).await;
        }
        NodeResult::ok(json!({"delay_seconds": delay_seconds}))
    }

    /// Publish errors never fail the workflow; the result stays successful.
    async fn execute_notification_node(&self, node: &NodeDef) -> NodeResult {
        let data = NodeData(&node.data);
        let notification_type = data.str_or("notification_type", "info");
        let (title, message, run_id, project_id) = {
            let st = self.state.lock().await;
            (
                st.context
                    .resolve_value(&json!(data.str_or("title", "Workflow Notification"))),
                st.context.resolve_value(&json!(data.str_or("message", ""))),
                st.run.id,
                st.run.project_id,
            )
        };

        self.bus.publish_project_update(
            project_id,
            "workflow_notification",
            json!({
                "workflow_run_id": run_id.to_string(),
                "type": notification_type.clone(),
                "title": title,
                "message": message.clone(),
                "node_id": node.id.clone(),
            }),
        );

        NodeResult::ok(json!({
            "notification_type": notification_type,
            "message": message,
        }))
    }

    /// Emit the approval request and hand back an approval_required result;
    /// the engine suspends at the top of the call chain.
    async fn execute_manual_node(&self, node: &NodeDef) -> NodeResult {
        let data = NodeData(&node.data);
        let options = data
            .value("options")
            .cloned()
            .unwrap_or_else(|| json!(["approve", "reject"]));
        let (title, message, run_id, project_id) = {
            let st = self.state.lock().await;
            (
                st.context
                    .resolve_value(&json!(data.str_or("title", "Manual Approval Required"))),
                st.context
                    .resolve_value(&json!(data.str_or("message", "Please approve to continue"))),
                st.run.id,
                st.run.project_id,
            )
        };

        self.bus.publish_project_update(
            project_id,
            "workflow_approval_required",
            json!({
                "workflow_run_id": run_id.to_string(),
                "node_id": node.id.clone(),
                "title": title.clone(),
                "message": message.clone(),
                "options": options.clone(),
            }),
        );

        NodeResult::ok(json!({
            "approval_required": true,
            "node_id": node.id.clone(),
            "title": title,
            "message": message,
            "options": options,
        }))
    }

    /// Execute every direct successor concurrently under a semaphore.
    async fn execute_parallel_node(
        self: Arc<Self>,
        node: &NodeDef,
    ) -> Result<NodeResult, EngineError> {
        let node_id = node.id.clone();
        let child_ids: Vec<String> = self
            .adjacency
            .get(&node_id)
            .map(|edges| edges.iter().map(|e| e.target.clone()).collect())
            .unwrap_or_default();

        if child_ids.is_empty() {
            let mut st = self.state.lock().await;
            st.executed.insert(node_id);
            return Ok(NodeResult::ok(json!({"message": "No child nodes"})));
        }

        let max_parallel = NodeData(&node.data).int_or("max_parallel", 5).max(1) as usize;
        let semaphore = Arc::new(Semaphore::new(max_parallel));

        let children = child_ids.iter().map(|child_id| {
            let engine = self.clone();
            let semaphore = semaphore.clone();
            let child_id = child_id.clone();
            async move {
                let _permit = semaphore.acquire_owned().await;
                engine.execute_node(child_id).await
            }
        });
        let results = futures::future::join_all(children).await;

        let mut all_success = true;
        let mut success_count = 0usize;
        let mut approval_required = false;
        let mut errors: Vec<String> = Vec::new();

        for outcome in results {
            match outcome {
                Ok(Some(result)) => {
                    if result.success {
                        success_count += 1;
                    } else {
                        all_success = false;
                        if let Some(ref e) = result.error {
                            errors.push(e.clone());
                        }
                    }
                    if result.approval_required() {
                        approval_required = true;
                    }
                }
                Ok(None) => {
                    all_success = false;
                    errors.push("No result".to_string());
                }
                Err(e) => {
                    all_success = false;
                    errors.push(e.to_string());
                }
            }
        }

        {
            let mut st = self.state.lock().await;
            st.executed.insert(node_id);
        }

        Ok(NodeResult {
            success: all_success && !approval_required,
            data: json!({
                "children_count": child_ids.len(),
                "success_count": success_count,
                "approval_required": approval_required,
            }),
            error: (!errors.is_empty()).then(|| errors.join("; ")),
            branch: None,
        })
    }

    /// Iterate the loop body: per iteration the body nodes are removed
    /// from the executed set so they run again with fresh loop bindings.
    async fn execute_loop_node(
        self: Arc<Self>,
        node: &NodeDef,
    ) -> Result<NodeResult, EngineError> {
        let node_id = node.id.clone();
        let data = NodeData(&node.data);
        let loop_type = data.str_or("loop_type", "count");
        let continue_on_error = data.bool_or("continue_on_error", false);

        let loop_items: Vec<Value> = match loop_type.as_str() {
            "count" => {
                let iterations = data.int_or("iterations", 0).max(0);
                (0..iterations).map(Value::from).collect()
            }
            "items" => {
                let items_source = data.str_or("items_source", "");
                if !items_source.is_empty() {
                    let resolved = {
                        let st = self.state.lock().await;
                        st.context
                            .resolve_value(&json!(format!("${{{items_source}}}")))
                    };
                    match resolved {
                        Value::Array(items) => items,
                        _ => Vec::new(),
                    }
                } else {
                    match data.value("items") {
                        Some(Value::Array(items)) => items.clone(),
                        _ => Vec::new(),
                    }
                }
            }
            _ => Vec::new(),
        };

        if loop_items.is_empty() {
            let mut st = self.state.lock().await;
            st.executed.insert(node_id);
            return Ok(NodeResult::ok(
                json!({"iterations": 0, "message": "No items"}),
            ));
        }

        let edges = self.adjacency.get(&node_id).cloned().unwrap_or_default();
        let child_ids: Vec<String> = edges
            .iter()
            .filter(|e| {
                let label = e.branch_label();
                label == "body" || label.is_empty()
            })
            .map(|e| e.target.clone())
            .collect();

        let total = loop_items.len();
        let mut iteration_results: Vec<bool> = Vec::new();

        'iterations: for (index, item) in loop_items.iter().enumerate() {
            {
                let mut st = self.state.lock().await;
                st.context
                    .set_loop_context(index, item.clone(), total, &node_id);
                for child in &child_ids {
                    st.executed.remove(child);
                }
            }

            let mut iteration_success = true;
            for child in &child_ids {
                let outcome = self.clone().execute_node(child.clone()).await?;
                if let Some(result) = outcome {
                    if result.approval_required() {
                        let mut st = self.state.lock().await;
                        st.context.clear_loop_context();
                        return Ok(NodeResult::fail(
                            "Manual approval nodes not supported in loops",
                        ));
                    }
                    if !result.success {
                        iteration_success = false;
                        if !continue_on_error {
                            break;
                        }
                    }
                }
            }

            iteration_results.push(iteration_success);
            if !iteration_success && !continue_on_error {
                break 'iterations;
            }
        }

        {
            let mut st = self.state.lock().await;
            st.context.clear_loop_context();
            st.executed.insert(node_id.clone());
        }

        let success_count = iteration_results.iter().filter(|ok| **ok).count();
        let all_success = success_count == iteration_results.len();

        // Post-loop successors are the explicitly labelled edges
        for edge in &edges {
            let label = edge.branch_label();
            if label == "done" || label == "complete" {
                self.clone().execute_node(edge.target.clone()).await?;
            }
        }

        Ok(NodeResult {
            success: all_success,
            data: json!({
                "iterations": total,
                "executed": iteration_results.len(),
                "success_count": success_count,
            }),
            error: None,
            branch: None,
        })
    }

    // =========================================================================
    // Run transitions
    // =========================================================================

    async fn suspend(&self, result: &NodeResult) -> Result<(), EngineError> {
        let approval_node = result
            .data
            .get("node_id")
            .and_then(Value::as_str)
            .map(str::to_string);
        let node_for_event;
        {
            let mut st = self.state.lock().await;
            st.run.status = WorkflowStatus::WaitingApproval;
            if let Some(node_id) = approval_node {
                st.run.current_node_id = Some(node_id);
            }
            st.run.context = st.context.snapshot();
            node_for_event = st.run.current_node_id.clone();
            self.store.update_workflow_run(st.run.clone()).await?;
        }
        self.emit_status("waiting_approval", Some(json!({"node_id": node_for_event})))
            .await;
        Ok(())
    }

    async fn complete_run(&self) -> Result<(), EngineError> {
        {
            let mut st = self.state.lock().await;
            st.run.status = WorkflowStatus::Completed;
            st.run.completed_at = Some(Utc::now());
            st.run.context = st.context.snapshot();
            self.store.update_workflow_run(st.run.clone()).await?;
        }
        self.emit_status("completed", None).await;
        info!("workflow run completed");
        Ok(())
    }

    async fn fail_run(&self, message: &str) -> Result<(), EngineError> {
        error!(error = message, "workflow execution failed");
        {
            let mut st = self.state.lock().await;
            st.run.status = WorkflowStatus::Failed;
            st.run.error_message = Some(message.to_string());
            st.run.completed_at = Some(Utc::now());
            st.run.context = st.context.snapshot();
            self.store.update_workflow_run(st.run.clone()).await?;
        }
        self.emit_status("failed", Some(json!({"error": message})))
            .await;
        Ok(())
    }

    async fn emit_status(&self, status: &str, details: Option<Value>) {
        let (run_id, project_id) = {
            let st = self.state.lock().await;
            (st.run.id, st.run.project_id)
        };
        self.bus.publish_project_update(
            project_id,
            "workflow_status",
            json!({
                "workflow_run_id": run_id.to_string(),
                "workflow_id": self.workflow.id.to_string(),
                "status": status,
                "details": details.unwrap_or_else(|| json!({})),
            }),
        );
    }

    async fn emit_node_status(&self, node_id: &str, status: &str, data: Option<Value>) {
        let (run_id, project_id) = {
            let st = self.state.lock().await;
            (st.run.id, st.run.project_id)
        };
        self.bus.publish_project_update(
            project_id,
            "workflow_node_status",
            json!({
                "workflow_run_id": run_id.to_string(),
                "node_id": node_id,
                "status": status,
                "data": data.unwrap_or_else(|| json!({})),
            }),
        );
    }
}

/// The log entry a concurrently-executing node should update: the most
/// recent still-running entry for this node id.
fn running_entry<'a>(
    run: &'a mut WorkflowRun,
    node_id: &str,
) -> Option<&'a mut ExecutionLogEntry> {
    run.execution_log
        .iter_mut()
        .rev()
        .find(|entry| entry.node_id == node_id && entry.status == "running")
}

/// Cancel a workflow run. Terminal runs are left untouched (idempotent);
/// jobs already spawned by the run are not interrupted, their results are
/// simply never consulted because no further nodes dispatch.
pub async fn cancel_workflow_run(
    store: &Arc<dyn Store>,
    bus: &Arc<EventBus>,
    run_id: Uuid,
) -> Result<(), EngineError> {
    let Some(mut run) = store.get_workflow_run(run_id).await? else {
        return Err(EngineError::RunNotFound(run_id));
    };
    if run.status.is_terminal() {
        return Ok(());
    }

    run.status = WorkflowStatus::Cancelled;
    run.completed_at = Some(Utc::now());
    store.update_workflow_run(run.clone()).await?;

    bus.publish_project_update(
        run.project_id,
        "workflow_status",
        json!({
            "workflow_run_id": run_id.to_string(),
            "workflow_id": run.workflow_id.to_string(),
            "status": "cancelled",
            "details": {},
        }),
    );
    info!(%run_id, "workflow run cancelled");
    Ok(())
}
