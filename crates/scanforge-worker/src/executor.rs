//! Job executor: owns the job lifecycle.
//!
//! Loads a queued job, runs its tool with streamed output persistence,
//! drives the state machine to a terminal state, and hands completed jobs
//! with a declared parser to the parse task. Cancellation reaches a
//! running tool through the active-runner registry.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Context};
use chrono::Utc;
use serde_json::{json, Value};
use tracing::{error, info, instrument, warn};
use uuid::Uuid;

use scanforge_core::model::{Job, JobOutput, JobStatus, OutputType};
use scanforge_core::{CoreError, EventBus, ToolRegistry};
use scanforge_engine::JobDispatcher;
use scanforge_parsers::ParserRegistry;
use scanforge_storage::{EncryptionService, Store};

use crate::notify::WebhookNotifier;
use crate::queue::TaskQueue;
use crate::runner::{CancelHandle, OutputCallback, ToolRunner};
use crate::upsert;

/// Executes jobs end to end and owns their state transitions.
pub struct JobExecutor {
    store: Arc<dyn Store>,
    bus: Arc<EventBus>,
    tools: Arc<ToolRegistry>,
    parsers: Arc<ParserRegistry>,
    crypto: EncryptionService,
    notifier: Option<Arc<WebhookNotifier>>,
    outputs_root: PathBuf,
    queue: Arc<TaskQueue>,
    active: Mutex<HashMap<Uuid, CancelHandle>>,
}

impl JobExecutor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<dyn Store>,
        bus: Arc<EventBus>,
        tools: Arc<ToolRegistry>,
        parsers: Arc<ParserRegistry>,
        crypto: EncryptionService,
        notifier: Option<Arc<WebhookNotifier>>,
        outputs_root: PathBuf,
        queue: Arc<TaskQueue>,
    ) -> Self {
        Self {
            store,
            bus,
            tools,
            parsers,
            crypto,
            notifier,
            outputs_root,
            queue,
            active: Mutex::new(HashMap::new()),
        }
    }

    /// Enqueue execution of a job onto the task queue.
    pub fn enqueue_execution(self: Arc<Self>, job_id: Uuid) -> Uuid {
        let executor = self.clone();
        self.queue.enqueue(&format!("job:{job_id}"), async move {
            executor.execute_job(job_id).await
        })
    }

    /// Enqueue the parse task for a completed job.
    pub fn enqueue_parse(self: Arc<Self>, job_id: Uuid) -> Uuid {
        let executor = self.clone();
        self.queue.enqueue(&format!("parse:{job_id}"), async move {
            executor.parse_job(job_id).await
        })
    }

    // =========================================================================
    // Execution
    // =========================================================================

    /// Run one job to a terminal state.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn execute_job(self: Arc<Self>, job_id: Uuid) -> Result<Value, String> {
        info!("starting tool execution");

        let mut job = match self.store.get_job(job_id).await {
            Ok(Some(job)) => job,
            Ok(None) => return Err(format!("Job {job_id} not found")),
            Err(e) => return Err(e.to_string()),
        };

        // A job cancelled while still queued is dropped at pick-up
        if job.status.is_terminal() {
            return Ok(json!({"skipped": job.status.to_string()}));
        }

        let Some(tool) = self.tools.get(&job.tool_name).cloned() else {
            let message = format!("Tool '{}' not found", job.tool_name);
            self.finish_job(&mut job, JobStatus::Failed, None, Some(message.clone()))
                .await
                .map_err(|e| e.to_string())?;
            return Ok(json!({"error": message}));
        };

        let Some(command) = job.command.clone().filter(|c| !c.is_empty()) else {
            let message = "Job has no rendered command".to_string();
            self.finish_job(&mut job, JobStatus::Failed, None, Some(message.clone()))
                .await
                .map_err(|e| e.to_string())?;
            return Ok(json!({"error": message}));
        };

        job.status = JobStatus::Running;
        job.started_at = Some(Utc::now());
        if let Err(e) = self.store.update_job(job.clone()).await {
            return Err(e.to_string());
        }
        self.bus.publish_job_status(job_id, "running", None);

        let runner = ToolRunner::new(
            command,
            job.timeout_seconds,
            self.outputs_root.join(job_id.to_string()),
        );
        self.active
            .lock()
            .unwrap()
            .insert(job_id, runner.cancel_handle());

        let callback = self.output_callback(job_id);
        let outcome = runner.run(callback).await;
        self.active.lock().unwrap().remove(&job_id);

        match outcome {
            Ok((exit_code, _pid)) => {
                // Reload: a cancel may have landed while the process exited
                let mut job = match self.store.get_job(job_id).await {
                    Ok(Some(job)) => job,
                    Ok(None) => return Err(format!("Job {job_id} disappeared")),
                    Err(e) => return Err(e.to_string()),
                };
                if job.status == JobStatus::Cancelled {
                    return Ok(json!({"cancelled": true}));
                }

                let (status, error_message) = if exit_code == 0 {
                    (JobStatus::Completed, None)
                } else {
                    (
                        JobStatus::Failed,
                        Some(format!("Tool exited with code {exit_code}")),
                    )
                };
                self.finish_job(&mut job, status, Some(exit_code), error_message)
                    .await
                    .map_err(|e| e.to_string())?;

                if status == JobStatus::Completed && tool.output.parser.is_some() {
                    self.clone().enqueue_parse(job_id);
                }

                Ok(json!({"success": exit_code == 0, "exit_code": exit_code}))
            }
            Err(CoreError::Timeout(seconds)) => {
                let mut job = self.reload(job_id).await?;
                let message = format!("Execution timed out after {seconds} seconds");
                self.finish_job(&mut job, JobStatus::Timeout, None, Some(message))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({"error": "timeout"}))
            }
            Err(CoreError::Cancelled) => {
                // cancel_job already drove the terminal transition
                Ok(json!({"cancelled": true}))
            }
            Err(e) => {
                error!("tool execution failed: {e}");
                let mut job = self.reload(job_id).await?;
                let message = e.to_string();
                self.finish_job(&mut job, JobStatus::Failed, None, Some(message.clone()))
                    .await
                    .map_err(|e| e.to_string())?;
                Ok(json!({"error": message}))
            }
        }
    }

    /// Per-line callback: assign the next sequence, persist the chunk and
    /// publish it. The sequence advances only after a successful append,
    /// so stored sequences stay contiguous.
    fn output_callback(&self, job_id: Uuid) -> OutputCallback {
        let store = self.store.clone();
        let bus = self.bus.clone();
        let sequence = Arc::new(tokio::sync::Mutex::new(0i64));

        Arc::new(move |content: String, output_type: OutputType| {
            let store = store.clone();
            let bus = bus.clone();
            let sequence = sequence.clone();
            Box::pin(async move {
                let mut next = sequence.lock().await;
                let output = JobOutput::new(job_id, *next, output_type, content.clone());
                match store.append_job_output(output).await {
                    Ok(()) => *next += 1,
                    Err(e) => {
                        warn!(job_id = %job_id, "failed to persist output chunk: {e}");
                        return;
                    }
                }
                drop(next);
                bus.publish_job_output(job_id, &content, &output_type.to_string());
            })
        })
    }

    async fn reload(&self, job_id: Uuid) -> Result<Job, String> {
        match self.store.get_job(job_id).await {
            Ok(Some(job)) => Ok(job),
            Ok(None) => Err(format!("Job {job_id} disappeared")),
            Err(e) => Err(e.to_string()),
        }
    }

    /// Drive a job to a terminal state, publish the transition, and fan
    /// the event out to the webhook notifier (best-effort).
    async fn finish_job(
        &self,
        job: &mut Job,
        status: JobStatus,
        exit_code: Option<i32>,
        error_message: Option<String>,
    ) -> anyhow::Result<()> {
        job.status = status;
        job.exit_code = exit_code;
        job.error_message = error_message;
        job.completed_at = Some(Utc::now());
        self.store
            .update_job(job.clone())
            .await
            .context("failed to persist terminal job state")?;

        self.bus.publish_job_status(
            job.id,
            &status.to_string(),
            exit_code.map(|c| json!({"exit_code": c})),
        );

        if let Some(notifier) = &self.notifier {
            notifier.notify_job_terminal(job).await;
        }
        Ok(())
    }

    // =========================================================================
    // Parsing
    // =========================================================================

    /// Parse a completed job's stdout and merge the entities into storage.
    ///
    /// A fatal parse error reports `{error}` and leaves the job completed;
    /// storage failures fail the task itself.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn parse_job(self: Arc<Self>, job_id: Uuid) -> Result<Value, String> {
        info!("parsing job results");

        let job = self.reload(job_id).await?;
        let Some(tool) = self.tools.get(&job.tool_name).cloned() else {
            return Ok(json!({"error": format!("Tool '{}' not found", job.tool_name)}));
        };
        let Some(parser_name) = tool.output.parser.clone() else {
            return Ok(json!({"error": "No parser for tool"}));
        };
        let Some(parser) = self.parsers.get(&parser_name) else {
            return Ok(json!({"error": format!("Parser '{parser_name}' not found")}));
        };

        let outputs = self
            .store
            .list_job_output(job_id, Some(OutputType::Stdout))
            .await
            .map_err(|e| e.to_string())?;
        let stdout = outputs
            .iter()
            .map(|o| o.content.as_str())
            .collect::<Vec<_>>()
            .join("\n");

        // Parsing is CPU-bound; keep it off the cooperative loop
        let parse_job = job.clone();
        let parse_result = tokio::task::spawn_blocking(move || parser.parse(&stdout, &parse_job))
            .await;
        let output = match parse_result {
            Ok(output) => output,
            Err(e) => {
                error!("parser panicked: {e}");
                return Ok(json!({"error": format!("parse failed: {e}")}));
            }
        };

        let tool_name = tool.slug.clone();
        let stats = upsert::apply(&self.store, &self.crypto, &job, &output, &tool_name)
            .await
            .map_err(|e| e.to_string())?;

        let details = json!({
            "assets_created": stats.assets_created,
            "assets_updated": stats.assets_updated,
            "vulnerabilities_created": stats.vulnerabilities_created,
            "vulnerabilities_updated": stats.vulnerabilities_updated,
            "credentials_created": stats.credentials_created,
            "credentials_updated": stats.credentials_updated,
            "results_created": stats.results_created,
            "errors": output.errors.len(),
        });
        self.bus
            .publish_job_status(job_id, "parsed", Some(details.clone()));

        if let Some(notifier) = &self.notifier {
            notifier
                .notify_new_findings(&job, &output.vulnerabilities)
                .await;
        }

        info!(
            assets = stats.assets_created,
            vulnerabilities = stats.vulnerabilities_created,
            "parse complete"
        );
        Ok(details)
    }

    // =========================================================================
    // Cancel / retry / scheduling
    // =========================================================================

    /// Best-effort cancel: terminal transition plus a signal to the
    /// running tool if it lives in this process.
    #[instrument(skip(self), fields(job_id = %job_id))]
    pub async fn cancel_job(&self, job_id: Uuid) -> anyhow::Result<()> {
        let Some(mut job) = self.store.get_job(job_id).await.map_err(anyhow::Error::msg)? else {
            bail!("Job {job_id} not found");
        };
        if job.status.is_terminal() {
            bail!("Job {job_id} already finished ({})", job.status);
        }

        job.status = JobStatus::Cancelled;
        job.completed_at = Some(Utc::now());
        self.store
            .update_job(job)
            .await
            .context("failed to persist cancellation")?;
        self.bus.publish_job_status(job_id, "cancelled", None);

        if let Some(handle) = self.active.lock().unwrap().get(&job_id) {
            handle.cancel();
        }
        info!("job cancelled");
        Ok(())
    }

    /// Retry creates a brand-new queued job with the same configuration;
    /// the old job is untouched.
    pub async fn retry_job(self: Arc<Self>, job_id: Uuid) -> anyhow::Result<Uuid> {
        let Some(job) = self.store.get_job(job_id).await.map_err(anyhow::Error::msg)? else {
            bail!("Job {job_id} not found");
        };

        let retry = job.retry_clone();
        let retry_id = retry.id;
        self.store
            .create_job(retry)
            .await
            .context("failed to create retry job")?;
        self.bus.publish_job_status(retry_id, "queued", None);
        self.clone().enqueue_execution(retry_id);
        info!(original = %job_id, retry = %retry_id, "job retried");
        Ok(retry_id)
    }

    /// Promote queued jobs whose `scheduled_at` has arrived. Runs on the
    /// recurring scheduler.
    pub async fn sweep_scheduled_jobs(self: Arc<Self>) -> Result<Value, String> {
        let due = self
            .store
            .list_due_scheduled_jobs(Utc::now())
            .await
            .map_err(|e| e.to_string())?;
        let count = due.len();

        for mut job in due {
            let job_id = job.id;
            job.scheduled_at = None;
            if let Err(e) = self.store.update_job(job).await {
                warn!(job_id = %job_id, "failed to promote scheduled job: {e}");
                continue;
            }
            self.clone().enqueue_execution(job_id);
        }

        if count > 0 {
            info!(count, "promoted scheduled jobs");
        }
        Ok(json!({"promoted": count}))
    }
}

/// Adapter the workflow engine dispatches tool-node jobs through.
pub struct QueueDispatcher {
    executor: Arc<JobExecutor>,
}

impl QueueDispatcher {
    pub fn new(executor: Arc<JobExecutor>) -> Self {
        Self { executor }
    }
}

#[async_trait::async_trait]
impl JobDispatcher for QueueDispatcher {
    async fn dispatch_job(&self, job_id: Uuid) -> Result<(), String> {
        self.executor.clone().enqueue_execution(job_id);
        Ok(())
    }
}
