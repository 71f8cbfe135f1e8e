// Job and job-related models for tool execution

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Job execution status
///
/// `Completed`, `Failed`, `Cancelled` and `Timeout` are terminal; no
/// transition ever leaves a terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    Queued,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl JobStatus {
    /// Whether this status is terminal (absorbing)
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Queued => "queued",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        };
        write!(f, "{s}")
    }
}

/// Stream a job output chunk came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputType {
    Stdout,
    Stderr,
}

impl std::fmt::Display for OutputType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Stdout => write!(f, "stdout"),
            Self::Stderr => write!(f, "stderr"),
        }
    }
}

/// One tool execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: Uuid,
    pub project_id: Uuid,
    pub tool_name: String,
    pub parameters: Value,
    pub command: Option<String>,
    pub status: JobStatus,
    /// Higher runs sooner; informational only, the queue itself is FIFO.
    pub priority: i32,
    pub exit_code: Option<i32>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub scheduled_at: Option<DateTime<Utc>>,
    pub timeout_seconds: u64,
    pub created_by: Option<Uuid>,
    pub workflow_run_id: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    pub fn new(project_id: Uuid, tool_name: impl Into<String>, parameters: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            project_id,
            tool_name: tool_name.into(),
            parameters,
            command: None,
            status: JobStatus::Pending,
            priority: 5,
            exit_code: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            scheduled_at: None,
            timeout_seconds: 3600,
            created_by: None,
            workflow_run_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// A fresh queued copy of this job, used by the retry path. The
    /// original job is left untouched.
    pub fn retry_clone(&self) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            project_id: self.project_id,
            tool_name: self.tool_name.clone(),
            parameters: self.parameters.clone(),
            command: self.command.clone(),
            status: JobStatus::Queued,
            priority: self.priority,
            exit_code: None,
            error_message: None,
            started_at: None,
            completed_at: None,
            scheduled_at: None,
            timeout_seconds: self.timeout_seconds,
            created_by: self.created_by,
            workflow_run_id: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Link between a job and an asset it targets
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobTarget {
    pub job_id: Uuid,
    pub asset_id: Uuid,
}

/// One ordered chunk of a job's streamed output.
///
/// Sequence numbers start at 0 and form a contiguous range per job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOutput {
    pub id: Uuid,
    pub job_id: Uuid,
    pub sequence: i64,
    pub output_type: OutputType,
    pub content: String,
    pub timestamp: DateTime<Utc>,
}

impl JobOutput {
    pub fn new(job_id: Uuid, sequence: i64, output_type: OutputType, content: String) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            sequence,
            output_type,
            content,
            timestamp: Utc::now(),
        }
    }
}
