// Workflow definition and run models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Workflow run status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    WaitingApproval,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl std::fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::WaitingApproval => "waiting_approval",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        write!(f, "{s}")
    }
}

/// Workflow node type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    Tool,
    Condition,
    Delay,
    Notification,
    Parallel,
    Loop,
    Manual,
}

impl std::str::FromStr for NodeType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "tool" => Ok(Self::Tool),
            "condition" => Ok(Self::Condition),
            "delay" => Ok(Self::Delay),
            "notification" => Ok(Self::Notification),
            "parallel" => Ok(Self::Parallel),
            "loop" => Ok(Self::Loop),
            "manual" => Ok(Self::Manual),
            other => Err(format!("unknown node type: {other}")),
        }
    }
}

impl std::fmt::Display for NodeType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Tool => "tool",
            Self::Condition => "condition",
            Self::Delay => "delay",
            Self::Notification => "notification",
            Self::Parallel => "parallel",
            Self::Loop => "loop",
            Self::Manual => "manual",
        };
        write!(f, "{s}")
    }
}

/// One node of a workflow graph. The node type is kept in string form so a
/// definition with an unknown type still loads; dispatch resolves it to
/// [`NodeType`] and fails the run if it cannot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDef {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub data: Value,
}

/// One edge of a workflow graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EdgeDef {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
    #[serde(default)]
    pub label: Option<String>,
    #[serde(default, rename = "sourceHandle")]
    pub source_handle: Option<String>,
    #[serde(default)]
    pub condition: Option<String>,
}

impl EdgeDef {
    /// The branch label of this edge: explicit `label`, else the source
    /// handle, else empty.
    pub fn branch_label(&self) -> &str {
        self.label
            .as_deref()
            .or(self.source_handle.as_deref())
            .unwrap_or("")
    }
}

/// The graph a workflow executes.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowDefinition {
    #[serde(default)]
    pub nodes: Vec<NodeDef>,
    #[serde(default)]
    pub edges: Vec<EdgeDef>,
}

/// A named workflow definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: Uuid,
    pub project_id: Option<Uuid>,
    pub name: String,
    pub description: Option<String>,
    pub definition: WorkflowDefinition,
    pub is_template: bool,
    pub settings: Value,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Workflow {
    pub fn new(name: impl Into<String>, definition: WorkflowDefinition) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            project_id: None,
            name: name.into(),
            description: None,
            definition,
            is_template: false,
            settings: Value::Object(Default::default()),
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Per-node entry of a run's append-only execution log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionLogEntry {
    pub node_id: String,
    pub node_type: String,
    pub status: String,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub result: Option<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// One execution of a workflow.
///
/// The `context` map is persisted so that a run suspended on a manual
/// approval survives process restarts; resume re-instantiates the engine
/// from this record alone.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowRun {
    pub id: Uuid,
    pub workflow_id: Uuid,
    pub project_id: Uuid,
    pub status: WorkflowStatus,
    pub current_node_id: Option<String>,
    pub current_step: i32,
    pub context: Value,
    pub input_params: Value,
    pub execution_log: Vec<ExecutionLogEntry>,
    pub error_message: Option<String>,
    pub error_node_id: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkflowRun {
    pub fn new(workflow_id: Uuid, project_id: Uuid, input_params: Value) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            workflow_id,
            project_id,
            status: WorkflowStatus::Pending,
            current_node_id: None,
            current_step: 0,
            context: Value::Object(Default::default()),
            input_params,
            execution_log: Vec::new(),
            error_message: None,
            error_node_id: None,
            started_at: None,
            completed_at: None,
            created_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
