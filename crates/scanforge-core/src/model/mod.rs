//! Entity types persisted through the storage gateway.

pub mod asset;
pub mod credential;
pub mod job;
pub mod project;
pub mod result;
pub mod vulnerability;
pub mod workflow;

pub use asset::{Asset, AssetRelation, AssetStatus, AssetType, RelationType};
pub use credential::{Credential, CredentialType};
pub use job::{Job, JobOutput, JobStatus, JobTarget, OutputType};
pub use project::Project;
pub use result::{ResultRecord, ResultType, Severity};
pub use vulnerability::Vulnerability;
pub use workflow::{
    EdgeDef, ExecutionLogEntry, NodeDef, NodeType, Workflow, WorkflowDefinition, WorkflowRun,
    WorkflowStatus,
};
