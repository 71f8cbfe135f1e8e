//! Store trait definition
//!
//! The transactional entity API the rest of the backend consumes. The
//! trait is object-safe so components take `Arc<dyn Store>` and tests can
//! swap the in-memory gateway for the Postgres one.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use scanforge_core::model::{
    Asset, AssetRelation, AssetType, Credential, Job, JobOutput, JobTarget, OutputType, Project,
    ResultRecord, Vulnerability, Workflow, WorkflowRun,
};

/// Error type for store operations
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Entity lookup failed
    #[error("not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint was violated
    #[error("conflict: {0}")]
    Conflict(String),

    /// An invariant the gateway enforces was violated
    #[error("invariant violation: {0}")]
    Invariant(String),

    /// Database error
    #[error("database error: {0}")]
    Database(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(String),
}

impl StoreError {
    pub fn not_found(what: impl std::fmt::Display) -> Self {
        Self::NotFound(what.to_string())
    }
}

/// Typed entity API over persistent storage.
///
/// Every method is atomic: the in-memory gateway holds one lock per call,
/// the Postgres gateway issues one statement or transaction per call.
/// Cross-call merge logic (the upsert layer) is serialised by running
/// exactly one parse task per job.
#[async_trait]
pub trait Store: Send + Sync + 'static {
    // =========================================================================
    // Projects
    // =========================================================================

    async fn create_project(&self, project: Project) -> Result<(), StoreError>;

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError>;

    /// Delete a project and cascade to every child entity.
    async fn delete_project(&self, id: Uuid) -> Result<(), StoreError>;

    // =========================================================================
    // Assets
    // =========================================================================

    /// Insert a new asset. Fails with `Conflict` if (project, type, value)
    /// already exists; callers merge through the upsert layer instead.
    async fn insert_asset(&self, asset: Asset) -> Result<(), StoreError>;

    /// Look up by the natural key (project, type, value).
    async fn get_asset(
        &self,
        project_id: Uuid,
        asset_type: AssetType,
        value: &str,
    ) -> Result<Option<Asset>, StoreError>;

    /// Look up by (project, value) alone, any type. Used for asset linking
    /// when a parser only knows the value.
    async fn find_asset_by_value(
        &self,
        project_id: Uuid,
        value: &str,
    ) -> Result<Option<Asset>, StoreError>;

    /// Replace an asset row (same id).
    async fn update_asset(&self, asset: Asset) -> Result<(), StoreError>;

    async fn list_assets(&self, project_id: Uuid) -> Result<Vec<Asset>, StoreError>;

    /// Insert a directed relation. Both endpoints must exist and belong to
    /// the same project.
    async fn insert_asset_relation(&self, relation: AssetRelation) -> Result<(), StoreError>;

    // =========================================================================
    // Jobs
    // =========================================================================

    async fn create_job(&self, job: Job) -> Result<(), StoreError>;

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError>;

    /// Replace a job row (same id).
    async fn update_job(&self, job: Job) -> Result<(), StoreError>;

    /// Queued jobs whose `scheduled_at` is at or before `now`.
    async fn list_due_scheduled_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError>;

    async fn add_job_target(&self, target: JobTarget) -> Result<(), StoreError>;

    /// Append one output chunk. Sequences are assigned by the executor and
    /// must be contiguous per job.
    async fn append_job_output(&self, output: JobOutput) -> Result<(), StoreError>;

    /// Outputs for a job ordered by sequence, optionally filtered by stream.
    async fn list_job_output(
        &self,
        job_id: Uuid,
        output_type: Option<OutputType>,
    ) -> Result<Vec<JobOutput>, StoreError>;

    // =========================================================================
    // Vulnerabilities
    // =========================================================================

    async fn get_vulnerability_by_fingerprint(
        &self,
        project_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Vulnerability>, StoreError>;

    async fn insert_vulnerability(&self, vulnerability: Vulnerability) -> Result<(), StoreError>;

    async fn update_vulnerability(&self, vulnerability: Vulnerability) -> Result<(), StoreError>;

    async fn list_vulnerabilities(&self, project_id: Uuid)
        -> Result<Vec<Vulnerability>, StoreError>;

    // =========================================================================
    // Credentials
    // =========================================================================

    async fn get_credential_by_fingerprint(
        &self,
        project_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Credential>, StoreError>;

    async fn insert_credential(&self, credential: Credential) -> Result<(), StoreError>;

    async fn update_credential(&self, credential: Credential) -> Result<(), StoreError>;

    async fn list_credentials(&self, project_id: Uuid) -> Result<Vec<Credential>, StoreError>;

    // =========================================================================
    // Results
    // =========================================================================

    /// Raw results are append-only; they are never merged.
    async fn insert_result(&self, result: ResultRecord) -> Result<(), StoreError>;

    async fn list_results(&self, job_id: Uuid) -> Result<Vec<ResultRecord>, StoreError>;

    // =========================================================================
    // Workflows
    // =========================================================================

    async fn create_workflow(&self, workflow: Workflow) -> Result<(), StoreError>;

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError>;

    async fn create_workflow_run(&self, run: WorkflowRun) -> Result<(), StoreError>;

    async fn get_workflow_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StoreError>;

    /// Replace a run row (same id). The execution log is append-only by
    /// convention: callers only ever extend it or fill in the last entry.
    async fn update_workflow_run(&self, run: WorkflowRun) -> Result<(), StoreError>;
}
