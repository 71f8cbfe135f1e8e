//! In-memory store implementation
//!
//! Backs tests and single-process deployments. One mutex guards all
//! tables, so every trait call is atomic.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use scanforge_core::model::{
    Asset, AssetRelation, AssetType, Credential, Job, JobOutput, JobTarget, OutputType, Project,
    ResultRecord, Vulnerability, Workflow, WorkflowRun,
};

use crate::store::{Store, StoreError};

#[derive(Default)]
struct Tables {
    projects: HashMap<Uuid, Project>,
    assets: HashMap<Uuid, Asset>,
    relations: Vec<AssetRelation>,
    jobs: HashMap<Uuid, Job>,
    job_targets: Vec<JobTarget>,
    job_outputs: Vec<JobOutput>,
    vulnerabilities: HashMap<Uuid, Vulnerability>,
    credentials: HashMap<Uuid, Credential>,
    results: Vec<ResultRecord>,
    workflows: HashMap<Uuid, Workflow>,
    runs: HashMap<Uuid, WorkflowRun>,
}

/// In-memory persistence gateway.
#[derive(Default)]
pub struct MemoryStore {
    tables: Mutex<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for MemoryStore {
    // =========================================================================
    // Projects
    // =========================================================================

    async fn create_project(&self, project: Project) -> Result<(), StoreError> {
        let mut t = self.lock();
        if t.projects.contains_key(&project.id) {
            return Err(StoreError::Conflict(format!("project {}", project.id)));
        }
        t.projects.insert(project.id, project);
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        Ok(self.lock().projects.get(&id).cloned())
    }

    async fn delete_project(&self, id: Uuid) -> Result<(), StoreError> {
        let mut t = self.lock();
        if t.projects.remove(&id).is_none() {
            return Err(StoreError::not_found(format!("project {id}")));
        }

        let asset_ids: Vec<Uuid> = t
            .assets
            .values()
            .filter(|a| a.project_id == id)
            .map(|a| a.id)
            .collect();
        let job_ids: Vec<Uuid> = t
            .jobs
            .values()
            .filter(|j| j.project_id == id)
            .map(|j| j.id)
            .collect();

        t.assets.retain(|_, a| a.project_id != id);
        t.relations
            .retain(|r| !asset_ids.contains(&r.parent_id) && !asset_ids.contains(&r.child_id));
        t.jobs.retain(|_, j| j.project_id != id);
        t.job_targets.retain(|jt| !job_ids.contains(&jt.job_id));
        t.job_outputs.retain(|o| !job_ids.contains(&o.job_id));
        t.vulnerabilities.retain(|_, v| v.project_id != id);
        t.credentials.retain(|_, c| c.project_id != id);
        t.results.retain(|r| !job_ids.contains(&r.job_id));
        t.workflows.retain(|_, w| w.project_id != Some(id));
        t.runs.retain(|_, r| r.project_id != id);
        Ok(())
    }

    // =========================================================================
    // Assets
    // =========================================================================

    async fn insert_asset(&self, asset: Asset) -> Result<(), StoreError> {
        let mut t = self.lock();
        let duplicate = t.assets.values().any(|a| {
            a.project_id == asset.project_id
                && a.asset_type == asset.asset_type
                && a.value == asset.value
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "asset ({}, {}, {})",
                asset.project_id, asset.asset_type, asset.value
            )));
        }
        t.assets.insert(asset.id, asset);
        Ok(())
    }

    async fn get_asset(
        &self,
        project_id: Uuid,
        asset_type: AssetType,
        value: &str,
    ) -> Result<Option<Asset>, StoreError> {
        Ok(self
            .lock()
            .assets
            .values()
            .find(|a| {
                a.project_id == project_id && a.asset_type == asset_type && a.value == value
            })
            .cloned())
    }

    async fn find_asset_by_value(
        &self,
        project_id: Uuid,
        value: &str,
    ) -> Result<Option<Asset>, StoreError> {
        Ok(self
            .lock()
            .assets
            .values()
            .find(|a| a.project_id == project_id && a.value == value)
            .cloned())
    }

    async fn update_asset(&self, asset: Asset) -> Result<(), StoreError> {
        let mut t = self.lock();
        if !t.assets.contains_key(&asset.id) {
            return Err(StoreError::not_found(format!("asset {}", asset.id)));
        }
        t.assets.insert(asset.id, asset);
        Ok(())
    }

    async fn list_assets(&self, project_id: Uuid) -> Result<Vec<Asset>, StoreError> {
        let mut assets: Vec<Asset> = self
            .lock()
            .assets
            .values()
            .filter(|a| a.project_id == project_id)
            .cloned()
            .collect();
        assets.sort_by_key(|a| a.created_at);
        Ok(assets)
    }

    async fn insert_asset_relation(&self, relation: AssetRelation) -> Result<(), StoreError> {
        let mut t = self.lock();
        let parent = t
            .assets
            .get(&relation.parent_id)
            .ok_or_else(|| StoreError::not_found(format!("asset {}", relation.parent_id)))?;
        let child = t
            .assets
            .get(&relation.child_id)
            .ok_or_else(|| StoreError::not_found(format!("asset {}", relation.child_id)))?;
        if parent.project_id != child.project_id {
            return Err(StoreError::Invariant(
                "asset relation endpoints must share a project".to_string(),
            ));
        }
        let exists = t
            .relations
            .iter()
            .any(|r| r.parent_id == relation.parent_id && r.child_id == relation.child_id);
        if exists {
            return Err(StoreError::Conflict(format!(
                "relation ({}, {})",
                relation.parent_id, relation.child_id
            )));
        }
        t.relations.push(relation);
        Ok(())
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    async fn create_job(&self, job: Job) -> Result<(), StoreError> {
        let mut t = self.lock();
        if t.jobs.contains_key(&job.id) {
            return Err(StoreError::Conflict(format!("job {}", job.id)));
        }
        t.jobs.insert(job.id, job);
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        Ok(self.lock().jobs.get(&id).cloned())
    }

    async fn update_job(&self, job: Job) -> Result<(), StoreError> {
        let mut t = self.lock();
        if !t.jobs.contains_key(&job.id) {
            return Err(StoreError::not_found(format!("job {}", job.id)));
        }
        t.jobs.insert(job.id, job);
        Ok(())
    }

    async fn list_due_scheduled_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let mut jobs: Vec<Job> = self
            .lock()
            .jobs
            .values()
            .filter(|j| {
                j.status == scanforge_core::model::JobStatus::Queued
                    && j.scheduled_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        jobs.sort_by_key(|j| j.scheduled_at);
        Ok(jobs)
    }

    async fn add_job_target(&self, target: JobTarget) -> Result<(), StoreError> {
        let mut t = self.lock();
        let exists = t
            .job_targets
            .iter()
            .any(|jt| jt.job_id == target.job_id && jt.asset_id == target.asset_id);
        if !exists {
            t.job_targets.push(target);
        }
        Ok(())
    }

    async fn append_job_output(&self, output: JobOutput) -> Result<(), StoreError> {
        self.lock().job_outputs.push(output);
        Ok(())
    }

    async fn list_job_output(
        &self,
        job_id: Uuid,
        output_type: Option<OutputType>,
    ) -> Result<Vec<JobOutput>, StoreError> {
        let mut outputs: Vec<JobOutput> = self
            .lock()
            .job_outputs
            .iter()
            .filter(|o| o.job_id == job_id && output_type.map_or(true, |t| o.output_type == t))
            .cloned()
            .collect();
        outputs.sort_by_key(|o| o.sequence);
        Ok(outputs)
    }

    // =========================================================================
    // Vulnerabilities
    // =========================================================================

    async fn get_vulnerability_by_fingerprint(
        &self,
        project_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Vulnerability>, StoreError> {
        Ok(self
            .lock()
            .vulnerabilities
            .values()
            .find(|v| v.project_id == project_id && v.fingerprint.as_deref() == Some(fingerprint))
            .cloned())
    }

    async fn insert_vulnerability(&self, vulnerability: Vulnerability) -> Result<(), StoreError> {
        let mut t = self.lock();
        t.vulnerabilities.insert(vulnerability.id, vulnerability);
        Ok(())
    }

    async fn update_vulnerability(&self, vulnerability: Vulnerability) -> Result<(), StoreError> {
        let mut t = self.lock();
        if !t.vulnerabilities.contains_key(&vulnerability.id) {
            return Err(StoreError::not_found(format!(
                "vulnerability {}",
                vulnerability.id
            )));
        }
        t.vulnerabilities.insert(vulnerability.id, vulnerability);
        Ok(())
    }

    async fn list_vulnerabilities(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Vulnerability>, StoreError> {
        let mut vulns: Vec<Vulnerability> = self
            .lock()
            .vulnerabilities
            .values()
            .filter(|v| v.project_id == project_id)
            .cloned()
            .collect();
        vulns.sort_by_key(|v| v.created_at);
        Ok(vulns)
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    async fn get_credential_by_fingerprint(
        &self,
        project_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Credential>, StoreError> {
        Ok(self
            .lock()
            .credentials
            .values()
            .find(|c| c.project_id == project_id && c.fingerprint.as_deref() == Some(fingerprint))
            .cloned())
    }

    async fn insert_credential(&self, credential: Credential) -> Result<(), StoreError> {
        let mut t = self.lock();
        t.credentials.insert(credential.id, credential);
        Ok(())
    }

    async fn update_credential(&self, credential: Credential) -> Result<(), StoreError> {
        let mut t = self.lock();
        if !t.credentials.contains_key(&credential.id) {
            return Err(StoreError::not_found(format!(
                "credential {}",
                credential.id
            )));
        }
        t.credentials.insert(credential.id, credential);
        Ok(())
    }

    async fn list_credentials(&self, project_id: Uuid) -> Result<Vec<Credential>, StoreError> {
        let mut creds: Vec<Credential> = self
            .lock()
            .credentials
            .values()
            .filter(|c| c.project_id == project_id)
            .cloned()
            .collect();
        creds.sort_by_key(|c| c.created_at);
        Ok(creds)
    }

    // =========================================================================
    // Results
    // =========================================================================

    async fn insert_result(&self, result: ResultRecord) -> Result<(), StoreError> {
        self.lock().results.push(result);
        Ok(())
    }

    async fn list_results(&self, job_id: Uuid) -> Result<Vec<ResultRecord>, StoreError> {
        Ok(self
            .lock()
            .results
            .iter()
            .filter(|r| r.job_id == job_id)
            .cloned()
            .collect())
    }

    // =========================================================================
    // Workflows
    // =========================================================================

    async fn create_workflow(&self, workflow: Workflow) -> Result<(), StoreError> {
        let mut t = self.lock();
        if t.workflows.contains_key(&workflow.id) {
            return Err(StoreError::Conflict(format!("workflow {}", workflow.id)));
        }
        t.workflows.insert(workflow.id, workflow);
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        Ok(self.lock().workflows.get(&id).cloned())
    }

    async fn create_workflow_run(&self, run: WorkflowRun) -> Result<(), StoreError> {
        let mut t = self.lock();
        if t.runs.contains_key(&run.id) {
            return Err(StoreError::Conflict(format!("workflow run {}", run.id)));
        }
        t.runs.insert(run.id, run);
        Ok(())
    }

    async fn get_workflow_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        Ok(self.lock().runs.get(&id).cloned())
    }

    async fn update_workflow_run(&self, run: WorkflowRun) -> Result<(), StoreError> {
        let mut t = self.lock();
        if !t.runs.contains_key(&run.id) {
            return Err(StoreError::not_found(format!("workflow run {}", run.id)));
        }
        t.runs.insert(run.id, run);
        Ok(())
    }
}
