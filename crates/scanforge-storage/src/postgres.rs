//! PostgreSQL implementation of the Store trait
//!
//! Production gateway over a `PgPool`. Enum fields are stored in their
//! string form, JSON-shaped fields as JSONB. Each trait call is one
//! statement or one transaction; the project cascade runs its child
//! deletes inside a single transaction.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde_json::Value;
use sqlx::{postgres::PgRow, PgPool, Row};
use tracing::error;
use uuid::Uuid;

use scanforge_core::model::{
    Asset, AssetRelation, AssetType, Credential, Job, JobOutput, JobStatus, JobTarget, OutputType,
    Project, ResultRecord, Vulnerability, Workflow, WorkflowRun,
};

use crate::store::{Store, StoreError};

/// PostgreSQL persistence gateway.
#[derive(Clone)]
pub struct PostgresStore {
    pool: PgPool,
}

impl PostgresStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect from a database URL.
    pub async fn from_url(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await.map_err(db_err)?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn db_err(e: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(ref dbe) = e {
        if dbe.is_unique_violation() {
            return StoreError::Conflict(dbe.to_string());
        }
    }
    error!("database error: {e}");
    StoreError::Database(e.to_string())
}

/// Parse a snake_case enum stored in string form back to its tagged type.
fn parse_enum<T: DeserializeOwned>(s: &str) -> Result<T, StoreError> {
    serde_json::from_value(Value::String(s.to_string()))
        .map_err(|e| StoreError::Serialization(format!("bad enum value '{s}': {e}")))
}

fn from_json<T: DeserializeOwned>(v: Value) -> Result<T, StoreError> {
    serde_json::from_value(v).map_err(|e| StoreError::Serialization(e.to_string()))
}

fn to_json<T: serde::Serialize>(v: &T) -> Result<Value, StoreError> {
    serde_json::to_value(v).map_err(|e| StoreError::Serialization(e.to_string()))
}

// =============================================================================
// Row mapping
// =============================================================================

fn map_asset(row: &PgRow) -> Result<Asset, StoreError> {
    Ok(Asset {
        id: row.get("id"),
        project_id: row.get("project_id"),
        asset_type: parse_enum(row.get::<&str, _>("type"))?,
        value: row.get("value"),
        metadata: row.get("metadata"),
        tags: from_json(row.get::<Value, _>("tags"))?,
        risk_score: row.get("risk_score"),
        status: parse_enum(row.get::<&str, _>("status"))?,
        discovered_by: row.get("discovered_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_job(row: &PgRow) -> Result<Job, StoreError> {
    Ok(Job {
        id: row.get("id"),
        project_id: row.get("project_id"),
        tool_name: row.get("tool_name"),
        parameters: row.get("parameters"),
        command: row.get("command"),
        status: parse_enum(row.get::<&str, _>("status"))?,
        priority: row.get("priority"),
        exit_code: row.get("exit_code"),
        error_message: row.get("error_message"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        scheduled_at: row.get("scheduled_at"),
        timeout_seconds: row.get::<i64, _>("timeout_seconds") as u64,
        created_by: row.get("created_by"),
        workflow_run_id: row.get("workflow_run_id"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_job_output(row: &PgRow) -> Result<JobOutput, StoreError> {
    Ok(JobOutput {
        id: row.get("id"),
        job_id: row.get("job_id"),
        sequence: row.get("sequence"),
        output_type: parse_enum(row.get::<&str, _>("output_type"))?,
        content: row.get("content"),
        timestamp: row.get("timestamp"),
    })
}

fn map_vulnerability(row: &PgRow) -> Result<Vulnerability, StoreError> {
    Ok(Vulnerability {
        id: row.get("id"),
        project_id: row.get("project_id"),
        asset_id: row.get("asset_id"),
        title: row.get("title"),
        description: row.get("description"),
        severity: parse_enum(row.get::<&str, _>("severity"))?,
        status: row.get("status"),
        cvss_score: row.get("cvss_score"),
        cvss_vector: row.get("cvss_vector"),
        cve_ids: from_json(row.get::<Value, _>("cve_ids"))?,
        cwe_ids: from_json(row.get::<Value, _>("cwe_ids"))?,
        evidence: row.get("evidence"),
        remediation: row.get("remediation"),
        references: from_json(row.get::<Value, _>("references"))?,
        template_id: row.get("template_id"),
        tool_name: row.get("tool_name"),
        request: row.get("request"),
        response: row.get("response"),
        metadata: row.get("metadata"),
        tags: from_json(row.get::<Value, _>("tags"))?,
        fingerprint: row.get("fingerprint"),
        discovered_by: row.get("discovered_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_credential(row: &PgRow) -> Result<Credential, StoreError> {
    Ok(Credential {
        id: row.get("id"),
        project_id: row.get("project_id"),
        asset_id: row.get("asset_id"),
        credential_type: parse_enum(row.get::<&str, _>("credential_type"))?,
        username: row.get("username"),
        domain: row.get("domain"),
        plaintext_encrypted: row.get("plaintext_encrypted"),
        hash_value: row.get("hash_value"),
        hash_type: row.get("hash_type"),
        service: row.get("service"),
        port: row.get::<Option<i32>, _>("port").map(|p| p as u16),
        url: row.get("url"),
        is_valid: row.get("is_valid"),
        source: row.get("source"),
        metadata: row.get("metadata"),
        fingerprint: row.get("fingerprint"),
        discovered_by: row.get("discovered_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_result(row: &PgRow) -> Result<ResultRecord, StoreError> {
    let severity: Option<String> = row.get("severity");
    Ok(ResultRecord {
        id: row.get("id"),
        job_id: row.get("job_id"),
        asset_id: row.get("asset_id"),
        result_type: parse_enum(row.get::<&str, _>("result_type"))?,
        severity: severity.as_deref().map(parse_enum).transpose()?,
        raw_data: row.get("raw_data"),
        parsed_data: row.get("parsed_data"),
        fingerprint: row.get("fingerprint"),
        created_at: row.get("created_at"),
    })
}

fn map_workflow(row: &PgRow) -> Result<Workflow, StoreError> {
    Ok(Workflow {
        id: row.get("id"),
        project_id: row.get("project_id"),
        name: row.get("name"),
        description: row.get("description"),
        definition: from_json(row.get::<Value, _>("definition"))?,
        is_template: row.get("is_template"),
        settings: row.get("settings"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

fn map_workflow_run(row: &PgRow) -> Result<WorkflowRun, StoreError> {
    Ok(WorkflowRun {
        id: row.get("id"),
        workflow_id: row.get("workflow_id"),
        project_id: row.get("project_id"),
        status: parse_enum(row.get::<&str, _>("status"))?,
        current_node_id: row.get("current_node_id"),
        current_step: row.get("current_step"),
        context: row.get("context"),
        input_params: row.get("input_params"),
        execution_log: from_json(row.get::<Value, _>("execution_log"))?,
        error_message: row.get("error_message"),
        error_node_id: row.get("error_node_id"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        created_by: row.get("created_by"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    })
}

#[async_trait]
impl Store for PostgresStore {
    // =========================================================================
    // Projects
    // =========================================================================

    async fn create_project(&self, project: Project) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO projects (id, name, description, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(project.id)
        .bind(&project.name)
        .bind(&project.description)
        .bind(project.created_by)
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_project(&self, id: Uuid) -> Result<Option<Project>, StoreError> {
        let row = sqlx::query(
            "SELECT id, name, description, created_by, created_at, updated_at FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(row.map(|r| Project {
            id: r.get("id"),
            name: r.get("name"),
            description: r.get("description"),
            created_by: r.get("created_by"),
            created_at: r.get("created_at"),
            updated_at: r.get("updated_at"),
        }))
    }

    async fn delete_project(&self, id: Uuid) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        // Children first: rows keyed through jobs/assets, then the direct
        // project children, then the project row itself.
        for sql in [
            "DELETE FROM results WHERE job_id IN (SELECT id FROM jobs WHERE project_id = $1)",
            "DELETE FROM job_outputs WHERE job_id IN (SELECT id FROM jobs WHERE project_id = $1)",
            "DELETE FROM job_targets WHERE job_id IN (SELECT id FROM jobs WHERE project_id = $1)",
            "DELETE FROM asset_relations WHERE parent_id IN (SELECT id FROM assets WHERE project_id = $1)",
            "DELETE FROM credentials WHERE project_id = $1",
            "DELETE FROM vulnerabilities WHERE project_id = $1",
            "DELETE FROM assets WHERE project_id = $1",
            "DELETE FROM jobs WHERE project_id = $1",
            "DELETE FROM workflow_runs WHERE project_id = $1",
            "DELETE FROM workflows WHERE project_id = $1",
        ] {
            sqlx::query(sql)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(db_err)?;
        }

        let deleted = sqlx::query("DELETE FROM projects WHERE id = $1")
            .bind(id)
            .execute(&mut *tx)
            .await
            .map_err(db_err)?;
        if deleted.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("project {id}")));
        }

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    // =========================================================================
    // Assets
    // =========================================================================

    async fn insert_asset(&self, asset: Asset) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO assets
                (id, project_id, type, value, metadata, tags, risk_score, status,
                 discovered_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(asset.id)
        .bind(asset.project_id)
        .bind(asset.asset_type.to_string())
        .bind(&asset.value)
        .bind(&asset.metadata)
        .bind(to_json(&asset.tags)?)
        .bind(asset.risk_score)
        .bind(asset.status.to_string())
        .bind(asset.discovered_by)
        .bind(asset.created_at)
        .bind(asset.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_asset(
        &self,
        project_id: Uuid,
        asset_type: AssetType,
        value: &str,
    ) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM assets WHERE project_id = $1 AND type = $2 AND value = $3",
        )
        .bind(project_id)
        .bind(asset_type.to_string())
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_asset).transpose()
    }

    async fn find_asset_by_value(
        &self,
        project_id: Uuid,
        value: &str,
    ) -> Result<Option<Asset>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM assets WHERE project_id = $1 AND value = $2 ORDER BY created_at LIMIT 1",
        )
        .bind(project_id)
        .bind(value)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_asset).transpose()
    }

    async fn update_asset(&self, asset: Asset) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE assets
            SET metadata = $2, tags = $3, risk_score = $4, status = $5, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(asset.id)
        .bind(&asset.metadata)
        .bind(to_json(&asset.tags)?)
        .bind(asset.risk_score)
        .bind(asset.status.to_string())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("asset {}", asset.id)));
        }
        Ok(())
    }

    async fn list_assets(&self, project_id: Uuid) -> Result<Vec<Asset>, StoreError> {
        let rows = sqlx::query("SELECT * FROM assets WHERE project_id = $1 ORDER BY created_at")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(map_asset).collect()
    }

    async fn insert_asset_relation(&self, relation: AssetRelation) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        let row = sqlx::query(
            r#"
            SELECT p.project_id AS parent_project, c.project_id AS child_project
            FROM assets p, assets c
            WHERE p.id = $1 AND c.id = $2
            "#,
        )
        .bind(relation.parent_id)
        .bind(relation.child_id)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_err)?
        .ok_or_else(|| StoreError::not_found("relation endpoint asset"))?;

        let parent_project: Uuid = row.get("parent_project");
        let child_project: Uuid = row.get("child_project");
        if parent_project != child_project {
            return Err(StoreError::Invariant(
                "asset relation endpoints must share a project".to_string(),
            ));
        }

        sqlx::query(
            r#"
            INSERT INTO asset_relations (parent_id, child_id, relation_type, metadata)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(relation.parent_id)
        .bind(relation.child_id)
        .bind(to_json(&relation.relation_type)?.as_str().unwrap_or("").to_string())
        .bind(&relation.metadata)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)?;
        Ok(())
    }

    // =========================================================================
    // Jobs
    // =========================================================================

    async fn create_job(&self, job: Job) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO jobs
                (id, project_id, tool_name, parameters, command, status, priority,
                 exit_code, error_message, started_at, completed_at, scheduled_at,
                 timeout_seconds, created_by, workflow_run_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(job.id)
        .bind(job.project_id)
        .bind(&job.tool_name)
        .bind(&job.parameters)
        .bind(&job.command)
        .bind(job.status.to_string())
        .bind(job.priority)
        .bind(job.exit_code)
        .bind(&job.error_message)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.scheduled_at)
        .bind(job.timeout_seconds as i64)
        .bind(job.created_by)
        .bind(job.workflow_run_id)
        .bind(job.created_at)
        .bind(job.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_job(&self, id: Uuid) -> Result<Option<Job>, StoreError> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(map_job).transpose()
    }

    async fn update_job(&self, job: Job) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE jobs
            SET status = $2, command = $3, exit_code = $4, error_message = $5,
                started_at = $6, completed_at = $7, scheduled_at = $8, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(job.id)
        .bind(job.status.to_string())
        .bind(&job.command)
        .bind(job.exit_code)
        .bind(&job.error_message)
        .bind(job.started_at)
        .bind(job.completed_at)
        .bind(job.scheduled_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("job {}", job.id)));
        }
        Ok(())
    }

    async fn list_due_scheduled_jobs(&self, now: DateTime<Utc>) -> Result<Vec<Job>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT * FROM jobs
            WHERE status = $1 AND scheduled_at IS NOT NULL AND scheduled_at <= $2
            ORDER BY scheduled_at
            "#,
        )
        .bind(JobStatus::Queued.to_string())
        .bind(now)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.iter().map(map_job).collect()
    }

    async fn add_job_target(&self, target: JobTarget) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_targets (job_id, asset_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(target.job_id)
        .bind(target.asset_id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn append_job_output(&self, output: JobOutput) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO job_outputs (id, job_id, sequence, output_type, content, timestamp)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(output.id)
        .bind(output.job_id)
        .bind(output.sequence)
        .bind(output.output_type.to_string())
        .bind(&output.content)
        .bind(output.timestamp)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_job_output(
        &self,
        job_id: Uuid,
        output_type: Option<OutputType>,
    ) -> Result<Vec<JobOutput>, StoreError> {
        let rows = match output_type {
            Some(kind) => {
                sqlx::query(
                    "SELECT * FROM job_outputs WHERE job_id = $1 AND output_type = $2 ORDER BY sequence",
                )
                .bind(job_id)
                .bind(kind.to_string())
                .fetch_all(&self.pool)
                .await
            }
            None => {
                sqlx::query("SELECT * FROM job_outputs WHERE job_id = $1 ORDER BY sequence")
                    .bind(job_id)
                    .fetch_all(&self.pool)
                    .await
            }
        }
        .map_err(db_err)?;

        rows.iter().map(map_job_output).collect()
    }

    // =========================================================================
    // Vulnerabilities
    // =========================================================================

    async fn get_vulnerability_by_fingerprint(
        &self,
        project_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Vulnerability>, StoreError> {
        let row = sqlx::query(
            "SELECT * FROM vulnerabilities WHERE project_id = $1 AND fingerprint = $2",
        )
        .bind(project_id)
        .bind(fingerprint)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        row.as_ref().map(map_vulnerability).transpose()
    }

    async fn insert_vulnerability(&self, v: Vulnerability) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO vulnerabilities
                (id, project_id, asset_id, title, description, severity, status,
                 cvss_score, cvss_vector, cve_ids, cwe_ids, evidence, remediation,
                 "references", template_id, tool_name, request, response, metadata,
                 tags, fingerprint, discovered_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19, $20, $21, $22, $23, $24)
            "#,
        )
        .bind(v.id)
        .bind(v.project_id)
        .bind(v.asset_id)
        .bind(&v.title)
        .bind(&v.description)
        .bind(v.severity.to_string())
        .bind(&v.status)
        .bind(v.cvss_score)
        .bind(&v.cvss_vector)
        .bind(to_json(&v.cve_ids)?)
        .bind(to_json(&v.cwe_ids)?)
        .bind(&v.evidence)
        .bind(&v.remediation)
        .bind(to_json(&v.references)?)
        .bind(&v.template_id)
        .bind(&v.tool_name)
        .bind(&v.request)
        .bind(&v.response)
        .bind(&v.metadata)
        .bind(to_json(&v.tags)?)
        .bind(&v.fingerprint)
        .bind(v.discovered_by)
        .bind(v.created_at)
        .bind(v.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_vulnerability(&self, v: Vulnerability) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE vulnerabilities
            SET description = $2, severity = $3, status = $4, cvss_score = $5,
                cvss_vector = $6, cve_ids = $7, cwe_ids = $8, evidence = $9,
                remediation = $10, "references" = $11, request = $12, response = $13,
                metadata = $14, tags = $15, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(v.id)
        .bind(&v.description)
        .bind(v.severity.to_string())
        .bind(&v.status)
        .bind(v.cvss_score)
        .bind(&v.cvss_vector)
        .bind(to_json(&v.cve_ids)?)
        .bind(to_json(&v.cwe_ids)?)
        .bind(&v.evidence)
        .bind(&v.remediation)
        .bind(to_json(&v.references)?)
        .bind(&v.request)
        .bind(&v.response)
        .bind(&v.metadata)
        .bind(to_json(&v.tags)?)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("vulnerability {}", v.id)));
        }
        Ok(())
    }

    async fn list_vulnerabilities(
        &self,
        project_id: Uuid,
    ) -> Result<Vec<Vulnerability>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM vulnerabilities WHERE project_id = $1 ORDER BY created_at")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        rows.iter().map(map_vulnerability).collect()
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    async fn get_credential_by_fingerprint(
        &self,
        project_id: Uuid,
        fingerprint: &str,
    ) -> Result<Option<Credential>, StoreError> {
        let row =
            sqlx::query("SELECT * FROM credentials WHERE project_id = $1 AND fingerprint = $2")
                .bind(project_id)
                .bind(fingerprint)
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        row.as_ref().map(map_credential).transpose()
    }

    async fn insert_credential(&self, c: Credential) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO credentials
                (id, project_id, asset_id, credential_type, username, domain,
                 plaintext_encrypted, hash_value, hash_type, service, port, url,
                 is_valid, source, metadata, fingerprint, discovered_by,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14,
                    $15, $16, $17, $18, $19)
            "#,
        )
        .bind(c.id)
        .bind(c.project_id)
        .bind(c.asset_id)
        .bind(c.credential_type.to_string())
        .bind(&c.username)
        .bind(&c.domain)
        .bind(&c.plaintext_encrypted)
        .bind(&c.hash_value)
        .bind(&c.hash_type)
        .bind(&c.service)
        .bind(c.port.map(|p| p as i32))
        .bind(&c.url)
        .bind(c.is_valid)
        .bind(&c.source)
        .bind(&c.metadata)
        .bind(&c.fingerprint)
        .bind(c.discovered_by)
        .bind(c.created_at)
        .bind(c.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn update_credential(&self, c: Credential) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE credentials
            SET plaintext_encrypted = $2, hash_value = $3, hash_type = $4,
                is_valid = $5, metadata = $6, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(c.id)
        .bind(&c.plaintext_encrypted)
        .bind(&c.hash_value)
        .bind(&c.hash_type)
        .bind(c.is_valid)
        .bind(&c.metadata)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("credential {}", c.id)));
        }
        Ok(())
    }

    async fn list_credentials(&self, project_id: Uuid) -> Result<Vec<Credential>, StoreError> {
        let rows =
            sqlx::query("SELECT * FROM credentials WHERE project_id = $1 ORDER BY created_at")
                .bind(project_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_err)?;

        rows.iter().map(map_credential).collect()
    }

    // =========================================================================
    // Results
    // =========================================================================

    async fn insert_result(&self, r: ResultRecord) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO results
                (id, job_id, asset_id, result_type, severity, raw_data, parsed_data,
                 fingerprint, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(r.id)
        .bind(r.job_id)
        .bind(r.asset_id)
        .bind(r.result_type.to_string())
        .bind(r.severity.map(|s| s.to_string()))
        .bind(&r.raw_data)
        .bind(&r.parsed_data)
        .bind(&r.fingerprint)
        .bind(r.created_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn list_results(&self, job_id: Uuid) -> Result<Vec<ResultRecord>, StoreError> {
        let rows = sqlx::query("SELECT * FROM results WHERE job_id = $1 ORDER BY created_at")
            .bind(job_id)
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.iter().map(map_result).collect()
    }

    // =========================================================================
    // Workflows
    // =========================================================================

    async fn create_workflow(&self, w: Workflow) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflows
                (id, project_id, name, description, definition, is_template,
                 settings, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(w.id)
        .bind(w.project_id)
        .bind(&w.name)
        .bind(&w.description)
        .bind(to_json(&w.definition)?)
        .bind(w.is_template)
        .bind(&w.settings)
        .bind(w.created_by)
        .bind(w.created_at)
        .bind(w.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_workflow(&self, id: Uuid) -> Result<Option<Workflow>, StoreError> {
        let row = sqlx::query("SELECT * FROM workflows WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(map_workflow).transpose()
    }

    async fn create_workflow_run(&self, run: WorkflowRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO workflow_runs
                (id, workflow_id, project_id, status, current_node_id, current_step,
                 context, input_params, execution_log, error_message, error_node_id,
                 started_at, completed_at, created_by, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
            "#,
        )
        .bind(run.id)
        .bind(run.workflow_id)
        .bind(run.project_id)
        .bind(run.status.to_string())
        .bind(&run.current_node_id)
        .bind(run.current_step)
        .bind(&run.context)
        .bind(&run.input_params)
        .bind(to_json(&run.execution_log)?)
        .bind(&run.error_message)
        .bind(&run.error_node_id)
        .bind(run.started_at)
        .bind(run.completed_at)
        .bind(run.created_by)
        .bind(run.created_at)
        .bind(run.updated_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn get_workflow_run(&self, id: Uuid) -> Result<Option<WorkflowRun>, StoreError> {
        let row = sqlx::query("SELECT * FROM workflow_runs WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;

        row.as_ref().map(map_workflow_run).transpose()
    }

    async fn update_workflow_run(&self, run: WorkflowRun) -> Result<(), StoreError> {
        let updated = sqlx::query(
            r#"
            UPDATE workflow_runs
            SET status = $2, current_node_id = $3, current_step = $4, context = $5,
                execution_log = $6, error_message = $7, error_node_id = $8,
                started_at = $9, completed_at = $10, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.status.to_string())
        .bind(&run.current_node_id)
        .bind(run.current_step)
        .bind(&run.context)
        .bind(to_json(&run.execution_log)?)
        .bind(&run.error_message)
        .bind(&run.error_node_id)
        .bind(run.started_at)
        .bind(run.completed_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if updated.rows_affected() == 0 {
            return Err(StoreError::not_found(format!("workflow run {}", run.id)));
        }
        Ok(())
    }
}
