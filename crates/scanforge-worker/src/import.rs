//! Import service for externally supplied scan files.
//!
//! A supported file is attached to a synthetic completed job and then
//! flows through the same parser + upsert path a locally executed job
//! would, so imported entities dedupe against scanned ones.

use std::sync::Arc;

use anyhow::{bail, Context, Result};
use serde::Serialize;
use serde_json::json;
use tracing::info;
use uuid::Uuid;

use scanforge_core::model::{Job, JobStatus};
use scanforge_parsers::ParserRegistry;
use scanforge_storage::{EncryptionService, Store};

use crate::upsert::{self, UpsertStats};

/// Formats accepted by the import API, with the parser each one maps to.
pub const SUPPORTED_FORMATS: &[(&str, &str)] = &[
    ("nessus", "nessus_parser"),
    ("burp", "burp_parser"),
    ("nuclei", "nuclei_parser"),
    ("nmap", "nmap_parser"),
];

/// Outcome of one import: the synthetic job, merge counters and any
/// non-fatal parse errors.
#[derive(Debug, Serialize)]
pub struct ImportReport {
    pub format: String,
    pub job_id: Uuid,
    #[serde(flatten)]
    pub stats: UpsertStats,
    pub errors: Vec<String>,
}

/// Import a scan file into a project.
pub async fn import_scan(
    store: &Arc<dyn Store>,
    crypto: &EncryptionService,
    parsers: &ParserRegistry,
    project_id: Uuid,
    format: &str,
    content: &[u8],
) -> Result<ImportReport> {
    let Some((_, parser_name)) = SUPPORTED_FORMATS.iter().find(|(f, _)| *f == format) else {
        bail!(
            "Unsupported format: {format}. Supported formats: {:?}",
            SUPPORTED_FORMATS.iter().map(|(f, _)| *f).collect::<Vec<_>>()
        );
    };
    let Some(parser) = parsers.get(parser_name) else {
        bail!("Parser not available for format: {format}");
    };

    if store
        .get_project(project_id)
        .await
        .map_err(anyhow::Error::msg)?
        .is_none()
    {
        bail!("Project {project_id} not found");
    }

    let text = String::from_utf8_lossy(content).into_owned();

    // Synthetic job so imported entities carry normal provenance
    let mut job = Job::new(
        project_id,
        format!("import_{format}"),
        json!({"format": format, "size": content.len()}),
    );
    job.status = JobStatus::Completed;
    job.completed_at = Some(chrono::Utc::now());
    store
        .create_job(job.clone())
        .await
        .context("failed to create import job")?;

    let output = parser.parse(&text, &job);
    let tool_name = parser.tool_name().to_string();
    let stats = upsert::apply(store, crypto, &job, &output, &tool_name).await?;

    info!(
        format,
        %project_id,
        assets_created = stats.assets_created,
        vulnerabilities_created = stats.vulnerabilities_created,
        "import complete"
    );

    Ok(ImportReport {
        format: format.to_string(),
        job_id: job.id,
        stats,
        errors: output.errors,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanforge_core::model::{AssetType, Project};
    use scanforge_storage::{generate_encryption_key, MemoryStore};

    fn crypto() -> EncryptionService {
        EncryptionService::new(&generate_encryption_key("kek"), &[]).unwrap()
    }

    #[tokio::test]
    async fn test_import_nuclei_jsonl() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let project = Project::new("imports");
        store.create_project(project.clone()).await.unwrap();

        let content = br#"{"template-id":"cve-2021-44228","info":{"name":"Log4j RCE","severity":"critical"},"host":"http://example.com","matched-at":"http://example.com/api"}"#;

        let report = import_scan(
            &store,
            &crypto(),
            &ParserRegistry::builtin(),
            project.id,
            "nuclei",
            content,
        )
        .await
        .unwrap();

        assert_eq!(report.stats.vulnerabilities_created, 1);
        assert!(report.errors.is_empty());

        // Synthetic job exists in completed state with the import marker
        let job = store.get_job(report.job_id).await.unwrap().unwrap();
        assert_eq!(job.tool_name, "import_nuclei");
        assert_eq!(job.status, JobStatus::Completed);

        let assets = store.list_assets(project.id).await.unwrap();
        assert!(assets
            .iter()
            .any(|a| a.asset_type == AssetType::Url && a.value == "http://example.com"));
    }

    #[tokio::test]
    async fn test_unsupported_format_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let project = Project::new("imports");
        store.create_project(project.clone()).await.unwrap();

        let err = import_scan(
            &store,
            &crypto(),
            &ParserRegistry::builtin(),
            project.id,
            "acunetix",
            b"data",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("Unsupported format"));
    }

    #[tokio::test]
    async fn test_unknown_project_rejected() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let err = import_scan(
            &store,
            &crypto(),
            &ParserRegistry::builtin(),
            Uuid::now_v7(),
            "nmap",
            b"<nmaprun/>",
        )
        .await
        .unwrap_err();
        assert!(err.to_string().contains("not found"));
    }

    #[tokio::test]
    async fn test_import_is_idempotent_for_findings() {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let service = crypto();
        let parsers = ParserRegistry::builtin();
        let project = Project::new("imports");
        store.create_project(project.clone()).await.unwrap();

        let content = br#"{"template-id":"t1","info":{"name":"Finding","severity":"low"},"host":"http://a.example"}"#;

        let first = import_scan(&store, &service, &parsers, project.id, "nuclei", content)
            .await
            .unwrap();
        let second = import_scan(&store, &service, &parsers, project.id, "nuclei", content)
            .await
            .unwrap();

        assert_eq!(first.stats.vulnerabilities_created, 1);
        assert_eq!(second.stats.vulnerabilities_created, 0);
        assert_eq!(second.stats.vulnerabilities_updated, 1);
    }
}
