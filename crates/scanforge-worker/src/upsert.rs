//! Upsert layer: fingerprint-based idempotent merge of parsed entities
//! into the persistence gateway.
//!
//! Assets merge on their natural key (project, type, value);
//! vulnerabilities and credentials merge on their fingerprints; raw
//! results are always inserted. Credential plaintext passes through the
//! encryption service before it reaches a store. Any gateway error aborts
//! the merge and bubbles to the caller.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use serde::Serialize;
use serde_json::Value;
use tracing::debug;

use scanforge_core::fingerprint;
use scanforge_core::model::{Asset, Credential, Job, ResultRecord, Vulnerability};
use scanforge_parsers::{ParseOutput, ParsedAsset, ParsedCredential, ParsedFinding, ParsedVulnerability};
use scanforge_storage::{EncryptionService, Store};

/// Maximum stored asset value length.
const ASSET_VALUE_LIMIT: usize = 500;

/// Counts of created/updated rows per entity kind.
#[derive(Debug, Clone, Default, Serialize)]
pub struct UpsertStats {
    pub assets_created: usize,
    pub assets_updated: usize,
    pub vulnerabilities_created: usize,
    pub vulnerabilities_updated: usize,
    pub credentials_created: usize,
    pub credentials_updated: usize,
    pub results_created: usize,
}

/// Merge a parser's output into storage for the given job.
pub async fn apply(
    store: &Arc<dyn Store>,
    crypto: &EncryptionService,
    job: &Job,
    output: &ParseOutput,
    tool_name: &str,
) -> Result<UpsertStats> {
    let mut stats = UpsertStats::default();

    // Assets first, so later entities can link against the cache without
    // re-querying.
    let mut asset_cache: HashMap<String, Asset> = HashMap::new();
    for parsed in &output.assets {
        let (asset, created) = upsert_asset(store, job, parsed).await?;
        asset_cache.insert(parsed.value.clone(), asset);
        if created {
            stats.assets_created += 1;
        } else {
            stats.assets_updated += 1;
        }
    }

    for parsed in &output.vulnerabilities {
        let asset_id =
            resolve_asset(store, job, &mut asset_cache, parsed.asset_value.as_deref()).await?;
        let created = upsert_vulnerability(store, job, parsed, asset_id, tool_name).await?;
        if created {
            stats.vulnerabilities_created += 1;
        } else {
            stats.vulnerabilities_updated += 1;
        }
    }

    for parsed in &output.credentials {
        let asset_id =
            resolve_asset(store, job, &mut asset_cache, parsed.asset_value.as_deref()).await?;
        let created = upsert_credential(store, crypto, job, parsed, asset_id, tool_name).await?;
        if created {
            stats.credentials_created += 1;
        } else {
            stats.credentials_updated += 1;
        }
    }

    for parsed in &output.results {
        let asset_id =
            resolve_asset(store, job, &mut asset_cache, parsed.asset_value.as_deref()).await?;
        insert_result(store, job, parsed, asset_id).await?;
        stats.results_created += 1;
    }

    debug!(
        job_id = %job.id,
        assets = stats.assets_created + stats.assets_updated,
        vulnerabilities = stats.vulnerabilities_created + stats.vulnerabilities_updated,
        credentials = stats.credentials_created + stats.credentials_updated,
        results = stats.results_created,
        "upsert complete"
    );
    Ok(stats)
}

/// Union of two tag lists, preserving first-seen order.
fn merge_tags(existing: &[String], incoming: &[String]) -> Vec<String> {
    let mut merged: Vec<String> = existing.to_vec();
    for tag in incoming {
        if !merged.contains(tag) {
            merged.push(tag.clone());
        }
    }
    merged
}

/// Shallow metadata merge; incoming keys win on conflict.
fn merge_metadata(existing: &Value, incoming: &Value) -> Value {
    match (existing, incoming) {
        (Value::Object(base), Value::Object(overlay)) => {
            let mut merged = base.clone();
            for (key, value) in overlay {
                merged.insert(key.clone(), value.clone());
            }
            Value::Object(merged)
        }
        (_, incoming) if !incoming.is_null() => incoming.clone(),
        (existing, _) => existing.clone(),
    }
}

fn merge_string_lists(existing: &[String], incoming: &[String]) -> Vec<String> {
    merge_tags(existing, incoming)
}

async fn resolve_asset(
    store: &Arc<dyn Store>,
    job: &Job,
    cache: &mut HashMap<String, Asset>,
    asset_value: Option<&str>,
) -> Result<Option<uuid::Uuid>> {
    let Some(value) = asset_value.filter(|v| !v.is_empty()) else {
        return Ok(None);
    };
    if let Some(asset) = cache.get(value) {
        return Ok(Some(asset.id));
    }
    match store
        .find_asset_by_value(job.project_id, value)
        .await
        .context("asset lookup failed")?
    {
        Some(asset) => {
            let id = asset.id;
            cache.insert(value.to_string(), asset);
            Ok(Some(id))
        }
        None => Ok(None),
    }
}

async fn upsert_asset(
    store: &Arc<dyn Store>,
    job: &Job,
    parsed: &ParsedAsset,
) -> Result<(Asset, bool)> {
    let mut value = parsed.value.clone();
    if value.len() > ASSET_VALUE_LIMIT {
        value.truncate(
            (0..=ASSET_VALUE_LIMIT)
                .rev()
                .find(|i| value.is_char_boundary(*i))
                .unwrap_or(0),
        );
    }

    let existing = store
        .get_asset(job.project_id, parsed.asset_type, &value)
        .await
        .context("asset lookup failed")?;

    match existing {
        Some(mut asset) => {
            asset.metadata = merge_metadata(&asset.metadata, &parsed.metadata);
            asset.tags = merge_tags(&asset.tags, &parsed.tags);
            asset.risk_score = asset.risk_score.max(parsed.risk_score);
            store
                .update_asset(asset.clone())
                .await
                .context("asset update failed")?;
            Ok((asset, false))
        }
        None => {
            let mut asset = Asset::new(job.project_id, parsed.asset_type, value);
            asset.metadata = parsed.metadata.clone();
            asset.tags = parsed.tags.clone();
            asset.risk_score = parsed.risk_score;
            asset.discovered_by = Some(job.id);
            store
                .insert_asset(asset.clone())
                .await
                .context("asset insert failed")?;
            Ok((asset, true))
        }
    }
}

async fn upsert_vulnerability(
    store: &Arc<dyn Store>,
    job: &Job,
    parsed: &ParsedVulnerability,
    asset_id: Option<uuid::Uuid>,
    tool_name: &str,
) -> Result<bool> {
    let fp = fingerprint(&[
        job.project_id.to_string(),
        parsed.title.clone(),
        parsed.template_id.clone().unwrap_or_default(),
        asset_id.map(|id| id.to_string()).unwrap_or_default(),
    ]);

    let existing = store
        .get_vulnerability_by_fingerprint(job.project_id, &fp)
        .await
        .context("vulnerability lookup failed")?;

    match existing {
        Some(mut vuln) => {
            if parsed.description.is_some() {
                vuln.description = parsed.description.clone();
            }
            if parsed.evidence.is_some() {
                vuln.evidence = parsed.evidence.clone();
            }
            if parsed.request.is_some() {
                vuln.request = parsed.request.clone();
            }
            if parsed.response.is_some() {
                vuln.response = parsed.response.clone();
            }
            vuln.metadata = merge_metadata(&vuln.metadata, &parsed.metadata);
            vuln.tags = merge_string_lists(&vuln.tags, &parsed.tags);
            vuln.references = merge_string_lists(&vuln.references, &parsed.references);
            vuln.cve_ids = merge_string_lists(&vuln.cve_ids, &parsed.cve_ids);
            vuln.cwe_ids = merge_string_lists(&vuln.cwe_ids, &parsed.cwe_ids);
            store
                .update_vulnerability(vuln)
                .await
                .context("vulnerability update failed")?;
            Ok(false)
        }
        None => {
            let mut vuln = Vulnerability::new(job.project_id, &parsed.title, parsed.severity);
            vuln.asset_id = asset_id;
            vuln.description = parsed.description.clone();
            vuln.cvss_score = parsed.cvss_score;
            vuln.cvss_vector = parsed.cvss_vector.clone();
            vuln.cve_ids = parsed.cve_ids.clone();
            vuln.cwe_ids = parsed.cwe_ids.clone();
            vuln.evidence = parsed.evidence.clone();
            vuln.remediation = parsed.remediation.clone();
            vuln.references = parsed.references.clone();
            vuln.template_id = parsed.template_id.clone();
            vuln.tool_name = Some(tool_name.to_string());
            vuln.request = parsed.request.clone();
            vuln.response = parsed.response.clone();
            vuln.metadata = parsed.metadata.clone();
            vuln.tags = parsed.tags.clone();
            vuln.fingerprint = Some(fp);
            vuln.discovered_by = Some(job.id);
            store
                .insert_vulnerability(vuln)
                .await
                .context("vulnerability insert failed")?;
            Ok(true)
        }
    }
}

async fn upsert_credential(
    store: &Arc<dyn Store>,
    crypto: &EncryptionService,
    job: &Job,
    parsed: &ParsedCredential,
    asset_id: Option<uuid::Uuid>,
    tool_name: &str,
) -> Result<bool> {
    let fp = fingerprint(&[
        job.project_id.to_string(),
        parsed.username.clone().unwrap_or_default(),
        parsed.service.clone().unwrap_or_default(),
        parsed.port.map(|p| p.to_string()).unwrap_or_default(),
        asset_id.map(|id| id.to_string()).unwrap_or_default(),
    ]);

    let existing = store
        .get_credential_by_fingerprint(job.project_id, &fp)
        .await
        .context("credential lookup failed")?;

    match existing {
        Some(mut cred) => {
            if let Some(password) = parsed.password.as_deref().filter(|p| !p.is_empty()) {
                cred.plaintext_encrypted =
                    Some(crypto.encrypt(password).context("encryption failed")?);
            }
            if let Some(hash) = parsed.hash_value.as_deref().filter(|h| !h.is_empty()) {
                cred.hash_value = Some(hash.to_string());
                cred.hash_type = parsed.hash_type.clone();
            }
            cred.is_valid = Some(true);
            cred.metadata = merge_metadata(&cred.metadata, &parsed.metadata);
            store
                .update_credential(cred)
                .await
                .context("credential update failed")?;
            Ok(false)
        }
        None => {
            let mut cred = Credential::new(job.project_id, parsed.credential_type);
            cred.asset_id = asset_id;
            cred.username = parsed.username.clone();
            cred.domain = parsed.domain.clone();
            cred.plaintext_encrypted = match parsed.password.as_deref().filter(|p| !p.is_empty()) {
                Some(password) => Some(crypto.encrypt(password).context("encryption failed")?),
                None => None,
            };
            cred.hash_value = parsed.hash_value.clone();
            cred.hash_type = parsed.hash_type.clone();
            cred.service = parsed.service.clone();
            cred.port = parsed.port;
            cred.url = parsed.url.clone();
            cred.is_valid = Some(true);
            cred.source = Some(tool_name.to_string());
            cred.metadata = parsed.metadata.clone();
            cred.fingerprint = Some(fp);
            cred.discovered_by = Some(job.id);
            store
                .insert_credential(cred)
                .await
                .context("credential insert failed")?;
            Ok(true)
        }
    }
}

async fn insert_result(
    store: &Arc<dyn Store>,
    job: &Job,
    parsed: &ParsedFinding,
    asset_id: Option<uuid::Uuid>,
) -> Result<()> {
    let canonical = serde_json::to_string(&parsed.parsed_data)
        .context("failed to serialize parsed data")?;
    let fp = fingerprint(&[
        job.id.to_string(),
        parsed.result_type.to_string(),
        canonical,
    ]);

    let mut record = ResultRecord::new(job.id, parsed.result_type, parsed.parsed_data.clone());
    record.asset_id = asset_id;
    record.severity = parsed.severity;
    record.raw_data = parsed.raw_data.clone();
    record.fingerprint = Some(fp);

    store
        .insert_result(record)
        .await
        .context("result insert failed")?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use scanforge_core::model::{AssetType, CredentialType, Project, ResultType, Severity};
    use scanforge_storage::{generate_encryption_key, MemoryStore};
    use serde_json::json;

    fn crypto() -> EncryptionService {
        EncryptionService::new(&generate_encryption_key("test-kek"), &[]).unwrap()
    }

    async fn setup() -> (Arc<dyn Store>, Job) {
        let store: Arc<dyn Store> = Arc::new(MemoryStore::new());
        let project = Project::new("p");
        store.create_project(project.clone()).await.unwrap();
        let job = Job::new(project.id, "nmap", json!({}));
        store.create_job(job.clone()).await.unwrap();
        (store, job)
    }

    fn sample_output() -> ParseOutput {
        let mut output = ParseOutput::new();
        output.assets.push(ParsedAsset {
            metadata: json!({"os": "linux"}),
            tags: vec!["nmap".to_string()],
            risk_score: 10,
            ..ParsedAsset::new(AssetType::Host, "10.0.0.1")
        });
        output.vulnerabilities.push(ParsedVulnerability {
            template_id: Some("tpl-1".to_string()),
            cve_ids: vec!["CVE-2024-0001".to_string()],
            tags: vec!["nmap".to_string()],
            asset_value: Some("10.0.0.1".to_string()),
            asset_type: Some(AssetType::Host),
            ..ParsedVulnerability::new("Test Vuln", Severity::High)
        });
        output.credentials.push(ParsedCredential {
            username: Some("admin".to_string()),
            password: Some("hunter2".to_string()),
            service: Some("ssh".to_string()),
            port: Some(22),
            credential_type: CredentialType::Password,
            asset_value: Some("10.0.0.1".to_string()),
            ..Default::default()
        });
        output.results.push(ParsedFinding {
            asset_value: Some("10.0.0.1".to_string()),
            ..ParsedFinding::new(ResultType::Port, json!({"port": 22}))
        });
        output
    }

    #[tokio::test]
    async fn test_first_apply_creates_everything() {
        let (store, job) = setup().await;
        let stats = apply(&store, &crypto(), &job, &sample_output(), "nmap")
            .await
            .unwrap();

        assert_eq!(stats.assets_created, 1);
        assert_eq!(stats.vulnerabilities_created, 1);
        assert_eq!(stats.credentials_created, 1);
        assert_eq!(stats.results_created, 1);

        // Entities link back to the discovering job and the asset
        let asset = store
            .get_asset(job.project_id, AssetType::Host, "10.0.0.1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(asset.discovered_by, Some(job.id));

        let vulns = store.list_vulnerabilities(job.project_id).await.unwrap();
        assert_eq!(vulns[0].asset_id, Some(asset.id));
        assert_eq!(vulns[0].tool_name.as_deref(), Some("nmap"));
        assert!(vulns[0].fingerprint.is_some());
    }

    #[tokio::test]
    async fn test_second_apply_is_idempotent() {
        let (store, job) = setup().await;
        let service = crypto();
        let output = sample_output();

        apply(&store, &service, &job, &output, "nmap").await.unwrap();
        let second = apply(&store, &service, &job, &output, "nmap").await.unwrap();

        // No new vulnerabilities or credentials on the second run
        assert_eq!(second.vulnerabilities_created, 0);
        assert_eq!(second.vulnerabilities_updated, 1);
        assert_eq!(second.credentials_created, 0);
        assert_eq!(second.credentials_updated, 1);
        assert_eq!(second.assets_created, 0);
        assert_eq!(second.assets_updated, 1);

        assert_eq!(
            store.list_vulnerabilities(job.project_id).await.unwrap().len(),
            1
        );
        assert_eq!(
            store.list_credentials(job.project_id).await.unwrap().len(),
            1
        );
    }

    #[tokio::test]
    async fn test_asset_merge_unions_tags_and_takes_max_risk() {
        let (store, job) = setup().await;
        let service = crypto();

        let mut first = ParseOutput::new();
        first.assets.push(ParsedAsset {
            metadata: json!({"os": "linux", "stale": 1}),
            tags: vec!["nmap".to_string()],
            risk_score: 40,
            ..ParsedAsset::new(AssetType::Host, "10.0.0.1")
        });
        apply(&store, &service, &job, &first, "nmap").await.unwrap();

        let mut second = ParseOutput::new();
        second.assets.push(ParsedAsset {
            metadata: json!({"stale": 2, "new": true}),
            tags: vec!["hydra".to_string(), "nmap".to_string()],
            risk_score: 20,
            ..ParsedAsset::new(AssetType::Host, "10.0.0.1")
        });
        apply(&store, &service, &job, &second, "hydra").await.unwrap();

        let asset = store
            .get_asset(job.project_id, AssetType::Host, "10.0.0.1")
            .await
            .unwrap()
            .unwrap();
        // Tags union, incoming metadata wins on conflict, max risk kept
        assert_eq!(asset.tags, vec!["nmap", "hydra"]);
        assert_eq!(asset.metadata["stale"], 2);
        assert_eq!(asset.metadata["os"], "linux");
        assert_eq!(asset.metadata["new"], true);
        assert_eq!(asset.risk_score, 40);

        // Asset uniqueness holds after both runs
        let assets = store.list_assets(job.project_id).await.unwrap();
        assert_eq!(assets.len(), 1);
    }

    #[tokio::test]
    async fn test_vulnerability_merge_unions_lists() {
        let (store, job) = setup().await;
        let service = crypto();

        let mut first = ParseOutput::new();
        first.vulnerabilities.push(ParsedVulnerability {
            template_id: Some("tpl".to_string()),
            cve_ids: vec!["CVE-1".to_string()],
            references: vec!["https://a".to_string()],
            ..ParsedVulnerability::new("V", Severity::High)
        });
        apply(&store, &service, &job, &first, "nuclei").await.unwrap();

        let mut second = ParseOutput::new();
        second.vulnerabilities.push(ParsedVulnerability {
            template_id: Some("tpl".to_string()),
            cve_ids: vec!["CVE-1".to_string(), "CVE-2".to_string()],
            references: vec!["https://b".to_string()],
            evidence: Some("fresh evidence".to_string()),
            ..ParsedVulnerability::new("V", Severity::High)
        });
        apply(&store, &service, &job, &second, "nuclei").await.unwrap();

        let vulns = store.list_vulnerabilities(job.project_id).await.unwrap();
        assert_eq!(vulns.len(), 1);
        assert_eq!(vulns[0].cve_ids, vec!["CVE-1", "CVE-2"]);
        assert_eq!(vulns[0].references, vec!["https://a", "https://b"]);
        assert_eq!(vulns[0].evidence.as_deref(), Some("fresh evidence"));
    }

    #[tokio::test]
    async fn test_credential_plaintext_is_encrypted_and_round_trips() {
        let (store, job) = setup().await;
        let service = crypto();

        apply(&store, &service, &job, &sample_output(), "hydra")
            .await
            .unwrap();

        let creds = store.list_credentials(job.project_id).await.unwrap();
        let stored = creds[0].plaintext_encrypted.as_deref().unwrap();
        assert_ne!(stored, "hunter2");
        assert_eq!(service.decrypt(stored).unwrap(), "hunter2");
        assert_eq!(creds[0].is_valid, Some(true));
        assert_eq!(creds[0].source.as_deref(), Some("hydra"));
    }

    #[tokio::test]
    async fn test_results_always_inserted() {
        let (store, job) = setup().await;
        let service = crypto();
        let output = sample_output();

        apply(&store, &service, &job, &output, "nmap").await.unwrap();
        apply(&store, &service, &job, &output, "nmap").await.unwrap();

        // Raw results accumulate; they are never merged
        assert_eq!(store.list_results(job.id).await.unwrap().len(), 2);
    }
}
