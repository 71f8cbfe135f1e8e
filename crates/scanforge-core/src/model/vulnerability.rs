// Vulnerability finding model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

use super::result::Severity;

/// A security finding discovered by a tool or imported scan.
///
/// Deduplicated by `fingerprint`; merging unions the list fields and keeps
/// the richest evidence.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vulnerability {
    pub id: Uuid,
    pub project_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub title: String,
    pub description: Option<String>,
    pub severity: Severity,
    pub status: String,
    pub cvss_score: Option<f64>,
    pub cvss_vector: Option<String>,
    pub cve_ids: Vec<String>,
    pub cwe_ids: Vec<String>,
    pub evidence: Option<String>,
    pub remediation: Option<String>,
    pub references: Vec<String>,
    pub template_id: Option<String>,
    pub tool_name: Option<String>,
    pub request: Option<String>,
    pub response: Option<String>,
    pub metadata: Value,
    pub tags: Vec<String>,
    pub fingerprint: Option<String>,
    pub discovered_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Vulnerability {
    pub fn new(project_id: Uuid, title: impl Into<String>, severity: Severity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            project_id,
            asset_id: None,
            title: title.into(),
            description: None,
            severity,
            status: "open".to_string(),
            cvss_score: None,
            cvss_vector: None,
            cve_ids: Vec::new(),
            cwe_ids: Vec::new(),
            evidence: None,
            remediation: None,
            references: Vec::new(),
            template_id: None,
            tool_name: None,
            request: None,
            response: None,
            metadata: Value::Object(Default::default()),
            tags: Vec::new(),
            fingerprint: None,
            discovered_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}
