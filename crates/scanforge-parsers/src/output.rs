//! Parsed entity aggregates produced by the parsers.
//!
//! Parsers are pure: they turn raw tool output into these value types and
//! never touch storage. The upsert layer resolves asset links and merges
//! into the gateway.

use serde_json::Value;

use scanforge_core::model::{AssetType, CredentialType, ResultType, Severity};

/// An asset to be created or merged.
#[derive(Debug, Clone)]
pub struct ParsedAsset {
    pub asset_type: AssetType,
    pub value: String,
    pub metadata: Value,
    pub tags: Vec<String>,
    pub risk_score: i32,
}

impl ParsedAsset {
    pub fn new(asset_type: AssetType, value: impl Into<String>) -> Self {
        Self {
            asset_type,
            value: value.into(),
            metadata: Value::Object(Default::default()),
            tags: Vec::new(),
            risk_score: 0,
        }
    }
}

/// A vulnerability finding to be created or merged.
#[derive(Debug, Clone)]
pub struct ParsedVulnerability {
    pub title: String,
    pub severity: Severity,
    pub description: Option<String>,
    pub cvss_score: Option<f64>,
    pub cvss_vector: Option<String>,
    pub cve_ids: Vec<String>,
    pub cwe_ids: Vec<String>,
    pub evidence: Option<String>,
    pub remediation: Option<String>,
    pub references: Vec<String>,
    pub template_id: Option<String>,
    pub request: Option<String>,
    pub response: Option<String>,
    pub metadata: Value,
    pub tags: Vec<String>,
    /// Hint for asset linking in the upsert layer
    pub asset_value: Option<String>,
    pub asset_type: Option<AssetType>,
}

impl ParsedVulnerability {
    pub fn new(title: impl Into<String>, severity: Severity) -> Self {
        Self {
            title: title.into(),
            severity,
            description: None,
            cvss_score: None,
            cvss_vector: None,
            cve_ids: Vec::new(),
            cwe_ids: Vec::new(),
            evidence: None,
            remediation: None,
            references: Vec::new(),
            template_id: None,
            request: None,
            response: None,
            metadata: Value::Object(Default::default()),
            tags: Vec::new(),
            asset_value: None,
            asset_type: None,
        }
    }
}

/// A credential to be created or merged.
#[derive(Debug, Clone)]
pub struct ParsedCredential {
    pub username: Option<String>,
    pub password: Option<String>,
    pub hash_value: Option<String>,
    pub hash_type: Option<String>,
    pub service: Option<String>,
    pub port: Option<u16>,
    pub url: Option<String>,
    pub domain: Option<String>,
    pub credential_type: CredentialType,
    pub metadata: Value,
    /// Hint for asset linking in the upsert layer
    pub asset_value: Option<String>,
    pub asset_type: Option<AssetType>,
}

impl Default for ParsedCredential {
    fn default() -> Self {
        Self {
            username: None,
            password: None,
            hash_value: None,
            hash_type: None,
            service: None,
            port: None,
            url: None,
            domain: None,
            credential_type: CredentialType::Password,
            metadata: Value::Object(Default::default()),
            asset_value: None,
            asset_type: None,
        }
    }
}

/// A raw structured observation.
#[derive(Debug, Clone)]
pub struct ParsedFinding {
    pub result_type: ResultType,
    pub parsed_data: Value,
    pub raw_data: Option<String>,
    pub severity: Option<Severity>,
    /// Hint for asset linking in the upsert layer
    pub asset_value: Option<String>,
    pub asset_type: Option<AssetType>,
}

impl ParsedFinding {
    pub fn new(result_type: ResultType, parsed_data: Value) -> Self {
        Self {
            result_type,
            parsed_data,
            raw_data: None,
            severity: None,
            asset_value: None,
            asset_type: None,
        }
    }
}

/// Complete output of one parser invocation.
#[derive(Debug, Clone, Default)]
pub struct ParseOutput {
    pub assets: Vec<ParsedAsset>,
    pub vulnerabilities: Vec<ParsedVulnerability>,
    pub credentials: Vec<ParsedCredential>,
    pub results: Vec<ParsedFinding>,
    /// Non-fatal format deviations encountered while parsing. Parsing
    /// continues past them; the upsert layer processes the parsed subset.
    pub errors: Vec<String>,
}

impl ParseOutput {
    pub fn new() -> Self {
        Self::default()
    }
}
