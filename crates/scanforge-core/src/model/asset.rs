// Asset and asset relationship models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of discovered network/resource atom
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetType {
    Host,
    Domain,
    Subdomain,
    Url,
    Service,
    Network,
    Endpoint,
    Certificate,
    Technology,
}

impl std::fmt::Display for AssetType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Host => "host",
            Self::Domain => "domain",
            Self::Subdomain => "subdomain",
            Self::Url => "url",
            Self::Service => "service",
            Self::Network => "network",
            Self::Endpoint => "endpoint",
            Self::Certificate => "certificate",
            Self::Technology => "technology",
        };
        write!(f, "{s}")
    }
}

/// Asset lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssetStatus {
    Active,
    Inactive,
    Archived,
}

impl std::fmt::Display for AssetStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Active => "active",
            Self::Inactive => "inactive",
            Self::Archived => "archived",
        };
        write!(f, "{s}")
    }
}

/// Directed relation between two assets in the same project
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RelationType {
    HasService,
    ResolvesTo,
    BelongsTo,
    Hosts,
    Uses,
    RedirectsTo,
}

/// A discovered target or resource tracked within a project.
///
/// The tuple (project_id, type, value) is unique; inserting a duplicate is
/// resolved by the upsert layer as a merge into the existing row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Asset {
    pub id: Uuid,
    pub project_id: Uuid,
    #[serde(rename = "type")]
    pub asset_type: AssetType,
    pub value: String,
    pub metadata: Value,
    pub tags: Vec<String>,
    pub risk_score: i32,
    pub status: AssetStatus,
    pub discovered_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Asset {
    pub fn new(project_id: Uuid, asset_type: AssetType, value: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::now_v7(),
            project_id,
            asset_type,
            value: value.into(),
            metadata: Value::Object(Default::default()),
            tags: Vec::new(),
            risk_score: 0,
            status: AssetStatus::Active,
            discovered_by: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Directed edge between two assets. Primary key: (parent_id, child_id).
/// Both endpoints must belong to the same project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssetRelation {
    pub parent_id: Uuid,
    pub child_id: Uuid,
    pub relation_type: RelationType,
    pub metadata: Value,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_asset_type_serde_round_trip() {
        let json = serde_json::to_string(&AssetType::Subdomain).unwrap();
        assert_eq!(json, "\"subdomain\"");
        let back: AssetType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, AssetType::Subdomain);
    }

    #[test]
    fn test_new_asset_defaults() {
        let project = Uuid::now_v7();
        let asset = Asset::new(project, AssetType::Host, "10.0.0.1");
        assert_eq!(asset.status, AssetStatus::Active);
        assert_eq!(asset.risk_score, 0);
        assert!(asset.tags.is_empty());
        assert!(asset.metadata.as_object().unwrap().is_empty());
    }
}
