// Raw structured observation model

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// Kind of raw observation a parser produced
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultType {
    Port,
    Service,
    Vulnerability,
    Credential,
    File,
    Directory,
    Subdomain,
    Technology,
    Certificate,
    DnsRecord,
    Header,
    Parameter,
    Endpoint,
    Raw,
}

impl std::fmt::Display for ResultType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Port => "port",
            Self::Service => "service",
            Self::Vulnerability => "vulnerability",
            Self::Credential => "credential",
            Self::File => "file",
            Self::Directory => "directory",
            Self::Subdomain => "subdomain",
            Self::Technology => "technology",
            Self::Certificate => "certificate",
            Self::DnsRecord => "dns_record",
            Self::Header => "header",
            Self::Parameter => "parameter",
            Self::Endpoint => "endpoint",
            Self::Raw => "raw",
        };
        write!(f, "{s}")
    }
}

/// Severity level shared by vulnerabilities and results
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Map a CVSS base score onto a severity via the standard cut-offs.
    pub fn from_cvss(score: f64) -> Self {
        if score >= 9.0 {
            Self::Critical
        } else if score >= 7.0 {
            Self::High
        } else if score >= 4.0 {
            Self::Medium
        } else if score > 0.0 {
            Self::Low
        } else {
            Self::Info
        }
    }

    /// Parse a tool-reported severity string; unknown values map to info.
    pub fn parse_lenient(s: &str) -> Self {
        match s.to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "medium" => Self::Medium,
            "high" => Self::High,
            "critical" => Self::Critical,
            _ => Self::Info,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Info => "info",
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
            Self::Critical => "critical",
        };
        write!(f, "{s}")
    }
}

/// A raw structured observation keyed to a job and optionally an asset.
/// Named `ResultRecord` to avoid clashing with `std::result::Result`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResultRecord {
    pub id: Uuid,
    pub job_id: Uuid,
    pub asset_id: Option<Uuid>,
    pub result_type: ResultType,
    pub severity: Option<Severity>,
    pub raw_data: Option<String>,
    pub parsed_data: Value,
    pub fingerprint: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl ResultRecord {
    pub fn new(job_id: Uuid, result_type: ResultType, parsed_data: Value) -> Self {
        Self {
            id: Uuid::now_v7(),
            job_id,
            asset_id: None,
            result_type,
            severity: None,
            raw_data: None,
            parsed_data,
            fingerprint: None,
            created_at: Utc::now(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cvss_cutoffs() {
        assert_eq!(Severity::from_cvss(9.8), Severity::Critical);
        assert_eq!(Severity::from_cvss(9.0), Severity::Critical);
        assert_eq!(Severity::from_cvss(7.5), Severity::High);
        assert_eq!(Severity::from_cvss(5.0), Severity::Medium);
        assert_eq!(Severity::from_cvss(0.1), Severity::Low);
        assert_eq!(Severity::from_cvss(0.0), Severity::Info);
    }

    #[test]
    fn test_lenient_parse_unknown_maps_to_info() {
        assert_eq!(Severity::parse_lenient("CRITICAL"), Severity::Critical);
        assert_eq!(Severity::parse_lenient("unknown"), Severity::Info);
        assert_eq!(Severity::parse_lenient(""), Severity::Info);
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Critical > Severity::High);
        assert!(Severity::High > Severity::Medium);
        assert!(Severity::Info < Severity::Low);
    }
}
