//! Nikto JSON output parser.
//!
//! Nikto has no severity of its own; findings are scored by keyword
//! heuristics over the finding message.

use serde_json::{json, Value};

use scanforge_core::model::{AssetType, Job, Severity};

use crate::output::{ParseOutput, ParsedAsset, ParsedVulnerability};
use crate::util::is_ipv4;
use crate::Parser;

const CRITICAL_WORDS: &[&str] = &[
    "remote code execution",
    "rce",
    "command injection",
    "sql injection",
    "arbitrary file",
    "root",
    "admin access",
];

const HIGH_WORDS: &[&str] = &[
    "authentication bypass",
    "directory traversal",
    "path traversal",
    "file inclusion",
    "xss",
    "cross-site",
    "credentials",
    "password",
    "sensitive",
    "backup",
    "database",
];

const MEDIUM_WORDS: &[&str] = &[
    "disclosure",
    "information",
    "version",
    "outdated",
    "deprecated",
    "header",
    "cookie",
    "clickjacking",
];

const LOW_WORDS: &[&str] = &["allowed", "methods", "options", "trace", "etag"];

fn estimate_severity(message: &str) -> Severity {
    let lower = message.to_lowercase();
    if CRITICAL_WORDS.iter().any(|w| lower.contains(w)) {
        Severity::Critical
    } else if HIGH_WORDS.iter().any(|w| lower.contains(w)) {
        Severity::High
    } else if MEDIUM_WORDS.iter().any(|w| lower.contains(w)) {
        Severity::Medium
    } else if LOW_WORDS.iter().any(|w| lower.contains(w)) {
        Severity::Low
    } else {
        Severity::Info
    }
}

pub struct NiktoParser;

impl Parser for NiktoParser {
    fn tool_name(&self) -> &'static str {
        "nikto"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();

        let data: Value = match serde_json::from_str(output.trim()) {
            Ok(data) => data,
            Err(e) => {
                result.errors.push(format!("JSON parse error: {e}"));
                return result;
            }
        };

        // Nikto emits an array of hosts, a {"hosts": [...]} wrapper, or a
        // bare host object depending on version.
        match &data {
            Value::Array(hosts) => {
                for host in hosts {
                    process_host(host, &mut result);
                }
            }
            Value::Object(obj) => {
                if let Some(Value::Array(hosts)) = obj.get("hosts") {
                    for host in hosts {
                        process_host(host, &mut result);
                    }
                } else {
                    process_host(&data, &mut result);
                }
            }
            _ => result.errors.push("unexpected JSON shape".to_string()),
        }

        tracing::debug!(
            assets = result.assets.len(),
            vulnerabilities = result.vulnerabilities.len(),
            "nikto parsing complete"
        );
        result
    }
}

fn process_host(host_data: &Value, result: &mut ParseOutput) {
    let ip = host_data
        .get("ip")
        .or_else(|| host_data.get("host"))
        .and_then(Value::as_str)
        .unwrap_or("");
    let hostname = host_data
        .get("hostname")
        .and_then(Value::as_str)
        .unwrap_or("");
    let port = host_data.get("port").and_then(Value::as_u64).unwrap_or(80);
    let banner = host_data
        .get("banner")
        .and_then(Value::as_str)
        .unwrap_or("");

    if ip.is_empty() && hostname.is_empty() {
        return;
    }
    let target = if hostname.is_empty() { ip } else { hostname };
    let target_type = if is_ipv4(target) {
        AssetType::Host
    } else {
        AssetType::Domain
    };

    result.assets.push(ParsedAsset {
        metadata: json!({
            "ip": ip,
            "hostname": hostname,
            "port": port,
            "banner": banner,
        }),
        tags: vec!["nikto".to_string()],
        ..ParsedAsset::new(target_type, target)
    });

    let vulns = host_data
        .get("vulnerabilities")
        .or_else(|| host_data.get("items"))
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for vuln in &vulns {
        process_vulnerability(vuln, target, target_type, port, result);
    }
}

fn process_vulnerability(
    vuln: &Value,
    target: &str,
    target_type: AssetType,
    port: u64,
    result: &mut ParseOutput,
) {
    let vuln_id = match vuln.get("id").or_else(|| vuln.get("OSVDB")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Number(n)) => n.to_string(),
        _ => String::new(),
    };
    let message = vuln
        .get("msg")
        .or_else(|| vuln.get("message"))
        .or_else(|| vuln.get("description"))
        .and_then(Value::as_str)
        .unwrap_or("");
    if message.is_empty() {
        return;
    }

    let method = vuln.get("method").and_then(Value::as_str).unwrap_or("GET");
    let uri = vuln
        .get("uri")
        .or_else(|| vuln.get("url"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let mut references: Vec<String> = match vuln.get("references") {
        Some(Value::String(s)) if !s.is_empty() => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };
    if !vuln_id.is_empty() && vuln_id.chars().all(|c| c.is_ascii_digit()) {
        references.push(format!("https://osvdb.org/{vuln_id}"));
    }

    let title = if message.len() > 100 {
        let mut end = 100;
        while !message.is_char_boundary(end) {
            end -= 1;
        }
        format!("Nikto: {}...", &message[..end])
    } else {
        format!("Nikto: {message}")
    };

    result.vulnerabilities.push(ParsedVulnerability {
        description: Some(message.to_string()),
        evidence: (!uri.is_empty()).then(|| format!("URI: {uri}\nMethod: {method}")),
        references,
        template_id: (!vuln_id.is_empty()).then(|| format!("nikto:{vuln_id}")),
        tags: vec!["nikto".to_string()],
        metadata: json!({
            "nikto_id": vuln_id,
            "method": method,
            "uri": uri,
            "port": port,
        }),
        asset_value: Some(target.to_string()),
        asset_type: Some(target_type),
        ..ParsedVulnerability::new(title, estimate_severity(message))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "nikto", json!({}))
    }

    #[test]
    fn test_single_host_object() {
        let output = r#"{
          "host": "192.168.1.10", "ip": "192.168.1.10", "port": 80, "banner": "Apache/2.4.41",
          "vulnerabilities": [
            {"id": 3092, "msg": "SQL injection may be possible in login form", "method": "POST", "uri": "/login"},
            {"id": 999, "msg": "Server version disclosure via headers", "uri": "/"}
          ]
        }"#;

        let out = NiktoParser.parse(output, &job());
        assert_eq!(out.assets.len(), 1);
        assert_eq!(out.vulnerabilities.len(), 2);

        assert_eq!(out.vulnerabilities[0].severity, Severity::Critical);
        assert_eq!(out.vulnerabilities[1].severity, Severity::Medium);
        assert!(out.vulnerabilities[0]
            .references
            .iter()
            .any(|r| r.contains("osvdb.org/3092")));
    }

    #[test]
    fn test_hosts_wrapper() {
        let output = r#"{"hosts": [
          {"host": "a.example", "port": 443, "vulnerabilities": [{"id": 1, "msg": "TRACE method allowed"}]},
          {"host": "b.example", "port": 443, "vulnerabilities": []}
        ]}"#;
        let out = NiktoParser.parse(output, &job());
        assert_eq!(out.assets.len(), 2);
        assert_eq!(out.vulnerabilities.len(), 1);
        assert_eq!(out.vulnerabilities[0].severity, Severity::Low);
    }

    #[test]
    fn test_long_message_truncated_in_title() {
        let long_msg = "Information disclosure: ".to_string() + &"x".repeat(200);
        let output = json!({"host": "c.example", "vulnerabilities": [{"id": 2, "msg": long_msg}]});
        let out = NiktoParser.parse(&output.to_string(), &job());
        assert!(out.vulnerabilities[0].title.ends_with("..."));
        assert!(out.vulnerabilities[0].title.len() < 120);
    }

    #[test]
    fn test_invalid_json_records_error() {
        let out = NiktoParser.parse("- Nikto v2.5.0 ----------------", &job());
        assert!(!out.errors.is_empty());
    }
}
