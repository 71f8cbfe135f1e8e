//! Masscan JSON output parser.
//!
//! Masscan emits a JSON array that is frequently malformed: trailing
//! commas, a missing closing bracket when interrupted. The parser repairs
//! the document where it can and falls back to line-by-line JSON.

use std::collections::HashSet;

use serde_json::{json, Value};

use scanforge_core::model::{AssetType, Job, ResultType};

use crate::output::{ParseOutput, ParsedAsset, ParsedFinding};
use crate::Parser;

pub struct MasscanParser;

impl Parser for MasscanParser {
    fn tool_name(&self) -> &'static str {
        "masscan"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();
        let mut seen_hosts = HashSet::new();

        let mut doc = output.trim().to_string();
        if let Some(stripped) = doc.strip_suffix(',') {
            doc = stripped.to_string();
        }
        if !doc.starts_with('[') {
            doc = format!("[{doc}");
        }
        if !doc.ends_with(']') {
            doc = format!("{doc}]");
        }

        match serde_json::from_str::<Vec<Value>>(&doc) {
            Ok(entries) => {
                for entry in &entries {
                    process_entry(entry, &mut result, &mut seen_hosts);
                }
            }
            Err(e) => {
                result.errors.push(format!("JSON parse error: {e}"));
                parse_line_by_line(output, &mut result, &mut seen_hosts);
            }
        }

        tracing::debug!(
            assets = result.assets.len(),
            results = result.results.len(),
            "masscan parsing complete"
        );
        result
    }
}

fn parse_line_by_line(output: &str, result: &mut ParseOutput, seen_hosts: &mut HashSet<String>) {
    for line in output.lines() {
        let line = line.trim().trim_end_matches(',');
        if line.is_empty() || line == "[" || line == "]" {
            continue;
        }
        if let Ok(entry) = serde_json::from_str::<Value>(line) {
            process_entry(&entry, result, seen_hosts);
        }
    }
}

fn process_entry(entry: &Value, result: &mut ParseOutput, seen_hosts: &mut HashSet<String>) {
    let ip = entry.get("ip").and_then(Value::as_str).unwrap_or("");
    if ip.is_empty() {
        return;
    }

    if seen_hosts.insert(ip.to_string()) {
        result.assets.push(ParsedAsset {
            tags: vec!["masscan".to_string()],
            ..ParsedAsset::new(AssetType::Host, ip)
        });
    }

    let ports = entry
        .get("ports")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for port_info in &ports {
        let Some(port) = port_info.get("port").and_then(Value::as_u64) else {
            continue;
        };
        let status = port_info
            .get("status")
            .and_then(Value::as_str)
            .unwrap_or("open");
        if status != "open" {
            continue;
        }
        let protocol = port_info
            .get("proto")
            .and_then(Value::as_str)
            .unwrap_or("tcp");
        let reason = port_info
            .get("reason")
            .and_then(Value::as_str)
            .unwrap_or("");
        let ttl = port_info.get("ttl").and_then(Value::as_u64).unwrap_or(0);

        result.assets.push(ParsedAsset {
            metadata: json!({
                "ip": ip,
                "port": port,
                "protocol": protocol,
                "status": status,
                "reason": reason,
                "ttl": ttl,
            }),
            tags: vec!["masscan".to_string()],
            ..ParsedAsset::new(AssetType::Service, format!("{ip}:{port}/{protocol}"))
        });

        result.results.push(ParsedFinding {
            asset_value: Some(ip.to_string()),
            asset_type: Some(AssetType::Host),
            ..ParsedFinding::new(
                ResultType::Port,
                json!({
                    "ip": ip,
                    "port": port,
                    "protocol": protocol,
                    "status": status,
                    "reason": reason,
                    "ttl": ttl,
                }),
            )
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "masscan", json!({}))
    }

    #[test]
    fn test_well_formed_array() {
        let output = r#"[
          {"ip":"10.0.0.1","timestamp":"1700000000","ports":[{"port":80,"proto":"tcp","status":"open","reason":"syn-ack","ttl":64}]},
          {"ip":"10.0.0.2","timestamp":"1700000001","ports":[{"port":22,"proto":"tcp","status":"open","reason":"syn-ack","ttl":64}]}
        ]"#;
        let out = MasscanParser.parse(output, &job());
        assert_eq!(
            out.assets
                .iter()
                .filter(|a| a.asset_type == AssetType::Host)
                .count(),
            2
        );
        assert_eq!(out.results.len(), 2);
    }

    #[test]
    fn test_trailing_comma_tolerated() {
        let output = "[\n{\"ip\":\"10.0.0.1\",\"ports\":[{\"port\":443,\"proto\":\"tcp\",\"status\":\"open\"}]},\n";
        let out = MasscanParser.parse(output, &job());
        assert!(out
            .assets
            .iter()
            .any(|a| a.value == "10.0.0.1:443/tcp"));
    }

    #[test]
    fn test_closed_ports_skipped() {
        let output = r#"[{"ip":"10.0.0.1","ports":[{"port":25,"proto":"tcp","status":"closed"}]}]"#;
        let out = MasscanParser.parse(output, &job());
        assert!(out.results.is_empty());
        // Host asset is still recorded
        assert_eq!(out.assets.len(), 1);
    }
}
