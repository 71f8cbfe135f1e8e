//! Amass JSONL output parser.

use std::collections::HashSet;

use serde_json::{json, Value};

use scanforge_core::model::{AssetType, Job};

use crate::output::{ParseOutput, ParsedAsset};
use crate::Parser;

pub struct AmassParser;

impl Parser for AmassParser {
    fn tool_name(&self) -> &'static str {
        "amass"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();
        let mut seen_domains = HashSet::new();
        let mut seen_ips = HashSet::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(finding) => {
                    process_finding(&finding, &mut result, &mut seen_domains, &mut seen_ips)
                }
                Err(e) => result.errors.push(format!("JSON parse error: {e}")),
            }
        }

        tracing::debug!(assets = result.assets.len(), "amass parsing complete");
        result
    }
}

fn process_finding(
    finding: &Value,
    result: &mut ParseOutput,
    seen_domains: &mut HashSet<String>,
    seen_ips: &mut HashSet<String>,
) {
    let name = finding.get("name").and_then(Value::as_str).unwrap_or("");
    let domain = finding.get("domain").and_then(Value::as_str).unwrap_or("");
    if name.is_empty() {
        return;
    }

    if seen_domains.insert(name.to_string()) {
        let is_subdomain =
            name != domain && !domain.is_empty() && name.ends_with(&format!(".{domain}"));

        result.assets.push(ParsedAsset {
            metadata: json!({
                "root_domain": domain,
                "is_subdomain": is_subdomain,
                "source": finding.get("source").and_then(Value::as_str).unwrap_or(""),
                "tag": finding.get("tag").and_then(Value::as_str).unwrap_or(""),
            }),
            tags: vec![
                "amass".to_string(),
                if is_subdomain { "subdomain" } else { "root-domain" }.to_string(),
            ],
            ..ParsedAsset::new(AssetType::Domain, name)
        });
    }

    let addresses = finding
        .get("addresses")
        .and_then(Value::as_array)
        .cloned()
        .unwrap_or_default();
    for addr in &addresses {
        let ip = addr.get("ip").and_then(Value::as_str).unwrap_or("");
        if !ip.is_empty() && seen_ips.insert(ip.to_string()) {
            result.assets.push(ParsedAsset {
                metadata: json!({
                    "cidr": addr.get("cidr").and_then(Value::as_str).unwrap_or(""),
                    "asn": addr.get("asn").and_then(Value::as_i64).unwrap_or(0),
                    "desc": addr.get("desc").and_then(Value::as_str).unwrap_or(""),
                    "associated_domain": name,
                }),
                tags: vec!["amass".to_string(), "discovered-ip".to_string()],
                ..ParsedAsset::new(AssetType::Host, ip)
            });
        }
    }
}
