//! Nuclei JSONL output parser.

use std::collections::HashSet;

use serde_json::{json, Value};

use scanforge_core::model::{AssetType, Job, Severity};

use crate::output::{ParseOutput, ParsedAsset, ParsedVulnerability};
use crate::util::{host_of_url, is_ipv4, truncate_body};
use crate::Parser;

pub struct NucleiParser;

impl Parser for NucleiParser {
    fn tool_name(&self) -> &'static str {
        "nuclei"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();
        let mut seen_hosts = HashSet::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(finding) => process_finding(&finding, &mut result, &mut seen_hosts),
                Err(e) => {
                    // Status banners and progress lines land here; keep going.
                    result.errors.push(format!("JSON parse error: {e}"));
                }
            }
        }

        tracing::debug!(
            assets = result.assets.len(),
            vulnerabilities = result.vulnerabilities.len(),
            "nuclei parsing complete"
        );
        result
    }
}

fn str_or_list(value: &Value) -> Vec<String> {
    match value {
        Value::String(s) if !s.is_empty() => vec![s.clone()],
        Value::Array(items) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

fn process_finding(finding: &Value, result: &mut ParseOutput, seen_hosts: &mut HashSet<String>) {
    let template_id = finding
        .get("template-id")
        .or_else(|| finding.get("templateID"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let info = finding.get("info").cloned().unwrap_or_else(|| json!({}));

    let host = finding
        .get("host")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    let matched_at = finding
        .get("matched-at")
        .or_else(|| finding.get("matched"))
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if matched_at.is_empty() && host.is_empty() {
        return;
    }

    if !host.is_empty() && seen_hosts.insert(host.clone()) {
        create_url_assets(&host, result);
    }

    let severity = info
        .get("severity")
        .and_then(Value::as_str)
        .map(Severity::parse_lenient)
        .unwrap_or(Severity::Info);

    let name = info
        .get("name")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .unwrap_or(&template_id)
        .to_string();
    let description = info
        .get("description")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let references = info
        .get("reference")
        .map(str_or_list)
        .unwrap_or_default();

    let classification = info
        .get("classification")
        .cloned()
        .unwrap_or_else(|| json!({}));
    let cve_ids = classification
        .get("cve-id")
        .map(str_or_list)
        .unwrap_or_default();
    let cwe_ids = classification
        .get("cwe-id")
        .map(str_or_list)
        .unwrap_or_default();
    let cvss_vector = classification
        .get("cvss-metrics")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);
    let cvss_score = match classification.get("cvss-score") {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.parse().ok(),
        _ => None,
    };

    let tags = match info.get("tags") {
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    };

    let request = finding
        .get("request")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(truncate_body);
    let response = finding
        .get("response")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(truncate_body);

    // Extracted matcher results become the evidence
    let mut evidence = match finding.get("extracted-results") {
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(Value::String(s)) => s.clone(),
        _ => String::new(),
    };
    let matcher_name = finding
        .get("matcher-name")
        .and_then(Value::as_str)
        .unwrap_or("");
    if !matcher_name.is_empty() {
        evidence = format!("Matcher: {matcher_name}\n{evidence}")
            .trim()
            .to_string();
    }

    let remediation = info
        .get("remediation")
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
        .map(str::to_string);

    let mut all_tags = vec!["nuclei".to_string()];
    all_tags.extend(tags);

    result.vulnerabilities.push(ParsedVulnerability {
        description,
        cvss_score,
        cvss_vector,
        cve_ids,
        cwe_ids,
        evidence: (!evidence.is_empty()).then_some(evidence),
        remediation,
        references,
        template_id: (!template_id.is_empty()).then(|| template_id.clone()),
        request,
        response,
        tags: all_tags,
        metadata: json!({
            "template_id": template_id,
            "matched_at": matched_at,
            "host": host.clone(),
            "type": finding.get("type").and_then(Value::as_str).unwrap_or(""),
            "matcher_name": matcher_name,
        }),
        asset_value: (!host.is_empty()).then(|| host.clone()),
        asset_type: Some(AssetType::Url),
        ..ParsedVulnerability::new(name, severity)
    });
}

fn create_url_assets(url: &str, result: &mut ParseOutput) {
    let Ok(parsed) = url::Url::parse(url) else {
        tracing::warn!(url, "failed to parse target URL");
        return;
    };

    result.assets.push(ParsedAsset {
        metadata: json!({
            "scheme": parsed.scheme(),
            "netloc": parsed.host_str().unwrap_or(""),
            "path": parsed.path(),
        }),
        tags: vec!["nuclei".to_string()],
        ..ParsedAsset::new(AssetType::Url, url)
    });

    if let Some(host) = host_of_url(url) {
        if !host.is_empty() && !is_ipv4(&host) {
            result.assets.push(ParsedAsset {
                metadata: json!({"source_url": url}),
                tags: vec!["nuclei".to_string()],
                ..ParsedAsset::new(AssetType::Domain, host)
            });
        }
    }
}
