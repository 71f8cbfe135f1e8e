//! Subfinder JSONL output parser.
//!
//! Accepts both the JSON line format and plain-text one-subdomain-per-line
//! output.

use std::collections::HashSet;

use serde_json::{json, Value};

use scanforge_core::model::{AssetType, Job, ResultType};

use crate::output::{ParseOutput, ParsedAsset, ParsedFinding};
use crate::Parser;

pub struct SubfinderParser;

impl Parser for SubfinderParser {
    fn tool_name(&self) -> &'static str {
        "subfinder"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();
        let mut seen = HashSet::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            match serde_json::from_str::<Value>(line) {
                Ok(data) => process_record(&data, &mut result, &mut seen),
                Err(e) => {
                    // Plain-text mode prints bare subdomains
                    if line.contains('.') && !line.starts_with('{') {
                        add_subdomain(line, "", &mut result, &mut seen);
                    } else {
                        result.errors.push(format!("JSON parse error: {e}"));
                    }
                }
            }
        }

        tracing::debug!(subdomains = result.assets.len(), "subfinder parsing complete");
        result
    }
}

fn process_record(data: &Value, result: &mut ParseOutput, seen: &mut HashSet<String>) {
    let subdomain = data
        .get("host")
        .or_else(|| data.get("subdomain"))
        .or_else(|| data.get("domain"))
        .and_then(Value::as_str)
        .unwrap_or("");

    let source = match data.get("source").or_else(|| data.get("sources")) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(Value::as_str)
            .collect::<Vec<_>>()
            .join(","),
        _ => String::new(),
    };

    if !subdomain.is_empty() {
        add_subdomain(subdomain, &source, result, seen);
    }
}

fn add_subdomain(subdomain: &str, source: &str, result: &mut ParseOutput, seen: &mut HashSet<String>) {
    let subdomain = subdomain.trim().to_lowercase();
    if subdomain.is_empty() || !seen.insert(subdomain.clone()) {
        return;
    }

    let metadata = if source.is_empty() {
        json!({})
    } else {
        json!({"source": source})
    };

    result.assets.push(ParsedAsset {
        metadata,
        tags: vec!["subfinder".to_string()],
        ..ParsedAsset::new(AssetType::Subdomain, &subdomain)
    });

    result.results.push(ParsedFinding::new(
        ResultType::Subdomain,
        json!({"subdomain": subdomain, "source": source}),
    ));
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "subfinder", json!({}))
    }

    #[test]
    fn test_jsonl_records() {
        let output = concat!(
            r#"{"host":"api.example.com","source":"crtsh"}"#,
            "\n",
            r#"{"host":"www.example.com","sources":["dnsdumpster","virustotal"]}"#,
        );
        let out = SubfinderParser.parse(output, &job());
        assert_eq!(out.assets.len(), 2);
        assert_eq!(out.assets[0].value, "api.example.com");
        assert_eq!(out.assets[1].metadata["source"], "dnsdumpster,virustotal");
    }

    #[test]
    fn test_plain_text_fallback() {
        let output = "mail.example.com\nvpn.example.com\n";
        let out = SubfinderParser.parse(output, &job());
        assert_eq!(out.assets.len(), 2);
        assert!(out.errors.is_empty());
    }

    #[test]
    fn test_dedup_is_case_insensitive() {
        let output = "API.example.com\napi.example.com\n";
        let out = SubfinderParser.parse(output, &job());
        assert_eq!(out.assets.len(), 1);
        assert_eq!(out.assets[0].value, "api.example.com");
    }

    #[test]
    fn test_garbage_line_records_error() {
        let output = "not json and not a domain\napi.example.com\n";
        let out = SubfinderParser.parse(output, &job());
        assert_eq!(out.assets.len(), 1);
        assert_eq!(out.errors.len(), 1);
    }
}
