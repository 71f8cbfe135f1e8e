//! HTTPx JSONL output parser.

use std::collections::HashSet;

use serde_json::{json, Map, Value};

use scanforge_core::model::{AssetType, Job, ResultType};

use crate::output::{ParseOutput, ParsedAsset, ParsedFinding};
use crate::util::{host_of_url, is_ipv4};
use crate::Parser;

pub struct HttpxParser;

impl Parser for HttpxParser {
    fn tool_name(&self) -> &'static str {
        "httpx"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();
        let mut seen_urls = HashSet::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            match serde_json::from_str::<Value>(line) {
                Ok(data) => process_probe(&data, &mut result, &mut seen_urls),
                Err(e) => result.errors.push(format!("JSON parse error: {e}")),
            }
        }

        tracing::debug!(
            assets = result.assets.len(),
            results = result.results.len(),
            "httpx parsing complete"
        );
        result
    }
}

/// httpx field names drifted between releases; accept both spellings.
fn field<'a>(data: &'a Value, a: &str, b: &str) -> Option<&'a Value> {
    data.get(a).or_else(|| data.get(b))
}

fn process_probe(data: &Value, result: &mut ParseOutput, seen_urls: &mut HashSet<String>) {
    let url = field(data, "url", "input")
        .and_then(Value::as_str)
        .unwrap_or("");
    if url.is_empty() || !seen_urls.insert(url.to_string()) {
        return;
    }

    let status_code = field(data, "status_code", "status-code").cloned();
    let title = data.get("title").and_then(Value::as_str).unwrap_or("");
    let content_length = field(data, "content_length", "content-length").cloned();
    let content_type = field(data, "content_type", "content-type")
        .and_then(Value::as_str)
        .unwrap_or("");
    let web_server = field(data, "webserver", "server")
        .and_then(Value::as_str)
        .unwrap_or("");
    let final_url = field(data, "final_url", "final-url")
        .and_then(Value::as_str)
        .unwrap_or(url);

    let technologies: Vec<String> = match field(data, "tech", "technologies") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => s
            .split(',')
            .map(str::trim)
            .filter(|t| !t.is_empty())
            .map(str::to_string)
            .collect(),
        _ => Vec::new(),
    };

    let mut metadata = Map::new();
    for (key, value) in [
        ("status_code", status_code.clone()),
        ("content_length", content_length.clone()),
    ] {
        if let Some(v) = value.filter(|v| !v.is_null()) {
            metadata.insert(key.to_string(), v);
        }
    }
    if !title.is_empty() {
        metadata.insert("title".to_string(), json!(title));
    }
    if !content_type.is_empty() {
        metadata.insert("content_type".to_string(), json!(content_type));
    }
    if !web_server.is_empty() {
        metadata.insert("web_server".to_string(), json!(web_server));
    }
    if !technologies.is_empty() {
        metadata.insert("technologies".to_string(), json!(technologies.clone()));
    }

    let mut tags = vec!["httpx".to_string()];
    tags.extend(technologies.iter().take(5).cloned());

    result.assets.push(ParsedAsset {
        metadata: Value::Object(metadata),
        tags,
        ..ParsedAsset::new(AssetType::Url, url)
    });

    result.results.push(ParsedFinding {
        asset_value: Some(url.to_string()),
        asset_type: Some(AssetType::Url),
        ..ParsedFinding::new(
            ResultType::Endpoint,
            json!({
                "url": url,
                "final_url": final_url,
                "status_code": status_code,
                "title": title,
                "content_type": content_type,
                "content_length": content_length,
                "web_server": web_server,
            }),
        )
    });

    for tech in &technologies {
        result.assets.push(ParsedAsset {
            metadata: json!({"source_url": url}),
            tags: vec!["httpx".to_string()],
            ..ParsedAsset::new(AssetType::Technology, tech)
        });
        result.results.push(ParsedFinding {
            asset_value: Some(url.to_string()),
            asset_type: Some(AssetType::Url),
            ..ParsedFinding::new(
                ResultType::Technology,
                json!({"name": tech, "url": url}),
            )
        });
    }

    if let Some(host) = host_of_url(url) {
        if !host.is_empty() && !is_ipv4(&host) {
            result.assets.push(ParsedAsset {
                metadata: json!({"source_url": url}),
                tags: vec!["httpx".to_string()],
                ..ParsedAsset::new(AssetType::Domain, host)
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "httpx", json!({}))
    }

    #[test]
    fn test_probe_with_technologies() {
        let output = r#"{"url":"https://example.com","status_code":200,"title":"Example","webserver":"nginx","tech":["Nginx","PHP"],"content_length":1256}"#;
        let out = HttpxParser.parse(output, &job());

        let url_asset = out
            .assets
            .iter()
            .find(|a| a.asset_type == AssetType::Url)
            .unwrap();
        assert_eq!(url_asset.value, "https://example.com");
        assert_eq!(url_asset.metadata["status_code"], 200);
        assert!(url_asset.tags.contains(&"Nginx".to_string()));

        let techs: Vec<&str> = out
            .assets
            .iter()
            .filter(|a| a.asset_type == AssetType::Technology)
            .map(|a| a.value.as_str())
            .collect();
        assert_eq!(techs, vec!["Nginx", "PHP"]);

        assert!(out
            .results
            .iter()
            .any(|r| r.result_type == ResultType::Endpoint));
        assert_eq!(
            out.results
                .iter()
                .filter(|r| r.result_type == ResultType::Technology)
                .count(),
            2
        );

        assert!(out
            .assets
            .iter()
            .any(|a| a.asset_type == AssetType::Domain && a.value == "example.com"));
    }

    #[test]
    fn test_kebab_case_field_names() {
        let output = r#"{"url":"http://a.example","status-code":301,"content-type":"text/html"}"#;
        let out = HttpxParser.parse(output, &job());
        let asset = &out.assets[0];
        assert_eq!(asset.metadata["status_code"], 301);
        assert_eq!(asset.metadata["content_type"], "text/html");
    }

    #[test]
    fn test_mixed_valid_and_invalid_lines() {
        let output = "launching probes...\n{\"url\":\"http://a.example\"}\nnot-json\n";
        let out = HttpxParser.parse(output, &job());
        assert_eq!(
            out.assets
                .iter()
                .filter(|a| a.asset_type == AssetType::Url)
                .count(),
            1
        );
        assert_eq!(out.errors.len(), 2);
    }

    #[test]
    fn test_duplicate_urls_skipped() {
        let output = "{\"url\":\"http://a.example\"}\n{\"url\":\"http://a.example\"}";
        let out = HttpxParser.parse(output, &job());
        assert_eq!(
            out.assets
                .iter()
                .filter(|a| a.asset_type == AssetType::Url)
                .count(),
            1
        );
    }
}
