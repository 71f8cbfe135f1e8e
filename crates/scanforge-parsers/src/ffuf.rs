//! FFUF whole-document JSON output parser.

use std::collections::HashSet;

use serde_json::{json, Value};

use scanforge_core::model::{AssetType, Job, ResultType};

use crate::output::{ParseOutput, ParsedAsset, ParsedFinding};
use crate::Parser;

pub struct FfufParser;

impl Parser for FfufParser {
    fn tool_name(&self) -> &'static str {
        "ffuf"
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

        let base_url = data
            .pointer("/config/url")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        let items = data
            .get("results")
            .and_then(Value::as_array)
            .cloned()
            .unwrap_or_default();
        let mut seen_urls = HashSet::new();
        for item in &items {
            process_item(item, &base_url, &mut result, &mut seen_urls);
        }

        tracing::debug!(
            assets = result.assets.len(),
            results = result.results.len(),
            "ffuf parsing complete"
        );
        result
    }
}

fn process_item(
    item: &Value,
    base_url: &str,
    result: &mut ParseOutput,
    seen_urls: &mut HashSet<String>,
) {
    let fuzz_word = item
        .pointer("/input/FUZZ")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let status = item.get("status").and_then(Value::as_u64).unwrap_or(0);
    let length = item.get("length").and_then(Value::as_u64).unwrap_or(0);
    let words = item.get("words").and_then(Value::as_u64).unwrap_or(0);
    let lines = item.get("lines").and_then(Value::as_u64).unwrap_or(0);
    let content_type = item
        .get("content-type")
        .and_then(Value::as_str)
        .unwrap_or("");
    let redirect = item
        .get("redirectlocation")
        .and_then(Value::as_str)
        .unwrap_or("");

    let mut url = item
        .get("url")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();
    if url.is_empty() {
        url = if base_url.is_empty() {
            fuzz_word.clone()
        } else {
            base_url.replace("FUZZ", &fuzz_word)
        };
    }
    if url.is_empty() || !seen_urls.insert(url.clone()) {
        return;
    }

    let is_file =
        fuzz_word.contains('.') || url.rsplit('/').next().is_some_and(|last| last.contains('.'));
    let result_type = if is_file {
        ResultType::File
    } else {
        ResultType::Directory
    };

    let mut metadata = json!({
        "fuzz_word": fuzz_word.clone(),
        "status_code": status,
        "length": length,
        "words": words,
        "lines": lines,
        "content_type": content_type,
    });
    if !redirect.is_empty() {
        metadata["redirect"] = json!(redirect);
    }

    result.assets.push(ParsedAsset {
        metadata,
        tags: vec!["ffuf".to_string(), format!("status-{status}")],
        ..ParsedAsset::new(AssetType::Endpoint, &url)
    });

    result.results.push(ParsedFinding {
        asset_value: Some(url.clone()),
        asset_type: Some(AssetType::Endpoint),
        ..ParsedFinding::new(
            result_type,
            json!({
                "url": url,
                "fuzz_word": fuzz_word,
                "status_code": status,
                "length": length,
                "words": words,
                "lines": lines,
                "content_type": content_type,
                "redirect": redirect,
            }),
        )
    });
}
