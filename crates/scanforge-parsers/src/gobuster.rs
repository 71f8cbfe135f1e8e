//! Gobuster text output parser.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use scanforge_core::model::{AssetType, Job, ResultType};

use crate::output::{ParseOutput, ParsedAsset, ParsedFinding};
use crate::Parser;

/// Result line, e.g. `/admin                (Status: 200) [Size: 1234]`
/// optionally followed by `[--> /admin/]` for redirects.
fn line_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(/\S*)\s+\(Status:\s*(\d+)\)\s*\[Size:\s*(\d+)\](?:\s*\[--> ([^\]]+)\])?")
            .unwrap()
    })
}

pub struct GobusterParser;

impl Parser for GobusterParser {
    fn tool_name(&self) -> &'static str {
        "gobuster"
    }

    fn parse(&self, output: &str, job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();
        let mut seen_paths = HashSet::new();

        let base_url = job
            .parameters
            .get("url")
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(caps) = line_regex().captures(line) {
                let path = caps[1].to_string();
                if !seen_paths.insert(path.clone()) {
                    continue;
                }
                let status: u32 = caps[2].parse().unwrap_or(0);
                let size: u64 = caps[3].parse().unwrap_or(0);
                let redirect = caps.get(4).map(|m| m.as_str().to_string());
                add_discovery(&path, status, size, redirect, &base_url, &mut result);
            }
        }

        tracing::debug!(
            assets = result.assets.len(),
            results = result.results.len(),
            "gobuster parsing complete"
        );
        result
    }
}

fn add_discovery(
    path: &str,
    status: u32,
    size: u64,
    redirect: Option<String>,
    base_url: &str,
    result: &mut ParseOutput,
) {
    let is_file = path.rsplit('/').next().is_some_and(|last| last.contains('.'));
    let result_type = if is_file {
        ResultType::File
    } else {
        ResultType::Directory
    };

    let full_url = if base_url.is_empty() {
        path.to_string()
    } else {
        format!("{}{}", base_url.trim_end_matches('/'), path)
    };

    let mut metadata = json!({
        "path": path,
        "status_code": status,
        "size": size,
    });
    if let Some(r) = &redirect {
        metadata["redirect"] = json!(r);
    }

    result.assets.push(ParsedAsset {
        metadata,
        tags: vec!["gobuster".to_string(), format!("status-{status}")],
        ..ParsedAsset::new(AssetType::Endpoint, &full_url)
    });

    result.results.push(ParsedFinding {
        asset_value: Some(if base_url.is_empty() {
            path.to_string()
        } else {
            base_url.to_string()
        }),
        asset_type: (!base_url.is_empty()).then_some(AssetType::Url),
        ..ParsedFinding::new(
            result_type,
            json!({
                "path": path,
                "full_url": full_url,
                "status_code": status,
                "size": size,
                "redirect": redirect,
            }),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job_with_url() -> Job {
        Job::new(
            Uuid::now_v7(),
            "gobuster",
            json!({"url": "http://target.example"}),
        )
    }

    #[test]
    fn test_directories_and_files() {
        let output = "\
/admin                (Status: 200) [Size: 1234]
/images               (Status: 301) [Size: 456] [--> /images/]
/robots.txt           (Status: 200) [Size: 78]
Progress: 4000 / 20469 (19.54%)";

        let out = GobusterParser.parse(output, &job_with_url());
        assert_eq!(out.assets.len(), 3);
        assert_eq!(out.assets[0].value, "http://target.example/admin");

        let dirs = out
            .results
            .iter()
            .filter(|r| r.result_type == ResultType::Directory)
            .count();
        let files = out
            .results
            .iter()
            .filter(|r| r.result_type == ResultType::File)
            .count();
        assert_eq!(dirs, 2);
        assert_eq!(files, 1);

        let redirect = out
            .results
            .iter()
            .find(|r| r.parsed_data["path"] == "/images")
            .unwrap();
        assert_eq!(redirect.parsed_data["redirect"], "/images/");
    }

    #[test]
    fn test_without_base_url() {
        let job = Job::new(Uuid::now_v7(), "gobuster", json!({}));
        let out = GobusterParser.parse("/admin (Status: 200) [Size: 1]", &job);
        assert_eq!(out.assets[0].value, "/admin");
        assert!(out.results[0].asset_type.is_none());
    }

    #[test]
    fn test_duplicate_paths_skipped() {
        let output = "/admin (Status: 200) [Size: 1]\n/admin (Status: 200) [Size: 1]";
        let out = GobusterParser.parse(output, &job_with_url());
        assert_eq!(out.assets.len(), 1);
    }
}
