//! WPScan JSON output parser.
//!
//! WPScan wraps its JSON in banner noise, so the document is located by
//! brace scanning before parsing. Severity is estimated from the
//! vulnerability title/type since WPScan supplies none.

use serde_json::{json, Map, Value};

use scanforge_core::model::{AssetType, CredentialType, Job, Severity};

use crate::output::{ParseOutput, ParsedAsset, ParsedCredential, ParsedVulnerability};
use crate::Parser;

const TYPE_SEVERITY: &[(&str, Severity)] = &[
    ("rce", Severity::Critical),
    ("sqli", Severity::Critical),
    ("sql injection", Severity::Critical),
    ("file upload", Severity::Critical),
    ("rfi", Severity::Critical),
    ("arbitrary file", Severity::High),
    ("lfi", Severity::High),
    ("ssrf", Severity::High),
    ("xss", Severity::Medium),
    ("csrf", Severity::Medium),
    ("idor", Severity::Medium),
    ("information disclosure", Severity::Low),
];

fn estimate_severity(title: &str, vuln_type: &str) -> Severity {
    let title_lower = title.to_lowercase();
    let type_lower = vuln_type.to_lowercase();
    for (keyword, severity) in TYPE_SEVERITY {
        if title_lower.contains(keyword) || type_lower.contains(keyword) {
            return *severity;
        }
    }
    Severity::Medium
}

pub struct WpscanParser;

impl Parser for WpscanParser {
    fn tool_name(&self) -> &'static str {
        "wpscan"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();

        let json_start = output.find('{');
        let json_end = output.rfind('}').map(|i| i + 1);
        let doc = match (json_start, json_end) {
            (Some(start), Some(end)) if end > start => &output[start..end],
            _ => {
                result
                    .errors
                    .push("No valid JSON found in output".to_string());
                return result;
            }
        };

        let data: Value = match serde_json::from_str(doc) {
            Ok(data) => data,
            Err(e) => {
                result.errors.push(format!("JSON parse error: {e}"));
                return result;
            }
        };

        process_scan_data(&data, &mut result);

        tracing::debug!(
            assets = result.assets.len(),
            vulnerabilities = result.vulnerabilities.len(),
            "wpscan parsing complete"
        );
        result
    }
}

fn process_scan_data(data: &Value, result: &mut ParseOutput) {
    let target_url = data
        .get("target_url")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    if !target_url.is_empty() {
        let mut metadata = Map::new();
        metadata.insert("wordpress".to_string(), json!(true));
        if let Ok(parsed) = url::Url::parse(&target_url) {
            metadata.insert("scheme".to_string(), json!(parsed.scheme()));
            metadata.insert(
                "netloc".to_string(),
                json!(parsed.host_str().unwrap_or("")),
            );
        }
        if let Some(version) = data.pointer("/version/number").and_then(Value::as_str) {
            metadata.insert("wordpress_version".to_string(), json!(version));
            if let Some(status) = data.pointer("/version/status").and_then(Value::as_str) {
                metadata.insert("version_status".to_string(), json!(status));
            }
        }

        result.assets.push(ParsedAsset {
            metadata: Value::Object(metadata),
            tags: vec!["wpscan".to_string(), "wordpress".to_string()],
            ..ParsedAsset::new(AssetType::Url, &target_url)
        });
    }

    // Core version vulnerabilities
    if let Some(vulns) = data
        .pointer("/version/vulnerabilities")
        .and_then(Value::as_array)
    {
        for vuln in vulns {
            add_vulnerability(vuln, result, &target_url, "WordPress Core");
        }
    }

    if let Some(main_theme) = data.get("main_theme").filter(|v| v.is_object()) {
        process_component(main_theme, result, &target_url, "theme", None);
    }
    if let Some(plugins) = data.get("plugins").and_then(Value::as_object) {
        for (name, plugin) in plugins {
            process_component(plugin, result, &target_url, "plugin", Some(name));
        }
    }
    if let Some(themes) = data.get("themes").and_then(Value::as_object) {
        for (name, theme) in themes {
            process_component(theme, result, &target_url, "theme", Some(name));
        }
    }

    // Enumerated users
    if let Some(users) = data.get("users").and_then(Value::as_object) {
        for (username, user_data) in users {
            result.credentials.push(ParsedCredential {
                username: Some(username.clone()),
                service: Some("wordpress".to_string()),
                url: (!target_url.is_empty()).then(|| target_url.clone()),
                credential_type: CredentialType::Username,
                metadata: json!({
                    "id": user_data.get("id"),
                    "slug": user_data.get("slug"),
                    "confidence": user_data.get("confidence").and_then(Value::as_u64).unwrap_or(0),
                }),
                asset_value: (!target_url.is_empty()).then(|| target_url.clone()),
                asset_type: Some(AssetType::Url),
                ..Default::default()
            });
        }
    }

    // Successful brute-force hits
    if let Some(attack) = data.get("password_attack").and_then(Value::as_object) {
        for (username, password) in attack {
            result.credentials.push(ParsedCredential {
                username: Some(username.clone()),
                password: password.as_str().map(str::to_string),
                service: Some("wordpress".to_string()),
                url: (!target_url.is_empty()).then(|| target_url.clone()),
                credential_type: CredentialType::Password,
                metadata: json!({"source": "wpscan-bruteforce"}),
                asset_value: (!target_url.is_empty()).then(|| target_url.clone()),
                asset_type: Some(AssetType::Url),
                ..Default::default()
            });
        }
    }
}

fn process_component(
    component: &Value,
    result: &mut ParseOutput,
    target_url: &str,
    component_type: &str,
    name: Option<&str>,
) {
    let slug = component
        .get("slug")
        .and_then(Value::as_str)
        .or(name)
        .unwrap_or("unknown");

    if let Some(vulns) = component.get("vulnerabilities").and_then(Value::as_array) {
        let component_label = format!(
            "{}{}: {slug}",
            component_type[..1].to_uppercase(),
            &component_type[1..]
        );
        for vuln in vulns {
            add_vulnerability(vuln, result, target_url, &component_label);
        }
    }
}

fn add_vulnerability(vuln: &Value, result: &mut ParseOutput, target_url: &str, component: &str) {
    let title = vuln
        .get("title")
        .and_then(Value::as_str)
        .unwrap_or("Unknown Vulnerability")
        .to_string();
    let vuln_type = vuln
        .get("vuln_type")
        .and_then(Value::as_str)
        .unwrap_or("")
        .to_string();

    let refs = vuln
        .get("references")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let mut references = Vec::new();
    for ref_list in refs.values() {
        match ref_list {
            Value::Array(items) => references.extend(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(str::to_string)),
            ),
            Value::String(s) => references.push(s.clone()),
            _ => {}
        }
    }

    let cve_ids: Vec<String> = match refs.get("cve") {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::String(s)) => vec![s.clone()],
        _ => Vec::new(),
    }
    .into_iter()
    .map(|cve| {
        if cve.to_uppercase().starts_with("CVE-") {
            cve
        } else {
            format!("CVE-{cve}")
        }
    })
    .collect();

    let cvss_score = vuln.pointer("/cvss/score").and_then(|v| match v {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.parse().ok(),
        _ => None,
    });
    let cvss_vector = vuln
        .pointer("/cvss/vector")
        .and_then(Value::as_str)
        .map(str::to_string);

    let template_id = match vuln.pointer("/wpvulndb/id") {
        Some(Value::String(s)) => Some(s.clone()),
        Some(Value::Number(n)) => Some(n.to_string()),
        _ => None,
    };

    let mut tags = vec!["wpscan".to_string(), "wordpress".to_string()];
    if !vuln_type.is_empty() {
        tags.push(vuln_type.clone());
    }

    result.vulnerabilities.push(ParsedVulnerability {
        description: Some(format!(
            "WordPress vulnerability in {component}: {title}"
        )),
        cvss_score,
        cvss_vector,
        cve_ids,
        references,
        template_id,
        tags,
        metadata: json!({
            "component": component,
            "vuln_type": vuln_type.clone(),
            "fixed_in": vuln.get("fixed_in").and_then(Value::as_str).unwrap_or(""),
        }),
        asset_value: (!target_url.is_empty()).then(|| target_url.to_string()),
        asset_type: Some(AssetType::Url),
        ..ParsedVulnerability::new(title.clone(), estimate_severity(&title, &vuln_type))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "wpscan", json!({}))
    }

    #[test]
    fn test_full_scan_document() {
        let output = r#"
_______________________________________________________________
WPScan v3.8
_______________________________________________________________
{
  "target_url": "https://blog.example/",
  "version": {
    "number": "5.8",
    "status": "insecure",
    "vulnerabilities": [
      {"title": "WordPress Core SQL Injection", "vuln_type": "SQLI",
       "references": {"cve": ["2022-21661"], "url": ["https://wpscan.com/v/1"]},
       "fixed_in": "5.8.3"}
    ]
  },
  "plugins": {
    "contact-form-7": {
      "slug": "contact-form-7",
      "vulnerabilities": [
        {"title": "Contact Form 7 Unrestricted File Upload", "vuln_type": "UPLOAD",
         "references": {"cve": "2020-35489"}}
      ]
    }
  },
  "users": {
    "admin": {"id": 1, "slug": "admin", "confidence": 100}
  },
  "password_attack": {"admin": "letmein"}
}"#;

        let out = WpscanParser.parse(output, &job());
        assert!(out.errors.is_empty());

        let url_asset = &out.assets[0];
        assert_eq!(url_asset.value, "https://blog.example/");
        assert_eq!(url_asset.metadata["wordpress_version"], "5.8");

        assert_eq!(out.vulnerabilities.len(), 2);
        let sqli = out
            .vulnerabilities
            .iter()
            .find(|v| v.title.contains("SQL"))
            .unwrap();
        assert_eq!(sqli.severity, Severity::Critical);
        assert_eq!(sqli.cve_ids, vec!["CVE-2022-21661"]);

        let upload = out
            .vulnerabilities
            .iter()
            .find(|v| v.title.contains("Upload"))
            .unwrap();
        assert_eq!(upload.severity, Severity::Critical);
        assert_eq!(upload.metadata["component"], "Plugin: contact-form-7");

        // Username enumeration + brute-forced password
        assert_eq!(out.credentials.len(), 2);
        assert!(out
            .credentials
            .iter()
            .any(|c| c.credential_type == CredentialType::Username));
        let brute = out
            .credentials
            .iter()
            .find(|c| c.credential_type == CredentialType::Password)
            .unwrap();
        assert_eq!(brute.password.as_deref(), Some("letmein"));
    }

    #[test]
    fn test_no_json_in_output() {
        let out = WpscanParser.parse("Scan Aborted: target is not WordPress", &job());
        assert!(!out.errors.is_empty());
        assert!(out.assets.is_empty());
    }

    #[test]
    fn test_default_severity_is_medium() {
        let output = r#"{"target_url": "https://x.example/", "version": {"number": "6.0",
            "vulnerabilities": [{"title": "Some Odd Bug", "vuln_type": ""}]}}"#;
        let out = WpscanParser.parse(output, &job());
        assert_eq!(out.vulnerabilities[0].severity, Severity::Medium);
    }
}
