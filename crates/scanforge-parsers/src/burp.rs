//! Burp Suite XML export parser (scanner issues and HTTP history items).

use std::collections::HashSet;
use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use regex::Regex;
use serde::Deserialize;
use serde_json::json;

use scanforge_core::model::{AssetType, Job, Severity};

use crate::output::{ParseOutput, ParsedAsset, ParsedVulnerability};
use crate::util::{strip_bom, strip_html, truncate_body};
use crate::Parser;

fn href_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r#"href=["']([^"']+)["']"#).unwrap())
}

// =============================================================================
// XML shape
// =============================================================================

#[derive(Debug, Deserialize)]
struct BurpExport {
    #[serde(default, rename = "issue")]
    issues: Vec<IssueElem>,
    #[serde(default, rename = "item")]
    items: Vec<ItemElem>,
}

#[derive(Debug, Deserialize)]
struct IssueElem {
    name: Option<String>,
    host: Option<HostElem>,
    path: Option<String>,
    location: Option<String>,
    severity: Option<String>,
    confidence: Option<String>,
    #[serde(rename = "type")]
    issue_type: Option<String>,
    #[serde(rename = "issueBackground")]
    issue_background: Option<String>,
    #[serde(rename = "issueDetail")]
    issue_detail: Option<String>,
    #[serde(rename = "remediationBackground")]
    remediation_background: Option<String>,
    #[serde(rename = "remediationDetail")]
    remediation_detail: Option<String>,
    references: Option<String>,
    #[serde(rename = "requestresponse")]
    request_response: Option<RequestResponseElem>,
}

#[derive(Debug, Deserialize)]
struct HostElem {
    #[serde(default, rename = "@ip")]
    ip: Option<String>,
    #[serde(default, rename = "$text")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct RequestResponseElem {
    request: Option<EncodedBodyElem>,
    response: Option<EncodedBodyElem>,
}

#[derive(Debug, Deserialize)]
struct EncodedBodyElem {
    #[serde(default, rename = "@base64")]
    base64: Option<String>,
    #[serde(default, rename = "$text")]
    text: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ItemElem {
    host: Option<HostElem>,
    port: Option<String>,
    protocol: Option<String>,
    path: Option<String>,
    method: Option<String>,
    status: Option<String>,
    mimetype: Option<String>,
}

// =============================================================================
// Parser
// =============================================================================

pub struct BurpParser;

impl Parser for BurpParser {
    fn tool_name(&self) -> &'static str {
        "burp"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();

        let export: BurpExport = match quick_xml::de::from_str(strip_bom(output)) {
            Ok(export) => export,
            Err(e) => {
                result.errors.push(format!("XML parse error: {e}"));
                return result;
            }
        };

        let mut seen_urls = HashSet::new();
        for issue in &export.issues {
            process_issue(issue, &mut result, &mut seen_urls);
        }
        for item in &export.items {
            process_item(item, &mut result, &mut seen_urls);
        }

        tracing::debug!(
            assets = result.assets.len(),
            vulnerabilities = result.vulnerabilities.len(),
            "burp parsing complete"
        );
        result
    }
}

fn map_severity(severity: &str) -> Severity {
    match severity.to_lowercase().as_str() {
        "low" => Severity::Low,
        "medium" => Severity::Medium,
        "high" => Severity::High,
        "critical" => Severity::Critical,
        _ => Severity::Info,
    }
}

fn decode_body(body: &EncodedBodyElem) -> Option<String> {
    let text = body.text.as_deref()?;
    if body.base64.as_deref() == Some("true") {
        match BASE64.decode(text.trim()) {
            Ok(bytes) => Some(String::from_utf8_lossy(&bytes).into_owned()),
            Err(_) => Some(text.to_string()),
        }
    } else {
        Some(text.to_string())
    }
}

fn process_issue(issue: &IssueElem, result: &mut ParseOutput, seen_urls: &mut HashSet<String>) {
    let name = issue.name.as_deref().unwrap_or("");
    let host = issue
        .host
        .as_ref()
        .and_then(|h| h.text.as_deref())
        .unwrap_or("");
    let path = issue.path.as_deref().unwrap_or("");
    if name.is_empty() || host.is_empty() {
        return;
    }

    // Burp's <host> text already carries the scheme://authority form
    let url = if host.starts_with("http") {
        format!("{host}{path}")
    } else {
        format!("http://{host}{path}")
    };

    if seen_urls.insert(url.clone()) {
        result.assets.push(ParsedAsset {
            metadata: json!({
                "host": host,
                "path": path,
                "ip": issue.host.as_ref().and_then(|h| h.ip.as_deref()).unwrap_or(""),
            }),
            tags: vec!["burp".to_string(), "imported".to_string()],
            ..ParsedAsset::new(AssetType::Url, &url)
        });
    }

    let mut description = String::new();
    if let Some(background) = issue.issue_background.as_deref() {
        description = strip_html(background);
    }
    if let Some(detail) = issue.issue_detail.as_deref() {
        if !description.is_empty() {
            description.push_str("\n\nDetails:\n");
        }
        description.push_str(&strip_html(detail));
    }

    let mut remediation = String::new();
    if let Some(background) = issue.remediation_background.as_deref() {
        remediation = strip_html(background);
    }
    if let Some(detail) = issue.remediation_detail.as_deref() {
        if !remediation.is_empty() {
            remediation.push_str("\n\n");
        }
        remediation.push_str(&strip_html(detail));
    }

    let references: Vec<String> = issue
        .references
        .as_deref()
        .map(|refs| {
            href_regex()
                .captures_iter(refs)
                .map(|c| c[1].to_string())
                .collect()
        })
        .unwrap_or_default();

    let request = issue
        .request_response
        .as_ref()
        .and_then(|rr| rr.request.as_ref())
        .and_then(decode_body)
        .map(|b| truncate_body(&b));
    let response = issue
        .request_response
        .as_ref()
        .and_then(|rr| rr.response.as_ref())
        .and_then(decode_body)
        .map(|b| truncate_body(&b));

    let severity = issue.severity.as_deref().unwrap_or("information");
    let issue_type = issue.issue_type.as_deref().unwrap_or("");

    result.vulnerabilities.push(ParsedVulnerability {
        description: (!description.is_empty()).then(|| description.clone()),
        remediation: (!remediation.is_empty()).then(|| remediation.clone()),
        references,
        template_id: (!issue_type.is_empty()).then(|| format!("burp-{issue_type}")),
        request,
        response,
        tags: vec!["burp".to_string(), "imported".to_string()],
        metadata: json!({
            "issue_type": issue_type,
            "confidence": issue.confidence.as_deref().unwrap_or(""),
            "location": issue.location.as_deref().unwrap_or(""),
            "host": host,
            "path": path,
        }),
        asset_value: Some(url),
        asset_type: Some(AssetType::Url),
        ..ParsedVulnerability::new(name, map_severity(severity))
    });
}

fn process_item(item: &ItemElem, result: &mut ParseOutput, seen_urls: &mut HashSet<String>) {
    let host = item
        .host
        .as_ref()
        .and_then(|h| h.text.as_deref())
        .unwrap_or("");
    if host.is_empty() {
        return;
    }

    let protocol = item.protocol.as_deref().unwrap_or("http");
    let port = item.port.as_deref().unwrap_or("");
    let path = item.path.as_deref().unwrap_or("");

    let url = if !port.is_empty() && port != "80" && port != "443" {
        format!("{protocol}://{host}:{port}{path}")
    } else {
        format!("{protocol}://{host}{path}")
    };

    if seen_urls.insert(url.clone()) {
        result.assets.push(ParsedAsset {
            metadata: json!({
                "host": host,
                "port": port,
                "protocol": protocol,
                "path": path,
                "method": item.method.as_deref().unwrap_or(""),
                "status": item.status.as_deref().unwrap_or(""),
                "mimetype": item.mimetype.as_deref().unwrap_or(""),
            }),
            tags: vec![
                "burp".to_string(),
                "imported".to_string(),
                "http-history".to_string(),
            ],
            ..ParsedAsset::new(AssetType::Url, url)
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json as j;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "import_burp", j!({}))
    }

    #[test]
    fn test_scanner_issue() {
        let xml = r#"<?xml version="1.0"?>
<issues>
  <issue>
    <name>Cross-site scripting (reflected)</name>
    <host ip="93.184.216.34">https://app.example</host>
    <path>/search</path>
    <location>/search [q parameter]</location>
    <severity>High</severity>
    <confidence>Certain</confidence>
    <type>2097920</type>
    <issueBackground>&lt;p&gt;Reflected XSS arises when...&lt;/p&gt;</issueBackground>
    <issueDetail>The value of the &lt;b&gt;q&lt;/b&gt; parameter is echoed unencoded.</issueDetail>
    <remediationBackground>Encode output.</remediationBackground>
    <references>&lt;ul&gt;&lt;li&gt;&lt;a href="https://owasp.org/xss"&gt;XSS&lt;/a&gt;&lt;/li&gt;&lt;/ul&gt;</references>
    <requestresponse>
      <request base64="true">R0VUIC9zZWFyY2g/cT10ZXN0IEhUVFAvMS4x</request>
      <response base64="false">HTTP/1.1 200 OK</response>
    </requestresponse>
  </issue>
</issues>"#;

        let out = BurpParser.parse(xml, &job());
        assert!(out.errors.is_empty());
        assert_eq!(out.vulnerabilities.len(), 1);

        let vuln = &out.vulnerabilities[0];
        assert_eq!(vuln.severity, Severity::High);
        assert!(vuln.description.as_deref().unwrap().contains("Reflected XSS"));
        assert!(vuln
            .description
            .as_deref()
            .unwrap()
            .contains("echoed unencoded"));
        assert_eq!(vuln.references, vec!["https://owasp.org/xss"]);
        // base64 request decoded
        assert!(vuln.request.as_deref().unwrap().starts_with("GET /search"));
        assert_eq!(vuln.response.as_deref(), Some("HTTP/1.1 200 OK"));

        assert_eq!(out.assets.len(), 1);
        assert_eq!(out.assets[0].value, "https://app.example/search");
    }

    #[test]
    fn test_http_history_items() {
        let xml = r#"<items>
  <item>
    <host ip="1.2.3.4">api.example</host>
    <port>8443</port>
    <protocol>https</protocol>
    <path>/v1/users</path>
    <method>GET</method>
    <status>200</status>
    <mimetype>JSON</mimetype>
  </item>
  <item>
    <host>www.example</host>
    <port>443</port>
    <protocol>https</protocol>
    <path>/</path>
  </item>
</items>"#;

        let out = BurpParser.parse(xml, &job());
        assert_eq!(out.assets.len(), 2);
        // Non-default port is kept in the URL, default ports are dropped
        assert_eq!(out.assets[0].value, "https://api.example:8443/v1/users");
        assert_eq!(out.assets[1].value, "https://www.example/");
    }

    #[test]
    fn test_information_severity_maps_to_info() {
        let xml = r#"<issues><issue>
          <name>Server header</name>
          <host>http://x.example</host>
          <path>/</path>
          <severity>Information</severity>
        </issue></issues>"#;
        let out = BurpParser.parse(xml, &job());
        assert_eq!(out.vulnerabilities[0].severity, Severity::Info);
    }

    #[test]
    fn test_invalid_xml() {
        let out = BurpParser.parse("{}", &job());
        assert!(!out.errors.is_empty());
    }
}
