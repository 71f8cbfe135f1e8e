//! Nessus XML (.nessus) parser for importing external scan results.

use std::collections::HashSet;

use serde::Deserialize;
use serde_json::json;

use scanforge_core::model::{AssetType, Job, Severity};

use crate::output::{ParseOutput, ParsedAsset, ParsedVulnerability};
use crate::util::{is_ipv4, strip_bom, truncate_body};
use crate::Parser;

// =============================================================================
// XML shape
// =============================================================================

#[derive(Debug, Deserialize)]
struct NessusClientData {
    #[serde(default, rename = "Report")]
    reports: Vec<ReportElem>,
}

#[derive(Debug, Deserialize)]
struct ReportElem {
    #[serde(default, rename = "ReportHost")]
    hosts: Vec<ReportHostElem>,
}

#[derive(Debug, Deserialize)]
struct ReportHostElem {
    #[serde(rename = "@name")]
    name: String,
    #[serde(rename = "HostProperties")]
    properties: Option<HostPropertiesElem>,
    #[serde(default, rename = "ReportItem")]
    items: Vec<ReportItemElem>,
}

#[derive(Debug, Deserialize)]
struct HostPropertiesElem {
    #[serde(default, rename = "tag")]
    tags: Vec<TagElem>,
}

#[derive(Debug, Deserialize)]
struct TagElem {
    #[serde(rename = "@name")]
    name: String,
    #[serde(default, rename = "$text")]
    value: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ReportItemElem {
    #[serde(default, rename = "@pluginID")]
    plugin_id: String,
    #[serde(default, rename = "@pluginName")]
    plugin_name: String,
    #[serde(default, rename = "@port")]
    port: String,
    #[serde(default, rename = "@protocol")]
    protocol: String,
    #[serde(default, rename = "@svc_name")]
    svc_name: String,
    #[serde(default, rename = "@severity")]
    severity: String,
    description: Option<String>,
    solution: Option<String>,
    synopsis: Option<String>,
    see_also: Option<String>,
    plugin_output: Option<String>,
    #[serde(default, rename = "cve")]
    cves: Vec<String>,
    cvss_base_score: Option<String>,
    cvss3_base_score: Option<String>,
    cvss_vector: Option<String>,
    cvss3_vector: Option<String>,
    cwe: Option<String>,
    risk_factor: Option<String>,
    exploit_available: Option<String>,
    exploitability_ease: Option<String>,
}

// =============================================================================
// Parser
// =============================================================================

pub struct NessusParser;

impl Parser for NessusParser {
    fn tool_name(&self) -> &'static str {
        "nessus"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();

        let data: NessusClientData = match quick_xml::de::from_str(strip_bom(output)) {
            Ok(data) => data,
            Err(e) => {
                result.errors.push(format!("XML parse error: {e}"));
                return result;
            }
        };

        let mut seen_hosts = HashSet::new();
        for report in &data.reports {
            for host in &report.hosts {
                process_host(host, &mut result, &mut seen_hosts);
            }
        }

        tracing::debug!(
            assets = result.assets.len(),
            vulnerabilities = result.vulnerabilities.len(),
            "nessus parsing complete"
        );
        result
    }
}

/// Map Nessus numeric severity (0-4) to the shared scale.
fn map_severity(severity: &str) -> Severity {
    match severity {
        "1" => Severity::Low,
        "2" => Severity::Medium,
        "3" => Severity::High,
        "4" => Severity::Critical,
        _ => Severity::Info,
    }
}

fn process_host(host: &ReportHostElem, result: &mut ParseOutput, seen_hosts: &mut HashSet<String>) {
    if host.name.is_empty() || !seen_hosts.insert(host.name.clone()) {
        return;
    }

    let prop = |name: &str| -> String {
        host.properties
            .as_ref()
            .and_then(|p| p.tags.iter().find(|t| t.name == name))
            .and_then(|t| t.value.clone())
            .unwrap_or_default()
    };

    let host_ip = {
        let ip = prop("host-ip");
        if ip.is_empty() {
            host.name.clone()
        } else {
            ip
        }
    };

    result.assets.push(ParsedAsset {
        metadata: json!({
            "fqdn": prop("host-fqdn"),
            "os": prop("operating-system"),
            "mac_address": prop("mac-address"),
            "netbios_name": prop("netbios-name"),
            "system_type": prop("system-type"),
        }),
        tags: vec!["nessus".to_string(), "imported".to_string()],
        ..ParsedAsset::new(
            if is_ipv4(&host_ip) {
                AssetType::Host
            } else {
                AssetType::Domain
            },
            &host_ip,
        )
    });

    for item in &host.items {
        process_item(item, result, &host_ip);
    }
}

fn process_item(item: &ReportItemElem, result: &mut ParseOutput, host: &str) {
    // Purely informational plugins add noise, not findings
    if item.severity == "0" || item.severity.is_empty() {
        return;
    }

    let parse_score = |s: &Option<String>| s.as_deref().and_then(|v| v.trim().parse::<f64>().ok());
    let cvss2 = parse_score(&item.cvss_base_score);
    let cvss3 = parse_score(&item.cvss3_base_score);
    let final_cvss = cvss3.or(cvss2);
    let final_vector = item
        .cvss3_vector
        .clone()
        .filter(|v| !v.is_empty())
        .or_else(|| item.cvss_vector.clone());

    let cwe_ids: Vec<String> = item
        .cwe
        .as_deref()
        .map(str::trim)
        .filter(|c| !c.is_empty())
        .map(|c| {
            if c.starts_with("CWE-") {
                vec![c.to_string()]
            } else {
                vec![format!("CWE-{c}")]
            }
        })
        .unwrap_or_default();

    let references: Vec<String> = item
        .see_also
        .as_deref()
        .map(|s| {
            s.lines()
                .map(str::trim)
                .filter(|l| !l.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default();

    let title = if item.plugin_name.is_empty() {
        format!("Nessus Plugin {}", item.plugin_id)
    } else {
        item.plugin_name.clone()
    };

    let description = item
        .description
        .clone()
        .filter(|d| !d.is_empty())
        .or_else(|| item.synopsis.clone());

    result.vulnerabilities.push(ParsedVulnerability {
        description,
        cvss_score: final_cvss,
        cvss_vector: final_vector,
        cve_ids: item.cves.clone(),
        cwe_ids,
        evidence: item
            .plugin_output
            .as_deref()
            .filter(|o| !o.is_empty())
            .map(truncate_body),
        remediation: item.solution.clone().filter(|s| !s.is_empty()),
        references,
        template_id: Some(format!("nessus-{}", item.plugin_id)),
        tags: vec!["nessus".to_string(), "imported".to_string()],
        metadata: json!({
            "plugin_id": item.plugin_id.clone(),
            "port": item.port.clone(),
            "protocol": item.protocol.clone(),
            "service": item.svc_name.clone(),
            "synopsis": item.synopsis.as_deref().unwrap_or(""),
            "risk_factor": item.risk_factor.as_deref().unwrap_or(""),
            "exploit_available": item.exploit_available.as_deref().unwrap_or(""),
            "exploitability_ease": item.exploitability_ease.as_deref().unwrap_or(""),
        }),
        asset_value: Some(host.to_string()),
        asset_type: Some(AssetType::Host),
        ..ParsedVulnerability::new(title, map_severity(&item.severity))
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json as j;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "import_nessus", j!({}))
    }

    const SAMPLE: &str = r#"<?xml version="1.0" ?>
<NessusClientData_v2>
  <Report name="scan">
    <ReportHost name="192.168.1.5">
      <HostProperties>
        <tag name="host-ip">192.168.1.5</tag>
        <tag name="host-fqdn">fileserver.corp.local</tag>
        <tag name="operating-system">Windows Server 2016</tag>
      </HostProperties>
      <ReportItem pluginID="97833" pluginName="MS17-010: EternalBlue" port="445" protocol="tcp" svc_name="cifs" severity="4">
        <description>The remote host is missing a security update.</description>
        <solution>Apply the MS17-010 security update.</solution>
        <synopsis>Remote code execution over SMB.</synopsis>
        <see_also>https://technet.microsoft.com/library/security/MS17-010</see_also>
        <plugin_output>Host is vulnerable to EternalBlue</plugin_output>
        <cve>CVE-2017-0143</cve>
        <cve>CVE-2017-0144</cve>
        <cvss_base_score>9.3</cvss_base_score>
        <cvss3_base_score>8.1</cvss3_base_score>
        <cvss3_vector>CVSS:3.0/AV:N/AC:H</cvss3_vector>
        <risk_factor>Critical</risk_factor>
      </ReportItem>
      <ReportItem pluginID="10180" pluginName="Ping the remote host" port="0" protocol="icmp" svc_name="ping" severity="0">
        <description>It was possible to ping the host.</description>
      </ReportItem>
    </ReportHost>
  </Report>
</NessusClientData_v2>"#;

    #[test]
    fn test_host_and_critical_item() {
        let out = NessusParser.parse(SAMPLE, &job());
        assert!(out.errors.is_empty());

        assert_eq!(out.assets.len(), 1);
        let asset = &out.assets[0];
        assert_eq!(asset.asset_type, AssetType::Host);
        assert_eq!(asset.value, "192.168.1.5");
        assert_eq!(asset.metadata["fqdn"], "fileserver.corp.local");

        // Severity-0 item is skipped
        assert_eq!(out.vulnerabilities.len(), 1);
        let vuln = &out.vulnerabilities[0];
        assert_eq!(vuln.severity, Severity::Critical);
        assert_eq!(vuln.cve_ids.len(), 2);
        // CVSS3 preferred over CVSS2
        assert_eq!(vuln.cvss_score, Some(8.1));
        assert_eq!(vuln.template_id.as_deref(), Some("nessus-97833"));
        assert_eq!(vuln.remediation.as_deref(), Some("Apply the MS17-010 security update."));
    }

    #[test]
    fn test_severity_scale() {
        assert_eq!(map_severity("0"), Severity::Info);
        assert_eq!(map_severity("1"), Severity::Low);
        assert_eq!(map_severity("2"), Severity::Medium);
        assert_eq!(map_severity("3"), Severity::High);
        assert_eq!(map_severity("4"), Severity::Critical);
        assert_eq!(map_severity("banana"), Severity::Info);
    }

    #[test]
    fn test_bom_and_duplicate_hosts() {
        let doubled = SAMPLE.replace(
            "</Report>",
            r#"<ReportHost name="192.168.1.5"></ReportHost></Report>"#,
        );
        let with_bom = format!("\u{feff}{doubled}");
        let out = NessusParser.parse(&with_bom, &job());
        assert_eq!(out.assets.len(), 1);
    }

    #[test]
    fn test_invalid_xml() {
        let out = NessusParser.parse("%PDF-1.4 not xml", &job());
        assert!(!out.errors.is_empty());
    }
}
