//! Nmap XML output parser.
//!
//! Walks hosts and ports out of `-oX` output, emits host/domain/service
//! assets plus port/service results, and extracts vulnerabilities from NSE
//! script output (vulners CVE listings, the smb-vuln/ssl/http-vuln script
//! families, and generic `VULNERABLE` markers).

use serde::Deserialize;
use serde_json::json;

use scanforge_core::model::{AssetType, Job, ResultType, Severity};

use crate::output::{ParseOutput, ParsedAsset, ParsedFinding, ParsedVulnerability};
use crate::util::{cve_regex, strip_bom, truncate_body};
use crate::Parser;

/// Script id fragments that indicate vulnerability checks.
const VULN_SCRIPTS: &[&str] = &[
    "vulners",
    "vulscan",
    "http-vuln",
    "smb-vuln",
    "ssl-heartbleed",
    "ssl-poodle",
    "ssl-drown",
    "ssl-ccs-injection",
    "sslv2-drown",
    "ms-sql-empty-password",
    "mysql-empty-password",
    "ftp-anon",
    "http-shellshock",
    "smb-double-pulsar-backdoor",
    "smtp-vuln-cve2010-4344",
    "smtp-vuln-cve2011-1720",
    "smtp-vuln-cve2011-1764",
];

// =============================================================================
// XML shape
// =============================================================================

#[derive(Debug, Deserialize)]
struct NmapRun {
    #[serde(default, rename = "host")]
    hosts: Vec<HostElem>,
}

#[derive(Debug, Deserialize)]
struct HostElem {
    status: Option<StatusElem>,
    #[serde(default, rename = "address")]
    addresses: Vec<AddressElem>,
    hostnames: Option<HostnamesElem>,
    ports: Option<PortsElem>,
    os: Option<OsElem>,
}

#[derive(Debug, Deserialize)]
struct StatusElem {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize)]
struct AddressElem {
    #[serde(rename = "@addr")]
    addr: String,
    #[serde(rename = "@addrtype")]
    addrtype: String,
}

#[derive(Debug, Deserialize)]
struct HostnamesElem {
    #[serde(default, rename = "hostname")]
    hostnames: Vec<HostnameElem>,
}

#[derive(Debug, Deserialize)]
struct HostnameElem {
    #[serde(default, rename = "@name")]
    name: Option<String>,
}

#[derive(Debug, Deserialize)]
struct PortsElem {
    #[serde(default, rename = "port")]
    ports: Vec<PortElem>,
}

#[derive(Debug, Deserialize)]
struct PortElem {
    #[serde(rename = "@portid")]
    portid: String,
    #[serde(default, rename = "@protocol")]
    protocol: Option<String>,
    state: Option<PortStateElem>,
    service: Option<ServiceElem>,
    #[serde(default, rename = "script")]
    scripts: Vec<ScriptElem>,
}

#[derive(Debug, Deserialize)]
struct PortStateElem {
    #[serde(rename = "@state")]
    state: String,
}

#[derive(Debug, Deserialize, Default)]
struct ServiceElem {
    #[serde(default, rename = "@name")]
    name: Option<String>,
    #[serde(default, rename = "@product")]
    product: Option<String>,
    #[serde(default, rename = "@version")]
    version: Option<String>,
    #[serde(default, rename = "@extrainfo")]
    extrainfo: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ScriptElem {
    #[serde(default, rename = "@id")]
    id: String,
    #[serde(default, rename = "@output")]
    output: String,
}

#[derive(Debug, Deserialize)]
struct OsElem {
    #[serde(default, rename = "osmatch")]
    matches: Vec<OsMatchElem>,
}

#[derive(Debug, Deserialize)]
struct OsMatchElem {
    #[serde(default, rename = "@name")]
    name: Option<String>,
    #[serde(default, rename = "@accuracy")]
    accuracy: Option<String>,
}

// =============================================================================
// Parser
// =============================================================================

pub struct NmapParser;

impl Parser for NmapParser {
    fn tool_name(&self) -> &'static str {
        "nmap"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();

        let run: NmapRun = match quick_xml::de::from_str(strip_bom(output)) {
            Ok(run) => run,
            Err(e) => {
                result.errors.push(format!("XML parse error: {e}"));
                return result;
            }
        };

        for host in &run.hosts {
            process_host(host, &mut result);
        }

        tracing::debug!(
            assets = result.assets.len(),
            vulnerabilities = result.vulnerabilities.len(),
            results = result.results.len(),
            "nmap parsing complete"
        );
        result
    }
}

fn process_host(host: &HostElem, result: &mut ParseOutput) {
    if let Some(status) = &host.status {
        if status.state != "up" {
            return;
        }
    }

    let ip_addr = host
        .addresses
        .iter()
        .find(|a| a.addrtype == "ipv4" || a.addrtype == "ipv6")
        .map(|a| a.addr.clone());
    let Some(ip_addr) = ip_addr else {
        return;
    };

    let hostnames: Vec<String> = host
        .hostnames
        .as_ref()
        .map(|h| h.hostnames.iter().filter_map(|n| n.name.clone()).collect())
        .unwrap_or_default();

    let mut host_metadata = json!({
        "ip": ip_addr.clone(),
        "hostnames": hostnames.clone(),
    });
    if let Some(os_match) = host.os.as_ref().and_then(|os| os.matches.first()) {
        host_metadata["os"] = json!(os_match.name.clone());
        host_metadata["os_accuracy"] = json!(os_match.accuracy.clone());
    }

    result.assets.push(ParsedAsset {
        metadata: host_metadata,
        tags: vec!["nmap".to_string()],
        ..ParsedAsset::new(AssetType::Host, &ip_addr)
    });

    for hostname in &hostnames {
        result.assets.push(ParsedAsset {
            metadata: json!({"ip": ip_addr.clone()}),
            tags: vec!["nmap".to_string()],
            ..ParsedAsset::new(AssetType::Domain, hostname)
        });
    }

    if let Some(ports) = &host.ports {
        for port in &ports.ports {
            process_port(port, &ip_addr, result);
        }
    }
}

fn process_port(port: &PortElem, ip_addr: &str, result: &mut ParseOutput) {
    let Some(state) = &port.state else {
        return;
    };
    if state.state != "open" {
        return;
    }

    let protocol = port.protocol.as_deref().unwrap_or("tcp");
    let port_num: u32 = port.portid.parse().unwrap_or(0);
    let service = port.service.as_ref();
    let service_name = service.and_then(|s| s.name.clone()).unwrap_or_default();
    let product = service.and_then(|s| s.product.clone()).unwrap_or_default();
    let version = service.and_then(|s| s.version.clone()).unwrap_or_default();
    let extra_info = service.and_then(|s| s.extrainfo.clone()).unwrap_or_default();

    let service_value = format!("{ip_addr}:{}/{protocol}", port.portid);
    let mut tags = vec!["nmap".to_string()];
    if !service_name.is_empty() {
        tags.push(service_name.clone());
    }

    result.assets.push(ParsedAsset {
        metadata: json!({
            "ip": ip_addr,
            "port": port_num,
            "protocol": protocol,
            "state": state.state.clone(),
            "service": service_name.clone(),
            "product": product.clone(),
            "version": version.clone(),
            "extra_info": extra_info,
        }),
        tags,
        ..ParsedAsset::new(AssetType::Service, service_value)
    });

    result.results.push(ParsedFinding {
        asset_value: Some(ip_addr.to_string()),
        asset_type: Some(AssetType::Host),
        ..ParsedFinding::new(
            ResultType::Port,
            json!({
                "port": port_num,
                "protocol": protocol,
                "state": state.state.clone(),
                "service": service_name.clone(),
                "product": product.clone(),
                "version": version.clone(),
            }),
        )
    });

    if !service_name.is_empty() {
        result.results.push(ParsedFinding {
            asset_value: Some(ip_addr.to_string()),
            asset_type: Some(AssetType::Host),
            ..ParsedFinding::new(
                ResultType::Service,
                json!({
                    "name": service_name.clone(),
                    "product": product,
                    "version": version,
                    "port": port_num,
                    "protocol": protocol,
                }),
            )
        });
    }

    for script in &port.scripts {
        process_script(script, ip_addr, port_num, protocol, result);
    }
}

fn process_script(
    script: &ScriptElem,
    ip_addr: &str,
    port: u32,
    protocol: &str,
    result: &mut ParseOutput,
) {
    let script_id = script.id.to_lowercase();
    let is_vuln_script = VULN_SCRIPTS.iter().any(|v| script_id.contains(v));

    if !is_vuln_script {
        // Still record script output as a raw result
        result.results.push(ParsedFinding {
            raw_data: Some(script.output.clone()),
            asset_value: Some(ip_addr.to_string()),
            asset_type: Some(AssetType::Host),
            ..ParsedFinding::new(
                ResultType::Raw,
                json!({
                    "script_id": script.id.clone(),
                    "output": script.output.clone(),
                    "port": port,
                    "protocol": protocol,
                }),
            )
        });
        return;
    }

    for mut vuln in parse_vuln_script(&script.id, &script.output) {
        vuln.asset_value = Some(ip_addr.to_string());
        vuln.asset_type = Some(AssetType::Host);
        vuln.metadata["port"] = json!(port);
        vuln.metadata["protocol"] = json!(protocol);
        result.vulnerabilities.push(vuln);
    }
}

fn parse_vuln_script(script_id: &str, output: &str) -> Vec<ParsedVulnerability> {
    let id_lower = script_id.to_lowercase();

    if id_lower.contains("vulners") {
        parse_vulners_output(script_id, output)
    } else if id_lower.contains("smb-vuln") {
        parse_smb_vuln(script_id, output).into_iter().collect()
    } else if id_lower.starts_with("ssl-") || id_lower.starts_with("sslv2-") {
        parse_ssl_vuln(script_id, output).into_iter().collect()
    } else if id_lower.contains("http-vuln") {
        parse_http_vuln(script_id, output).into_iter().collect()
    } else if output.to_uppercase().contains("VULNERABLE") {
        vec![ParsedVulnerability {
            description: Some(format!(
                "Vulnerability detected by Nmap script: {script_id}"
            )),
            evidence: Some(truncate_body(output)),
            template_id: Some(format!("nmap:{script_id}")),
            tags: vec!["nmap".to_string(), script_id.to_string()],
            metadata: json!({"script_id": script_id}),
            ..ParsedVulnerability::new(format!("Nmap {script_id}"), Severity::Medium)
        }]
    } else {
        Vec::new()
    }
}

/// Parse vulners script output: one CVE per line, optionally followed by a
/// CVSS score token.
fn parse_vulners_output(script_id: &str, output: &str) -> Vec<ParsedVulnerability> {
    let mut vulns = Vec::new();

    for line in output.lines() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let Some(m) = cve_regex().find(line) else {
            continue;
        };
        let cve_id = m.as_str().to_uppercase();

        // Adjacent CVSS score, if a token parses as a float in range
        let cvss = line
            .split_whitespace()
            .filter_map(|tok| tok.parse::<f64>().ok())
            .find(|score| (0.0..=10.0).contains(score));

        let severity = match cvss {
            Some(score) => Severity::from_cvss(score),
            None => Severity::Medium,
        };

        vulns.push(ParsedVulnerability {
            description: Some(line.to_string()),
            cvss_score: cvss,
            cve_ids: vec![cve_id.clone()],
            template_id: Some(format!("nmap:{script_id}:{cve_id}")),
            references: vec![format!("https://nvd.nist.gov/vuln/detail/{cve_id}")],
            tags: vec!["nmap".to_string(), "vulners".to_string(), cve_id.clone()],
            metadata: json!({"raw_line": line}),
            ..ParsedVulnerability::new(cve_id, severity)
        });
    }

    vulns
}

fn parse_smb_vuln(script_id: &str, output: &str) -> Option<ParsedVulnerability> {
    if output.to_uppercase().contains("NOT VULNERABLE") {
        return None;
    }

    let id_lower = script_id.to_lowercase();
    let (severity, cve_ids) = if id_lower.contains("ms17-010") {
        (
            Severity::Critical,
            vec![
                "CVE-2017-0143".to_string(),
                "CVE-2017-0144".to_string(),
                "CVE-2017-0145".to_string(),
            ],
        )
    } else {
        let cves = cve_regex()
            .find_iter(&id_lower)
            .map(|m| m.as_str().to_uppercase())
            .collect();
        (Severity::High, cves)
    };

    Some(ParsedVulnerability {
        description: Some(format!("SMB vulnerability detected: {script_id}")),
        evidence: Some(truncate_body(output)),
        cve_ids,
        template_id: Some(format!("nmap:{script_id}")),
        tags: vec!["nmap".to_string(), "smb".to_string(), script_id.to_string()],
        metadata: json!({"script_id": script_id}),
        ..ParsedVulnerability::new(format!("SMB Vulnerability: {script_id}"), severity)
    })
}

fn parse_ssl_vuln(script_id: &str, output: &str) -> Option<ParsedVulnerability> {
    if output.to_uppercase().contains("NOT VULNERABLE") {
        return None;
    }

    let (title, severity, cve_ids): (String, Severity, Vec<String>) =
        match script_id.to_lowercase().as_str() {
            "ssl-heartbleed" => (
                "OpenSSL Heartbleed Vulnerability".to_string(),
                Severity::Critical,
                vec!["CVE-2014-0160".to_string()],
            ),
            "ssl-poodle" => (
                "SSL POODLE Vulnerability".to_string(),
                Severity::Medium,
                vec!["CVE-2014-3566".to_string()],
            ),
            "ssl-drown" | "sslv2-drown" => (
                "DROWN Attack Vulnerability".to_string(),
                Severity::High,
                vec!["CVE-2016-0800".to_string()],
            ),
            "ssl-ccs-injection" => (
                "OpenSSL CCS Injection Vulnerability".to_string(),
                Severity::Medium,
                vec!["CVE-2014-0224".to_string()],
            ),
            other => (
                format!("SSL/TLS Vulnerability: {other}"),
                Severity::Medium,
                Vec::new(),
            ),
        };

    Some(ParsedVulnerability {
        description: Some("SSL/TLS vulnerability detected by Nmap".to_string()),
        evidence: Some(truncate_body(output)),
        cve_ids,
        template_id: Some(format!("nmap:{script_id}")),
        tags: vec![
            "nmap".to_string(),
            "ssl".to_string(),
            "tls".to_string(),
            script_id.to_string(),
        ],
        metadata: json!({"script_id": script_id}),
        ..ParsedVulnerability::new(title, severity)
    })
}

fn parse_http_vuln(script_id: &str, output: &str) -> Option<ParsedVulnerability> {
    if output.to_uppercase().contains("NOT VULNERABLE") {
        return None;
    }

    Some(ParsedVulnerability {
        description: Some(format!("HTTP vulnerability detected: {script_id}")),
        evidence: Some(truncate_body(output)),
        template_id: Some(format!("nmap:{script_id}")),
        tags: vec![
            "nmap".to_string(),
            "http".to_string(),
            script_id.to_string(),
        ],
        metadata: json!({"script_id": script_id}),
        ..ParsedVulnerability::new(format!("HTTP Vulnerability: {script_id}"), Severity::High)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json as j;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "nmap", j!({}))
    }

    const TWO_PORT_HOST: &str = r#"<?xml version="1.0"?>
<nmaprun scanner="nmap">
  <host>
    <status state="up"/>
    <address addr="192.168.1.1" addrtype="ipv4"/>
    <hostnames><hostname name="gateway.local" type="PTR"/></hostnames>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open"/>
        <service name="ssh" product="OpenSSH" version="8.2"/>
      </port>
      <port protocol="tcp" portid="80">
        <state state="open"/>
        <service name="http" product="nginx"/>
      </port>
      <port protocol="tcp" portid="443">
        <state state="closed"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;

    #[test]
    fn test_hosts_ports_and_services() {
        let out = NmapParser.parse(TWO_PORT_HOST, &job());
        assert!(out.errors.is_empty());

        // One host, one domain, two service assets
        assert!(out.assets.len() >= 3);
        let host = out
            .assets
            .iter()
            .find(|a| a.asset_type == AssetType::Host)
            .unwrap();
        assert_eq!(host.value, "192.168.1.1");

        let services: Vec<&str> = out
            .assets
            .iter()
            .filter(|a| a.asset_type == AssetType::Service)
            .map(|a| a.value.as_str())
            .collect();
        assert_eq!(services, vec!["192.168.1.1:22/tcp", "192.168.1.1:80/tcp"]);

        let ports: Vec<_> = out
            .results
            .iter()
            .filter(|r| r.result_type == ResultType::Port)
            .collect();
        assert_eq!(ports.len(), 2);
        assert_eq!(ports[0].parsed_data["service"], "ssh");
        assert_eq!(ports[0].parsed_data["product"], "OpenSSH");
        assert_eq!(ports[0].parsed_data["version"], "8.2");
    }

    #[test]
    fn test_smb_vuln_script_produces_critical_vuln() {
        let xml = r#"<nmaprun>
  <host>
    <status state="up"/>
    <address addr="192.168.1.1" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="445">
        <state state="open"/>
        <service name="microsoft-ds"/>
        <script id="smb-vuln-ms17-010" output="VULNERABLE: MS17-010"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;

        let out = NmapParser.parse(xml, &job());
        assert!(!out.vulnerabilities.is_empty());
        let vuln = &out.vulnerabilities[0];
        let title = vuln.title.to_lowercase();
        assert!(title.contains("ms17-010") || title.contains("smb"));
        assert!(matches!(vuln.severity, Severity::Critical | Severity::High));
        assert!(vuln.cve_ids.contains(&"CVE-2017-0144".to_string()));
        assert_eq!(vuln.asset_value.as_deref(), Some("192.168.1.1"));
        assert_eq!(vuln.metadata["port"], 445);
    }

    #[test]
    fn test_vulners_output_with_cvss() {
        let xml = r#"<nmaprun>
  <host>
    <status state="up"/>
    <address addr="10.0.0.5" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="22">
        <state state="open"/>
        <service name="ssh" product="OpenSSH"/>
        <script id="vulners" output="
        CVE-2021-28041 4.6 https://vulners.com/cve/CVE-2021-28041
        CVE-2016-20012 5.3 https://vulners.com/cve/CVE-2016-20012
        CVE-2023-38408 9.8 https://vulners.com/cve/CVE-2023-38408"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;

        let out = NmapParser.parse(xml, &job());
        assert_eq!(out.vulnerabilities.len(), 3);

        let critical = out
            .vulnerabilities
            .iter()
            .find(|v| v.title == "CVE-2023-38408")
            .unwrap();
        assert_eq!(critical.severity, Severity::Critical);
        assert_eq!(critical.cvss_score, Some(9.8));

        let medium = out
            .vulnerabilities
            .iter()
            .find(|v| v.title == "CVE-2021-28041")
            .unwrap();
        assert_eq!(medium.severity, Severity::Medium);
    }

    #[test]
    fn test_down_hosts_skipped() {
        let xml = r#"<nmaprun>
  <host>
    <status state="down"/>
    <address addr="10.0.0.9" addrtype="ipv4"/>
  </host>
</nmaprun>"#;
        let out = NmapParser.parse(xml, &job());
        assert!(out.assets.is_empty());
    }

    #[test]
    fn test_not_vulnerable_ssl_script_ignored() {
        let xml = r#"<nmaprun>
  <host>
    <status state="up"/>
    <address addr="10.0.0.9" addrtype="ipv4"/>
    <ports>
      <port protocol="tcp" portid="443">
        <state state="open"/>
        <service name="https"/>
        <script id="ssl-heartbleed" output="NOT VULNERABLE"/>
      </port>
    </ports>
  </host>
</nmaprun>"#;
        let out = NmapParser.parse(xml, &job());
        assert!(out.vulnerabilities.is_empty());
    }

    #[test]
    fn test_invalid_xml_records_error() {
        let out = NmapParser.parse("this is not xml at all", &job());
        assert!(!out.errors.is_empty());
        assert!(out.assets.is_empty());
    }

    #[test]
    fn test_bom_is_stripped() {
        let with_bom = format!("\u{feff}{TWO_PORT_HOST}");
        let out = NmapParser.parse(&with_bom, &job());
        assert!(out.errors.is_empty());
        assert!(!out.assets.is_empty());
    }
}
