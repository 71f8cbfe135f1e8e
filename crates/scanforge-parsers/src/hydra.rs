//! Hydra text output parser.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use scanforge_core::model::{AssetType, CredentialType, Job};

use crate::output::{ParseOutput, ParsedAsset, ParsedCredential};
use crate::util::is_ipv4;
use crate::Parser;

/// Successful login line, e.g.
/// `[22][ssh] host: 192.168.1.1   login: admin   password: password123`
fn success_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)^\[(\d+)\]\[([^\]]+)\]\s+host:\s*(\S+)\s+login:\s*(\S*)\s+password:\s*(.*)$")
            .unwrap()
    })
}

pub struct HydraParser;

impl Parser for HydraParser {
    fn tool_name(&self) -> &'static str {
        "hydra"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();
        let mut seen_creds = HashSet::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }
            if let Some(caps) = success_regex().captures(line) {
                process_match(&caps, &mut result, &mut seen_creds);
            }
        }

        tracing::debug!(
            assets = result.assets.len(),
            credentials = result.credentials.len(),
            "hydra parsing complete"
        );
        result
    }
}

fn process_match(caps: &regex::Captures<'_>, result: &mut ParseOutput, seen: &mut HashSet<String>) {
    let port: u16 = caps[1].parse().unwrap_or(0);
    let service = caps[2].trim().to_string();
    let host = caps[3].trim().to_string();
    let username = caps[4].trim().to_string();
    let password = caps[5].trim().to_string();

    let cred_key = format!("{host}:{port}:{username}:{password}");
    if !seen.insert(cred_key) {
        return;
    }

    let host_type = if is_ipv4(&host) {
        AssetType::Host
    } else {
        AssetType::Domain
    };

    // Credential hits make both the host and the service high risk
    result.assets.push(ParsedAsset {
        metadata: json!({"port": port, "service": service}),
        tags: vec!["hydra".to_string(), service.clone()],
        risk_score: 80,
        ..ParsedAsset::new(host_type, &host)
    });

    result.assets.push(ParsedAsset {
        metadata: json!({
            "host": host,
            "port": port,
            "service": service,
            "credential_found": true,
        }),
        tags: vec!["hydra".to_string(), "credential-found".to_string()],
        risk_score: 90,
        ..ParsedAsset::new(AssetType::Service, format!("{host}:{port}/{service}"))
    });

    result.credentials.push(ParsedCredential {
        username: (!username.is_empty()).then(|| username.clone()),
        password: (!password.is_empty()).then(|| password.clone()),
        service: Some(service),
        port: Some(port),
        credential_type: CredentialType::Password,
        metadata: json!({"source": "hydra", "host": host}),
        asset_value: Some(host.clone()),
        asset_type: Some(host_type),
        ..Default::default()
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "hydra", json!({}))
    }

    #[test]
    fn test_two_credentials() {
        let output = "[22][ssh] host: 192.168.1.1   login: admin   password: password123\n\
                      [22][ssh] host: 192.168.1.1   login: root   password: toor";

        let out = HydraParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 2);

        let first = &out.credentials[0];
        assert_eq!(first.username.as_deref(), Some("admin"));
        assert_eq!(first.password.as_deref(), Some("password123"));
        assert_eq!(first.service.as_deref(), Some("ssh"));
        assert_eq!(first.port, Some(22));
        assert_eq!(first.asset_value.as_deref(), Some("192.168.1.1"));
    }

    #[test]
    fn test_duplicates_are_collapsed() {
        let output = "[22][ssh] host: 192.168.1.1   login: admin   password: secret\n\
                      [22][ssh] host: 192.168.1.1   login: admin   password: secret";

        let out = HydraParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 1);
    }

    #[test]
    fn test_status_lines_ignored() {
        let output = "Hydra v9.4 starting\n\
                      [DATA] attacking ssh://192.168.1.1:22\n\
                      [22][ssh] host: 192.168.1.1   login: admin   password: x\n\
                      1 of 1 target successfully completed";

        let out = HydraParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 1);
    }

    #[test]
    fn test_domain_host_gets_domain_asset() {
        let output = "[80][http-get] host: intranet.example.com   login: user   password: pass";
        let out = HydraParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 1);
        assert!(out
            .assets
            .iter()
            .any(|a| a.asset_type == AssetType::Domain && a.value == "intranet.example.com"));
        // Service asset carries the very high risk score
        let service = out
            .assets
            .iter()
            .find(|a| a.asset_type == AssetType::Service)
            .unwrap();
        assert_eq!(service.risk_score, 90);
    }
}
