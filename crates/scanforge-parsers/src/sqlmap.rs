//! SQLMap text output parser.
//!
//! Extracts injection points, DBMS/technology banners, enumerated database
//! names and credentials out of dumped tables.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::{json, Value};

use scanforge_core::model::{AssetType, CredentialType, Job, ResultType, Severity};

use crate::output::{ParseOutput, ParsedAsset, ParsedCredential, ParsedFinding, ParsedVulnerability};
use crate::util::looks_like_hash;
use crate::Parser;

fn param_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Parameter:\s*(\S+)\s*\((\w+)\)").unwrap())
}

fn type_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*Type:\s*(.+)$").unwrap())
}

fn payload_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)^\s*Payload:\s*(.+)$").unwrap())
}

fn dbms_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)\[INFO\]\s*the back-end DBMS is\s+(\S+)").unwrap())
}

fn tech_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?im)web application technology:\s*(.+)$").unwrap())
}

fn db_list_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)available databases \[(\d+)\]:").unwrap())
}

fn db_name_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?m)^\[\*\]\s+(\S+)").unwrap())
}

fn dump_db_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Database:\s*(\S+)").unwrap())
}

fn dump_table_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)Table:\s*(\S+)").unwrap())
}

const USER_COLUMNS: &[&str] = &["username", "user", "login", "email"];
const PASS_COLUMNS: &[&str] = &["password", "passwd", "pass", "hash", "pwd"];

pub struct SqlmapParser;

impl Parser for SqlmapParser {
    fn tool_name(&self) -> &'static str {
        "sqlmap"
    }

    fn parse(&self, output: &str, job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();

        let target = job
            .parameters
            .get("target")
            .or_else(|| job.parameters.get("url"))
            .and_then(Value::as_str)
            .unwrap_or("unknown")
            .to_string();

        let mut seen_injections = HashSet::new();
        parse_injections(output, &mut result, &target, &mut seen_injections);
        parse_dbms_info(output, &mut result, &target);
        parse_tech_info(output, &mut result, &target);
        parse_databases(output, &mut result, &target);
        parse_dumps(output, &mut result, &target);

        tracing::debug!(
            assets = result.assets.len(),
            vulnerabilities = result.vulnerabilities.len(),
            credentials = result.credentials.len(),
            "sqlmap parsing complete"
        );
        result
    }
}

fn injection_severity(injection_type: &str) -> Severity {
    let lower = injection_type.to_lowercase();
    if lower.contains("stacked") || lower.contains("union") {
        Severity::Critical
    } else {
        // Time-based, error-based, boolean-based: all directly exploitable
        Severity::High
    }
}

fn parse_injections(
    output: &str,
    result: &mut ParseOutput,
    target: &str,
    seen: &mut HashSet<String>,
) {
    for section in output.split("---\n") {
        let Some(param_caps) = param_regex().captures(section) else {
            continue;
        };
        let param = param_caps[1].to_string();
        let method = param_caps[2].to_string();

        let types: Vec<String> = type_regex()
            .captures_iter(section)
            .map(|c| c[1].trim().to_string())
            .collect();
        let payloads: Vec<String> = payload_regex()
            .captures_iter(section)
            .map(|c| c[1].trim().to_string())
            .collect();

        for (i, inj_type) in types.iter().enumerate() {
            if inj_type.is_empty() {
                continue;
            }
            let key = format!("{param}:{method}:{inj_type}");
            if !seen.insert(key) {
                continue;
            }

            let payload = payloads.get(i).cloned();
            let mut evidence = format!("Parameter: {param}\nMethod: {method}\nType: {inj_type}");
            if let Some(p) = &payload {
                evidence.push_str(&format!("\nPayload: {p}"));
            }

            result.vulnerabilities.push(ParsedVulnerability {
                description: Some(format!(
                    "SQL injection vulnerability found in parameter '{param}' via {method} \
                     request. Injection type: {inj_type}."
                )),
                cwe_ids: vec!["CWE-89".to_string()],
                evidence: Some(evidence),
                remediation: Some(
                    "Use parameterized queries or prepared statements. Implement proper input \
                     validation and sanitization. Apply principle of least privilege to database \
                     accounts."
                        .to_string(),
                ),
                references: vec![
                    "https://owasp.org/www-community/attacks/SQL_Injection".to_string(),
                    "https://cheatsheetseries.owasp.org/cheatsheets/SQL_Injection_Prevention_Cheat_Sheet.html"
                        .to_string(),
                ],
                template_id: Some(format!("sqlmap:{param}:{inj_type}")),
                metadata: json!({
                    "parameter": param.clone(),
                    "method": method.clone(),
                    "injection_type": inj_type,
                    "payload": payload,
                }),
                tags: vec![
                    "sqlmap".to_string(),
                    "sql-injection".to_string(),
                    inj_type.to_lowercase().replace(' ', "-"),
                ],
                asset_value: Some(target.to_string()),
                asset_type: Some(AssetType::Url),
                ..ParsedVulnerability::new(
                    format!("SQL Injection - {param} ({inj_type})"),
                    injection_severity(inj_type),
                )
            });
        }
    }
}

fn parse_dbms_info(output: &str, result: &mut ParseOutput, target: &str) {
    let Some(caps) = dbms_regex().captures(output) else {
        return;
    };
    let dbms = caps[1].trim().to_string();

    result.assets.push(ParsedAsset {
        metadata: json!({"dbms": dbms.clone(), "source": "sqlmap"}),
        tags: vec![
            "sqlmap".to_string(),
            "database".to_string(),
            dbms.to_lowercase(),
        ],
        risk_score: 70,
        ..ParsedAsset::new(AssetType::Service, format!("{target}:database:{dbms}"))
    });

    result.results.push(ParsedFinding {
        raw_data: Some(caps[0].to_string()),
        severity: Some(Severity::Info),
        ..ParsedFinding::new(
            ResultType::Service,
            json!({"dbms": dbms, "target": target}),
        )
    });
}

fn parse_tech_info(output: &str, result: &mut ParseOutput, target: &str) {
    let Some(caps) = tech_regex().captures(output) else {
        return;
    };
    for tech in caps[1].split(',') {
        let tech = tech.trim();
        if !tech.is_empty() {
            result.assets.push(ParsedAsset {
                metadata: json!({"target": target, "source": "sqlmap"}),
                tags: vec!["sqlmap".to_string(), "technology".to_string()],
                ..ParsedAsset::new(AssetType::Technology, tech)
            });
        }
    }
}

fn parse_databases(output: &str, result: &mut ParseOutput, target: &str) {
    let Some(m) = db_list_regex().find(output) else {
        return;
    };
    // Limit the scan to the listing that follows the header
    let remaining = &output[m.end()..output.len().min(m.end() + 2000)];
    for caps in db_name_regex().captures_iter(remaining) {
        let db_name = caps[1].to_string();
        result.results.push(ParsedFinding {
            raw_data: Some(format!("Database: {db_name}")),
            severity: Some(Severity::Info),
            ..ParsedFinding::new(
                ResultType::Raw,
                json!({"database_name": db_name, "target": target}),
            )
        });
    }
}

fn parse_dumps(output: &str, result: &mut ParseOutput, target: &str) {
    for db_caps in dump_db_regex().captures_iter(output) {
        let db_name = db_caps[1].to_string();
        let section_start = db_caps.get(0).unwrap().start();

        let lookahead = &output[section_start..output.len().min(section_start + 500)];
        let Some(table_caps) = dump_table_regex().captures(lookahead) else {
            continue;
        };
        let table_name = table_caps[1].to_string();

        let table_start = section_start + table_caps.get(0).unwrap().end();
        let section_end = output[table_start..]
            .find("\n\n")
            .map(|i| table_start + i)
            .unwrap_or_else(|| output.len().min(table_start + 5000));

        extract_credentials_from_table(
            &output[table_start..section_end],
            &db_name,
            &table_name,
            target,
            result,
        );
    }
}

fn extract_credentials_from_table(
    table_text: &str,
    db_name: &str,
    table_name: &str,
    target: &str,
    result: &mut ParseOutput,
) {
    let lines: Vec<&str> = table_text.lines().collect();

    // Header row: contains pipes and at least one credential column name
    let mut header_idx = None;
    let mut columns: Vec<String> = Vec::new();
    for (i, line) in lines.iter().enumerate() {
        if !line.contains('|') || line.trim_start().starts_with('+') {
            continue;
        }
        let parts: Vec<String> = line
            .split('|')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .map(str::to_string)
            .collect();
        let lower: Vec<String> = parts.iter().map(|p| p.to_lowercase()).collect();
        if USER_COLUMNS
            .iter()
            .chain(PASS_COLUMNS)
            .any(|c| lower.contains(&c.to_string()))
        {
            columns = parts;
            header_idx = Some(i);
            break;
        }
    }
    let Some(header_idx) = header_idx else {
        return;
    };

    let col_index = |names: &[&str]| -> Option<usize> {
        names.iter().find_map(|name| {
            columns
                .iter()
                .position(|c| c.to_lowercase() == *name)
        })
    };
    let user_idx = col_index(USER_COLUMNS);
    let pass_idx = col_index(PASS_COLUMNS);
    if user_idx.is_none() && pass_idx.is_none() {
        return;
    }

    let mut seen = HashSet::new();
    for line in &lines[header_idx + 1..] {
        if !line.contains('|') || line.trim_start().starts_with('+') {
            continue;
        }
        let parts: Vec<&str> = line
            .split('|')
            .map(str::trim)
            .filter(|p| !p.is_empty())
            .collect();

        let username = user_idx.and_then(|i| parts.get(i)).map(|s| s.to_string());
        let password = pass_idx.and_then(|i| parts.get(i)).map(|s| s.to_string());
        if username.is_none() && password.is_none() {
            continue;
        }

        let key = format!("{username:?}:{password:?}");
        if !seen.insert(key) {
            continue;
        }

        let is_hash = password.as_deref().is_some_and(looks_like_hash);

        result.credentials.push(ParsedCredential {
            username,
            password: if is_hash { None } else { password.clone() },
            hash_value: if is_hash { password.clone() } else { None },
            hash_type: is_hash.then(|| "unknown".to_string()),
            service: Some("database".to_string()),
            credential_type: if is_hash {
                CredentialType::Hash
            } else {
                CredentialType::Password
            },
            metadata: json!({
                "database": db_name,
                "table": table_name,
                "source": "sqlmap",
                "target": target,
            }),
            asset_value: Some(target.to_string()),
            asset_type: Some(AssetType::Url),
            ..Default::default()
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(
            Uuid::now_v7(),
            "sqlmap",
            json!({"target": "http://victim.example/page?id=1"}),
        )
    }

    #[test]
    fn test_injection_points() {
        let output = "\
---
Parameter: id (GET)
    Type: boolean-based blind
    Payload: id=1 AND 1=1
    Type: UNION query
    Payload: id=1 UNION ALL SELECT NULL,NULL
---
[12:00:00] [INFO] the back-end DBMS is MySQL
web application technology: PHP 7.4.3, Apache 2.4.41";

        let out = SqlmapParser.parse(output, &job());
        assert_eq!(out.vulnerabilities.len(), 2);

        let union = out
            .vulnerabilities
            .iter()
            .find(|v| v.title.contains("UNION"))
            .unwrap();
        assert_eq!(union.severity, Severity::Critical);
        assert_eq!(union.cwe_ids, vec!["CWE-89"]);

        let boolean = out
            .vulnerabilities
            .iter()
            .find(|v| v.title.contains("boolean"))
            .unwrap();
        assert_eq!(boolean.severity, Severity::High);

        // DBMS service asset + technologies
        assert!(out
            .assets
            .iter()
            .any(|a| a.asset_type == AssetType::Service && a.value.contains("MySQL")));
        let techs: Vec<&str> = out
            .assets
            .iter()
            .filter(|a| a.asset_type == AssetType::Technology)
            .map(|a| a.value.as_str())
            .collect();
        assert_eq!(techs, vec!["PHP 7.4.3", "Apache 2.4.41"]);
    }

    #[test]
    fn test_database_listing() {
        let output = "\
available databases [3]:
[*] information_schema
[*] mysql
[*] webapp";
        let out = SqlmapParser.parse(output, &job());
        assert_eq!(out.results.len(), 3);
        assert_eq!(out.results[2].parsed_data["database_name"], "webapp");
    }

    #[test]
    fn test_table_dump_credentials() {
        let output = "\
Database: webapp
Table: users
[3 entries]
+----+----------+----------------------------------+
| id | username | password                         |
+----+----------+----------------------------------+
| 1  | admin    | 5f4dcc3b5aa765d61d8327deb882cf99 |
| 2  | bob      | summer2024                       |
+----+----------+----------------------------------+";

        let out = SqlmapParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 2);

        let admin = out
            .credentials
            .iter()
            .find(|c| c.username.as_deref() == Some("admin"))
            .unwrap();
        assert!(admin.password.is_none());
        assert_eq!(
            admin.hash_value.as_deref(),
            Some("5f4dcc3b5aa765d61d8327deb882cf99")
        );
        assert_eq!(admin.credential_type, CredentialType::Hash);

        let bob = out
            .credentials
            .iter()
            .find(|c| c.username.as_deref() == Some("bob"))
            .unwrap();
        assert_eq!(bob.password.as_deref(), Some("summer2024"));
        assert_eq!(bob.metadata["table"], "users");
    }

    #[test]
    fn test_duplicate_injection_types_deduped() {
        let output = "\
---
Parameter: id (GET)
    Type: boolean-based blind
    Type: boolean-based blind
---";
        let out = SqlmapParser.parse(output, &job());
        assert_eq!(out.vulnerabilities.len(), 1);
    }
}
