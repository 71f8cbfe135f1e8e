//! John the Ripper output parser.

use std::collections::HashSet;
use std::sync::OnceLock;

use regex::Regex;
use serde_json::json;

use scanforge_core::model::{CredentialType, Job, ResultType, Severity};

use crate::output::{ParseOutput, ParsedCredential, ParsedFinding};
use crate::util::looks_like_hash;
use crate::Parser;

/// `username:password` or `hash:password`
fn cracked_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^\s:]+):(.+)$").unwrap())
}

/// `--show` format: `username:password:uid:gid:gecos:home:shell`
fn show_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^([^:]+):([^:]+):\d*:\d*:").unwrap())
}

/// `Loaded 5 password hashes with 5 different salts (bcrypt [Blowfish ...])`
fn hash_type_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"(?i)Loaded \d+ password hash(?:es)?(?: with \d+ different salts)? \(([^)\[]+)")
            .unwrap()
    })
}

fn skip_patterns() -> &'static Vec<Regex> {
    static RES: OnceLock<Vec<Regex>> = OnceLock::new();
    RES.get_or_init(|| {
        [
            r"(?i)^Using default input encoding",
            r"(?i)^Loaded \d+ password",
            r"(?i)^Will run \d+ OpenMP",
            r"(?i)^Press 'q' or Ctrl-C",
            r"(?i)^Session ",
            r"(?i)^\d+g \d+:",
            r"(?i)^Warning:",
            r"(?i)^Note:",
            r"(?i)^Proceeding with",
            r"(?i)^Cost \d+ ",
            r"(?i)^\d+ password hash",
        ]
        .iter()
        .map(|p| Regex::new(p).unwrap())
        .collect()
    })
}

const HASH_TYPE_MAP: &[(&str, &str)] = &[
    ("raw-md5", "md5"),
    ("md5", "md5"),
    ("raw-sha1", "sha1"),
    ("sha1", "sha1"),
    ("raw-sha256", "sha256"),
    ("sha256", "sha256"),
    ("raw-sha512", "sha512"),
    ("sha512", "sha512"),
    ("bcrypt", "bcrypt"),
    ("blowfish", "bcrypt"),
    ("nt", "ntlm"),
    ("ntlm", "ntlm"),
    ("lm", "lm"),
    ("lanman", "lm"),
    ("mysql", "mysql"),
    ("mysql-sha1", "mysql"),
    ("postgres", "postgres_md5"),
    ("mssql", "mssql"),
    ("oracle", "oracle"),
    ("krb5", "kerberos"),
    ("kerberos", "kerberos"),
];

pub struct JohnParser;

impl Parser for JohnParser {
    fn tool_name(&self) -> &'static str {
        "john"
    }

    fn parse(&self, output: &str, _job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();
        let hash_type = detect_hash_type(output);
        let mut seen = HashSet::new();

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() || should_skip(line) {
                continue;
            }
            parse_credential_line(line, &mut result, &mut seen, hash_type.as_deref());
        }

        tracing::debug!(
            credentials = result.credentials.len(),
            "john parsing complete"
        );
        result
    }
}

fn detect_hash_type(output: &str) -> Option<String> {
    let caps = hash_type_regex().captures(output)?;
    let format_name = caps[1].trim().to_lowercase();

    if let Some((_, mapped)) = HASH_TYPE_MAP.iter().find(|(k, _)| *k == format_name) {
        return Some(mapped.to_string());
    }
    if let Some((_, mapped)) = HASH_TYPE_MAP
        .iter()
        .find(|(k, _)| format_name.contains(k) || k.contains(&format_name))
    {
        return Some(mapped.to_string());
    }
    Some(format_name)
}

fn should_skip(line: &str) -> bool {
    skip_patterns().iter().any(|p| p.is_match(line))
}

fn parse_credential_line(
    line: &str,
    result: &mut ParseOutput,
    seen: &mut HashSet<String>,
    hash_type: Option<&str>,
) {
    if let Some(caps) = show_regex().captures(line) {
        add_credential(result, seen, &caps[1], &caps[2], hash_type);
        return;
    }

    if let Some(caps) = cracked_regex().captures(line) {
        let identifier = caps[1].to_string();
        let password = caps[2].to_string();

        // A "$..." password means the line split inside a crypt hash
        if password.starts_with('$') || password.len() > 100 {
            return;
        }
        add_credential(result, seen, &identifier, &password, hash_type);
    }
}

fn add_credential(
    result: &mut ParseOutput,
    seen: &mut HashSet<String>,
    identifier: &str,
    password: &str,
    hash_type: Option<&str>,
) {
    let cred_key = format!("{identifier}:{password}");
    if !seen.insert(cred_key) {
        return;
    }

    let is_hash_identifier = looks_like_hash(identifier);

    result.credentials.push(ParsedCredential {
        username: (!is_hash_identifier).then(|| identifier.to_string()),
        password: Some(password.to_string()),
        hash_value: is_hash_identifier.then(|| identifier.to_string()),
        hash_type: hash_type.map(str::to_string),
        credential_type: CredentialType::Hash,
        metadata: json!({
            "source": "john",
            "original_identifier": identifier,
        }),
        ..Default::default()
    });

    result.results.push(ParsedFinding {
        raw_data: Some(format!("{identifier}:{password}")),
        severity: Some(Severity::High),
        ..ParsedFinding::new(
            ResultType::Credential,
            json!({
                "identifier": identifier,
                "password": password,
                "hash_type": hash_type,
            }),
        )
    });
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "john", json!({}))
    }

    #[test]
    fn test_cracked_lines_with_status_noise() {
        let output = "\
Using default input encoding: UTF-8
Loaded 2 password hashes with no different salts (Raw-MD5 [MD5 256/256 AVX2 8x3])
Will run 8 OpenMP threads
Press 'q' or Ctrl-C to abort, almost any other key for status
admin:password123
0g 0:00:00:01 0.00% (ETA: never)
svc_backup:Summer2024!
Session completed";

        let out = JohnParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 2);
        assert_eq!(out.credentials[0].username.as_deref(), Some("admin"));
        assert_eq!(out.credentials[0].password.as_deref(), Some("password123"));
        assert_eq!(out.credentials[0].hash_type.as_deref(), Some("md5"));
    }

    #[test]
    fn test_hash_identifier_detected() {
        let output = "5f4dcc3b5aa765d61d8327deb882cf99:password";
        let out = JohnParser.parse(output, &job());
        let cred = &out.credentials[0];
        assert!(cred.username.is_none());
        assert_eq!(
            cred.hash_value.as_deref(),
            Some("5f4dcc3b5aa765d61d8327deb882cf99")
        );
    }

    #[test]
    fn test_show_format() {
        let output = "root:toor:0:0:root:/root:/bin/bash";
        let out = JohnParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 1);
        assert_eq!(out.credentials[0].username.as_deref(), Some("root"));
        assert_eq!(out.credentials[0].password.as_deref(), Some("toor"));
    }

    #[test]
    fn test_crypt_hash_line_not_misparsed() {
        // Splitting at the first colon of a crypt hash must not produce a
        // bogus credential
        let output = "user:$6$rounds=5000$salt$hashhashhash";
        let out = JohnParser.parse(output, &job());
        assert!(out.credentials.is_empty());
    }

    #[test]
    fn test_bcrypt_format_detection() {
        let output = "Loaded 5 password hashes with 5 different salts (bcrypt [Blowfish 32/64 X3])\nadmin:hunter2";
        let out = JohnParser.parse(output, &job());
        assert_eq!(out.credentials[0].hash_type.as_deref(), Some("bcrypt"));
    }

    #[test]
    fn test_duplicates_collapsed() {
        let output = "admin:x\nadmin:x";
        let out = JohnParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 1);
    }
}
