//! Hashcat output parser (potfile / `--show` text plus JSON status lines).

use serde_json::{json, Value};

use scanforge_core::model::{CredentialType, Job};

use crate::output::{ParseOutput, ParsedCredential};
use crate::util::looks_like_hash;
use crate::Parser;

const MODE_NAMES: &[(&str, &str)] = &[
    ("0", "MD5"),
    ("100", "SHA1"),
    ("1400", "SHA256"),
    ("1700", "SHA512"),
    ("1000", "NTLM"),
    ("3000", "LM"),
    ("1800", "SHA512crypt"),
    ("500", "MD5crypt"),
    ("1500", "DES"),
    ("5500", "NetNTLMv1"),
    ("5600", "NetNTLMv2"),
    ("13100", "Kerberos 5 TGS-REP"),
    ("18200", "Kerberos 5 AS-REP"),
    ("7500", "Kerberos 5 AS-REQ"),
    ("22000", "WPA-PBKDF2-PMKID+EAPOL"),
    ("2500", "WPA-EAPOL-PBKDF2"),
    ("11600", "7-Zip"),
    ("13400", "KeePass"),
    ("16800", "WPA-PMKID-PBKDF2"),
    ("3200", "bcrypt"),
];

const SKIP_WORDS: &[&str] = &[
    "session",
    "status",
    "speed",
    "progress",
    "time",
    "recovered",
    "hashtype",
    "candidates",
    "hardware",
];

pub struct HashcatParser;

impl Parser for HashcatParser {
    fn tool_name(&self) -> &'static str {
        "hashcat"
    }

    fn parse(&self, output: &str, job: &Job) -> ParseOutput {
        let mut result = ParseOutput::new();
        let mode_hash_type = hash_type_from_job(job);

        for line in output.lines() {
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            // --status-json emits progress objects; they carry no cracked
            // passwords, so note unparseable ones and move on.
            if line.starts_with('{') {
                if serde_json::from_str::<Value>(line).is_err() {
                    result.errors.push("JSON parse error in status line".to_string());
                }
                continue;
            }

            let lower = line.to_lowercase();
            if SKIP_WORDS.iter().any(|w| lower.contains(w)) {
                continue;
            }

            if let Some(cred) = extract_credential(line, mode_hash_type.as_deref()) {
                let duplicate = result.credentials.iter().any(|existing| {
                    existing.username == cred.username
                        && existing.password == cred.password
                        && existing.hash_value == cred.hash_value
                });
                if !duplicate {
                    result.credentials.push(cred);
                }
            }
        }

        tracing::debug!(
            credentials = result.credentials.len(),
            "hashcat parsing complete"
        );
        result
    }
}

fn hash_type_from_job(job: &Job) -> Option<String> {
    let mode = job
        .parameters
        .get("mode")
        .or_else(|| job.parameters.get("hash_type"))?;
    let mode = match mode {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        _ => return None,
    };
    Some(
        MODE_NAMES
            .iter()
            .find(|(m, _)| *m == mode)
            .map(|(_, name)| name.to_string())
            .unwrap_or_else(|| format!("Mode {mode}")),
    )
}

fn looks_like_username(s: &str) -> bool {
    if s.is_empty() || s.starts_with('$') || s.len() > 64 {
        return false;
    }
    if s.len() >= 32 && s.chars().all(|c| c.is_ascii_hexdigit()) {
        return false;
    }
    s.chars()
        .all(|c| c.is_alphanumeric() || matches!(c, '_' | '-' | '@' | '.' | '\\'))
}

/// Extract a credential from `hash:password`, `username:hash:password` or
/// longer colon-separated forms where the hash itself contains colons.
fn extract_credential(line: &str, mode_hash_type: Option<&str>) -> Option<ParsedCredential> {
    let parts: Vec<&str> = line.split(':').collect();
    if parts.len() < 2 {
        return None;
    }

    let mut username: Option<String> = None;
    let hash_value: String;
    let password: String;

    match parts.len() {
        2 => {
            hash_value = parts[0].to_string();
            password = parts[1].to_string();
        }
        3 => {
            if looks_like_username(parts[0]) && !looks_like_hash(parts[0]) {
                username = Some(parts[0].to_string());
                hash_value = parts[1].to_string();
                password = parts[2].to_string();
            } else {
                // Hash formats like MD5(Unix) embed a colon
                hash_value = format!("{}:{}", parts[0], parts[1]);
                password = parts[2].to_string();
            }
        }
        _ => {
            if looks_like_username(parts[0]) {
                username = Some(parts[0].to_string());
                password = parts[parts.len() - 1].to_string();
                hash_value = parts[1..parts.len() - 1].join(":");
            } else {
                password = parts[parts.len() - 1].to_string();
                hash_value = parts[..parts.len() - 1].join(":");
            }
        }
    }

    if password.is_empty() || looks_like_hash(&password) {
        return None;
    }

    // DOMAIN\user and user@domain both carry the domain
    let mut domain = None;
    let username = username.map(|u| {
        if let Some((name, dom)) = u.split_once('@') {
            domain = Some(dom.to_string());
            name.to_string()
        } else if let Some((dom, name)) = u.split_once('\\') {
            domain = Some(dom.to_string());
            name.to_string()
        } else {
            u
        }
    });

    let hash_type = mode_hash_type
        .map(str::to_string)
        .or_else(|| detect_hash_type(&hash_value));

    Some(ParsedCredential {
        username,
        password: Some(password),
        hash_value: Some(hash_value),
        hash_type,
        domain,
        credential_type: CredentialType::Password,
        metadata: json!({
            "source": "hashcat",
            "raw_line": line.chars().take(500).collect::<String>(),
        }),
        ..Default::default()
    })
}

fn detect_hash_type(hash_value: &str) -> Option<String> {
    if hash_value.is_empty() {
        return None;
    }
    let name = if hash_value.starts_with("$1$") {
        "MD5crypt"
    } else if hash_value.starts_with("$2") {
        "bcrypt"
    } else if hash_value.starts_with("$5$") {
        "SHA256crypt"
    } else if hash_value.starts_with("$6$") {
        "SHA512crypt"
    } else if hash_value.starts_with("$apr1$") {
        "Apache MD5"
    } else if hash_value.len() == 32 && hash_value.chars().all(|c| c.is_ascii_hexdigit()) {
        "MD5/NTLM"
    } else if hash_value.len() == 40 && hash_value.chars().all(|c| c.is_ascii_hexdigit()) {
        "SHA1"
    } else if hash_value.len() == 64 && hash_value.chars().all(|c| c.is_ascii_hexdigit()) {
        "SHA256"
    } else {
        return None;
    };
    Some(name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    fn job() -> Job {
        Job::new(Uuid::now_v7(), "hashcat", json!({}))
    }

    #[test]
    fn test_potfile_lines() {
        let output = "5f4dcc3b5aa765d61d8327deb882cf99:password\n\
                      8846f7eaee8fb117ad06bdd830b7586c:trustno1";
        let out = HashcatParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 2);
        assert_eq!(out.credentials[0].password.as_deref(), Some("password"));
        assert_eq!(out.credentials[0].hash_type.as_deref(), Some("MD5/NTLM"));
    }

    #[test]
    fn test_username_hash_password() {
        let output = "jsmith:5f4dcc3b5aa765d61d8327deb882cf99:password";
        let out = HashcatParser.parse(output, &job());
        let cred = &out.credentials[0];
        assert_eq!(cred.username.as_deref(), Some("jsmith"));
        assert_eq!(
            cred.hash_value.as_deref(),
            Some("5f4dcc3b5aa765d61d8327deb882cf99")
        );
    }

    #[test]
    fn test_domain_extraction() {
        let output = r"CORP\alice:8846f7eaee8fb117ad06bdd830b7586c:Winter2024";
        let out = HashcatParser.parse(output, &job());
        let cred = &out.credentials[0];
        assert_eq!(cred.username.as_deref(), Some("alice"));
        assert_eq!(cred.domain.as_deref(), Some("CORP"));
    }

    #[test]
    fn test_mode_from_job_parameters() {
        let job = Job::new(Uuid::now_v7(), "hashcat", json!({"mode": 1000}));
        let output = "8846f7eaee8fb117ad06bdd830b7586c:letmein";
        let out = HashcatParser.parse(output, &job);
        assert_eq!(out.credentials[0].hash_type.as_deref(), Some("NTLM"));
    }

    #[test]
    fn test_status_lines_skipped() {
        let output = "Session..........: hashcat\n\
                      Status...........: Cracked\n\
                      Speed.#1.........: 1234 H/s\n\
                      5f4dcc3b5aa765d61d8327deb882cf99:password";
        let out = HashcatParser.parse(output, &job());
        assert_eq!(out.credentials.len(), 1);
    }

    #[test]
    fn test_hashlike_password_rejected() {
        // hash:hash means the potfile line had no cracked plaintext
        let output = "5f4dcc3b5aa765d61d8327deb882cf99:5f4dcc3b5aa765d61d8327deb882cf99";
        let out = HashcatParser.parse(output, &job());
        assert!(out.credentials.is_empty());
    }
}
