// Shared helpers for the parsers

use std::sync::OnceLock;

use regex::Regex;
use scanforge_core::model::Severity;

/// Cap applied to evidence/request/response bodies before storage.
pub const BODY_LIMIT: usize = 5000;

pub fn cve_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)CVE-\d{4}-\d{4,}").unwrap())
}

pub fn is_ipv4(host: &str) -> bool {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"^\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}$").unwrap());
    re.is_match(host)
}

/// Hostname part of a URL, without any port.
pub fn host_of_url(raw: &str) -> Option<String> {
    url::Url::parse(raw)
        .ok()
        .and_then(|u| u.host_str().map(str::to_string))
}

/// Truncate a body to [`BODY_LIMIT`], marking the cut.
pub fn truncate_body(body: &str) -> String {
    if body.len() > BODY_LIMIT {
        let mut end = BODY_LIMIT;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}\n... [truncated]", &body[..end])
    } else {
        body.to_string()
    }
}

/// Severity for a CVSS score, defaulting to medium when no score is known.
pub fn severity_for_cvss(score: Option<f64>) -> Severity {
    match score {
        Some(s) => Severity::from_cvss(s),
        None => Severity::Medium,
    }
}

/// Strip a leading UTF-8 BOM, required before XML parsing.
pub fn strip_bom(s: &str) -> &str {
    s.strip_prefix('\u{feff}').unwrap_or(s)
}

/// Remove HTML tags and decode the common entities.
pub fn strip_html(text: &str) -> String {
    static TAGS: OnceLock<Regex> = OnceLock::new();
    static SPACE: OnceLock<Regex> = OnceLock::new();
    let tags = TAGS.get_or_init(|| Regex::new(r"<[^>]+>").unwrap());
    let space = SPACE.get_or_init(|| Regex::new(r"\s+").unwrap());

    let clean = tags.replace_all(text, "");
    let clean = clean
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&nbsp;", " ")
        .replace("&amp;", "&");
    space.replace_all(&clean, " ").trim().to_string()
}

/// Whether a string looks like a raw hash (crypt `$type$` prefix or a
/// hex digest of a common length).
pub fn looks_like_hash(s: &str) -> bool {
    if s.is_empty() {
        return false;
    }
    static CRYPT: OnceLock<Regex> = OnceLock::new();
    let crypt = CRYPT.get_or_init(|| Regex::new(r"^\$[a-z0-9]+\$").unwrap());
    if crypt.is_match(s) {
        return true;
    }
    matches!(s.len(), 32 | 40 | 64 | 128) && s.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cve_regex_matches_long_ids() {
        let caps: Vec<&str> = cve_regex()
            .find_iter("fixed CVE-2021-44228 and cve-2014-0160, not CVE-12-1")
            .map(|m| m.as_str())
            .collect();
        assert_eq!(caps, vec!["CVE-2021-44228", "cve-2014-0160"]);
    }

    #[test]
    fn test_is_ipv4() {
        assert!(is_ipv4("192.168.1.1"));
        assert!(!is_ipv4("example.com"));
        assert!(!is_ipv4("192.168.1"));
    }

    #[test]
    fn test_host_of_url() {
        assert_eq!(
            host_of_url("http://example.com:8080/a/b").as_deref(),
            Some("example.com")
        );
        assert_eq!(host_of_url("not a url"), None);
    }

    #[test]
    fn test_truncate_marks_cut() {
        let long = "x".repeat(BODY_LIMIT + 10);
        let out = truncate_body(&long);
        assert!(out.ends_with("[truncated]"));
        assert!(truncate_body("short") == "short");
    }

    #[test]
    fn test_strip_html() {
        assert_eq!(
            strip_html("<p>SQL &amp; <b>injection</b></p>"),
            "SQL & injection"
        );
    }

    #[test]
    fn test_looks_like_hash() {
        assert!(looks_like_hash("5f4dcc3b5aa765d61d8327deb882cf99")); // md5
        assert!(looks_like_hash("$6$rounds=5000$salt$abc"));
        assert!(!looks_like_hash("password123"));
    }
}
