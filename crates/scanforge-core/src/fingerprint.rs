// Deterministic fingerprints for entity deduplication

use sha2::{Digest, Sha256};

/// Number of hex characters kept from the SHA-256 digest.
const FINGERPRINT_LEN: usize = 32;

/// Compute a deduplication fingerprint from identifying fields.
///
/// Fields are joined with `:` in the order given and hashed with SHA-256;
/// the first 32 hex characters of the digest are the fingerprint. Callers
/// pass an empty string for absent optional fields so that equal identities
/// always produce equal fingerprints.
pub fn fingerprint<S: AsRef<str>>(parts: &[S]) -> String {
    let joined = parts
        .iter()
        .map(|p| p.as_ref())
        .collect::<Vec<_>>()
        .join(":");
    let digest = Sha256::digest(joined.as_bytes());
    let mut hexed = hex::encode(digest);
    hexed.truncate(FINGERPRINT_LEN);
    hexed
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_deterministic() {
        let a = fingerprint(&["project-1", "host", "192.168.1.1"]);
        let b = fingerprint(&["project-1", "host", "192.168.1.1"]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_fingerprint_length() {
        let fp = fingerprint(&["anything"]);
        assert_eq!(fp.len(), 32);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_fingerprint_differs_on_any_field() {
        let base = fingerprint(&["p", "title", "tpl", "asset"]);
        assert_ne!(base, fingerprint(&["p", "title", "tpl", "other"]));
        assert_ne!(base, fingerprint(&["p", "title", "", "asset"]));
    }

    #[test]
    fn test_semantically_equal_entities_share_fingerprint() {
        // Same identifying fields built from different owned strings
        let a = fingerprint(&[String::from("p"), String::from("x")]);
        let b = fingerprint(&["p".to_string(), "x".to_string()]);
        assert_eq!(a, b);
    }
}
