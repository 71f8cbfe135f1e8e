//! Credential field encryption with key rotation support.
//!
//! AES-256-GCM with versioned keys. New ciphertext always uses the primary
//! key; previous keys stay available for decryption so key rotation never
//! strands stored secrets. Payloads are compact strings of the form
//! `v1:<key_id>:<nonce_b64>:<ciphertext_b64>`, suitable for TEXT columns.

use std::collections::HashMap;
use std::sync::Arc;

use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Nonce,
};
use anyhow::{Context, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use rand::RngCore;

const NONCE_SIZE: usize = 12;
const KEY_SIZE: usize = 32;
const PAYLOAD_VERSION: &str = "v1";

#[derive(Clone)]
struct VersionedKey {
    id: String,
    cipher: Aes256Gcm,
}

/// Encryption service for credential plaintext.
/// Thread-safe and designed for concurrent use.
#[derive(Clone)]
pub struct EncryptionService {
    /// Key used for new encryptions
    primary_key: Arc<VersionedKey>,
    /// All keys (including primary) available for decryption
    keys: Arc<HashMap<String, Aes256Gcm>>,
}

impl EncryptionService {
    /// Create from versioned key strings in format "key_id:base64_key".
    /// The first key encrypts; all keys decrypt.
    pub fn new(primary_key: &str, previous_keys: &[&str]) -> Result<Self> {
        let (primary_id, primary_cipher) = Self::parse_versioned_key(primary_key)?;

        let mut keys = HashMap::new();
        keys.insert(primary_id.clone(), primary_cipher.clone());

        for key_str in previous_keys {
            let (id, cipher) = Self::parse_versioned_key(key_str)?;
            if keys.contains_key(&id) {
                anyhow::bail!("Duplicate key ID: {}", id);
            }
            keys.insert(id, cipher);
        }

        Ok(Self {
            primary_key: Arc::new(VersionedKey {
                id: primary_id,
                cipher: primary_cipher,
            }),
            keys: Arc::new(keys),
        })
    }

    /// Create from environment variables.
    /// - SECRETS_ENCRYPTION_KEY: primary key (required)
    /// - SECRETS_ENCRYPTION_KEY_PREVIOUS: previous key for rotation (optional)
    pub fn from_env() -> Result<Self> {
        let primary = std::env::var("SECRETS_ENCRYPTION_KEY")
            .context("SECRETS_ENCRYPTION_KEY environment variable not set")?;

        let previous: Vec<String> = std::env::var("SECRETS_ENCRYPTION_KEY_PREVIOUS")
            .ok()
            .into_iter()
            .collect();
        let previous_refs: Vec<&str> = previous.iter().map(|s| s.as_str()).collect();

        Self::new(&primary, &previous_refs)
    }

    fn parse_versioned_key(key_str: &str) -> Result<(String, Aes256Gcm)> {
        let Some((key_id, encoded)) = key_str.split_once(':') else {
            anyhow::bail!("Invalid key format, expected 'key_id:base64_key'");
        };

        let key_bytes = BASE64
            .decode(encoded)
            .context("Failed to decode key from base64")?;

        if key_bytes.len() != KEY_SIZE {
            anyhow::bail!(
                "Key must be {} bytes, got {} bytes for key_id '{}'",
                KEY_SIZE,
                key_bytes.len(),
                key_id
            );
        }

        let cipher = Aes256Gcm::new_from_slice(&key_bytes)
            .map_err(|e| anyhow::anyhow!("Failed to create cipher for key '{}': {}", key_id, e))?;

        Ok((key_id.to_string(), cipher))
    }

    /// Encrypt a plaintext string into a versioned payload string.
    pub fn encrypt(&self, plaintext: &str) -> Result<String> {
        let mut nonce_bytes = [0u8; NONCE_SIZE];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .primary_key
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|e| anyhow::anyhow!("Encryption failed: {}", e))?;

        Ok(format!(
            "{}:{}:{}:{}",
            PAYLOAD_VERSION,
            self.primary_key.id,
            BASE64.encode(nonce_bytes),
            BASE64.encode(&ciphertext)
        ))
    }

    /// Decrypt a payload produced by [`encrypt`](Self::encrypt), using the
    /// key the payload names.
    pub fn decrypt(&self, payload: &str) -> Result<String> {
        let parts: Vec<&str> = payload.splitn(4, ':').collect();
        if parts.len() != 4 {
            anyhow::bail!("Malformed encrypted payload");
        }
        let (version, key_id, nonce_b64, ct_b64) = (parts[0], parts[1], parts[2], parts[3]);

        if version != PAYLOAD_VERSION {
            anyhow::bail!("Unsupported payload version: {}", version);
        }

        let cipher = self
            .keys
            .get(key_id)
            .ok_or_else(|| anyhow::anyhow!("Unknown key_id '{}'", key_id))?;

        let nonce_bytes = BASE64.decode(nonce_b64).context("Failed to decode nonce")?;
        if nonce_bytes.len() != NONCE_SIZE {
            anyhow::bail!("Invalid nonce length");
        }
        let ciphertext = BASE64
            .decode(ct_b64)
            .context("Failed to decode ciphertext")?;

        let plaintext = cipher
            .decrypt(Nonce::from_slice(&nonce_bytes), ciphertext.as_ref())
            .map_err(|e| anyhow::anyhow!("Decryption failed (data may be corrupted): {}", e))?;

        String::from_utf8(plaintext).context("Decrypted data is not valid UTF-8")
    }

    /// The key_id a payload was encrypted with, without decrypting.
    pub fn payload_key_id(payload: &str) -> Result<&str> {
        let mut parts = payload.splitn(4, ':');
        let _version = parts.next();
        parts
            .next()
            .ok_or_else(|| anyhow::anyhow!("Malformed encrypted payload"))
    }

    /// Whether a payload uses the current primary key.
    pub fn is_current_key(&self, payload: &str) -> Result<bool> {
        Ok(Self::payload_key_id(payload)? == self.primary_key.id)
    }

    /// Re-encrypt a payload with the primary key. Returns None when the
    /// payload is already current.
    pub fn reencrypt(&self, payload: &str) -> Result<Option<String>> {
        if self.is_current_key(payload)? {
            return Ok(None);
        }
        let plaintext = self.decrypt(payload)?;
        Ok(Some(self.encrypt(&plaintext)?))
    }

    pub fn primary_key_id(&self) -> &str {
        &self.primary_key.id
    }
}

/// Generate a new random encryption key in versioned format.
/// Returns format: "key_id:base64_key"
pub fn generate_encryption_key(key_id: &str) -> String {
    let mut key = [0u8; KEY_SIZE];
    rand::thread_rng().fill_bytes(&mut key);
    format!("{}:{}", key_id, BASE64.encode(key))
}
