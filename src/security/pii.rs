//! PII protection: one-way hashing for identifiers, AES-256-GCM for PANs.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use tracing::{error, Span};

use crate::error::PiiError;
use crate::logging::LogContext;
use crate::observability::metrics;
use crate::security::key_provider::{EncryptionKey, KeyProvider};

const NONCE_LEN: usize = 12;
const TAG_LEN: usize = 16;

pub struct PiiProtector {
    cipher: Aes256Gcm,
    key_fingerprint: String,
    span: Span,
}

impl std::fmt::Debug for PiiProtector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PiiProtector")
            .field("key_fingerprint", &self.key_fingerprint)
            .finish()
    }
}

impl PiiProtector {
    /// Protector keyed by whatever the provider resolves.
    pub fn new(keys: &KeyProvider, log: &LogContext) -> Self {
        Self::with_key(&keys.resolve().key, log)
    }

    pub fn with_key(key: &EncryptionKey, log: &LogContext) -> Self {
        Self {
            cipher: Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key.as_bytes())),
            key_fingerprint: key.fingerprint(),
            span: log.component("pii"),
        }
    }

    pub fn key_fingerprint(&self) -> &str {
        &self.key_fingerprint
    }

    /// SHA-256 of the trimmed, lowercased value as 64 lowercase hex chars.
    ///
    /// Blank input yields an empty string; the caller decides whether that
    /// is fatal.
    pub fn hash_identifier(&self, value: &str) -> String {
        let normalized = value.trim().to_lowercase();
        if normalized.is_empty() {
            self.span.in_scope(|| error!("Attempted to hash an empty identifier"));
            return String::new();
        }
        hex::encode(Sha256::digest(normalized.as_bytes()))
    }

    /// Encrypt to URL-safe base64 of `nonce || ciphertext`.
    pub fn encrypt(&self, value: &str) -> Result<String, PiiError> {
        if value.is_empty() {
            self.span.in_scope(|| error!("Encryption rejected: value is empty"));
            metrics::pii::failed("encrypt");
            return Err(PiiError::InvalidInput("value to encrypt is empty".to_string()));
        }

        let mut nonce = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let ciphertext = self
            .cipher
            .encrypt(Nonce::from_slice(&nonce), value.as_bytes())
            .map_err(|e| {
                self.span.in_scope(|| error!(error = %e, "Encryption failed"));
                metrics::pii::failed("encrypt");
                PiiError::EncryptionFailure(e.to_string())
            })?;

        let mut token = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        token.extend_from_slice(&nonce);
        token.extend_from_slice(&ciphertext);
        metrics::pii::encrypted();
        Ok(URL_SAFE_NO_PAD.encode(token))
    }

    /// Inverse of [`PiiProtector::encrypt`] under the same key.
    pub fn decrypt(&self, token: &str) -> Result<String, PiiError> {
        let fail = |reason: String| {
            self.span.in_scope(|| error!(reason = %reason, "Decryption failed"));
            metrics::pii::failed("decrypt");
            PiiError::DecryptionFailure(reason)
        };

        let raw = URL_SAFE_NO_PAD
            .decode(token.trim())
            .map_err(|e| fail(format!("token is not valid base64: {}", e)))?;
        if raw.len() < NONCE_LEN + TAG_LEN {
            return Err(fail(format!("token too short ({} bytes)", raw.len())));
        }

        let (nonce, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce), ciphertext)
            .map_err(|_| fail("authentication failed: wrong key or corrupted token".to_string()))?;

        String::from_utf8(plaintext).map_err(|_| fail("plaintext is not UTF-8".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn protector() -> PiiProtector {
        PiiProtector::with_key(&EncryptionKey::generate(), &LogContext::disabled())
    }

    #[test]
    fn test_pan_encryption_is_reversible() {
        let sec = protector();
        let original_pan = "4111222233334444";
        let encrypted = sec.encrypt(original_pan).unwrap();
        assert_ne!(encrypted, original_pan);
        assert_eq!(sec.decrypt(&encrypted).unwrap(), original_pan);
    }

    #[test]
    fn test_round_trip_for_varied_inputs() {
        let sec = protector();
        let long = "9".repeat(512);
        for input in ["1", " padded ", "ñandú-💳", "4111 2222 3333 4444", long.as_str()] {
            let token = sec.encrypt(input).unwrap();
            assert_ne!(token, input);
            assert!(token.chars().all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
            assert_eq!(sec.decrypt(&token).unwrap(), input);
        }
    }

    #[test]
    fn test_encrypting_twice_gives_distinct_tokens() {
        let sec = protector();
        assert_ne!(sec.encrypt("4111").unwrap(), sec.encrypt("4111").unwrap());
    }

    #[test]
    fn test_empty_value_is_invalid_input() {
        let err = protector().encrypt("").unwrap_err();
        assert!(matches!(err, PiiError::InvalidInput(_)));
    }

    #[test]
    fn test_decrypt_under_other_key_fails() {
        let token = protector().encrypt("4111222233334444").unwrap();
        let err = protector().decrypt(&token).unwrap_err();
        assert!(matches!(err, PiiError::DecryptionFailure(_)));
    }

    #[test]
    fn test_decrypt_corrupted_token_fails() {
        let sec = protector();
        let mut token = sec.encrypt("4111222233334444").unwrap();
        let last = token.pop().unwrap();
        token.push(if last == 'A' { 'B' } else { 'A' });
        assert!(matches!(sec.decrypt(&token), Err(PiiError::DecryptionFailure(_))));
        assert!(matches!(sec.decrypt("not base64!"), Err(PiiError::DecryptionFailure(_))));
        assert!(matches!(sec.decrypt("AAAA"), Err(PiiError::DecryptionFailure(_))));
    }

    #[test]
    fn test_email_hashing_is_consistent() {
        let sec = protector();
        let hash1 = sec.hash_identifier("test@bank.com");
        let hash2 = sec.hash_identifier("test@bank.com");
        assert_eq!(hash1, hash2);
        assert_eq!(hash1.len(), 64);
    }

    #[test]
    fn test_hash_is_key_independent_and_normalized() {
        let a = protector().hash_identifier("  Test@Bank.com ");
        let b = protector().hash_identifier("test@bank.com");
        assert_eq!(a, b);
        // sha256("test@bank.com")
        assert_eq!(a, hex::encode(Sha256::digest(b"test@bank.com")));
    }

    #[test]
    fn test_blank_identifier_hashes_to_empty() {
        assert_eq!(protector().hash_identifier("   "), "");
    }
}
