//! Encryption key resolution.
//!
//! A [`KeyProvider`] walks an ordered list of [`KeySource`]s and keeps the
//! first key one of them yields. Resolution never fails: the chain always
//! ends in an ephemeral key, and the outcome is cached so every caller within
//! a run encrypts and decrypts under the same key.

use base64::engine::general_purpose::{STANDARD, STANDARD_NO_PAD, URL_SAFE, URL_SAFE_NO_PAD};
use base64::Engine;
use once_cell::sync::OnceCell;
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::{Digest, Sha256};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, info, warn, Span};

use crate::app::ports::SecretStore;
use crate::config::SecurityConfig;
use crate::error::KeyError;
use crate::logging::LogContext;
use crate::observability::metrics;

pub const KEY_LEN: usize = 32;

/// A 256-bit symmetric key.
#[derive(Clone, PartialEq, Eq)]
pub struct EncryptionKey([u8; KEY_LEN]);

impl fmt::Debug for EncryptionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("EncryptionKey").field(&"[REDACTED]").finish()
    }
}

impl EncryptionKey {
    /// 32 raw bytes are taken verbatim; anything else is read as key text.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KeyError> {
        if bytes.len() == KEY_LEN {
            let mut key = [0u8; KEY_LEN];
            key.copy_from_slice(bytes);
            return Ok(Self(key));
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::from_text(text),
            Err(_) => Err(KeyError::WrongLength(bytes.len())),
        }
    }

    /// Decode key text: 64 hex characters, or base64 in any common alphabet
    /// and padding, decoding to exactly 32 bytes.
    pub fn from_text(text: &str) -> Result<Self, KeyError> {
        let text = text.trim();
        if text.is_empty() {
            return Err(KeyError::Empty);
        }

        if text.len() == KEY_LEN * 2 && text.chars().all(|c| c.is_ascii_hexdigit()) {
            let decoded = hex::decode(text).map_err(|_| KeyError::Undecodable)?;
            return Self::from_decoded(decoded);
        }

        let decoded = URL_SAFE
            .decode(text)
            .or_else(|_| URL_SAFE_NO_PAD.decode(text))
            .or_else(|_| STANDARD.decode(text))
            .or_else(|_| STANDARD_NO_PAD.decode(text))
            .map_err(|_| KeyError::Undecodable)?;
        Self::from_decoded(decoded)
    }

    fn from_decoded(decoded: Vec<u8>) -> Result<Self, KeyError> {
        if decoded.len() != KEY_LEN {
            return Err(KeyError::WrongLength(decoded.len()));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&decoded);
        Ok(Self(key))
    }

    pub fn generate() -> Self {
        let mut key = [0u8; KEY_LEN];
        OsRng.fill_bytes(&mut key);
        Self(key)
    }

    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }

    /// URL-safe base64 text form, accepted back by [`EncryptionKey::from_text`].
    pub fn to_encoded(&self) -> String {
        URL_SAFE.encode(self.0)
    }

    /// Short, non-reversible identifier for audit logs.
    pub fn fingerprint(&self) -> String {
        let digest = Sha256::digest(self.0);
        hex::encode(&digest[..8])
    }
}

/// One place a key may come from. Tried in list order.
#[derive(Clone)]
pub enum KeySource {
    /// Caller-supplied key material.
    Explicit(Vec<u8>),
    /// A secret in an external store; the reference is read from `secret_ref_env`.
    RemoteSecret {
        store: Arc<dyn SecretStore>,
        secret_ref_env: String,
    },
    /// A `KEY_NAME=value` file; the first matching line wins.
    LocalFile { path: PathBuf, key_name: String },
    /// An environment variable.
    EnvVar { name: String },
    /// A freshly generated key. Data encrypted under it dies with the process.
    Ephemeral,
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::Explicit(_) => f.write_str("Explicit([REDACTED])"),
            KeySource::RemoteSecret { secret_ref_env, .. } => f
                .debug_struct("RemoteSecret")
                .field("secret_ref_env", secret_ref_env)
                .finish(),
            KeySource::LocalFile { path, key_name } => f
                .debug_struct("LocalFile")
                .field("path", path)
                .field("key_name", key_name)
                .finish(),
            KeySource::EnvVar { name } => f.debug_struct("EnvVar").field("name", name).finish(),
            KeySource::Ephemeral => f.write_str("Ephemeral"),
        }
    }
}

impl KeySource {
    pub fn label(&self) -> &'static str {
        match self {
            KeySource::Explicit(_) => "explicit",
            KeySource::RemoteSecret { .. } => "remote_secret",
            KeySource::LocalFile { .. } => "local_file",
            KeySource::EnvVar { .. } => "env_var",
            KeySource::Ephemeral => "ephemeral",
        }
    }

    /// `Ok(None)` when the source is simply not configured; `Err` when it is
    /// configured but could not produce a usable key.
    fn fetch(&self) -> Result<Option<EncryptionKey>, String> {
        match self {
            KeySource::Explicit(bytes) => EncryptionKey::from_bytes(bytes)
                .map(Some)
                .map_err(|e| e.to_string()),
            KeySource::RemoteSecret {
                store,
                secret_ref_env,
            } => {
                let secret_ref = match std::env::var(secret_ref_env) {
                    Ok(r) if !r.trim().is_empty() => r.trim().to_string(),
                    _ => return Ok(None),
                };
                let text = store
                    .access(&secret_ref)
                    .map_err(|e| format!("secret '{}' unavailable: {}", secret_ref, e))?;
                EncryptionKey::from_text(&text)
                    .map(Some)
                    .map_err(|e| format!("secret '{}' is not a usable key: {}", secret_ref, e))
            }
            KeySource::LocalFile { path, key_name } => {
                if !path.exists() {
                    return Ok(None);
                }
                let entries = dotenv::from_path_iter(path)
                    .map_err(|e| format!("cannot read {}: {}", path.display(), e))?;
                for entry in entries {
                    match entry {
                        Ok((name, value)) if name == *key_name => {
                            return EncryptionKey::from_text(value.trim())
                                .map(Some)
                                .map_err(|e| format!("{} in {}: {}", key_name, path.display(), e));
                        }
                        Ok(_) => {}
                        Err(e) => debug!(path = %path.display(), error = %e, "Skipping unparsable line"),
                    }
                }
                Ok(None)
            }
            KeySource::EnvVar { name } => match std::env::var(name) {
                Ok(value) if !value.trim().is_empty() => EncryptionKey::from_text(&value)
                    .map(Some)
                    .map_err(|e| format!("${}: {}", name, e)),
                _ => Ok(None),
            },
            KeySource::Ephemeral => Ok(Some(EncryptionKey::generate())),
        }
    }
}

/// The key a provider settled on and where it came from.
#[derive(Debug, Clone)]
pub struct ResolvedKey {
    pub key: EncryptionKey,
    pub source: &'static str,
}

pub struct KeyProvider {
    sources: Vec<KeySource>,
    resolved: OnceCell<ResolvedKey>,
    span: Span,
}

impl KeyProvider {
    pub fn new(sources: Vec<KeySource>, log: &LogContext) -> Self {
        Self {
            sources,
            resolved: OnceCell::new(),
            span: log.component("key_provider"),
        }
    }

    /// The standard chain: explicit key, remote secret, local secrets file,
    /// environment variable, ephemeral.
    pub fn from_settings(
        security: &SecurityConfig,
        explicit: Option<Vec<u8>>,
        secret_store: Option<Arc<dyn SecretStore>>,
        log: &LogContext,
    ) -> Self {
        let mut sources = Vec::new();
        if let Some(bytes) = explicit {
            sources.push(KeySource::Explicit(bytes));
        }
        if let Some(store) = secret_store {
            sources.push(KeySource::RemoteSecret {
                store,
                secret_ref_env: security.secret_ref_env.clone(),
            });
        }
        sources.push(KeySource::LocalFile {
            path: security.secrets_file.clone(),
            key_name: security.encryption_key_env.clone(),
        });
        sources.push(KeySource::EnvVar {
            name: security.encryption_key_env.clone(),
        });
        sources.push(KeySource::Ephemeral);
        Self::new(sources, log)
    }

    /// Resolve once; later calls return the same key.
    pub fn resolve(&self) -> &ResolvedKey {
        self.resolved.get_or_init(|| {
            let _enter = self.span.enter();
            self.resolve_uncached()
        })
    }

    fn resolve_uncached(&self) -> ResolvedKey {
        for source in &self.sources {
            match source.fetch() {
                Ok(Some(key)) => return Self::announce(key, source.label()),
                Ok(None) => debug!(source = source.label(), "Key source not configured"),
                Err(e) => warn!(source = source.label(), error = %e, "Key source failed, falling through"),
            }
        }
        // Sources lacking an ephemeral tail still resolve.
        Self::announce(EncryptionKey::generate(), KeySource::Ephemeral.label())
    }

    fn announce(key: EncryptionKey, source: &'static str) -> ResolvedKey {
        if source == "ephemeral" {
            warn!(
                source,
                fingerprint = %key.fingerprint(),
                "No persistent encryption key found; using an ephemeral key. Data encrypted in this run cannot be decrypted after exit"
            );
        } else {
            info!(source, fingerprint = %key.fingerprint(), "Encryption key resolved");
        }
        metrics::pii::key_resolved(source);
        ResolvedKey { key, source }
    }
}
