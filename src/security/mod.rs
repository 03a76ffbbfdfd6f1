// PII protection and the key it is keyed by

pub mod key_provider;
pub mod pii;

pub use key_provider::{EncryptionKey, KeyProvider, KeySource, ResolvedKey};
pub use pii::PiiProtector;
