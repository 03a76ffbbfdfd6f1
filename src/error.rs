use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Pipeline stage, used to attribute failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Stage {
    Schema,
    Validation,
    Quarantine,
    Silver,
    Gold,
}

impl Stage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Schema => "schema",
            Stage::Validation => "validation",
            Stage::Quarantine => "quarantine",
            Stage::Silver => "silver",
            Stage::Gold => "gold",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Persisted data tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tier {
    Quarantine,
    Silver,
    Gold,
}

impl fmt::Display for Tier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Tier::Quarantine => "quarantine",
            Tier::Silver => "silver",
            Tier::Gold => "gold",
        };
        f.write_str(name)
    }
}

/// Failures hashing, encrypting or decrypting a single value.
#[derive(Error, Debug)]
pub enum PiiError {
    #[error("invalid input for PII processing: {0}")]
    InvalidInput(String),

    #[error("encryption failed: {0}")]
    EncryptionFailure(String),

    #[error("decryption failed: {0}")]
    DecryptionFailure(String),
}

/// Malformed key material from a key source.
#[derive(Error, Debug, PartialEq)]
pub enum KeyError {
    #[error("key material is empty")]
    Empty,

    #[error("key must decode to 32 bytes, got {0}")]
    WrongLength(usize),

    #[error("key material is neither base64 nor hex")]
    Undecodable,
}

#[derive(Error, Debug)]
pub enum PipelineError {
    #[error("schema mismatch: expected {expected:?}, got {actual:?}")]
    Structural {
        expected: Vec<String>,
        actual: Vec<String>,
    },

    #[error("quality validation failed; affected columns: {columns:?}")]
    QualityRejected { columns: Vec<String> },

    #[error("PII processing failed in {stage} stage for transaction '{transaction_id}': {source}")]
    PiiProcessing {
        stage: Stage,
        transaction_id: String,
        #[source]
        source: PiiError,
    },

    #[error("{stage} stage failed: {message}")]
    Stage { stage: Stage, message: String },

    #[error("failed to persist {tier} tier at {}: {source}", location.display())]
    Persistence {
        tier: Tier,
        location: PathBuf,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),
}

impl PipelineError {
    pub fn persistence(
        tier: Tier,
        location: impl Into<PathBuf>,
        source: impl Into<Box<dyn std::error::Error + Send + Sync>>,
    ) -> Self {
        PipelineError::Persistence {
            tier,
            location: location.into(),
            source: source.into(),
        }
    }

    pub fn stage(stage: Stage, message: impl Into<String>) -> Self {
        PipelineError::Stage {
            stage,
            message: message.into(),
        }
    }

    /// The stage a failure is attributed to, when it has one.
    pub fn failed_stage(&self) -> Option<Stage> {
        match self {
            PipelineError::Structural { .. } => Some(Stage::Schema),
            PipelineError::QualityRejected { .. } => Some(Stage::Validation),
            PipelineError::PiiProcessing { stage, .. } | PipelineError::Stage { stage, .. } => {
                Some(*stage)
            }
            PipelineError::Persistence { tier, .. } => Some(match tier {
                Tier::Quarantine => Stage::Quarantine,
                Tier::Silver => Stage::Silver,
                Tier::Gold => Stage::Gold,
            }),
            _ => None,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pii_error_names_stage_and_transaction() {
        let err = PipelineError::PiiProcessing {
            stage: Stage::Silver,
            transaction_id: "tx-1".to_string(),
            source: PiiError::InvalidInput("empty PAN".to_string()),
        };
        let message = err.to_string();
        assert!(message.contains("silver"));
        assert!(message.contains("tx-1"));
        assert_eq!(err.failed_stage(), Some(Stage::Silver));
    }

    #[test]
    fn test_persistence_error_maps_tier_to_stage() {
        let err = PipelineError::persistence(
            Tier::Gold,
            "/tmp/gold",
            std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        );
        assert_eq!(err.failed_stage(), Some(Stage::Gold));
        assert!(err.to_string().contains("gold tier"));
    }
}
