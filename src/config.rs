use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};

use crate::domain::EXPECTED_COLUMNS;
use crate::error::{PipelineError, Result};

pub const SETTINGS_FILE_ENV: &str = "BANKING_SETTINGS_FILE";
pub const DEFAULT_SETTINGS_PATH: &str = "config/settings.toml";

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    pub paths: PathsConfig,
    #[serde(default)]
    pub processing: ProcessingConfig,
    pub security: SecurityConfig,
    pub quality: QualityConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsConfig {
    pub raw: PathBuf,
    pub silver: PathBuf,
    pub gold: PathBuf,
    pub quarantine: PathBuf,
    pub logs: PathBuf,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ProcessingConfig {
    pub app_name: String,
    /// Worker threads for row-parallel stages; 0 lets rayon decide.
    #[serde(default)]
    pub worker_threads: usize,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self {
            app_name: "banking-pipeline".to_string(),
            worker_threads: 0,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// Environment variable holding the fallback encryption key.
    pub encryption_key_env: String,
    /// Environment variable holding the remote secret reference.
    #[serde(default = "default_secret_ref_env")]
    pub secret_ref_env: String,
    #[serde(default = "default_secrets_file")]
    pub secrets_file: PathBuf,
    #[serde(default)]
    pub secret_store: Option<SecretStoreConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SecretStoreConfig {
    #[serde(default = "default_secret_store_url")]
    pub base_url: String,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default = "default_secret_token_env")]
    pub token_env: String,
    #[serde(default = "default_secret_timeout")]
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum QualityMode {
    /// Forward valid rows, side-line the rest.
    #[default]
    Quarantine,
    /// Reject the whole batch on any rule failure.
    Strict,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QualityConfig {
    pub expected_columns: Vec<String>,
    pub min_amount: f64,
    pub currency_len: usize,
    #[serde(default)]
    pub mode: QualityMode,
}

impl Default for QualityConfig {
    fn default() -> Self {
        Self {
            expected_columns: EXPECTED_COLUMNS.iter().map(|c| c.to_string()).collect(),
            min_amount: 0.0,
            currency_len: 3,
            mode: QualityMode::Quarantine,
        }
    }
}

fn default_secret_ref_env() -> String {
    "GCP_SECRET_ID".to_string()
}

fn default_secrets_file() -> PathBuf {
    PathBuf::from("secrets.env")
}

fn default_secret_store_url() -> String {
    "https://secretmanager.googleapis.com".to_string()
}

fn default_secret_token_env() -> String {
    "GCP_ACCESS_TOKEN".to_string()
}

fn default_secret_timeout() -> u64 {
    10
}

impl Settings {
    /// Load settings from `path`, else from `$BANKING_SETTINGS_FILE`, else from
    /// `config/settings.toml`.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let config_path = match path {
            Some(p) => p.to_path_buf(),
            None => std::env::var(SETTINGS_FILE_ENV)
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from(DEFAULT_SETTINGS_PATH)),
        };

        let config_content = fs::read_to_string(&config_path).map_err(|e| {
            PipelineError::Config(format!(
                "Failed to read config file '{}': {}",
                config_path.display(),
                e
            ))
        })?;

        Self::from_toml_str(&config_content)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let settings: Settings = toml::from_str(content)?;
        settings.validate()?;
        Ok(settings)
    }

    pub fn validate(&self) -> Result<()> {
        if self.quality.expected_columns.is_empty() {
            return Err(PipelineError::Config(
                "quality.expected_columns must not be empty".to_string(),
            ));
        }
        if self.quality.currency_len == 0 {
            return Err(PipelineError::Config(
                "quality.currency_len must be positive".to_string(),
            ));
        }
        if !self.quality.min_amount.is_finite() {
            return Err(PipelineError::Config(
                "quality.min_amount must be a finite number".to_string(),
            ));
        }
        if self.security.encryption_key_env.trim().is_empty() {
            return Err(PipelineError::Config(
                "security.encryption_key_env must name an environment variable".to_string(),
            ));
        }
        Ok(())
    }

    /// Settings rooted under `root`, with every other value at its default.
    pub fn rooted_at(root: &Path) -> Self {
        Self {
            paths: PathsConfig {
                raw: root.join("raw"),
                silver: root.join("silver"),
                gold: root.join("gold"),
                quarantine: root.join("quarantine"),
                logs: root.join("logs"),
            },
            processing: ProcessingConfig::default(),
            security: SecurityConfig {
                encryption_key_env: "BANKING_ENCRYPTION_KEY".to_string(),
                secret_ref_env: default_secret_ref_env(),
                secrets_file: default_secrets_file(),
                secret_store: None,
            },
            quality: QualityConfig::default(),
        }
    }
}
