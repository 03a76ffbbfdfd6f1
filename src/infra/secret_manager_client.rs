use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use reqwest::header::AUTHORIZATION;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

use crate::app::ports::SecretStore;
use crate::config::SecretStoreConfig;

#[derive(Debug, Deserialize)]
struct AccessResponse {
    payload: Payload,
}

#[derive(Debug, Deserialize)]
struct Payload {
    data: String,
}

/// Secret Manager style REST client: `GET /v1/{name}/versions/latest:access`.
pub struct HttpSecretStore {
    client: reqwest::blocking::Client,
    base_url: String,
    project: Option<String>,
    token_env: String,
}

impl HttpSecretStore {
    pub fn from_config(config: &SecretStoreConfig) -> Result<Self, String> {
        let base_url = config.base_url.trim();
        if !(base_url.starts_with("https://") || base_url.starts_with("http://")) {
            return Err(format!("secret store base_url '{}' is not an http(s) URL", base_url));
        }
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()
            .map_err(|e| e.to_string())?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            project: config.project.clone(),
            token_env: config.token_env.clone(),
        })
    }

    /// Full resource name for `secret_ref`. Fully qualified refs pass through.
    pub fn resource_name(&self, secret_ref: &str) -> Result<String, String> {
        let secret_ref = secret_ref.trim();
        if secret_ref.starts_with("projects/") {
            return Ok(secret_ref.to_string());
        }
        match &self.project {
            Some(project) => Ok(format!("projects/{}/secrets/{}", project, secret_ref)),
            None => Err(format!(
                "secret '{}' is not fully qualified and no project is configured",
                secret_ref
            )),
        }
    }

    fn access_url(&self, secret_ref: &str) -> Result<String, String> {
        let name = self.resource_name(secret_ref)?;
        let name = name.trim_end_matches('/');
        if name.contains("/versions/") {
            Ok(format!("{}/v1/{}:access", self.base_url, name))
        } else {
            Ok(format!("{}/v1/{}/versions/latest:access", self.base_url, name))
        }
    }
}

/// Remote store for the key chain. A store that cannot be built is logged
/// and left out so key resolution falls through to the local sources.
pub fn secret_store_from_config(config: Option<&SecretStoreConfig>) -> Option<Arc<dyn SecretStore>> {
    let config = config?;
    match HttpSecretStore::from_config(config) {
        Ok(store) => Some(Arc::new(store)),
        Err(e) => {
            warn!(error = %e, "Secret store unavailable; remote key source skipped");
            None
        }
    }
}

fn decode_payload(body: &str) -> Result<String, String> {
    let response: AccessResponse =
        serde_json::from_str(body).map_err(|e| format!("unexpected secret response: {}", e))?;
    let bytes = STANDARD
        .decode(response.payload.data.trim())
        .map_err(|e| format!("secret payload is not base64: {}", e))?;
    String::from_utf8(bytes).map_err(|_| "secret payload is not UTF-8".to_string())
}

impl SecretStore for HttpSecretStore {
    fn access(&self, secret_ref: &str) -> Result<String, String> {
        let url = self.access_url(secret_ref)?;
        let mut request = self.client.get(&url);
        if let Ok(token) = std::env::var(&self.token_env) {
            request = request.header(AUTHORIZATION, format!("Bearer {}", token.trim()));
        }

        let resp = request.send().map_err(|e| e.to_string())?;
        let status = resp.status();
        let body = resp.text().map_err(|e| e.to_string())?;
        if !status.is_success() {
            return Err(format!("secret store returned HTTP {}", status.as_u16()));
        }
        decode_payload(&body)
    }
}
