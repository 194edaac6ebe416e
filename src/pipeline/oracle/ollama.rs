use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use super::{Oracle, OracleError};
use crate::config::OracleConfig;

/// Ollama HTTP client used as the classification and generation oracle.
pub struct OllamaOracle {
    base_url: String,
    model: String,
    client: reqwest::Client,
    timeout_secs: u64,
}

impl OllamaOracle {
    pub fn new(base_url: &str, model: &str, timeout_secs: u64) -> Result<Self, OracleError> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeout_secs))
            .build()
            .map_err(|e| OracleError::HttpClient(e.to_string()))?;

        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client,
            timeout_secs,
        })
    }

    pub fn from_config(config: &OracleConfig) -> Result<Self, OracleError> {
        Self::new(&config.base_url, &config.model, config.timeout_secs)
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub async fn list_models(&self) -> Result<Vec<String>, OracleError> {
        let url = format!("{}/api/tags", self.base_url);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaTagsResponse = response
            .json()
            .await
            .map_err(|e| OracleError::ResponseParsing(e.to_string()))?;

        Ok(parsed.models.into_iter().map(|m| m.name).collect())
    }

    pub async fn is_model_available(&self) -> Result<bool, OracleError> {
        let models = self.list_models().await?;
        Ok(models.iter().any(|m| m.starts_with(&self.model)))
    }

    fn map_send_error(&self, e: reqwest::Error) -> OracleError {
        if e.is_connect() {
            OracleError::Connection(self.base_url.clone())
        } else if e.is_timeout() {
            OracleError::HttpClient(format!("Request timed out after {}s", self.timeout_secs))
        } else {
            OracleError::HttpClient(e.to_string())
        }
    }
}

/// Request body for Ollama /api/generate
#[derive(Serialize)]
struct OllamaGenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    system: &'a str,
    stream: bool,
}

/// Response body from Ollama /api/generate
#[derive(Deserialize)]
struct OllamaGenerateResponse {
    response: String,
}

/// Response body from Ollama /api/tags
#[derive(Deserialize)]
struct OllamaTagsResponse {
    models: Vec<OllamaModel>,
}

#[derive(Deserialize)]
struct OllamaModel {
    name: String,
}

#[async_trait]
impl Oracle for OllamaOracle {
    async fn ask(&self, system: &str, user: &str) -> Result<String, OracleError> {
        let url = format!("{}/api/generate", self.base_url);
        let body = OllamaGenerateRequest {
            model: &self.model,
            prompt: user,
            system,
            stream: false,
        };

        tracing::debug!(model = %self.model, prompt_chars = user.len(), "Oracle request");

        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| self.map_send_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(OracleError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: OllamaGenerateResponse = response
            .json()
            .await
            .map_err(|e| OracleError::ResponseParsing(e.to_string()))?;

        Ok(parsed.response)
    }
}
