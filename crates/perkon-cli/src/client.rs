//! HTTP client for interacting with a remote Perkon control plane.

use perkon_core::alert::AlertRecord;
use perkon_core::health::HealthReport;
use perkon_control::ModelSummary;
use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },
}

#[derive(Debug, Deserialize)]
pub struct ModelListResponse {
    pub models: Vec<ModelSummary>,
    pub total: usize,
}

#[derive(Debug, Deserialize)]
pub struct AlertListResponse {
    pub alerts: Vec<AlertRecord>,
    pub total: usize,
}

/// Client for the Perkon control-plane REST API.
pub struct PerkonClient {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl PerkonClient {
    pub fn new(base_url: &str, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn get(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(url);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        req
    }

    fn post(&self, url: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.post(url);
        if let Some(key) = &self.api_key {
            req = req.header("x-api-key", key);
        }
        req
    }

    /// List all registered models.
    pub async fn list_models(&self) -> Result<ModelListResponse, ClientError> {
        let url = format!("{}/api/v1/models", self.base_url);
        let resp = self.get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status,
                message: text,
            });
        }

        Ok(resp.json().await?)
    }

    /// Run a health check for one model and return the report.
    pub async fn model_health(&self, model: &str) -> Result<HealthReport, ClientError> {
        let url = format!("{}/api/v1/models/{}/health", self.base_url, model);
        let resp = self.get(&url).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status,
                message: text,
            });
        }

        Ok(resp.json().await?)
    }

    /// List active alerts, optionally filtered by model and minimum severity.
    pub async fn list_alerts(
        &self,
        model: Option<&str>,
        severity: Option<&str>,
    ) -> Result<AlertListResponse, ClientError> {
        let url = format!("{}/api/v1/alerts", self.base_url);
        let mut params: Vec<(&str, &str)> = Vec::new();
        if let Some(model) = model {
            params.push(("model", model));
        }
        if let Some(severity) = severity {
            params.push(("severity", severity));
        }
        let resp = self.get(&url).query(&params).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status,
                message: text,
            });
        }

        Ok(resp.json().await?)
    }

    /// Acknowledge an alert by ID.
    pub async fn acknowledge_alert(
        &self,
        alert_id: &str,
        acknowledged_by: &str,
    ) -> Result<AlertRecord, ClientError> {
        let url = format!("{}/api/v1/alerts/{}/acknowledge", self.base_url, alert_id);
        let body = serde_json::json!({ "acknowledged_by": acknowledged_by });
        let resp = self.post(&url).json(&body).send().await?;

        if !resp.status().is_success() {
            let status = resp.status().as_u16();
            let text = resp.text().await.unwrap_or_default();
            return Err(ClientError::Api {
                status,
                message: text,
            });
        }

        Ok(resp.json().await?)
    }
}
