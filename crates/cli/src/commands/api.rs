//! `contextrelay api`: Thin HTTP client over a running server.

use contextrelay_gateway::error::ErrorResponse;
use serde_json::Value;
use std::path::Path;
use std::time::Duration;
use tracing::debug;

pub struct ApiClient {
    client: reqwest::Client,
    base_url: String,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self, Box<dyn std::error::Error>> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(30))
            .build()?;
        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn url(&self, endpoint: &str) -> String {
        format!("{}{}", self.base_url, endpoint)
    }

    /// POST the JSON document in `path` to `endpoint`.
    pub async fn post_file(
        &self,
        endpoint: &str,
        path: &Path,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| format!("Failed to read {}: {e}", path.display()))?;
        let body: Value = serde_json::from_str(&content)
            .map_err(|e| format!("{} is not valid JSON: {e}", path.display()))?;

        debug!(url = %self.url(endpoint), "POST");
        let response = self.client.post(self.url(endpoint)).json(&body).send().await?;
        read_body(response).await
    }

    pub async fn get(&self, endpoint: &str) -> Result<Value, Box<dyn std::error::Error>> {
        debug!(url = %self.url(endpoint), "GET");
        let response = self.client.get(self.url(endpoint)).send().await?;
        read_body(response).await
    }
}

async fn read_body(response: reqwest::Response) -> Result<Value, Box<dyn std::error::Error>> {
    let status = response.status();
    let text = response.text().await?;

    if status.is_success() {
        return Ok(serde_json::from_str(&text)?);
    }

    let message = match serde_json::from_str::<ErrorResponse>(&text) {
        Ok(err) => format!("{} ({}): {}", status, err.code, err.error),
        Err(_) => format!("{status}: {text}"),
    };
    Err(message.into())
}
