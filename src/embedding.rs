//! HTTP embedding client. Library and Journal retrieval each hold their own
//! instance, one per role; both point at the same REST endpoint but are
//! constructed and shared independently via `AppContext`.

use crate::error::EmbeddingError;
use serde_json::json;
use std::time::Duration;
use tracing::warn;

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
const EMBED_RETRY_ATTEMPTS: u32 = 2;
const RETRY_DELAY: Duration = Duration::from_millis(500);

#[derive(Clone)]
pub struct EmbeddingClient {
    api_url: String,
    api_key: Option<String>,
    http_client: reqwest::Client,
}

impl EmbeddingClient {
    pub fn new(api_url: impl Into<String>, api_key: Option<String>) -> Self {
        let http_client = reqwest::Client::builder()
            .timeout(HTTP_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self {
            api_url: api_url.into(),
            api_key,
            http_client,
        }
    }

    pub async fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let Some(api_key) = &self.api_key else {
            return Err(EmbeddingError::Unauthorized);
        };

        let mut last_err = None;
        for attempt in 0..=EMBED_RETRY_ATTEMPTS {
            let response = self
                .http_client
                .post(format!("{}?key={}", self.api_url, api_key))
                .json(&json!({
                    "content": { "parts": [{ "text": text }] }
                }))
                .send()
                .await;

            match response {
                Ok(resp) => {
                    let body: serde_json::Value = match resp.json().await {
                        Ok(b) => b,
                        Err(e) => {
                            last_err = Some(e.to_string());
                            continue;
                        }
                    };

                    if let Some(error) = body.get("error") {
                        let message = error
                            .get("message")
                            .and_then(|m| m.as_str())
                            .unwrap_or_default();
                        if message.contains("API key") || message.contains("API_KEY") {
                            return Err(EmbeddingError::Unauthorized);
                        }
                        if message.to_lowercase().contains("quota") {
                            return Err(EmbeddingError::QuotaExceeded);
                        }
                        last_err = Some(message.to_string());
                    } else if let Some(values) = body
                        .get("embedding")
                        .and_then(|e| e.get("values"))
                        .and_then(|v| v.as_array())
                    {
                        return Ok(values
                            .iter()
                            .filter_map(|v| v.as_f64().map(|v| v as f32))
                            .collect());
                    } else {
                        last_err = Some("malformed embedding response".to_string());
                    }
                }
                Err(e) => last_err = Some(e.to_string()),
            }

            if attempt < EMBED_RETRY_ATTEMPTS {
                tokio::time::sleep(RETRY_DELAY).await;
            }
        }

        warn!(error = ?last_err, "embedding request exhausted retries");
        Err(EmbeddingError::RequestFailed(
            last_err.unwrap_or_else(|| "unknown error".to_string()),
        ))
    }

    pub async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        let mut out = Vec::with_capacity(texts.len());
        for text in texts {
            out.push(self.embed(text).await?);
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn embed_without_api_key_is_unauthorized() {
        let client = EmbeddingClient::new("https://example.invalid/embed", None);
        assert!(matches!(
            client.embed("hello").await,
            Err(EmbeddingError::Unauthorized)
        ));
    }
}
