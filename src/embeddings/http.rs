//! OpenAI-compatible HTTP embedding provider.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use url::Url;

use super::EmbeddingProvider;
use crate::errors::EmbeddingError;

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingRow>,
}

#[derive(Deserialize)]
struct EmbeddingRow {
    index: usize,
    embedding: Vec<f32>,
}

/// Calls a `POST /embeddings`-shaped endpoint.
///
/// HTTP outcomes map onto the retry partition: timeouts and 5xx/429 are
/// retryable, payment/permission failures count as quota exhaustion, and any
/// other 4xx is invalid input.
pub struct HttpEmbeddingProvider {
    client: Client,
    endpoint: Url,
    model: String,
    dimensions: usize,
    api_key: Option<String>,
}

impl HttpEmbeddingProvider {
    pub fn new(endpoint: Url, model: impl Into<String>, dimensions: usize) -> Self {
        Self {
            client: Client::new(),
            endpoint,
            model: model.into(),
            dimensions,
            api_key: None,
        }
    }

    #[must_use]
    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    #[must_use]
    pub fn with_client(mut self, client: Client) -> Self {
        self.client = client;
        self
    }

    fn classify_status(status: StatusCode, body: String) -> EmbeddingError {
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            EmbeddingError::Transient(format!("provider returned {status}: {body}"))
        } else if status == StatusCode::PAYMENT_REQUIRED || status == StatusCode::FORBIDDEN {
            EmbeddingError::QuotaExhausted(format!("provider returned {status}: {body}"))
        } else {
            EmbeddingError::InvalidInput(format!("provider returned {status}: {body}"))
        }
    }
}

#[async_trait]
impl EmbeddingProvider for HttpEmbeddingProvider {
    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, EmbeddingError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if texts.iter().any(|t| t.trim().is_empty()) {
            return Err(EmbeddingError::InvalidInput(
                "cannot embed empty text".into(),
            ));
        }

        let mut request = self.client.post(self.endpoint.clone()).json(&EmbeddingRequest {
            model: &self.model,
            input: texts,
        });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await.map_err(|err| {
            if err.is_timeout() {
                EmbeddingError::Timeout(err.to_string())
            } else {
                EmbeddingError::Transient(err.to_string())
            }
        })?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Self::classify_status(status, body));
        }

        let payload: EmbeddingResponse = response
            .json()
            .await
            .map_err(|err| EmbeddingError::Transient(format!("malformed response: {err}")))?;

        if payload.data.len() != texts.len() {
            return Err(EmbeddingError::CountMismatch {
                requested: texts.len(),
                returned: payload.data.len(),
            });
        }

        let mut rows = payload.data;
        rows.sort_by_key(|row| row.index);

        let mut vectors = Vec::with_capacity(rows.len());
        for row in rows {
            if row.embedding.len() != self.dimensions {
                return Err(EmbeddingError::DimensionMismatch {
                    expected: self.dimensions,
                    actual: row.embedding.len(),
                });
            }
            vectors.push(row.embedding);
        }
        Ok(vectors)
    }

    fn model(&self) -> &str {
        &self.model
    }

    fn dimensions(&self) -> usize {
        self.dimensions
    }
}
