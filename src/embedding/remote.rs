//! HTTP client for the remote embedding service.
//!
//! Talks to a Gemini-style `models/{model}:embedContent` REST endpoint
//! with a bounded request timeout. Responses are validated against the
//! configured dimension and normalized before they reach the index.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::embedding::{EmbeddingError, EmbeddingGenerator, l2_normalize};
use crate::vector::VectorDimension;

/// Task type sent with every request. Document-style embeddings are used
/// for both stored texts and queries, matching the retrieval corpus.
const TASK_TYPE: &str = "RETRIEVAL_DOCUMENT";

/// Title attached to document embeddings.
const DOCUMENT_TITLE: &str = "Business Capability Analysis";

/// Maximum characters of an error body kept for logs and messages.
const MAX_ERROR_BODY: usize = 200;

/// Environment variable consulted when no API key is configured.
const API_KEY_ENV: &str = "GEMINI_API_KEY";

/// Embedding provider backed by a remote HTTP service.
pub struct RemoteEmbedding {
    client: reqwest::blocking::Client,
    base_url: String,
    model: String,
    api_key: String,
    dimension: VectorDimension,
    timeout_secs: u64,
}

impl RemoteEmbedding {
    /// Creates a client from the embedding configuration.
    ///
    /// The API key comes from `embedding.api_key` or, failing that, the
    /// `GEMINI_API_KEY` environment variable.
    pub fn new(config: &EmbeddingConfig) -> Result<Self, EmbeddingError> {
        let dimension = VectorDimension::new(config.dimension).map_err(|e| {
            EmbeddingError::Configuration {
                reason: e.to_string(),
            }
        })?;

        let api_key = config
            .api_key
            .clone()
            .or_else(|| std::env::var(API_KEY_ENV).ok())
            .ok_or_else(|| EmbeddingError::Configuration {
                reason: format!(
                    "no API key: set embedding.api_key or the {API_KEY_ENV} environment variable"
                ),
            })?;

        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| EmbeddingError::Configuration {
                reason: format!("failed to build HTTP client: {e}"),
            })?;

        Ok(Self {
            client,
            base_url: config.api_base.trim_end_matches('/').to_string(),
            // Accept both "text-embedding-004" and "models/text-embedding-004".
            model: config.model.trim_start_matches("models/").to_string(),
            api_key,
            dimension,
            timeout_secs: config.timeout_secs,
        })
    }

    fn transport_error(&self, error: reqwest::Error) -> EmbeddingError {
        if error.is_timeout() {
            EmbeddingError::Timeout {
                seconds: self.timeout_secs,
            }
        } else {
            EmbeddingError::Request {
                reason: error.to_string(),
            }
        }
    }
}

impl EmbeddingGenerator for RemoteEmbedding {
    fn embed(&self, text: &str) -> Result<Vec<f32>, EmbeddingError> {
        let url = format!("{}/models/{}:embedContent", self.base_url, self.model);
        let request = EmbedContentRequest {
            content: Content {
                parts: vec![Part {
                    text: text.to_string(),
                }],
            },
            task_type: TASK_TYPE,
            title: Some(DOCUMENT_TITLE),
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request)
            .send()
            .map_err(|e| self.transport_error(e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().unwrap_or_default();
            return Err(EmbeddingError::Service {
                status: status.as_u16(),
                message: truncate_body(&body),
            });
        }

        let body: EmbedContentResponse =
            response
                .json()
                .map_err(|e| EmbeddingError::MalformedResponse {
                    reason: e.to_string(),
                })?;

        let mut vector = body.embedding.values;
        if vector.len() != self.dimension.get() {
            return Err(EmbeddingError::DimensionMismatch {
                expected: self.dimension.get(),
                actual: vector.len(),
            });
        }

        l2_normalize(&mut vector)?;
        Ok(vector)
    }

    fn dimension(&self) -> VectorDimension {
        self.dimension
    }

    fn model_version(&self) -> &str {
        &self.model
    }
}

fn truncate_body(body: &str) -> String {
    body.chars().take(MAX_ERROR_BODY).collect()
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct EmbedContentRequest {
    content: Content,
    task_type: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'static str>,
}

#[derive(Debug, Serialize)]
struct Content {
    parts: Vec<Part>,
}

#[derive(Debug, Serialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct EmbedContentResponse {
    embedding: ContentEmbedding,
}

#[derive(Debug, Deserialize)]
struct ContentEmbedding {
    values: Vec<f32>,
}
