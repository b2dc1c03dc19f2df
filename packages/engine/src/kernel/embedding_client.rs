//! OpenAI-compatible embeddings HTTP client.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::errors::{EngineError, EngineResult};
use crate::kernel::traits::Embedder;

const EMBEDDINGS_URL: &str = "https://api.openai.com/v1/embeddings";

pub struct OpenAiEmbeddingClient {
    client: reqwest::Client,
    api_key: String,
    model: String,
    dimension: usize,
}

impl OpenAiEmbeddingClient {
    pub fn new(api_key: String, model: String, dimension: usize, timeout: Duration) -> Self {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .expect("reqwest client builder failed");

        Self {
            client,
            api_key,
            model,
            dimension,
        }
    }
}

#[derive(Serialize)]
struct EmbeddingRequest<'a> {
    input: &'a str,
    model: &'a str,
}

#[derive(Deserialize)]
struct EmbeddingResponse {
    data: Vec<EmbeddingData>,
}

#[derive(Deserialize)]
struct EmbeddingData {
    embedding: Vec<f32>,
}

#[async_trait]
impl Embedder for OpenAiEmbeddingClient {
    async fn embed(&self, text: &str) -> EngineResult<Vec<f32>> {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Err(EngineError::InvalidInput(
                "description must be non-empty after trimming".to_string(),
            ));
        }

        let response = self
            .client
            .post(EMBEDDINGS_URL)
            .bearer_auth(&self.api_key)
            .json(&EmbeddingRequest {
                input: trimmed,
                model: &self.model,
            })
            .send()
            .await?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return if status.is_client_error() {
                Err(EngineError::PermanentExternal(format!(
                    "embedding provider rejected request ({status}): {body}"
                )))
            } else {
                Err(EngineError::TransientExternal(format!(
                    "embedding provider error ({status}): {body}"
                )))
            };
        }

        let parsed: EmbeddingResponse = response.json().await.map_err(|e| {
            EngineError::TransientExternal(format!("malformed embedding response: {e}"))
        })?;

        let embedding = parsed
            .data
            .into_iter()
            .next()
            .ok_or_else(|| {
                EngineError::TransientExternal("embedding response had no data".to_string())
            })?
            .embedding;

        if embedding.len() != self.dimension {
            return Err(EngineError::PermanentExternal(format!(
                "embedding provider returned {} dimensions, expected {}",
                embedding.len(),
                self.dimension
            )));
        }

        Ok(normalize(embedding))
    }

    fn dimension(&self) -> usize {
        self.dimension
    }
}

/// Rescale to unit Euclidean norm. Most embedding providers already return
/// unit vectors, but normalizing locally keeps the contract (`‖v‖ ≈ 1`) true
/// regardless of provider behavior.
fn normalize(mut v: Vec<f32>) -> Vec<f32> {
    let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in v.iter_mut() {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_produces_unit_vector() {
        let v = normalize(vec![3.0, 4.0]);
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[tokio::test]
    #[ignore = "requires a real EMBEDDING_API_KEY; run manually against the live provider"]
    async fn embed_real_provider() {
        let api_key = std::env::var("EMBEDDING_API_KEY").expect("EMBEDDING_API_KEY must be set");
        let client = OpenAiEmbeddingClient::new(
            api_key,
            "text-embedding-3-small".to_string(),
            1536,
            Duration::from_secs(5),
        );
        let result = client.embed("Baha sa Purok 3").await.unwrap();
        assert_eq!(result.len(), 1536);
    }
}
