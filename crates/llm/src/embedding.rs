//! Text embeddings through OpenAI-compatible `/embeddings` endpoints.

use async_trait::async_trait;
use config::{ApiProviderConfig, ProviderType};
use reqwest::{Client, header::AUTHORIZATION};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};

use crate::{
    Embedder,
    error::LlmError,
    http_client::build_client,
    provider::{self, endpoint},
};

#[derive(Debug, Serialize)]
struct EmbeddingRequest<'a> {
    model: &'a str,
    input: &'a [String],
    encoding_format: &'static str,
}

#[derive(Debug, Deserialize)]
struct EmbeddingResponse {
    #[serde(default)]
    data: Vec<EmbeddingData>,
}

#[derive(Debug, Deserialize)]
struct EmbeddingData {
    index: usize,
    embedding: Vec<f64>,
}

pub struct OpenAIEmbedder {
    name: String,
    client: Client,
    url: String,
    api_key: Option<SecretString>,
    model: String,
}

impl OpenAIEmbedder {
    /// Builds an embedder for a provider with an `embedding_model`.
    ///
    /// Returns `None` when the provider has no embedding model or no OpenAI-compatible
    /// embeddings endpoint.
    pub fn from_config(
        name: &str,
        provider_type: ProviderType,
        config: &ApiProviderConfig,
    ) -> crate::Result<Option<Self>> {
        let default_base_url = match provider_type {
            ProviderType::Openai => "https://api.openai.com/v1",
            ProviderType::Ark => "https://ark.cn-beijing.volces.com/api/v3",
            ProviderType::Qianfan => "https://qianfan.baidubce.com/v2",
            ProviderType::Gemini => return Ok(None),
        };

        let Some(model) = config.embedding_model.clone() else {
            return Ok(None);
        };

        let mut headers = config.headers.clone();

        if provider_type == ProviderType::Qianfan
            && let Some(app_id) = &config.app_id
        {
            headers.entry("appid".to_string()).or_insert_with(|| app_id.clone());
        }

        let base_url = config.base_url.as_deref().unwrap_or(default_base_url);

        Ok(Some(Self {
            name: name.to_string(),
            client: build_client(name, config.timeout, &headers)?,
            url: endpoint(base_url, "embeddings"),
            api_key: config.api_key.clone(),
            model,
        }))
    }
}

#[async_trait]
impl Embedder for OpenAIEmbedder {
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f64>>> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }

        log::debug!("{}: embedding {} texts with model {}", self.name, texts.len(), self.model);

        let body = provider::to_body(&EmbeddingRequest {
            model: &self.model,
            input: texts,
            encoding_format: "float",
        })?;

        let mut request = self.client.post(&self.url);

        if let Some(key) = &self.api_key {
            request = request.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret()));
        }

        let response = provider::send(&self.name, request, body).await?;
        let mut response: EmbeddingResponse = provider::read_json(&self.name, response).await?;

        if response.data.len() != texts.len() {
            return Err(LlmError::InvalidResponse(format!(
                "{} returned {} embeddings for {} inputs",
                self.name,
                response.data.len(),
                texts.len()
            )));
        }

        response.data.sort_by_key(|data| data.index);

        Ok(response.data.into_iter().map(|data| data.embedding).collect())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use indoc::formatdoc;
    use serde_json::json;

    use super::*;
    use crate::provider::test_server::{Reply, serve};

    fn config(address: SocketAddr) -> ApiProviderConfig {
        let config = formatdoc! {r#"
            api_key = "sk-test"
            base_url = "http://{address}/v1"
            model = "gpt-4o-mini"
            embedding_model = "text-embedding-3-small"
        "#};

        toml::from_str(&config).unwrap()
    }

    #[tokio::test]
    async fn embeddings_follow_the_response_index() {
        let reply = Reply::Json(json!({
            "data": [
                {"object": "embedding", "index": 1, "embedding": [0.5, 0.25]},
                {"object": "embedding", "index": 0, "embedding": [1.0, -1.0]}
            ],
            "usage": {"prompt_tokens": 4, "total_tokens": 4}
        }));

        let (address, captured) = serve("/v1/embeddings", reply).await;

        let embedder = OpenAIEmbedder::from_config("openai", ProviderType::Openai, &config(address))
            .unwrap()
            .unwrap();

        let texts = vec!["first".to_string(), "second".to_string()];
        let vectors = embedder.embed(&texts).await.unwrap();

        assert_eq!(vectors, vec![vec![1.0, -1.0], vec![0.5, 0.25]]);

        let (_, headers, body) = captured.last();

        assert_eq!(headers["authorization"], "Bearer sk-test");
        assert_eq!(
            body,
            json!({"model": "text-embedding-3-small", "input": ["first", "second"], "encoding_format": "float"})
        );
    }

    #[tokio::test]
    async fn count_mismatch_is_an_error() {
        let reply = Reply::Json(json!({"data": [{"index": 0, "embedding": [1.0]}]}));

        let (address, _) = serve("/v1/embeddings", reply).await;

        let embedder = OpenAIEmbedder::from_config("openai", ProviderType::Openai, &config(address))
            .unwrap()
            .unwrap();

        let error = embedder
            .embed(&["a".to_string(), "b".to_string()])
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "Invalid response: openai returned 1 embeddings for 2 inputs");
    }

    #[tokio::test]
    async fn empty_input_sends_nothing() {
        let (address, captured) = serve("/v1/embeddings", Reply::Json(json!({}))).await;

        let embedder = OpenAIEmbedder::from_config("openai", ProviderType::Openai, &config(address))
            .unwrap()
            .unwrap();

        assert!(embedder.embed(&[]).await.unwrap().is_empty());
        assert!(captured.requests.lock().unwrap().is_empty());
    }

    #[test]
    fn gemini_and_missing_models_have_no_embedder() {
        let config: ApiProviderConfig = toml::from_str("model = \"m\"\nembedding_model = \"e\"").unwrap();
        assert!(OpenAIEmbedder::from_config("g", ProviderType::Gemini, &config).unwrap().is_none());

        let config: ApiProviderConfig = toml::from_str("model = \"m\"").unwrap();
        assert!(OpenAIEmbedder::from_config("o", ProviderType::Openai, &config).unwrap().is_none());
    }
}
