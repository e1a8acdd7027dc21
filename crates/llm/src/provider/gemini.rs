//! Google Gemini through the Generative Language API.

mod input;
mod output;

use async_trait::async_trait;
use config::ApiProviderConfig;
use reqwest::{Client, RequestBuilder, header::ACCEPT};
use schema::{ConcatRegistry, Message};
use secrecy::{ExposeSecret, SecretString};

use self::{
    input::GenerateContentRequest,
    output::{GenerateContentResponse, ToolCallIndices},
};

use crate::{
    ChatModel, MessageReader,
    http_client::build_client,
    options::ChatOptions,
    provider::{self, endpoint, openai::ensure_messages},
    stream::{ChunkConverter, SseStream, spawn_stream},
};

const DEFAULT_GEMINI_API_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Extra key for thought summaries.
pub const GEMINI_THOUGHT: &str = "gemini-thought";

pub struct GeminiChatModel {
    name: String,
    client: Client,
    base_url: String,
    api_key: Option<SecretString>,
    defaults: ChatOptions,
    model: String,
}

impl GeminiChatModel {
    pub fn new(name: &str, config: &ApiProviderConfig) -> crate::Result<Self> {
        let client = build_client(name, config.timeout, &config.headers)?;

        Ok(Self {
            name: name.to_string(),
            client,
            base_url: config
                .base_url
                .clone()
                .unwrap_or_else(|| DEFAULT_GEMINI_API_URL.to_string()),
            api_key: config.api_key.clone(),
            defaults: ChatOptions::from_config(config),
            model: config.model.clone(),
        })
    }

    /// Thoughts use the default merge rules.
    pub fn register_extras(_registry: &mut ConcatRegistry) {}

    fn post(&self, model: &str, method: &str) -> RequestBuilder {
        let model = model.strip_prefix("models/").unwrap_or(model);
        let url = endpoint(&self.base_url, &format!("models/{model}:{method}"));

        let request = self.client.post(url);

        match &self.api_key {
            Some(key) => request.header("x-goog-api-key", key.expose_secret()),
            None => request,
        }
    }
}

#[async_trait]
impl ChatModel for GeminiChatModel {
    async fn generate(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<Message> {
        ensure_messages(&self.name, messages)?;

        let options = ChatOptions::merge(&self.defaults, options);
        let model = options.model_or(&self.model);

        log::debug!("{}: generate content with model {model}", self.name);

        let body = provider::to_body(&GenerateContentRequest::new(messages, &options)?)?;
        let response = provider::send(&self.name, self.post(model, "generateContent"), body).await?;
        let response: GenerateContentResponse = provider::read_json(&self.name, response).await?;

        response.into_message(&self.name)
    }

    async fn stream(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<MessageReader> {
        ensure_messages(&self.name, messages)?;

        let options = ChatOptions::merge(&self.defaults, options);
        let model = options.model_or(&self.model);

        log::debug!("{}: stream content with model {model}", self.name);

        let body = provider::to_body(&GenerateContentRequest::new(messages, &options)?)?;

        let request = self
            .post(model, "streamGenerateContent")
            .query(&[("alt", "sse")])
            .header(ACCEPT, "text/event-stream");

        let response = provider::send(&self.name, request, body).await?;
        let native = SseStream::<GenerateContentResponse>::new(self.name.clone(), response);

        Ok(spawn_stream(&self.name, native, GeminiStreamConverter::new(&self.name)))
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn model(&self) -> &str {
        &self.model
    }
}

struct GeminiStreamConverter {
    provider: String,
    indices: ToolCallIndices,
}

impl GeminiStreamConverter {
    pub fn new(provider: &str) -> Self {
        Self {
            provider: provider.to_string(),
            indices: ToolCallIndices::default(),
        }
    }
}

impl ChunkConverter for GeminiStreamConverter {
    type Chunk = GenerateContentResponse;

    fn convert(&mut self, chunk: GenerateContentResponse) -> crate::Result<Option<Message>> {
        chunk.into_delta(&self.provider, &mut self.indices)
    }
}
