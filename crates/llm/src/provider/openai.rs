//! OpenAI chat completions, and the client every OpenAI-compatible provider builds on.

use std::collections::BTreeMap;

use async_trait::async_trait;
use config::ApiProviderConfig;
use reqwest::{
    Client, RequestBuilder,
    header::{ACCEPT, AUTHORIZATION},
};
use schema::{ConcatRegistry, Message};
use secrecy::{ExposeSecret, SecretString};

use crate::{
    ChatModel, MessageReader,
    error::LlmError,
    http_client::build_client,
    messages::openai::{ChatCompletionChunk, ChatCompletionRequest, ChatCompletionResponse, ExtraKeys},
    options::ChatOptions,
    provider::{self, endpoint},
    stream::{ChunkConverter, SseStream, spawn_stream},
};

const DEFAULT_OPENAI_API_URL: &str = "https://api.openai.com/v1";

/// Extra key for reasoning text some OpenAI-compatible servers stream next to the content.
pub const OPENAI_REASONING_CONTENT: &str = "openai-reasoning-content";

const OPENAI_KEYS: ExtraKeys = ExtraKeys {
    request_id: None,
    reasoning: Some(OPENAI_REASONING_CONTENT),
};

/// Client for a `/chat/completions` endpoint.
pub(crate) struct OpenAICompatible {
    name: String,
    client: Client,
    url: String,
    api_key: Option<SecretString>,
    defaults: ChatOptions,
    model: String,
    include_usage: bool,
    keys: ExtraKeys,
}

impl OpenAICompatible {
    /// `headers` are sent with every request on top of the configured ones.
    pub fn new(
        name: &str,
        config: &ApiProviderConfig,
        default_base_url: &str,
        mut headers: BTreeMap<String, String>,
        keys: ExtraKeys,
    ) -> crate::Result<Self> {
        headers.extend(config.headers.clone());

        let client = build_client(name, config.timeout, &headers)?;
        let base_url = config.base_url.as_deref().unwrap_or(default_base_url);

        Ok(Self {
            name: name.to_string(),
            client,
            url: endpoint(base_url, "chat/completions"),
            api_key: config.api_key.clone(),
            defaults: ChatOptions::from_config(config),
            model: config.model.clone(),
            include_usage: config.include_usage,
            keys,
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn keys(&self) -> ExtraKeys {
        self.keys
    }

    fn post(&self) -> RequestBuilder {
        let request = self.client.post(&self.url);

        match &self.api_key {
            Some(key) => request.header(AUTHORIZATION, format!("Bearer {}", key.expose_secret())),
            None => request,
        }
    }

    pub async fn generate(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<Message> {
        ensure_messages(&self.name, messages)?;

        let options = ChatOptions::merge(&self.defaults, options);
        let model = options.model_or(&self.model);

        log::debug!("{}: chat completion with model {model}", self.name);

        let body = provider::to_body(&ChatCompletionRequest::new(model, messages, &options))?;
        let response = provider::send(&self.name, self.post(), body).await?;
        let response: ChatCompletionResponse = provider::read_json(&self.name, response).await?;

        response.into_message(&self.name, &self.keys)
    }

    /// Opens the event stream. Returns once the response headers arrived.
    pub async fn open_stream(
        &self,
        messages: &[Message],
        options: &ChatOptions,
    ) -> crate::Result<SseStream<ChatCompletionChunk>> {
        ensure_messages(&self.name, messages)?;

        let options = ChatOptions::merge(&self.defaults, options);
        let model = options.model_or(&self.model);

        log::debug!("{}: streaming chat completion with model {model}", self.name);

        let request = ChatCompletionRequest::new(model, messages, &options).streaming(self.include_usage);
        let body = provider::to_body(&request)?;

        let builder = self.post().header(ACCEPT, "text/event-stream");
        let response = provider::send(&self.name, builder, body).await?;

        Ok(SseStream::new(self.name.clone(), response))
    }
}

pub(crate) fn ensure_messages(provider: &str, messages: &[Message]) -> crate::Result<()> {
    if messages.is_empty() {
        return Err(LlmError::InvalidRequest(format!(
            "A request to {provider} needs at least one message"
        )));
    }

    Ok(())
}

/// Converts OpenAI chunks one by one, without buffering.
pub(crate) struct OpenAIStreamConverter {
    provider: String,
    keys: ExtraKeys,
}

impl OpenAIStreamConverter {
    pub fn new(provider: &str, keys: ExtraKeys) -> Self {
        Self {
            provider: provider.to_string(),
            keys,
        }
    }
}

impl ChunkConverter for OpenAIStreamConverter {
    type Chunk = ChatCompletionChunk;

    fn convert(&mut self, chunk: ChatCompletionChunk) -> crate::Result<Option<Message>> {
        chunk.into_delta(&self.provider, &self.keys)
    }
}

pub struct OpenAIChatModel {
    inner: OpenAICompatible,
}

impl OpenAIChatModel {
    pub fn new(name: &str, config: &ApiProviderConfig) -> crate::Result<Self> {
        let inner = OpenAICompatible::new(name, config, DEFAULT_OPENAI_API_URL, BTreeMap::new(), OPENAI_KEYS)?;

        Ok(Self { inner })
    }

    /// OpenAI extras use the default merge rules.
    pub fn register_extras(_registry: &mut ConcatRegistry) {}
}

#[async_trait]
impl ChatModel for OpenAIChatModel {
    async fn generate(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<Message> {
        self.inner.generate(messages, options).await
    }

    async fn stream(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<MessageReader> {
        let native = self.inner.open_stream(messages, options).await?;
        let converter = OpenAIStreamConverter::new(self.inner.name(), self.inner.keys());

        Ok(spawn_stream(self.inner.name(), native, converter))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

#[cfg(test)]
mod tests {
    use std::net::SocketAddr;

    use axum::http::StatusCode;
    use indoc::formatdoc;
    use schema::{TokenUsage, ToolCall};
    use serde_json::json;

    use super::*;
    use crate::provider::test_server::{Reply, serve};

    fn config(address: SocketAddr) -> ApiProviderConfig {
        let config = formatdoc! {r#"
            api_key = "sk-test"
            base_url = "http://{address}/v1"
            model = "gpt-4o-mini"

            [defaults]
            max_tokens = 128
        "#};

        toml::from_str(&config).unwrap()
    }

    fn sse(events: &[serde_json::Value]) -> Reply {
        let mut events: Vec<String> = events.iter().map(|event| event.to_string()).collect();
        events.push("[DONE]".to_string());

        Reply::Sse(events)
    }

    #[tokio::test]
    async fn generate_sends_resolved_options() {
        let reply = Reply::Json(json!({
            "id": "chatcmpl-1",
            "choices": [{
                "index": 0,
                "message": {"role": "assistant", "content": "Paris."},
                "finish_reason": "stop"
            }],
            "usage": {"prompt_tokens": 9, "completion_tokens": 2, "total_tokens": 11}
        }));

        let (address, captured) = serve("/v1/chat/completions", reply).await;
        let model = OpenAIChatModel::new("openai", &config(address)).unwrap();

        let message = model
            .generate(&[Message::user("Capital of France?")], &ChatOptions::new())
            .await
            .unwrap();

        assert_eq!(message.content, "Paris.");
        assert_eq!(message.finish_reason(), Some("stop"));
        assert_eq!(message.usage(), Some(&TokenUsage::new(9, 2, 11)));

        let (_, headers, body) = captured.last();

        assert_eq!(headers["authorization"], "Bearer sk-test");

        assert_eq!(
            body,
            json!({
                "model": "gpt-4o-mini",
                "messages": [{"role": "user", "content": "Capital of France?"}],
                "max_tokens": 128,
                "stream": false
            })
        );
    }

    #[tokio::test]
    async fn generate_rejects_empty_choices() {
        let reply = Reply::Json(json!({"id": "chatcmpl-1", "choices": []}));

        let (address, _) = serve("/v1/chat/completions", reply).await;
        let model = OpenAIChatModel::new("openai", &config(address)).unwrap();

        let error = model
            .generate(&[Message::user("hi")], &ChatOptions::new())
            .await
            .unwrap_err();

        assert_eq!(error.to_string(), "Invalid response: openai returned no choices");
    }

    #[tokio::test]
    async fn status_codes_map_to_errors() {
        let reply = Reply::Status(StatusCode::TOO_MANY_REQUESTS, "slow down".to_string());

        let (address, _) = serve("/v1/chat/completions", reply).await;
        let model = OpenAIChatModel::new("openai", &config(address)).unwrap();

        let error = model
            .stream(&[Message::user("hi")], &ChatOptions::new())
            .await
            .unwrap_err();

        assert!(matches!(error, LlmError::RateLimitExceeded { message } if message == "slow down"));
    }

    #[tokio::test]
    async fn empty_conversation_is_rejected_before_sending() {
        let (address, captured) = serve("/v1/chat/completions", Reply::Json(json!({}))).await;
        let model = OpenAIChatModel::new("openai", &config(address)).unwrap();

        let error = model.generate(&[], &ChatOptions::new()).await.unwrap_err();

        assert!(matches!(error, LlmError::InvalidRequest(_)));
        assert!(captured.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn stream_reassembles_text_tool_calls_and_usage() {
        let reply = sse(&[
            json!({"id": "c1", "choices": [{"index": 0, "delta": {"role": "assistant", "content": ""}}]}),
            json!({"id": "c1", "choices": [{"index": 0, "delta": {"content": "Hello,"}}]}),
            json!({"id": "c1", "choices": [{"index": 0, "delta": {"content": " how can I "}}]}),
            json!({"id": "c1", "choices": [{"index": 1, "delta": {"content": "ignored"}}]}),
            json!({"id": "c1", "choices": [{"index": 0, "delta": {"content": "help you?"}}]}),
            json!({"id": "c1", "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "id": "call_1", "type": "function", "function": {"name": "lookup", "arguments": "{\"a\":"}}
            ]}}]}),
            json!({"id": "c1", "choices": [{"index": 0, "delta": {"tool_calls": [
                {"index": 0, "function": {"arguments": "1}"}}
            ]}}]}),
            json!({"id": "c1", "choices": [{"index": 0, "delta": {}, "finish_reason": "tool_calls"}]}),
            json!({
                "id": "c1",
                "choices": [],
                "usage": {"prompt_tokens": 5, "completion_tokens": 7, "total_tokens": 12}
            }),
        ]);

        let (address, captured) = serve("/v1/chat/completions", reply).await;
        let model = OpenAIChatModel::new("openai", &config(address)).unwrap();

        let deltas = model
            .stream(&[Message::user("hi")], &ChatOptions::new().with_model("gpt-4o"))
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        assert_eq!(deltas.len(), 8);

        let last = deltas.last().unwrap();
        assert!(last.content.is_empty());
        assert!(last.tool_calls.is_empty());
        assert_eq!(last.usage(), Some(&TokenUsage::new(5, 7, 12)));

        let message = schema::concat_messages(&deltas).unwrap();

        assert_eq!(message.content, "Hello, how can I help you?");
        assert_eq!(
            message.tool_calls,
            vec![ToolCall::function("call_1", "lookup", "{\"a\":1}").with_index(0)]
        );
        assert_eq!(message.finish_reason(), Some("tool_calls"));
        assert_eq!(message.usage(), Some(&TokenUsage::new(5, 7, 12)));

        let (_, headers, body) = captured.last();

        assert_eq!(headers["accept"], "text/event-stream");
        assert_eq!(body["model"], "gpt-4o");
        assert_eq!(body["stream_options"], json!({"include_usage": true}));
    }

    #[tokio::test]
    async fn reasoning_content_is_kept_as_extra() {
        let reply = sse(&[
            json!({"choices": [{"index": 0, "delta": {"reasoning_content": "Thinking "}}]}),
            json!({"choices": [{"index": 0, "delta": {"reasoning_content": "hard."}}]}),
            json!({"choices": [{"index": 0, "delta": {"content": "42"}, "finish_reason": "stop"}]}),
        ]);

        let (address, _) = serve("/v1/chat/completions", reply).await;
        let model = OpenAIChatModel::new("openai", &config(address)).unwrap();

        let deltas = model
            .stream(&[Message::user("?")], &ChatOptions::new())
            .await
            .unwrap()
            .collect()
            .await
            .unwrap();

        let message = schema::concat_messages(&deltas).unwrap();

        assert_eq!(message.content, "42");
        assert_eq!(message.extra.text(OPENAI_REASONING_CONTENT), Some("Thinking hard."));
    }

    #[tokio::test]
    async fn error_payload_ends_the_stream() {
        let reply = sse(&[
            json!({"choices": [{"index": 0, "delta": {"content": "Hel"}}]}),
            json!({"error": {"message": "upstream overloaded", "type": "server_error", "code": "overloaded"}}),
            json!({"choices": [{"index": 0, "delta": {"content": "lo"}}]}),
        ]);

        let (address, _) = serve("/v1/chat/completions", reply).await;
        let model = OpenAIChatModel::new("openai", &config(address)).unwrap();

        let mut reader = model.stream(&[Message::user("hi")], &ChatOptions::new()).await.unwrap();

        assert_eq!(reader.recv().await.unwrap().unwrap().content, "Hel");

        let error = reader.recv().await.unwrap().unwrap_err();
        assert_eq!(
            error.to_string(),
            "Stream error: openai returned an error (overloaded): upstream overloaded"
        );

        assert!(reader.recv().await.is_none());
    }

    #[tokio::test]
    async fn malformed_chunk_is_terminal() {
        let reply = Reply::Sse(vec!["{\"choices\": [".to_string(), "[DONE]".to_string()]);

        let (address, _) = serve("/v1/chat/completions", reply).await;
        let model = OpenAIChatModel::new("openai", &config(address)).unwrap();

        let result = model
            .stream(&[Message::user("hi")], &ChatOptions::new())
            .await
            .unwrap()
            .collect()
            .await;

        assert!(matches!(result, Err(LlmError::InvalidResponse(_))));
    }
}
