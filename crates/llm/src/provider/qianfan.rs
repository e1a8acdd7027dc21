//! Baidu Qianfan through its OpenAI-compatible v2 API.

use std::collections::BTreeMap;

use async_trait::async_trait;
use config::ApiProviderConfig;
use schema::{ConcatRegistry, Message};

use crate::{
    ChatModel, MessageReader,
    messages::openai::{ExtraKeys, keep_first_request_id},
    options::ChatOptions,
    provider::openai::{OpenAICompatible, OpenAIStreamConverter},
    stream::spawn_stream,
};

const DEFAULT_QIANFAN_API_URL: &str = "https://qianfan.baidubce.com/v2";

pub const QIANFAN_REQUEST_ID: &str = "qianfan-request-id";

const QIANFAN_KEYS: ExtraKeys = ExtraKeys {
    request_id: Some(QIANFAN_REQUEST_ID),
    reasoning: None,
};

pub struct QianfanChatModel {
    inner: OpenAICompatible,
}

impl QianfanChatModel {
    pub fn new(name: &str, config: &ApiProviderConfig) -> crate::Result<Self> {
        let headers = config
            .app_id
            .iter()
            .map(|app_id| ("appid".to_string(), app_id.clone()))
            .collect::<BTreeMap<_, _>>();

        let inner = OpenAICompatible::new(name, config, DEFAULT_QIANFAN_API_URL, headers, QIANFAN_KEYS)?;

        Ok(Self { inner })
    }

    pub fn register_extras(registry: &mut ConcatRegistry) {
        registry.register(QIANFAN_REQUEST_ID, keep_first_request_id);
    }
}

#[async_trait]
impl ChatModel for QianfanChatModel {
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
