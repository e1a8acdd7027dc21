//! Volcengine Ark, an OpenAI-compatible endpoint with a few streaming quirks.
//!
//! Ark sometimes opens a stream with frames that carry nothing, and sends the first fragment of
//! a tool call without an index while later fragments of the same call have one. The stream
//! converter holds such deltas back and folds them into the next delta that can be placed.

use std::collections::BTreeMap;

use async_trait::async_trait;
use config::ApiProviderConfig;
use schema::{ConcatRegistry, Concatenator, Message};

use crate::{
    ChatModel, MessageReader,
    messages::openai::{ChatCompletionChunk, ExtraKeys, keep_first_request_id},
    options::ChatOptions,
    provider::openai::OpenAICompatible,
    stream::{ChunkConverter, spawn_stream},
};

const DEFAULT_ARK_API_URL: &str = "https://ark.cn-beijing.volces.com/api/v3";

pub const ARK_REQUEST_ID: &str = "ark-request-id";
pub const ARK_REASONING_CONTENT: &str = "ark-reasoning-content";

const ARK_KEYS: ExtraKeys = ExtraKeys {
    request_id: Some(ARK_REQUEST_ID),
    reasoning: Some(ARK_REASONING_CONTENT),
};

pub struct ArkChatModel {
    inner: OpenAICompatible,
    concatenator: Concatenator,
}

impl ArkChatModel {
    /// `concatenator` must carry the functions from [`ArkChatModel::register_extras`].
    pub fn new(name: &str, config: &ApiProviderConfig, concatenator: Concatenator) -> crate::Result<Self> {
        let inner = OpenAICompatible::new(name, config, DEFAULT_ARK_API_URL, BTreeMap::new(), ARK_KEYS)?;

        Ok(Self { inner, concatenator })
    }

    pub fn register_extras(registry: &mut ConcatRegistry) {
        registry.register(ARK_REQUEST_ID, keep_first_request_id);
    }
}

#[async_trait]
impl ChatModel for ArkChatModel {
    async fn generate(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<Message> {
        self.inner.generate(messages, options).await
    }

    async fn stream(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<MessageReader> {
        let native = self.inner.open_stream(messages, options).await?;
        let converter = ArkStreamConverter::new(self.inner.name(), self.concatenator.clone());

        Ok(spawn_stream(self.inner.name(), native, converter))
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

pub(crate) struct ArkStreamConverter {
    provider: String,
    concatenator: Concatenator,
    /// Delta held back until the next delta that carries something.
    pending: Option<Message>,
    /// Index of the most recent indexed tool call fragment.
    last_index: Option<u32>,
}

impl ArkStreamConverter {
    pub fn new(provider: &str, concatenator: Concatenator) -> Self {
        Self {
            provider: provider.to_string(),
            concatenator,
            pending: None,
            last_index: None,
        }
    }

    /// Gives continuation fragments without an index the index of the call they continue.
    fn fill_indices(&mut self, delta: &mut Message) {
        for call in &mut delta.tool_calls {
            match call.index {
                Some(index) => self.last_index = Some(index),
                None if call.id.is_empty() => call.index = self.last_index,
                None => (),
            }
        }
    }

    /// Folds the held-back delta into `delta`.
    ///
    /// The last index-less call of `pending` takes the index of the first indexed fragment in
    /// `delta` only when that fragment continues a call, i.e. has no id of its own. Otherwise the
    /// call stays without an index and is never merged with another call.
    fn place_pending(&self, mut pending: Message, delta: Message) -> crate::Result<Message> {
        let continuation = delta
            .tool_calls
            .iter()
            .find(|call| call.index.is_some())
            .filter(|call| call.id.is_empty())
            .and_then(|call| call.index);

        let unplaced = pending.tool_calls.iter_mut().rev().find(|call| call.index.is_none());

        match (unplaced, continuation) {
            (Some(call), Some(index)) => call.index = Some(index),
            (Some(call), None) => {
                log::debug!("{}: tool call '{}' arrived without an index", self.provider, call.id);
            }
            (None, _) => (),
        }

        Ok(self.concatenator.concat(&[pending, delta])?)
    }
}

fn is_blank(delta: &Message) -> bool {
    delta.content.is_empty()
        && delta.tool_calls.is_empty()
        && delta.response_meta.is_none()
        && !delta.extra.contains_key(ARK_REASONING_CONTENT)
}

/// Whether a freshly received delta has to wait for the next one.
fn must_wait(delta: &Message) -> bool {
    is_blank(delta) || delta.tool_calls.iter().any(|call| call.index.is_none())
}

impl ChunkConverter for ArkStreamConverter {
    type Chunk = ChatCompletionChunk;

    fn convert(&mut self, chunk: ChatCompletionChunk) -> crate::Result<Option<Message>> {
        let Some(mut delta) = chunk.into_delta(&self.provider, &ARK_KEYS)? else {
            return Ok(None);
        };

        self.fill_indices(&mut delta);
        let wait = must_wait(&delta);

        let delta = match self.pending.take() {
            Some(pending) if is_blank(&delta) => self.concatenator.concat(&[pending, delta])?,
            Some(pending) => self.place_pending(pending, delta)?,
            None => delta,
        };

        if wait {
            log::debug!("{}: holding back a delta that cannot be placed yet", self.provider);
            self.pending = Some(delta);

            return Ok(None);
        }

        Ok(Some(delta))
    }

    fn finish(&mut self) -> crate::Result<Option<Message>> {
        Ok(self.pending.take())
    }
}
