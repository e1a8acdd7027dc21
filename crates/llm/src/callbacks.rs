//! Observability hooks around chat model calls.

use std::sync::Arc;

use async_trait::async_trait;
use schema::{Concatenator, Message};

use crate::{ChatModel, MessageReader, error::LlmError, options::ChatOptions};

/// Identifies the call a callback is about.
#[derive(Debug, Clone)]
pub struct RunInfo {
    pub provider: String,
    pub model: String,
}

/// Receives notifications about chat model calls.
///
/// Every method has a no-op default. Handlers must not block.
pub trait CallbackHandler: Send + Sync {
    fn on_start(&self, _info: &RunInfo, _messages: &[Message]) {}

    fn on_end(&self, _info: &RunInfo, _message: &Message) {}

    fn on_error(&self, _info: &RunInfo, _error: &LlmError) {}

    /// Receives a copy of a streamed response.
    ///
    /// The handler owns the reader and must drain or drop it; a copy that is kept but never
    /// read retains every delta in memory.
    fn on_stream(&self, _info: &RunInfo, reader: MessageReader) {
        drop(reader);
    }
}

#[derive(Clone, Default)]
pub struct Callbacks {
    handlers: Vec<Arc<dyn CallbackHandler>>,
}

impl Callbacks {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_handler(mut self, handler: impl CallbackHandler + 'static) -> Self {
        self.handlers.push(Arc::new(handler));
        self
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    fn start(&self, info: &RunInfo, messages: &[Message]) {
        for handler in &self.handlers {
            handler.on_start(info, messages);
        }
    }

    fn end(&self, info: &RunInfo, message: &Message) {
        for handler in &self.handlers {
            handler.on_end(info, message);
        }
    }

    fn error(&self, info: &RunInfo, error: &LlmError) {
        for handler in &self.handlers {
            handler.on_error(info, error);
        }
    }

    /// Hands one copy of `reader` to every handler and returns the copy for the caller.
    fn observe_stream(&self, info: &RunInfo, reader: MessageReader) -> MessageReader {
        if self.handlers.is_empty() {
            return reader;
        }

        let mut copies = reader.copy(self.handlers.len() + 1).into_iter();
        let primary = copies.next().unwrap_or_else(|| MessageReader::from_items(Vec::new()));

        for (handler, copy) in self.handlers.iter().zip(copies) {
            handler.on_stream(info, copy);
        }

        primary
    }
}

impl std::fmt::Debug for Callbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Callbacks").field("handlers", &self.handlers.len()).finish()
    }
}

/// Wrapper that reports every call of the inner model to the callbacks.
pub struct ChatModelWithCallbacks<M> {
    inner: M,
    callbacks: Callbacks,
}

impl<M> ChatModelWithCallbacks<M> {
    pub fn new(inner: M, callbacks: Callbacks) -> Self {
        Self { inner, callbacks }
    }
}

impl<M: ChatModel> ChatModelWithCallbacks<M> {
    fn run_info(&self, options: &ChatOptions) -> RunInfo {
        RunInfo {
            provider: self.inner.name().to_string(),
            model: options.model_or(self.inner.model()).to_string(),
        }
    }
}

#[async_trait]
impl<M> ChatModel for ChatModelWithCallbacks<M>
where
    M: ChatModel,
{
    async fn generate(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<Message> {
        let info = self.run_info(options);
        self.callbacks.start(&info, messages);

        let result = self.inner.generate(messages, options).await;

        match &result {
            Ok(message) => self.callbacks.end(&info, message),
            Err(error) => self.callbacks.error(&info, error),
        }

        result
    }

    async fn stream(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<MessageReader> {
        let info = self.run_info(options);
        self.callbacks.start(&info, messages);

        match self.inner.stream(messages, options).await {
            Ok(reader) => Ok(self.callbacks.observe_stream(&info, reader)),
            Err(error) => {
                self.callbacks.error(&info, &error);
                Err(error)
            }
        }
    }

    fn name(&self) -> &str {
        self.inner.name()
    }

    fn model(&self) -> &str {
        self.inner.model()
    }
}

/// Logs calls through the `log` facade.
///
/// Streamed responses are drained on a separate task, concatenated and logged once complete.
#[derive(Debug, Clone, Default)]
pub struct LogHandler {
    concatenator: Concatenator,
}

impl LogHandler {
    pub fn new(concatenator: Concatenator) -> Self {
        Self { concatenator }
    }
}

fn describe(message: &Message) -> String {
    let finish_reason = message.finish_reason().unwrap_or("none");

    match message.usage() {
        Some(usage) => format!(
            "finish_reason={finish_reason} prompt_tokens={} completion_tokens={} total_tokens={}",
            usage.prompt_tokens, usage.completion_tokens, usage.total_tokens
        ),
        None => format!("finish_reason={finish_reason} usage=unreported"),
    }
}

impl CallbackHandler for LogHandler {
    fn on_start(&self, info: &RunInfo, messages: &[Message]) {
        log::debug!("{}/{}: request with {} messages", info.provider, info.model, messages.len());
    }

    fn on_end(&self, info: &RunInfo, message: &Message) {
        log::info!(
            "{}/{}: completed with {} tool calls, {}",
            info.provider,
            info.model,
            message.tool_calls.len(),
            describe(message)
        );
    }

    fn on_error(&self, info: &RunInfo, error: &LlmError) {
        log::warn!("{}/{}: request failed: {error}", info.provider, info.model);
    }

    fn on_stream(&self, info: &RunInfo, reader: MessageReader) {
        let info = info.clone();
        let concatenator = self.concatenator.clone();

        tokio::spawn(async move {
            let deltas = match reader.collect().await {
                Ok(deltas) => deltas,
                Err(error) => {
                    log::warn!("{}/{}: stream failed: {error}", info.provider, info.model);
                    return;
                }
            };

            if deltas.is_empty() {
                log::debug!("{}/{}: stream ended without deltas", info.provider, info.model);
                return;
            }

            match concatenator.concat(&deltas) {
                Ok(message) => log::info!(
                    "{}/{}: stream completed with {} deltas, {}",
                    info.provider,
                    info.model,
                    deltas.len(),
                    describe(&message)
                ),
                Err(error) => log::warn!(
                    "{}/{}: failed to concatenate stream: {error}",
                    info.provider,
                    info.model
                ),
            }
        });
    }
}
