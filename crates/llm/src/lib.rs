//! Chat model and embedding adapters for OpenAI, Volcengine Ark, Baidu Qianfan and Google Gemini.
//!
//! Every adapter speaks the canonical [`Message`] model. Streaming calls return a
//! [`MessageReader`] fed by a background task; the deltas it yields fold back into one message
//! with a [`Concatenator`](schema::Concatenator).

use async_trait::async_trait;
use schema::Message;

mod builder;
pub mod callbacks;
mod embedding;
mod error;
mod http_client;
mod messages;
mod options;
mod provider;
pub mod stream;

pub use builder::Components;
pub use embedding::OpenAIEmbedder;
pub use error::{LlmError, LlmResult as Result, PanicError};
pub use options::{ChatOptions, ToolChoice, ToolInfo};
pub use provider::{
    ark::{ARK_REASONING_CONTENT, ARK_REQUEST_ID, ArkChatModel},
    gemini::{GEMINI_THOUGHT, GeminiChatModel},
    openai::{OPENAI_REASONING_CONTENT, OpenAIChatModel},
    qianfan::{QIANFAN_REQUEST_ID, QianfanChatModel},
};

/// Reader of streamed deltas. A provider or conversion failure is the last item.
pub type MessageReader = pipe::Reader<Message, LlmError>;

/// A chat completion model.
#[async_trait]
pub trait ChatModel: Send + Sync {
    /// Sends one request and waits for the complete answer.
    async fn generate(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<Message>;

    /// Opens a streamed answer.
    ///
    /// Returns once the provider accepted the request, without waiting for the first delta.
    /// Closing or dropping the reader stops the stream and releases the connection.
    async fn stream(&self, messages: &[Message], options: &ChatOptions) -> crate::Result<MessageReader>;

    /// Configured provider name.
    fn name(&self) -> &str;

    /// Model used when the call does not pick one.
    fn model(&self) -> &str;
}

#[async_trait]
pub trait Embedder: Send + Sync {
    /// One vector per input text, in input order.
    async fn embed(&self, texts: &[String]) -> crate::Result<Vec<Vec<f64>>>;

    fn name(&self) -> &str;
}
