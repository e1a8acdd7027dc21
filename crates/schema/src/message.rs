use serde::{Deserialize, Serialize};

use crate::Extra;

/// Role of the message author.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Instructions steering the model.
    System,
    /// End-user input.
    User,
    /// Model output. Every streamed delta carries this role.
    #[default]
    Assistant,
    /// Result of a tool invocation, linked through `tool_call_id`.
    Tool,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::System => "system",
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::Tool => "tool",
        }
    }
}

/// Canonical unit of model input and output.
///
/// A message produced by an adapter, whether a complete response or one streamed delta, is
/// never mutated afterwards. Concatenation always builds a new message.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct Message {
    /// Author of the message.
    pub role: Role,

    /// Text content. May be empty when the message only carries tool calls or metadata.
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub content: String,

    /// Optional author name. Tool results use it for the name of the tool that ran.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    /// Tool invocations requested by the model, in order.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub tool_calls: Vec<ToolCall>,

    /// For `Role::Tool` messages: the id of the call this message answers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tool_call_id: Option<String>,

    /// Finish reason, token usage and log probabilities reported by the provider.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_meta: Option<ResponseMeta>,

    /// Provider-specific side channels such as request ids or reasoning text.
    #[serde(default, skip_serializing_if = "Extra::is_empty")]
    pub extra: Extra,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            ..Default::default()
        }
    }

    pub fn assistant(content: impl Into<String>, tool_calls: Vec<ToolCall>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            tool_calls,
            ..Default::default()
        }
    }

    /// A tool result answering the call identified by `tool_call_id`.
    pub fn tool(content: impl Into<String>, tool_call_id: impl Into<String>) -> Self {
        Self {
            role: Role::Tool,
            content: content.into(),
            tool_call_id: Some(tool_call_id.into()),
            ..Default::default()
        }
    }

    /// Token usage reported for this message, if any.
    pub fn usage(&self) -> Option<&TokenUsage> {
        self.response_meta.as_ref().and_then(|meta| meta.usage.as_ref())
    }

    /// Finish reason reported for this message, if any.
    pub fn finish_reason(&self) -> Option<&str> {
        self.response_meta
            .as_ref()
            .and_then(|meta| meta.finish_reason.as_deref())
    }
}

/// A request from the model to invoke a tool.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ToolCall {
    /// Position of the call within the response.
    ///
    /// Streamed fragments sharing an index belong to the same call. Some providers omit it on
    /// individual fragments.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub index: Option<u32>,

    /// Provider-assigned call id, echoed back in the tool result message.
    #[serde(default)]
    pub id: String,

    /// Call type. Always `function` for the providers in this workspace.
    #[serde(default, rename = "type")]
    pub r#type: String,

    /// The function to invoke.
    #[serde(default)]
    pub function: FunctionCall,
}

impl ToolCall {
    pub fn function(id: impl Into<String>, name: impl Into<String>, arguments: impl Into<String>) -> Self {
        Self {
            index: None,
            id: id.into(),
            r#type: "function".to_string(),
            function: FunctionCall {
                name: name.into(),
                arguments: arguments.into(),
            },
        }
    }

    pub fn with_index(mut self, index: u32) -> Self {
        self.index = Some(index);
        self
    }

    /// Folds a later fragment of the same call into this one.
    ///
    /// Identity fields keep the first non-empty value, arguments append in arrival order.
    pub(crate) fn absorb(&mut self, fragment: &ToolCall) {
        if self.index.is_none() {
            self.index = fragment.index;
        }

        if self.id.is_empty() {
            self.id.clone_from(&fragment.id);
        }

        if self.r#type.is_empty() {
            self.r#type.clone_from(&fragment.r#type);
        }

        if self.function.name.is_empty() {
            self.function.name.clone_from(&fragment.function.name);
        }

        self.function.arguments.push_str(&fragment.function.arguments);
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FunctionCall {
    #[serde(default)]
    pub name: String,

    /// JSON-encoded arguments. Streamed calls build this string fragment by fragment.
    #[serde(default)]
    pub arguments: String,
}

/// Metadata attached to a response or to one of its deltas.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct ResponseMeta {
    /// Why the model stopped generating. Usually only present on the terminal delta.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,

    /// Token accounting. Streams report it once, typically in a usage-only sentinel chunk.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logprobs: Option<LogProbs>,
}

impl ResponseMeta {
    pub fn with_usage(usage: TokenUsage) -> Self {
        Self {
            usage: Some(usage),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

impl TokenUsage {
    pub fn new(prompt_tokens: u32, completion_tokens: u32, total_tokens: u32) -> Self {
        Self {
            prompt_tokens,
            completion_tokens,
            total_tokens,
        }
    }
}

/// Log probabilities of the generated tokens.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogProbs {
    #[serde(default)]
    pub content: Vec<LogProb>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LogProb {
    pub token: String,
    pub logprob: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub top_logprobs: Vec<TopLogProb>,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct TopLogProb {
    pub token: String,
    pub logprob: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<Vec<u8>>,
}
