//! Wire types of the OpenAI chat completions protocol, shared by every OpenAI-compatible
//! provider.

use schema::{ExtraValue, FunctionCall, LogProb, LogProbs, Message, ResponseMeta, TokenUsage, ToolCall};
use serde::{Deserialize, Serialize};

use crate::{
    error::LlmError,
    options::{ChatOptions, ToolChoice, ToolInfo},
};

/// Extra keys a provider stores its side-channel values under.
#[derive(Debug, Clone, Copy)]
pub(crate) struct ExtraKeys {
    /// Key for the completion id, when the provider exposes it as a request id.
    pub request_id: Option<&'static str>,
    /// Key for `reasoning_content` deltas.
    pub reasoning: Option<&'static str>,
}

#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest<'a> {
    pub model: &'a str,
    pub messages: Vec<RequestMessage<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop: Option<&'a [String]>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<RequestTool<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_choice: Option<RequestToolChoice<'a>>,
    pub stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stream_options: Option<StreamOptions>,
}

impl<'a> ChatCompletionRequest<'a> {
    pub fn new(model: &'a str, messages: &'a [Message], options: &'a ChatOptions) -> Self {
        Self {
            model,
            messages: messages.iter().map(RequestMessage::from).collect(),
            temperature: options.temperature,
            top_p: options.top_p,
            max_tokens: options.max_tokens,
            stop: options.stop.as_deref(),
            tools: options.tools.iter().map(RequestTool::from).collect(),
            tool_choice: options.tool_choice.as_ref().map(RequestToolChoice::from),
            stream: false,
            stream_options: None,
        }
    }

    /// Switches the request to streaming, asking for a trailing usage chunk if `include_usage`.
    pub fn streaming(mut self, include_usage: bool) -> Self {
        self.stream = true;
        self.stream_options = include_usage.then_some(StreamOptions { include_usage: true });
        self
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct StreamOptions {
    pub include_usage: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct RequestMessage<'a> {
    role: &'static str,
    /// Null for assistant messages that only carry tool calls.
    content: Option<&'a str>,
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    tool_calls: Vec<RequestToolCall<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    tool_call_id: Option<&'a str>,
}

impl<'a> From<&'a Message> for RequestMessage<'a> {
    fn from(message: &'a Message) -> Self {
        let content = if message.content.is_empty() && !message.tool_calls.is_empty() {
            None
        } else {
            Some(message.content.as_str())
        };

        Self {
            role: message.role.as_str(),
            content,
            name: message.name.as_deref(),
            tool_calls: message.tool_calls.iter().map(RequestToolCall::from).collect(),
            tool_call_id: message.tool_call_id.as_deref(),
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RequestToolCall<'a> {
    id: &'a str,
    r#type: &'static str,
    function: RequestFunctionCall<'a>,
}

#[derive(Debug, Serialize)]
struct RequestFunctionCall<'a> {
    name: &'a str,
    arguments: &'a str,
}

impl<'a> From<&'a ToolCall> for RequestToolCall<'a> {
    fn from(call: &'a ToolCall) -> Self {
        Self {
            id: &call.id,
            r#type: "function",
            function: RequestFunctionCall {
                name: &call.function.name,
                arguments: &call.function.arguments,
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct RequestTool<'a> {
    r#type: &'static str,
    function: &'a ToolInfo,
}

impl<'a> From<&'a ToolInfo> for RequestTool<'a> {
    fn from(tool: &'a ToolInfo) -> Self {
        Self {
            r#type: "function",
            function: tool,
        }
    }
}

#[derive(Debug, Serialize)]
#[serde(untagged)]
pub(crate) enum RequestToolChoice<'a> {
    Mode(&'static str),
    Function {
        r#type: &'static str,
        function: FunctionName<'a>,
    },
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionName<'a> {
    name: &'a str,
}

impl<'a> From<&'a ToolChoice> for RequestToolChoice<'a> {
    fn from(choice: &'a ToolChoice) -> Self {
        match choice {
            ToolChoice::Auto => Self::Mode("auto"),
            ToolChoice::None => Self::Mode("none"),
            ToolChoice::Required => Self::Mode("required"),
            ToolChoice::Function(name) => Self::Function {
                r#type: "function",
                function: FunctionName { name },
            },
        }
    }
}

/// Non-streaming chat completion response.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ResponseChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ResponseChoice {
    #[serde(default)]
    pub index: u32,
    pub message: WireMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub logprobs: Option<WireLogProbs>,
}

/// One streamed chunk. Servers may also send an `error` object instead of choices.
#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionChunk {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub choices: Vec<ChunkChoice>,
    #[serde(default)]
    pub usage: Option<Usage>,
    #[serde(default)]
    pub error: Option<WireError>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChunkChoice {
    #[serde(default)]
    pub index: u32,
    #[serde(default)]
    pub delta: WireMessage,
    #[serde(default)]
    pub finish_reason: Option<String>,
    #[serde(default)]
    pub logprobs: Option<WireLogProbs>,
}

/// Message body of a response choice or a streamed delta.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct WireMessage {
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default)]
    pub reasoning_content: Option<String>,
    #[serde(default)]
    pub tool_calls: Option<Vec<WireToolCall>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireToolCall {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub function: Option<WireFunctionCall>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireFunctionCall {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub arguments: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireLogProbs {
    #[serde(default)]
    pub content: Option<Vec<LogProb>>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize)]
pub(crate) struct Usage {
    #[serde(default)]
    pub prompt_tokens: u32,
    #[serde(default)]
    pub completion_tokens: u32,
    #[serde(default)]
    pub total_tokens: u32,
}

impl From<Usage> for TokenUsage {
    fn from(usage: Usage) -> Self {
        TokenUsage::new(usage.prompt_tokens, usage.completion_tokens, usage.total_tokens)
    }
}

#[derive(Debug, Deserialize)]
pub(crate) struct WireError {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub r#type: Option<String>,
    #[serde(default)]
    pub code: Option<serde_json::Value>,
}

impl WireError {
    fn into_error(self, provider: &str) -> LlmError {
        let code = match self.code {
            Some(serde_json::Value::String(code)) => Some(code),
            Some(serde_json::Value::Number(code)) => Some(code.to_string()),
            _ => self.r#type,
        };

        match code {
            Some(code) => LlmError::StreamError(format!("{provider} returned an error ({code}): {}", self.message)),
            None => LlmError::StreamError(format!("{provider} returned an error: {}", self.message)),
        }
    }
}

impl WireToolCall {
    fn into_tool_call(self) -> ToolCall {
        let function = self.function.map(|function| FunctionCall {
            name: function.name.unwrap_or_default(),
            arguments: function.arguments.unwrap_or_default(),
        });

        ToolCall {
            index: self.index,
            id: self.id.unwrap_or_default(),
            r#type: self.r#type.unwrap_or_default(),
            function: function.unwrap_or_default(),
        }
    }
}

fn build_message(
    body: WireMessage,
    finish_reason: Option<String>,
    logprobs: Option<WireLogProbs>,
    keys: &ExtraKeys,
) -> Message {
    let tool_calls = body
        .tool_calls
        .unwrap_or_default()
        .into_iter()
        .map(WireToolCall::into_tool_call)
        .collect();

    let mut message = Message::assistant(body.content.unwrap_or_default(), tool_calls);

    let finish_reason = finish_reason.filter(|reason| !reason.is_empty());
    let logprobs = logprobs
        .and_then(|logprobs| logprobs.content)
        .map(|content| LogProbs { content });

    if finish_reason.is_some() || logprobs.is_some() {
        message.response_meta = Some(ResponseMeta {
            finish_reason,
            usage: None,
            logprobs,
        });
    }

    if let (Some(key), Some(reasoning)) = (keys.reasoning, body.reasoning_content)
        && !reasoning.is_empty()
    {
        message.extra.insert(key, ExtraValue::ReasoningContent(reasoning));
    }

    message
}

fn attach_common(message: &mut Message, id: Option<String>, usage: Option<Usage>, keys: &ExtraKeys) {
    if let Some(usage) = usage {
        message.response_meta.get_or_insert_with(ResponseMeta::default).usage = Some(usage.into());
    }

    if let (Some(key), Some(id)) = (keys.request_id, id)
        && !id.is_empty()
    {
        message.extra.insert(key, ExtraValue::RequestId(id));
    }
}

impl ChatCompletionChunk {
    /// Converts the chunk into a delta.
    ///
    /// Only the choice at index 0 is considered. A chunk without that choice still yields a
    /// delta when it reports usage; anything else yields `None`.
    pub fn into_delta(self, provider: &str, keys: &ExtraKeys) -> crate::Result<Option<Message>> {
        if let Some(error) = self.error {
            return Err(error.into_error(provider));
        }

        let choice = self.choices.into_iter().find(|choice| choice.index == 0);

        let mut message = match choice {
            Some(choice) => build_message(choice.delta, choice.finish_reason, choice.logprobs, keys),
            None if self.usage.is_some() => Message::assistant("", Vec::new()),
            None => return Ok(None),
        };

        attach_common(&mut message, self.id, self.usage, keys);

        Ok(Some(message))
    }
}

impl ChatCompletionResponse {
    pub fn into_message(self, provider: &str, keys: &ExtraKeys) -> crate::Result<Message> {
        let Some(choice) = self.choices.into_iter().find(|choice| choice.index == 0) else {
            return Err(LlmError::InvalidResponse(format!("{provider} returned no choices")));
        };

        let mut message = build_message(choice.message, choice.finish_reason, choice.logprobs, keys);

        if message.content.is_empty() && message.tool_calls.is_empty() {
            return Err(LlmError::InvalidResponse(format!(
                "{provider} returned a choice with neither content nor tool calls"
            )));
        }

        attach_common(&mut message, self.id, self.usage, keys);

        Ok(message)
    }
}

/// Merge function for request ids: the first non-empty id wins.
pub(crate) fn keep_first_request_id(left: ExtraValue, right: ExtraValue) -> Result<ExtraValue, String> {
    match (left, right) {
        (ExtraValue::RequestId(left), ExtraValue::RequestId(right)) => {
            Ok(ExtraValue::RequestId(if left.is_empty() { right } else { left }))
        }
        (left, right) => Err(format!("expected request ids, got {} and {}", left.kind(), right.kind())),
    }
}

#[cfg(test)]
mod tests {
    use insta::assert_json_snapshot;
    use schema::Role;

    use super::*;

    const KEYS: ExtraKeys = ExtraKeys {
        request_id: Some("test-request-id"),
        reasoning: Some("test-reasoning"),
    };

    fn chunk(json: &str) -> ChatCompletionChunk {
        sonic_rs::from_str(json).unwrap()
    }

    #[test]
    fn request_body() {
        let messages = vec![
            Message::system("You are terse."),
            Message::user("Weather in Paris?"),
            Message::assistant("", vec![ToolCall::function("call_1", "weather", "{}")]),
            Message::tool("sunny", "call_1"),
        ];

        let options = ChatOptions::new()
            .with_temperature(0.5)
            .with_tools(vec![ToolInfo::new("weather", "Current weather", serde_json::json!({"type": "object"}))])
            .with_tool_choice(ToolChoice::Function("weather".to_string()));

        let request = ChatCompletionRequest::new("gpt-4o-mini", &messages, &options).streaming(true);

        assert_json_snapshot!(request, @r#"
        {
          "model": "gpt-4o-mini",
          "messages": [
            {
              "role": "system",
              "content": "You are terse."
            },
            {
              "role": "user",
              "content": "Weather in Paris?"
            },
            {
              "role": "assistant",
              "content": null,
              "tool_calls": [
                {
                  "id": "call_1",
                  "type": "function",
                  "function": {
                    "name": "weather",
                    "arguments": "{}"
                  }
                }
              ]
            },
            {
              "role": "tool",
              "content": "sunny",
              "tool_call_id": "call_1"
            }
          ],
          "temperature": 0.5,
          "tools": [
            {
              "type": "function",
              "function": {
                "name": "weather",
                "description": "Current weather",
                "parameters": {
                  "type": "object"
                }
              }
            }
          ],
          "tool_choice": {
            "type": "function",
            "function": {
              "name": "weather"
            }
          },
          "stream": true,
          "stream_options": {
            "include_usage": true
          }
        }
        "#);
    }

    #[test]
    fn usage_only_chunk_becomes_a_delta() {
        let delta = chunk(
            r#"{"id":"c1","choices":[],"usage":{"prompt_tokens":7,"completion_tokens":3,"total_tokens":10}}"#,
        )
        .into_delta("test", &KEYS)
        .unwrap()
        .unwrap();

        assert!(delta.content.is_empty());
        assert!(delta.tool_calls.is_empty());
        assert_eq!(delta.usage(), Some(&TokenUsage::new(7, 3, 10)));
        assert_eq!(delta.extra.text("test-request-id"), Some("c1"));
    }

    #[test]
    fn non_zero_choices_are_skipped() {
        let delta = chunk(r#"{"choices":[{"index":1,"delta":{"content":"other"}}]}"#)
            .into_delta("test", &KEYS)
            .unwrap();

        assert!(delta.is_none());
    }

    #[test]
    fn heartbeat_without_choices_is_skipped() {
        let delta = chunk(r#"{"id":"c1","choices":[]}"#).into_delta("test", &KEYS).unwrap();

        assert!(delta.is_none());
    }

    #[test]
    fn delta_with_tool_call_fragment_and_reasoning() {
        let delta = chunk(
            r#"{"choices":[{"index":0,"delta":{"reasoning_content":"hmm","tool_calls":[{"index":0,"id":"call_1","type":"function","function":{"name":"weather","arguments":"{\"ci"}}]}}]}"#,
        )
        .into_delta("test", &KEYS)
        .unwrap()
        .unwrap();

        assert_eq!(delta.role, Role::Assistant);
        assert_eq!(delta.tool_calls.len(), 1);
        assert_eq!(delta.tool_calls[0].index, Some(0));
        assert_eq!(delta.tool_calls[0].function.name, "weather");
        assert_eq!(delta.tool_calls[0].function.arguments, "{\"ci");
        assert_eq!(delta.extra.text("test-reasoning"), Some("hmm"));
        assert_eq!(delta.response_meta, None);
    }

    #[test]
    fn error_payload_is_a_stream_error() {
        let error = chunk(r#"{"error":{"message":"overloaded","code":"server_busy"}}"#)
            .into_delta("test", &KEYS)
            .unwrap_err();

        assert_eq!(error.to_string(), "Stream error: test returned an error (server_busy): overloaded");
    }

    #[test]
    fn response_without_choices_is_rejected() {
        let response: ChatCompletionResponse = sonic_rs::from_str(r#"{"id":"r1","choices":[]}"#).unwrap();
        let error = response.into_message("test", &KEYS).unwrap_err();

        assert!(matches!(error, LlmError::InvalidResponse(_)));
    }

    #[test]
    fn response_without_content_or_tool_calls_is_rejected() {
        let response: ChatCompletionResponse = sonic_rs::from_str(
            r#"{"choices":[{"index":0,"message":{"role":"assistant","content":null},"finish_reason":"stop"}]}"#,
        )
        .unwrap();

        let error = response.into_message("test", &KEYS).unwrap_err();

        assert_eq!(
            error.to_string(),
            "Invalid response: test returned a choice with neither content nor tool calls"
        );
    }

    #[test]
    fn response_message() {
        let response: ChatCompletionResponse = sonic_rs::from_str(
            r#"{"id":"r1","choices":[{"index":0,"message":{"role":"assistant","content":"Hi"},"finish_reason":"stop"}],"usage":{"prompt_tokens":2,"completion_tokens":1,"total_tokens":3}}"#,
        )
        .unwrap();

        let message = response.into_message("test", &KEYS).unwrap();

        assert_eq!(message.content, "Hi");
        assert_eq!(message.finish_reason(), Some("stop"));
        assert_eq!(message.usage(), Some(&TokenUsage::new(2, 1, 3)));
        assert_eq!(message.extra.text("test-request-id"), Some("r1"));
    }

    #[test]
    fn request_id_merge_keeps_first() {
        let merged = keep_first_request_id(
            ExtraValue::RequestId("a".to_string()),
            ExtraValue::RequestId("b".to_string()),
        );
        assert_eq!(merged, Ok(ExtraValue::RequestId("a".to_string())));

        let merged = keep_first_request_id(
            ExtraValue::RequestId(String::new()),
            ExtraValue::RequestId("b".to_string()),
        );
        assert_eq!(merged, Ok(ExtraValue::RequestId("b".to_string())));

        assert!(keep_first_request_id(ExtraValue::Integer(1), ExtraValue::RequestId("b".to_string())).is_err());
    }
}
