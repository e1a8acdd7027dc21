use schema::{ExtraValue, Message, ResponseMeta, TokenUsage, ToolCall};
use serde::{Deserialize, Serialize};

use super::GEMINI_THOUGHT;
use crate::error::LlmError;

/// Author of a [`Content`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub(crate) enum GeminiRole {
    User,
    Model,
}

/// One turn of a conversation, in requests and responses alike.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct Content {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<GeminiRole>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Part {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    /// Marks `text` as a thought summary rather than answer text.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub thought: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_call: Option<FunctionCall>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub function_response: Option<FunctionResponse>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FunctionCall {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub args: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct FunctionResponse {
    pub name: String,
    pub response: serde_json::Value,
}

/// Body of `generateContent` responses and of each `streamGenerateContent` event.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub usage_metadata: Option<UsageMetadata>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub error: Option<ApiError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Candidate {
    #[serde(default)]
    pub index: Option<u32>,
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct UsageMetadata {
    #[serde(default)]
    pub prompt_token_count: u32,
    #[serde(default)]
    pub candidates_token_count: u32,
    #[serde(default)]
    pub thoughts_token_count: u32,
    #[serde(default)]
    pub total_token_count: u32,
}

impl From<UsageMetadata> for TokenUsage {
    fn from(usage: UsageMetadata) -> Self {
        // Thinking tokens are billed as output.
        TokenUsage::new(
            usage.prompt_token_count,
            usage.candidates_token_count.saturating_add(usage.thoughts_token_count),
            usage.total_token_count,
        )
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ApiError {
    #[serde(default)]
    pub code: Option<u16>,
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub status: Option<String>,
}

/// Maps Gemini finish reasons onto the OpenAI vocabulary.
pub(crate) fn normalize_finish_reason(reason: &str) -> String {
    match reason {
        "STOP" => "stop".to_string(),
        "MAX_TOKENS" => "length".to_string(),
        "SAFETY" | "RECITATION" | "BLOCKLIST" | "PROHIBITED_CONTENT" | "SPII" => "content_filter".to_string(),
        other => other.to_lowercase(),
    }
}

/// Hands out tool call indices across the chunks of one response.
///
/// Gemini sends every function call whole, so each call gets the next index.
#[derive(Debug, Default)]
pub(crate) struct ToolCallIndices {
    next: u32,
}

impl ToolCallIndices {
    fn next(&mut self) -> u32 {
        let index = self.next;
        self.next += 1;
        index
    }
}

impl GenerateContentResponse {
    /// Converts one streamed event. `None` when the event carries nothing of interest.
    pub fn into_delta(self, provider: &str, indices: &mut ToolCallIndices) -> crate::Result<Option<Message>> {
        let (message, _) = self.convert(provider, indices)?;

        let empty = message.content.is_empty()
            && message.tool_calls.is_empty()
            && message.response_meta.is_none()
            && message.extra.is_empty();

        Ok((!empty).then_some(message))
    }

    pub fn into_message(self, provider: &str) -> crate::Result<Message> {
        let (message, found_candidate) = self.convert(provider, &mut ToolCallIndices::default())?;

        if !found_candidate {
            let reason = match message.finish_reason() {
                Some(reason) => format!("{provider} returned no candidates ({reason})"),
                None => format!("{provider} returned no candidates"),
            };

            return Err(LlmError::InvalidResponse(reason));
        }

        if message.content.is_empty() && message.tool_calls.is_empty() {
            return Err(LlmError::InvalidResponse(format!(
                "{provider} returned a candidate with neither content nor tool calls"
            )));
        }

        Ok(message)
    }

    fn convert(self, provider: &str, indices: &mut ToolCallIndices) -> crate::Result<(Message, bool)> {
        if let Some(error) = self.error {
            let status = error
                .status
                .or_else(|| error.code.map(|code| code.to_string()))
                .unwrap_or_else(|| "unknown".to_string());

            return Err(LlmError::StreamError(format!(
                "{provider} returned an error ({status}): {}",
                error.message
            )));
        }

        let mut message = Message::assistant("", Vec::new());
        let mut meta = ResponseMeta::default();

        let candidate = self
            .candidates
            .into_iter()
            .find(|candidate| candidate.index.unwrap_or(0) == 0);

        let found_candidate = candidate.is_some();

        match candidate {
            Some(candidate) => {
                let mut reasoning = String::new();

                for part in candidate.content.map(|content| content.parts).unwrap_or_default() {
                    match (part.text, part.function_call) {
                        (Some(text), _) if part.thought == Some(true) => reasoning.push_str(&text),
                        (Some(text), None) => message.content.push_str(&text),
                        (text, Some(call)) => {
                            if let Some(text) = text {
                                message.content.push_str(&text);
                            }

                            message.tool_calls.push(tool_call(call, indices.next()));
                        }
                        (None, None) => (),
                    }
                }

                if !reasoning.is_empty() {
                    message.extra.insert(GEMINI_THOUGHT, ExtraValue::ReasoningContent(reasoning));
                }

                meta.finish_reason = candidate
                    .finish_reason
                    .filter(|reason| !reason.is_empty() && reason != "FINISH_REASON_UNSPECIFIED")
                    .map(|reason| normalize_finish_reason(&reason));
            }
            None => {
                if let Some(reason) = self.prompt_feedback.and_then(|feedback| feedback.block_reason) {
                    log::warn!("{provider} blocked the prompt: {reason}");
                    meta.finish_reason = Some("content_filter".to_string());
                }
            }
        }

        meta.usage = self.usage_metadata.map(TokenUsage::from);

        if meta.finish_reason.is_some() || meta.usage.is_some() {
            message.response_meta = Some(meta);
        }

        Ok((message, found_candidate))
    }
}

fn tool_call(call: FunctionCall, index: u32) -> ToolCall {
    let id = call
        .id
        .filter(|id| !id.is_empty())
        .unwrap_or_else(|| format!("call_{}", uuid::Uuid::new_v4().simple()));

    let arguments = match call.args {
        serde_json::Value::Null => "{}".to_string(),
        args => args.to_string(),
    };

    ToolCall::function(id, call.name, arguments).with_index(index)
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn response(value: serde_json::Value) -> GenerateContentResponse {
        serde_json::from_value(value).unwrap()
    }

    #[test]
    fn finish_reasons() {
        let reasons: Vec<_> = ["STOP", "MAX_TOKENS", "SAFETY", "SPII", "MALFORMED_FUNCTION_CALL"]
            .into_iter()
            .map(normalize_finish_reason)
            .collect();

        assert_eq!(reasons, ["stop", "length", "content_filter", "content_filter", "malformed_function_call"]);
    }

    #[test]
    fn function_calls_get_running_indices_and_ids() {
        let mut indices = ToolCallIndices::default();

        let first = response(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"name": "weather", "args": {"city": "Paris"}}}
            ]}}]
        }))
        .into_delta("gemini", &mut indices)
        .unwrap()
        .unwrap();

        let second = response(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"functionCall": {"id": "fc-2", "name": "time", "args": {}}},
                {"functionCall": {"name": "noop"}}
            ]}, "finishReason": "STOP"}]
        }))
        .into_delta("gemini", &mut indices)
        .unwrap()
        .unwrap();

        assert_eq!(first.tool_calls[0].index, Some(0));
        assert!(first.tool_calls[0].id.starts_with("call_"));
        assert_eq!(first.tool_calls[0].function.arguments, r#"{"city":"Paris"}"#);

        assert_eq!(second.tool_calls[0], ToolCall::function("fc-2", "time", "{}").with_index(1));
        assert_eq!(second.tool_calls[1].index, Some(2));
        assert_eq!(second.tool_calls[1].function.arguments, "{}");
        assert_eq!(second.finish_reason(), Some("stop"));
    }

    #[test]
    fn thoughts_go_to_extra() {
        let delta = response(json!({
            "candidates": [{"content": {"role": "model", "parts": [
                {"text": "Considering units.", "thought": true},
                {"text": "42 km"}
            ]}}]
        }))
        .into_delta("gemini", &mut ToolCallIndices::default())
        .unwrap()
        .unwrap();

        assert_eq!(delta.content, "42 km");
        assert_eq!(delta.extra.text(GEMINI_THOUGHT), Some("Considering units."));
    }

    #[test]
    fn only_the_first_candidate_counts() {
        let delta = response(json!({
            "candidates": [{"index": 1, "content": {"parts": [{"text": "other"}]}}]
        }))
        .into_delta("gemini", &mut ToolCallIndices::default())
        .unwrap();

        assert!(delta.is_none());
    }

    #[test]
    fn usage_without_candidates_is_a_delta() {
        let usage = json!({
            "promptTokenCount": 8,
            "candidatesTokenCount": 3,
            "thoughtsTokenCount": 2,
            "totalTokenCount": 13
        });

        let delta = response(json!({ "usageMetadata": usage }))
        .into_delta("gemini", &mut ToolCallIndices::default())
        .unwrap()
        .unwrap();

        assert!(delta.content.is_empty());
        assert_eq!(delta.usage(), Some(&TokenUsage::new(8, 5, 13)));
    }

    #[test]
    fn oversized_token_counts_saturate() {
        let usage: UsageMetadata = serde_json::from_value(json!({
            "promptTokenCount": 1,
            "candidatesTokenCount": u32::MAX,
            "thoughtsTokenCount": 7,
            "totalTokenCount": u32::MAX
        }))
        .unwrap();

        assert_eq!(TokenUsage::from(usage), TokenUsage::new(1, u32::MAX, u32::MAX));
    }

    #[test]
    fn error_payload() {
        let error = response(json!({
            "error": {"code": 503, "message": "The model is overloaded.", "status": "UNAVAILABLE"}
        }))
        .into_delta("gemini", &mut ToolCallIndices::default())
        .unwrap_err();

        assert_eq!(
            error.to_string(),
            "Stream error: gemini returned an error (UNAVAILABLE): The model is overloaded."
        );
    }

    #[test]
    fn blocked_prompt_fails_generate() {
        let error = response(json!({"promptFeedback": {"blockReason": "SAFETY"}}))
            .into_message("gemini")
            .unwrap_err();

        assert_eq!(
            error.to_string(),
            "Invalid response: gemini returned no candidates (content_filter)"
        );
    }

    #[test]
    fn empty_candidate_fails_generate() {
        let error = response(json!({"candidates": [{"content": {"parts": []}, "finishReason": "STOP"}]}))
            .into_message("gemini")
            .unwrap_err();

        assert!(matches!(error, LlmError::InvalidResponse(_)));
    }
}
