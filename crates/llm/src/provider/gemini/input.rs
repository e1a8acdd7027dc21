use std::collections::HashMap;

use schema::{Message, Role};
use serde::Serialize;
use serde_json::Value;

use super::output::{Content, FunctionCall, FunctionResponse, GeminiRole, Part};
use crate::{
    error::LlmError,
    options::{ChatOptions, ToolChoice, ToolInfo},
};

/// Request body for `generateContent` and `streamGenerateContent`.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_config: Option<ToolConfig>,
    pub generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct GenerationConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub top_p: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_output_tokens: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stop_sequences: Option<Vec<String>>,
    /// Only one candidate is ever read.
    pub candidate_count: u32,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct Tool {
    function_declarations: Vec<FunctionDeclaration>,
}

#[derive(Debug, Serialize)]
pub(crate) struct FunctionDeclaration {
    name: String,
    #[serde(skip_serializing_if = "String::is_empty")]
    description: String,
    parameters: Value,
}

impl From<&ToolInfo> for FunctionDeclaration {
    fn from(tool: &ToolInfo) -> Self {
        Self {
            name: tool.name.clone(),
            description: tool.description.clone(),
            parameters: strip_unsupported_schema_fields(tool.parameters.clone()),
        }
    }
}

/// Removes JSON schema keywords Gemini rejects, at every level.
fn strip_unsupported_schema_fields(mut schema: Value) -> Value {
    if let Value::Object(object) = &mut schema {
        object.remove("additionalProperties");
        object.remove("$schema");
        object.remove("default");

        // Gemini only knows these string formats.
        let is_string = object.get("type").and_then(Value::as_str) == Some("string");
        let format = object.get("format").and_then(Value::as_str);

        if is_string && format.is_some_and(|format| format != "enum" && format != "date-time") {
            object.remove("format");
        }

        if let Some(Value::Object(properties)) = object.get_mut("properties") {
            for property in properties.values_mut() {
                *property = strip_unsupported_schema_fields(property.take());
            }
        }

        if let Some(items) = object.get_mut("items") {
            *items = strip_unsupported_schema_fields(items.take());
        }
    }

    schema
}

#[derive(Debug, Serialize, Clone, Copy, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub(crate) enum FunctionCallingMode {
    None,
    Auto,
    Any,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ToolConfig {
    function_calling_config: FunctionCallingConfig,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct FunctionCallingConfig {
    mode: FunctionCallingMode,
    #[serde(skip_serializing_if = "Option::is_none")]
    allowed_function_names: Option<Vec<String>>,
}

impl From<&ToolChoice> for ToolConfig {
    fn from(choice: &ToolChoice) -> Self {
        let (mode, allowed_function_names) = match choice {
            ToolChoice::Auto => (FunctionCallingMode::Auto, None),
            ToolChoice::None => (FunctionCallingMode::None, None),
            ToolChoice::Required => (FunctionCallingMode::Any, None),
            ToolChoice::Function(name) => (FunctionCallingMode::Any, Some(vec![name.clone()])),
        };

        Self {
            function_calling_config: FunctionCallingConfig {
                mode,
                allowed_function_names,
            },
        }
    }
}

impl GenerateContentRequest {
    pub fn new(messages: &[Message], options: &ChatOptions) -> crate::Result<Self> {
        let mut contents: Vec<Content> = Vec::new();
        let mut system = Vec::new();
        let mut tool_call_names: HashMap<&str, &str> = HashMap::new();

        for message in messages {
            match message.role {
                Role::System => {
                    if !message.content.is_empty() {
                        system.push(message.content.as_str());
                    }
                }
                Role::User => contents.push(Content {
                    role: Some(GeminiRole::User),
                    parts: vec![Part::text(message.content.clone())],
                }),
                Role::Assistant => contents.push(assistant_content(message, &mut tool_call_names)?),
                Role::Tool => {
                    let part = function_response(message, &tool_call_names);

                    // Answers to parallel calls travel in one turn.
                    match contents.last_mut() {
                        Some(last) if is_function_responses(last) => last.parts.push(part),
                        _ => contents.push(Content {
                            role: Some(GeminiRole::User),
                            parts: vec![part],
                        }),
                    }
                }
            }
        }

        let system_instruction = (!system.is_empty()).then(|| Content {
            role: None,
            parts: vec![Part::text(system.join("\n"))],
        });

        let tools = if options.tools.is_empty() {
            Vec::new()
        } else {
            vec![Tool {
                function_declarations: options.tools.iter().map(FunctionDeclaration::from).collect(),
            }]
        };

        log::debug!(
            "Gemini request with {} contents and {} tools",
            contents.len(),
            options.tools.len()
        );

        Ok(Self {
            contents,
            system_instruction,
            tools,
            tool_config: options.tool_choice.as_ref().map(ToolConfig::from),
            generation_config: GenerationConfig {
                temperature: options.temperature,
                top_p: options.top_p,
                max_output_tokens: options.max_tokens,
                stop_sequences: options.stop.clone(),
                candidate_count: 1,
            },
        })
    }
}

fn assistant_content<'a>(
    message: &'a Message,
    tool_call_names: &mut HashMap<&'a str, &'a str>,
) -> crate::Result<Content> {
    let mut parts = Vec::new();

    if !message.content.is_empty() {
        parts.push(Part::text(message.content.clone()));
    }

    for call in &message.tool_calls {
        let arguments = call.function.arguments.trim();

        let args = if arguments.is_empty() {
            Value::Object(Default::default())
        } else {
            serde_json::from_str(arguments).map_err(|e| {
                LlmError::InvalidRequest(format!(
                    "Arguments of tool call '{}' are not valid JSON: {e}",
                    call.function.name
                ))
            })?
        };

        tool_call_names.insert(&call.id, &call.function.name);

        parts.push(Part {
            function_call: Some(FunctionCall {
                id: None,
                name: call.function.name.clone(),
                args,
            }),
            ..Default::default()
        });
    }

    Ok(Content {
        role: Some(GeminiRole::Model),
        parts,
    })
}

fn function_response(message: &Message, tool_call_names: &HashMap<&str, &str>) -> Part {
    let call_id = message.tool_call_id.as_deref().unwrap_or_default();

    let name = match message.name.as_deref().filter(|name| !name.is_empty()) {
        Some(name) => name.to_string(),
        None => match tool_call_names.get(call_id) {
            Some(name) => name.to_string(),
            None => {
                log::warn!("Could not find function name for tool call id: {call_id}, using the id");
                call_id.to_string()
            }
        },
    };

    // Gemini expects an object; anything else is wrapped.
    let response = match serde_json::from_str::<Value>(&message.content) {
        Ok(value @ Value::Object(_)) => value,
        _ => serde_json::json!({ "content": message.content }),
    };

    Part {
        function_response: Some(FunctionResponse { name, response }),
        ..Default::default()
    }
}

fn is_function_responses(content: &Content) -> bool {
    content.role == Some(GeminiRole::User)
        && !content.parts.is_empty()
        && content.parts.iter().all(|part| part.function_response.is_some())
}
