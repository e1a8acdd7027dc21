use config::ApiProviderConfig;
use serde::{Deserialize, Serialize};

/// Per-call generation options.
///
/// Unset fields fall back to the defaults configured for the provider, see [`ChatOptions::merge`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChatOptions {
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub max_tokens: Option<u32>,
    pub stop: Option<Vec<String>>,
    /// Tools the model may call. An empty list means no tools.
    pub tools: Vec<ToolInfo>,
    pub tool_choice: Option<ToolChoice>,
}

impl ChatOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }

    pub fn with_tools(mut self, tools: Vec<ToolInfo>) -> Self {
        self.tools = tools;
        self
    }

    pub fn with_tool_choice(mut self, tool_choice: ToolChoice) -> Self {
        self.tool_choice = Some(tool_choice);
        self
    }

    /// Defaults configured for a provider.
    pub fn from_config(config: &ApiProviderConfig) -> Self {
        let defaults = &config.defaults;

        Self {
            model: Some(config.model.clone()),
            temperature: defaults.temperature,
            top_p: defaults.top_p,
            max_tokens: defaults.max_tokens,
            stop: (!defaults.stop.is_empty()).then(|| defaults.stop.clone()),
            tools: Vec::new(),
            tool_choice: None,
        }
    }

    /// Resolves call-time options against `defaults`. Values set on `call` win.
    pub fn merge(defaults: &ChatOptions, call: &ChatOptions) -> ChatOptions {
        ChatOptions {
            model: call.model.clone().or_else(|| defaults.model.clone()),
            temperature: call.temperature.or(defaults.temperature),
            top_p: call.top_p.or(defaults.top_p),
            max_tokens: call.max_tokens.or(defaults.max_tokens),
            stop: call.stop.clone().or_else(|| defaults.stop.clone()),
            tools: if call.tools.is_empty() {
                defaults.tools.clone()
            } else {
                call.tools.clone()
            },
            tool_choice: call.tool_choice.clone().or_else(|| defaults.tool_choice.clone()),
        }
    }

    pub(crate) fn model_or<'a>(&'a self, fallback: &'a str) -> &'a str {
        self.model.as_deref().unwrap_or(fallback)
    }
}

/// A function the model may call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolInfo {
    pub name: String,
    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub description: String,
    /// JSON schema of the arguments object.
    pub parameters: serde_json::Value,
}

impl ToolInfo {
    pub fn new(name: impl Into<String>, description: impl Into<String>, parameters: serde_json::Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            parameters,
        }
    }
}

/// How the model should pick tools.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToolChoice {
    /// The model decides.
    Auto,
    /// Never call a tool.
    None,
    /// Call at least one tool.
    Required,
    /// Call the named function.
    Function(String),
}
