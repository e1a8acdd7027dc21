//! Provider configuration structures.

use std::{collections::BTreeMap, fmt, time::Duration};

use duration_str::deserialize_duration;
use secrecy::SecretString;
use serde::Deserialize;

/// Wire protocol family of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProviderType {
    Openai,
    Ark,
    Qianfan,
    Gemini,
}

impl fmt::Display for ProviderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Openai => "openai",
            Self::Ark => "ark",
            Self::Qianfan => "qianfan",
            Self::Gemini => "gemini",
        };

        f.write_str(name)
    }
}

/// Sampling parameters applied when a call does not set them.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GenerationDefaults {
    #[serde(default)]
    pub temperature: Option<f32>,
    #[serde(default)]
    pub top_p: Option<f32>,
    #[serde(default)]
    pub max_tokens: Option<u32>,
    #[serde(default)]
    pub stop: Vec<String>,
}

/// Configuration shared by every HTTP API provider.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ApiProviderConfig {
    /// API key, sent as a bearer token or as the provider's key header.
    #[serde(default)]
    pub api_key: Option<SecretString>,
    /// Overrides the provider's public endpoint.
    #[serde(default)]
    pub base_url: Option<String>,
    /// Chat model used when a call does not name one.
    pub model: String,
    /// Model used by the embedder built for this provider.
    #[serde(default)]
    pub embedding_model: Option<String>,
    /// Timeout for a whole request, including reading a streamed body.
    #[serde(default = "default_timeout", deserialize_with = "deserialize_duration")]
    pub timeout: Duration,
    /// Extra headers sent with every request.
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub defaults: GenerationDefaults,
    /// Ask OpenAI-compatible servers for a trailing usage chunk when streaming.
    #[serde(default = "default_include_usage")]
    pub include_usage: bool,
    /// Qianfan application id, sent as the `appid` header.
    #[serde(default)]
    pub app_id: Option<String>,
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_include_usage() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case", deny_unknown_fields)]
pub enum ProviderConfig {
    /// OpenAI or any server speaking the OpenAI chat completions protocol.
    Openai(ApiProviderConfig),
    /// Volcengine Ark.
    Ark(ApiProviderConfig),
    /// Baidu Qianfan, through its OpenAI-compatible v2 API.
    Qianfan(ApiProviderConfig),
    /// Google Gemini.
    Gemini(ApiProviderConfig),
}

impl ProviderConfig {
    pub fn provider_type(&self) -> ProviderType {
        match self {
            Self::Openai(_) => ProviderType::Openai,
            Self::Ark(_) => ProviderType::Ark,
            Self::Qianfan(_) => ProviderType::Qianfan,
            Self::Gemini(_) => ProviderType::Gemini,
        }
    }

    pub fn api(&self) -> &ApiProviderConfig {
        match self {
            Self::Openai(config) | Self::Ark(config) | Self::Qianfan(config) | Self::Gemini(config) => config,
        }
    }

    pub fn api_key(&self) -> Option<&SecretString> {
        self.api().api_key.as_ref()
    }

    pub fn base_url(&self) -> Option<&str> {
        self.api().base_url.as_deref()
    }

    pub fn model(&self) -> &str {
        &self.api().model
    }
}
