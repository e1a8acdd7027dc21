use std::path::Path;

use indoc::indoc;
use regex::Regex;
use serde::Deserialize;
use toml::Value;

use crate::{Config, ProviderType, error::Error};

const ENV_PLACEHOLDER: &str = r"\{\{\s*env\.([A-Za-z_][A-Za-z0-9_]*)\s*\}\}";

pub(crate) fn load<P: AsRef<Path>>(path: P) -> crate::Result<Config> {
    let path = path.as_ref();
    let content = std::fs::read_to_string(path)?;

    log::debug!("Loading configuration from {}", path.display());

    parse(&content)
}

pub(crate) fn parse(content: &str) -> crate::Result<Config> {
    let mut raw_config: Value = toml::from_str(content)?;

    let placeholder = Regex::new(ENV_PLACEHOLDER).map_err(|err| Error::EnvVarSubstitution {
        path: String::new(),
        reason: err.to_string(),
    })?;

    expand_env_vars(&placeholder, &mut Vec::new(), &mut raw_config)?;

    let config = Config::deserialize(raw_config)?;
    validate_has_providers(&config)?;
    validate_providers(&config)?;

    Ok(config)
}

/// Replaces every `{{ env.NAME }}` placeholder in string values with the variable's value.
fn expand_env_vars<'a>(
    placeholder: &Regex,
    path: &mut Vec<Result<&'a str, usize>>,
    value: &'a mut Value,
) -> crate::Result<()> {
    match value {
        Value::String(s) => {
            if placeholder.is_match(s) {
                *s = substitute(placeholder, s).map_err(|reason| Error::EnvVarSubstitution {
                    path: render_path(path),
                    reason,
                })?;
            }
        }
        Value::Array(values) => {
            for (i, value) in values.iter_mut().enumerate() {
                path.push(Err(i));
                expand_env_vars(placeholder, path, value)?;
                path.pop();
            }
        }
        Value::Table(map) => {
            for (key, value) in map {
                path.push(Ok(key.as_str()));
                expand_env_vars(placeholder, path, value)?;
                path.pop();
            }
        }
        Value::Integer(_) | Value::Float(_) | Value::Boolean(_) | Value::Datetime(_) => (),
    }

    Ok(())
}

fn substitute(placeholder: &Regex, input: &str) -> Result<String, String> {
    let mut output = String::with_capacity(input.len());
    let mut last = 0;

    for captures in placeholder.captures_iter(input) {
        let (Some(whole), Some(name)) = (captures.get(0), captures.get(1)) else {
            continue;
        };

        let value = std::env::var(name.as_str())
            .map_err(|err| format!("'{}': {err}", name.as_str()))?;

        output.push_str(&input[last..whole.start()]);
        output.push_str(&value);
        last = whole.end();
    }

    output.push_str(&input[last..]);

    Ok(output)
}

fn render_path(path: &[Result<&str, usize>]) -> String {
    let mut rendered = String::new();

    for segment in path {
        match segment {
            Ok(key) => {
                if !rendered.is_empty() {
                    rendered.push('.');
                }
                rendered.push_str(key);
            }
            Err(i) => rendered.push_str(&format!("[{i}]")),
        }
    }

    rendered
}

fn validate_has_providers(config: &Config) -> crate::Result<()> {
    if config.providers.is_empty() {
        return Err(Error::Validation(
            indoc! {r#"
                No providers configured. At least one provider is required.

                Example configuration:

                  [providers.openai]
                  type = "openai"
                  api_key = "{{ env.OPENAI_API_KEY }}"
                  model = "gpt-4o-mini"
            "#}
            .to_string(),
        ));
    }

    Ok(())
}

fn validate_providers(config: &Config) -> crate::Result<()> {
    for (name, provider) in &config.providers {
        let api = provider.api();

        if api.model.trim().is_empty() {
            return Err(Error::Validation(format!("Provider '{name}' has an empty model")));
        }

        if api.timeout.is_zero() {
            return Err(Error::Validation(format!("Provider '{name}' has a zero timeout")));
        }

        if api.app_id.is_some() && provider.provider_type() != ProviderType::Qianfan {
            log::warn!("Provider '{name}' sets app_id, which only Qianfan providers use; ignoring it");
        }

        if api.api_key.is_none() {
            log::debug!("Provider '{name}' has no API key configured");
        }
    }

    Ok(())
}
