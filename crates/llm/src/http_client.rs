use std::{collections::BTreeMap, time::Duration};

use reqwest::{
    Client,
    header::{CONNECTION, HeaderMap, HeaderName, HeaderValue},
};

use crate::error::LlmError;

pub(crate) fn default_http_client_builder(timeout: Duration, mut headers: HeaderMap) -> reqwest::ClientBuilder {
    headers.insert(CONNECTION, HeaderValue::from_static("keep-alive"));

    // A short idle timeout lets pooled connections pick up DNS changes.
    Client::builder()
        .timeout(timeout)
        .pool_idle_timeout(Some(Duration::from_secs(5)))
        .tcp_nodelay(true)
        .tcp_keepalive(Some(Duration::from_secs(60)))
        .default_headers(headers)
}

/// Builds a provider's client, sending `headers` with every request.
pub(crate) fn build_client(
    provider: &str,
    timeout: Duration,
    headers: &BTreeMap<String, String>,
) -> crate::Result<Client> {
    let mut header_map = HeaderMap::new();

    for (name, value) in headers {
        let name = HeaderName::from_bytes(name.as_bytes())
            .map_err(|e| LlmError::Config(format!("Invalid header name '{name}' for provider '{provider}': {e}")))?;

        let value = HeaderValue::from_str(value)
            .map_err(|e| LlmError::Config(format!("Invalid value for header '{name}' of provider '{provider}': {e}")))?;

        header_map.insert(name, value);
    }

    default_http_client_builder(timeout, header_map).build().map_err(|e| {
        log::error!("Failed to create HTTP client for provider '{provider}': {e}");
        LlmError::Config(format!("Failed to create HTTP client: {e}"))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_invalid_header_names() {
        let headers = BTreeMap::from([("bad header".to_string(), "x".to_string())]);

        let error = build_client("test", Duration::from_secs(1), &headers).unwrap_err();

        assert!(error.to_string().starts_with("Invalid configuration: Invalid header name 'bad header'"));
    }

    #[test]
    fn accepts_custom_headers() {
        let headers = BTreeMap::from([("x-team".to_string(), "research".to_string())]);

        assert!(build_client("test", Duration::from_secs(1), &headers).is_ok());
    }
}
