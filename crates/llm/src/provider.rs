//! Provider adapters and the HTTP plumbing they share.

pub(crate) mod ark;
pub(crate) mod gemini;
pub(crate) mod openai;
pub(crate) mod qianfan;

use reqwest::{RequestBuilder, Response, header::CONTENT_TYPE};
use serde::de::DeserializeOwned;

use crate::error::LlmError;

/// Sends a JSON body and maps transport failures and non-success statuses to errors.
pub(crate) async fn send(provider: &str, request: RequestBuilder, body: Vec<u8>) -> crate::Result<Response> {
    let response = request
        .header(CONTENT_TYPE, "application/json")
        .body(body)
        .send()
        .await
        .map_err(|e| LlmError::ConnectionError(format!("Failed to send request to {provider}: {e}")))?;

    let status = response.status();

    if !status.is_success() {
        let error_text = response.text().await.unwrap_or_else(|_| "Unknown error".to_string());
        log::error!("{provider} API error ({status}): {error_text}");

        return Err(LlmError::from_status(status.as_u16(), error_text));
    }

    Ok(response)
}

/// Reads and parses a complete JSON response body.
pub(crate) async fn read_json<T: DeserializeOwned>(provider: &str, response: Response) -> crate::Result<T> {
    let response_text = response
        .text()
        .await
        .map_err(|e| LlmError::ConnectionError(format!("Failed to read {provider} response body: {e}")))?;

    sonic_rs::from_str(&response_text).map_err(|e| {
        log::error!("Failed to parse {provider} response: {e}");
        log::debug!("Response parsing failed, length: {} bytes", response_text.len());

        LlmError::InvalidResponse(format!("Failed to parse {provider} response: {e}"))
    })
}

/// Serializes a request body with sonic-rs.
pub(crate) fn to_body<T: serde::Serialize>(request: &T) -> crate::Result<Vec<u8>> {
    sonic_rs::to_vec(request).map_err(|e| LlmError::InvalidRequest(format!("Failed to serialize request: {e}")))
}

/// Joins a base URL and a path, tolerating a trailing slash on the base.
pub(crate) fn endpoint(base_url: &str, path: &str) -> String {
    format!("{}/{}", base_url.trim_end_matches('/'), path.trim_start_matches('/'))
}
