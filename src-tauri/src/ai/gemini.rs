use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};
use std::sync::RwLock;

use super::{AiError, InferenceRequest, VisionModel};

/// Google Gemini `generateContent` over REST.
///
/// The key travels in the `x-goog-api-key` header, not the query string,
/// so it never shows up in logged URLs.
pub struct GeminiModel {
    endpoint: RwLock<String>,
    client: Client,
}

impl GeminiModel {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            endpoint: RwLock::new(endpoint.into()),
            client: Client::new(),
        }
    }

    /// Point subsequent requests at a different base URL.
    pub fn set_endpoint(&self, endpoint: &str) {
        let mut current = self.endpoint.write().unwrap_or_else(|e| e.into_inner());
        if *current != endpoint {
            log::info!("Gemini endpoint set to {}", endpoint);
            *current = endpoint.to_string();
        }
    }

    fn url(&self, model: &str) -> String {
        let endpoint = self.endpoint.read().unwrap_or_else(|e| e.into_inner());
        format!(
            "{}/models/{}:generateContent",
            endpoint.trim_end_matches('/'),
            model
        )
    }

    fn build_request_body(request: &InferenceRequest) -> Value {
        let mut parts = vec![json!({ "text": request.prompt })];
        parts.extend(request.images.iter().map(|img| {
            json!({
                "inline_data": {
                    "mime_type": img.mime_type,
                    "data": img.to_base64(),
                }
            })
        }));

        json!({
            "contents": [
                {
                    "role": "user",
                    "parts": parts
                }
            ]
        })
    }
}

#[async_trait]
impl VisionModel for GeminiModel {
    async fn generate(&self, api_key: &str, request: &InferenceRequest) -> Result<String, AiError> {
        let body = Self::build_request_body(request);
        let start = std::time::Instant::now();

        let response = self
            .client
            .post(self.url(&request.model))
            .header("content-type", "application/json")
            .header("x-goog-api-key", api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| AiError::ConnectionError(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response
                .text()
                .await
                .unwrap_or_else(|_| "failed to read error body".into());
            let detail = error_message(&error_body);
            log::debug!("Gemini returned {}: {}", status, error_body);

            return Err(match status.as_u16() {
                401 | 403 => AiError::AuthError(detail),
                429 => AiError::RateLimited(detail),
                code => AiError::Api { status: code, body: detail },
            });
        }

        let parsed: Value = response
            .json()
            .await
            .map_err(|e| AiError::InvalidResponse(e.to_string()))?;
        let text = extract_text(&parsed)?;
        log::info!(
            "Received response from Gemini ({} chars, {}ms)",
            text.len(),
            start.elapsed().as_millis()
        );
        Ok(text)
    }

    fn name(&self) -> &str {
        "gemini"
    }
}

/// Pull `error.message` out of a Gemini error body, falling back to the
/// raw body when it is not the usual JSON shape.
fn error_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|v| {
            let message = v.pointer("/error/message")?.as_str()?.to_string();
            match v.pointer("/error/status").and_then(|s| s.as_str()) {
                // RESOURCE_EXHAUSTED → "resource exhausted" so it classifies as quota.
                Some(status) => Some(format!(
                    "{} ({})",
                    message,
                    status.replace('_', " ").to_lowercase()
                )),
                None => Some(message),
            }
        })
        .unwrap_or_else(|| body.trim().to_string())
}

/// Concatenate the text parts of the first candidate.
fn extract_text(response: &Value) -> Result<String, AiError> {
    if let Some(reason) = response
        .pointer("/promptFeedback/blockReason")
        .and_then(|r| r.as_str())
    {
        return Err(AiError::ModelError(format!("prompt blocked: {}", reason)));
    }

    let parts = response
        .pointer("/candidates/0/content/parts")
        .and_then(|p| p.as_array())
        .ok_or_else(|| {
            let reason = response
                .pointer("/candidates/0/finishReason")
                .and_then(|r| r.as_str())
                .unwrap_or("no candidates");
            AiError::InvalidResponse(format!("no content in response ({})", reason))
        })?;

    let text: String = parts
        .iter()
        .filter_map(|p| p.get("text").and_then(|t| t.as_str()))
        .collect();
    if text.is_empty() {
        return Err(AiError::InvalidResponse("empty text in response".into()));
    }
    Ok(text)
}
