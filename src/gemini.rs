use crate::config::GeminiConfig;
use crate::models::ImagePayload;
use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::{error, info};

pub const IDENTIFY_PROMPT: &str = "Identify this plant. Provide its common name, scientific name, care instructions, description, origin, and botanical characteristics. \
Format the response with clear sections, one per line, using exactly these labels: \
\"Common Name:\", \"Scientific Name:\", \"Description:\", \"Origin:\", \"Height:\", \"Sunlight:\", \"Watering:\". \
List up to three care instructions as lines starting with \"1.\", \"2.\" and \"3.\".";

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("HTTP error! status: {status}, body: {body}")]
    Transport { status: StatusCode, body: String },
    #[error("network error: {0}")]
    Network(String),
    #[error("Unexpected API response structure: {0}")]
    ContractViolation(String),
    #[error("GEMINI_API_KEY is not configured")]
    NotConfigured,
}

/// Anything that can turn an image into the model's free-text answer.
#[async_trait]
pub trait PlantClassifier: Send + Sync {
    async fn classify(&self, payload: &ImagePayload) -> Result<String, GeminiError>;
}

// Shorten base64 image data in a JSON body so request logs stay readable
fn truncate_base64_in_json(value: &mut serde_json::Value) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let serde_json::Value::String(s) = val {
                        if s.len() > 100 {
                            *val = serde_json::Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        serde_json::Value::Array(arr) => {
            for val in arr.iter_mut() {
                truncate_base64_in_json(val);
            }
        }
        _ => {}
    }
}

pub struct GeminiClient {
    client: Client,
    api_key: Option<String>,
    base_url: String,
    model: String,
}

impl GeminiClient {
    pub fn new(config: &GeminiConfig) -> Result<Self, GeminiError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| GeminiError::Network(e.to_string()))?;
        Ok(Self {
            client,
            api_key: config.api_key.clone(),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            model: config.model.clone(),
        })
    }

    pub fn build_request_body(payload: &ImagePayload) -> serde_json::Value {
        let data = base64::engine::general_purpose::STANDARD.encode(&payload.bytes);
        json!({
            "contents": [{
                "parts": [
                    { "text": IDENTIFY_PROMPT },
                    { "inlineData": { "mimeType": payload.mime_type, "data": data } }
                ]
            }]
        })
    }

    async fn perform_api_call(&self, api_key: &str, payload: &ImagePayload) -> Result<String, GeminiError> {
        let url = format!("{}/models/{}:generateContent", self.base_url, self.model);
        info!("🔗 Making request to: {}", url);

        let request_body = Self::build_request_body(payload);
        let mut logged = request_body.clone();
        truncate_base64_in_json(&mut logged);
        info!("📤 Request body: {}", logged);

        let response = self.client
            .post(&url)
            .query(&[("key", api_key)])
            .json(&request_body)
            .send()
            .await
            .map_err(|e| GeminiError::Network(e.to_string()))?;

        let status = response.status();
        info!("📥 Response status: {}", status);

        if !status.is_success() {
            let error_body = response.text().await.unwrap_or_default();
            error!("❌ API Error response: {}", error_body);
            return Err(GeminiError::Transport { status, body: error_body });
        }

        let response_text = response.text().await.map_err(|e| GeminiError::Network(e.to_string()))?;

        extract_first_text(&response_text)
    }
}

#[async_trait]
impl PlantClassifier for GeminiClient {
    async fn classify(&self, payload: &ImagePayload) -> Result<String, GeminiError> {
        let Some(api_key) = self.api_key.as_deref() else {
            error!("❌ Identification requested but no API key is configured");
            return Err(GeminiError::NotConfigured);
        };
        info!(bytes = payload.bytes.len(), mime = %payload.mime_type, "Identifying plant with Gemini API...");
        let text = self.perform_api_call(api_key, payload).await?;
        info!("✅ Gemini answered with {} chars", text.len());
        Ok(text)
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate { content: Option<Content> }

#[derive(Debug, Deserialize)]
struct Content { #[serde(default)] parts: Vec<Part> }

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Text { text: String },
    Other(serde_json::Value),
}

/// `candidates[0].content.parts[0].text`, or a contract violation.
fn extract_first_text(body: &str) -> Result<String, GeminiError> {
    let parsed: GeminiResponse = serde_json::from_str(body)
        .map_err(|e| GeminiError::ContractViolation(format!("invalid JSON: {}", e)))?;

    let candidate = parsed.candidates.into_iter().next()
        .ok_or_else(|| GeminiError::ContractViolation("no candidates".into()))?;
    let content = candidate.content
        .ok_or_else(|| GeminiError::ContractViolation("candidate has no content".into()))?;
    match content.parts.into_iter().next() {
        Some(Part::Text { text }) => Ok(text),
        Some(Part::Other(_)) => Err(GeminiError::ContractViolation("first part is not text".into())),
        None => Err(GeminiError::ContractViolation("content has no parts".into())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{extract::{Query, State}, http::StatusCode as AxumStatus, routing::post, Json, Router};
    use parking_lot::Mutex;
    use std::{collections::HashMap, sync::Arc, time::Duration};

    type Captured = Arc<Mutex<Option<(HashMap<String, String>, serde_json::Value)>>>;

    async fn mock_server(status: u16, body: &'static str) -> (String, Captured) {
        let captured: Captured = Arc::default();
        let app = Router::new()
            .route(
                "/models/*rest",
                post(move |State(c): State<Captured>, Query(q): Query<HashMap<String, String>>, Json(v): Json<serde_json::Value>| async move {
                    *c.lock() = Some((q, v));
                    (AxumStatus::from_u16(status).unwrap(), body)
                }),
            )
            .with_state(captured.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app).await.unwrap() });
        (format!("http://{}", addr), captured)
    }

    fn client(base_url: String, api_key: Option<&str>) -> GeminiClient {
        GeminiClient::new(&GeminiConfig {
            api_key: api_key.map(String::from),
            base_url,
            model: "gemini-1.5-flash".into(),
            timeout: Duration::from_secs(5),
        })
        .unwrap()
    }

    fn jpeg() -> ImagePayload {
        ImagePayload::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 1, 2, 3], "image/jpeg")
    }

    #[tokio::test]
    async fn sends_prompt_and_inline_image() {
        let (url, captured) = mock_server(200, r#"{"candidates":[{"content":{"parts":[{"text":"Common Name: Fern"}]}}]}"#).await;
        let text = client(url, Some("secret")).classify(&jpeg()).await.unwrap();
        assert_eq!(text, "Common Name: Fern");

        let (query, body) = captured.lock().take().unwrap();
        assert_eq!(query.get("key").map(String::as_str), Some("secret"));
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], IDENTIFY_PROMPT);
        assert_eq!(parts[1]["inlineData"]["mimeType"], "image/jpeg");
        assert_eq!(parts[1]["inlineData"]["data"], "/9j/4AECAw==");
    }

    #[tokio::test]
    async fn non_success_status_carries_status_and_body() {
        let (url, _) = mock_server(500, "backend exploded").await;
        let err = client(url, Some("k")).classify(&jpeg()).await.unwrap_err();
        let msg = err.to_string();
        assert!(matches!(err, GeminiError::Transport { .. }));
        assert!(msg.contains("500"), "{msg}");
        assert!(msg.contains("backend exploded"), "{msg}");
    }

    #[tokio::test]
    async fn unreadable_error_body_keeps_status() {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut sock, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 4096];
            while !request.ends_with(b"}") {
                match sock.read(&mut buf).await {
                    Ok(0) | Err(_) => break,
                    Ok(n) => request.extend_from_slice(&buf[..n]),
                }
            }
            // Promise more body than is sent, then hang up
            let _ = sock.write_all(b"HTTP/1.1 502 Bad Gateway\r\nContent-Length: 100\r\n\r\npartial").await;
            let _ = sock.shutdown().await;
        });
        let err = client(format!("http://{}", addr), Some("k")).classify(&jpeg()).await.unwrap_err();
        assert!(matches!(err, GeminiError::Transport { .. }), "{err:?}");
        assert!(err.to_string().contains("502"));
    }

    #[tokio::test]
    async fn missing_key_short_circuits() {
        let err = client("http://127.0.0.1:9".into(), None).classify(&jpeg()).await.unwrap_err();
        assert!(matches!(err, GeminiError::NotConfigured));
    }

    #[test]
    fn unexpected_shapes_are_contract_violations() {
        for body in [
            "{}",
            r#"{"candidates":[]}"#,
            r#"{"candidates":[{}]}"#,
            r#"{"candidates":[{"content":{"parts":[]}}]}"#,
            r#"{"candidates":[{"content":{"parts":[{"inlineData":{"mimeType":"image/png","data":"AA=="}}]}}]}"#,
            "not json",
        ] {
            let err = extract_first_text(body).unwrap_err();
            assert!(matches!(err, GeminiError::ContractViolation(_)), "{body}");
            assert!(err.to_string().starts_with("Unexpected API response structure"));
        }
    }

    #[test]
    fn truncates_long_base64_for_logging() {
        let mut v = json!({ "inlineData": { "data": "A".repeat(400) } });
        truncate_base64_in_json(&mut v);
        let s = v["inlineData"]["data"].as_str().unwrap();
        assert!(s.ends_with("[truncated 350 chars]"));
    }
}
