use std::sync::Arc;

use async_trait::async_trait;
use base64::Engine;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use serde_json::{json, Value};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::{
    config::{Config, RetryPolicy},
    models::{GenerationResult, Style},
};

const BASE64: base64::engine::GeneralPurpose = base64::engine::general_purpose::STANDARD;

#[derive(Debug, Error)]
pub enum GeminiError {
    #[error("API quota exceeded. Please try again later or upgrade your Google AI plan.")]
    QuotaExceeded { attempts: u32 },
    #[error("Failed to generate headshot: {0}")]
    Upstream(String),
    #[error("Failed to generate headshot: {0}")]
    MalformedResponse(String),
}

/// Failure reported by a transport for a single call.
#[derive(Debug, Error)]
pub enum TransportError {
    #[error("rate limited: {0}")]
    RateLimited(String),
    #[error("status={status} body={body}")]
    Status { status: u16, body: String },
    #[error("request failed: {0}")]
    Network(String),
    #[error("parse error: {0}")]
    Decode(String),
}

/// One outbound `generateContent` call.
#[async_trait]
pub trait GeminiTransport: Send + Sync {
    async fn generate_content(&self, model: &str, body: &Value) -> Result<GeminiResponse, TransportError>;

    /// Whether credentials are present. Must not call the upstream.
    fn is_configured(&self) -> bool {
        true
    }
}

/// How a single attempt failed, as seen by the retry loop.
#[derive(Debug)]
enum AttemptFailure {
    RateLimited(String),
    Terminal(GeminiError),
}

impl From<TransportError> for AttemptFailure {
    fn from(err: TransportError) -> Self {
        match err {
            TransportError::RateLimited(detail) => AttemptFailure::RateLimited(detail),
            TransportError::Decode(detail) => AttemptFailure::Terminal(GeminiError::MalformedResponse(detail)),
            other @ (TransportError::Status { .. } | TransportError::Network(_)) => {
                AttemptFailure::Terminal(GeminiError::Upstream(other.to_string()))
            }
        }
    }
}

/// Instruction text sent along with the photo for each style.
pub fn prompt_for(style: Style) -> &'static str {
    match style {
        Style::Corporate => "Transform this photo into photorealistic professional headshot. Use soft, flattering studio lighting against a solid dark gray backdrop. Dress me in a modern, stylish, professional business attire. Maintain my exact facial features and likeness, but give me a confident and approachable expression. The final image should be high-resolution with a sharp focus on my face. Neutral studio background. High-angle perspective, showing full head and body upto the bust, with soft, diffused lighting creating gentle catchlights. 85mm lens aesthetic with shallow depth of field - sharp focus on eyes, soft bokeh background. Natural skin texture with visible hair detail. Bright, airy feel. Make subject look great and accurate to their original appearance.",
        Style::Creative => "Transform this photo into a close-up portrait with shallow depth of field creating soft bokeh background. Warm, natural lighting highlighting subject's features. Casual attire and genuine, engaging smile. Subject fills more of the frame. Background hints at creative workspace or outdoor setting with beautiful blur. Preserve natural skin texture and authentic features. Modern, approachable creative professional aesthetic. Make subject look great and accurate to their original appearance.",
        Style::Executive => "Transform this photo into a dramatic black and white portrait in editorial style. Preserve subject's authentic features and character. Apply these specifications: monochromatic treatment with rich grayscale tones, deep charcoal or black background with subtle gradation, dramatic side lighting creating strong shadows and highlights on face (Rembrandt or split lighting), preserve all natural skin texture and detail - no smoothing, sharp focus capturing fine details in eyes and facial features, relaxed and contemplative expression - confident smile, casual professional attire (dark textured jacket, shirt, no tie), hand gesture near chest or face for dynamic composition, high contrast with deep blacks and bright highlights, cinematic film grain for texture. Maintain editorial photography aesthetic - artistic but professional. Make subject look great and accurate to their original appearance.",
    }
}

// Helper function to truncate base64 data in JSON for cleaner logging
fn truncate_base64_in_json(value: &mut Value) {
    match value {
        Value::Object(map) => {
            for (key, val) in map.iter_mut() {
                if key == "data" {
                    if let Value::String(s) = val {
                        if s.len() > 100 && s.chars().all(|c| c.is_ascii_alphanumeric() || c == '+' || c == '/' || c == '=') {
                            *val = Value::String(format!("{}...[truncated {} chars]", &s[..50], s.len() - 50));
                        }
                    }
                } else {
                    truncate_base64_in_json(val);
                }
            }
        }
        Value::Array(arr) => arr.iter_mut().for_each(truncate_base64_in_json),
        _ => {}
    }
}

fn preview(s: &str, max: usize) -> String {
    if s.chars().count() <= max {
        s.to_string()
    } else {
        format!("{}...", s.chars().take(max).collect::<String>())
    }
}

pub fn build_request_body(prompt: &str, image_jpeg: &[u8]) -> Value {
    json!({
        "contents": [{
            "parts": [
                { "text": prompt },
                { "inlineData": { "mimeType": "image/jpeg", "data": BASE64.encode(image_jpeg) } }
            ]
        }],
        "generationConfig": {
            "responseModalities": ["TEXT", "IMAGE"],
            "candidateCount": 1
        }
    })
}

/// reqwest transport for the Gemini REST API.
pub struct GeminiHttp {
    client: Client,
    api_key: String,
    base_url: String,
}

impl GeminiHttp {
    pub fn new(api_key: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            api_key: api_key.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
        }
    }

    fn redact(&self, s: &str) -> String {
        if self.api_key.is_empty() { s.to_string() } else { s.replace(&self.api_key, "***") }
    }
}

#[async_trait]
impl GeminiTransport for GeminiHttp {
    async fn generate_content(&self, model: &str, body: &Value) -> Result<GeminiResponse, TransportError> {
        let url = format!("{}/models/{}:generateContent?key={}", self.base_url, model, self.api_key);
        debug!("🔗 Making request to: {}", self.redact(&url));

        if tracing::enabled!(tracing::Level::DEBUG) {
            let mut logged = body.clone();
            truncate_base64_in_json(&mut logged);
            debug!("📤 Request body: {}", logged);
        }

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| TransportError::Network(e.without_url().to_string()))?;

        let status = response.status();
        debug!("📥 Response status: {}", status);

        let response_text = response
            .text()
            .await
            .map_err(|e| TransportError::Network(e.without_url().to_string()))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(TransportError::RateLimited(preview(&response_text, 300)));
        }
        if !status.is_success() {
            error!("❌ API Error response: {}", preview(&response_text, 1000));
            return Err(TransportError::Status { status: status.as_u16(), body: preview(&response_text, 300) });
        }

        serde_json::from_str(&response_text).map_err(|e| {
            if let Ok(mut raw) = serde_json::from_str::<Value>(&response_text) {
                truncate_base64_in_json(&mut raw);
                debug!("📥 Unparseable Gemini response: {}", preview(&raw.to_string(), 1000));
            }
            TransportError::Decode(e.to_string())
        })
    }

    fn is_configured(&self) -> bool {
        !self.api_key.is_empty()
    }
}

/// Turns a photo and a style into a generated image, retrying on quota errors.
///
/// Holds configuration only, so a single instance is shared by all requests.
pub struct GenerationClient {
    transport: Arc<dyn GeminiTransport>,
    model: String,
    retry: RetryPolicy,
}

impl GenerationClient {
    pub fn new(transport: Arc<dyn GeminiTransport>, model: impl Into<String>, retry: RetryPolicy) -> Self {
        Self { transport, model: model.into(), retry }
    }

    pub fn from_config(config: &Config) -> Self {
        let transport = GeminiHttp::new(config.api_key.clone(), config.api_base.clone());
        Self::new(Arc::new(transport), config.model.clone(), config.retry)
    }

    pub fn is_configured(&self) -> bool {
        self.transport.is_configured()
    }

    pub async fn generate(&self, image_jpeg: &[u8], style: Style) -> Result<GenerationResult, GeminiError> {
        let started = Instant::now();
        let body = build_request_body(prompt_for(style), image_jpeg);
        let max_attempts = self.retry.max_attempts.max(1);

        let mut attempt = 1;
        loop {
            info!("Generating headshot with style: {} (attempt {}/{})", style, attempt, max_attempts);

            match self.attempt(&body).await {
                Ok((bytes, mime_type)) => {
                    let elapsed = started.elapsed();
                    info!(
                        %style, attempt, size = bytes.len(), %mime_type,
                        elapsed_ms = elapsed.as_millis() as u64,
                        "✅ Headshot generated"
                    );
                    return Ok(GenerationResult { bytes, mime_type, elapsed, attempts: attempt });
                }
                Err(AttemptFailure::RateLimited(detail)) if attempt < max_attempts => {
                    let delay = self.retry.delay_for(attempt);
                    warn!(attempt, detail = %detail, "Quota exceeded, waiting {}ms before retry...", delay.as_millis());
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
                Err(AttemptFailure::RateLimited(detail)) => {
                    error!(attempts = attempt, detail = %detail, "❌ Quota still exceeded after final attempt");
                    return Err(GeminiError::QuotaExceeded { attempts: attempt });
                }
                Err(AttemptFailure::Terminal(err)) => {
                    error!(attempt, "❌ Error generating headshot: {}", err);
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(&self, body: &Value) -> Result<(Vec<u8>, String), AttemptFailure> {
        let response = self.transport.generate_content(&self.model, body).await?;
        extract_image(response).map_err(AttemptFailure::Terminal)
    }
}

// --- Response Parsing Helpers ---

#[derive(Debug, Deserialize)]
pub struct GeminiResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<Content>,
}

#[derive(Debug, Deserialize)]
struct Content {
    #[serde(default)]
    parts: Option<Vec<Part>>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Part {
    Inline {
        #[serde(rename = "inlineData", alias = "inline_data")]
        inline_data: InlineData,
    },
    Text { text: String },
    Other(serde::de::IgnoredAny),
}

#[derive(Debug, Deserialize)]
struct InlineData {
    #[serde(default)]
    data: String,
    #[serde(default, rename = "mimeType", alias = "mime_type")]
    mime_type: Option<String>,
}

/// Pulls the first inline image out of the first candidate.
fn extract_image(resp: GeminiResponse) -> Result<(Vec<u8>, String), GeminiError> {
    let candidate = resp
        .candidates
        .into_iter()
        .next()
        .ok_or_else(|| GeminiError::MalformedResponse("No response from Gemini API".into()))?;

    let parts = candidate
        .content
        .and_then(|c| c.parts)
        .ok_or_else(|| GeminiError::MalformedResponse("Invalid response format from Gemini API".into()))?;

    for part in parts {
        match part {
            Part::Inline { inline_data } if !inline_data.data.is_empty() => {
                let bytes = BASE64
                    .decode(inline_data.data.as_bytes())
                    .map_err(|e| GeminiError::MalformedResponse(format!("Gemini image base64 decode failed: {}", e)))?;
                let mime_type = inline_data.mime_type.unwrap_or_else(|| "image/jpeg".to_string());
                debug!("🎯 Found image data with mime type: {}", mime_type);
                return Ok((bytes, mime_type));
            }
            Part::Text { text } => debug!("Gemini returned text part: {}", preview(&text, 120)),
            _ => {}
        }
    }

    Err(GeminiError::MalformedResponse("No image data found in Gemini API response".into()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use parking_lot::Mutex;
    use pretty_assertions::assert_eq;
    use std::{collections::VecDeque, time::Duration};

    pub(crate) struct ScriptedTransport {
        replies: Mutex<VecDeque<Result<Value, TransportError>>>,
        bodies: Mutex<Vec<(String, Value)>>,
    }

    impl ScriptedTransport {
        pub(crate) fn new(replies: Vec<Result<Value, TransportError>>) -> Arc<Self> {
            Arc::new(Self { replies: Mutex::new(replies.into()), bodies: Mutex::new(Vec::new()) })
        }

        pub(crate) fn calls(&self) -> usize {
            self.bodies.lock().len()
        }
    }

    #[async_trait]
    impl GeminiTransport for ScriptedTransport {
        async fn generate_content(&self, model: &str, body: &Value) -> Result<GeminiResponse, TransportError> {
            self.bodies.lock().push((model.to_string(), body.clone()));
            let reply = self.replies.lock().pop_front().expect("transport called more often than scripted")?;
            serde_json::from_value(reply).map_err(|e| TransportError::Decode(e.to_string()))
        }
    }

    pub(crate) fn image_reply(bytes: &[u8]) -> Result<Value, TransportError> {
        Ok(json!({
            "candidates": [{
                "content": { "parts": [
                    { "text": "Here is your headshot" },
                    { "inlineData": { "mimeType": "image/png", "data": BASE64.encode(bytes) } }
                ]}
            }]
        }))
    }

    pub(crate) fn quota() -> Result<Value, TransportError> {
        Err(TransportError::RateLimited("RESOURCE_EXHAUSTED".into()))
    }

    fn client(transport: Arc<ScriptedTransport>) -> GenerationClient {
        GenerationClient::new(transport, "test-model", RetryPolicy::default())
    }

    #[test]
    fn every_style_has_its_own_prompt() {
        let prompts: Vec<_> = Style::ALL.iter().map(|&s| prompt_for(s)).collect();
        assert!(prompts.iter().all(|p| p.starts_with("Transform this photo")));
        assert_ne!(prompts[0], prompts[1]);
        assert_ne!(prompts[1], prompts[2]);
        assert!(prompt_for(Style::Executive).contains("black and white"));
    }

    #[test]
    fn request_carries_prompt_and_inline_jpeg() {
        let body = build_request_body("make it nice", b"\xff\xd8jpeg");
        let parts = &body["contents"][0]["parts"];
        assert_eq!(parts[0]["text"], json!("make it nice"));
        assert_eq!(parts[1]["inlineData"]["mimeType"], json!("image/jpeg"));
        assert_eq!(parts[1]["inlineData"]["data"], json!(BASE64.encode(b"\xff\xd8jpeg")));
    }

    #[tokio::test]
    async fn returns_first_inline_image() {
        let transport = ScriptedTransport::new(vec![image_reply(b"generated")]);
        let result = client(transport.clone()).generate(b"input", Style::Corporate).await.unwrap();

        assert_eq!(result.bytes, b"generated".to_vec());
        assert_eq!(result.mime_type, "image/png");
        assert_eq!(result.attempts, 1);
        assert_eq!(transport.calls(), 1);

        let (model, body) = transport.bodies.lock()[0].clone();
        assert_eq!(model, "test-model");
        assert_eq!(body["contents"][0]["parts"][0]["text"], json!(prompt_for(Style::Corporate)));
    }

    #[tokio::test(start_paused = true)]
    async fn retries_quota_errors_with_exponential_backoff() {
        let transport = ScriptedTransport::new(vec![quota(), quota(), image_reply(b"third time")]);
        let started = Instant::now();
        let result = client(transport.clone()).generate(b"input", Style::Creative).await.unwrap();
        let waited = started.elapsed();

        assert_eq!(result.bytes, b"third time".to_vec());
        assert_eq!(result.attempts, 3);
        assert_eq!(transport.calls(), 3);
        // 1s after attempt 1, 2s after attempt 2.
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_millis(3100), "{:?}", waited);
    }

    #[tokio::test(start_paused = true)]
    async fn gives_up_after_three_quota_errors() {
        let transport = ScriptedTransport::new(vec![quota(), quota(), quota()]);
        let started = Instant::now();
        let err = client(transport.clone()).generate(b"input", Style::Executive).await.unwrap_err();
        let waited = started.elapsed();

        assert!(matches!(err, GeminiError::QuotaExceeded { attempts: 3 }));
        assert!(err.to_string().contains("Please try again later"));
        assert_eq!(transport.calls(), 3);
        // No sleep after the final attempt.
        assert!(waited >= Duration::from_secs(3) && waited < Duration::from_millis(3100), "{:?}", waited);
    }

    #[tokio::test]
    async fn other_failures_are_not_retried() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Status { status: 500, body: "boom".into() })]);
        let err = client(transport.clone()).generate(b"input", Style::Corporate).await.unwrap_err();
        assert!(matches!(err, GeminiError::Upstream(ref m) if m.contains("500")));
        assert_eq!(transport.calls(), 1);

        let transport = ScriptedTransport::new(vec![Err(TransportError::Network("connection reset".into()))]);
        let err = client(transport.clone()).generate(b"input", Style::Corporate).await.unwrap_err();
        assert!(matches!(err, GeminiError::Upstream(_)));
        assert_eq!(transport.calls(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_then_hard_failure_stops_immediately() {
        let transport = ScriptedTransport::new(vec![quota(), Err(TransportError::Network("reset".into()))]);
        let err = client(transport.clone()).generate(b"input", Style::Corporate).await.unwrap_err();
        assert!(matches!(err, GeminiError::Upstream(_)));
        assert_eq!(transport.calls(), 2);
    }

    #[tokio::test]
    async fn malformed_responses_fail_on_first_attempt() {
        let cases = vec![
            (json!({}), "No response from Gemini API"),
            (json!({ "candidates": [] }), "No response from Gemini API"),
            (json!({ "candidates": [{}] }), "Invalid response format"),
            (json!({ "candidates": [{ "content": {} }] }), "Invalid response format"),
            (json!({ "candidates": [{ "content": { "parts": [{ "text": "sorry" }] } }] }), "No image data found"),
            (
                json!({ "candidates": [{ "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": "" } }] } }] }),
                "No image data found",
            ),
            (
                json!({ "candidates": [{ "content": { "parts": [{ "inlineData": { "mimeType": "image/png", "data": "!!not base64!!" } }] } }] }),
                "base64 decode failed",
            ),
        ];

        for (reply, expected) in cases {
            let transport = ScriptedTransport::new(vec![Ok(reply.clone())]);
            let err = client(transport.clone()).generate(b"input", Style::Corporate).await.unwrap_err();
            match err {
                GeminiError::MalformedResponse(ref m) => assert!(m.contains(expected), "{} for {}", m, reply),
                other => panic!("expected malformed response for {}, got {:?}", reply, other),
            }
            assert_eq!(transport.calls(), 1);
        }
    }

    #[tokio::test]
    async fn undecodable_payload_is_malformed() {
        let transport = ScriptedTransport::new(vec![Err(TransportError::Decode("expected value".into()))]);
        let err = client(transport).generate(b"input", Style::Corporate).await.unwrap_err();
        assert!(matches!(err, GeminiError::MalformedResponse(_)));
    }

    #[test]
    fn truncates_inline_data_for_logging() {
        let mut body = build_request_body("prompt", &[7u8; 300]);
        truncate_base64_in_json(&mut body);
        let data = body["contents"][0]["parts"][1]["inlineData"]["data"].as_str().unwrap();
        assert!(data.contains("[truncated"));
        assert_eq!(body["contents"][0]["parts"][0]["text"], json!("prompt"));
    }

    #[test]
    fn http_transport_redacts_key() {
        let http = GeminiHttp::new("secret-key", "https://example.test/v1beta/");
        assert!(http.is_configured());
        assert_eq!(http.redact("https://example.test?key=secret-key"), "https://example.test?key=***");
        assert!(!GeminiHttp::new("", DEFAULT_TEST_BASE).is_configured());
    }

    const DEFAULT_TEST_BASE: &str = "https://example.test";
}
