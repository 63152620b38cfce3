use std::{fmt, str::FromStr, time::Duration};

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use serde_with::skip_serializing_none;
use thiserror::Error;

use crate::error::ErrorKind;

/// Transformation preset requested by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Style {
    Corporate,
    Creative,
    Executive,
}

#[derive(Debug, Error)]
#[error("Invalid style. Must be one of: corporate, creative, executive")]
pub struct InvalidStyle(pub String);

impl Style {
    pub const ALL: [Style; 3] = [Style::Corporate, Style::Creative, Style::Executive];

    pub fn as_str(self) -> &'static str {
        match self {
            Style::Corporate => "corporate",
            Style::Creative => "creative",
            Style::Executive => "executive",
        }
    }

    pub fn display_name(self) -> &'static str {
        match self {
            Style::Corporate => "Corporate Classic",
            Style::Creative => "Creative Professional",
            Style::Executive => "Executive Portrait",
        }
    }

    pub fn description(self) -> &'static str {
        match self {
            Style::Corporate => "Traditional business headshot, neutral background, formal lighting",
            Style::Creative => "Modern dynamic styling, artistic background, contemporary lighting",
            Style::Executive => "Premium, formal styling, sophisticated lighting",
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = InvalidStyle;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "corporate" => Ok(Style::Corporate),
            "creative" => Ok(Style::Creative),
            "executive" => Ok(Style::Executive),
            other => Err(InvalidStyle(other.to_string())),
        }
    }
}

/// Upload media types accepted by the validator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MediaType {
    Jpeg,
    Png,
}

impl MediaType {
    /// Parses a declared content type. `image/jpg` is an alias of `image/jpeg`,
    /// parameters such as `; charset=...` are ignored, matching is case-insensitive.
    pub fn parse(declared: &str) -> Option<Self> {
        let essence = declared.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
        match essence.as_str() {
            "image/jpeg" | "image/jpg" | "image/pjpeg" => Some(MediaType::Jpeg),
            "image/png" => Some(MediaType::Png),
            _ => None,
        }
    }
}

/// A single uploaded file as handed over by the transport layer.
#[derive(Debug, Clone)]
pub struct UploadedImage {
    pub bytes: Bytes,
    pub declared_type: String,
    pub declared_size: u64,
    pub filename: Option<String>,
}

impl UploadedImage {
    /// Builds an upload whose declared size is the real buffer length.
    pub fn new(bytes: impl Into<Bytes>, declared_type: impl Into<String>) -> Self {
        let bytes = bytes.into();
        Self {
            declared_size: bytes.len() as u64,
            bytes,
            declared_type: declared_type.into(),
            filename: None,
        }
    }

    pub fn with_filename(mut self, filename: impl Into<String>) -> Self {
        self.filename = Some(filename.into());
        self
    }
}

/// Canonical JPEG derived from an upload.
#[derive(Debug, Clone)]
pub struct NormalizedImage {
    pub width: u32,
    pub height: u32,
    pub bytes: Vec<u8>,
}

impl NormalizedImage {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct GenerationResult {
    pub bytes: Vec<u8>,
    /// Media type declared by the upstream for the returned image.
    pub mime_type: String,
    pub elapsed: Duration,
    pub attempts: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeadshotData {
    pub original_image: String,
    pub generated_image: String,
    pub style: Style,
    pub processing_time_ms: u64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome {
    Success(HeadshotData),
    Failure { kind: ErrorKind, message: String },
}

impl RequestOutcome {
    pub fn error_kind(&self) -> Option<ErrorKind> {
        match self {
            RequestOutcome::Success(_) => None,
            RequestOutcome::Failure { kind, .. } => Some(*kind),
        }
    }
}

/// `{ success, data?, error? }` envelope shared by every endpoint.
#[skip_serializing_none]
#[derive(Debug, Serialize, Deserialize)]
pub struct ApiResponse<T> {
    pub success: bool,
    pub data: Option<T>,
    pub error: Option<String>,
}

impl<T> ApiResponse<T> {
    pub fn ok(data: T) -> Self {
        Self { success: true, data: Some(data), error: None }
    }

    pub fn err(message: impl Into<String>) -> Self {
        Self { success: false, data: None, error: Some(message.into()) }
    }
}

impl From<RequestOutcome> for ApiResponse<HeadshotData> {
    fn from(outcome: RequestOutcome) -> Self {
        match outcome {
            RequestOutcome::Success(data) => ApiResponse::ok(data),
            RequestOutcome::Failure { message, .. } => ApiResponse::err(message),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct StyleInfo {
    pub id: Style,
    pub name: &'static str,
    pub description: &'static str,
}

#[derive(Debug, Serialize)]
pub struct StylesCatalog {
    pub styles: Vec<StyleInfo>,
}

impl StylesCatalog {
    pub fn all() -> Self {
        let styles = Style::ALL
            .iter()
            .map(|&id| StyleInfo { id, name: id.display_name(), description: id.description() })
            .collect();
        Self { styles }
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthStatus {
    pub status: &'static str,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    pub api_connected: bool,
}
