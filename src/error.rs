use std::time::Duration;

use serde::Serialize;
use thiserror::Error;

use crate::{artifacts::ArtifactError, gemini::GeminiError, normalizer::NormalizeError, validator::ValidationError};

/// Failure kinds surfaced by a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    InvalidType,
    FileTooLarge,
    UnsupportedImage,
    TooSmall,
    QuotaExceeded,
    UpstreamError,
    MalformedResponse,
    Timeout,
    NotFound,
    Unknown,
}

impl ErrorKind {
    /// True for failures caused by the uploaded file itself.
    pub fn is_client_error(self) -> bool {
        matches!(
            self,
            ErrorKind::InvalidType | ErrorKind::FileTooLarge | ErrorKind::UnsupportedImage | ErrorKind::TooSmall
        )
    }
}

#[derive(Debug, Error)]
pub enum HeadshotError {
    #[error(transparent)] Validation(#[from] ValidationError),
    #[error(transparent)] Normalize(#[from] NormalizeError),
    #[error(transparent)] Generation(#[from] GeminiError),
    #[error(transparent)] Artifact(#[from] ArtifactError),
    #[error("Headshot generation timed out after {}s. Please try again.", .0.as_secs())]
    Timeout(Duration),
    #[error("Internal server error: {0}")]
    Unknown(String),
}

impl HeadshotError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            HeadshotError::Validation(ValidationError::InvalidType(_)) => ErrorKind::InvalidType,
            HeadshotError::Validation(ValidationError::FileTooLarge { .. }) => ErrorKind::FileTooLarge,
            HeadshotError::Normalize(NormalizeError::Unsupported(_)) => ErrorKind::UnsupportedImage,
            HeadshotError::Normalize(NormalizeError::TooSmall { .. }) => ErrorKind::TooSmall,
            HeadshotError::Generation(GeminiError::QuotaExceeded { .. }) => ErrorKind::QuotaExceeded,
            HeadshotError::Generation(GeminiError::Upstream(_)) => ErrorKind::UpstreamError,
            HeadshotError::Generation(GeminiError::MalformedResponse(_)) => ErrorKind::MalformedResponse,
            HeadshotError::Artifact(ArtifactError::NotFound(_)) => ErrorKind::NotFound,
            HeadshotError::Artifact(ArtifactError::Io { .. }) => ErrorKind::Unknown,
            HeadshotError::Timeout(_) => ErrorKind::Timeout,
            HeadshotError::Unknown(_) => ErrorKind::Unknown,
        }
    }
}
