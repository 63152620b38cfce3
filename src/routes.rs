use axum::{
    extract::{
        multipart::{MultipartError, MultipartRejection},
        DefaultBodyLimit, Multipart, State,
    },
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::Utc;
use std::sync::Arc;

use crate::{
    config::{UploadPolicy, MIB},
    error::ErrorKind,
    models::{ApiResponse, HeadshotData, HealthStatus, RequestOutcome, Style, StylesCatalog, UploadedImage},
    pipeline::Pipeline,
};

/// Extra room on top of the file limit for multipart framing and the style field.
const MULTIPART_OVERHEAD: usize = 1024 * 1024;

#[derive(Clone)]
pub struct AppState {
    pub pipeline: Arc<Pipeline>,
}

pub fn router(state: AppState) -> Router {
    let body_limit = state.pipeline.upload_policy().max_file_size as usize + MULTIPART_OVERHEAD;
    Router::new()
        .route("/api/headshot/generate", post(generate_headshot))
        .route("/api/headshot/styles", get(list_styles))
        .route("/api/headshot/health", get(health))
        .layer(DefaultBodyLimit::max(body_limit))
        .with_state(state)
}

pub fn status_for(kind: ErrorKind) -> StatusCode {
    match kind {
        ErrorKind::InvalidType | ErrorKind::FileTooLarge | ErrorKind::UnsupportedImage | ErrorKind::TooSmall => {
            StatusCode::BAD_REQUEST
        }
        ErrorKind::QuotaExceeded => StatusCode::TOO_MANY_REQUESTS,
        ErrorKind::UpstreamError | ErrorKind::MalformedResponse => StatusCode::BAD_GATEWAY,
        ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
        ErrorKind::NotFound | ErrorKind::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

fn bad_request(message: impl Into<String>) -> Response {
    (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::err(message))).into_response()
}

/// Raw multipart fields before any policy is applied.
#[derive(Default)]
struct GenerateForm {
    image: Option<UploadedImage>,
    style: Option<String>,
}

async fn read_form(mut multipart: Multipart, policy: &UploadPolicy) -> Result<GenerateForm, String> {
    let too_large = |e: MultipartError| {
        if e.status() == StatusCode::PAYLOAD_TOO_LARGE {
            format!("File size too large. Maximum size is {}MB.", policy.max_file_size / MIB)
        } else {
            format!("Invalid upload: {}", e.body_text())
        }
    };

    let mut form = GenerateForm::default();
    while let Some(field) = multipart.next_field().await.map_err(too_large)? {
        let name = field.name().map(str::to_string);
        match name.as_deref() {
            Some("image") => {
                if form.image.is_some() {
                    return Err("Too many files. Only one file is allowed.".to_string());
                }
                let declared_type = field.content_type().unwrap_or("application/octet-stream").to_string();
                let filename = field.file_name().map(str::to_string);
                let data: Bytes = field.bytes().await.map_err(too_large)?;
                let mut upload = UploadedImage::new(data, declared_type);
                upload.filename = filename;
                form.image = Some(upload);
            }
            Some("style") => form.style = Some(field.text().await.map_err(too_large)?),
            _ => {}
        }
    }
    Ok(form)
}

pub async fn generate_headshot(
    State(state): State<AppState>,
    multipart: Result<Multipart, MultipartRejection>,
) -> Response {
    let multipart = match multipart {
        Ok(m) => m,
        Err(rejection) => return bad_request(rejection.body_text()),
    };

    let form = match read_form(multipart, state.pipeline.upload_policy()).await {
        Ok(form) => form,
        Err(message) => return bad_request(message),
    };

    let Some(upload) = form.image else {
        return bad_request("No image file provided");
    };
    let style: Style = match form.style.as_deref().unwrap_or_default().parse() {
        Ok(style) => style,
        Err(e) => return bad_request(e.to_string()),
    };

    tracing::info!("🚀 Processing headshot generation request for style: {}", style);

    state.pipeline.run(upload, style).await.into_response()
}

pub async fn list_styles() -> Json<ApiResponse<StylesCatalog>> {
    Json(ApiResponse::ok(StylesCatalog::all()))
}

pub async fn health(State(state): State<AppState>) -> Json<ApiResponse<HealthStatus>> {
    Json(ApiResponse::ok(HealthStatus {
        status: "healthy",
        timestamp: Utc::now(),
        api_connected: state.pipeline.generator().is_configured(),
    }))
}

impl IntoResponse for RequestOutcome {
    fn into_response(self) -> Response {
        let status = self.error_kind().map(status_for).unwrap_or(StatusCode::OK);
        (status, Json(ApiResponse::<HeadshotData>::from(self))).into_response()
    }
}
