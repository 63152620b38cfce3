//! Per-request orchestration: validate, normalize, generate, persist, assemble, clean up.
//!
//! Stages run strictly in order. Any failure, including the request timeout,
//! skips the remaining stages and goes straight to cleanup, which deletes
//! every artifact written for the request exactly once.

use std::{sync::Arc, time::Duration};

use base64::Engine;
use tokio::time::Instant;
use tracing::{debug, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::{
    artifacts::{ArtifactHandle, ArtifactRole, ArtifactStore},
    config::{Config, ImagePolicy, UploadPolicy},
    error::HeadshotError,
    gemini::GenerationClient,
    models::{HeadshotData, NormalizedImage, RequestOutcome, Style, UploadedImage},
    normalizer::Normalizer,
    validator::validate,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Received,
    Validated,
    Normalized,
    Generated,
    Persisted,
    Assembled,
}

/// Everything that must survive an aborted stage run.
#[derive(Debug)]
struct RequestState {
    stage: Stage,
    handles: Vec<ArtifactHandle>,
}

impl RequestState {
    fn new() -> Self {
        Self { stage: Stage::Received, handles: Vec::new() }
    }

    fn advance(&mut self, stage: Stage) {
        debug!(from = ?self.stage, to = ?stage, "Stage complete");
        self.stage = stage;
    }
}

pub struct Pipeline {
    upload_policy: UploadPolicy,
    normalizer: Normalizer,
    generator: Arc<GenerationClient>,
    store: Arc<dyn ArtifactStore>,
    request_timeout: Duration,
}

impl Pipeline {
    pub fn new(
        store: Arc<dyn ArtifactStore>,
        generator: Arc<GenerationClient>,
        upload_policy: UploadPolicy,
        image_policy: ImagePolicy,
        request_timeout: Duration,
    ) -> Self {
        Self { upload_policy, normalizer: Normalizer::new(image_policy), generator, store, request_timeout }
    }

    pub fn from_config(config: &Config, store: Arc<dyn ArtifactStore>, generator: Arc<GenerationClient>) -> Self {
        Self::new(store, generator, config.upload, config.image, config.request_timeout)
    }

    pub fn generator(&self) -> &GenerationClient {
        &self.generator
    }

    pub fn upload_policy(&self) -> &UploadPolicy {
        &self.upload_policy
    }

    /// Runs one request end to end. Never panics on bad input; every failure
    /// becomes a `RequestOutcome::Failure`.
    pub async fn run(&self, upload: UploadedImage, style: Style) -> RequestOutcome {
        let request_id = Uuid::new_v4();
        let span = info_span!("headshot", %request_id, %style);
        self.run_with_cleanup(upload, style).instrument(span).await
    }

    async fn run_with_cleanup(&self, upload: UploadedImage, style: Style) -> RequestOutcome {
        let started = Instant::now();
        info!(
            filename = upload.filename.as_deref().unwrap_or("<unnamed>"),
            declared_type = %upload.declared_type,
            declared_size = upload.declared_size,
            "Processing headshot generation request"
        );

        let mut state = RequestState::new();
        let result = tokio::time::timeout(self.request_timeout, self.run_stages(&upload, style, started, &mut state)).await;
        drop(upload);

        let result = match result {
            Ok(result) => result,
            Err(_) => Err(HeadshotError::Timeout(self.request_timeout)),
        };

        self.cleanup(&state.handles).await;

        match result {
            Ok(data) => {
                info!(processing_time_ms = data.processing_time_ms, "Headshot generation completed");
                RequestOutcome::Success(data)
            }
            Err(err) => {
                let kind = err.kind();
                if kind.is_client_error() {
                    warn!(?kind, last_stage = ?state.stage, "Rejected headshot request: {}", err);
                } else {
                    tracing::error!(?kind, last_stage = ?state.stage, "Error in headshot generation: {}", err);
                }
                RequestOutcome::Failure { kind, message: err.to_string() }
            }
        }
    }

    async fn run_stages(
        &self,
        upload: &UploadedImage,
        style: Style,
        started: Instant,
        state: &mut RequestState,
    ) -> Result<HeadshotData, HeadshotError> {
        validate(upload, &self.upload_policy)?;
        state.advance(Stage::Validated);

        let normalized = self.normalize(upload).await?;
        info!(width = normalized.width, height = normalized.height, size = normalized.len(), "Image normalized");
        self.persist(state, &upload.bytes, ArtifactRole::Original).await?;
        let normalized_handle = self.persist(state, &normalized.bytes, ArtifactRole::Normalized).await?;
        state.advance(Stage::Normalized);

        let generated = self.generator.generate(&normalized.bytes, style).await?;
        drop(normalized);
        state.advance(Stage::Generated);

        let generated_mime = if generated.mime_type.starts_with("image/") {
            generated.mime_type.clone()
        } else {
            "image/jpeg".to_string()
        };
        let generated_handle = self.persist(state, &generated.bytes, ArtifactRole::Generated(style)).await?;
        drop(generated);
        state.advance(Stage::Persisted);

        let original_bytes = self.store.read(&normalized_handle).await?;
        let generated_bytes = self.store.read(&generated_handle).await?;
        let processing_time_ms = started.elapsed().as_millis() as u64;

        let data = HeadshotData {
            original_image: data_uri("image/jpeg", &original_bytes),
            generated_image: data_uri(&generated_mime, &generated_bytes),
            style,
            processing_time_ms,
        };
        state.advance(Stage::Assembled);
        Ok(data)
    }

    /// The handle is recorded before the write starts, so a timeout that lands
    /// mid-write still leaves cleanup pointing at whatever reached disk.
    async fn persist(
        &self,
        state: &mut RequestState,
        bytes: &[u8],
        role: ArtifactRole,
    ) -> Result<ArtifactHandle, HeadshotError> {
        let handle = self.store.allocate(role);
        state.handles.push(handle.clone());
        self.store.write(&handle, bytes).await?;
        Ok(handle)
    }

    /// Decoding and encoding are CPU-bound, so they run off the async workers.
    async fn normalize(&self, upload: &UploadedImage) -> Result<NormalizedImage, HeadshotError> {
        let normalizer = self.normalizer;
        let bytes = upload.bytes.clone();
        let normalized = tokio::task::spawn_blocking(move || normalizer.normalize(&bytes))
            .await
            .map_err(|e| HeadshotError::Unknown(format!("normalization task failed: {}", e)))??;
        Ok(normalized)
    }

    async fn cleanup(&self, handles: &[ArtifactHandle]) {
        for handle in handles {
            self.store.delete(handle).await;
        }
        debug!(artifacts = handles.len(), "Request artifacts cleaned up");
    }
}

fn data_uri(mime: &str, bytes: &[u8]) -> String {
    format!("data:{};base64,{}", mime, base64::engine::general_purpose::STANDARD.encode(bytes))
}
