//! Headshot Studio: turns an uploaded portrait into a styled professional
//! headshot using Gemini image generation.
//!
//! A request flows through [`validator`], [`normalizer`], [`gemini`] and
//! [`artifacts`], driven by [`pipeline::Pipeline`]. [`routes`] is the HTTP
//! boundary and [`sweeper`] removes artifacts left behind by crashed requests.

pub mod artifacts;
pub mod config;
pub mod error;
pub mod gemini;
pub mod models;
pub mod normalizer;
pub mod pipeline;
pub mod routes;
pub mod sweeper;
pub mod validator;

pub use artifacts::{ArtifactError, ArtifactHandle, ArtifactRole, ArtifactStore, FsArtifactStore};
pub use config::Config;
pub use error::{ErrorKind, HeadshotError};
pub use gemini::{GeminiHttp, GeminiResponse, GeminiTransport, GenerationClient, TransportError};
pub use models::{RequestOutcome, Style, UploadedImage};
pub use pipeline::Pipeline;
