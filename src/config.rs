//! Runtime configuration read from the environment.
//!
//! `main` loads `.env` first, so every variable here may also live in that file.

use std::{env, path::PathBuf, str::FromStr, time::Duration};

use thiserror::Error;

pub const DEFAULT_API_BASE: &str = "https://generativelanguage.googleapis.com/v1beta";
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash-image";
pub const DEFAULT_PORT: u16 = 3001;
pub const DEFAULT_UPLOAD_DIR: &str = "./uploads";
pub const DEFAULT_CORS_ORIGIN: &str = "http://localhost:5173";

pub const MIB: u64 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),
    #[error("Invalid value for {name}: {value:?}")]
    InvalidValue { name: String, value: String },
}

/// Limits applied to an upload before any decoding happens.
#[derive(Debug, Clone, Copy)]
pub struct UploadPolicy {
    pub max_file_size: u64,
}

impl Default for UploadPolicy {
    fn default() -> Self {
        Self { max_file_size: 10 * MIB }
    }
}

/// Dimension bounds and output encoding for normalized images.
#[derive(Debug, Clone, Copy)]
pub struct ImagePolicy {
    pub min_dimension: u32,
    pub max_width: u32,
    pub max_height: u32,
    /// JPEG quality, 1..=100.
    pub quality: u8,
}

impl Default for ImagePolicy {
    fn default() -> Self {
        Self { min_dimension: 512, max_width: 2048, max_height: 2048, quality: 90 }
    }
}

/// Bounded retry for rate-limited generation calls.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    /// Total attempts, including the first one.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_secs(1) }
    }
}

impl RetryPolicy {
    /// Delay slept after failed attempt `attempt` (counted from 1): `base * 2^(attempt-1)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base_delay.saturating_mul(1u32 << exponent)
    }
}

#[derive(Debug, Clone, Copy)]
pub struct SweepPolicy {
    pub interval: Duration,
    pub max_age: Duration,
}

impl Default for SweepPolicy {
    fn default() -> Self {
        Self { interval: Duration::from_secs(3600), max_age: Duration::from_secs(3600) }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: String,
    pub api_base: String,
    pub model: String,
    pub port: u16,
    pub upload_dir: PathBuf,
    pub cors_origins: Vec<String>,
    pub upload: UploadPolicy,
    pub image: ImagePolicy,
    pub retry: RetryPolicy,
    pub sweep: SweepPolicy,
    pub request_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables.
    ///
    /// Required:
    /// - `GOOGLE_API_KEY` (or `GEMINI_API_KEY`)
    ///
    /// Optional:
    /// - `GEMINI_API_BASE`, `GEMINI_MODEL`, `PORT`, `UPLOAD_DIR`, `CORS_ORIGINS`
    /// - `MAX_FILE_SIZE`, `MIN_IMAGE_DIMENSION`, `MAX_IMAGE_WIDTH`, `MAX_IMAGE_HEIGHT`, `OUTPUT_QUALITY`
    /// - `GENERATION_MAX_ATTEMPTS`, `GENERATION_BASE_DELAY_MS`, `REQUEST_TIMEOUT_SECS`
    /// - `CLEANUP_INTERVAL_SECS`, `MAX_ARTIFACT_AGE_SECS`
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    pub(crate) fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let api_key = lookup("GOOGLE_API_KEY")
            .or_else(|| lookup("GEMINI_API_KEY"))
            .filter(|k| !k.trim().is_empty())
            .ok_or_else(|| ConfigError::MissingEnvVar("GOOGLE_API_KEY".to_string()))?;

        let upload = UploadPolicy {
            max_file_size: parse_or(&lookup, "MAX_FILE_SIZE", UploadPolicy::default().max_file_size)?,
        };

        let image_defaults = ImagePolicy::default();
        let image = ImagePolicy {
            min_dimension: parse_or(&lookup, "MIN_IMAGE_DIMENSION", image_defaults.min_dimension)?,
            max_width: parse_or(&lookup, "MAX_IMAGE_WIDTH", image_defaults.max_width)?,
            max_height: parse_or(&lookup, "MAX_IMAGE_HEIGHT", image_defaults.max_height)?,
            quality: parse_or(&lookup, "OUTPUT_QUALITY", image_defaults.quality)?.clamp(1, 100),
        };

        let retry = RetryPolicy {
            max_attempts: parse_or(&lookup, "GENERATION_MAX_ATTEMPTS", RetryPolicy::default().max_attempts)?.max(1),
            base_delay: Duration::from_millis(parse_or(&lookup, "GENERATION_BASE_DELAY_MS", 1000u64)?),
        };

        let sweep = SweepPolicy {
            interval: Duration::from_secs(parse_or(&lookup, "CLEANUP_INTERVAL_SECS", 3600u64)?.max(1)),
            max_age: Duration::from_secs(parse_or(&lookup, "MAX_ARTIFACT_AGE_SECS", 3600u64)?),
        };

        let cors_origins = lookup("CORS_ORIGINS")
            .map(|v| v.split(',').map(|o| o.trim().to_string()).filter(|o| !o.is_empty()).collect())
            .unwrap_or_else(|| vec![DEFAULT_CORS_ORIGIN.to_string()]);

        Ok(Self {
            api_key,
            api_base: lookup("GEMINI_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.to_string()),
            model: lookup("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            port: parse_or(&lookup, "PORT", DEFAULT_PORT)?,
            upload_dir: lookup("UPLOAD_DIR").map(PathBuf::from).unwrap_or_else(|| PathBuf::from(DEFAULT_UPLOAD_DIR)),
            cors_origins,
            upload,
            image,
            retry,
            sweep,
            request_timeout: Duration::from_secs(parse_or(&lookup, "REQUEST_TIMEOUT_SECS", 120u64)?),
        })
    }
}

fn parse_or<T: FromStr>(lookup: &impl Fn(&str) -> Option<String>, name: &str, default: T) -> Result<T, ConfigError> {
    match lookup(name) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::InvalidValue { name: name.to_string(), value: raw }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect();
        move |name: &str| map.get(name).cloned()
    }

    #[test]
    fn defaults_match_policy() {
        let cfg = Config::from_lookup(lookup_from(&[("GOOGLE_API_KEY", "k")])).unwrap();
        assert_eq!(cfg.upload.max_file_size, 10 * 1024 * 1024);
        assert_eq!(cfg.image.min_dimension, 512);
        assert_eq!((cfg.image.max_width, cfg.image.max_height), (2048, 2048));
        assert_eq!(cfg.image.quality, 90);
        assert_eq!(cfg.retry.max_attempts, 3);
        assert_eq!(cfg.retry.base_delay, Duration::from_secs(1));
        assert_eq!(cfg.sweep.interval, Duration::from_secs(3600));
        assert_eq!(cfg.port, 3001);
        assert_eq!(cfg.model, DEFAULT_MODEL);
        assert_eq!(cfg.cors_origins, vec![DEFAULT_CORS_ORIGIN.to_string()]);
    }

    #[test]
    fn api_key_is_required() {
        let err = Config::from_lookup(lookup_from(&[])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
        let err = Config::from_lookup(lookup_from(&[("GOOGLE_API_KEY", "  ")])).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnvVar(_)));
    }

    #[test]
    fn gemini_key_alias_and_overrides() {
        let cfg = Config::from_lookup(lookup_from(&[
            ("GEMINI_API_KEY", "alt"),
            ("CORS_ORIGINS", "http://a.test, http://b.test,"),
            ("GENERATION_BASE_DELAY_MS", "250"),
            ("OUTPUT_QUALITY", "250"),
        ]))
        .unwrap();
        assert_eq!(cfg.api_key, "alt");
        assert_eq!(cfg.cors_origins, vec!["http://a.test".to_string(), "http://b.test".to_string()]);
        assert_eq!(cfg.retry.base_delay, Duration::from_millis(250));
        assert_eq!(cfg.image.quality, 100);
    }

    #[test]
    fn bad_numbers_are_rejected() {
        let err = Config::from_lookup(lookup_from(&[("GOOGLE_API_KEY", "k"), ("PORT", "eighty")])).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "PORT"));
    }

    #[test]
    fn backoff_doubles_from_base() {
        let retry = RetryPolicy::default();
        assert_eq!(retry.delay_for(1), Duration::from_secs(1));
        assert_eq!(retry.delay_for(2), Duration::from_secs(2));
        assert_eq!(retry.delay_for(3), Duration::from_secs(4));
    }
}
