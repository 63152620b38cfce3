use thiserror::Error;

use crate::{
    config::{UploadPolicy, MIB},
    models::{MediaType, UploadedImage},
};

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("Invalid file type. Only JPEG and PNG files are allowed.")]
    InvalidType(String),
    #[error("File size exceeds maximum limit of {}MB", .limit / MIB)]
    FileTooLarge { size: u64, limit: u64 },
}

/// Checks the declared type and size of an upload. Never looks at the bytes.
pub fn validate(upload: &UploadedImage, policy: &UploadPolicy) -> Result<MediaType, ValidationError> {
    let media_type = MediaType::parse(&upload.declared_type)
        .ok_or_else(|| ValidationError::InvalidType(upload.declared_type.clone()))?;

    if upload.declared_size > policy.max_file_size {
        return Err(ValidationError::FileTooLarge { size: upload.declared_size, limit: policy.max_file_size });
    }

    Ok(media_type)
}
