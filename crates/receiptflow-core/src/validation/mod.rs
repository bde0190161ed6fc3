//! Receipt image validation
//!
//! Runs before any tracking write or transfer. The checks are pure: they look at
//! the file name and the declared size only.

use std::path::Path;

use crate::constants::{ALLOWED_EXTENSIONS, MAX_FILE_SIZE_BYTES};

/// Validation errors for candidate receipt images
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("File size exceeds 10MB limit: {size} bytes (max: {max} bytes)")]
    FileTooLarge { size: u64, max: u64 },

    #[error("Invalid file type '{extension}'. Only JPEG and PNG images are supported")]
    UnsupportedType { extension: String },
}

/// Receipt image validator
///
/// Enforces the 10 MiB ceiling and the `jpg`/`jpeg`/`png` extension allow-list.
#[derive(Debug, Clone)]
pub struct FileValidator {
    max_file_size: u64,
    allowed_extensions: Vec<String>,
}

impl Default for FileValidator {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE_BYTES,
            allowed_extensions: ALLOWED_EXTENSIONS.iter().map(|e| e.to_string()).collect(),
        }
    }
}

impl FileValidator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_file_size(&self) -> u64 {
        self.max_file_size
    }

    /// Validate a candidate file by name and size.
    ///
    /// The type check runs first so an unsupported file is reported as such
    /// whatever its size.
    pub fn validate(&self, name: &str, size_bytes: u64) -> Result<(), ValidationError> {
        self.validate_extension(name)?;
        self.validate_file_size(size_bytes)?;
        Ok(())
    }

    pub fn validate_file_size(&self, size: u64) -> Result<(), ValidationError> {
        if size > self.max_file_size {
            return Err(ValidationError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(())
    }

    /// Validate the extension and return it lowercased.
    pub fn validate_extension(&self, name: &str) -> Result<String, ValidationError> {
        let extension = extension_of(name).unwrap_or_default();

        if !self.allowed_extensions.contains(&extension) {
            return Err(ValidationError::UnsupportedType { extension });
        }

        Ok(extension)
    }
}

/// Lowercased extension of a file name or URI, if any.
pub fn extension_of(name: &str) -> Option<String> {
    Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase())
}

/// Content type of an accepted receipt image, derived from its extension.
pub fn content_type_for(name: &str) -> &'static str {
    match extension_of(name).as_deref() {
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("png") => "image/png",
        _ => "application/octet-stream",
    }
}
