use std::path::Path;

use thiserror::Error;
use tracing::warn;

/// File formats we know how to decode. The format is inferred from the file extension alone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileFormat {
    Csv,
    Json,
    Xml,
    Yaml,
}

impl FileFormat {
    /// Map an extension (without the dot, any case) to a format.
    pub fn from_extension(extension: &str) -> Option<Self> {
        match extension.to_lowercase().as_str() {
            "csv" => Some(FileFormat::Csv),
            "json" => Some(FileFormat::Json),
            "xml" => Some(FileFormat::Xml),
            "yaml" | "yml" => Some(FileFormat::Yaml),
            _ => None,
        }
    }

    pub fn from_path(path: &Path) -> Option<Self> {
        path.extension()
            .and_then(|extension| extension.to_str())
            .and_then(FileFormat::from_extension)
    }
}

/// Reasons for a file to be turned away before any of its records are looked at.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum GateRejection {
    #[error("File does not exist: {0}")]
    NotFound(String),
    #[error("Unsupported file type: {0}")]
    UnsupportedExtension(String),
    #[error("File is empty: {0}")]
    Empty(String),
    #[error("Could not read file metadata for {path}: {message}")]
    Unreadable { path: String, message: String },
}

/// Check whether the file at `path` is worth decoding, and in which format.
pub fn check(path: &Path) -> Result<FileFormat, GateRejection> {
    let display = path.display().to_string();

    if !path.exists() {
        return Err(GateRejection::NotFound(display));
    }

    let format = FileFormat::from_path(path).ok_or_else(|| {
        let extension = path
            .extension()
            .map(|extension| format!(".{}", extension.to_string_lossy()))
            .unwrap_or_default();
        GateRejection::UnsupportedExtension(extension)
    })?;

    let metadata = std::fs::metadata(path).map_err(|error| GateRejection::Unreadable {
        path: display.clone(),
        message: error.to_string(),
    })?;

    if metadata.len() == 0 {
        return Err(GateRejection::Empty(display));
    }

    Ok(format)
}

/// Fast-fail pre-filter: `true` if the file should be decoded. Rejections are logged, not raised.
pub fn gate(path: &Path) -> bool {
    match check(path) {
        Ok(_) => true,
        Err(rejection) => {
            warn!("{}", rejection);
            false
        }
    }
}
