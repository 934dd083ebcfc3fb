use std::path::PathBuf;

use photocopy_vlm::VlmError;

use crate::response::Status;

/// An error type for the image analysis.
#[derive(thiserror::Error, Debug)]
pub enum AnalyzeError {
    /// Error when the image does not exist.
    #[error("Image file not found: {}", .0.display())]
    FileNotFound(PathBuf),

    /// Error when the model could not be loaded.
    #[error("Failed to load ML model")]
    ModelUnavailable,

    /// Error to open the image file.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Error to decode the image.
    #[error(transparent)]
    ImageError(#[from] image::ImageError),

    /// Error raised by the model while answering.
    #[error(transparent)]
    ModelError(#[from] VlmError),
}

impl AnalyzeError {
    /// The status reported to the caller for this error.
    pub fn status(&self) -> Status {
        match self {
            Self::FileNotFound(_) => Status::FileError,
            Self::ModelUnavailable => Status::ModelError,
            Self::IoError(_) | Self::ImageError(_) | Self::ModelError(_) => Status::AnalysisError,
        }
    }
}

/// An error type for reading the configuration overlay.
#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    /// Error to read the file.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// Error to parse the file.
    #[error(transparent)]
    JsonError(#[from] serde_json::Error),

    /// The file is valid JSON but not an object.
    #[error("expected a JSON object at the top level")]
    NotAnObject,
}

/// Render an error and its sources on a single line.
pub fn error_chain(err: &dyn std::error::Error) -> String {
    let mut message = err.to_string();
    let mut source = err.source();
    while let Some(cause) = source {
        message.push_str(": ");
        message.push_str(&cause.to_string());
        source = cause.source();
    }
    message
}
