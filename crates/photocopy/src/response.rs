use serde::Serialize;

use crate::config::ServiceConfig;
use crate::tags::StructuredTags;

/// Status discriminator present in every JSON document the service prints.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Status {
    /// The image was analyzed.
    Success,
    /// The model is loaded.
    Healthy,
    /// The model could not be loaded.
    NotHealthy,
    /// The image path does not exist.
    FileError,
    /// The model could not be loaded for an analysis.
    ModelError,
    /// Decoding or querying failed.
    AnalysisError,
    /// `--mode analyze` without `--image`.
    MissingImage,
    /// A stdin `analyze` request without `image_path`.
    MissingImagePath,
    /// A stdin request with an unsupported action.
    UnknownAction,
    /// The stdin request is not valid JSON.
    JsonError,
    /// Anything else, including panics.
    UnexpectedError,
    /// The model runtime could not be initialized.
    ImportError,
}

/// A failure reported as `{"error": ..., "status": ...}`.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ErrorResponse {
    /// Human readable message.
    pub error: String,
    /// Error category.
    pub status: Status,
    /// Seconds spent before failing, only reported for analysis errors.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub processing_time: Option<f64>,
}

impl ErrorResponse {
    /// Create a response without timing information.
    pub fn new(status: Status, error: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            status,
            processing_time: None,
        }
    }

    /// Attach the elapsed time, in seconds.
    pub fn with_processing_time(mut self, seconds: f64) -> Self {
        self.processing_time = Some(seconds);
        self
    }
}

/// The model that produced an analysis.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ModelInfo {
    /// Display name from the configuration.
    pub name: String,
    /// Hub repository the weights come from.
    pub repository: String,
}

/// The output of a successful analysis.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AnalysisReport {
    /// Always [`Status::Success`].
    pub status: Status,
    /// Trimmed answer to the caption prompt.
    pub caption: String,
    /// At most [`crate::tags::MAX_TAGS`] tags.
    pub tags: Vec<String>,
    /// Structured fields of the tag answer.
    pub analysis: StructuredTags,
    /// Wall time of the whole analysis, in seconds.
    pub processing_time: f64,
    /// The path as given by the caller.
    pub image_path: String,
    /// `[width, height]` in pixels.
    pub image_size: [u32; 2],
    /// Which model answered.
    pub model_info: ModelInfo,
}

/// Either document an analysis can produce.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(untagged)]
pub enum AnalysisResult {
    /// The analysis completed.
    Success(AnalysisReport),
    /// The analysis failed.
    Failure(ErrorResponse),
}

impl AnalysisResult {
    /// The status field of the document.
    pub fn status(&self) -> Status {
        match self {
            Self::Success(report) => report.status,
            Self::Failure(error) => error.status,
        }
    }

    /// Whether the analysis completed.
    pub fn is_success(&self) -> bool {
        self.status() == Status::Success
    }
}

/// Result of a health check.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct HealthReport {
    /// [`Status::Healthy`] or [`Status::NotHealthy`].
    pub status: Status,
    /// Whether a model is held by the service.
    pub model_loaded: bool,
    /// Backend the model runs on, `None` when no model is loaded.
    pub device: Option<String>,
    /// The merged configuration.
    pub config: ServiceConfig,
}
