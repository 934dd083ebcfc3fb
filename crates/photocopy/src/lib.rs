//! # Photocopy
//!
//! Captions and tags images with a vision-language model and reports the
//! outcome as a single JSON document.
//!
//! The [`service::PhotocopyService`] owns the configuration and a lazily loaded
//! model; the [`cli`] module maps the three invocation modes (analyze, health,
//! stdin request) onto it.

#![deny(missing_docs)]

/// Command line arguments and the three invocation modes.
pub mod cli;

/// Default configuration and the JSON overlay loader.
pub mod config;

/// Error types of the analysis and the configuration loader.
pub mod error;

/// Prompts sent to the model.
pub mod prompts;

/// JSON documents printed by the service.
pub mod response;

/// The analysis service and its lazily loaded model.
pub mod service;

/// Recovery of tags and structured fields from free-text answers.
pub mod tags;

pub use crate::config::ServiceConfig;
pub use crate::response::{AnalysisResult, HealthReport, Status};
pub use crate::service::PhotocopyService;
