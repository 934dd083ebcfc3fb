use std::io::Read;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::path::{Path, PathBuf};
use std::str::FromStr;

use argh::FromArgs;
use log::debug;
use photocopy_vlm::ModelLoader;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::response::{ErrorResponse, Status};
use crate::service::PhotocopyService;

#[derive(FromArgs, Debug)]
/// Caption and tag images with the Moondream2 vision-language model
pub struct Args {
    /// path to configuration file
    #[argh(option)]
    pub config: Option<PathBuf>,

    /// operation mode: analyze or health (reads a JSON request from stdin when omitted)
    #[argh(option)]
    pub mode: Option<Mode>,

    /// path to image file for analysis
    #[argh(option)]
    pub image: Option<PathBuf>,
}

/// Explicit operation mode selected with `--mode`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Analyze the image given with `--image`.
    Analyze,
    /// Report whether the model can be loaded.
    Health,
}

impl FromStr for Mode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "analyze" => Ok(Self::Analyze),
            "health" => Ok(Self::Health),
            other => Err(format!("invalid mode '{other}', expected analyze or health")),
        }
    }
}

/// One JSON document to print and the process exit code that goes with it.
#[derive(Clone, Debug, PartialEq)]
pub struct CliResponse {
    /// Document written to stdout.
    pub body: Value,
    /// 0 on success, 1 on error.
    pub exit_code: u8,
}

impl CliResponse {
    /// Serialize `body`. A serialization failure becomes an `unexpected_error`.
    pub fn new(body: impl Serialize, exit_code: u8) -> Self {
        match serde_json::to_value(body) {
            Ok(body) => Self { body, exit_code },
            Err(e) => Self::error(Status::UnexpectedError, format!("Unexpected error: {e}")),
        }
    }

    /// An error document with exit code 1.
    pub fn error(status: Status, message: impl Into<String>) -> Self {
        let body = serde_json::to_value(ErrorResponse::new(status, message)).unwrap_or_default();
        Self { body, exit_code: 1 }
    }

    /// The status field of the body, if any.
    pub fn status(&self) -> Option<&str> {
        self.body.get("status").and_then(Value::as_str)
    }

    /// Pretty JSON for the explicit modes, compact JSON for stdin requests.
    pub fn render(&self, pretty: bool) -> String {
        if pretty {
            format!("{:#}", self.body)
        } else {
            self.body.to_string()
        }
    }
}

/// A request read from stdin in interactive mode.
#[derive(Debug, Deserialize)]
struct Request {
    action: Option<Value>,
    image_path: Option<String>,
    settings: Option<Map<String, Value>>,
}

/// Run the mode selected by `args`, turning panics into an `unexpected_error`.
pub fn run<L, R>(args: &Args, service: &mut PhotocopyService<L>, input: R) -> CliResponse
where
    L: ModelLoader,
    R: Read,
{
    debug!(
        "Received args: mode={:?}, image={:?}, config={:?}",
        args.mode, args.image, args.config
    );

    catch_unwind(AssertUnwindSafe(|| match args.mode {
        Some(Mode::Analyze) => run_analyze(service, args.image.as_deref()),
        Some(Mode::Health) => run_health(service),
        None => run_interactive(service, input),
    }))
    .unwrap_or_else(|payload| {
        let reason = payload
            .downcast_ref::<&str>()
            .map(|s| s.to_string())
            .or_else(|| payload.downcast_ref::<String>().cloned())
            .unwrap_or_else(|| "panic".to_string());
        CliResponse::error(Status::UnexpectedError, format!("Unexpected error: {reason}"))
    })
}

/// Analyze `image`, or report `missing_image` when none was given.
pub fn run_analyze<L: ModelLoader>(
    service: &mut PhotocopyService<L>,
    image: Option<&Path>,
) -> CliResponse {
    let Some(image) = image else {
        return CliResponse::error(
            Status::MissingImage,
            "Image path required for analysis mode",
        );
    };

    debug!("Analyzing image: {}", image.display());
    let result = service.analyze_image(&image.to_string_lossy(), None);
    debug!("Analysis result status: {:?}", result.status());

    let exit_code = if result.is_success() { 0 } else { 1 };
    CliResponse::new(result, exit_code)
}

/// Health check. Always exits 0, even when the model cannot be loaded.
pub fn run_health<L: ModelLoader>(service: &mut PhotocopyService<L>) -> CliResponse {
    CliResponse::new(service.health_check(), 0)
}

/// Serve a single JSON request read from `input`.
pub fn run_interactive<L, R>(service: &mut PhotocopyService<L>, mut input: R) -> CliResponse
where
    L: ModelLoader,
    R: Read,
{
    let mut raw = String::new();
    if let Err(e) = input.read_to_string(&mut raw) {
        return CliResponse::error(Status::UnexpectedError, format!("Unexpected error: {e}"));
    }

    let value: Value = match serde_json::from_str(&raw) {
        Ok(value) => value,
        Err(_) => return CliResponse::error(Status::JsonError, "Invalid JSON input"),
    };
    if !value.is_object() {
        return CliResponse::error(
            Status::UnexpectedError,
            "Unexpected error: request must be a JSON object",
        );
    }
    let request: Request = match serde_json::from_value(value) {
        Ok(request) => request,
        Err(_) => return CliResponse::error(Status::JsonError, "Invalid JSON input"),
    };

    match request.action.as_ref().and_then(Value::as_str) {
        Some("analyze") => {
            let Some(image_path) = request.image_path.filter(|p| !p.is_empty()) else {
                return CliResponse::error(Status::MissingImagePath, "image_path required");
            };
            let result = service.analyze_image(&image_path, request.settings.as_ref());
            let exit_code = if result.is_success() { 0 } else { 1 };
            CliResponse::new(result, exit_code)
        }
        Some("health") => run_health(service),
        _ => {
            let action = match &request.action {
                Some(Value::String(s)) => s.clone(),
                Some(other) => other.to_string(),
                None => "null".to_string(),
            };
            CliResponse::error(Status::UnknownAction, format!("Unknown action: {action}"))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_modes() {
        assert_eq!("analyze".parse::<Mode>(), Ok(Mode::Analyze));
        assert_eq!("health".parse::<Mode>(), Ok(Mode::Health));
        assert!("serve".parse::<Mode>().is_err());
    }

    #[test]
    fn parse_args() -> Result<(), String> {
        let args = Args::from_args(
            &["photocopier"],
            &["--mode", "analyze", "--image", "cat.jpg", "--config", "cfg.json"],
        )
        .map_err(|e| e.output)?;
        assert_eq!(args.mode, Some(Mode::Analyze));
        assert_eq!(args.image, Some(PathBuf::from("cat.jpg")));
        assert_eq!(args.config, Some(PathBuf::from("cfg.json")));

        let args = Args::from_args(&["photocopier"], &[]).map_err(|e| e.output)?;
        assert_eq!(args.mode, None);

        assert!(Args::from_args(&["photocopier"], &["--mode", "serve"]).is_err());
        Ok(())
    }

    #[test]
    fn render() {
        let response = CliResponse::new(json!({"status": "healthy", "model_loaded": true}), 0);
        assert_eq!(response.render(false), r#"{"status":"healthy","model_loaded":true}"#);
        assert_eq!(
            response.render(true),
            "{\n  \"status\": \"healthy\",\n  \"model_loaded\": true\n}"
        );
        assert_eq!(response.status(), Some("healthy"));
    }

    #[test]
    fn error_response() {
        let response = CliResponse::error(Status::JsonError, "Invalid JSON input");
        assert_eq!(response.exit_code, 1);
        assert_eq!(
            response.body,
            json!({"error": "Invalid JSON input", "status": "json_error"})
        );
    }
}
