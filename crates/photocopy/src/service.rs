use std::path::Path;
use std::time::Instant;

use image::{GenericImageView, ImageReader};
use log::{debug, error, info};
use photocopy_vlm::{GenerationConfig, ModelLoader, VisionLanguageModel};
use serde_json::{Map, Value};

use crate::config::ServiceConfig;
use crate::error::{error_chain, AnalyzeError};
use crate::prompts::{CAPTION_PROMPT, TAGS_PROMPT};
use crate::response::{
    AnalysisReport, AnalysisResult, ErrorResponse, HealthReport, ModelInfo, Status,
};
use crate::tags::{parse_tag_response, TagResponse, MAX_TAGS};

/// Captions and tags images with a lazily loaded vision-language model.
///
/// The model is loaded on first use and kept for the lifetime of the service.
/// A failed load is not cached, the next call tries again.
pub struct PhotocopyService<L: ModelLoader> {
    config: ServiceConfig,
    loader: L,
    model: Option<L::Model>,
}

impl<L: ModelLoader> PhotocopyService<L> {
    /// Create the service. Nothing is loaded until the first request.
    pub fn new(config: ServiceConfig, loader: L) -> Self {
        Self {
            config,
            loader,
            model: None,
        }
    }

    /// The merged configuration.
    pub fn config(&self) -> &ServiceConfig {
        &self.config
    }

    /// Whether a model is held by the service.
    #[inline]
    pub fn is_model_loaded(&self) -> bool {
        self.model.is_some()
    }

    /// Load the model if needed. Returns whether a model is available.
    ///
    /// Load errors are logged and never propagated.
    pub fn load_model(&mut self) -> bool {
        if self.model.is_some() {
            return true;
        }

        let settings = self.config.model_settings();
        info!("Loading {} model...", settings.name);

        match self.loader.load(&settings.source()) {
            Ok(model) => {
                info!("Model loaded successfully on {}", model.device_name());
                self.model = Some(model);
                true
            }
            Err(e) => {
                error!("Failed to load model: {}", error_chain(&e));
                false
            }
        }
    }

    /// Caption and tag the image at `image_path`.
    ///
    /// `custom_settings` overrides the configured generation settings key by key.
    pub fn analyze_image(
        &mut self,
        image_path: &str,
        custom_settings: Option<&Map<String, Value>>,
    ) -> AnalysisResult {
        let start = Instant::now();

        match self.try_analyze(image_path, custom_settings, start) {
            Ok(report) => AnalysisResult::Success(report),
            Err(e) => {
                error!("Error analyzing image: {}", error_chain(&e));
                let status = e.status();
                let response = ErrorResponse::new(status, e.to_string());
                AnalysisResult::Failure(if status == Status::AnalysisError {
                    response.with_processing_time(start.elapsed().as_secs_f64())
                } else {
                    response
                })
            }
        }
    }

    fn try_analyze(
        &mut self,
        image_path: &str,
        custom_settings: Option<&Map<String, Value>>,
        start: Instant,
    ) -> Result<AnalysisReport, AnalyzeError> {
        let path = Path::new(image_path);
        if !path.exists() {
            return Err(AnalyzeError::FileNotFound(path.to_path_buf()));
        }

        let image = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        let (width, height) = image.dimensions();
        info!("Loaded image: {image_path} ({width}x{height})");

        if !self.load_model() {
            return Err(AnalyzeError::ModelUnavailable);
        }
        let model = self.model.as_mut().ok_or(AnalyzeError::ModelUnavailable)?;

        let settings = self.config.generation_settings(custom_settings);
        let generation = GenerationConfig::from(&settings);

        info!("Generating analysis...");
        let caption = model.query(&image, CAPTION_PROMPT, &generation)?;
        let tags_answer = model.query(&image, TAGS_PROMPT, &generation)?;

        let TagResponse { mut tags, analysis } = parse_tag_response(tags_answer.trim());
        tags.truncate(MAX_TAGS);
        debug!("Generated tags: {tags:?}");

        let model_settings = self.config.model_settings();

        Ok(AnalysisReport {
            status: Status::Success,
            caption: caption.trim().to_string(),
            tags,
            analysis,
            processing_time: start.elapsed().as_secs_f64(),
            image_path: image_path.to_string(),
            image_size: [width, height],
            model_info: ModelInfo {
                name: model_settings.name,
                repository: model_settings.repository,
            },
        })
    }

    /// Report whether the model can be loaded, loading it as a side effect.
    pub fn health_check(&mut self) -> HealthReport {
        let status = if self.load_model() {
            Status::Healthy
        } else {
            Status::NotHealthy
        };

        HealthReport {
            status,
            model_loaded: self.is_model_loaded(),
            device: self.model.as_ref().map(|m| m.device_name().to_string()),
            config: self.config.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgb, RgbImage};
    use photocopy_vlm::{ModelSource, VlmError};
    use serde_json::json;
    use std::cell::{Cell, RefCell};
    use std::rc::Rc;

    struct ScriptedModel {
        answers: Vec<String>,
        prompts: Rc<RefCell<Vec<String>>>,
        configs: Rc<RefCell<Vec<GenerationConfig>>>,
    }

    impl VisionLanguageModel for ScriptedModel {
        fn query(
            &mut self,
            _image: &DynamicImage,
            prompt: &str,
            config: &GenerationConfig,
        ) -> Result<String, VlmError> {
            self.prompts.borrow_mut().push(prompt.to_string());
            self.configs.borrow_mut().push(*config);
            if self.answers.is_empty() {
                return Err(VlmError::TokenNotFound("<|endoftext|>"));
            }
            Ok(self.answers.remove(0))
        }

        fn device_name(&self) -> &str {
            "cpu"
        }
    }

    #[derive(Default)]
    struct ScriptedLoader {
        answers: Vec<String>,
        fail: bool,
        loads: Rc<Cell<usize>>,
        prompts: Rc<RefCell<Vec<String>>>,
        configs: Rc<RefCell<Vec<GenerationConfig>>>,
    }

    impl ScriptedLoader {
        fn answering(answers: &[&str]) -> Self {
            Self {
                answers: answers.iter().map(|a| a.to_string()).collect(),
                ..Default::default()
            }
        }

        fn failing() -> Self {
            Self {
                fail: true,
                ..Default::default()
            }
        }
    }

    impl ModelLoader for ScriptedLoader {
        type Model = ScriptedModel;

        fn load(&mut self, _source: &ModelSource) -> Result<Self::Model, VlmError> {
            self.loads.set(self.loads.get() + 1);
            if self.fail {
                return Err(VlmError::RemoteCodeNotTrusted("vikhyatk/moondream2".into()));
            }
            Ok(ScriptedModel {
                answers: self.answers.clone(),
                prompts: self.prompts.clone(),
                configs: self.configs.clone(),
            })
        }
    }

    fn write_image(dir: &tempfile::TempDir, width: u32, height: u32) -> String {
        let path = dir.path().join("image.png");
        let image = RgbImage::from_pixel(width, height, Rgb([10, 200, 30]));
        image.save(&path).expect("failed to write test image");
        path.to_string_lossy().into_owned()
    }

    #[test]
    fn missing_image_never_loads_model() {
        let loader = ScriptedLoader::answering(&["caption", "tags"]);
        let loads = loader.loads.clone();
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let result = service.analyze_image("/no/such/image.jpg", None);
        assert_eq!(result.status(), Status::FileError);
        assert_eq!(
            result,
            AnalysisResult::Failure(ErrorResponse::new(
                Status::FileError,
                "Image file not found: /no/such/image.jpg"
            ))
        );
        assert_eq!(loads.get(), 0);
        assert!(!service.is_model_loaded());
    }

    #[test]
    fn analyze_with_embedded_json() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let image_path = write_image(&dir, 64, 48);

        let loader = ScriptedLoader::answering(&[
            "  A green square.  ",
            r#"Here you go: {"tags": ["green", "square"], "objects": ["square"], "scene": "flat color", "colors": ["green"], "actions": []}"#,
        ]);
        let prompts = loader.prompts.clone();
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let AnalysisResult::Success(report) = service.analyze_image(&image_path, None) else {
            panic!("analysis failed");
        };
        assert_eq!(report.caption, "A green square.");
        assert_eq!(report.tags, vec!["green", "square"]);
        assert_eq!(report.analysis.objects, vec!["square"]);
        assert_eq!(report.analysis.scene, "flat color");
        assert_eq!(report.analysis.colors, vec!["green"]);
        assert!(report.analysis.actions.is_empty());
        assert_eq!(report.image_size, [64, 48]);
        assert_eq!(report.image_path, image_path);
        assert_eq!(report.model_info.name, "moondream2");
        assert_eq!(report.model_info.repository, "vikhyatk/moondream2");
        assert!(report.processing_time >= 0.0);

        assert_eq!(*prompts.borrow(), vec![CAPTION_PROMPT, TAGS_PROMPT]);
        Ok(())
    }

    #[test]
    fn analyze_falls_back_to_commas_and_truncates() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let image_path = write_image(&dir, 8, 8);

        let many: Vec<String> = (0..40).map(|i| format!("tag{i}")).collect();
        let many = many.join(", ");
        let loader = ScriptedLoader::answering(&["caption", many.as_str()]);
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let AnalysisResult::Success(report) = service.analyze_image(&image_path, None) else {
            panic!("analysis failed");
        };
        assert_eq!(report.tags.len(), MAX_TAGS);
        assert_eq!(report.tags[0], "tag0");
        assert_eq!(report.tags[14], "tag14");
        assert!(report.analysis.objects.is_empty());
        assert!(report.analysis.scene.is_empty());
        Ok(())
    }

    #[test]
    fn analyze_truncates_embedded_json_tags() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let image_path = write_image(&dir, 8, 8);

        let tags: Vec<String> = (0..20).map(|i| format!("tag{i}")).collect();
        let answer = json!({"tags": tags, "scene": "a grid of labels"}).to_string();
        let loader = ScriptedLoader::answering(&["caption", answer.as_str()]);
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let AnalysisResult::Success(report) = service.analyze_image(&image_path, None) else {
            panic!("analysis failed");
        };
        assert_eq!(report.tags.len(), MAX_TAGS);
        assert_eq!(report.tags.first().map(String::as_str), Some("tag0"));
        assert_eq!(report.tags.last().map(String::as_str), Some("tag14"));
        assert_eq!(report.analysis.scene, "a grid of labels");
        Ok(())
    }

    #[test]
    fn model_is_loaded_once() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let image_path = write_image(&dir, 8, 8);

        let loader = ScriptedLoader::answering(&["a", "b", "c", "d"]);
        let loads = loader.loads.clone();
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        assert!(service.analyze_image(&image_path, None).is_success());
        assert!(service.analyze_image(&image_path, None).is_success());
        assert_eq!(service.health_check().status, Status::Healthy);
        assert_eq!(loads.get(), 1);
        Ok(())
    }

    #[test]
    fn load_failure_is_model_error() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let image_path = write_image(&dir, 8, 8);

        let loader = ScriptedLoader::failing();
        let loads = loader.loads.clone();
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let result = service.analyze_image(&image_path, None);
        assert_eq!(
            result,
            AnalysisResult::Failure(ErrorResponse::new(
                Status::ModelError,
                "Failed to load ML model"
            ))
        );

        // failures are not memoized
        service.analyze_image(&image_path, None);
        assert_eq!(loads.get(), 2);
        Ok(())
    }

    #[test]
    fn undecodable_image_is_analysis_error() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("notes.txt");
        std::fs::write(&path, "not an image")?;

        let loader = ScriptedLoader::answering(&["a", "b"]);
        let loads = loader.loads.clone();
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let AnalysisResult::Failure(error) = service.analyze_image(&path.to_string_lossy(), None)
        else {
            panic!("analysis should fail");
        };
        assert_eq!(error.status, Status::AnalysisError);
        assert!(error.processing_time.is_some());
        assert_eq!(loads.get(), 0);
        Ok(())
    }

    #[test]
    fn model_error_during_query_is_analysis_error() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let image_path = write_image(&dir, 8, 8);

        // only the caption is answered
        let loader = ScriptedLoader::answering(&["caption"]);
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let result = service.analyze_image(&image_path, None);
        assert_eq!(result.status(), Status::AnalysisError);
        Ok(())
    }

    #[test]
    fn custom_settings_reach_the_model() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let image_path = write_image(&dir, 8, 8);

        let loader = ScriptedLoader::answering(&["a", "b"]);
        let configs = loader.configs.clone();
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let settings = json!({"maxTokens": 12, "temperature": 0.0, "length": "long"});
        assert!(service
            .analyze_image(&image_path, settings.as_object())
            .is_success());

        let configs = configs.borrow();
        assert_eq!(configs.len(), 2);
        assert!(configs.iter().all(|c| c.max_tokens == 12 && c.temperature == 0.0));
        assert!(configs.iter().all(|c| c.top_p == Some(0.3)));
        Ok(())
    }

    #[test]
    fn malformed_settings_keep_configured_values() -> Result<(), std::io::Error> {
        let dir = tempfile::tempdir()?;
        let image_path = write_image(&dir, 8, 8);

        let loader = ScriptedLoader::answering(&["a", "b"]);
        let configs = loader.configs.clone();
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let settings = json!({"maxTokens": -1, "temperature": 0.0});
        assert!(service
            .analyze_image(&image_path, settings.as_object())
            .is_success());

        let configs = configs.borrow();
        assert_eq!(configs.len(), 2);
        assert!(configs.iter().all(|c| c.max_tokens == 768 && c.temperature == 0.5));
        assert!(configs.iter().all(|c| c.top_p == Some(0.3)));
        Ok(())
    }

    #[test]
    fn health_check_loads_once() {
        let loader = ScriptedLoader::answering(&[]);
        let loads = loader.loads.clone();
        let mut service = PhotocopyService::new(ServiceConfig::default(), loader);

        let report = service.health_check();
        assert_eq!(report.status, Status::Healthy);
        assert!(report.model_loaded);
        assert_eq!(report.device.as_deref(), Some("cpu"));
        assert_eq!(&report.config, service.config());
        assert_eq!(loads.get(), 1);

        service.health_check();
        assert_eq!(loads.get(), 1);
    }

    #[test]
    fn health_check_not_healthy() {
        let mut service =
            PhotocopyService::new(ServiceConfig::default(), ScriptedLoader::failing());

        let report = service.health_check();
        assert_eq!(report.status, Status::NotHealthy);
        assert!(!report.model_loaded);
        assert_eq!(report.device, None);
    }
}
