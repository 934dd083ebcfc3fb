mod model;

/// Image to tensor conversion for the Moondream2 vision encoder.
pub mod preprocessor;

use candle_core::{DType, Device};
use candle_nn::VarBuilder;
use candle_transformers::models::moondream::{Config, Model};
use hf_hub::{api::sync::Api, Repo, RepoType};
use image::DynamicImage;
use model::TextGeneration;
use tokenizers::Tokenizer;

use crate::device::device_name;
use crate::{GenerationConfig, ModelLoader, ModelSource, VisionLanguageModel, VlmError};

pub use model::{END_MARKER, EOS_TOKEN};

const WEIGHTS_FILE: &str = "model.safetensors";
const TOKENIZER_FILE: &str = "tokenizer.json";

/// The Moondream2 model
///
/// Answers free-form questions about an image. Every call to
/// [`VisionLanguageModel::query`] encodes the image and decodes the answer from
/// a clean kv cache, so queries do not leak into each other.
///
/// NOTE: to run the model with Cuda or Metal, build with `--features cuda` or `--features metal`.
pub struct Moondream {
    pipeline: TextGeneration,
}

impl Moondream {
    /// Download (or reuse from the local cache) and load the model.
    ///
    /// # Arguments
    ///
    /// * `api` - The hub client used to fetch the weights and tokenizer
    /// * `source` - The repository, revision and device to use
    pub fn from_hub(api: &Api, source: &ModelSource) -> Result<Self, VlmError> {
        if !source.trust_remote_code {
            return Err(VlmError::RemoteCodeNotTrusted(source.repository.clone()));
        }

        let (device, dtype) = source.device.resolve();
        log::info!(
            "Loading {}@{} on {} ({dtype:?})",
            source.repository,
            source.revision,
            device_name(&device)
        );

        let repo = api.repo(Repo::with_revision(
            source.repository.clone(),
            RepoType::Model,
            source.revision.clone(),
        ));
        let weights_filename = repo.get(WEIGHTS_FILE)?;
        let tokenizer_filename = repo.get(TOKENIZER_FILE)?;

        let tokenizer = Tokenizer::from_file(tokenizer_filename)?;
        let model = Self::load_model(&weights_filename, dtype, &device)?;

        Ok(Self {
            pipeline: TextGeneration::new(model, tokenizer, device, dtype)?,
        })
    }

    // utility function to load the model
    fn load_model(
        weights: &std::path::Path,
        dtype: DType,
        device: &Device,
    ) -> Result<Model, VlmError> {
        let config = Config::v2();
        let vb = unsafe { VarBuilder::from_mmaped_safetensors(&[weights], dtype, device)? };

        Ok(Model::new(&config, vb)?)
    }
}

impl VisionLanguageModel for Moondream {
    fn query(
        &mut self,
        image: &DynamicImage,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, VlmError> {
        let image_t = preprocessor::preprocess_image(
            image,
            self.pipeline.device(),
            self.pipeline.dtype(),
        )?;
        let image_embeds = self.pipeline.encode_image(&image_t)?;

        self.pipeline.run(&image_embeds, prompt, config)
    }

    fn device_name(&self) -> &str {
        device_name(self.pipeline.device())
    }
}

/// Loads [`Moondream`] models from the Hugging Face hub.
pub struct HubLoader {
    api: Api,
}

impl HubLoader {
    /// Create the hub client. Nothing is downloaded until [`ModelLoader::load`].
    pub fn new() -> Result<Self, VlmError> {
        Ok(Self { api: Api::new()? })
    }
}

impl ModelLoader for HubLoader {
    type Model = Moondream;

    fn load(&mut self, source: &ModelSource) -> Result<Self::Model, VlmError> {
        Moondream::from_hub(&self.api, source)
    }
}
