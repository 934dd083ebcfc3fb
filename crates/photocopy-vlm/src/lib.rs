#![deny(missing_docs)]
//! # Photocopy vision-language models
//!
//! Model backends used by the Photocopy image analyzer to answer natural
//! language questions about an image.
//!
//! The crate exposes two seams:
//!
//! - [`ModelLoader`]: builds a model from a [`ModelSource`] (repository, revision, device).
//! - [`VisionLanguageModel`]: answers a prompt about an image.
//!
//! The default backend is [`moondream::Moondream`], which runs Moondream2 with candle
//! and fetches the weights from the Hugging Face hub.

/// Compute device selection from a configured hint.
pub mod device;

/// Error types for model loading and inference.
pub mod error;

/// Moondream2 vision-language model integration.
///
/// Small vision-language model built on a SigLIP encoder and a Phi text decoder.
pub mod moondream;

pub use crate::device::DeviceHint;
pub use crate::error::VlmError;

use image::DynamicImage;

/// Parameters that drive the sampling of a single model answer.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct GenerationConfig {
    /// Seed of the logits sampler.
    pub seed: u64,
    /// Sampling temperature. Values `<= 0` select greedy decoding.
    pub temperature: f64,
    /// Nucleus sampling threshold.
    pub top_p: Option<f64>,
    /// Penalty applied to already generated tokens. `1.0` disables it.
    pub repeat_penalty: f32,
    /// Number of trailing tokens the repeat penalty looks at.
    pub repeat_last_n: usize,
    /// Maximum number of generated tokens.
    pub max_tokens: usize,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            seed: 299792458,
            temperature: 0.5,
            top_p: Some(0.3),
            repeat_penalty: 1.0,
            repeat_last_n: 64,
            max_tokens: 768,
        }
    }
}

/// Where to fetch a model from and where to run it.
#[derive(Clone, Debug, PartialEq)]
pub struct ModelSource {
    /// Hub repository identifier, e.g. `vikhyatk/moondream2`.
    pub repository: String,
    /// Pinned revision (tag, branch or commit) of the repository.
    pub revision: String,
    /// Whether the repository's custom architecture may be instantiated.
    pub trust_remote_code: bool,
    /// Preferred compute device.
    pub device: DeviceHint,
}

/// A model that answers questions about images.
pub trait VisionLanguageModel {
    /// Answer `prompt` about `image`. Each call is independent of the previous ones.
    fn query(
        &mut self,
        image: &DynamicImage,
        prompt: &str,
        config: &GenerationConfig,
    ) -> Result<String, VlmError>;

    /// Name of the device the model runs on, e.g. `cpu` or `cuda`.
    fn device_name(&self) -> &str;
}

/// Builds a [`VisionLanguageModel`] from a [`ModelSource`].
pub trait ModelLoader {
    /// The model type produced by this loader.
    type Model: VisionLanguageModel;

    /// Load the model. This may download weights and take a long time.
    fn load(&mut self, source: &ModelSource) -> Result<Self::Model, VlmError>;
}
