use candle_core::{DType, Device, Module, Tensor};
use candle_transformers::generation::LogitsProcessor;
use candle_transformers::models::moondream::Model;
use tokenizers::Tokenizer;

use crate::{GenerationConfig, VlmError};

/// Token used both as the beginning of sequence and the end of sequence marker.
pub const EOS_TOKEN: &str = "<|endoftext|>";

/// Marker some revisions emit at the end of an answer instead of the eos token.
pub const END_MARKER: &str = "<END>";

pub struct TextGeneration {
    model: Model,
    tokenizer: Tokenizer,
    device: Device,
    dtype: DType,
    eos_token: u32,
    end_marker: Vec<u32>,
}

impl TextGeneration {
    pub fn new(
        model: Model,
        tokenizer: Tokenizer,
        device: Device,
        dtype: DType,
    ) -> Result<Self, VlmError> {
        let eos_token = tokenizer
            .token_to_id(EOS_TOKEN)
            .ok_or(VlmError::TokenNotFound(EOS_TOKEN))?;
        let end_marker = end_marker_ids(&tokenizer)?;

        Ok(Self {
            model,
            tokenizer,
            device,
            dtype,
            eos_token,
            end_marker,
        })
    }

    #[inline]
    pub fn device(&self) -> &Device {
        &self.device
    }

    #[inline]
    pub fn dtype(&self) -> DType {
        self.dtype
    }

    /// Run the vision encoder over a preprocessed image with shape [1, 3, H, W].
    pub fn encode_image(&self, image: &Tensor) -> Result<Tensor, VlmError> {
        Ok(self.model.vision_encoder().forward(image)?)
    }

    /// Answer `question` given the image embeddings, starting from an empty kv cache.
    pub fn run(
        &mut self,
        image_embeds: &Tensor,
        question: &str,
        config: &GenerationConfig,
    ) -> Result<String, VlmError> {
        self.model.text_model().clear_kv_cache();

        let temperature = (config.temperature > 0.).then_some(config.temperature);
        let mut logits_processor = LogitsProcessor::new(config.seed, temperature, config.top_p);

        let prompt = format!("\n\nQuestion: {question}\n\nAnswer:");
        let prompt_tokens = self.tokenizer.encode(prompt, true)?.get_ids().to_vec();
        let mut generated: Vec<u32> = Vec::new();

        let bos_token = Tensor::new(&[self.eos_token], &self.device)?.unsqueeze(0)?;
        let start_gen = std::time::Instant::now();

        for index in 0..config.max_tokens {
            let input = match generated.last() {
                Some(&last) if index > 0 => Tensor::new(&[last], &self.device)?,
                _ => Tensor::new(prompt_tokens.as_slice(), &self.device)?,
            }
            .unsqueeze(0)?;

            let logits = if index > 0 {
                self.model.text_model().forward(&input)?
            } else {
                self.model
                    .text_model()
                    .forward_with_img(&bos_token, &input, image_embeds)?
            };
            let logits = logits.squeeze(0)?.to_dtype(DType::F32)?;
            let logits = if config.repeat_penalty == 1. {
                logits
            } else {
                let context: Vec<u32> = prompt_tokens
                    .iter()
                    .chain(&generated)
                    .copied()
                    .collect();
                let start_at = context.len().saturating_sub(config.repeat_last_n);
                candle_transformers::utils::apply_repeat_penalty(
                    &logits,
                    config.repeat_penalty,
                    &context[start_at..],
                )?
            };

            let next_token = logits_processor.sample(&logits)?;
            if next_token == self.eos_token {
                break;
            }
            generated.push(next_token);
            if strip_end_marker(&mut generated, &self.end_marker) {
                break;
            }
        }

        let dt = start_gen.elapsed();
        log::debug!(
            "{} tokens generated ({:.2} token/s)",
            generated.len(),
            generated.len() as f64 / dt.as_secs_f64(),
        );

        let answer = self.tokenizer.decode(&generated, true)?;

        Ok(answer.trim().to_string())
    }
}

/// Token ids of [`END_MARKER`] in the model vocabulary.
fn end_marker_ids(tokenizer: &Tokenizer) -> Result<Vec<u32>, VlmError> {
    let ids = tokenizer.encode(END_MARKER, false)?.get_ids().to_vec();
    if ids.is_empty() {
        return Err(VlmError::TokenNotFound(END_MARKER));
    }
    Ok(ids)
}

/// Drop a trailing end marker from `generated`. Returns true when one was found.
fn strip_end_marker(generated: &mut Vec<u32>, marker: &[u32]) -> bool {
    if marker.is_empty() || !generated.ends_with(marker) {
        return false;
    }
    generated.truncate(generated.len() - marker.len());
    true
}
