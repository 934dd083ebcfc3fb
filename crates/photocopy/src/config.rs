use std::path::Path;

use photocopy_vlm::{DeviceHint, GenerationConfig, ModelSource};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use crate::error::ConfigError;

/// Model name reported when the configuration does not set one.
pub const DEFAULT_MODEL_NAME: &str = "moondream2";
/// Hub repository of the Moondream2 weights.
pub const DEFAULT_REPOSITORY: &str = "vikhyatk/moondream2";
/// Last Moondream2 revision whose architecture matches the candle implementation.
pub const DEFAULT_REVISION: &str = "2024-03-06";

const MODEL_KEY: &str = "model";
const GENERATION_KEY: &str = "generationSettings";

/// The merged service configuration.
///
/// Kept as a JSON mapping so that unknown keys survive and can be echoed back
/// by the health check. Typed views are extracted on demand.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ServiceConfig {
    values: Map<String, Value>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        let mut values = Map::new();
        values.insert(
            MODEL_KEY.to_string(),
            json!({
                "name": DEFAULT_MODEL_NAME,
                "repository": DEFAULT_REPOSITORY,
                "revision": DEFAULT_REVISION,
                "trustRemoteCode": true,
                "device": "mps",
            }),
        );
        values.insert(
            GENERATION_KEY.to_string(),
            json!({
                "temperature": 0.5,
                "maxTokens": 768,
                "topP": 0.3,
                "length": "short",
            }),
        );
        // carried for compatibility, nothing enforces it
        values.insert("timeout".to_string(), json!(60));
        Self { values }
    }
}

impl ServiceConfig {
    /// Build the configuration from the defaults and an optional JSON overlay file.
    ///
    /// A missing file keeps the defaults. A file that cannot be read or parsed is
    /// logged and ignored.
    pub fn load(path: Option<&Path>) -> Self {
        let mut config = Self::default();

        if let Some(path) = path.filter(|p| p.exists()) {
            match read_overlay(path) {
                Ok(overlay) => config.merge(overlay),
                Err(e) => log::warn!("Failed to load config from {}: {e}", path.display()),
            }
        }

        config
    }

    /// Shallow merge: top-level keys of `overlay` replace the current values.
    pub fn merge(&mut self, overlay: Map<String, Value>) {
        self.values.extend(overlay);
    }

    /// Raw access to a top-level key.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.values.get(key)
    }

    /// Typed view of the `model` section.
    pub fn model_settings(&self) -> ModelSettings {
        section(self.values.get(MODEL_KEY), None)
    }

    /// Generation settings, with `overrides` shallow-merged over the configured ones.
    pub fn generation_settings(
        &self,
        overrides: Option<&Map<String, Value>>,
    ) -> GenerationSettings {
        section(self.values.get(GENERATION_KEY), overrides)
    }
}

fn read_overlay(path: &Path) -> Result<Map<String, Value>, ConfigError> {
    let contents = std::fs::read_to_string(path)?;
    match serde_json::from_str::<Value>(&contents)? {
        Value::Object(overlay) => Ok(overlay),
        _ => Err(ConfigError::NotAnObject),
    }
}

// Deserialize a config section with optional overrides. Overrides that do not
// deserialize are dropped, and a malformed section falls back to the defaults.
fn section<T>(value: Option<&Value>, overrides: Option<&Map<String, Value>>) -> T
where
    T: DeserializeOwned + Default,
{
    let base = match value {
        Some(Value::Object(map)) => map.clone(),
        Some(other) => {
            log::warn!("Ignoring malformed config section: {other}");
            Map::new()
        }
        None => Map::new(),
    };

    if let Some(overrides) = overrides {
        let mut merged = base.clone();
        merged.extend(overrides.clone());
        match serde_json::from_value(Value::Object(merged)) {
            Ok(settings) => return settings,
            Err(e) => log::warn!("Ignoring malformed settings overrides: {e}"),
        }
    }

    serde_json::from_value(Value::Object(base)).unwrap_or_else(|e| {
        log::warn!("Ignoring malformed config section: {e}");
        T::default()
    })
}

/// Which model to load and where to run it.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct ModelSettings {
    /// Display name reported in analysis results.
    pub name: String,
    /// Hub repository to download from.
    pub repository: String,
    /// Branch, tag or commit of the repository.
    pub revision: String,
    /// Must be true for repositories that ship their own architecture.
    pub trust_remote_code: bool,
    /// Device hint: `cpu`, `cuda` or `mps`.
    pub device: String,
}

impl Default for ModelSettings {
    fn default() -> Self {
        Self {
            name: DEFAULT_MODEL_NAME.to_string(),
            repository: DEFAULT_REPOSITORY.to_string(),
            revision: DEFAULT_REVISION.to_string(),
            trust_remote_code: true,
            device: "mps".to_string(),
        }
    }
}

impl ModelSettings {
    /// Where the loader should fetch the model and run it.
    pub fn source(&self) -> ModelSource {
        ModelSource {
            repository: self.repository.clone(),
            revision: self.revision.clone(),
            trust_remote_code: self.trust_remote_code,
            device: DeviceHint::parse_lossy(&self.device),
        }
    }
}

/// Sampling parameters as written in the configuration.
#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, rename_all = "camelCase")]
pub struct GenerationSettings {
    /// Sampling temperature, `<= 0` decodes greedily.
    pub temperature: f64,
    /// Upper bound on generated tokens per answer.
    pub max_tokens: usize,
    /// Nucleus sampling threshold, ignored outside (0, 1).
    pub top_p: f64,
    /// Answer length hint. The query path has no length control, so it is not
    /// forwarded to the model.
    pub length: String,
    /// Seed of the sampler.
    pub seed: u64,
    /// Penalty on recently generated tokens, `1.0` disables it.
    pub repeat_penalty: f32,
}

impl Default for GenerationSettings {
    fn default() -> Self {
        let defaults = GenerationConfig::default();
        Self {
            temperature: defaults.temperature,
            max_tokens: defaults.max_tokens,
            top_p: defaults.top_p.unwrap_or(1.0),
            length: "short".to_string(),
            seed: defaults.seed,
            repeat_penalty: defaults.repeat_penalty,
        }
    }
}

impl From<&GenerationSettings> for GenerationConfig {
    fn from(settings: &GenerationSettings) -> Self {
        GenerationConfig {
            seed: settings.seed,
            temperature: settings.temperature,
            top_p: (settings.top_p > 0. && settings.top_p < 1.).then_some(settings.top_p),
            repeat_penalty: settings.repeat_penalty,
            max_tokens: settings.max_tokens,
            ..Default::default()
        }
    }
}
