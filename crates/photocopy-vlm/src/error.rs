/// An error type for model loading and inference.
#[derive(thiserror::Error, Debug)]
pub enum VlmError {
    /// Error when fetching files from the model hub.
    #[error(transparent)]
    FailedToLoadModel(#[from] hf_hub::api::sync::ApiError),

    /// Error raised by the tensor backend.
    #[error(transparent)]
    CandleError(#[from] candle_core::Error),

    /// Error raised by the tokenizer.
    #[error(transparent)]
    TokenizerError(#[from] tokenizers::Error),

    /// Error to read a local file.
    #[error(transparent)]
    IoError(#[from] std::io::Error),

    /// The repository needs its own architecture code but the configuration does not trust it.
    #[error("Repository {0} requires trusting remote code (set trustRemoteCode to true)")]
    RemoteCodeNotTrusted(String),

    /// The tokenizer cannot represent a token the generation loop stops on.
    #[error("Cannot find the {0} token")]
    TokenNotFound(&'static str),
}
