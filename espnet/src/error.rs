use eespnet::EESPNetError;
use thiserror::Error;

/// The error type for `ESPNet-Burn` operations.
///
/// This enum encapsulates all possible errors that can occur within the library,
/// ranging from configuration issues to weight loading and dataset failures.
#[derive(Error, Debug)]
pub enum EspnetError {
    /// Error for when the backbone cannot be built with the requested settings.
    #[error("Unsupported backbone: {reason}")]
    UnsupportedBackbone {
        /// Why the backbone was rejected.
        reason: String,
    },

    /// Error for when an invalid model configuration is provided.
    #[error("Invalid model configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when loading model weights fails.
    #[error("Failed to load weights: {reason}")]
    WeightLoadingFailed {
        /// The reason for the weight loading failure.
        reason: String,
    },

    /// Error for when dataset operations fail.
    #[error("Dataset error: {message}")]
    DatasetError {
        /// The error message.
        message: String,
    },
}

impl From<EESPNetError> for EspnetError {
    fn from(error: EESPNetError) -> Self {
        Self::UnsupportedBackbone {
            reason: error.to_string(),
        }
    }
}

/// A specialized `Result` type for `ESPNet-Burn` operations.
pub type EspnetResult<T> = Result<T, EspnetError>;
