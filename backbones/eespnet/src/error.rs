use thiserror::Error;

/// Errors raised while building an EESPNet backbone.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EESPNetError {
    /// The width multiplier has no channel layout.
    #[error("Unsupported EESPNet scale: {scale} (expected 0 < s <= 1.5 or s = 2.0, with a channel layout divisible into 4 grouped branches)")]
    UnsupportedScale {
        /// The rejected width multiplier.
        scale: f32,
    },

    /// An EESP unit cannot split its output evenly across its branches.
    #[error("EESP unit cannot split {out_channels} output channels into {branches} branches")]
    InvalidBranching {
        /// Requested output channels.
        out_channels: usize,
        /// Number of parallel branches.
        branches: usize,
    },

    /// Classification was requested from a backbone built without its top.
    #[error("EESPNet was built without a classification top")]
    MissingClassifier,
}

/// A specialized `Result` type for EESPNet construction.
pub type EESPNetResult<T> = Result<T, EESPNetError>;
