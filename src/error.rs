use thiserror::Error;

/// Everything the engine can fail with
#[derive(Error, Debug)]
pub enum EngineError {
    /// Malformed or unsupported audio file
    #[error("could not decode audio: {0}")]
    Decode(String),

    /// No analysis window produced a usable tempo
    #[error("tempo detection failed: {0}")]
    Detection(String),

    /// Background work was cancelled before it finished
    #[error("operation cancelled")]
    Cancelled,

    /// No input device, or access to it was refused
    #[error("microphone unavailable: {0}")]
    MicrophoneUnavailable(String),

    /// Encoding a take failed
    #[error("failed to encode {format}: {reason}")]
    Encode { format: &'static str, reason: String },

    /// Output device or stream problem
    #[error("audio device error: {0}")]
    Device(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
