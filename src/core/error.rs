use std::path::PathBuf;

/// A media file could not be opened for decoding. Fatal to `load` and `seek`.
#[derive(Debug, thiserror::Error)]
pub enum SourceOpenError {
    #[error("Failed to launch {tool}: {source}")]
    Spawn {
        tool: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Probe failed for {path}: {reason}")]
    Probe { path: PathBuf, reason: String },

    #[error("No video stream found in {0}")]
    NoVideoStream(PathBuf),

    #[error("Invalid stream metadata: {0}")]
    InvalidMetadata(String),

    #[error("Cannot start decoder: {active} processes already running (max: {max})")]
    ProcessLimit { active: usize, max: usize },
}

/// Mid-stream decode failure. The engine treats the affected source as exhausted.
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("Decoder pipe error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Truncated frame: got {got} of {expected} bytes")]
    TruncatedFrame { expected: usize, got: usize },

    #[error("Decoder restart failed: {0}")]
    Restart(#[from] SourceOpenError),
}

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Open(#[from] SourceOpenError),

    #[error("No media loaded")]
    NotLoaded,

    #[error("Operation not allowed while {0}")]
    InvalidState(&'static str),

    #[error("Failed to start worker thread: {0}")]
    Thread(std::io::Error),
}

pub type EngineResult<T> = Result<T, EngineError>;
