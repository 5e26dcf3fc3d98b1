use thiserror::Error;

/// Failures of the OS input-injection primitive
#[derive(Debug, Error)]
pub enum InputError {
    /// The device rejected a synthesized mouse or keyboard event
    #[error("Failed to simulate input: {0}")]
    Simulate(String),

    /// The clipboard could not be opened or written
    #[error("Clipboard error: {0}")]
    Clipboard(String),
}

/// Validation failures of a single step
#[derive(Debug, Error, PartialEq)]
pub enum StepError {
    #[error("{field} must be a finite number, got {value}")]
    NotFinite { field: &'static str, value: f64 },

    #[error("{field} must be >= 0, got {value}")]
    Negative { field: &'static str, value: f64 },

    #[error("{field} of {value}s is too long to wait for")]
    TooLong { field: &'static str, value: f64 },

    #[error("click_count must be >= 1, got {0}")]
    ZeroClickCount(u32),
}

/// Error types for the playback engine and its collaborators
#[derive(Debug, Error)]
pub enum PlaybackError {
    /// A session (or repeat sequence) is already active on this instance
    #[error("A playback session is already running")]
    AlreadyRunning,

    /// A step failed validation before the session started; `index` is 0-based
    #[error("Step at index {index} is invalid: {source}")]
    InvalidStep {
        index: usize,
        #[source]
        source: StepError,
    },

    /// A repeat sequence was asked for zero runs
    #[error("Repeat count must be at least 1, got {0}")]
    InvalidRepeatCount(u32),

    /// The repeat controller needs a tokio runtime to schedule runs
    #[error("No tokio runtime available to schedule playback")]
    NoRuntime,

    /// Error from the input device
    #[error(transparent)]
    Input(#[from] InputError),

    /// Error when serializing or deserializing JSON
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for playback operations
pub type Result<T> = std::result::Result<T, PlaybackError>;
