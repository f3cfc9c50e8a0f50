use thiserror::Error;

/// Failures reported by a sound engine. Never fatal to the sequencer.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("unknown instrument `{0}`")]
    UnknownInstrument(String),
    #[error("audio output unavailable: {0}")]
    Output(String),
    #[error("audio thread disconnected")]
    Disconnected,
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("session I/O failed: {0}")]
    Io(#[from] std::io::Error),
    #[error("session JSON is invalid: {0}")]
    Json(#[from] serde_json::Error),
    #[error("session has no presets")]
    NoPresets,
}
