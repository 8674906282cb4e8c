use thiserror::Error;

/// Everything that can go wrong between "read this note" and audible speech.
/// Each variant maps to exactly one user-facing message; none of them retry.
#[derive(Debug, Error)]
pub enum TtsError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("speech service returned HTTP {status}: {body}")]
    RemoteRequest { status: u16, body: String },

    #[error("speech service unreachable: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("invalid response from speech service: {0}")]
    ResponseShape(String),

    #[error("response contained no audio data")]
    MissingAudio,

    #[error("failed to decode audio payload: {0}")]
    Decode(String),

    #[error("playback failed: {0}")]
    Playback(String),

    #[error("nothing to read")]
    EmptyInput,

    #[error("file access failed: {0}")]
    Io(#[from] std::io::Error),
}
