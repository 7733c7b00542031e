//! Speech pipeline error types.

/// Errors raised while synthesizing or playing an utterance.
///
/// None of these reach the caller of `speak`; the coordinator logs them and
/// moves on to the next queued request.
#[derive(Debug, thiserror::Error)]
pub enum SpeechError {
    /// The synthesis request could not be sent or its body not read.
    #[error("TTS request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The synthesis endpoint answered with a non-success status.
    #[error("TTS endpoint returned status {0}")]
    Status(u16),

    /// The audio could not be decoded or played.
    #[error("Audio playback failed: {0}")]
    Playback(String),

    /// No audio output device could be opened.
    #[error("Failed to open audio output: {0}")]
    Output(String),
}
