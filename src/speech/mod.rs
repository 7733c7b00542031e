//! Narration: queued text-to-speech playback for the EduEqui client.
//!
//! Components:
//! - `coordinator`: single-slot playback queue with dedupe, force and stop
//! - `synth`: HTTP client for the external `/tts` endpoint
//! - `audio`: audio handle capability + rodio playback
//! - `api`: axum control API the web client talks to
//! - `error`: speech error taxonomy

pub mod api;
pub mod audio;
pub mod coordinator;
pub mod error;
pub mod synth;
