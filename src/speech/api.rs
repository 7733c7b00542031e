//! Local HTTP control API for the narration service.
//!
//! The web client (or `narrate`) drives the coordinator through it.
//! Binds to 127.0.0.1 only.

use std::sync::Arc;

use axum::extract::State;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::coordinator::{LifecycleEvent, PlaybackStatus, SpeakOptions, SpeechCoordinator};

#[derive(Clone)]
pub struct SpeechApiState {
    pub coordinator: Arc<SpeechCoordinator>,
    pub default_language: String,
}

// --- Request/Response types ---

#[derive(Deserialize)]
struct SpeakRequest {
    text: String,
    #[serde(default)]
    lang: Option<String>,
    #[serde(default)]
    force: bool,
    #[serde(default)]
    speed: Option<f32>,
    /// Hold the response until the utterance is done.
    #[serde(default)]
    wait: bool,
}

#[derive(Deserialize)]
struct LifecycleRequest {
    event: LifecycleEvent,
}

#[derive(Debug, Serialize, Deserialize, PartialEq)]
struct SimpleResponse {
    status: String,
}

impl SimpleResponse {
    fn new(status: impl Into<String>) -> Self {
        Self {
            status: status.into(),
        }
    }
}

/// Build the axum router.
pub fn router(state: SpeechApiState) -> Router {
    Router::new()
        .route("/status", get(handle_status))
        .route("/speak", post(handle_speak))
        .route("/stop", post(handle_stop))
        .route("/lifecycle", post(handle_lifecycle))
        .with_state(state)
}

/// Start the control API as a background tokio task.
pub async fn start_speech_api(state: SpeechApiState, port: u16) {
    let app = router(state);
    let addr = format!("127.0.0.1:{port}");
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            warn!("Failed to bind speech API on {addr}: {e}");
            return;
        }
    };
    info!("Speech API listening on {addr}");

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!("Speech API server error: {e}");
        }
    });
}

// --- Handlers ---

async fn handle_status(State(state): State<SpeechApiState>) -> Json<PlaybackStatus> {
    Json(state.coordinator.status())
}

async fn handle_speak(
    State(state): State<SpeechApiState>,
    Json(req): Json<SpeakRequest>,
) -> Json<SimpleResponse> {
    let lang = req.lang.as_deref().unwrap_or(&state.default_language);
    let completion = state.coordinator.speak(
        &req.text,
        lang,
        SpeakOptions {
            force: req.force,
            speed: req.speed,
        },
    );

    if let Some(outcome) = completion.immediate() {
        return Json(SimpleResponse::new(outcome.as_str()));
    }
    if !req.wait {
        return Json(SimpleResponse::new("queued"));
    }
    let outcome = completion.wait().await;
    Json(SimpleResponse::new(outcome.as_str()))
}

async fn handle_stop(State(state): State<SpeechApiState>) -> Json<SimpleResponse> {
    state.coordinator.stop();
    Json(SimpleResponse::new("stopped"))
}

async fn handle_lifecycle(
    State(state): State<SpeechApiState>,
    Json(req): Json<LifecycleRequest>,
) -> Json<SimpleResponse> {
    state.coordinator.handle_lifecycle(req.event);
    Json(SimpleResponse::new("stopped"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::speech::audio::{AudioHandle, AudioOutput};
    use crate::speech::error::SpeechError;
    use crate::speech::synth::Synthesizer;

    use async_trait::async_trait;
    use serde_json::{json, Value};

    struct EchoSynth;

    #[async_trait]
    impl Synthesizer for EchoSynth {
        async fn synthesize(&self, text: &str, _language_code: &str) -> Result<Vec<u8>, SpeechError> {
            Ok(text.as_bytes().to_vec())
        }
    }

    struct SilentOutput;

    struct SilentHandle;

    #[async_trait]
    impl AudioHandle for SilentHandle {
        async fn play(&self, _rate: f32) -> Result<(), SpeechError> {
            Ok(())
        }

        fn stop(&self) {}

        fn release(&self) {}
    }

    impl AudioOutput for SilentOutput {
        fn open(&self, _audio: Vec<u8>) -> Result<Arc<dyn AudioHandle>, SpeechError> {
            Ok(Arc::new(SilentHandle))
        }
    }

    async fn spawn_api() -> String {
        let coordinator = SpeechCoordinator::new(
            Arc::new(EchoSynth),
            Arc::new(SilentOutput),
            Box::new(|| 1.0),
        );
        let app = router(SpeechApiState {
            coordinator: Arc::new(coordinator),
            default_language: "en-US".into(),
        });
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    async fn post(base: &str, path: &str, body: Value) -> SimpleResponse {
        reqwest::Client::new()
            .post(format!("{base}{path}"))
            .json(&body)
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn speak_and_wait_reports_outcome() {
        let base = spawn_api().await;

        let resp = post(&base, "/speak", json!({"text": "Lesson one", "wait": true})).await;
        assert_eq!(resp, SimpleResponse::new("played"));

        let resp = post(&base, "/speak", json!({"text": ""})).await;
        assert_eq!(resp, SimpleResponse::new("skipped"));
    }

    #[tokio::test]
    async fn stop_lifecycle_and_status() {
        let base = spawn_api().await;

        assert_eq!(post(&base, "/stop", json!({})).await, SimpleResponse::new("stopped"));
        assert_eq!(
            post(&base, "/lifecycle", json!({"event": "unload"})).await,
            SimpleResponse::new("stopped")
        );

        let status: Value = reqwest::get(format!("{base}/status"))
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        assert_eq!(status["playing"], false);
        assert_eq!(status["queued"], 0);
    }
}
