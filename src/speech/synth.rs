//! Speech synthesis client for the external TTS endpoint.

use async_trait::async_trait;
use reqwest::Client;
use serde::Serialize;
use tracing::debug;

use super::error::SpeechError;
use crate::config::TtsConfig;

/// Turns text into playable audio bytes.
#[async_trait]
pub trait Synthesizer: Send + Sync {
    async fn synthesize(&self, text: &str, language_code: &str) -> Result<Vec<u8>, SpeechError>;
}

#[derive(Serialize)]
struct SynthesisRequest<'a> {
    text: &'a str,
    lang: &'a str,
}

/// `POST {endpoint}` with `{text, lang}`; the response body is the audio.
pub struct HttpSynthesizer {
    endpoint: String,
    client: Client,
}

impl HttpSynthesizer {
    pub fn new(config: &TtsConfig) -> Result<Self, SpeechError> {
        let client = Client::builder()
            .connect_timeout(config.connect_timeout())
            .timeout(config.timeout())
            .build()?;

        Ok(Self {
            endpoint: config.endpoint.clone(),
            client,
        })
    }
}

#[async_trait]
impl Synthesizer for HttpSynthesizer {
    async fn synthesize(&self, text: &str, language_code: &str) -> Result<Vec<u8>, SpeechError> {
        let lang = primary_subtag(language_code);
        let resp = self
            .client
            .post(&self.endpoint)
            .json(&SynthesisRequest { text, lang })
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(SpeechError::Status(resp.status().as_u16()));
        }

        let bytes = resp.bytes().await?;
        debug!("Synthesized {} chars [{lang}] → {} bytes", text.chars().count(), bytes.len());
        Ok(bytes.to_vec())
    }
}

/// `en-US` → `en`. The endpoint only understands bare language codes.
pub fn primary_subtag(language_code: &str) -> &str {
    language_code
        .split(['-', '_'])
        .next()
        .unwrap_or(language_code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::{IntoResponse, Response};
    use axum::routing::post;
    use axum::{Json, Router};
    use serde_json::Value;

    type Seen = Arc<Mutex<Vec<Value>>>;

    async fn fake_tts(State(seen): State<Seen>, Json(body): Json<Value>) -> Response {
        let fail = body["text"] == "C";
        seen.lock().unwrap().push(body);
        if fail {
            (StatusCode::INTERNAL_SERVER_ERROR, "gTTS exploded").into_response()
        } else {
            (StatusCode::OK, vec![0x49u8, 0x44, 0x33]).into_response()
        }
    }

    async fn spawn_endpoint() -> (String, Seen) {
        let seen: Seen = Arc::default();
        let app = Router::new()
            .route("/tts", post(fake_tts))
            .with_state(seen.clone());
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        (format!("http://{addr}/tts"), seen)
    }

    fn synthesizer(endpoint: String) -> HttpSynthesizer {
        HttpSynthesizer::new(&TtsConfig {
            endpoint,
            ..Default::default()
        })
        .unwrap()
    }

    #[test]
    fn strips_region_from_language() {
        assert_eq!(primary_subtag("en-US"), "en");
        assert_eq!(primary_subtag("ta-IN"), "ta");
        assert_eq!(primary_subtag("ta"), "ta");
        assert_eq!(primary_subtag("en_GB"), "en");
    }

    #[tokio::test]
    async fn posts_text_and_bare_language() {
        let (endpoint, seen) = spawn_endpoint().await;
        let audio = synthesizer(endpoint).synthesize("வணக்கம்", "ta-IN").await.unwrap();

        assert_eq!(audio, vec![0x49, 0x44, 0x33]);
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0]["text"], "வணக்கம்");
        assert_eq!(seen[0]["lang"], "ta");
    }

    #[tokio::test]
    async fn server_error_is_status_failure() {
        let (endpoint, _seen) = spawn_endpoint().await;
        let err = synthesizer(endpoint).synthesize("C", "en-US").await.unwrap_err();
        assert!(matches!(err, SpeechError::Status(500)));
    }

    #[tokio::test]
    async fn unreachable_endpoint_is_request_failure() {
        // bind then drop to get a port nothing listens on
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = synthesizer(format!("http://{addr}/tts"))
            .synthesize("hello", "en")
            .await
            .unwrap_err();
        assert!(matches!(err, SpeechError::Request(_)));
    }
}
