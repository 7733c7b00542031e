//! Audio handle capability and its rodio-backed implementation.
//!
//! The coordinator only sees [`AudioOutput`] and [`AudioHandle`]; tests
//! substitute fakes. Both are object safe and take `&self`, so a handle can
//! be stopped from one task while another is awaiting `play`.

use std::io::Cursor;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use rodio::mixer::Mixer;
use rodio::{Decoder, OutputStreamBuilder, Sink};
use tracing::{debug, info};

use super::error::SpeechError;

const POLL_INTERVAL: Duration = Duration::from_millis(50);

/// One decoded utterance, ready to play.
#[async_trait]
pub trait AudioHandle: Send + Sync {
    /// Start playback at `rate` and resolve when it ends or is stopped.
    async fn play(&self, rate: f32) -> Result<(), SpeechError>;

    /// Halt playback. A pending `play` resolves shortly after.
    fn stop(&self);

    /// Free the underlying resources. The handle cannot play afterwards.
    fn release(&self);
}

/// Turns synthesized bytes into playable handles.
pub trait AudioOutput: Send + Sync {
    fn open(&self, audio: Vec<u8>) -> Result<Arc<dyn AudioHandle>, SpeechError>;
}

/// Default output device via rodio.
///
/// `OutputStream` is `!Send` on some platforms, so it lives on its own
/// thread for as long as this value exists; only the mixer crosses over.
pub struct RodioOutput {
    mixer: Mixer,
    _keepalive: mpsc::Sender<()>,
}

impl RodioOutput {
    pub fn open_default() -> Result<Self, SpeechError> {
        let (mixer_tx, mixer_rx) = mpsc::channel::<Result<Mixer, SpeechError>>();
        let (keepalive, keepalive_rx) = mpsc::channel::<()>();

        std::thread::Builder::new()
            .name("eduequi-audio".into())
            .spawn(move || {
                let mut stream = match OutputStreamBuilder::open_default_stream() {
                    Ok(stream) => stream,
                    Err(e) => {
                        let _ = mixer_tx.send(Err(SpeechError::Output(e.to_string())));
                        return;
                    }
                };
                stream.log_on_drop(false);
                let _ = mixer_tx.send(Ok(stream.mixer().clone()));
                // returns once RodioOutput (the only sender) is dropped
                let _ = keepalive_rx.recv();
                debug!("Audio output closed");
            })
            .map_err(|e| SpeechError::Output(format!("failed to spawn audio thread: {e}")))?;

        let mixer = mixer_rx
            .recv()
            .map_err(|_| SpeechError::Output("audio thread exited during startup".into()))??;
        info!("Audio output opened on default device");

        Ok(Self {
            mixer,
            _keepalive: keepalive,
        })
    }
}

impl AudioOutput for RodioOutput {
    fn open(&self, audio: Vec<u8>) -> Result<Arc<dyn AudioHandle>, SpeechError> {
        let len = audio.len();
        let source =
            Decoder::new(Cursor::new(audio)).map_err(|e| SpeechError::Playback(e.to_string()))?;

        // Paused until play() so the rate is applied from the first sample.
        let sink = Sink::connect_new(&self.mixer);
        sink.pause();
        sink.append(source);
        debug!("Decoded {len} bytes of synthesized audio");

        Ok(Arc::new(RodioHandle {
            sink: Arc::new(Mutex::new(Some(sink))),
            stopped: Arc::new(AtomicBool::new(false)),
        }))
    }
}

pub struct RodioHandle {
    sink: Arc<Mutex<Option<Sink>>>,
    stopped: Arc<AtomicBool>,
}

#[async_trait]
impl AudioHandle for RodioHandle {
    async fn play(&self, rate: f32) -> Result<(), SpeechError> {
        {
            let guard = self.sink.lock().unwrap_or_else(PoisonError::into_inner);
            let sink = guard
                .as_ref()
                .ok_or_else(|| SpeechError::Playback("audio handle already released".into()))?;
            // rodio speed also shifts pitch
            sink.set_speed(rate);
            sink.play();
        }

        let sink = self.sink.clone();
        let stopped = self.stopped.clone();

        tokio::task::spawn_blocking(move || loop {
            if stopped.load(Ordering::Relaxed) {
                return;
            }
            let drained = sink
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .as_ref()
                .map_or(true, Sink::empty);
            if drained {
                return;
            }
            std::thread::sleep(POLL_INTERVAL);
        })
        .await
        .map_err(|e| SpeechError::Playback(e.to_string()))
    }

    fn stop(&self) {
        self.stopped.store(true, Ordering::Relaxed);
        if let Some(sink) = self.sink.lock().unwrap_or_else(PoisonError::into_inner).as_ref() {
            sink.stop();
        }
    }

    fn release(&self) {
        self.stop();
        self.sink.lock().unwrap_or_else(PoisonError::into_inner).take();
    }
}
