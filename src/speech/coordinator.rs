//! Speech playback coordinator.
//!
//! Serializes narration requests from every trigger (hover, click, page-load)
//! into a single audible stream:
//!
//! - FIFO queue, deduplicated by exact text against everything queued or
//!   playing.
//! - One worker task synthesizes and plays one request at a time.
//! - `force` stops current playback and clears the queue before enqueuing.
//! - Failures are logged and skipped; the queue keeps draining.
//!
//! Queue and playback state live behind one mutex that is never held across
//! an await. Cancellation is an epoch bump: the worker races its awaits
//! against it and discards stale results.

use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::{Deserialize, Serialize};
use tokio::sync::{oneshot, watch, Notify};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use super::audio::{AudioHandle, AudioOutput};
use super::synth::Synthesizer;
use crate::settings::clamp_tts_speed;

/// Supplies the speed used when a request does not carry one.
pub type SpeedSource = Box<dyn Fn() -> f32 + Send + Sync>;

#[derive(Debug, Clone, Copy, Default)]
pub struct SpeakOptions {
    /// Stop current playback and drop everything queued first.
    pub force: bool,
    /// Playback rate override. Clamped to [0.5, 2.0].
    pub speed: Option<f32>,
}

/// How a `speak` request ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum SpeechOutcome {
    Played,
    /// Empty text, duplicate of pending text, or already in flight.
    Skipped,
    /// Synthesis or playback failed; already logged.
    Failed,
    /// Dropped by `stop`, a forced request, or shutdown.
    Cancelled,
}

impl SpeechOutcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Played => "played",
            Self::Skipped => "skipped",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }
}

/// Page lifecycle signals that tear playback down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LifecycleEvent {
    Unload,
    Hidden,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlaybackStatus {
    pub playing: bool,
    pub queued: usize,
    pub current_text: Option<String>,
}

/// Resolves once the utterance has been played, skipped, failed or
/// cancelled.
pub struct Completion(CompletionInner);

enum CompletionInner {
    Ready(SpeechOutcome),
    Pending(oneshot::Receiver<SpeechOutcome>),
}

impl Completion {
    fn ready(outcome: SpeechOutcome) -> Self {
        Self(CompletionInner::Ready(outcome))
    }

    /// Outcome known at call time, i.e. the request was never queued.
    pub fn immediate(&self) -> Option<SpeechOutcome> {
        match self.0 {
            CompletionInner::Ready(outcome) => Some(outcome),
            CompletionInner::Pending(_) => None,
        }
    }

    pub async fn wait(self) -> SpeechOutcome {
        match self.0 {
            CompletionInner::Ready(outcome) => outcome,
            CompletionInner::Pending(rx) => rx.await.unwrap_or(SpeechOutcome::Cancelled),
        }
    }
}

struct SpeechRequest {
    text: String,
    language_code: String,
    speed: f32,
    done: oneshot::Sender<SpeechOutcome>,
}

impl SpeechRequest {
    fn finish(self, outcome: SpeechOutcome) {
        // receiver may have been dropped; nobody is waiting then
        let _ = self.done.send(outcome);
    }
}

#[derive(Default)]
struct State {
    queue: VecDeque<SpeechRequest>,
    /// Text queued or playing. Gate for new requests.
    pending: HashSet<String>,
    /// Text dequeued by the worker and not yet finished.
    in_flight: HashSet<String>,
    playing: bool,
    current_text: Option<String>,
    active: Option<Arc<dyn AudioHandle>>,
    epoch: u64,
    closed: bool,
}

struct Job {
    request: SpeechRequest,
    epoch: u64,
}

struct Shared {
    state: Mutex<State>,
    wake: Notify,
    cancel: watch::Sender<u64>,
    synthesizer: Arc<dyn Synthesizer>,
    output: Arc<dyn AudioOutput>,
}

/// Clamp the requested speed, falling back to the default source.
pub fn effective_speed(requested: Option<f32>, default: impl FnOnce() -> f32) -> f32 {
    clamp_tts_speed(requested.unwrap_or_else(default))
}

fn preview(text: &str) -> String {
    let short: String = text.chars().take(60).collect();
    let ellipsis = if short.len() < text.len() { "..." } else { "" };
    format!("{}{ellipsis}", short.replace('\n', " "))
}

/// Owns the playback queue, the single audio slot and the worker task.
///
/// Construct once per process inside a tokio runtime and share by
/// reference (or `Arc`). Dropping it stops playback and ends the worker.
pub struct SpeechCoordinator {
    shared: Arc<Shared>,
    default_speed: SpeedSource,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl SpeechCoordinator {
    pub fn new(
        synthesizer: Arc<dyn Synthesizer>,
        output: Arc<dyn AudioOutput>,
        default_speed: SpeedSource,
    ) -> Self {
        let (cancel, _) = watch::channel(0);
        let shared = Arc::new(Shared {
            state: Mutex::new(State::default()),
            wake: Notify::new(),
            cancel,
            synthesizer,
            output,
        });

        let worker = tokio::spawn(run_worker(shared.clone()));

        Self {
            shared,
            default_speed,
            worker: Mutex::new(Some(worker)),
        }
    }

    /// Queue `text` for narration.
    ///
    /// Empty text and text that is already queued or playing are ignored
    /// (unless `force`), and their completion resolves as `Skipped`
    /// straight away.
    pub fn speak(&self, text: &str, language_code: &str, options: SpeakOptions) -> Completion {
        if text.is_empty() {
            return Completion::ready(SpeechOutcome::Skipped);
        }

        if options.force {
            self.stop();
        }

        let speed = effective_speed(options.speed, || (self.default_speed)());
        let (done, rx) = oneshot::channel();

        {
            let mut state = self.shared.lock_state();
            if state.closed {
                return Completion::ready(SpeechOutcome::Cancelled);
            }
            if !state.pending.insert(text.to_string()) {
                debug!("Already pending, ignoring: \"{}\"", preview(text));
                return Completion::ready(SpeechOutcome::Skipped);
            }
            state.queue.push_back(SpeechRequest {
                text: text.to_string(),
                language_code: language_code.to_string(),
                speed,
                done,
            });
            debug!(
                "Queued \"{}\" [{language_code}] at {speed:.2}x ({} waiting)",
                preview(text),
                state.queue.len()
            );
        }

        self.shared.wake.notify_one();
        Completion(CompletionInner::Pending(rx))
    }

    /// Drop everything queued and halt the current utterance. Idempotent.
    pub fn stop(&self) {
        self.shared.stop();
    }

    /// Page is going away: nothing may keep talking.
    pub fn handle_lifecycle(&self, event: LifecycleEvent) {
        info!("Lifecycle event {event:?}, stopping speech");
        self.stop();
    }

    pub fn status(&self) -> PlaybackStatus {
        let state = self.shared.lock_state();
        PlaybackStatus {
            playing: state.playing,
            queued: state.queue.len(),
            current_text: state.current_text.clone(),
        }
    }

    /// Stop playback and end the worker. Later `speak` calls resolve as
    /// `Cancelled`.
    pub fn shutdown(&self) {
        self.shared.lock_state().closed = true;
        self.stop();
        let worker = self
            .worker
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(worker) = worker {
            worker.abort();
            debug!("Speech worker stopped");
        }
    }
}

impl Drop for SpeechCoordinator {
    fn drop(&mut self) {
        self.shutdown();
    }
}

impl Shared {
    fn lock_state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn stop(&self) {
        let (dropped, active) = {
            let mut state = self.lock_state();
            let dropped: Vec<SpeechRequest> = state.queue.drain(..).collect();
            state.pending.clear();
            state.in_flight.clear();
            state.playing = false;
            state.current_text = None;
            state.epoch += 1;
            self.cancel.send_replace(state.epoch);
            (dropped, state.active.take())
        };

        let halted = active.is_some();
        if let Some(handle) = active {
            handle.stop();
            handle.release();
        }

        if halted || !dropped.is_empty() {
            info!("Speech stopped ({} queued dropped)", dropped.len());
        }
        for request in dropped {
            request.finish(SpeechOutcome::Cancelled);
        }
    }

    fn next_job(&self) -> Option<Job> {
        let mut state = self.lock_state();
        while let Some(request) = state.queue.pop_front() {
            // `speak` already refuses text in `pending`, which covers in-flight
            // text, so this only catches a request that bypassed that gate.
            if state.in_flight.contains(&request.text) {
                debug!("Already in flight, skipping: \"{}\"", preview(&request.text));
                request.finish(SpeechOutcome::Skipped);
                continue;
            }
            state.in_flight.insert(request.text.clone());
            state.playing = true;
            state.current_text = Some(request.text.clone());
            return Some(Job {
                request,
                epoch: state.epoch,
            });
        }
        None
    }

    /// Clear the playing slot for `text`. Returns false if a stop happened
    /// since the job started, in which case stop already cleaned up.
    fn finish_current(&self, text: &str, epoch: u64) -> bool {
        let mut state = self.lock_state();
        if state.epoch != epoch {
            return false;
        }
        state.playing = false;
        state.current_text = None;
        state.active = None;
        state.in_flight.remove(text);
        state.pending.remove(text);
        true
    }

    /// Outcome for a job that errored: `Failed`, unless a stop already
    /// claimed it.
    fn failed_outcome(&self, text: &str, epoch: u64) -> SpeechOutcome {
        if self.finish_current(text, epoch) {
            SpeechOutcome::Failed
        } else {
            SpeechOutcome::Cancelled
        }
    }

    async fn process(&self, job: Job, cancel_rx: &mut watch::Receiver<u64>) {
        let Job { request, epoch } = job;

        // A finished synthesis is taken even if a stop landed in the same
        // poll; the epoch checks below turn it into `Cancelled`.
        let synthesis = tokio::select! {
            biased;
            result = self.synthesizer.synthesize(&request.text, &request.language_code) => Some(result),
            () = cancelled(cancel_rx, epoch) => None,
        };

        let audio = match synthesis {
            None => {
                debug!("Discarding synthesis for \"{}\"", preview(&request.text));
                request.finish(SpeechOutcome::Cancelled);
                return;
            }
            Some(Err(e)) => {
                warn!("TTS error for \"{}\": {e}", preview(&request.text));
                let outcome = self.failed_outcome(&request.text, epoch);
                request.finish(outcome);
                return;
            }
            Some(Ok(audio)) => audio,
        };

        let handle = match self.output.open(audio) {
            Ok(handle) => handle,
            Err(e) => {
                warn!("Error playing audio for \"{}\": {e}", preview(&request.text));
                let outcome = self.failed_outcome(&request.text, epoch);
                request.finish(outcome);
                return;
            }
        };

        let previous = {
            let mut state = self.lock_state();
            if state.epoch != epoch {
                drop(state);
                handle.release();
                request.finish(SpeechOutcome::Cancelled);
                return;
            }
            state.active.replace(handle.clone())
        };
        if let Some(previous) = previous {
            previous.stop();
            previous.release();
        }

        debug!("Playing \"{}\" at {:.2}x", preview(&request.text), request.speed);
        let played = tokio::select! {
            result = handle.play(request.speed) => Some(result),
            () = cancelled(cancel_rx, epoch) => None,
        };
        handle.release();

        let outcome = match played {
            Some(Ok(())) if self.finish_current(&request.text, epoch) => SpeechOutcome::Played,
            Some(Err(e)) if self.finish_current(&request.text, epoch) => {
                warn!("Audio playback failed for \"{}\": {e}", preview(&request.text));
                SpeechOutcome::Failed
            }
            _ => SpeechOutcome::Cancelled,
        };
        request.finish(outcome);
    }
}

/// Resolves once the cancellation epoch has moved past `epoch`.
async fn cancelled(cancel_rx: &mut watch::Receiver<u64>, epoch: u64) {
    let _ = cancel_rx.wait_for(|current| *current != epoch).await;
}

async fn run_worker(shared: Arc<Shared>) {
    let mut cancel_rx = shared.cancel.subscribe();
    loop {
        match shared.next_job() {
            Some(job) => shared.process(job, &mut cancel_rx).await,
            None => shared.wake.notified().await,
        }
    }
}
