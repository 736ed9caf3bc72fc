//! Voice search capture.
//!
//! A [`SpeechSource`] streams transcription updates for one capture. A
//! [`VoiceSession`] runs the endpointer over that stream: every partial
//! update that contains speech restarts a silence timer, and when the timer
//! fires the best transcription so far becomes the query. No timer runs
//! until the source reports [`TranscriptUpdate::Ready`], so model setup
//! never eats into the listening window. Ending the session in any way
//! (finalized, cancelled, dropped) stops both the timer and the capture.

use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info};

use crate::constants::constants;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
  #[error("voice capture unavailable: {0}")]
  Unavailable(String),
  #[error("audio capture failed: {0}")]
  Capture(String),
  #[error("speech recognition failed: {0}")]
  Recognition(String),
}

/// One update from a running capture. Partial texts are cumulative.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptUpdate {
  /// The source is listening. Starts the no-speech timer.
  Ready,
  Partial(String),
  Final(String),
  Failed(VoiceError),
}

/// How a capture session ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VoiceOutcome {
  Query(String),
  /// Nothing intelligible was heard.
  Empty,
  Cancelled,
  Failed(VoiceError),
}

/// Produces transcription updates for a single capture.
pub trait SpeechSource: Send + Sync {
  /// Start capturing and push updates into `updates`, beginning with
  /// [`TranscriptUpdate::Ready`] once audio is being recorded. The returned
  /// task is aborted as soon as the session ends.
  fn begin(&self, updates: mpsc::UnboundedSender<TranscriptUpdate>) -> JoinHandle<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EndpointPolicy {
  /// Quiet time after the last speech update that finalizes the capture.
  pub silence: Duration,
  /// Quiet time after the source is ready, before any speech, that gives up.
  pub no_speech: Duration,
}

impl EndpointPolicy {
  pub fn from_constants() -> Self {
    Self {
      silence: Duration::from_millis(constants().silence_timeout_ms),
      no_speech: Duration::from_millis(constants().no_speech_timeout_ms),
    }
  }
}

fn finalize(text: String) -> VoiceOutcome {
  let text = text.trim();
  if text.is_empty() { VoiceOutcome::Empty } else { VoiceOutcome::Query(text.to_string()) }
}

async fn sleep_until_some(deadline: Option<Instant>) {
  match deadline {
    Some(deadline) => tokio::time::sleep_until(deadline).await,
    None => std::future::pending().await,
  }
}

/// Run the endpointer over `updates` until the capture finalizes. `ready` is
/// signalled once the source is listening.
pub async fn endpoint(
  updates: &mut mpsc::UnboundedReceiver<TranscriptUpdate>,
  policy: EndpointPolicy,
  ready: oneshot::Sender<()>,
) -> VoiceOutcome {
  let mut ready = Some(ready);
  let mut best = String::new();
  let mut deadline: Option<Instant> = None;
  loop {
    tokio::select! {
      update = updates.recv() => match update {
        Some(TranscriptUpdate::Ready) => {
          if let Some(tx) = ready.take() {
            info!("voice: source ready, listening");
            let _ = tx.send(());
            deadline = Some(Instant::now() + policy.no_speech);
          }
        }
        Some(TranscriptUpdate::Partial(text)) => {
          if !text.trim().is_empty() {
            debug!(text = %text, "voice: partial");
            if let Some(tx) = ready.take() {
              let _ = tx.send(());
            }
            best = text;
            deadline = Some(Instant::now() + policy.silence);
          }
        }
        Some(TranscriptUpdate::Final(text)) => {
          let text = if text.trim().is_empty() { best } else { text };
          info!(text = %text, "voice: final transcription");
          return finalize(text);
        }
        Some(TranscriptUpdate::Failed(err)) => {
          info!(err = %err, "voice: capture failed");
          return VoiceOutcome::Failed(err);
        }
        None => {
          debug!("voice: source ended");
          return finalize(best);
        }
      },
      _ = sleep_until_some(deadline) => {
        info!(heard = !best.trim().is_empty(), "voice: silence timeout, finalizing");
        return finalize(best);
      }
    }
  }
}

/// Aborts the wrapped task when dropped.
struct AbortOnDrop(JoinHandle<()>);

impl Drop for AbortOnDrop {
  fn drop(&mut self) {
    self.0.abort();
  }
}

/// A running voice capture.
pub struct VoiceSession {
  task: JoinHandle<()>,
  outcome: oneshot::Receiver<VoiceOutcome>,
  ready: Option<oneshot::Receiver<()>>,
}

impl VoiceSession {
  pub fn begin(source: &dyn SpeechSource, policy: EndpointPolicy) -> Self {
    let (updates_tx, mut updates_rx) = mpsc::unbounded_channel();
    let capture = AbortOnDrop(source.begin(updates_tx));
    let (outcome_tx, outcome) = oneshot::channel();
    let (ready_tx, ready) = oneshot::channel();
    info!(?policy, "voice: capture started");
    let task = tokio::spawn(async move {
      let result = endpoint(&mut updates_rx, policy, ready_tx).await;
      drop(capture);
      let _ = outcome_tx.send(result);
    });
    Self { task, outcome, ready: Some(ready) }
  }

  /// True exactly once, on the first call after the source became ready.
  pub fn take_ready(&mut self) -> bool {
    let Some(rx) = self.ready.as_mut() else {
      return false;
    };
    match rx.try_recv() {
      Ok(()) => {
        self.ready = None;
        true
      }
      Err(oneshot::error::TryRecvError::Empty) => false,
      Err(oneshot::error::TryRecvError::Closed) => {
        self.ready = None;
        false
      }
    }
  }

  /// Non-blocking check for the finished outcome.
  pub fn try_outcome(&mut self) -> Option<VoiceOutcome> {
    match self.outcome.try_recv() {
      Ok(outcome) => Some(outcome),
      Err(oneshot::error::TryRecvError::Empty) => None,
      Err(oneshot::error::TryRecvError::Closed) => {
        Some(VoiceOutcome::Failed(VoiceError::Recognition("voice session ended unexpectedly".to_string())))
      }
    }
  }

  /// Wait for the outcome.
  pub async fn outcome(mut self) -> VoiceOutcome {
    match (&mut self.outcome).await {
      Ok(outcome) => outcome,
      Err(_) => VoiceOutcome::Failed(VoiceError::Recognition("voice session ended unexpectedly".to_string())),
    }
  }

  /// Stop the capture and its silence timer.
  pub fn cancel(self) -> VoiceOutcome {
    info!("voice: capture cancelled");
    self.task.abort();
    VoiceOutcome::Cancelled
  }
}

impl Drop for VoiceSession {
  fn drop(&mut self) {
    self.task.abort();
  }
}

// --- Scripted source ---

/// Speaks a fixed text one word at a time, then goes quiet.
///
/// Stands in for the microphone where there is none; the silence timer ends
/// the capture just as it would for real speech.
pub struct ScriptedSpeech {
  text: String,
  word_interval: Duration,
}

impl ScriptedSpeech {
  pub fn new(text: impl Into<String>, word_interval: Duration) -> Self {
    Self { text: text.into(), word_interval }
  }
}

impl SpeechSource for ScriptedSpeech {
  fn begin(&self, updates: mpsc::UnboundedSender<TranscriptUpdate>) -> JoinHandle<()> {
    let words: Vec<String> = self.text.split_whitespace().map(str::to_string).collect();
    let interval = self.word_interval;
    tokio::spawn(async move {
      if updates.send(TranscriptUpdate::Ready).is_err() {
        return;
      }
      for n in 1..=words.len() {
        tokio::time::sleep(interval).await;
        if updates.send(TranscriptUpdate::Partial(words[..n].join(" "))).is_err() {
          return;
        }
      }
      // Stay connected like an open microphone.
      std::future::pending::<()>().await;
    })
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::Arc;
  use std::sync::atomic::{AtomicBool, Ordering};

  fn policy() -> EndpointPolicy {
    EndpointPolicy { silence: Duration::from_secs(2), no_speech: Duration::from_secs(8) }
  }

  /// Replays timed updates, then stays open. Flags when it is aborted.
  struct TimedSource {
    steps: Vec<(Duration, TranscriptUpdate)>,
    stopped: Arc<AtomicBool>,
  }

  struct SetOnDrop(Arc<AtomicBool>);

  impl Drop for SetOnDrop {
    fn drop(&mut self) {
      self.0.store(true, Ordering::SeqCst);
    }
  }

  impl TimedSource {
    /// Ready at once, then `steps`.
    fn new(steps: Vec<(u64, TranscriptUpdate)>) -> Self {
      let mut all = vec![(0, TranscriptUpdate::Ready)];
      all.extend(steps);
      Self::raw(all)
    }

    /// Exactly `steps`; the source announces readiness itself, if at all.
    fn raw(steps: Vec<(u64, TranscriptUpdate)>) -> Self {
      let steps = steps.into_iter().map(|(ms, u)| (Duration::from_millis(ms), u)).collect();
      Self { steps, stopped: Arc::new(AtomicBool::new(false)) }
    }
  }

  impl SpeechSource for TimedSource {
    fn begin(&self, updates: mpsc::UnboundedSender<TranscriptUpdate>) -> JoinHandle<()> {
      let steps = self.steps.clone();
      let guard = SetOnDrop(Arc::clone(&self.stopped));
      tokio::spawn(async move {
        let _guard = guard;
        for (delay, update) in steps {
          tokio::time::sleep(delay).await;
          let _ = updates.send(update);
        }
        std::future::pending::<()>().await;
      })
    }
  }

  fn partial(s: &str) -> TranscriptUpdate {
    TranscriptUpdate::Partial(s.to_string())
  }

  #[tokio::test(start_paused = true)]
  async fn silence_after_speech_finalizes_best_transcription() {
    let source = TimedSource::new(vec![(500, partial("the")), (1500, partial("the matrix"))]);
    let started = Instant::now();
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Query("the matrix".to_string()));
    // Last partial at 2s, silence of 2s.
    assert_eq!(started.elapsed(), Duration::from_secs(4));
  }

  #[tokio::test(start_paused = true)]
  async fn each_partial_restarts_the_timer() {
    let source =
      TimedSource::new(vec![(1900, partial("x")), (1900, partial("x men")), (1900, partial("x men apocalypse"))]);
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Query("x men apocalypse".to_string()));
  }

  #[tokio::test(start_paused = true)]
  async fn blank_partials_do_not_count_as_speech() {
    let source = TimedSource::new(vec![(1000, partial("heat")), (1500, partial("   ")), (1500, partial("heat 2"))]);
    // The blank partial does not restart the timer, so silence fires at 3s.
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Query("heat".to_string()));
  }

  #[tokio::test(start_paused = true)]
  async fn no_speech_gives_empty() {
    let source = TimedSource::new(vec![]);
    let started = Instant::now();
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Empty);
    assert_eq!(started.elapsed(), Duration::from_secs(8));
  }

  #[tokio::test(start_paused = true)]
  async fn slow_setup_does_not_count_as_silence() {
    // 30s of model download before the microphone opens.
    let source = TimedSource::raw(vec![(30_000, TranscriptUpdate::Ready), (1_000, partial("vertigo"))]);
    let started = Instant::now();
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Query("vertigo".to_string()));
    assert_eq!(started.elapsed(), Duration::from_secs(33));
  }

  #[tokio::test(start_paused = true)]
  async fn no_speech_timer_starts_at_ready() {
    let source = TimedSource::raw(vec![(30_000, TranscriptUpdate::Ready)]);
    let started = Instant::now();
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Empty);
    assert_eq!(started.elapsed(), Duration::from_secs(38));
  }

  #[tokio::test(start_paused = true)]
  async fn ready_is_reported_once() {
    let source = TimedSource::raw(vec![(5_000, TranscriptUpdate::Ready), (100, TranscriptUpdate::Ready)]);
    let mut session = VoiceSession::begin(&source, policy());
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(!session.take_ready());
    tokio::time::sleep(Duration::from_secs(5)).await;
    assert!(session.take_ready());
    assert!(!session.take_ready());
  }

  #[tokio::test(start_paused = true)]
  async fn final_update_wins_over_timer() {
    let source = TimedSource::new(vec![(100, partial("gold")), (100, TranscriptUpdate::Final("goldfinger".to_string()))]);
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Query("goldfinger".to_string()));
  }

  #[tokio::test(start_paused = true)]
  async fn empty_final_falls_back_to_best_partial() {
    let source = TimedSource::new(vec![(100, partial("jaws")), (100, TranscriptUpdate::Final(String::new()))]);
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Query("jaws".to_string()));
  }

  #[tokio::test(start_paused = true)]
  async fn source_failure_is_reported() {
    let err = VoiceError::Capture("no microphone".to_string());
    let source = TimedSource::new(vec![(100, TranscriptUpdate::Failed(err.clone()))]);
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Failed(err));
  }

  #[tokio::test(start_paused = true)]
  async fn capture_is_stopped_when_session_finalizes() {
    let source = TimedSource::new(vec![(100, partial("up"))]);
    let stopped = Arc::clone(&source.stopped);
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Query("up".to_string()));
    tokio::time::sleep(Duration::from_millis(1)).await;
    assert!(stopped.load(Ordering::SeqCst));
  }

  #[tokio::test(start_paused = true)]
  async fn cancel_stops_capture_and_timer() {
    let source = TimedSource::new(vec![(100, partial("alien"))]);
    let stopped = Arc::clone(&source.stopped);
    let mut session = VoiceSession::begin(&source, policy());
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(session.try_outcome(), None);

    assert_eq!(session.cancel(), VoiceOutcome::Cancelled);
    // Well past the silence deadline: nothing fires, the capture is gone.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(stopped.load(Ordering::SeqCst));
  }

  #[tokio::test(start_paused = true)]
  async fn try_outcome_after_finish() {
    let source = TimedSource::new(vec![(100, TranscriptUpdate::Final("brazil".to_string()))]);
    let mut session = VoiceSession::begin(&source, policy());
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(session.try_outcome(), Some(VoiceOutcome::Query("brazil".to_string())));
  }

  #[tokio::test(start_paused = true)]
  async fn scripted_speech_builds_up_words() {
    let source = ScriptedSpeech::new("  the   big lebowski ", Duration::from_millis(300));
    let outcome = VoiceSession::begin(&source, policy()).outcome().await;
    assert_eq!(outcome, VoiceOutcome::Query("the big lebowski".to_string()));
  }
}
