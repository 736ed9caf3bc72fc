use anyhow::{Context, Result, bail};
use futures::TryStreamExt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};
use tokio::io::{AsyncWriteExt, BufWriter};
use tokio::sync::{OnceCell, mpsc};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::constants::constants;
use crate::voice::{SpeechSource, TranscriptUpdate, VoiceError};

type SharedWhisper = Arc<StdMutex<Option<whisper_cli::Whisper>>>;

// --- Model preparation ---

/// The whisper model, downloaded and loaded at most once per process.
///
/// Preparation runs on its own task, so a capture that ends (or is
/// cancelled) while the model is still downloading does not interrupt it;
/// the next capture simply waits for the same preparation to finish.
#[derive(Clone, Default)]
struct SpeechModel {
  whisper: SharedWhisper,
  loaded: Arc<OnceCell<()>>,
}

impl SpeechModel {
  /// Detached preparation task. Failures are not remembered: a later capture
  /// tries again.
  fn prepare(&self) -> JoinHandle<Result<(), VoiceError>> {
    let model = self.clone();
    tokio::spawn(async move {
      model
        .loaded
        .get_or_try_init(|| load_model(Arc::clone(&model.whisper)))
        .await
        .map(|_| ())
        .map_err(|e| VoiceError::Unavailable(format!("{:#}", e)))
    })
  }
}

async fn load_model(whisper: SharedWhisper) -> Result<()> {
  let path = whisper_cli::Size::Small.get_path();
  if !path.exists() {
    info!(path = %path.display(), "voice: whisper model missing, fetching");
    fetch_model_file(&model_url(), &path).await?;
  }

  info!("voice: loading whisper model");
  let runtime = tokio::runtime::Handle::current();
  tokio::task::spawn_blocking(move || {
    let _quiet = StderrSilencer::engage();
    let model = whisper_cli::Model::new(whisper_cli::Size::Small);
    let loaded = runtime.block_on(whisper_cli::Whisper::new(model, Some(whisper_cli::Language::Auto)));
    let mut slot = whisper.lock().map_err(|_| anyhow::anyhow!("whisper model lock poisoned"))?;
    *slot = Some(loaded);
    Ok::<(), anyhow::Error>(())
  })
  .await
  .context("whisper model load panicked")?
}

fn model_url() -> String {
  format!("https://huggingface.co/ggerganov/whisper.cpp/resolve/main/ggml-{}.bin", whisper_cli::Size::Small)
}

/// Stream `url` into `dest`. The body lands in a `.part` sibling first, so
/// an interrupted transfer never leaves a truncated model at `dest`.
async fn fetch_model_file(url: &str, dest: &Path) -> Result<()> {
  let dir = dest.parent().context("Model path has no parent directory")?;
  tokio::fs::create_dir_all(dir).await.with_context(|| format!("Failed to create {}", dir.display()))?;

  let response = reqwest::get(url).await.context("Model download request failed")?;
  if !response.status().is_success() {
    bail!("Model download refused with status {}", response.status());
  }
  let expected = response.content_length();

  let partial = dest.with_extension("bin.part");
  let file = tokio::fs::File::create(&partial).await.with_context(|| format!("Failed to create {}", partial.display()))?;
  let mut out = BufWriter::new(file);
  let mut body = response.bytes_stream();
  let mut received = 0u64;
  let mut reported = Instant::now();
  while let Some(bytes) = body.try_next().await.context("Model download interrupted")? {
    out.write_all(&bytes).await.context("Failed to write model data")?;
    received += bytes.len() as u64;
    if reported.elapsed() >= Duration::from_secs(5) {
      reported = Instant::now();
      info!(received, expected = ?expected, "voice: model download progress");
    }
  }
  out.flush().await.context("Failed to flush model data")?;
  drop(out);

  if let Some(expected) = expected
    && received != expected
  {
    let _ = tokio::fs::remove_file(&partial).await;
    bail!("Model download truncated: {} of {} bytes", received, expected);
  }
  tokio::fs::rename(&partial, dest).await.context("Failed to move model into place")?;
  info!(received, path = %dest.display(), "voice: whisper model stored");
  Ok(())
}

// --- Microphone + whisper speech source ---

/// Records the default microphone with ffmpeg in short WAV chunks and
/// transcribes each chunk with whisper while the next one is recording.
///
/// Every chunk that contains speech extends the running transcription and
/// is sent as a cumulative partial update.
pub struct WhisperSpeech {
  model: SpeechModel,
  chunk_secs: u32,
}

impl WhisperSpeech {
  pub fn new() -> Self {
    Self { model: SpeechModel::default(), chunk_secs: constants().voice_chunk_secs }
  }
}

impl SpeechSource for WhisperSpeech {
  fn begin(&self, updates: mpsc::UnboundedSender<TranscriptUpdate>) -> JoinHandle<()> {
    let preparing = self.model.prepare();
    let whisper = Arc::clone(&self.model.whisper);
    let chunk_secs = self.chunk_secs;
    tokio::spawn(async move {
      let prepared = preparing
        .await
        .unwrap_or_else(|_| Err(VoiceError::Unavailable("model preparation crashed".to_string())));
      if let Err(err) = prepared {
        warn!(err = %err, "voice: model unavailable");
        let _ = updates.send(TranscriptUpdate::Failed(err));
        return;
      }

      // Removed with every chunk still in it when the capture ends or is aborted.
      let scratch = match tempfile::Builder::new().prefix("mf-voice-").tempdir() {
        Ok(dir) => dir,
        Err(e) => {
          let _ = updates.send(TranscriptUpdate::Failed(VoiceError::Capture(format!("No scratch directory: {}", e))));
          return;
        }
      };
      if updates.send(TranscriptUpdate::Ready).is_err() {
        return;
      }

      let (chunk_tx, mut chunk_rx) = mpsc::channel::<PathBuf>(2);
      let capture = record_chunks(scratch.path(), chunk_tx, updates.clone(), chunk_secs);
      let transcribe = async {
        let mut heard = String::new();
        while let Some(path) = chunk_rx.recv().await {
          match transcribe_chunk(Arc::clone(&whisper), path).await {
            Ok(text) if is_blank_transcript(&text) => debug!(text = %text, "voice: chunk without speech"),
            Ok(text) => {
              append_text(&mut heard, &text);
              if updates.send(TranscriptUpdate::Partial(heard.clone())).is_err() {
                break;
              }
            }
            Err(e) => warn!(err = %format!("{:#}", e), "voice: chunk transcription failed, skipping"),
          }
        }
      };
      tokio::join!(capture, transcribe);
      drop(scratch);
    })
  }
}

/// Record chunks into `dir` until the consumer goes away or ffmpeg fails.
async fn record_chunks(
  dir: &Path,
  chunks: mpsc::Sender<PathBuf>,
  updates: mpsc::UnboundedSender<TranscriptUpdate>,
  chunk_secs: u32,
) {
  let min_chunk_bytes = constants().min_chunk_bytes;
  for index in 0u64.. {
    let path = dir.join(format!("chunk-{}.wav", index));
    let status = tokio::process::Command::new("ffmpeg")
      .args(capture_args(&path, chunk_secs))
      .stdin(Stdio::null())
      .stdout(Stdio::null())
      .stderr(Stdio::null())
      .kill_on_drop(true)
      .status()
      .await;

    let err = match status {
      Ok(status) if status.success() => None,
      Ok(status) => {
        warn!(code = ?status.code(), "voice: ffmpeg capture exited non-zero");
        Some(VoiceError::Capture(format!("ffmpeg exited with status {}", status)))
      }
      Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
        Some(VoiceError::Unavailable("ffmpeg not found. Install it to use voice search".to_string()))
      }
      Err(e) => Some(VoiceError::Capture(format!("Failed to start ffmpeg: {}", e))),
    };
    if let Some(err) = err {
      let _ = updates.send(TranscriptUpdate::Failed(err));
      return;
    }

    // Shorter than ~1s of 16kHz mono audio makes whisper fail; treat as silence.
    let size = std::fs::metadata(&path).map(|m| m.len()).unwrap_or(0);
    if size < min_chunk_bytes {
      debug!(size, "voice: chunk too short, skipping");
      let _ = std::fs::remove_file(&path);
      continue;
    }
    if chunks.send(path).await.is_err() {
      return;
    }
  }
}

/// ffmpeg arguments recording `secs` of the default microphone as 16kHz mono WAV.
pub fn capture_args(output: &Path, secs: u32) -> Vec<String> {
  #[cfg(target_os = "macos")]
  let input = ["-f", "avfoundation", "-i", ":0"];
  #[cfg(not(target_os = "macos"))]
  let input = ["-f", "pulse", "-i", "default"];

  let mut args: Vec<String> = ["-y", "-loglevel", "error"].iter().map(|s| s.to_string()).collect();
  args.extend(input.iter().map(|s| s.to_string()));
  args.extend(["-t".to_string(), secs.to_string()]);
  args.extend(["-ar", "16000", "-ac", "1", "-f", "wav"].iter().map(|s| s.to_string()));
  args.push(output.to_string_lossy().into_owned());
  args
}

/// Whether whisper's output holds no words, only markers like `[BLANK_AUDIO]` or `(silence)`.
pub fn is_blank_transcript(text: &str) -> bool {
  let mut depth = 0i32;
  !text.chars().any(|c| match c {
    '[' | '(' => {
      depth += 1;
      false
    }
    ']' | ')' => {
      depth = (depth - 1).max(0);
      false
    }
    c => depth == 0 && c.is_alphanumeric(),
  })
}

fn append_text(heard: &mut String, text: &str) {
  let text = text.trim();
  if !heard.is_empty() {
    heard.push(' ');
  }
  heard.push_str(text);
}

async fn transcribe_chunk(whisper: SharedWhisper, path: PathBuf) -> Result<String> {
  let chunk = path.clone();
  let result = tokio::task::spawn_blocking(move || {
    let _quiet = StderrSilencer::engage();
    let mut slot = whisper.lock().map_err(|_| anyhow::anyhow!("whisper model lock poisoned"))?;
    let whisper = slot.as_mut().context("whisper model not loaded")?;
    let transcript = whisper.transcribe(&chunk, false, false).context("Whisper transcription failed")?;
    let text = transcript.utterances.iter().map(|u| u.text.trim()).filter(|t| !t.is_empty()).collect::<Vec<_>>().join(" ");
    Ok::<String, anyhow::Error>(text)
  })
  .await;
  let _ = std::fs::remove_file(&path);
  // spawn_blocking panics when whisper.cpp crashes on bad input.
  result.context("whisper task panicked")?
}

// --- stderr silencing ---

/// Points fd 2 at /dev/null while alive so whisper.cpp's C-level logging
/// cannot scribble over the pager. stdout is left alone.
struct StderrSilencer {
  original: Option<libc::c_int>,
}

impl StderrSilencer {
  fn engage() -> Self {
    // Safety: plain POSIX descriptor calls on fd 2 and descriptors we own.
    let original = unsafe {
      let null = libc::open(c"/dev/null".as_ptr(), libc::O_WRONLY);
      if null < 0 {
        None
      } else {
        let saved = libc::dup(2);
        if saved >= 0 {
          libc::dup2(null, 2);
        }
        libc::close(null);
        (saved >= 0).then_some(saved)
      }
    };
    if original.is_none() {
      debug!("voice: stderr left as is");
    }
    Self { original }
  }
}

impl Drop for StderrSilencer {
  fn drop(&mut self) {
    if let Some(fd) = self.original.take() {
      // Safety: `fd` is the duplicate made in `engage` and is closed exactly once.
      unsafe {
        libc::dup2(fd, 2);
        libc::close(fd);
      }
    }
  }
}
