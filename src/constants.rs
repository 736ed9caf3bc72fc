//! Application constants loaded from `constants.ron` at compile time.
//!
//! The RON file is embedded via `include_str!` so it's always available,
//! no runtime file I/O. Parsed once on first access via `LazyLock`.

use serde::Deserialize;
use std::sync::LazyLock;
use std::time::Duration;

/// All tuneable application constants.
#[derive(Debug, Deserialize)]
pub struct Constants {
  // TMDB endpoints
  pub api_base_url: String,
  pub browse_path: String,
  pub browse_sort: String,
  pub search_path: String,
  pub genre_path: String,
  /// Contains an `{id}` placeholder for the movie id.
  pub credits_path: String,
  pub configuration_path: String,

  // Image sizes
  pub thumbnail_size: String,
  pub backdrop_size: String,

  // Paging
  /// TMDB serves at most 1000 pages for a listing; used until the server reports fewer.
  pub max_page_sentinel: u32,
  pub near_end_rows: usize,
  pub screen_rows: usize,

  // Network
  pub request_timeout_secs: u64,
  pub probe_interval_secs: u64,
  pub probe_timeout_secs: u64,

  // Voice search
  pub silence_timeout_ms: u64,
  pub no_speech_timeout_ms: u64,
  pub voice_chunk_secs: u32,
  pub min_chunk_bytes: u64,
}

impl Constants {
  pub fn request_timeout(&self) -> Duration {
    Duration::from_secs(self.request_timeout_secs)
  }

  pub fn probe_interval(&self) -> Duration {
    Duration::from_secs(self.probe_interval_secs)
  }

  pub fn probe_timeout(&self) -> Duration {
    Duration::from_secs(self.probe_timeout_secs)
  }
}

static CONSTANTS: LazyLock<Constants> = LazyLock::new(|| {
  // Safety: the RON file is embedded at compile time; if it's malformed this is a build-time error.
  ron::from_str(include_str!("../constants.ron")).expect("constants.ron must be valid RON (embedded at compile time)")
});

/// Returns a reference to the parsed application constants.
pub fn constants() -> &'static Constants {
  &CONSTANTS
}
