use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::error::ErrorKind;
use crate::input::{Command, HELP};
use crate::intake;
use crate::model::{GenreTable, Mode, Movie};
use crate::paging::{PageCompletion, PagingController, PagingEvent, is_near_end};
use crate::reachability::{Reachability, ReachabilityMonitor, Subscription};
use crate::tmdb::CatalogClient;
use crate::voice::{EndpointPolicy, SpeechSource, VoiceOutcome, VoiceSession};

// --- Types ---

type CastResult = (Movie, Result<Vec<String>, ErrorKind>);

/// Side fetches that are not part of paging.
#[derive(Default)]
struct AsyncTasks {
  genres_rx: Option<oneshot::Receiver<Result<GenreTable, ErrorKind>>>,
  image_base_rx: Option<oneshot::Receiver<Result<String, ErrorKind>>>,
  cast_rx: Option<oneshot::Receiver<CastResult>>,
}

/// Owner of all listing state. Every mutation happens through `&mut self`
/// on the task running the event loop; background work reports back over
/// channels drained by [`App::check_pending`].
pub struct App {
  client: Arc<dyn CatalogClient>,
  controller: PagingController,
  completions_rx: mpsc::UnboundedReceiver<PageCompletion>,
  events_rx: mpsc::UnboundedReceiver<PagingEvent>,
  reachability: Subscription,
  offline: bool,
  genres: GenreTable,
  image_base: Option<String>,
  speech: Arc<dyn SpeechSource>,
  voice: Option<VoiceSession>,
  tasks: AsyncTasks,
  config: Config,
  /// Where to persist the cached image base URL. None keeps it in memory.
  config_path: Option<PathBuf>,
  /// Number of rows printed for the current listing.
  shown: usize,
  screen_rows: usize,
  /// The user scrolled past everything loaded and is waiting for the next page.
  waiting_for_more: bool,
  /// A failure banner is up and has not been retried or dismissed.
  failure_pending: bool,
  /// The last fetch failed and nothing has been loaded since, so `r` applies.
  retry_offered: bool,
  output: Vec<String>,
  pub should_quit: bool,
}

impl App {
  pub fn new(
    client: Arc<dyn CatalogClient>,
    monitor: Arc<dyn ReachabilityMonitor>,
    speech: Arc<dyn SpeechSource>,
    config: Config,
    config_path: Option<PathBuf>,
    screen_rows: usize,
  ) -> Self {
    let (completions_tx, completions_rx) = mpsc::unbounded_channel();
    let (events_tx, events_rx) = mpsc::unbounded_channel();
    let controller = PagingController::new(Arc::clone(&client), completions_tx, events_tx);
    let image_base = config.image_base_url.clone();
    Self {
      client,
      controller,
      completions_rx,
      events_rx,
      reachability: Subscription::new(monitor),
      offline: false,
      genres: GenreTable::default(),
      image_base,
      speech,
      voice: None,
      tasks: AsyncTasks::default(),
      config,
      config_path,
      shown: 0,
      screen_rows: screen_rows.max(1),
      waiting_for_more: false,
      failure_pending: false,
      retry_offered: false,
      output: Vec::new(),
      should_quit: false,
    }
  }

  /// Activate the view: side fetches plus the first page of `initial_query`
  /// results, or of popular movies.
  pub fn start(&mut self, initial_query: Option<&str>) {
    self.load_genres();
    if self.image_base.is_none() {
      self.load_image_base();
    }
    match initial_query.map(str::trim).filter(|q| !q.is_empty()) {
      Some(query) => {
        intake::submit_query(&mut self.controller, query);
      }
      None => {
        self.print_header(&Mode::Browse);
        self.controller.request_more();
      }
    }
  }

  pub fn take_output(&mut self) -> Vec<String> {
    std::mem::take(&mut self.output)
  }

  fn say(&mut self, line: impl Into<String>) {
    self.output.push(line.into());
  }

  // --- Side fetches ---

  fn load_genres(&mut self) {
    let client = Arc::clone(&self.client);
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let _ = tx.send(client.fetch_genres().await);
    });
    self.tasks.genres_rx = Some(rx);
  }

  fn load_image_base(&mut self) {
    let client = Arc::clone(&self.client);
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let _ = tx.send(client.fetch_image_base_url().await);
    });
    self.tasks.image_base_rx = Some(rx);
  }

  fn load_cast(&mut self, movie: Movie) {
    let client = Arc::clone(&self.client);
    let (tx, rx) = oneshot::channel();
    tokio::spawn(async move {
      let result = client.fetch_cast(movie.id).await;
      let _ = tx.send((movie, result));
    });
    self.tasks.cast_rx = Some(rx);
  }

  // --- Polling ---

  /// Apply everything that finished in the background since the last call.
  pub fn check_pending(&mut self) {
    // Reachability first so failures that arrive with it are judged offline.
    while let Some(state) = self.reachability.try_recv() {
      self.on_reachability(state);
    }
    while let Ok(completion) = self.completions_rx.try_recv() {
      self.controller.on_completion(completion);
    }
    while let Ok(event) = self.events_rx.try_recv() {
      self.on_paging_event(event);
    }

    if let Some(mut rx) = self.tasks.genres_rx.take() {
      match rx.try_recv() {
        Ok(Ok(genres)) => {
          info!(count = genres.len(), "genres loaded");
          self.genres = genres;
        }
        Ok(Err(kind)) => warn!(kind = kind.code(), "genre fetch failed, annotations stay blank"),
        Err(oneshot::error::TryRecvError::Empty) => self.tasks.genres_rx = Some(rx),
        Err(oneshot::error::TryRecvError::Closed) => warn!("genre task failed"),
      }
    }

    if let Some(mut rx) = self.tasks.image_base_rx.take() {
      match rx.try_recv() {
        Ok(Ok(base)) => {
          info!(base = %base, "image base URL loaded");
          self.image_base = Some(base.clone());
          self.config.image_base_url = Some(base);
          if let Some(ref path) = self.config_path
            && let Err(e) = self.config.save_to(path)
          {
            warn!(err = %format!("{:#}", e), "failed to cache image base URL");
          }
        }
        Ok(Err(kind)) => warn!(kind = kind.code(), "configuration fetch failed, no image URLs"),
        Err(oneshot::error::TryRecvError::Empty) => self.tasks.image_base_rx = Some(rx),
        Err(oneshot::error::TryRecvError::Closed) => warn!("configuration task failed"),
      }
    }

    if let Some(mut rx) = self.tasks.cast_rx.take() {
      match rx.try_recv() {
        Ok((movie, Ok(cast))) if cast.is_empty() => self.say(format!("Cast of {}: (none listed)", movie.title)),
        Ok((movie, Ok(cast))) => self.say(format!("Cast of {}: {}", movie.title, cast.join(", "))),
        Ok((movie, Err(kind))) => self.say(format!("Communication error loading the cast of {}: {}", movie.title, kind)),
        Err(oneshot::error::TryRecvError::Empty) => self.tasks.cast_rx = Some(rx),
        Err(oneshot::error::TryRecvError::Closed) => warn!("cast task failed"),
      }
    }

    if self.voice.as_mut().is_some_and(VoiceSession::take_ready) {
      self.say("Listening… say the name of the movie you wish to find ('x' to cancel).");
    }
    if let Some(outcome) = self.voice.as_mut().and_then(VoiceSession::try_outcome) {
      self.voice = None;
      self.on_voice_outcome(outcome);
    }
  }

  // --- Paging presentation ---

  fn on_paging_event(&mut self, event: PagingEvent) {
    match event {
      PagingEvent::Reset { mode } => {
        self.shown = 0;
        self.waiting_for_more = false;
        self.failure_pending = false;
        self.retry_offered = false;
        self.print_header(&mode);
      }
      PagingEvent::FetchStarted { page } => {
        if page == 1 {
          self.say("Loading…");
        } else {
          debug!(page, "loading more");
        }
      }
      PagingEvent::ItemsAppended { offset, .. } => {
        self.failure_pending = false;
        self.retry_offered = false;
        if self.waiting_for_more || offset == 0 {
          self.reveal();
        }
      }
      PagingEvent::LoadFailed { kind, retryable } => {
        self.waiting_for_more = false;
        self.retry_offered = retryable;
        if kind == ErrorKind::NetworkUnreachable && self.offline {
          debug!("load failed while offline, banner suppressed");
        } else if self.failure_pending {
          debug!(kind = kind.code(), "load failed again, banner already up");
        } else {
          self.failure_pending = true;
          if retryable {
            self.say(format!("Communication error: {}. Type 'r' to retry or 'x' to cancel.", kind));
          } else {
            self.say(format!("Communication error: {}.", kind));
          }
        }
      }
      PagingEvent::NoResults => {
        self.waiting_for_more = false;
        self.retry_offered = false;
        if self.controller.mode().is_search() {
          self.say("No results found. Type 'x' to go back to popular movies.");
        } else {
          self.say("No results found.");
        }
      }
      PagingEvent::Exhausted => {
        self.retry_offered = false;
        // A revealed last page already printed the marker.
        if self.waiting_for_more {
          self.waiting_for_more = false;
          self.say("(end of list)");
        }
      }
    }
  }

  fn print_header(&mut self, mode: &Mode) {
    match mode {
      Mode::Browse => self.say("== Popular movies =="),
      Mode::Search(query) => self.say(format!("== Search: {} ==", query)),
    }
  }

  fn format_row(&self, index: usize, movie: &Movie) -> String {
    let title = if movie.title.is_empty() { "(untitled)" } else { movie.title.as_str() };
    let genres = self.genres.describe(&movie.genre_ids);
    if genres.is_empty() {
      format!("{:>4}. {}", index + 1, title)
    } else {
      format!("{:>4}. {}  [{}]", index + 1, title, genres)
    }
  }

  /// Print the next screen of loaded rows, then apply the near-end policy.
  fn reveal(&mut self) {
    let items = self.controller.items();
    let end = (self.shown + self.screen_rows).min(items.len());
    let rows: Vec<String> = (self.shown..end).map(|i| self.format_row(i, &items[i])).collect();
    let loaded = items.len();
    self.shown = end;
    self.waiting_for_more = false;
    self.output.extend(rows);

    if is_near_end(self.shown.saturating_sub(1), loaded) {
      self.controller.request_more();
    }
    if self.shown == loaded && self.controller.state().is_exhausted() && loaded > 0 {
      self.say("(end of list)");
    }
  }

  fn scroll(&mut self) {
    let loaded = self.controller.items().len();
    let state = self.controller.state();
    let (exhausted, in_flight) = (state.is_exhausted(), state.in_flight);
    if self.shown < loaded {
      self.reveal();
    } else if exhausted {
      self.say("(end of list)");
    } else {
      self.waiting_for_more = true;
      if in_flight {
        self.say("Loading more…");
      } else {
        // Scrolling to the end is the organic trigger after a failure.
        self.failure_pending = false;
        self.retry_offered = false;
        self.controller.request_more();
      }
    }
  }

  // --- Reachability ---

  fn on_reachability(&mut self, state: Reachability) {
    match state {
      Reachability::Unreachable => {
        if !self.offline {
          self.offline = true;
          self.say("Offline: waiting for the network…");
        }
      }
      Reachability::Reachable => {
        if !self.offline {
          return;
        }
        self.offline = false;
        self.say("Back online.");
        // The banner is stale; a new failure after reconnecting gets its own.
        if self.controller.last_error().is_some_and(ErrorKind::is_connectivity) {
          self.failure_pending = false;
        }
        self.controller.on_reachability_restored();
        if self.genres.is_empty() && self.tasks.genres_rx.is_none() {
          self.load_genres();
        }
        if self.image_base.is_none() && self.tasks.image_base_rx.is_none() {
          self.load_image_base();
        }
      }
    }
  }

  // --- Voice ---

  fn start_voice(&mut self) {
    if self.voice.is_some() {
      self.say("Already listening.");
      return;
    }
    self.voice = Some(VoiceSession::begin(self.speech.as_ref(), EndpointPolicy::from_constants()));
    self.say("Starting voice search ('x' to cancel)…");
  }

  fn on_voice_outcome(&mut self, outcome: VoiceOutcome) {
    match &outcome {
      VoiceOutcome::Query(query) => self.say(format!("Heard: {}", query)),
      VoiceOutcome::Empty => self.say("Didn't catch that."),
      VoiceOutcome::Cancelled => self.say("Voice search cancelled."),
      VoiceOutcome::Failed(err) => self.say(format!("Voice search failed: {}", err)),
    }
    intake::apply_voice_outcome(&mut self.controller, &outcome);
  }

  // --- Commands ---

  pub fn handle_command(&mut self, command: Command) {
    match command {
      Command::Scroll => self.scroll(),
      Command::Search(query) => {
        if query.trim().is_empty() && !self.controller.mode().is_search() {
          self.say("Enter a search term.");
        } else {
          intake::submit_query(&mut self.controller, &query);
        }
      }
      Command::Voice => self.start_voice(),
      Command::Cancel => {
        if let Some(session) = self.voice.take() {
          let outcome = session.cancel();
          self.on_voice_outcome(outcome);
        } else if !intake::cancel_search(&mut self.controller) {
          self.failure_pending = false;
          self.say("Nothing to cancel.");
        }
      }
      Command::Retry => {
        let state = self.controller.state();
        let idle = !state.in_flight && !state.is_exhausted();
        if idle && (self.retry_offered || state.last_error.is_some()) {
          self.failure_pending = false;
          self.retry_offered = false;
          self.waiting_for_more = true;
          self.controller.retry_last_failure();
        } else {
          self.say("Nothing to retry.");
        }
      }
      Command::Info(row) => self.show_details(row),
      Command::Genres => {
        if self.genres.is_empty() {
          self.say("Genres not loaded yet.");
        } else {
          let names: Vec<String> = self.genres.sorted().into_iter().map(|(id, name)| format!("{} ({})", name, id)).collect();
          self.say(format!("Genres: {}", names.join(", ")));
        }
      }
      Command::Help => self.say(HELP),
      Command::Quit => {
        if let Some(session) = self.voice.take() {
          session.cancel();
        }
        self.should_quit = true;
      }
      Command::Unknown(line) => self.say(format!("Unknown command '{}'. Type 'h' for help.", line)),
    }
  }

  fn show_details(&mut self, row: usize) {
    let Some(movie) = row.checked_sub(1).and_then(|i| self.controller.items().get(i)).cloned() else {
      self.say(format!("No row {}.", row));
      return;
    };
    let title = if movie.title.is_empty() { "(untitled)" } else { movie.title.as_str() };
    self.say(format!("-- {} --", title));
    let genres = self.genres.describe(&movie.genre_ids);
    if !genres.is_empty() {
      self.say(format!("Genres: {}", genres));
    }
    if !movie.overview.is_empty() {
      self.say(movie.overview.clone());
    }
    if let Some(base) = self.image_base.clone() {
      if let Some(url) = movie.thumbnail_url(&base) {
        self.say(format!("Poster: {}", url));
      }
      if let Some(url) = movie.backdrop_url(&base) {
        self.say(format!("Image: {}", url));
      }
    }
    self.load_cast(movie);
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::paging::tests::{ScriptedCatalog, page_of};
  use crate::reachability::ManualMonitor;
  use crate::voice::ScriptedSpeech;
  use std::time::Duration;

  struct Fixture {
    app: App,
    catalog: Arc<ScriptedCatalog>,
    monitor: Arc<ManualMonitor>,
    seen: Vec<String>,
  }

  impl Fixture {
    fn new(catalog: ScriptedCatalog) -> Self {
      let config = Config { image_base_url: Some("https://image.tmdb.org/t/p/".to_string()), ..Config::default() };
      Self::with_config(catalog, config)
    }

    fn with_config(catalog: ScriptedCatalog, config: Config) -> Self {
      let catalog = Arc::new(catalog);
      let monitor = Arc::new(ManualMonitor::default());
      let speech: Arc<dyn SpeechSource> = Arc::new(ScriptedSpeech::new("alien", Duration::from_millis(100)));
      let app = App::new(catalog.clone(), monitor.clone(), speech, config, None, 10);
      Self { app, catalog, monitor, seen: Vec::new() }
    }

    fn count(&self, text: &str) -> usize {
      self.seen.iter().filter(|l| l.contains(text)).count()
    }

    /// Let spawned fetches finish and apply their results.
    async fn settle(&mut self) {
      for _ in 0..20 {
        tokio::task::yield_now().await;
        self.app.check_pending();
      }
      self.seen.extend(self.app.take_output());
    }

    fn command(&mut self, command: Command) {
      self.app.handle_command(command);
    }

    fn saw(&self, text: &str) -> bool {
      self.seen.iter().any(|l| l.contains(text))
    }

    /// Titles of every printed row, in print order.
    fn rows(&self) -> Vec<String> {
      self
        .seen
        .iter()
        .map(|l| l.trim_start())
        .filter(|l| l.starts_with(|c: char| c.is_ascii_digit()) && l.contains(". "))
        .filter_map(|l| l.split_once(". ").map(|(_, rest)| rest.split("  [").next().unwrap_or(rest).to_string()))
        .collect()
    }
  }

  fn titles(range: std::ops::RangeInclusive<i64>) -> Vec<String> {
    range.map(|i| format!("Movie {}", i)).collect()
  }

  #[tokio::test]
  async fn first_screen_then_scroll_requests_next_page() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 20, 3)));
    catalog.script(Mode::Browse, 2, Ok(page_of(21, 20, 3)));
    let mut f = Fixture::new(catalog);

    f.app.start(None);
    f.settle().await;
    assert!(f.saw("== Popular movies =="));
    assert_eq!(f.rows(), titles(1..=10));
    assert_eq!(f.catalog.calls(), vec![(Mode::Browse, 1)]);

    f.command(Command::Scroll);
    f.settle().await;
    assert_eq!(f.rows(), titles(1..=20));
    assert_eq!(f.catalog.calls(), vec![(Mode::Browse, 1), (Mode::Browse, 2)]);

    f.command(Command::Scroll);
    f.settle().await;
    assert_eq!(f.rows(), titles(1..=30));
  }

  #[tokio::test]
  async fn genres_annotate_rows_once_loaded() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 20, 3)));
    let mut f = Fixture::new(catalog);

    f.app.start(None);
    f.settle().await;
    f.command(Command::Scroll);
    f.settle().await;
    assert!(f.saw("Movie 20  [Action]"));
  }

  #[tokio::test]
  async fn started_offline_recovers_without_banner() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Err(ErrorKind::NetworkUnreachable));
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 20, 3)));
    let mut f = Fixture::new(catalog);

    f.monitor.set(Reachability::Unreachable);
    f.app.start(None);
    f.settle().await;
    assert!(f.saw("Offline"));
    assert!(!f.saw("Communication error"));
    assert!(f.rows().is_empty());

    f.monitor.set(Reachability::Reachable);
    f.settle().await;
    assert!(f.saw("Back online."));
    assert_eq!(f.rows(), titles(1..=10));
  }

  #[tokio::test]
  async fn failure_banner_once_then_retry() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Err(ErrorKind::TransportError));
    catalog.script(Mode::Browse, 1, Err(ErrorKind::TransportError));
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 5, 1)));
    let mut f = Fixture::new(catalog);

    f.app.start(None);
    f.settle().await;
    assert_eq!(f.count("Communication error"), 1);

    f.command(Command::Retry);
    f.settle().await;
    assert_eq!(f.count("Communication error"), 2);

    f.command(Command::Retry);
    f.settle().await;
    assert_eq!(f.rows(), titles(1..=5));
    assert_eq!(f.count("(end of list)"), 1);

    f.command(Command::Retry);
    f.settle().await;
    assert!(f.saw("Nothing to retry."));
  }

  #[tokio::test]
  async fn retry_still_offered_after_reconnect() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 20, 3)));
    catalog.script(Mode::Browse, 2, Err(ErrorKind::TransportError));
    catalog.script(Mode::Browse, 2, Ok(page_of(21, 20, 3)));
    let mut f = Fixture::new(catalog);

    f.app.start(None);
    f.settle().await;
    f.command(Command::Scroll);
    f.settle().await;
    assert_eq!(f.count("Type 'r' to retry"), 1);

    f.monitor.set(Reachability::Unreachable);
    f.settle().await;
    f.monitor.set(Reachability::Reachable);
    f.settle().await;
    assert!(f.saw("Back online."));
    assert_eq!(f.app.controller.last_error(), None);

    f.command(Command::Retry);
    f.settle().await;
    assert!(!f.saw("Nothing to retry."));
    assert_eq!(f.catalog.calls().iter().filter(|c| **c == (Mode::Browse, 2)).count(), 2);
    assert_eq!(f.rows(), titles(1..=30));
  }

  #[tokio::test]
  async fn retry_refused_while_loading_or_at_end() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 3, 1)));
    let mut f = Fixture::new(catalog);

    f.app.start(None);
    f.command(Command::Retry);
    assert_eq!(f.app.take_output().last().map(String::as_str), Some("Nothing to retry."));
    f.settle().await;
    f.command(Command::Retry);
    f.settle().await;
    assert_eq!(f.count("Nothing to retry."), 1);
    assert_eq!(f.catalog.calls(), vec![(Mode::Browse, 1)]);
  }

  #[tokio::test]
  async fn side_data_reloads_when_back_online() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 20, 3)));
    catalog.fail_genres(1);
    catalog.fail_image_base(1);
    let mut f = Fixture::with_config(catalog, Config::default());

    f.app.start(None);
    f.settle().await;
    assert!(f.app.genres.is_empty());
    assert_eq!(f.app.image_base, None);
    assert!(!f.saw("[Action]"));

    f.monitor.set(Reachability::Unreachable);
    f.settle().await;
    f.monitor.set(Reachability::Reachable);
    f.settle().await;
    assert_eq!(f.app.genres.name(28), Some("Action"));
    assert_eq!(f.app.image_base.as_deref(), Some("https://image.tmdb.org/t/p/"));
    assert_eq!(f.app.config.image_base_url.as_deref(), Some("https://image.tmdb.org/t/p/"));

    f.command(Command::Scroll);
    f.settle().await;
    assert!(f.saw("  11. Movie 11  [Action]"));
  }

  #[tokio::test]
  async fn typed_search_replaces_listing_and_cancel_returns() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 20, 3)));
    catalog.script(Mode::Search("heat".to_string()), 1, Ok(page_of(700, 2, 1)));
    let mut f = Fixture::new(catalog);

    f.app.start(None);
    f.settle().await;
    f.command(Command::Search("heat".to_string()));
    f.settle().await;
    assert!(f.saw("== Search: heat =="));
    assert!(f.rows().ends_with(&["Movie 700".to_string(), "Movie 701".to_string()]));

    f.command(Command::Cancel);
    f.settle().await;
    assert_eq!(f.app.controller.mode(), &Mode::Browse);
    assert_eq!(f.catalog.calls().iter().filter(|c| **c == (Mode::Browse, 1)).count(), 2);
  }

  #[tokio::test]
  async fn empty_search_reports_no_results() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Search("qwxz".to_string()), 1, Ok(page_of(1, 0, 0)));
    let mut f = Fixture::new(catalog);

    f.app.start(Some("qwxz"));
    f.settle().await;
    assert!(f.saw("No results found."));
    assert!(f.rows().is_empty());
  }

  #[tokio::test]
  async fn details_show_backdrop_and_cast() {
    let catalog = ScriptedCatalog::default();
    let mut page = page_of(1, 3, 1);
    page.items[1].overview = "A thief who steals secrets.".to_string();
    page.items[1].poster_path = "/p.jpg".to_string();
    catalog.script(Mode::Browse, 1, Ok(page));
    let mut f = Fixture::new(catalog);

    f.app.start(None);
    f.settle().await;
    f.command(Command::Info(2));
    f.settle().await;
    assert!(f.saw("-- Movie 2 --"));
    assert!(f.saw("A thief who steals secrets."));
    assert!(f.saw("Poster: https://image.tmdb.org/t/p/w92/p.jpg"));
    assert!(f.saw("Image: https://image.tmdb.org/t/p/w780/p.jpg"));
    assert!(f.saw("Cast of Movie 2: Keanu Reeves"));

    f.command(Command::Info(9));
    f.settle().await;
    assert!(f.saw("No row 9."));
  }

  #[tokio::test(start_paused = true)]
  async fn voice_query_starts_search() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 20, 3)));
    catalog.script(Mode::Search("alien".to_string()), 1, Ok(page_of(300, 4, 1)));
    let mut f = Fixture::new(catalog);

    f.app.start(None);
    f.settle().await;
    f.command(Command::Voice);
    for _ in 0..50 {
      tokio::time::sleep(Duration::from_millis(100)).await;
      f.settle().await;
      if f.app.voice.is_none() {
        break;
      }
    }
    f.settle().await;
    assert_eq!(f.count("Listening…"), 1);
    assert!(f.saw("Heard: alien"));
    assert_eq!(f.app.controller.mode(), &Mode::Search("alien".to_string()));
    assert!(f.rows().ends_with(&titles(300..=303)));
  }

  #[tokio::test(start_paused = true)]
  async fn cancelling_voice_while_browsing_keeps_listing() {
    let catalog = ScriptedCatalog::default();
    catalog.script(Mode::Browse, 1, Ok(page_of(1, 20, 3)));
    let mut f = Fixture::new(catalog);

    f.app.start(None);
    f.settle().await;
    f.command(Command::Voice);
    f.command(Command::Cancel);
    f.settle().await;
    assert!(f.saw("Voice search cancelled."));
    assert_eq!(f.app.controller.mode(), &Mode::Browse);
    assert_eq!(f.catalog.calls(), vec![(Mode::Browse, 1)]);
  }
}
