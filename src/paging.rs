//! Paginated listing state machine.
//!
//! The controller decides when the next page is fetched, appends accepted
//! pages in order, and switches between browsing and searching. Fetches run
//! as spawned tasks; their results come back over a channel as
//! [`PageCompletion`]s and are applied by the owner through
//! [`PagingController::on_completion`], so all state changes happen on one
//! task.
//!
//! Per listing epoch: `Idle -> Fetching -> Idle | Failed`, `Failed -> Fetching`
//! on retry, and any state goes to a fresh `Idle` epoch on [`PagingController::set_mode`].

use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::constants::constants;
use crate::error::ErrorKind;
use crate::model::{CatalogPage, Mode, Movie};
use crate::tmdb::CatalogClient;

/// Identifies one issued fetch. Completions are matched against it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
  pub epoch: u64,
  pub mode: Mode,
  pub page: u32,
}

/// A finished fetch, tagged with the request it answers.
#[derive(Debug)]
pub struct PageCompletion {
  pub request: PageRequest,
  pub result: Result<CatalogPage, ErrorKind>,
}

/// Notifications for the presentation layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PagingEvent {
  /// The collection was cleared for a new listing.
  Reset { mode: Mode },
  FetchStarted { page: u32 },
  ItemsAppended { items: Vec<Movie>, offset: usize },
  LoadFailed { kind: ErrorKind, retryable: bool },
  /// The listing finished without a single item.
  NoResults,
  /// Every page of a non-empty listing has been loaded.
  Exhausted,
}

/// Mutable paging state for the current listing.
#[derive(Debug, Clone)]
pub struct PagingState {
  pub mode: Mode,
  pub items: Vec<Movie>,
  pub next_page: u32,
  pub max_page: u32,
  pub in_flight: bool,
  pub last_error: Option<ErrorKind>,
}

impl PagingState {
  fn fresh(mode: Mode, max_page: u32) -> Self {
    Self { mode, items: Vec::new(), next_page: 1, max_page, in_flight: false, last_error: None }
  }

  pub fn is_exhausted(&self) -> bool {
    self.next_page > self.max_page
  }
}

/// Whether the presenter should ask for more after showing row `last_visible`.
pub fn is_near_end(last_visible: usize, loaded: usize) -> bool {
  loaded == 0 || last_visible + 1 + constants().near_end_rows >= loaded
}

pub struct PagingController {
  client: Arc<dyn CatalogClient>,
  completions: mpsc::UnboundedSender<PageCompletion>,
  events: mpsc::UnboundedSender<PagingEvent>,
  state: PagingState,
  epoch: u64,
  max_page_sentinel: u32,
}

impl PagingController {
  /// Create a controller in Browse mode. Nothing is fetched until the first
  /// [`request_more`](Self::request_more).
  pub fn new(
    client: Arc<dyn CatalogClient>,
    completions: mpsc::UnboundedSender<PageCompletion>,
    events: mpsc::UnboundedSender<PagingEvent>,
  ) -> Self {
    let max_page_sentinel = constants().max_page_sentinel;
    Self {
      client,
      completions,
      events,
      state: PagingState::fresh(Mode::Browse, max_page_sentinel),
      epoch: 0,
      max_page_sentinel,
    }
  }

  pub fn state(&self) -> &PagingState {
    &self.state
  }

  pub fn items(&self) -> &[Movie] {
    &self.state.items
  }

  pub fn mode(&self) -> &Mode {
    &self.state.mode
  }

  pub fn last_error(&self) -> Option<ErrorKind> {
    self.state.last_error
  }

  /// Issue a fetch for the next page unless one is already in flight or the
  /// listing is exhausted. Safe to call redundantly.
  pub fn request_more(&mut self) {
    if self.state.in_flight || self.state.is_exhausted() {
      debug!(
        in_flight = self.state.in_flight,
        next_page = self.state.next_page,
        max_page = self.state.max_page,
        "paging: request_more ignored"
      );
      return;
    }
    self.state.in_flight = true;
    let request = PageRequest { epoch: self.epoch, mode: self.state.mode.clone(), page: self.state.next_page };
    info!(mode = %request.mode, page = request.page, epoch = request.epoch, "paging: fetching page");
    self.emit(PagingEvent::FetchStarted { page: request.page });
    self.dispatch(request);
  }

  fn dispatch(&self, request: PageRequest) {
    let client = Arc::clone(&self.client);
    let tx = self.completions.clone();
    tokio::spawn(async move {
      let result = match &request.mode {
        Mode::Browse => client.fetch_browse_page(request.page).await,
        Mode::Search(query) => client.fetch_search_page(query, request.page).await,
      };
      // The controller may be gone by now; its results are simply dropped.
      let _ = tx.send(PageCompletion { request, result });
    });
  }

  /// Apply a finished fetch. Returns whether it was accepted.
  pub fn on_completion(&mut self, completion: PageCompletion) -> bool {
    match completion.result {
      Ok(page) => self.on_fetch_succeeded(&completion.request, page),
      Err(kind) => self.on_fetch_failed(&completion.request, kind),
    }
  }

  /// Staleness guard: only the fetch this controller is waiting for counts.
  fn is_current(&self, request: &PageRequest) -> bool {
    self.state.in_flight
      && request.epoch == self.epoch
      && request.mode == self.state.mode
      && request.page == self.state.next_page
  }

  pub fn on_fetch_succeeded(&mut self, request: &PageRequest, page: CatalogPage) -> bool {
    if !self.is_current(request) {
      debug!(mode = %request.mode, page = request.page, epoch = request.epoch, "paging: discarding stale page");
      return false;
    }
    let offset = self.state.items.len();
    let count = page.items.len();
    self.state.items.extend(page.items.iter().cloned());
    self.state.max_page = page.total_pages.min(self.state.max_page);
    self.state.next_page += 1;
    self.state.last_error = None;
    self.state.in_flight = false;
    info!(
      page = request.page,
      count,
      total = self.state.items.len(),
      max_page = self.state.max_page,
      "paging: page appended"
    );

    if count > 0 {
      self.emit(PagingEvent::ItemsAppended { items: page.items, offset });
    }
    if self.state.is_exhausted() {
      if self.state.items.is_empty() {
        self.emit(PagingEvent::NoResults);
      } else {
        self.emit(PagingEvent::Exhausted);
      }
    }
    true
  }

  pub fn on_fetch_failed(&mut self, request: &PageRequest, kind: ErrorKind) -> bool {
    if !self.is_current(request) {
      debug!(mode = %request.mode, page = request.page, kind = kind.code(), "paging: discarding stale failure");
      return false;
    }
    warn!(mode = %request.mode, page = request.page, kind = kind.code(), "paging: fetch failed");
    self.state.last_error = Some(kind);
    self.state.in_flight = false;
    self.emit(PagingEvent::LoadFailed { kind, retryable: kind.is_retryable() });
    true
  }

  /// Switch listing: clear items, rewind the cursor, orphan any in-flight
  /// fetch, and prime page 1 of the new listing.
  pub fn set_mode(&mut self, mode: Mode) {
    info!(from = %self.state.mode, to = %mode, "paging: switching mode");
    self.reset(mode);
    self.request_more();
  }

  fn reset(&mut self, mode: Mode) {
    self.epoch += 1;
    self.state = PagingState::fresh(mode.clone(), self.max_page_sentinel);
    self.emit(PagingEvent::Reset { mode });
  }

  pub fn retry_last_failure(&mut self) {
    info!(page = self.state.next_page, last_error = ?self.state.last_error, "paging: retry");
    self.state.last_error = None;
    self.request_more();
  }

  /// Connectivity came back. An empty Browse listing (started offline) is
  /// re-primed from page 1; otherwise a connectivity error is cleared so the
  /// next scroll or retry goes through. Never retries on its own otherwise.
  pub fn on_reachability_restored(&mut self) {
    if self.state.items.is_empty() && self.state.mode == Mode::Browse {
      if self.state.in_flight {
        debug!("paging: reachability restored while page 1 is in flight");
        return;
      }
      info!("paging: reachability restored with empty browse listing, re-priming");
      self.reset(Mode::Browse);
      self.request_more();
    } else if self.state.last_error.is_some_and(ErrorKind::is_connectivity) {
      info!("paging: reachability restored, clearing connectivity error");
      self.state.last_error = None;
    }
  }

  fn emit(&self, event: PagingEvent) {
    let _ = self.events.send(event);
  }
}
