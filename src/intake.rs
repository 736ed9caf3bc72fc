//! Turns finished voice captures and typed queries into listing switches.

use tracing::info;

use crate::model::Mode;
use crate::paging::PagingController;
use crate::voice::VoiceOutcome;

/// Start a search for `query`, or fall back to browsing for a blank query
/// while a search is showing. Returns whether the mode changed.
pub fn submit_query(controller: &mut PagingController, query: &str) -> bool {
  let query = query.trim();
  if query.is_empty() {
    return cancel_search(controller);
  }
  info!(query, "intake: starting search");
  controller.set_mode(Mode::Search(query.to_string()));
  true
}

/// Return to browsing if a search is active. No-op otherwise.
pub fn cancel_search(controller: &mut PagingController) -> bool {
  if !controller.mode().is_search() {
    return false;
  }
  info!("intake: search cancelled, back to browsing");
  controller.set_mode(Mode::Browse);
  true
}

/// Apply a finished voice capture to the controller.
pub fn apply_voice_outcome(controller: &mut PagingController, outcome: &VoiceOutcome) -> bool {
  match outcome {
    VoiceOutcome::Query(query) => submit_query(controller, query),
    VoiceOutcome::Empty | VoiceOutcome::Cancelled | VoiceOutcome::Failed(_) => cancel_search(controller),
  }
}
