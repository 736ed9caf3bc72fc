use serde_json::Value;
use std::collections::HashMap;
use std::fmt;

use crate::constants::constants;
use crate::error::ErrorKind;

/// Which listing the pager is walking through.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub enum Mode {
  /// Popular movies, most popular first.
  #[default]
  Browse,
  /// Results for a free-text title search.
  Search(String),
}

impl Mode {
  pub fn is_search(&self) -> bool {
    matches!(self, Mode::Search(_))
  }
}

impl fmt::Display for Mode {
  fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
    match self {
      Mode::Browse => write!(f, "browse"),
      Mode::Search(query) => write!(f, "search:{}", query),
    }
  }
}

/// A single movie from a listing page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Movie {
  pub id: i64,
  pub title: String,
  pub overview: String,
  pub genre_ids: Vec<i64>,
  /// Path fragment such as `/abc.jpg`, appended to the image base URL and a size.
  pub poster_path: String,
  pub backdrop_path: String,
}

impl Movie {
  /// Build a movie from one entry of a page's `results` array.
  ///
  /// Only `id` is required; every other field falls back to empty when it is
  /// absent or has an unexpected type.
  pub fn from_raw(raw: &Value) -> Result<Self, ErrorKind> {
    let id = raw.get("id").and_then(Value::as_i64).ok_or(ErrorKind::MalformedResponse)?;
    let text = |key: &str| raw.get(key).and_then(Value::as_str).unwrap_or_default().to_string();
    let genre_ids = raw
      .get("genre_ids")
      .and_then(Value::as_array)
      .map(|ids| ids.iter().filter_map(Value::as_i64).collect())
      .unwrap_or_default();
    Ok(Self {
      id,
      title: text("title"),
      overview: text("overview"),
      genre_ids,
      poster_path: text("poster_path"),
      backdrop_path: text("backdrop_path"),
    })
  }

  /// Small poster for list rows. None without a poster.
  pub fn thumbnail_url(&self, image_base: &str) -> Option<String> {
    if self.poster_path.is_empty() {
      return None;
    }
    Some(format!("{}{}{}", image_base, constants().thumbnail_size, self.poster_path))
  }

  /// Wide image for the details view, falling back to the poster.
  pub fn backdrop_url(&self, image_base: &str) -> Option<String> {
    let path = if self.backdrop_path.is_empty() { &self.poster_path } else { &self.backdrop_path };
    if path.is_empty() {
      return None;
    }
    Some(format!("{}{}{}", image_base, constants().backdrop_size, path))
  }
}

/// One page of a listing as reported by the server.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CatalogPage {
  pub items: Vec<Movie>,
  pub total_pages: u32,
}

/// Genre id to display name.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GenreTable {
  names: HashMap<i64, String>,
}

impl GenreTable {
  pub fn new(names: HashMap<i64, String>) -> Self {
    Self { names }
  }

  pub fn is_empty(&self) -> bool {
    self.names.is_empty()
  }

  pub fn len(&self) -> usize {
    self.names.len()
  }

  pub fn name(&self, id: i64) -> Option<&str> {
    self.names.get(&id).map(String::as_str)
  }

  /// Comma-separated names for `ids`, in the given order. Unknown ids are skipped.
  pub fn describe(&self, ids: &[i64]) -> String {
    ids.iter().filter_map(|id| self.name(*id)).collect::<Vec<_>>().join(", ")
  }

  /// All entries sorted by name, for listing.
  pub fn sorted(&self) -> Vec<(i64, &str)> {
    let mut entries: Vec<(i64, &str)> = self.names.iter().map(|(id, name)| (*id, name.as_str())).collect();
    entries.sort_by(|a, b| a.1.cmp(b.1));
    entries
  }
}
