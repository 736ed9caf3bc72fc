use anyhow::{Context, Result};
use async_trait::async_trait;
use reqwest::{Client, Url};
use serde_json::Value;
use std::collections::HashMap;
use tracing::{debug, warn};

use crate::constants::constants;
use crate::error::ErrorKind;
use crate::model::{CatalogPage, GenreTable, Movie};

/// Remote movie catalog. Pages are 1-based.
///
/// Implementations are idempotent per (listing, page): asking for the same
/// page twice yields the same items, which is what lets the paging controller
/// drop late responses instead of cancelling requests.
#[async_trait]
pub trait CatalogClient: Send + Sync {
  async fn fetch_browse_page(&self, page: u32) -> Result<CatalogPage, ErrorKind>;
  async fn fetch_search_page(&self, query: &str, page: u32) -> Result<CatalogPage, ErrorKind>;
  async fn fetch_genres(&self) -> Result<GenreTable, ErrorKind>;
  async fn fetch_cast(&self, movie_id: i64) -> Result<Vec<String>, ErrorKind>;
  /// Base URL that image path fragments are appended to (after a size segment).
  async fn fetch_image_base_url(&self) -> Result<String, ErrorKind>;
}

// --- Response parsing ---

/// Parse a listing page. `results` and `total_pages` are required.
pub fn parse_page(body: &Value) -> Result<CatalogPage, ErrorKind> {
  let results = body.get("results").and_then(Value::as_array).ok_or(ErrorKind::MalformedResponse)?;
  let total_pages = body.get("total_pages").and_then(Value::as_u64).ok_or(ErrorKind::MalformedResponse)?;
  let items = results.iter().map(Movie::from_raw).collect::<Result<Vec<_>, _>>()?;
  Ok(CatalogPage { items, total_pages: u32::try_from(total_pages).unwrap_or(u32::MAX) })
}

pub fn parse_genres(body: &Value) -> Result<GenreTable, ErrorKind> {
  let genres = body.get("genres").and_then(Value::as_array).ok_or(ErrorKind::MalformedResponse)?;
  let names: HashMap<i64, String> = genres
    .iter()
    .filter_map(|g| {
      let id = g.get("id").and_then(Value::as_i64)?;
      let name = g.get("name").and_then(Value::as_str)?;
      Some((id, name.to_string()))
    })
    .collect();
  Ok(GenreTable::new(names))
}

pub fn parse_cast(body: &Value) -> Result<Vec<String>, ErrorKind> {
  let cast = body.get("cast").and_then(Value::as_array).ok_or(ErrorKind::MalformedResponse)?;
  Ok(cast.iter().filter_map(|c| c.get("name").and_then(Value::as_str)).map(str::to_string).collect())
}

pub fn parse_image_base_url(body: &Value) -> Result<String, ErrorKind> {
  body
    .get("images")
    .and_then(|images| images.get("secure_base_url"))
    .and_then(Value::as_str)
    .map(str::to_string)
    .ok_or(ErrorKind::MalformedResponse)
}

/// Decode a raw response body. An empty or `null` body is `EmptyResponse`.
pub fn decode_body(bytes: &[u8]) -> Result<Value, ErrorKind> {
  if bytes.iter().all(u8::is_ascii_whitespace) {
    return Err(ErrorKind::EmptyResponse);
  }
  match serde_json::from_slice::<Value>(bytes)? {
    Value::Null => Err(ErrorKind::EmptyResponse),
    value => Ok(value),
  }
}

// --- HTTP client ---

/// TMDB v3 client. Constructed explicitly and shared behind an `Arc`.
pub struct TmdbClient {
  http: Client,
  base_url: Url,
  api_key: String,
  language: Option<String>,
}

impl TmdbClient {
  pub fn new(api_key: String, language: Option<String>) -> Result<Self> {
    let http = Client::builder().timeout(constants().request_timeout()).build().context("Failed to build HTTP client")?;
    let base_url = Url::parse(&constants().api_base_url).context("Invalid api_base_url in constants.ron")?;
    Ok(Self { http, base_url, api_key, language })
  }

  /// Full request URL for `path` with the api key, language and `params` appended.
  pub fn endpoint(&self, path: &str, params: &[(&str, String)]) -> Result<Url, ErrorKind> {
    let mut url = self.base_url.join(path).map_err(|e| {
      warn!(path, err = %e, "tmdb: invalid endpoint path");
      ErrorKind::TransportError
    })?;
    {
      let mut pairs = url.query_pairs_mut();
      pairs.append_pair("api_key", &self.api_key);
      if let Some(ref language) = self.language {
        pairs.append_pair("language", language);
      }
      for (key, value) in params {
        pairs.append_pair(key, value);
      }
    }
    Ok(url)
  }

  async fn get_json(&self, path: &str, params: &[(&str, String)]) -> Result<Value, ErrorKind> {
    let url = self.endpoint(path, params)?;
    debug!(path, ?params, "tmdb: GET");
    let response = self.http.get(url).send().await.map_err(|e| {
      let kind = ErrorKind::from(e);
      warn!(path, kind = kind.code(), "tmdb: request failed");
      kind
    })?;
    let response = response.error_for_status().map_err(|e| {
      warn!(path, status = ?e.status(), "tmdb: non-success status");
      ErrorKind::TransportError
    })?;
    let bytes = response.bytes().await.map_err(ErrorKind::from)?;
    decode_body(&bytes)
  }

  fn credits_path(movie_id: i64) -> String {
    constants().credits_path.replace("{id}", &movie_id.to_string())
  }
}

#[async_trait]
impl CatalogClient for TmdbClient {
  async fn fetch_browse_page(&self, page: u32) -> Result<CatalogPage, ErrorKind> {
    let params = [("sort_by", constants().browse_sort.clone()), ("page", page.to_string())];
    let body = self.get_json(&constants().browse_path, &params).await?;
    parse_page(&body)
  }

  async fn fetch_search_page(&self, query: &str, page: u32) -> Result<CatalogPage, ErrorKind> {
    let params = [("query", query.to_string()), ("page", page.to_string())];
    let body = self.get_json(&constants().search_path, &params).await?;
    parse_page(&body)
  }

  async fn fetch_genres(&self) -> Result<GenreTable, ErrorKind> {
    let body = self.get_json(&constants().genre_path, &[]).await?;
    parse_genres(&body)
  }

  async fn fetch_cast(&self, movie_id: i64) -> Result<Vec<String>, ErrorKind> {
    let body = self.get_json(&Self::credits_path(movie_id), &[]).await?;
    parse_cast(&body)
  }

  async fn fetch_image_base_url(&self) -> Result<String, ErrorKind> {
    let body = self.get_json(&constants().configuration_path, &[]).await?;
    parse_image_base_url(&body)
  }
}
