use thiserror::Error;

/// Failure kinds surfaced by the catalog client.
///
/// Every kind is offered to the user for retry; `NetworkUnreachable` is kept
/// apart so the pager can stay quiet while the offline indicator is showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Error)]
pub enum ErrorKind {
  #[error("server returned an empty response")]
  EmptyResponse,
  #[error("server response is missing required fields")]
  MalformedResponse,
  #[error("network is unreachable")]
  NetworkUnreachable,
  #[error("transport error")]
  TransportError,
}

impl ErrorKind {
  pub const fn is_retryable(self) -> bool {
    true
  }

  /// Whether the failure came from the network rather than the payload.
  pub const fn is_connectivity(self) -> bool {
    matches!(self, Self::NetworkUnreachable | Self::TransportError)
  }

  pub const fn code(self) -> &'static str {
    match self {
      Self::EmptyResponse => "EMPTY_RESPONSE",
      Self::MalformedResponse => "MALFORMED_RESPONSE",
      Self::NetworkUnreachable => "NETWORK_UNREACHABLE",
      Self::TransportError => "TRANSPORT_ERROR",
    }
  }
}

impl From<reqwest::Error> for ErrorKind {
  fn from(err: reqwest::Error) -> Self {
    if err.is_connect() {
      Self::NetworkUnreachable
    } else if err.is_decode() {
      Self::MalformedResponse
    } else {
      Self::TransportError
    }
  }
}

impl From<serde_json::Error> for ErrorKind {
  fn from(_: serde_json::Error) -> Self {
    Self::MalformedResponse
  }
}
