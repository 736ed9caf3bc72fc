/// A pager command typed by the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
  /// Reveal the next screen of rows (Enter).
  Scroll,
  Search(String),
  Voice,
  /// Cancel the voice capture if one is running, otherwise leave search mode.
  Cancel,
  Retry,
  /// Details for the 1-based row number.
  Info(usize),
  Genres,
  Help,
  Quit,
  Unknown(String),
}

pub const HELP: &str = "\
  <Enter>, n     next rows
  /TEXT, s TEXT  search titles
  v              voice search
  x              cancel voice capture / back to popular movies
  r              retry after a communication error
  i N            details and cast for row N
  g              list genres
  h              this help
  q              quit";

/// Parse one input line.
pub fn parse_command(line: &str) -> Command {
  let line = line.trim();
  if let Some(query) = line.strip_prefix('/') {
    return Command::Search(query.trim().to_string());
  }
  let (word, rest) = match line.split_once(char::is_whitespace) {
    Some((word, rest)) => (word, rest.trim()),
    None => (line, ""),
  };
  match word.to_lowercase().as_str() {
    "" | "n" | "more" => Command::Scroll,
    "s" | "search" => Command::Search(rest.to_string()),
    "v" | "voice" => Command::Voice,
    "x" | "cancel" => Command::Cancel,
    "r" | "retry" => Command::Retry,
    "i" | "info" => match rest.parse::<usize>() {
      Ok(row) if row > 0 => Command::Info(row),
      _ => Command::Unknown(line.to_string()),
    },
    "g" | "genres" => Command::Genres,
    "h" | "help" | "?" => Command::Help,
    "q" | "quit" | "exit" => Command::Quit,
    _ => Command::Unknown(line.to_string()),
  }
}
