use std::fmt::Display;
use std::sync::Arc;

/// A single frame of a reconstructed stack trace.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StackFrame {
  pub function: Option<Arc<str>>,
  pub source: Arc<str>,
  pub line: u32,
  pub col: u32,
}

impl Display for StackFrame {
  fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
    match &self.function {
      Some(function) => write!(f, "at {function} ({}:{}:{})", self.source, self.line, self.col),
      None => write!(f, "at {}:{}:{}", self.source, self.line, self.col),
    }
  }
}

/// Format stack frames into a stable stack trace string.
pub fn format_stack_trace(frames: &[StackFrame]) -> String {
  frames
    .iter()
    .map(ToString::to_string)
    .collect::<Vec<_>>()
    .join("\n")
}

/// Parses a host stack string of `function@source:line:col` lines.
///
/// An empty function name, or the host's `global code` marker, yields `function: None`. A line
/// without a position keeps `0:0`; one with a single number gets it as the line. Blank lines are
/// skipped.
pub fn parse_host_stack(stack: &str) -> Vec<StackFrame> {
  stack
    .lines()
    .map(str::trim)
    .filter(|line| !line.is_empty())
    .map(parse_frame)
    .collect()
}

fn parse_frame(line: &str) -> StackFrame {
  let (function, location) = match line.split_once('@') {
    Some((function, location)) => (function, location),
    None => ("", line),
  };
  let function = match function {
    "" | "global code" => None,
    name => Some(Arc::from(name)),
  };

  // The source name may itself contain colons (URLs), so peel the position off the right.
  let mut source = location;
  let mut suffixes = Vec::with_capacity(2);
  while suffixes.len() < 2 {
    let Some((rest, number)) = source.rsplit_once(':') else {
      break;
    };
    let Ok(number) = number.parse::<u32>() else {
      break;
    };
    suffixes.push(number);
    source = rest;
  }
  // Peeled right to left: `[col, line]`, or just `[line]`.
  let (line, col) = match suffixes[..] {
    [col, line] => (line, col),
    [line] => (line, 0),
    _ => (0, 0),
  };
  StackFrame {
    function,
    source: Arc::from(source),
    line,
    col,
  }
}
