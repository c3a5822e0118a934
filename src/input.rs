use anyhow::{bail, Context, Result};
use camino::Utf8PathBuf;
use std::fmt;
use std::fs::File;
use std::io::{self, BufRead, BufReader};

use crate::enrich::Event;

/// A source that can be either a file or stdin.
#[derive(Default, Clone, Debug, PartialEq, Eq)]
pub enum FileOrStdin {
    /// Input from a file.
    File(Utf8PathBuf),
    /// Input from stdin.
    #[default]
    Stdin,
}

impl fmt::Display for FileOrStdin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileOrStdin::File(path) => write!(f, "{}", path),
            FileOrStdin::Stdin => write!(f, "<stdin>"),
        }
    }
}

impl FileOrStdin {
    /// Create a new FileOrStdin from a path.
    ///
    /// If the path is "-", stdin is used.
    pub fn from_path(path: Utf8PathBuf) -> Self {
        if path.as_str() == "-" {
            FileOrStdin::Stdin
        } else {
            FileOrStdin::File(path)
        }
    }

    /// Open the input source as a reader.
    pub fn reader(&self) -> Result<InputReader> {
        let inner = match self {
            FileOrStdin::File(path) => {
                let file =
                    File::open(path).with_context(|| format!("failed to open file: {}", path))?;
                Reader::File(BufReader::new(file))
            }
            FileOrStdin::Stdin => Reader::Stdin(BufReader::new(io::stdin())),
        };
        Ok(InputReader {
            source: self.clone(),
            inner,
        })
    }
}

enum Reader {
    File(BufReader<File>),
    Stdin(BufReader<io::Stdin>),
}

/// A reader of newline-delimited JSON events from either a file or stdin.
pub struct InputReader {
    source: FileOrStdin,
    inner: Reader,
}

impl InputReader {
    /// Process each byte line from the input, with its 1-based line number.
    ///
    /// The trailing `\n` (and `\r`) is stripped. If `f` returns `Ok(false)`,
    /// processing stops.
    pub fn for_byte_line<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(usize, &[u8]) -> Result<bool>,
    {
        let mut buf = Vec::with_capacity(1024);
        let mut line_number = 0;
        loop {
            buf.clear();
            let n = match self.inner {
                Reader::File(ref mut rdr) => rdr.read_until(b'\n', &mut buf),
                Reader::Stdin(ref mut rdr) => rdr.read_until(b'\n', &mut buf),
            };
            let n = n.with_context(|| format!("failed to read from {}", self.source))?;
            if n == 0 {
                break;
            }
            line_number += 1;
            let content = buf
                .strip_suffix(b"\n")
                .map(|line| line.strip_suffix(b"\r").unwrap_or(line))
                .unwrap_or(&buf[..]);
            if !f(line_number, content)? {
                break;
            }
        }
        Ok(())
    }

    /// Process each event. Blank lines are skipped; anything else that is not
    /// a JSON object is an error naming the source and line.
    pub fn for_each_event<F>(&mut self, mut f: F) -> Result<()>
    where
        F: FnMut(Event) -> Result<bool>,
    {
        let source = self.source.clone();
        self.for_byte_line(|line_number, line| {
            if line.iter().all(u8::is_ascii_whitespace) {
                return Ok(true);
            }
            let event = parse_event(line)
                .with_context(|| format!("{}:{}: invalid event", source, line_number))?;
            f(event)
        })
    }
}

fn parse_event(line: &[u8]) -> Result<Event> {
    match serde_json::from_slice(line)? {
        serde_json::Value::Object(event) => Ok(event),
        other => bail!("expected a JSON object, got {}", json_kind(&other)),
    }
}

fn json_kind(value: &serde_json::Value) -> &'static str {
    match value {
        serde_json::Value::Null => "null",
        serde_json::Value::Bool(_) => "a boolean",
        serde_json::Value::Number(_) => "a number",
        serde_json::Value::String(_) => "a string",
        serde_json::Value::Array(_) => "an array",
        serde_json::Value::Object(_) => "an object",
    }
}
