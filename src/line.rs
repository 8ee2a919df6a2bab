//! Line-oriented reading for the text format drivers.
//!
//! Every [`Line`] remembers the byte offset at which it starts, which is what
//! the text drivers turn into bookmarks.

use std::io::BufRead;
use std::io::{self};

use crate::parse;
use crate::parse::Input;

/// The new line character.
const NEW_LINE: char = '\n';

/// The carriage return character.
const CARRIAGE_RETURN: char = '\r';

/// A line of text without its line terminator.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct Line {
    /// The byte offset of the first character of the line.
    pub offset: u64,

    /// The text.
    pub text: String,
}

impl Line {
    /// Whether the line holds only whitespace.
    pub fn is_blank(&self) -> bool {
        self.text.trim().is_empty()
    }
}

/// Reads [`Line`]s from an [`Input`] with one line of push-back.
#[derive(Debug)]
pub(crate) struct Lines {
    /// The input.
    input: Input,

    /// A line that was read and handed back.
    pending: Option<Line>,
}

impl Lines {
    /// Creates a line reader starting at the current position of `input`.
    pub fn new(input: Input) -> Self {
        Self {
            input,
            pending: None,
        }
    }

    /// Whether the underlying input can seek.
    pub fn is_seekable(&self) -> bool {
        self.input.is_seekable()
    }

    /// Gets the byte offset of the next line.
    pub fn position(&self) -> u64 {
        match &self.pending {
            Some(line) => line.offset,
            None => self.input.position(),
        }
    }

    /// Reads the next line, or [`None`] at the end of the input.
    pub fn next_line(&mut self) -> parse::Result<Option<Line>> {
        if let Some(line) = self.pending.take() {
            return Ok(Some(line));
        }

        let offset = self.input.position();
        let mut text = String::new();

        match read_line(&mut self.input, &mut text)? {
            0 => Ok(None),
            _ => Ok(Some(Line { offset, text })),
        }
    }

    /// Hands a line back so that the next call to
    /// [`next_line()`](Self::next_line) returns it again.
    pub fn push_back(&mut self, line: Line) {
        self.pending = Some(line);
    }

    /// Reads lines up to, but not including, the next line that starts with
    /// `marker`, consuming the marker line.
    ///
    /// Returns [`None`] if the input ends before the marker.
    pub fn read_until(&mut self, marker: &str) -> parse::Result<Option<Vec<String>>> {
        let mut lines = Vec::new();

        while let Some(line) = self.next_line()? {
            if line.text.starts_with(marker) {
                return Ok(Some(lines));
            }

            lines.push(line.text);
        }

        Ok(None)
    }

    /// Reads lines up to the next blank line (consumed) or the end of the
    /// input.
    pub fn read_until_blank(&mut self) -> parse::Result<Vec<String>> {
        let mut lines = Vec::new();

        while let Some(line) = self.next_line()? {
            if line.is_blank() {
                break;
            }

            lines.push(line.text);
        }

        Ok(lines)
    }
}

/// Reads a line from a buffered reader, stripping the line terminator.
fn read_line<T>(reader: &mut T, buffer: &mut String) -> io::Result<usize>
where
    T: BufRead,
{
    buffer.clear();

    match reader.read_line(buffer) {
        Ok(0) => Ok(0),
        Ok(n) => {
            if buffer.ends_with(NEW_LINE) {
                buffer.pop();

                if buffer.ends_with(CARRIAGE_RETURN) {
                    buffer.pop();
                }
            }

            Ok(n)
        }
        Err(e) => Err(e),
    }
}
