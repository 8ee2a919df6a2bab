//! The resumable streaming-parse engine shared by every format driver.
//!
//! A driver walks its [`Source`] exactly once per call, invoking a visitor for
//! every record in file order. Every visitor callback receives a
//! [`Control`], through which the visitor can
//!
//! - request that parsing stop once the current record has been completed
//!   ([`Control::stop_parsing()`]), and
//! - ask for a [`Bookmark`] identifying the start of the current top-level
//!   record ([`Control::create_bookmark()`]).
//!
//! A bookmark can later be handed back to the same driver to resume parsing
//! at that record. Only drivers over seekable sources can create or consume
//! bookmarks.
//!
//! Callbacks that enter a sub-structure (a contig, a read, the matches
//! region) return a [`Visit`]: either [`Visit::Descend`] with a nested
//! visitor, or [`Visit::Skip`], in which case the driver advances past the
//! sub-structure without reporting its contents.

use std::io;

use crate::ace;
use crate::asm;
use crate::cas;
use crate::phd;
use crate::sff;

pub mod bookmark;
pub mod source;

pub use bookmark::Bookmark;
pub use bookmark::Control;
pub use bookmark::State;
pub use source::Input;
pub use source::Source;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// The input does not follow the grammar of its format.
#[derive(Debug)]
pub enum Malformed {
    /// The input ended in the middle of a structure.
    Truncated,

    /// The input is not valid UTF-8 where text is required.
    Encoding(String),

    /// A binary alignment (CAS) grammar error.
    Cas(cas::ParseError),

    /// A flow-sequencing (SFF) grammar error.
    Sff(sff::ParseError),

    /// An ACE grammar error.
    Ace(ace::ParseError),

    /// A PHD grammar error.
    Phd(phd::ParseError),

    /// An ASM grammar error.
    Asm(asm::ParseError),
}

impl std::fmt::Display for Malformed {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Malformed::Truncated => write!(f, "the input ended abruptly"),
            Malformed::Encoding(err) => write!(f, "invalid text encoding: {err}"),
            Malformed::Cas(err) => write!(f, "cas: {err}"),
            Malformed::Sff(err) => write!(f, "sff: {err}"),
            Malformed::Ace(err) => write!(f, "ace: {err}"),
            Malformed::Phd(err) => write!(f, "phd: {err}"),
            Malformed::Asm(err) => write!(f, "asm: {err}"),
        }
    }
}

impl std::error::Error for Malformed {}

/// An operation the driver or its source is not capable of.
#[derive(Debug, Eq, PartialEq)]
pub enum Unsupported {
    /// The source cannot seek, so bookmarks can be neither created nor
    /// resumed.
    Bookmarks,

    /// A one-shot stream was already consumed by an earlier pass.
    StreamConsumed,
}

impl std::fmt::Display for Unsupported {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Unsupported::Bookmarks => write!(f, "bookmarks require a seekable source"),
            Unsupported::StreamConsumed => {
                write!(f, "the one-shot stream was already consumed")
            }
        }
    }
}

impl std::error::Error for Unsupported {}

/// An error related to a parse pass.
#[derive(Debug)]
pub enum Error {
    /// An I/O error other than truncation.
    Io(io::Error),

    /// The input is malformed.
    Malformed(Malformed),

    /// The operation is not supported by this driver instance.
    Unsupported(Unsupported),

    /// A bookmark issued by one format was handed to another.
    InvalidBookmark {
        /// The format of the driver.
        expected: Format,

        /// The format that issued the bookmark.
        found: Format,
    },

    /// A visitor failed while handling a callback.
    Visitor(Box<dyn std::error::Error + Send + Sync>),
}

impl Error {
    /// Wraps an error raised by a visitor.
    pub fn visitor(err: impl Into<Box<dyn std::error::Error + Send + Sync>>) -> Self {
        Error::Visitor(err.into())
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Io(err) => write!(f, "i/o error: {err}"),
            Error::Malformed(err) => write!(f, "malformed input: {err}"),
            Error::Unsupported(err) => write!(f, "unsupported operation: {err}"),
            Error::InvalidBookmark { expected, found } => write!(
                f,
                "invalid bookmark: issued by the {found} driver, not the {expected} driver"
            ),
            Error::Visitor(err) => write!(f, "visitor error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        match err.kind() {
            io::ErrorKind::UnexpectedEof => Error::Malformed(Malformed::Truncated),
            io::ErrorKind::InvalidData => Error::Malformed(Malformed::Encoding(err.to_string())),
            _ => Error::Io(err),
        }
    }
}

impl From<Malformed> for Error {
    fn from(err: Malformed) -> Self {
        Error::Malformed(err)
    }
}

impl From<Unsupported> for Error {
    fn from(err: Unsupported) -> Self {
        Error::Unsupported(err)
    }
}

/// A [`Result`](std::result::Result) with an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Formats, outcomes and continuations
////////////////////////////////////////////////////////////////////////////////////////

/// A file format understood by a driver.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Format {
    /// The binary alignment format.
    Cas,

    /// The flow-sequencing format.
    Sff,

    /// The ACE contig format.
    Ace,

    /// The PHD basecall format.
    Phd,

    /// The ASM message format.
    Asm,
}

impl std::fmt::Display for Format {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Format::Cas => write!(f, "cas"),
            Format::Sff => write!(f, "sff"),
            Format::Ace => write!(f, "ace"),
            Format::Phd => write!(f, "phd"),
            Format::Asm => write!(f, "asm"),
        }
    }
}

/// How a parse pass finished.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Outcome {
    /// The end of the input was reached.
    Ended,

    /// A visitor requested that parsing stop.
    Halted,
}

impl Outcome {
    /// Gets the outcome of a pass that finished in `state`.
    pub(crate) fn of(state: State) -> Self {
        match state.keep_parsing() {
            true => Outcome::Ended,
            false => Outcome::Halted,
        }
    }
}

/// The continuation returned when a driver enters a sub-structure.
#[derive(Debug)]
pub enum Visit<V> {
    /// Descend into the sub-structure, reporting its contents to `V`.
    Descend(V),

    /// Skip the sub-structure entirely.
    Skip,
}

impl<V> Visit<V> {
    /// Descends with `visitor` if it is present and skips otherwise.
    pub fn from_option(visitor: Option<V>) -> Self {
        match visitor {
            Some(visitor) => Visit::Descend(visitor),
            None => Visit::Skip,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn truncation_is_malformed_input() {
        let err = Error::from(io::Error::from(io::ErrorKind::UnexpectedEof));
        assert!(matches!(err, Error::Malformed(Malformed::Truncated)));
        assert_eq!(err.to_string(), "malformed input: the input ended abruptly");

        let err = Error::from(io::Error::from(io::ErrorKind::PermissionDenied));
        assert!(matches!(err, Error::Io(_)));
    }

    #[test]
    fn invalid_bookmarks_name_both_formats() {
        let err = Error::InvalidBookmark {
            expected: Format::Ace,
            found: Format::Cas,
        };

        assert_eq!(
            err.to_string(),
            "invalid bookmark: issued by the cas driver, not the ace driver"
        );
    }
}
