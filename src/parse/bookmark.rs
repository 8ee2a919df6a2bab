//! Parser state, bookmarks, and the control handed to visitors.

use crate::parse::Error;
use crate::parse::Format;
use crate::parse::Result;
use crate::parse::Unsupported;

////////////////////////////////////////////////////////////////////////////////////////
// State
////////////////////////////////////////////////////////////////////////////////////////

/// The position of a driver within its input.
///
/// Drivers thread this value through each parsing step instead of mutating
/// shared fields; a [`Bookmark`] is this value frozen at a record boundary.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct State {
    /// The byte offset.
    offset: u64,

    /// The zero-based index of the current top-level record.
    ordinal: u64,

    /// Whether parsing should continue.
    keep_parsing: bool,
}

impl State {
    /// The state at the very start of an input.
    pub fn start() -> Self {
        Self {
            offset: 0,
            ordinal: 0,
            keep_parsing: true,
        }
    }

    /// Gets the byte offset.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Gets the zero-based index of the current top-level record.
    pub fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Whether parsing should continue.
    pub fn keep_parsing(&self) -> bool {
        self.keep_parsing
    }

    /// Returns this state moved to `offset`.
    pub fn at(self, offset: u64) -> Self {
        Self { offset, ..self }
    }

    /// Returns this state moved on to the next top-level record, which
    /// begins at `offset`.
    pub fn next_record(self, offset: u64) -> Self {
        Self {
            offset,
            ordinal: self.ordinal + 1,
            ..self
        }
    }

    /// Returns this state with parsing stopped.
    pub fn halted(self) -> Self {
        Self {
            keep_parsing: false,
            ..self
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Bookmarks
////////////////////////////////////////////////////////////////////////////////////////

/// An opaque, resumable position issued by a driver.
///
/// A bookmark is only meaningful to a driver of the same format reading the
/// same bytes. It can be compared and hashed but its contents are private.
#[derive(Clone, Debug, Eq, Hash, PartialEq)]
pub struct Bookmark {
    /// The issuing format.
    format: Format,

    /// The byte offset of the start of the record.
    offset: u64,

    /// The zero-based index of the record.
    ordinal: u64,
}

impl Bookmark {
    /// Creates a bookmark without a parse pass, for drivers that can locate
    /// records from an index stored in the file itself.
    pub(crate) fn new(format: Format, offset: u64, ordinal: u64) -> Self {
        Self {
            format,
            offset,
            ordinal,
        }
    }

    /// Gets the byte offset of the record.
    pub(crate) fn offset(&self) -> u64 {
        self.offset
    }

    /// Gets the zero-based index of the record.
    pub(crate) fn ordinal(&self) -> u64 {
        self.ordinal
    }

    /// Gets the state to resume from, checking that this bookmark was issued
    /// by a `format` driver.
    pub(crate) fn resume(&self, format: Format) -> Result<State> {
        if self.format != format {
            return Err(Error::InvalidBookmark {
                expected: format,
                found: self.format,
            });
        }

        Ok(State {
            offset: self.offset,
            ordinal: self.ordinal,
            keep_parsing: true,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Control
////////////////////////////////////////////////////////////////////////////////////////

/// The capabilities offered to a visitor during a callback.
#[derive(Debug)]
pub struct Control {
    /// The format of the driver.
    format: Format,

    /// Whether the input can seek.
    seekable: bool,

    /// The state at the start of the current top-level record.
    record: State,

    /// Whether a visitor asked to stop.
    stopped: bool,
}

impl Control {
    /// Creates a control for a pass of a `format` driver.
    pub(crate) fn new(format: Format, seekable: bool) -> Self {
        Self {
            format,
            seekable,
            record: State::start(),
            stopped: false,
        }
    }

    /// Marks the start of a new top-level record.
    pub(crate) fn enter(&mut self, record: State) {
        self.record = record;
    }

    /// Folds a stop request into `state`.
    pub(crate) fn apply(&self, state: State) -> State {
        match self.stopped {
            true => state.halted(),
            false => state,
        }
    }

    /// Whether bookmarks can be created during this pass.
    pub fn can_create_bookmark(&self) -> bool {
        self.seekable
    }

    /// Creates a bookmark at the start of the current top-level record.
    ///
    /// Fails with [`Unsupported::Bookmarks`] when the input cannot seek.
    pub fn create_bookmark(&self) -> Result<Bookmark> {
        if !self.seekable {
            return Err(Unsupported::Bookmarks.into());
        }

        Ok(Bookmark {
            format: self.format,
            offset: self.record.offset,
            ordinal: self.record.ordinal,
        })
    }

    /// Gets the zero-based index of the current top-level record.
    pub fn ordinal(&self) -> u64 {
        self.record.ordinal
    }

    /// Asks the driver to stop once the current record is complete.
    pub fn stop_parsing(&mut self) {
        self.stopped = true;
    }

    /// Whether a stop was requested.
    pub fn is_stopped(&self) -> bool {
        self.stopped
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bookmarks_capture_the_record_start() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let mut control = Control::new(Format::Sff, true);
        control.enter(State::start().next_record(120));

        let bookmark = control.create_bookmark()?;
        assert_eq!(bookmark.offset(), 120);
        assert_eq!(bookmark.ordinal(), 1);

        let state = bookmark.resume(Format::Sff)?;
        assert_eq!(state.offset(), 120);
        assert!(state.keep_parsing());

        assert!(matches!(
            bookmark.resume(Format::Cas),
            Err(Error::InvalidBookmark { .. })
        ));

        Ok(())
    }

    #[test]
    fn streams_cannot_create_bookmarks() {
        let control = Control::new(Format::Ace, false);
        assert!(!control.can_create_bookmark());
        assert!(matches!(
            control.create_bookmark(),
            Err(Error::Unsupported(Unsupported::Bookmarks))
        ));
    }

    #[test]
    fn stopping_halts_the_state() {
        let mut control = Control::new(Format::Phd, true);
        let state = State::start();
        assert!(control.apply(state).keep_parsing());

        control.stop_parsing();
        assert!(!control.apply(state).keep_parsing());
    }
}
