//! Sources of bytes for the format drivers.
//!
//! A [`Source`] describes where the bytes come from; every parse pass calls
//! [`Source::open()`] to obtain a fresh [`Input`] that is dropped (and its
//! handle released) when the pass returns, whether it ends, halts, fails, or
//! unwinds out of a visitor.

use std::fs::File;
use std::io;
use std::io::BufRead;
use std::io::BufReader;
use std::io::Cursor;
use std::io::Read;
use std::io::Seek;
use std::io::SeekFrom;
use std::path::Path;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::Mutex;

use flate2::read::MultiGzDecoder;

use crate::parse::Result;
use crate::parse::Unsupported;

/// A buffered reader that can also seek.
pub trait SeekRead: BufRead + Seek + Send {}

impl<T> SeekRead for T where T: BufRead + Seek + Send {}

////////////////////////////////////////////////////////////////////////////////////////
// Sources
////////////////////////////////////////////////////////////////////////////////////////

/// Where a driver reads its bytes from.
pub enum Source {
    /// A file on disk. Seekable.
    File(PathBuf),

    /// A gzip-compressed file on disk. Not seekable.
    Gzip(PathBuf),

    /// Bytes held in memory. Seekable.
    Bytes(Arc<[u8]>),

    /// A stream that can be read exactly once. Not seekable.
    Once(Mutex<Option<Box<dyn BufRead + Send>>>),
}

impl Source {
    /// Creates a seekable source over a file.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Source::File(path.into())
    }

    /// Creates a non-seekable source over a gzip-compressed file.
    pub fn gzip(path: impl Into<PathBuf>) -> Self {
        Source::Gzip(path.into())
    }

    /// Creates a seekable source over bytes in memory.
    pub fn bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        Source::Bytes(bytes.into())
    }

    /// Creates a non-seekable source that can be parsed once.
    pub fn once(reader: impl BufRead + Send + 'static) -> Self {
        Source::Once(Mutex::new(Some(Box::new(reader))))
    }

    /// Creates a source for `path`, choosing [`Source::Gzip`] when the file
    /// name ends in `.gz`.
    pub fn from_path(path: impl AsRef<Path>) -> Self {
        let path = path.as_ref();

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("gz") => Source::gzip(path),
            _ => Source::file(path),
        }
    }

    /// Whether inputs opened from this source can seek.
    pub fn is_seekable(&self) -> bool {
        matches!(self, Source::File(_) | Source::Bytes(_))
    }

    /// Opens a fresh [`Input`] positioned at the start of the source.
    pub fn open(&self) -> Result<Input> {
        let inner = match self {
            Source::File(path) => Inner::Seekable(Box::new(BufReader::new(File::open(path)?))),
            Source::Gzip(path) => Inner::Stream(Box::new(BufReader::new(MultiGzDecoder::new(
                File::open(path)?,
            )))),
            Source::Bytes(bytes) => Inner::Seekable(Box::new(Cursor::new(bytes.clone()))),
            Source::Once(stream) => {
                let reader = stream
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .take()
                    .ok_or(Unsupported::StreamConsumed)?;
                Inner::Stream(reader)
            }
        };

        Ok(Input { inner, position: 0 })
    }
}

impl std::fmt::Debug for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Source::File(path) => f.debug_tuple("File").field(path).finish(),
            Source::Gzip(path) => f.debug_tuple("Gzip").field(path).finish(),
            Source::Bytes(bytes) => write!(f, "Bytes({} bytes)", bytes.len()),
            Source::Once(_) => write!(f, "Once"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Inputs
////////////////////////////////////////////////////////////////////////////////////////

/// The reader behind an [`Input`].
enum Inner {
    /// A reader that can seek.
    Seekable(Box<dyn SeekRead>),

    /// A forward-only reader.
    Stream(Box<dyn BufRead + Send>),
}

/// An open, buffered input that tracks its byte position.
pub struct Input {
    /// The reader.
    inner: Inner,

    /// The number of bytes consumed since the start of the source.
    position: u64,
}

impl Input {
    /// Gets the byte offset of the next unread byte.
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Whether this input can seek.
    pub fn is_seekable(&self) -> bool {
        matches!(self.inner, Inner::Seekable(_))
    }

    /// Moves to the absolute byte `offset`.
    ///
    /// Forward-only inputs fail with [`Unsupported::Bookmarks`].
    pub fn seek_to(&mut self, offset: u64) -> Result<()> {
        match &mut self.inner {
            Inner::Seekable(reader) => {
                reader.seek(SeekFrom::Start(offset))?;
                self.position = offset;
                Ok(())
            }
            Inner::Stream(_) => Err(Unsupported::Bookmarks.into()),
        }
    }

    /// Moves forward to the absolute byte `offset`, reading and discarding
    /// bytes when the input cannot seek.
    pub fn advance_to(&mut self, offset: u64) -> Result<()> {
        if offset < self.position {
            return Err(Unsupported::Bookmarks.into());
        }

        match self.inner {
            Inner::Seekable(_) => self.seek_to(offset),
            Inner::Stream(_) => {
                let remaining = offset - self.position;
                crate::binary::skip(self, remaining)?;
                Ok(())
            }
        }
    }

    /// Whether every byte has been consumed.
    pub fn is_at_end(&mut self) -> Result<bool> {
        Ok(self.fill_buf()?.is_empty())
    }
}

impl Read for Input {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = match &mut self.inner {
            Inner::Seekable(reader) => reader.read(buf)?,
            Inner::Stream(reader) => reader.read(buf)?,
        };

        self.position += n as u64;
        Ok(n)
    }
}

impl BufRead for Input {
    fn fill_buf(&mut self) -> io::Result<&[u8]> {
        match &mut self.inner {
            Inner::Seekable(reader) => reader.fill_buf(),
            Inner::Stream(reader) => reader.fill_buf(),
        }
    }

    fn consume(&mut self, amt: usize) {
        match &mut self.inner {
            Inner::Seekable(reader) => reader.consume(amt),
            Inner::Stream(reader) => reader.consume(amt),
        }

        self.position += amt as u64;
    }
}

impl std::fmt::Debug for Input {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Input")
            .field("seekable", &self.is_seekable())
            .field("position", &self.position)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::io::Write as _;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempdir::TempDir;

    use super::*;
    use crate::parse::Error;

    #[test]
    fn inputs_track_their_position() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let source = Source::bytes(&b"hello\nworld\n"[..]);
        let mut input = source.open()?;

        let mut line = String::new();
        input.read_line(&mut line)?;
        assert_eq!(input.position(), 6);

        input.seek_to(0)?;
        assert_eq!(input.position(), 0);

        input.advance_to(11)?;
        let mut rest = String::new();
        input.read_to_string(&mut rest)?;
        assert_eq!(rest, "\n");
        assert!(input.is_at_end()?);

        Ok(())
    }

    #[test]
    fn one_shot_streams_open_once() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let source = Source::once(&b"data"[..]);
        assert!(!source.is_seekable());

        let mut input = source.open()?;
        assert!(matches!(
            input.seek_to(0),
            Err(Error::Unsupported(Unsupported::Bookmarks))
        ));

        input.advance_to(2)?;
        assert_eq!(input.position(), 2);

        assert!(matches!(
            source.open(),
            Err(Error::Unsupported(Unsupported::StreamConsumed))
        ));

        Ok(())
    }

    #[test]
    fn gzip_files_are_streams() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let directory = TempDir::new("assemblyfile")?;
        let path = directory.path().join("reads.ace.gz");

        let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        encoder.write_all(b"AS 0 0\n")?;
        encoder.finish()?;

        let source = Source::from_path(&path);
        assert!(!source.is_seekable());

        let mut text = String::new();
        source.open()?.read_to_string(&mut text)?;
        assert_eq!(text, "AS 0 0\n");

        Ok(())
    }
}
