//! Random-access datastores over files too large to hold in memory.
//!
//! An [`Indexed`] datastore performs one indexing pass over its source,
//! recording a [`Bookmark`] for every record whose id passes a filter. Each
//! [`Indexed::get()`] then resumes a fresh pass at that bookmark and
//! materializes exactly one record, so memory grows with the number of
//! records rather than the size of the file.
//!
//! ```
//! use assemblyfile::datastore::Indexed;
//! use assemblyfile::parse::Source;
//! use assemblyfile::phd;
//!
//! let data = b"BEGIN_SEQUENCE read1\nBEGIN_DNA\na 20 1\nc 30 12\nEND_DNA\nEND_SEQUENCE\n\
//! BEGIN_SEQUENCE read2\nBEGIN_DNA\ng 40 1\nEND_DNA\nEND_SEQUENCE\n";
//!
//! let store = Indexed::build(phd::Parser::new(Source::bytes(&data[..])))?;
//! assert_eq!(store.len()?, 2);
//!
//! let read = store.get(&String::from("read2"))?.unwrap();
//! assert_eq!(read.basecalls().to_string(), "G");
//! assert!(store.get(&String::from("read3"))?.is_none());
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::fmt::Debug;
use std::hash::Hash;
use std::sync::atomic::AtomicBool;
use std::sync::atomic::Ordering;

use indexmap::IndexMap;
use tracing::debug;

use crate::parse;
use crate::parse::Bookmark;
use crate::parse::Unsupported;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to an [`Indexed`] datastore.
#[derive(Debug)]
pub enum Error {
    /// The datastore was closed.
    Closed,

    /// A parse pass failed.
    Parse(parse::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Closed => write!(f, "the datastore is closed"),
            Error::Parse(err) => write!(f, "parse error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<parse::Error> for Error {
    fn from(err: parse::Error) -> Self {
        Error::Parse(err)
    }
}

/// A [`Result`](std::result::Result) with an [`Error`].
pub type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Drivers
////////////////////////////////////////////////////////////////////////////////////////

/// A format driver that can be indexed.
pub trait Driver {
    /// The id of a top-level record.
    type Id: Clone + Debug + Eq + Hash;

    /// A fully materialized record.
    type Record;

    /// Whether the driver's source can seek.
    fn can_create_bookmark(&self) -> bool;

    /// Runs one pass, recording a bookmark for every record whose id passes
    /// `filter`, in file order.
    fn index(
        &self,
        filter: &mut dyn FnMut(&Self::Id) -> bool,
    ) -> parse::Result<IndexMap<Self::Id, Bookmark>>;

    /// Materializes the record `id` found at `bookmark`.
    fn fetch(&self, id: &Self::Id, bookmark: &Bookmark) -> parse::Result<Self::Record>;

    /// Runs one pass that hands every record to `visit` in file order, until
    /// `visit` returns `false`.
    ///
    /// No bookmarks are created, so this also works on sources that cannot
    /// seek, such as gzip-compressed files.
    fn scan(&self, visit: &mut dyn FnMut(Self::Id, Self::Record) -> bool) -> parse::Result<()>;
}

////////////////////////////////////////////////////////////////////////////////////////
// Indexed datastores
////////////////////////////////////////////////////////////////////////////////////////

/// A datastore holding one bookmark per record.
///
/// The index is read-only once built, so [`get()`](Self::get) may be called
/// from several threads at once; each call opens its own input.
#[derive(Debug)]
pub struct Indexed<D: Driver> {
    /// The driver.
    driver: D,

    /// The bookmark of every indexed record, in file order.
    index: IndexMap<D::Id, Bookmark>,

    /// Whether the datastore was closed.
    closed: AtomicBool,
}

impl<D: Driver> Indexed<D> {
    /// Builds a datastore over every record of `driver`.
    pub fn build(driver: D) -> Result<Self> {
        Self::build_with_filter(driver, |_| true)
    }

    /// Builds a datastore over the records of `driver` whose ids pass
    /// `filter`.
    ///
    /// Fails with [`Unsupported::Bookmarks`] before reading anything when the
    /// driver's source cannot seek.
    pub fn build_with_filter(driver: D, mut filter: impl FnMut(&D::Id) -> bool) -> Result<Self> {
        if !driver.can_create_bookmark() {
            return Err(parse::Error::from(Unsupported::Bookmarks).into());
        }

        let index = driver.index(&mut filter)?;
        debug!("indexed {} records", index.len());

        Ok(Self {
            driver,
            index,
            closed: AtomicBool::new(false),
        })
    }

    /// Fails with [`Error::Closed`] once the datastore is closed.
    fn ensure_open(&self) -> Result<()> {
        match self.closed.load(Ordering::Acquire) {
            true => Err(Error::Closed),
            false => Ok(()),
        }
    }

    /// Materializes the record `id`, or returns [`None`] when it was not
    /// indexed.
    pub fn get(&self, id: &D::Id) -> Result<Option<D::Record>> {
        self.ensure_open()?;

        match self.index.get(id) {
            Some(bookmark) => Ok(Some(self.driver.fetch(id, bookmark)?)),
            None => Ok(None),
        }
    }

    /// Whether the record `id` was indexed.
    pub fn contains(&self, id: &D::Id) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.index.contains_key(id))
    }

    /// Gets the ids of every indexed record, in file order.
    pub fn ids(&self) -> Result<impl Iterator<Item = &D::Id> + '_> {
        self.ensure_open()?;
        Ok(self.index.keys())
    }

    /// Lazily materializes every indexed record, in file order.
    ///
    /// Closing the datastore mid-iteration makes the remaining items fail.
    pub fn iter(&self) -> Result<impl Iterator<Item = Result<(&D::Id, D::Record)>> + '_> {
        self.ensure_open()?;

        Ok(self.index.iter().map(move |(id, bookmark)| -> Result<_> {
            self.ensure_open()?;
            let record = self.driver.fetch(id, bookmark)?;
            Ok((id, record))
        }))
    }

    /// Gets the number of indexed records.
    pub fn len(&self) -> Result<usize> {
        self.ensure_open()?;
        Ok(self.index.len())
    }

    /// Whether no records were indexed.
    pub fn is_empty(&self) -> Result<bool> {
        self.ensure_open()?;
        Ok(self.index.is_empty())
    }

    /// Closes the datastore. Every later operation fails with
    /// [`Error::Closed`].
    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
    }

    /// Whether the datastore was closed.
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    /// Gets the driver.
    pub fn driver(&self) -> &D {
        &self.driver
    }
}

#[cfg(test)]
mod tests {
    use std::fs::File;
    use std::io::Write as _;

    use flate2::write::GzEncoder;
    use flate2::Compression;
    use tempdir::TempDir;

    use super::*;
    use crate::parse::Source;
    use crate::phd;

    /// Two reads in one PHD ball.
    const BALL: &[u8] = b"BEGIN_SEQUENCE first\n\
BEGIN_DNA\n\
a 10 1\n\
END_DNA\n\
END_SEQUENCE\n\
BEGIN_SEQUENCE second\n\
BEGIN_DNA\n\
c 20 1\n\
t 20 9\n\
END_DNA\n\
END_SEQUENCE\n";

    #[test]
    fn filters_decide_what_is_indexed() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let driver = phd::Parser::new(Source::bytes(BALL));
        let store = Indexed::build_with_filter(driver, |id: &String| id.starts_with('s'))?;

        assert_eq!(store.len()?, 1);
        assert!(!store.contains(&String::from("first"))?);
        assert!(store.get(&String::from("first"))?.is_none());
        assert_eq!(
            store.ids()?.cloned().collect::<Vec<_>>(),
            vec![String::from("second")]
        );

        Ok(())
    }

    #[test]
    fn iteration_follows_file_order() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let store = Indexed::build(phd::Parser::new(Source::bytes(BALL)))?;

        let ids = store
            .iter()?
            .map(|result| result.map(|(id, read)| (id.clone(), read.basecalls().len())))
            .collect::<Result<Vec<_>>>()?;

        assert_eq!(
            ids,
            vec![(String::from("first"), 1), (String::from("second"), 2)]
        );

        Ok(())
    }

    #[test]
    fn closed_datastores_refuse_every_operation(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let store = Indexed::build(phd::Parser::new(Source::bytes(BALL)))?;
        store.close();

        assert!(store.is_closed());
        assert!(matches!(store.len(), Err(Error::Closed)));
        assert!(matches!(store.get(&String::from("first")), Err(Error::Closed)));
        assert!(matches!(store.contains(&String::from("first")), Err(Error::Closed)));
        assert!(store.ids().is_err());
        assert!(store.iter().is_err());

        Ok(())
    }

    #[test]
    fn streams_cannot_be_indexed() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let driver = phd::Parser::new(Source::once(BALL));
        let Err(err) = Indexed::build(driver) else {
            return Err("a stream was indexed".into());
        };

        assert!(matches!(
            err,
            Error::Parse(parse::Error::Unsupported(Unsupported::Bookmarks))
        ));

        Ok(())
    }

    #[test]
    fn gzip_files_are_scanned_in_one_pass() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let directory = TempDir::new("assemblyfile")?;
        let path = directory.path().join("reads.phd.gz");

        let mut encoder = GzEncoder::new(File::create(&path)?, Compression::default());
        encoder.write_all(BALL)?;
        encoder.finish()?;

        let driver = phd::Parser::new(Source::from_path(&path));
        assert!(!Driver::can_create_bookmark(&driver));

        let mut reads = Vec::new();
        driver.scan(&mut |id, read| {
            reads.push((id, read.basecalls().len()));
            true
        })?;
        assert_eq!(
            reads,
            vec![(String::from("first"), 1), (String::from("second"), 2)]
        );

        let mut visited = Vec::new();
        driver.scan(&mut |id, _| {
            visited.push(id);
            false
        })?;
        assert_eq!(visited, vec![String::from("first")]);

        Ok(())
    }
}
