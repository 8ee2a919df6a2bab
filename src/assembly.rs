//! Contigs assembled from a consensus and the reads placed against it.
//!
//! A [`Builder`] is generic over the read type of a particular format: it is
//! handed a decoding function that turns one format-specific read into a
//! [`Layout`] (the read's gapped bases in consensus orientation and where
//! they land on the consensus). Every placed read is stored as a
//! [`ReferenceDeltaSequence`] against the shared consensus.
//!
//! ```
//! use assemblyfile::assembly::Builder;
//! use assemblyfile::assembly::Direction;
//! use assemblyfile::assembly::Layout;
//! use assemblyfile::nucleotide::NucleotideSequence;
//! use assemblyfile::Range;
//!
//! let decode = |(id, offset, bases): (&str, i64, &str)| {
//!     Ok::<_, Box<dyn std::error::Error + Send + Sync>>(Layout {
//!         id: id.to_string(),
//!         direction: Direction::Forward,
//!         offset,
//!         gapped: bases.parse()?,
//!         valid_range: Range::of_length(0, bases.len() as u64)?,
//!     })
//! };
//!
//! let contig = Builder::new("contig1", "ACGTACGTAC".parse::<NucleotideSequence>()?, decode)
//!     .push_read(("read1", 0, "ACGTA"))?
//!     .push_read(("read2", 4, "ACTTAC"))?
//!     .try_build()?;
//!
//! assert_eq!(contig.reads().len(), 2);
//! assert_eq!(contig.reads_overlapping(&Range::try_new(0, 2)?).len(), 1);
//! assert_eq!(contig.read("read2").unwrap().sequence().to_string(), "ACTTAC");
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::HashSet;
use std::marker::PhantomData;
use std::str::FromStr;
use std::sync::Arc;

use rust_lapper as lapper;

use crate::delta;
use crate::delta::ReferenceDeltaSequence;
use crate::nucleotide::NucleotideSequence;
use crate::range;
use crate::range::Cache;
use crate::Range;

/// The interval type of the read overlap index.
type Iv = lapper::Interval<u64, usize>;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to a [`Builder`].
#[derive(Debug)]
pub enum Error {
    /// The format-specific decoding function failed.
    Decode(Box<dyn std::error::Error + Send + Sync>),

    /// Two reads share an id.
    DuplicateRead(String),

    /// A read does not overlap the consensus at all.
    OutsideConsensus(String),

    /// A read could not be encoded against the consensus.
    Delta(delta::Error),

    /// A read placement is not a valid range.
    Range(range::Error),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::Decode(err) => write!(f, "read decoding error: {err}"),
            Error::DuplicateRead(id) => write!(f, "duplicate read: {id}"),
            Error::OutsideConsensus(id) => {
                write!(f, "read {id} does not overlap the consensus")
            }
            Error::Delta(err) => write!(f, "delta encoding error: {err}"),
            Error::Range(err) => write!(f, "range error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Directions
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to the parsing of a [`Direction`].
#[derive(Debug, Eq, PartialEq)]
pub struct ParseDirectionError(String);

impl std::fmt::Display for ParseDirectionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} is not a valid direction", self.0)
    }
}

impl std::error::Error for ParseDirectionError {}

/// The orientation of a read relative to the consensus.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum Direction {
    /// Same orientation as the consensus (`U` or `+`).
    Forward,

    /// Reverse-complemented (`C` or `-`).
    Reverse,
}

impl FromStr for Direction {
    type Err = ParseDirectionError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s {
            "U" | "+" => Ok(Direction::Forward),
            "C" | "-" => Ok(Direction::Reverse),
            other => Err(ParseDirectionError(other.to_string())),
        }
    }
}

impl std::fmt::Display for Direction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Direction::Forward => write!(f, "+"),
            Direction::Reverse => write!(f, "-"),
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Reads
////////////////////////////////////////////////////////////////////////////////////////

/// A read as decoded by a format-specific function, before it is placed.
#[derive(Clone, Debug)]
pub struct Layout {
    /// The read id.
    pub id: String,

    /// The orientation of the read.
    pub direction: Direction,

    /// The consensus offset of the first symbol of `gapped`. May be negative
    /// when the read hangs off the start of the consensus.
    pub offset: i64,

    /// The aligned, gapped symbols in consensus orientation.
    pub gapped: NucleotideSequence,

    /// The high-quality portion of the read, in read coordinates.
    pub valid_range: Range,
}

/// A read placed on a consensus.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct PlacedRead {
    /// The read id.
    id: String,

    /// The orientation of the read.
    direction: Direction,

    /// The consensus range the read covers.
    range: Arc<Range>,

    /// The high-quality portion of the read, in read coordinates.
    valid_range: Arc<Range>,

    /// The gapped symbols.
    sequence: ReferenceDeltaSequence,
}

impl PlacedRead {
    /// Gets the read id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Gets the orientation.
    pub fn direction(&self) -> Direction {
        self.direction
    }

    /// Gets the consensus offset of the first symbol.
    pub fn offset(&self) -> i64 {
        self.range.start()
    }

    /// Gets the consensus range the read covers.
    pub fn consensus_range(&self) -> Range {
        *self.range
    }

    /// Gets the high-quality portion of the read in read coordinates.
    pub fn valid_range(&self) -> Range {
        *self.valid_range
    }

    /// Gets the gapped symbols.
    pub fn sequence(&self) -> &ReferenceDeltaSequence {
        &self.sequence
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Contigs
////////////////////////////////////////////////////////////////////////////////////////

/// A consensus sequence and the reads placed against it.
#[derive(Debug)]
pub struct Contig {
    /// The contig id.
    id: String,

    /// The gapped consensus.
    consensus: Arc<NucleotideSequence>,

    /// The placed reads in the order they were pushed.
    reads: Vec<PlacedRead>,

    /// Half-open consensus intervals mapping to indexes into `reads`.
    index: lapper::Lapper<u64, usize>,
}

impl Contig {
    /// Gets the contig id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Gets the gapped consensus.
    pub fn consensus(&self) -> &Arc<NucleotideSequence> {
        &self.consensus
    }

    /// Gets the placed reads in the order they were added.
    pub fn reads(&self) -> &[PlacedRead] {
        &self.reads
    }

    /// Gets the read with the given `id`.
    pub fn read(&self, id: &str) -> Option<&PlacedRead> {
        self.reads.iter().find(|read| read.id == id)
    }

    /// Gets every read that covers at least one position of `range`, in the
    /// order they were added.
    pub fn reads_overlapping(&self, range: &Range) -> Vec<&PlacedRead> {
        if range.is_empty() {
            return Vec::new();
        }

        let start = range.start().max(0) as u64;
        let stop = range.end().saturating_add(1).max(0) as u64;

        if stop <= start {
            return Vec::new();
        }

        let mut hits = self
            .index
            .find(start, stop)
            .map(|interval| interval.val)
            .collect::<Vec<_>>();
        hits.sort_unstable();

        hits.into_iter().map(|i| &self.reads[i]).collect()
    }
}

impl PartialEq for Contig {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id && self.consensus == other.consensus && self.reads == other.reads
    }
}

impl Eq for Contig {}

////////////////////////////////////////////////////////////////////////////////////////
// Builder
////////////////////////////////////////////////////////////////////////////////////////

/// A builder for a [`Contig`] over reads of type `T`.
pub struct Builder<T, F> {
    /// The contig id.
    id: String,

    /// The gapped consensus.
    consensus: Arc<NucleotideSequence>,

    /// The format-specific decoding function.
    decode: F,

    /// The reads placed so far.
    reads: Vec<PlacedRead>,

    /// The ids of the reads placed so far.
    seen: HashSet<String>,

    /// Shares the ranges of placed reads, if set.
    cache: Option<Arc<Cache>>,

    /// The read type.
    marker: PhantomData<fn(T)>,
}

impl<T, F, E> Builder<T, F>
where
    F: FnMut(T) -> std::result::Result<Layout, E>,
    E: Into<Box<dyn std::error::Error + Send + Sync>>,
{
    /// Creates a builder for the contig `id` with the given consensus.
    pub fn new(
        id: impl Into<String>,
        consensus: impl Into<Arc<NucleotideSequence>>,
        decode: F,
    ) -> Self {
        Self {
            id: id.into(),
            consensus: consensus.into(),
            decode,
            reads: Vec::new(),
            seen: HashSet::new(),
            cache: None,
            marker: PhantomData,
        }
    }

    /// Hands out the ranges of every read placed from now on through `cache`.
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Gets the shared copy of `range`.
    fn share(&self, range: Range) -> Arc<Range> {
        match &self.cache {
            Some(cache) => cache.intern(range),
            None => Arc::new(range),
        }
    }

    /// Decodes a read and places it on the consensus.
    ///
    /// The portions of a read that hang off either end of the consensus are
    /// clipped away. The valid range is moved into the coordinates of the
    /// clipped bases and narrowed to them, so it never reaches past the
    /// stored sequence.
    pub fn push_read(mut self, read: T) -> Result<Self> {
        let layout = (self.decode)(read).map_err(|err| Error::Decode(err.into()))?;

        if !self.seen.insert(layout.id.clone()) {
            return Err(Error::DuplicateRead(layout.id));
        }

        let symbols = layout.gapped.as_slice();
        let consensus_len = self.consensus.len() as i64;

        let start = layout.offset.max(0);
        let end = layout
            .offset
            .saturating_add(symbols.len() as i64)
            .min(consensus_len);

        if start >= end {
            return Err(Error::OutsideConsensus(layout.id));
        }

        let skip = (start - layout.offset) as usize;
        let clipped = &symbols[skip..skip + (end - start) as usize];

        let reference_start =
            i32::try_from(start).map_err(|_| Error::Delta(delta::Error::TooLong(end as usize)))?;
        let sequence =
            ReferenceDeltaSequence::try_encode(self.consensus.clone(), clipped, reference_start)
                .map_err(Error::Delta)?;

        let range = Range::try_new(start, end - 1).map_err(Error::Range)?;

        let bounds = Range::of_length(0, clipped.len() as u64).map_err(Error::Range)?;
        let valid_range = bounds.intersection(
            &layout
                .valid_range
                .shift(-(skip as i64))
                .map_err(Error::Range)?,
        );

        let range = self.share(range);
        let valid_range = self.share(valid_range);

        self.reads.push(PlacedRead {
            id: layout.id,
            direction: layout.direction,
            range,
            valid_range,
            sequence,
        });

        Ok(self)
    }

    /// Consumes `self` to build the [`Contig`].
    pub fn try_build(self) -> Result<Contig> {
        let intervals = self
            .reads
            .iter()
            .enumerate()
            .map(|(i, read)| Iv {
                start: read.range.start() as u64,
                stop: read.range.end() as u64 + 1,
                val: i,
            })
            .collect::<Vec<_>>();

        Ok(Contig {
            id: self.id,
            consensus: self.consensus,
            reads: self.reads,
            index: lapper::Lapper::new(intervals),
        })
    }
}

impl<T, F> std::fmt::Debug for Builder<T, F> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("id", &self.id)
            .field("reads", &self.reads.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A read for tests: id, offset and gapped bases.
    type TestRead = (&'static str, i64, &'static str);

    /// Decodes a [`TestRead`].
    fn decode(
        (id, offset, bases): TestRead,
    ) -> std::result::Result<Layout, Box<dyn std::error::Error + Send + Sync>> {
        Ok(Layout {
            id: id.to_string(),
            direction: Direction::Forward,
            offset,
            gapped: bases.parse()?,
            valid_range: Range::of_length(0, bases.len() as u64)?,
        })
    }

    /// The decoding function type for [`TestRead`]s.
    type Decode =
        fn(TestRead) -> std::result::Result<Layout, Box<dyn std::error::Error + Send + Sync>>;

    /// Starts a builder over a ten base consensus.
    fn builder() -> Builder<TestRead, Decode> {
        let consensus = "ACGT*ACGTA".parse::<NucleotideSequence>().unwrap();
        Builder::new("contig", consensus, decode as Decode)
    }

    #[test]
    fn reads_hanging_off_the_consensus_are_clipped(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let contig = builder()
            .push_read(("left", -2, "TTACG"))?
            .push_read(("right", 8, "TAGG"))?
            .try_build()?;

        let left = contig.read("left").unwrap();
        assert_eq!(left.offset(), 0);
        assert_eq!(left.sequence().to_string(), "ACG");
        assert_eq!(left.valid_range(), Range::try_new(0, 2)?);

        let right = contig.read("right").unwrap();
        assert_eq!(right.consensus_range(), Range::try_new(8, 9)?);
        assert_eq!(right.sequence().to_string(), "TA");
        assert_eq!(right.valid_range(), Range::try_new(0, 1)?);

        Ok(())
    }

    #[test]
    fn valid_ranges_follow_the_clipped_bases(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        // Reads with an explicit valid range in unclipped read coordinates.
        let decode = |(id, offset, bases, start, end): (&str, i64, &str, i64, i64)| {
            Ok::<_, Box<dyn std::error::Error + Send + Sync>>(Layout {
                id: id.to_string(),
                direction: Direction::Forward,
                offset,
                gapped: bases.parse()?,
                valid_range: Range::try_new(start, end)?,
            })
        };

        let consensus = "ACGTACGTAC".parse::<NucleotideSequence>()?;
        let contig = Builder::new("contig", consensus, decode)
            .push_read(("left", -3, "TTTACGTA", 3, 7))?
            .push_read(("right", 7, "TACGG", 0, 4))?
            .push_read(("junk", 2, "GTAC", 0, 0))?
            .push_read(("hidden", -4, "TTTTAC", 0, 2))?
            .try_build()?;

        let left = contig.read("left").unwrap();
        assert_eq!(left.sequence().to_string(), "ACGTA");
        assert_eq!(left.valid_range(), Range::try_new(0, 4)?);

        let right = contig.read("right").unwrap();
        assert_eq!(right.sequence().to_string(), "TAC");
        assert_eq!(right.valid_range(), Range::try_new(0, 2)?);

        let junk = contig.read("junk").unwrap();
        assert_eq!(junk.valid_range(), Range::try_new(0, 0)?);

        // The valid bases fell entirely in the clipped overhang.
        let hidden = contig.read("hidden").unwrap();
        assert_eq!(hidden.sequence().to_string(), "AC");
        assert!(hidden.valid_range().is_empty());

        for read in contig.reads() {
            assert!(read.valid_range().end() < read.sequence().len() as i64);
        }

        Ok(())
    }

    #[test]
    fn cached_builders_share_equal_ranges() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let cache = Arc::new(Cache::default());
        let contig = builder()
            .with_cache(cache.clone())
            .push_read(("a", 2, "GT*A"))?
            .push_read(("b", 2, "GTAA"))?
            .try_build()?;

        let [a, b] = contig.reads() else {
            return Err("expected two reads".into());
        };
        assert!(Arc::ptr_eq(&a.range, &b.range));
        assert!(Arc::ptr_eq(&a.valid_range, &b.valid_range));
        assert!(Arc::ptr_eq(&a.range, &cache.get_or_insert(2, 5)?));

        // Without a cache, equal ranges are still equal values.
        let contig = builder()
            .push_read(("a", 2, "GT*A"))?
            .push_read(("b", 2, "GTAA"))?
            .try_build()?;
        assert_eq!(
            contig.reads()[0].consensus_range(),
            contig.reads()[1].consensus_range()
        );

        Ok(())
    }

    #[test]
    fn overlap_queries_use_inclusive_ranges() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let contig = builder()
            .push_read(("a", 0, "ACGT"))?
            .push_read(("b", 3, "T-AC"))?
            .push_read(("c", 7, "GTA"))?
            .try_build()?;

        let ids = |range: Range| {
            contig
                .reads_overlapping(&range)
                .into_iter()
                .map(|read| read.id().to_string())
                .collect::<Vec<_>>()
        };

        assert_eq!(ids(Range::try_new(3, 3)?), vec!["a", "b"]);
        assert_eq!(ids(Range::try_new(4, 6)?), vec!["b"]);
        assert_eq!(ids(Range::try_new(0, 9)?), vec!["a", "b", "c"]);
        assert!(ids(Range::empty_at(5)).is_empty());
        assert!(ids(Range::try_new(-10, -1)?).is_empty());

        let b = contig.read("b").unwrap();
        assert_eq!(b.sequence().gap_offsets(), vec![1]);

        Ok(())
    }

    #[test]
    fn duplicate_and_misplaced_reads_are_rejected(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let err = builder()
            .push_read(("a", 0, "ACGT"))?
            .push_read(("a", 1, "CGT"))
            .unwrap_err();
        assert_eq!(err.to_string(), "duplicate read: a");

        let err = builder().push_read(("far", 20, "ACGT")).unwrap_err();
        assert!(matches!(err, Error::OutsideConsensus(_)));

        let err = builder().push_read(("bad", 0, "AC!T")).unwrap_err();
        assert!(matches!(err, Error::Decode(_)));

        Ok(())
    }

    #[test]
    fn directions_parse_from_both_conventions(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        assert_eq!("U".parse::<Direction>()?, Direction::Forward);
        assert_eq!("-".parse::<Direction>()?, Direction::Reverse);
        assert_eq!(
            "X".parse::<Direction>().unwrap_err().to_string(),
            "X is not a valid direction"
        );
        Ok(())
    }
}
