//! The CAS binary alignment format.
//!
//! A CAS file is a header region describing the references, the read files
//! and the scoring scheme, followed by one match record per read. Every
//! match record is a top-level record: bookmarks point at the start of one.
//!
//! ```
//! use assemblyfile::cas;
//! use assemblyfile::cas::header::Metadata;
//! use assemblyfile::parse::Control;
//! use assemblyfile::parse::Source;
//!
//! #[derive(Default)]
//! struct Counts(u64);
//!
//! impl cas::Visitor for Counts {
//!     type Matches = ();
//!
//!     fn visit_metadata(
//!         &mut self,
//!         _: &mut Control,
//!         metadata: &Metadata,
//!     ) -> assemblyfile::parse::Result<()> {
//!         self.0 = metadata.num_reads;
//!         Ok(())
//!     }
//! }
//!
//! let parser = cas::Parser::new(Source::bytes(&b"not a cas file"[..]));
//! assert!(parser.parse(&mut Counts::default()).is_err());
//! ```

use indexmap::IndexMap;
use tracing::debug;
use tracing::trace;

use crate::binary;
use crate::datastore;
use crate::parse;
use crate::parse::Bookmark;
use crate::parse::Control;
use crate::parse::Format;
use crate::parse::Input;
use crate::parse::Malformed;
use crate::parse::Outcome;
use crate::parse::Source;
use crate::parse::State;
use crate::parse::Unsupported;
use crate::parse::Visit;
use crate::Range;

pub mod alignment;
pub mod header;

pub use alignment::Alignment;
pub use alignment::Match;
pub use alignment::Token;
use header::AssemblerInfo;
use header::FileInfo;
use header::Metadata;
use header::ReferenceDescription;
use header::ScoringScheme;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// A CAS grammar error.
#[derive(Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The file does not start with the CAS magic number.
    InvalidMagicNumber(Vec<u8>),

    /// An unknown score type tag.
    InvalidScoreType(u8),

    /// An unknown alignment type tag.
    InvalidAlignmentType(u8),

    /// The header runs past the declared start of the matches region.
    HeaderOverrun {
        /// The declared offset of the matches region.
        matches_offset: u64,

        /// The offset at which the header ended.
        position: u64,
    },

    /// A phase change token runs past the end of its payload.
    TokenOvershoot {
        /// The size of the payload in bytes.
        budget: usize,
    },

    /// A match refers to a reference with no description.
    UnknownReference(u32),

    /// A bookmark led to a different read than the one requested.
    UnexpectedRead {
        /// The requested read.
        expected: u64,

        /// The read found at the bookmark.
        found: u64,
    },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidMagicNumber(magic) => {
                write!(f, "invalid magic number: {magic:02x?}")
            }
            ParseError::InvalidScoreType(tag) => write!(f, "invalid score type: {tag}"),
            ParseError::InvalidAlignmentType(tag) => write!(f, "invalid alignment type: {tag}"),
            ParseError::HeaderOverrun {
                matches_offset,
                position,
            } => write!(
                f,
                "header ends at {position}, past the matches region at {matches_offset}"
            ),
            ParseError::TokenOvershoot { budget } => {
                write!(f, "alignment tokens overshoot a payload of {budget} bytes")
            }
            ParseError::UnknownReference(index) => {
                write!(f, "match refers to unknown reference {index}")
            }
            ParseError::UnexpectedRead { expected, found } => {
                write!(f, "expected read {expected} at bookmark, found read {found}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for parse::Error {
    fn from(err: ParseError) -> Self {
        parse::Error::Malformed(Malformed::Cas(err))
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Visitors
////////////////////////////////////////////////////////////////////////////////////////

/// Receives the header region of a CAS file.
///
/// Every method defaults to doing nothing; the matches region is skipped
/// unless [`visit_matches()`](Visitor::visit_matches) descends.
pub trait Visitor {
    /// The visitor for the matches region.
    type Matches: MatchVisitor;

    /// Called with the counts that follow the magic number.
    fn visit_metadata(&mut self, _: &mut Control, _: &Metadata) -> parse::Result<()> {
        Ok(())
    }

    /// Called with the program that produced the file.
    fn visit_assembler_info(&mut self, _: &mut Control, _: &AssemblerInfo) -> parse::Result<()> {
        Ok(())
    }

    /// Called with the number of reference file groups.
    fn visit_number_of_reference_files(&mut self, _: &mut Control, _: u32) -> parse::Result<()> {
        Ok(())
    }

    /// Called once per reference file group.
    fn visit_reference_file(&mut self, _: &mut Control, _: &FileInfo) -> parse::Result<()> {
        Ok(())
    }

    /// Called with the number of read file groups.
    fn visit_number_of_read_files(&mut self, _: &mut Control, _: u32) -> parse::Result<()> {
        Ok(())
    }

    /// Called once per read file group.
    fn visit_read_file(&mut self, _: &mut Control, _: &FileInfo) -> parse::Result<()> {
        Ok(())
    }

    /// Called with the scoring scheme, or [`None`] if the file has none.
    fn visit_scoring_scheme(
        &mut self,
        _: &mut Control,
        _: Option<&ScoringScheme>,
    ) -> parse::Result<()> {
        Ok(())
    }

    /// Called once per reference with its zero-based index.
    fn visit_reference_description(
        &mut self,
        _: &mut Control,
        _: u32,
        _: &ReferenceDescription,
    ) -> parse::Result<()> {
        Ok(())
    }

    /// Called when the matches region begins.
    fn visit_matches(&mut self, _: &mut Control) -> parse::Result<Visit<Self::Matches>> {
        Ok(Visit::Skip)
    }

    /// Called with the matches visitor once the matches region is done.
    fn end_matches(&mut self, _: &mut Control, _: Self::Matches) -> parse::Result<()> {
        Ok(())
    }

    /// Called when the end of the input was reached.
    fn visit_end(&mut self) -> parse::Result<()> {
        Ok(())
    }

    /// Called when parsing stopped at a visitor's request.
    fn visit_halted(&mut self) -> parse::Result<()> {
        Ok(())
    }
}

/// Receives the match records of a CAS file.
pub trait MatchVisitor {
    /// Called once per read, in read order.
    fn visit_match(&mut self, _: &mut Control, _: u64, _: &Match) -> parse::Result<()> {
        Ok(())
    }
}

impl MatchVisitor for () {}

////////////////////////////////////////////////////////////////////////////////////////
// Parser
////////////////////////////////////////////////////////////////////////////////////////

/// How much of a file a pass covers.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Scope {
    /// The header and the matches region.
    Everything,

    /// The header only.
    MetadataOnly,
}

/// A CAS driver.
#[derive(Debug)]
pub struct Parser {
    /// The source.
    source: Source,
}

impl Parser {
    /// Creates a driver over `source`.
    pub fn new(source: Source) -> Self {
        Self { source }
    }

    /// Whether bookmarks can be created and resumed.
    pub fn can_create_bookmark(&self) -> bool {
        self.source.is_seekable()
    }

    /// Visits the whole file.
    pub fn parse<V: Visitor>(&self, visitor: &mut V) -> parse::Result<Outcome> {
        self.run(visitor, Scope::Everything)
    }

    /// Visits the header region and never enters the matches region.
    pub fn parse_only_metadata<V: Visitor>(&self, visitor: &mut V) -> parse::Result<Outcome> {
        self.run(visitor, Scope::MetadataOnly)
    }

    /// Resumes visiting at the record identified by `bookmark`.
    ///
    /// Only the match records from the bookmark onward are reported.
    pub fn parse_from<V: Visitor>(
        &self,
        visitor: &mut V,
        bookmark: &Bookmark,
    ) -> parse::Result<Outcome> {
        let state = bookmark.resume(Format::Cas)?;

        if !self.can_create_bookmark() {
            return Err(Unsupported::Bookmarks.into());
        }

        trace!(
            offset = state.offset(),
            read = state.ordinal(),
            "resuming cas pass"
        );

        if state.offset() == 0 {
            return self.parse(visitor);
        }

        let mut input = self.source.open()?;
        let metadata = Metadata::read(&mut input)?;
        input.seek_to(state.offset())?;

        let mut control = Control::new(Format::Cas, true);
        let state = read_matches(&mut input, &mut control, visitor, state, metadata.num_reads)?;

        finish(visitor, state)
    }

    /// Runs one pass from the start of the source.
    fn run<V: Visitor>(&self, visitor: &mut V, scope: Scope) -> parse::Result<Outcome> {
        let mut input = self.source.open()?;
        let mut control = Control::new(Format::Cas, input.is_seekable());
        control.enter(State::start());

        let metadata = read_header(&mut input, &mut control, visitor)?;

        if input.position() > metadata.matches_offset {
            return Err(ParseError::HeaderOverrun {
                matches_offset: metadata.matches_offset,
                position: input.position(),
            }
            .into());
        }

        let state = control.apply(State::start().at(metadata.matches_offset));

        let state = match (scope, state.keep_parsing()) {
            (Scope::Everything, true) => {
                input.advance_to(metadata.matches_offset)?;
                read_matches(&mut input, &mut control, visitor, state, metadata.num_reads)?
            }
            _ => state,
        };

        finish(visitor, state)
    }
}

/// Reads the header region, reporting each part to `visitor`.
fn read_header<V: Visitor>(
    input: &mut Input,
    control: &mut Control,
    visitor: &mut V,
) -> parse::Result<Metadata> {
    let metadata = Metadata::read(input)?;
    visitor.visit_metadata(control, &metadata)?;

    let info = AssemblerInfo::read(input)?;
    visitor.visit_assembler_info(control, &info)?;

    let count = binary::read_byte_count(input)?;
    visitor.visit_number_of_reference_files(control, count)?;
    for _ in 0..count {
        let file = FileInfo::read(input)?;
        visitor.visit_reference_file(control, &file)?;
    }

    let count = binary::read_byte_count(input)?;
    visitor.visit_number_of_read_files(control, count)?;
    for _ in 0..count {
        let file = FileInfo::read(input)?;
        visitor.visit_read_file(control, &file)?;
    }

    let scheme = ScoringScheme::read(input)?;
    visitor.visit_scoring_scheme(control, scheme.as_ref())?;

    for index in 0..metadata.num_references {
        let description = ReferenceDescription::read(input)?;
        visitor.visit_reference_description(control, index, &description)?;
    }

    Ok(metadata)
}

/// Reads match records from `state` until every read has been reported or a
/// visitor stops the pass.
fn read_matches<V: Visitor>(
    input: &mut Input,
    control: &mut Control,
    visitor: &mut V,
    mut state: State,
    num_reads: u64,
) -> parse::Result<State> {
    if state.ordinal() >= num_reads {
        return Ok(state);
    }

    control.enter(state);

    let mut matches = match visitor.visit_matches(control)? {
        Visit::Descend(matches) => matches,
        Visit::Skip => return Ok(control.apply(state)),
    };

    state = control.apply(state);

    while state.keep_parsing() && state.ordinal() < num_reads {
        control.enter(state);

        let record = Match::read(input)?;
        matches.visit_match(control, state.ordinal(), &record)?;

        state = control.apply(state.next_record(input.position()));
    }

    visitor.end_matches(control, matches)?;
    Ok(state)
}

/// Reports how the pass finished.
fn finish<V: Visitor>(visitor: &mut V, state: State) -> parse::Result<Outcome> {
    let outcome = Outcome::of(state);

    match outcome {
        Outcome::Ended => visitor.visit_end()?,
        Outcome::Halted => visitor.visit_halted()?,
    }

    Ok(outcome)
}

////////////////////////////////////////////////////////////////////////////////////////
// Aligned reads
////////////////////////////////////////////////////////////////////////////////////////

/// The header data a match record needs to be materialized.
#[derive(Debug, Default)]
struct Auxiliary {
    /// The number of sequences in each read file group.
    read_files: Vec<u32>,

    /// Every reference description, by index.
    references: Vec<ReferenceDescription>,
}

impl Visitor for Auxiliary {
    type Matches = ();

    fn visit_read_file(&mut self, _: &mut Control, file: &FileInfo) -> parse::Result<()> {
        self.read_files.push(file.num_sequences);
        Ok(())
    }

    fn visit_reference_description(
        &mut self,
        _: &mut Control,
        _: u32,
        description: &ReferenceDescription,
    ) -> parse::Result<()> {
        self.references.push(*description);
        Ok(())
    }
}

/// A read together with the header data that locates it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AlignedRead {
    /// The zero-based read index.
    index: u64,

    /// The read file group holding the read.
    read_file: Option<usize>,

    /// The match record.
    record: Match,

    /// The reference the read aligned to.
    reference: Option<ReferenceDescription>,

    /// The read positions covered by the alignment.
    valid_range: Option<Range>,

    /// The reference positions covered by the alignment.
    reference_range: Option<Range>,
}

impl AlignedRead {
    /// Combines a match record with the header data.
    fn new(index: u64, record: Match, auxiliary: &Auxiliary) -> parse::Result<Self> {
        let mut remaining = index;
        let read_file = auxiliary.read_files.iter().position(|count| {
            let found = remaining < u64::from(*count);
            remaining = remaining.saturating_sub(u64::from(*count));
            found
        });

        let (reference, valid_range, reference_range) = match &record.alignment {
            Some(alignment) => {
                let reference = auxiliary
                    .references
                    .get(alignment.reference_index as usize)
                    .copied()
                    .ok_or(ParseError::UnknownReference(alignment.reference_index))?;

                let valid_range = Range::of_length(0, alignment.read_span())
                    .map_err(|err| parse::Error::Malformed(Malformed::Encoding(err.to_string())))?;

                let start = i64::try_from(alignment.start).unwrap_or(i64::MAX);
                let reference_range = Range::of_length(start, alignment.reference_span())
                    .map_err(|err| parse::Error::Malformed(Malformed::Encoding(err.to_string())))?;

                (Some(reference), Some(valid_range), Some(reference_range))
            }
            None => (None, None, None),
        };

        Ok(Self {
            index,
            read_file,
            record,
            reference,
            valid_range,
            reference_range,
        })
    }

    /// Gets the zero-based read index.
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Gets the read file group holding the read.
    pub fn read_file(&self) -> Option<usize> {
        self.read_file
    }

    /// Gets the match record.
    pub fn record(&self) -> &Match {
        &self.record
    }

    /// Gets the reference the read aligned to.
    pub fn reference(&self) -> Option<&ReferenceDescription> {
        self.reference.as_ref()
    }

    /// Gets the read positions covered by the alignment.
    pub fn valid_range(&self) -> Option<Range> {
        self.valid_range
    }

    /// Gets the reference positions covered by the alignment. On a circular
    /// reference the range may extend past the reference length.
    pub fn reference_range(&self) -> Option<Range> {
        self.reference_range
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Datastore
////////////////////////////////////////////////////////////////////////////////////////

/// Records a bookmark for every read that passes a filter.
struct Indexer<'a> {
    /// The id filter.
    filter: &'a mut dyn FnMut(&u64) -> bool,

    /// The bookmarks.
    index: IndexMap<u64, Bookmark>,
}

impl MatchVisitor for Indexer<'_> {
    fn visit_match(&mut self, control: &mut Control, read: u64, _: &Match) -> parse::Result<()> {
        if (self.filter)(&read) {
            self.index.insert(read, control.create_bookmark()?);
        }

        Ok(())
    }
}

/// Hands an [`Indexer`] to the matches region and takes it back.
struct IndexingPass<'a> {
    /// The indexer, while it is not in use.
    indexer: Option<Indexer<'a>>,
}

impl<'a> Visitor for IndexingPass<'a> {
    type Matches = Indexer<'a>;

    fn visit_matches(&mut self, _: &mut Control) -> parse::Result<Visit<Indexer<'a>>> {
        Ok(Visit::from_option(self.indexer.take()))
    }

    fn end_matches(&mut self, _: &mut Control, indexer: Indexer<'a>) -> parse::Result<()> {
        self.indexer = Some(indexer);
        Ok(())
    }
}

/// Keeps the first match record and stops.
#[derive(Default)]
struct First {
    /// The read index and its record.
    found: Option<(u64, Match)>,
}

impl MatchVisitor for First {
    fn visit_match(&mut self, control: &mut Control, read: u64, record: &Match) -> parse::Result<()> {
        self.found = Some((read, record.clone()));
        control.stop_parsing();
        Ok(())
    }
}

/// Collects the record at a bookmark.
#[derive(Default)]
struct Fetch {
    /// The read index and its record.
    found: Option<(u64, Match)>,
}

impl Visitor for Fetch {
    type Matches = First;

    fn visit_matches(&mut self, _: &mut Control) -> parse::Result<Visit<First>> {
        Ok(Visit::Descend(First::default()))
    }

    fn end_matches(&mut self, _: &mut Control, first: First) -> parse::Result<()> {
        self.found = first.found;
        Ok(())
    }
}

/// Materializes every read with the header data gathered earlier in the
/// same pass and hands it to a callback.
struct Scanner<'a> {
    /// The header data seen so far.
    auxiliary: Auxiliary,

    /// The callback; returns `false` to stop the pass.
    visit: &'a mut dyn FnMut(u64, AlignedRead) -> bool,
}

impl MatchVisitor for Scanner<'_> {
    fn visit_match(&mut self, control: &mut Control, read: u64, record: &Match) -> parse::Result<()> {
        let aligned = AlignedRead::new(read, record.clone(), &self.auxiliary)?;

        if !(self.visit)(read, aligned) {
            control.stop_parsing();
        }

        Ok(())
    }
}

/// Gathers the header data of a single pass, then hands it to a [`Scanner`]
/// for the matches region.
struct ScanningPass<'a> {
    /// The scanner, while it is not in use.
    scanner: Option<Scanner<'a>>,
}

impl<'a> Visitor for ScanningPass<'a> {
    type Matches = Scanner<'a>;

    fn visit_read_file(&mut self, control: &mut Control, file: &FileInfo) -> parse::Result<()> {
        match &mut self.scanner {
            Some(scanner) => scanner.auxiliary.visit_read_file(control, file),
            None => Ok(()),
        }
    }

    fn visit_reference_description(
        &mut self,
        control: &mut Control,
        index: u32,
        description: &ReferenceDescription,
    ) -> parse::Result<()> {
        match &mut self.scanner {
            Some(scanner) => scanner
                .auxiliary
                .visit_reference_description(control, index, description),
            None => Ok(()),
        }
    }

    fn visit_matches(&mut self, _: &mut Control) -> parse::Result<Visit<Scanner<'a>>> {
        Ok(Visit::from_option(self.scanner.take()))
    }

    fn end_matches(&mut self, _: &mut Control, scanner: Scanner<'a>) -> parse::Result<()> {
        self.scanner = Some(scanner);
        Ok(())
    }
}

impl datastore::Driver for Parser {
    type Id = u64;
    type Record = AlignedRead;

    fn can_create_bookmark(&self) -> bool {
        Parser::can_create_bookmark(self)
    }

    fn index(
        &self,
        filter: &mut dyn FnMut(&u64) -> bool,
    ) -> parse::Result<IndexMap<u64, Bookmark>> {
        let mut pass = IndexingPass {
            indexer: Some(Indexer {
                filter,
                index: IndexMap::new(),
            }),
        };

        self.parse(&mut pass)?;

        Ok(pass
            .indexer
            .map(|indexer| indexer.index)
            .unwrap_or_default())
    }

    fn fetch(&self, id: &u64, bookmark: &Bookmark) -> parse::Result<AlignedRead> {
        // The reference lengths and read file layout precede every record.
        let mut auxiliary = Auxiliary::default();
        self.parse_only_metadata(&mut auxiliary)?;
        debug!(
            references = auxiliary.references.len(),
            "collected cas header for read {id}"
        );

        let mut fetch = Fetch::default();
        self.parse_from(&mut fetch, bookmark)?;

        let (index, record) = fetch.found.ok_or(Malformed::Truncated)?;

        if index != *id {
            return Err(ParseError::UnexpectedRead {
                expected: *id,
                found: index,
            }
            .into());
        }

        AlignedRead::new(index, record, &auxiliary)
    }

    fn scan(&self, visit: &mut dyn FnMut(u64, AlignedRead) -> bool) -> parse::Result<()> {
        let mut pass = ScanningPass {
            scanner: Some(Scanner {
                auxiliary: Auxiliary::default(),
                visit,
            }),
        };

        self.parse(&mut pass)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::Indexed;

    /// Builds a CAS file with one reference of length 10, one read file of
    /// two reads and the given match records.
    fn fixture(matches: &[Match]) -> Vec<u8> {
        let mut data = header::MAGIC_NUMBER.to_vec();
        binary::write_u64(&mut data, 0).unwrap();
        binary::write_u32(&mut data, 1).unwrap();
        binary::write_u64(&mut data, matches.len() as u64).unwrap();

        for s in ["clc_ref_assemble", "4.0", "-q reads.fq"] {
            binary::write_string(&mut data, s).unwrap();
        }

        for (sequences, residues, name) in [(1u32, 10u64, "ref.fa"), (2, 20, "reads.fq")] {
            binary::write_byte_count(&mut data, 1).unwrap();
            binary::write_u32(&mut data, sequences).unwrap();
            binary::write_u64(&mut data, residues).unwrap();
            binary::write_byte_count(&mut data, 1).unwrap();
            binary::write_string(&mut data, name).unwrap();
        }

        data.extend([1, 0]);
        for score in [8u32, 3, 8, 3, 1, 2, 2, 0] {
            binary::write_u32(&mut data, score).unwrap();
        }

        binary::write_u64(&mut data, 10).unwrap();
        data.push(0);

        let matches_offset = data.len() as u64;
        data[8..16].copy_from_slice(&matches_offset.to_le_bytes());

        for record in matches {
            record.write(&mut data).unwrap();
        }

        data
    }

    /// Two match records: read 0 aligned, read 1 did not.
    fn two_matches() -> Vec<Match> {
        vec![
            Match {
                multiple_matches: None,
                multiple_alignments: None,
                part_of_pair: false,
                alignment: Some(Alignment {
                    reference_index: 0,
                    start: 2,
                    reverse: false,
                    tokens: vec![Token::Match(5), Token::Insertion(1), Token::Match(2)],
                    score: 7,
                }),
            },
            Match {
                multiple_matches: None,
                multiple_alignments: None,
                part_of_pair: true,
                alignment: None,
            },
        ]
    }

    /// Records every callback by name.
    #[derive(Default)]
    struct Recorder {
        /// The callbacks in order.
        events: Vec<String>,

        /// The read after which to stop.
        stop_after: Option<u64>,
    }

    /// Records every match callback.
    #[derive(Default)]
    struct MatchRecorder {
        /// The callbacks in order.
        events: Vec<String>,

        /// A bookmark per read.
        bookmarks: Vec<Bookmark>,

        /// The read after which to stop.
        stop_after: Option<u64>,
    }

    impl MatchVisitor for MatchRecorder {
        fn visit_match(
            &mut self,
            control: &mut Control,
            read: u64,
            record: &Match,
        ) -> parse::Result<()> {
            self.events
                .push(format!("match {read} {}", record.has_match()));
            self.bookmarks.push(control.create_bookmark()?);

            if self.stop_after == Some(read) {
                control.stop_parsing();
            }

            Ok(())
        }
    }

    impl Visitor for Recorder {
        type Matches = MatchRecorder;

        fn visit_metadata(&mut self, _: &mut Control, metadata: &Metadata) -> parse::Result<()> {
            self.events.push(format!(
                "metadata {} {}",
                metadata.num_references, metadata.num_reads
            ));
            Ok(())
        }

        fn visit_assembler_info(
            &mut self,
            _: &mut Control,
            info: &AssemblerInfo,
        ) -> parse::Result<()> {
            self.events.push(format!("assembler {}", info.name));
            Ok(())
        }

        fn visit_number_of_reference_files(
            &mut self,
            _: &mut Control,
            count: u32,
        ) -> parse::Result<()> {
            self.events.push(format!("reference files {count}"));
            Ok(())
        }

        fn visit_reference_file(&mut self, _: &mut Control, file: &FileInfo) -> parse::Result<()> {
            self.events
                .push(format!("reference file {}", file.names.join(",")));
            Ok(())
        }

        fn visit_number_of_read_files(
            &mut self,
            _: &mut Control,
            count: u32,
        ) -> parse::Result<()> {
            self.events.push(format!("read files {count}"));
            Ok(())
        }

        fn visit_read_file(&mut self, _: &mut Control, file: &FileInfo) -> parse::Result<()> {
            self.events
                .push(format!("read file {}", file.num_sequences));
            Ok(())
        }

        fn visit_scoring_scheme(
            &mut self,
            _: &mut Control,
            scheme: Option<&ScoringScheme>,
        ) -> parse::Result<()> {
            self.events
                .push(format!("scoring scheme {}", scheme.is_some()));
            Ok(())
        }

        fn visit_reference_description(
            &mut self,
            _: &mut Control,
            index: u32,
            description: &ReferenceDescription,
        ) -> parse::Result<()> {
            self.events.push(format!(
                "reference {index} {} {}",
                description.length, description.circular
            ));
            Ok(())
        }

        fn visit_matches(&mut self, _: &mut Control) -> parse::Result<Visit<MatchRecorder>> {
            self.events.push(String::from("matches"));
            Ok(Visit::Descend(MatchRecorder {
                stop_after: self.stop_after,
                ..Default::default()
            }))
        }

        fn end_matches(&mut self, _: &mut Control, matches: MatchRecorder) -> parse::Result<()> {
            self.events.extend(matches.events);
            self.events.push(String::from("end matches"));
            Ok(())
        }

        fn visit_end(&mut self) -> parse::Result<()> {
            self.events.push(String::from("end"));
            Ok(())
        }

        fn visit_halted(&mut self) -> parse::Result<()> {
            self.events.push(String::from("halted"));
            Ok(())
        }
    }

    #[test]
    fn metadata_only_passes_never_enter_the_matches_region(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let parser = Parser::new(Source::bytes(fixture(&two_matches())));

        let mut recorder = Recorder::default();
        let outcome = parser.parse_only_metadata(&mut recorder)?;

        assert_eq!(outcome, Outcome::Ended);
        assert_eq!(
            recorder.events,
            [
                "metadata 1 2",
                "assembler clc_ref_assemble",
                "reference files 1",
                "reference file ref.fa",
                "read files 1",
                "read file 2",
                "scoring scheme true",
                "reference 0 10 false",
                "end",
            ]
        );

        Ok(())
    }

    #[test]
    fn full_passes_report_every_match() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let parser = Parser::new(Source::bytes(fixture(&two_matches())));

        let mut recorder = Recorder::default();
        parser.parse(&mut recorder)?;

        assert_eq!(
            &recorder.events[8..],
            ["matches", "match 0 true", "match 1 false", "end matches", "end"]
        );

        Ok(())
    }

    #[test]
    fn stopping_halts_after_the_current_record(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let parser = Parser::new(Source::bytes(fixture(&two_matches())));

        let mut recorder = Recorder {
            stop_after: Some(0),
            ..Default::default()
        };

        assert_eq!(parser.parse(&mut recorder)?, Outcome::Halted);
        assert_eq!(
            &recorder.events[8..],
            ["matches", "match 0 true", "end matches", "halted"]
        );

        Ok(())
    }

    #[test]
    fn resuming_at_a_bookmark_replays_the_suffix(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let parser = Parser::new(Source::bytes(fixture(&two_matches())));

        let mut everything = |_: &u64| true;
        let mut pass = IndexingPass {
            indexer: Some(Indexer {
                filter: &mut everything,
                index: IndexMap::new(),
            }),
        };
        parser.parse(&mut pass)?;
        let index = pass.indexer.unwrap().index;

        let mut full = Recorder::default();
        parser.parse(&mut full)?;

        let mut resumed = Recorder::default();
        parser.parse_from(&mut resumed, &index[&1])?;

        assert_eq!(
            resumed.events,
            ["matches", "match 1 false", "end matches", "end"]
        );
        assert_eq!(resumed.events[1..], full.events[full.events.len() - 3..]);

        Ok(())
    }

    #[test]
    fn the_datastore_matches_a_full_pass() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let store = Indexed::build(Parser::new(Source::bytes(fixture(&two_matches()))))?;
        assert_eq!(store.len()?, 2);

        let read = store.get(&0)?.unwrap();
        assert_eq!(read.index(), 0);
        assert_eq!(read.read_file(), Some(0));
        assert_eq!(read.record(), &two_matches()[0]);
        assert_eq!(read.reference().map(|r| r.length), Some(10));
        assert_eq!(read.valid_range(), Some(Range::try_new(0, 7)?));
        assert_eq!(read.reference_range(), Some(Range::try_new(2, 8)?));

        let read = store.get(&1)?.unwrap();
        assert!(read.record().part_of_pair);
        assert!(read.valid_range().is_none());

        assert!(store.get(&2)?.is_none());

        Ok(())
    }

    #[test]
    fn unknown_references_are_malformed() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut matches = two_matches();
        if let Some(alignment) = matches[0].alignment.as_mut() {
            alignment.reference_index = 4;
        }

        let store = Indexed::build(Parser::new(Source::bytes(fixture(&matches))))?;
        let err = store.get(&0).unwrap_err();

        assert!(matches!(
            err,
            datastore::Error::Parse(parse::Error::Malformed(Malformed::Cas(
                ParseError::UnknownReference(4)
            )))
        ));

        Ok(())
    }

    #[test]
    fn missing_records_are_truncation() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut data = fixture(&two_matches());
        data.truncate(data.len() - 1);

        let parser = Parser::new(Source::bytes(data));
        let Err(err) = parser.parse(&mut Recorder::default()) else {
            return Err("a truncated record was accepted".into());
        };
        assert!(matches!(err, parse::Error::Malformed(Malformed::Truncated)));

        Ok(())
    }

    #[test]
    fn visitor_errors_propagate() -> std::result::Result<(), Box<dyn std::error::Error>> {
        struct Failing;

        impl Visitor for Failing {
            type Matches = ();

            fn visit_assembler_info(
                &mut self,
                _: &mut Control,
                _: &AssemblerInfo,
            ) -> parse::Result<()> {
                Err(parse::Error::visitor("unsupported assembler"))
            }
        }

        let parser = Parser::new(Source::bytes(fixture(&[])));
        let Err(err) = parser.parse(&mut Failing) else {
            return Err("the visitor error was swallowed".into());
        };
        assert_eq!(err.to_string(), "visitor error: unsupported assembler");

        Ok(())
    }

    #[test]
    fn streams_refuse_to_resume() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let data = fixture(&two_matches());

        let seekable = Parser::new(Source::bytes(data.clone()));

        let mut everything = |_: &u64| true;
        let mut pass = IndexingPass {
            indexer: Some(Indexer {
                filter: &mut everything,
                index: IndexMap::new(),
            }),
        };
        seekable.parse(&mut pass)?;
        let bookmark = pass.indexer.unwrap().index[&0].clone();

        let stream = Parser::new(Source::once(std::io::Cursor::new(data)));
        assert!(!stream.can_create_bookmark());
        assert!(matches!(
            stream.parse_from(&mut Recorder::default(), &bookmark),
            Err(parse::Error::Unsupported(Unsupported::Bookmarks))
        ));

        Ok(())
    }
}
