//! The SFF flow-sequencing format.
//!
//! An SFF file is a common header followed by one record per read, each a
//! read header and a data section. All integers are big-endian and every
//! section is zero-padded to a multiple of eight bytes. An optional index
//! block (usually holding a [manifest](manifest)) may sit between or after
//! the reads.

use std::io::Read;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::debug;
use tracing::trace;

use crate::binary;
use crate::datastore;
use crate::nucleotide::NucleotideSequence;
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
use crate::range::Cache;
use crate::range::CoordinateSystem;
use crate::Range;

pub mod manifest;

/// The magic number that opens every SFF file.
pub const MAGIC_NUMBER: [u8; 4] = *b".sff";

/// The only understood version.
const VERSION: [u8; 4] = [0, 0, 0, 1];

/// The only understood flowgram format.
const FLOWGRAM_FORMAT: u8 = 1;

/// The number of bytes every section is padded to a multiple of.
const ALIGNMENT: u64 = 8;

/// Gets the number of padding bytes that follow a section of `len` bytes.
fn padding(len: u64) -> u64 {
    (ALIGNMENT - len % ALIGNMENT) % ALIGNMENT
}

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An SFF grammar error.
#[derive(Debug, Eq, PartialEq)]
pub enum ParseError {
    /// The file does not start with the SFF magic number.
    InvalidMagicNumber([u8; 4]),

    /// The version is not `0001`.
    UnsupportedVersion([u8; 4]),

    /// The flowgram format is not `1`.
    UnsupportedFlowgramFormat(u8),

    /// A declared header length is shorter than its contents.
    HeaderTooShort {
        /// The declared length.
        declared: u64,

        /// The length of the contents.
        actual: u64,
    },

    /// A text field holds bytes outside of ASCII.
    InvalidText(String),

    /// The bases of a read are not nucleotides.
    InvalidBases(String),

    /// A bookmark led to a different read than the one requested.
    UnexpectedRead {
        /// The requested read.
        expected: String,

        /// The read found at the bookmark.
        found: String,
    },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::InvalidMagicNumber(magic) => {
                write!(f, "invalid magic number: {magic:02x?}")
            }
            ParseError::UnsupportedVersion(version) => {
                write!(f, "unsupported version: {version:?}")
            }
            ParseError::UnsupportedFlowgramFormat(format) => {
                write!(f, "unsupported flowgram format: {format}")
            }
            ParseError::HeaderTooShort { declared, actual } => write!(
                f,
                "declared header length {declared} is shorter than its {actual} bytes of contents"
            ),
            ParseError::InvalidText(text) => write!(f, "invalid text: {text:?}"),
            ParseError::InvalidBases(read) => write!(f, "invalid bases in read {read}"),
            ParseError::UnexpectedRead { expected, found } => {
                write!(f, "expected read {expected} at bookmark, found read {found}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for parse::Error {
    fn from(err: ParseError) -> Self {
        parse::Error::Malformed(Malformed::Sff(err))
    }
}

/// Reads `len` bytes of ASCII text.
fn read_text(reader: &mut impl Read, len: usize) -> parse::Result<String> {
    let bytes = binary::read_bytes(reader, len)?;

    match bytes.is_ascii() {
        true => Ok(bytes.into_iter().map(char::from).collect()),
        false => Err(ParseError::InvalidText(String::from_utf8_lossy(&bytes).into_owned()).into()),
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Headers
////////////////////////////////////////////////////////////////////////////////////////

/// The header at the start of an SFF file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommonHeader {
    /// The offset of the index block, or `0` if there is none.
    pub index_offset: u64,

    /// The length of the index block.
    pub index_length: u32,

    /// The number of reads.
    pub num_reads: u32,

    /// The length of this header, padding included.
    pub header_length: u16,

    /// The number of flows per read.
    pub num_flows: u16,

    /// The nucleotide flowed at each flow.
    pub flow_chars: String,

    /// The key sequence that starts every read.
    pub key_sequence: String,
}

impl CommonHeader {
    /// Reads the common header, leaving `input` at the first read record.
    fn read(input: &mut Input) -> parse::Result<Self> {
        let magic = <[u8; 4]>::try_from(binary::read_bytes(input, 4)?)
            .unwrap_or_else(|_| unreachable!("exactly four bytes were read"));

        if magic != MAGIC_NUMBER {
            return Err(ParseError::InvalidMagicNumber(magic).into());
        }

        let version = <[u8; 4]>::try_from(binary::read_bytes(input, 4)?)
            .unwrap_or_else(|_| unreachable!("exactly four bytes were read"));

        if version != VERSION {
            return Err(ParseError::UnsupportedVersion(version).into());
        }

        let index_offset = binary::read_u64_be(input)?;
        let index_length = binary::read_u32_be(input)?;
        let num_reads = binary::read_u32_be(input)?;
        let header_length = binary::read_u16_be(input)?;
        let key_length = binary::read_u16_be(input)?;
        let num_flows = binary::read_u16_be(input)?;
        let flowgram_format = binary::read_u8(input)?;

        if flowgram_format != FLOWGRAM_FORMAT {
            return Err(ParseError::UnsupportedFlowgramFormat(flowgram_format).into());
        }

        let flow_chars = read_text(input, num_flows as usize)?;
        let key_sequence = read_text(input, key_length as usize)?;

        if input.position() > u64::from(header_length) {
            return Err(ParseError::HeaderTooShort {
                declared: u64::from(header_length),
                actual: input.position(),
            }
            .into());
        }

        input.advance_to(u64::from(header_length))?;

        Ok(Self {
            index_offset,
            index_length,
            num_reads,
            header_length,
            num_flows,
            flow_chars,
            key_sequence,
        })
    }

    /// Whether the file has an index block.
    pub fn has_index(&self) -> bool {
        self.index_offset > 0 && self.index_length > 0
    }

    /// Gets the offset just past the index block and its padding.
    fn index_end(&self) -> u64 {
        let end = self.index_offset + u64::from(self.index_length);
        end + padding(end)
    }
}

/// The header of one read record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadHeader {
    /// The read name.
    pub name: String,

    /// The number of bases.
    pub num_bases: u32,

    /// The one-based first base that passed quality clipping, or `0`.
    pub clip_quality_left: u16,

    /// The one-based last base that passed quality clipping, or `0`.
    pub clip_quality_right: u16,

    /// The one-based first base after the adapter, or `0`.
    pub clip_adapter_left: u16,

    /// The one-based last base before the adapter, or `0`.
    pub clip_adapter_right: u16,
}

impl ReadHeader {
    /// Reads a read header that starts at `start`, leaving `input` at the
    /// data section.
    fn read(input: &mut Input, start: u64) -> parse::Result<Self> {
        let header_length = binary::read_u16_be(input)?;
        let name_length = binary::read_u16_be(input)?;
        let num_bases = binary::read_u32_be(input)?;
        let clip_quality_left = binary::read_u16_be(input)?;
        let clip_quality_right = binary::read_u16_be(input)?;
        let clip_adapter_left = binary::read_u16_be(input)?;
        let clip_adapter_right = binary::read_u16_be(input)?;
        let name = read_text(input, name_length as usize)?;

        let actual = input.position() - start;
        if actual > u64::from(header_length) {
            return Err(ParseError::HeaderTooShort {
                declared: u64::from(header_length),
                actual,
            }
            .into());
        }

        input.advance_to(start + u64::from(header_length))?;

        Ok(Self {
            name,
            num_bases,
            clip_quality_left,
            clip_quality_right,
            clip_adapter_left,
            clip_adapter_right,
        })
    }

    /// Gets the high-quality, adapter-free portion of the read.
    ///
    /// Unset clip points fall back to the ends of the read.
    pub fn valid_range(&self) -> Range {
        let left = self
            .clip_quality_left
            .max(self.clip_adapter_left)
            .max(1);

        let right = [self.clip_quality_right, self.clip_adapter_right]
            .into_iter()
            .filter(|clip| *clip > 0)
            .map(u32::from)
            .fold(self.num_bases, u32::min);

        Range::try_from_system(
            CoordinateSystem::ResidueBased,
            i64::from(left),
            i64::from(right),
        )
        .unwrap_or_else(|_| Range::empty_at(i64::from(left) - 1))
    }

    /// Gets the length of the data section, padding included.
    fn data_length(&self, num_flows: u16) -> u64 {
        let len = u64::from(num_flows) * 2 + u64::from(self.num_bases) * 3;
        len + padding(len)
    }
}

/// The data section of one read record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadData {
    /// The flow values, in hundredths of a base.
    pub flowgram: Vec<u16>,

    /// The flow of each base, relative to the flow of the previous base.
    pub flow_indexes: Vec<u8>,

    /// The called bases.
    pub bases: NucleotideSequence,

    /// The phred quality of each base.
    pub qualities: Vec<u8>,
}

impl ReadData {
    /// Reads the data section of `header`, padding included.
    fn read(input: &mut Input, header: &ReadHeader, num_flows: u16) -> parse::Result<Self> {
        let flowgram = (0..num_flows)
            .map(|_| binary::read_u16_be(input))
            .collect::<Result<Vec<_>, _>>()?;

        let num_bases = header.num_bases as usize;
        let flow_indexes = binary::read_bytes(input, num_bases)?;

        let bases = read_text(input, num_bases)?
            .parse::<NucleotideSequence>()
            .map_err(|_| ParseError::InvalidBases(header.name.clone()))?;

        let qualities = binary::read_bytes(input, num_bases)?;

        let len = u64::from(num_flows) * 2 + u64::from(header.num_bases) * 3;
        binary::skip(input, padding(len))?;

        Ok(Self {
            flowgram,
            flow_indexes,
            bases,
            qualities,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Visitors
////////////////////////////////////////////////////////////////////////////////////////

/// Receives the records of an SFF file.
pub trait Visitor {
    /// The visitor for the data section of a read.
    type Read: ReadVisitor;

    /// Called with the common header.
    fn visit_common_header(&mut self, _: &mut Control, _: &CommonHeader) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each read header. Skipping a read jumps over its data
    /// section without decoding it.
    fn visit_read(&mut self, _: &mut Control, _: &ReadHeader) -> parse::Result<Visit<Self::Read>> {
        Ok(Visit::Skip)
    }

    /// Called with the read visitor once the data section is done.
    fn end_read(&mut self, _: &mut Control, _: Self::Read) -> parse::Result<()> {
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

/// Receives the data section of one read.
pub trait ReadVisitor {
    /// Called with the decoded data section.
    fn visit_read_data(&mut self, _: &mut Control, _: &ReadData) -> parse::Result<()> {
        Ok(())
    }
}

impl ReadVisitor for () {}

////////////////////////////////////////////////////////////////////////////////////////
// Parser
////////////////////////////////////////////////////////////////////////////////////////

/// An SFF driver.
#[derive(Debug)]
pub struct Parser {
    /// The source.
    source: Source,

    /// Shares the valid ranges of fetched reads, if set.
    cache: Option<Arc<Cache>>,
}

impl Parser {
    /// Creates a driver over `source`.
    pub fn new(source: Source) -> Self {
        Self {
            source,
            cache: None,
        }
    }

    /// Fetches and scans reads whose valid ranges are shared through
    /// `cache`.
    pub fn with_cache(mut self, cache: Arc<Cache>) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Whether bookmarks can be created and resumed.
    pub fn can_create_bookmark(&self) -> bool {
        self.source.is_seekable()
    }

    /// Visits the whole file.
    pub fn parse<V: Visitor>(&self, visitor: &mut V) -> parse::Result<Outcome> {
        let mut input = self.source.open()?;
        let mut control = Control::new(Format::Sff, input.is_seekable());
        control.enter(State::start());

        let header = CommonHeader::read(&mut input)?;
        visitor.visit_common_header(&mut control, &header)?;

        let state = control.apply(State::start().at(input.position()));
        let state = read_reads(&mut input, &mut control, visitor, &header, state)?;

        finish(visitor, state)
    }

    /// Resumes visiting at the read identified by `bookmark`.
    pub fn parse_from<V: Visitor>(
        &self,
        visitor: &mut V,
        bookmark: &Bookmark,
    ) -> parse::Result<Outcome> {
        let state = bookmark.resume(Format::Sff)?;

        if !self.can_create_bookmark() {
            return Err(Unsupported::Bookmarks.into());
        }

        trace!(
            offset = state.offset(),
            read = state.ordinal(),
            "resuming sff pass"
        );

        let mut input = self.source.open()?;
        let header = CommonHeader::read(&mut input)?;

        if state.offset() < input.position() {
            return self.parse(visitor);
        }

        input.seek_to(state.offset())?;

        let mut control = Control::new(Format::Sff, true);
        let state = read_reads(&mut input, &mut control, visitor, &header, state)?;

        finish(visitor, state)
    }

    /// Reads the index block, if the file has one.
    fn read_index_block(&self) -> parse::Result<Option<(CommonHeader, Vec<u8>)>> {
        let mut input = self.source.open()?;
        let header = CommonHeader::read(&mut input)?;

        if !header.has_index() {
            return Ok(None);
        }

        input.seek_to(header.index_offset)?;
        let block = binary::read_bytes(&mut input, header.index_length as usize)?;

        Ok(Some((header, block)))
    }
}

/// Reads read records from `state` until every read has been reported or a
/// visitor stops the pass.
fn read_reads<V: Visitor>(
    input: &mut Input,
    control: &mut Control,
    visitor: &mut V,
    header: &CommonHeader,
    mut state: State,
) -> parse::Result<State> {
    while state.keep_parsing() && state.ordinal() < u64::from(header.num_reads) {
        if header.has_index() && state.offset() == header.index_offset {
            input.advance_to(header.index_end())?;
            state = state.at(input.position());
        }

        control.enter(state);

        let read = ReadHeader::read(input, state.offset())?;

        match visitor.visit_read(control, &read)? {
            Visit::Descend(mut read_visitor) => {
                let data = ReadData::read(input, &read, header.num_flows)?;
                read_visitor.visit_read_data(control, &data)?;
                visitor.end_read(control, read_visitor)?;
            }
            Visit::Skip => binary::skip(input, read.data_length(header.num_flows))?,
        }

        state = control.apply(state.next_record(input.position()));
    }

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
// Flowgrams
////////////////////////////////////////////////////////////////////////////////////////

/// A fully decoded read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Flowgram {
    /// The read header.
    header: ReadHeader,

    /// The data section.
    data: ReadData,

    /// The valid range derived from the header's clip points.
    valid_range: Arc<Range>,
}

impl Flowgram {
    /// Pairs a read header with its data section.
    fn new(header: ReadHeader, data: ReadData, cache: Option<&Cache>) -> Self {
        let valid_range = header.valid_range();
        let valid_range = match cache {
            Some(cache) => cache.intern(valid_range),
            None => Arc::new(valid_range),
        };

        Self {
            header,
            data,
            valid_range,
        }
    }

    /// Gets the read name.
    pub fn name(&self) -> &str {
        &self.header.name
    }

    /// Gets the read header.
    pub fn header(&self) -> &ReadHeader {
        &self.header
    }

    /// Gets the called bases.
    pub fn bases(&self) -> &NucleotideSequence {
        &self.data.bases
    }

    /// Gets the phred quality of each base.
    pub fn qualities(&self) -> &[u8] {
        &self.data.qualities
    }

    /// Gets the flow values.
    pub fn flowgram(&self) -> &[u16] {
        &self.data.flowgram
    }

    /// Gets the high-quality, adapter-free portion of the read.
    pub fn valid_range(&self) -> Range {
        *self.valid_range
    }
}

/// Collects every decoded read of a pass.
#[derive(Debug, Default)]
pub struct Collector {
    /// The reads in file order.
    reads: Vec<Flowgram>,

    /// The header of the read being decoded.
    current: Option<ReadHeader>,

    /// Whether to stop after the first read.
    first_only: bool,

    /// Shares the valid ranges of collected reads, if set.
    cache: Option<Arc<Cache>>,
}

impl Collector {
    /// Creates a collector whose reads share their valid ranges through
    /// `cache`.
    pub fn with_cache(cache: Arc<Cache>) -> Self {
        Self {
            cache: Some(cache),
            ..Default::default()
        }
    }

    /// Consumes `self` and returns the reads.
    pub fn into_reads(self) -> Vec<Flowgram> {
        self.reads
    }
}

/// Keeps the data section of one read.
#[derive(Debug, Default)]
pub struct DataCollector(Option<ReadData>);

impl ReadVisitor for DataCollector {
    fn visit_read_data(&mut self, _: &mut Control, data: &ReadData) -> parse::Result<()> {
        self.0 = Some(data.clone());
        Ok(())
    }
}

impl Visitor for Collector {
    type Read = DataCollector;

    fn visit_read(
        &mut self,
        _: &mut Control,
        header: &ReadHeader,
    ) -> parse::Result<Visit<DataCollector>> {
        self.current = Some(header.clone());
        Ok(Visit::Descend(DataCollector::default()))
    }

    fn end_read(&mut self, control: &mut Control, read: DataCollector) -> parse::Result<()> {
        if let (Some(header), Some(data)) = (self.current.take(), read.0) {
            self.reads
                .push(Flowgram::new(header, data, self.cache.as_deref()));
        }

        if self.first_only {
            control.stop_parsing();
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Datastore
////////////////////////////////////////////////////////////////////////////////////////

/// Records a bookmark for every read that passes a filter.
struct Indexer<'a> {
    /// The id filter.
    filter: &'a mut dyn FnMut(&String) -> bool,

    /// The bookmarks.
    index: IndexMap<String, Bookmark>,
}

impl Visitor for Indexer<'_> {
    type Read = ();

    fn visit_read(&mut self, control: &mut Control, header: &ReadHeader) -> parse::Result<Visit<()>> {
        if (self.filter)(&header.name) {
            self.index
                .insert(header.name.clone(), control.create_bookmark()?);
        }

        Ok(Visit::Skip)
    }
}

impl Parser {
    /// Builds the bookmarks from the manifest, or returns [`None`] when the
    /// file has no usable manifest.
    fn index_from_manifest(
        &self,
        filter: &mut dyn FnMut(&String) -> bool,
    ) -> parse::Result<Option<IndexMap<String, Bookmark>>> {
        let Some((header, block)) = self.read_index_block()? else {
            debug!("sff file has no index block");
            return Ok(None);
        };

        let Some(mut entries) = manifest::decode(&block) else {
            return Ok(None);
        };

        if entries.len() != header.num_reads as usize {
            debug!(
                "sff manifest lists {} reads, header declares {}",
                entries.len(),
                header.num_reads
            );
            return Ok(None);
        }

        entries.sort_by_key(|entry| entry.offset);

        Ok(Some(
            entries
                .into_iter()
                .enumerate()
                .filter(|(_, entry)| filter(&entry.name))
                .map(|(ordinal, entry)| {
                    let bookmark = Bookmark::new(Format::Sff, entry.offset, ordinal as u64);
                    (entry.name, bookmark)
                })
                .collect(),
        ))
    }
}

/// Hands every read to a callback once its data section is decoded.
struct Scanner<'a> {
    /// The callback; returns `false` to stop the pass.
    visit: &'a mut dyn FnMut(String, Flowgram) -> bool,

    /// The header of the read being decoded.
    current: Option<ReadHeader>,

    /// Shares the valid ranges of scanned reads, if set.
    cache: Option<Arc<Cache>>,
}

impl Visitor for Scanner<'_> {
    type Read = DataCollector;

    fn visit_read(
        &mut self,
        _: &mut Control,
        header: &ReadHeader,
    ) -> parse::Result<Visit<DataCollector>> {
        self.current = Some(header.clone());
        Ok(Visit::Descend(DataCollector::default()))
    }

    fn end_read(&mut self, control: &mut Control, read: DataCollector) -> parse::Result<()> {
        let (Some(header), Some(data)) = (self.current.take(), read.0) else {
            return Ok(());
        };

        let name = header.name.clone();

        if !(self.visit)(name, Flowgram::new(header, data, self.cache.as_deref())) {
            control.stop_parsing();
        }

        Ok(())
    }
}

impl datastore::Driver for Parser {
    type Id = String;
    type Record = Flowgram;

    fn can_create_bookmark(&self) -> bool {
        Parser::can_create_bookmark(self)
    }

    fn index(
        &self,
        filter: &mut dyn FnMut(&String) -> bool,
    ) -> parse::Result<IndexMap<String, Bookmark>> {
        if let Some(index) = self.index_from_manifest(filter)? {
            debug!("indexed sff file from its manifest");
            return Ok(index);
        }

        debug!("falling back to a full sff indexing pass");

        let mut indexer = Indexer {
            filter,
            index: IndexMap::new(),
        };
        self.parse(&mut indexer)?;

        Ok(indexer.index)
    }

    fn fetch(&self, id: &String, bookmark: &Bookmark) -> parse::Result<Flowgram> {
        let mut collector = Collector {
            first_only: true,
            cache: self.cache.clone(),
            ..Default::default()
        };
        self.parse_from(&mut collector, bookmark)?;

        let read = collector
            .into_reads()
            .pop()
            .ok_or(Malformed::Truncated)?;

        if read.name() != id {
            return Err(ParseError::UnexpectedRead {
                expected: id.clone(),
                found: read.name().to_string(),
            }
            .into());
        }

        Ok(read)
    }

    fn scan(&self, visit: &mut dyn FnMut(String, Flowgram) -> bool) -> parse::Result<()> {
        self.parse(&mut Scanner {
            visit,
            current: None,
            cache: self.cache.clone(),
        })?;
        Ok(())
    }
}
