//! The ACE contig assembly format.
//!
//! An ACE file is an optional `AS` header followed by contigs and tag blocks.
//! Each contig (`CO`) carries its padded consensus, the consensus qualities
//! (`BQ`), the placement of every read (`AF`), the base segments (`BS`), and
//! then every read (`RD`, `QA`, `DS`). Tag blocks (`RT{`, `CT{`, `WA{`) may
//! appear between contigs.
//!
//! Sequence and quality blocks end at a blank line. Tag blocks end at a line
//! starting with `}`, and a consensus tag may hold a `COMMENT{` block ending at
//! a line starting with `C}`. Contigs and tag blocks are the top-level records
//! of the format.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;
use std::sync::LazyLock;

use indexmap::IndexMap;
use regex::Regex;
use tracing::trace;

use crate::assembly;
use crate::assembly::Direction;
use crate::assembly::Layout;
use crate::datastore;
use crate::line::Line;
use crate::line::Lines;
use crate::nucleotide::NucleotideSequence;
use crate::parse;
use crate::parse::Bookmark;
use crate::parse::Control;
use crate::parse::Format;
use crate::parse::Malformed;
use crate::parse::Outcome;
use crate::parse::Source;
use crate::parse::State;
use crate::parse::Unsupported;
use crate::parse::Visit;
use crate::range::Cache;
use crate::range::CoordinateSystem;
use crate::Range;

/// The key of each `KEY: value` pair of a read description.
static DESCRIPTION_KEY: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"([A-Z_]+):").unwrap_or_else(|err| unreachable!("invalid regex: {err}"))
});

/// The keyword of the assembly header.
const ASSEMBLY: &str = "AS";

/// The keyword of a contig.
const CONTIG: &str = "CO";

/// The keyword of the consensus qualities.
const BASE_QUALITIES: &str = "BQ";

/// The keyword of a read placement.
const ASSEMBLED_FROM: &str = "AF";

/// The keyword of a base segment.
const BASE_SEGMENT: &str = "BS";

/// The keyword of a read.
const READ: &str = "RD";

/// The keyword of the clip points of a read.
const QUALITY: &str = "QA";

/// The keyword of the description of a read.
const DESCRIPTION: &str = "DS";

/// The line that opens a read tag.
const READ_TAG: &str = "RT{";

/// The line that opens a consensus tag.
const CONSENSUS_TAG: &str = "CT{";

/// The line that opens a whole-assembly tag.
const WHOLE_ASSEMBLY_TAG: &str = "WA{";

/// The line that opens a comment within a consensus tag.
const BEGIN_COMMENT: &str = "COMMENT{";

/// The line that closes a comment within a consensus tag.
const END_COMMENT: &str = "C}";

/// The line that closes a tag block.
const END_TAG: &str = "}";

/// The flag that excludes a consensus tag from translation.
const NO_TRANS: &str = "NoTrans";

/// Gets the first token of a line.
fn keyword(line: &Line) -> &str {
    line.text.split_whitespace().next().unwrap_or_default()
}

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An ACE grammar error.
#[derive(Debug, Eq, PartialEq)]
pub enum ParseError {
    /// A line that has no place at its position.
    UnexpectedLine {
        /// The byte offset of the line.
        offset: u64,

        /// The line.
        text: String,
    },

    /// A line whose fields could not be parsed.
    InvalidLine {
        /// The kind of line.
        kind: &'static str,

        /// The line.
        text: String,
    },

    /// The input ended inside a block.
    Unterminated(&'static str),

    /// A tag block without its header line.
    EmptyTag(&'static str),

    /// A sequence or quality block that could not be decoded.
    InvalidBlock {
        /// The kind of block.
        kind: &'static str,

        /// The contig or read the block belongs to.
        id: String,
    },

    /// A read without a matching `AF` line.
    MissingPlacement(String),

    /// Two reads of one contig share an id.
    DuplicateRead(String),

    /// A read placed entirely off its contig's consensus.
    OutsideConsensus(String),

    /// A bookmark led to a different contig than the one requested.
    UnexpectedContig {
        /// The requested contig.
        expected: String,

        /// The contig found at the bookmark.
        found: String,
    },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnexpectedLine { offset, text } => {
                write!(f, "unexpected line at byte {offset}: {text:?}")
            }
            ParseError::InvalidLine { kind, text } => write!(f, "invalid {kind} line: {text:?}"),
            ParseError::Unterminated(block) => write!(f, "unterminated {block} block"),
            ParseError::EmptyTag(tag) => write!(f, "empty {tag} block"),
            ParseError::InvalidBlock { kind, id } => write!(f, "invalid {kind} block for {id}"),
            ParseError::MissingPlacement(read) => {
                write!(f, "read {read} has no placement on its contig")
            }
            ParseError::DuplicateRead(read) => write!(f, "read {read} appears twice in its contig"),
            ParseError::OutsideConsensus(read) => {
                write!(f, "read {read} does not overlap its contig's consensus")
            }
            ParseError::UnexpectedContig { expected, found } => {
                write!(f, "expected contig {expected} at bookmark, found contig {found}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for parse::Error {
    fn from(err: ParseError) -> Self {
        parse::Error::Malformed(Malformed::Ace(err))
    }
}

/// The error for a line that has no place at its position.
fn unexpected(line: Line) -> parse::Error {
    ParseError::UnexpectedLine {
        offset: line.offset,
        text: line.text,
    }
    .into()
}

/// Splits a line into exactly `N` fields after its keyword.
fn fields<'a, const N: usize>(text: &'a str, kind: &'static str) -> parse::Result<[&'a str; N]> {
    let invalid = || ParseError::InvalidLine {
        kind,
        text: text.to_string(),
    };

    let tokens = text.split_whitespace().skip(1).collect::<Vec<_>>();
    <[&str; N]>::try_from(tokens).map_err(|_| invalid().into())
}

/// Parses one field of a line of kind `kind`.
fn number<T: FromStr>(value: &str, text: &str, kind: &'static str) -> parse::Result<T> {
    value.parse::<T>().map_err(|_| {
        ParseError::InvalidLine {
            kind,
            text: text.to_string(),
        }
        .into()
    })
}

/// Parses the direction field of a line of kind `kind`.
fn direction(value: &str, text: &str, kind: &'static str) -> parse::Result<Direction> {
    number::<Direction>(value, text, kind)
}

/// Builds a range from one-based inclusive coordinates.
fn residue_range(start: i64, end: i64, text: &str, kind: &'static str) -> parse::Result<Range> {
    Range::try_from_system(CoordinateSystem::ResidueBased, start, end).map_err(|_| {
        ParseError::InvalidLine {
            kind,
            text: text.to_string(),
        }
        .into()
    })
}

////////////////////////////////////////////////////////////////////////////////////////
// Contig items
////////////////////////////////////////////////////////////////////////////////////////

/// The `CO` line of a contig.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ContigHeader {
    /// The contig id.
    pub id: String,

    /// The number of padded consensus bases.
    pub num_bases: u32,

    /// The number of reads.
    pub num_reads: u32,

    /// The number of base segments.
    pub num_base_segments: u32,

    /// Whether the contig is complemented relative to how it was assembled.
    pub direction: Direction,
}

impl ContigHeader {
    /// Parses a `CO` line.
    fn parse(text: &str) -> parse::Result<Self> {
        let [id, bases, reads, segments, complemented] = fields::<5>(text, CONTIG)?;

        Ok(Self {
            id: id.to_string(),
            num_bases: number(bases, text, CONTIG)?,
            num_reads: number(reads, text, CONTIG)?,
            num_base_segments: number(segments, text, CONTIG)?,
            direction: direction(complemented, text, CONTIG)?,
        })
    }
}

/// The placement of a read on its contig (an `AF` line).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssembledFrom {
    /// The read id.
    pub read: String,

    /// The orientation of the read.
    pub direction: Direction,

    /// The one-based padded consensus position of the first read base. May
    /// be less than one when the read hangs off the start of the contig.
    pub padded_start: i64,
}

impl AssembledFrom {
    /// Parses an `AF` line.
    fn parse(text: &str) -> parse::Result<Self> {
        let [read, complemented, start] = fields::<3>(text, ASSEMBLED_FROM)?;

        Ok(Self {
            read: read.to_string(),
            direction: direction(complemented, text, ASSEMBLED_FROM)?,
            padded_start: number(start, text, ASSEMBLED_FROM)?,
        })
    }

    /// Gets the zero-based consensus offset of the first read base.
    pub fn offset(&self) -> i64 {
        self.padded_start - 1
    }
}

/// The read chosen for a stretch of the consensus (a `BS` line).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct BaseSegment {
    /// The read id.
    pub read: String,

    /// The padded consensus positions.
    pub range: Range,
}

impl BaseSegment {
    /// Parses a `BS` line.
    fn parse(text: &str) -> parse::Result<Self> {
        let [start, end, read] = fields::<3>(text, BASE_SEGMENT)?;

        let start = number(start, text, BASE_SEGMENT)?;
        let end = number(end, text, BASE_SEGMENT)?;

        Ok(Self {
            read: read.to_string(),
            range: residue_range(start, end, text, BASE_SEGMENT)?,
        })
    }
}

/// A read of a contig: its `RD` block with the `QA` and `DS` lines that
/// follow it.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Read {
    /// The read id.
    pub id: String,

    /// The padded bases, in contig orientation.
    pub sequence: NucleotideSequence,

    /// The number of whole-read items.
    pub num_whole_read_items: u32,

    /// The number of read tags.
    pub num_read_tags: u32,

    /// The high-quality portion of the padded read, if any base is.
    pub quality_clip: Option<Range>,

    /// The portion of the padded read that aligns to the consensus, if any.
    pub align_clip: Option<Range>,

    /// The `KEY: value` pairs of the description line.
    pub description: IndexMap<String, String>,
}

impl Read {
    /// Parses an `RD` line and the sequence block that follows it.
    fn parse(text: &str, block: &[String]) -> parse::Result<Self> {
        let [id, _, items, tags] = fields::<4>(text, READ)?;

        let sequence = block
            .concat()
            .parse::<NucleotideSequence>()
            .map_err(|_| ParseError::InvalidBlock {
                kind: READ,
                id: id.to_string(),
            })?;

        Ok(Self {
            id: id.to_string(),
            sequence,
            num_whole_read_items: number(items, text, READ)?,
            num_read_tags: number(tags, text, READ)?,
            quality_clip: None,
            align_clip: None,
            description: IndexMap::new(),
        })
    }

    /// Applies a `QA` line.
    fn apply_clips(&mut self, text: &str) -> parse::Result<()> {
        let [quality_start, quality_end, align_start, align_end] =
            fields::<4>(text, QUALITY)?;

        let clip = |start: &str, end: &str| -> parse::Result<Option<Range>> {
            let start = number::<i64>(start, text, QUALITY)?;
            let end = number::<i64>(end, text, QUALITY)?;

            // Non-positive clip points mean that no base qualifies.
            match start < 1 || end < 1 {
                true => Ok(None),
                false => residue_range(start, end, text, QUALITY).map(Some),
            }
        };

        self.quality_clip = clip(quality_start, quality_end)?;
        self.align_clip = clip(align_start, align_end)?;

        Ok(())
    }
}

/// Splits a description line into its `KEY: value` pairs.
fn parse_description(text: &str) -> IndexMap<String, String> {
    let keys = DESCRIPTION_KEY
        .captures_iter(text)
        .filter_map(|captures| Some((captures.get(0)?, captures.get(1)?)))
        .collect::<Vec<_>>();

    keys.iter()
        .enumerate()
        .map(|(i, (whole, key))| {
            let end = keys
                .get(i + 1)
                .map(|(next, _)| next.start())
                .unwrap_or(text.len());
            (
                key.as_str().to_string(),
                text[whole.end()..end].trim().to_string(),
            )
        })
        .collect()
}

////////////////////////////////////////////////////////////////////////////////////////
// Tags
////////////////////////////////////////////////////////////////////////////////////////

/// An annotation on a span of a read (an `RT{` block).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReadTag {
    /// The read id.
    pub read: String,

    /// The tag type.
    pub kind: String,

    /// The program that created the tag.
    pub program: String,

    /// The tagged padded read positions.
    pub range: Range,

    /// When the tag was created.
    pub date: String,

    /// The lines after the header line.
    pub data: Vec<String>,
}

impl ReadTag {
    /// Parses the lines of an `RT{` block.
    fn parse(block: Vec<String>) -> parse::Result<Self> {
        let (header, data) = split_tag(block, READ_TAG)?;
        let text = format!("{READ_TAG} {header}");
        let [read, kind, program, start, end, date] = fields::<6>(&text, READ_TAG)?;

        let start = number(start, &text, READ_TAG)?;
        let end = number(end, &text, READ_TAG)?;

        Ok(Self {
            read: read.to_string(),
            kind: kind.to_string(),
            program: program.to_string(),
            range: residue_range(start, end, &text, READ_TAG)?,
            date: date.to_string(),
            data,
        })
    }
}

/// An annotation on a span of a consensus (a `CT{` block).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ConsensusTag {
    /// The contig id.
    pub contig: String,

    /// The tag type.
    pub kind: String,

    /// The program that created the tag.
    pub program: String,

    /// The tagged padded consensus positions.
    pub range: Range,

    /// When the tag was created.
    pub date: String,

    /// Whether the tag is excluded from translation.
    pub no_trans: bool,

    /// The lines after the header line, comment excluded.
    pub data: Vec<String>,

    /// The text of the `COMMENT{` block, if any.
    pub comment: Option<String>,
}

impl ConsensusTag {
    /// Parses the lines of a `CT{` block.
    fn parse(block: Vec<String>) -> parse::Result<Self> {
        let (header, lines) = split_tag(block, CONSENSUS_TAG)?;
        let text = format!("{CONSENSUS_TAG} {header}");

        let tokens = text.split_whitespace().skip(1).collect::<Vec<_>>();
        let (tokens, no_trans) = match tokens.split_last() {
            Some((&NO_TRANS, rest)) => (rest, true),
            _ => (&tokens[..], false),
        };

        let [contig, kind, program, start, end, date] = <[&str; 6]>::try_from(tokens)
            .map_err(|_| ParseError::InvalidLine {
                kind: CONSENSUS_TAG,
                text: text.clone(),
            })?;

        let start = number(start, &text, CONSENSUS_TAG)?;
        let end = number(end, &text, CONSENSUS_TAG)?;

        let mut data = Vec::new();
        let mut comment: Option<Vec<String>> = None;
        let mut lines = lines.into_iter();

        while let Some(line) = lines.next() {
            if line.starts_with(BEGIN_COMMENT) {
                let mut text = Vec::new();

                loop {
                    match lines.next() {
                        Some(line) if line.starts_with(END_COMMENT) => break,
                        Some(line) => text.push(line),
                        None => return Err(ParseError::Unterminated(BEGIN_COMMENT).into()),
                    }
                }

                comment.get_or_insert_with(Vec::new).extend(text);
            } else {
                data.push(line);
            }
        }

        Ok(Self {
            contig: contig.to_string(),
            kind: kind.to_string(),
            program: program.to_string(),
            range: residue_range(start, end, &text, CONSENSUS_TAG)?,
            date: date.to_string(),
            no_trans,
            data,
            comment: comment.map(|lines| lines.join("\n")),
        })
    }
}

/// An annotation on the whole assembly (a `WA{` block).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WholeAssemblyTag {
    /// The tag type.
    pub kind: String,

    /// The program that created the tag.
    pub program: String,

    /// When the tag was created.
    pub date: String,

    /// The lines after the header line.
    pub data: Vec<String>,
}

impl WholeAssemblyTag {
    /// Parses the lines of a `WA{` block.
    fn parse(block: Vec<String>) -> parse::Result<Self> {
        let (header, data) = split_tag(block, WHOLE_ASSEMBLY_TAG)?;
        let text = format!("{WHOLE_ASSEMBLY_TAG} {header}");
        let [kind, program, date] = fields::<3>(&text, WHOLE_ASSEMBLY_TAG)?;

        Ok(Self {
            kind: kind.to_string(),
            program: program.to_string(),
            date: date.to_string(),
            data,
        })
    }
}

/// Splits the non-blank lines of a tag block into its header line and the
/// rest.
fn split_tag(block: Vec<String>, tag: &'static str) -> parse::Result<(String, Vec<String>)> {
    let mut lines = block.into_iter().filter(|line| !line.trim().is_empty());
    let header = lines.next().ok_or(ParseError::EmptyTag(tag))?;
    Ok((header, lines.collect()))
}

/// Reads the lines of a tag block up to its closing line.
fn read_tag_block(lines: &mut Lines, tag: &'static str) -> parse::Result<Vec<String>> {
    Ok(lines
        .read_until(END_TAG)?
        .ok_or(ParseError::Unterminated(tag))?)
}

////////////////////////////////////////////////////////////////////////////////////////
// Visitors
////////////////////////////////////////////////////////////////////////////////////////

/// Receives the records of an ACE file.
pub trait Visitor {
    /// The visitor for the contents of a contig.
    type Contig: ContigVisitor;

    /// Called with the contig and read counts of the `AS` line, if present.
    fn visit_header(&mut self, _: &mut Control, _contigs: u32, _reads: u32) -> parse::Result<()> {
        Ok(())
    }

    /// Called at each `CO` line. Skipping a contig walks over its lines
    /// without decoding them.
    fn visit_contig(
        &mut self,
        _: &mut Control,
        _: &ContigHeader,
    ) -> parse::Result<Visit<Self::Contig>> {
        Ok(Visit::Skip)
    }

    /// Called with the contig visitor once the contig is done.
    fn end_contig(&mut self, _: &mut Control, _: Self::Contig) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each read tag.
    fn visit_read_tag(&mut self, _: &mut Control, _: &ReadTag) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each consensus tag.
    fn visit_consensus_tag(&mut self, _: &mut Control, _: &ConsensusTag) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each whole-assembly tag.
    fn visit_whole_assembly_tag(
        &mut self,
        _: &mut Control,
        _: &WholeAssemblyTag,
    ) -> parse::Result<()> {
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

/// Receives the contents of one contig.
pub trait ContigVisitor {
    /// Called with the padded consensus.
    fn visit_consensus(&mut self, _: &mut Control, _: &NucleotideSequence) -> parse::Result<()> {
        Ok(())
    }

    /// Called with the quality of each unpadded consensus base.
    fn visit_consensus_qualities(&mut self, _: &mut Control, _: &[u8]) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each `AF` line.
    fn visit_assembled_from(&mut self, _: &mut Control, _: &AssembledFrom) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each `BS` line.
    fn visit_base_segment(&mut self, _: &mut Control, _: &BaseSegment) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each read once its `QA` and `DS` lines are applied.
    fn visit_read(&mut self, _: &mut Control, _: &Read) -> parse::Result<()> {
        Ok(())
    }
}

impl ContigVisitor for () {}

////////////////////////////////////////////////////////////////////////////////////////
// Parser
////////////////////////////////////////////////////////////////////////////////////////

/// An ACE driver.
#[derive(Debug)]
pub struct Parser {
    /// The source.
    source: Source,

    /// Shares the read ranges of built contigs, if set.
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

    /// Builds contigs whose read placements and valid ranges are shared
    /// through `cache`.
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
        let mut lines = Lines::new(self.source.open()?);
        let mut control = Control::new(Format::Ace, lines.is_seekable());
        control.enter(State::start());

        match next_nonblank(&mut lines)? {
            Some(line) if keyword(&line) == ASSEMBLY => {
                let [contigs, reads] = fields::<2>(&line.text, ASSEMBLY)?;
                visitor.visit_header(
                    &mut control,
                    number(contigs, &line.text, ASSEMBLY)?,
                    number(reads, &line.text, ASSEMBLY)?,
                )?;
            }
            Some(line) => lines.push_back(line),
            None => {}
        }

        let state = control.apply(State::start().at(lines.position()));
        let state = read_records(&mut lines, &mut control, visitor, state)?;

        finish(visitor, state)
    }

    /// Resumes visiting at the record identified by `bookmark`.
    pub fn parse_from<V: Visitor>(
        &self,
        visitor: &mut V,
        bookmark: &Bookmark,
    ) -> parse::Result<Outcome> {
        let state = bookmark.resume(Format::Ace)?;

        if !self.can_create_bookmark() {
            return Err(Unsupported::Bookmarks.into());
        }

        trace!(
            offset = state.offset(),
            record = state.ordinal(),
            "resuming ace pass"
        );

        // Bookmarks made while visiting the header resume from the start.
        if state.offset() == 0 {
            return self.parse(visitor);
        }

        let mut input = self.source.open()?;
        input.seek_to(state.offset())?;

        let mut lines = Lines::new(input);
        let mut control = Control::new(Format::Ace, true);

        let state = read_records(&mut lines, &mut control, visitor, state)?;
        finish(visitor, state)
    }
}

/// Reads contigs and tag blocks from `state` until the input ends or a
/// visitor stops the pass.
fn read_records<V: Visitor>(
    lines: &mut Lines,
    control: &mut Control,
    visitor: &mut V,
    mut state: State,
) -> parse::Result<State> {
    while state.keep_parsing() {
        let Some(line) = next_nonblank(lines)? else {
            break;
        };

        state = state.at(line.offset);
        control.enter(state);

        match keyword(&line) {
            CONTIG => {
                let header = ContigHeader::parse(&line.text)?;

                match visitor.visit_contig(control, &header)? {
                    Visit::Descend(mut contig) => {
                        read_contig(lines, control, &header, Some(&mut contig))?;
                        visitor.end_contig(control, contig)?;
                    }
                    Visit::Skip => read_contig::<V::Contig>(lines, control, &header, None)?,
                }
            }
            READ_TAG => {
                let tag = ReadTag::parse(read_tag_block(lines, READ_TAG)?)?;
                visitor.visit_read_tag(control, &tag)?;
            }
            CONSENSUS_TAG => {
                let tag = ConsensusTag::parse(read_tag_block(lines, CONSENSUS_TAG)?)?;
                visitor.visit_consensus_tag(control, &tag)?;
            }
            WHOLE_ASSEMBLY_TAG => {
                let tag = WholeAssemblyTag::parse(read_tag_block(lines, WHOLE_ASSEMBLY_TAG)?)?;
                visitor.visit_whole_assembly_tag(control, &tag)?;
            }
            _ => return Err(unexpected(line)),
        }

        state = control.apply(state.next_record(lines.position()));
    }

    Ok(state)
}

/// Reads the lines of one contig after its `CO` line, up to the next contig,
/// tag block, or the end of the input.
fn read_contig<C: ContigVisitor>(
    lines: &mut Lines,
    control: &mut Control,
    header: &ContigHeader,
    mut visitor: Option<&mut C>,
) -> parse::Result<()> {
    let consensus = lines.read_until_blank()?;

    if let Some(visitor) = visitor.as_deref_mut() {
        let consensus = consensus
            .concat()
            .parse::<NucleotideSequence>()
            .map_err(|_| ParseError::InvalidBlock {
                kind: CONTIG,
                id: header.id.clone(),
            })?;
        visitor.visit_consensus(control, &consensus)?;
    }

    let mut read: Option<Read> = None;
    let mut in_read = false;

    while let Some(line) = next_nonblank(lines)? {
        match keyword(&line) {
            CONTIG | READ_TAG | CONSENSUS_TAG | WHOLE_ASSEMBLY_TAG => {
                lines.push_back(line);
                break;
            }
            BASE_QUALITIES => {
                let qualities = lines.read_until_blank()?;

                if let Some(visitor) = visitor.as_deref_mut() {
                    let qualities = qualities
                        .iter()
                        .flat_map(|line| line.split_whitespace())
                        .map(|quality| quality.parse::<u8>())
                        .collect::<Result<Vec<_>, _>>()
                        .map_err(|_| ParseError::InvalidBlock {
                            kind: BASE_QUALITIES,
                            id: header.id.clone(),
                        })?;
                    visitor.visit_consensus_qualities(control, &qualities)?;
                }
            }
            ASSEMBLED_FROM => {
                let placement = AssembledFrom::parse(&line.text)?;

                if let Some(visitor) = visitor.as_deref_mut() {
                    visitor.visit_assembled_from(control, &placement)?;
                }
            }
            BASE_SEGMENT => {
                let segment = BaseSegment::parse(&line.text)?;

                if let Some(visitor) = visitor.as_deref_mut() {
                    visitor.visit_base_segment(control, &segment)?;
                }
            }
            READ => {
                flush_read(control, &mut read, visitor.as_deref_mut())?;

                let block = lines.read_until_blank()?;
                in_read = true;

                if visitor.is_some() {
                    read = Some(Read::parse(&line.text, &block)?);
                }
            }
            QUALITY if in_read => {
                if let Some(read) = read.as_mut() {
                    read.apply_clips(&line.text)?;
                }
            }
            DESCRIPTION if in_read => {
                if let Some(read) = read.as_mut() {
                    let text = line.text.trim_start();
                    read.description = parse_description(&text[DESCRIPTION.len()..]);
                }
            }
            _ => return Err(unexpected(line)),
        }
    }

    flush_read(control, &mut read, visitor)
}

/// Reports the read being assembled, if any.
fn flush_read<C: ContigVisitor>(
    control: &mut Control,
    read: &mut Option<Read>,
    visitor: Option<&mut C>,
) -> parse::Result<()> {
    match (read.take(), visitor) {
        (Some(read), Some(visitor)) => visitor.visit_read(control, &read),
        _ => Ok(()),
    }
}

/// Reads the next line that is not blank.
fn next_nonblank(lines: &mut Lines) -> parse::Result<Option<Line>> {
    while let Some(line) = lines.next_line()? {
        if !line.is_blank() {
            return Ok(Some(line));
        }
    }

    Ok(None)
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
// Contigs
////////////////////////////////////////////////////////////////////////////////////////

/// Gathers the contents of one contig to build an [`assembly::Contig`].
#[derive(Debug)]
pub struct ContigBuilder {
    /// The contig id.
    id: String,

    /// The padded consensus.
    consensus: Option<NucleotideSequence>,

    /// The placement of every read, by read id.
    placements: HashMap<String, AssembledFrom>,

    /// The reads in file order.
    reads: Vec<Read>,

    /// Shares the ranges of placed reads, if set.
    cache: Option<Arc<Cache>>,
}

impl ContigBuilder {
    /// Starts a contig.
    pub fn new(header: &ContigHeader) -> Self {
        Self {
            id: header.id.clone(),
            consensus: None,
            placements: HashMap::new(),
            reads: Vec::new(),
            cache: None,
        }
    }

    /// Shares the ranges of every placed read through `cache`, if any.
    pub fn with_cache(mut self, cache: Option<Arc<Cache>>) -> Self {
        self.cache = cache;
        self
    }

    /// Places every read on the consensus.
    ///
    /// Reads are stored against the consensus as reference-delta sequences.
    /// A read's valid range is its align clip, or the whole read when the
    /// `QA` line is missing or empty.
    pub fn try_build(self) -> parse::Result<assembly::Contig> {
        let consensus = self
            .consensus
            .unwrap_or_else(|| NucleotideSequence::new(Vec::new()));
        let placements = self.placements;

        let decode = |read: Read| -> Result<Layout, ParseError> {
            let placement = placements
                .get(&read.id)
                .ok_or_else(|| ParseError::MissingPlacement(read.id.clone()))?;

            let whole = Range::of_length(0, read.sequence.len() as u64)
                .unwrap_or_else(|_| Range::empty_at(0));

            Ok(Layout {
                direction: placement.direction,
                offset: placement.offset(),
                valid_range: read.align_clip.unwrap_or(whole),
                gapped: read.sequence,
                id: read.id,
            })
        };

        let mut builder = assembly::Builder::new(self.id, consensus, decode);

        if let Some(cache) = self.cache {
            builder = builder.with_cache(cache);
        }

        for read in self.reads {
            builder = builder.push_read(read).map_err(contig_error)?;
        }

        builder.try_build().map_err(contig_error)
    }
}

/// Reports a contig that cannot be assembled as malformed input where the
/// file is to blame.
fn contig_error(err: assembly::Error) -> parse::Error {
    match err {
        assembly::Error::DuplicateRead(read) => ParseError::DuplicateRead(read).into(),
        assembly::Error::OutsideConsensus(read) => ParseError::OutsideConsensus(read).into(),
        assembly::Error::Decode(err) => match err.downcast::<ParseError>() {
            Ok(err) => (*err).into(),
            Err(err) => parse::Error::Visitor(err),
        },
        err => parse::Error::visitor(err),
    }
}

impl ContigVisitor for ContigBuilder {
    fn visit_consensus(
        &mut self,
        _: &mut Control,
        consensus: &NucleotideSequence,
    ) -> parse::Result<()> {
        self.consensus = Some(consensus.clone());
        Ok(())
    }

    fn visit_assembled_from(
        &mut self,
        _: &mut Control,
        placement: &AssembledFrom,
    ) -> parse::Result<()> {
        self.placements
            .insert(placement.read.clone(), placement.clone());
        Ok(())
    }

    fn visit_read(&mut self, _: &mut Control, read: &Read) -> parse::Result<()> {
        self.reads.push(read.clone());
        Ok(())
    }
}

/// Builds every contig of a pass.
#[derive(Debug, Default)]
pub struct Collector {
    /// The contigs in file order.
    contigs: Vec<assembly::Contig>,

    /// Whether to stop after the first contig.
    first_only: bool,

    /// Shares the ranges of placed reads, if set.
    cache: Option<Arc<Cache>>,
}

impl Collector {
    /// Creates a collector whose contigs share their read ranges through
    /// `cache`.
    pub fn with_cache(cache: Arc<Cache>) -> Self {
        Self {
            cache: Some(cache),
            ..Default::default()
        }
    }

    /// Consumes `self` and returns the contigs.
    pub fn into_contigs(self) -> Vec<assembly::Contig> {
        self.contigs
    }
}

impl Visitor for Collector {
    type Contig = ContigBuilder;

    fn visit_contig(
        &mut self,
        _: &mut Control,
        header: &ContigHeader,
    ) -> parse::Result<Visit<ContigBuilder>> {
        Ok(Visit::Descend(
            ContigBuilder::new(header).with_cache(self.cache.clone()),
        ))
    }

    fn end_contig(&mut self, control: &mut Control, contig: ContigBuilder) -> parse::Result<()> {
        self.contigs.push(contig.try_build()?);

        if self.first_only {
            control.stop_parsing();
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Datastore
////////////////////////////////////////////////////////////////////////////////////////

/// Records a bookmark for every contig that passes a filter.
struct Indexer<'a> {
    /// The id filter.
    filter: &'a mut dyn FnMut(&String) -> bool,

    /// The bookmarks.
    index: IndexMap<String, Bookmark>,
}

impl Visitor for Indexer<'_> {
    type Contig = ();

    fn visit_contig(&mut self, control: &mut Control, header: &ContigHeader) -> parse::Result<Visit<()>> {
        if (self.filter)(&header.id) {
            self.index
                .insert(header.id.clone(), control.create_bookmark()?);
        }

        Ok(Visit::Skip)
    }
}

/// Hands every contig to a callback as soon as it is built.
struct Scanner<'a> {
    /// The callback; returns `false` to stop the pass.
    visit: &'a mut dyn FnMut(String, assembly::Contig) -> bool,

    /// Shares the ranges of placed reads, if set.
    cache: Option<Arc<Cache>>,
}

impl Visitor for Scanner<'_> {
    type Contig = ContigBuilder;

    fn visit_contig(
        &mut self,
        _: &mut Control,
        header: &ContigHeader,
    ) -> parse::Result<Visit<ContigBuilder>> {
        Ok(Visit::Descend(
            ContigBuilder::new(header).with_cache(self.cache.clone()),
        ))
    }

    fn end_contig(&mut self, control: &mut Control, contig: ContigBuilder) -> parse::Result<()> {
        let contig = contig.try_build()?;

        if !(self.visit)(contig.id().to_string(), contig) {
            control.stop_parsing();
        }

        Ok(())
    }
}

impl datastore::Driver for Parser {
    type Id = String;
    type Record = assembly::Contig;

    fn can_create_bookmark(&self) -> bool {
        Parser::can_create_bookmark(self)
    }

    fn index(
        &self,
        filter: &mut dyn FnMut(&String) -> bool,
    ) -> parse::Result<IndexMap<String, Bookmark>> {
        let mut indexer = Indexer {
            filter,
            index: IndexMap::new(),
        };
        self.parse(&mut indexer)?;

        Ok(indexer.index)
    }

    fn fetch(&self, id: &String, bookmark: &Bookmark) -> parse::Result<assembly::Contig> {
        let mut collector = Collector {
            first_only: true,
            cache: self.cache.clone(),
            ..Default::default()
        };
        self.parse_from(&mut collector, bookmark)?;

        let contig = collector
            .into_contigs()
            .pop()
            .ok_or(Malformed::Truncated)?;

        if contig.id() != id {
            return Err(ParseError::UnexpectedContig {
                expected: id.clone(),
                found: contig.id().to_string(),
            }
            .into());
        }

        Ok(contig)
    }

    fn scan(&self, visit: &mut dyn FnMut(String, assembly::Contig) -> bool) -> parse::Result<()> {
        self.parse(&mut Scanner {
            visit,
            cache: self.cache.clone(),
        })?;
        Ok(())
    }
}
