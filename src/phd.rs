//! The PHD basecall format.
//!
//! A PHD file holds one or more reads (a file holding many is a "phd ball"):
//!
//! ```text
//! BEGIN_SEQUENCE read1 1
//!
//! BEGIN_COMMENT
//! CHROMAT_FILE: read1
//! TRIM: 2 9 0.05
//! END_COMMENT
//!
//! BEGIN_DNA
//! a 20 6
//! c 30 18
//! END_DNA
//!
//! END_SEQUENCE
//!
//! BEGIN_TAG
//! TYPE: polymorphism
//! SOURCE: consed
//! UNPADDED_READ_POS: 1 2
//! DATE: 01/01/20 00:00:00
//! END_TAG
//!
//! WR{
//! template consed 01/01/20 00:00:00
//! name: read1.t
//! }
//! ```
//!
//! Tags and whole-read items belong to the sequence they follow. Every read
//! starts a new top-level record at its `BEGIN_SEQUENCE` line.

use indexmap::IndexMap;
use tracing::trace;

use crate::datastore;
use crate::line::Line;
use crate::line::Lines;
use crate::nucleotide::Nucleotide;
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
use crate::range::CoordinateSystem;
use crate::Range;

/// The line that starts a read.
const BEGIN_SEQUENCE: &str = "BEGIN_SEQUENCE";

/// The line that ends a read.
const END_SEQUENCE: &str = "END_SEQUENCE";

/// The line that starts a comment block.
const BEGIN_COMMENT: &str = "BEGIN_COMMENT";

/// The line that ends a comment block.
const END_COMMENT: &str = "END_COMMENT";

/// The line that starts the basecalls.
const BEGIN_DNA: &str = "BEGIN_DNA";

/// The line that ends the basecalls.
const END_DNA: &str = "END_DNA";

/// The line that starts a read tag.
const BEGIN_TAG: &str = "BEGIN_TAG";

/// The line that ends a read tag.
const END_TAG: &str = "END_TAG";

/// The line that starts a whole-read item.
const BEGIN_WHOLE_READ_ITEM: &str = "WR{";

/// The line that ends a whole-read item.
const END_WHOLE_READ_ITEM: &str = "}";

/// Whether `line` starts with `marker`.
fn is_marker(line: &Line, marker: &str) -> bool {
    line.text.starts_with(marker)
}

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// A PHD grammar error.
#[derive(Debug, Eq, PartialEq)]
pub enum ParseError {
    /// A line that has no place at its position.
    UnexpectedLine {
        /// The byte offset of the line.
        offset: u64,

        /// The line.
        text: String,
    },

    /// The input ended inside a block.
    Unterminated(&'static str),

    /// A `BEGIN_SEQUENCE` line without a read id.
    MissingId(u64),

    /// A basecall line that is not `base quality [peak]`.
    InvalidBasecall(String),

    /// A tag lacks a required field.
    MissingTagField(&'static str),

    /// A tag position is not two one-based coordinates.
    InvalidTagPosition(String),

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
            ParseError::UnexpectedLine { offset, text } => {
                write!(f, "unexpected line at byte {offset}: {text:?}")
            }
            ParseError::Unterminated(block) => write!(f, "unterminated {block} block"),
            ParseError::MissingId(offset) => write!(f, "missing read id at byte {offset}"),
            ParseError::InvalidBasecall(line) => write!(f, "invalid basecall: {line:?}"),
            ParseError::MissingTagField(field) => write!(f, "tag is missing its {field} field"),
            ParseError::InvalidTagPosition(value) => {
                write!(f, "invalid tag position: {value:?}")
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
        parse::Error::Malformed(Malformed::Phd(err))
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

////////////////////////////////////////////////////////////////////////////////////////
// Items
////////////////////////////////////////////////////////////////////////////////////////

/// One called base.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Basecall {
    /// The base.
    pub base: Nucleotide,

    /// The phred quality.
    pub quality: u8,

    /// The position of the trace peak, when given.
    pub peak: Option<u32>,
}

impl std::str::FromStr for Basecall {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ParseError::InvalidBasecall(s.to_string());
        let mut fields = s.split_whitespace();

        let base = fields
            .next()
            .filter(|base| base.chars().count() == 1)
            .and_then(|base| base.chars().next())
            .ok_or_else(invalid)?;
        let base = Nucleotide::try_from(base).map_err(|_| invalid())?;

        let quality = fields
            .next()
            .and_then(|quality| quality.parse::<u8>().ok())
            .ok_or_else(invalid)?;

        let peak = match fields.next() {
            Some(peak) => Some(peak.parse::<u32>().map_err(|_| invalid())?),
            None => None,
        };

        if fields.next().is_some() {
            return Err(invalid());
        }

        Ok(Self {
            base,
            quality,
            peak,
        })
    }
}

/// An annotation on a span of a read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Tag {
    /// The tag type.
    pub kind: String,

    /// The program that created the tag.
    pub source: String,

    /// The tagged span of the unpadded read.
    pub unpadded_read_pos: Range,

    /// When the tag was created.
    pub date: Option<String>,

    /// The text of the nested comment, if any.
    pub comment: Option<String>,

    /// Lines that are not one of the fields above, in order.
    pub data: Vec<String>,
}

impl Tag {
    /// Parses the lines between `BEGIN_TAG` and `END_TAG`.
    fn from_lines(lines: &[String]) -> parse::Result<Self> {
        let mut kind = None;
        let mut source = None;
        let mut position = None;
        let mut date = None;
        let mut comment: Option<Vec<String>> = None;
        let mut in_comment = false;
        let mut data = Vec::new();

        for line in lines {
            let trimmed = line.trim();

            match (in_comment, trimmed) {
                (true, END_COMMENT) => in_comment = false,
                (true, _) => comment.get_or_insert_with(Vec::new).push(line.clone()),
                (false, BEGIN_COMMENT) => in_comment = true,
                (false, "") => {}
                (false, _) => match trimmed.split_once(':') {
                    Some(("TYPE", value)) => kind = Some(value.trim().to_string()),
                    Some(("SOURCE", value)) => source = Some(value.trim().to_string()),
                    Some(("UNPADDED_READ_POS", value)) => position = Some(parse_position(value)?),
                    Some(("DATE", value)) => date = Some(value.trim().to_string()),
                    _ => data.push(line.clone()),
                },
            }
        }

        Ok(Self {
            kind: kind.ok_or(ParseError::MissingTagField("TYPE"))?,
            source: source.ok_or(ParseError::MissingTagField("SOURCE"))?,
            unpadded_read_pos: position.ok_or(ParseError::MissingTagField("UNPADDED_READ_POS"))?,
            date,
            comment: comment.map(|lines| lines.join("\n")),
            data,
        })
    }
}

/// Parses a one-based, inclusive `start end` pair.
fn parse_position(value: &str) -> parse::Result<Range> {
    let invalid = || ParseError::InvalidTagPosition(value.trim().to_string());

    let coordinates = value
        .split_whitespace()
        .map(|coordinate| coordinate.parse::<i64>())
        .collect::<Result<Vec<_>, _>>()
        .map_err(|_| invalid())?;

    match coordinates[..] {
        [start, end] => Range::try_from_system(CoordinateSystem::ResidueBased, start, end)
            .map_err(|_| invalid().into()),
        _ => Err(invalid().into()),
    }
}

/// A free-form annotation on a whole read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct WholeReadItem {
    /// The lines between `WR{` and `}`.
    pub lines: Vec<String>,
}

////////////////////////////////////////////////////////////////////////////////////////
// Visitors
////////////////////////////////////////////////////////////////////////////////////////

/// Receives the reads of a PHD file.
pub trait Visitor {
    /// The visitor for the contents of a read.
    type Sequence: SequenceVisitor;

    /// Called at each `BEGIN_SEQUENCE`. Skipping a read still checks that
    /// its blocks are terminated but reports nothing about it.
    fn visit_begin_sequence(
        &mut self,
        _: &mut Control,
        _id: &str,
        _version: Option<&str>,
    ) -> parse::Result<Visit<Self::Sequence>> {
        Ok(Visit::Skip)
    }

    /// Called with the sequence visitor once the read and everything that
    /// follows it (tags and whole-read items) are done.
    fn end_sequence(&mut self, _: &mut Control, _: Self::Sequence) -> parse::Result<()> {
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

/// Receives the contents of one read.
pub trait SequenceVisitor {
    /// Called with each `KEY: value` comment line.
    fn visit_comment(&mut self, _: &mut Control, _key: &str, _value: &str) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each basecall.
    fn visit_basecall(&mut self, _: &mut Control, _: &Basecall) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each read tag.
    fn visit_tag(&mut self, _: &mut Control, _: &Tag) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each whole-read item.
    fn visit_whole_read_item(&mut self, _: &mut Control, _: &WholeReadItem) -> parse::Result<()> {
        Ok(())
    }
}

impl SequenceVisitor for () {}

////////////////////////////////////////////////////////////////////////////////////////
// Parser
////////////////////////////////////////////////////////////////////////////////////////

/// A PHD driver, for single files and balls alike.
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

    /// Visits every read.
    pub fn parse<V: Visitor>(&self, visitor: &mut V) -> parse::Result<Outcome> {
        let mut lines = Lines::new(self.source.open()?);
        let mut control = Control::new(Format::Phd, lines.is_seekable());

        let state = read_sequences(&mut lines, &mut control, visitor, State::start())?;
        finish(visitor, state)
    }

    /// Resumes visiting at the read identified by `bookmark`.
    pub fn parse_from<V: Visitor>(
        &self,
        visitor: &mut V,
        bookmark: &Bookmark,
    ) -> parse::Result<Outcome> {
        let state = bookmark.resume(Format::Phd)?;

        if !self.can_create_bookmark() {
            return Err(Unsupported::Bookmarks.into());
        }

        trace!(
            offset = state.offset(),
            read = state.ordinal(),
            "resuming phd pass"
        );

        let mut input = self.source.open()?;
        input.seek_to(state.offset())?;

        let mut lines = Lines::new(input);
        let mut control = Control::new(Format::Phd, true);

        let state = read_sequences(&mut lines, &mut control, visitor, state)?;
        finish(visitor, state)
    }
}

/// Reads reads from `state` until the input ends or a visitor stops the
/// pass.
fn read_sequences<V: Visitor>(
    lines: &mut Lines,
    control: &mut Control,
    visitor: &mut V,
    mut state: State,
) -> parse::Result<State> {
    while state.keep_parsing() {
        let Some(line) = next_nonblank(lines)? else {
            break;
        };

        if !is_marker(&line, BEGIN_SEQUENCE) {
            return Err(unexpected(line));
        }

        state = state.at(line.offset);
        control.enter(state);

        let mut fields = line.text.split_whitespace().skip(1);
        let id = fields.next().ok_or(ParseError::MissingId(line.offset))?;
        let version = fields.next();

        match visitor.visit_begin_sequence(control, id, version)? {
            Visit::Descend(mut sequence) => {
                read_sequence(lines, control, Some(&mut sequence))?;
                visitor.end_sequence(control, sequence)?;
            }
            Visit::Skip => read_sequence::<V::Sequence>(lines, control, None)?,
        }

        state = control.apply(state.next_record(lines.position()));
    }

    Ok(state)
}

/// Reads the rest of one read, from after its `BEGIN_SEQUENCE` line up to
/// the next `BEGIN_SEQUENCE` line or the end of the input.
fn read_sequence<S: SequenceVisitor>(
    lines: &mut Lines,
    control: &mut Control,
    mut visitor: Option<&mut S>,
) -> parse::Result<()> {
    loop {
        let line = next_nonblank(lines)?.ok_or(ParseError::Unterminated(BEGIN_SEQUENCE))?;

        if is_marker(&line, END_SEQUENCE) {
            break;
        } else if is_marker(&line, BEGIN_COMMENT) {
            let comments = lines
                .read_until(END_COMMENT)?
                .ok_or(ParseError::Unterminated(BEGIN_COMMENT))?;

            if let Some(visitor) = visitor.as_deref_mut() {
                for comment in comments.iter().filter(|line| !line.trim().is_empty()) {
                    let (key, value) = comment.split_once(':').unwrap_or((comment.as_str(), ""));
                    visitor.visit_comment(control, key.trim(), value.trim())?;
                }
            }
        } else if is_marker(&line, BEGIN_DNA) {
            let basecalls = lines
                .read_until(END_DNA)?
                .ok_or(ParseError::Unterminated(BEGIN_DNA))?;

            if let Some(visitor) = visitor.as_deref_mut() {
                for basecall in basecalls.iter().filter(|line| !line.trim().is_empty()) {
                    visitor.visit_basecall(control, &basecall.parse::<Basecall>()?)?;
                }
            }
        } else if !read_annotation(lines, control, &line, visitor.as_deref_mut())? {
            return Err(unexpected(line));
        }
    }

    while let Some(line) = next_nonblank(lines)? {
        if is_marker(&line, BEGIN_SEQUENCE) {
            lines.push_back(line);
            break;
        }

        if !read_annotation(lines, control, &line, visitor.as_deref_mut())? {
            return Err(unexpected(line));
        }
    }

    Ok(())
}

/// Reads the tag or whole-read item opened by `line`, returning whether
/// `line` opened one.
fn read_annotation<S: SequenceVisitor>(
    lines: &mut Lines,
    control: &mut Control,
    line: &Line,
    visitor: Option<&mut S>,
) -> parse::Result<bool> {
    if is_marker(line, BEGIN_TAG) {
        let contents = lines
            .read_until(END_TAG)?
            .ok_or(ParseError::Unterminated(BEGIN_TAG))?;

        if let Some(visitor) = visitor {
            visitor.visit_tag(control, &Tag::from_lines(&contents)?)?;
        }

        Ok(true)
    } else if is_marker(line, BEGIN_WHOLE_READ_ITEM) {
        let contents = lines
            .read_until(END_WHOLE_READ_ITEM)?
            .ok_or(ParseError::Unterminated(BEGIN_WHOLE_READ_ITEM))?;

        if let Some(visitor) = visitor {
            visitor.visit_whole_read_item(control, &WholeReadItem { lines: contents })?;
        }

        Ok(true)
    } else {
        Ok(false)
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
// Reads
////////////////////////////////////////////////////////////////////////////////////////

/// A fully decoded read.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Phd {
    /// The read id.
    id: String,

    /// The version on the `BEGIN_SEQUENCE` line.
    version: Option<String>,

    /// The comments, in file order.
    comments: IndexMap<String, String>,

    /// The called bases.
    basecalls: NucleotideSequence,

    /// The phred quality of each base.
    qualities: Vec<u8>,

    /// The trace peak of each base, when every base has one.
    peaks: Option<Vec<u32>>,

    /// The read tags.
    tags: Vec<Tag>,

    /// The whole-read items.
    whole_read_items: Vec<WholeReadItem>,
}

impl Phd {
    /// Gets the read id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Gets the version on the `BEGIN_SEQUENCE` line.
    pub fn version(&self) -> Option<&str> {
        self.version.as_deref()
    }

    /// Gets the comments, in file order.
    pub fn comments(&self) -> &IndexMap<String, String> {
        &self.comments
    }

    /// Gets the called bases.
    pub fn basecalls(&self) -> &NucleotideSequence {
        &self.basecalls
    }

    /// Gets the phred quality of each base.
    pub fn qualities(&self) -> &[u8] {
        &self.qualities
    }

    /// Gets the trace peak of each base, or [`None`] unless every base has
    /// one.
    pub fn peaks(&self) -> Option<&[u32]> {
        self.peaks.as_deref()
    }

    /// Gets the read tags.
    pub fn tags(&self) -> &[Tag] {
        &self.tags
    }

    /// Gets the whole-read items.
    pub fn whole_read_items(&self) -> &[WholeReadItem] {
        &self.whole_read_items
    }
}

/// Accumulates the contents of one read.
#[derive(Debug)]
pub struct Builder {
    /// The read id.
    id: String,

    /// The version.
    version: Option<String>,

    /// The comments.
    comments: IndexMap<String, String>,

    /// The basecalls.
    basecalls: Vec<Basecall>,

    /// The tags.
    tags: Vec<Tag>,

    /// The whole-read items.
    whole_read_items: Vec<WholeReadItem>,
}

impl Builder {
    /// Starts a read.
    fn new(id: &str, version: Option<&str>) -> Self {
        Self {
            id: id.to_string(),
            version: version.map(String::from),
            comments: IndexMap::new(),
            basecalls: Vec::new(),
            tags: Vec::new(),
            whole_read_items: Vec::new(),
        }
    }

    /// Consumes `self` and returns the read.
    fn build(self) -> Phd {
        let peaks = self
            .basecalls
            .iter()
            .map(|basecall| basecall.peak)
            .collect::<Option<Vec<_>>>()
            .filter(|peaks| !peaks.is_empty());

        Phd {
            id: self.id,
            version: self.version,
            comments: self.comments,
            basecalls: self.basecalls.iter().map(|basecall| basecall.base).collect::<Vec<_>>().into(),
            qualities: self.basecalls.iter().map(|basecall| basecall.quality).collect(),
            peaks,
            tags: self.tags,
            whole_read_items: self.whole_read_items,
        }
    }
}

impl SequenceVisitor for Builder {
    fn visit_comment(&mut self, _: &mut Control, key: &str, value: &str) -> parse::Result<()> {
        self.comments.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn visit_basecall(&mut self, _: &mut Control, basecall: &Basecall) -> parse::Result<()> {
        self.basecalls.push(*basecall);
        Ok(())
    }

    fn visit_tag(&mut self, _: &mut Control, tag: &Tag) -> parse::Result<()> {
        self.tags.push(tag.clone());
        Ok(())
    }

    fn visit_whole_read_item(&mut self, _: &mut Control, item: &WholeReadItem) -> parse::Result<()> {
        self.whole_read_items.push(item.clone());
        Ok(())
    }
}

/// Collects every read of a pass.
#[derive(Debug, Default)]
pub struct Collector {
    /// The reads in file order.
    reads: Vec<Phd>,

    /// Whether to stop after the first read.
    first_only: bool,
}

impl Collector {
    /// Consumes `self` and returns the reads.
    pub fn into_reads(self) -> Vec<Phd> {
        self.reads
    }
}

impl Visitor for Collector {
    type Sequence = Builder;

    fn visit_begin_sequence(
        &mut self,
        _: &mut Control,
        id: &str,
        version: Option<&str>,
    ) -> parse::Result<Visit<Builder>> {
        Ok(Visit::Descend(Builder::new(id, version)))
    }

    fn end_sequence(&mut self, control: &mut Control, builder: Builder) -> parse::Result<()> {
        self.reads.push(builder.build());

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
    type Sequence = ();

    fn visit_begin_sequence(
        &mut self,
        control: &mut Control,
        id: &str,
        _: Option<&str>,
    ) -> parse::Result<Visit<()>> {
        let id = id.to_string();

        if (self.filter)(&id) {
            self.index.insert(id, control.create_bookmark()?);
        }

        Ok(Visit::Skip)
    }
}

/// Hands every read to a callback as soon as it is built.
struct Scanner<'a> {
    /// The callback; returns `false` to stop the pass.
    visit: &'a mut dyn FnMut(String, Phd) -> bool,
}

impl Visitor for Scanner<'_> {
    type Sequence = Builder;

    fn visit_begin_sequence(
        &mut self,
        _: &mut Control,
        id: &str,
        version: Option<&str>,
    ) -> parse::Result<Visit<Builder>> {
        Ok(Visit::Descend(Builder::new(id, version)))
    }

    fn end_sequence(&mut self, control: &mut Control, builder: Builder) -> parse::Result<()> {
        let read = builder.build();

        if !(self.visit)(read.id().to_string(), read) {
            control.stop_parsing();
        }

        Ok(())
    }
}

impl datastore::Driver for Parser {
    type Id = String;
    type Record = Phd;

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

    fn fetch(&self, id: &String, bookmark: &Bookmark) -> parse::Result<Phd> {
        let mut collector = Collector {
            first_only: true,
            ..Default::default()
        };
        self.parse_from(&mut collector, bookmark)?;

        let read = collector
            .into_reads()
            .pop()
            .ok_or(Malformed::Truncated)?;

        if read.id() != id {
            return Err(ParseError::UnexpectedRead {
                expected: id.clone(),
                found: read.id().to_string(),
            }
            .into());
        }

        Ok(read)
    }

    fn scan(&self, visit: &mut dyn FnMut(String, Phd) -> bool) -> parse::Result<()> {
        self.parse(&mut Scanner { visit })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// A ball of two reads with every kind of block.
    const BALL: &str = "BEGIN_SEQUENCE read1 1

BEGIN_COMMENT

CHROMAT_FILE: read1
TRIM: 2 9 0.05

END_COMMENT

BEGIN_DNA
a 20 6
c 30 18
* 0 25
g 40 31
END_DNA

END_SEQUENCE

BEGIN_TAG
TYPE: polymorphism
SOURCE: consed
UNPADDED_READ_POS: 2 3
DATE: 01/01/20 00:00:00
BEGIN_COMMENT
a likely snp
END_COMMENT
END_TAG

WR{
template consed 01/01/20 00:00:00
name: read1.t
}

BEGIN_SEQUENCE read2
BEGIN_DNA
t 15
END_DNA
END_SEQUENCE
";

    /// Records the order of every callback.
    #[derive(Default)]
    struct Recorder {
        events: Vec<String>,
    }

    impl SequenceVisitor for Recorder {
        fn visit_comment(&mut self, _: &mut Control, key: &str, _: &str) -> parse::Result<()> {
            self.events.push(format!("comment {key}"));
            Ok(())
        }

        fn visit_basecall(&mut self, _: &mut Control, basecall: &Basecall) -> parse::Result<()> {
            self.events.push(format!("base {}", basecall.base));
            Ok(())
        }

        fn visit_tag(&mut self, _: &mut Control, tag: &Tag) -> parse::Result<()> {
            self.events.push(format!("tag {}", tag.kind));
            Ok(())
        }

        fn visit_whole_read_item(
            &mut self,
            _: &mut Control,
            item: &WholeReadItem,
        ) -> parse::Result<()> {
            self.events.push(format!("wr {}", item.lines.len()));
            Ok(())
        }
    }

    impl Visitor for Recorder {
        type Sequence = Recorder;

        fn visit_begin_sequence(
            &mut self,
            _: &mut Control,
            id: &str,
            _: Option<&str>,
        ) -> parse::Result<Visit<Recorder>> {
            self.events.push(format!("begin {id}"));
            Ok(Visit::Descend(Recorder::default()))
        }

        fn end_sequence(&mut self, _: &mut Control, sequence: Recorder) -> parse::Result<()> {
            self.events.extend(sequence.events);
            self.events.push(String::from("end"));
            Ok(())
        }

        fn visit_end(&mut self) -> parse::Result<()> {
            self.events.push(String::from("visit_end"));
            Ok(())
        }

        fn visit_halted(&mut self) -> parse::Result<()> {
            self.events.push(String::from("visit_halted"));
            Ok(())
        }
    }

    #[test]
    fn callbacks_follow_file_order() -> Result<(), Box<dyn std::error::Error>> {
        let mut recorder = Recorder::default();
        Parser::new(Source::bytes(BALL.as_bytes())).parse(&mut recorder)?;

        assert_eq!(
            recorder.events,
            [
                "begin read1",
                "comment CHROMAT_FILE",
                "comment TRIM",
                "base A",
                "base C",
                "base -",
                "base G",
                "tag polymorphism",
                "wr 2",
                "end",
                "begin read2",
                "base T",
                "end",
                "visit_end",
            ]
        );

        Ok(())
    }

    #[test]
    fn reads_are_fully_decoded() -> Result<(), Box<dyn std::error::Error>> {
        let mut collector = Collector::default();
        Parser::new(Source::bytes(BALL.as_bytes())).parse(&mut collector)?;

        let reads = collector.into_reads();
        assert_eq!(reads.len(), 2);

        let read = &reads[0];
        assert_eq!(read.id(), "read1");
        assert_eq!(read.version(), Some("1"));
        assert_eq!(read.comments()["TRIM"], "2 9 0.05");
        assert_eq!(read.basecalls().to_string(), "AC-G");
        assert_eq!(read.basecalls().gap_offsets(), [2]);
        assert_eq!(read.qualities(), [20, 30, 0, 40]);
        assert_eq!(read.peaks(), Some(&[6, 18, 25, 31][..]));

        let tag = &read.tags()[0];
        assert_eq!(tag.source, "consed");
        assert_eq!(tag.unpadded_read_pos, Range::try_new(1, 2)?);
        assert_eq!(tag.comment.as_deref(), Some("a likely snp"));
        assert_eq!(read.whole_read_items()[0].lines[1], "name: read1.t");

        assert_eq!(reads[1].peaks(), None);
        assert!(reads[1].tags().is_empty());

        Ok(())
    }

    #[test]
    fn stopping_halts_after_the_current_read() -> Result<(), Box<dyn std::error::Error>> {
        let mut collector = Collector {
            first_only: true,
            ..Default::default()
        };

        let outcome = Parser::new(Source::bytes(BALL.as_bytes())).parse(&mut collector)?;
        assert_eq!(outcome, Outcome::Halted);
        assert_eq!(collector.into_reads().len(), 1);

        Ok(())
    }

    #[test]
    fn resuming_starts_at_the_bookmarked_read() -> Result<(), Box<dyn std::error::Error>> {
        let parser = Parser::new(Source::bytes(BALL.as_bytes()));

        let mut everything = |_: &String| true;
        let index = datastore::Driver::index(&parser, &mut everything)?;
        assert_eq!(index.len(), 2);

        let mut recorder = Recorder::default();
        parser.parse_from(&mut recorder, &index["read2"])?;
        assert_eq!(
            recorder.events,
            ["begin read2", "base T", "end", "visit_end"]
        );

        Ok(())
    }

    #[test]
    fn skipped_reads_are_still_checked() -> Result<(), Box<dyn std::error::Error>> {
        let data = "BEGIN_SEQUENCE read1\nBEGIN_DNA\na 20\n";
        let Err(err) = Parser::new(Source::bytes(data.as_bytes())).parse(&mut Indexer {
            filter: &mut |_: &String| false,
            index: IndexMap::new(),
        }) else {
            return Err("an unterminated read was skipped".into());
        };

        assert!(matches!(
            err,
            parse::Error::Malformed(Malformed::Phd(ParseError::Unterminated(BEGIN_DNA)))
        ));

        Ok(())
    }

    #[test]
    fn malformed_lines_are_rejected() -> Result<(), Box<dyn std::error::Error>> {
        let cases = [
            ("BEGIN_SEQUENCE\nEND_SEQUENCE\n", ParseError::MissingId(0)),
            (
                "BEGIN_SEQUENCE r\nBEGIN_DNA\na twenty\nEND_DNA\nEND_SEQUENCE\n",
                ParseError::InvalidBasecall(String::from("a twenty")),
            ),
            (
                "stray\n",
                ParseError::UnexpectedLine {
                    offset: 0,
                    text: String::from("stray"),
                },
            ),
            (
                "BEGIN_SEQUENCE r\nEND_SEQUENCE\nBEGIN_TAG\nTYPE: x\nEND_TAG\n",
                ParseError::MissingTagField("SOURCE"),
            ),
            (
                "  BEGIN_SEQUENCE r\nEND_SEQUENCE\n",
                ParseError::UnexpectedLine {
                    offset: 0,
                    text: String::from("  BEGIN_SEQUENCE r"),
                },
            ),
        ];

        for (data, expected) in cases {
            let parser = Parser::new(Source::bytes(data.as_bytes()));
            let Err(err) = parser.parse(&mut Collector::default()) else {
                return Err(format!("expected {expected}").into());
            };

            match err {
                parse::Error::Malformed(Malformed::Phd(err)) => assert_eq!(err, expected),
                err => return Err(format!("unexpected error: {err}").into()),
            }
        }

        Ok(())
    }

    #[test]
    fn basecalls_parse() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(
            "g 40 120".parse::<Basecall>()?,
            Basecall {
                base: Nucleotide::G,
                quality: 40,
                peak: Some(120)
            }
        );
        assert!("gg 40".parse::<Basecall>().is_err());
        assert!("g 40 1 2".parse::<Basecall>().is_err());
        assert!("g 300".parse::<Basecall>().is_err());

        Ok(())
    }
}
