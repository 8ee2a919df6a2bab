//! The brace-delimited ASM message format of whole-genome assemblers.
//!
//! Every message opens with `{KIND` on a line of its own and closes with `}`.
//! Between them are `key:value` fields and nested messages. A field whose
//! value is empty on its own line spans the following lines up to a line
//! holding a single `.`:
//!
//! ```text
//! {UTG
//! acc:(1000,1)
//! len:8
//! cns:
//! ACGTACGT
//! .
//! {MPS
//! typ:R
//! mid:7
//! pos:0,8
//! }
//! }
//! ```
//!
//! Top-level messages are the records of the format; a message is identified
//! by its `acc` field.

use std::sync::LazyLock;

use indexmap::map::Entry;
use indexmap::IndexMap;
use regex::Regex;
use tracing::debug;
use tracing::trace;

use crate::datastore;
use crate::line::Line;
use crate::line::Lines;
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

/// A line that opens a message.
static MESSAGE_START: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^\{([A-Za-z]+)\s*$").unwrap_or_else(|err| unreachable!("invalid regex: {err}"))
});

/// A `key:value` field line.
static FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^([A-Za-z0-9_]+):(.*)$").unwrap_or_else(|err| unreachable!("invalid regex: {err}"))
});

/// The line that closes a message.
const MESSAGE_END: &str = "}";

/// The line that closes a multi-line field.
const FIELD_END: &str = ".";

/// The field that identifies a message.
const ACCESSION: &str = "acc";

/// Gets the kind of the message that `line` opens, if it opens one.
fn message_kind(line: &Line) -> Option<&str> {
    MESSAGE_START
        .captures(line.text.trim())
        .and_then(|captures| captures.get(1))
        .map(|kind| kind.as_str())
}

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An ASM grammar error.
#[derive(Debug, Eq, PartialEq)]
pub enum ParseError {
    /// A line that has no place at its position.
    UnexpectedLine {
        /// The byte offset of the line.
        offset: u64,

        /// The line.
        text: String,
    },

    /// The input ended inside a message.
    UnterminatedMessage(String),

    /// The input ended inside a multi-line field.
    UnterminatedField(String),

    /// A bookmark led to a different message than the one requested.
    UnexpectedMessage {
        /// The requested message.
        expected: String,

        /// The message found at the bookmark.
        found: String,
    },
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ParseError::UnexpectedLine { offset, text } => {
                write!(f, "unexpected line at byte {offset}: {text:?}")
            }
            ParseError::UnterminatedMessage(kind) => write!(f, "unterminated {kind} message"),
            ParseError::UnterminatedField(key) => write!(f, "unterminated {key} field"),
            ParseError::UnexpectedMessage { expected, found } => {
                write!(f, "expected message {expected} at bookmark, found message {found}")
            }
        }
    }
}

impl std::error::Error for ParseError {}

impl From<ParseError> for parse::Error {
    fn from(err: ParseError) -> Self {
        parse::Error::Malformed(Malformed::Asm(err))
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
// Messages
////////////////////////////////////////////////////////////////////////////////////////

/// A fully decoded message.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Message {
    /// The message kind, such as `UTG`.
    kind: String,

    /// The fields, in file order. Multi-line values are joined with `\n`.
    fields: IndexMap<String, String>,

    /// The nested messages, in file order.
    children: Vec<Message>,
}

impl Message {
    /// Gets the message kind.
    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// Gets the `acc` field, if present.
    pub fn id(&self) -> Option<&str> {
        self.field(ACCESSION)
    }

    /// Gets a field by key.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::asm;
    /// use assemblyfile::parse::Source;
    ///
    /// let data = b"{UTG\nacc:(10,1)\ncns:\nACGT\nACGT\n.\n}\n";
    ///
    /// let mut collector = asm::Collector::default();
    /// asm::Parser::new(Source::bytes(&data[..])).parse(&mut collector)?;
    ///
    /// let messages = collector.into_messages();
    /// let message = &messages[0];
    /// assert_eq!(message.id(), Some("(10,1)"));
    /// assert_eq!(message.field("cns"), Some("ACGT\nACGT"));
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).map(String::as_str)
    }

    /// Gets every field, in file order.
    pub fn fields(&self) -> &IndexMap<String, String> {
        &self.fields
    }

    /// Gets the nested messages, in file order.
    pub fn children(&self) -> &[Message] {
        &self.children
    }

    /// Gets the nested messages of one kind.
    pub fn children_of_kind<'a>(&'a self, kind: &'a str) -> impl Iterator<Item = &'a Message> {
        self.children.iter().filter(move |child| child.kind == kind)
    }
}

/// Accumulates one message.
#[derive(Debug)]
pub struct MessageBuilder {
    /// The message being built.
    message: Message,
}

impl MessageBuilder {
    /// Starts a message of kind `kind`.
    pub fn new(kind: &str) -> Self {
        Self {
            message: Message {
                kind: kind.to_string(),
                fields: IndexMap::new(),
                children: Vec::new(),
            },
        }
    }

    /// Consumes `self` and returns the message.
    pub fn build(self) -> Message {
        self.message
    }
}

impl MessageVisitor for MessageBuilder {
    fn visit_field(&mut self, _: &mut Control, key: &str, value: &str) -> parse::Result<()> {
        self.message
            .fields
            .insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn visit_child(&mut self, _: &mut Control, child: &Message) -> parse::Result<()> {
        self.message.children.push(child.clone());
        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Visitors
////////////////////////////////////////////////////////////////////////////////////////

/// Receives the top-level messages of an ASM file.
pub trait Visitor {
    /// The visitor for the contents of a message.
    type Message: MessageVisitor;

    /// Called at the start of each top-level message.
    fn visit_message(&mut self, _: &mut Control, _kind: &str) -> parse::Result<Visit<Self::Message>> {
        Ok(Visit::Skip)
    }

    /// Called with the message visitor once the message is closed.
    fn end_message(&mut self, _: &mut Control, _: Self::Message) -> parse::Result<()> {
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

/// Receives the contents of one top-level message.
pub trait MessageVisitor {
    /// Called with each field.
    fn visit_field(&mut self, _: &mut Control, _key: &str, _value: &str) -> parse::Result<()> {
        Ok(())
    }

    /// Called with each nested message, fully decoded.
    fn visit_child(&mut self, _: &mut Control, _: &Message) -> parse::Result<()> {
        Ok(())
    }
}

impl MessageVisitor for () {}

////////////////////////////////////////////////////////////////////////////////////////
// Parser
////////////////////////////////////////////////////////////////////////////////////////

/// An ASM driver.
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

    /// Visits every top-level message.
    pub fn parse<V: Visitor>(&self, visitor: &mut V) -> parse::Result<Outcome> {
        let mut lines = Lines::new(self.source.open()?);
        let mut control = Control::new(Format::Asm, lines.is_seekable());

        let state = read_messages(&mut lines, &mut control, visitor, State::start())?;
        finish(visitor, state)
    }

    /// Resumes visiting at the message identified by `bookmark`.
    pub fn parse_from<V: Visitor>(
        &self,
        visitor: &mut V,
        bookmark: &Bookmark,
    ) -> parse::Result<Outcome> {
        let state = bookmark.resume(Format::Asm)?;

        if !self.can_create_bookmark() {
            return Err(Unsupported::Bookmarks.into());
        }

        trace!(
            offset = state.offset(),
            message = state.ordinal(),
            "resuming asm pass"
        );

        let mut input = self.source.open()?;
        input.seek_to(state.offset())?;

        let mut lines = Lines::new(input);
        let mut control = Control::new(Format::Asm, true);

        let state = read_messages(&mut lines, &mut control, visitor, state)?;
        finish(visitor, state)
    }
}

/// Reads top-level messages from `state` until the input ends or a visitor
/// stops the pass.
fn read_messages<V: Visitor>(
    lines: &mut Lines,
    control: &mut Control,
    visitor: &mut V,
    mut state: State,
) -> parse::Result<State> {
    while state.keep_parsing() {
        let Some(line) = next_nonblank(lines)? else {
            break;
        };

        let Some(kind) = message_kind(&line).map(String::from) else {
            return Err(unexpected(line));
        };

        state = state.at(line.offset);
        control.enter(state);

        match visitor.visit_message(control, &kind)? {
            Visit::Descend(mut message) => {
                read_body(lines, control, &kind, Some(&mut message))?;
                visitor.end_message(control, message)?;
            }
            Visit::Skip => read_body::<V::Message>(lines, control, &kind, None)?,
        }

        state = control.apply(state.next_record(lines.position()));
    }

    Ok(state)
}

/// Reads the fields and nested messages of a `kind` message up to its
/// closing line.
fn read_body<M: MessageVisitor>(
    lines: &mut Lines,
    control: &mut Control,
    kind: &str,
    mut visitor: Option<&mut M>,
) -> parse::Result<()> {
    loop {
        let line = next_nonblank(lines)?
            .ok_or_else(|| ParseError::UnterminatedMessage(kind.to_string()))?;

        if line.text.trim() == MESSAGE_END {
            return Ok(());
        }

        if let Some(child) = message_kind(&line).map(String::from) {
            let mut builder = MessageBuilder::new(&child);
            read_body(lines, control, &child, Some(&mut builder))?;

            if let Some(visitor) = visitor.as_deref_mut() {
                visitor.visit_child(control, &builder.build())?;
            }

            continue;
        }

        let field = FIELD.captures(line.text.trim_end()).and_then(|captures| {
            let key = captures.get(1)?.as_str().to_string();
            let value = captures.get(2)?.as_str().to_string();
            Some((key, value))
        });

        let Some((key, value)) = field else {
            return Err(unexpected(line));
        };

        let value = match value.is_empty() {
            true => read_multiline_field(lines, &key)?,
            false => value,
        };

        if let Some(visitor) = visitor.as_deref_mut() {
            visitor.visit_field(control, &key, &value)?;
        }
    }
}

/// Reads the lines of a multi-line field up to its closing `.` line.
///
/// A closing `}` also ends the field and is left for the message; list fields
/// such as `del:` are not `.`-terminated when they end a message.
fn read_multiline_field(lines: &mut Lines, key: &str) -> parse::Result<String> {
    let mut values = Vec::new();

    loop {
        let line = lines
            .next_line()?
            .ok_or_else(|| ParseError::UnterminatedField(key.to_string()))?;

        match line.text.trim() {
            FIELD_END => break,
            MESSAGE_END => {
                lines.push_back(line);
                break;
            }
            _ => values.push(line.text),
        }
    }

    Ok(values.join("\n"))
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

/// Collects every top-level message of a pass.
#[derive(Debug, Default)]
pub struct Collector {
    /// The messages in file order.
    messages: Vec<Message>,

    /// Whether to stop after the first message.
    first_only: bool,
}

impl Collector {
    /// Consumes `self` and returns the messages.
    pub fn into_messages(self) -> Vec<Message> {
        self.messages
    }
}

impl Visitor for Collector {
    type Message = MessageBuilder;

    fn visit_message(&mut self, _: &mut Control, kind: &str) -> parse::Result<Visit<MessageBuilder>> {
        Ok(Visit::Descend(MessageBuilder::new(kind)))
    }

    fn end_message(&mut self, control: &mut Control, message: MessageBuilder) -> parse::Result<()> {
        self.messages.push(message.build());

        if self.first_only {
            control.stop_parsing();
        }

        Ok(())
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Datastore
////////////////////////////////////////////////////////////////////////////////////////

/// Catches the `acc` field of a message.
#[derive(Debug, Default)]
struct Accession(Option<String>);

impl MessageVisitor for Accession {
    fn visit_field(&mut self, _: &mut Control, key: &str, value: &str) -> parse::Result<()> {
        if key == ACCESSION && self.0.is_none() {
            self.0 = Some(value.to_string());
        }

        Ok(())
    }
}

/// Records a bookmark for every identified message that passes a filter.
///
/// The bookmark is created once the message is closed, when its `acc` field
/// is known; it still points at the start of the message.
struct Indexer<'a> {
    /// The id filter.
    filter: &'a mut dyn FnMut(&String) -> bool,

    /// The bookmarks.
    index: IndexMap<String, Bookmark>,
}

impl Visitor for Indexer<'_> {
    type Message = Accession;

    fn visit_message(&mut self, _: &mut Control, _: &str) -> parse::Result<Visit<Accession>> {
        Ok(Visit::Descend(Accession::default()))
    }

    fn end_message(&mut self, control: &mut Control, accession: Accession) -> parse::Result<()> {
        let Some(id) = accession.0 else {
            return Ok(());
        };

        if !(self.filter)(&id) {
            return Ok(());
        }

        match self.index.entry(id) {
            Entry::Occupied(entry) => {
                debug!("keeping the first asm message with id {}", entry.key());
            }
            Entry::Vacant(entry) => {
                entry.insert(control.create_bookmark()?);
            }
        }

        Ok(())
    }
}

/// Hands every identified message to a callback as soon as it is closed.
struct Scanner<'a> {
    /// The callback; returns `false` to stop the pass.
    visit: &'a mut dyn FnMut(String, Message) -> bool,
}

impl Visitor for Scanner<'_> {
    type Message = MessageBuilder;

    fn visit_message(&mut self, _: &mut Control, kind: &str) -> parse::Result<Visit<MessageBuilder>> {
        Ok(Visit::Descend(MessageBuilder::new(kind)))
    }

    fn end_message(&mut self, control: &mut Control, message: MessageBuilder) -> parse::Result<()> {
        let message = message.build();
        let Some(id) = message.id().map(str::to_string) else {
            return Ok(());
        };

        if !(self.visit)(id, message) {
            control.stop_parsing();
        }

        Ok(())
    }
}

impl datastore::Driver for Parser {
    type Id = String;
    type Record = Message;

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

    fn fetch(&self, id: &String, bookmark: &Bookmark) -> parse::Result<Message> {
        let mut collector = Collector {
            first_only: true,
            ..Default::default()
        };
        self.parse_from(&mut collector, bookmark)?;

        let message = collector
            .into_messages()
            .pop()
            .ok_or(Malformed::Truncated)?;

        if message.id() != Some(id.as_str()) {
            return Err(ParseError::UnexpectedMessage {
                expected: id.clone(),
                found: message.id().unwrap_or_default().to_string(),
            }
            .into());
        }

        Ok(message)
    }

    fn scan(&self, visit: &mut dyn FnMut(String, Message) -> bool) -> parse::Result<()> {
        self.parse(&mut Scanner { visit })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datastore::Indexed;

    /// A batch header and two unitigs with nested fragments.
    const ASM: &str = "{BAT
bna:batch
}
{UTG
acc:(1000,1)
src:
.
len:8
cns:
ACGT
ACGT
.
nfr:2
{MPS
typ:R
mid:7
pos:0,8
dln:0
del:
}
{MPS
typ:R
mid:9
pos:8,2
dln:0
del:
}
}

{UTG
acc:(1001,2)
len:4
cns:
GGCC
.
nfr:0
}
";

    #[test]
    fn messages_are_fully_decoded() -> Result<(), Box<dyn std::error::Error>> {
        let mut collector = Collector::default();
        Parser::new(Source::bytes(ASM.as_bytes())).parse(&mut collector)?;

        let messages = collector.into_messages();
        assert_eq!(messages.len(), 3);
        assert_eq!(messages[0].kind(), "BAT");
        assert_eq!(messages[0].id(), None);

        let unitig = &messages[1];
        assert_eq!(unitig.id(), Some("(1000,1)"));
        assert_eq!(unitig.field("src"), Some(""));
        assert_eq!(unitig.field("cns"), Some("ACGT\nACGT"));
        assert_eq!(
            unitig.fields().keys().collect::<Vec<_>>(),
            ["acc", "src", "len", "cns", "nfr"]
        );

        let fragments = unitig.children_of_kind("MPS").collect::<Vec<_>>();
        assert_eq!(fragments.len(), 2);
        assert_eq!(fragments[1].field("pos"), Some("8,2"));
        assert_eq!(fragments[1].field("del"), Some(""));

        Ok(())
    }

    #[test]
    fn only_identified_messages_are_indexed() -> Result<(), Box<dyn std::error::Error>> {
        let store = Indexed::build(Parser::new(Source::bytes(ASM.as_bytes())))?;

        assert_eq!(
            store.ids()?.cloned().collect::<Vec<_>>(),
            ["(1000,1)", "(1001,2)"]
        );

        let message = store.get(&String::from("(1001,2)"))?.unwrap();
        assert_eq!(message.field("cns"), Some("GGCC"));
        assert!(message.children().is_empty());

        Ok(())
    }

    #[test]
    fn stopping_halts_after_the_current_message() -> Result<(), Box<dyn std::error::Error>> {
        let mut collector = Collector {
            first_only: true,
            ..Default::default()
        };

        let outcome = Parser::new(Source::bytes(ASM.as_bytes())).parse(&mut collector)?;
        assert_eq!(outcome, Outcome::Halted);
        assert_eq!(collector.into_messages()[0].kind(), "BAT");

        Ok(())
    }

    #[test]
    fn unterminated_messages_are_fatal() -> Result<(), Box<dyn std::error::Error>> {
        let cases = [
            (
                "{UTG\nacc:1\n{MPS\ntyp:R\n}\n",
                ParseError::UnterminatedMessage(String::from("UTG")),
            ),
            ("{UTG\ncns:\nACGT\n", ParseError::UnterminatedField(String::from("cns"))),
            (
                "acc:1\n",
                ParseError::UnexpectedLine {
                    offset: 0,
                    text: String::from("acc:1"),
                },
            ),
        ];

        for (data, expected) in cases {
            let parser = Parser::new(Source::bytes(data.as_bytes()));
            let Err(err) = parser.parse(&mut Collector::default()) else {
                return Err(format!("expected {expected}").into());
            };

            match err {
                parse::Error::Malformed(Malformed::Asm(err)) => assert_eq!(err, expected),
                err => return Err(format!("unexpected error: {err}").into()),
            }
        }

        Ok(())
    }
}
