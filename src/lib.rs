//! `assemblyfile` is a crate for decoding and indexing genomic assembly files.
//!
//! Five formats are supported, each with its own driver module:
//!
//! - [`cas`]: the binary CAS alignment format of reference mappers.
//! - [`sff`]: the binary Standard Flowgram Format of pyrosequencers.
//! - [`ace`]: the text ACE assembly format.
//! - [`phd`]: the text PHD basecall format.
//! - [`asm`]: the brace-delimited ASM message format.
//!
//! ## Visiting a file
//!
//! Every driver exposes a `Parser` that walks a [`parse::Source`] and hands
//! what it decodes to a visitor. A visitor chooses, record by record, whether
//! to descend into the contents or skip them, and it may stop the walk at any
//! point. Parsers over seekable sources hand out [`parse::Bookmark`]s from
//! which a later walk can resume.
//!
//! ```
//! use assemblyfile::parse::Control;
//! use assemblyfile::parse::Source;
//! use assemblyfile::parse::Visit;
//! use assemblyfile::phd;
//!
//! #[derive(Default)]
//! struct Names(Vec<String>);
//!
//! impl phd::Visitor for Names {
//!     type Sequence = ();
//!
//!     fn visit_begin_sequence(
//!         &mut self,
//!         _: &mut Control,
//!         id: &str,
//!         _: Option<&str>,
//!     ) -> assemblyfile::parse::Result<Visit<()>> {
//!         self.0.push(id.to_string());
//!         Ok(Visit::Skip)
//!     }
//! }
//!
//! let data = b"BEGIN_SEQUENCE read1\nBEGIN_DNA\na 20 1\nEND_DNA\nEND_SEQUENCE\n";
//!
//! let mut names = Names::default();
//! phd::Parser::new(Source::bytes(&data[..])).parse(&mut names)?;
//! assert_eq!(names.0, ["read1"]);
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```
//!
//! ## Datastores
//!
//! Most users will want records by id instead. A [`datastore::Indexed`]
//! indexes a file once and then decodes a single record per lookup. Contigs
//! decoded from ACE files come back as [`assembly::Contig`]s, whose reads are
//! stored as [`delta::ReferenceDeltaSequence`]s against the consensus.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]
#![warn(rust_2021_compatibility)]
#![warn(missing_debug_implementations)]
#![warn(clippy::missing_docs_in_private_items)]
#![warn(rustdoc::broken_intra_doc_links)]

pub mod ace;
pub mod asm;
pub mod assembly;
pub mod binary;
pub mod cas;
pub mod datastore;
pub mod delta;
mod line;
pub mod nucleotide;
pub mod parse;
pub mod phd;
pub mod range;
pub mod sff;

pub use range::Range;
