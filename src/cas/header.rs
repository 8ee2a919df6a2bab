//! The header region of a CAS file.

use std::io::Read;

use crate::binary;
use crate::cas::ParseError;
use crate::parse;

/// The magic number that opens every CAS file.
pub const MAGIC_NUMBER: [u8; 8] = [0x43, 0x4c, 0x43, 0x80, 0x00, 0x00, 0x00, 0x01];

/// The bit of a reference description's flags marking a circular reference.
const CIRCULAR_FLAG: u8 = 0x01;

////////////////////////////////////////////////////////////////////////////////////////
// Metadata
////////////////////////////////////////////////////////////////////////////////////////

/// The fixed-size counts that follow the magic number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Metadata {
    /// The absolute offset of the matches region.
    pub matches_offset: u64,

    /// The number of reference sequences.
    pub num_references: u32,

    /// The number of reads, which is also the number of match records.
    pub num_reads: u64,
}

impl Metadata {
    /// Reads the magic number and the counts that follow it.
    pub(crate) fn read(reader: &mut impl Read) -> parse::Result<Self> {
        let magic = binary::read_bytes(reader, MAGIC_NUMBER.len())?;

        if magic != MAGIC_NUMBER {
            return Err(ParseError::InvalidMagicNumber(magic).into());
        }

        Ok(Self {
            matches_offset: binary::read_u64(reader)?,
            num_references: binary::read_u32(reader)?,
            num_reads: binary::read_u64(reader)?,
        })
    }
}

/// The program that produced the file.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct AssemblerInfo {
    /// The program name.
    pub name: String,

    /// The program version.
    pub version: String,

    /// The parameters the program was run with.
    pub parameters: String,
}

impl AssemblerInfo {
    /// Reads the three assembler strings.
    pub(crate) fn read(reader: &mut impl Read) -> parse::Result<Self> {
        Ok(Self {
            name: binary::read_string(reader)?,
            version: binary::read_string(reader)?,
            parameters: binary::read_string(reader)?,
        })
    }
}

/// A group of sequence files (either the references or the reads).
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct FileInfo {
    /// The number of sequences in the group.
    pub num_sequences: u32,

    /// The total number of residues in the group.
    pub num_residues: u64,

    /// The file names.
    pub names: Vec<String>,
}

impl FileInfo {
    /// Reads one file info.
    pub(crate) fn read(reader: &mut impl Read) -> parse::Result<Self> {
        let num_sequences = binary::read_u32(reader)?;
        let num_residues = binary::read_u64(reader)?;

        let count = binary::read_byte_count(reader)?;
        let names = (0..count)
            .map(|_| binary::read_string(reader))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Self {
            num_sequences,
            num_residues,
            names,
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Scoring
////////////////////////////////////////////////////////////////////////////////////////

/// How alignment scores were computed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ScoreType {
    /// Local scoring.
    Local,

    /// Semi-local scoring.
    SemiLocal,

    /// Global scoring.
    Global,
}

impl ScoreType {
    /// Decodes a score type tag; `0` means no scoring scheme is present.
    fn from_tag(tag: u8) -> parse::Result<Option<Self>> {
        match tag {
            0 => Ok(None),
            1 => Ok(Some(ScoreType::Local)),
            2 => Ok(Some(ScoreType::SemiLocal)),
            3 => Ok(Some(ScoreType::Global)),
            tag => Err(ParseError::InvalidScoreType(tag).into()),
        }
    }
}

/// Which alignments were allowed.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AlignmentType {
    /// Local alignments.
    Local,

    /// Semi-local alignments.
    SemiLocal,

    /// Reverse-complement alignments only.
    ReverseComplementOnly,

    /// Global alignments.
    Global,
}

impl AlignmentType {
    /// Decodes an alignment type tag.
    fn from_tag(tag: u8) -> parse::Result<Self> {
        match tag {
            0 => Ok(AlignmentType::Local),
            1 => Ok(AlignmentType::SemiLocal),
            2 => Ok(AlignmentType::ReverseComplementOnly),
            3 => Ok(AlignmentType::Global),
            tag => Err(ParseError::InvalidAlignmentType(tag).into()),
        }
    }
}

/// The penalties and rewards used to score alignments.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ScoringScheme {
    /// How scores were computed.
    pub score_type: ScoreType,

    /// Which alignments were allowed.
    pub alignment_type: AlignmentType,

    /// The penalty for opening an insertion.
    pub first_insertion: u32,

    /// The penalty for extending an insertion.
    pub insertion_extension: u32,

    /// The penalty for opening a deletion.
    pub first_deletion: u32,

    /// The penalty for extending a deletion.
    pub deletion_extension: u32,

    /// The reward for a match.
    pub matched: u32,

    /// The penalty for a transition.
    pub transition: u32,

    /// The penalty for a transversion.
    pub transversion: u32,

    /// The penalty for an unknown base.
    pub unknown: u32,
}

impl ScoringScheme {
    /// Reads the optional scoring scheme block.
    pub(crate) fn read(reader: &mut impl Read) -> parse::Result<Option<Self>> {
        let Some(score_type) = ScoreType::from_tag(binary::read_u8(reader)?)? else {
            return Ok(None);
        };

        let alignment_type = AlignmentType::from_tag(binary::read_u8(reader)?)?;

        let mut scores = [0u32; 8];
        for score in scores.iter_mut() {
            *score = binary::read_u32(reader)?;
        }

        let [first_insertion, insertion_extension, first_deletion, deletion_extension, matched, transition, transversion, unknown] =
            scores;

        Ok(Some(Self {
            score_type,
            alignment_type,
            first_insertion,
            insertion_extension,
            first_deletion,
            deletion_extension,
            matched,
            transition,
            transversion,
            unknown,
        }))
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Reference descriptions
////////////////////////////////////////////////////////////////////////////////////////

/// The length and topology of one reference sequence.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReferenceDescription {
    /// The number of residues.
    pub length: u64,

    /// Whether the reference is circular.
    pub circular: bool,
}

impl ReferenceDescription {
    /// Reads one reference description.
    pub(crate) fn read(reader: &mut impl Read) -> parse::Result<Self> {
        let length = binary::read_u64(reader)?;
        let flags = binary::read_u8(reader)?;

        Ok(Self {
            length,
            circular: flags & CIRCULAR_FLAG != 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::Error;
    use crate::parse::Malformed;

    #[test]
    fn the_magic_number_is_checked() -> Result<(), Box<dyn std::error::Error>> {
        let Err(err) = Metadata::read(&mut &b"CLC\x80\x00\x00\x00\x02"[..]) else {
            return Err("a bad magic number was accepted".into());
        };
        assert!(matches!(
            err,
            Error::Malformed(Malformed::Cas(ParseError::InvalidMagicNumber(_)))
        ));

        Ok(())
    }

    #[test]
    fn absent_scoring_schemes_consume_one_byte() -> Result<(), Box<dyn std::error::Error>> {
        let mut reader = &[0u8, 0xaa][..];
        assert!(ScoringScheme::read(&mut reader)?.is_none());
        assert_eq!(reader, [0xaa]);
        Ok(())
    }

    #[test]
    fn circularity_is_the_low_flag_bit() -> Result<(), Box<dyn std::error::Error>> {
        let mut data = 5000u64.to_le_bytes().to_vec();
        data.push(0x03);

        let description = ReferenceDescription::read(&mut &data[..])?;
        assert_eq!(description.length, 5000);
        assert!(description.circular);

        Ok(())
    }
}
