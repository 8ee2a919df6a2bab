//! Match records and their run-length alignment payloads.

use std::io::Read;

use crate::binary;
use crate::cas::ParseError;
use crate::parse;

/// The flag bit marking a read that aligned.
const HAS_MATCH: u8 = 0x01;

/// The flag bit marking a read with more than one match.
const HAS_MULTIPLE_MATCHES: u8 = 0x02;

/// The flag bit marking a read with more than one reported alignment.
const HAS_MULTIPLE_ALIGNMENTS: u8 = 0x04;

/// The flag bit marking a read that is part of a pair.
const IS_PART_OF_PAIR: u8 = 0x08;

/// The token announcing a phase change.
const PHASE_CHANGE: u8 = 255;

////////////////////////////////////////////////////////////////////////////////////////
// Tokens
////////////////////////////////////////////////////////////////////////////////////////

/// A run-length alignment event.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Token {
    /// A run of aligned (matching or mismatching) positions.
    Match(u32),

    /// A run of read positions absent from the reference.
    Insertion(u32),

    /// A run of reference positions absent from the read.
    Deletion(u32),

    /// A phase change with its raw value.
    PhaseChange(u8),
}

/// Decodes an alignment payload into tokens.
///
/// # Examples
///
/// ```
/// use assemblyfile::cas::alignment::decode_tokens;
/// use assemblyfile::cas::alignment::Token;
///
/// let tokens = decode_tokens(&[5, 130, 192, 255, 7])?;
/// assert_eq!(
///     tokens,
///     [
///         Token::Match(6),
///         Token::Insertion(3),
///         Token::Deletion(1),
///         Token::PhaseChange(7)
///     ]
/// );
///
/// # Ok::<(), Box<dyn std::error::Error>>(())
/// ```
pub fn decode_tokens(payload: &[u8]) -> Result<Vec<Token>, ParseError> {
    let mut tokens = Vec::new();
    let mut bytes = payload.iter().copied();

    while let Some(value) = bytes.next() {
        let token = match value {
            PHASE_CHANGE => {
                let raw = bytes.next().ok_or(ParseError::TokenOvershoot {
                    budget: payload.len(),
                })?;
                Token::PhaseChange(raw)
            }
            0..=127 => Token::Match(u32::from(value) + 1),
            128..=191 => Token::Insertion(u32::from(value) - 127),
            _ => Token::Deletion(u32::from(value) - 191),
        };

        tokens.push(token);
    }

    Ok(tokens)
}

////////////////////////////////////////////////////////////////////////////////////////
// Alignments
////////////////////////////////////////////////////////////////////////////////////////

/// The alignment of a read that matched.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Alignment {
    /// The index of the reference the read aligned to.
    pub reference_index: u32,

    /// The zero-based reference offset of the first aligned position.
    pub start: u64,

    /// Whether the read aligned reverse-complemented.
    pub reverse: bool,

    /// The run-length alignment events.
    pub tokens: Vec<Token>,

    /// The alignment score.
    pub score: u32,
}

impl Alignment {
    /// Gets the number of read positions the alignment covers.
    pub fn read_span(&self) -> u64 {
        self.tokens
            .iter()
            .map(|token| match token {
                Token::Match(n) | Token::Insertion(n) => u64::from(*n),
                _ => 0,
            })
            .sum()
    }

    /// Gets the number of reference positions the alignment covers.
    pub fn reference_span(&self) -> u64 {
        self.tokens
            .iter()
            .map(|token| match token {
                Token::Match(n) | Token::Deletion(n) => u64::from(*n),
                _ => 0,
            })
            .sum()
    }
}

/// One match record: how (and whether) a read aligned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Match {
    /// The total number of matches when there was more than one.
    pub multiple_matches: Option<u64>,

    /// The number of reported alignments when there was more than one.
    pub multiple_alignments: Option<u64>,

    /// Whether the read is part of a pair.
    pub part_of_pair: bool,

    /// The alignment, when the read matched.
    pub alignment: Option<Alignment>,
}

impl Match {
    /// Whether the read matched.
    pub fn has_match(&self) -> bool {
        self.alignment.is_some()
    }

    /// Reads one match record.
    pub(crate) fn read(reader: &mut impl Read) -> parse::Result<Self> {
        let flags = binary::read_u8(reader)?;

        let multiple_matches = match flags & HAS_MULTIPLE_MATCHES {
            0 => None,
            _ => Some(u64::from(binary::read_byte_count(reader)?) + 2),
        };

        let multiple_alignments = match flags & HAS_MULTIPLE_ALIGNMENTS {
            0 => None,
            _ => Some(u64::from(binary::read_byte_count(reader)?) + 2),
        };

        let alignment = match flags & HAS_MATCH {
            0 => None,
            _ => {
                let payload_len = binary::read_byte_count(reader)?;
                let reference_index = binary::read_byte_count(reader)?;
                let start = binary::read_u64(reader)?;
                let reverse = binary::read_u8(reader)? != 0;
                let payload = binary::read_bytes(reader, payload_len as usize)?;
                let tokens = decode_tokens(&payload)?;
                let score = binary::read_u32(reader)?;

                Some(Alignment {
                    reference_index,
                    start,
                    reverse,
                    tokens,
                    score,
                })
            }
        };

        Ok(Self {
            multiple_matches,
            multiple_alignments,
            part_of_pair: flags & IS_PART_OF_PAIR != 0,
            alignment,
        })
    }

    /// Writes this match record. Used to build fixtures.
    #[cfg(test)]
    pub(crate) fn write(&self, buffer: &mut Vec<u8>) -> std::io::Result<()> {
        let mut flags = 0;

        if self.alignment.is_some() {
            flags |= HAS_MATCH;
        }

        if self.multiple_matches.is_some() {
            flags |= HAS_MULTIPLE_MATCHES;
        }

        if self.multiple_alignments.is_some() {
            flags |= HAS_MULTIPLE_ALIGNMENTS;
        }

        if self.part_of_pair {
            flags |= IS_PART_OF_PAIR;
        }

        binary::write_u8(buffer, flags)?;

        if let Some(count) = self.multiple_matches {
            binary::write_byte_count(buffer, (count - 2) as u32)?;
        }

        if let Some(count) = self.multiple_alignments {
            binary::write_byte_count(buffer, (count - 2) as u32)?;
        }

        if let Some(alignment) = &self.alignment {
            let payload = encode_tokens(&alignment.tokens);
            binary::write_byte_count(buffer, payload.len() as u32)?;
            binary::write_byte_count(buffer, alignment.reference_index)?;
            binary::write_u64(buffer, alignment.start)?;
            binary::write_u8(buffer, u8::from(alignment.reverse))?;
            buffer.extend(payload);
            binary::write_u32(buffer, alignment.score)?;
        }

        Ok(())
    }
}

/// Encodes tokens whose runs each fit in a single byte.
#[cfg(test)]
fn encode_tokens(tokens: &[Token]) -> Vec<u8> {
    let mut payload = Vec::new();

    for token in tokens {
        match *token {
            Token::Match(n) => payload.push((n - 1) as u8),
            Token::Insertion(n) => payload.push((n + 127) as u8),
            Token::Deletion(n) => payload.push((n + 191) as u8),
            Token::PhaseChange(raw) => payload.extend([PHASE_CHANGE, raw]),
        }
    }

    payload
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn run_lengths_are_offset_by_their_base() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(decode_tokens(&[0])?, [Token::Match(1)]);
        assert_eq!(decode_tokens(&[127])?, [Token::Match(128)]);
        assert_eq!(decode_tokens(&[128])?, [Token::Insertion(1)]);
        assert_eq!(decode_tokens(&[191])?, [Token::Insertion(64)]);
        assert_eq!(decode_tokens(&[192])?, [Token::Deletion(1)]);
        assert_eq!(decode_tokens(&[254])?, [Token::Deletion(63)]);
        assert_eq!(decode_tokens(&[255, 255])?, [Token::PhaseChange(255)]);
        Ok(())
    }

    #[test]
    fn a_phase_change_cannot_overshoot_the_payload() {
        assert_eq!(
            decode_tokens(&[3, 255]),
            Err(ParseError::TokenOvershoot { budget: 2 })
        );
    }

    #[test]
    fn spans_count_the_right_tokens() -> Result<(), Box<dyn std::error::Error>> {
        let alignment = Alignment {
            reference_index: 0,
            start: 3,
            reverse: false,
            tokens: decode_tokens(&[5, 130, 192, 255, 7])?,
            score: 10,
        };

        assert_eq!(alignment.read_span(), 9);
        assert_eq!(alignment.reference_span(), 7);

        Ok(())
    }

    #[test]
    fn match_records_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let record = Match {
            multiple_matches: Some(3),
            multiple_alignments: None,
            part_of_pair: true,
            alignment: Some(Alignment {
                reference_index: 300,
                start: 12,
                reverse: true,
                tokens: vec![Token::Match(10), Token::Deletion(2), Token::Match(4)],
                score: 42,
            }),
        };

        let mut buffer = Vec::new();
        record.write(&mut buffer)?;

        let mut reader = &buffer[..];
        assert_eq!(Match::read(&mut reader)?, record);
        assert!(reader.is_empty());

        let unmatched = Match::read(&mut &[0u8][..])?;
        assert!(!unmatched.has_match());

        Ok(())
    }
}
