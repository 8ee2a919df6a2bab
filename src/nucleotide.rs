//! Nucleotides and gapped nucleotide sequences.
//!
//! Every [`Nucleotide`] has a 4-bit code so that sequences can be packed two
//! symbols per byte. The gap symbol has code `0`.

use std::str::FromStr;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to a [`Nucleotide`].
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// A character that is not an IUPAC nucleotide or gap symbol.
    InvalidSymbol(char),

    /// A 4-bit code outside `0..=15`.
    InvalidCode(u8),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::InvalidSymbol(c) => write!(f, "invalid nucleotide symbol: {c:?}"),
            Error::InvalidCode(code) => write!(f, "invalid nucleotide code: {code}"),
        }
    }
}

impl std::error::Error for Error {}

////////////////////////////////////////////////////////////////////////////////////////
// Nucleotide
////////////////////////////////////////////////////////////////////////////////////////

/// A nucleotide, ambiguity code, or gap.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Nucleotide {
    /// A gap (`-` or `*`).
    Gap,
    /// Adenine.
    A,
    /// Cytosine.
    C,
    /// Guanine.
    G,
    /// Thymine.
    T,
    /// Any base.
    N,
    /// A or G.
    R,
    /// C or T.
    Y,
    /// G or T.
    K,
    /// A or C.
    M,
    /// C or G.
    S,
    /// A or T.
    W,
    /// Not A.
    B,
    /// Not C.
    D,
    /// Not G.
    H,
    /// Not T.
    V,
}

/// Every nucleotide, indexed by its code.
const BY_CODE: [Nucleotide; 16] = [
    Nucleotide::Gap,
    Nucleotide::A,
    Nucleotide::C,
    Nucleotide::G,
    Nucleotide::T,
    Nucleotide::N,
    Nucleotide::R,
    Nucleotide::Y,
    Nucleotide::K,
    Nucleotide::M,
    Nucleotide::S,
    Nucleotide::W,
    Nucleotide::B,
    Nucleotide::D,
    Nucleotide::H,
    Nucleotide::V,
];

impl Nucleotide {
    /// Gets the 4-bit code.
    pub fn code(&self) -> u8 {
        *self as u8
    }

    /// Gets the nucleotide for a 4-bit code.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::nucleotide::Nucleotide;
    ///
    /// assert_eq!(Nucleotide::try_from_code(Nucleotide::T.code())?, Nucleotide::T);
    /// assert!(Nucleotide::try_from_code(16).is_err());
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn try_from_code(code: u8) -> Result<Nucleotide, Error> {
        BY_CODE
            .get(code as usize)
            .copied()
            .ok_or(Error::InvalidCode(code))
    }

    /// Whether this is the gap symbol.
    pub fn is_gap(&self) -> bool {
        matches!(self, Nucleotide::Gap)
    }

    /// Gets the complementary nucleotide.
    pub fn complement(&self) -> Nucleotide {
        match self {
            Nucleotide::A => Nucleotide::T,
            Nucleotide::T => Nucleotide::A,
            Nucleotide::C => Nucleotide::G,
            Nucleotide::G => Nucleotide::C,
            Nucleotide::R => Nucleotide::Y,
            Nucleotide::Y => Nucleotide::R,
            Nucleotide::K => Nucleotide::M,
            Nucleotide::M => Nucleotide::K,
            Nucleotide::B => Nucleotide::V,
            Nucleotide::V => Nucleotide::B,
            Nucleotide::D => Nucleotide::H,
            Nucleotide::H => Nucleotide::D,
            other => *other,
        }
    }

    /// Gets the canonical character for this nucleotide.
    pub fn as_char(&self) -> char {
        match self {
            Nucleotide::Gap => '-',
            Nucleotide::A => 'A',
            Nucleotide::C => 'C',
            Nucleotide::G => 'G',
            Nucleotide::T => 'T',
            Nucleotide::N => 'N',
            Nucleotide::R => 'R',
            Nucleotide::Y => 'Y',
            Nucleotide::K => 'K',
            Nucleotide::M => 'M',
            Nucleotide::S => 'S',
            Nucleotide::W => 'W',
            Nucleotide::B => 'B',
            Nucleotide::D => 'D',
            Nucleotide::H => 'H',
            Nucleotide::V => 'V',
        }
    }
}

impl TryFrom<char> for Nucleotide {
    type Error = Error;

    fn try_from(c: char) -> Result<Self, Self::Error> {
        Ok(match c.to_ascii_uppercase() {
            '-' | '*' => Nucleotide::Gap,
            'A' => Nucleotide::A,
            'C' => Nucleotide::C,
            'G' => Nucleotide::G,
            'T' | 'U' => Nucleotide::T,
            'N' | 'X' => Nucleotide::N,
            'R' => Nucleotide::R,
            'Y' => Nucleotide::Y,
            'K' => Nucleotide::K,
            'M' => Nucleotide::M,
            'S' => Nucleotide::S,
            'W' => Nucleotide::W,
            'B' => Nucleotide::B,
            'D' => Nucleotide::D,
            'H' => Nucleotide::H,
            'V' => Nucleotide::V,
            _ => return Err(Error::InvalidSymbol(c)),
        })
    }
}

impl std::fmt::Display for Nucleotide {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_char())
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Sequences
////////////////////////////////////////////////////////////////////////////////////////

/// A gapped nucleotide sequence.
///
/// The sorted gap offsets are computed once at construction.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct NucleotideSequence {
    /// The symbols.
    inner: Vec<Nucleotide>,

    /// The offsets of every gap, ascending.
    gaps: Vec<usize>,
}

impl NucleotideSequence {
    /// Creates a sequence from symbols.
    pub fn new(inner: Vec<Nucleotide>) -> Self {
        let gaps = inner
            .iter()
            .enumerate()
            .filter(|(_, n)| n.is_gap())
            .map(|(i, _)| i)
            .collect();

        Self { inner, gaps }
    }

    /// Gets the number of symbols, gaps included.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// Whether the sequence has no symbols.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Gets the symbol at `index`.
    pub fn get(&self, index: usize) -> Option<Nucleotide> {
        self.inner.get(index).copied()
    }

    /// Gets the symbols.
    pub fn as_slice(&self) -> &[Nucleotide] {
        &self.inner
    }

    /// Gets the gap offsets, ascending.
    pub fn gap_offsets(&self) -> &[usize] {
        &self.gaps
    }

    /// Gets the number of non-gap symbols.
    pub fn ungapped_len(&self) -> usize {
        self.inner.len() - self.gaps.len()
    }

    /// Gets the reverse complement.
    pub fn reverse_complement(&self) -> NucleotideSequence {
        NucleotideSequence::new(self.inner.iter().rev().map(|n| n.complement()).collect())
    }

    /// Consumes `self` and returns the symbols.
    pub fn into_inner(self) -> Vec<Nucleotide> {
        self.inner
    }
}

impl From<Vec<Nucleotide>> for NucleotideSequence {
    fn from(inner: Vec<Nucleotide>) -> Self {
        Self::new(inner)
    }
}

impl FromStr for NucleotideSequence {
    type Err = Error;

    /// Parses a sequence, ignoring whitespace.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::nucleotide::NucleotideSequence;
    ///
    /// let sequence = "AC*GT".parse::<NucleotideSequence>()?;
    /// assert_eq!(sequence.len(), 5);
    /// assert_eq!(sequence.gap_offsets(), [2]);
    /// assert_eq!(sequence.to_string(), "AC-GT");
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.chars()
            .filter(|c| !c.is_whitespace())
            .map(Nucleotide::try_from)
            .collect::<Result<Vec<_>, _>>()
            .map(NucleotideSequence::new)
    }
}

impl std::fmt::Display for NucleotideSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        for nucleotide in &self.inner {
            write!(f, "{nucleotide}")?;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        for code in 0..16u8 {
            assert_eq!(Nucleotide::try_from_code(code)?.code(), code);
        }

        Ok(())
    }

    #[test]
    fn gap_symbols_parse_to_gap() -> Result<(), Box<dyn std::error::Error>> {
        assert_eq!(Nucleotide::try_from('*')?, Nucleotide::Gap);
        assert_eq!(Nucleotide::try_from('-')?, Nucleotide::Gap);
        assert_eq!(Nucleotide::try_from('a')?, Nucleotide::A);
        assert_eq!(Nucleotide::try_from('x')?, Nucleotide::N);
        assert_eq!(Nucleotide::try_from('!'), Err(Error::InvalidSymbol('!')));
        Ok(())
    }

    #[test]
    fn reverse_complement_keeps_gaps() -> Result<(), Box<dyn std::error::Error>> {
        let sequence = "ACG-TN".parse::<NucleotideSequence>()?;
        let reversed = sequence.reverse_complement();
        assert_eq!(reversed.to_string(), "NA-CGT");
        assert_eq!(reversed.gap_offsets(), [2]);
        assert_eq!(reversed.ungapped_len(), 5);
        Ok(())
    }
}
