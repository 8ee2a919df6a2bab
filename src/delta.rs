//! The reference-delta nucleotide codec.
//!
//! A [`ReferenceDeltaSequence`] stores an aligned, gapped read as the window
//! of a shared reference it aligns to plus the sparse set of offsets where
//! the read disagrees with the reference. Reads that are identical to the
//! reference over their window store no differences at all.
//!
//! The differences are packed into a single buffer:
//!
//! ```text
//! byte 0          count width tag (0, 1, 2 or 4)
//! bytes 1..k      number of differences
//! byte k          offset width tag (1, 2 or 4)
//! bytes k+1..m    ascending, unique offsets into the read
//! bytes m..end    4-bit nucleotide codes, two per byte, in offset order
//! ```
//!
//! Each width is the narrowest that holds the largest value actually stored,
//! so encoding the same differences always yields the same bytes.
//!
//! ```
//! use std::sync::Arc;
//!
//! use assemblyfile::delta::ReferenceDeltaSequence;
//! use assemblyfile::nucleotide::NucleotideSequence;
//!
//! let reference = Arc::new("ACGT-ACGTACGT".parse::<NucleotideSequence>()?);
//! let read = "GTAACG".parse::<NucleotideSequence>()?;
//!
//! let sequence = ReferenceDeltaSequence::try_encode(reference, read.as_slice(), 2)?;
//! assert_eq!(sequence.to_string(), "GTAACG");
//! assert_eq!(sequence.differences().len(), 1);
//! assert!(sequence.gap_offsets().is_empty());
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::collections::BTreeSet;
use std::sync::Arc;

use crate::binary;
use crate::binary::Width;
use crate::nucleotide::Nucleotide;
use crate::nucleotide::NucleotideSequence;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to a [`ReferenceDeltaSequence`].
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// The start offset in the reference is negative.
    NegativeStart(i32),

    /// The aligned window runs past the end of the reference.
    WindowOutOfBounds {
        /// The start offset in the reference.
        start: i32,

        /// The length of the aligned sequence.
        length: usize,

        /// The length of the reference.
        reference_length: usize,
    },

    /// The aligned sequence is too long to encode.
    TooLong(usize),

    /// An index outside of the sequence was requested.
    IndexOutOfBounds {
        /// The requested index.
        index: usize,

        /// The length of the sequence.
        length: usize,
    },
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::NegativeStart(start) => {
                write!(f, "start offset in reference cannot be negative: {start}")
            }
            Error::WindowOutOfBounds {
                start,
                length,
                reference_length,
            } => write!(
                f,
                "aligned window of length {length} starting at {start} runs past the end of \
                 the reference (length {reference_length})"
            ),
            Error::TooLong(length) => write!(f, "sequence of length {length} is too long"),
            Error::IndexOutOfBounds { index, length } => {
                write!(f, "index {index} is out of bounds for length {length}")
            }
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Packed differences
////////////////////////////////////////////////////////////////////////////////////////

/// A read-only view of a packed difference buffer.
struct Diffs<'a> {
    /// The packed buffer.
    buffer: &'a [u8],

    /// The number of differences.
    count: usize,

    /// The width of each offset.
    offset_width: Width,

    /// The position of the first offset.
    offsets_start: usize,

    /// The position of the first packed symbol.
    symbols_start: usize,
}

impl<'a> Diffs<'a> {
    /// Packs the differences, which must be sorted by offset.
    fn pack(diffs: &[(u32, Nucleotide)]) -> Box<[u8]> {
        let count = diffs.len() as u32;
        let max_offset = diffs.last().map(|(offset, _)| *offset).unwrap_or(0);

        let count_width = Width::narrowest(count);
        let offset_width = Width::narrowest_nonzero(max_offset);

        let mut buffer = Vec::with_capacity(
            2 + count_width.bytes() + diffs.len() * offset_width.bytes() + diffs.len().div_ceil(2),
        );

        buffer.push(count_width.tag());
        count_width.write(&mut buffer, count);
        buffer.push(offset_width.tag());

        for (offset, _) in diffs {
            offset_width.write(&mut buffer, *offset);
        }

        let codes = diffs.iter().map(|(_, n)| n.code()).collect::<Vec<_>>();
        buffer.extend(binary::pack_nibbles(&codes));

        buffer.into_boxed_slice()
    }

    /// Reads the header of a buffer produced by [`Diffs::pack()`].
    fn new(buffer: &'a [u8]) -> Self {
        let header = || -> Option<Self> {
            let count_width = Width::from_tag(*buffer.first()?)?;
            let count = count_width.read_at(buffer, 1)? as usize;
            let tag_position = 1 + count_width.bytes();
            let offset_width = Width::from_tag(*buffer.get(tag_position)?)?;
            let offsets_start = tag_position + 1;
            let symbols_start = offsets_start + count * offset_width.bytes();

            Some(Self {
                buffer,
                count,
                offset_width,
                offsets_start,
                symbols_start,
            })
        };

        header().unwrap_or_else(|| unreachable!("difference buffers are only built by `pack`"))
    }

    /// Gets the offset of the `i`th difference.
    fn offset(&self, i: usize) -> usize {
        self.offset_width
            .read_at(self.buffer, self.offsets_start + i * self.offset_width.bytes())
            .unwrap_or_else(|| unreachable!("offset {i} lies within the packed buffer"))
            as usize
    }

    /// Gets the symbol of the `i`th difference.
    fn symbol(&self, i: usize) -> Nucleotide {
        binary::nibble_at(&self.buffer[self.symbols_start..], i)
            .and_then(|code| Nucleotide::try_from_code(code).ok())
            .unwrap_or_else(|| unreachable!("symbol {i} lies within the packed buffer"))
    }

    /// Finds the symbol recorded at `offset` with a binary search.
    fn find(&self, offset: usize) -> Option<Nucleotide> {
        let (mut low, mut high) = (0, self.count);

        while low < high {
            let middle = low + (high - low) / 2;

            match self.offset(middle).cmp(&offset) {
                std::cmp::Ordering::Less => low = middle + 1,
                std::cmp::Ordering::Greater => high = middle,
                std::cmp::Ordering::Equal => return Some(self.symbol(middle)),
            }
        }

        None
    }

    /// Iterates over every `(offset, symbol)` pair in offset order.
    fn iter(&self) -> impl Iterator<Item = (usize, Nucleotide)> + '_ {
        (0..self.count).map(move |i| (self.offset(i), self.symbol(i)))
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Reference-delta sequences
////////////////////////////////////////////////////////////////////////////////////////

/// A gapped sequence stored as differences against a shared reference.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ReferenceDeltaSequence {
    /// The number of symbols, gaps included.
    length: u32,

    /// The offset of the first symbol in the reference.
    start: i32,

    /// The shared reference.
    reference: Arc<NucleotideSequence>,

    /// The packed differences, absent when the sequence matches the
    /// reference exactly.
    diffs: Option<Box<[u8]>>,
}

impl ReferenceDeltaSequence {
    /// Attempts to encode `aligned` against the window of `reference`
    /// beginning at `start`.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use assemblyfile::delta::Error;
    /// use assemblyfile::delta::ReferenceDeltaSequence;
    /// use assemblyfile::nucleotide::NucleotideSequence;
    ///
    /// let reference = Arc::new("ACGTACGT".parse::<NucleotideSequence>()?);
    /// let read = "CGTA".parse::<NucleotideSequence>()?;
    ///
    /// let sequence = ReferenceDeltaSequence::try_encode(reference.clone(), read.as_slice(), 1)?;
    /// assert!(sequence.is_identical_to_reference());
    ///
    /// let err = ReferenceDeltaSequence::try_encode(reference, read.as_slice(), 6).unwrap_err();
    /// assert!(matches!(err, Error::WindowOutOfBounds { .. }));
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn try_encode(
        reference: Arc<NucleotideSequence>,
        aligned: &[Nucleotide],
        start: i32,
    ) -> Result<Self> {
        if start < 0 {
            return Err(Error::NegativeStart(start));
        }

        let length = u32::try_from(aligned.len()).map_err(|_| Error::TooLong(aligned.len()))?;
        let window_start = start as usize;

        if window_start + aligned.len() > reference.len() {
            return Err(Error::WindowOutOfBounds {
                start,
                length: aligned.len(),
                reference_length: reference.len(),
            });
        }

        let window = &reference.as_slice()[window_start..window_start + aligned.len()];
        let diffs = aligned
            .iter()
            .zip(window)
            .enumerate()
            .filter(|(_, (read, expected))| read != expected)
            .map(|(offset, (read, _))| (offset as u32, *read))
            .collect::<Vec<_>>();

        let diffs = match diffs.is_empty() {
            true => None,
            false => Some(Diffs::pack(&diffs)),
        };

        Ok(Self {
            length,
            start,
            reference,
            diffs,
        })
    }

    /// Gets the number of symbols, gaps included.
    pub fn len(&self) -> usize {
        self.length as usize
    }

    /// Whether the sequence has no symbols.
    pub fn is_empty(&self) -> bool {
        self.length == 0
    }

    /// Gets the offset of the first symbol within the reference.
    pub fn start_in_reference(&self) -> i32 {
        self.start
    }

    /// Gets the shared reference.
    pub fn reference(&self) -> &Arc<NucleotideSequence> {
        &self.reference
    }

    /// Whether the sequence matches its reference window exactly.
    pub fn is_identical_to_reference(&self) -> bool {
        self.diffs.is_none()
    }

    /// Gets the size of the packed difference buffer in bytes.
    pub fn packed_len(&self) -> usize {
        self.diffs.as_ref().map(|diffs| diffs.len()).unwrap_or(0)
    }

    /// A view of the packed differences, if any.
    fn diffs(&self) -> Option<Diffs<'_>> {
        self.diffs.as_deref().map(Diffs::new)
    }

    /// Gets the symbol at `index` without materializing the sequence.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    ///
    /// use assemblyfile::delta::ReferenceDeltaSequence;
    /// use assemblyfile::nucleotide::Nucleotide;
    /// use assemblyfile::nucleotide::NucleotideSequence;
    ///
    /// let reference = Arc::new("AAAAAA".parse::<NucleotideSequence>()?);
    /// let read = "AACA".parse::<NucleotideSequence>()?;
    /// let sequence = ReferenceDeltaSequence::try_encode(reference, read.as_slice(), 1)?;
    ///
    /// assert_eq!(sequence.get(2)?, Nucleotide::C);
    /// assert_eq!(sequence.get(3)?, Nucleotide::A);
    /// assert!(sequence.get(4).is_err());
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn get(&self, index: usize) -> Result<Nucleotide> {
        if index >= self.len() {
            return Err(Error::IndexOutOfBounds {
                index,
                length: self.len(),
            });
        }

        if let Some(symbol) = self.diffs().and_then(|diffs| diffs.find(index)) {
            return Ok(symbol);
        }

        Ok(self
            .reference
            .get(self.start as usize + index)
            .unwrap_or_else(|| unreachable!("the window was checked against the reference")))
    }

    /// Gets every `(offset, symbol)` where the sequence differs from its
    /// reference window, in offset order.
    pub fn differences(&self) -> Vec<(usize, Nucleotide)> {
        self.diffs()
            .map(|diffs| diffs.iter().collect())
            .unwrap_or_default()
    }

    /// Gets the offsets of every gap in the sequence, ascending.
    ///
    /// The reference's own gaps inside the window count unless a difference
    /// replaces them with a base; differences that insert a gap where the
    /// reference has a base count as well.
    pub fn gap_offsets(&self) -> Vec<usize> {
        let start = self.start as usize;
        let end = start + self.len();

        let mut gaps = self
            .reference
            .gap_offsets()
            .iter()
            .filter(|offset| (start..end).contains(offset))
            .map(|offset| offset - start)
            .collect::<BTreeSet<_>>();

        if let Some(diffs) = self.diffs() {
            for (offset, symbol) in diffs.iter() {
                match symbol.is_gap() {
                    true => gaps.insert(offset),
                    false => gaps.remove(&offset),
                };
            }
        }

        gaps.into_iter().collect()
    }

    /// Gets the number of gaps.
    pub fn num_gaps(&self) -> usize {
        self.gap_offsets().len()
    }

    /// Gets the number of non-gap symbols.
    pub fn ungapped_len(&self) -> usize {
        self.len() - self.num_gaps()
    }

    /// Materializes the symbols: the reference window with every difference
    /// written over it.
    pub fn to_vec(&self) -> Vec<Nucleotide> {
        let start = self.start as usize;
        let mut symbols = self.reference.as_slice()[start..start + self.len()].to_vec();

        if let Some(diffs) = self.diffs() {
            for (offset, symbol) in diffs.iter() {
                symbols[offset] = symbol;
            }
        }

        symbols
    }

    /// Materializes the sequence.
    pub fn to_sequence(&self) -> NucleotideSequence {
        NucleotideSequence::new(self.to_vec())
    }
}

impl std::fmt::Display for ReferenceDeltaSequence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.to_sequence())
    }
}

#[cfg(test)]
mod tests {
    use rand::seq::SliceRandom;
    use rand::Rng;

    use super::*;

    /// Parses a shared reference.
    fn reference(s: &str) -> Arc<NucleotideSequence> {
        Arc::new(s.parse().unwrap())
    }

    /// Parses a sequence into symbols.
    fn symbols(s: &str) -> Vec<Nucleotide> {
        s.parse::<NucleotideSequence>().unwrap().into_inner()
    }

    #[test]
    fn identical_reads_store_no_differences() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let sequence =
            ReferenceDeltaSequence::try_encode(reference("ACGTACGT"), &symbols("ACGTACGT"), 0)?;

        assert!(sequence.is_identical_to_reference());
        assert_eq!(sequence.packed_len(), 0);
        assert_eq!(sequence.to_vec(), symbols("ACGTACGT"));

        Ok(())
    }

    #[test]
    fn every_position_may_differ() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let read = symbols("TGCATGCA");
        let sequence = ReferenceDeltaSequence::try_encode(reference("ACGTACGT"), &read, 0)?;

        assert_eq!(sequence.differences().len(), 8);
        // tag + count + tag + 8 offsets + 4 bytes of symbols
        assert_eq!(sequence.packed_len(), 1 + 1 + 1 + 8 + 4);
        assert_eq!(sequence.to_vec(), read);

        for (i, expected) in read.iter().enumerate() {
            assert_eq!(sequence.get(i)?, *expected);
        }

        Ok(())
    }

    #[test]
    fn widths_follow_the_largest_offset() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let reference = Arc::new(NucleotideSequence::new(vec![Nucleotide::A; 70_000]));

        let mut read = vec![Nucleotide::A; 300];
        read[299] = Nucleotide::C;
        let sequence = ReferenceDeltaSequence::try_encode(reference.clone(), &read, 0)?;
        assert_eq!(sequence.packed_len(), 1 + 1 + 1 + 2 + 1);
        assert_eq!(sequence.get(299)?, Nucleotide::C);

        let mut read = vec![Nucleotide::A; 69_000];
        read[68_000] = Nucleotide::G;
        let sequence = ReferenceDeltaSequence::try_encode(reference, &read, 1000)?;
        assert_eq!(sequence.packed_len(), 1 + 1 + 1 + 4 + 1);
        assert_eq!(sequence.get(68_000)?, Nucleotide::G);
        assert_eq!(sequence.get(67_999)?, Nucleotide::A);

        Ok(())
    }

    #[test]
    fn random_reads_round_trip() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let alphabet = [
            Nucleotide::A,
            Nucleotide::C,
            Nucleotide::G,
            Nucleotide::T,
            Nucleotide::N,
            Nucleotide::Gap,
        ];
        let mut rng = rand::thread_rng();

        for _ in 0..200 {
            let reference_len = rng.gen_range(1..600);
            let reference = (0..reference_len)
                .map(|_| *alphabet.choose(&mut rng).unwrap())
                .collect::<Vec<_>>();
            let reference = Arc::new(NucleotideSequence::new(reference));

            let start = rng.gen_range(0..reference_len);
            let length = rng.gen_range(0..=reference_len - start);
            let mut read = reference.as_slice()[start..start + length].to_vec();

            for symbol in read.iter_mut() {
                if rng.gen_bool(0.1) {
                    *symbol = *alphabet.choose(&mut rng).unwrap();
                }
            }

            let sequence =
                ReferenceDeltaSequence::try_encode(reference.clone(), &read, start as i32)?;
            assert_eq!(sequence.to_vec(), read);

            for (i, expected) in read.iter().enumerate() {
                assert_eq!(sequence.get(i)?, *expected);
            }

            let expected_gaps = read
                .iter()
                .enumerate()
                .filter(|(_, n)| n.is_gap())
                .map(|(i, _)| i)
                .collect::<Vec<_>>();
            assert_eq!(sequence.gap_offsets(), expected_gaps);
        }

        Ok(())
    }

    #[test]
    fn a_base_over_a_reference_gap_is_not_a_gap(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        // reference gaps at 3 and 6; the window starts at 2
        let sequence =
            ReferenceDeltaSequence::try_encode(reference("ACG-TA-CG"), &symbols("GTTA-C"), 2)?;

        assert_eq!(sequence.gap_offsets(), vec![4]);
        assert_eq!(sequence.num_gaps(), 1);
        assert_eq!(sequence.ungapped_len(), 5);

        Ok(())
    }

    #[test]
    fn a_gap_over_a_reference_base_is_a_gap() -> std::result::Result<(), Box<dyn std::error::Error>>
    {
        let sequence =
            ReferenceDeltaSequence::try_encode(reference("ACG-TACG"), &symbols("G-T-C"), 2)?;

        assert_eq!(sequence.gap_offsets(), vec![1, 3]);
        assert_eq!(sequence.to_string(), "G-T-C");

        Ok(())
    }

    #[test]
    fn reference_gaps_outside_the_window_are_ignored(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let sequence =
            ReferenceDeltaSequence::try_encode(reference("-ACGT-"), &symbols("ACGT"), 1)?;
        assert!(sequence.gap_offsets().is_empty());
        Ok(())
    }

    #[test]
    fn invalid_windows_are_rejected() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let Err(err) = ReferenceDeltaSequence::try_encode(reference("ACGT"), &symbols("A"), -1)
        else {
            return Err("a negative start was accepted".into());
        };
        assert_eq!(err, Error::NegativeStart(-1));

        let Err(err) = ReferenceDeltaSequence::try_encode(reference("ACGT"), &symbols("GTA"), 2)
        else {
            return Err("an overlong window was accepted".into());
        };
        assert_eq!(
            err.to_string(),
            "aligned window of length 3 starting at 2 runs past the end of the reference \
             (length 4)"
        );

        Ok(())
    }
}
