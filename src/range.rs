//! An inclusive interval over integer coordinates.
//!
//! A [`Range`] is always stored in the zero-based coordinate system with both
//! ends inclusive. The empty range at coordinate `c` is stored as `[c ..
//! c - 1]`. Other coordinate systems are pure views computed on demand:
//!
//! ```text
//!                  | A | C | G | T |
//! zero-based         0   1   2   3      [1 .. 2]
//! residue-based      1   2   3   4      [2 .. 3]
//! space-based      0   1   2   3   4    [1 .. 3]
//! ```
//!
//! ```
//! use assemblyfile::range::CoordinateSystem;
//! use assemblyfile::Range;
//!
//! let range = Range::try_from_system(CoordinateSystem::ResidueBased, 2, 3)?;
//! assert_eq!(range, Range::try_new(1, 2)?);
//! assert_eq!(range.start_in(CoordinateSystem::SpaceBased), 1);
//! assert_eq!(range.end_in(CoordinateSystem::SpaceBased), 3);
//! assert_eq!(range.size(), 2);
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::cmp::max;
use std::cmp::min;
use std::str::FromStr;

use nonempty::NonEmpty;

pub mod cache;

pub use cache::Cache;

////////////////////////////////////////////////////////////////////////////////////////
// Errors
////////////////////////////////////////////////////////////////////////////////////////

/// An error related to a [`Range`].
#[derive(Debug, Eq, PartialEq)]
pub enum Error {
    /// The end lies before the coordinate preceding the start.
    EndBeforeStart(i64, i64),

    /// The range does not fit in the coordinate space.
    Overflow,

    /// A range cannot be split into pieces of zero length.
    ZeroSplitLength,

    /// A range could not be parsed from the given value.
    Parse(String),
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::EndBeforeStart(start, end) => write!(
                f,
                "invalid range: end ({end}) must be no less than start - 1 ({start} - 1)"
            ),
            Error::Overflow => write!(f, "range exceeds the coordinate space"),
            Error::ZeroSplitLength => write!(f, "split length must be greater than zero"),
            Error::Parse(value) => write!(f, "could not parse range from the value: {value}"),
        }
    }
}

impl std::error::Error for Error {}

/// A [`Result`](std::result::Result) with an [`Error`].
type Result<T> = std::result::Result<T, Error>;

////////////////////////////////////////////////////////////////////////////////////////
// Coordinate systems
////////////////////////////////////////////////////////////////////////////////////////

/// A convention for naming positions within an interval.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum CoordinateSystem {
    /// Residues are numbered from zero; both ends inclusive.
    ZeroBased,

    /// Residues are numbered from one; both ends inclusive.
    ResidueBased,

    /// The spaces between residues are numbered from zero; the end is
    /// exclusive of the residue it names.
    SpaceBased,
}

impl CoordinateSystem {
    /// The offset added to a zero-based start to express it in this system.
    fn start_shift(&self) -> i64 {
        match self {
            CoordinateSystem::ZeroBased => 0,
            CoordinateSystem::ResidueBased => 1,
            CoordinateSystem::SpaceBased => 0,
        }
    }

    /// The offset added to a zero-based end to express it in this system.
    fn end_shift(&self) -> i64 {
        match self {
            CoordinateSystem::ZeroBased => 0,
            CoordinateSystem::ResidueBased => 1,
            CoordinateSystem::SpaceBased => 1,
        }
    }

    /// Gets the abbreviation used when displaying a range.
    pub fn abbreviation(&self) -> &'static str {
        match self {
            CoordinateSystem::ZeroBased => "0B",
            CoordinateSystem::ResidueBased => "RB",
            CoordinateSystem::SpaceBased => "SB",
        }
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Range
////////////////////////////////////////////////////////////////////////////////////////

/// An immutable, inclusive, zero-based interval.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub struct Range {
    /// The zero-based start.
    start: i64,

    /// The zero-based inclusive end.
    end: i64,
}

impl Range {
    /// Attempts to create a new [`Range`] from zero-based coordinates.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::Range;
    ///
    /// assert_eq!(Range::try_new(5, 9)?.size(), 5);
    /// assert!(Range::try_new(5, 4)?.is_empty());
    /// assert!(Range::try_new(5, 3).is_err());
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn try_new(start: i64, end: i64) -> Result<Range> {
        if end < start.saturating_sub(1) {
            return Err(Error::EndBeforeStart(start, end));
        }

        Ok(Range { start, end })
    }

    /// Attempts to create a [`Range`] of `length` residues beginning at the
    /// zero-based `start`.
    pub fn of_length(start: i64, length: u64) -> Result<Range> {
        let length = i64::try_from(length).map_err(|_| Error::Overflow)?;
        let end = start
            .checked_add(length)
            .and_then(|end| end.checked_sub(1))
            .ok_or(Error::Overflow)?;

        Range::try_new(start, end)
    }

    /// Creates the empty [`Range`] positioned at `coordinate`.
    ///
    /// The coordinate `i64::MIN` has no predecessor and is moved up by one.
    pub fn empty_at(coordinate: i64) -> Range {
        let start = max(coordinate, i64::MIN + 1);
        Range {
            start,
            end: start - 1,
        }
    }

    /// Attempts to create a [`Range`] from coordinates in `system`.
    pub fn try_from_system(system: CoordinateSystem, start: i64, end: i64) -> Result<Range> {
        let start = start
            .checked_sub(system.start_shift())
            .ok_or(Error::Overflow)?;
        let end = end.checked_sub(system.end_shift()).ok_or(Error::Overflow)?;
        Range::try_new(start, end)
    }

    /// Gets the zero-based start.
    pub fn start(&self) -> i64 {
        self.start
    }

    /// Gets the zero-based inclusive end.
    pub fn end(&self) -> i64 {
        self.end
    }

    /// Gets the start expressed in `system`.
    pub fn start_in(&self, system: CoordinateSystem) -> i64 {
        self.start.saturating_add(system.start_shift())
    }

    /// Gets the end expressed in `system`.
    pub fn end_in(&self, system: CoordinateSystem) -> i64 {
        self.end.saturating_add(system.end_shift())
    }

    /// Gets the number of residues covered.
    pub fn size(&self) -> u64 {
        (i128::from(self.end) - i128::from(self.start) + 1) as u64
    }

    /// Whether the range covers no residues.
    pub fn is_empty(&self) -> bool {
        self.end < self.start
    }

    /// Whether the zero-based `coordinate` lies inside the range.
    pub fn contains(&self, coordinate: i64) -> bool {
        self.start <= coordinate && coordinate <= self.end
    }

    /// Whether every residue of `other` lies inside this range.
    ///
    /// An empty `other` is contained by every range.
    pub fn contains_range(&self, other: &Range) -> bool {
        other.is_empty() || (self.start <= other.start && other.end <= self.end)
    }

    /// Whether the two ranges share at least one residue.
    pub fn intersects(&self, other: &Range) -> bool {
        !self.is_empty()
            && !other.is_empty()
            && self.start <= other.end
            && other.start <= self.end
    }

    /// Gets the residues shared by both ranges.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::Range;
    ///
    /// let a = Range::try_new(0, 9)?;
    /// let b = Range::try_new(5, 20)?;
    /// assert_eq!(a.intersection(&b), Range::try_new(5, 9)?);
    /// assert!(a.intersection(&Range::try_new(15, 20)?).is_empty());
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn intersection(&self, other: &Range) -> Range {
        if !self.intersects(other) {
            return Range::empty_at(self.start);
        }

        Range {
            start: max(self.start, other.start),
            end: min(self.end, other.end),
        }
    }

    /// Whether the two ranges intersect or sit directly next to each other.
    fn touches(&self, other: &Range) -> bool {
        self.intersects(other)
            || self.end.checked_add(1) == Some(other.start)
            || other.end.checked_add(1) == Some(self.start)
    }

    /// Gets the union of the two ranges.
    ///
    /// Intersecting or abutting ranges union to a single range. Disjoint
    /// ranges are returned unchanged, ordered by start. Empty ranges
    /// contribute nothing unless both are empty, in which case `self` is
    /// returned.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::Range;
    ///
    /// let union = Range::try_new(0, 4)?.union(&Range::try_new(5, 9)?);
    /// assert_eq!(union.len(), 1);
    /// assert_eq!(union.head, Range::try_new(0, 9)?);
    ///
    /// let union = Range::try_new(10, 14)?.union(&Range::try_new(0, 4)?);
    /// assert_eq!(union.len(), 2);
    /// assert_eq!(union.head, Range::try_new(0, 4)?);
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn union(&self, other: &Range) -> NonEmpty<Range> {
        if other.is_empty() {
            return NonEmpty::new(*self);
        }

        if self.is_empty() {
            return NonEmpty::new(*other);
        }

        if self.touches(other) {
            return NonEmpty::new(Range {
                start: min(self.start, other.start),
                end: max(self.end, other.end),
            });
        }

        let (first, second) = match self.start <= other.start {
            true => (*self, *other),
            false => (*other, *self),
        };

        NonEmpty {
            head: first,
            tail: vec![second],
        }
    }

    /// Gets the residues of `self` not covered by `other` as zero, one, or
    /// two non-empty ranges.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::Range;
    ///
    /// let range = Range::try_new(0, 9)?;
    /// assert_eq!(
    ///     range.complement(&Range::try_new(3, 5)?),
    ///     vec![Range::try_new(0, 2)?, Range::try_new(6, 9)?]
    /// );
    /// assert!(range.complement(&Range::try_new(-5, 20)?).is_empty());
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn complement(&self, other: &Range) -> Vec<Range> {
        if self.is_empty() {
            return Vec::new();
        }

        if !self.intersects(other) {
            return vec![*self];
        }

        let mut results = Vec::with_capacity(2);

        if other.start > self.start {
            results.push(Range {
                start: self.start,
                end: other.start - 1,
            });
        }

        if other.end < self.end {
            results.push(Range {
                start: other.end + 1,
                end: self.end,
            });
        }

        results
    }

    /// Tiles the range with consecutive ranges of at most `max_length`
    /// residues. The last range may be shorter. An empty range splits into
    /// nothing.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::Range;
    ///
    /// let pieces = Range::try_new(0, 9)?.split(4)?;
    /// assert_eq!(
    ///     pieces,
    ///     vec![
    ///         Range::try_new(0, 3)?,
    ///         Range::try_new(4, 7)?,
    ///         Range::try_new(8, 9)?
    ///     ]
    /// );
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn split(&self, max_length: u64) -> Result<Vec<Range>> {
        if max_length == 0 {
            return Err(Error::ZeroSplitLength);
        }

        let step = i64::try_from(max_length).unwrap_or(i64::MAX);
        let mut results = Vec::new();
        let mut start = self.start;

        while start <= self.end {
            let end = start.saturating_add(step - 1).min(self.end);
            results.push(Range { start, end });

            match end.checked_add(1) {
                Some(next) => start = next,
                None => break,
            }
        }

        Ok(results)
    }

    /// Attempts to move the range by `amount` residues.
    pub fn shift(&self, amount: i64) -> Result<Range> {
        let start = self.start.checked_add(amount).ok_or(Error::Overflow)?;
        let end = self.end.checked_add(amount).ok_or(Error::Overflow)?;
        Range::try_new(start, end)
    }

    /// Merges ranges that overlap or lie within `max_gap` residues of each
    /// other.
    ///
    /// The ranges are sorted by start (then end) and folded greedily, which
    /// reaches the fixed point in a single pass. Empty ranges are dropped. A
    /// `max_gap` of zero merges only overlapping or abutting ranges; larger
    /// values cluster nearby ranges.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::Range;
    ///
    /// let ranges = vec![
    ///     Range::try_new(20, 25)?,
    ///     Range::try_new(0, 4)?,
    ///     Range::try_new(5, 9)?,
    ///     Range::try_new(12, 14)?,
    /// ];
    ///
    /// assert_eq!(
    ///     Range::merge(ranges.clone(), 0),
    ///     vec![Range::try_new(0, 9)?, Range::try_new(12, 14)?, Range::try_new(20, 25)?]
    /// );
    /// assert_eq!(
    ///     Range::merge(ranges, 2),
    ///     vec![Range::try_new(0, 14)?, Range::try_new(20, 25)?]
    /// );
    ///
    /// # Ok::<(), Box<dyn std::error::Error>>(())
    /// ```
    pub fn merge(ranges: impl IntoIterator<Item = Range>, max_gap: u64) -> Vec<Range> {
        let max_gap = i128::from(max_gap);
        let mut ranges = ranges
            .into_iter()
            .filter(|range| !range.is_empty())
            .collect::<Vec<_>>();
        ranges.sort();

        let mut merged: Vec<Range> = Vec::with_capacity(ranges.len());

        for range in ranges {
            match merged.last_mut() {
                Some(last)
                    if i128::from(range.start) - i128::from(last.end) - 1 <= max_gap =>
                {
                    last.end = max(last.end, range.end);
                }
                _ => merged.push(range),
            }
        }

        merged
    }
}

impl std::fmt::Display for Range {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[{} .. {}]/{}",
            self.start,
            self.end,
            CoordinateSystem::ZeroBased.abbreviation()
        )
    }
}

impl FromStr for Range {
    type Err = Error;

    /// Parses a zero-based range written as `start..end` or in the displayed
    /// form `[start .. end]/0B`.
    fn from_str(s: &str) -> Result<Self> {
        let inner = s
            .trim()
            .strip_suffix("/0B")
            .map(|rest| rest.trim_start_matches('[').trim_end_matches(']'))
            .unwrap_or(s);

        let (start, end) = inner
            .split_once("..")
            .ok_or_else(|| Error::Parse(s.to_string()))?;

        let start = start
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Parse(s.to_string()))?;
        let end = end
            .trim()
            .parse::<i64>()
            .map_err(|_| Error::Parse(s.to_string()))?;

        Range::try_new(start, end)
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn size_matches_the_coordinates() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut rng = rand::thread_rng();

        for _ in 0..500 {
            let start = rng.gen_range(-1000..1000i64);
            let end = rng.gen_range(start - 1..start + 1000);
            let range = Range::try_new(start, end)?;
            assert_eq!(range.size(), (end - start + 1) as u64);
            assert_eq!(range.intersection(&range).size(), range.size());

            if !range.is_empty() {
                assert_eq!(range.intersection(&range), range);
            }
        }

        Ok(())
    }

    #[test]
    fn invalid_ranges_are_rejected_not_clamped() {
        assert_eq!(Range::try_new(10, 8), Err(Error::EndBeforeStart(10, 8)));
        assert_eq!(Range::of_length(i64::MAX, 2), Err(Error::Overflow));
    }

    #[test]
    fn coordinate_system_views() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let range = Range::try_from_system(CoordinateSystem::SpaceBased, 10, 20)?;
        assert_eq!(range, Range::try_new(10, 19)?);
        assert_eq!(range.start_in(CoordinateSystem::ResidueBased), 11);
        assert_eq!(range.end_in(CoordinateSystem::ResidueBased), 20);
        assert_eq!(range.end_in(CoordinateSystem::ZeroBased), 19);

        let empty = Range::empty_at(4);
        assert!(empty.is_empty());
        assert_eq!(empty.size(), 0);
        assert_eq!(empty.start_in(CoordinateSystem::SpaceBased), 4);
        assert_eq!(empty.end_in(CoordinateSystem::SpaceBased), 4);

        Ok(())
    }

    #[test]
    fn merge_preserves_coverage_of_touching_ranges(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let mut rng = rand::thread_rng();

        for _ in 0..100 {
            let mut ranges = Vec::new();
            let mut start = 0i64;

            // Overlapping or abutting ranges tile [0, end] without holes.
            for _ in 0..rng.gen_range(1..10) {
                let end = start + rng.gen_range(0..20);
                ranges.push(Range::try_new(start, end)?);
                start = rng.gen_range(start..=end + 1);
            }

            let end = ranges.iter().map(|r| r.end()).max().unwrap();
            let merged = Range::merge(ranges, 0);
            assert_eq!(merged, vec![Range::try_new(0, end)?]);
        }

        Ok(())
    }

    #[test]
    fn merge_never_increases_coverage() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let ranges = vec![
            Range::try_new(0, 10)?,
            Range::try_new(2, 3)?,
            Range::try_new(8, 15)?,
            Range::empty_at(40),
            Range::try_new(30, 31)?,
        ];

        let merged = Range::merge(ranges, 0);
        assert_eq!(merged, vec![Range::try_new(0, 15)?, Range::try_new(30, 31)?]);
        assert_eq!(merged.iter().map(Range::size).sum::<u64>(), 18);

        Ok(())
    }

    #[test]
    fn union_of_empty_ranges() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let range = Range::try_new(3, 5)?;
        assert_eq!(range.union(&Range::empty_at(100)).head, range);
        assert_eq!(Range::empty_at(100).union(&range).head, range);
        Ok(())
    }

    #[test]
    fn complement_of_disjoint_and_edge_ranges(
    ) -> std::result::Result<(), Box<dyn std::error::Error>> {
        let range = Range::try_new(0, 9)?;
        assert_eq!(range.complement(&Range::try_new(20, 30)?), vec![range]);
        assert_eq!(
            range.complement(&Range::try_new(0, 4)?),
            vec![Range::try_new(5, 9)?]
        );
        assert_eq!(
            range.complement(&Range::try_new(5, 12)?),
            vec![Range::try_new(0, 4)?]
        );
        Ok(())
    }

    #[test]
    fn split_covers_exactly() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let range = Range::try_new(-3, 16)?;
        let pieces = range.split(7)?;
        assert_eq!(pieces.len(), 3);
        assert_eq!(pieces.iter().map(Range::size).sum::<u64>(), range.size());
        assert!(pieces.iter().all(|piece| piece.size() <= 7));
        assert!(Range::empty_at(3).split(7)?.is_empty());
        assert_eq!(range.split(0), Err(Error::ZeroSplitLength));
        Ok(())
    }

    #[test]
    fn display_round_trips() -> std::result::Result<(), Box<dyn std::error::Error>> {
        let range = Range::try_new(-2, 40)?;
        assert_eq!(range.to_string(), "[-2 .. 40]/0B");
        assert_eq!(range.to_string().parse::<Range>()?, range);
        assert_eq!("7..9".parse::<Range>()?, Range::try_new(7, 9)?);
        assert!("7-9".parse::<Range>().is_err());
        Ok(())
    }
}
