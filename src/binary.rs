//! Binary primitives shared by the binary format drivers and the
//! reference-delta codec.
//!
//! All multi-byte integers are little-endian unless the function name says
//! otherwise (`_be`). The flow-sequencing format is the only big-endian user.
//!
//! ## Byte counts
//!
//! The binary alignment format stores most counts with a self-describing
//! width:
//!
//! ```text
//! value < 254          one byte holding the value
//! 254  followed by     a little-endian u16
//! 255  followed by     a little-endian u32
//! ```
//!
//! ```
//! use assemblyfile::binary;
//!
//! let mut buffer = Vec::new();
//! binary::write_byte_count(&mut buffer, 300)?;
//! assert_eq!(buffer, [254, 44, 1]);
//!
//! assert_eq!(binary::read_byte_count(&mut &buffer[..])?, 300);
//!
//! # Ok::<(), Box<dyn std::error::Error>>(())
//! ```

use std::io;
use std::io::Read;
use std::io::Write;

/// The byte-count flag announcing a following `u16`.
const SHORT_FLAG: u8 = 254;

/// The byte-count flag announcing a following `u32`.
const INT_FLAG: u8 = 255;

////////////////////////////////////////////////////////////////////////////////////////
// Fixed-width integers
////////////////////////////////////////////////////////////////////////////////////////

/// Reads exactly `N` bytes.
fn read_array<const N: usize>(reader: &mut impl Read) -> io::Result<[u8; N]> {
    let mut buffer = [0u8; N];
    reader.read_exact(&mut buffer)?;
    Ok(buffer)
}

/// Reads an unsigned byte.
pub fn read_u8(reader: &mut impl Read) -> io::Result<u8> {
    read_array::<1>(reader).map(|[b]| b)
}

/// Reads a little-endian `u16`.
pub fn read_u16(reader: &mut impl Read) -> io::Result<u16> {
    read_array(reader).map(u16::from_le_bytes)
}

/// Reads a little-endian `u32`.
pub fn read_u32(reader: &mut impl Read) -> io::Result<u32> {
    read_array(reader).map(u32::from_le_bytes)
}

/// Reads a little-endian `u64`.
pub fn read_u64(reader: &mut impl Read) -> io::Result<u64> {
    read_array(reader).map(u64::from_le_bytes)
}

/// Reads a big-endian `u16`.
pub fn read_u16_be(reader: &mut impl Read) -> io::Result<u16> {
    read_array(reader).map(u16::from_be_bytes)
}

/// Reads a big-endian `u32`.
pub fn read_u32_be(reader: &mut impl Read) -> io::Result<u32> {
    read_array(reader).map(u32::from_be_bytes)
}

/// Reads a big-endian `u64`.
pub fn read_u64_be(reader: &mut impl Read) -> io::Result<u64> {
    read_array(reader).map(u64::from_be_bytes)
}

/// Writes an unsigned byte.
pub fn write_u8(writer: &mut impl Write, value: u8) -> io::Result<()> {
    writer.write_all(&[value])
}

/// Writes a little-endian `u16`.
pub fn write_u16(writer: &mut impl Write, value: u16) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Writes a little-endian `u32`.
pub fn write_u32(writer: &mut impl Write, value: u32) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Writes a little-endian `u64`.
pub fn write_u64(writer: &mut impl Write, value: u64) -> io::Result<()> {
    writer.write_all(&value.to_le_bytes())
}

/// Reads `len` raw bytes.
///
/// The buffer only grows with the bytes actually read, so a corrupt length
/// fails at the end of the input rather than reserving `len` bytes first.
pub fn read_bytes(reader: &mut impl Read, len: usize) -> io::Result<Vec<u8>> {
    let mut buffer = Vec::new();
    let read = reader.take(len as u64).read_to_end(&mut buffer)?;

    if read < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected {len} bytes, only {read} remained"),
        ));
    }

    Ok(buffer)
}

/// Discards `len` bytes.
pub fn skip(reader: &mut impl Read, len: u64) -> io::Result<()> {
    let copied = io::copy(&mut reader.take(len), &mut io::sink())?;

    if copied < len {
        return Err(io::Error::new(
            io::ErrorKind::UnexpectedEof,
            format!("expected to skip {len} bytes, only {copied} remained"),
        ));
    }

    Ok(())
}

////////////////////////////////////////////////////////////////////////////////////////
// Byte counts and strings
////////////////////////////////////////////////////////////////////////////////////////

/// Reads a self-describing byte count.
///
/// # Examples
///
/// ```
/// use assemblyfile::binary;
///
/// assert_eq!(binary::read_byte_count(&mut &[7u8][..])?, 7);
/// assert_eq!(binary::read_byte_count(&mut &[255u8, 0, 0, 1, 0][..])?, 65536);
///
/// # Ok::<(), std::io::Error>(())
/// ```
pub fn read_byte_count(reader: &mut impl Read) -> io::Result<u32> {
    match read_u8(reader)? {
        SHORT_FLAG => read_u16(reader).map(u32::from),
        INT_FLAG => read_u32(reader),
        value => Ok(u32::from(value)),
    }
}

/// Writes a self-describing byte count using the fewest bytes possible.
pub fn write_byte_count(writer: &mut impl Write, value: u32) -> io::Result<()> {
    if value < u32::from(SHORT_FLAG) {
        write_u8(writer, value as u8)
    } else if let Ok(value) = u16::try_from(value) {
        write_u8(writer, SHORT_FLAG)?;
        write_u16(writer, value)
    } else {
        write_u8(writer, INT_FLAG)?;
        write_u32(writer, value)
    }
}

/// Reads a length-prefixed UTF-8 string.
pub fn read_string(reader: &mut impl Read) -> io::Result<String> {
    let len = read_byte_count(reader)?;
    let bytes = read_bytes(reader, len as usize)?;
    String::from_utf8(bytes).map_err(|err| io::Error::new(io::ErrorKind::InvalidData, err))
}

/// Writes a length-prefixed UTF-8 string.
///
/// Strings longer than `u32::MAX` bytes cannot be represented and are
/// rejected with [`io::ErrorKind::InvalidInput`].
pub fn write_string(writer: &mut impl Write, value: &str) -> io::Result<()> {
    let len = u32::try_from(value.len()).map_err(|_| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            format!("string of {} bytes exceeds the byte count range", value.len()),
        )
    })?;

    write_byte_count(writer, len)?;
    writer.write_all(value.as_bytes())
}

////////////////////////////////////////////////////////////////////////////////////////
// Widths
////////////////////////////////////////////////////////////////////////////////////////

/// An unsigned integer width used by the packed encodings.
///
/// The tag of a width is its size in bytes.
#[derive(Clone, Copy, Debug, Eq, Hash, Ord, PartialEq, PartialOrd)]
pub enum Width {
    /// Nothing is stored; the value is always zero.
    Zero,

    /// One byte.
    U8,

    /// Two little-endian bytes.
    U16,

    /// Four little-endian bytes.
    U32,
}

impl Width {
    /// Gets the narrowest width that can hold `max`.
    ///
    /// # Examples
    ///
    /// ```
    /// use assemblyfile::binary::Width;
    ///
    /// assert_eq!(Width::narrowest(0), Width::Zero);
    /// assert_eq!(Width::narrowest(255), Width::U8);
    /// assert_eq!(Width::narrowest(256), Width::U16);
    /// assert_eq!(Width::narrowest(65536), Width::U32);
    /// ```
    pub fn narrowest(max: u32) -> Width {
        match max {
            0 => Width::Zero,
            1..=0xff => Width::U8,
            0x100..=0xffff => Width::U16,
            _ => Width::U32,
        }
    }

    /// Gets the narrowest width that can hold `max` using at least one byte.
    pub fn narrowest_nonzero(max: u32) -> Width {
        match Width::narrowest(max) {
            Width::Zero => Width::U8,
            width => width,
        }
    }

    /// Gets the number of bytes a value of this width occupies.
    pub fn bytes(&self) -> usize {
        match self {
            Width::Zero => 0,
            Width::U8 => 1,
            Width::U16 => 2,
            Width::U32 => 4,
        }
    }

    /// Gets the tag byte for this width.
    pub fn tag(&self) -> u8 {
        self.bytes() as u8
    }

    /// Gets the width for a tag byte.
    pub fn from_tag(tag: u8) -> Option<Width> {
        match tag {
            0 => Some(Width::Zero),
            1 => Some(Width::U8),
            2 => Some(Width::U16),
            4 => Some(Width::U32),
            _ => None,
        }
    }

    /// Writes `value` with this width.
    ///
    /// The caller guarantees `value` fits; values that do not are truncated.
    pub fn write(&self, buffer: &mut Vec<u8>, value: u32) {
        match self {
            Width::Zero => {}
            Width::U8 => buffer.push(value as u8),
            Width::U16 => buffer.extend_from_slice(&(value as u16).to_le_bytes()),
            Width::U32 => buffer.extend_from_slice(&value.to_le_bytes()),
        }
    }

    /// Reads the value of this width starting at `position` of `buffer`.
    ///
    /// Returns [`None`] if the buffer is too short.
    pub fn read_at(&self, buffer: &[u8], position: usize) -> Option<u32> {
        let bytes = buffer.get(position..position + self.bytes())?;

        Some(match self {
            Width::Zero => 0,
            Width::U8 => u32::from(bytes[0]),
            Width::U16 => u32::from(u16::from_le_bytes([bytes[0], bytes[1]])),
            Width::U32 => u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]),
        })
    }
}

////////////////////////////////////////////////////////////////////////////////////////
// Nibbles
////////////////////////////////////////////////////////////////////////////////////////

/// Packs 4-bit values two per byte, high nibble first.
///
/// Only the low four bits of each value are kept. An odd number of values
/// leaves the final low nibble zeroed.
///
/// # Examples
///
/// ```
/// use assemblyfile::binary;
///
/// let packed = binary::pack_nibbles(&[1, 2, 15]);
/// assert_eq!(packed, [0x12, 0xf0]);
/// assert_eq!(binary::nibble_at(&packed, 2), Some(15));
/// assert_eq!(binary::nibble_at(&packed, 4), None);
/// ```
pub fn pack_nibbles(values: &[u8]) -> Vec<u8> {
    values
        .chunks(2)
        .map(|pair| {
            let high = (pair[0] & 0x0f) << 4;
            let low = pair.get(1).map(|value| value & 0x0f).unwrap_or(0);
            high | low
        })
        .collect()
}

/// Gets the `index`th nibble from a packed buffer.
pub fn nibble_at(packed: &[u8], index: usize) -> Option<u8> {
    let byte = packed.get(index / 2)?;

    Some(match index % 2 {
        0 => byte >> 4,
        _ => byte & 0x0f,
    })
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    #[test]
    fn oversized_lengths_are_truncation_errors() -> Result<(), Box<dyn std::error::Error>> {
        let data = [1u8, 2, 3];
        assert_eq!(read_bytes(&mut &data[..], 2)?, [1, 2]);

        let Err(err) = read_bytes(&mut &data[..], u32::MAX as usize) else {
            return Err("read past the end of the input".into());
        };
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);
        assert!(matches!(
            crate::parse::Error::from(err),
            crate::parse::Error::Malformed(crate::parse::Malformed::Truncated)
        ));

        Ok(())
    }

    #[test]
    fn small_byte_counts_use_one_byte() -> Result<(), Box<dyn std::error::Error>> {
        for value in 0..254u32 {
            let mut buffer = Vec::new();
            write_byte_count(&mut buffer, value)?;
            assert_eq!(buffer.len(), 1);
            assert_eq!(read_byte_count(&mut &buffer[..])?, value);
        }

        Ok(())
    }

    #[test]
    fn byte_counts_round_trip_at_the_boundaries() -> Result<(), Box<dyn std::error::Error>> {
        for (value, len) in [
            (254u32, 3usize),
            (255, 3),
            (65535, 3),
            (65536, 5),
            (u32::MAX, 5),
        ] {
            let mut buffer = Vec::new();
            write_byte_count(&mut buffer, value)?;
            assert_eq!(buffer.len(), len, "value: {value}");
            assert_eq!(read_byte_count(&mut &buffer[..])?, value);
        }

        Ok(())
    }

    #[test]
    fn random_byte_counts_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let mut rng = rand::thread_rng();

        for _ in 0..1000 {
            let value = rng.gen::<u32>();
            let mut buffer = Vec::new();
            write_byte_count(&mut buffer, value)?;
            assert_eq!(read_byte_count(&mut &buffer[..])?, value);
        }

        Ok(())
    }

    #[test]
    fn truncated_byte_count_is_an_unexpected_eof() -> Result<(), Box<dyn std::error::Error>> {
        let Err(err) = read_byte_count(&mut &[255u8, 1, 2][..]) else {
            return Err("a truncated byte count was read".into());
        };
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        Ok(())
    }

    #[test]
    fn strings_round_trip() -> Result<(), Box<dyn std::error::Error>> {
        let mut buffer = Vec::new();
        write_string(&mut buffer, "clc_ref_assemble")?;
        write_string(&mut buffer, "")?;

        let mut reader = &buffer[..];
        assert_eq!(read_string(&mut reader)?, "clc_ref_assemble");
        assert_eq!(read_string(&mut reader)?, "");
        assert!(reader.is_empty());

        Ok(())
    }

    #[test]
    fn invalid_utf8_is_invalid_data() -> Result<(), Box<dyn std::error::Error>> {
        let Err(err) = read_string(&mut &[2u8, 0xff, 0xfe][..]) else {
            return Err("invalid utf-8 was decoded".into());
        };
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);

        Ok(())
    }

    #[test]
    fn integers_are_little_endian() -> Result<(), Box<dyn std::error::Error>> {
        let mut buffer = Vec::new();
        write_u16(&mut buffer, 0x0102)?;
        write_u32(&mut buffer, 0x01020304)?;
        write_u64(&mut buffer, 0x0102030405060708)?;
        assert_eq!(&buffer[..2], [0x02, 0x01]);
        assert_eq!(&buffer[2..6], [0x04, 0x03, 0x02, 0x01]);

        let mut reader = &buffer[..];
        assert_eq!(read_u16(&mut reader)?, 0x0102);
        assert_eq!(read_u32(&mut reader)?, 0x01020304);
        assert_eq!(read_u64(&mut reader)?, 0x0102030405060708);

        assert_eq!(read_u32_be(&mut &[0u8, 0, 1, 0][..])?, 256);

        Ok(())
    }

    #[test]
    fn skipping_past_the_end_fails() -> Result<(), Box<dyn std::error::Error>> {
        let Err(err) = skip(&mut &[1u8, 2][..], 3) else {
            return Err("skipped past the end of the input".into());
        };
        assert_eq!(err.kind(), io::ErrorKind::UnexpectedEof);

        Ok(())
    }

    #[test]
    fn widths_round_trip() {
        let mut buffer = Vec::new();
        Width::U16.write(&mut buffer, 513);
        Width::U32.write(&mut buffer, 70000);
        assert_eq!(Width::U16.read_at(&buffer, 0), Some(513));
        assert_eq!(Width::U32.read_at(&buffer, 2), Some(70000));
        assert_eq!(Width::U32.read_at(&buffer, 3), None);
        assert_eq!(Width::from_tag(Width::U16.tag()), Some(Width::U16));
        assert_eq!(Width::from_tag(3), None);
    }
}
