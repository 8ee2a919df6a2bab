//! The manifest index that instruments append to SFF files.
//!
//! Two layouts are understood, both starting with a magic number and the
//! version `1.00`:
//!
//! - `.mft`: a `u32` XML length and a `u32` data length, the XML manifest,
//!   then the entries;
//! - `.srt`: the entries directly after the version.
//!
//! Each entry is the read name followed by the offset of the read record as
//! four base-255 big-endian digits and a `0xff` terminator.

use tracing::debug;

/// The magic number of the layout with an XML manifest.
const MFT_MAGIC: &[u8; 4] = b".mft";

/// The magic number of the sorted-names layout.
const SRT_MAGIC: &[u8; 4] = b".srt";

/// The only understood version.
const VERSION: &[u8; 4] = b"1.00";

/// The byte ending every entry.
const TERMINATOR: u8 = 0xff;

/// The number of offset digits in every entry.
const OFFSET_DIGITS: usize = 4;

/// A decoded manifest entry.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Entry {
    /// The read name.
    pub name: String,

    /// The absolute offset of the read record.
    pub offset: u64,
}

/// Decodes the index block, returning [`None`] for layouts that are not
/// understood.
pub fn decode(block: &[u8]) -> Option<Vec<Entry>> {
    let magic = block.get(0..4)?;
    let version = block.get(4..8)?;

    if version != VERSION {
        debug!("unsupported sff manifest version: {version:?}");
        return None;
    }

    let entries = if magic == MFT_MAGIC {
        let xml_length = u32::from_be_bytes(block.get(8..12)?.try_into().ok()?) as usize;
        let data_length = u32::from_be_bytes(block.get(12..16)?.try_into().ok()?) as usize;
        let start = 16usize.checked_add(xml_length)?;
        block.get(start..start.checked_add(data_length)?)?
    } else if magic == SRT_MAGIC {
        block.get(8..)?
    } else {
        debug!("unrecognized sff manifest magic number: {magic:?}");
        return None;
    };

    decode_entries(entries)
}

/// Decodes entries until only zero padding remains.
fn decode_entries(mut data: &[u8]) -> Option<Vec<Entry>> {
    let mut entries = Vec::new();

    while data.iter().any(|byte| *byte != 0) {
        let end = data.iter().position(|byte| *byte == TERMINATOR)?;

        if end < OFFSET_DIGITS {
            return None;
        }

        let (name, digits) = data[..end].split_at(end - OFFSET_DIGITS);
        let offset = digits
            .iter()
            .fold(0u64, |offset, digit| offset * 255 + u64::from(*digit));

        entries.push(Entry {
            name: String::from_utf8(name.to_vec()).ok()?,
            offset,
        });

        data = &data[end + 1..];
    }

    Some(entries)
}

/// Encodes an offset as four base-255 digits.
#[cfg(test)]
pub(crate) fn encode_offset(offset: u64) -> [u8; 4] {
    let mut digits = [0u8; 4];
    let mut remaining = offset;

    for digit in digits.iter_mut().rev() {
        *digit = (remaining % 255) as u8;
        remaining /= 255;
    }

    digits
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Encodes entries in the sorted-names layout.
    fn srt(entries: &[(&str, u64)]) -> Vec<u8> {
        let mut block = b".srt1.00".to_vec();

        for (name, offset) in entries {
            block.extend(name.as_bytes());
            block.extend(encode_offset(*offset));
            block.push(TERMINATOR);
        }

        block
    }

    #[test]
    fn offsets_are_base_255() {
        let block = srt(&[("read1", 255 * 255 + 3)]);
        let entries = decode(&block).unwrap();

        assert_eq!(
            entries,
            [Entry {
                name: String::from("read1"),
                offset: 65028
            }]
        );
        assert_eq!(encode_offset(65028), [0, 1, 0, 3]);
    }

    #[test]
    fn trailing_padding_is_ignored() {
        let mut block = srt(&[("a", 440), ("b", 520)]);
        block.extend([0, 0, 0]);

        let entries = decode(&block).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].offset, 520);
    }

    #[test]
    fn xml_manifests_are_skipped() {
        let xml = b"<manifest/>";
        let entries = srt(&[("r", 1000)]).split_off(8);

        let mut block = b".mft1.00".to_vec();
        block.extend((xml.len() as u32).to_be_bytes());
        block.extend((entries.len() as u32).to_be_bytes());
        block.extend(xml);
        block.extend(&entries);

        assert_eq!(decode(&block).unwrap()[0].offset, 1000);
    }

    #[test]
    fn unknown_layouts_are_not_decoded() {
        assert!(decode(b".xyz1.00").is_none());
        assert!(decode(b".srt2.00").is_none());
        assert!(decode(b".srtread").is_none());
        assert!(decode(b".srt1.00ab\xff").is_none());
        assert!(decode(b".s").is_none());
    }
}
