//! Streaming decoder for the tagged attribute stream of a DICOM file.
//!
//! The decoder walks the records of an explicit VR little endian data set
//! once, front to back, and keeps the raw value bytes of the tags it was
//! asked for. Nothing is interpreted here: the typed views live in
//! [`crate::property`].
//!
//! Sequences are not tracked. When a sequence header or an item/delimiter
//! marker is met only its header is consumed, so the walk continues through
//! the nested records as if they were top-level ones. A nested value of an
//! allow-listed tag therefore overrides the top-level value read before it,
//! e.g. the Rows and Columns of an IconImageSequence item following the
//! image pixel module.

use dicom::core::Tag;
use std::collections::{HashMap, HashSet};
use std::io::{self, Read};
use thiserror::Error;
use tracing::trace;

/// Size of the file preamble preceding the `DICM` marker.
pub const PREAMBLE_LEN: usize = 128;

/// Item start marker `(FFFE,E000)`.
pub const ITEM: Tag = Tag(0xFFFE, 0xE000);
/// Item end marker `(FFFE,E00D)`.
pub const ITEM_DELIMITATION_ITEM: Tag = Tag(0xFFFE, 0xE00D);
/// Sequence end marker `(FFFE,E0DD)`.
pub const SEQUENCE_DELIMITATION_ITEM: Tag = Tag(0xFFFE, 0xE0DD);

/// Decoded attribute values keyed by [`tag_id`].
pub type Attributes = HashMap<u32, Vec<u8>>;

#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("Stream ended while reading {what}: needed {needed} bytes, got {got}")]
    TruncatedStream {
        what: &'static str,
        needed: usize,
        got: usize,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),
}

/// Composite id of a tag, group in the high half and element in the low half.
#[inline]
pub fn tag_id(tag: Tag) -> u32 {
    (u32::from(tag.group()) << 16) | u32::from(tag.element())
}

fn is_delimiter(tag: Tag) -> bool {
    tag == ITEM || tag == ITEM_DELIMITATION_ITEM || tag == SEQUENCE_DELIMITATION_ITEM
}

/// How the value length of a record is laid out, decided by its VR code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LengthField {
    /// No VR in the stream: 4 byte length.
    Implicit,
    /// 2 reserved bytes followed by a 4 byte length.
    Reserved,
    /// 2 byte length.
    Short,
}

impl LengthField {
    fn of(vr: [u8; 2]) -> Self {
        let vr = [vr[0].to_ascii_uppercase(), vr[1].to_ascii_uppercase()];
        match &vr {
            b"\0\0" => LengthField::Implicit,
            b"OB" | b"OW" | b"OF" | b"SQ" | b"UT" | b"UN" => LengthField::Reserved,
            _ => LengthField::Short,
        }
    }
}

fn is_sequence(vr: [u8; 2]) -> bool {
    vr.eq_ignore_ascii_case(b"SQ")
}

/// Reads until `buf` is full or the stream ends, returning the bytes read.
fn fill<R: Read>(reader: &mut R, buf: &mut [u8]) -> io::Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e),
        }
    }
    Ok(filled)
}

fn read_array<const N: usize, R: Read>(
    reader: &mut R,
    what: &'static str,
) -> Result<[u8; N], DecodeError> {
    let mut buf = [0u8; N];
    let got = fill(reader, &mut buf)?;
    if got < N {
        return Err(DecodeError::TruncatedStream {
            what,
            needed: N,
            got,
        });
    }
    Ok(buf)
}

/// Reads the next tag, or `None` on a clean end of stream.
fn read_tag<R: Read>(reader: &mut R) -> Result<Option<Tag>, DecodeError> {
    let mut buf = [0u8; 4];
    match fill(reader, &mut buf)? {
        0 => Ok(None),
        4 => Ok(Some(Tag(
            u16::from_le_bytes([buf[0], buf[1]]),
            u16::from_le_bytes([buf[2], buf[3]]),
        ))),
        got => Err(DecodeError::TruncatedStream {
            what: "tag",
            needed: 4,
            got,
        }),
    }
}

fn read_length<R: Read>(reader: &mut R, field: LengthField) -> Result<u32, DecodeError> {
    match field {
        LengthField::Implicit => Ok(u32::from_le_bytes(read_array(reader, "value length")?)),
        LengthField::Reserved => {
            read_array::<2, _>(reader, "reserved bytes")?;
            Ok(u32::from_le_bytes(read_array(reader, "value length")?))
        }
        LengthField::Short => Ok(u32::from(u16::from_le_bytes(read_array(
            reader,
            "value length",
        )?))),
    }
}

fn read_value<R: Read>(reader: &mut R, length: u32) -> Result<Vec<u8>, DecodeError> {
    let mut value = Vec::new();
    let got = reader.take(u64::from(length)).read_to_end(&mut value)?;
    if (got as u64) < u64::from(length) {
        return Err(DecodeError::TruncatedStream {
            what: "value",
            needed: length as usize,
            got,
        });
    }
    Ok(value)
}

/// Decode a whole attribute stream, keeping only the tags in `allow_list`.
///
/// The 128 byte preamble and the 4 byte marker are skipped without being
/// checked. A stream that ends between two records decodes successfully;
/// one that ends inside a record fails with
/// [`DecodeError::TruncatedStream`]. When a tag occurs more than once the
/// last value wins.
pub fn decode<R: Read>(mut reader: R, allow_list: &[Tag]) -> Result<Attributes, DecodeError> {
    let wanted: HashSet<u32> = allow_list.iter().copied().map(tag_id).collect();
    let mut attributes = Attributes::new();

    read_array::<PREAMBLE_LEN, _>(&mut reader, "preamble")?;
    read_array::<4, _>(&mut reader, "format marker")?;

    while let Some(tag) = read_tag(&mut reader)? {
        let delimiter = is_delimiter(tag);
        let vr = if delimiter {
            [0, 0]
        } else {
            read_array(&mut reader, "value representation")?
        };

        let length = read_length(&mut reader, LengthField::of(vr))?;

        if delimiter || is_sequence(vr) {
            trace!(%tag, length, "skipping sequence or item header");
            continue;
        }

        let value = read_value(&mut reader, length)?;
        let id = tag_id(tag);
        if wanted.contains(&id) {
            attributes.insert(id, value);
        }
    }

    Ok(attributes)
}
