//! Block headers: the tagged, length-prefixed units that follow the version.
//!
//! # Layout
//!
//! ```text
//! u8 tag          0xFF        end of block list
//!                 0x00        new-style block, a 16-byte NUL padded id follows
//!                 1..=254     old-style block, numeric id
//! [u8; 16] id     new-style only
//! length          u64 for new-style blocks and for old-style blocks from
//!                 format 3.5.0 onward; u32 for old-style blocks before it
//! payload         `length` bytes, opaque at this layer
//! ```
//!
//! Writers emit the same widths the reader expects for the container
//! version, so a file written at any supported version reads back unchanged.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::error::{Result, RoomFileError};
use crate::version::RoomFileVersion;

/// Tag byte terminating the block list.
pub const BLOCK_END: u8 = 0xFF;
/// Tag byte introducing a string-identified block.
pub const BLOCK_NAMED: u8 = 0x00;
/// Fixed width of a new-style block id on disk.
pub const BLOCK_ID_LEN: usize = 16;
/// Name reported for numeric ids missing from the name table.
pub const UNKNOWN_BLOCK_NAME: &str = "unknown";

// ── Name table ────────────────────────────────────────────────────────────────

/// Old-style numeric block ids known to the room format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RoomBlockKind {
    Main              = 1,
    TextScript        = 2,
    CompScript        = 3,
    CompScript2       = 4,
    ObjectNames       = 5,
    AnimBackground    = 6,
    CompScript3       = 7,
    Properties        = 8,
    ObjectScriptNames = 9,
}

impl RoomBlockKind {
    pub const ALL: [Self; 9] = [
        Self::Main,
        Self::TextScript,
        Self::CompScript,
        Self::CompScript2,
        Self::ObjectNames,
        Self::AnimBackground,
        Self::CompScript3,
        Self::Properties,
        Self::ObjectScriptNames,
    ];

    pub fn from_id(id: u8) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| *k as u8 == id)
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|k| k.name() == name)
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Main              => "Main",
            Self::TextScript        => "TextScript",
            Self::CompScript        => "CompScript",
            Self::CompScript2       => "CompScript2",
            Self::ObjectNames       => "ObjNames",
            Self::AnimBackground    => "AnimBg",
            Self::CompScript3       => "CompScript3",
            Self::Properties        => "Properties",
            Self::ObjectScriptNames => "ObjScNames",
        }
    }

    /// Script formats superseded by `CompScript3`; current engines refuse them.
    pub fn is_obsolete(self) -> bool {
        matches!(self, Self::CompScript | Self::CompScript2)
    }
}

/// Human-readable name of a numeric id.  Advisory only: unknown ids never
/// stop iteration.
pub fn block_name(id: u8) -> &'static str {
    RoomBlockKind::from_id(id).map_or(UNKNOWN_BLOCK_NAME, RoomBlockKind::name)
}

// ── BlockId ───────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum BlockId {
    /// Old-style id, `1..=254`.
    Numeric(u8),
    /// New-style id, at most 16 bytes of ASCII.
    Named(String),
}

impl BlockId {
    pub fn named(id: impl Into<String>) -> Self {
        BlockId::Named(id.into())
    }

    /// Name used for lookups and diagnostics.
    pub fn name(&self) -> &str {
        match self {
            BlockId::Numeric(n) => block_name(*n),
            BlockId::Named(s)   => s,
        }
    }

    pub fn kind(&self) -> Option<RoomBlockKind> {
        match self {
            BlockId::Numeric(n) => RoomBlockKind::from_id(*n),
            BlockId::Named(_)   => None,
        }
    }

    pub fn tag(&self) -> u8 {
        match self {
            BlockId::Numeric(n) => *n,
            BlockId::Named(_)   => BLOCK_NAMED,
        }
    }

    /// Parse a user-facing spelling: a table name (`"Main"`) or a bare
    /// number selects an old-style id, anything else is a string id.
    pub fn parse(s: &str) -> Self {
        if let Some(kind) = RoomBlockKind::from_name(s) {
            return kind.into();
        }
        match s.parse::<u8>() {
            Ok(n) if n != BLOCK_NAMED && n != BLOCK_END => BlockId::Numeric(n),
            _ => BlockId::Named(s.to_owned()),
        }
    }

    /// Whether the length field following this id is 64-bit.
    pub fn has_wide_length(&self, version: RoomFileVersion) -> bool {
        matches!(self, BlockId::Named(_)) || version.has_wide_lengths()
    }

    fn check_writable(&self, version: RoomFileVersion) -> Result<()> {
        match self {
            BlockId::Numeric(n) if *n == BLOCK_NAMED || *n == BLOCK_END => {
                Err(RoomFileError::InconsistentData(format!(
                    "Block id {n} is reserved and cannot name an old-style block."
                )))
            }
            BlockId::Numeric(_) => Ok(()),
            BlockId::Named(s) if s.len() > BLOCK_ID_LEN => {
                Err(RoomFileError::InconsistentData(format!(
                    "Block id '{s}' is {} bytes long, maximum is {BLOCK_ID_LEN}.",
                    s.len()
                )))
            }
            BlockId::Named(s) if s.bytes().any(|b| b == 0 || !b.is_ascii()) => {
                Err(RoomFileError::InconsistentData(format!(
                    "Block id {:?} must be ASCII without NUL bytes.",
                    s
                )))
            }
            BlockId::Named(s) if !version.has_wide_lengths() => {
                Err(RoomFileError::IncompatibleEngine(format!(
                    "Block '{s}' needs format version {} or later, container is {version}.",
                    RoomFileVersion::WIDE_LENGTHS
                )))
            }
            BlockId::Named(_) => Ok(()),
        }
    }
}

impl From<RoomBlockKind> for BlockId {
    fn from(kind: RoomBlockKind) -> Self {
        BlockId::Numeric(kind as u8)
    }
}

impl fmt::Display for BlockId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockId::Numeric(n) => write!(f, "{} (#{n})", block_name(*n)),
            BlockId::Named(s)   => write!(f, "\"{s}\""),
        }
    }
}

// ── BlockHeader ───────────────────────────────────────────────────────────────

/// One block header as read from a container.  Offsets are relative to the
/// start of the container (the version tag is at offset 0).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockHeader {
    pub id:             BlockId,
    pub length:         u64,
    pub header_offset:  u64,
    pub payload_offset: u64,
}

impl BlockHeader {
    /// Read the next header from `reader`, which sits at container offset
    /// `offset`.  Returns `Ok(None)` on the end marker.
    ///
    /// Running out of data before the end marker is a truncated file and
    /// fails with `UnexpectedEof`.
    pub fn read<R: Read>(mut reader: R, version: RoomFileVersion, offset: u64) -> Result<Option<Self>> {
        let tag = match reader.read_u8() {
            Ok(t) => t,
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(RoomFileError::UnexpectedEof(format!(
                    "Block list ended at offset {offset} without an end marker."
                )));
            }
            Err(e) => return Err(e.into()),
        };
        if tag == BLOCK_END {
            return Ok(None);
        }

        let id = if tag == BLOCK_NAMED {
            let mut raw = [0u8; BLOCK_ID_LEN];
            reader.read_exact(&mut raw)?;
            BlockId::Named(decode_block_id(&raw).into_owned())
        } else {
            BlockId::Numeric(tag)
        };

        let wide = id.has_wide_length(version);
        let length = if wide {
            reader.read_u64::<LittleEndian>()?
        } else {
            reader.read_u32::<LittleEndian>()? as u64
        };

        let header_size = header_size(&id, wide);
        Ok(Some(Self {
            id,
            length,
            header_offset:  offset,
            payload_offset: offset + header_size,
        }))
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    /// Container offset one past the last payload byte.
    pub fn payload_end(&self) -> u64 {
        self.payload_offset.saturating_add(self.length)
    }

    pub fn header_size(&self) -> u64 {
        self.payload_offset - self.header_offset
    }
}

fn header_size(id: &BlockId, wide: bool) -> u64 {
    let id_size = match id {
        BlockId::Numeric(_) => 0,
        BlockId::Named(_)   => BLOCK_ID_LEN as u64,
    };
    1 + id_size + if wide { 8 } else { 4 }
}

/// Trim a fixed-width id at its first NUL.
fn decode_block_id(raw: &[u8; BLOCK_ID_LEN]) -> Cow<'_, str> {
    let end = raw.iter().position(|&b| b == 0).unwrap_or(BLOCK_ID_LEN);
    String::from_utf8_lossy(&raw[..end])
}

// ── Writing ───────────────────────────────────────────────────────────────────

/// Write tag and (for new-style blocks) the padded string id.
fn write_tag<W: Write>(writer: &mut W, id: &BlockId) -> Result<()> {
    writer.write_u8(id.tag())?;
    if let BlockId::Named(s) = id {
        let mut raw = [0u8; BLOCK_ID_LEN];
        raw[..s.len()].copy_from_slice(s.as_bytes());
        writer.write_all(&raw)?;
    }
    Ok(())
}

fn write_length<W: Write>(writer: &mut W, wide: bool, length: u64, id: &BlockId) -> Result<()> {
    if wide {
        writer.write_u64::<LittleEndian>(length)?;
    } else {
        let narrow = u32::try_from(length).map_err(|_| {
            RoomFileError::InconsistentData(format!(
                "Block {id} payload of {length} bytes does not fit a 32-bit length field."
            ))
        })?;
        writer.write_u32::<LittleEndian>(narrow)?;
    }
    Ok(())
}

/// Write a complete header for a payload of known length.  Returns the
/// number of header bytes written.
pub fn write_block_header<W: Write>(
    mut writer: W,
    version:    RoomFileVersion,
    id:         &BlockId,
    length:     u64,
) -> Result<u64> {
    id.check_writable(version)?;
    let wide = id.has_wide_length(version);
    write_tag(&mut writer, id)?;
    write_length(&mut writer, wide, length, id)?;
    Ok(header_size(id, wide))
}

/// Write one block whose payload length is not known in advance.
///
/// A zeroed length placeholder is written, `payload` emits the data, then
/// the placeholder is overwritten with the measured length and the stream
/// is returned to the end of the payload.  Returns the payload length.
pub fn write_block<W, F>(writer: &mut W, version: RoomFileVersion, id: &BlockId, payload: F) -> Result<u64>
where
    W: Write + Seek,
    F: FnOnce(&mut W) -> Result<()>,
{
    id.check_writable(version)?;
    let wide = id.has_wide_length(version);
    let width: u64 = if wide { 8 } else { 4 };

    write_tag(writer, id)?;
    let size_at = writer.stream_position()?;
    write_length(writer, wide, 0, id)?;

    payload(writer)?;

    let end_at = writer.stream_position()?;
    let length = end_at
        .checked_sub(size_at + width)
        .ok_or_else(|| RoomFileError::InconsistentData(format!(
            "Block {id} payload writer moved the stream before its own length field."
        )))?;

    writer.seek(SeekFrom::Start(size_at))?;
    write_length(writer, wide, length, id)?;
    writer.seek(SeekFrom::Start(end_at))?;
    Ok(length)
}

/// Forward-only counterpart of [`write_block`]: the payload is collected in
/// memory, measured, then written after its header in one pass.
pub fn write_block_buffered<W, F>(mut writer: W, version: RoomFileVersion, id: &BlockId, payload: F) -> Result<u64>
where
    W: Write,
    F: FnOnce(&mut Vec<u8>) -> Result<()>,
{
    id.check_writable(version)?;
    let mut buf = Vec::new();
    payload(&mut buf)?;
    write_block_header(&mut writer, version, id, buf.len() as u64)?;
    writer.write_all(&buf)?;
    Ok(buf.len() as u64)
}

pub fn write_end_marker<W: Write>(mut writer: W) -> Result<()> {
    writer.write_u8(BLOCK_END)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    const NARROW: RoomFileVersion = RoomFileVersion::V3415;
    const WIDE:   RoomFileVersion = RoomFileVersion::CURRENT;

    #[test]
    fn name_table_lookup() {
        assert_eq!(block_name(1), "Main");
        assert_eq!(block_name(5), "ObjNames");
        assert_eq!(block_name(9), "ObjScNames");
        assert_eq!(block_name(42), UNKNOWN_BLOCK_NAME);
        assert!(RoomBlockKind::CompScript2.is_obsolete());
        assert!(!RoomBlockKind::CompScript3.is_obsolete());
    }

    #[test]
    fn parse_user_spelling() {
        assert_eq!(BlockId::parse("Properties"), BlockId::Numeric(8));
        assert_eq!(BlockId::parse("77"), BlockId::Numeric(77));
        assert_eq!(BlockId::parse("255"), BlockId::named("255"));
        assert_eq!(BlockId::parse("ext_sprites"), BlockId::named("ext_sprites"));
    }

    #[test]
    fn narrow_header_uses_u32_length() {
        let mut buf = Vec::new();
        let n = write_block_header(&mut buf, NARROW, &BlockId::Numeric(1), 0x0102_0304).unwrap();
        assert_eq!(n, 5);
        assert_eq!(buf, [1, 4, 3, 2, 1]);

        let h = BlockHeader::read(Cursor::new(&buf), NARROW, 2).unwrap().unwrap();
        assert_eq!(h.length, 0x0102_0304);
        assert_eq!(h.payload_offset, 7);
    }

    #[test]
    fn wide_header_uses_u64_length() {
        let mut buf = Vec::new();
        write_block_header(&mut buf, WIDE, &BlockId::Numeric(6), 1 << 33).unwrap();
        assert_eq!(buf.len(), 9);
        let h = BlockHeader::read(Cursor::new(&buf), WIDE, 0).unwrap().unwrap();
        assert_eq!(h.length, 1 << 33);
        assert_eq!(h.name(), "AnimBg");
    }

    #[test]
    fn named_id_is_nul_trimmed() {
        let mut buf = Vec::new();
        write_block_header(&mut buf, WIDE, &BlockId::named("Properties"), 0).unwrap();
        assert_eq!(buf.len(), 1 + 16 + 8);
        assert_eq!(&buf[1..11], b"Properties");
        assert!(buf[11..17].iter().all(|&b| b == 0));

        let h = BlockHeader::read(Cursor::new(&buf), WIDE, 21).unwrap().unwrap();
        assert_eq!(h.id, BlockId::named("Properties"));
        assert_eq!(h.payload_offset, 46);
    }

    #[test]
    fn full_width_named_id_has_no_terminator() {
        let id = BlockId::named("ABCDEFGHIJKLMNOP");
        let mut buf = Vec::new();
        write_block_header(&mut buf, WIDE, &id, 3).unwrap();
        let h = BlockHeader::read(Cursor::new(&buf), WIDE, 0).unwrap().unwrap();
        assert_eq!(h.id, id);
    }

    #[test]
    fn unknown_numeric_id_still_yields_header() {
        let buf = [200u8, 0, 0, 0, 0, 0, 0, 0, 0];
        let h = BlockHeader::read(Cursor::new(&buf), WIDE, 0).unwrap().unwrap();
        assert_eq!(h.id, BlockId::Numeric(200));
        assert_eq!(h.name(), UNKNOWN_BLOCK_NAME);
    }

    #[test]
    fn end_marker_and_truncation() {
        assert!(BlockHeader::read(Cursor::new([BLOCK_END]), WIDE, 0).unwrap().is_none());
        assert!(BlockHeader::read(io::empty(), WIDE, 0).unwrap_err().is_eof());
        assert!(BlockHeader::read(Cursor::new([1u8, 5, 0]), WIDE, 0).unwrap_err().is_eof());
    }

    #[test]
    fn reject_unwritable_ids() {
        let mut buf = Vec::new();
        assert!(matches!(
            write_block_header(&mut buf, WIDE, &BlockId::named("way_too_long_block_id"), 0),
            Err(RoomFileError::InconsistentData(_))
        ));
        assert!(matches!(
            write_block_header(&mut buf, WIDE, &BlockId::named("ab\0cd"), 0),
            Err(RoomFileError::InconsistentData(_))
        ));
        assert!(matches!(
            write_block_header(&mut buf, WIDE, &BlockId::named("café"), 0),
            Err(RoomFileError::InconsistentData(_))
        ));
        assert!(matches!(
            write_block_header(&mut buf, WIDE, &BlockId::Numeric(BLOCK_END), 0),
            Err(RoomFileError::InconsistentData(_))
        ));
        assert!(matches!(
            write_block_header(&mut buf, NARROW, &BlockId::named("ext"), 0),
            Err(RoomFileError::IncompatibleEngine(_))
        ));
        assert!(buf.is_empty());
    }

    #[test]
    fn back_patch_measures_payload() {
        let mut cur = Cursor::new(Vec::new());
        let len = write_block(&mut cur, WIDE, &BlockId::Numeric(3), |w| {
            w.write_all(b"0123456789")?;
            Ok(())
        }).unwrap();
        assert_eq!(len, 10);
        assert_eq!(cur.position(), 19);

        let h = BlockHeader::read(Cursor::new(cur.get_ref()), WIDE, 0).unwrap().unwrap();
        assert_eq!(h.length, 10);
    }

    #[test]
    fn back_patch_narrow() {
        let mut cur = Cursor::new(Vec::new());
        write_block(&mut cur, NARROW, &BlockId::Numeric(1), |w| {
            w.write_all(&[7u8; 300])?;
            Ok(())
        }).unwrap();
        assert_eq!(cur.get_ref().len(), 305);
        assert_eq!(&cur.get_ref()[1..5], &300u32.to_le_bytes());
    }

    #[test]
    fn buffered_matches_back_patch() {
        let payload = |w: &mut dyn Write| -> Result<()> {
            w.write_all(b"same bytes")?;
            Ok(())
        };
        let id = BlockId::named("Compare");

        let mut seekable = Cursor::new(Vec::new());
        write_block(&mut seekable, WIDE, &id, |w| payload(w)).unwrap();

        let mut forward = Vec::new();
        write_block_buffered(&mut forward, WIDE, &id, |w| payload(w)).unwrap();

        assert_eq!(seekable.into_inner(), forward);
    }
}
