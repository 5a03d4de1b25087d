//! Room file header: a single little-endian `u16` format version.
//!
//! The version decides how the rest of the file is laid out; most notably
//! old-style block lengths are 32-bit before [`RoomFileVersion::WIDE_LENGTHS`]
//! and 64-bit from it onward.  A header outside
//! [`RoomFileVersion::MIN_SUPPORTED`]`..=`[`RoomFileVersion::CURRENT`] makes
//! the whole file unreadable and is rejected before any block is touched.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::io::{Read, Write};

use crate::error::{Result, RoomFileError};

/// Size of the header on disk.
pub const HEADER_SIZE: u64 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RoomFileVersion(pub u16);

impl RoomFileVersion {
    pub const PRE114_3:    Self = Self(3);
    pub const PRE114_4:    Self = Self(4);
    pub const PRE114_5:    Self = Self(5);
    pub const PRE114_6:    Self = Self(6);
    pub const V114:        Self = Self(8);
    pub const V200_ALPHA:  Self = Self(9);
    pub const V200_ALPHA7: Self = Self(10);
    pub const V200_FINAL:  Self = Self(11);
    pub const V208:        Self = Self(12);
    pub const V214:        Self = Self(13);
    pub const V240:        Self = Self(14);
    pub const V241:        Self = Self(15);
    pub const V250A:       Self = Self(16);
    pub const V250B:       Self = Self(17);
    pub const V251:        Self = Self(18);
    pub const V253:        Self = Self(19);
    pub const V255A:       Self = Self(20);
    pub const V255B:       Self = Self(21);
    pub const V261:        Self = Self(22);
    pub const V262:        Self = Self(23);
    pub const V270:        Self = Self(24);
    pub const V272:        Self = Self(25);
    pub const V300A:       Self = Self(26);
    pub const V300B:       Self = Self(27);
    pub const V303A:       Self = Self(28);
    pub const V303B:       Self = Self(29);
    pub const V3404:       Self = Self(30);
    pub const V3415:       Self = Self(31);
    pub const V350:        Self = Self(32);
    pub const V3508:       Self = Self(33);
    pub const V3509:       Self = Self(34);
    pub const V3510:       Self = Self(35);

    /// Oldest revision this crate can read.
    pub const MIN_SUPPORTED: Self = Self::V250B;
    /// Newest revision; also what writers produce by default.
    pub const CURRENT:       Self = Self::V3510;
    /// First revision with 64-bit block length fields.
    pub const WIDE_LENGTHS:  Self = Self::V350;

    pub fn is_supported(self) -> bool {
        (Self::MIN_SUPPORTED..=Self::CURRENT).contains(&self)
    }

    /// Whether old-style blocks in this revision carry a 64-bit length.
    pub fn has_wide_lengths(self) -> bool {
        self >= Self::WIDE_LENGTHS
    }

    /// Engine release that introduced this revision, if it has a name.
    pub fn release_name(self) -> Option<&'static str> {
        Some(match self.0 {
            3..=6 => "pre-1.14",
            8  => "1.14",
            9  => "2.00 alpha",
            10 => "2.00 alpha 7",
            11 => "2.00",
            12 => "2.08",
            13 => "2.14",
            14 => "2.40",
            15 => "2.41",
            16 => "2.50a",
            17 => "2.50b",
            18 => "2.51",
            19 => "2.53",
            20 => "2.55a",
            21 => "2.55b",
            22 => "2.61",
            23 => "2.62",
            24 => "2.70",
            25 => "2.72",
            26 => "3.0.0a",
            27 => "3.0.0b",
            28 => "3.0.3a",
            29 => "3.0.3b",
            30 => "3.4.0.4",
            31 => "3.4.1.5",
            32 => "3.5.0",
            33 => "3.5.0.8",
            34 => "3.5.0.9",
            35 => "3.5.1.0",
            _  => return None,
        })
    }

    fn check_supported(self) -> Result<Self> {
        if self.is_supported() {
            Ok(self)
        } else {
            Err(RoomFileError::FormatNotSupported {
                found: self.0,
                min:   Self::MIN_SUPPORTED.0,
                max:   Self::CURRENT.0,
            })
        }
    }
}

impl Default for RoomFileVersion {
    fn default() -> Self {
        Self::CURRENT
    }
}

impl fmt::Display for RoomFileVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.release_name() {
            Some(name) => write!(f, "{} ({})", self.0, name),
            None       => write!(f, "{}", self.0),
        }
    }
}

/// Read and validate the leading version tag.
pub fn read_header<R: Read>(mut reader: R) -> Result<RoomFileVersion> {
    let version = RoomFileVersion(reader.read_u16::<LittleEndian>()?);
    version.check_supported()
}

/// Write the version tag.  Unsupported versions are refused so that a
/// writer can never produce a file its own reader rejects.
pub fn write_header<W: Write>(mut writer: W, version: RoomFileVersion) -> Result<()> {
    version.check_supported()?;
    writer.write_u16::<LittleEndian>(version.0)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn read(v: u16) -> Result<RoomFileVersion> {
        read_header(Cursor::new(v.to_le_bytes()))
    }

    #[test]
    fn accepts_closed_supported_range() {
        let min = RoomFileVersion::MIN_SUPPORTED.0;
        let max = RoomFileVersion::CURRENT.0;
        for v in min..=max {
            assert_eq!(read(v).unwrap(), RoomFileVersion(v));
        }
    }

    #[test]
    fn rejects_just_outside_range() {
        for v in [RoomFileVersion::MIN_SUPPORTED.0 - 1, RoomFileVersion::CURRENT.0 + 1] {
            match read(v) {
                Err(RoomFileError::FormatNotSupported { found, min, max }) => {
                    assert_eq!(found, v);
                    assert_eq!(min, RoomFileVersion::MIN_SUPPORTED.0);
                    assert_eq!(max, RoomFileVersion::CURRENT.0);
                }
                other => panic!("expected FormatNotSupported, got {other:?}"),
            }
        }
    }

    #[test]
    fn empty_stream_is_eof() {
        assert!(read_header(Cursor::new(Vec::new())).unwrap_err().is_eof());
    }

    #[test]
    fn write_refuses_unsupported() {
        let mut out = Vec::new();
        assert!(write_header(&mut out, RoomFileVersion::V114).is_err());
        assert!(out.is_empty());
        write_header(&mut out, RoomFileVersion::V350).unwrap();
        assert_eq!(out, [32, 0]);
    }

    #[test]
    fn wide_length_threshold() {
        assert!(!RoomFileVersion::V3415.has_wide_lengths());
        assert!(RoomFileVersion::V350.has_wide_lengths());
        assert_eq!(RoomFileVersion::V350.to_string(), "32 (3.5.0)");
    }
}
