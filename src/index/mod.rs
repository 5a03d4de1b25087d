use serde::{Deserialize, Serialize};
use std::io::Read;

use crate::block::BlockId;
use crate::error::{Result, RoomFileError};
use crate::io_stream::RoomFileReader;
use crate::version::RoomFileVersion;

/// One block as located by a scan.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BlockEntry {
    pub id:             BlockId,
    pub name:           String,
    pub header_offset:  u64,
    pub payload_offset: u64,
    pub length:         u64,
    pub crc32:          u32,
}

/// Table of contents of a room container, built by reading every block
/// once.  Serializes to JSON for the CLI's machine-readable listing.
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct BlockIndex {
    pub version: RoomFileVersion,
    pub entries: Vec<BlockEntry>,
}

impl BlockIndex {
    /// Walk the remaining block list, checksumming each payload.
    pub fn scan<R: Read>(reader: &mut RoomFileReader<R>) -> Result<Self> {
        let mut entries = Vec::new();
        while let Some((header, crc32)) = reader.read_block(|_, payload| {
            let mut hasher = crc32fast::Hasher::new();
            let mut buf = [0u8; 8192];
            loop {
                let n = payload.read(&mut buf)?;
                if n == 0 { break; }
                hasher.update(&buf[..n]);
            }
            if payload.remaining() > 0 {
                return Err(RoomFileError::UnexpectedEof(format!(
                    "Block payload ended {} bytes early.",
                    payload.remaining()
                )));
            }
            Ok(hasher.finalize())
        })? {
            entries.push(BlockEntry {
                name:           header.name().to_owned(),
                id:             header.id,
                header_offset:  header.header_offset,
                payload_offset: header.payload_offset,
                length:         header.length,
                crc32,
            });
        }
        Ok(Self { version: reader.version(), entries })
    }

    /// First block with the given name (table name or string id).
    pub fn find(&self, name: &str) -> Option<&BlockEntry> {
        self.entries.iter().find(|e| e.name == name)
    }

    pub fn find_id(&self, id: &BlockId) -> Option<&BlockEntry> {
        self.entries.iter().find(|e| &e.id == id)
    }

    pub fn require(&self, name: &str) -> Result<&BlockEntry> {
        self.find(name)
            .ok_or_else(|| RoomFileError::BlockNotFound(format!("Block: {name}.")))
    }

    /// Fail on the first block in a script format current engines refuse.
    pub fn check_supported(&self) -> Result<()> {
        match self.entries.iter().find(|e| e.id.kind().is_some_and(|k| k.is_obsolete())) {
            Some(e) => Err(RoomFileError::OldBlockNotSupported(format!(
                "Block: {}, at offset {}.",
                e.name, e.header_offset
            ))),
            None => Ok(()),
        }
    }

    pub fn total_payload(&self) -> u64 {
        self.entries.iter().map(|e| e.length).sum()
    }

    pub fn to_bytes(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        serde_json::from_slice(bytes)
    }
}
