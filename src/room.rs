//! High-level [`RoomFile`] API: open a room file on disk, list and pull out
//! its blocks.
//!
//! ```no_run
//! use roomfile::room::RoomFile;
//! use roomfile::block::{BlockId, RoomBlockKind};
//! use roomfile::io_stream::WriteOptions;
//!
//! // Write
//! let mut w = RoomFile::create("room1.crm", WriteOptions::default())?;
//! w.write_block_bytes(&RoomBlockKind::Main.into(), b"...")?;
//! w.write_block_bytes(&BlockId::named("ext_sprites"), b"...")?;
//! w.finish()?;
//!
//! // Read
//! let mut room = RoomFile::open("room1.crm")?;
//! let main = room.read_block("Main")?;
//! # Ok::<(), roomfile::RoomFileError>(())
//! ```

use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::info;

use crate::error::{Result, RoomFileError};
use crate::index::{BlockEntry, BlockIndex};
use crate::io_stream::{ReadOptions, RoomFileReader, RoomFileWriter, WriteOptions};
use crate::version::RoomFileVersion;

pub struct RoomFile {
    path:  PathBuf,
    file:  BufReader<File>,
    index: BlockIndex,
}

impl RoomFile {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_with_options(path, ReadOptions::default())
    }

    /// Open, validate the header, then scan the whole block list.  A
    /// truncated or inconsistent block list fails the open.
    pub fn open_with_options<P: AsRef<Path>>(path: P, options: ReadOptions) -> Result<Self> {
        let path = path.as_ref().to_owned();
        let file = File::open(&path).map_err(|source| RoomFileError::FileOpenFailed {
            path: path.clone(),
            source,
        })?;

        let mut reader = RoomFileReader::with_options(BufReader::new(file), options)?;
        let index = BlockIndex::scan(&mut reader)?;
        info!(path = %path.display(), version = index.version.0, blocks = index.entries.len(), "room file opened");

        Ok(Self { path, file: reader.into_inner(), index })
    }

    /// Create `path` and start a container in it.
    pub fn create<P: AsRef<Path>>(path: P, options: WriteOptions) -> Result<RoomFileWriter<BufWriter<File>>> {
        let path = path.as_ref();
        let file = File::create(path).map_err(|source| RoomFileError::FileOpenFailed {
            path: path.to_owned(),
            source,
        })?;
        RoomFileWriter::with_options(BufWriter::new(file), options)
    }

    pub fn path(&self) -> &Path { &self.path }
    pub fn version(&self) -> RoomFileVersion { self.index.version }
    pub fn index(&self) -> &BlockIndex { &self.index }

    pub fn list(&self) -> &[BlockEntry] {
        &self.index.entries
    }

    /// Payload of the first block called `name`.
    pub fn read_block(&mut self, name: &str) -> Result<Vec<u8>> {
        let entry = self.index.require(name)?.clone();
        self.read_entry(&entry)
    }

    /// Payload of an indexed block, checked against the checksum recorded
    /// when the file was opened.
    pub fn read_entry(&mut self, entry: &BlockEntry) -> Result<Vec<u8>> {
        self.file.seek(SeekFrom::Start(entry.payload_offset))?;
        let mut data = Vec::new();
        (&mut self.file).take(entry.length).read_to_end(&mut data)?;
        if (data.len() as u64) < entry.length {
            return Err(RoomFileError::UnexpectedEof(format!(
                "Block: {}, declares {} bytes, {} available.",
                entry.name,
                entry.length,
                data.len()
            )));
        }
        if crc32fast::hash(&data) != entry.crc32 {
            return Err(RoomFileError::InconsistentData(format!(
                "Block: {}, payload changed since the file was opened.",
                entry.name
            )));
        }
        Ok(data)
    }

    /// Write every block payload to `dest` as `NN_<name>.bin`, creating the
    /// directory if needed.  Returns the files written, in block order.
    pub fn extract_all<P: AsRef<Path>>(&mut self, dest: P) -> Result<Vec<PathBuf>> {
        let dest = dest.as_ref();
        fs::create_dir_all(dest)?;
        let entries = self.index.entries.clone();
        let mut written = Vec::with_capacity(entries.len());
        for (i, entry) in entries.iter().enumerate() {
            let data = self.read_entry(entry)?;
            let out = dest.join(format!("{i:02}_{}.bin", file_stem(&entry.name)));
            fs::write(&out, &data)?;
            written.push(out);
        }
        Ok(written)
    }
}

/// Block names are arbitrary bytes; keep them filesystem-safe.
fn file_stem(name: &str) -> String {
    let stem: String = name
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '_' || c == '-' { c } else { '_' })
        .collect();
    if stem.is_empty() { "block".into() } else { stem }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_stem_sanitises() {
        assert_eq!(file_stem("Main"), "Main");
        assert_eq!(file_stem("../evil"), "___evil");
        assert_eq!(file_stem(""), "block");
    }
}
