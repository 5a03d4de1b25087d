//! Streaming room container engine: reader and writer.
//!
//! # Reader
//! [`RoomFileReader`] validates the version header on construction, then
//! walks the block list front to back.  It counts bytes itself rather than
//! asking the stream for its position, so any `Read` works, including pipes.
//! Offsets are relative to the first byte of the version header.
//!
//! Two ways to consume a block:
//!
//! - [`RoomFileReader::read_block`] hands the decoder a [`BlockPayload`]
//!   bounded to the declared length.  Whatever the decoder leaves unread is
//!   skipped (with a warning); reading past the end is `BlockDataOverlapping`.
//! - [`RoomFileReader::next_block_header`] plus `Read` on the reader itself,
//!   the raw protocol.  Before the next header is read, the position is
//!   checked against the previous block's end with the same rules.
//!
//! # Writer
//! [`RoomFileWriter`] writes the header on construction and appends blocks.
//! On a seekable stream [`RoomFileWriter::write_block`] back-patches the
//! length; [`RoomFileWriter::write_block_buffered`] measures the payload in
//! memory first and needs no seek.  [`RoomFileWriter::finish`] appends the
//! end marker and must be called once.

use std::io::{self, Read, Seek, Write};
use tracing::{debug, warn};

use crate::aligned::AlignedReader;
use crate::block::{self, BlockHeader, BlockId};
use crate::error::{Result, RoomFileError};
use crate::version::{self, RoomFileVersion};

// ── Options ──────────────────────────────────────────────────────────────────

/// Configuration for [`RoomFileReader::with_options`].
#[derive(Debug, Clone, Default)]
pub struct ReadOptions {
    /// Fail on numeric block ids missing from the name table instead of
    /// logging them.
    pub strict_block_ids: bool,
    /// Fail when a block's payload is left partly unread instead of
    /// skipping the remainder.
    pub strict_payload:   bool,
}

/// Configuration for [`RoomFileWriter::with_options`].
#[derive(Debug, Clone, Default)]
pub struct WriteOptions {
    pub version: RoomFileVersion,
}

// ── Position tracking ────────────────────────────────────────────────────────

#[derive(Debug)]
struct Counting<R> {
    inner: R,
    pos:   u64,
}

impl<R: Read> Read for Counting<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.inner.read(buf)?;
        self.pos += n as u64;
        Ok(n)
    }
}

// ── Reader ───────────────────────────────────────────────────────────────────

pub struct RoomFileReader<R: Read> {
    reader:  Counting<R>,
    version: RoomFileVersion,
    options: ReadOptions,
    /// Last header handed out whose payload has not been settled yet.
    current: Option<BlockHeader>,
    done:    bool,
}

impl<R: Read> RoomFileReader<R> {
    pub fn new(reader: R) -> Result<Self> {
        Self::with_options(reader, ReadOptions::default())
    }

    /// Read and validate the version header.  Nothing past the header is
    /// touched when the version is unsupported.
    pub fn with_options(reader: R, options: ReadOptions) -> Result<Self> {
        let mut reader = Counting { inner: reader, pos: 0 };
        let version = version::read_header(&mut reader)?;
        debug!(version = version.0, "room file header validated");
        Ok(Self { reader, version, options, current: None, done: false })
    }

    pub fn version(&self) -> RoomFileVersion { self.version }
    /// Bytes consumed since the start of the container.
    pub fn position(&self) -> u64 { self.reader.pos }
    /// Whether the end marker has been read.
    pub fn is_finished(&self) -> bool { self.done }

    pub fn into_inner(self) -> R {
        self.reader.inner
    }

    /// Read the next block header, or `None` once the end marker is reached.
    ///
    /// Any payload of the previous block the caller left unread is skipped
    /// first; a caller that read past it gets `BlockDataOverlapping`.
    pub fn next_block_header(&mut self) -> Result<Option<BlockHeader>> {
        if self.done {
            return Ok(None);
        }
        self.settle_current()?;

        let offset = self.reader.pos;
        let header = match BlockHeader::read(&mut self.reader, self.version, offset)? {
            Some(h) => h,
            None => {
                debug!(offset, "end of block list");
                self.done = true;
                return Ok(None);
            }
        };

        if let BlockId::Numeric(n) = header.id {
            if header.id.kind().is_none() {
                if self.options.strict_block_ids {
                    return Err(RoomFileError::UnknownBlockType(format!(
                        "Block id {n} at offset {offset}."
                    )));
                }
                warn!(id = n, offset, "unknown block id");
            }
        }

        debug!(
            block   = %header.id,
            length  = header.length,
            offset  = header.payload_offset,
            "block header read"
        );
        self.current = Some(header.clone());
        Ok(Some(header))
    }

    /// Read one block and decode its payload with `decode`.
    ///
    /// The decoder sees at most `length` bytes.  Returns `None` at the end
    /// marker.
    pub fn read_block<T, F>(&mut self, decode: F) -> Result<Option<(BlockHeader, T)>>
    where
        F: FnOnce(&BlockHeader, &mut BlockPayload<'_, R>) -> Result<T>,
    {
        let header = match self.next_block_header()? {
            Some(h) => h,
            None    => return Ok(None),
        };

        let mut payload = BlockPayload { inner: (&mut self.reader).take(header.length) };
        let result = decode(&header, &mut payload);
        let left = payload.remaining();

        let value = match result {
            Ok(v) => v,
            // The bounded view ran dry, not the file: the decoder wanted
            // more than the block holds.
            Err(e) if e.is_eof() && left == 0 => {
                return Err(RoomFileError::BlockDataOverlapping(format!(
                    "Block: {}, decoder read past the block end at offset {}.",
                    header.name(),
                    header.payload_end()
                )));
            }
            Err(e) => return Err(e),
        };

        self.settle_current()?;
        Ok(Some((header, value)))
    }

    /// Read the rest of the current block's payload.
    pub fn read_payload(&mut self) -> Result<Vec<u8>> {
        let remaining = self.remaining();
        let mut payload = BlockPayload { inner: (&mut self.reader).take(remaining) };
        let data = payload.read_to_vec()?;
        self.current = None;
        Ok(data)
    }

    /// Skip the rest of the current block's payload without a warning.
    pub fn skip_payload(&mut self) -> Result<()> {
        if let Some(header) = self.current.take() {
            let remaining = header.payload_end().saturating_sub(self.reader.pos);
            self.skip(&header, remaining)?;
        }
        Ok(())
    }

    /// Iterate over all remaining blocks with their full payloads.
    pub fn blocks(&mut self) -> Blocks<'_, R> {
        Blocks { reader: self, failed: false }
    }

    fn remaining(&self) -> u64 {
        self.current
            .as_ref()
            .map_or(0, |h| h.payload_end().saturating_sub(self.reader.pos))
    }

    fn settle_current(&mut self) -> Result<()> {
        let header = match self.current.take() {
            Some(h) => h,
            None    => return Ok(()),
        };
        let pos = self.reader.pos;
        let end = header.payload_end();

        if pos > end {
            return Err(RoomFileError::BlockDataOverlapping(format!(
                "Block: {}, expected to end at offset: {end}, finished reading at {pos}.",
                header.name()
            )));
        }
        if pos < end {
            if self.options.strict_payload {
                return Err(RoomFileError::InconsistentData(format!(
                    "Block: {}, expected to end at offset: {end}, finished reading at {pos}.",
                    header.name()
                )));
            }
            warn!(
                block    = header.name(),
                expected = end,
                actual   = pos,
                "block data not fully read, skipping the rest"
            );
            self.skip(&header, end - pos)?;
        }
        Ok(())
    }

    fn skip(&mut self, header: &BlockHeader, count: u64) -> Result<()> {
        let skipped = io::copy(&mut (&mut self.reader).take(count), &mut io::sink())?;
        if skipped < count {
            return Err(RoomFileError::UnexpectedEof(format!(
                "Block: {}, declares {} payload bytes, stream ended at offset {}.",
                header.name(),
                header.length,
                self.reader.pos
            )));
        }
        Ok(())
    }
}

/// Raw access for the caller-driven protocol: reads go straight to the
/// payload of the block last returned by `next_block_header`.
impl<R: Read> Read for RoomFileReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

// ── BlockPayload ─────────────────────────────────────────────────────────────

/// A view of one block's payload, bounded to its declared length.
pub struct BlockPayload<'a, R: Read> {
    inner: io::Take<&'a mut Counting<R>>,
}

impl<'a, R: Read> BlockPayload<'a, R> {
    /// Bytes left before the declared end of the block.
    pub fn remaining(&self) -> u64 {
        self.inner.limit()
    }

    /// Read everything up to the declared end.  A short stream is
    /// `UnexpectedEof`, never a short result.
    pub fn read_to_vec(&mut self) -> Result<Vec<u8>> {
        let mut data = Vec::new();
        self.inner.read_to_end(&mut data)?;
        if self.remaining() > 0 {
            return Err(RoomFileError::UnexpectedEof(format!(
                "Block payload ended {} bytes early.",
                self.remaining()
            )));
        }
        Ok(data)
    }

    /// Decode padded struct dumps from this payload.
    pub fn aligned(&mut self) -> AlignedReader<&mut Self> {
        AlignedReader::new(self)
    }
}

impl<R: Read> Read for BlockPayload<'_, R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

// ── Iterator ─────────────────────────────────────────────────────────────────

pub struct Blocks<'a, R: Read> {
    reader: &'a mut RoomFileReader<R>,
    failed: bool,
}

impl<R: Read> Iterator for Blocks<'_, R> {
    type Item = Result<(BlockHeader, Vec<u8>)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        match self.reader.read_block(|_, payload| payload.read_to_vec()) {
            Ok(Some(block)) => Some(Ok(block)),
            Ok(None)        => None,
            Err(e) => {
                self.failed = true;
                Some(Err(e))
            }
        }
    }
}

// ── Writer ───────────────────────────────────────────────────────────────────

/// Appends blocks to a container.
///
/// [`finish`](Self::finish) writes the end marker; a writer dropped without
/// it leaves a container readers reject as truncated, and logs a warning.
pub struct RoomFileWriter<W: Write> {
    writer:  Option<W>,
    version: RoomFileVersion,
    blocks:  usize,
}

impl<W: Write> RoomFileWriter<W> {
    pub fn new(writer: W) -> Result<Self> {
        Self::with_options(writer, WriteOptions::default())
    }

    pub fn with_options(mut writer: W, options: WriteOptions) -> Result<Self> {
        version::write_header(&mut writer, options.version)?;
        Ok(Self { writer: Some(writer), version: options.version, blocks: 0 })
    }

    pub fn version(&self) -> RoomFileVersion { self.version }
    pub fn blocks_written(&self) -> usize { self.blocks }

    /// Append a block whose payload is already in memory.
    pub fn write_block_bytes(&mut self, id: &BlockId, data: &[u8]) -> Result<u64> {
        let version = self.version;
        let writer = self.stream()?;
        block::write_block_header(&mut *writer, version, id, data.len() as u64)?;
        writer.write_all(data)?;
        self.written(id, data.len() as u64)
    }

    /// Append a block produced by `payload`, buffering it to learn its
    /// length.  Works on forward-only streams.
    pub fn write_block_buffered<F>(&mut self, id: &BlockId, payload: F) -> Result<u64>
    where
        F: FnOnce(&mut Vec<u8>) -> Result<()>,
    {
        let version = self.version;
        let length = block::write_block_buffered(self.stream()?, version, id, payload)?;
        self.written(id, length)
    }

    /// Write the end marker and return the stream.
    pub fn finish(mut self) -> Result<W> {
        let mut writer = self.writer.take().ok_or_else(finished)?;
        block::write_end_marker(&mut writer)?;
        writer.flush()?;
        debug!(blocks = self.blocks, "room file finished");
        Ok(writer)
    }

    fn stream(&mut self) -> Result<&mut W> {
        Ok(self.writer.as_mut().ok_or_else(finished)?)
    }

    fn written(&mut self, id: &BlockId, length: u64) -> Result<u64> {
        self.blocks += 1;
        debug!(block = %id, length, "block written");
        Ok(length)
    }
}

impl<W: Write + Seek> RoomFileWriter<W> {
    /// Append a block produced by `payload` directly into the stream, then
    /// back-patch its length.
    pub fn write_block<F>(&mut self, id: &BlockId, payload: F) -> Result<u64>
    where
        F: FnOnce(&mut W) -> Result<()>,
    {
        let version = self.version;
        let length = block::write_block(self.stream()?, version, id, payload)?;
        self.written(id, length)
    }
}

impl<W: Write> Drop for RoomFileWriter<W> {
    fn drop(&mut self) {
        if self.writer.is_some() {
            warn!(blocks = self.blocks, "room file writer dropped without an end marker");
        }
    }
}

fn finished() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "room file writer already finished")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::RoomBlockKind;
    use std::io::Cursor;

    fn sample() -> Vec<u8> {
        let mut w = RoomFileWriter::new(Cursor::new(Vec::new())).unwrap();
        w.write_block_bytes(&BlockId::Numeric(3), b"0123456789").unwrap();
        w.write_block_bytes(&BlockId::named("Properties"), b"").unwrap();
        w.finish().unwrap().into_inner()
    }

    #[test]
    fn walks_mixed_block_list() {
        let data = sample();
        let mut r = RoomFileReader::new(Cursor::new(data)).unwrap();
        assert_eq!(r.version(), RoomFileVersion::CURRENT);

        let first = r.next_block_header().unwrap().unwrap();
        assert_eq!(first.id, BlockId::Numeric(3));
        assert_eq!(first.length, 10);
        assert_eq!(first.header_offset, 2);
        assert_eq!(first.payload_offset, 11);
        assert_eq!(r.read_payload().unwrap(), b"0123456789");

        let second = r.next_block_header().unwrap().unwrap();
        assert_eq!(second.id, BlockId::named("Properties"));
        assert_eq!(second.length, 0);
        assert_eq!(second.payload_offset, 46);

        assert!(r.next_block_header().unwrap().is_none());
        assert!(r.is_finished());
        assert!(r.next_block_header().unwrap().is_none());
    }

    #[test]
    fn unread_payload_is_skipped() {
        let mut r = RoomFileReader::new(Cursor::new(sample())).unwrap();
        let (h, first_byte) = r
            .read_block(|_, p| {
                let mut b = [0u8; 1];
                p.read_exact(&mut b)?;
                Ok(b[0])
            })
            .unwrap()
            .unwrap();
        assert_eq!(first_byte, b'0');
        assert_eq!(r.position(), h.payload_end());

        let (h, _) = r.read_block(|_, _| Ok(())).unwrap().unwrap();
        assert_eq!(h.name(), "Properties");
        assert!(r.read_block(|_, _| Ok(())).unwrap().is_none());
    }

    #[test]
    fn strict_payload_rejects_unread_bytes() {
        let opts = ReadOptions { strict_payload: true, ..Default::default() };
        let mut r = RoomFileReader::with_options(Cursor::new(sample()), opts).unwrap();
        let err = r.read_block(|_, _| Ok(())).unwrap_err();
        assert!(matches!(err, RoomFileError::InconsistentData(_)));
    }

    #[test]
    fn decoder_overrun_is_overlapping() {
        let mut r = RoomFileReader::new(Cursor::new(sample())).unwrap();
        let err = r
            .read_block(|_, p| {
                let mut b = [0u8; 11];
                p.read_exact(&mut b)?;
                Ok(())
            })
            .unwrap_err();
        assert!(matches!(err, RoomFileError::BlockDataOverlapping(_)), "{err:?}");
    }

    #[test]
    fn raw_overrun_is_overlapping() {
        let mut r = RoomFileReader::new(Cursor::new(sample())).unwrap();
        r.next_block_header().unwrap().unwrap();
        let mut b = [0u8; 12];
        r.read_exact(&mut b).unwrap();
        let err = r.next_block_header().unwrap_err();
        assert!(matches!(err, RoomFileError::BlockDataOverlapping(_)));
    }

    #[test]
    fn strict_ids_reject_unknown() {
        let mut w = RoomFileWriter::new(Vec::new()).unwrap();
        w.write_block_bytes(&BlockId::Numeric(77), b"x").unwrap();
        let data = w.finish().unwrap();

        let mut lenient = RoomFileReader::new(Cursor::new(data.clone())).unwrap();
        assert_eq!(lenient.next_block_header().unwrap().unwrap().name(), "unknown");

        let opts = ReadOptions { strict_block_ids: true, ..Default::default() };
        let mut strict = RoomFileReader::with_options(Cursor::new(data), opts).unwrap();
        assert!(matches!(
            strict.next_block_header(),
            Err(RoomFileError::UnknownBlockType(_))
        ));
    }

    #[test]
    fn truncated_payload_is_eof() {
        let mut data = sample();
        data.truncate(15);
        let mut r = RoomFileReader::new(Cursor::new(data.clone())).unwrap();
        assert!(r.read_block(|_, p| p.read_to_vec()).unwrap_err().is_eof());

        let mut r = RoomFileReader::new(Cursor::new(data)).unwrap();
        assert!(r.read_block(|_, _| Ok(())).unwrap_err().is_eof());
    }

    #[test]
    fn missing_end_marker_is_eof() {
        let mut data = sample();
        data.pop();
        let mut r = RoomFileReader::new(Cursor::new(data)).unwrap();
        let results: Vec<_> = r.blocks().collect();
        assert_eq!(results.len(), 3);
        assert!(results[0].is_ok());
        assert!(results[1].is_ok());
        assert!(results[2].as_ref().unwrap_err().is_eof());
    }

    #[test]
    fn aligned_record_inside_block() {
        let mut w = RoomFileWriter::new(Cursor::new(Vec::new())).unwrap();
        w.write_block(&RoomBlockKind::Main.into(), |out| {
            let mut rec = crate::aligned::AlignedWriter::new(out);
            rec.write_u8(1)?;
            rec.write_i32(-5)?;
            rec.into_inner()?;
            Ok(())
        })
        .unwrap();
        let data = w.finish().unwrap().into_inner();

        let mut r = RoomFileReader::new(Cursor::new(data)).unwrap();
        let (h, (a, b)) = r
            .read_block(|_, p| {
                let mut rec = p.aligned();
                let a = rec.read_u8()?;
                let b = rec.read_i32()?;
                Ok((a, b))
            })
            .unwrap()
            .unwrap();
        assert_eq!(h.length, 8);
        assert_eq!((a, b), (1, -5));
    }

    #[test]
    fn forward_only_writer() {
        let mut w = RoomFileWriter::new(Vec::new()).unwrap();
        w.write_block_buffered(&BlockId::named("ext"), |buf| {
            buf.extend_from_slice(&[1, 2, 3]);
            Ok(())
        })
        .unwrap();
        assert_eq!(w.blocks_written(), 1);
        let data = w.finish().unwrap();

        let mut r = RoomFileReader::new(data.as_slice()).unwrap();
        let blocks: Vec<_> = r.blocks().collect::<Result<_>>().unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].1, vec![1u8, 2, 3]);
    }

    #[test]
    fn dropped_writer_leaves_no_end_marker() {
        let mut data = Vec::new();
        {
            let mut w = RoomFileWriter::new(&mut data).unwrap();
            w.write_block_bytes(&RoomBlockKind::Main.into(), b"abc").unwrap();
        }
        assert_ne!(data.last(), Some(&block::BLOCK_END));

        let mut r = RoomFileReader::new(data.as_slice()).unwrap();
        let results: Vec<_> = r.blocks().collect();
        assert_eq!(results.len(), 2);
        assert!(results[1].as_ref().unwrap_err().is_eof());
    }

    #[test]
    fn nul_in_named_id_is_refused() {
        let mut w = RoomFileWriter::new(Vec::new()).unwrap();
        let err = w.write_block_bytes(&BlockId::named("ab\0cd"), b"x").unwrap_err();
        assert!(matches!(err, RoomFileError::InconsistentData(_)));
        assert_eq!(w.blocks_written(), 0);

        let data = w.finish().unwrap();
        let mut r = RoomFileReader::new(data.as_slice()).unwrap();
        assert!(r.next_block_header().unwrap().is_none());
    }
}
