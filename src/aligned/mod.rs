//! Struct-padding emulation for raw record dumps.
//!
//! Legacy room data stores some records as verbatim C structs, complete
//! with the padding the original compiler inserted to align each field on
//! its natural boundary.  [`AlignedReader`] and [`AlignedWriter`] reproduce
//! that layout field by field so callers never compute pad bytes by hand.
//!
//! # Padding rule
//!
//! Before a field of `size` bytes, if `size` is a multiple of the base
//! alignment, the stream skips (or emits) zero bytes until the running
//! cursor is a multiple of `size`.  Whenever the cursor lands on a multiple
//! of [`LARGEST_POSSIBLE_TYPE`] it resets to zero.  Arrays pad once, for
//! their element size; raw byte blobs never pad.
//!
//! [`reset`](AlignedReader::reset), [`into_inner`](AlignedReader::into_inner)
//! and `Drop` pad out the trailing record to the widest alignment seen.
//!
//! Neither type can seek: a seek would desynchronise the cursor.  Padding
//! is skipped by reading, so forward-only sources work.
//!
//! # Ownership
//!
//! Pass `&mut stream` to borrow a stream for one record, or the stream
//! itself to hand it over; `into_inner` gives an owned stream back.

use byteorder::{LittleEndian, ReadBytesExt, WriteBytesExt};
use std::io::{self, Read, Write};
use tracing::warn;

/// Alignment below which fields are never padded: the size of `i16`.
pub const DEFAULT_BASE_ALIGNMENT: usize = 2;
/// Size of the widest scalar in the emulated compiler's model.
pub const LARGEST_POSSIBLE_TYPE: usize = 8;

// ── Padding calculator ────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
struct Padding {
    base_alignment: usize,
    block:          usize,
    max_alignment:  usize,
}

impl Padding {
    fn new(base_alignment: usize) -> Self {
        Self { base_alignment: base_alignment.max(1), block: 0, max_alignment: 0 }
    }

    /// Number of pad bytes owed before a field of `next_size` bytes.  The
    /// returned bytes are counted as consumed.
    fn before(&mut self, next_size: usize) -> usize {
        if next_size == 0 || next_size % self.base_alignment != 0 {
            return 0;
        }
        let pad = match self.block % next_size {
            0 => 0,
            r => next_size - r,
        };
        self.block += pad;
        self.max_alignment = self.max_alignment.max(next_size);
        if self.block % LARGEST_POSSIBLE_TYPE == 0 {
            self.block = 0;
        }
        pad
    }

    fn advance(&mut self, size: usize) {
        self.block += size;
    }

    /// Trailing padding for the record, then a fresh cursor.
    fn finish(&mut self) -> usize {
        let pad = self.before(self.max_alignment);
        self.max_alignment = 0;
        self.block = 0;
        pad
    }
}

fn released() -> io::Error {
    io::Error::new(io::ErrorKind::Other, "aligned stream already released")
}

// ── Reader ────────────────────────────────────────────────────────────────────

/// Read side of the padding emulation.
#[derive(Debug)]
pub struct AlignedReader<R: Read> {
    inner:   Option<R>,
    padding: Padding,
}

impl<R: Read> AlignedReader<R> {
    pub fn new(inner: R) -> Self {
        Self::with_base_alignment(inner, DEFAULT_BASE_ALIGNMENT)
    }

    pub fn with_base_alignment(inner: R, base_alignment: usize) -> Self {
        Self { inner: Some(inner), padding: Padding::new(base_alignment) }
    }

    pub fn base_alignment(&self) -> usize { self.padding.base_alignment }
    /// Bytes consumed since the cursor last reset.
    pub fn block_cursor(&self) -> usize { self.padding.block }
    pub fn max_alignment(&self) -> usize { self.padding.max_alignment }

    fn skip_padding(&mut self, next_size: usize) -> io::Result<()> {
        let owed = self.padding.before(next_size);
        let inner = self.inner.as_mut().ok_or_else(released)?;
        // One byte at a time; the source may not support seeking.
        for _ in 0..owed {
            inner.read_u8()?;
        }
        Ok(())
    }

    /// Pad for an `align`-sized field, then read `len` bytes with `read`.
    fn field<T>(&mut self, align: usize, len: usize, read: impl FnOnce(&mut R) -> io::Result<T>) -> io::Result<T> {
        self.skip_padding(align)?;
        let inner = self.inner.as_mut().ok_or_else(released)?;
        let value = read(inner)?;
        self.padding.advance(len);
        Ok(value)
    }

    pub fn read_u8(&mut self) -> io::Result<u8> {
        self.field(1, 1, |r| r.read_u8())
    }

    pub fn read_i8(&mut self) -> io::Result<i8> {
        self.field(1, 1, |r| r.read_i8())
    }

    pub fn read_bool(&mut self) -> io::Result<bool> {
        Ok(self.read_u8()? != 0)
    }

    pub fn read_i16(&mut self) -> io::Result<i16> {
        self.field(2, 2, |r| r.read_i16::<LittleEndian>())
    }

    pub fn read_u16(&mut self) -> io::Result<u16> {
        self.field(2, 2, |r| r.read_u16::<LittleEndian>())
    }

    pub fn read_i32(&mut self) -> io::Result<i32> {
        self.field(4, 4, |r| r.read_i32::<LittleEndian>())
    }

    pub fn read_u32(&mut self) -> io::Result<u32> {
        self.field(4, 4, |r| r.read_u32::<LittleEndian>())
    }

    pub fn read_i64(&mut self) -> io::Result<i64> {
        self.field(8, 8, |r| r.read_i64::<LittleEndian>())
    }

    pub fn read_u64(&mut self) -> io::Result<u64> {
        self.field(8, 8, |r| r.read_u64::<LittleEndian>())
    }

    /// Fill `buf` with an unpadded byte blob, e.g. a fixed `char[N]` field.
    pub fn read_exact(&mut self, buf: &mut [u8]) -> io::Result<()> {
        self.read_array(buf, 1)
    }

    /// Fill `buf` with an array of `elem_size`-byte elements, padded once
    /// for the element size.
    pub fn read_array(&mut self, buf: &mut [u8], elem_size: usize) -> io::Result<()> {
        let len = buf.len();
        self.field(elem_size, len, |r| r.read_exact(buf))
    }

    pub fn read_i16_into(&mut self, dst: &mut [i16]) -> io::Result<()> {
        let len = dst.len() * 2;
        self.field(2, len, |r| r.read_i16_into::<LittleEndian>(dst))
    }

    pub fn read_i32_into(&mut self, dst: &mut [i32]) -> io::Result<()> {
        let len = dst.len() * 4;
        self.field(4, len, |r| r.read_i32_into::<LittleEndian>(dst))
    }

    pub fn read_i64_into(&mut self, dst: &mut [i64]) -> io::Result<()> {
        let len = dst.len() * 8;
        self.field(8, len, |r| r.read_i64_into::<LittleEndian>(dst))
    }

    /// Skip the record's trailing padding and start a new record.
    pub fn reset(&mut self) -> io::Result<()> {
        if self.inner.is_none() {
            return Ok(());
        }
        let owed = self.padding.finish();
        if let Some(inner) = self.inner.as_mut() {
            for _ in 0..owed {
                inner.read_u8()?;
            }
        }
        Ok(())
    }

    /// Finish the record and release the wrapped stream.
    pub fn into_inner(mut self) -> io::Result<R> {
        self.reset()?;
        self.inner.take().ok_or_else(released)
    }
}

impl<R: Read> Drop for AlignedReader<R> {
    fn drop(&mut self) {
        if let Err(e) = self.reset() {
            warn!(error = %e, "failed to consume trailing record padding");
        }
    }
}

// ── Writer ────────────────────────────────────────────────────────────────────

/// Write side of the padding emulation.  Pad bytes are zero.
#[derive(Debug)]
pub struct AlignedWriter<W: Write> {
    inner:   Option<W>,
    padding: Padding,
}

impl<W: Write> AlignedWriter<W> {
    pub fn new(inner: W) -> Self {
        Self::with_base_alignment(inner, DEFAULT_BASE_ALIGNMENT)
    }

    pub fn with_base_alignment(inner: W, base_alignment: usize) -> Self {
        Self { inner: Some(inner), padding: Padding::new(base_alignment) }
    }

    pub fn base_alignment(&self) -> usize { self.padding.base_alignment }
    pub fn block_cursor(&self) -> usize { self.padding.block }
    pub fn max_alignment(&self) -> usize { self.padding.max_alignment }

    fn emit_padding(&mut self, next_size: usize) -> io::Result<()> {
        let owed = self.padding.before(next_size);
        write_zeros(self.inner.as_mut().ok_or_else(released)?, owed)
    }

    fn field(&mut self, align: usize, len: usize, write: impl FnOnce(&mut W) -> io::Result<()>) -> io::Result<()> {
        self.emit_padding(align)?;
        write(self.inner.as_mut().ok_or_else(released)?)?;
        self.padding.advance(len);
        Ok(())
    }

    pub fn write_u8(&mut self, v: u8) -> io::Result<()> {
        self.field(1, 1, |w| w.write_u8(v))
    }

    pub fn write_i8(&mut self, v: i8) -> io::Result<()> {
        self.field(1, 1, |w| w.write_i8(v))
    }

    pub fn write_bool(&mut self, v: bool) -> io::Result<()> {
        self.write_u8(v as u8)
    }

    pub fn write_i16(&mut self, v: i16) -> io::Result<()> {
        self.field(2, 2, |w| w.write_i16::<LittleEndian>(v))
    }

    pub fn write_u16(&mut self, v: u16) -> io::Result<()> {
        self.field(2, 2, |w| w.write_u16::<LittleEndian>(v))
    }

    pub fn write_i32(&mut self, v: i32) -> io::Result<()> {
        self.field(4, 4, |w| w.write_i32::<LittleEndian>(v))
    }

    pub fn write_u32(&mut self, v: u32) -> io::Result<()> {
        self.field(4, 4, |w| w.write_u32::<LittleEndian>(v))
    }

    pub fn write_i64(&mut self, v: i64) -> io::Result<()> {
        self.field(8, 8, |w| w.write_i64::<LittleEndian>(v))
    }

    pub fn write_u64(&mut self, v: u64) -> io::Result<()> {
        self.field(8, 8, |w| w.write_u64::<LittleEndian>(v))
    }

    /// Write an unpadded byte blob.
    pub fn write_all(&mut self, buf: &[u8]) -> io::Result<()> {
        self.write_array(buf, 1)
    }

    /// Write an array of `elem_size`-byte elements, padded once for the
    /// element size.
    pub fn write_array(&mut self, buf: &[u8], elem_size: usize) -> io::Result<()> {
        self.field(elem_size, buf.len(), |w| w.write_all(buf))
    }

    pub fn write_i16_slice(&mut self, src: &[i16]) -> io::Result<()> {
        self.field(2, src.len() * 2, |w| src.iter().try_for_each(|v| w.write_i16::<LittleEndian>(*v)))
    }

    pub fn write_i32_slice(&mut self, src: &[i32]) -> io::Result<()> {
        self.field(4, src.len() * 4, |w| src.iter().try_for_each(|v| w.write_i32::<LittleEndian>(*v)))
    }

    pub fn write_i64_slice(&mut self, src: &[i64]) -> io::Result<()> {
        self.field(8, src.len() * 8, |w| src.iter().try_for_each(|v| w.write_i64::<LittleEndian>(*v)))
    }

    /// Emit the record's trailing padding and start a new record.
    pub fn reset(&mut self) -> io::Result<()> {
        if self.inner.is_none() {
            return Ok(());
        }
        let owed = self.padding.finish();
        match self.inner.as_mut() {
            Some(inner) => write_zeros(inner, owed),
            None        => Ok(()),
        }
    }

    pub fn flush(&mut self) -> io::Result<()> {
        self.inner.as_mut().ok_or_else(released)?.flush()
    }

    /// Finish the record and release the wrapped stream.
    pub fn into_inner(mut self) -> io::Result<W> {
        self.reset()?;
        self.inner.take().ok_or_else(released)
    }
}

impl<W: Write> Drop for AlignedWriter<W> {
    fn drop(&mut self) {
        if let Err(e) = self.reset() {
            warn!(error = %e, "failed to write trailing record padding");
        }
    }
}

fn write_zeros<W: Write>(w: &mut W, count: usize) -> io::Result<()> {
    io::copy(&mut io::repeat(0).take(count as u64), w)?;
    Ok(())
}
