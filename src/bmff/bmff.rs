// SPDX-License-Identifier: GPL-2.0-or-later

#[cfg(test)]
mod test;

pub mod parse;

use bytes::Bytes;
use std::collections::TryReserveError;
use thiserror::Error;

// Mpeg box type.
pub type BoxType = [u8; 4];

// Box header size: 4 size bytes and the tag.
pub const BOX_HEADER_SIZE: usize = 8;

#[derive(Debug, Error)]
pub enum BmffError {
    #[error("allocation: {0}")]
    Allocation(#[from] TryReserveError),

    #[error("patch range: {0}+4 exceeds length {1}")]
    PatchRange(usize, usize),

    #[error("box size exceeds u32: {0}")]
    BoxTooLarge(usize),

    #[error("boxes closed out of order: depth {want}, handle {got}")]
    CloseOrder { want: usize, got: usize },

    #[error("{0} boxes still open")]
    UnclosedBox(usize),
}

// Growable output buffer with big-endian appends.
//
// Growth reserves space before any byte is written, so a failed
// allocation leaves the existing contents untouched.
#[derive(Debug, Default)]
pub struct ByteBuf(Vec<u8>);

impl ByteBuf {
    #[must_use]
    pub fn new() -> Self {
        Self(Vec::new())
    }

    pub fn with_capacity(capacity: usize) -> Result<Self, BmffError> {
        let mut v = Vec::new();
        v.try_reserve(capacity)?;
        Ok(Self(v))
    }

    // Ensures room for `additional` bytes, at least doubling the
    // buffer so appends stay amortized O(1).
    fn grow(&mut self, additional: usize) -> Result<(), BmffError> {
        if additional > self.0.capacity() - self.0.len() {
            self.0.try_reserve(std::cmp::max(additional, self.0.len()))?;
        }
        Ok(())
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), BmffError> {
        self.grow(1)?;
        self.0.push(v);
        Ok(())
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), BmffError> {
        self.put_slice(&v.to_be_bytes())
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), BmffError> {
        self.put_slice(&v.to_be_bytes())
    }

    pub fn put_u64(&mut self, v: u64) -> Result<(), BmffError> {
        self.put_slice(&v.to_be_bytes())
    }

    pub fn put_slice(&mut self, v: &[u8]) -> Result<(), BmffError> {
        self.grow(v.len())?;
        self.0.extend_from_slice(v);
        Ok(())
    }

    pub fn put_fourcc(&mut self, tag: BoxType) -> Result<(), BmffError> {
        self.put_slice(&tag)
    }

    // Overwrites 4 previously written bytes at `offset`.
    pub fn patch_u32(&mut self, offset: usize, v: u32) -> Result<(), BmffError> {
        let end = offset
            .checked_add(4)
            .ok_or(BmffError::PatchRange(offset, self.0.len()))?;
        if end > self.0.len() {
            return Err(BmffError::PatchRange(offset, self.0.len()));
        }
        self.0[offset..end].copy_from_slice(&v.to_be_bytes());
        Ok(())
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.0
    }

    #[must_use]
    pub fn into_bytes(self) -> Bytes {
        Bytes::from(self.0)
    }
}

// Handle to an open box. Consumed by `BoxWriter::close`.
#[must_use = "every opened box must be closed"]
#[derive(Debug)]
pub struct BoxHandle {
    offset: usize,
    depth: usize,
}

// Emits nested boxes into a `ByteBuf`.
//
// `open` writes a zero size placeholder followed by the tag, `close`
// backpatches the placeholder once the content length is known.
// Boxes must close in exact reverse order of opening.
#[derive(Debug, Default)]
pub struct BoxWriter {
    buf: ByteBuf,
    open_boxes: Vec<usize>,
}

impl BoxWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(&mut self, typ: BoxType) -> Result<BoxHandle, BmffError> {
        let offset = self.buf.len();
        self.buf.put_u32(0)?;
        self.buf.put_fourcc(typ)?;
        self.open_boxes.push(offset);
        Ok(BoxHandle {
            offset,
            depth: self.open_boxes.len(),
        })
    }

    // Opens a full box: header plus version and 24-bit flags.
    pub fn open_full(&mut self, typ: BoxType, version: u8, flags: u32) -> Result<BoxHandle, BmffError> {
        let handle = self.open(typ)?;
        self.buf
            .put_u32((u32::from(version) << 24) | (flags & 0x00ff_ffff))?;
        Ok(handle)
    }

    pub fn close(&mut self, handle: BoxHandle) -> Result<(), BmffError> {
        if self.open_boxes.len() != handle.depth
            || self.open_boxes.last() != Some(&handle.offset)
        {
            return Err(BmffError::CloseOrder {
                want: self.open_boxes.len(),
                got: handle.depth,
            });
        }
        self.open_boxes.pop();

        let size = self.buf.len() - handle.offset;
        let size = u32::try_from(size).map_err(|_| BmffError::BoxTooLarge(size))?;
        self.buf.patch_u32(handle.offset, size)
    }

    pub fn put_u8(&mut self, v: u8) -> Result<(), BmffError> {
        self.buf.put_u8(v)
    }

    pub fn put_u16(&mut self, v: u16) -> Result<(), BmffError> {
        self.buf.put_u16(v)
    }

    pub fn put_u32(&mut self, v: u32) -> Result<(), BmffError> {
        self.buf.put_u32(v)
    }

    pub fn put_u64(&mut self, v: u64) -> Result<(), BmffError> {
        self.buf.put_u64(v)
    }

    pub fn put_slice(&mut self, v: &[u8]) -> Result<(), BmffError> {
        self.buf.put_slice(v)
    }

    pub fn put_fourcc(&mut self, tag: BoxType) -> Result<(), BmffError> {
        self.buf.put_fourcc(tag)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    // Returns the buffer. Fails while any box is still open so a
    // half-written tree can never be read.
    pub fn finish(self) -> Result<ByteBuf, BmffError> {
        if !self.open_boxes.is_empty() {
            return Err(BmffError::UnclosedBox(self.open_boxes.len()));
        }
        Ok(self.buf)
    }
}
