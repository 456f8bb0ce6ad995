//! CPU-shadowed device buffers with dirty-range tracking
//!
//! Every write lands in a CPU copy first and widens a single dirty byte range.
//! [`BackedBuffer::commit`] then performs at most one upload, so many small
//! attribute writes between two draws cost one device call.
//!
//! The device buffer is created and resized lazily on commit. Growing the
//! shadow never touches the device; at the next commit the device buffer is
//! resized (which preserves its contents) and only the dirty range is sent.

use crate::device::{BufferHandle, BufferKind, BufferUsage, GraphicsDevice};
use std::ops::Range;

#[derive(Debug)]
pub(crate) struct BackedBuffer {
    kind: BufferKind,
    usage: BufferUsage,
    data: Vec<u8>,
    dirty: Option<Range<usize>>,
    handle: Option<BufferHandle>,
    device_size: usize,
}

impl BackedBuffer {
    pub(crate) fn new(byte_size: usize, kind: BufferKind, usage: BufferUsage) -> Self {
        Self {
            kind,
            usage,
            data: vec![0; byte_size],
            dirty: None,
            handle: None,
            device_size: 0,
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.data.len()
    }

    pub(crate) fn handle(&self) -> Option<BufferHandle> {
        self.handle
    }

    pub(crate) fn dirty_range(&self) -> Option<Range<usize>> {
        self.dirty.clone()
    }

    /// Grow the shadow, keeping existing bytes
    pub(crate) fn resize(&mut self, byte_size: usize) {
        debug_assert!(byte_size >= self.data.len());
        self.data.resize(byte_size, 0);
    }

    pub(crate) fn read(&self, offset: usize, len: usize) -> &[u8] {
        &self.data[offset..offset + len]
    }

    pub(crate) fn write(&mut self, offset: usize, bytes: &[u8]) {
        self.data[offset..offset + bytes.len()].copy_from_slice(bytes);
        self.invalidate(offset..offset + bytes.len());
    }

    /// Mutable view of a byte range, marked dirty up front
    pub(crate) fn bytes_mut(&mut self, offset: usize, len: usize) -> &mut [u8] {
        self.invalidate(offset..offset + len);
        &mut self.data[offset..offset + len]
    }

    /// Copy bytes within this buffer; ranges may overlap
    pub(crate) fn copy_within(&mut self, src: usize, dst: usize, len: usize) {
        if len == 0 || src == dst {
            return;
        }
        self.data.copy_within(src..src + len, dst);
        self.invalidate(dst..dst + len);
    }

    pub(crate) fn invalidate(&mut self, range: Range<usize>) {
        if range.is_empty() {
            return;
        }
        self.dirty = Some(match self.dirty.take() {
            Some(dirty) => dirty.start.min(range.start)..dirty.end.max(range.end),
            None => range,
        });
    }

    /// Send pending changes to the device. Returns whether an upload happened.
    pub(crate) fn commit(&mut self, device: &mut dyn GraphicsDevice) -> bool {
        match self.handle {
            None => {
                if self.data.is_empty() {
                    return false;
                }
                let handle = device.create_buffer(self.data.len(), self.kind, self.usage);
                self.handle = Some(handle);
                self.device_size = self.data.len();
                // A fresh buffer has undefined contents
                self.dirty = Some(0..self.data.len());
            }
            Some(handle) if self.device_size < self.data.len() => {
                device.resize_buffer(handle, self.data.len());
                self.device_size = self.data.len();
            }
            Some(_) => {}
        }

        let Some(dirty) = self.dirty.take() else {
            return false;
        };
        let Some(handle) = self.handle else {
            return false;
        };

        if dirty.len() == self.data.len() {
            device.upload(handle, 0, &self.data);
        } else {
            device.upload(handle, dirty.start, &self.data[dirty]);
        }
        true
    }

    pub(crate) fn release(&mut self, device: &mut dyn GraphicsDevice) {
        if let Some(handle) = self.handle.take() {
            device.destroy_buffer(handle);
        }
        self.device_size = 0;
        self.dirty = Some(0..self.data.len()).filter(|r| !r.is_empty());
    }
}
