//! Attribute and index streams
//!
//! A stream couples an [`Allocator`] with the buffers that hold the slots it
//! hands out. Attribute streams keep one buffer per attribute (non-interleaved),
//! index streams keep a single index buffer. Both grow by doubling when the
//! allocator runs out of space and refuse to grow any buffer past the device's
//! maximum buffer size.

use crate::allocator::{AllocError, Allocator, PendingMove, Reallocation};
use crate::buffer::BackedBuffer;
use crate::config::DomainConfig;
use crate::device::{
    BufferHandle, BufferKind, BufferUsage, GraphicsDevice, IndexType, VertexBinding,
};
use crate::error::DomainError;
use crate::format::{Attribute, AttributeData};

/// Where an allocation landed and whether the stream had to grow for it
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct Placement {
    pub start: usize,
    pub grew: bool,
}

/// Smallest doubling of `capacity` that holds `required` slots, `None` on overflow
pub(crate) fn grown_capacity(capacity: usize, required: usize) -> Option<usize> {
    let mut capacity = capacity.max(1);
    while capacity < required {
        capacity = capacity.checked_mul(2)?;
    }
    Some(capacity)
}

/// Capacity to grow to so `required` slots of `stride` bytes fit, or
/// `AllocationTooLarge` when the widest buffer would pass `max_buffer_size`
pub(crate) fn checked_growth(
    capacity: usize,
    required: usize,
    stride: usize,
    max_buffer_size: usize,
) -> Result<usize, DomainError> {
    let grown = grown_capacity(capacity, required);
    let requested = grown.and_then(|capacity| capacity.checked_mul(stride));
    match (grown, requested) {
        (Some(capacity), Some(requested)) if requested <= max_buffer_size => Ok(capacity),
        _ => {
            let requested = requested.unwrap_or(usize::MAX);
            log::error!(
                "cannot grow to {required} slots of {stride} bytes: {requested} bytes exceeds the limit of {max_buffer_size} bytes"
            );
            Err(DomainError::AllocationTooLarge {
                requested,
                limit: max_buffer_size,
            })
        }
    }
}

/// A region resize that has reserved its new slots but not yet released the old ones
#[must_use = "a reserved resize must be finished or abandoned"]
#[derive(Debug)]
pub(crate) struct PendingResize {
    start: usize,
    old_count: usize,
    new_count: usize,
    moved: Option<PendingMove>,
    /// Whether the stream had to grow to make room
    pub grew: bool,
}

impl PendingResize {
    /// Where the region starts once finished
    pub(crate) fn new_start(&self) -> usize {
        self.moved.as_ref().map_or(self.start, PendingMove::new_start)
    }
}

/// Allocator plus one buffer per stride, grown together
#[derive(Debug)]
struct SlotBuffers {
    allocator: Allocator,
    buffers: Vec<BackedBuffer>,
    strides: Vec<usize>,
    max_buffer_size: usize,
}

impl SlotBuffers {
    fn new(
        capacity: usize,
        strides: Vec<usize>,
        kind: BufferKind,
        usage: BufferUsage,
        max_buffer_size: usize,
    ) -> Self {
        let buffers = strides
            .iter()
            .map(|stride| BackedBuffer::new(capacity * stride, kind, usage))
            .collect();
        Self {
            allocator: Allocator::new(capacity),
            buffers,
            strides,
            max_buffer_size,
        }
    }

    fn grow(&mut self, required: usize) -> Result<(), DomainError> {
        let old_capacity = self.allocator.capacity();
        let widest = self.strides.iter().copied().max().unwrap_or(0);
        let capacity = checked_growth(old_capacity, required, widest, self.max_buffer_size)?;

        for (buffer, stride) in self.buffers.iter_mut().zip(&self.strides) {
            buffer.resize(capacity * stride);
        }
        self.allocator.set_capacity(capacity);
        log::debug!("stream grew from {old_capacity} to {capacity} slots");
        Ok(())
    }

    fn alloc(&mut self, count: usize) -> Result<Placement, DomainError> {
        let mut grew = false;
        loop {
            match self.allocator.alloc(count) {
                Ok(start) => return Ok(Placement { start, grew }),
                Err(AllocError::OutOfSpace { required_capacity }) => {
                    self.grow(required_capacity)?;
                    grew = true;
                }
            }
        }
    }

    /// Reserve room for a resize. The old region stays allocated until the
    /// returned resize is finished or abandoned.
    fn reserve(
        &mut self,
        start: usize,
        old_count: usize,
        new_count: usize,
    ) -> Result<PendingResize, DomainError> {
        let mut resize = PendingResize {
            start,
            old_count,
            new_count,
            moved: None,
            grew: false,
        };
        // Shrinking only releases slots, which happens on finish
        if new_count <= old_count {
            return Ok(resize);
        }
        loop {
            match self.allocator.realloc(start, old_count, new_count) {
                Ok(Reallocation::InPlace { start }) => {
                    resize.start = start;
                    return Ok(resize);
                }
                Ok(Reallocation::Moved(pending)) => {
                    resize.moved = Some(pending);
                    return Ok(resize);
                }
                Err(AllocError::OutOfSpace { required_capacity }) => {
                    self.grow(required_capacity)?;
                    resize.grew = true;
                }
            }
        }
    }

    /// Copy the payload if it moved and release the slots it no longer uses
    fn finish(&mut self, resize: PendingResize) -> usize {
        match resize.moved {
            Some(pending) => {
                self.copy_slots(pending.old_start(), pending.new_start(), pending.copy_count());
                self.allocator.complete_move(pending)
            }
            None => {
                if resize.new_count < resize.old_count {
                    self.allocator.dealloc(
                        resize.start + resize.new_count,
                        resize.old_count - resize.new_count,
                    );
                }
                resize.start
            }
        }
    }

    /// Give back whatever `reserve` took, leaving the old region as it was
    fn abandon(&mut self, resize: PendingResize) {
        match resize.moved {
            Some(pending) => {
                self.allocator.cancel_move(pending);
            }
            None if resize.new_count > resize.old_count => {
                self.allocator.dealloc(
                    resize.start + resize.old_count,
                    resize.new_count - resize.old_count,
                );
            }
            None => {}
        }
    }

    fn copy_slots(&mut self, src: usize, dst: usize, count: usize) {
        for (buffer, stride) in self.buffers.iter_mut().zip(&self.strides) {
            buffer.copy_within(src * stride, dst * stride, count * stride);
        }
    }

    fn commit(&mut self, device: &mut dyn GraphicsDevice) -> usize {
        self.buffers
            .iter_mut()
            .map(|buffer| usize::from(buffer.commit(device)))
            .sum()
    }

    fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for buffer in &mut self.buffers {
            buffer.release(device);
        }
    }
}

/// Per-vertex attribute storage of a domain
#[derive(Debug)]
pub(crate) struct AttributeStream {
    slots: SlotBuffers,
    attributes: Vec<Attribute>,
}

impl AttributeStream {
    pub(crate) fn new(attributes: Vec<Attribute>, config: &DomainConfig) -> Self {
        let strides = attributes.iter().map(|a| a.stride).collect();
        Self {
            slots: SlotBuffers::new(
                config.initial_capacity,
                strides,
                BufferKind::Vertex,
                config.usage,
                config.max_buffer_size,
            ),
            attributes,
        }
    }

    pub(crate) fn attributes(&self) -> &[Attribute] {
        &self.attributes
    }

    pub(crate) fn index_of(&self, name: &str) -> Result<usize, DomainError> {
        self.attributes
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| DomainError::UnknownAttribute(name.to_string()))
    }

    pub(crate) fn capacity(&self) -> usize {
        self.slots.allocator.capacity()
    }

    pub(crate) fn allocator(&self) -> &Allocator {
        &self.slots.allocator
    }

    pub(crate) fn alloc(&mut self, count: usize) -> Result<Placement, DomainError> {
        self.slots.alloc(count)
    }

    pub(crate) fn reserve(
        &mut self,
        start: usize,
        old_count: usize,
        new_count: usize,
    ) -> Result<PendingResize, DomainError> {
        self.slots.reserve(start, old_count, new_count)
    }

    pub(crate) fn finish(&mut self, resize: PendingResize) -> usize {
        self.slots.finish(resize)
    }

    pub(crate) fn abandon(&mut self, resize: PendingResize) {
        self.slots.abandon(resize)
    }

    pub(crate) fn dealloc(&mut self, start: usize, count: usize) {
        self.slots.allocator.dealloc(start, count);
    }

    /// Write `count` elements of one attribute starting at slot `start`
    pub(crate) fn set_region(
        &mut self,
        attribute: usize,
        start: usize,
        count: usize,
        data: AttributeData<'_>,
    ) -> Result<(), DomainError> {
        data.check(&self.attributes[attribute], count)?;
        let stride = self.attributes[attribute].stride;
        self.slots.buffers[attribute].write(start * stride, data.as_bytes());
        Ok(())
    }

    pub(crate) fn get_region(&self, attribute: usize, start: usize, count: usize) -> &[u8] {
        let stride = self.attributes[attribute].stride;
        self.slots.buffers[attribute].read(start * stride, count * stride)
    }

    /// Mutable bytes of a region, marked dirty for the next commit
    pub(crate) fn region_mut(&mut self, attribute: usize, start: usize, count: usize) -> &mut [u8] {
        let stride = self.attributes[attribute].stride;
        self.slots.buffers[attribute].bytes_mut(start * stride, count * stride)
    }

    /// Copy a region into another stream, matching attributes by name
    pub(crate) fn copy_to(
        &self,
        src_start: usize,
        dst: &mut AttributeStream,
        dst_start: usize,
        count: usize,
    ) -> Result<(), DomainError> {
        for (index, attribute) in self.attributes.iter().enumerate() {
            let target = dst.index_of(&attribute.name)?;
            let bytes = self.get_region(index, src_start, count);
            dst.region_mut(target, dst_start, count).copy_from_slice(bytes);
        }
        Ok(())
    }

    pub(crate) fn commit(&mut self, device: &mut dyn GraphicsDevice) -> usize {
        self.slots.commit(device)
    }

    pub(crate) fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.slots.release(device);
    }

    /// Vertex bindings of the committed buffers
    pub(crate) fn bindings(&self) -> Vec<VertexBinding> {
        bindings(&self.attributes, &self.slots.buffers)
    }
}

pub(crate) fn bindings(attributes: &[Attribute], buffers: &[BackedBuffer]) -> Vec<VertexBinding> {
    attributes
        .iter()
        .zip(buffers)
        .filter_map(|(attribute, buffer)| {
            Some(VertexBinding {
                buffer: buffer.handle()?,
                name: attribute.name.clone(),
                location: attribute.location,
                format: attribute.format,
                stride: attribute.stride,
                offset: attribute.offset,
            })
        })
        .collect()
}

/// Index storage of an indexed domain
#[derive(Debug)]
pub(crate) struct IndexStream {
    slots: SlotBuffers,
    index_type: IndexType,
}

impl IndexStream {
    pub(crate) fn new(config: &DomainConfig) -> Self {
        Self {
            slots: SlotBuffers::new(
                config.initial_index_capacity,
                vec![config.index_type.size()],
                BufferKind::Index,
                config.usage,
                config.max_buffer_size,
            ),
            index_type: config.index_type,
        }
    }

    pub(crate) fn index_type(&self) -> IndexType {
        self.index_type
    }

    pub(crate) fn allocator(&self) -> &Allocator {
        &self.slots.allocator
    }

    pub(crate) fn alloc(&mut self, count: usize) -> Result<Placement, DomainError> {
        self.slots.alloc(count)
    }

    pub(crate) fn reserve(
        &mut self,
        start: usize,
        old_count: usize,
        new_count: usize,
    ) -> Result<PendingResize, DomainError> {
        self.slots.reserve(start, old_count, new_count)
    }

    pub(crate) fn finish(&mut self, resize: PendingResize) -> usize {
        self.slots.finish(resize)
    }

    pub(crate) fn abandon(&mut self, resize: PendingResize) {
        self.slots.abandon(resize)
    }

    pub(crate) fn dealloc(&mut self, start: usize, count: usize) {
        self.slots.allocator.dealloc(start, count);
    }

    /// Check that every value fits the index type before anything is written
    pub(crate) fn check(&self, values: impl IntoIterator<Item = u64>) -> Result<(), DomainError> {
        let max = self.index_type.max_value();
        match values.into_iter().find(|&v| v > max) {
            Some(index) => Err(DomainError::IndexOverflow {
                index,
                index_type: self.index_type,
            }),
            None => Ok(()),
        }
    }

    /// Store already validated values starting at slot `start`
    pub(crate) fn write(&mut self, start: usize, values: &[u32]) {
        let size = self.index_type.size();
        let bytes = self.slots.buffers[0].bytes_mut(start * size, values.len() * size);
        for (chunk, &value) in bytes.chunks_exact_mut(size).zip(values) {
            self.index_type.encode(value, chunk);
        }
    }

    pub(crate) fn read(&self, start: usize, count: usize) -> Vec<u32> {
        let size = self.index_type.size();
        self.slots.buffers[0]
            .read(start * size, count * size)
            .chunks_exact(size)
            .map(|chunk| self.index_type.decode(chunk))
            .collect()
    }

    pub(crate) fn handle(&self) -> Option<BufferHandle> {
        self.slots.buffers[0].handle()
    }

    pub(crate) fn commit(&mut self, device: &mut dyn GraphicsDevice) -> usize {
        self.slots.commit(device)
    }

    pub(crate) fn release(&mut self, device: &mut dyn GraphicsDevice) {
        self.slots.release(device);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::AttributeSignature;
    use crate::recording::RecordingDevice;

    fn stream(capacity: usize) -> AttributeStream {
        let signature =
            AttributeSignature::parse(&[("position", "2f"), ("colors", "4Bn")]).unwrap();
        let config = DomainConfig::default().with_initial_capacity(capacity);
        AttributeStream::new(signature.iter().cloned().collect(), &config)
    }

    #[test]
    fn test_grown_capacity_doubles() {
        assert_eq!(grown_capacity(4, 5), Some(8));
        assert_eq!(grown_capacity(4, 33), Some(64));
        assert_eq!(grown_capacity(0, 3), Some(4));
        assert_eq!(grown_capacity(16, 2), Some(16));
        assert_eq!(grown_capacity(4, usize::MAX), None);
    }

    #[test]
    fn test_set_then_get_region() {
        let mut stream = stream(8);
        let start = stream.alloc(2).unwrap().start;
        stream
            .set_region(0, start, 2, AttributeData::from(&[1.0f32, 2.0, 3.0, 4.0]))
            .unwrap();
        assert_eq!(
            crate::format::read_scalars::<f32>(stream.get_region(0, start, 2)),
            vec![1.0, 2.0, 3.0, 4.0]
        );
    }

    #[test]
    fn test_set_region_rejects_wrong_length() {
        let mut stream = stream(8);
        let start = stream.alloc(2).unwrap().start;
        assert!(matches!(
            stream.set_region(0, start, 2, AttributeData::from(&[1.0f32, 2.0, 3.0])),
            Err(DomainError::DataLengthMismatch {
                expected: 4,
                actual: 3,
                ..
            })
        ));
    }

    #[test]
    fn test_growth_preserves_existing_values() {
        let mut stream = stream(2);
        let first = stream.alloc(2).unwrap();
        assert!(!first.grew);
        stream
            .set_region(1, first.start, 2, AttributeData::from(&[1u8, 2, 3, 4, 5, 6, 7, 8]))
            .unwrap();

        let second = stream.alloc(5).unwrap();
        assert!(second.grew);
        assert_eq!(stream.capacity(), 8);
        assert_eq!(stream.get_region(1, first.start, 2), &[1, 2, 3, 4, 5, 6, 7, 8]);
    }

    #[test]
    fn test_growth_beyond_limit_fails() {
        let signature = AttributeSignature::parse(&[("position", "4f")]).unwrap();
        let config = DomainConfig::default()
            .with_initial_capacity(4)
            .with_max_buffer_size(128);
        let mut stream = AttributeStream::new(signature.iter().cloned().collect(), &config);
        stream.alloc(8).unwrap();
        assert_eq!(
            stream.alloc(1),
            Err(DomainError::AllocationTooLarge {
                requested: 256,
                limit: 128
            })
        );
    }

    #[test]
    fn test_finished_move_copies_payload() {
        let mut stream = stream(8);
        let a = stream.alloc(2).unwrap().start;
        let _b = stream.alloc(2).unwrap().start;
        stream
            .set_region(0, a, 2, AttributeData::from(&[1.0f32, 2.0, 3.0, 4.0]))
            .unwrap();

        let resize = stream.reserve(a, 2, 3).unwrap();
        assert_eq!(resize.new_start(), 4);
        // Both regions are held until the move is finished
        assert_eq!(stream.allocator().get_allocated_regions(), vec![(0, 7)]);

        let start = stream.finish(resize);
        assert_eq!(start, 4);
        assert_eq!(
            crate::format::read_scalars::<f32>(stream.get_region(0, start, 2)),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert_eq!(stream.allocator().get_allocated_regions(), vec![(2, 5)]);
    }

    #[test]
    fn test_abandoned_resize_restores_regions() {
        let mut stream = stream(8);
        let a = stream.alloc(2).unwrap().start;
        let b = stream.alloc(2).unwrap().start;

        let moved = stream.reserve(a, 2, 3).unwrap();
        stream.abandon(moved);
        assert_eq!(stream.allocator().get_allocated_regions(), vec![(0, 4)]);

        let in_place = stream.reserve(b, 2, 4).unwrap();
        assert_eq!(in_place.new_start(), b);
        stream.abandon(in_place);
        assert_eq!(stream.allocator().get_allocated_regions(), vec![(0, 4)]);

        let shrink = stream.reserve(b, 2, 1).unwrap();
        assert_eq!(stream.allocator().get_allocated_regions(), vec![(0, 4)]);
        assert_eq!(stream.finish(shrink), b);
        assert_eq!(stream.allocator().get_allocated_regions(), vec![(0, 3)]);
    }

    #[test]
    fn test_huge_request_fails_instead_of_overflowing() {
        let mut stream = stream(8);
        assert!(matches!(
            stream.alloc(1usize << 61),
            Err(DomainError::AllocationTooLarge {
                requested: usize::MAX,
                ..
            })
        ));
        assert!(matches!(
            stream.alloc(usize::MAX),
            Err(DomainError::AllocationTooLarge { .. })
        ));
        assert_eq!(stream.capacity(), 8);
    }

    #[test]
    fn test_commit_uploads_once_per_buffer() {
        let mut device = RecordingDevice::default();
        let mut stream = stream(8);
        let start = stream.alloc(4).unwrap().start;
        for i in 0..4 {
            stream
                .set_region(0, start + i, 1, AttributeData::from(&[i as f32, 0.0]))
                .unwrap();
        }
        assert_eq!(stream.commit(&mut device), 2);
        assert_eq!(stream.commit(&mut device), 0);
        assert_eq!(stream.bindings().len(), 2);
    }

    #[test]
    fn test_index_stream_checks_and_round_trips() {
        let config = DomainConfig::default().with_index_type(IndexType::U8);
        let mut indices = IndexStream::new(&config);
        let start = indices.alloc(3).unwrap().start;
        assert!(indices.check([0, 1, 300]).is_err());
        indices.check([0, 1, 2]).unwrap();
        indices.write(start, &[0, 1, 2]);
        assert_eq!(indices.read(start, 3), vec![0, 1, 2]);
    }
}
