//! Per-instance attribute rows
//!
//! An `InstanceBucket` belongs to one instanced vertex list and stores the
//! per-instance attributes of all its instances. Live rows always occupy
//! `0..count`: deleting an instance moves the last row into the hole, so the
//! whole bucket is drawn with a single instanced call.

use crate::buffer::BackedBuffer;
use crate::config::DomainConfig;
use crate::device::{BufferKind, GraphicsDevice, VertexBinding};
use crate::error::DomainError;
use crate::format::{Attribute, AttributeData};
use crate::stream::{bindings, checked_growth};
use slotmap::{new_key_type, SlotMap};

new_key_type! {
    /// Identity of one instance inside its bucket
    pub struct InstanceId;
}

#[derive(Debug)]
pub(crate) struct InstanceBucket {
    attributes: Vec<Attribute>,
    buffers: Vec<BackedBuffer>,
    capacity: usize,
    max_buffer_size: usize,
    /// Instance to row
    slots: SlotMap<InstanceId, usize>,
    /// Row to instance, `owners.len()` is the live count
    owners: Vec<InstanceId>,
}

impl InstanceBucket {
    pub(crate) fn new(attributes: Vec<Attribute>, config: &DomainConfig) -> Self {
        let capacity = config.initial_instance_capacity;
        let buffers = attributes
            .iter()
            .map(|a| BackedBuffer::new(capacity * a.stride, BufferKind::Vertex, config.usage))
            .collect();
        Self {
            attributes,
            buffers,
            capacity,
            max_buffer_size: config.max_buffer_size,
            slots: SlotMap::with_key(),
            owners: Vec::new(),
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.owners.len()
    }

    pub(crate) fn slot(&self, id: InstanceId) -> Option<usize> {
        self.slots.get(id).copied()
    }

    pub(crate) fn contains(&self, id: InstanceId) -> bool {
        self.slots.contains_key(id)
    }

    fn attribute_index(&self, name: &str) -> Result<usize, DomainError> {
        self.attributes
            .iter()
            .position(|a| a.name == name)
            .ok_or_else(|| DomainError::UnknownAttribute(name.to_string()))
    }

    fn reserve(&mut self, rows: usize) -> Result<(), DomainError> {
        if rows <= self.capacity {
            return Ok(());
        }
        let widest = self.attributes.iter().map(|a| a.stride).max().unwrap_or(0);
        let capacity = checked_growth(self.capacity, rows, widest, self.max_buffer_size)?;
        for (buffer, attribute) in self.buffers.iter_mut().zip(&self.attributes) {
            buffer.resize(capacity * attribute.stride);
        }
        log::debug!("instance bucket grew from {} to {capacity} rows", self.capacity);
        self.capacity = capacity;
        Ok(())
    }

    /// Append a row, zeroed apart from the given attribute values
    pub(crate) fn create(
        &mut self,
        initial: &[(&str, AttributeData<'_>)],
    ) -> Result<InstanceId, DomainError> {
        // Validate everything before the bucket changes
        let mut writes = Vec::with_capacity(initial.len());
        for (name, data) in initial {
            let index = self.attribute_index(name)?;
            data.check(&self.attributes[index], 1)?;
            writes.push((index, *data));
        }

        let row = self.count();
        self.reserve(row + 1)?;
        for (buffer, attribute) in self.buffers.iter_mut().zip(&self.attributes) {
            buffer.bytes_mut(row * attribute.stride, attribute.stride).fill(0);
        }
        for (index, data) in writes {
            let stride = self.attributes[index].stride;
            self.buffers[index].write(row * stride, data.as_bytes());
        }

        let id = self.slots.insert(row);
        self.owners.push(id);
        Ok(id)
    }

    /// Remove an instance, filling its row with the last one
    pub(crate) fn delete(&mut self, id: InstanceId) -> Result<(), DomainError> {
        let row = self.slots.remove(id).ok_or(DomainError::UnknownInstance)?;
        let last = self.owners.len() - 1;
        if row != last {
            for (buffer, attribute) in self.buffers.iter_mut().zip(&self.attributes) {
                let stride = attribute.stride;
                buffer.copy_within(last * stride, row * stride, stride);
            }
            let moved = self.owners[last];
            self.owners[row] = moved;
            if let Some(slot) = self.slots.get_mut(moved) {
                *slot = row;
            }
        }
        self.owners.pop();
        Ok(())
    }

    pub(crate) fn set(
        &mut self,
        id: InstanceId,
        name: &str,
        data: AttributeData<'_>,
    ) -> Result<(), DomainError> {
        let row = self.slot(id).ok_or(DomainError::UnknownInstance)?;
        let index = self.attribute_index(name)?;
        data.check(&self.attributes[index], 1)?;
        let stride = self.attributes[index].stride;
        self.buffers[index].write(row * stride, data.as_bytes());
        Ok(())
    }

    /// Raw bytes of one attribute of one instance
    pub(crate) fn get(&self, id: InstanceId, name: &str) -> Result<(&Attribute, &[u8]), DomainError> {
        let row = self.slot(id).ok_or(DomainError::UnknownInstance)?;
        let index = self.attribute_index(name)?;
        let attribute = &self.attributes[index];
        Ok((attribute, self.buffers[index].read(row * attribute.stride, attribute.stride)))
    }

    pub(crate) fn commit(&mut self, device: &mut dyn GraphicsDevice) -> usize {
        self.buffers
            .iter_mut()
            .map(|buffer| usize::from(buffer.commit(device)))
            .sum()
    }

    pub(crate) fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for buffer in &mut self.buffers {
            buffer.release(device);
        }
    }

    pub(crate) fn bindings(&self) -> Vec<VertexBinding> {
        bindings(&self.attributes, &self.buffers)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::{read_scalars, AttributeSignature};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn bucket(capacity: usize) -> InstanceBucket {
        let signature =
            AttributeSignature::parse(&[("position", "2f"), ("offset", "2fi")]).unwrap();
        let config = DomainConfig::default().with_initial_instance_capacity(capacity);
        InstanceBucket::new(signature.per_instance().cloned().collect(), &config)
    }

    fn offset_of(bucket: &InstanceBucket, id: InstanceId) -> Vec<f32> {
        read_scalars(bucket.get(id, "offset").unwrap().1)
    }

    #[test]
    fn test_delete_middle_compacts() {
        let mut bucket = bucket(4);
        let a = bucket
            .create(&[("offset", AttributeData::from(&[0.0f32, 0.0]))])
            .unwrap();
        let b = bucket
            .create(&[("offset", AttributeData::from(&[1.0f32, 1.0]))])
            .unwrap();
        let c = bucket
            .create(&[("offset", AttributeData::from(&[2.0f32, 2.0]))])
            .unwrap();

        bucket.delete(b).unwrap();
        assert_eq!(bucket.count(), 2);
        assert_eq!(bucket.slot(a), Some(0));
        assert_eq!(bucket.slot(c), Some(1));
        assert_eq!(offset_of(&bucket, c), vec![2.0, 2.0]);
        assert_eq!(bucket.delete(b), Err(DomainError::UnknownInstance));
    }

    #[test]
    fn test_missing_attributes_start_zeroed() {
        let mut bucket = bucket(1);
        let a = bucket
            .create(&[("offset", AttributeData::from(&[5.0f32, 5.0]))])
            .unwrap();
        bucket.delete(a).unwrap();
        let b = bucket.create(&[]).unwrap();
        assert_eq!(offset_of(&bucket, b), vec![0.0, 0.0]);
    }

    #[test]
    fn test_create_validates_before_changing_anything() {
        let mut bucket = bucket(1);
        assert!(matches!(
            bucket.create(&[("missing", AttributeData::from(&[1.0f32]))]),
            Err(DomainError::UnknownAttribute(_))
        ));
        assert!(matches!(
            bucket.create(&[("offset", AttributeData::from(&[1.0f32]))]),
            Err(DomainError::DataLengthMismatch { .. })
        ));
        assert_eq!(bucket.count(), 0);
    }

    #[test]
    fn test_random_create_delete_keeps_rows_dense() {
        let mut rng = StdRng::seed_from_u64(11);
        let mut bucket = bucket(1);
        let mut live: Vec<(InstanceId, f32)> = Vec::new();

        for step in 0..500 {
            if live.is_empty() || rng.random_bool(0.6) {
                let value = step as f32;
                let id = bucket
                    .create(&[("offset", AttributeData::from(&[value, -value]))])
                    .unwrap();
                live.push((id, value));
            } else {
                let (id, _) = live.swap_remove(rng.random_range(0..live.len()));
                bucket.delete(id).unwrap();
            }

            assert_eq!(bucket.count(), live.len());
            let mut rows: Vec<usize> = live.iter().map(|(id, _)| bucket.slot(*id).unwrap()).collect();
            rows.sort_unstable();
            assert_eq!(rows, (0..live.len()).collect::<Vec<_>>());
            for &(id, value) in &live {
                assert_eq!(offset_of(&bucket, id), vec![value, -value]);
            }
        }
    }
}
