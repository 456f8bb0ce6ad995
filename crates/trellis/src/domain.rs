//! Vertex domains
//!
//! A domain owns the buffers for one attribute signature and hands out
//! vertex lists inside them. Every list belongs to a [`Group`]; the lists of
//! one group form that group's bucket, which is what a batch draws under the
//! group's state.
//!
//! Domains are shared: a [`Domain`] is a cheap handle around the actual
//! [`VertexDomain`], and every [`VertexList`] keeps its domain alive.
//!
//! Device work is deferred. Creating, writing and resizing lists only touches
//! CPU shadows; [`Domain::commit`] (called by every draw) creates or grows the
//! device buffers and uploads what changed.

use crate::config::DomainConfig;
use crate::device::{DrawMode, GraphicsDevice, VertexLayout};
use crate::error::DomainError;
use crate::format::{Attribute, AttributeData, AttributeSignature};
use crate::group::Group;
use crate::instance::InstanceBucket;
use crate::stream::{AttributeStream, IndexStream, Placement};
use crate::vertex_list::{AttributeRegion, VertexList};
use slotmap::{new_key_type, SlotMap};
use std::cell::{Ref, RefCell, RefMut};
use std::collections::HashMap;
use std::rc::Rc;

new_key_type! {
    /// Identity of a vertex list inside its domain
    pub struct ListId;
}

/// Which extensions a domain carries on top of its vertex stream
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum DomainKind {
    Plain,
    Indexed,
    Instanced,
    InstancedIndexed,
}

impl DomainKind {
    pub const fn new(indexed: bool, instanced: bool) -> Self {
        match (indexed, instanced) {
            (false, false) => DomainKind::Plain,
            (true, false) => DomainKind::Indexed,
            (false, true) => DomainKind::Instanced,
            (true, true) => DomainKind::InstancedIndexed,
        }
    }

    pub const fn is_indexed(self) -> bool {
        matches!(self, DomainKind::Indexed | DomainKind::InstancedIndexed)
    }

    pub const fn is_instanced(self) -> bool {
        matches!(self, DomainKind::Instanced | DomainKind::InstancedIndexed)
    }
}

#[derive(Debug)]
pub(crate) struct ListEntry {
    pub(crate) group: Group,
    pub(crate) start: usize,
    pub(crate) count: usize,
    pub(crate) index_start: usize,
    pub(crate) index_count: usize,
    pub(crate) instances: Option<Rc<RefCell<InstanceBucket>>>,
}

#[derive(Debug)]
struct GroupBucket {
    seq: u64,
    lists: Vec<ListId>,
}

/// Storage for one attribute signature
#[derive(Debug)]
pub struct VertexDomain {
    kind: DomainKind,
    signature: AttributeSignature,
    config: DomainConfig,
    vertices: AttributeStream,
    indices: Option<IndexStream>,
    lists: SlotMap<ListId, ListEntry>,
    buckets: HashMap<Group, GroupBucket>,
    next_bucket_seq: u64,
    /// Instance buckets of deleted lists, destroyed at the next commit
    retired: Vec<Rc<RefCell<InstanceBucket>>>,
    version: u64,
    topology: u64,
    failed: bool,
}

impl VertexDomain {
    fn new(signature: AttributeSignature, kind: DomainKind, config: DomainConfig) -> Self {
        let vertices = AttributeStream::new(signature.per_vertex().cloned().collect(), &config);
        let indices = kind.is_indexed().then(|| IndexStream::new(&config));
        Self {
            kind,
            signature,
            config,
            vertices,
            indices,
            lists: SlotMap::with_key(),
            buckets: HashMap::new(),
            next_bucket_seq: 0,
            retired: Vec::new(),
            version: 0,
            topology: 0,
            failed: false,
        }
    }

    fn ensure_usable(&self) -> Result<(), DomainError> {
        if self.failed {
            Err(DomainError::DomainFailed)
        } else {
            Ok(())
        }
    }

    /// Mark the domain unusable when growth hit the buffer size limit
    pub(crate) fn guard<T>(&mut self, result: Result<T, DomainError>) -> Result<T, DomainError> {
        if let Err(DomainError::AllocationTooLarge { .. }) = &result {
            self.failed = true;
        }
        result
    }

    fn note_growth(&mut self, placement: Placement) -> usize {
        if placement.grew {
            self.version += 1;
        }
        placement.start
    }

    fn entry(&self, id: ListId) -> Result<&ListEntry, DomainError> {
        // Handles remove themselves on drop, so a live handle always has an entry
        self.lists.get(id).ok_or(DomainError::DomainFailed)
    }

    fn indices_mut(&mut self) -> Result<&mut IndexStream, DomainError> {
        self.indices.as_mut().ok_or(DomainError::NotIndexed)
    }

    /// Index values as stored: local, or shifted by the list start
    fn stored_indices(&self, local: &[u32], start: usize) -> Vec<u64> {
        let base = if self.config.base_vertex { 0 } else { start as u64 };
        local.iter().map(|&i| u64::from(i) + base).collect()
    }

    fn check_local_indices(local: &[u32], count: usize) -> Result<(), DomainError> {
        match local.iter().find(|&&i| i as usize >= count) {
            Some(&index) => Err(DomainError::IndexOutOfRange { index, count }),
            None => Ok(()),
        }
    }

    fn add_to_bucket(&mut self, group: &Group, id: ListId) {
        if let Some(bucket) = self.buckets.get_mut(group) {
            bucket.lists.push(id);
            return;
        }
        self.next_bucket_seq += 1;
        self.buckets.insert(
            group.clone(),
            GroupBucket {
                seq: self.next_bucket_seq,
                lists: vec![id],
            },
        );
        self.topology += 1;
    }

    fn remove_from_bucket(&mut self, group: &Group, id: ListId) {
        let Some(bucket) = self.buckets.get_mut(group) else {
            return;
        };
        bucket.lists.retain(|&l| l != id);
        if bucket.lists.is_empty() {
            self.buckets.remove(group);
            self.topology += 1;
        }
    }

    pub(crate) fn create_list(
        &mut self,
        group: &Group,
        count: usize,
        indices: Option<&[u32]>,
    ) -> Result<ListId, DomainError> {
        self.ensure_usable()?;
        if indices.is_some() && !self.kind.is_indexed() {
            return Err(DomainError::NotIndexed);
        }
        let local = indices.unwrap_or(&[]);
        Self::check_local_indices(local, count)?;

        let placement = self.vertices.alloc(count);
        let start = self.guard(placement).map(|p| self.note_growth(p))?;

        let mut index_start = 0;
        if let Some(index_stream) = self.indices.as_mut() {
            let placement = index_stream.alloc(local.len());
            match self.guard(placement) {
                Ok(placement) => index_start = self.note_growth(placement),
                Err(err) => {
                    self.vertices.dealloc(start, count);
                    return Err(err);
                }
            }

            let stored = self.stored_indices(local, start);
            let index_stream = self.indices_mut()?;
            if let Err(err) = index_stream.check(stored.iter().copied()) {
                index_stream.dealloc(index_start, local.len());
                self.vertices.dealloc(start, count);
                return Err(err);
            }
            let stored: Vec<u32> = stored.into_iter().map(|i| i as u32).collect();
            index_stream.write(index_start, &stored);
        }

        let instances = self.kind.is_instanced().then(|| {
            Rc::new(RefCell::new(InstanceBucket::new(
                self.signature.per_instance().cloned().collect(),
                &self.config,
            )))
        });

        let id = self.lists.insert(ListEntry {
            group: group.clone(),
            start,
            count,
            index_start,
            index_count: local.len(),
            instances,
        });
        self.add_to_bucket(group, id);
        Ok(id)
    }

    /// Remove a list, returning its entry. Its slots are free afterwards.
    pub(crate) fn detach_list(&mut self, id: ListId) -> Option<ListEntry> {
        let entry = self.lists.remove(id)?;
        self.vertices.dealloc(entry.start, entry.count);
        if let Some(indices) = self.indices.as_mut() {
            indices.dealloc(entry.index_start, entry.index_count);
        }
        self.remove_from_bucket(&entry.group, id);
        Some(entry)
    }

    pub(crate) fn delete_list(&mut self, id: ListId) {
        if let Some(entry) = self.detach_list(id) {
            self.retired.extend(entry.instances);
        }
    }

    pub(crate) fn list_region(&self, id: ListId) -> Result<(usize, usize, usize, usize), DomainError> {
        let entry = self.entry(id)?;
        Ok((entry.start, entry.count, entry.index_start, entry.index_count))
    }

    pub(crate) fn list_group(&self, id: ListId) -> Result<Group, DomainError> {
        Ok(self.entry(id)?.group.clone())
    }

    pub(crate) fn set_group(&mut self, id: ListId, group: &Group) -> Result<(), DomainError> {
        let old = self.entry(id)?.group.clone();
        if &old == group {
            return Ok(());
        }
        self.remove_from_bucket(&old, id);
        self.add_to_bucket(group, id);
        if let Some(entry) = self.lists.get_mut(id) {
            entry.group = group.clone();
        }
        Ok(())
    }

    pub(crate) fn instance_bucket(
        &self,
        id: ListId,
    ) -> Result<Rc<RefCell<InstanceBucket>>, DomainError> {
        self.entry(id)?
            .instances
            .clone()
            .ok_or(DomainError::NotInstanced)
    }

    pub(crate) fn set_attribute_data(
        &mut self,
        id: ListId,
        name: &str,
        data: AttributeData<'_>,
    ) -> Result<(), DomainError> {
        self.ensure_usable()?;
        let (start, count) = {
            let entry = self.entry(id)?;
            (entry.start, entry.count)
        };
        let attribute = self.vertices.index_of(name)?;
        self.vertices.set_region(attribute, start, count, data)
    }

    pub(crate) fn get_attribute(&self, id: ListId, name: &str) -> Result<(&Attribute, &[u8]), DomainError> {
        let entry = self.entry(id)?;
        let index = self.vertices.index_of(name)?;
        Ok((
            &self.vertices.attributes()[index],
            self.vertices.get_region(index, entry.start, entry.count),
        ))
    }

    pub(crate) fn attribute_region(&self, id: ListId, name: &str) -> Result<AttributeRegion, DomainError> {
        let entry = self.entry(id)?;
        let attribute = self.vertices.index_of(name)?;
        Ok(AttributeRegion {
            name: name.to_string(),
            attribute,
            list: id,
            start: entry.start,
            count: entry.count,
            version: self.version,
        })
    }

    fn check_region(&self, region: &AttributeRegion) -> Result<(), DomainError> {
        let current = self.lists.get(region.list);
        let fresh = region.version == self.version
            && current.is_some_and(|e| e.start == region.start && e.count == region.count);
        if fresh {
            Ok(())
        } else {
            Err(DomainError::StaleHandle {
                cached: region.version,
                current: self.version,
            })
        }
    }

    pub(crate) fn write_region(
        &mut self,
        region: &AttributeRegion,
        data: AttributeData<'_>,
    ) -> Result<(), DomainError> {
        self.ensure_usable()?;
        self.check_region(region)?;
        self.vertices
            .set_region(region.attribute, region.start, region.count, data)
    }

    pub(crate) fn read_region(&self, region: &AttributeRegion) -> Result<(&Attribute, &[u8]), DomainError> {
        self.check_region(region)?;
        Ok((
            &self.vertices.attributes()[region.attribute],
            self.vertices
                .get_region(region.attribute, region.start, region.count),
        ))
    }

    /// Local indices of an indexed list
    pub(crate) fn indices(&self, id: ListId) -> Result<Vec<u32>, DomainError> {
        let entry = self.entry(id)?;
        let stream = self.indices.as_ref().ok_or(DomainError::NotIndexed)?;
        let stored = stream.read(entry.index_start, entry.index_count);
        if self.config.base_vertex {
            return Ok(stored);
        }
        let base = entry.start as u32;
        Ok(stored.into_iter().map(|i| i.wrapping_sub(base)).collect())
    }

    pub(crate) fn set_indices(&mut self, id: ListId, local: &[u32]) -> Result<(), DomainError> {
        self.ensure_usable()?;
        let (start, count, index_start, index_count) = self.list_region(id)?;
        if self.indices.is_none() {
            return Err(DomainError::NotIndexed);
        }
        if local.len() != index_count {
            return Err(DomainError::DataLengthMismatch {
                name: "indices".to_string(),
                expected: index_count,
                actual: local.len(),
            });
        }
        Self::check_local_indices(local, count)?;
        let stored = self.stored_indices(local, start);
        let stream = self.indices_mut()?;
        stream.check(stored.iter().copied())?;
        let stored: Vec<u32> = stored.into_iter().map(|i| i as u32).collect();
        stream.write(index_start, &stored);
        Ok(())
    }

    /// Resize a list's vertex region and, for indexed domains, its index region.
    ///
    /// Values carry over index for index; new slots start zeroed. New index
    /// slots point at the list's first vertex.
    pub(crate) fn resize(
        &mut self,
        id: ListId,
        count: usize,
        index_count: Option<usize>,
    ) -> Result<(), DomainError> {
        self.ensure_usable()?;
        if index_count.is_some() && self.indices.is_none() {
            return Err(DomainError::NotIndexed);
        }
        let (start, old_count, index_start, old_index_count) = self.list_region(id)?;

        // Reserve both regions and validate everything before either move is
        // finished, so a failure leaves the list where it was
        let vertex_resize = self.vertices.reserve(start, old_count, count);
        let vertex_resize = self.guard(vertex_resize)?;
        if vertex_resize.grew {
            self.version += 1;
        }
        let new_start = vertex_resize.new_start();

        let mut shifted = None;
        if new_start != start && !self.config.base_vertex {
            if let Some(stream) = self.indices.as_ref() {
                let values: Vec<u64> = stream
                    .read(index_start, old_index_count)
                    .into_iter()
                    .map(|i| u64::from(i) - start as u64 + new_start as u64)
                    .collect();
                if let Err(err) = stream.check(values.iter().copied()) {
                    self.vertices.abandon(vertex_resize);
                    return Err(err);
                }
                shifted = Some(values.into_iter().map(|i| i as u32).collect::<Vec<u32>>());
            }
        }

        let mut index_resize = None;
        if let Some(index_count) = index_count {
            let reserved = match self.indices.as_mut() {
                Some(stream) => stream.reserve(index_start, old_index_count, index_count),
                None => Err(DomainError::NotIndexed),
            };
            match self.guard(reserved) {
                Ok(resize) => {
                    if resize.grew {
                        self.version += 1;
                    }
                    index_resize = Some((resize, index_count));
                }
                Err(err) => {
                    self.vertices.abandon(vertex_resize);
                    return Err(err);
                }
            }
        }

        let new_start = self.vertices.finish(vertex_resize);
        let mut new_index_start = index_start;
        let mut new_index_count = old_index_count;
        if let Some(stream) = self.indices.as_mut() {
            // Rewrite in the old region; finishing the index move carries it over
            if let Some(shifted) = &shifted {
                stream.write(index_start, shifted);
            }
            if let Some((resize, index_count)) = index_resize {
                new_index_start = stream.finish(resize);
                new_index_count = index_count;
                if index_count > old_index_count {
                    let fill = if self.config.base_vertex { 0 } else { new_start as u32 };
                    let tail = vec![fill; index_count - old_index_count];
                    stream.write(new_index_start + old_index_count, &tail);
                }
            }
        }

        if count > old_count {
            for attribute in 0..self.vertices.attributes().len() {
                self.vertices
                    .region_mut(attribute, new_start + old_count, count - old_count)
                    .fill(0);
            }
        }

        if let Some(entry) = self.lists.get_mut(id) {
            entry.start = new_start;
            entry.count = count;
            entry.index_start = new_index_start;
            entry.index_count = new_index_count;
        }
        Ok(())
    }

    /// Place a copy of a list from `source` in this domain under `group`
    pub(crate) fn adopt(
        &mut self,
        source: &VertexDomain,
        id: ListId,
        group: &Group,
    ) -> Result<ListId, DomainError> {
        self.ensure_usable()?;
        if self.kind != source.kind || !self.signature.is_compatible(&source.signature) {
            return Err(DomainError::IncompatibleDomain {
                source_names: source.signature.names(),
                target_names: self.signature.names(),
            });
        }
        let entry = source.entry(id)?;
        let local = if source.kind.is_indexed() {
            source.indices(id)?
        } else {
            Vec::new()
        };

        let placement = self.vertices.alloc(entry.count);
        let start = self.guard(placement).map(|p| self.note_growth(p))?;
        let mut index_start = 0;
        if let Some(stream) = self.indices.as_mut() {
            let placement = stream.alloc(local.len());
            match self.guard(placement) {
                Ok(placement) => index_start = self.note_growth(placement),
                Err(err) => {
                    self.vertices.dealloc(start, entry.count);
                    return Err(err);
                }
            }
            let stored = self.stored_indices(&local, start);
            let stream = self.indices_mut()?;
            if let Err(err) = stream.check(stored.iter().copied()) {
                stream.dealloc(index_start, local.len());
                self.vertices.dealloc(start, entry.count);
                return Err(err);
            }
            let stored: Vec<u32> = stored.into_iter().map(|i| i as u32).collect();
            stream.write(index_start, &stored);
        }

        source
            .vertices
            .copy_to(entry.start, &mut self.vertices, start, entry.count)?;

        let new_id = self.lists.insert(ListEntry {
            group: group.clone(),
            start,
            count: entry.count,
            index_start,
            index_count: local.len(),
            instances: entry.instances.clone(),
        });
        self.add_to_bucket(group, new_id);
        Ok(new_id)
    }

    /// Groups that currently hold lists, in the order their buckets appeared
    pub(crate) fn groups(&self) -> Vec<Group> {
        let mut groups: Vec<(&Group, u64)> = self
            .buckets
            .iter()
            .map(|(group, bucket)| (group, bucket.seq))
            .collect();
        groups.sort_by_key(|&(_, seq)| seq);
        groups.into_iter().map(|(group, _)| group.clone()).collect()
    }

    pub(crate) fn has_bucket(&self, group: &Group) -> bool {
        self.buckets.contains_key(group)
    }

    fn layout(&self, bucket: Option<&InstanceBucket>) -> VertexLayout {
        let mut bindings = self.vertices.bindings();
        if let Some(bucket) = bucket {
            bindings.extend(bucket.bindings());
        }
        let index = self.indices.as_ref().and_then(|stream| {
            stream
                .handle()
                .map(|handle| (handle, stream.index_type()))
        });
        VertexLayout { bindings, index }
    }

    pub(crate) fn commit(&mut self, device: &mut dyn GraphicsDevice) -> usize {
        for bucket in self.retired.drain(..) {
            bucket.borrow_mut().release(device);
        }
        let mut uploads = self.vertices.commit(device);
        if let Some(indices) = self.indices.as_mut() {
            uploads += indices.commit(device);
        }
        for entry in self.lists.values() {
            if let Some(bucket) = &entry.instances {
                uploads += bucket.borrow_mut().commit(device);
            }
        }
        uploads
    }

    pub(crate) fn release(&mut self, device: &mut dyn GraphicsDevice) {
        for bucket in self.retired.drain(..) {
            bucket.borrow_mut().release(device);
        }
        self.vertices.release(device);
        if let Some(indices) = self.indices.as_mut() {
            indices.release(device);
        }
        for entry in self.lists.values() {
            if let Some(bucket) = &entry.instances {
                bucket.borrow_mut().release(device);
            }
        }
    }

    pub(crate) fn bind(&self, device: &mut dyn GraphicsDevice) {
        if !self.kind.is_instanced() {
            device.bind_vertex_layout(&self.layout(None));
        }
    }

    /// Draw lists in the given order. Adjacent ranges are coalesced.
    ///
    /// Non-instanced domains expect their layout to be bound already;
    /// instanced domains bind a layout per list.
    fn submit(&self, device: &mut dyn GraphicsDevice, mode: DrawMode, entries: &[&ListEntry]) {
        if self.kind.is_instanced() {
            for entry in entries {
                self.submit_instanced(device, mode, entry);
            }
            return;
        }

        if self.kind.is_indexed() {
            let mut ranges: Vec<(u32, u32, i32)> = Vec::new();
            for entry in entries.iter().filter(|e| e.index_count > 0) {
                let base = if self.config.base_vertex { entry.start as i32 } else { 0 };
                let (start, count) = (entry.index_start as u32, entry.index_count as u32);
                match ranges.last_mut() {
                    Some(last) if last.0 + last.1 == start && last.2 == base => last.1 += count,
                    _ => ranges.push((start, count, base)),
                }
            }
            self.draw_index_ranges(device, mode, &ranges);
        } else {
            let mut ranges: Vec<(u32, u32)> = Vec::new();
            for entry in entries.iter().filter(|e| e.count > 0) {
                let (start, count) = (entry.start as u32, entry.count as u32);
                match ranges.last_mut() {
                    Some(last) if last.0 + last.1 == start => last.1 += count,
                    _ => ranges.push((start, count)),
                }
            }
            self.draw_vertex_ranges(device, mode, &ranges);
        }
    }

    fn submit_instanced(&self, device: &mut dyn GraphicsDevice, mode: DrawMode, entry: &ListEntry) {
        let Some(bucket) = &entry.instances else {
            return;
        };
        let bucket = bucket.borrow();
        let instance_count = bucket.count() as u32;
        if instance_count == 0 {
            return;
        }
        device.bind_vertex_layout(&self.layout(Some(&bucket)));
        if self.kind.is_indexed() {
            if entry.index_count == 0 {
                return;
            }
            let base = if self.config.base_vertex { entry.start as i32 } else { 0 };
            device.draw_indexed_instanced(
                mode,
                entry.index_start as u32,
                entry.index_count as u32,
                base,
                instance_count,
            );
        } else if entry.count > 0 {
            device.draw_instanced(mode, entry.start as u32, entry.count as u32, instance_count);
        }
    }

    fn draw_vertex_ranges(&self, device: &mut dyn GraphicsDevice, mode: DrawMode, ranges: &[(u32, u32)]) {
        match ranges {
            [] => {}
            [(start, count)] => device.draw(mode, *start, *count),
            _ if self.config.multi_draw => {
                let (starts, counts): (Vec<u32>, Vec<u32>) = ranges.iter().copied().unzip();
                device.draw_multi(mode, &starts, &counts);
            }
            _ => {
                for &(start, count) in ranges {
                    device.draw(mode, start, count);
                }
            }
        }
    }

    fn draw_index_ranges(
        &self,
        device: &mut dyn GraphicsDevice,
        mode: DrawMode,
        ranges: &[(u32, u32, i32)],
    ) {
        match ranges {
            [] => {}
            [(start, count, base)] => device.draw_indexed(mode, *start, *count, *base),
            _ if self.config.multi_draw => {
                let starts: Vec<u32> = ranges.iter().map(|r| r.0).collect();
                let counts: Vec<u32> = ranges.iter().map(|r| r.1).collect();
                let bases: Vec<i32> = ranges.iter().map(|r| r.2).collect();
                device.draw_multi_indexed(mode, &starts, &counts, &bases);
            }
            _ => {
                for &(start, count, base) in ranges {
                    device.draw_indexed(mode, start, count, base);
                }
            }
        }
    }

    /// Lists of a group's bucket, by position in the buffers
    fn bucket_entries(&self, group: &Group) -> Vec<&ListEntry> {
        let Some(bucket) = self.buckets.get(group) else {
            return Vec::new();
        };
        let mut entries: Vec<&ListEntry> = bucket
            .lists
            .iter()
            .filter_map(|&id| self.lists.get(id))
            .collect();
        if self.kind.is_indexed() {
            entries.sort_by_key(|e| e.index_start);
        } else {
            entries.sort_by_key(|e| e.start);
        }
        entries
    }

    /// Draw the buckets of `groups`, one group after the other
    pub(crate) fn draw_groups(&self, device: &mut dyn GraphicsDevice, mode: DrawMode, groups: &[Group]) {
        let entries: Vec<&ListEntry> = groups
            .iter()
            .flat_map(|group| self.bucket_entries(group))
            .collect();
        self.submit(device, mode, &entries);
    }

    pub(crate) fn draw_all(&self, device: &mut dyn GraphicsDevice, mode: DrawMode) {
        self.bind(device);
        match self.kind {
            DomainKind::Plain => {
                let ranges: Vec<(u32, u32)> = self
                    .vertices
                    .allocator()
                    .get_allocated_regions()
                    .into_iter()
                    .map(|(start, count)| (start as u32, count as u32))
                    .collect();
                self.draw_vertex_ranges(device, mode, &ranges);
            }
            DomainKind::Indexed if !self.config.base_vertex => {
                let ranges: Vec<(u32, u32, i32)> = self
                    .indices
                    .as_ref()
                    .map(|stream| stream.allocator().get_allocated_regions())
                    .unwrap_or_default()
                    .into_iter()
                    .map(|(start, count)| (start as u32, count as u32, 0))
                    .collect();
                self.draw_index_ranges(device, mode, &ranges);
            }
            _ => {
                let mut entries: Vec<&ListEntry> = self.lists.values().collect();
                if self.kind.is_indexed() {
                    entries.sort_by_key(|e| e.index_start);
                } else {
                    entries.sort_by_key(|e| e.start);
                }
                self.submit(device, mode, &entries);
            }
        }
    }

    pub(crate) fn draw_list(&self, device: &mut dyn GraphicsDevice, mode: DrawMode, id: ListId) {
        if let Some(entry) = self.lists.get(id) {
            self.bind(device);
            self.submit(device, mode, &[entry]);
        }
    }

    pub fn kind(&self) -> DomainKind {
        self.kind
    }

    pub fn signature(&self) -> &AttributeSignature {
        &self.signature
    }

    pub fn config(&self) -> &DomainConfig {
        &self.config
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    pub(crate) fn topology(&self) -> u64 {
        self.topology
    }

    pub fn is_empty(&self) -> bool {
        self.lists.is_empty()
    }

    pub fn is_failed(&self) -> bool {
        self.failed
    }

    pub fn list_count(&self) -> usize {
        self.lists.len()
    }

    pub fn capacity(&self) -> usize {
        self.vertices.capacity()
    }

    /// Allocated vertex runs as `(start, count)`, ascending
    pub fn allocated_regions(&self) -> Vec<(usize, usize)> {
        self.vertices.allocator().get_allocated_regions()
    }

    /// Allocated index runs as `(start, count)`, ascending
    pub fn allocated_index_regions(&self) -> Vec<(usize, usize)> {
        self.indices
            .as_ref()
            .map(|stream| stream.allocator().get_allocated_regions())
            .unwrap_or_default()
    }

    /// Fraction of vertex capacity in use
    pub fn usage(&self) -> f32 {
        self.vertices.allocator().usage()
    }

    pub fn fragmentation(&self) -> f32 {
        self.vertices.allocator().fragmentation()
    }
}

/// Shared handle to a [`VertexDomain`]
#[derive(Clone, Debug)]
pub struct Domain {
    inner: Rc<RefCell<VertexDomain>>,
}

impl Domain {
    /// Create a domain for `signature`.
    ///
    /// A signature with per-instance attributes always yields an instanced
    /// domain.
    pub fn new(
        signature: AttributeSignature,
        indexed: bool,
        instanced: bool,
        config: DomainConfig,
    ) -> Self {
        let kind = DomainKind::new(indexed, instanced || signature.has_instanced());
        Self {
            inner: Rc::new(RefCell::new(VertexDomain::new(signature, kind, config))),
        }
    }

    /// Parse `(name, format)` pairs and create a domain for them
    pub fn with_attributes(
        attributes: &[(&str, &str)],
        indexed: bool,
        instanced: bool,
        config: DomainConfig,
    ) -> Result<Self, DomainError> {
        let signature = AttributeSignature::parse(attributes)?;
        Ok(Self::new(signature, indexed, instanced, config))
    }

    pub fn borrow(&self) -> Ref<'_, VertexDomain> {
        self.inner.borrow()
    }

    pub(crate) fn borrow_mut(&self) -> RefMut<'_, VertexDomain> {
        self.inner.borrow_mut()
    }

    pub fn ptr_eq(&self, other: &Domain) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }

    /// Number of handles (domain handles and vertex lists) sharing this domain
    pub(crate) fn handle_count(&self) -> usize {
        Rc::strong_count(&self.inner)
    }

    pub fn kind(&self) -> DomainKind {
        self.inner.borrow().kind
    }

    pub fn version(&self) -> u64 {
        self.inner.borrow().version
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().is_empty()
    }

    pub fn allocated_regions(&self) -> Vec<(usize, usize)> {
        self.inner.borrow().allocated_regions()
    }

    /// Attribute names, sorted
    pub fn attribute_names(&self) -> Vec<String> {
        self.inner.borrow().signature.names()
    }

    /// Allocate a vertex list of `count` vertices under `group`.
    ///
    /// Indexed domains take list-local indices, each below `count`.
    pub fn create(
        &self,
        group: &Group,
        count: usize,
        indices: Option<&[u32]>,
    ) -> Result<VertexList, DomainError> {
        let id = self.inner.borrow_mut().create_list(group, count, indices)?;
        Ok(VertexList::new(self.clone(), id))
    }

    /// Upload pending changes, creating or growing device buffers as needed
    pub fn commit(&self, device: &mut dyn GraphicsDevice) -> usize {
        self.inner.borrow_mut().commit(device)
    }

    /// Draw every allocated list, regardless of group
    pub fn draw(&self, device: &mut dyn GraphicsDevice, mode: DrawMode) {
        let mut domain = self.inner.borrow_mut();
        domain.commit(device);
        domain.draw_all(device, mode);
    }

    /// Draw a single list of this domain
    pub fn draw_subset(&self, device: &mut dyn GraphicsDevice, mode: DrawMode, list: &VertexList) {
        if !list.domain().ptr_eq(self) {
            log::warn!("draw_subset called with a vertex list of another domain");
            return;
        }
        let mut domain = self.inner.borrow_mut();
        domain.commit(device);
        domain.draw_list(device, mode, list.id());
    }

    /// Write a cached attribute region, failing if it went stale
    pub fn write_region<'a>(
        &self,
        region: &AttributeRegion,
        data: impl Into<AttributeData<'a>>,
    ) -> Result<(), DomainError> {
        self.inner.borrow_mut().write_region(region, data.into())
    }

    /// Destroy every device buffer. The CPU copies remain, so a later commit
    /// recreates them.
    pub fn release(&self, device: &mut dyn GraphicsDevice) {
        self.inner.borrow_mut().release(device);
    }
}
