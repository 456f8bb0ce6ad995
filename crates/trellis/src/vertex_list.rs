//! Handles to allocated geometry
//!
//! A [`VertexList`] owns a region of its domain's buffers. Dropping it (or
//! calling [`VertexList::delete`]) frees the region, so a list can never be
//! deleted twice. [`Instance`] does the same for one row of an instanced
//! list's instance bucket.

use crate::domain::{Domain, ListId};
use crate::error::DomainError;
use crate::format::{read_scalars, Attribute, AttributeData, Scalar};
use crate::group::Group;
use crate::instance::{InstanceBucket, InstanceId};
use std::cell::RefCell;
use std::fmt;
use std::rc::Rc;

fn decode<T: Scalar>(attribute: &Attribute, bytes: &[u8]) -> Result<Vec<T>, DomainError> {
    if attribute.format.scalar != T::TYPE {
        return Err(DomainError::ScalarTypeMismatch {
            name: attribute.name.clone(),
            expected: attribute.format.scalar,
            actual: T::TYPE,
        });
    }
    Ok(read_scalars(bytes))
}

/// Cached location of one attribute of one vertex list.
///
/// The location is tied to the domain version and the list's region at the
/// time it was taken. Once either changes, the domain rejects it with
/// [`DomainError::StaleHandle`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AttributeRegion {
    pub(crate) name: String,
    pub(crate) attribute: usize,
    pub(crate) list: ListId,
    pub(crate) start: usize,
    pub(crate) count: usize,
    pub(crate) version: u64,
}

impl AttributeRegion {
    pub fn name(&self) -> &str {
        &self.name
    }

    /// First vertex slot
    pub fn start(&self) -> usize {
        self.start
    }

    pub fn count(&self) -> usize {
        self.count
    }

    /// Domain version this region was resolved at
    pub fn version(&self) -> u64 {
        self.version
    }
}

/// A region of vertices (and indices) inside a domain
pub struct VertexList {
    domain: Domain,
    id: ListId,
}

impl VertexList {
    pub(crate) fn new(domain: Domain, id: ListId) -> Self {
        Self { domain, id }
    }

    pub fn domain(&self) -> &Domain {
        &self.domain
    }

    pub fn id(&self) -> ListId {
        self.id
    }

    fn region(&self) -> (usize, usize, usize, usize) {
        self.domain
            .borrow()
            .list_region(self.id)
            .unwrap_or_default()
    }

    /// First vertex slot in the domain
    pub fn start(&self) -> usize {
        self.region().0
    }

    /// Number of vertices
    pub fn count(&self) -> usize {
        self.region().1
    }

    pub fn index_start(&self) -> usize {
        self.region().2
    }

    pub fn index_count(&self) -> usize {
        self.region().3
    }

    pub fn group(&self) -> Result<Group, DomainError> {
        self.domain.borrow().list_group(self.id)
    }

    /// Replace every value of one attribute
    pub fn set_attribute_data<'a>(
        &mut self,
        name: &str,
        data: impl Into<AttributeData<'a>>,
    ) -> Result<(), DomainError> {
        self.domain
            .borrow_mut()
            .set_attribute_data(self.id, name, data.into())
    }

    /// Read every value of one attribute
    pub fn get_attribute<T: Scalar>(&self, name: &str) -> Result<Vec<T>, DomainError> {
        let domain = self.domain.borrow();
        let (attribute, bytes) = domain.get_attribute(self.id, name)?;
        decode(attribute, bytes)
    }

    pub fn attribute_region(&self, name: &str) -> Result<AttributeRegion, DomainError> {
        self.domain.borrow().attribute_region(self.id, name)
    }

    /// Write through a cached region, refreshing it first if it went stale
    pub fn write_region<'a>(
        &mut self,
        region: &mut AttributeRegion,
        data: impl Into<AttributeData<'a>>,
    ) -> Result<(), DomainError> {
        let data = data.into();
        match self.domain.write_region(region, data) {
            Err(DomainError::StaleHandle { .. }) => {
                *region = self.attribute_region(&region.name)?;
                self.domain.write_region(region, data)
            }
            result => result,
        }
    }

    /// Read through a cached region, refreshing it first if it went stale
    pub fn read_region<T: Scalar>(&self, region: &mut AttributeRegion) -> Result<Vec<T>, DomainError> {
        let domain = self.domain.borrow();
        let fresh = match domain.read_region(region) {
            Err(DomainError::StaleHandle { .. }) => {
                *region = domain.attribute_region(self.id, &region.name)?;
                domain.read_region(region)?
            }
            result => result?,
        };
        decode(fresh.0, fresh.1)
    }

    /// Change the number of vertices, and of indices for indexed lists.
    ///
    /// Existing values are kept index for index; the list may move.
    pub fn resize(&mut self, count: usize, index_count: Option<usize>) -> Result<(), DomainError> {
        self.domain.borrow_mut().resize(self.id, count, index_count)
    }

    /// Move this list's data into `domain` under `group`.
    ///
    /// Both domains must store the same attributes with the same formats and
    /// be of the same kind. Instances move along with the list.
    pub fn migrate(&mut self, domain: &Domain, group: &Group) -> Result<(), DomainError> {
        if domain.ptr_eq(&self.domain) {
            return self.set_group(group);
        }
        let id = {
            let source = self.domain.borrow();
            domain.borrow_mut().adopt(&source, self.id, group)?
        };
        self.domain.borrow_mut().detach_list(self.id);
        self.domain = domain.clone();
        self.id = id;
        Ok(())
    }

    /// Move this list to another group's bucket within the same domain
    pub fn set_group(&mut self, group: &Group) -> Result<(), DomainError> {
        self.domain.borrow_mut().set_group(self.id, group)
    }

    /// Indices relative to this list's first vertex
    pub fn indices(&self) -> Result<Vec<u32>, DomainError> {
        self.domain.borrow().indices(self.id)
    }

    /// Replace all indices, given relative to this list's first vertex
    pub fn set_indices(&mut self, indices: &[u32]) -> Result<(), DomainError> {
        self.domain.borrow_mut().set_indices(self.id, indices)
    }

    fn bucket(&self) -> Result<Rc<RefCell<InstanceBucket>>, DomainError> {
        self.domain.borrow().instance_bucket(self.id)
    }

    /// Add an instance of this geometry, zeroed apart from `initial`
    pub fn create_instance(
        &mut self,
        initial: &[(&str, AttributeData<'_>)],
    ) -> Result<Instance, DomainError> {
        let bucket = self.bucket()?;
        let created = bucket.borrow_mut().create(initial);
        let id = self.domain.borrow_mut().guard(created)?;
        Ok(Instance { bucket, id })
    }

    pub fn instance_count(&self) -> Result<usize, DomainError> {
        Ok(self.bucket()?.borrow().count())
    }

    /// Free this list's region. Same as dropping it.
    pub fn delete(self) {}
}

impl Drop for VertexList {
    fn drop(&mut self) {
        self.domain.borrow_mut().delete_list(self.id);
    }
}

impl fmt::Debug for VertexList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (start, count, index_start, index_count) = self.region();
        f.debug_struct("VertexList")
            .field("start", &start)
            .field("count", &count)
            .field("index_start", &index_start)
            .field("index_count", &index_count)
            .finish()
    }
}

/// One instance of an instanced vertex list
pub struct Instance {
    bucket: Rc<RefCell<InstanceBucket>>,
    id: InstanceId,
}

impl Instance {
    pub fn id(&self) -> InstanceId {
        self.id
    }

    /// Current row in the instance buffers. Rows move when other instances
    /// are deleted.
    pub fn slot(&self) -> Option<usize> {
        self.bucket.borrow().slot(self.id)
    }

    pub fn set_attribute_data<'a>(
        &mut self,
        name: &str,
        data: impl Into<AttributeData<'a>>,
    ) -> Result<(), DomainError> {
        self.bucket.borrow_mut().set(self.id, name, data.into())
    }

    pub fn get_attribute<T: Scalar>(&self, name: &str) -> Result<Vec<T>, DomainError> {
        let bucket = self.bucket.borrow();
        let (attribute, bytes) = bucket.get(self.id, name)?;
        decode(attribute, bytes)
    }

    /// Remove this instance. Same as dropping it.
    pub fn delete(self) {}
}

impl Drop for Instance {
    fn drop(&mut self) {
        let mut bucket = self.bucket.borrow_mut();
        if bucket.contains(self.id) {
            let _ = bucket.delete(self.id);
        }
    }
}

impl fmt::Debug for Instance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Instance")
            .field("id", &self.id)
            .field("slot", &self.slot())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DomainConfig;
    use crate::device::{DeviceCapabilities, DrawMode};
    use crate::recording::{DeviceCall, RecordingDevice};
    use crate::state::State;

    fn domain(indexed: bool, base_vertex: bool, capacity: usize) -> Domain {
        Domain::with_attributes(
            &[("position", "2f"), ("colors", "4Bn")],
            indexed,
            false,
            DomainConfig::default()
                .with_initial_capacity(capacity)
                .with_base_vertex(base_vertex),
        )
        .unwrap()
    }

    fn group() -> Group {
        Group::root(0, vec![State::shader(1)])
    }

    #[test]
    fn test_attribute_round_trip_and_type_check() {
        let domain = domain(false, true, 8);
        let mut list = domain.create(&group(), 2, None).unwrap();
        list.set_attribute_data("position", &[1.0f32, 2.0, 3.0, 4.0])
            .unwrap();
        list.set_attribute_data("colors", &[255u8, 0, 0, 255, 0, 255, 0, 255])
            .unwrap();

        assert_eq!(
            list.get_attribute::<f32>("position").unwrap(),
            vec![1.0, 2.0, 3.0, 4.0]
        );
        assert!(matches!(
            list.get_attribute::<f32>("colors"),
            Err(DomainError::ScalarTypeMismatch { .. })
        ));
        assert_eq!(
            list.set_attribute_data("normals", &[0.0f32]),
            Err(DomainError::UnknownAttribute("normals".into()))
        );
    }

    #[test]
    fn test_resize_move_preserves_values() {
        let domain = domain(false, true, 8);
        let mut list = domain.create(&group(), 2, None).unwrap();
        let _blocker = domain.create(&group(), 2, None).unwrap();
        list.set_attribute_data("position", &[1.0f32, 2.0, 3.0, 4.0])
            .unwrap();

        list.resize(3, None).unwrap();
        assert_eq!(list.start(), 4);
        assert_eq!(
            list.get_attribute::<f32>("position").unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 0.0, 0.0]
        );
        assert_eq!(domain.allocated_regions(), vec![(2, 5)]);
    }

    #[test]
    fn test_resize_with_absolute_indices_rewrites_them() {
        let domain = domain(true, false, 8);
        let mut list = domain.create(&group(), 3, Some(&[0, 1, 2])).unwrap();
        let _blocker = domain.create(&group(), 1, Some(&[0])).unwrap();

        list.resize(4, Some(6)).unwrap();
        assert_eq!(list.start(), 4);
        assert_eq!(list.indices().unwrap(), vec![0, 1, 2, 0, 0, 0]);

        list.set_indices(&[0, 1, 2, 2, 3, 0]).unwrap();
        assert_eq!(list.indices().unwrap(), vec![0, 1, 2, 2, 3, 0]);
        assert_eq!(
            list.set_indices(&[0, 1, 4, 0, 0, 0]),
            Err(DomainError::IndexOutOfRange { index: 4, count: 4 })
        );
        assert!(matches!(
            list.set_indices(&[0]),
            Err(DomainError::DataLengthMismatch { .. })
        ));
    }

    #[test]
    fn test_cached_region_refreshes_after_growth() {
        let domain = domain(false, true, 2);
        let mut list = domain.create(&group(), 2, None).unwrap();
        let mut region = list.attribute_region("position").unwrap();
        assert_eq!(region.version(), 0);

        // Growing the domain makes the cached region stale
        let _more = domain.create(&group(), 4, None).unwrap();
        assert!(matches!(
            domain.write_region(&region, &[0.0f32; 4]),
            Err(DomainError::StaleHandle {
                cached: 0,
                current: 1
            })
        ));

        list.write_region(&mut region, &[5.0f32, 6.0, 7.0, 8.0])
            .unwrap();
        assert_eq!(region.version(), 1);
        assert_eq!(
            list.read_region::<f32>(&mut region).unwrap(),
            vec![5.0, 6.0, 7.0, 8.0]
        );
    }

    #[test]
    fn test_migrate_preserves_content_and_frees_source() {
        let source = domain(true, true, 8);
        let target = domain(true, false, 8);
        let _existing = target.create(&group(), 2, Some(&[0, 1])).unwrap();

        let mut list = source.create(&group(), 3, Some(&[2, 1, 0])).unwrap();
        list.set_attribute_data("position", &[1.0f32, 1.5, 2.0, 2.5, 3.0, 3.5])
            .unwrap();

        let other_group = Group::root(1, Vec::new());
        list.migrate(&target, &other_group).unwrap();

        assert!(list.domain().ptr_eq(&target));
        assert!(source.allocated_regions().is_empty());
        assert!(source.is_empty());
        assert_eq!(list.start(), 2);
        assert_eq!(
            list.get_attribute::<f32>("position").unwrap(),
            vec![1.0, 1.5, 2.0, 2.5, 3.0, 3.5]
        );
        assert_eq!(list.indices().unwrap(), vec![2, 1, 0]);
        assert_eq!(list.group().unwrap(), other_group);

        let mut device = RecordingDevice::new(DeviceCapabilities {
            base_vertex: false,
            ..Default::default()
        });
        target.draw_subset(&mut device, DrawMode::Triangles, &list);
        assert_eq!(device.drawn()[0].vertices, vec![4, 3, 2]);
    }

    #[test]
    fn test_migrate_rejects_other_attributes() {
        let source = domain(false, true, 8);
        let target = Domain::with_attributes(
            &[("position", "3f"), ("colors", "4Bn")],
            false,
            false,
            DomainConfig::default(),
        )
        .unwrap();
        let mut list = source.create(&group(), 1, None).unwrap();
        assert!(matches!(
            list.migrate(&target, &group()),
            Err(DomainError::IncompatibleDomain { .. })
        ));
        assert!(list.domain().ptr_eq(&source));
        assert!(target.is_empty());
    }

    #[test]
    fn test_instances_compact_and_draw_with_live_count() {
        let mut device = RecordingDevice::default();
        let domain = Domain::with_attributes(
            &[("position", "2f"), ("offset", "2fi")],
            false,
            true,
            DomainConfig::default(),
        )
        .unwrap();
        let mut list = domain.create(&group(), 4, None).unwrap();

        let a = list
            .create_instance(&[("offset", AttributeData::from(&[0.0f32, 0.0]))])
            .unwrap();
        let b = list
            .create_instance(&[("offset", AttributeData::from(&[1.0f32, 1.0]))])
            .unwrap();
        let c = list
            .create_instance(&[("offset", AttributeData::from(&[2.0f32, 2.0]))])
            .unwrap();

        b.delete();
        assert_eq!(a.slot(), Some(0));
        assert_eq!(c.slot(), Some(1));
        assert_eq!(c.get_attribute::<f32>("offset").unwrap(), vec![2.0, 2.0]);
        assert_eq!(list.instance_count(), Ok(2));

        domain.draw(&mut device, DrawMode::TriangleStrip);
        assert_eq!(
            device.draw_calls(),
            vec![&DeviceCall::DrawInstanced {
                mode: DrawMode::TriangleStrip,
                start: 0,
                count: 4,
                instance_count: 2
            }]
        );
    }

    #[test]
    fn test_instance_outlives_deleted_list() {
        let instanced = Domain::with_attributes(
            &[("position", "2f"), ("offset", "2fi")],
            false,
            true,
            DomainConfig::default(),
        )
        .unwrap();
        let mut list = instanced.create(&group(), 4, None).unwrap();
        let mut instance = list.create_instance(&[]).unwrap();
        assert_eq!(
            domain(false, true, 4)
                .create(&group(), 1, None)
                .unwrap()
                .create_instance(&[])
                .err(),
            Some(DomainError::NotInstanced)
        );

        list.delete();
        assert!(instanced.is_empty());
        instance
            .set_attribute_data("offset", &[1.0f32, 2.0])
            .unwrap();
        drop(instance);
    }
}
