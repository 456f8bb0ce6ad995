//! Batches: turning a group forest into draw calls
//!
//! A [`Batch`] owns a set of domains, keyed by attribute signature, draw mode
//! and kind, and the forest of groups whose buckets live in them. Drawing walks
//! the forest depth first (siblings by `order`, then by registration) and
//! emits a flat list of [`DrawOp`]s:
//!
//! - state changes are diffed against what is already active, so a texture
//!   shared by consecutive groups is bound once;
//! - state is only applied right before something is drawn, so groups with
//!   nothing visible below them cost nothing;
//! - consecutive buckets of the same domain under the same state are drawn
//!   with one (multi-)draw call.
//!
//! The resulting call sequence draws exactly what drawing every group on its
//! own, with its full composed state set and unset around it, would draw.
//!
//! The draw list is cached and rebuilt when domains or groups are added, when
//! a group bucket appears or empties, or when a group's visibility changes.
//! The active state lives only for the duration of one [`Batch::draw`], so
//! batches drawn one after another never see each other's state.

use crate::config::BatchConfig;
use crate::device::{DeviceCapabilities, DrawMode, GraphicsDevice};
use crate::domain::Domain;
use crate::error::DomainError;
use crate::format::{AttributeData, AttributeSignature};
use crate::group::Group;
use crate::state::{ComposedState, State};
use crate::vertex_list::VertexList;
use std::collections::{HashMap, HashSet};

/// One step of a batch's draw list
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DrawOp {
    SetState(State),
    UnsetState(State),
    /// Draw the buckets of `groups` in the batch's domain number `domain`
    DrawBuckets {
        domain: usize,
        mode: DrawMode,
        groups: Vec<Group>,
    },
}

#[derive(Clone, Debug, PartialEq, Eq)]
struct DomainKey {
    indexed: bool,
    instanced: bool,
    mode: DrawMode,
    signature: AttributeSignature,
}

#[derive(Debug)]
struct DomainSlot {
    key: DomainKey,
    domain: Domain,
    /// Domain topology the draw list was built against
    topology: u64,
}

#[derive(Debug)]
struct GroupNode {
    seq: u64,
    children: Vec<Group>,
}

/// Accumulates draw ops, applying state lazily and merging buckets
#[derive(Default)]
struct DrawListBuilder {
    ops: Vec<DrawOp>,
    active: ComposedState,
    pending: Option<(usize, DrawMode, Vec<Group>)>,
}

impl DrawListBuilder {
    fn draw(&mut self, domain: usize, mode: DrawMode, group: &Group, target: &ComposedState) {
        let diff = self.active.diff(target);
        if let Some((pending_domain, pending_mode, groups)) = &mut self.pending {
            if *pending_domain == domain && *pending_mode == mode && diff.is_empty() {
                groups.push(group.clone());
                return;
            }
        }

        self.flush();
        self.ops.extend(diff.unset.into_iter().map(DrawOp::UnsetState));
        self.ops.extend(diff.set.into_iter().map(DrawOp::SetState));
        self.active = target.clone();
        self.pending = Some((domain, mode, vec![group.clone()]));
    }

    fn flush(&mut self) {
        if let Some((domain, mode, groups)) = self.pending.take() {
            self.ops.push(DrawOp::DrawBuckets {
                domain,
                mode,
                groups,
            });
        }
    }

    fn finish(mut self) -> Vec<DrawOp> {
        self.flush();
        self.ops
            .extend(self.active.teardown().into_iter().map(DrawOp::UnsetState));
        self.ops
    }
}

/// A collection of domains drawn together under a forest of groups
#[derive(Debug, Default)]
pub struct Batch {
    config: BatchConfig,
    domains: Vec<DomainSlot>,
    groups: HashMap<Group, GroupNode>,
    top_groups: Vec<Group>,
    next_seq: u64,
    draw_list: Vec<DrawOp>,
    dirty: bool,
    /// Sum of group visibility generations when the draw list was built
    visibility: u64,
}

impl Batch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(config: BatchConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// A batch whose domains follow the device's draw capabilities
    pub fn for_device(capabilities: &DeviceCapabilities) -> Self {
        Self::with_config(BatchConfig::default().with_domain(
            crate::config::DomainConfig::for_device(capabilities),
        ))
    }

    pub fn config(&self) -> &BatchConfig {
        &self.config
    }

    /// Domains in creation order
    pub fn domains(&self) -> impl Iterator<Item = &Domain> {
        self.domains.iter().map(|slot| &slot.domain)
    }

    /// Number of groups the batch currently tracks
    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// The cached draw list, as of the last draw
    pub fn draw_list(&self) -> &[DrawOp] {
        &self.draw_list
    }

    /// Force the draw list to be rebuilt at the next draw
    pub fn invalidate(&mut self) {
        self.dirty = true;
    }

    fn register_group(&mut self, group: &Group) {
        if self.groups.contains_key(group) {
            return;
        }
        if let Some(parent) = group.parent() {
            self.register_group(parent);
        }

        self.next_seq += 1;
        self.groups.insert(
            group.clone(),
            GroupNode {
                seq: self.next_seq,
                children: Vec::new(),
            },
        );
        match group.parent() {
            Some(parent) => {
                if let Some(node) = self.groups.get_mut(parent) {
                    node.children.push(group.clone());
                }
            }
            None => self.top_groups.push(group.clone()),
        }
        self.dirty = true;
    }

    fn unregister_group(&mut self, group: &Group) {
        self.groups.remove(group);
        match group.parent() {
            Some(parent) => {
                if let Some(node) = self.groups.get_mut(parent) {
                    node.children.retain(|child| child != group);
                }
            }
            None => self.top_groups.retain(|top| top != group),
        }
    }

    /// Find or create the domain for a signature and register `group`
    pub fn get_domain(
        &mut self,
        indexed: bool,
        instanced: bool,
        mode: DrawMode,
        group: &Group,
        signature: &AttributeSignature,
    ) -> Domain {
        self.register_group(group);

        let key = DomainKey {
            indexed,
            instanced: instanced || signature.has_instanced(),
            mode,
            signature: signature.clone(),
        };
        if let Some(slot) = self.domains.iter().find(|slot| slot.key == key) {
            return slot.domain.clone();
        }

        let config = self.config.domain.clone().unwrap_or_default();
        let domain = Domain::new(signature.clone(), key.indexed, key.instanced, config);
        log::debug!(
            "created {:?} domain #{} for {:?} with attributes {:?}",
            domain.kind(),
            self.domains.len(),
            mode,
            signature.names()
        );
        self.domains.push(DomainSlot {
            key,
            domain: domain.clone(),
            topology: 0,
        });
        self.dirty = true;
        domain
    }

    fn fill(list: &mut VertexList, data: &[(&str, AttributeData<'_>)]) -> Result<(), DomainError> {
        for (name, values) in data {
            list.set_attribute_data(name, *values)?;
        }
        Ok(())
    }

    /// Create a vertex list in the matching domain and fill it with `data`
    pub fn vertex_list(
        &mut self,
        count: usize,
        mode: DrawMode,
        group: &Group,
        signature: &AttributeSignature,
        data: &[(&str, AttributeData<'_>)],
    ) -> Result<VertexList, DomainError> {
        let domain = self.get_domain(false, false, mode, group, signature);
        let mut list = domain.create(group, count, None)?;
        Self::fill(&mut list, data)?;
        Ok(list)
    }

    /// Create an indexed vertex list with list-local `indices`
    pub fn vertex_list_indexed(
        &mut self,
        count: usize,
        mode: DrawMode,
        group: &Group,
        indices: &[u32],
        signature: &AttributeSignature,
        data: &[(&str, AttributeData<'_>)],
    ) -> Result<VertexList, DomainError> {
        let domain = self.get_domain(true, false, mode, group, signature);
        let mut list = domain.create(group, count, Some(indices))?;
        Self::fill(&mut list, data)?;
        Ok(list)
    }

    /// Move a vertex list, possibly from another batch, into this batch under `group`
    pub fn migrate(
        &mut self,
        list: &mut VertexList,
        mode: DrawMode,
        group: &Group,
    ) -> Result<(), DomainError> {
        let (kind, signature) = {
            let domain = list.domain().borrow();
            (domain.kind(), domain.signature().clone())
        };
        let domain = self.get_domain(
            kind.is_indexed(),
            kind.is_instanced(),
            mode,
            group,
            &signature,
        );
        list.migrate(&domain, group)
    }

    fn visibility_stamp(&self) -> u64 {
        self.groups.keys().map(Group::generation).sum()
    }

    fn needs_rebuild(&self) -> bool {
        self.dirty
            || self.visibility_stamp() != self.visibility
            || self
                .domains
                .iter()
                .any(|slot| slot.domain.borrow().topology() != slot.topology)
    }

    fn prune_domains(&mut self, device: &mut dyn GraphicsDevice) {
        let mut index = 0;
        while index < self.domains.len() {
            let slot = &self.domains[index];
            // Only the batch's own handle left, and nothing allocated
            if slot.domain.is_empty() && slot.domain.handle_count() == 1 {
                let slot = self.domains.remove(index);
                slot.domain.release(device);
                log::debug!(
                    "pruned empty domain for {:?}",
                    slot.key.signature.names()
                );
            } else {
                index += 1;
            }
        }
    }

    fn prune_groups(&mut self, occupied: &HashSet<Group>) {
        loop {
            let empty: Vec<Group> = self
                .groups
                .iter()
                .filter(|(group, node)| node.children.is_empty() && !occupied.contains(*group))
                .map(|(group, _)| group.clone())
                .collect();
            if empty.is_empty() {
                break;
            }
            for group in &empty {
                log::trace!("pruned empty group {group:?}");
                self.unregister_group(group);
            }
        }
    }

    fn sort_groups(&mut self) {
        let sort_key = |groups: &HashMap<Group, GroupNode>, group: &Group| {
            (group.order(), groups.get(group).map_or(u64::MAX, |node| node.seq))
        };

        let mut top_groups = std::mem::take(&mut self.top_groups);
        top_groups.sort_by_key(|group| sort_key(&self.groups, group));
        self.top_groups = top_groups;

        let parents: Vec<Group> = self.groups.keys().cloned().collect();
        for parent in parents {
            let Some(node) = self.groups.get_mut(&parent) else {
                continue;
            };
            let mut children = std::mem::take(&mut node.children);
            children.sort_by_key(|group| sort_key(&self.groups, group));
            if let Some(node) = self.groups.get_mut(&parent) {
                node.children = children;
            }
        }
    }

    fn visit(&self, group: &Group, inherited: &ComposedState, builder: &mut DrawListBuilder) {
        if !group.visible() {
            return;
        }
        let target = inherited.compose(group.states());

        for (index, slot) in self.domains.iter().enumerate() {
            if slot.domain.borrow().has_bucket(group) {
                builder.draw(index, slot.key.mode, group, &target);
            }
        }

        if let Some(node) = self.groups.get(group) {
            for child in &node.children {
                self.visit(child, &target, builder);
            }
        }
    }

    fn rebuild(&mut self, device: &mut dyn GraphicsDevice) {
        if self.config.prune_empty_domains {
            self.prune_domains(device);
        }

        // Domains in creation order, buckets in creation order within each,
        // so equal-order siblings always get the same registration order
        let mut occupied = HashSet::new();
        let mut discovered = Vec::new();
        for slot in &self.domains {
            for group in slot.domain.borrow().groups() {
                if occupied.insert(group.clone()) {
                    discovered.push(group);
                }
            }
        }
        for group in &discovered {
            self.register_group(group);
        }

        if self.config.prune_empty_groups {
            self.prune_groups(&occupied);
        }
        self.sort_groups();

        let mut builder = DrawListBuilder::default();
        for group in &self.top_groups {
            self.visit(group, &ComposedState::new(), &mut builder);
        }
        self.draw_list = builder.finish();

        for slot in &mut self.domains {
            slot.topology = slot.domain.borrow().topology();
        }
        self.visibility = self.visibility_stamp();
        self.dirty = false;

        log::debug!(
            "rebuilt draw list: {} ops over {} groups and {} domains",
            self.draw_list.len(),
            self.groups.len(),
            self.domains.len()
        );
    }

    fn check_capabilities(&self, capabilities: &DeviceCapabilities) {
        if capabilities.base_vertex {
            return;
        }
        for slot in &self.domains {
            let domain = slot.domain.borrow();
            if domain.kind().is_indexed() && domain.config().base_vertex {
                log::warn!(
                    "indexed domain relies on base vertex draws the device does not support; \
                     create the batch with Batch::for_device"
                );
            }
        }
    }

    /// Upload pending changes and draw everything visible
    pub fn draw(&mut self, device: &mut dyn GraphicsDevice) {
        if self.needs_rebuild() {
            self.rebuild(device);
            self.check_capabilities(&device.capabilities());
        }

        for slot in &self.domains {
            slot.domain.commit(device);
        }

        let mut bound: Option<usize> = None;
        for op in &self.draw_list {
            match op {
                DrawOp::SetState(state) => device.set_state(state),
                DrawOp::UnsetState(state) => device.unset_state(state),
                DrawOp::DrawBuckets {
                    domain,
                    mode,
                    groups,
                } => {
                    let Some(slot) = self.domains.get(*domain) else {
                        continue;
                    };
                    let vertex_domain = slot.domain.borrow();
                    if bound != Some(*domain) {
                        vertex_domain.bind(device);
                        bound = Some(*domain);
                    }
                    vertex_domain.draw_groups(device, *mode, groups);
                }
            }
        }
    }

    /// Draw only `lists`, each under its group's composed state.
    ///
    /// Lists are visited in the batch's group order; lists that do not belong
    /// to this batch are skipped.
    pub fn draw_subset(&mut self, device: &mut dyn GraphicsDevice, lists: &[&VertexList]) {
        if self.needs_rebuild() {
            self.rebuild(device);
        }

        let mut order = Vec::new();
        for group in &self.top_groups {
            self.collect_visible(group, &ComposedState::new(), &mut order);
        }

        let mut active = ComposedState::new();
        for (group, target) in &order {
            for slot in &self.domains {
                for list in lists.iter().filter(|list| list.domain().ptr_eq(&slot.domain)) {
                    if list.group().ok().as_ref() != Some(group) {
                        continue;
                    }
                    let diff = active.diff(target);
                    for state in &diff.unset {
                        device.unset_state(state);
                    }
                    for state in &diff.set {
                        device.set_state(state);
                    }
                    active = target.clone();
                    slot.domain.draw_subset(device, slot.key.mode, list);
                }
            }
        }
        for state in active.teardown() {
            device.unset_state(&state);
        }
    }

    fn collect_visible(
        &self,
        group: &Group,
        inherited: &ComposedState,
        out: &mut Vec<(Group, ComposedState)>,
    ) {
        if !group.visible() {
            return;
        }
        let target = inherited.compose(group.states());
        out.push((group.clone(), target.clone()));
        if let Some(node) = self.groups.get(group) {
            for child in &node.children {
                self.collect_visible(child, &target, out);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::BufferHandle;
    use crate::recording::{DeviceCall, DrawnPrimitives, RecordingDevice};
    use crate::state::{BlendFactor, CompareFunc, PixelRect};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn init_logger() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn sprite_signature() -> AttributeSignature {
        AttributeSignature::parse(&[("position", "2f"), ("tex_coord", "2f")]).unwrap()
    }

    fn quad(batch: &mut Batch, group: &Group, count: usize) -> VertexList {
        batch
            .vertex_list(count, DrawMode::Triangles, group, &sprite_signature(), &[])
            .unwrap()
    }

    fn draw(mode: DrawMode, start: u32, count: u32) -> DeviceCall {
        DeviceCall::Draw { mode, start, count }
    }

    #[test]
    fn test_basic_batch() {
        init_logger();
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let g0 = Group::root(0, vec![State::texture(0, 1)]);
        let positions = [0.0f32, 0.0, 1.0, 0.0, 1.0, 1.0, 0.0, 1.0];
        let _list = batch
            .vertex_list(
                4,
                DrawMode::Triangles,
                &g0,
                &sprite_signature(),
                &[
                    ("position", AttributeData::from(&positions)),
                    ("tex_coord", AttributeData::from(&positions)),
                ],
            )
            .unwrap();

        batch.draw(&mut device);
        assert_eq!(
            device.render_calls(),
            vec![
                &DeviceCall::SetState(State::texture(0, 1)),
                &draw(DrawMode::Triangles, 0, 4),
                &DeviceCall::UnsetState(State::texture(0, 1)),
            ]
        );
    }

    #[test]
    fn test_groups_created_outside_the_batch_keep_creation_order() {
        let signature = sprite_signature();
        let root = Group::root(0, vec![State::shader(1)]);
        let siblings: Vec<Group> = (0..12)
            .map(|texture| root.child(0, vec![State::texture(0, texture)]))
            .collect();

        for _ in 0..8 {
            let mut device = RecordingDevice::default();
            let mut batch = Batch::new();
            let domain = batch.get_domain(false, false, DrawMode::Triangles, &root, &signature);
            let _lists: Vec<VertexList> = siblings
                .iter()
                .map(|group| domain.create(group, 3, None).unwrap())
                .collect();

            batch.draw(&mut device);
            let bound: Vec<u32> = device
                .calls()
                .iter()
                .filter_map(|call| match call {
                    DeviceCall::SetState(State::Texture { texture, .. }) => Some(*texture),
                    _ => None,
                })
                .collect();
            assert_eq!(bound, (0..12).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_empty_batch_draws_nothing() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        batch.draw(&mut device);
        assert!(device.calls().is_empty());
        assert!(batch.draw_list().is_empty());
    }

    #[test]
    fn test_equal_groups_share_one_bucket() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let g1 = Group::root(0, vec![State::texture(0, 1)]);
        let g2 = Group::root(0, vec![State::texture(0, 1)]);
        let _a = quad(&mut batch, &g1, 3);
        let _b = quad(&mut batch, &g2, 3);

        batch.draw(&mut device);
        assert_eq!(batch.group_count(), 1);
        assert_eq!(
            device.render_calls(),
            vec![
                &DeviceCall::SetState(State::texture(0, 1)),
                &draw(DrawMode::Triangles, 0, 6),
                &DeviceCall::UnsetState(State::texture(0, 1)),
            ]
        );
    }

    #[test]
    fn test_sibling_groups_with_same_state_merge() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let g1 = Group::root(0, vec![State::texture(0, 1)]);
        let g2 = Group::root(1, vec![State::texture(0, 1)]);
        let _a = quad(&mut batch, &g1, 3);
        let _b = quad(&mut batch, &g2, 3);

        batch.draw(&mut device);
        assert_eq!(batch.draw_list().len(), 3);
        assert_eq!(
            device.render_calls(),
            vec![
                &DeviceCall::SetState(State::texture(0, 1)),
                &draw(DrawMode::Triangles, 0, 6),
                &DeviceCall::UnsetState(State::texture(0, 1)),
            ]
        );
    }

    #[test]
    fn test_different_state_forces_split() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let g1 = Group::root(0, vec![State::texture(0, 1)]);
        let g2 = Group::root(0, vec![State::texture(0, 2)]);
        let _a = quad(&mut batch, &g1, 3);
        let _b = quad(&mut batch, &g2, 3);

        batch.draw(&mut device);
        assert_eq!(
            device.render_calls(),
            vec![
                &DeviceCall::SetState(State::texture(0, 1)),
                &draw(DrawMode::Triangles, 0, 3),
                &DeviceCall::SetState(State::texture(0, 2)),
                &draw(DrawMode::Triangles, 3, 3),
                &DeviceCall::UnsetState(State::texture(0, 2)),
            ]
        );
    }

    #[test]
    fn test_parent_state_wraps_children() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let parent = Group::root(0, vec![State::alpha_blend()]);
        let second = parent.child(1, vec![State::texture(0, 2)]);
        let first = parent.child(0, vec![State::texture(0, 1)]);
        let _b = quad(&mut batch, &second, 3);
        let _a = quad(&mut batch, &first, 3);

        batch.draw(&mut device);
        assert_eq!(
            device.render_calls(),
            vec![
                &DeviceCall::SetState(State::alpha_blend()),
                &DeviceCall::SetState(State::texture(0, 1)),
                &draw(DrawMode::Triangles, 3, 3),
                &DeviceCall::SetState(State::texture(0, 2)),
                &draw(DrawMode::Triangles, 0, 3),
                &DeviceCall::UnsetState(State::texture(0, 2)),
                &DeviceCall::UnsetState(State::alpha_blend()),
            ]
        );
    }

    #[test]
    fn test_instance_deletion_compacts_before_draw() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let group = Group::root(0, vec![State::shader(3)]);
        let signature = AttributeSignature::parse(&[("position", "2f"), ("offset", "2fi")]).unwrap();
        let mut list = batch
            .vertex_list(4, DrawMode::TriangleStrip, &group, &signature, &[])
            .unwrap();

        let instances: Vec<_> = (0..3)
            .map(|i| {
                let offset = [i as f32, 0.0];
                list.create_instance(&[("offset", AttributeData::from(&offset))])
                    .unwrap()
            })
            .collect();
        let mut instances = instances.into_iter();
        let first = instances.next().unwrap();
        let middle = instances.next().unwrap();
        let last = instances.next().unwrap();
        middle.delete();

        assert_eq!(first.slot(), Some(0));
        assert_eq!(last.slot(), Some(1));
        assert_eq!(last.get_attribute::<f32>("offset").unwrap(), vec![2.0, 0.0]);

        batch.draw(&mut device);
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
    fn test_hidden_group_hides_subtree_and_rebuilds() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let parent = Group::root(0, vec![State::shader(1)]);
        let child = parent.child(0, vec![State::texture(0, 1)]);
        let _a = quad(&mut batch, &parent, 3);
        let _b = quad(&mut batch, &child, 3);

        batch.draw(&mut device);
        assert_eq!(device.draw_calls().len(), 1);

        parent.set_visible(false);
        device.clear_calls();
        batch.draw(&mut device);
        assert!(device.draw_calls().is_empty());
        assert!(batch.draw_list().is_empty());

        parent.set_visible(true);
        child.set_visible(false);
        device.clear_calls();
        batch.draw(&mut device);
        assert_eq!(
            device.render_calls(),
            vec![
                &DeviceCall::SetState(State::shader(1)),
                &draw(DrawMode::Triangles, 0, 3),
                &DeviceCall::UnsetState(State::shader(1)),
            ]
        );
    }

    #[test]
    fn test_writes_between_draws_do_not_rebuild() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let group = Group::root(0, vec![State::texture(0, 1)]);
        let mut list = quad(&mut batch, &group, 2);
        batch.draw(&mut device);
        let ops = batch.draw_list().to_vec();

        list.set_attribute_data("position", &[1.0f32, 2.0, 3.0, 4.0])
            .unwrap();
        let _more = quad(&mut batch, &group, 2);
        assert!(!batch.needs_rebuild());

        device.clear_calls();
        batch.draw(&mut device);
        assert_eq!(batch.draw_list(), ops.as_slice());
        // The new list joins the existing bucket and the ranges coalesce
        assert_eq!(device.draw_calls(), vec![&draw(DrawMode::Triangles, 0, 4)]);
    }

    #[test]
    fn test_batches_do_not_share_active_state() {
        let mut device = RecordingDevice::default();
        let group = Group::root(0, vec![State::texture(0, 1)]);
        let mut first = Batch::new();
        let mut second = Batch::new();
        let _a = quad(&mut first, &group, 3);
        let _b = quad(&mut second, &group, 3);

        first.draw(&mut device);
        device.clear_calls();
        second.draw(&mut device);
        assert_eq!(
            device.render_calls().first(),
            Some(&&DeviceCall::SetState(State::texture(0, 1)))
        );
    }

    #[test]
    fn test_empty_groups_and_domains_are_pruned() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let parent = Group::root(0, vec![State::shader(1)]);
        let child = parent.child(0, vec![State::texture(0, 1)]);
        let list = quad(&mut batch, &child, 3);

        batch.draw(&mut device);
        assert_eq!(batch.group_count(), 2);
        assert_eq!(device.live_buffers(), 2);

        list.delete();
        batch.draw(&mut device);
        assert_eq!(batch.group_count(), 0);
        assert_eq!(batch.domains().count(), 0);
        assert_eq!(device.live_buffers(), 0);
    }

    #[test]
    fn test_domain_kept_while_referenced() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let group = Group::root(0, Vec::new());
        let domain = batch.get_domain(false, false, DrawMode::Points, &group, &sprite_signature());
        batch.draw(&mut device);
        assert_eq!(batch.domains().count(), 1);
        assert_eq!(batch.group_count(), 0);

        let _list = domain.create(&group, 1, None).unwrap();
        batch.draw(&mut device);
        assert_eq!(batch.group_count(), 1);
        assert_eq!(device.draw_calls(), vec![&draw(DrawMode::Points, 0, 1)]);
    }

    #[test]
    fn test_migrate_between_batches() {
        let mut device = RecordingDevice::default();
        let group = Group::root(0, vec![State::texture(0, 4)]);
        let mut source = Batch::new();
        let mut target = Batch::new();
        let mut list = quad(&mut source, &group, 3);
        list.set_attribute_data("position", &[1.0f32, 2.0, 3.0, 4.0, 5.0, 6.0])
            .unwrap();

        let other = Group::root(2, vec![State::texture(0, 5)]);
        target.migrate(&mut list, DrawMode::Lines, &other).unwrap();
        assert_eq!(
            list.get_attribute::<f32>("position").unwrap(),
            vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0]
        );

        source.draw(&mut device);
        assert!(device.draw_calls().is_empty());

        target.draw(&mut device);
        assert_eq!(device.draw_calls(), vec![&draw(DrawMode::Lines, 0, 3)]);
    }

    #[test]
    fn test_draw_subset_sets_group_state() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let g1 = Group::root(0, vec![State::texture(0, 1)]);
        let g2 = Group::root(1, vec![State::texture(0, 2)]);
        let _a = quad(&mut batch, &g1, 3);
        let b = quad(&mut batch, &g2, 3);

        batch.draw_subset(&mut device, &[&b]);
        assert_eq!(
            device.render_calls(),
            vec![
                &DeviceCall::SetState(State::texture(0, 2)),
                &draw(DrawMode::Triangles, 3, 3),
                &DeviceCall::UnsetState(State::texture(0, 2)),
            ]
        );
    }

    #[test]
    fn test_indexed_lists_merge_into_multi_draw() {
        let mut device = RecordingDevice::default();
        let mut batch = Batch::new();
        let group = Group::root(0, vec![State::shader(1)]);
        let signature = AttributeSignature::parse(&[("position", "2f")]).unwrap();
        let _a = batch
            .vertex_list_indexed(4, DrawMode::Triangles, &group, &[0, 1, 2, 2, 3, 0], &signature, &[])
            .unwrap();
        let _b = batch
            .vertex_list_indexed(3, DrawMode::Triangles, &group, &[0, 1, 2], &signature, &[])
            .unwrap();

        batch.draw(&mut device);
        assert_eq!(
            device.draw_calls(),
            vec![&DeviceCall::DrawMultiIndexed {
                mode: DrawMode::Triangles,
                index_starts: vec![0, 6],
                index_counts: vec![6, 3],
                base_vertices: vec![0, 4]
            }]
        );
        assert_eq!(device.drawn()[0].vertices, vec![0, 1, 2, 2, 3, 0, 4, 5, 6]);
    }

    // Randomised comparison against drawing every group on its own

    const STATE_POOL: usize = 9;

    fn pool_state(i: usize) -> State {
        match i {
            0 => State::texture(0, 1),
            1 => State::texture(0, 2),
            2 => State::texture(1, 3),
            3 => State::shader(1),
            4 => State::shader(2),
            5 => State::alpha_blend(),
            6 => State::blend(BlendFactor::One, BlendFactor::One),
            7 => State::Scissor(PixelRect::new(0, 0, 64, 64)),
            _ => State::DepthTest(CompareFunc::Less),
        }
    }

    fn random_group(rng: &mut StdRng, existing: &[Group]) -> Group {
        let states: Vec<State> = (0..rng.random_range(0..3))
            .map(|_| pool_state(rng.random_range(0..STATE_POOL)))
            .collect();
        let order = rng.random_range(0..3);
        if existing.is_empty() || rng.random_bool(0.35) {
            Group::root(order, states)
        } else {
            let parent = &existing[rng.random_range(0..existing.len())];
            parent.child(order, states)
        }
    }

    type Run = (Vec<State>, Option<BufferHandle>, DrawMode, u32, Vec<u32>);

    /// Canonical form of what was drawn: empty draws dropped, consecutive
    /// draws under the same state and layout joined.
    fn projection(drawn: &[DrawnPrimitives]) -> Vec<Run> {
        let mut out: Vec<Run> = Vec::new();
        for draw in drawn.iter().filter(|d| !d.vertices.is_empty()) {
            match out.last_mut() {
                Some(last)
                    if last.0 == draw.state
                        && last.1 == draw.layout
                        && last.2 == draw.mode
                        && last.3 == draw.instances =>
                {
                    last.4.extend(&draw.vertices)
                }
                _ => out.push((
                    draw.state.clone(),
                    draw.layout,
                    draw.mode,
                    draw.instances,
                    draw.vertices.clone(),
                )),
            }
        }
        out
    }

    /// Groups in first-registration order, parents before children
    fn registration_order(groups: &[Group], order: &mut Vec<Group>) {
        fn register(group: &Group, order: &mut Vec<Group>) {
            if order.contains(group) {
                return;
            }
            if let Some(parent) = group.parent() {
                register(parent, order);
            }
            order.push(group.clone());
        }
        for group in groups {
            register(group, order);
        }
    }

    fn naive_draw(
        device: &mut RecordingDevice,
        batch: &Batch,
        registered: &[Group],
        lists: &[(VertexList, usize)],
        groups: &[Group],
    ) {
        let seq = |g: &Group| registered.iter().position(|r| r == g).unwrap_or(usize::MAX);
        let mut roots: Vec<&Group> = registered.iter().filter(|g| g.parent().is_none()).collect();
        roots.sort_by_key(|g| (g.order(), seq(*g)));

        fn visit(
            group: &Group,
            device: &mut RecordingDevice,
            batch: &Batch,
            registered: &[Group],
            lists: &[(VertexList, usize)],
            groups: &[Group],
            seq: &dyn Fn(&Group) -> usize,
        ) {
            if !group.visible() {
                return;
            }
            let composed = group.composed_state();
            for state in composed.states() {
                device.set_state(state);
            }
            for (domain_index, domain) in batch.domains().enumerate() {
                let mode = if domain_index == 1 { DrawMode::Lines } else { DrawMode::Triangles };
                let mut mine: Vec<&VertexList> = lists
                    .iter()
                    .filter(|(list, g)| &groups[*g] == group && list.domain().ptr_eq(domain))
                    .map(|(list, _)| list)
                    .collect();
                mine.sort_by_key(|list| (list.index_start(), list.start()));
                for list in mine {
                    domain.draw_subset(device, mode, list);
                }
            }
            for state in composed.teardown() {
                device.unset_state(&state);
            }

            let mut children: Vec<&Group> = registered
                .iter()
                .filter(|g| g.parent() == Some(group))
                .collect();
            children.sort_by_key(|g| (g.order(), seq(*g)));
            for child in children {
                visit(child, device, batch, registered, lists, groups, seq);
            }
        }

        for root in roots {
            visit(root, device, batch, registered, lists, groups, &seq);
        }
    }

    #[test]
    fn test_optimized_draw_matches_naive_reference() {
        init_logger();
        let triangles = AttributeSignature::parse(&[("position", "2f")]).unwrap();
        let lines = AttributeSignature::parse(&[("position", "3f")]).unwrap();

        for seed in 0..40 {
            let mut rng = StdRng::seed_from_u64(seed);
            let mut groups: Vec<Group> = Vec::new();
            for _ in 0..rng.random_range(1..12) {
                let group = random_group(&mut rng, &groups);
                if !groups.contains(&group) {
                    groups.push(group);
                }
            }

            let mut batch = Batch::new();
            // Fix domain order: plain triangles, plain lines, indexed triangles
            let anchor = groups[0].clone();
            let _domains = [
                batch.get_domain(false, false, DrawMode::Triangles, &anchor, &triangles),
                batch.get_domain(false, false, DrawMode::Lines, &anchor, &lines),
                batch.get_domain(true, false, DrawMode::Triangles, &anchor, &triangles),
            ];

            let mut used: Vec<Group> = vec![anchor.clone()];
            let mut lists: Vec<(VertexList, usize)> = Vec::new();
            for _ in 0..rng.random_range(1..30) {
                let g = rng.random_range(0..groups.len());
                let group = groups[g].clone();
                let count = rng.random_range(1..5);
                let list = match rng.random_range(0..3) {
                    0 => batch
                        .vertex_list(count, DrawMode::Triangles, &group, &triangles, &[])
                        .unwrap(),
                    1 => batch
                        .vertex_list(count, DrawMode::Lines, &group, &lines, &[])
                        .unwrap(),
                    _ => {
                        let indices: Vec<u32> =
                            (0..count as u32).rev().chain(0..count as u32).collect();
                        batch
                            .vertex_list_indexed(count, DrawMode::Triangles, &group, &indices, &triangles, &[])
                            .unwrap()
                    }
                };
                used.push(group);
                lists.push((list, g));
            }

            let mut registered = Vec::new();
            registration_order(&used, &mut registered);

            for round in 0..3 {
                for group in &groups {
                    group.set_visible(rng.random_bool(0.8));
                }
                if round > 0 && !lists.is_empty() {
                    for _ in 0..rng.random_range(0..=lists.len().min(4)) {
                        if lists.is_empty() {
                            break;
                        }
                        lists.swap_remove(rng.random_range(0..lists.len()));
                    }
                }

                let mut device = RecordingDevice::default();
                batch.draw(&mut device);
                let optimized = projection(device.drawn());
                assert!(device.active_state().is_empty());

                device.clear_calls();
                naive_draw(&mut device, &batch, &registered, &lists, &groups);
                let naive = projection(device.drawn());

                assert_eq!(optimized, naive, "seed {seed} round {round}");
            }
        }
    }
}
