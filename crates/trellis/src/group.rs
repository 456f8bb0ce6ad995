//! Groups of shared render state
//!
//! A [`Group`] is a node in a forest of render state. Its [`State`]s are applied
//! on top of its parent's while anything in the group is drawn, and `order`
//! sorts it among its siblings.
//!
//! Groups are compared by value: two groups with the same order, the same
//! parent and the same states are equal, hash alike, and share a bucket in
//! every domain. The hash is computed once at construction since the parent
//! and states cannot change afterwards. This also means a parent chain can
//! never become cyclic.
//!
//! Visibility is the one mutable property. Toggling it bumps a generation
//! counter that every batch compares on its next draw, so no back references
//! from groups to batches are needed.

use crate::device::GraphicsDevice;
use crate::state::{ComposedState, State};
use std::cell::Cell;
use std::collections::hash_map::DefaultHasher;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::rc::Rc;

struct GroupInner {
    order: i32,
    parent: Option<Group>,
    states: Vec<State>,
    hash: u64,
    visible: Cell<bool>,
    generation: Cell<u64>,
}

/// Shared handle to a node of render state
#[derive(Clone)]
pub struct Group {
    inner: Rc<GroupInner>,
}

impl Group {
    /// Create a group under `parent` (or a root group)
    pub fn new(order: i32, parent: Option<&Group>, states: impl Into<Vec<State>>) -> Self {
        let states = states.into();
        let parent = parent.cloned();

        let mut hasher = DefaultHasher::new();
        order.hash(&mut hasher);
        parent.as_ref().map(|p| p.inner.hash).hash(&mut hasher);
        states.hash(&mut hasher);

        Self {
            inner: Rc::new(GroupInner {
                order,
                parent,
                states,
                hash: hasher.finish(),
                visible: Cell::new(true),
                generation: Cell::new(0),
            }),
        }
    }

    /// Create a root group
    pub fn root(order: i32, states: impl Into<Vec<State>>) -> Self {
        Self::new(order, None, states)
    }

    /// Create a child of this group
    pub fn child(&self, order: i32, states: impl Into<Vec<State>>) -> Self {
        Self::new(order, Some(self), states)
    }

    pub fn order(&self) -> i32 {
        self.inner.order
    }

    pub fn parent(&self) -> Option<&Group> {
        self.inner.parent.as_ref()
    }

    /// States declared by this group itself
    pub fn states(&self) -> &[State] {
        &self.inner.states
    }

    pub fn visible(&self) -> bool {
        self.inner.visible.get()
    }

    /// Show or hide this group and everything under it
    pub fn set_visible(&self, visible: bool) {
        if self.inner.visible.replace(visible) != visible {
            self.inner.generation.set(self.inner.generation.get() + 1);
        }
    }

    /// Counter bumped on every visibility change
    pub fn generation(&self) -> u64 {
        self.inner.generation.get()
    }

    /// Parent chain states overridden by this group's own states
    pub fn composed_state(&self) -> ComposedState {
        match self.parent() {
            Some(parent) => parent.composed_state().compose(self.states()),
            None => ComposedState::new().compose(self.states()),
        }
    }

    /// Apply this group's own states, in declaration order
    pub fn set_state_all(&self, device: &mut dyn GraphicsDevice) {
        for state in self.states() {
            device.set_state(state);
        }
    }

    /// Revert this group's own states in reverse order. Uniforms are left as they are.
    pub fn unset_state_all(&self, device: &mut dyn GraphicsDevice) {
        for state in self.states().iter().rev().filter(|s| s.unsets()) {
            device.unset_state(state);
        }
    }

    /// Visible only if every ancestor is visible as well
    pub fn effectively_visible(&self) -> bool {
        self.visible() && self.parent().is_none_or(Group::effectively_visible)
    }

    /// Number of ancestors
    pub fn depth(&self) -> usize {
        self.parent().map_or(0, |p| p.depth() + 1)
    }

    /// Whether both handles point at the same node, not just equal ones
    pub fn ptr_eq(&self, other: &Group) -> bool {
        Rc::ptr_eq(&self.inner, &other.inner)
    }
}

impl PartialEq for Group {
    fn eq(&self, other: &Self) -> bool {
        self.ptr_eq(other)
            || (self.inner.hash == other.inner.hash
                && self.inner.order == other.inner.order
                && self.inner.states == other.inner.states
                && self.inner.parent == other.inner.parent)
    }
}

impl Eq for Group {}

impl Hash for Group {
    fn hash<H: Hasher>(&self, state: &mut H) {
        state.write_u64(self.inner.hash);
    }
}

impl fmt::Debug for Group {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Group")
            .field("order", &self.inner.order)
            .field("states", &self.inner.states)
            .field("visible", &self.visible())
            .field("depth", &self.depth())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device::DeviceCapabilities;
    use crate::recording::{DeviceCall, RecordingDevice};
    use std::collections::HashSet;

    #[test]
    fn test_groups_with_same_state_are_equal() {
        let a = Group::root(0, vec![State::texture(0, 7)]);
        let b = Group::root(0, vec![State::texture(0, 7)]);
        assert!(!a.ptr_eq(&b));
        assert_eq!(a, b);

        let mut set = HashSet::new();
        set.insert(a);
        assert!(set.contains(&b));
    }

    #[test]
    fn test_order_parent_and_states_distinguish_groups() {
        let root = Group::root(0, vec![State::shader(1)]);
        let base = Group::root(0, vec![State::texture(0, 7)]);

        assert_ne!(base, Group::root(1, vec![State::texture(0, 7)]));
        assert_ne!(base, Group::root(0, vec![State::texture(0, 8)]));
        assert_ne!(base, root.child(0, vec![State::texture(0, 7)]));

        // Equal parents compare by value too
        let other_root = Group::root(0, vec![State::shader(1)]);
        assert_eq!(
            root.child(0, vec![State::texture(0, 7)]),
            other_root.child(0, vec![State::texture(0, 7)])
        );
    }

    #[test]
    fn test_composed_state_child_overrides_parent() {
        let root = Group::root(0, vec![State::shader(1), State::texture(0, 1)]);
        let child = root.child(0, vec![State::texture(0, 2)]);
        assert_eq!(
            child.composed_state().states(),
            &[State::shader(1), State::texture(0, 2)]
        );
        assert_eq!(child.depth(), 1);
    }

    #[test]
    fn test_visibility_bumps_generation_once_per_change() {
        let root = Group::root(0, Vec::new());
        let child = root.child(0, Vec::new());
        assert_eq!(root.generation(), 0);

        root.set_visible(false);
        root.set_visible(false);
        assert_eq!(root.generation(), 1);
        assert!(!child.effectively_visible());
        assert!(child.visible());

        root.set_visible(true);
        assert_eq!(root.generation(), 2);
        assert!(child.effectively_visible());
    }

    #[test]
    fn test_visibility_is_not_part_of_equality() {
        let a = Group::root(0, vec![State::alpha_blend()]);
        let b = Group::root(0, vec![State::alpha_blend()]);
        a.set_visible(false);
        assert_eq!(a, b);
    }

    #[test]
    fn test_set_and_unset_state_all() {
        let group = Group::root(
            0,
            vec![State::shader(1), State::uniform("alpha", 0.5f32), State::alpha_blend()],
        );
        let mut device = RecordingDevice::new(DeviceCapabilities::default());

        group.set_state_all(&mut device);
        group.unset_state_all(&mut device);
        assert_eq!(
            device.calls(),
            &[
                DeviceCall::SetState(State::shader(1)),
                DeviceCall::SetState(State::uniform("alpha", 0.5f32)),
                DeviceCall::SetState(State::alpha_blend()),
                DeviceCall::UnsetState(State::alpha_blend()),
                DeviceCall::UnsetState(State::shader(1)),
            ]
        );
    }
}
