//! # trellis
//!
//! Batched vertex storage and draw scheduling, independent of any graphics API.
//!
//! Geometry lives in shared *domains*: one set of growable buffers per
//! attribute signature, carved into vertex lists by a first-fit allocator.
//! Lists are drawn under *groups*, which form a forest of ordered render
//! states. A [`Batch`] turns that forest into a short sequence of state
//! changes and (multi-)draw calls on a [`GraphicsDevice`].
//!
//! Backends implement [`GraphicsDevice`]; `trellis-wgpu` provides one on top
//! of wgpu, and [`RecordingDevice`] records calls in memory for tests and
//! headless inspection.
//!
//! ## Storage
//!
//! - [`Allocator`] - First-fit region allocator with reserve-before-free moves
//! - [`Domain`] - Shared vertex (and optional index) storage for one signature
//! - [`VertexList`] - Handle to a contiguous region of a domain
//! - [`Instance`] - Handle to one per-instance row of an instanced list
//!
//! ## Drawing
//!
//! - [`Group`] - Ordered node of the state forest
//! - [`State`] / [`ComposedState`] - Device state and its diffing
//! - [`Batch`] - The draw-list scheduler
//!
//! ## Formats
//!
//! - [`AttributeFormat`] / [`AttributeSignature`] - `"4Bn"` style attribute
//!   descriptions
//! - [`AttributeData`] - Borrowed, typed attribute values

mod allocator;
mod batch;
mod buffer;
mod config;
mod device;
mod domain;
mod error;
mod format;
mod group;
mod instance;
mod recording;
mod state;
mod stream;
mod vertex_list;

// Storage
pub use allocator::*;
pub use domain::*;
pub use instance::InstanceId;
pub use vertex_list::*;

// Drawing
pub use batch::*;
pub use device::*;
pub use group::*;
pub use recording::*;
pub use state::*;

// Formats, configuration and errors
pub use config::*;
pub use error::*;
pub use format::*;

pub use trellis_macros::WithBuilders;
