//! Configuration for domains and batches

use crate::device::{BufferUsage, DeviceCapabilities, IndexType};
use trellis_macros::WithBuilders;

/// Sizing and draw strategy of a vertex domain
#[derive(Clone, Debug, PartialEq, Eq, WithBuilders)]
pub struct DomainConfig {
    /// Vertex slots reserved up front
    pub initial_capacity: usize,
    /// Index slots reserved up front (indexed domains only)
    pub initial_index_capacity: usize,
    /// Instance rows reserved per instance bucket
    pub initial_instance_capacity: usize,
    pub index_type: IndexType,
    pub usage: BufferUsage,
    /// Store list-local indices and pass the list start as base vertex.
    /// When off, indices are stored absolute and rewritten on every move.
    pub base_vertex: bool,
    /// Draw several ranges with one multi-draw call
    pub multi_draw: bool,
    /// Largest backing buffer a domain may grow to, in bytes
    pub max_buffer_size: usize,
}

impl Default for DomainConfig {
    fn default() -> Self {
        Self::for_device(&DeviceCapabilities::default())
    }
}

impl DomainConfig {
    /// Defaults with the draw strategy and limits taken from the device
    pub fn for_device(capabilities: &DeviceCapabilities) -> Self {
        Self {
            initial_capacity: 16,
            initial_index_capacity: 16,
            initial_instance_capacity: 4,
            index_type: IndexType::U32,
            usage: BufferUsage::Dynamic,
            base_vertex: capabilities.base_vertex,
            multi_draw: capabilities.multi_draw,
            max_buffer_size: capabilities.max_buffer_size,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, WithBuilders)]
pub struct BatchConfig {
    /// Configuration for domains the batch creates. `None` uses
    /// [`DomainConfig::default`].
    #[with_builders(into)]
    pub domain: Option<DomainConfig>,
    /// Forget groups that no longer hold geometry or children
    pub prune_empty_groups: bool,
    /// Drop domains with no allocations that nothing else references
    pub prune_empty_domains: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            domain: None,
            prune_empty_groups: true,
            prune_empty_domains: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_for_device_follows_capabilities() {
        let config = DomainConfig::for_device(&DeviceCapabilities {
            max_buffer_size: 1024,
            multi_draw: false,
            base_vertex: false,
        });
        assert!(!config.multi_draw);
        assert!(!config.base_vertex);
        assert_eq!(config.max_buffer_size, 1024);
        assert_eq!(config.initial_capacity, 16);
    }

    #[test]
    fn test_builders() {
        let config = BatchConfig::default()
            .with_domain(DomainConfig::default().with_index_type(IndexType::U16))
            .with_prune_empty_domains(false);
        assert_eq!(config.domain.map(|d| d.index_type), Some(IndexType::U16));
        assert!(!config.prune_empty_domains);
        assert!(config.prune_empty_groups);
    }
}
