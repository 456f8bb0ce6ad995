//! Per-draw uniform blocks packed into one dynamic-offset buffer

use crate::convert::align_up;
use std::collections::BTreeMap;
use trellis::UniformValue;

/// CPU side of the uniform buffer for one frame
#[derive(Debug)]
pub(crate) struct UniformArena {
    data: Vec<u8>,
    block_size: u64,
    alignment: u64,
    last: Option<(u32, Vec<u8>)>,
}

impl UniformArena {
    pub fn new(block_size: u64, alignment: u64) -> Self {
        Self {
            data: Vec::new(),
            block_size: align_up(block_size.max(16), 16),
            alignment,
            last: None,
        }
    }

    pub fn block_size(&self) -> u64 {
        self.block_size
    }

    /// Store a block and return its dynamic offset. A block equal to the
    /// previous one is stored once.
    pub fn push(&mut self, block: Vec<u8>) -> u32 {
        if let Some((offset, last)) = &self.last {
            if *last == block {
                return *offset;
            }
        }
        let offset = align_up(self.data.len() as u64, self.alignment);
        self.data.resize((offset + self.block_size) as usize, 0);
        let len = block.len().min(self.block_size as usize);
        let start = offset as usize;
        self.data[start..start + len].copy_from_slice(&block[..len]);
        self.last = Some((offset as u32, block));
        offset as u32
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn clear(&mut self) {
        self.data.clear();
        self.last = None;
    }
}

/// Lay `values` out according to a program's `(name, byte offset)` table.
///
/// Values the program does not declare, or that do not fit the block, are
/// skipped with a warning.
pub(crate) fn pack_uniforms(
    layout: &[(String, u64)],
    values: &BTreeMap<String, UniformValue>,
    block_size: u64,
) -> Vec<u8> {
    let mut block = vec![0u8; block_size as usize];
    for (name, value) in values {
        let Some(&(_, offset)) = layout.iter().find(|(declared, _)| declared == name) else {
            log::warn!("uniform `{name}` is not declared by the bound program");
            continue;
        };
        let bytes = value.to_bytes();
        let start = offset as usize;
        let Some(target) = block.get_mut(start..start + bytes.len()) else {
            log::warn!("uniform `{name}` at offset {offset} does not fit a {block_size} byte block");
            continue;
        };
        target.copy_from_slice(&bytes);
    }
    block
}
