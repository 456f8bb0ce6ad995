//! Region allocator over a linear slot space
//!
//! The allocator does not own any memory. It hands out `(start, count)` regions
//! of an abstract buffer of `capacity` slots and remembers which slots are in
//! use. Streams own the actual bytes and consult the allocator to decide where
//! a vertex list lives.
//!
//! Allocated slots are stored as maximal contiguous runs (two parallel sorted
//! vectors of starts and sizes). Adjacent allocations are coalesced into one
//! run, so [`Allocator::get_allocated_regions`] directly yields the minimal set
//! of ranges needed to draw everything in a buffer.

/// Allocation failure signal.
///
/// `OutOfSpace` is not a hard error: the owning stream grows its buffers to at
/// least `required_capacity` slots, calls [`Allocator::set_capacity`] and
/// retries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum AllocError {
    #[error("allocator is full, at least {required_capacity} slots are needed")]
    OutOfSpace { required_capacity: usize },
}

/// Result of [`Allocator::realloc`].
#[must_use = "a moved region must be completed with `Allocator::complete_move`"]
#[derive(Debug, PartialEq, Eq)]
pub enum Reallocation {
    /// The region grew or shrank without moving.
    InPlace { start: usize },
    /// A new region was reserved. The old region is still allocated until the
    /// move is completed.
    Moved(PendingMove),
}

/// A relocation whose destination is reserved but whose source is not yet freed.
///
/// Both regions are allocated while this value exists, so the destination can
/// never overlap the source and no other allocation can take the source slots
/// before the payload has been copied out of them.
#[must_use = "the old region stays allocated until `Allocator::complete_move` is called"]
#[derive(Debug, PartialEq, Eq)]
pub struct PendingMove {
    old_start: usize,
    old_count: usize,
    new_start: usize,
    new_count: usize,
}

impl PendingMove {
    pub fn old_start(&self) -> usize {
        self.old_start
    }

    pub fn new_start(&self) -> usize {
        self.new_start
    }

    /// Number of slots that carry over from the old region to the new one
    pub fn copy_count(&self) -> usize {
        self.old_count.min(self.new_count)
    }
}

/// First-fit allocator with coalesced runs of allocated slots
#[derive(Debug, Clone)]
pub struct Allocator {
    capacity: usize,
    starts: Vec<usize>,
    sizes: Vec<usize>,
}

impl Allocator {
    /// Create an allocator managing `capacity` slots, all free
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            starts: Vec::new(),
            sizes: Vec::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Extend the slot space. Existing allocations do not move.
    pub fn set_capacity(&mut self, capacity: usize) {
        debug_assert!(
            capacity >= self.capacity,
            "allocator capacity can only grow ({} -> {capacity})",
            self.capacity
        );
        self.capacity = capacity;
    }

    /// Allocate `count` contiguous slots, returning the first slot.
    ///
    /// Zero-sized requests always succeed at slot 0 and allocate nothing.
    pub fn alloc(&mut self, count: usize) -> Result<usize, AllocError> {
        if count == 0 {
            return Ok(0);
        }

        if self.starts.is_empty() {
            if count <= self.capacity {
                self.starts.push(0);
                self.sizes.push(count);
                return Ok(0);
            }
            return Err(AllocError::OutOfSpace {
                required_capacity: count,
            });
        }

        // Gap before the first run
        let first = self.starts[0];
        if first >= count {
            if first == count {
                self.starts[0] = 0;
                self.sizes[0] += count;
            } else {
                self.starts.insert(0, 0);
                self.sizes.insert(0, count);
            }
            return Ok(0);
        }

        // Gaps between runs. `i` is the run before the gap.
        for i in 0..self.starts.len() - 1 {
            let free_start = self.starts[i] + self.sizes[i];
            let free_size = self.starts[i + 1] - free_start;
            if free_size == count {
                // Gap is filled exactly, the two runs become one
                self.sizes[i] += free_size + self.sizes[i + 1];
                self.starts.remove(i + 1);
                self.sizes.remove(i + 1);
                return Ok(free_start);
            }
            if free_size > count {
                self.sizes[i] += count;
                return Ok(free_start);
            }
        }

        // Tail of the slot space
        let last = self.starts.len() - 1;
        let free_start = self.starts[last] + self.sizes[last];
        let free_size = self.capacity - free_start;
        if free_size >= count {
            self.sizes[last] += count;
            return Ok(free_start);
        }

        Err(AllocError::OutOfSpace {
            required_capacity: self.capacity.saturating_add(count - free_size),
        })
    }

    /// Free `count` slots starting at `start`.
    ///
    /// The region must be currently allocated. Freeing it twice is a caller bug;
    /// handles make that unrepresentable by consuming themselves on delete.
    pub fn dealloc(&mut self, start: usize, count: usize) {
        if count == 0 {
            return;
        }

        let i = self.run_containing(start);
        let run_start = self.starts[i];
        let run_end = run_start + self.sizes[i];
        let free_end = start + count;
        debug_assert!(
            free_end <= run_end,
            "dealloc({start}, {count}) spans beyond the allocated run {run_start}..{run_end}"
        );

        if start == run_start && free_end == run_end {
            self.starts.remove(i);
            self.sizes.remove(i);
        } else if start == run_start {
            self.starts[i] += count;
            self.sizes[i] -= count;
        } else if free_end == run_end {
            self.sizes[i] -= count;
        } else {
            // Split the run around the freed slots
            self.sizes[i] = start - run_start;
            self.starts.insert(i + 1, free_end);
            self.sizes.insert(i + 1, run_end - free_end);
        }
    }

    /// Resize the region `start..start + old_count` to `new_count` slots.
    ///
    /// Shrinking and growing into trailing free space happen in place. Otherwise
    /// a new region is reserved first and the caller receives a [`PendingMove`]
    /// to finish once the payload is copied.
    pub fn realloc(
        &mut self,
        start: usize,
        old_count: usize,
        new_count: usize,
    ) -> Result<Reallocation, AllocError> {
        if new_count <= old_count {
            self.dealloc(start + new_count, old_count - new_count);
            return Ok(Reallocation::InPlace { start });
        }

        if old_count == 0 {
            let new_start = self.alloc(new_count)?;
            return Ok(Reallocation::InPlace { start: new_start });
        }

        let i = self.run_containing(start);
        let run_end = self.starts[i] + self.sizes[i];
        let grow = new_count - old_count;

        if start + old_count == run_end {
            let free_size = match self.starts.get(i + 1) {
                Some(next) => next - run_end,
                None => self.capacity - run_end,
            };
            if free_size == grow && i + 1 < self.starts.len() {
                self.sizes[i] += free_size + self.sizes[i + 1];
                self.starts.remove(i + 1);
                self.sizes.remove(i + 1);
                return Ok(Reallocation::InPlace { start });
            }
            if free_size >= grow {
                self.sizes[i] += grow;
                return Ok(Reallocation::InPlace { start });
            }
        }

        let new_start = self.alloc(new_count)?;
        Ok(Reallocation::Moved(PendingMove {
            old_start: start,
            old_count,
            new_start,
            new_count,
        }))
    }

    /// Release the source region of a move, returning the new start
    pub fn complete_move(&mut self, pending: PendingMove) -> usize {
        self.dealloc(pending.old_start, pending.old_count);
        pending.new_start
    }

    /// Abandon a move, keeping the old region and freeing the reserved one
    pub fn cancel_move(&mut self, pending: PendingMove) -> usize {
        self.dealloc(pending.new_start, pending.new_count);
        pending.old_start
    }

    /// Allocated runs as `(start, count)`, ascending by start
    pub fn get_allocated_regions(&self) -> Vec<(usize, usize)> {
        self.starts
            .iter()
            .copied()
            .zip(self.sizes.iter().copied())
            .collect()
    }

    pub fn allocated_size(&self) -> usize {
        self.sizes.iter().sum()
    }

    pub fn is_empty(&self) -> bool {
        self.starts.is_empty()
    }

    /// Total free slots, fragmented or not
    pub fn free_size(&self) -> usize {
        self.capacity - self.allocated_size()
    }

    /// Free slots that are not part of the free tail of the slot space
    pub fn fragmented_free_size(&self) -> usize {
        match (self.starts.last(), self.sizes.last()) {
            (Some(start), Some(size)) => start + size - self.allocated_size(),
            _ => 0,
        }
    }

    /// Fraction of the capacity that is allocated
    pub fn usage(&self) -> f32 {
        if self.capacity == 0 {
            return 0.0;
        }
        self.allocated_size() as f32 / self.capacity as f32
    }

    /// Fraction of the free space that is unusable for tail allocations
    pub fn fragmentation(&self) -> f32 {
        let free = self.free_size();
        if free == 0 {
            return 0.0;
        }
        self.fragmented_free_size() as f32 / free as f32
    }

    fn run_containing(&self, start: usize) -> usize {
        let i = self.starts.partition_point(|&s| s <= start);
        debug_assert!(i > 0, "slot {start} is not inside any allocated run");
        i.saturating_sub(1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn assert_disjoint(allocator: &Allocator) {
        let regions = allocator.get_allocated_regions();
        for pair in regions.windows(2) {
            let (a_start, a_count) = pair[0];
            let (b_start, _) = pair[1];
            // Runs are coalesced, so there is always a gap between them
            assert!(a_start + a_count < b_start, "runs {pair:?} touch or overlap");
        }
        if let Some(&(start, count)) = regions.last() {
            assert!(start + count <= allocator.capacity());
        }
    }

    #[test]
    fn test_alloc_sequential_coalesces() {
        let mut allocator = Allocator::new(10);
        assert_eq!(allocator.alloc(3), Ok(0));
        assert_eq!(allocator.alloc(4), Ok(3));
        assert_eq!(allocator.get_allocated_regions(), vec![(0, 7)]);
        assert_eq!(allocator.free_size(), 3);
    }

    #[test]
    fn test_alloc_out_of_space_reports_required_capacity() {
        let mut allocator = Allocator::new(8);
        allocator.alloc(6).unwrap();
        assert_eq!(
            allocator.alloc(5),
            Err(AllocError::OutOfSpace {
                required_capacity: 11
            })
        );

        allocator.set_capacity(16);
        assert_eq!(allocator.alloc(5), Ok(6));
    }

    #[test]
    fn test_dealloc_middle_splits_run() {
        let mut allocator = Allocator::new(10);
        allocator.alloc(10).unwrap();
        allocator.dealloc(4, 2);
        assert_eq!(allocator.get_allocated_regions(), vec![(0, 4), (6, 4)]);
        assert_eq!(allocator.fragmented_free_size(), 2);
    }

    #[test]
    fn test_first_fit_reuses_gaps() {
        let mut allocator = Allocator::new(12);
        let a = allocator.alloc(4).unwrap();
        let _b = allocator.alloc(4).unwrap();
        allocator.dealloc(a, 4);

        // Leading gap is reused before the tail
        assert_eq!(allocator.alloc(2), Ok(0));
        assert_eq!(allocator.alloc(2), Ok(2));
        assert_eq!(allocator.get_allocated_regions(), vec![(0, 8)]);
    }

    #[test]
    fn test_exact_gap_merges_neighbours() {
        let mut allocator = Allocator::new(12);
        allocator.alloc(3).unwrap();
        let b = allocator.alloc(3).unwrap();
        allocator.alloc(3).unwrap();
        allocator.dealloc(b, 3);
        assert_eq!(allocator.get_allocated_regions().len(), 2);

        assert_eq!(allocator.alloc(3), Ok(3));
        assert_eq!(allocator.get_allocated_regions(), vec![(0, 9)]);
    }

    #[test]
    fn test_realloc_shrink_in_place() {
        let mut allocator = Allocator::new(10);
        allocator.alloc(6).unwrap();
        assert_eq!(
            allocator.realloc(0, 6, 2),
            Ok(Reallocation::InPlace { start: 0 })
        );
        assert_eq!(allocator.get_allocated_regions(), vec![(0, 2)]);
    }

    #[test]
    fn test_realloc_grow_into_tail() {
        let mut allocator = Allocator::new(10);
        allocator.alloc(4).unwrap();
        assert_eq!(
            allocator.realloc(0, 4, 9),
            Ok(Reallocation::InPlace { start: 0 })
        );
        assert_eq!(allocator.get_allocated_regions(), vec![(0, 9)]);
    }

    #[test]
    fn test_realloc_move_reserves_before_free() {
        let mut allocator = Allocator::new(16);
        let a = allocator.alloc(4).unwrap();
        allocator.alloc(4).unwrap();

        let Ok(Reallocation::Moved(pending)) = allocator.realloc(a, 4, 6) else {
            panic!("expected a move");
        };
        assert_eq!(pending.old_start(), 0);
        assert_eq!(pending.new_start(), 8);
        assert_eq!(pending.copy_count(), 4);

        // Source and destination are both held until the move completes
        assert_eq!(allocator.allocated_size(), 14);

        let new_start = allocator.complete_move(pending);
        assert_eq!(new_start, 8);
        assert_eq!(allocator.get_allocated_regions(), vec![(4, 10)]);
    }

    #[test]
    fn test_cancel_move_restores_old_region() {
        let mut allocator = Allocator::new(16);
        let a = allocator.alloc(4).unwrap();
        allocator.alloc(4).unwrap();
        let Ok(Reallocation::Moved(pending)) = allocator.realloc(a, 4, 6) else {
            panic!("expected a move");
        };
        assert_eq!(allocator.cancel_move(pending), 0);
        assert_eq!(allocator.get_allocated_regions(), vec![(0, 8)]);
    }

    #[test]
    fn test_diagnostics() {
        let mut allocator = Allocator::new(20);
        assert_eq!(allocator.usage(), 0.0);
        allocator.alloc(10).unwrap();
        allocator.dealloc(0, 5);
        assert_eq!(allocator.usage(), 0.25);
        assert_eq!(allocator.free_size(), 15);
        assert_eq!(allocator.fragmented_free_size(), 5);
        assert!((allocator.fragmentation() - 5.0 / 15.0).abs() < 1e-6);
    }

    #[test]
    fn test_random_operations_keep_regions_disjoint() {
        let mut rng = StdRng::seed_from_u64(0x7e11);
        let mut allocator = Allocator::new(8);
        let mut live: Vec<(usize, usize)> = Vec::new();

        for _ in 0..2000 {
            match rng.random_range(0..3) {
                0 => {
                    let count = rng.random_range(1..12);
                    let start = loop {
                        match allocator.alloc(count) {
                            Ok(start) => break start,
                            Err(AllocError::OutOfSpace { required_capacity }) => {
                                let grown = (allocator.capacity() * 2).max(required_capacity);
                                allocator.set_capacity(grown);
                            }
                        }
                    };
                    live.push((start, count));
                }
                1 if !live.is_empty() => {
                    let (start, count) = live.swap_remove(rng.random_range(0..live.len()));
                    allocator.dealloc(start, count);
                }
                2 if !live.is_empty() => {
                    let index = rng.random_range(0..live.len());
                    let (start, count) = live[index];
                    let new_count = rng.random_range(1..16);
                    let new_start = loop {
                        match allocator.realloc(start, count, new_count) {
                            Ok(Reallocation::InPlace { start }) => break start,
                            Ok(Reallocation::Moved(pending)) => {
                                break allocator.complete_move(pending)
                            }
                            Err(AllocError::OutOfSpace { required_capacity }) => {
                                let grown = (allocator.capacity() * 2).max(required_capacity);
                                allocator.set_capacity(grown);
                            }
                        }
                    };
                    live[index] = (new_start, new_count);
                }
                _ => {}
            }

            assert_disjoint(&allocator);
            let live_total: usize = live.iter().map(|(_, count)| count).sum();
            assert_eq!(allocator.allocated_size(), live_total);

            // Every live region lies inside one allocated run
            let regions = allocator.get_allocated_regions();
            for &(start, count) in &live {
                assert!(regions
                    .iter()
                    .any(|&(run, size)| start >= run && start + count <= run + size));
            }
        }
    }
}
