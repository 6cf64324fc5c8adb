// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! VA allocator on top of [`FlatAddressSpaceMap`].
//!
//! Allocation runs in two phases. While the space is filling up linearly, a
//! bump cursor hands out the first free gap at or after itself. Once nothing
//! fits between the cursor and the VA limit the allocator switches for good
//! to a first-fit scan of the whole block list from `va_start`, which also
//! picks up ranges released by [`FlatAllocator::free`].

use parking_lot::Mutex;

use crate::address_space::{Block, BlockList, FlatAddressSpaceMap, VaType};
use crate::error::{MemoryError, MemoryResult};

/// Block type of a [`FlatAllocator`]: `phys` is the allocated flag.
pub type AllocatorBlock<V> = Block<V, bool, ()>;

struct LinearCursor<V> {
    /// End of the last linear allocation.
    current_linear_alloc_end: V,
    /// Cleared once the linear phase has run out of space.
    linear: bool,
}

/// First-fit VA allocator over a `BITS`-bit address space.
pub struct FlatAllocator<V: VaType, const BITS: u32> {
    map: FlatAddressSpaceMap<V, bool, (), BITS>,
    /// No allocation is placed below this VA.
    va_start: V,
    /// Only locked while the block list lock is held.
    cursor: Mutex<LinearCursor<V>>,
}

impl<V: VaType, const BITS: u32> FlatAllocator<V, BITS> {
    pub fn new(va_start: V, va_limit: V) -> Self {
        Self {
            map: FlatAddressSpaceMap::new(va_limit),
            va_start,
            cursor: Mutex::new(LinearCursor {
                current_linear_alloc_end: va_start,
                linear: true,
            }),
        }
    }

    #[inline]
    pub fn va_start(&self) -> V {
        self.va_start
    }

    #[inline]
    pub fn va_limit(&self) -> V {
        self.map.va_limit()
    }

    /// Whether allocations are still served by the linear phase.
    pub fn is_linear(&self) -> bool {
        let _blocks = self.map.lock();
        self.cursor.lock().linear
    }

    /// Reserve `size` bytes of VA and return the start of the range.
    ///
    /// Fails with [`MemoryError::AddressSpaceFull`] only when no free gap of
    /// `size` exists anywhere in `[va_start, va_limit)`.
    pub fn allocate(&self, size: V) -> MemoryResult<V> {
        if size == V::ZERO {
            return Err(MemoryError::ZeroSize);
        }
        let size_u64 = size.to_u64();
        let limit = self.map.va_limit().to_u64();

        let mut blocks = self.map.lock();
        let mut cursor = self.cursor.lock();

        let mut start = None;
        if cursor.linear {
            start = first_fit(
                &blocks,
                cursor.current_linear_alloc_end.to_u64(),
                limit,
                size_u64,
            );
            match start {
                Some(start) => cursor.current_linear_alloc_end = V::from_u64(start + size_u64),
                None => {
                    cursor.linear = false;
                    log::debug!(
                        "allocator: linear phase exhausted at 0x{:X}, switching to first-fit scan",
                        cursor.current_linear_alloc_end
                    );
                }
            }
        }

        let start = match start {
            Some(start) => start,
            None => first_fit(&blocks, self.va_start.to_u64(), limit, size_u64)
                .ok_or(MemoryError::AddressSpaceFull { size: size_u64 })?,
        };

        let virt = V::from_u64(start);
        blocks.map_locked(virt, true, size, ());
        drop(cursor);
        drop(blocks);

        log::trace!("allocator: allocate 0x{:X}..0x{:X}", virt, virt + size);
        Ok(virt)
    }

    /// Mark `[virt, virt + size)` allocated. Overlap with existing
    /// allocations is not checked.
    pub fn allocate_fixed(&self, virt: V, size: V) {
        self.map.map(virt, true, size, ());
    }

    /// Release `[virt, virt + size)` so it can be allocated again.
    pub fn free(&self, virt: V, size: V) {
        self.map.unmap(virt, size);
    }

    pub fn blocks(&self) -> Vec<AllocatorBlock<V>> {
        self.map.blocks()
    }
}

/// Start of the first free gap of `size` bytes at or after `from` that ends
/// no higher than `limit`.
fn first_fit<V: VaType>(
    blocks: &BlockList<V, bool, ()>,
    from: u64,
    limit: u64,
    size: u64,
) -> Option<u64> {
    let list = blocks.as_slice();
    let mut index = blocks.find(V::from_u64(from));

    while let Some(block) = list.get(index) {
        let gap_start = block.virt.to_u64().max(from);
        if gap_start >= limit {
            break;
        }
        if block.is_unmapped() {
            let gap_end = blocks.run_end(index).map_or(limit, |v| v.to_u64().min(limit));
            if gap_end - gap_start >= size {
                return Some(gap_start);
            }
        }
        index += 1;
    }

    None
}
