// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Generic flat VA -> PA map.
//!
//! The address space is a `Vec` of [`Block`]s sorted by VA. Each block starts a
//! run that extends to the next block; the backing advances with VA inside the
//! run. The first block always starts at VA 0 and the last block is always an
//! unmapped terminator covering everything above it.
//!
//! All mutation goes through [`BlockList::map_locked`], which splits straddled
//! blocks, splices the new run in and coalesces mergeable neighbours, so the
//! list stays sorted and minimal after every call.

use std::fmt;
use std::ops::{Add, Sub};

use parking_lot::{Mutex, MutexGuard};

// ---------------------------------------------------------------------------
// Address and backing traits
// ---------------------------------------------------------------------------

/// Unsigned integer type used for virtual addresses.
pub trait VaType:
    Copy
    + Ord
    + Default
    + fmt::Debug
    + fmt::UpperHex
    + Send
    + Sync
    + 'static
    + Add<Output = Self>
    + Sub<Output = Self>
{
    const ZERO: Self;
    /// Width of the type in bits.
    const BITS: u32;

    fn to_u64(self) -> u64;

    /// Truncating conversion from `u64`.
    fn from_u64(value: u64) -> Self;
}

macro_rules! impl_va_type {
    ($($t:ty),*) => {
        $(
            impl VaType for $t {
                const ZERO: Self = 0;
                const BITS: u32 = <$t>::BITS;

                #[inline]
                fn to_u64(self) -> u64 {
                    self as u64
                }

                #[inline]
                fn from_u64(value: u64) -> Self {
                    value as $t
                }
            }
        )*
    };
}

impl_va_type!(u32, u64);

/// Physical backing stored in a block.
///
/// `advance` decides whether the backing is contiguous: a contiguous backing
/// returns the value `delta` bytes further into the run, a flag-like backing
/// returns itself. Two neighbouring blocks merge when the first one, advanced
/// by its length, equals the second and their extra info matches.
pub trait Backing: Clone + PartialEq + fmt::Debug + Send + Sync {
    /// The hole value.
    fn unmapped() -> Self;

    fn is_mapped(&self) -> bool;

    fn advance(&self, delta: u64) -> Self;
}

/// Allocation flag backing used by the VA allocator.
impl Backing for bool {
    #[inline]
    fn unmapped() -> Self {
        false
    }

    #[inline]
    fn is_mapped(&self) -> bool {
        *self
    }

    #[inline]
    fn advance(&self, _delta: u64) -> Self {
        *self
    }
}

/// Per-block metadata carried alongside the backing.
pub trait BlockInfo: Clone + PartialEq + Default + fmt::Debug + Send + Sync {}

impl<T: Clone + PartialEq + Default + fmt::Debug + Send + Sync> BlockInfo for T {}

/// Receives the ranges whose mappings were removed or replaced.
///
/// Called after the map lock is released, so implementations may call back
/// into the map that notified them.
pub trait UnmapListener<V>: Send + Sync {
    fn on_unmap(&self, virt: V, size: V);
}

impl<V, F> UnmapListener<V> for F
where
    F: Fn(V, V) + Send + Sync,
{
    fn on_unmap(&self, virt: V, size: V) {
        self(virt, size)
    }
}

// ---------------------------------------------------------------------------
// Block
// ---------------------------------------------------------------------------

/// Start of a run of VA with uniform backing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Block<V, P, E> {
    pub virt: V,
    pub phys: P,
    pub extra: E,
}

impl<V: VaType, P: Backing, E: BlockInfo> Block<V, P, E> {
    pub fn new(virt: V, phys: P, extra: E) -> Self {
        Self { virt, phys, extra }
    }

    #[inline]
    pub fn is_mapped(&self) -> bool {
        self.phys.is_mapped()
    }

    #[inline]
    pub fn is_unmapped(&self) -> bool {
        !self.phys.is_mapped()
    }

    /// Whether `next` is just the continuation of this run.
    pub(crate) fn continues_into(&self, next: &Self) -> bool {
        self.extra == next.extra
            && self.phys.advance((next.virt - self.virt).to_u64()) == next.phys
    }
}

// ---------------------------------------------------------------------------
// BlockList
// ---------------------------------------------------------------------------

/// The sorted block vector. Only reachable through the map's lock.
pub struct BlockList<V, P, E> {
    blocks: Vec<Block<V, P, E>>,
}

impl<V: VaType, P: Backing, E: BlockInfo> BlockList<V, P, E> {
    fn new() -> Self {
        Self {
            blocks: vec![Block::new(V::ZERO, P::unmapped(), E::default())],
        }
    }

    pub fn as_slice(&self) -> &[Block<V, P, E>] {
        &self.blocks
    }

    /// Index of the block whose run contains `virt`.
    #[inline]
    pub fn find(&self, virt: V) -> usize {
        // blocks[0].virt == 0, so the partition point is at least 1.
        self.blocks.partition_point(|b| b.virt <= virt) - 1
    }

    /// End of the run started by `blocks[index]`, `None` for the terminator.
    #[inline]
    pub fn run_end(&self, index: usize) -> Option<V> {
        self.blocks.get(index + 1).map(|b| b.virt)
    }

    /// Map `[virt, virt + size)` to `phys`.
    ///
    /// Returns `true` if any previously mapped run was overwritten.
    pub fn map_locked(&mut self, virt: V, phys: P, size: V, extra: E) -> bool {
        let end = virt + size;
        let extra = if phys.is_mapped() { extra } else { E::default() };

        // The run containing `end` keeps going after the new mapping, so it
        // needs a tail block carrying its backing advanced to `end`.
        let end_index = self.find(end);
        let end_block = &self.blocks[end_index];
        let tail = (end_block.virt != end).then(|| {
            Block::new(
                end,
                end_block.phys.advance((end - end_block.virt).to_u64()),
                end_block.extra.clone(),
            )
        });

        let first_overlap = self.find(virt);
        let splice_start = self.blocks.partition_point(|b| b.virt < virt);
        let splice_end = self.blocks.partition_point(|b| b.virt < end);

        let displaced = self.blocks[first_overlap..splice_end]
            .iter()
            .any(Block::is_mapped);

        let inserted = std::iter::once(Block::new(virt, phys, extra)).chain(tail);
        self.blocks.splice(splice_start..splice_end, inserted);

        // Previous run, new run, tail, and the run after the tail.
        self.coalesce(splice_start.saturating_sub(1), splice_start + 2);

        displaced
    }

    /// Unmap `[virt, virt + size)`, merging with unmapped neighbours.
    ///
    /// Returns `true` if any mapped run was removed.
    pub fn unmap_locked(&mut self, virt: V, size: V) -> bool {
        self.map_locked(virt, P::unmapped(), size, E::default())
    }

    /// Merge mergeable neighbours among `blocks[first..=last]`.
    fn coalesce(&mut self, first: usize, last: usize) {
        let mut last = last.min(self.blocks.len() - 1);
        let mut i = first;
        while i < last {
            if self.blocks[i].continues_into(&self.blocks[i + 1]) {
                self.blocks.remove(i + 1);
                last -= 1;
            } else {
                i += 1;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// FlatAddressSpaceMap
// ---------------------------------------------------------------------------

/// Thread-safe VA -> PA interval map over a `BITS`-bit address space.
pub struct FlatAddressSpaceMap<V, P, E, const BITS: u32> {
    blocks: Mutex<BlockList<V, P, E>>,
    /// Soft limit on the highest VA callers are expected to use.
    va_limit: V,
    unmap_listener: Option<Box<dyn UnmapListener<V>>>,
}

impl<V: VaType, P: Backing, E: BlockInfo, const BITS: u32> FlatAddressSpaceMap<V, P, E, BITS> {
    /// The highest VA a `BITS`-bit address space can reach.
    pub fn va_maximum() -> V {
        assert!(
            BITS >= 1 && BITS <= V::BITS,
            "{}-bit address space does not fit a {}-bit VA type",
            BITS,
            V::BITS
        );
        V::from_u64(u64::MAX >> (64 - BITS))
    }

    pub fn new(va_limit: V) -> Self {
        Self::build(va_limit, None)
    }

    pub fn with_unmap_listener(va_limit: V, listener: impl UnmapListener<V> + 'static) -> Self {
        Self::build(va_limit, Some(Box::new(listener)))
    }

    fn build(va_limit: V, unmap_listener: Option<Box<dyn UnmapListener<V>>>) -> Self {
        let maximum = Self::va_maximum();
        assert!(
            va_limit <= maximum,
            "VA limit 0x{va_limit:X} exceeds the address space maximum 0x{maximum:X}"
        );
        Self {
            blocks: Mutex::new(BlockList::new()),
            va_limit,
            unmap_listener,
        }
    }

    #[inline]
    pub fn va_limit(&self) -> V {
        self.va_limit
    }

    /// Map `[virt, virt + size)` to `phys`.
    ///
    /// The range must lie below the VA limit. If the mapping replaces any
    /// mapped run, the unmap listener is told about the whole range.
    pub fn map(&self, virt: V, phys: P, size: V, extra: E) {
        if size == V::ZERO {
            log::warn!("address_space: ignoring zero-sized map at 0x{:X}", virt);
            return;
        }
        self.debug_check_range(virt, size);

        let displaced = self.blocks.lock().map_locked(virt, phys, size, extra);
        log::trace!(
            "address_space: map 0x{:X}..0x{:X} displaced={}",
            virt,
            virt + size,
            displaced
        );

        if displaced {
            self.notify_unmap(virt, size);
        }
    }

    /// Unmap `[virt, virt + size)`. Unmapping a hole is a no-op on the layout.
    pub fn unmap(&self, virt: V, size: V) {
        if size == V::ZERO {
            log::warn!("address_space: ignoring zero-sized unmap at 0x{:X}", virt);
            return;
        }
        self.debug_check_range(virt, size);

        self.blocks.lock().unmap_locked(virt, size);
        log::trace!("address_space: unmap 0x{:X}..0x{:X}", virt, virt + size);

        self.notify_unmap(virt, size);
    }

    /// Block covering `virt` together with the end of its run.
    pub fn lookup(&self, virt: V) -> (Block<V, P, E>, Option<V>) {
        let blocks = self.blocks.lock();
        let index = blocks.find(virt);
        (blocks.as_slice()[index].clone(), blocks.run_end(index))
    }

    /// Snapshot of the current block list.
    pub fn blocks(&self) -> Vec<Block<V, P, E>> {
        self.blocks.lock().as_slice().to_vec()
    }

    pub fn block_count(&self) -> usize {
        self.blocks.lock().as_slice().len()
    }

    /// Lock the block list for a search-then-mutate sequence.
    pub(crate) fn lock(&self) -> MutexGuard<'_, BlockList<V, P, E>> {
        self.blocks.lock()
    }

    /// Must be called with the block lock released.
    pub(crate) fn notify_unmap(&self, virt: V, size: V) {
        if let Some(listener) = &self.unmap_listener {
            listener.on_unmap(virt, size);
        }
    }

    fn debug_check_range(&self, virt: V, size: V) {
        debug_assert!(
            virt.to_u64()
                .checked_add(size.to_u64())
                .is_some_and(|end| end <= self.va_limit.to_u64()),
            "range 0x{:X}+0x{:X} exceeds the VA limit 0x{:X}",
            virt,
            size,
            self.va_limit
        );
    }
}

impl<V, P, E, const BITS: u32> fmt::Debug for FlatAddressSpaceMap<V, P, E, BITS>
where
    V: VaType,
    P: Backing,
    E: BlockInfo,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FlatAddressSpaceMap")
            .field("va_limit", &format_args!("0x{:X}", self.va_limit))
            .field("blocks", &self.blocks.lock().as_slice())
            .field("has_unmap_listener", &self.unmap_listener.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, OnceLock, Weak};

    use parking_lot::Mutex;
    use rand::rngs::SmallRng;
    use rand::{Rng, SeedableRng};

    use super::*;
    use crate::testing::assert_invariants;

    /// Contiguous test backing: `None` is a hole.
    #[derive(Debug, Clone, Copy, PartialEq)]
    struct Pa(Option<u64>);

    impl Backing for Pa {
        fn unmapped() -> Self {
            Pa(None)
        }

        fn is_mapped(&self) -> bool {
            self.0.is_some()
        }

        fn advance(&self, delta: u64) -> Self {
            Pa(self.0.map(|pa| pa + delta))
        }
    }

    type TestMap = FlatAddressSpaceMap<u64, Pa, u8, 36>;

    const LIMIT: u64 = 0x100_0000;

    fn runs(map: &TestMap) -> Vec<(u64, Option<u64>, u8)> {
        map.blocks()
            .into_iter()
            .map(|b| (b.virt, b.phys.0, b.extra))
            .collect()
    }

    #[test]
    fn test_empty_map_is_single_terminator() {
        let map = TestMap::new(LIMIT);
        assert_eq!(runs(&map), vec![(0, None, 0)]);
        assert_eq!(TestMap::va_maximum(), 0xF_FFFF_FFFF);
    }

    #[test]
    fn test_map_into_empty_space() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0x2000, 0);
        assert_eq!(
            runs(&map),
            vec![(0, None, 0), (0x1000, Some(0xA000), 0), (0x3000, None, 0)]
        );
        assert_invariants(&map.blocks());
    }

    #[test]
    fn test_map_at_zero_replaces_base_block() {
        let map = TestMap::new(LIMIT);
        map.map(0, Pa(Some(0x5000)), 0x1000, 0);
        assert_eq!(runs(&map), vec![(0, Some(0x5000), 0), (0x1000, None, 0)]);
        assert_invariants(&map.blocks());
    }

    #[test]
    fn test_contiguous_extension_merges() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0x1000, 0);
        map.map(0x2000, Pa(Some(0xB000)), 0x1000, 0);
        assert_eq!(
            runs(&map),
            vec![(0, None, 0), (0x1000, Some(0xA000), 0), (0x3000, None, 0)]
        );
    }

    #[test]
    fn test_discontiguous_neighbours_stay_split() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0x1000, 0);
        map.map(0x2000, Pa(Some(0xF000)), 0x1000, 0);
        assert_eq!(map.block_count(), 4);
        assert_invariants(&map.blocks());
    }

    #[test]
    fn test_extra_info_prevents_merge() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0x1000, 0);
        map.map(0x2000, Pa(Some(0xB000)), 0x1000, 1);
        assert_eq!(
            runs(&map),
            vec![
                (0, None, 0),
                (0x1000, Some(0xA000), 0),
                (0x2000, Some(0xB000), 1),
                (0x3000, None, 0)
            ]
        );
    }

    #[test]
    fn test_map_inside_existing_run_splits_it() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0x4000, 0);
        map.map(0x2000, Pa(Some(0x9_0000)), 0x1000, 0);
        assert_eq!(
            runs(&map),
            vec![
                (0, None, 0),
                (0x1000, Some(0xA000), 0),
                (0x2000, Some(0x9_0000), 0),
                (0x3000, Some(0xC000), 0),
                (0x5000, None, 0)
            ]
        );
    }

    #[test]
    fn test_map_spanning_several_runs() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0x1000, 0);
        map.map(0x3000, Pa(Some(0xB000)), 0x1000, 0);
        map.map(0x5000, Pa(Some(0xC000)), 0x1000, 0);
        map.map(0x1800, Pa(Some(0x10_0000)), 0x4000, 0);
        assert_eq!(
            runs(&map),
            vec![
                (0, None, 0),
                (0x1000, Some(0xA000), 0),
                (0x1800, Some(0x10_0000), 0),
                (0x5800, Some(0xC800), 0),
                (0x6000, None, 0)
            ]
        );
    }

    #[test]
    fn test_unmap_merges_holes() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0x1000, 0);
        map.map(0x3000, Pa(Some(0xB000)), 0x1000, 0);
        map.unmap(0x1000, 0x1000);
        assert_eq!(
            runs(&map),
            vec![(0, None, 0), (0x3000, Some(0xB000), 0), (0x4000, None, 0)]
        );
        map.unmap(0x3000, 0x1000);
        assert_eq!(runs(&map), vec![(0, None, 0)]);
    }

    #[test]
    fn test_unmap_is_idempotent() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0x8000, 2);
        map.unmap(0x3000, 0x2000);
        let once = runs(&map);
        map.unmap(0x3000, 0x2000);
        assert_eq!(runs(&map), once);
    }

    #[test]
    fn test_zero_sized_calls_are_ignored() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0, 0);
        map.unmap(0x1000, 0);
        assert_eq!(runs(&map), vec![(0, None, 0)]);
    }

    #[test]
    fn test_lookup() {
        let map = TestMap::new(LIMIT);
        map.map(0x1000, Pa(Some(0xA000)), 0x2000, 0);
        let (block, end) = map.lookup(0x2800);
        assert_eq!(block.virt, 0x1000);
        assert_eq!(block.phys, Pa(Some(0xA000)));
        assert_eq!(end, Some(0x3000));
        let (block, end) = map.lookup(0x10_0000);
        assert!(block.is_unmapped());
        assert_eq!(end, None);
    }

    #[test]
    fn test_listener_sees_unmaps_and_displacing_maps() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let map = TestMap::with_unmap_listener(LIMIT, move |virt: u64, size: u64| {
            sink.lock().push((virt, size));
        });

        map.map(0x1000, Pa(Some(0xA000)), 0x1000, 0);
        assert!(seen.lock().is_empty());

        map.map(0x1800, Pa(Some(0xB000)), 0x1000, 0);
        map.unmap(0x1000, 0x800);
        assert_eq!(*seen.lock(), vec![(0x1800, 0x1000), (0x1000, 0x800)]);
    }

    #[test]
    fn test_listener_may_reenter_map() {
        let slot: Arc<OnceLock<Weak<TestMap>>> = Arc::new(OnceLock::new());
        let observed = Arc::new(Mutex::new(0usize));

        let listener_slot = slot.clone();
        let listener_observed = observed.clone();
        let map = Arc::new(TestMap::with_unmap_listener(LIMIT, move |_: u64, _: u64| {
            if let Some(map) = listener_slot.get().and_then(Weak::upgrade) {
                *listener_observed.lock() = map.block_count();
            }
        }));
        slot.set(Arc::downgrade(&map)).unwrap();

        map.map(0x1000, Pa(Some(0xA000)), 0x1000, 0);
        map.unmap(0x1000, 0x1000);
        assert_eq!(*observed.lock(), 1);
    }

    #[test]
    #[should_panic]
    fn test_va_limit_above_maximum_panics() {
        let _ = TestMap::new(1 << 36);
    }

    /// Drive random map/unmap sequences and compare against a page array.
    #[test]
    fn test_random_sequences_match_reference() {
        const PAGE: u64 = 0x100;
        const PAGES: usize = 64;

        for seed in 0..16u64 {
            let mut rng = SmallRng::seed_from_u64(seed);
            let map = TestMap::new(LIMIT);
            let mut reference: Vec<(Option<u64>, u8)> = vec![(None, 0); PAGES];

            for _ in 0..200 {
                let start = rng.gen_range(0..PAGES);
                let len = rng.gen_range(1..=PAGES - start);
                let virt = start as u64 * PAGE;
                let size = len as u64 * PAGE;

                if rng.gen_bool(0.3) {
                    map.unmap(virt, size);
                    for page in &mut reference[start..start + len] {
                        *page = (None, 0);
                    }
                } else {
                    // Small PA pool so that contiguous remaps happen often.
                    let phys = rng.gen_range(0..4u64) * 0x1000;
                    let extra = rng.gen_range(0..2u8);
                    map.map(virt, Pa(Some(phys)), size, extra);
                    for (i, page) in reference[start..start + len].iter_mut().enumerate() {
                        *page = (Some(phys + i as u64 * PAGE), extra);
                    }
                }

                let blocks = map.blocks();
                assert_invariants(&blocks);
                assert_eq!(blocks, canonical(&reference, PAGE), "seed {seed}");
            }
        }
    }

    /// Minimal block list describing a page array.
    fn canonical(pages: &[(Option<u64>, u8)], page_size: u64) -> Vec<Block<u64, Pa, u8>> {
        let mut blocks: Vec<Block<u64, Pa, u8>> = Vec::new();
        let iter = pages
            .iter()
            .copied()
            .chain(std::iter::once((None, 0)))
            .enumerate();
        for (i, (phys, extra)) in iter {
            let block = Block::new(i as u64 * page_size, Pa(phys), extra);
            match blocks.last() {
                Some(prev) if prev.continues_into(&block) => {}
                _ => blocks.push(block),
            }
        }
        blocks
    }
}
