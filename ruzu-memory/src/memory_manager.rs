// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Byte-addressable memory manager on top of [`FlatAddressSpaceMap`].
//!
//! Mapped runs point into [`HostMemory`] regions and advance with VA, so one
//! `map` call that aliases existing boundaries can produce several
//! discontiguous host runs. Sparse runs have no backing of their own; they
//! resolve to a single zero-filled pool shared by every sparse mapping, so
//! reads return zero and writes are accepted but not isolated.

use byteorder::{ByteOrder, LittleEndian};

use crate::address_space::{Backing, Block, FlatAddressSpaceMap, UnmapListener, VaType};
use crate::error::{MemoryError, MemoryResult};
use crate::host_memory::HostMemory;

/// What a memory manager block points at.
#[derive(Debug, Clone)]
pub enum MemoryBacking {
    Unmapped,
    /// `offset` is the host offset of the block's first byte.
    Host { memory: HostMemory, offset: u64 },
    /// Backed by the manager's shared sparse pool.
    Sparse,
}

impl PartialEq for MemoryBacking {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Unmapped, Self::Unmapped) | (Self::Sparse, Self::Sparse) => true,
            (
                Self::Host { memory: a, offset: a_offset },
                Self::Host { memory: b, offset: b_offset },
            ) => a.ptr_eq(b) && a_offset == b_offset,
            _ => false,
        }
    }
}

impl Backing for MemoryBacking {
    fn unmapped() -> Self {
        Self::Unmapped
    }

    fn is_mapped(&self) -> bool {
        !matches!(self, Self::Unmapped)
    }

    fn advance(&self, delta: u64) -> Self {
        match self {
            Self::Host { memory, offset } => Self::Host {
                memory: memory.clone(),
                offset: offset + delta,
            },
            other => other.clone(),
        }
    }
}

/// Memory manager specific block info.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryBlockInfo {
    pub sparse_mapped: bool,
}

/// A host byte range produced by [`FlatMemoryManager::translate_range`].
#[derive(Debug, Clone)]
pub struct HostSpan {
    pub memory: HostMemory,
    pub offset: u64,
    pub len: u64,
}

impl HostSpan {
    pub fn read(&self, dst: &mut [u8]) -> MemoryResult<()> {
        self.memory.read(self.offset, dst)
    }

    pub fn write(&self, src: &[u8]) -> MemoryResult<()> {
        self.memory.write(self.offset, src)
    }
}

/// Block type of a [`FlatMemoryManager`].
pub type MemoryBlock<V> = Block<V, MemoryBacking, MemoryBlockInfo>;

/// VA -> host memory map with read/write and sparse mapping support.
pub struct FlatMemoryManager<V: VaType, const BITS: u32> {
    map: FlatAddressSpaceMap<V, MemoryBacking, MemoryBlockInfo, BITS>,
    /// Zero-filled region returned by `translate_range` for sparse runs.
    sparse_pool: HostMemory,
}

impl<V: VaType, const BITS: u32> FlatMemoryManager<V, BITS> {
    pub fn new(va_limit: V, sparse_pool_size: u64) -> MemoryResult<Self> {
        Ok(Self {
            map: FlatAddressSpaceMap::new(va_limit),
            sparse_pool: Self::create_sparse_pool(sparse_pool_size)?,
        })
    }

    pub fn with_unmap_listener(
        va_limit: V,
        sparse_pool_size: u64,
        listener: impl UnmapListener<V> + 'static,
    ) -> MemoryResult<Self> {
        Ok(Self {
            map: FlatAddressSpaceMap::with_unmap_listener(va_limit, listener),
            sparse_pool: Self::create_sparse_pool(sparse_pool_size)?,
        })
    }

    fn create_sparse_pool(size: u64) -> MemoryResult<HostMemory> {
        let pool = HostMemory::new(size)?;
        log::debug!("memory_manager: sparse pool of 0x{:X} bytes", size);
        Ok(pool)
    }

    #[inline]
    pub fn va_limit(&self) -> V {
        self.map.va_limit()
    }

    pub fn sparse_pool_size(&self) -> u64 {
        self.sparse_pool.size()
    }

    // -- Mapping operations -------------------------------------------------

    /// Map `[virt, virt + size)` to `memory` starting at host `offset`.
    pub fn map(&self, virt: V, memory: &HostMemory, offset: u64, size: V) {
        let phys = MemoryBacking::Host {
            memory: memory.clone(),
            offset,
        };
        self.map.map(virt, phys, size, MemoryBlockInfo::default());
    }

    /// Map `[virt, virt + size)` as sparse: accessible, but backed by the
    /// shared zero pool.
    pub fn map_sparse(&self, virt: V, size: V) {
        self.map.map(
            virt,
            MemoryBacking::Sparse,
            size,
            MemoryBlockInfo {
                sparse_mapped: true,
            },
        );
    }

    pub fn unmap(&self, virt: V, size: V) {
        self.map.unmap(virt, size);
    }

    // -- Translation --------------------------------------------------------

    /// Host spans covering `[virt, virt + size)`, one per intersected block,
    /// in VA order.
    ///
    /// Fails with [`MemoryError::PageFault`] at the first address of the range
    /// that is neither mapped nor sparse.
    pub fn translate_range(&self, virt: V, size: V) -> MemoryResult<Vec<HostSpan>> {
        let mut spans = Vec::new();
        let end = virt.to_u64() + size.to_u64();
        let mut cursor = virt.to_u64();

        let blocks = self.map.lock();
        let mut index = blocks.find(virt);
        while cursor < end {
            let block = &blocks.as_slice()[index];
            let run_end = blocks.run_end(index).map_or(u64::MAX, |v| v.to_u64());
            let len = run_end.min(end) - cursor;

            match &block.phys {
                MemoryBacking::Host { memory, offset } => spans.push(HostSpan {
                    memory: memory.clone(),
                    offset: offset + (cursor - block.virt.to_u64()),
                    len,
                }),
                MemoryBacking::Sparse => self.push_sparse(&mut spans, len),
                MemoryBacking::Unmapped => return Err(MemoryError::PageFault(cursor)),
            }

            cursor += len;
            index += 1;
        }

        Ok(spans)
    }

    /// Sparse runs longer than the pool wrap around to its start.
    fn push_sparse(&self, spans: &mut Vec<HostSpan>, mut len: u64) {
        while len > 0 {
            let piece = len.min(self.sparse_pool.size());
            spans.push(HostSpan {
                memory: self.sparse_pool.clone(),
                offset: 0,
                len: piece,
            });
            len -= piece;
        }
    }

    /// Host location of a single VA, `None` if it is not mapped.
    pub fn translate(&self, virt: V) -> Option<(HostMemory, u64)> {
        let (block, _) = self.map.lookup(virt);
        match block.phys {
            MemoryBacking::Host { memory, offset } => {
                Some((memory, offset + (virt - block.virt).to_u64()))
            }
            MemoryBacking::Sparse => Some((self.sparse_pool.clone(), 0)),
            MemoryBacking::Unmapped => None,
        }
    }

    // -- Read operations ----------------------------------------------------

    /// Read `dst.len()` bytes starting at `virt`.
    ///
    /// Spans are resolved under the map lock; the copy itself runs unlocked,
    /// so unmapping a range while it is being accessed is a caller error.
    pub fn read(&self, virt: V, dst: &mut [u8]) -> MemoryResult<()> {
        let spans = self.translate_range(virt, V::from_u64(dst.len() as u64))?;
        let mut done = 0usize;
        for span in &spans {
            let len = span.len as usize;
            span.read(&mut dst[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    /// Read `size` bytes starting at `virt` into a new buffer.
    pub fn read_bytes(&self, virt: V, size: usize) -> MemoryResult<Vec<u8>> {
        let mut buf = vec![0u8; size];
        self.read(virt, &mut buf)?;
        Ok(buf)
    }

    pub fn read_u8(&self, virt: V) -> MemoryResult<u8> {
        let mut buf = [0u8; 1];
        self.read(virt, &mut buf)?;
        Ok(buf[0])
    }

    pub fn read_u16(&self, virt: V) -> MemoryResult<u16> {
        let mut buf = [0u8; 2];
        self.read(virt, &mut buf)?;
        Ok(LittleEndian::read_u16(&buf))
    }

    pub fn read_u32(&self, virt: V) -> MemoryResult<u32> {
        let mut buf = [0u8; 4];
        self.read(virt, &mut buf)?;
        Ok(LittleEndian::read_u32(&buf))
    }

    pub fn read_u64(&self, virt: V) -> MemoryResult<u64> {
        let mut buf = [0u8; 8];
        self.read(virt, &mut buf)?;
        Ok(LittleEndian::read_u64(&buf))
    }

    // -- Write operations ---------------------------------------------------

    /// Write `src` starting at `virt`. Same locking rules as [`Self::read`].
    pub fn write(&self, virt: V, src: &[u8]) -> MemoryResult<()> {
        let spans = self.translate_range(virt, V::from_u64(src.len() as u64))?;
        let mut done = 0usize;
        for span in &spans {
            let len = span.len as usize;
            span.write(&src[done..done + len])?;
            done += len;
        }
        Ok(())
    }

    pub fn write_u8(&self, virt: V, value: u8) -> MemoryResult<()> {
        self.write(virt, &[value])
    }

    pub fn write_u16(&self, virt: V, value: u16) -> MemoryResult<()> {
        let mut buf = [0u8; 2];
        LittleEndian::write_u16(&mut buf, value);
        self.write(virt, &buf)
    }

    pub fn write_u32(&self, virt: V, value: u32) -> MemoryResult<()> {
        let mut buf = [0u8; 4];
        LittleEndian::write_u32(&mut buf, value);
        self.write(virt, &buf)
    }

    pub fn write_u64(&self, virt: V, value: u64) -> MemoryResult<()> {
        let mut buf = [0u8; 8];
        LittleEndian::write_u64(&mut buf, value);
        self.write(virt, &buf)
    }

    // -- Introspection ------------------------------------------------------

    pub fn blocks(&self) -> Vec<MemoryBlock<V>> {
        self.map.blocks()
    }
}
