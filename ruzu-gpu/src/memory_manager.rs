// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU virtual address space manager (GMMU).
//!
//! Combines a [`FlatAllocator`] that reserves GPU VA with a
//! [`FlatMemoryManager`] that maps reserved VA onto host memory. GPU VA is
//! 40 bits wide (1 TiB); reservations are rounded up to 4 KiB pages.

use std::time::Instant;

use ruzu_common::{page_align_up, GpuVAddr, MemorySettings, GPU_VA_BITS};
use ruzu_memory::{
    FlatAllocator, FlatMemoryManager, HostMemory, MemoryBlock, MemoryError, MemoryResult,
    UnmapListener,
};

use crate::semaphore::{gpu_ticks, FourWordResult, SemaphoreSize};

/// GPU virtual memory manager.
pub struct GpuMemoryManager {
    mmu: FlatMemoryManager<u64, GPU_VA_BITS>,
    allocator: FlatAllocator<u64, GPU_VA_BITS>,
    /// Epoch for semaphore timestamps.
    boot_time: Instant,
}

impl GpuMemoryManager {
    pub fn new(settings: &MemorySettings) -> MemoryResult<Self> {
        Ok(Self {
            mmu: FlatMemoryManager::new(settings.gpu_va_limit, settings.sparse_pool_size)?,
            allocator: FlatAllocator::new(settings.alloc_base, settings.gpu_va_limit),
            boot_time: Instant::now(),
        })
    }

    /// Like [`Self::new`], reporting every unmapped or remapped range to
    /// `listener` (e.g. to invalidate cached GPU resources).
    pub fn with_unmap_listener(
        settings: &MemorySettings,
        listener: impl UnmapListener<u64> + 'static,
    ) -> MemoryResult<Self> {
        Ok(Self {
            mmu: FlatMemoryManager::with_unmap_listener(
                settings.gpu_va_limit,
                settings.sparse_pool_size,
                listener,
            )?,
            allocator: FlatAllocator::new(settings.alloc_base, settings.gpu_va_limit),
            boot_time: Instant::now(),
        })
    }

    /// Highest GPU VA callers may use.
    pub fn va_limit(&self) -> GpuVAddr {
        self.mmu.va_limit()
    }

    /// Page-aligned size of `[gpu_va, gpu_va + size)`, which must end at or
    /// below the VA limit.
    fn checked_span(&self, gpu_va: GpuVAddr, size: u64) -> MemoryResult<u64> {
        page_align_up(size)
            .filter(|&aligned| {
                gpu_va
                    .checked_add(aligned)
                    .is_some_and(|end| end <= self.va_limit())
            })
            .ok_or(MemoryError::OutOfRange { virt: gpu_va, size })
    }

    // -- Mapping operations -------------------------------------------------

    /// Map already reserved GPU VA to host memory.
    pub fn map(&self, gpu_va: GpuVAddr, memory: &HostMemory, offset: u64, size: u64) {
        self.mmu.map(gpu_va, memory, offset, size);
        log::trace!(
            "gpu_mm: map GPU 0x{:X}..0x{:X} -> host+0x{:X}",
            gpu_va,
            gpu_va + size,
            offset
        );
    }

    /// Map already reserved GPU VA as sparse.
    pub fn map_sparse(&self, gpu_va: GpuVAddr, size: u64) {
        self.mmu.map_sparse(gpu_va, size);
        log::trace!("gpu_mm: sparse GPU 0x{:X}..0x{:X}", gpu_va, gpu_va + size);
    }

    /// Unmap a GPU VA range. The VA stays reserved.
    pub fn unmap(&self, gpu_va: GpuVAddr, size: u64) {
        self.mmu.unmap(gpu_va, size);
        log::trace!("gpu_mm: unmap GPU 0x{:X}..0x{:X}", gpu_va, gpu_va + size);
    }

    /// Reserve and map at a specific GPU VA.
    pub fn alloc_fixed(
        &self,
        gpu_va: GpuVAddr,
        memory: &HostMemory,
        offset: u64,
        size: u64,
    ) -> MemoryResult<()> {
        let aligned_size = self.checked_span(gpu_va, size)?;
        self.allocator.allocate_fixed(gpu_va, aligned_size);
        self.map(gpu_va, memory, offset, size);
        Ok(())
    }

    /// Reserve GPU VA without mapping it.
    pub fn reserve(&self, size: u64) -> MemoryResult<GpuVAddr> {
        let aligned_size = page_align_up(size).ok_or(MemoryError::AddressSpaceFull { size })?;
        self.allocator.allocate(aligned_size)
    }

    /// Reserve GPU VA and map it as sparse.
    pub fn reserve_sparse(&self, size: u64) -> MemoryResult<GpuVAddr> {
        let aligned_size = page_align_up(size).ok_or(MemoryError::AddressSpaceFull { size })?;
        let gpu_va = self.allocator.allocate(aligned_size)?;
        self.map_sparse(gpu_va, aligned_size);
        Ok(gpu_va)
    }

    /// Reserve GPU VA anywhere and map it to host memory.
    /// Returns the allocated GPU VA.
    pub fn alloc_any(&self, memory: &HostMemory, offset: u64, size: u64) -> MemoryResult<GpuVAddr> {
        let gpu_va = self.reserve(size)?;
        self.map(gpu_va, memory, offset, size);
        Ok(gpu_va)
    }

    /// Unmap a GPU VA range and release its reservation.
    pub fn free(&self, gpu_va: GpuVAddr, size: u64) -> MemoryResult<()> {
        let aligned_size = self.checked_span(gpu_va, size)?;
        self.mmu.unmap(gpu_va, size);
        self.allocator.free(gpu_va, aligned_size);
        log::trace!("gpu_mm: free GPU 0x{:X}..0x{:X}", gpu_va, gpu_va + size);
        Ok(())
    }

    // -- Access -------------------------------------------------------------

    /// Translate a GPU VA to its host location.
    /// Returns `None` if the address is not mapped.
    pub fn translate(&self, gpu_va: GpuVAddr) -> Option<(HostMemory, u64)> {
        self.mmu.translate(gpu_va)
    }

    /// Read bytes from GPU VA space.
    pub fn read(&self, gpu_va: GpuVAddr, dst: &mut [u8]) -> MemoryResult<()> {
        self.mmu.read(gpu_va, dst)
    }

    /// Write bytes to GPU VA space.
    pub fn write(&self, gpu_va: GpuVAddr, src: &[u8]) -> MemoryResult<()> {
        self.mmu.write(gpu_va, src)
    }

    pub fn read_u32(&self, gpu_va: GpuVAddr) -> MemoryResult<u32> {
        self.mmu.read_u32(gpu_va)
    }

    pub fn read_u64(&self, gpu_va: GpuVAddr) -> MemoryResult<u64> {
        self.mmu.read_u64(gpu_va)
    }

    pub fn write_u32(&self, gpu_va: GpuVAddr, value: u32) -> MemoryResult<()> {
        self.mmu.write_u32(gpu_va, value)
    }

    pub fn write_u64(&self, gpu_va: GpuVAddr, value: u64) -> MemoryResult<()> {
        self.mmu.write_u64(gpu_va, value)
    }

    /// Write a semaphore release result.
    ///
    /// One-word semaphores store the low 32 bits of `payload`; four-word
    /// semaphores store the full payload followed by a GPU tick timestamp.
    pub fn write_semaphore(
        &self,
        gpu_va: GpuVAddr,
        payload: u64,
        size: SemaphoreSize,
    ) -> MemoryResult<()> {
        match size {
            SemaphoreSize::OneWord => self.write_u32(gpu_va, payload as u32),
            SemaphoreSize::FourWords => {
                let elapsed = self.boot_time.elapsed().as_nanos() as u64;
                let result = FourWordResult {
                    value: payload,
                    timestamp: gpu_ticks(elapsed),
                };
                log::trace!(
                    "gpu_mm: semaphore release 0x{:X} <- {:?}",
                    gpu_va,
                    result
                );
                self.write(gpu_va, &result.to_bytes())
            }
        }
    }

    // -- Introspection ------------------------------------------------------

    /// Current GPU VA -> host mapping blocks.
    pub fn blocks(&self) -> Vec<MemoryBlock<u64>> {
        self.mmu.blocks()
    }

    pub fn allocator(&self) -> &FlatAllocator<u64, GPU_VA_BITS> {
        &self.allocator
    }
}
