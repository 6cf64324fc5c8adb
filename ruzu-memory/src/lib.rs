// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Flat address-space maps for guest memory.
//!
//! [`FlatAddressSpaceMap`] is the generic sorted-interval VA -> PA map.
//! [`FlatMemoryManager`] specializes it for host-memory backings with
//! read/write and sparse mappings; [`FlatAllocator`] specializes it for VA
//! allocation.

pub mod address_space;
pub mod allocator;
pub mod error;
pub mod host_memory;
pub mod memory_manager;

#[cfg(test)]
mod testing;

pub use address_space::{Backing, Block, BlockInfo, FlatAddressSpaceMap, UnmapListener, VaType};
pub use allocator::FlatAllocator;
pub use error::{MemoryError, MemoryResult};
pub use host_memory::HostMemory;
pub use memory_manager::{FlatMemoryManager, HostSpan, MemoryBacking, MemoryBlock, MemoryBlockInfo};
