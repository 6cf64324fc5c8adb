// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Host memory regions that back mapped guest VA.
//!
//! A region is a sparse anonymous mmap: the OS only commits pages that are
//! touched, so large regions (such as the sparse pool) cost nothing
//! up front.

use std::fmt;
use std::ops::Range;
use std::sync::Arc;

use memmap2::MmapMut;
use parking_lot::RwLock;

use crate::error::{MemoryError, MemoryResult};

struct HostRegion {
    data: RwLock<MmapMut>,
    size: u64,
}

/// Shared handle to a zero-initialised host byte region.
///
/// Cloning is cheap and yields a handle to the same bytes.
#[derive(Clone)]
pub struct HostMemory {
    region: Arc<HostRegion>,
}

impl HostMemory {
    /// Allocate a region of `size` bytes.
    pub fn new(size: u64) -> MemoryResult<Self> {
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        // Slices cannot be longer than isize::MAX bytes.
        let len = isize::try_from(size)
            .ok()
            .and_then(|len| usize::try_from(len).ok())
            .ok_or(MemoryError::HostTooLarge(size))?;
        let data = MmapMut::map_anon(len)?;
        log::debug!("host_memory: allocated region of 0x{:X} bytes", size);

        Ok(Self {
            region: Arc::new(HostRegion {
                data: RwLock::new(data),
                size,
            }),
        })
    }

    #[inline]
    pub fn size(&self) -> u64 {
        self.region.size
    }

    /// Whether both handles refer to the same region.
    #[inline]
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.region, &other.region)
    }

    /// Copy `dst.len()` bytes starting at `offset` into `dst`.
    pub fn read(&self, offset: u64, dst: &mut [u8]) -> MemoryResult<()> {
        let range = self.range(offset, dst.len())?;
        dst.copy_from_slice(&self.region.data.read()[range]);
        Ok(())
    }

    /// Copy `src` into the region starting at `offset`.
    pub fn write(&self, offset: u64, src: &[u8]) -> MemoryResult<()> {
        let range = self.range(offset, src.len())?;
        self.region.data.write()[range].copy_from_slice(src);
        Ok(())
    }

    fn range(&self, offset: u64, len: usize) -> MemoryResult<Range<usize>> {
        let out_of_bounds = || MemoryError::HostOutOfBounds {
            offset,
            len: len as u64,
            size: self.region.size,
        };
        let end = offset.checked_add(len as u64).ok_or_else(out_of_bounds)?;
        if end > self.region.size {
            return Err(out_of_bounds());
        }
        // Both fit in usize: the region was created from a usize length.
        Ok(offset as usize..end as usize)
    }
}

impl fmt::Debug for HostMemory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostMemory")
            .field("region", &Arc::as_ptr(&self.region))
            .field("size", &format_args!("0x{:X}", self.region.size))
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_region_is_zeroed() {
        let mem = HostMemory::new(0x2000).unwrap();
        let mut buf = [0xFFu8; 16];
        mem.read(0x1FF0, &mut buf).unwrap();
        assert_eq!(buf, [0u8; 16]);
    }

    #[test]
    fn test_write_then_read() {
        let mem = HostMemory::new(0x1000).unwrap();
        mem.write(0x10, &[1, 2, 3, 4]).unwrap();
        let mut buf = [0u8; 4];
        mem.read(0x10, &mut buf).unwrap();
        assert_eq!(buf, [1, 2, 3, 4]);
    }

    #[test]
    fn test_clones_share_bytes() {
        let a = HostMemory::new(0x1000).unwrap();
        let b = a.clone();
        b.write(0, &[0xAB]).unwrap();
        let mut buf = [0u8; 1];
        a.read(0, &mut buf).unwrap();
        assert_eq!(buf, [0xAB]);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&HostMemory::new(0x1000).unwrap()));
    }

    #[test]
    fn test_out_of_bounds() {
        let mem = HostMemory::new(0x1000).unwrap();
        let mut buf = [0u8; 8];
        assert!(matches!(
            mem.read(0xFFC, &mut buf),
            Err(MemoryError::HostOutOfBounds { offset: 0xFFC, len: 8, size: 0x1000 })
        ));
        assert!(matches!(
            mem.write(u64::MAX, &[0]),
            Err(MemoryError::HostOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_zero_size_rejected() {
        assert!(matches!(HostMemory::new(0), Err(MemoryError::ZeroSize)));
    }

    #[test]
    fn test_oversized_region_rejected() {
        assert!(matches!(
            HostMemory::new(u64::MAX),
            Err(MemoryError::HostTooLarge(u64::MAX))
        ));
        assert!(matches!(
            HostMemory::new(1 << 63),
            Err(MemoryError::HostTooLarge(_))
        ));
    }
}
