// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

/// Virtual address in a GPU address space (64-bit).
pub type GpuVAddr = u64;

/// Small GPU page size (4 KiB).
pub const PAGE_SIZE: u64 = 0x1000;

/// Page mask for alignment.
pub const PAGE_MASK: u64 = PAGE_SIZE - 1;

/// Width of the GPU virtual address space: 40 bits = 1 TiB.
pub const GPU_VA_BITS: u32 = 40;

/// Size of the GPU virtual address space.
pub const GPU_VA_SIZE: u64 = 1 << GPU_VA_BITS;

/// Round `value` up to a whole number of pages, `None` on overflow.
#[inline]
pub const fn page_align_up(value: u64) -> Option<u64> {
    match value.checked_add(PAGE_MASK) {
        Some(value) => Some(value & !PAGE_MASK),
        None => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_page_align_up() {
        assert_eq!(page_align_up(0), Some(0));
        assert_eq!(page_align_up(1), Some(PAGE_SIZE));
        assert_eq!(page_align_up(PAGE_SIZE), Some(PAGE_SIZE));
        assert_eq!(page_align_up(0x2800), Some(0x3000));
        assert_eq!(page_align_up(u64::MAX & !PAGE_MASK), Some(u64::MAX & !PAGE_MASK));
        assert_eq!(page_align_up(u64::MAX), None);
        assert_eq!(page_align_up(u64::MAX - PAGE_MASK + 1), None);
    }

    #[test]
    fn test_va_size() {
        assert_eq!(GPU_VA_SIZE, 0x100_0000_0000);
    }
}
