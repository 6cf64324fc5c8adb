// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use thiserror::Error;

/// Errors returned by the address-space maps and host memory regions.
#[derive(Debug, Error)]
pub enum MemoryError {
    #[error("size must be non-zero")]
    ZeroSize,

    #[error("page fault at 0x{0:016X}")]
    PageFault(u64),

    #[error("host access [0x{offset:X}..+0x{len:X}) is outside a region of size 0x{size:X}")]
    HostOutOfBounds { offset: u64, len: u64, size: u64 },

    #[error("host region of 0x{0:X} bytes is too large")]
    HostTooLarge(u64),

    #[error("range 0x{virt:X}+0x{size:X} is outside the address space")]
    OutOfRange { virt: u64, size: u64 },

    #[error("address space exhausted (requested 0x{size:X})")]
    AddressSpaceFull { size: u64 },

    #[error("failed to create backing mmap: {0}")]
    MmapFailed(#[from] std::io::Error),
}

/// Result alias for memory operations.
pub type MemoryResult<T> = Result<T, MemoryError>;
