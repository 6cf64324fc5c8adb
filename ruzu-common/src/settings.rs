// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

use crate::types::{GPU_VA_SIZE, PAGE_SIZE};

/// Memory subsystem settings, populated from config INI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MemorySettings {
    // Address space
    /// Soft upper bound on serviceable GPU VA.
    pub gpu_va_limit: u64,
    /// First VA handed out by the GPU VA allocator.
    pub alloc_base: u64,

    // Backing
    /// Size of the zero-filled pool shared by all sparse mappings.
    pub sparse_pool_size: u64,
    /// Size of the host memory region the trace replayer maps from.
    pub host_memory_size: u64,

    // Debug
    pub use_debug_logging: bool,
}

/// Default sparse pool: 1 GiB of lazily committed anonymous memory. Sparse
/// runs longer than the pool wrap around it.
pub const DEFAULT_SPARSE_POOL_SIZE: u64 = 0x4000_0000;

/// Start allocations at 64 MB to avoid the zero page region.
pub const DEFAULT_ALLOC_BASE: u64 = 0x0400_0000;

impl Default for MemorySettings {
    fn default() -> Self {
        Self {
            gpu_va_limit: GPU_VA_SIZE - 1,
            alloc_base: DEFAULT_ALLOC_BASE,
            sparse_pool_size: DEFAULT_SPARSE_POOL_SIZE,
            host_memory_size: 256 * 1024 * 1024,
            use_debug_logging: false,
        }
    }
}

impl MemorySettings {
    /// Settings sized for unit tests: small sparse pool and host region.
    pub fn small() -> Self {
        Self {
            sparse_pool_size: 16 * PAGE_SIZE,
            host_memory_size: 64 * PAGE_SIZE,
            ..Self::default()
        }
    }
}

/// Parse an integer config value, accepting decimal or `0x` hex.
pub fn parse_u64(s: &str) -> Option<u64> {
    let s = s.trim().replace('_', "");
    match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => s.parse().ok(),
    }
}

/// Parse a boolean config value (`true`/`1`/`false`/`0`).
pub fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_lowercase().as_str() {
        "1" | "true" => Some(true),
        "0" | "false" => Some(false),
        _ => None,
    }
}
