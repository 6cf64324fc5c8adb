// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! Semaphore release results written by the 3D engine into GPU memory.

/// Size of the structure a semaphore release writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SemaphoreSize {
    /// A single 32-bit payload.
    OneWord,
    /// `{ value: u64, timestamp: u64 }`.
    FourWords,
}

impl SemaphoreSize {
    /// Decode the `structure_size` field of the semaphore info register.
    pub fn from_raw(raw: u32) -> Self {
        if raw & 1 == 0 {
            Self::FourWords
        } else {
            Self::OneWord
        }
    }
}

/// Four-word semaphore result as laid out in guest memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FourWordResult {
    pub value: u64,
    pub timestamp: u64,
}

impl FourWordResult {
    pub fn to_bytes(&self) -> [u8; 16] {
        let mut bytes = [0u8; 16];
        bytes[..8].copy_from_slice(&self.value.to_le_bytes());
        bytes[8..].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes
    }
}

// GPU ticks run at 614.4 MHz: ticks = ns * 384 / 625.
const NS_TO_TICK_NUMERATOR: u64 = 384;
const NS_TO_TICK_DENOMINATOR: u64 = 625;

/// Convert nanoseconds to GPU ticks without overflowing the intermediate.
pub fn gpu_ticks(ns: u64) -> u64 {
    (ns / NS_TO_TICK_DENOMINATOR) * NS_TO_TICK_NUMERATOR
        + ((ns % NS_TO_TICK_DENOMINATOR) * NS_TO_TICK_NUMERATOR) / NS_TO_TICK_DENOMINATOR
}
