// SPDX-FileCopyrightText: 2025 ruzu contributors
// SPDX-License-Identifier: GPL-3.0-or-later

//! GPU memory management for ruzu.
//!
//! The GMMU maps GPU virtual addresses onto host memory and reserves VA for
//! the engines that consume it.

pub mod memory_manager;
pub mod semaphore;

pub use memory_manager::GpuMemoryManager;
pub use semaphore::SemaphoreSize;
