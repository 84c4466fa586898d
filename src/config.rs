/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Compile-time limits of the kernel and the runtime memory layout handed to
//! [`Kernel::new`](crate::kernel::Kernel::new).

use crate::error::ConfigError;
use crate::misc::align_down;
use crate::task::sched::{DecayFn, half_life_decay};

pub const PAGE_SIZE: u32 = 4096;
pub const PAGE_SIZE_BITS: u32 = 12;

/// Size of a filesystem block; a block is two disk sectors.
pub const BLOCK_SIZE: u32 = 1024;
pub const SECTOR_SIZE: u32 = 512;

/// Physical memory below this address belongs to the kernel and is never
/// handed out by the page allocator.
pub const LOW_MEM: u32 = 0x10_0000;

/// Upper bound of supported physical memory.
pub const MAX_HIGH_MEM: u32 = 16 << 20;

/// Number of frames the page allocator can track.
pub const PAGING_PAGES: usize = ((MAX_HIGH_MEM - LOW_MEM) >> PAGE_SIZE_BITS) as usize;

/// Linear span covered by one page table (one directory entry).
pub const TABLE_SPAN: u32 = 4 << 20;

/// Every task owns a 64 Mio slice of the 4 Gio linear address space.
pub const TASK_SIZE: u32 = 64 << 20;

pub const NR_TASKS: usize = 64;

/// Code and data limit of the idle task, the conventional memory below the
/// BIOS and video area.
pub const INIT_TASK_LIMIT: u32 = 0xa_0000;

pub const DEF_PRIORITY: i32 = 15;
pub const MAX_PRIORITY: i32 = 40;

pub const HZ: u64 = 100;

pub const NR_REQUEST: usize = 16;
pub const NR_BLK_DEV: usize = 7;
pub const TIME_REQUESTS: usize = 64;
pub const MAX_BUFFERS: usize = 256;

#[derive(Clone, Copy)]
pub struct KernelConfig {
    pub mem_end: u32,
    pub buffer_end: u32,
    pub ramdisk_size: u32,
    pub decay: DecayFn,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            mem_end: 4 << 20,
            buffer_end: LOW_MEM + (MAX_BUFFERS as u32) * BLOCK_SIZE,
            ramdisk_size: 0,
            decay: half_life_decay,
        }
    }
}

impl KernelConfig {
    pub fn mem_end(mut self, mem_end: u32) -> Self {
        self.mem_end = mem_end;
        self
    }

    pub fn buffer_end(mut self, buffer_end: u32) -> Self {
        self.buffer_end = buffer_end;
        self
    }

    pub fn ramdisk_size(mut self, size: u32) -> Self {
        self.ramdisk_size = size;
        self
    }

    /// Aging applied when every runnable task used its time slice. A decay
    /// that leaves all counters at 0 makes `schedule` spin forever.
    pub fn decay(mut self, decay: DecayFn) -> Self {
        self.decay = decay;
        self
    }

    /// First physical address handed to the page allocator.
    pub fn paging_start(&self) -> u32 {
        self.buffer_end + self.ramdisk_size
    }

    pub fn nr_buffers(&self) -> usize {
        ((self.buffer_end - LOW_MEM) / BLOCK_SIZE) as usize
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if align_down(self.mem_end, PAGE_SIZE) != self.mem_end || self.mem_end > MAX_HIGH_MEM {
            return Err(ConfigError::BadMemoryEnd(self.mem_end));
        }
        if self.buffer_end < LOW_MEM
            || align_down(self.buffer_end, PAGE_SIZE) != self.buffer_end
            || self.nr_buffers() > MAX_BUFFERS {
            return Err(ConfigError::BadBufferEnd(self.buffer_end));
        }
        if align_down(self.ramdisk_size, PAGE_SIZE) != self.ramdisk_size {
            return Err(ConfigError::BadRamdiskSize(self.ramdisk_size));
        }
        if self.paging_start() >= self.mem_end {
            return Err(ConfigError::NoPagingMemory);
        }

        Ok(())
    }
}
