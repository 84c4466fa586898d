/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use thiserror_no_std::Error;

use crate::blk::DeviceId;
use crate::mem::PAddr;
use crate::task::Pid;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigError {
    #[error("memory end {0:#x} is not page-aligned or exceeds 16 Mio")]
    BadMemoryEnd(u32),

    #[error("buffer area end {0:#x} is misplaced or too large")]
    BadBufferEnd(u32),

    #[error("ramdisk size {0:#x} is not a multiple of the page size")]
    BadRamdiskSize(u32),

    #[error("no physical memory left for paging")]
    NoPagingMemory,
}

/// Misuse of the physical page allocator. All of them are fatal for the
/// kernel, the allocator reports them and the caller panics.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("trying to free kernel page {0:?}")]
    KernelPage(PAddr),

    #[error("trying to free nonexisting page {0:?}")]
    NonExisting(PAddr),

    #[error("trying to free free page {0:?}")]
    AlreadyFree(PAddr),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemError {
    #[error("out of memory")]
    OutOfMemory,
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum ForkError {
    #[error("no free task slot")]
    NoFreeSlot,

    #[error("out of memory while copying page tables")]
    OutOfMemory,
}

impl From<MemError> for ForkError {
    fn from(_: MemError) -> Self {
        ForkError::OutOfMemory
    }
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskError {
    #[error("no such process {0}")]
    NoSuchProcess(Pid),

    #[error("no child process to wait for")]
    NoChild,

    #[error("interrupted by a signal")]
    Interrupted,

    #[error("invalid signal number {0}")]
    InvalidSignal(u32),

    #[error("image limit {0:#x} does not fit in a task slice")]
    ImageTooLarge(u32),
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockError {
    #[error("trying to access nonexisting block device {0:?}")]
    NoSuchDevice(DeviceId),

    #[error("buffer is not attached to a device")]
    Unattached,

    #[error("no block device major {0}")]
    BadMajor(usize),

    #[error("major {0} already has a driver")]
    AlreadyRegistered(usize),

    #[error("image of {blocks} blocks does not fit in {avail} blocks")]
    TooBig { blocks: usize, avail: usize },

    #[error("I/O error on {dev:?}, block {block}")]
    Io { dev: DeviceId, block: u32 },
}
