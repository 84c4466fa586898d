/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/
//! i386 memory management: reference-counted physical frames and the
//! two-level page tables of the single, shared page directory.
//!
//! Linear addresses are plain `u32`. The whole 4 Gio linear space is carved
//! into 64 Mio slices, one per task slot, so that a single page directory can
//! map every task at once; task *n* owns the 16 directory entries covering
//! `[n * TASK_SIZE, (n + 1) * TASK_SIZE)`.

use core::fmt::{self, Debug, Formatter};
use core::ops::Add;

use crate::config::PAGE_SIZE;

pub mod fault;
pub mod frame;
pub mod paging;

/// The page directory lives in the very first physical frame.
pub const PAGE_DIR: PAddr = PAddr(0);

#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PAddr(pub u32);

impl PAddr {
    pub fn page_offset(self) -> u32 {
        self.0 & (PAGE_SIZE - 1)
    }

    pub fn is_page_aligned(self) -> bool {
        self.page_offset() == 0
    }
}

impl Add<u32> for PAddr {
    type Output = Self;

    fn add(self, rhs: u32) -> Self::Output {
        Self(self.0 + rhs)
    }
}

impl Debug for PAddr {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "PA {:#010x}", self.0)
    }
}

/// Index of the directory entry mapping the linear address `addr`.
pub fn dir_index(addr: u32) -> u32 {
    addr >> 22
}

/// Index of the page table entry mapping `addr` within its table.
pub fn table_index(addr: u32) -> u32 {
    (addr >> 12) & 0x3ff
}

/// Physical address of the directory entry for `addr`.
pub fn dir_entry_addr(addr: u32) -> PAddr {
    PAGE_DIR + dir_index(addr) * 4
}

/// An i386 page directory or page table entry.
#[repr(transparent)]
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct PageEntry(pub u32);

impl PageEntry {
    pub const PRESENT: u32  = 1 << 0;
    pub const WRITABLE: u32 = 1 << 1;
    pub const USER: u32     = 1 << 2;
    pub const ACCESSED: u32 = 1 << 5;
    pub const DIRTY: u32    = 1 << 6;

    /// Flags of every user mapping and of every page table we install.
    pub const USER_RW: u32 = Self::USER | Self::WRITABLE | Self::PRESENT;

    const ADDR_MASK: u32 = 0xffff_f000;

    pub const fn empty() -> Self {
        Self(0)
    }

    pub fn new(frame: PAddr, flags: u32) -> Self {
        assert!(frame.is_page_aligned(), "unaligned frame {frame:?}");
        Self(frame.0 | (flags & !Self::ADDR_MASK))
    }

    pub fn frame(&self) -> PAddr {
        PAddr(self.0 & Self::ADDR_MASK)
    }

    pub fn is_present(&self) -> bool {
        self.0 & Self::PRESENT > 0
    }

    pub fn is_writable(&self) -> bool {
        self.0 & Self::WRITABLE > 0
    }

    pub fn set_writable(&mut self, writable: bool) {
        if writable {
            self.0 |= Self::WRITABLE;
        } else {
            self.0 &= !Self::WRITABLE;
        }
    }

    pub fn is_user(&self) -> bool {
        self.0 & Self::USER > 0
    }

    pub fn is_accessed(&self) -> bool {
        self.0 & Self::ACCESSED > 0
    }

    pub fn set_accessed(&mut self) {
        self.0 |= Self::ACCESSED;
    }

    pub fn is_dirty(&self) -> bool {
        self.0 & Self::DIRTY > 0
    }

    pub fn set_dirty(&mut self) {
        self.0 |= Self::DIRTY;
    }
}

impl Debug for PageEntry {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "{:?} [{}{}{}{}{}]",
               self.frame(),
               if self.is_present() { 'P' } else { '-' },
               if self.is_writable() { 'W' } else { 'R' },
               if self.is_user() { 'U' } else { 'S' },
               if self.is_accessed() { 'A' } else { '-' },
               if self.is_dirty() { 'D' } else { '-' })
    }
}
