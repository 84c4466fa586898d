/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/
use core::arch::asm;
use core::ptr;
use core::slice;

use crate::mem::PAddr;

/// Physical memory as seen by the kernel: the idle task's directory entries
/// identity-map all of it, and every task shares that directory, so a
/// physical address is also a valid kernel pointer.
pub struct PhysMemory {
    size: u32,
}

impl PhysMemory {
    pub fn new(size: u32) -> Self {
        Self { size }
    }

    // The page directory sits at physical address 0, which Rust considers a
    // null pointer: page table words are accessed with plain moves instead.
    pub fn read_u32(&self, addr: PAddr) -> u32 {
        let value: u32;
        unsafe {
            asm!("mov {0}, [{1}]",
                 out(reg) value,
                 in(reg) addr.0,
                 options(nostack, readonly, preserves_flags));
        }

        value
    }

    pub fn write_u32(&mut self, addr: PAddr, value: u32) {
        unsafe {
            asm!("mov [{1}], {0}",
                 in(reg) value,
                 in(reg) addr.0,
                 options(nostack, preserves_flags));
        }
    }

    pub fn slice(&self, addr: PAddr, len: usize) -> &[u8] {
        debug_assert!(addr.0 != 0 && addr.0 as usize + len <= self.size as usize);
        unsafe { slice::from_raw_parts(addr.0 as usize as *const u8, len) }
    }

    pub fn slice_mut(&mut self, addr: PAddr, len: usize) -> &mut [u8] {
        debug_assert!(addr.0 != 0 && addr.0 as usize + len <= self.size as usize);
        unsafe { slice::from_raw_parts_mut(addr.0 as usize as *mut u8, len) }
    }

    pub fn copy(&mut self, src: PAddr, dst: PAddr, len: usize) {
        unsafe {
            ptr::copy(src.0 as usize as *const u8,
                      dst.0 as usize as *mut u8,
                      len);
        }
    }

    pub fn fill(&mut self, dst: PAddr, len: usize, byte: u8) {
        let (mut dst, mut len) = (dst, len);
        if dst.0 == 0 && len >= 4 {
            self.write_u32(dst, u32::from_ne_bytes([byte; 4]));
            dst = dst + 4;
            len -= 4;
        }

        unsafe {
            ptr::write_bytes(dst.0 as usize as *mut u8, byte, len);
        }
    }

    /// Reloading CR3 drops every non-global TLB entry.
    pub fn invalidate_tlb(&mut self) {
        unsafe { x86::tlb::flush_all(); }
    }
}
