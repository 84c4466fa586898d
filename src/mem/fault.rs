/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Page fault handling: copy-on-write, demand loading of executables and
//! sharing of pages between tasks running the same executable.

use core::task::Poll;

use crate::blk::buffer::BLOCKS_PER_PAGE;
use crate::config::{BLOCK_SIZE, NR_TASKS, PAGE_SIZE};
use crate::{debug, error};
use crate::kernel::Kernel;
use crate::mem::{PAddr, PageEntry, table_index};
use crate::sync::IrqGuard;

/// Fault error code bits pushed by the CPU.
pub const PF_PRESENT: u32 = 1 << 0;
pub const PF_WRITE: u32   = 1 << 1;
pub const PF_USER: u32    = 1 << 2;

impl Kernel {
    /// Entry point of the page fault trap. `addr` is the faulting linear
    /// address (CR2).
    ///
    /// Returns `Pending` when the current task had to sleep waiting for its
    /// page to be read from disk; the faulting instruction is restarted when
    /// the task runs again.
    pub fn do_page_fault(&mut self, error_code: u32, addr: u32) -> Poll<()> {
        if error_code & PF_PRESENT != 0 {
            self.do_wp_page(error_code, addr);
            Poll::Ready(())
        } else {
            self.do_no_page(error_code, addr)
        }
    }

    /// A write to a present, read-only page.
    pub fn do_wp_page(&mut self, _error_code: u32, addr: u32) {
        let Some(entry_addr) = self.page_entry_addr(addr) else {
            self.panic(format_args!("write-protect fault at {addr:#010x} \
                                     without a page table"));
        };

        self.un_wp_page(entry_addr);
    }

    /// Give the task a private, writable copy of the page whose table entry
    /// is at `entry_addr`. If the task holds the only reference to the frame,
    /// the entry is simply made writable.
    pub fn un_wp_page(&mut self, entry_addr: PAddr) {
        let _irq = IrqGuard::new();
        let mut entry = self.read_entry(entry_addr);
        let old_page = entry.frame();

        if self.frames.refcount(old_page) == Some(1) {
            entry.set_writable(true);
            self.write_entry(entry_addr, entry);
            self.invalidate();
            return;
        }

        let Some(new_page) = self.get_free_page() else { self.oom() };
        if self.frames.is_managed(old_page) {
            self.free_page(old_page);
        }
        self.write_entry(entry_addr, PageEntry::new(new_page, PageEntry::USER_RW));
        self.invalidate();
        self.phys.copy(old_page, new_page, PAGE_SIZE as usize);
    }

    /// Resolve a copy-on-write page ahead of a kernel write through a user
    /// pointer, since the CPU does not honor read-only pages in kernel mode.
    pub fn write_verify(&mut self, addr: u32) {
        let Some(entry_addr) = self.page_entry_addr(addr) else { return };
        let entry = self.read_entry(entry_addr);

        if entry.is_present() && !entry.is_writable() {
            self.un_wp_page(entry_addr);
        }
    }

    /// `write_verify()` every page of the `size` bytes at `offset` in the
    /// current task's space. The range is clamped to the task's data limit,
    /// anything past it is left for the access itself to fault on.
    pub fn verify_area(&mut self, offset: u32, size: u32) {
        let (start_code, limit) = {
            let task = self.current_task();
            (task.start_code, task.data_limit)
        };
        if offset >= limit {
            debug!("verify_area: {offset:#x} past the data limit {limit:#x}");
            return;
        }

        let end = offset.checked_add(size).map_or(limit, |end| end.min(limit));
        let first = offset & !(PAGE_SIZE - 1);
        for page in (first..end).step_by(PAGE_SIZE as usize) {
            self.write_verify(start_code + page);
        }
    }

    /// An access to a page that is not mapped. Pages past the end of the
    /// executable's data are zero-filled; other pages are shared with another
    /// task running the same executable if possible, read from disk
    /// otherwise.
    pub fn do_no_page(&mut self, _error_code: u32, addr: u32) -> Poll<()> {
        let addr = addr & !(PAGE_SIZE - 1);
        let (offset, end_data, executable) = {
            let task = self.current_task();
            (addr.wrapping_sub(task.start_code), task.end_data, task.executable)
        };

        let image = match executable {
            Some(image) if offset < end_data => image,
            _ => {
                self.get_empty_page(addr);
                return Poll::Ready(());
            },
        };

        if self.share_page(offset) {
            return Poll::Ready(());
        }

        // Block 0 of the executable is its header.
        let first_block = offset / BLOCK_SIZE + 1;
        let blocks: [u32; BLOCKS_PER_PAGE] =
            core::array::from_fn(|i| image.bmap(first_block + i as u32));
        let buffers = match self.bread_page(image.device(), blocks) {
            Poll::Ready(buffers) => buffers,
            Poll::Pending => return Poll::Pending,
        };

        let Some(page) = self.get_free_page() else { self.oom() };
        for (i, buffer) in buffers.into_iter().enumerate() {
            let Some(buffer) = buffer else { continue };
            let dst = page + i as u32 * BLOCK_SIZE;
            let head = self.buffers.get(buffer);

            if head.uptodate {
                self.phys.copy(head.data, dst, BLOCK_SIZE as usize);
            } else {
                error!("I/O error loading block {} of {:?}, zero-filled",
                       head.block, head.dev);
                self.buffers.get_mut(buffer).error = false;
            }
            self.brelse(buffer);
        }

        let tail = (offset + PAGE_SIZE).saturating_sub(end_data);
        if tail > 0 {
            self.phys.fill(page + (PAGE_SIZE - tail), tail as usize, 0);
        }

        if self.put_page(page, addr).is_none() {
            self.free_page(page);
            self.oom();
        }

        Poll::Ready(())
    }

    /// Look for a task running the same executable that already has the page
    /// at `offset` loaded.
    fn share_page(&mut self, offset: u32) -> bool {
        let Some(image) = self.current_task().executable else {
            return false;
        };
        let id = image.id();

        for nr in (1..NR_TASKS).rev() {
            if nr == self.current {
                continue;
            }
            let same_image = self.tasks[nr].as_ref()
                .and_then(|task| task.executable)
                .is_some_and(|other| other.id() == id);

            if same_image && self.try_to_share(offset, nr) {
                return true;
            }
        }

        false
    }

    /// Map task `nr`'s page at `offset` in the current task as well, if it is
    /// present and clean, read-only on both sides.
    fn try_to_share(&mut self, offset: u32, nr: usize) -> bool {
        let Some(other) = self.tasks[nr].as_ref() else { return false };
        let from = other.start_code + offset;
        let to = self.current_task().start_code + offset;

        let Some(from_addr) = self.page_entry_addr(from) else { return false };
        let mut from_entry = self.read_entry(from_addr);
        if !from_entry.is_present() || from_entry.is_dirty() {
            return false;
        }
        let page = from_entry.frame();
        if !self.frames.is_managed(page) {
            return false;
        }

        let _irq = IrqGuard::new();
        let Some(to_table) = self.table_for(to) else { self.oom() };
        let to_addr = to_table + table_index(to) * 4;
        if self.read_entry(to_addr).is_present() {
            self.panic(format_args!("try_to_share: to_page already exists"));
        }

        from_entry.set_writable(false);
        self.write_entry(from_addr, from_entry);
        self.write_entry(to_addr, from_entry);
        self.frames.share(page);
        self.invalidate();

        true
    }
}
