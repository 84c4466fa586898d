/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Page allocation and the per-task page table trees.
//!
//! Every present page table and every present leaf mapping a frame above
//! [`LOW_MEM`] holds one reference on its frame. A frame with more than one
//! reference is only ever mapped read-only: the first write to it faults and
//! is resolved by [`Kernel::un_wp_page`].

use crate::config::{INIT_TASK_LIMIT, LOW_MEM, PAGE_SIZE, TABLE_SPAN};
use crate::error::MemError;
use crate::kernel::Kernel;
use crate::mem::{PAGE_DIR, PAddr, PageEntry, dir_entry_addr, table_index};
use crate::sync::IrqGuard;
use crate::{debug, info, warning};

const ENTRIES_PER_TABLE: u32 = 1024;

/// Memory accounting, as reported by [`Kernel::mem_stats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MemStats {
    pub free_pages: usize,
    pub paging_pages: usize,
    /// Page tables installed in task slices other than the idle task's.
    pub user_tables: usize,
    /// Present leaves of those tables.
    pub user_pages: usize,
}

impl Kernel {
    /// Build the idle task's identity mapping of all physical memory. Page
    /// table *n* sits in frame *n + 1*, right after the page directory.
    pub(crate) fn paging_init(&mut self) {
        let nr_tables = self.config.mem_end.div_ceil(TABLE_SPAN);

        self.phys.fill(PAGE_DIR, PAGE_SIZE as usize, 0);
        for table in 0..nr_tables {
            let table_addr = PAddr((table + 1) * PAGE_SIZE);

            for entry in 0..ENTRIES_PER_TABLE {
                let frame = PAddr((table * ENTRIES_PER_TABLE + entry) * PAGE_SIZE);
                let value = if frame.0 < self.config.mem_end {
                    PageEntry::new(frame, PageEntry::USER_RW)
                } else {
                    PageEntry::empty()
                };
                self.write_entry(table_addr + entry * 4, value);
            }
            self.write_entry(PAGE_DIR + table * 4,
                             PageEntry::new(table_addr, PageEntry::USER_RW));
        }
        self.invalidate();
    }

    pub(crate) fn read_entry(&self, addr: PAddr) -> PageEntry {
        PageEntry(self.phys.read_u32(addr))
    }

    pub(crate) fn write_entry(&mut self, addr: PAddr, entry: PageEntry) {
        self.phys.write_u32(addr, entry.0);
    }

    pub(crate) fn invalidate(&mut self) {
        self.phys.invalidate_tlb();
    }

    /// Physical address of the page table entry mapping the linear address
    /// `addr`, if its page table exists.
    pub fn page_entry_addr(&self, addr: u32) -> Option<PAddr> {
        let dir = self.read_entry(dir_entry_addr(addr));

        dir.is_present().then(|| dir.frame() + table_index(addr) * 4)
    }

    /// The page table entry mapping the linear address `addr`, if its page
    /// table exists.
    pub fn page_entry(&self, addr: u32) -> Option<PageEntry> {
        self.page_entry_addr(addr).map(|entry| self.read_entry(entry))
    }

    /// Allocate a zero-filled physical page.
    pub fn get_free_page(&mut self) -> Option<PAddr> {
        let _irq = IrqGuard::new();
        let page = self.frames.allocate()?;
        self.phys.fill(page, PAGE_SIZE as usize, 0);

        Some(page)
    }

    /// Drop one reference to a physical page; the page is free again once
    /// its last reference is gone.
    pub fn free_page(&mut self, addr: PAddr) {
        let res = {
            let _irq = IrqGuard::new();
            self.frames.free(addr)
        };

        if let Err(err) = res {
            self.panic(format_args!("{}", err));
        }
    }

    pub fn oom(&mut self) -> ! {
        self.panic(format_args!("out of memory"))
    }

    /// Unmap `size` bytes of linear space starting at `from` and release the
    /// pages and page tables. Only whole page tables are freed: `from` must be
    /// 4 Mio-aligned and the idle task's space cannot be freed.
    pub fn free_page_tables(&mut self, from: u32, size: u32) {
        if from & (TABLE_SPAN - 1) != 0 {
            self.panic(format_args!("free_page_tables called with wrong alignment"));
        }
        if from == 0 {
            self.panic(format_args!("Trying to free up swapper memory space"));
        }

        let nr_tables = size.div_ceil(TABLE_SPAN);
        let _irq = IrqGuard::new();

        for i in 0..nr_tables {
            let dir_addr = dir_entry_addr(from) + i * 4;
            let dir = self.read_entry(dir_addr);
            if !dir.is_present() {
                continue;
            }

            let table = dir.frame();
            for entry in 0..ENTRIES_PER_TABLE {
                let entry_addr = table + entry * 4;
                let page = self.read_entry(entry_addr);

                // Frames below LOW_MEM were inherited from the idle task:
                // they belong to the kernel, we only unmap them.
                if page.is_present() && page.frame().0 >= LOW_MEM {
                    self.free_page(page.frame());
                }
                self.write_entry(entry_addr, PageEntry::empty());
            }
            self.free_page(table);
            self.write_entry(dir_addr, PageEntry::empty());
        }
        self.invalidate();
    }

    /// Duplicate the page tables mapping `size` bytes at `from` to the linear
    /// space at `to`, sharing the pages copy-on-write: both sides end up
    /// mapping the same frames read-only.
    ///
    /// Copying from the idle task's space only maps the first 640 Kio, the
    /// kernel image the child will `exec` away from anyway.
    ///
    /// On [`MemError::OutOfMemory`] the destination is left partially built;
    /// the caller must release it with `free_page_tables()`.
    pub fn copy_page_tables(
        &mut self,
        from: u32,
        to: u32,
        size: u32,
    ) -> Result<(), MemError> {
        if (from | to) & (TABLE_SPAN - 1) != 0 {
            self.panic(format_args!("copy_page_tables called with wrong alignment"));
        }

        let nr_tables = size.div_ceil(TABLE_SPAN);
        let _irq = IrqGuard::new();

        for i in 0..nr_tables {
            let from_dir = self.read_entry(dir_entry_addr(from) + i * 4);
            let to_dir_addr = dir_entry_addr(to) + i * 4;

            if self.read_entry(to_dir_addr).is_present() {
                self.panic(format_args!("copy_page_tables: already exist"));
            }
            if !from_dir.is_present() {
                continue;
            }

            let to_table = self.get_free_page().ok_or(MemError::OutOfMemory)?;
            self.write_entry(to_dir_addr,
                             PageEntry::new(to_table, PageEntry::USER_RW));

            let from_table = from_dir.frame();
            let nr_entries = if from == 0 {
                INIT_TASK_LIMIT / PAGE_SIZE
            } else {
                ENTRIES_PER_TABLE
            };

            for entry in 0..nr_entries {
                let mut page = self.read_entry(from_table + entry * 4);
                if !page.is_present() {
                    continue;
                }

                page.set_writable(false);
                self.write_entry(to_table + entry * 4, page);

                // Kernel pages stay writable for the idle task.
                if page.frame().0 >= LOW_MEM {
                    self.write_entry(from_table + entry * 4, page);
                    self.frames.share(page.frame());
                }
            }
        }
        self.invalidate();

        Ok(())
    }

    /// Map the physical page `page` at linear address `addr`, allocating the
    /// page table if needed. Returns `None` if no page was left for it.
    ///
    /// No TLB flush: the mapping was not present before.
    pub fn put_page(&mut self, page: PAddr, addr: u32) -> Option<PAddr> {
        if !self.frames.is_managed(page) {
            warning!("Trying to put page {page:?} at {addr:#010x}");
        } else if self.frames.refcount(page) != Some(1) {
            warning!("mem_map disagrees with {page:?} at {addr:#010x}");
        }

        let _irq = IrqGuard::new();
        let table = self.table_for(addr)?;
        self.write_entry(table + table_index(addr) * 4,
                         PageEntry::new(page, PageEntry::USER_RW));

        Some(page)
    }

    /// Map a fresh zero-filled page at `addr`.
    pub fn get_empty_page(&mut self, addr: u32) {
        let Some(page) = self.get_free_page() else { self.oom() };

        if self.put_page(page, addr).is_none() {
            self.free_page(page);
            self.oom();
        }
    }

    /// The page table covering `addr`, created empty if absent.
    pub(crate) fn table_for(&mut self, addr: u32) -> Option<PAddr> {
        let dir_addr = dir_entry_addr(addr);
        let dir = self.read_entry(dir_addr);
        if dir.is_present() {
            return Some(dir.frame());
        }

        let table = self.get_free_page()?;
        self.write_entry(dir_addr, PageEntry::new(table, PageEntry::USER_RW));

        Some(table)
    }

    /// Count free pages and the pages mapped in every task's slice.
    pub fn mem_stats(&self) -> MemStats {
        let paging_start = self.config.paging_start();
        let mut stats = MemStats {
            free_pages: self.frames.nr_free(),
            paging_pages: ((self.config.mem_end - paging_start) / PAGE_SIZE) as usize,
            user_tables: 0,
            user_pages: 0,
        };

        // Skip the idle task's 16 entries, which map the kernel.
        for dir_index in 16..ENTRIES_PER_TABLE {
            let dir = self.read_entry(PAGE_DIR + dir_index * 4);
            if !dir.is_present() {
                continue;
            }

            let nr_pages = (0..ENTRIES_PER_TABLE)
                .filter(|&i| self.read_entry(dir.frame() + i * 4).is_present())
                .count();
            debug!("{dir_index:>4}: {nr_pages} pages");
            stats.user_tables += 1;
            stats.user_pages += nr_pages;
        }

        info!("{}/{} free pages, {} page tables mapping {} pages",
              stats.free_pages, stats.paging_pages,
              stats.user_tables, stats.user_pages);

        stats
    }
}
