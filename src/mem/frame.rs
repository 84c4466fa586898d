/******************************************************************************
 * Copyright © 2021 Kévin Lesénéchal <kevin.lesenechal@gmail.com>             *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Physical memory's frames management. Physical memory is divided into
//! fixed-size units called *frames*; above [`LOW_MEM`] each frame has a
//! reference count telling how many page table entries map it.
//!
//! * 0: the frame is free;
//! * 1: the frame is owned by a single mapping;
//! * more: the frame is shared copy-on-write and must not be mapped writable;
//! * [`RESERVED`]: the frame belongs to the kernel (buffer cache, RAM disk)
//!   or does not exist.

use crate::config::{LOW_MEM, PAGE_SIZE, PAGE_SIZE_BITS, PAGING_PAGES};
use crate::debug;
use crate::error::FrameError;
use crate::mem::PAddr;

pub const RESERVED: u8 = 100;

pub struct FrameAllocator {
    mem_map: [u8; PAGING_PAGES],
    high_mem: PAddr,
}

impl FrameAllocator {
    /// Take the free frame with the highest address and give it a reference
    /// count of 1. The frame's content is left as is: zeroing it is up to
    /// the caller, which owns the only mapping of physical memory.
    pub fn allocate(&mut self) -> Option<PAddr> {
        let index = self.mem_map.iter().rposition(|&count| count == 0)?;
        self.mem_map[index] = 1;

        Some(Self::frame_paddr(index))
    }

    /// Drop one reference to the frame at `frame_addr`.
    pub fn free(&mut self, frame_addr: PAddr) -> Result<(), FrameError> {
        if frame_addr.0 < LOW_MEM {
            return Err(FrameError::KernelPage(frame_addr));
        }
        if frame_addr >= self.high_mem {
            return Err(FrameError::NonExisting(frame_addr));
        }

        let count = &mut self.mem_map[Self::index_from_paddr(frame_addr)];
        if *count == 0 {
            return Err(FrameError::AlreadyFree(frame_addr));
        }
        *count -= 1;

        Ok(())
    }

    /// Add one reference to an allocated frame. Frames outside the managed
    /// range are not counted and are silently ignored.
    pub fn share(&mut self, frame_addr: PAddr) {
        if self.is_managed(frame_addr) {
            let count = &mut self.mem_map[Self::index_from_paddr(frame_addr)];
            debug_assert!(*count > 0 && *count < RESERVED);
            *count += 1;
        }
    }

    pub fn refcount(&self, frame_addr: PAddr) -> Option<u8> {
        self.is_managed(frame_addr)
            .then(|| self.mem_map[Self::index_from_paddr(frame_addr)])
    }

    /// Whether the frame is physical memory tracked by the allocator.
    pub fn is_managed(&self, frame_addr: PAddr) -> bool {
        frame_addr.0 >= LOW_MEM && frame_addr < self.high_mem
    }

    pub fn high_mem(&self) -> PAddr {
        self.high_mem
    }

    pub fn nr_free(&self) -> usize {
        self.mem_map.iter().filter(|&&count| count == 0).count()
    }

    fn frame_paddr(index: usize) -> PAddr {
        PAddr(LOW_MEM + ((index as u32) << PAGE_SIZE_BITS))
    }

    fn index_from_paddr(frame_addr: PAddr) -> usize {
        ((frame_addr.0 - LOW_MEM) >> PAGE_SIZE_BITS) as usize
    }
}

//----------------------------------------------------------------------------//

pub struct AllocatorBuilder {
    mem_map: [u8; PAGING_PAGES],
    high_mem: PAddr,
}

impl AllocatorBuilder {
    /// Create a new frame allocator builder for physical memory ending at
    /// `high_mem`. Every frame starts as [`RESERVED`]; the boot code then
    /// declares which ones are general purpose RAM with
    /// `declare_unused_ram()`.
    pub fn new(high_mem: PAddr) -> AllocatorBuilder {
        assert!(high_mem.is_page_aligned() && high_mem.0 > LOW_MEM);

        Self {
            mem_map: [RESERVED; PAGING_PAGES],
            high_mem,
        }
    }

    /// Declare a memory area as free for page allocations.
    ///
    /// # Panics #
    ///
    /// Panics if the area is not page-aligned or lies outside of
    /// `[LOW_MEM, high_mem)`.
    pub fn declare_unused_ram(&mut self, paddr: PAddr, bsize: u32) -> &mut Self {
        debug!("Declared RAM free {paddr:?} -> {:?}", paddr + bsize);
        self.set_count(paddr, bsize, 0)
    }

    pub fn build(&self) -> FrameAllocator {
        FrameAllocator {
            mem_map: self.mem_map,
            high_mem: self.high_mem,
        }
    }

    fn set_count(&mut self, paddr: PAddr, bsize: u32, count: u8) -> &mut Self {
        assert_eq!(paddr.0 & 0xfff, 0, "frame address is not 4 Kio-aligned");
        assert_eq!(bsize & 0xfff, 0, "frame size is not a multiple of 4 Kio");
        assert!(paddr.0 >= LOW_MEM && paddr.0 + bsize <= self.high_mem.0,
                "{paddr:?} is outside of the managed memory");

        let index = FrameAllocator::index_from_paddr(paddr);
        let nr_frames = (bsize / PAGE_SIZE) as usize;
        self.mem_map[index..(index + nr_frames)].fill(count);

        self
    }
}

//----------------------------------------------------------------------------//
