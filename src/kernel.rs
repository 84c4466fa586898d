/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! The kernel's whole mutable state, and the entry points trap code goes
//! through.
//!
//! Physical memory layout:
//!
//! ```text
//! 0x0000_0000  page directory
//! 0x0000_1000  identity page tables, one per 4 Mio of RAM
//!        ...   kernel image, below 640 Kio
//! LOW_MEM      buffer cache
//! buffer_end   RAM disk (optional)
//!        ...   frames handed out by the page allocator
//! mem_end
//! ```
//!
//! Blocking operations never block the CPU: they put the current task to
//! sleep, switch `current` to another task and return
//! [`Poll::Pending`](core::task::Poll::Pending). The trap exit path then
//! resumes whichever task is current; the sleeping task re-issues its
//! interrupted operation (the faulting instruction, the system call) once it
//! runs again.

use alloc::boxed::Box;
use core::array;
use core::fmt;

use crate::arch::mem::PhysMemory;
use crate::arch::task::TaskMachineContext;
use crate::blk::buffer::BufferCache;
use crate::blk::ramdisk::RamDisk;
use crate::blk::{BlockLayer, major};
use crate::config::{KernelConfig, LOW_MEM, NR_TASKS, PAGE_SIZE};
use crate::error::ConfigError;
use crate::info;
use crate::mem::PAddr;
use crate::mem::frame::{AllocatorBuilder, FrameAllocator};
use crate::misc::BinSize;
use crate::panic::kernel_panic;
use crate::sync::Spinlock;
use crate::task::Task;
use crate::task::timer::TimerList;

pub static KERNEL: Spinlock<Option<Kernel>> = Spinlock::new(None);

pub struct Kernel {
    pub(crate) config: KernelConfig,
    pub(crate) phys: PhysMemory,
    pub(crate) frames: FrameAllocator,

    pub(crate) tasks: [Option<Task>; NR_TASKS],
    pub(crate) current: usize,
    pub(crate) last_pid: i32,
    pub(crate) jiffies: u64,
    pub(crate) wait_seq: u64,
    pub(crate) timers: TimerList,

    pub(crate) blk: BlockLayer,
    pub(crate) buffers: BufferCache,
}

impl Kernel {
    /// Bring up the kernel core on a machine with the memory layout described
    /// by `config`: identity-map physical memory for the idle task, set up
    /// the page allocator and the buffer cache, and register the RAM disk if
    /// one was configured.
    pub fn new(config: KernelConfig) -> Result<Self, ConfigError> {
        config.validate()?;

        let paging_start = config.paging_start();
        let frames = AllocatorBuilder::new(PAddr(config.mem_end))
            .declare_unused_ram(PAddr(paging_start), config.mem_end - paging_start)
            .build();

        let mut kernel = Self {
            config,
            phys: PhysMemory::new(config.mem_end),
            frames,
            tasks: array::from_fn(|_| None),
            current: 0,
            last_pid: 0,
            jiffies: 0,
            wait_seq: 0,
            timers: TimerList::new(),
            blk: BlockLayer::new(),
            buffers: BufferCache::new(config.nr_buffers()),
        };

        kernel.paging_init();
        kernel.tasks[0] = Some(Task::idle());

        if config.ramdisk_size > 0 {
            let ramdisk = RamDisk::new(PAddr(config.buffer_end),
                                       config.ramdisk_size);
            kernel.phys.fill(PAddr(config.buffer_end),
                             config.ramdisk_size as usize, 0);
            kernel.blk.install_driver(major::RAMDISK, Box::new(ramdisk));
        }

        info!("Memory: {} total, {} buffers, {} RAM disk, {} paging ({} pages)",
              BinSize(config.mem_end as u64),
              BinSize((config.buffer_end - LOW_MEM) as u64),
              BinSize(config.ramdisk_size as u64),
              BinSize((config.mem_end - paging_start) as u64),
              (config.mem_end - paging_start) / PAGE_SIZE);

        Ok(kernel)
    }

    pub fn config(&self) -> &KernelConfig {
        &self.config
    }

    pub fn jiffies(&self) -> u64 {
        self.jiffies
    }

    /// Report a broken kernel invariant and halt the machine for good.
    pub fn panic(&mut self, message: fmt::Arguments) -> ! {
        let in_idle_task = self.current == 0;
        kernel_panic(message, in_idle_task, || self.sync_buffers())
    }

    /// Save the registers of the task that just trapped into the kernel.
    pub fn trap_enter(&mut self, frame: &TaskMachineContext) {
        self.current_task_mut().context = frame.clone();
    }

    /// Load the registers of the task to resume, which is not necessarily the
    /// one that trapped.
    pub fn trap_exit(&self, frame: &mut TaskMachineContext) {
        *frame = self.current_task().context.clone();
    }
}

pub fn install(kernel: Kernel) {
    *KERNEL.lock() = Some(kernel);
}

/// Run `f` on the installed kernel. Interrupts stay masked for the whole
/// call.
pub fn with_kernel<R>(f: impl FnOnce(&mut Kernel) -> R) -> R {
    let mut kernel = KERNEL.lock();
    f(kernel.as_mut().expect("no kernel installed"))
}
