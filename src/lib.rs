/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Core of a single-CPU i386 kernel: the scheduler, the copy-on-write virtual
//! memory manager with demand paging, and the block request layer.
//!
//! Every piece of kernel state lives in a [`Kernel`](kernel::Kernel); tasks,
//! requests, timers and buffers are fixed-capacity arenas addressed by index.
//! Operations that need to wait return [`core::task::Poll`]: `Pending` means
//! the current task went to sleep and the scheduler already switched away, the
//! operation is to be issued again once the task runs.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod arch;
pub mod logging;
pub mod sync;
pub mod panic;
pub mod misc;
pub mod config;
pub mod error;
pub mod kernel;
pub mod mem;
pub mod task;
pub mod blk;

pub use kernel::Kernel;
