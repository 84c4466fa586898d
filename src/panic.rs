/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::fmt;

use crate::arch;
use crate::logging::{DEFAULT_LOGGER, Severity};

/// Report an unrecoverable kernel error and halt the CPU for good.
///
/// Unless the failure happened in the idle task, `sync` is called to push
/// dirty buffers to their devices before halting; when the idle task itself is
/// broken we do not trust the rest of the kernel enough to try.
pub fn kernel_panic(
    message: fmt::Arguments,
    in_idle_task: bool,
    sync: impl FnOnce() -> usize,
) -> ! {
    // Make sure there is only one panic in flight; a panic while panicking
    // halts right away. This implies that the panic handler is non-reentrant
    // and, therefore, we must try our best not to trigger one in it.
    if !arch::cpu::enter_panic() {
        arch::cpu::perm_halt(message);
    }

    emergency(format_args!("KERNEL PANIC: {}", message));

    if in_idle_task {
        emergency(format_args!("idle task error, not syncing"));
    } else {
        let nr_flushed = sync();
        emergency(format_args!("{} dirty buffers scheduled for write-back",
                               nr_flushed));
    }

    arch::cpu::perm_halt(message);
}

/// The logger may be the very thing that broke: never wait for its lock.
fn emergency(args: fmt::Arguments) {
    if let Some(mut logger) = DEFAULT_LOGGER.try_lock() {
        if let Some(logger) = logger.as_mut() {
            logger.log(Severity::Emergency, args);
        }
    }
}
