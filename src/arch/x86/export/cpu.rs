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
use core::sync::atomic::{AtomicBool, Ordering};

static PANIC_IN_PROGRESS: AtomicBool = AtomicBool::new(false);

/// Returns `false` if a panic is already being handled.
pub fn enter_panic() -> bool {
    !PANIC_IN_PROGRESS.swap(true, Ordering::SeqCst)
}

/// Stop the CPU for good: interrupts are masked before each `hlt` so that
/// only an NMI can wake it, and we go right back to sleep.
pub fn perm_halt(_reason: fmt::Arguments) -> ! {
    loop {
        unsafe {
            x86::irq::disable();
            x86::halt();
        }
    }
}
