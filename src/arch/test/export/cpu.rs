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

/// Every test runs its own machine, so there is no process-wide "already
/// panicking" state to track here.
pub fn enter_panic() -> bool {
    true
}

/// The hosted CPU "halts" by unwinding the test thread with the panic
/// message, which lets tests assert on fatal kernel errors.
pub fn perm_halt(reason: fmt::Arguments) -> ! {
    panic!("CPU halted: {}", reason);
}
