/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/
//! Bare-metal i386 backend. Boot code (GDT, IDT, PIC and PIT programming,
//! interrupt stubs) lives in the boot image; it calls into the kernel core
//! through [`crate::kernel`] with the trapped [`TaskMachineContext`].
//!
//! [`TaskMachineContext`]: export::task::TaskMachineContext

pub mod export;
pub mod serial;
