/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Everything that touches the processor goes through `crate::arch`. The
//! bare-metal i386 backend drives the real CPU; any other target gets the
//! `test` backend, a hosted model of the machine used by the unit tests.

#[cfg(all(target_arch = "x86", target_os = "none"))]
mod x86;

#[cfg(all(target_arch = "x86", target_os = "none"))]
pub use crate::arch::x86::export::*;

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub mod test;

#[cfg(not(all(target_arch = "x86", target_os = "none")))]
pub use crate::arch::test::export::*;
