/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Hosted model of the machine. Physical memory is a heap buffer, interrupt
//! masking is a nesting counter and the paging hardware is emulated by
//! [`mmu`] so that page faults reach the kernel the way they would on a
//! real CPU.

pub mod export;
