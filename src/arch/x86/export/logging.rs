/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/
use alloc::boxed::Box;

use crate::arch::x86::serial::{COM1_IOPORT, ParityMode, SerialDevice, StopBits};
use crate::logging::set_logger;

/// Route kernel records to the first serial port, 38400 bauds 8N1.
pub fn init() -> Result<(), &'static str> {
    let serial = unsafe {
        SerialDevice::new(COM1_IOPORT, 38_400, ParityMode::None, 8, StopBits::One)?
    };
    set_logger(Box::leak(Box::new(serial)));

    Ok(())
}
