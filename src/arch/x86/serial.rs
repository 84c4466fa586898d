/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/
//! 16550 UART, used as the kernel's log console.

use core::fmt;
use core::fmt::Write;

use x86::io::{inb, outb};

use crate::logging::{Logger, Severity};

pub const COM1_IOPORT: u16 = 0x03f8;
pub const COM2_IOPORT: u16 = 0x02f8;

const REG_DATA: u16         = 0; // DLAB = 0
const REG_DIVISOR_LSB: u16  = 0; // DLAB = 1
const REG_IRQ_ENABLE: u16   = 1; // DLAB = 0
const REG_DIVISOR_MSB: u16  = 1; // DLAB = 1
const REG_LINE_CTRL: u16    = 3;
const REG_LINE_STATUS: u16  = 5;

pub struct SerialDevice {
    ioport_base: u16,
}

pub enum ParityMode {
    None,
    Odd,
    Even,
}

pub enum StopBits {
    One,
    Two,
}

impl SerialDevice {
    /// # Safety #
    ///
    /// `ioport_base` must be the base port of a 16550-compatible UART that
    /// nothing else drives.
    pub unsafe fn new(ioport_base: u16,
                      baud_rate: u32,
                      parity: ParityMode,
                      bits: u8,
                      stop_bits: StopBits) -> Result<Self, &'static str> {
        let divisor: u16 = match baud_rate {
            115_200 => 1,
            57_600  => 2,
            38_400  => 3,
            19_200  => 6,
            9600    => 12,
            2400    => 48,
            _ => return Err("Unsupported baud rate, no divisor available"),
        };
        let parity_bits = match parity {
            ParityMode::None    => 0b000,
            ParityMode::Odd     => 0b001,
            ParityMode::Even    => 0b011,
        };
        let stop_bits = match stop_bits {
            StopBits::One => 0,
            StopBits::Two => 1,
        };
        let bits = match bits {
            5 => 0b00,
            6 => 0b01,
            7 => 0b10,
            8 => 0b11,
            _ => return Err("Unsupported number of data bits"),
        };
        let line_ctrl: u8 = (parity_bits << 3) | (stop_bits << 2) | bits;

        unsafe {
            outb(ioport_base + REG_LINE_CTRL, 1 << 7); // DLAB = 1
            outb(ioport_base + REG_DIVISOR_MSB, (divisor >> 8) as u8);
            outb(ioport_base + REG_DIVISOR_LSB, (divisor & 0xff) as u8);
            outb(ioport_base + REG_LINE_CTRL, line_ctrl); // DLAB = 0
            outb(ioport_base + REG_IRQ_ENABLE, 0x00);
        }

        Ok(Self { ioport_base })
    }

    pub fn may_write(&self) -> bool {
        (unsafe { inb(self.ioport_base + REG_LINE_STATUS) } & (1 << 5)) > 0
    }

    pub fn write_byte(&mut self, byte: u8) {
        while !self.may_write() {}

        unsafe {
            outb(self.ioport_base + REG_DATA, byte);
        }
    }
}

impl fmt::Write for SerialDevice {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        for &byte in s.as_bytes().iter() {
            if byte == b'\n' {
                self.write_byte(b'\r');
            }
            self.write_byte(byte);
        }

        Ok(())
    }
}

impl Logger for SerialDevice {
    fn log(&mut self, severity: Severity, args: fmt::Arguments) {
        let color = match severity {
            Severity::Debug => "\x1b[90m",
            Severity::Info => "\x1b[37m",
            Severity::Notice => "\x1b[97m",
            Severity::Warning => "\x1b[93m",
            Severity::Error => "\x1b[31m",
            Severity::Critical => "\x1b[1;31m",
            Severity::Alert => "\x1b[1;97;41m",
            Severity::Emergency => "\x1b[1;93;41m",
        };

        // There is nowhere to report a failing console to.
        let _ = write!(self, "{}{:>8}: ", color, severity.label());
        let _ = self.write_fmt(args);
        let _ = write!(self, "\x1b[0m\n");
    }
}
