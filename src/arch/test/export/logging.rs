/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/
extern crate std;

use alloc::boxed::Box;
use alloc::string::{String, ToString};
use alloc::vec::Vec;
use core::cell::RefCell;
use core::fmt;
use core::fmt::Write;
use std::print;

use crate::logging::{Logger, Severity, set_logger};

/// Prints kernel records to the test harness' standard output, colored the
/// same way the serial console is.
pub struct StdoutLogger;

impl fmt::Write for StdoutLogger {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        print!("{}", s);

        Ok(())
    }
}

std::thread_local! {
    static CAPTURED: RefCell<Option<Vec<(Severity, String)>>> = const { RefCell::new(None) };
}

/// Run `f` and return, along with its result, every record it logged from
/// the calling thread.
pub fn capture_logs<R>(f: impl FnOnce() -> R) -> (R, Vec<(Severity, String)>) {
    CAPTURED.with_borrow_mut(|captured| *captured = Some(Vec::new()));
    let result = f();
    let records = CAPTURED.with_borrow_mut(|captured| captured.take())
        .unwrap_or_default();

    (result, records)
}

impl Logger for StdoutLogger {
    fn log(&mut self, severity: Severity, args: fmt::Arguments) {
        CAPTURED.with_borrow_mut(|captured| {
            if let Some(records) = captured {
                records.push((severity, args.to_string()));
            }
        });

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

        let _ = write!(self, "{}{:>8}: ", color, severity.label());
        let _ = self.write_fmt(args);
        let _ = write!(self, "\x1b[0m\n");
    }
}

#[ctor::ctor]
fn init() {
    set_logger(Box::leak(Box::new(StdoutLogger)));
}
