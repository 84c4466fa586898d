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
use core::sync::atomic::{AtomicU8, Ordering};

use crate::sync::Spinlock;

pub static DEFAULT_LOGGER: Spinlock<Option<&'static mut (dyn Logger + Send)>>
    = Spinlock::new(None);

/// Records less severe than this are dropped.
static MIN_SEVERITY: AtomicU8 = AtomicU8::new(Severity::Debug as u8);

pub trait Logger {
    fn log(&mut self, severity: Severity, args: fmt::Arguments);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
#[repr(u8)]
pub enum Severity {
    Debug,
    Info,
    Notice,
    Warning,
    Error,
    Critical,
    Alert,
    Emergency,
}

impl Severity {
    pub fn label(&self) -> &str {
        use Severity::*;

        match self {
            Debug       => "debug",
            Info        => "info",
            Notice      => "notice",
            Warning     => "warn",
            Error       => "error",
            Critical    => "critical",
            Alert       => "alert",
            Emergency   => "emerg",
        }
    }
}

pub fn set_logger(logger: &'static mut (dyn Logger + Send)) {
    *DEFAULT_LOGGER.lock() = Some(logger);
}

pub fn set_min_severity(severity: Severity) {
    MIN_SEVERITY.store(severity as u8, Ordering::Relaxed);
}

pub fn enabled(severity: Severity) -> bool {
    severity as u8 >= MIN_SEVERITY.load(Ordering::Relaxed)
}

#[doc(hidden)]
pub fn _log(severity: Severity, args: fmt::Arguments) {
    if !enabled(severity) {
        return;
    }

    if let Some(logger) = DEFAULT_LOGGER.lock().as_mut() {
        logger.log(severity, args);
    }
}

#[macro_export]
macro_rules! debug {
    ($($arg:tt)*) => ({
        $crate::logging::_log($crate::logging::Severity::Debug, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! info {
    ($($arg:tt)*) => ({
        $crate::logging::_log($crate::logging::Severity::Info, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! notice {
    ($($arg:tt)*) => ({
        $crate::logging::_log($crate::logging::Severity::Notice, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! warning {
    ($($arg:tt)*) => ({
        $crate::logging::_log($crate::logging::Severity::Warning, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! error {
    ($($arg:tt)*) => ({
        $crate::logging::_log($crate::logging::Severity::Error, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! critical {
    ($($arg:tt)*) => ({
        $crate::logging::_log($crate::logging::Severity::Critical, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! alert {
    ($($arg:tt)*) => ({
        $crate::logging::_log($crate::logging::Severity::Alert, format_args!($($arg)*));
    });
}

#[macro_export]
macro_rules! emergency {
    ($($arg:tt)*) => ({
        $crate::logging::_log($crate::logging::Severity::Emergency, format_args!($($arg)*));
    });
}
