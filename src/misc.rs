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
use core::fmt::Formatter;
use core::ops::{BitAnd, Not};
use num_integer::Integer;

pub struct BinSize(pub u64);

impl fmt::Display for BinSize {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        if self.0 < 1024 {
            write!(f, "{} o", self.0)
        } else if self.0 < 1024 * 1024 {
            write!(f, "{:.2} Kio", self.0 as f64 / 1024.0)
        } else {
            write!(f, "{:.2} Mio", self.0 as f64 / 1024.0 / 1024.0)
        }
    }
}

/// Returns the next integer multiple of `multiple` or `n` if already a
/// multiple of `multiple`. `multiple` must be a power of two.
pub fn align_up<T>(n: T, multiple: T) -> T
    where T: Integer + Not<Output = T> + BitAnd<Output = T> + Copy
{
    (n + (multiple - T::one())) & !(multiple - T::one())
}

pub fn align_down<T>(n: T, multiple: T) -> T
    where T: Integer + Not<Output = T> + BitAnd<Output = T> + Copy
{
    n & !(multiple - T::one())
}
