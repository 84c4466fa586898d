/******************************************************************************
 * Copyright © 2021 Kévin Lesénéchal <kevin.lesenechal@gmail.com>             *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Mutual exclusion on a single CPU. The only thing that can race with kernel
//! code is an interrupt handler, so a critical section is simply a region run
//! with maskable interrupts disabled. Regions nest: interrupts come back on
//! when the outermost region ends.
//!
//! Nothing may go to sleep while an [`IrqGuard`] or a [`SpinlockGuard`] is
//! alive.

use core::ops::{Deref, DerefMut};
use core::sync::atomic::{AtomicBool, Ordering};
use core::cell::UnsafeCell;

use crate::arch::sync::{push_critical_region, pop_critical_region};

/// Keeps maskable interrupts disabled for as long as it lives.
pub struct IrqGuard {
    _private: (),
}

impl IrqGuard {
    pub fn new() -> Self {
        push_critical_region();

        Self { _private: () }
    }
}

impl Drop for IrqGuard {
    fn drop(&mut self) {
        pop_critical_region();
    }
}

pub struct Spinlock<T> {
    lock: AtomicBool,
    data: UnsafeCell<T>,
}

unsafe impl<T: Send> Sync for Spinlock<T> {}
unsafe impl<T: Send> Send for Spinlock<T> {}

impl<T> Spinlock<T> {
    pub const fn new(value: T) -> Self {
        Self {
            lock: AtomicBool::new(false),
            data: UnsafeCell::new(value),
        }
    }

    pub fn lock(&self) -> SpinlockGuard<'_, T> {
        loop {
            if let Some(guard) = self.try_lock() {
                return guard;
            }
            while self.is_locked() {
                core::hint::spin_loop();
            }
        }
    }

    /// Take the lock if it is free; the critical region is only entered on
    /// success.
    pub fn try_lock(&self) -> Option<SpinlockGuard<'_, T>> {
        push_critical_region();
        if self.lock.compare_exchange(false, true,
                                      Ordering::Acquire,
                                      Ordering::Relaxed).is_err() {
            pop_critical_region();
            return None;
        }

        // Safety: The spinlock guarantees exclusive access to the resource
        // wrapped inside it, we just acquired the lock, we are the only owner
        // of the resource so we can create a mutable reference to it.
        let data = unsafe { &mut *self.data.get() };

        Some(SpinlockGuard {
            lock: &self.lock,
            data,
        })
    }

    /// Checks whether the lock is held right now, without any lock or
    /// synchronization.
    pub fn is_locked(&self) -> bool {
        self.lock.load(Ordering::Relaxed)
    }
}

pub struct SpinlockGuard<'a, T> {
    lock: &'a AtomicBool,
    data: &'a mut T,
}

impl<T> Deref for SpinlockGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        self.data
    }
}

impl<T> DerefMut for SpinlockGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.data
    }
}

impl<T> Drop for SpinlockGuard<'_, T> {
    fn drop(&mut self) {
        self.lock.store(false, Ordering::Release);
        pop_critical_region();
    }
}

#[cfg(test)]
mod test {
    use crate::sync::Spinlock;

    #[test]
    fn test_try_lock_fails_while_held() {
        let lock = Spinlock::new(5);
        let mut guard = lock.lock();

        assert!(lock.is_locked());
        assert!(lock.try_lock().is_none());
        *guard += 1;
        drop(guard);

        assert_eq!(*lock.lock(), 6);
    }
}
