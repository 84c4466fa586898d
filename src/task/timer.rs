/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! One-shot kernel timers, mostly used by drivers to poll hardware.
//!
//! Timers are kept in a list sorted by expiry where each entry stores its
//! delay relative to the previous one, so the tick only ever decrements the
//! head of the list.

use crate::config::TIME_REQUESTS;
use crate::kernel::Kernel;
use crate::sync::IrqGuard;

/// A timer callback. It runs in interrupt context and must not sleep.
pub type TimerFn = fn(&mut Kernel);

#[derive(Copy, Clone)]
struct TimerEntry {
    /// Jiffies between the expiry of the previous entry and this one.
    delta: i64,
    callback: Option<TimerFn>,
    next: Option<usize>,
}

impl TimerEntry {
    const FREE: TimerEntry = TimerEntry { delta: 0, callback: None, next: None };
}

pub struct TimerList {
    pool: [TimerEntry; TIME_REQUESTS],
    head: Option<usize>,
}

impl TimerList {
    pub fn new() -> Self {
        Self {
            pool: [TimerEntry::FREE; TIME_REQUESTS],
            head: None,
        }
    }

    pub fn len(&self) -> usize {
        self.pool.iter().filter(|entry| entry.callback.is_some()).count()
    }

    /// Jiffies left before each pending timer expires, in expiry order.
    pub fn deadlines(&self) -> impl Iterator<Item = i64> + '_ {
        let mut cursor = self.head;
        let mut deadline = 0;

        core::iter::from_fn(move || {
            let entry = &self.pool[cursor?];
            cursor = entry.next;
            deadline += entry.delta;
            Some(deadline)
        })
    }

    fn insert(&mut self, slot: usize, delay: i64, callback: TimerFn) {
        let mut remaining = delay;
        let mut prev = None;
        let mut cursor = self.head;

        // Entries expiring at the same time fire in insertion order.
        while let Some(nr) = cursor {
            if self.pool[nr].delta > remaining {
                break;
            }
            remaining -= self.pool[nr].delta;
            prev = Some(nr);
            cursor = self.pool[nr].next;
        }

        self.pool[slot] = TimerEntry {
            delta: remaining,
            callback: Some(callback),
            next: cursor,
        };
        if let Some(nr) = cursor {
            self.pool[nr].delta -= remaining;
        }
        match prev {
            Some(prev) => self.pool[prev].next = Some(slot),
            None => self.head = Some(slot),
        }
    }

    /// Unlink the head entry if it expired.
    fn pop_expired(&mut self) -> Option<TimerFn> {
        let head = self.head?;
        if self.pool[head].delta > 0 {
            return None;
        }

        let entry = self.pool[head];
        self.head = entry.next;
        self.pool[head] = TimerEntry::FREE;

        entry.callback
    }
}

impl Kernel {
    /// Call `callback` in `delay` jiffies, from the timer interrupt. A delay
    /// of 0 or less calls it right away.
    pub fn add_timer(&mut self, delay: i64, callback: TimerFn) {
        if delay <= 0 {
            callback(self);
            return;
        }

        let _irq = IrqGuard::new();
        let Some(slot) = self.timers.pool.iter()
            .position(|entry| entry.callback.is_none()) else {
            self.panic(format_args!("No more time requests free"));
        };

        self.timers.insert(slot, delay, callback);
    }

    /// One tick went by: fire every timer that expired, in order.
    pub(crate) fn run_timers(&mut self) {
        {
            let _irq = IrqGuard::new();
            let Some(head) = self.timers.head else { return };
            self.timers.pool[head].delta -= 1;
        }

        loop {
            let callback = {
                let _irq = IrqGuard::new();
                self.timers.pop_expired()
            };
            let Some(callback) = callback else { break };
            callback(self);
        }
    }
}

#[cfg(test)]
mod test {
    use alloc::vec::Vec;

    use crate::arch::test::fixture::kernel;
    use crate::config::TIME_REQUESTS;
    use crate::kernel::Kernel;
    use crate::sync::Spinlock;
    use crate::task::sched::Privilege;
    use crate::task::wait::WaitChannel;

    static FIRED: Spinlock<Vec<u32>> = Spinlock::new(Vec::new());

    fn first(_: &mut Kernel) { FIRED.lock().push(1); }
    fn second(_: &mut Kernel) { FIRED.lock().push(2); }
    fn third(_: &mut Kernel) { FIRED.lock().push(3); }
    fn fourth(_: &mut Kernel) { FIRED.lock().push(4); }
    fn nothing(_: &mut Kernel) {}

    fn wake_custom(k: &mut Kernel) {
        k.wake_up_all(WaitChannel::Custom(7));
    }

    #[test]
    fn test_timers_fire_in_deadline_order() {
        let mut k = kernel();

        k.add_timer(5, first);
        k.add_timer(3, second);
        k.add_timer(5, third);
        k.add_timer(9, fourth);
        assert_eq!(k.timers.deadlines().collect::<Vec<_>>(), [3, 5, 5, 9]);
        assert_eq!(k.timers.len(), 4);

        let mut fired_at = Vec::new();
        for tick in 1..=10 {
            let before = FIRED.lock().len();
            k.do_timer(Privilege::Kernel);
            for _ in before..FIRED.lock().len() {
                fired_at.push(tick);
            }
        }

        assert_eq!(*FIRED.lock(), [2, 1, 3, 4]);
        assert_eq!(fired_at, [3, 5, 5, 9]);
        assert_eq!(k.timers.len(), 0);
    }

    #[test]
    fn test_insertion_rebases_following_delta() {
        let mut k = kernel();

        k.add_timer(10, nothing);
        k.add_timer(4, nothing);
        k.add_timer(7, nothing);
        assert_eq!(k.timers.deadlines().collect::<Vec<_>>(), [4, 7, 10]);

        k.do_timer(Privilege::Kernel);
        k.add_timer(3, nothing);
        assert_eq!(k.timers.deadlines().collect::<Vec<_>>(), [3, 3, 6, 9]);
    }

    #[test]
    fn test_zero_delay_runs_immediately() {
        let mut k = kernel();
        let task = crate::arch::test::fixture::spawn(&mut k);
        k.switch_to(task);
        k.sleep_on(WaitChannel::Custom(7));

        k.add_timer(0, wake_custom);
        assert_eq!(k.timers.len(), 0);
        assert_eq!(k.nr_sleepers(WaitChannel::Custom(7)), 0);
    }

    #[test]
    #[should_panic(expected = "No more time requests free")]
    fn test_exhausted_pool_is_fatal() {
        let mut k = kernel();

        for _ in 0..=TIME_REQUESTS {
            k.add_timer(100, nothing);
        }
    }
}
