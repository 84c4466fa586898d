/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! The scheduler. Each task gets a run credit, its counter, which the timer
//! tick consumes; the runnable task with the most credit left runs. Once
//! every runnable task ran out of credit, all counters are recomputed from
//! the tasks' priorities, sleeping tasks included, so that tasks that slept
//! a lot come back with more credit than the others.

use crate::config::{HZ, MAX_PRIORITY, NR_TASKS};
use crate::kernel::Kernel;
use crate::task::TaskState;
use crate::task::signal::{SIGALRM, SIGSTOP};
use crate::task::wait::WaitChannel;
use crate::info;

/// Computes a task's new counter from its remaining counter and its
/// priority when counters are recomputed.
pub type DecayFn = fn(counter: i32, priority: i32) -> i32;

/// Half of the unused credit is carried over: a task sleeping forever
/// converges to twice its priority.
pub fn half_life_decay(counter: i32, priority: i32) -> i32 {
    (counter >> 1) + priority
}

/// The mode the CPU was in when the timer interrupt hit.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Privilege {
    User,
    Kernel,
}

impl Kernel {
    /// Elect the next task to run and switch to it. Also turns expired
    /// alarms into SIGALRM and wakes up interruptible sleepers that have a
    /// signal to handle.
    pub fn schedule(&mut self) {
        let jiffies = self.jiffies;

        for task in self.tasks[1..].iter_mut().rev().flatten() {
            if task.alarm != 0 && task.alarm < jiffies {
                task.signal.insert(SIGALRM);
                task.alarm = 0;
            }
            if task.state == TaskState::InterruptibleSleep
                && task.has_unblocked_signal() {
                task.state = TaskState::Ready;
                task.wait = None;
            }
            // Sent while the task slept uninterruptibly.
            if task.is_runnable() && task.signal.contains(SIGSTOP) {
                task.signal.remove(SIGSTOP);
                task.state = TaskState::Stopped;
            }
        }

        let decay = self.config.decay;
        let next = loop {
            let mut best = -1;
            let mut next = 0;

            // Ties go to the highest slot.
            for nr in (1..NR_TASKS).rev() {
                if let Some(task) = &self.tasks[nr] {
                    if task.is_runnable() && task.counter > best {
                        best = task.counter;
                        next = nr;
                    }
                }
            }
            if best != 0 {
                break next;
            }

            for task in self.tasks[1..].iter_mut().flatten() {
                task.counter = decay(task.counter, task.priority);
            }
        };

        self.switch_to(next);
    }

    /// Make task `next` the running task.
    pub fn switch_to(&mut self, next: usize) {
        if next != self.current {
            if let Some(prev) = self.tasks[self.current].as_mut() {
                if prev.state == TaskState::Running {
                    prev.state = TaskState::Ready;
                }
            }
        }

        match self.tasks[next].as_mut() {
            Some(task) => task.state = TaskState::Running,
            None => self.panic(format_args!("switching to empty task slot {next}")),
        }
        self.current = next;
    }

    /// The timer interrupt handler, run `HZ` times per second.
    ///
    /// The current task is only preempted when its counter runs out while it
    /// is in user mode: kernel code is never preempted.
    pub fn do_timer(&mut self, privilege: Privilege) {
        self.jiffies += 1;

        let task = self.current_task_mut();
        match privilege {
            Privilege::User => task.utime += 1,
            Privilege::Kernel => task.stime += 1,
        }

        self.run_timers();

        let task = self.current_task_mut();
        task.counter -= 1;
        if task.counter > 0 {
            return;
        }
        task.counter = 0;

        if privilege == Privilege::User {
            self.schedule();
        }
    }

    /// Send SIGALRM to the current task in `seconds`; 0 cancels the alarm.
    /// Returns the seconds that were left of the previous alarm.
    pub fn alarm(&mut self, seconds: u32) -> u32 {
        let jiffies = self.jiffies;
        let task = self.current_task_mut();

        let old = if task.alarm != 0 {
            (task.alarm.saturating_sub(jiffies) / HZ) as u32
        } else {
            0
        };
        task.alarm = if seconds > 0 {
            jiffies + HZ * seconds as u64
        } else {
            0
        };

        old
    }

    /// Lower the current task's priority by `increment`. An increment that
    /// would bring it below 1 is ignored; raising it stops at
    /// `MAX_PRIORITY`.
    pub fn nice(&mut self, increment: i32) {
        let task = self.current_task_mut();

        match task.priority.checked_sub(increment) {
            Some(priority) if priority > 0 => {
                task.priority = priority.min(MAX_PRIORITY);
            },
            _ => (),
        }
    }

    /// Sleep until a signal arrives. Unlike the other blocking calls, this
    /// one is not restarted: the signal ends it.
    pub fn pause(&mut self) {
        self.interruptible_sleep_on(WaitChannel::Pause);
    }

    /// Log the state of every task.
    pub fn dump_tasks(&self) {
        info!("{:>4} {:>6} {:>6} {:<22} {:>7} {:>8}",
              "slot", "pid", "ppid", "state", "counter", "priority");

        for (nr, task) in self.tasks.iter().enumerate() {
            let Some(task) = task else { continue };
            let current = if nr == self.current { '*' } else { ' ' };

            info!("{:>3}{} {:>6} {:>6} {:<22} {:>7} {:>8}",
                  nr, current, task.pid, task.parent,
                  alloc::format!("{:?}", task.state),
                  task.counter, task.priority);
        }
    }
}

#[cfg(test)]
mod test {
    use alloc::vec::Vec;

    use crate::arch::test::fixture::{kernel, small_config, spawn};
    use crate::config::{DEF_PRIORITY, MAX_PRIORITY};
    use crate::kernel::Kernel;
    use crate::task::TaskState;
    use crate::task::sched::{Privilege, half_life_decay};
    use crate::task::signal::SIGALRM;

    #[test]
    fn test_half_life_decay() {
        assert_eq!(half_life_decay(0, 15), 15);
        assert_eq!(half_life_decay(15, 15), 22);

        let mut counter = 0;
        for _ in 0..32 {
            counter = half_life_decay(counter, 4);
        }
        assert_eq!(counter, 7);
    }

    /// Four tasks with priorities 1, 2, 1 and 3 and no credit: each of them
    /// runs once before any runs twice, highest priority first, ties going
    /// to the highest slot.
    #[test]
    fn test_every_task_runs_before_any_runs_twice() {
        let mut k = kernel();
        let tasks: Vec<usize> = (0..4).map(|_| spawn(&mut k)).collect();
        for (&nr, priority) in tasks.iter().zip([1, 2, 1, 3]) {
            let task = k.tasks[nr].as_mut().unwrap();
            task.priority = priority;
            task.counter = 0;
        }

        k.schedule();
        let mut elected = alloc::vec![k.current];
        while elected.len() < 8 {
            k.do_timer(Privilege::User);
            if k.current != *elected.last().unwrap() {
                elected.push(k.current);
            }
        }

        assert_eq!(&elected[..4], &[tasks[3], tasks[1], tasks[2], tasks[0]]);
        assert_eq!(&elected[4..], &[tasks[3], tasks[1], tasks[2], tasks[0]]);
    }

    #[test]
    fn test_kernel_mode_is_not_preempted() {
        let mut k = kernel();
        let task = spawn(&mut k);
        spawn(&mut k);
        k.switch_to(task);
        k.tasks[task].as_mut().unwrap().counter = 1;

        k.do_timer(Privilege::Kernel);
        assert_eq!(k.current, task);
        assert_eq!(k.current_task().counter, 0);
        assert_eq!(k.current_task().stime, 1);

        k.do_timer(Privilege::User);
        assert_ne!(k.current, task);
        assert_eq!(k.task(task).unwrap().state, TaskState::Ready);
    }

    #[test]
    fn test_idle_task_when_nothing_runs() {
        let mut k = kernel();
        let task = spawn(&mut k);
        k.switch_to(task);
        k.pause();

        assert_eq!(k.current, 0);
        assert_eq!(k.task(0).unwrap().state, TaskState::Running);
    }

    #[test]
    fn test_alarm_raises_sigalrm() {
        let mut k = kernel();
        let task = spawn(&mut k);
        k.switch_to(task);

        assert_eq!(k.alarm(1), 0);
        assert_eq!(k.alarm(2), 1);
        k.pause();

        for _ in 0..200 {
            k.do_timer(Privilege::Kernel);
        }
        k.schedule();
        assert_eq!(k.current, 0);

        k.do_timer(Privilege::Kernel);
        k.schedule();
        assert_eq!(k.current, task);
        assert!(k.current_task().signal.contains(SIGALRM));
        assert_eq!(k.current_task().alarm, 0);
    }

    #[test]
    fn test_nice_keeps_priority_positive() {
        let mut k = kernel();
        let task = spawn(&mut k);
        k.switch_to(task);

        k.nice(10);
        assert_eq!(k.current_task().priority, 5);
        k.nice(5);
        assert_eq!(k.current_task().priority, 5);
        k.nice(-3);
        assert_eq!(k.current_task().priority, 8);
        k.dump_tasks();
    }

    #[test]
    fn test_nice_extreme_increments() {
        let mut k = kernel();
        let task = spawn(&mut k);
        k.switch_to(task);

        k.nice(i32::MAX);
        assert_eq!(k.current_task().priority, DEF_PRIORITY);
        k.nice(i32::MIN);
        assert_eq!(k.current_task().priority, MAX_PRIORITY);
        k.nice(-1);
        assert_eq!(k.current_task().priority, MAX_PRIORITY);
    }

    fn flat_decay(_counter: i32, _priority: i32) -> i32 {
        3
    }

    #[test]
    fn test_custom_decay_policy() {
        let mut k = Kernel::new(small_config().decay(flat_decay)).unwrap();
        let tasks: Vec<usize> = (0..3).map(|_| spawn(&mut k)).collect();
        for &nr in &tasks {
            k.tasks[nr].as_mut().unwrap().counter = 0;
        }
        k.switch_to(tasks[0]);
        k.pause();

        // The sleeping task is aged along with the runnable ones.
        assert_eq!(k.current, tasks[2]);
        for &nr in &tasks {
            assert_eq!(k.task(nr).unwrap().counter, 3);
        }
    }
}
