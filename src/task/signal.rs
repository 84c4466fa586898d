/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Pending and blocked signals. Running handlers is up to the system call
//! return path; the core only records signals and makes sleeping tasks
//! notice them.

use core::fmt;

use crate::debug;
use crate::error::TaskError;
use crate::kernel::Kernel;
use crate::task::{Pid, TaskState};

pub const SIGHUP: u32  = 1;
pub const SIGINT: u32  = 2;
pub const SIGQUIT: u32 = 3;
pub const SIGKILL: u32 = 9;
pub const SIGUSR1: u32 = 10;
pub const SIGSEGV: u32 = 11;
pub const SIGALRM: u32 = 14;
pub const SIGTERM: u32 = 15;
pub const SIGCHLD: u32 = 17;
pub const SIGCONT: u32 = 18;
pub const SIGSTOP: u32 = 19;

pub const NSIG: u32 = 32;

/// A set of signals, bit `n - 1` standing for signal `n`.
#[derive(Copy, Clone, PartialEq, Eq, Default)]
pub struct SigSet(pub u32);

impl SigSet {
    pub const fn empty() -> Self {
        Self(0)
    }

    pub const fn of(sig: u32) -> Self {
        Self(1 << (sig - 1))
    }

    pub fn contains(&self, sig: u32) -> bool {
        self.0 & Self::of(sig).0 != 0
    }

    pub fn insert(&mut self, sig: u32) {
        self.0 |= Self::of(sig).0;
    }

    pub fn remove(&mut self, sig: u32) {
        self.0 &= !Self::of(sig).0;
    }

    pub fn without(&self, other: SigSet) -> SigSet {
        SigSet(self.0 & !other.0)
    }

    pub fn is_empty(&self) -> bool {
        self.0 == 0
    }

    /// Lowest-numbered signal of the set.
    pub fn first(&self) -> Option<u32> {
        (!self.is_empty()).then(|| self.0.trailing_zeros() + 1)
    }
}

impl fmt::Debug for SigSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigSet({:#010x})", self.0)
    }
}

impl Kernel {
    /// Send signal `sig` to the process `pid`.
    ///
    /// SIGSTOP and SIGCONT act right away: a stopped task leaves any wait
    /// channel and re-issues its interrupted operation once continued. A task
    /// in uninterruptible sleep keeps SIGSTOP pending and is stopped by the
    /// scheduler once woken up.
    pub fn kill(&mut self, pid: Pid, sig: u32) -> Result<(), TaskError> {
        if sig == 0 || sig > NSIG {
            return Err(TaskError::InvalidSignal(sig));
        }
        let nr = self.find_task(pid).ok_or(TaskError::NoSuchProcess(pid))?;
        let task = self.tasks[nr].as_mut().ok_or(TaskError::NoSuchProcess(pid))?;

        match sig {
            SIGSTOP if matches!(task.state,
                                TaskState::Running
                                | TaskState::Ready
                                | TaskState::InterruptibleSleep) => {
                debug!("stopping task {} (pid {})", nr, pid);
                task.state = TaskState::Stopped;
                task.wait = None;
                if nr == self.current {
                    self.schedule();
                }
            },
            SIGCONT => {
                task.signal.remove(SIGSTOP);
                if task.state == TaskState::Stopped {
                    task.state = TaskState::Ready;
                }
            },
            _ => task.signal.insert(sig),
        }

        Ok(())
    }

    /// The current task's blocked signals.
    pub fn sgetmask(&self) -> SigSet {
        self.current_task().blocked
    }

    /// Replace the current task's blocked signals, returning the old set.
    /// SIGKILL cannot be blocked.
    pub fn ssetmask(&mut self, mask: SigSet) -> SigSet {
        let task = self.current_task_mut();
        let old = task.blocked;
        task.blocked = mask.without(SigSet::of(SIGKILL));

        old
    }

    /// Take the next pending, unblocked signal of the current task, for the
    /// system call return path to deliver.
    pub fn dequeue_signal(&mut self) -> Option<u32> {
        let task = self.current_task_mut();
        let sig = task.signal.without(task.blocked).first()?;
        task.signal.remove(sig);

        Some(sig)
    }
}
