/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! Wait channels. A task sleeping on a channel records it together with a
//! ticket taken from a kernel-wide counter; waking a channel wakes its
//! sleepers in ticket order, so the first task to sleep is the first to wake.

use crate::blk::buffer::BufferId;
use crate::kernel::Kernel;
use crate::task::{Pid, TaskState};

/// What a sleeping task is waiting for.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum WaitChannel {
    /// The buffer to be unlocked.
    Buffer(BufferId),

    /// Any buffer of the cache to be released.
    FreeBuffer,

    /// A block request descriptor to be retired.
    FreeRequest,

    /// A child of the process to exit.
    Child(Pid),

    /// Nothing but a signal.
    Pause,

    /// Channels of drivers and other collaborators of the core.
    Custom(u32),
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Wait {
    pub channel: WaitChannel,
    pub ticket: u64,
}

impl Kernel {
    /// Put the current task to sleep on `channel` until it gets woken up, and
    /// switch to another task.
    pub fn sleep_on(&mut self, channel: WaitChannel) {
        self.sleep(channel, TaskState::UninterruptibleSleep);
    }

    /// Like `sleep_on()`, but a pending signal that is not blocked wakes the
    /// task up as well.
    pub fn interruptible_sleep_on(&mut self, channel: WaitChannel) {
        self.sleep(channel, TaskState::InterruptibleSleep);
    }

    fn sleep(&mut self, channel: WaitChannel, state: TaskState) {
        if self.current == 0 {
            self.panic(format_args!("task[0] trying to sleep"));
        }

        let ticket = self.wait_seq;
        self.wait_seq += 1;

        let task = self.current_task_mut();
        task.state = state;
        task.wait = Some(Wait { channel, ticket });

        self.schedule();
    }

    /// Wake up the task that has been sleeping on `channel` the longest.
    /// Returns its slot, if any.
    pub fn wake_up(&mut self, channel: WaitChannel) -> Option<usize> {
        let nr = self.tasks.iter()
            .enumerate()
            .filter_map(|(nr, task)| {
                let wait = task.as_ref()?.wait?;
                (wait.channel == channel).then_some((wait.ticket, nr))
            })
            .min()?
            .1;

        self.make_ready(nr);

        Some(nr)
    }

    /// Wake up every task sleeping on `channel`, returning how many there
    /// were.
    pub fn wake_up_all(&mut self, channel: WaitChannel) -> usize {
        let mut nr_woken = 0;

        while self.wake_up(channel).is_some() {
            nr_woken += 1;
        }

        nr_woken
    }

    /// Number of tasks sleeping on `channel`.
    pub fn nr_sleepers(&self, channel: WaitChannel) -> usize {
        self.tasks.iter()
            .flatten()
            .filter(|task| task.wait.is_some_and(|wait| wait.channel == channel))
            .count()
    }

    fn make_ready(&mut self, nr: usize) {
        if let Some(task) = self.tasks[nr].as_mut() {
            task.wait = None;
            if matches!(task.state, TaskState::InterruptibleSleep
                                    | TaskState::UninterruptibleSleep) {
                task.state = TaskState::Ready;
            }
        }
    }
}
