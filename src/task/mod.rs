/******************************************************************************
 * Copyright © 2021 Kévin Lesénéchal <kevin.lesenechal@gmail.com>             *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

pub mod exec;
pub mod exit;
pub mod fork;
pub mod sched;
pub mod signal;
pub mod timer;
pub mod wait;

use core::fmt;

use crate::arch::task::TaskMachineContext;
use crate::blk::DeviceId;
use crate::config::{DEF_PRIORITY, INIT_TASK_LIMIT};
use crate::kernel::Kernel;
use crate::task::signal::SigSet;
use crate::task::wait::Wait;

/// A process identifier. Only the idle task has pid 0.
#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Pid(pub i32);

impl fmt::Display for Pid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identity of an executable's backing store. The memory manager compares
/// them for equality and nothing else.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub struct ImageId(pub u64);

/// An executable file as the filesystem hands it to the memory manager for
/// demand paging.
pub trait ExecImage: Sync {
    fn id(&self) -> ImageId;

    /// The block device the executable lives on.
    fn device(&self) -> DeviceId;

    /// Device block holding block `block` of the file, 0 for a hole.
    fn bmap(&self, block: u32) -> u32;
}

#[derive(Clone)]
pub struct Task {
    /// A unique process identifier, there is no other existing task with the
    /// same pid at the same time. Pids are reused once they wrapped around.
    pub pid: Pid,

    /// The pid of the process that forked this one, and to which the exit
    /// status is reported. Orphans are adopted by pid 1.
    pub parent: Pid,

    /// The current state of the task, whether it is running, waiting to be
    /// scheduled, waiting for an event, stopped or dead.
    pub state: TaskState,

    /// Number of ticks the task gets to run each time the counters are
    /// recomputed.
    pub priority: i32,

    /// Ticks left before the task is preempted; the scheduler elects the
    /// runnable task with the highest counter.
    pub counter: i32,

    pub signal: SigSet,
    pub blocked: SigSet,

    /// Jiffy at which SIGALRM is sent, 0 if no alarm is set.
    pub alarm: u64,

    pub exit_code: i32,

    /// Set while the task sleeps on a wait channel.
    pub wait: Option<Wait>,

    /// Linear address of the task's space: slot number times `TASK_SIZE`.
    pub start_code: u32,
    pub code_limit: u32,
    pub data_limit: u32,

    /// End of the initialized data of the executable, relative to
    /// `start_code`: pages past it are zero-filled instead of loaded.
    pub end_data: u32,

    /// The executable the task runs, used for demand paging. The filesystem
    /// keeps it alive for as long as a task refers to it.
    pub executable: Option<&'static dyn ExecImage>,

    /// Ticks spent in user mode and in kernel mode.
    pub utime: u64,
    pub stime: u64,

    /// Accumulated times of the reaped children.
    pub cutime: u64,
    pub cstime: u64,

    /// The registers saved when the task last trapped into the kernel. The
    /// exact content of this struct is arch-specific.
    pub context: TaskMachineContext,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TaskState {
    /// This task is currently running on the CPU.
    Running,

    /// This task is ready and willing to run, waiting to be elected by the
    /// scheduler.
    Ready,

    /// The task waits for an event on a wait channel; a signal that is not
    /// blocked wakes it up early.
    InterruptibleSleep,

    /// The task waits for an event on a wait channel, only a wake-up on that
    /// channel makes it runnable again.
    UninterruptibleSleep,

    /// The task exited and waits for its parent to collect its exit status.
    Zombie,

    /// The task has been stopped by SIGSTOP and will not run until it gets
    /// SIGCONT.
    Stopped,
}

impl Task {
    /// Task 0, the idle task: it runs the kernel image and is elected when
    /// no other task is runnable.
    pub fn idle() -> Self {
        Self {
            pid: Pid(0),
            parent: Pid(0),
            state: TaskState::Running,
            priority: DEF_PRIORITY,
            counter: DEF_PRIORITY,
            signal: SigSet::empty(),
            blocked: SigSet::empty(),
            alarm: 0,
            exit_code: 0,
            wait: None,
            start_code: 0,
            code_limit: INIT_TASK_LIMIT,
            data_limit: INIT_TASK_LIMIT,
            end_data: 0,
            executable: None,
            utime: 0,
            stime: 0,
            cutime: 0,
            cstime: 0,
            context: TaskMachineContext::default(),
        }
    }

    pub fn is_runnable(&self) -> bool {
        matches!(self.state, TaskState::Running | TaskState::Ready)
    }

    /// Whether a pending signal is not blocked.
    pub fn has_unblocked_signal(&self) -> bool {
        !self.signal.without(self.blocked).is_empty()
    }
}

impl Kernel {
    pub fn current(&self) -> usize {
        self.current
    }

    pub fn current_task(&self) -> &Task {
        self.tasks[self.current].as_ref().expect("current task slot is empty")
    }

    pub fn current_task_mut(&mut self) -> &mut Task {
        self.tasks[self.current].as_mut().expect("current task slot is empty")
    }

    pub fn task(&self, nr: usize) -> Option<&Task> {
        self.tasks.get(nr)?.as_ref()
    }

    /// Slot of the task with pid `pid`.
    pub fn find_task(&self, pid: Pid) -> Option<usize> {
        self.tasks.iter()
            .position(|task| task.as_ref().is_some_and(|task| task.pid == pid))
    }
}
