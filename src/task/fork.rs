/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use crate::config::{NR_TASKS, TASK_SIZE};
use crate::debug;
use crate::error::ForkError;
use crate::kernel::Kernel;
use crate::task::signal::SigSet;
use crate::task::{Pid, TaskState};

impl Kernel {
    /// Pick the pid and the task slot of a new process. Pids go up and wrap
    /// around to 1, skipping the ones still in use.
    pub fn find_empty_process(&mut self) -> Result<(usize, Pid), ForkError> {
        let pid = loop {
            self.last_pid = self.last_pid.checked_add(1).unwrap_or(1);
            let pid = Pid(self.last_pid);

            if self.find_task(pid).is_none() {
                break pid;
            }
        };

        let nr = (1..NR_TASKS)
            .find(|&nr| self.tasks[nr].is_none())
            .ok_or(ForkError::NoFreeSlot)?;

        Ok((nr, pid))
    }

    /// Duplicate the current task. The child shares every page of its parent
    /// copy-on-write and returns 0 from the system call.
    pub fn fork(&mut self) -> Result<Pid, ForkError> {
        let (nr, pid) = self.find_empty_process()?;

        let parent = self.current_task();
        let mut child = parent.clone();
        child.pid = pid;
        child.parent = parent.pid;
        // Not runnable until its memory is set up.
        child.state = TaskState::UninterruptibleSleep;
        child.counter = child.priority;
        child.signal = SigSet::empty();
        child.alarm = 0;
        child.wait = None;
        child.utime = 0;
        child.stime = 0;
        child.cutime = 0;
        child.cstime = 0;
        child.context.set_return_value(0);
        self.tasks[nr] = Some(child);

        if let Err(err) = self.copy_mem(nr) {
            self.tasks[nr] = None;
            return Err(err);
        }

        if let Some(child) = self.tasks[nr].as_mut() {
            child.state = TaskState::Ready;
        }
        debug!("fork: pid {} -> pid {} in slot {}", self.current_task().pid, pid, nr);

        Ok(pid)
    }

    /// Give task `nr` a copy-on-write copy of the current task's space, at
    /// its own slice of the linear space.
    fn copy_mem(&mut self, nr: usize) -> Result<(), ForkError> {
        let (old_base, code_limit, data_limit) = {
            let task = self.current_task();
            (task.start_code, task.code_limit, task.data_limit)
        };
        if data_limit < code_limit {
            self.panic(format_args!("Bad data_limit"));
        }

        let new_base = nr as u32 * TASK_SIZE;
        if let Some(child) = self.tasks[nr].as_mut() {
            child.start_code = new_base;
        }

        if let Err(err) = self.copy_page_tables(old_base, new_base, data_limit) {
            debug!("fork: {}, releasing slot {}", err, nr);
            self.free_page_tables(new_base, data_limit);
            return Err(err.into());
        }

        Ok(())
    }
}
