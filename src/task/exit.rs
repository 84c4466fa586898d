/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use core::task::Poll;

use crate::config::NR_TASKS;
use crate::error::TaskError;
use crate::kernel::Kernel;
use crate::task::signal::SIGCHLD;
use crate::task::wait::WaitChannel;
use crate::task::{Pid, TaskState};
use crate::{debug, warning};

/// Orphans are adopted by init.
const INIT_PID: Pid = Pid(1);

impl Kernel {
    /// Terminate the current task. Its memory is released right away, the
    /// slot stays in use as a zombie until the parent reaps it.
    pub fn exit(&mut self, code: i32) {
        if self.current == 0 {
            self.panic(format_args!("task[0] trying to exit"));
        }

        let (pid, parent, start_code, data_limit) = {
            let task = self.current_task();
            (task.pid, task.parent, task.start_code, task.data_limit)
        };
        self.free_page_tables(start_code, data_limit);

        // Without init, nobody would ever reap the zombies.
        let init_alive = self.find_task(INIT_PID).is_some_and(|nr| nr != self.current);
        let mut zombie_orphans = false;
        for nr in 1..NR_TASKS {
            let Some(task) = self.tasks[nr].as_mut() else { continue };
            if task.parent != pid {
                continue;
            }
            task.parent = INIT_PID;

            if task.state == TaskState::Zombie {
                if init_alive {
                    zombie_orphans = true;
                } else {
                    warning!("exit: no init to adopt zombie pid {}, releasing", task.pid);
                    self.release(nr);
                }
            }
        }
        if zombie_orphans {
            if let Err(err) = self.kill(INIT_PID, SIGCHLD) {
                warning!("exit: couldn't notify init: {}", err);
            }
        }

        let task = self.current_task_mut();
        task.state = TaskState::Zombie;
        task.exit_code = code;
        task.executable = None;
        task.wait = None;
        task.alarm = 0;
        debug!("exit: pid {} with code {}", pid, code);

        match self.find_task(parent) {
            Some(nr) => {
                if let Some(parent) = self.tasks[nr].as_mut() {
                    parent.signal.insert(SIGCHLD);
                }
                self.wake_up_all(WaitChannel::Child(parent));
            },
            None => {
                warning!("exit: no parent {} for pid {}, releasing", parent, pid);
                self.release(self.current);
            },
        }

        self.schedule();
    }

    /// Free the slot of a dead task.
    pub(crate) fn release(&mut self, nr: usize) {
        if nr == 0 || self.tasks.get(nr).is_none_or(|task| task.is_none()) {
            self.panic(format_args!("trying to release non-existent task {nr}"));
        }

        self.tasks[nr] = None;
    }

    /// Wait for a child to exit and collect its exit code. `None` waits for
    /// any child, `Some(pid)` for that one only.
    ///
    /// Returns `Pending` when the task went to sleep until a child exits;
    /// the call is to be issued again once it runs.
    pub fn waitpid(&mut self, pid: Option<Pid>) -> Poll<Result<(Pid, i32), TaskError>> {
        let me = self.current_task().pid;
        let mut has_children = false;

        for nr in 1..NR_TASKS {
            let Some(child) = self.tasks[nr].as_ref() else { continue };
            if child.parent != me || pid.is_some_and(|pid| pid != child.pid) {
                continue;
            }
            has_children = true;

            if child.state == TaskState::Zombie {
                let (child_pid, code, utime, stime) =
                    (child.pid, child.exit_code, child.utime, child.stime);
                let task = self.current_task_mut();
                task.cutime += utime;
                task.cstime += stime;
                task.signal.remove(SIGCHLD);
                self.release(nr);

                return Poll::Ready(Ok((child_pid, code)));
            }
        }

        if !has_children {
            return Poll::Ready(Err(TaskError::NoChild));
        }

        let task = self.current_task_mut();
        task.signal.remove(SIGCHLD);
        if task.has_unblocked_signal() {
            return Poll::Ready(Err(TaskError::Interrupted));
        }

        self.interruptible_sleep_on(WaitChannel::Child(me));
        Poll::Pending
    }
}

#[cfg(test)]
mod test {
    use core::task::Poll;

    use crate::arch::test::fixture::{kernel, spawn, spawn_process};
    use crate::arch::test::mmu::user_write;
    use crate::error::TaskError;
    use crate::task::signal::{SIGCHLD, SIGUSR1};
    use crate::task::{Pid, TaskState};

    #[test]
    #[should_panic(expected = "task[0] trying to exit")]
    fn test_idle_task_cannot_exit() {
        let mut k = kernel();
        k.exit(0);
    }

    #[test]
    fn test_parent_reaps_exited_child() {
        let mut k = kernel();
        let parent = spawn_process(&mut k, None, 0, 0x10_0000);
        let parent_pid = k.current_task().pid;
        assert_eq!(user_write(&mut k, 0x10, 1), Poll::Ready(()));
        let child = spawn(&mut k);
        let child_pid = k.task(child).unwrap().pid;
        let free = k.frames.nr_free();

        assert_eq!(k.waitpid(None), Poll::Pending);
        assert_eq!(k.task(parent).unwrap().state, TaskState::InterruptibleSleep);

        k.switch_to(child);
        k.current_task_mut().utime = 3;
        k.current_task_mut().stime = 4;
        k.exit(42);

        let zombie = k.task(child).unwrap();
        assert_eq!(zombie.state, TaskState::Zombie);
        assert!(zombie.executable.is_none());
        // The child's page table is gone; its pages were shared with the
        // parent.
        assert_eq!(k.frames.nr_free(), free + 1);
        // The woken parent is elected right away.
        assert_eq!(k.current, parent);
        assert_eq!(k.task(parent).unwrap().state, TaskState::Running);
        assert!(k.task(parent).unwrap().signal.contains(SIGCHLD));

        assert_eq!(k.waitpid(None), Poll::Ready(Ok((child_pid, 42))));
        assert!(k.task(child).is_none());

        let task = k.current_task();
        assert_eq!((task.cutime, task.cstime), (3, 4));
        assert!(!task.signal.contains(SIGCHLD));
        assert_eq!(task.pid, parent_pid);
    }

    #[test]
    fn test_waitpid_without_children() {
        let mut k = kernel();
        spawn_process(&mut k, None, 0, 0x10_0000);

        assert_eq!(k.waitpid(None), Poll::Ready(Err(TaskError::NoChild)));

        spawn(&mut k);
        assert_eq!(k.waitpid(Some(Pid(999))), Poll::Ready(Err(TaskError::NoChild)));
    }

    #[test]
    fn test_waitpid_interrupted_by_signal() {
        let mut k = kernel();
        spawn_process(&mut k, None, 0, 0x10_0000);
        let pid = k.current_task().pid;
        spawn(&mut k);

        k.kill(pid, SIGUSR1).unwrap();
        assert_eq!(k.waitpid(None), Poll::Ready(Err(TaskError::Interrupted)));
    }

    #[test]
    fn test_orphans_are_adopted_by_init() {
        let mut k = kernel();
        let init = spawn(&mut k);
        assert_eq!(k.task(init).unwrap().pid, Pid(1));

        let parent = spawn_process(&mut k, None, 0, 0x10_0000);
        let first = spawn(&mut k);
        let second = spawn(&mut k);
        let first_pid = k.task(first).unwrap().pid;

        k.switch_to(first);
        k.exit(1);
        k.switch_to(parent);
        k.exit(0);

        assert_eq!(k.task(first).unwrap().parent, Pid(1));
        assert_eq!(k.task(second).unwrap().parent, Pid(1));
        assert!(k.task(init).unwrap().signal.contains(SIGCHLD));

        // The zombie is init's to reap now.
        k.switch_to(init);
        assert_eq!(k.waitpid(None), Poll::Ready(Ok((first_pid, 1))));
        assert_eq!(k.waitpid(None), Poll::Pending);
        assert!(k.task(second).unwrap().is_runnable());
    }

    #[test]
    fn test_zombie_orphans_released_without_init() {
        let mut k = kernel();
        let init = spawn(&mut k);
        k.switch_to(init);
        k.exit(0);
        k.release(init);
        assert_eq!(k.current, 0);

        let parent = spawn_process(&mut k, None, 0, 0x10_0000);
        let child = spawn(&mut k);
        k.switch_to(child);
        k.exit(1);
        assert_eq!(k.task(child).unwrap().state, TaskState::Zombie);

        k.switch_to(parent);
        k.exit(0);

        assert!(k.task(child).is_none());
        assert_eq!(k.task(parent).unwrap().state, TaskState::Zombie);
    }

    #[test]
    fn test_exit_without_parent_releases_slot() {
        let mut k = kernel();
        let task = spawn(&mut k);
        k.tasks[task].as_mut().unwrap().parent = Pid(500);

        k.switch_to(task);
        k.exit(0);

        assert!(k.task(task).is_none());
        assert_eq!(k.current, 0);
    }
}
