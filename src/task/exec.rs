/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

use crate::config::TASK_SIZE;
use crate::debug;
use crate::error::TaskError;
use crate::kernel::Kernel;
use crate::task::ExecImage;

impl Kernel {
    /// Replace the current task's memory with a fresh image: the old pages
    /// are released and the new ones get loaded on demand from `image`, or
    /// zero-filled if there is none.
    ///
    /// `end_data` is the end of the image's initialized data and `limit` the
    /// size of the task's space, both relative to its start.
    pub fn exec_image(
        &mut self,
        image: Option<&'static dyn ExecImage>,
        end_data: u32,
        limit: u32,
    ) -> Result<(), TaskError> {
        if limit > TASK_SIZE || end_data > limit {
            return Err(TaskError::ImageTooLarge(limit));
        }
        if self.current == 0 {
            self.panic(format_args!("task[0] trying to exec"));
        }

        let (start_code, data_limit) = {
            let task = self.current_task();
            (task.start_code, task.data_limit)
        };
        self.free_page_tables(start_code, data_limit);

        let task = self.current_task_mut();
        task.code_limit = limit;
        task.data_limit = limit;
        task.end_data = end_data;
        task.executable = image;
        debug!("exec: pid {}, {:#x} bytes of data, limit {:#x}",
               task.pid, end_data, limit);

        Ok(())
    }
}
