/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/
/// What the hosted machine saves of a task when it traps: only the register
/// carrying system call results matters to the kernel core.
#[derive(Debug, Default, Clone)]
pub struct TaskMachineContext {
    pub eax: u32,
    pub eip: u32,
}

impl TaskMachineContext {
    pub fn set_return_value(&mut self, value: u32) {
        self.eax = value;
    }

    pub fn return_value(&self) -> u32 {
        self.eax
    }
}
