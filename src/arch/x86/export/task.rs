/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/
/// Registers saved by the trap entry stubs, in push order. The kernel core
/// only ever touches `eax` (system call result) and `eip`; the rest is
/// restored verbatim on return to user mode.
#[repr(C)]
#[derive(Debug, Default, Clone)]
pub struct TaskMachineContext {
    pub ebx: u32,
    pub ecx: u32,
    pub edx: u32,
    pub esi: u32,
    pub edi: u32,
    pub ebp: u32,
    pub eax: u32,

    pub ds: u16,
    pub es: u16,
    pub fs: u16,
    pub gs: u16,

    pub eip: u32,
    pub cs: u32,
    pub eflags: u32,
    pub esp: u32,
    pub ss: u32,
}

impl TaskMachineContext {
    pub fn set_return_value(&mut self, value: u32) {
        self.eax = value;
    }

    pub fn return_value(&self) -> u32 {
        self.eax
    }
}
