/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/
use alloc::vec;
use alloc::vec::Vec;

use crate::mem::PAddr;

/// The hosted machine's RAM. Byte 0 of the buffer is physical address 0.
pub struct PhysMemory {
    bytes: Vec<u8>,
    tlb_flushes: u64,
}

impl PhysMemory {
    pub fn new(size: u32) -> Self {
        Self {
            // Garbage rather than zeroes so that missing initializations show.
            bytes: vec![0xf9; size as usize],
            tlb_flushes: 0,
        }
    }

    pub fn read_u32(&self, addr: PAddr) -> u32 {
        let at = addr.0 as usize;
        let mut word = [0u8; 4];
        word.copy_from_slice(&self.bytes[at..(at + 4)]);

        u32::from_le_bytes(word)
    }

    pub fn write_u32(&mut self, addr: PAddr, value: u32) {
        let at = addr.0 as usize;
        self.bytes[at..(at + 4)].copy_from_slice(&value.to_le_bytes());
    }

    pub fn slice(&self, addr: PAddr, len: usize) -> &[u8] {
        &self.bytes[(addr.0 as usize)..(addr.0 as usize + len)]
    }

    pub fn slice_mut(&mut self, addr: PAddr, len: usize) -> &mut [u8] {
        &mut self.bytes[(addr.0 as usize)..(addr.0 as usize + len)]
    }

    pub fn copy(&mut self, src: PAddr, dst: PAddr, len: usize) {
        let src = src.0 as usize;
        self.bytes.copy_within(src..(src + len), dst.0 as usize);
    }

    pub fn fill(&mut self, dst: PAddr, len: usize, byte: u8) {
        self.slice_mut(dst, len).fill(byte);
    }

    /// The hosted MMU has no translation cache, flushes are only counted.
    pub fn invalidate_tlb(&mut self) {
        self.tlb_flushes += 1;
    }

    pub fn tlb_flushes(&self) -> u64 {
        self.tlb_flushes
    }
}
