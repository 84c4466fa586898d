/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! A block device backed by physical memory, carved right after the buffer
//! cache at boot. Transfers are plain copies, so every request completes
//! before the request function returns.

use crate::blk::{BlockDriver, Command, DeviceId, major};
use crate::config::{BLOCK_SIZE, SECTOR_SIZE};
use crate::error::BlockError;
use crate::kernel::Kernel;
use crate::mem::PAddr;
use crate::misc::align_up;
use crate::{info, warning};

/// The only unit of the RAM disk.
pub const RAMDISK_DEV: DeviceId = DeviceId::new(major::RAMDISK, 1);

pub struct RamDisk {
    start: PAddr,
    size: u32,
}

impl RamDisk {
    pub fn new(start: PAddr, size: u32) -> Self {
        Self { start, size }
    }
}

impl BlockDriver for RamDisk {
    fn name(&self) -> &'static str {
        "ramdisk"
    }

    fn do_request(&mut self, k: &mut Kernel, major: usize) {
        while let Some(req) = k.current_request(major) {
            let offset = req.sector as u64 * SECTOR_SIZE as u64;
            let len = req.nr_sectors * SECTOR_SIZE;

            let in_bounds = offset + len as u64 <= self.size as u64;
            if req.dev != Some(RAMDISK_DEV) || !in_bounds {
                k.end_request(major, false);
                continue;
            }

            let addr = self.start + offset as u32;
            match req.cmd {
                Command::Read | Command::ReadAhead => {
                    k.phys.copy(addr, req.buffer, len as usize)
                },
                Command::Write | Command::WriteAhead => {
                    k.phys.copy(req.buffer, addr, len as usize)
                },
            }
            k.end_request(major, true);
        }
    }
}

impl Kernel {
    /// Copy a disk image into the RAM disk, from its first block. Returns
    /// the number of blocks loaded.
    pub fn rd_load(&mut self, image: &[u8]) -> Result<usize, BlockError> {
        let size = self.config.ramdisk_size as usize;
        if size == 0 {
            return Err(BlockError::NoSuchDevice(RAMDISK_DEV));
        }

        let blocks = align_up(image.len(), BLOCK_SIZE as usize) / BLOCK_SIZE as usize;
        let avail = size / BLOCK_SIZE as usize;
        if blocks > avail {
            warning!("Ram disk image too big! ({} blocks, {} avail)", blocks, avail);
            return Err(BlockError::TooBig { blocks, avail });
        }

        let start = PAddr(self.config.buffer_end);
        self.phys.slice_mut(start, image.len()).copy_from_slice(image);
        info!("Loading {} bytes into ram disk", image.len());

        Ok(blocks)
    }
}
