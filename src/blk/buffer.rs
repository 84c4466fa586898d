/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! The buffer cache: one block-sized buffer per slot of the buffer area of
//! physical memory, right after `LOW_MEM`.

use core::task::Poll;

use arrayvec::ArrayVec;

use crate::blk::{Command, DeviceId};
use crate::config::{BLOCK_SIZE, LOW_MEM, MAX_BUFFERS};
use crate::error::BlockError;
use crate::kernel::Kernel;
use crate::mem::PAddr;
use crate::task::wait::WaitChannel;
use crate::warning;

/// Number of blocks one page is made of.
pub const BLOCKS_PER_PAGE: usize = 4;

#[derive(Debug, Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BufferId(pub usize);

#[derive(Debug, Clone)]
pub struct BufferHead {
    /// The device and block the buffer caches, `None` if it never held any.
    pub dev: Option<DeviceId>,
    pub block: u32,
    pub data: PAddr,

    /// The data matches the block on the device.
    pub uptodate: bool,

    /// The data was modified and has to be written back.
    pub dirty: bool,

    /// A request on the buffer is in flight.
    pub locked: bool,

    /// A read failed and the task waiting for it has not been told yet.
    /// Failed writes and read-ahead, which nobody waits for, only leave the
    /// buffer not up to date.
    pub error: bool,

    /// Number of users; only unused buffers are recycled.
    pub count: u32,
}

pub struct BufferCache {
    heads: ArrayVec<BufferHead, MAX_BUFFERS>,

    /// Where the search for a buffer to recycle starts.
    hand: usize,
}

impl BufferCache {
    pub fn new(nr_buffers: usize) -> Self {
        let heads = (0..nr_buffers.min(MAX_BUFFERS))
            .map(|i| BufferHead {
                dev: None,
                block: 0,
                data: PAddr(LOW_MEM + i as u32 * BLOCK_SIZE),
                uptodate: false,
                dirty: false,
                locked: false,
                error: false,
                count: 0,
            })
            .collect();

        Self { heads, hand: 0 }
    }

    pub fn get(&self, id: BufferId) -> &BufferHead {
        &self.heads[id.0]
    }

    pub fn get_mut(&mut self, id: BufferId) -> &mut BufferHead {
        &mut self.heads[id.0]
    }

    pub fn len(&self) -> usize {
        self.heads.len()
    }

    pub fn find(&self, dev: DeviceId, block: u32) -> Option<BufferId> {
        self.heads.iter()
            .position(|head| head.dev == Some(dev) && head.block == block)
            .map(BufferId)
    }

    /// An unused buffer to recycle, clean ones first, searching round-robin
    /// from the hand.
    fn victim(&self) -> Option<BufferId> {
        let nr = self.heads.len();
        let unused = (0..nr)
            .map(|i| (self.hand + i) % nr)
            .filter(|&i| self.heads[i].count == 0 && !self.heads[i].locked);

        let mut dirty = None;
        for i in unused {
            if !self.heads[i].dirty {
                return Some(BufferId(i));
            }
            dirty.get_or_insert(BufferId(i));
        }

        dirty
    }
}

impl Kernel {
    /// Get the buffer caching block `block` of `dev`, recycling an unused
    /// buffer if it is not cached. The buffer's use count is incremented;
    /// give it back with `brelse()`.
    pub fn getblk(&mut self, dev: DeviceId, block: u32) -> Poll<BufferId> {
        if let Some(id) = self.buffers.find(dev, block) {
            self.buffers.get_mut(id).count += 1;
            return Poll::Ready(id);
        }

        let Some(id) = self.buffers.victim() else {
            self.sleep_on(WaitChannel::FreeBuffer);
            return Poll::Pending;
        };

        if self.buffers.get(id).dirty {
            match self.rw_blk(Command::Write, id) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Err(err)) => {
                    warning!("getblk: dropping dirty buffer: {}", err);
                    self.buffers.get_mut(id).dirty = false;
                },
                Poll::Ready(Ok(())) => (),
            }
            if self.wait_on_buffer(id).is_pending() {
                return Poll::Pending;
            }
        }

        let head = self.buffers.get_mut(id);
        head.dev = Some(dev);
        head.block = block;
        head.uptodate = false;
        head.dirty = false;
        head.error = false;
        head.count = 1;
        self.buffers.hand = (id.0 + 1) % self.buffers.len();

        Poll::Ready(id)
    }

    /// Give back a buffer obtained from `getblk()` or `bread()`.
    pub fn brelse(&mut self, id: BufferId) {
        let head = self.buffers.get_mut(id);
        if head.count == 0 {
            warning!("Trying to free free buffer {:?}", id);
            return;
        }

        head.count -= 1;
        if head.count == 0 {
            self.wake_up(WaitChannel::FreeBuffer);
        }
    }

    /// Read block `block` of `dev`, going to the device only if the cache
    /// does not hold it already.
    ///
    /// When `Pending`, the task sleeps until the block is read; the call is
    /// to be issued again and will then find the block in the cache.
    pub fn bread(&mut self, dev: DeviceId, block: u32) -> Poll<Result<BufferId, BlockError>> {
        let id = match self.getblk(dev, block) {
            Poll::Ready(id) => id,
            Poll::Pending => return Poll::Pending,
        };

        let head = self.buffers.get(id);
        if !head.uptodate && !head.error && !head.locked {
            match self.rw_blk(Command::Read, id) {
                Poll::Ready(Ok(())) => (),
                Poll::Ready(Err(err)) => {
                    self.brelse(id);
                    return Poll::Ready(Err(err));
                },
                Poll::Pending => {
                    self.brelse(id);
                    return Poll::Pending;
                },
            }
        }

        // Do not hold the buffer while sleeping on it.
        if self.buffers.get(id).locked {
            self.brelse(id);
            self.sleep_on(WaitChannel::Buffer(id));
            return Poll::Pending;
        }

        let head = self.buffers.get_mut(id);
        if head.uptodate {
            return Poll::Ready(Ok(id));
        }

        head.error = false;
        let err = BlockError::Io { dev, block };
        self.brelse(id);

        Poll::Ready(Err(err))
    }

    /// Read the blocks backing one page, all requests being queued before
    /// waiting on any of them. Block number 0 stands for a hole and gets no
    /// buffer.
    ///
    /// Buffers whose read failed are returned not up to date, with their
    /// `error` flag set.
    pub fn bread_page(
        &mut self,
        dev: DeviceId,
        blocks: [u32; BLOCKS_PER_PAGE],
    ) -> Poll<[Option<BufferId>; BLOCKS_PER_PAGE]> {
        let mut bufs = [None; BLOCKS_PER_PAGE];

        for (i, &block) in blocks.iter().enumerate() {
            if block == 0 {
                continue;
            }

            let id = match self.getblk(dev, block) {
                Poll::Ready(id) => id,
                Poll::Pending => {
                    self.brelse_all(&bufs);
                    return Poll::Pending;
                },
            };
            bufs[i] = Some(id);

            let head = self.buffers.get(id);
            if head.uptodate || head.error || head.locked {
                continue;
            }
            match self.rw_blk(Command::Read, id) {
                Poll::Ready(Ok(())) => (),
                Poll::Ready(Err(_)) => self.buffers.get_mut(id).error = true,
                Poll::Pending => {
                    self.brelse_all(&bufs);
                    return Poll::Pending;
                },
            }
        }

        let in_flight = bufs.iter().flatten().copied()
            .find(|&id| self.buffers.get(id).locked);
        if let Some(id) = in_flight {
            self.brelse_all(&bufs);
            self.sleep_on(WaitChannel::Buffer(id));
            return Poll::Pending;
        }

        Poll::Ready(bufs)
    }

    fn brelse_all(&mut self, bufs: &[Option<BufferId>]) {
        for &id in bufs.iter().flatten() {
            self.brelse(id);
        }
    }

    /// Sleep until the buffer is unlocked.
    pub fn wait_on_buffer(&mut self, id: BufferId) -> Poll<()> {
        if self.buffers.get(id).locked {
            self.sleep_on(WaitChannel::Buffer(id));
            return Poll::Pending;
        }

        Poll::Ready(())
    }

    /// Take the buffer's lock, sleeping first if it is held.
    pub fn lock_buffer(&mut self, id: BufferId) -> Poll<()> {
        if self.wait_on_buffer(id).is_pending() {
            return Poll::Pending;
        }
        self.buffers.get_mut(id).locked = true;

        Poll::Ready(())
    }

    pub fn unlock_buffer(&mut self, id: BufferId) {
        let head = self.buffers.get_mut(id);
        if !head.locked {
            warning!("buffer {:?} not locked", id);
        }

        head.locked = false;
        self.wake_up_all(WaitChannel::Buffer(id));
    }

    pub fn mark_dirty(&mut self, id: BufferId) {
        let head = self.buffers.get_mut(id);
        head.dirty = true;
        head.uptodate = true;
    }

    /// Queue a write of every dirty buffer that is not busy. Never sleeps;
    /// returns the number of writes queued.
    pub fn sync_buffers(&mut self) -> usize {
        let mut nr_queued = 0;

        for i in 0..self.buffers.len() {
            let id = BufferId(i);
            let head = self.buffers.get(id);
            if !head.dirty || head.locked {
                continue;
            }

            let queued = self.rw_blk(Command::WriteAhead, id);
            if matches!(queued, Poll::Ready(Ok(()))) && !self.buffers.get(id).dirty {
                nr_queued += 1;
            }
        }

        nr_queued
    }

    pub fn buffer_data(&self, id: BufferId) -> &[u8] {
        self.phys.slice(self.buffers.get(id).data, BLOCK_SIZE as usize)
    }

    pub fn buffer_data_mut(&mut self, id: BufferId) -> &mut [u8] {
        let data = self.buffers.get(id).data;
        self.phys.slice_mut(data, BLOCK_SIZE as usize)
    }
}

#[cfg(test)]
mod test {
    use core::task::Poll;

    use crate::arch::test::fixture::{
        DeferredDisk, HD_DEV, kernel, kernel_with_ramdisk, ramdisk_byte, spawn,
    };
    use crate::blk::buffer::BufferId;
    use crate::blk::{Command, DeviceId, major};
    use crate::config::BLOCK_SIZE;
    use crate::error::BlockError;
    use crate::task::TaskState;
    use crate::task::wait::WaitChannel;

    const RD_DEV: DeviceId = DeviceId::new(major::RAMDISK, 1);

    fn ready<T>(poll: Poll<T>) -> T {
        match poll {
            Poll::Ready(value) => value,
            Poll::Pending => panic!("unexpected Pending"),
        }
    }

    #[test]
    fn test_buffers_live_after_low_mem() {
        let k = kernel();

        assert_eq!(k.buffers.get(BufferId(0)).data.0, 0x10_0000);
        assert_eq!(k.buffers.get(BufferId(2)).data.0, 0x10_0000 + 2 * BLOCK_SIZE);
    }

    #[test]
    fn test_bread_from_ramdisk_hits_cache() {
        let (mut k, _) = kernel_with_ramdisk();

        let buf = ready(k.bread(RD_DEV, 9)).unwrap();
        assert!(k.buffer_data(buf).iter().all(|&b| b == 9));
        assert_eq!(k.buffers.get(buf).count, 1);
        k.brelse(buf);

        assert_eq!(ready(k.bread(RD_DEV, 9)), Ok(buf));
        assert_eq!(k.buffers.get(buf).count, 1);
    }

    #[test]
    fn test_bread_past_ramdisk_end_fails() {
        let (mut k, _) = kernel_with_ramdisk();

        assert_eq!(ready(k.bread(RD_DEV, 1000)),
                   Err(BlockError::Io { dev: RD_DEV, block: 1000 }));
        let buf = k.buffers.find(RD_DEV, 1000).unwrap();
        assert_eq!(k.buffers.get(buf).count, 0);
        assert!(!k.buffers.get(buf).error);
    }

    #[test]
    fn test_bread_sleeps_until_read_completes() {
        let mut k = kernel();
        let disk = DeferredDisk::install(&mut k, major::HD);
        let task = spawn(&mut k);
        k.switch_to(task);

        assert_eq!(k.bread(HD_DEV, 6), Poll::Pending);
        assert_eq!(k.task(task).unwrap().state, TaskState::UninterruptibleSleep);
        let buf = k.buffers.find(HD_DEV, 6).unwrap();
        assert_eq!(k.buffers.get(buf).count, 0);

        assert!(disk.interrupt(&mut k));
        k.schedule();
        assert_eq!(k.current, task);

        let buf = ready(k.bread(HD_DEV, 6)).unwrap();
        assert_eq!(k.buffer_data(buf)[BLOCK_SIZE as usize - 1], 6);
    }

    #[test]
    fn test_failed_read_ahead_is_read_again() {
        let mut k = kernel();
        let disk = DeferredDisk::install(&mut k, major::HD);
        let task = spawn(&mut k);
        k.switch_to(task);

        let buf = ready(k.getblk(HD_DEV, 6));
        disk.set_failing(true);
        assert_eq!(k.rw_blk(Command::ReadAhead, buf), Poll::Ready(Ok(())));
        k.brelse(buf);
        assert!(disk.interrupt(&mut k));
        let head = k.buffers.get(buf);
        assert!(!head.uptodate && !head.error && !head.locked);

        disk.set_failing(false);
        assert!(k.bread_page(HD_DEV, [6, 0, 0, 0]).is_pending());
        assert!(disk.interrupt(&mut k));
        k.schedule();
        assert_eq!(k.current, task);

        let bufs = ready(k.bread_page(HD_DEV, [6, 0, 0, 0]));
        assert_eq!(bufs[0], Some(buf));
        assert!(k.buffers.get(buf).uptodate);
        assert_eq!(k.buffer_data(buf)[0], 6);
        assert_eq!(disk.nr_started(), 2);
    }

    #[test]
    fn test_failed_read_is_reported_once() {
        let mut k = kernel();
        let disk = DeferredDisk::install(&mut k, major::HD);
        disk.set_failing(true);
        let task = spawn(&mut k);
        k.switch_to(task);

        assert_eq!(k.bread(HD_DEV, 6), Poll::Pending);
        assert!(disk.interrupt(&mut k));
        k.schedule();
        assert_eq!(ready(k.bread(HD_DEV, 6)),
                   Err(BlockError::Io { dev: HD_DEV, block: 6 }));

        // The next attempt goes to the device again.
        disk.set_failing(false);
        assert_eq!(k.bread(HD_DEV, 6), Poll::Pending);
        assert!(disk.interrupt(&mut k));
        k.schedule();
        assert!(ready(k.bread(HD_DEV, 6)).is_ok());
    }

    /// With every buffer in use, `getblk()` sleeps until one is released.
    #[test]
    fn test_getblk_waits_for_free_buffer() {
        let (mut k, _) = kernel_with_ramdisk();
        let task = spawn(&mut k);
        k.switch_to(task);

        let held: alloc::vec::Vec<_> = (0..k.buffers.len() as u32)
            .map(|block| ready(k.getblk(RD_DEV, block)))
            .collect();
        assert_eq!(k.getblk(RD_DEV, 500), Poll::Pending);
        assert_eq!(k.nr_sleepers(WaitChannel::FreeBuffer), 1);

        k.brelse(held[3]);
        assert_eq!(k.task(task).unwrap().state, TaskState::Ready);
        k.schedule();

        assert_eq!(ready(k.getblk(RD_DEV, 500)), held[3]);
        assert!(k.buffers.find(RD_DEV, 3).is_none());
    }

    /// Recycling a dirty buffer writes it back first.
    #[test]
    fn test_dirty_buffer_written_back_before_reuse() {
        let (mut k, _) = kernel_with_ramdisk();
        let nr = k.buffers.len() as u32;

        let buf = ready(k.bread(RD_DEV, 2)).unwrap();
        k.buffer_data_mut(buf).fill(0xab);
        k.mark_dirty(buf);
        k.brelse(buf);
        assert_eq!(ramdisk_byte(&k, 2, 0), 2);

        // Clean buffers are recycled first: hold all of them.
        let _held: alloc::vec::Vec<_> = (10..(10 + nr - 1))
            .map(|block| ready(k.getblk(RD_DEV, block)))
            .collect();

        let other = ready(k.getblk(RD_DEV, 100));
        assert_eq!(other, buf);
        assert!(k.buffers.find(RD_DEV, 2).is_none());
        assert_eq!(ramdisk_byte(&k, 2, 0), 0xab);
        assert_eq!(ramdisk_byte(&k, 2, 1023), 0xab);
    }

    #[test]
    fn test_sync_buffers_queues_dirty_ones() {
        let (mut k, _) = kernel_with_ramdisk();
        for block in [1, 2, 3] {
            let buf = ready(k.getblk(RD_DEV, block));
            k.buffer_data_mut(buf).fill(0x11);
            k.mark_dirty(buf);
            k.brelse(buf);
        }

        assert_eq!(k.sync_buffers(), 3);
        assert_eq!(k.sync_buffers(), 0);
        assert_eq!(ramdisk_byte(&k, 3, 0), 0x11);
    }

    #[test]
    fn test_double_unlock_is_only_logged() {
        let mut k = kernel();
        k.unlock_buffer(BufferId(0));
        assert!(!k.buffers.get(BufferId(0)).locked);
    }
}
