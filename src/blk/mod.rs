/******************************************************************************
 * Copyright © 2021-2023 Kévin Lesénéchal <kevin.lesenechal@gmail.com>        *
 * This file is part of the Nucloid operating system.                         *
 *                                                                            *
 * Nucloid is free software; you can redistribute it and/or modify it under   *
 * the terms of the GNU General Public License as published by the Free       *
 * Software Foundation; either version 2 of the License, or (at your option)  *
 * any later version. See LICENSE file for more information.                  *
 ******************************************************************************/

//! The block request layer. Reads and writes of buffers become requests,
//! taken from a fixed pool and queued per major number; the device driver
//! works through its queue and reports the completion of each request with
//! [`Kernel::end_request`], usually from its interrupt handler.
//!
//! A buffer stays locked for as long as its request is in flight: waiting for
//! the I/O to complete means waiting for the buffer to be unlocked.

pub mod buffer;
pub mod ramdisk;

use alloc::boxed::Box;
use core::array;
use core::fmt;
use core::task::Poll;

use crate::blk::buffer::BufferId;
use crate::config::{NR_BLK_DEV, NR_REQUEST};
use crate::error::BlockError;
use crate::kernel::Kernel;
use crate::mem::PAddr;
use crate::sync::IrqGuard;
use crate::task::wait::WaitChannel;
use crate::{debug, error, info, warning};

/// Major numbers of the block devices.
pub mod major {
    pub const NULL: usize = 0;
    pub const RAMDISK: usize = 1;
    pub const FLOPPY: usize = 2;
    pub const HD: usize = 3;
    pub const TTYX: usize = 4;
    pub const TTY: usize = 5;
    pub const LP: usize = 6;
}

/// A device number: the major number selects the driver, the minor number
/// the unit it drives.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct DeviceId(pub u16);

impl DeviceId {
    pub const fn new(major: usize, minor: u16) -> Self {
        Self(((major as u16) << 8) | (minor & 0xff))
    }

    pub fn major(&self) -> usize {
        (self.0 >> 8) as usize
    }

    pub fn minor(&self) -> u16 {
        self.0 & 0xff
    }
}

impl fmt::Debug for DeviceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:02x}:{:02x}", self.major(), self.minor())
    }
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum Command {
    Read,
    Write,

    /// Best-effort reads and writes: dropped rather than waited for when the
    /// buffer or the request pool is busy.
    ReadAhead,
    WriteAhead,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct RequestId(pub usize);

#[derive(Debug, Copy, Clone)]
pub struct Request {
    /// The device the request is for, `None` while the slot is free.
    pub dev: Option<DeviceId>,
    pub cmd: Command,
    pub errors: u32,
    pub sector: u32,
    pub nr_sectors: u32,

    /// The buffer's data in physical memory.
    pub buffer: PAddr,
    pub head: Option<BufferId>,
    pub next: Option<RequestId>,

    /// Issued as read-ahead or write-behind: nobody waits for the outcome.
    pub ahead: bool,
}

impl Request {
    const FREE: Request = Request {
        dev: None,
        cmd: Command::Read,
        errors: 0,
        sector: 0,
        nr_sectors: 0,
        buffer: PAddr(0),
        head: None,
        next: None,
        ahead: false,
    };
}

/// A block device driver.
///
/// The request function runs from the layer as soon as a request lands in
/// an empty queue; from then on the driver owns the queue. It must call
/// `end_request()` for every request it takes and keep going until the queue
/// is empty, either right away or from its interrupt handler.
pub trait BlockDriver: Send {
    fn name(&self) -> &'static str;

    fn do_request(&mut self, k: &mut Kernel, major: usize);

    fn interrupt(&mut self, _k: &mut Kernel, major: usize) {
        warning!("{} (major {}): unexpected interrupt", self.name(), major);
    }
}

struct BlkDev {
    driver: Option<Box<dyn BlockDriver>>,

    /// The driver was taken out of its slot to run.
    running: bool,
    current: Option<RequestId>,
}

impl BlkDev {
    fn is_registered(&self) -> bool {
        self.driver.is_some() || self.running
    }
}

pub struct BlockLayer {
    requests: [Request; NR_REQUEST],
    devices: [BlkDev; NR_BLK_DEV],
}

impl BlockLayer {
    pub fn new() -> Self {
        Self {
            requests: [Request::FREE; NR_REQUEST],
            devices: array::from_fn(|_| BlkDev {
                driver: None,
                running: false,
                current: None,
            }),
        }
    }

    pub(crate) fn install_driver(&mut self, major: usize, driver: Box<dyn BlockDriver>) {
        self.devices[major].driver = Some(driver);
    }

    pub fn nr_free_requests(&self) -> usize {
        self.requests.iter().filter(|req| req.dev.is_none()).count()
    }

    /// Requests queued for `major`, the one being served first.
    pub fn queue(&self, major: usize) -> impl Iterator<Item = &Request> + '_ {
        let mut cursor = self.devices.get(major).and_then(|dev| dev.current);

        core::iter::from_fn(move || {
            let req = &self.requests[cursor?.0];
            cursor = req.next;
            Some(req)
        })
    }
}

impl Kernel {
    pub fn register_blkdev(
        &mut self,
        major: usize,
        driver: Box<dyn BlockDriver>,
    ) -> Result<(), BlockError> {
        let Some(dev) = self.blk.devices.get_mut(major) else {
            return Err(BlockError::BadMajor(major));
        };
        if dev.is_registered() {
            return Err(BlockError::AlreadyRegistered(major));
        }

        info!("blk: {} registered as major {}", driver.name(), major);
        dev.driver = Some(driver);

        Ok(())
    }

    /// Read or write a buffer from or to its device.
    ///
    /// `Pending` means the task had to sleep before the request could be
    /// queued. Once `Ready`, the buffer stays locked until the request
    /// completes; wait for it with `wait_on_buffer()`.
    pub fn rw_blk(&mut self, cmd: Command, buf: BufferId) -> Poll<Result<(), BlockError>> {
        let Some(dev) = self.buffers.get(buf).dev else {
            return Poll::Ready(Err(BlockError::Unattached));
        };
        let major = dev.major();

        let registered = self.blk.devices.get(major).is_some_and(BlkDev::is_registered);
        if !registered {
            error!("Trying to access nonexisting block device {dev:?}");
            return Poll::Ready(Err(BlockError::NoSuchDevice(dev)));
        }

        self.make_request(major, cmd, buf).map(Ok)
    }

    /// Queue a request for `buf` on the device `major`.
    pub fn make_request(&mut self, major: usize, cmd: Command, buf: BufferId) -> Poll<()> {
        let (cmd, ahead) = match cmd {
            Command::ReadAhead => (Command::Read, true),
            Command::WriteAhead => (Command::Write, true),
            cmd => (cmd, false),
        };

        if ahead && self.buffers.get(buf).locked {
            return Poll::Ready(());
        }
        if self.lock_buffer(buf).is_pending() {
            return Poll::Pending;
        }

        let head = self.buffers.get(buf);
        let (dev, block, data) = match head.dev {
            Some(dev) => (dev, head.block, head.data),
            None => {
                self.unlock_buffer(buf);
                return Poll::Ready(());
            },
        };
        if (cmd == Command::Read && head.uptodate)
            || (cmd == Command::Write && !head.dirty) {
            self.unlock_buffer(buf);
            return Poll::Ready(());
        }

        // Reads may take any request, writes leave the last third of the
        // pool to them.
        let search_end = match cmd {
            Command::Read => NR_REQUEST,
            _ => NR_REQUEST * 2 / 3,
        };
        let slot = (0..search_end).rev()
            .find(|&i| self.blk.requests[i].dev.is_none());
        let Some(slot) = slot else {
            self.unlock_buffer(buf);
            if ahead {
                return Poll::Ready(());
            }
            self.sleep_on(WaitChannel::FreeRequest);
            return Poll::Pending;
        };

        self.blk.requests[slot] = Request {
            dev: Some(dev),
            cmd,
            errors: 0,
            sector: block * 2,
            nr_sectors: 2,
            buffer: data,
            head: Some(buf),
            next: None,
            ahead,
        };
        self.add_request(major, RequestId(slot));

        Poll::Ready(())
    }

    /// Append a request to the queue of `major`. A request landing in an
    /// empty queue starts the driver.
    pub fn add_request(&mut self, major: usize, req: RequestId) {
        let start_driver = {
            let _irq = IrqGuard::new();

            self.blk.requests[req.0].next = None;
            if let Some(buf) = self.blk.requests[req.0].head {
                self.buffers.get_mut(buf).dirty = false;
            }

            match self.blk.devices[major].current {
                None => {
                    self.blk.devices[major].current = Some(req);
                    true
                },
                Some(mut tail) => {
                    while let Some(next) = self.blk.requests[tail.0].next {
                        tail = next;
                    }
                    self.blk.requests[tail.0].next = Some(req);
                    false
                },
            }
        };

        let request = &self.blk.requests[req.0];
        debug!("blk: {:?} sector {} queued on major {}",
               request.cmd, request.sector, major);

        if start_driver {
            self.run_request_fn(major);
        }
    }

    /// Retire the request `major` is serving. The driver calls it once the
    /// transfer is over, `uptodate` telling whether it succeeded.
    pub fn end_request(&mut self, major: usize, uptodate: bool) {
        let Some(req_id) = self.blk.devices.get(major).and_then(|dev| dev.current) else {
            warning!("end_request: no request in progress on major {}", major);
            return;
        };
        let req = self.blk.requests[req_id.0];

        if let Some(buf) = req.head {
            let head = self.buffers.get_mut(buf);
            head.uptodate = uptodate;
            if !uptodate {
                if req.cmd == Command::Read && !req.ahead {
                    head.error = true;
                }
                error!("I/O error on {:?}, block {}", head.dev, head.block);
            }
            self.unlock_buffer(buf);
        }

        {
            let _irq = IrqGuard::new();
            self.blk.requests[req_id.0] = Request::FREE;
            self.blk.devices[major].current = req.next;
        }
        self.wake_up(WaitChannel::FreeRequest);
    }

    /// Count one more failed attempt at the current request of `major`.
    /// Past `max_errors` the request is ended as failed and `false` is
    /// returned; otherwise the driver should try again.
    pub fn retry_request(&mut self, major: usize, max_errors: u32) -> bool {
        let Some(req_id) = self.blk.devices.get(major).and_then(|dev| dev.current) else {
            return false;
        };

        let req = &mut self.blk.requests[req_id.0];
        req.errors += 1;
        if req.errors >= max_errors {
            self.end_request(major, false);
            return false;
        }

        true
    }

    /// The request `major` is serving, if any.
    pub fn current_request(&self, major: usize) -> Option<Request> {
        let req_id = self.blk.devices.get(major)?.current?;

        Some(self.blk.requests[req_id.0])
    }

    /// Memory of the buffer a request transfers from or to.
    pub fn request_data(&self, req: &Request) -> &[u8] {
        self.phys.slice(req.buffer, (req.nr_sectors * 512) as usize)
    }

    pub fn request_data_mut(&mut self, req: &Request) -> &mut [u8] {
        self.phys.slice_mut(req.buffer, (req.nr_sectors * 512) as usize)
    }

    /// Forward the interrupt of the device `major` to its driver.
    pub fn blk_interrupt(&mut self, major: usize) {
        let Some(mut driver) = self.take_driver(major) else {
            warning!("blk: unexpected interrupt for major {}", major);
            return;
        };

        driver.interrupt(self, major);
        self.put_driver(major, driver);
    }

    fn run_request_fn(&mut self, major: usize) {
        // Already running: the driver picks the new request up itself.
        let Some(mut driver) = self.take_driver(major) else { return };

        driver.do_request(self, major);
        self.put_driver(major, driver);
    }

    fn take_driver(&mut self, major: usize) -> Option<Box<dyn BlockDriver>> {
        let dev = self.blk.devices.get_mut(major)?;
        let driver = dev.driver.take()?;
        dev.running = true;

        Some(driver)
    }

    fn put_driver(&mut self, major: usize, driver: Box<dyn BlockDriver>) {
        let dev = &mut self.blk.devices[major];
        dev.driver = Some(driver);
        dev.running = false;
    }
}

#[cfg(test)]
mod test {
    use alloc::boxed::Box;
    use alloc::vec::Vec;
    use core::task::Poll;

    use crate::arch::test::fixture::{DeferredDisk, HD_DEV, kernel, spawn};
    use crate::blk::{BlockDriver, Command, DeviceId, major};
    use crate::config::NR_REQUEST;
    use crate::error::BlockError;
    use crate::kernel::Kernel;
    use crate::task::TaskState;
    use crate::task::wait::WaitChannel;

    struct Idle;

    impl BlockDriver for Idle {
        fn name(&self) -> &'static str {
            "idle"
        }

        fn do_request(&mut self, _k: &mut Kernel, _major: usize) {}
    }

    #[test]
    fn test_device_numbers() {
        let dev = DeviceId::new(major::HD, 1);

        assert_eq!(dev.major(), 3);
        assert_eq!(dev.minor(), 1);
        assert_eq!(alloc::format!("{dev:?}"), "03:01");
    }

    #[test]
    fn test_register_blkdev() {
        let mut k = kernel();

        assert_eq!(k.register_blkdev(major::FLOPPY, Box::new(Idle)), Ok(()));
        assert_eq!(k.register_blkdev(major::FLOPPY, Box::new(Idle)),
                   Err(BlockError::AlreadyRegistered(major::FLOPPY)));
        assert_eq!(k.register_blkdev(9, Box::new(Idle)),
                   Err(BlockError::BadMajor(9)));
    }

    #[test]
    fn test_unknown_device_is_rejected() {
        let mut k = kernel();
        let buf = match k.getblk(DeviceId::new(major::FLOPPY, 0), 3) {
            Poll::Ready(buf) => buf,
            Poll::Pending => unreachable!(),
        };

        assert_eq!(k.rw_blk(Command::Read, buf),
                   Poll::Ready(Err(BlockError::NoSuchDevice(DeviceId::new(2, 0)))));
        assert!(!k.buffers.get(buf).locked);
    }

    /// Requests are served in the order they were queued, one interrupt
    /// each; the first one starts the driver right away.
    #[test]
    fn test_queue_is_fifo() {
        let mut k = kernel();
        let disk = DeferredDisk::install(&mut k, major::HD);
        let task = spawn(&mut k);
        k.switch_to(task);

        let bufs: Vec<_> = [7, 3, 5].into_iter()
            .map(|block| match k.getblk(HD_DEV, block) {
                Poll::Ready(buf) => buf,
                Poll::Pending => unreachable!(),
            })
            .collect();
        for &buf in bufs.iter() {
            assert_eq!(k.rw_blk(Command::Read, buf), Poll::Ready(Ok(())));
            assert!(k.buffers.get(buf).locked);
        }

        let sectors: Vec<u32> = k.blk.queue(major::HD).map(|req| req.sector).collect();
        assert_eq!(sectors, [14, 6, 10]);
        assert_eq!(disk.nr_started(), 1);

        assert!(disk.interrupt(&mut k));
        assert!(k.buffers.get(bufs[0]).uptodate);
        assert!(!k.buffers.get(bufs[0]).locked);
        assert!(k.buffers.get(bufs[1]).locked);
        assert_eq!(k.buffer_data(bufs[0])[0], 7);

        assert!(disk.interrupt(&mut k));
        assert!(disk.interrupt(&mut k));
        assert!(!disk.interrupt(&mut k));
        assert_eq!(k.blk.nr_free_requests(), NR_REQUEST);
    }

    /// Writing a buffer whose read is still in flight waits for the buffer
    /// to be unlocked by the completion of the read.
    #[test]
    fn test_write_on_locked_buffer_blocks() {
        let mut k = kernel();
        let disk = DeferredDisk::install(&mut k, major::HD);
        let task = spawn(&mut k);
        k.switch_to(task);
        assert_eq!(k.current_task().state, TaskState::Running);

        let buf = match k.getblk(HD_DEV, 2) {
            Poll::Ready(buf) => buf,
            Poll::Pending => unreachable!(),
        };
        assert_eq!(k.rw_blk(Command::Read, buf), Poll::Ready(Ok(())));

        k.buffer_data_mut(buf)[0] = 0x42;
        k.mark_dirty(buf);
        assert_eq!(k.rw_blk(Command::Write, buf), Poll::Pending);
        assert_eq!(k.task(task).unwrap().state, TaskState::UninterruptibleSleep);
        assert_eq!(k.nr_sleepers(WaitChannel::Buffer(buf)), 1);
        assert_eq!(k.current, 0);

        // The read completes and unlocks the buffer.
        assert!(disk.interrupt(&mut k));
        assert_eq!(k.task(task).unwrap().state, TaskState::Ready);

        k.schedule();
        assert_eq!(k.current, task);
        assert_eq!(k.current_task().state, TaskState::Running);

        // The read overwrote the data: the write goes through with it.
        k.buffer_data_mut(buf)[0] = 0x42;
        k.mark_dirty(buf);
        assert_eq!(k.rw_blk(Command::Write, buf), Poll::Ready(Ok(())));
        assert!(!k.buffers.get(buf).dirty);
        assert!(disk.interrupt(&mut k));
        assert_eq!(disk.byte_at(2, 0), 0x42);
    }

    #[test]
    fn test_ahead_requests_never_block() {
        let mut k = kernel();
        DeferredDisk::install(&mut k, major::HD);

        let bufs: Vec<_> = (1..=NR_REQUEST as u32 + 2)
            .map(|block| match k.getblk(HD_DEV, block) {
                Poll::Ready(buf) => buf,
                Poll::Pending => unreachable!(),
            })
            .collect();
        for &buf in bufs.iter() {
            assert_eq!(k.rw_blk(Command::ReadAhead, buf), Poll::Ready(Ok(())));
        }

        // The pool ran out: the last two were dropped, unlocked.
        assert_eq!(k.blk.nr_free_requests(), 0);
        assert!(bufs[..NR_REQUEST].iter().all(|&buf| k.buffers.get(buf).locked));
        assert!(bufs[NR_REQUEST..].iter().all(|&buf| !k.buffers.get(buf).locked));
        assert_eq!(k.rw_blk(Command::ReadAhead, bufs[0]), Poll::Ready(Ok(())));
    }

    #[test]
    fn test_writes_keep_a_third_of_the_pool_for_reads() {
        let mut k = kernel();
        DeferredDisk::install(&mut k, major::HD);
        let task = spawn(&mut k);
        k.switch_to(task);

        let mut queued = 0;
        for block in 1.. {
            let buf = match k.getblk(HD_DEV, block) {
                Poll::Ready(buf) => buf,
                Poll::Pending => unreachable!(),
            };
            k.mark_dirty(buf);
            if k.rw_blk(Command::Write, buf).is_pending() {
                break;
            }
            queued += 1;
        }

        assert_eq!(queued, NR_REQUEST * 2 / 3);
        assert_eq!(k.task(task).unwrap().state, TaskState::UninterruptibleSleep);
        assert_eq!(k.nr_sleepers(WaitChannel::FreeRequest), 1);
    }

    #[test]
    fn test_failed_request_is_retried_then_ended() {
        let mut k = kernel();
        let disk = DeferredDisk::install(&mut k, major::HD);
        let buf = match k.getblk(HD_DEV, 4) {
            Poll::Ready(buf) => buf,
            Poll::Pending => unreachable!(),
        };
        assert_eq!(k.rw_blk(Command::Read, buf), Poll::Ready(Ok(())));

        assert!(k.retry_request(major::HD, 3));
        assert!(k.retry_request(major::HD, 3));
        assert!(!k.retry_request(major::HD, 3));

        let head = k.buffers.get(buf);
        assert!(!head.uptodate && head.error && !head.locked);
        assert!(!disk.interrupt(&mut k));
    }

    #[test]
    fn test_spurious_interrupt_is_harmless() {
        let mut k = kernel();
        k.blk_interrupt(major::FLOPPY);
        k.end_request(major::HD, true);
        assert!(k.current_request(major::HD).is_none());
    }
}
