//! Return path from workers to the event loop for the I/O-in-loop model.
//!
//! Workers push finished connections into a mutex-protected batch and bump an
//! eventfd; the loop polls the eventfd like a socket and takes the whole batch.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};

use parking_lot::Mutex;

use crate::worker::Finished;

pub struct ReturnQueue {
    finished: Mutex<Vec<Finished>>,
    eventfd: OwnedFd,
}

impl ReturnQueue {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::eventfd(0, libc::EFD_NONBLOCK | libc::EFD_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            finished: Mutex::new(Vec::new()),
            eventfd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn eventfd(&self) -> RawFd {
        self.eventfd.as_raw_fd()
    }

    pub fn send(&self, item: Finished) {
        self.finished.lock().push(item);
        self.signal();
    }

    /// Wake the loop's `epoll_wait`.
    fn signal(&self) {
        let val: u64 = 1;
        unsafe {
            libc::write(
                self.eventfd.as_raw_fd(),
                &val as *const u64 as *const libc::c_void,
                8,
            );
        }
    }

    /// Reset the eventfd counter and take everything returned so far.
    pub fn drain(&self, out: &mut Vec<Finished>) {
        let mut val: u64 = 0;
        unsafe {
            libc::read(
                self.eventfd.as_raw_fd(),
                &mut val as *mut u64 as *mut libc::c_void,
                8,
            );
        }
        out.append(&mut self.finished.lock());
    }

    pub fn len(&self) -> usize {
        self.finished.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
