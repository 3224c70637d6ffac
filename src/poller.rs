//! Thin epoll wrapper. Tokens are opaque `u64`s chosen by the caller.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interest {
    Read,
    Write,
}

/// Registration flags beyond the interest itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Mode {
    pub edge: bool,
    /// Disarm after one report; the owner must `rearm` explicitly.
    pub oneshot: bool,
}

impl Mode {
    fn bits(self, interest: Interest) -> u32 {
        let mut bits = match interest {
            Interest::Read => libc::EPOLLIN,
            Interest::Write => libc::EPOLLOUT,
        } as u32;
        bits |= libc::EPOLLRDHUP as u32;
        if self.edge {
            bits |= libc::EPOLLET as u32;
        }
        if self.oneshot {
            bits |= libc::EPOLLONESHOT as u32;
        }
        bits
    }
}

#[derive(Debug, Clone, Copy)]
pub struct Event {
    pub token: u64,
    flags: u32,
}

impl Event {
    pub fn is_readable(&self) -> bool {
        self.flags & libc::EPOLLIN as u32 != 0
    }

    pub fn is_writable(&self) -> bool {
        self.flags & libc::EPOLLOUT as u32 != 0
    }

    /// Peer hang-up or socket error.
    pub fn is_hangup(&self) -> bool {
        self.flags & (libc::EPOLLRDHUP | libc::EPOLLHUP | libc::EPOLLERR) as u32 != 0
    }
}

/// Reusable buffer for `Poller::wait`.
pub struct Events {
    buf: Vec<libc::epoll_event>,
    len: usize,
}

impl Events {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            buf: vec![libc::epoll_event { events: 0, u64: 0 }; capacity.max(1)],
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn iter(&self) -> impl Iterator<Item = Event> + '_ {
        self.buf[..self.len].iter().map(|e| Event {
            token: e.u64,
            flags: e.events,
        })
    }
}

pub struct Poller {
    epfd: OwnedFd,
}

impl Poller {
    pub fn new() -> io::Result<Self> {
        let fd = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Self {
            epfd: unsafe { OwnedFd::from_raw_fd(fd) },
        })
    }

    pub fn add(&self, fd: RawFd, token: u64, interest: Interest, mode: Mode) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, token, mode.bits(interest))
    }

    /// Re-arm a one-shot registration, possibly with a different interest.
    pub fn rearm(&self, fd: RawFd, token: u64, interest: Interest, mode: Mode) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, token, mode.bits(interest))
    }

    pub fn delete(&self, fd: RawFd) -> io::Result<()> {
        let rc = unsafe {
            libc::epoll_ctl(
                self.epfd.as_raw_fd(),
                libc::EPOLL_CTL_DEL,
                fd,
                std::ptr::null_mut(),
            )
        };
        if rc < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn ctl(&self, op: libc::c_int, fd: RawFd, token: u64, events: u32) -> io::Result<()> {
        let mut event = libc::epoll_event { events, u64: token };
        if unsafe { libc::epoll_ctl(self.epfd.as_raw_fd(), op, fd, &mut event) } < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    /// Wait for readiness. An interrupting signal yields zero events rather
    /// than an error.
    pub fn wait(&self, events: &mut Events, timeout: Option<Duration>) -> io::Result<usize> {
        let timeout_ms = timeout.map_or(-1, |t| t.as_millis().min(i32::MAX as u128) as i32);
        let n = unsafe {
            libc::epoll_wait(
                self.epfd.as_raw_fd(),
                events.buf.as_mut_ptr(),
                events.buf.len() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            let err = io::Error::last_os_error();
            events.len = 0;
            if err.kind() == io::ErrorKind::Interrupted {
                return Ok(0);
            }
            return Err(err);
        }
        events.len = n as usize;
        Ok(events.len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::os::unix::net::UnixStream;

    #[test]
    fn oneshot_reports_once_until_rearmed() {
        let poller = Poller::new().unwrap();
        let (mut a, b) = UnixStream::pair().unwrap();
        let mode = Mode {
            edge: false,
            oneshot: true,
        };
        poller.add(b.as_raw_fd(), 7, Interest::Read, mode).unwrap();
        a.write_all(b"x").unwrap();

        let mut events = Events::with_capacity(8);
        let timeout = Some(Duration::from_millis(200));
        assert_eq!(poller.wait(&mut events, timeout).unwrap(), 1);
        let ev = events.iter().next().unwrap();
        assert_eq!(ev.token, 7);
        assert!(ev.is_readable());

        assert_eq!(poller.wait(&mut events, Some(Duration::from_millis(20))).unwrap(), 0);

        poller.rearm(b.as_raw_fd(), 9, Interest::Read, mode).unwrap();
        assert_eq!(poller.wait(&mut events, timeout).unwrap(), 1);
        assert_eq!(events.iter().next().unwrap().token, 9);
    }

    #[test]
    fn hangup_is_reported() {
        let poller = Poller::new().unwrap();
        let (a, b) = UnixStream::pair().unwrap();
        poller
            .add(b.as_raw_fd(), 1, Interest::Read, Mode::default())
            .unwrap();
        drop(a);
        let mut events = Events::with_capacity(4);
        poller
            .wait(&mut events, Some(Duration::from_millis(200)))
            .unwrap();
        assert!(events.iter().any(|e| e.is_hangup()));
        poller.delete(b.as_raw_fd()).unwrap();
    }
}
