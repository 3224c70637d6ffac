//! Signal delivery onto the event loop.
//!
//! The handler only writes the signal number, one byte, to the write end of a
//! socketpair; the loop reads the read end like any other descriptor and does
//! all interpretation on its own thread.

use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::Arc;
use std::sync::atomic::{AtomicI32, Ordering};
use std::time::Duration;

use crate::error::{Error, Result};

/// Write end used by the installed handler. `-1` while nothing is installed.
static SIGNAL_FD: AtomicI32 = AtomicI32::new(-1);

/// What the loop does with a received signal number.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Control {
    /// Sweep the timer list once the current batch is done.
    Tick,
    Stop,
    Ignore,
}

pub fn classify(signo: u8) -> Control {
    match signo as libc::c_int {
        libc::SIGALRM => Control::Tick,
        libc::SIGTERM | libc::SIGINT => Control::Stop,
        _ => Control::Ignore,
    }
}

/// Both ends of the self-notification channel. The read end is polled by the
/// loop; the write end is shared with the handler and with [`Notifier`]s.
pub struct SignalPipe {
    reader: UnixStream,
    writer: Arc<UnixStream>,
}

impl SignalPipe {
    pub fn new() -> Result<Self> {
        let (reader, writer) = UnixStream::pair().map_err(Error::Signal)?;
        reader.set_nonblocking(true).map_err(Error::Signal)?;
        writer.set_nonblocking(true).map_err(Error::Signal)?;
        Ok(Self {
            reader,
            writer: Arc::new(writer),
        })
    }

    pub fn read_fd(&self) -> RawFd {
        self.reader.as_raw_fd()
    }

    pub fn notifier(&self) -> Notifier {
        Notifier {
            writer: Arc::clone(&self.writer),
        }
    }

    /// Drain every pending signal number into `out`.
    pub fn drain(&self, out: &mut Vec<u8>) -> io::Result<()> {
        let mut buf = [0u8; 64];
        loop {
            match (&self.reader).read(&mut buf) {
                Ok(0) => return Ok(()),
                Ok(n) => out.extend_from_slice(&buf[..n]),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
    }

    /// Route SIGALRM, SIGTERM and SIGINT into this pipe and ignore SIGPIPE.
    /// Handlers run with every signal blocked and without SA_RESTART, so the
    /// loop's `epoll_wait` returns early on delivery.
    pub fn install(&self) -> Result<()> {
        SIGNAL_FD.store(self.writer.as_raw_fd(), Ordering::SeqCst);
        for signo in [libc::SIGALRM, libc::SIGTERM, libc::SIGINT] {
            set_handler(signo, on_signal as extern "C" fn(libc::c_int) as libc::sighandler_t)?;
        }
        set_handler(libc::SIGPIPE, libc::SIG_IGN)
    }
}

impl Drop for SignalPipe {
    fn drop(&mut self) {
        let _ = SIGNAL_FD.compare_exchange(
            self.writer.as_raw_fd(),
            -1,
            Ordering::SeqCst,
            Ordering::SeqCst,
        );
    }
}

/// Injects signal numbers by hand. Used to stop a running server or to force a
/// timer sweep without touching process-wide signal state.
#[derive(Clone)]
pub struct Notifier {
    writer: Arc<UnixStream>,
}

impl Notifier {
    pub fn send(&self, signo: libc::c_int) -> io::Result<()> {
        (&*self.writer).write_all(&[signo as u8])
    }

    pub fn tick(&self) -> io::Result<()> {
        self.send(libc::SIGALRM)
    }

    pub fn stop(&self) -> io::Result<()> {
        self.send(libc::SIGTERM)
    }
}

extern "C" fn on_signal(signo: libc::c_int) {
    let fd = SIGNAL_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    unsafe {
        let errno = libc::__errno_location();
        let saved = *errno;
        let byte = signo as u8;
        libc::send(fd, &byte as *const u8 as *const libc::c_void, 1, 0);
        *errno = saved;
    }
}

fn set_handler(signo: libc::c_int, handler: libc::sighandler_t) -> Result<()> {
    unsafe {
        let mut action: libc::sigaction = std::mem::zeroed();
        action.sa_sigaction = handler;
        action.sa_flags = 0;
        libc::sigfillset(&mut action.sa_mask);
        if libc::sigaction(signo, &action, std::ptr::null_mut()) < 0 {
            return Err(Error::Signal(io::Error::last_os_error()));
        }
    }
    Ok(())
}

/// Schedule the next SIGALRM.
pub fn arm_alarm(after: Duration) {
    let secs = after.as_secs().clamp(1, libc::c_uint::MAX as u64) as libc::c_uint;
    unsafe {
        libc::alarm(secs);
    }
}
