//! Server sizing and operational configuration.
//!
//! Constants are the fixed limits of the wire and event-loop machinery; `Config`
//! carries everything that can be chosen at startup.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::path::PathBuf;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::worker::DispatchModel;

pub const DEFAULT_PORT: u16 = 9006;

/// Sweep interval. Idle connections are evicted after `TIMEOUT_TICKS` of these.
pub const TIMESLOT: Duration = Duration::from_secs(5);
pub const TIMEOUT_TICKS: u32 = 3;

/// Upper bound on a buffered request, headers and body together.
pub const MAX_REQUEST_BYTES: usize = 64 * 1024;

/// Bytes requested from the socket per read call.
pub const READ_CHUNK: usize = 2048;

/// Events fetched per `epoll_wait`.
pub const MAX_EVENTS: usize = 10_000;

/// Live-connection ceiling.
pub const MAX_CONNECTIONS: usize = 65_536;

/// Nominal work-queue cap (the queue admits one more, see `WorkQueue::push`).
pub const MAX_REQUESTS: usize = 10_000;

pub const LISTEN_BACKLOG: i32 = 1024;

/// Sent to a client accepted over the connection ceiling.
pub const BUSY_TEXT: &str = "Internal server busy";

/// Record queue depth for the asynchronous log writer.
pub const ASYNC_LOG_QUEUE: usize = 800;

/// Edge/level choice for the listening socket and for accepted sockets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TriggerMode {
    pub listen_edge: bool,
    pub conn_edge: bool,
}

impl TriggerMode {
    /// `0` LT+LT, `1` LT listen + ET conn, `2` ET listen + LT conn, `3` ET+ET.
    pub fn from_selector(selector: u8) -> Result<Self> {
        if selector > 3 {
            return Err(Error::Config(format!(
                "trigger mode must be 0..=3, got {selector}"
            )));
        }
        Ok(Self {
            listen_edge: selector >= 2,
            conn_edge: selector & 1 == 1,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogMode {
    #[default]
    Sync,
    Async,
}

impl LogMode {
    pub fn from_selector(selector: u8) -> Result<Self> {
        match selector {
            0 => Ok(LogMode::Sync),
            1 => Ok(LogMode::Async),
            other => Err(Error::Config(format!("log write mode must be 0 or 1, got {other}"))),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Config {
    pub addr: SocketAddr,
    /// Document root served by the file resolver.
    pub root: PathBuf,
    pub trigger: TriggerMode,
    /// SO_LINGER of one second on accepted sockets.
    pub linger: bool,
    /// Number of credential-store handles in the resource pool.
    pub store_pool_size: usize,
    pub worker_threads: usize,
    pub dispatch: DispatchModel,
    pub max_requests: usize,
    pub max_connections: usize,
    pub timeslot: Duration,
    /// Install process signal handlers and arm the alarm. Embedders that drive
    /// ticks themselves (tests) leave this off and use a `Notifier`.
    pub handle_signals: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            addr: SocketAddr::V4(SocketAddrV4::new(Ipv4Addr::UNSPECIFIED, DEFAULT_PORT)),
            root: PathBuf::from("./root"),
            trigger: TriggerMode::default(),
            linger: false,
            store_pool_size: 8,
            worker_threads: 8,
            dispatch: DispatchModel::IoInLoop,
            max_requests: MAX_REQUESTS,
            max_connections: MAX_CONNECTIONS,
            timeslot: TIMESLOT,
            handle_signals: true,
        }
    }
}

impl Config {
    /// Idle lifetime granted on accept and on every observed activity.
    pub fn idle_timeout(&self) -> Duration {
        self.timeslot * TIMEOUT_TICKS
    }

    pub fn validate(&self) -> Result<()> {
        if self.worker_threads == 0 {
            return Err(Error::Config("worker pool size must be positive".into()));
        }
        if self.store_pool_size == 0 {
            return Err(Error::Config("resource pool size must be positive".into()));
        }
        if self.max_connections == 0 {
            return Err(Error::Config("connection ceiling must be positive".into()));
        }
        if self.timeslot.is_zero() {
            return Err(Error::Config("timeslot must be positive".into()));
        }
        if !self.root.is_dir() {
            return Err(Error::Config(format!(
                "document root {} is not a directory",
                self.root.display()
            )));
        }
        Ok(())
    }
}
