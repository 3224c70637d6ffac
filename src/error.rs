use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Errors that abort server startup. Per-connection failures never reach this
/// type; they end as an HTTP error status or a closed socket.
#[derive(Debug, Error)]
pub enum Error {
    /// Generic socket or file descriptor failure.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
    /// The listening socket could not be bound.
    #[error("bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },
    /// epoll or eventfd setup failed.
    #[error("poller setup: {0}")]
    Poller(io::Error),
    /// Signal handler installation or signal socketpair setup failed.
    #[error("signal setup: {0}")]
    Signal(io::Error),
    /// A configuration value was rejected.
    #[error("invalid configuration: {0}")]
    Config(String),
    /// An external resource handle could not be created.
    #[error("resource pool: {0}")]
    ResourcePool(String),
}

pub type Result<T> = std::result::Result<T, Error>;
