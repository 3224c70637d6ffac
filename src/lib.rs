//! Library crate for tinyserve: an epoll-driven HTTP/1.1 static file server
//! with a fixed worker pool, two dispatch models and idle-connection eviction.
//!
//! `main.rs` only parses flags, installs logging and calls [`server::Server`];
//! everything below is usable on its own, and the integration tests drive the
//! server in-process through a [`signals::Notifier`].

pub mod config;
pub mod connection;
pub mod credentials;
pub mod error;
pub mod io_thread;
pub mod logging;
pub mod metrics;
pub mod poller;
pub mod protocol;
pub mod request_flow;
pub mod resource;
pub mod resource_pool;
pub mod response_flow;
pub mod response_queue;
pub mod server;
pub mod signals;
pub mod sync;
pub mod timer;
pub mod work_queue;
pub mod worker;

pub use error::{Error, Result};
pub use server::Server;
