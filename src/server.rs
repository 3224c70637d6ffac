//! Composition root: listener, pools, worker threads and the event loop.

use std::net::SocketAddr;
use std::sync::Arc;

use socket2::{Domain, Protocol, Socket, Type};
use tracing::info;

use crate::config::{Config, LISTEN_BACKLOG};
use crate::credentials::{MemoryStore, StoreHandle};
use crate::error::{Error, Result};
use crate::io_thread::IoThread;
use crate::resource::FsResolver;
use crate::resource_pool::ResourcePool;
use crate::signals::{Notifier, SignalPipe};
use crate::work_queue::WorkQueue;
use crate::worker::{WorkerContext, WorkerPool};

fn create_listener(addr: SocketAddr) -> Result<Socket> {
    let socket = Socket::new(Domain::for_address(addr), Type::STREAM, Some(Protocol::TCP))?;
    socket.set_reuse_address(true)?;
    socket.set_nonblocking(true)?;
    socket
        .bind(&addr.into())
        .map_err(|source| Error::Bind { addr, source })?;
    socket
        .listen(LISTEN_BACKLOG)
        .map_err(|source| Error::Bind { addr, source })?;
    Ok(socket)
}

pub struct Server {
    io: IoThread,
    workers: WorkerPool,
    local_addr: SocketAddr,
    notifier: Notifier,
}

impl Server {
    /// Bind with an empty credential store.
    pub fn bind(config: Config) -> Result<Self> {
        Self::with_store(config, MemoryStore::new())
    }

    /// Build everything the loop needs. Any failure here is fatal to startup.
    pub fn with_store(config: Config, store: MemoryStore) -> Result<Self> {
        config.validate()?;

        let listener = create_listener(config.addr)?;
        let local_addr = listener
            .local_addr()?
            .as_socket()
            .ok_or_else(|| Error::Config("listener has no inet address".into()))?;

        let store_pool = ResourcePool::new(config.store_pool_size, |id| {
            Ok::<StoreHandle, String>(store.connect(id))
        })
        .map_err(Error::ResourcePool)?;

        let ctx = Arc::new(WorkerContext {
            model: config.dispatch,
            resolver: Arc::new(FsResolver::new(&config.root)),
            store_pool: Arc::new(store_pool),
        });
        let queue = Arc::new(WorkQueue::new(config.max_requests));
        let workers = WorkerPool::spawn(config.worker_threads, Arc::clone(&queue), ctx)?;

        let signals = SignalPipe::new()?;
        if config.handle_signals {
            signals.install()?;
        }
        let notifier = signals.notifier();
        let io = IoThread::new(listener, signals, queue, &config)?;

        info!(
            addr = %local_addr,
            root = %config.root.display(),
            workers = config.worker_threads,
            store_handles = config.store_pool_size,
            "server bound"
        );
        Ok(Self {
            io,
            workers,
            local_addr,
            notifier,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Handle for injecting ticks and stop requests.
    pub fn notifier(&self) -> Notifier {
        self.notifier.clone()
    }

    /// Run the event loop on the calling thread until stopped. Workers are told
    /// to exit but not joined.
    pub fn run(self) -> Result<()> {
        let result = self.io.run();
        self.workers.close();
        result
    }
}
