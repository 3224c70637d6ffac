//! Fixed worker pool draining the bounded work queue.
//!
//! Each item carries one connection by value plus where to send it back. How
//! much of the I/O a worker does depends on the dispatch model chosen at
//! startup.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use tracing::{debug, error, info};

use crate::connection::Connection;
use crate::credentials::CredentialStore;
use crate::error::{Error, Result};
use crate::resource::ResourceResolver;
use crate::resource_pool::ResourcePool;
use crate::response_queue::ReturnQueue;
use crate::sync::Completion;
use crate::work_queue::WorkQueue;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DispatchModel {
    /// The loop reads and writes; workers only parse and build responses.
    #[default]
    IoInLoop,
    /// The loop only dispatches; workers read, parse, build and write.
    IoInWorker,
}

impl DispatchModel {
    pub fn from_selector(selector: u8) -> Result<Self> {
        match selector {
            0 => Ok(DispatchModel::IoInLoop),
            1 => Ok(DispatchModel::IoInWorker),
            other => Err(Error::Config(format!(
                "dispatch model must be 0 or 1, got {other}"
            ))),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

/// What the loop should do with a connection once it is back.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    AwaitRead,
    AwaitWrite,
    Close,
}

/// A connection coming back from a worker.
pub struct Finished {
    pub key: usize,
    pub conn: Box<Connection>,
    pub verdict: Verdict,
}

pub enum Reply {
    /// Batched return through the loop's eventfd.
    Queue(Arc<ReturnQueue>),
    /// The loop is blocked waiting for this one item.
    Oneshot(Arc<Completion<Finished>>),
}

impl Reply {
    fn send(self, finished: Finished) {
        match self {
            Reply::Queue(queue) => queue.send(finished),
            Reply::Oneshot(done) => done.complete(finished),
        }
    }
}

pub struct WorkItem {
    pub key: usize,
    pub conn: Box<Connection>,
    pub direction: Direction,
    pub reply: Reply,
}

/// Shared, read-only state every worker needs.
pub struct WorkerContext<H> {
    pub model: DispatchModel,
    pub resolver: Arc<dyn ResourceResolver>,
    pub store_pool: Arc<ResourcePool<H>>,
}

impl<H: CredentialStore> WorkerContext<H> {
    /// Run one task against `conn`. A store handle is held for the whole of
    /// request fulfillment.
    pub fn handle(&self, conn: &mut Connection, direction: Direction) -> Verdict {
        match direction {
            Direction::Read => {
                if self.model == DispatchModel::IoInWorker && !conn.read_available() {
                    return Verdict::Close;
                }
                let store = self.store_pool.acquire();
                conn.process(self.resolver.as_ref(), &*store)
            }
            Direction::Write => conn.write(),
        }
    }
}

pub struct WorkerPool {
    queue: Arc<WorkQueue<WorkItem>>,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    pub fn spawn<H>(
        threads: usize,
        queue: Arc<WorkQueue<WorkItem>>,
        ctx: Arc<WorkerContext<H>>,
    ) -> Result<Self>
    where
        H: CredentialStore + Send + 'static,
    {
        let mut handles = Vec::with_capacity(threads);
        for id in 0..threads {
            let queue = Arc::clone(&queue);
            let ctx = Arc::clone(&ctx);
            let handle = thread::Builder::new()
                .name(format!("worker-{id}"))
                .spawn(move || run(id, &queue, &ctx))?;
            handles.push(handle);
        }
        info!(threads, model = ?ctx.model, "worker pool started");
        Ok(Self { queue, handles })
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }

    /// Close the queue; idle workers exit, busy ones finish their task first.
    pub fn close(&self) {
        self.queue.close();
    }

    /// Close the queue and wait for every worker to exit.
    pub fn join(self) {
        self.queue.close();
        for handle in self.handles {
            let _ = handle.join();
        }
    }
}

/// Drain the queue until it is closed. Every popped item is answered, even
/// when handling it panics, so the loop never waits on a lost connection.
fn run<H: CredentialStore>(id: usize, queue: &WorkQueue<WorkItem>, ctx: &WorkerContext<H>) {
    while let Some(item) = queue.pop() {
        let WorkItem {
            key,
            mut conn,
            direction,
            reply,
        } = item;
        let handled = panic::catch_unwind(AssertUnwindSafe(|| ctx.handle(&mut conn, direction)));
        let verdict = match handled {
            Ok(verdict) => verdict,
            Err(_) => {
                error!(worker = id, key, ?direction, "task panicked, closing connection");
                Verdict::Close
            }
        };
        debug!(worker = id, key, ?direction, ?verdict, "task done");
        reply.send(Finished { key, conn, verdict });
    }
    debug!(worker = id, "worker exiting");
}
