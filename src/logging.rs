//! Log sink behind the `tracing` subscriber.
//!
//! Records are formatted by `tracing-subscriber` and handed to a [`LogSink`].
//! In synchronous mode the sink writes each record under a mutex; in
//! asynchronous mode it queues records for a writer thread and falls back to a
//! direct write when the queue refuses one.

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread;

use parking_lot::Mutex;
use tracing_subscriber::fmt::MakeWriter;

use crate::config::{ASYNC_LOG_QUEUE, LogMode};
use crate::error::{Error, Result};
use crate::work_queue::{Rejected, WorkQueue};

type Destination = Arc<Mutex<Box<dyn Write + Send>>>;

struct Inner {
    dest: Destination,
    queue: Option<Arc<WorkQueue<Vec<u8>>>>,
    /// Records queued but not yet written.
    pending: Arc<AtomicUsize>,
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(queue) = &self.queue {
            queue.close();
        }
    }
}

#[derive(Clone)]
pub struct LogSink {
    inner: Arc<Inner>,
}

impl LogSink {
    pub fn new(mode: LogMode, dest: Box<dyn Write + Send>) -> Result<Self> {
        let dest: Destination = Arc::new(Mutex::new(dest));
        let pending = Arc::new(AtomicUsize::new(0));
        let queue = match mode {
            LogMode::Sync => None,
            LogMode::Async => {
                let queue = Arc::new(WorkQueue::<Vec<u8>>::new(ASYNC_LOG_QUEUE));
                let (q, d, p) = (Arc::clone(&queue), Arc::clone(&dest), Arc::clone(&pending));
                thread::Builder::new()
                    .name("log-writer".into())
                    .spawn(move || {
                        while let Some(record) = q.pop() {
                            let _ = d.lock().write_all(&record);
                            p.fetch_sub(1, Ordering::Release);
                        }
                    })?;
                Some(queue)
            }
        };
        Ok(Self {
            inner: Arc::new(Inner {
                dest,
                queue,
                pending,
            }),
        })
    }

    pub fn stderr(mode: LogMode) -> Result<Self> {
        Self::new(mode, Box::new(io::stderr()))
    }

    /// Append to `path`, creating it if needed.
    pub fn file(path: &Path, mode: LogMode) -> Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        Self::new(mode, Box::new(file))
    }

    /// Fire-and-forget write of one formatted record.
    pub fn write_record(&self, record: Vec<u8>) {
        if record.is_empty() {
            return;
        }
        if let Some(queue) = &self.inner.queue {
            self.inner.pending.fetch_add(1, Ordering::AcqRel);
            match queue.push(record) {
                Ok(()) => return,
                Err(Rejected(record)) => {
                    self.inner.pending.fetch_sub(1, Ordering::AcqRel);
                    let _ = self.inner.dest.lock().write_all(&record);
                    return;
                }
            }
        }
        let _ = self.inner.dest.lock().write_all(&record);
    }

    /// Wait for queued records to be written, then flush the destination.
    pub fn flush(&self) {
        while self.inner.pending.load(Ordering::Acquire) > 0 {
            thread::yield_now();
        }
        let _ = self.inner.dest.lock().flush();
    }
}

/// Buffers one formatted event and hands it to the sink when dropped.
pub struct SinkWriter {
    sink: LogSink,
    buf: Vec<u8>,
}

impl Write for SinkWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.buf.extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl Drop for SinkWriter {
    fn drop(&mut self) {
        self.sink.write_record(std::mem::take(&mut self.buf));
    }
}

impl<'a> MakeWriter<'a> for LogSink {
    type Writer = SinkWriter;

    fn make_writer(&'a self) -> Self::Writer {
        SinkWriter {
            sink: self.clone(),
            buf: Vec::with_capacity(256),
        }
    }
}

/// Install the global subscriber writing through `sink`.
pub fn init(sink: LogSink) -> Result<()> {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_level(true)
        .with_ansi(false)
        .with_thread_names(true)
        .with_max_level(tracing::Level::INFO)
        .with_writer(sink)
        .try_init()
        .map_err(|e| Error::Config(format!("logging: {e}")))
}
