use std::io::Write;
use std::os::fd::AsRawFd;
use std::sync::Arc;
use std::time::{Duration, Instant};

use slab::Slab;
use socket2::{SockAddr, Socket};
use tracing::{debug, info, warn};

use crate::config::{BUSY_TEXT, Config, MAX_EVENTS, TriggerMode};
use crate::connection::Connection;
use crate::error::{Error, Result};
use crate::metrics;
use crate::poller::{Event, Events, Interest, Mode, Poller};
use crate::response_queue::ReturnQueue;
use crate::signals::{self, Control, SignalPipe};
use crate::sync::Completion;
use crate::timer::{TimerId, TimerList};
use crate::work_queue::{Rejected, WorkQueue};
use crate::worker::{Direction, DispatchModel, Finished, Reply, Verdict, WorkItem};

/// Tokens above the slab key range.
const LISTEN_TOKEN: u64 = u64::MAX;
const SIGNAL_TOKEN: u64 = u64::MAX - 1;
const RETURN_TOKEN: u64 = u64::MAX - 2;

enum Slot {
    /// Owned by the loop, registered (or about to be) with the poller.
    Idle(Box<Connection>),
    /// Handed to a worker. `evicted` records a timer expiry that landed in
    /// the meantime; the connection is closed as soon as it comes back.
    InFlight { evicted: bool },
}

struct Entry {
    slot: Slot,
    /// `None` once the sweep has consumed the timer.
    timer: Option<TimerId>,
}

/// The single readiness thread: accepts, routes readiness to the dispatch
/// model, applies worker verdicts and sweeps idle connections.
pub struct IoThread {
    listener: Socket,
    poller: Poller,
    signals: SignalPipe,
    returns: Arc<ReturnQueue>,
    queue: Arc<WorkQueue<WorkItem>>,
    model: DispatchModel,
    trigger: TriggerMode,
    linger: bool,
    max_connections: usize,
    idle_timeout: Duration,
    timeslot: Duration,
    /// Re-arm SIGALRM after each sweep (signal handlers are installed).
    alarm: bool,
    conns: Slab<Entry>,
    timers: TimerList<usize>,
    pending_sweep: bool,
    stop: bool,
}

impl IoThread {
    pub fn new(
        listener: Socket,
        signals: SignalPipe,
        queue: Arc<WorkQueue<WorkItem>>,
        config: &Config,
    ) -> Result<Self> {
        let poller = Poller::new().map_err(Error::Poller)?;
        let returns = Arc::new(ReturnQueue::new().map_err(Error::Poller)?);

        let listen_mode = Mode {
            edge: config.trigger.listen_edge,
            oneshot: false,
        };
        poller
            .add(listener.as_raw_fd(), LISTEN_TOKEN, Interest::Read, listen_mode)
            .map_err(Error::Poller)?;
        poller
            .add(signals.read_fd(), SIGNAL_TOKEN, Interest::Read, Mode::default())
            .map_err(Error::Poller)?;
        poller
            .add(returns.eventfd(), RETURN_TOKEN, Interest::Read, Mode::default())
            .map_err(Error::Poller)?;

        Ok(Self {
            listener,
            poller,
            signals,
            returns,
            queue,
            model: config.dispatch,
            trigger: config.trigger,
            linger: config.linger,
            max_connections: config.max_connections,
            idle_timeout: config.idle_timeout(),
            timeslot: config.timeslot,
            alarm: config.handle_signals,
            conns: Slab::new(),
            timers: TimerList::new(),
            pending_sweep: false,
            stop: false,
        })
    }

    fn conn_mode(&self) -> Mode {
        Mode {
            edge: self.trigger.conn_edge,
            oneshot: true,
        }
    }

    /// Run until a stop signal arrives. In-flight worker tasks are not waited
    /// for.
    pub fn run(mut self) -> Result<()> {
        if self.alarm {
            signals::arm_alarm(self.timeslot);
        }
        let mut events = Events::with_capacity(MAX_EVENTS);
        info!(
            model = ?self.model,
            listen_edge = self.trigger.listen_edge,
            conn_edge = self.trigger.conn_edge,
            "event loop running"
        );

        while !self.stop {
            self.poller.wait(&mut events, None).map_err(Error::Poller)?;
            for event in events.iter() {
                match event.token {
                    LISTEN_TOKEN => self.accept_ready(),
                    SIGNAL_TOKEN => self.signal_ready(),
                    RETURN_TOKEN => self.returns_ready(),
                    key => self.conn_ready(key as usize, event),
                }
            }
            if self.pending_sweep {
                self.sweep();
                self.pending_sweep = false;
                if self.alarm {
                    signals::arm_alarm(self.timeslot);
                }
            }
        }

        info!(open = self.conns.len(), "event loop stopped");
        Ok(())
    }

    fn accept_ready(&mut self) {
        loop {
            match self.listener.accept() {
                Ok((socket, addr)) => self.admit(socket, addr),
                Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    warn!(error = %e, "accept failed");
                    break;
                }
            }
            if !self.trigger.listen_edge {
                break;
            }
        }
    }

    fn admit(&mut self, socket: Socket, addr: SockAddr) {
        let peer = addr.as_socket();
        if self.conns.len() >= self.max_connections {
            let _ = (&socket).write_all(BUSY_TEXT.as_bytes());
            metrics::inc_busy_rejected();
            warn!(?peer, open = self.conns.len(), "server busy, connection refused");
            return;
        }
        if let Err(e) = socket.set_nonblocking(true) {
            warn!(?peer, error = %e, "cannot make socket nonblocking");
            return;
        }
        if self.linger
            && let Err(e) = socket.set_linger(Some(Duration::from_secs(1)))
        {
            debug!(?peer, error = %e, "SO_LINGER not applied");
        }

        let conn = Box::new(Connection::new(socket, peer, self.trigger.conn_edge));
        let fd = conn.fd();
        let entry = self.conns.vacant_entry();
        let key = entry.key();
        let timer = self.timers.add(Instant::now() + self.idle_timeout, key);
        entry.insert(Entry {
            slot: Slot::Idle(conn),
            timer: Some(timer),
        });

        if let Err(e) = self.poller.add(fd, key as u64, Interest::Read, self.conn_mode()) {
            warn!(?peer, error = %e, "cannot register connection");
            self.close(key);
            return;
        }
        metrics::inc_accepted();
        info!(?peer, key, open = self.conns.len(), "connection accepted");
    }

    fn signal_ready(&mut self) {
        let mut received = Vec::new();
        if let Err(e) = self.signals.drain(&mut received) {
            warn!(error = %e, "reading signal channel failed");
            return;
        }
        for signo in received {
            match signals::classify(signo) {
                Control::Tick => self.pending_sweep = true,
                Control::Stop => {
                    info!(signo, "stop requested");
                    self.stop = true;
                }
                Control::Ignore => debug!(signo, "signal ignored"),
            }
        }
    }

    fn returns_ready(&mut self) {
        let mut finished = Vec::new();
        self.returns.drain(&mut finished);
        for item in finished {
            self.finish(item);
        }
    }

    fn conn_ready(&mut self, key: usize, event: Event) {
        if !self.conns.contains(key) {
            return;
        }
        if event.is_hangup() {
            debug!(key, "peer hung up");
            self.evict(key);
            return;
        }
        if event.is_readable() {
            self.readable(key);
        } else if event.is_writable() {
            self.writable(key);
        }
    }

    fn readable(&mut self, key: usize) {
        let Some(mut conn) = self.take_idle(key) else {
            return;
        };
        if self.model == DispatchModel::IoInLoop && !conn.read_available() {
            self.release(key, conn);
            return;
        }
        self.touch(key);
        self.dispatch(key, conn, Direction::Read);
    }

    fn writable(&mut self, key: usize) {
        let Some(mut conn) = self.take_idle(key) else {
            return;
        };
        self.touch(key);
        match self.model {
            DispatchModel::IoInLoop => {
                let verdict = conn.write();
                self.apply(key, conn, verdict);
            }
            DispatchModel::IoInWorker => self.dispatch(key, conn, Direction::Write),
        }
    }

    /// Hand a connection to the worker pool. A rejected item is put back idle
    /// without re-arming; the idle timer reclaims it.
    fn dispatch(&mut self, key: usize, conn: Box<Connection>, direction: Direction) {
        let done = match self.model {
            DispatchModel::IoInLoop => None,
            DispatchModel::IoInWorker => Some(Arc::new(Completion::new())),
        };
        let reply = match &done {
            Some(done) => Reply::Oneshot(Arc::clone(done)),
            None => Reply::Queue(Arc::clone(&self.returns)),
        };
        let item = WorkItem {
            key,
            conn,
            direction,
            reply,
        };

        if let Err(Rejected(item)) = self.queue.push(item) {
            metrics::inc_queue_rejected();
            warn!(key, queued = self.queue.len(), "work queue full, task dropped");
            self.conns[key].slot = Slot::Idle(item.conn);
            return;
        }

        // I/O-in-worker: the loop blocks until this task is done.
        if let Some(done) = done {
            let finished = done.wait();
            self.finish(finished);
        }
    }

    fn finish(&mut self, finished: Finished) {
        let Finished { key, conn, verdict } = finished;
        let Some(entry) = self.conns.get(key) else {
            return;
        };
        if let Slot::InFlight { evicted: true } = entry.slot {
            debug!(key, "closing connection evicted while in flight");
            self.release(key, conn);
            return;
        }
        self.apply(key, conn, verdict);
    }

    fn apply(&mut self, key: usize, conn: Box<Connection>, verdict: Verdict) {
        let interest = match verdict {
            Verdict::AwaitRead => Interest::Read,
            Verdict::AwaitWrite => Interest::Write,
            Verdict::Close => {
                self.release(key, conn);
                return;
            }
        };
        if let Err(e) = self
            .poller
            .rearm(conn.fd(), key as u64, interest, self.conn_mode())
        {
            warn!(key, error = %e, "re-arm failed");
            self.release(key, conn);
            return;
        }
        self.conns[key].slot = Slot::Idle(conn);
    }

    fn take_idle(&mut self, key: usize) -> Option<Box<Connection>> {
        let entry = self.conns.get_mut(key)?;
        match std::mem::replace(&mut entry.slot, Slot::InFlight { evicted: false }) {
            Slot::Idle(conn) => Some(conn),
            in_flight => {
                entry.slot = in_flight;
                None
            }
        }
    }

    /// Push the connection's expiry out by a full idle timeout.
    fn touch(&mut self, key: usize) {
        if let Some(id) = &self.conns[key].timer {
            self.timers.modify(id, Instant::now() + self.idle_timeout);
        }
    }

    fn sweep(&mut self) {
        let mut expired = Vec::new();
        self.timers.sweep(Instant::now(), |key| expired.push(key));
        for key in expired {
            if let Some(entry) = self.conns.get_mut(key) {
                entry.timer = None;
            }
            metrics::inc_evicted();
            debug!(key, "idle timeout");
            self.evict(key);
        }
    }

    /// Close an idle connection now, or mark an in-flight one for closing when
    /// it returns.
    fn evict(&mut self, key: usize) {
        let idle = match self.conns.get_mut(key).map(|e| &mut e.slot) {
            None => return,
            Some(Slot::InFlight { evicted }) => {
                *evicted = true;
                false
            }
            Some(Slot::Idle(_)) => true,
        };
        if idle {
            self.close(key);
        }
    }

    fn close(&mut self, key: usize) {
        let entry = self.conns.remove(key);
        if let Some(id) = entry.timer {
            self.timers.delete(id);
        }
        if let Slot::Idle(conn) = entry.slot {
            self.deregister(key, conn);
        }
    }

    /// Close a connection that is currently out of its slot.
    fn release(&mut self, key: usize, conn: Box<Connection>) {
        let entry = self.conns.remove(key);
        if let Some(id) = entry.timer {
            self.timers.delete(id);
        }
        self.deregister(key, conn);
    }

    fn deregister(&self, key: usize, conn: Box<Connection>) {
        let _ = self.poller.delete(conn.fd());
        info!(peer = ?conn.peer(), key, open = self.conns.len(), "connection closed");
    }
}
