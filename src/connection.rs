//! Per-connection state: socket, read buffer, parser and the in-flight
//! response.
//!
//! A `Connection` is owned by the event loop while idle and moved into exactly
//! one work item while a worker handles it, so it is never shared.

use std::io::{self, Read};
use std::net::SocketAddr;
use std::os::fd::{AsRawFd, RawFd};

use socket2::Socket;
use tracing::{debug, warn};

use crate::config::{MAX_REQUEST_BYTES, READ_CHUNK};
use crate::credentials::CredentialStore;
use crate::metrics;
use crate::protocol::{HttpCode, RequestParser};
use crate::request_flow;
use crate::resource::ResourceResolver;
use crate::response_flow::{Response, WriteProgress};
use crate::worker::Verdict;

pub struct Connection {
    socket: Socket,
    peer: Option<SocketAddr>,
    /// Drain the socket on every read (edge-triggered registration).
    edge: bool,
    read_buf: Vec<u8>,
    parser: RequestParser,
    response: Option<Response>,
    keep_alive: bool,
}

impl Connection {
    pub fn new(socket: Socket, peer: Option<SocketAddr>, edge: bool) -> Self {
        Self {
            socket,
            peer,
            edge,
            read_buf: Vec::with_capacity(READ_CHUNK),
            parser: RequestParser::new(),
            response: None,
            keep_alive: false,
        }
    }

    pub fn fd(&self) -> RawFd {
        self.socket.as_raw_fd()
    }

    pub fn peer(&self) -> Option<SocketAddr> {
        self.peer
    }

    pub fn buffered(&self) -> &[u8] {
        &self.read_buf
    }

    pub fn has_response(&self) -> bool {
        self.response.is_some()
    }

    /// Pull available bytes into the read buffer. Level-triggered sockets get
    /// one read call, edge-triggered ones are drained until would-block.
    /// Returns `false` when the peer closed, the read failed or the buffer is
    /// full; the caller closes the connection.
    pub fn read_available(&mut self) -> bool {
        loop {
            let start = self.read_buf.len();
            if start >= MAX_REQUEST_BYTES {
                warn!(peer = ?self.peer, "request exceeds read buffer");
                return false;
            }
            let end = (start + READ_CHUNK).min(MAX_REQUEST_BYTES);
            self.read_buf.resize(end, 0);
            let result = (&self.socket).read(&mut self.read_buf[start..]);
            match result {
                Ok(0) => {
                    self.read_buf.truncate(start);
                    return false;
                }
                Ok(n) => {
                    self.read_buf.truncate(start + n);
                    if !self.edge {
                        return true;
                    }
                }
                Err(e) => {
                    self.read_buf.truncate(start);
                    match e.kind() {
                        io::ErrorKind::WouldBlock => return true,
                        io::ErrorKind::Interrupted => {}
                        _ => return false,
                    }
                }
            }
        }
    }

    /// Parse what has been buffered and, once a request is complete, fulfill it
    /// and stage the response.
    pub fn process(
        &mut self,
        resolver: &dyn ResourceResolver,
        store: &dyn CredentialStore,
    ) -> Verdict {
        let code = self.parser.advance(&self.read_buf);
        let (code, resource) = match code {
            HttpCode::NoRequest => return Verdict::AwaitRead,
            HttpCode::GetRequest => {
                let fulfilled = request_flow::fulfill(
                    self.parser.method(),
                    self.parser.target(),
                    self.parser.body(&self.read_buf),
                    resolver,
                    store,
                );
                (fulfilled.code, fulfilled.resource)
            }
            other => (other, None),
        };

        self.keep_alive = self.parser.keep_alive();
        match Response::build(code, self.keep_alive, resource) {
            Ok(response) => {
                debug!(
                    peer = ?self.peer,
                    path = self.parser.target(),
                    status = response.status(),
                    "response staged"
                );
                metrics::inc_response(response.status());
                self.response = Some(response);
                Verdict::AwaitWrite
            }
            Err(err) => {
                warn!(peer = ?self.peer, error = %err, "cannot build response");
                Verdict::Close
            }
        }
    }

    /// Push the staged response out. On completion a keep-alive connection is
    /// reset for its next request.
    pub fn write(&mut self) -> Verdict {
        let Some(response) = self.response.as_mut() else {
            self.reset();
            return Verdict::AwaitRead;
        };
        let before = response.bytes_sent();
        let progress = response.write_to(&mut &self.socket);
        metrics::add_bytes_written((response.bytes_sent() - before) as u64);
        match progress {
            Ok(WriteProgress::Pending) => Verdict::AwaitWrite,
            Ok(WriteProgress::Done) => {
                self.response = None;
                if self.keep_alive {
                    self.reset();
                    Verdict::AwaitRead
                } else {
                    Verdict::Close
                }
            }
            Err(err) => {
                debug!(peer = ?self.peer, error = %err, "write failed");
                self.response = None;
                Verdict::Close
            }
        }
    }

    /// Forget the previous request. Unparsed trailing bytes are discarded.
    fn reset(&mut self) {
        self.read_buf.clear();
        self.parser.reset();
        self.keep_alive = false;
    }
}
