#![allow(dead_code)]

use std::fs;
use std::io::{BufRead, BufReader, Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tinyserve::config::{Config, TriggerMode};
use tinyserve::credentials::MemoryStore;
use tinyserve::signals::Notifier;
use tinyserve::worker::DispatchModel;
use tinyserve::Server;

pub const JUDGE_HTML: &str = "<html><body><h1>judge</h1></body></html>\n";

/// Throwaway document root, removed on drop.
pub struct DocRoot {
    pub path: PathBuf,
}

impl DocRoot {
    pub fn new() -> Self {
        static NEXT: AtomicUsize = AtomicUsize::new(0);
        let path = std::env::temp_dir().join(format!(
            "tinyserve-it-{}-{}",
            std::process::id(),
            NEXT.fetch_add(1, Ordering::Relaxed)
        ));
        fs::create_dir_all(&path).unwrap();
        fs::set_permissions(&path, fs::Permissions::from_mode(0o755)).unwrap();

        let root = Self { path };
        root.file("judge.html", JUDGE_HTML.as_bytes(), 0o644);
        root.file("empty.html", b"", 0o644);
        root.file("secret.html", b"top secret", 0o600);
        for page in ["log.html", "welcome.html", "logError.html", "registerError.html"] {
            root.file(page, page.as_bytes(), 0o644);
        }
        fs::create_dir(root.path.join("dir")).unwrap();
        fs::set_permissions(root.path.join("dir"), fs::Permissions::from_mode(0o755)).unwrap();
        root
    }

    pub fn file(&self, name: &str, contents: &[u8], mode: u32) {
        let p = self.path.join(name);
        fs::write(&p, contents).unwrap();
        fs::set_permissions(&p, fs::Permissions::from_mode(mode)).unwrap();
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for DocRoot {
    fn drop(&mut self) {
        let _ = fs::remove_dir_all(&self.path);
    }
}

pub fn test_config(root: &Path, dispatch: DispatchModel, trigger: u8) -> Config {
    Config {
        addr: "127.0.0.1:0".parse().unwrap(),
        root: root.to_path_buf(),
        trigger: TriggerMode::from_selector(trigger).unwrap(),
        store_pool_size: 2,
        worker_threads: 4,
        dispatch,
        handle_signals: false,
        ..Config::default()
    }
}

/// A server running its loop on a background thread. Stopped on drop.
pub struct Running {
    pub addr: SocketAddr,
    pub notifier: Notifier,
    handle: Option<JoinHandle<tinyserve::Result<()>>>,
}

impl Running {
    pub fn start(config: Config) -> Self {
        Self::start_with_store(config, MemoryStore::new())
    }

    pub fn start_with_store(config: Config, store: MemoryStore) -> Self {
        let server = Server::with_store(config, store).expect("server failed to bind");
        let addr = server.local_addr();
        let notifier = server.notifier();
        let handle = thread::spawn(move || server.run());
        Self {
            addr,
            notifier,
            handle: Some(handle),
        }
    }

    pub fn connect(&self) -> Client {
        Client::connect(self.addr)
    }

    /// Stop the loop and return what `run` returned.
    pub fn stop(mut self) -> tinyserve::Result<()> {
        self.notifier.stop().unwrap();
        self.handle.take().unwrap().join().expect("event loop panicked")
    }
}

impl Drop for Running {
    fn drop(&mut self) {
        if let Some(handle) = self.handle.take() {
            let _ = self.notifier.stop();
            let _ = handle.join();
        }
    }
}

#[derive(Debug)]
pub struct Reply {
    pub status: u16,
    pub content_length: usize,
    pub keep_alive: bool,
    pub body: Vec<u8>,
    /// Exact bytes received for this response.
    pub raw: Vec<u8>,
}

pub struct Client {
    pub writer: TcpStream,
    pub reader: BufReader<TcpStream>,
}

impl Client {
    pub fn connect(addr: SocketAddr) -> Self {
        let stream = TcpStream::connect(addr).unwrap();
        stream
            .set_read_timeout(Some(Duration::from_secs(10)))
            .unwrap();
        stream.set_nodelay(true).unwrap();
        Self {
            writer: stream.try_clone().unwrap(),
            reader: BufReader::new(stream),
        }
    }

    pub fn send(&mut self, bytes: &[u8]) {
        self.writer.write_all(bytes).unwrap();
    }

    pub fn get(&mut self, target: &str, keep_alive: bool) -> Reply {
        self.send(get_request(target, keep_alive).as_bytes());
        self.read_reply()
    }

    pub fn read_reply(&mut self) -> Reply {
        let mut raw = Vec::new();
        let mut line = String::new();
        self.reader.read_line(&mut line).unwrap();
        raw.extend_from_slice(line.as_bytes());
        let status = line
            .split_whitespace()
            .nth(1)
            .and_then(|s| s.parse().ok())
            .unwrap_or_else(|| panic!("bad status line {line:?}"));

        let mut content_length = 0;
        let mut keep_alive = false;
        loop {
            line.clear();
            self.reader.read_line(&mut line).unwrap();
            raw.extend_from_slice(line.as_bytes());
            let header = line.trim_end();
            if header.is_empty() {
                break;
            }
            let (name, value) = header.split_once(':').unwrap();
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().unwrap();
            } else if name.eq_ignore_ascii_case("connection") {
                keep_alive = value.eq_ignore_ascii_case("keep-alive");
            }
        }

        let mut body = vec![0u8; content_length];
        self.reader.read_exact(&mut body).unwrap();
        raw.extend_from_slice(&body);
        Reply {
            status,
            content_length,
            keep_alive,
            body,
            raw,
        }
    }

    /// Read until the server closes; returns everything received.
    pub fn read_to_close(&mut self) -> Vec<u8> {
        let mut rest = Vec::new();
        self.reader.read_to_end(&mut rest).unwrap();
        rest
    }
}

pub fn get_request(target: &str, keep_alive: bool) -> String {
    let connection = if keep_alive { "keep-alive" } else { "close" };
    format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: {connection}\r\n\r\n")
}

pub fn post_request(target: &str, body: &str) -> String {
    format!(
        "POST {target} HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\nContent-Length: {}\r\n\r\n{body}",
        body.len()
    )
}
