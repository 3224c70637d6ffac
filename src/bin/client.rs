use std::io::{BufRead, BufReader, Read, Write};
use std::net::TcpStream;
use std::time::{Duration, Instant};

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(about = "Test client for the tinyserve HTTP server")]
struct Args {
    /// Server port
    #[arg(short, long, default_value_t = 9006)]
    port: u16,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Fetch the landing page twice over one keep-alive connection (default)
    Smoke,
    /// Keep-alive throughput with per-request latency
    Bench {
        /// Number of concurrent connections
        #[arg(short, long, default_value_t = 4)]
        connections: usize,
        /// Requests per connection
        #[arg(short, long, default_value_t = 10_000)]
        requests: usize,
        /// Target to request
        #[arg(short, long, default_value = "/judge.html")]
        target: String,
    },
}

struct Reply {
    status: u16,
    keep_alive: bool,
    body: Vec<u8>,
}

fn request(target: &str) -> Vec<u8> {
    format!("GET {target} HTTP/1.1\r\nHost: localhost\r\nConnection: keep-alive\r\n\r\n")
        .into_bytes()
}

fn read_reply(reader: &mut BufReader<TcpStream>) -> Reply {
    let mut line = String::new();
    reader.read_line(&mut line).expect("failed to read status line");
    let status = line
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .unwrap_or_else(|| panic!("bad status line {line:?}"));

    let mut content_length = 0usize;
    let mut keep_alive = false;
    loop {
        line.clear();
        reader.read_line(&mut line).expect("failed to read header");
        let header = line.trim_end();
        if header.is_empty() {
            break;
        }
        if let Some((name, value)) = header.split_once(':') {
            let value = value.trim();
            if name.eq_ignore_ascii_case("content-length") {
                content_length = value.parse().expect("bad Content-Length");
            } else if name.eq_ignore_ascii_case("connection") {
                keep_alive = value.eq_ignore_ascii_case("keep-alive");
            }
        }
    }

    let mut body = vec![0u8; content_length];
    reader.read_exact(&mut body).expect("short body");
    Reply {
        status,
        keep_alive,
        body,
    }
}

fn main() {
    let args = Args::parse();
    let addr = format!("127.0.0.1:{}", args.port);

    match args.command.unwrap_or(Command::Smoke) {
        Command::Smoke => smoke_test(&addr),
        Command::Bench {
            connections,
            requests,
            target,
        } => bench_test(&addr, connections, requests, &target),
    }
}

fn smoke_test(addr: &str) {
    eprintln!("smoke test: connecting to {}", addr);
    let stream = TcpStream::connect(addr).expect("failed to connect");
    let mut writer = stream.try_clone().expect("clone failed");
    let mut reader = BufReader::new(stream);

    for round in 1..=2 {
        writer.write_all(&request("/")).expect("write failed");
        let reply = read_reply(&mut reader);
        assert_eq!(reply.status, 200, "landing page status");
        assert!(reply.keep_alive, "server closed a keep-alive connection");
        eprintln!("  round {round}: 200, {} bytes", reply.body.len());
    }

    writer
        .write_all(&request("/definitely-missing.html"))
        .expect("write failed");
    let reply = read_reply(&mut reader);
    assert_eq!(reply.status, 404);
    eprintln!("  missing page: 404");
    eprintln!("smoke test: PASSED");
}

fn percentile(sorted: &[u64], p: f64) -> f64 {
    let i = ((p / 100.0) * sorted.len() as f64) as usize;
    sorted[i.min(sorted.len() - 1)] as f64 / 1_000.0
}

fn bench_test(addr: &str, num_connections: usize, requests_per_conn: usize, target: &str) {
    eprintln!(
        "bench: {} connections x {} keep-alive requests for {} to {}",
        num_connections, requests_per_conn, target, addr
    );

    let req = request(target);
    let start = Instant::now();

    let handles: Vec<_> = (0..num_connections)
        .map(|_| {
            let addr = addr.to_string();
            let req = req.clone();
            std::thread::spawn(move || {
                let stream = TcpStream::connect(&addr).expect("failed to connect");
                stream.set_nodelay(true).unwrap();
                stream
                    .set_read_timeout(Some(Duration::from_secs(30)))
                    .unwrap();
                let mut writer = stream.try_clone().expect("clone failed");
                let mut reader = BufReader::new(stream);

                let mut samples = Vec::with_capacity(requests_per_conn);
                for _ in 0..requests_per_conn {
                    let sent = Instant::now();
                    writer.write_all(&req).expect("write failed");
                    let reply = read_reply(&mut reader);
                    samples.push(sent.elapsed().as_nanos() as u64);
                    if !reply.keep_alive {
                        panic!("server closed the connection (status {})", reply.status);
                    }
                }
                samples
            })
        })
        .collect();

    let mut all_samples: Vec<u64> = handles
        .into_iter()
        .flat_map(|h| h.join().expect("thread panicked"))
        .collect();
    let elapsed = start.elapsed();

    if all_samples.is_empty() {
        eprintln!("no samples collected");
        return;
    }
    all_samples.sort_unstable();
    let n = all_samples.len();
    eprintln!(
        "bench: {} requests in {:.2}s = {:.0} QPS",
        n,
        elapsed.as_secs_f64(),
        n as f64 / elapsed.as_secs_f64()
    );
    eprintln!("  p50     {:.1}µs", percentile(&all_samples, 50.0));
    eprintln!("  p99     {:.1}µs", percentile(&all_samples, 99.0));
    eprintln!("  max     {:.1}µs", all_samples[n - 1] as f64 / 1_000.0);
}
