//! Benchmark: request parsing and response assembly, no sockets.

use std::hint::black_box;
use std::time::{Duration, Instant};

use tinyserve::protocol::{HttpCode, RequestParser};
use tinyserve::response_flow::Response;

const REQUEST: &[u8] = b"GET /judge.html HTTP/1.1\r\n\
Host: localhost:9006\r\n\
User-Agent: bench/1.0\r\n\
Accept: text/html\r\n\
Connection: keep-alive\r\n\r\n";

fn parse_whole(parser: &mut RequestParser) -> HttpCode {
    parser.reset();
    parser.advance(black_box(REQUEST))
}

fn parse_fragmented(parser: &mut RequestParser, step: usize) -> HttpCode {
    parser.reset();
    let mut end = 0;
    loop {
        end = (end + step).min(REQUEST.len());
        let code = parser.advance(black_box(&REQUEST[..end]));
        if code != HttpCode::NoRequest || end == REQUEST.len() {
            return code;
        }
    }
}

fn sustain<F: FnMut() -> HttpCode>(label: &str, mut f: F) {
    const TARGET_DURATION: Duration = Duration::from_secs(2);

    for _ in 0..10_000 {
        black_box(f());
    }

    let start = Instant::now();
    let mut iterations: u64 = 0;
    while start.elapsed() < TARGET_DURATION {
        assert_eq!(f(), HttpCode::GetRequest);
        iterations += 1;
    }
    let elapsed = start.elapsed();
    eprintln!(
        "{label}: {iterations} requests in {elapsed:?}  {:.0} req/s  {:.0} MB/s",
        iterations as f64 / elapsed.as_secs_f64(),
        (iterations * REQUEST.len() as u64) as f64 / 1_000_000.0 / elapsed.as_secs_f64(),
    );
}

fn main() {
    let mut parser = RequestParser::new();
    sustain("parse whole", || parse_whole(&mut parser));
    sustain("parse 16-byte fragments", || parse_fragmented(&mut parser, 16));

    let start = Instant::now();
    let mut built: u64 = 0;
    while start.elapsed() < Duration::from_secs(1) {
        let resp = Response::build(black_box(HttpCode::NoResource), true, None);
        black_box(resp.map(|r| r.total_len()).unwrap_or(0));
        built += 1;
    }
    eprintln!(
        "error response build: {:.0} /s",
        built as f64 / start.elapsed().as_secs_f64()
    );
}
