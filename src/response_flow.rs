//! Response path: assemble status line and headers into a fixed-capacity
//! buffer, attach the mapped file as a second segment, and push both out with
//! scatter writes that may complete partially.

use std::fmt::{self, Write as _};
use std::io::{self, IoSlice, Write};

use thiserror::Error;

use crate::protocol::HttpCode;
use crate::resource::{MappedFile, Resource};

/// Capacity of the header segment (status line, headers and inline bodies).
pub const WRITE_BUFFER_SIZE: usize = 1024;

const OK_200_TITLE: &str = "OK";
const ERROR_400_TITLE: &str = "Bad Request";
const ERROR_400_FORM: &str =
    "Your request has bad syntax or is inherently impossible to satisfy.\n";
const ERROR_403_TITLE: &str = "Forbidden";
const ERROR_403_FORM: &str = "You do not have permission to get file from this server.\n";
const ERROR_404_TITLE: &str = "Not Found";
const ERROR_404_FORM: &str = "The requested file was not found on this server.\n";
const ERROR_500_TITLE: &str = "Internal Error";
const ERROR_500_FORM: &str = "There was an unusual problem serving the request file.\n";
const EMPTY_FILE_BODY: &str = "<html><body></body></html>";

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("no response for {0:?}")]
    NotRespondable(HttpCode),
    #[error("response header exceeds {WRITE_BUFFER_SIZE} bytes")]
    HeaderOverflow,
}

/// Outcome of one [`Response::write_to`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteProgress {
    /// Everything has been sent.
    Done,
    /// The socket would block; wait for writability and call again.
    Pending,
}

/// Status line parts and inline body for every outcome that produces a
/// response.
pub fn status_for(code: HttpCode) -> Option<(u16, &'static str, &'static str)> {
    match code {
        HttpCode::FileRequest => Some((200, OK_200_TITLE, EMPTY_FILE_BODY)),
        HttpCode::BadRequest => Some((400, ERROR_400_TITLE, ERROR_400_FORM)),
        HttpCode::ForbiddenRequest => Some((403, ERROR_403_TITLE, ERROR_403_FORM)),
        HttpCode::NoResource => Some((404, ERROR_404_TITLE, ERROR_404_FORM)),
        HttpCode::InternalError => Some((500, ERROR_500_TITLE, ERROR_500_FORM)),
        HttpCode::NoRequest | HttpCode::GetRequest => None,
    }
}

/// In-flight response. Owns the mapped file segment; dropping the response
/// releases the mapping.
pub struct Response {
    status: u16,
    header: Vec<u8>,
    file: Option<MappedFile>,
    bytes_sent: usize,
}

impl fmt::Debug for Response {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Response")
            .field("status", &self.status)
            .field("header_len", &self.header.len())
            .field("file_len", &self.file_len())
            .field("bytes_sent", &self.bytes_sent)
            .finish()
    }
}

struct HeaderBuf<'a>(&'a mut Vec<u8>);

impl fmt::Write for HeaderBuf<'_> {
    fn write_str(&mut self, s: &str) -> fmt::Result {
        // One byte is held back, as the fixed C-string buffer it replaces did.
        if self.0.len() + s.len() >= WRITE_BUFFER_SIZE {
            return Err(fmt::Error);
        }
        self.0.extend_from_slice(s.as_bytes());
        Ok(())
    }
}

impl Response {
    /// Assemble the response for `code`. A `FileRequest` with a mapped body
    /// sends it as a second segment; every other outcome copies its fixed body
    /// into the header buffer.
    pub fn build(
        code: HttpCode,
        keep_alive: bool,
        resource: Option<Resource>,
    ) -> Result<Self, BuildError> {
        let (status, title, inline_body) =
            status_for(code).ok_or(BuildError::NotRespondable(code))?;

        let file = match code {
            HttpCode::FileRequest => resource.and_then(|r| r.body),
            _ => None,
        };
        let (content_length, body) = match &file {
            Some(mapped) => (mapped.len(), ""),
            None => (inline_body.len(), inline_body),
        };

        let mut header = Vec::with_capacity(WRITE_BUFFER_SIZE);
        write!(
            HeaderBuf(&mut header),
            "HTTP/1.1 {status} {title}\r\nContent-Length: {content_length}\r\nConnection: {}\r\n\r\n{body}",
            if keep_alive { "keep-alive" } else { "close" },
        )
        .map_err(|_| BuildError::HeaderOverflow)?;

        Ok(Self {
            status,
            header,
            file,
            bytes_sent: 0,
        })
    }

    pub fn status(&self) -> u16 {
        self.status
    }

    pub fn header_len(&self) -> usize {
        self.header.len()
    }

    pub fn file_len(&self) -> usize {
        self.file.as_ref().map_or(0, MappedFile::len)
    }

    pub fn total_len(&self) -> usize {
        self.header.len() + self.file_len()
    }

    pub fn bytes_sent(&self) -> usize {
        self.bytes_sent
    }

    pub fn remaining(&self) -> usize {
        self.total_len() - self.bytes_sent
    }

    pub fn is_complete(&self) -> bool {
        self.bytes_sent >= self.total_len()
    }

    /// The two scatter-write segments for what is still unsent. Once the header
    /// is flushed its segment is empty and the file segment starts at the
    /// excess.
    pub fn segments(&self) -> [IoSlice<'_>; 2] {
        let file = self.file.as_ref().map_or(&[][..], MappedFile::as_slice);
        let header_len = self.header.len();
        if self.bytes_sent < header_len {
            [IoSlice::new(&self.header[self.bytes_sent..]), IoSlice::new(file)]
        } else {
            [
                IoSlice::new(&[]),
                IoSlice::new(&file[self.bytes_sent - header_len..]),
            ]
        }
    }

    /// Record `n` more bytes as sent.
    pub fn advance(&mut self, n: usize) {
        self.bytes_sent = (self.bytes_sent + n).min(self.total_len());
    }

    /// Write as much as the sink accepts. Returns `Pending` on would-block;
    /// any other error is returned to the caller, which closes the connection.
    pub fn write_to<W: Write>(&mut self, sink: &mut W) -> io::Result<WriteProgress> {
        while !self.is_complete() {
            let written = {
                let segments = self.segments();
                sink.write_vectored(&segments)
            };
            match written {
                Ok(0) => return Err(io::ErrorKind::WriteZero.into()),
                Ok(n) => self.advance(n),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    return Ok(WriteProgress::Pending);
                }
                Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
                Err(e) => return Err(e),
            }
        }
        Ok(WriteProgress::Done)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Accepts at most `chunk` bytes per call and reports would-block on every
    /// other call.
    struct Trickle {
        out: Vec<u8>,
        chunk: usize,
        calls: usize,
        block: bool,
    }

    impl Trickle {
        fn new(chunk: usize, block: bool) -> Self {
            Self {
                out: Vec::new(),
                chunk,
                calls: 0,
                block,
            }
        }
    }

    impl Write for Trickle {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.write_vectored(&[IoSlice::new(buf)])
        }

        fn write_vectored(&mut self, bufs: &[IoSlice<'_>]) -> io::Result<usize> {
            self.calls += 1;
            if self.block && self.calls % 2 == 0 {
                return Err(io::ErrorKind::WouldBlock.into());
            }
            let mut budget = self.chunk;
            let mut n = 0;
            for b in bufs {
                let take = b.len().min(budget);
                self.out.extend_from_slice(&b[..take]);
                budget -= take;
                n += take;
                if budget == 0 {
                    break;
                }
            }
            Ok(n)
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn text(bytes: &[u8]) -> String {
        String::from_utf8_lossy(bytes).into_owned()
    }

    #[test]
    fn not_found_has_fixed_body() {
        let mut resp = Response::build(HttpCode::NoResource, false, None).unwrap();
        let mut sink = Trickle::new(usize::MAX, false);
        assert_eq!(resp.write_to(&mut sink).unwrap(), WriteProgress::Done);
        assert_eq!(
            text(&sink.out),
            format!(
                "HTTP/1.1 404 Not Found\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
                ERROR_404_FORM.len(),
                ERROR_404_FORM
            )
        );
    }

    #[test]
    fn status_mapping() {
        let cases = [
            (HttpCode::BadRequest, 400),
            (HttpCode::ForbiddenRequest, 403),
            (HttpCode::NoResource, 404),
            (HttpCode::InternalError, 500),
            (HttpCode::FileRequest, 200),
        ];
        for (code, status) in cases {
            assert_eq!(Response::build(code, true, None).unwrap().status(), status);
        }
        assert!(matches!(
            Response::build(HttpCode::NoRequest, true, None),
            Err(BuildError::NotRespondable(HttpCode::NoRequest))
        ));
    }

    #[test]
    fn empty_file_gets_blank_page() {
        let resource = Resource { size: 0, body: None };
        let mut resp = Response::build(HttpCode::FileRequest, true, Some(resource)).unwrap();
        let mut sink = Trickle::new(usize::MAX, false);
        resp.write_to(&mut sink).unwrap();
        let out = text(&sink.out);
        assert!(out.starts_with("HTTP/1.1 200 OK\r\nContent-Length: 26\r\nConnection: keep-alive\r\n\r\n"));
        assert!(out.ends_with(EMPTY_FILE_BODY));
    }

    #[test]
    fn segments_track_partial_header_writes() {
        let mut resp = Response::build(HttpCode::InternalError, false, None).unwrap();
        let total = resp.total_len();
        resp.advance(10);
        let [head, file] = resp.segments();
        assert_eq!(head.len(), total - 10);
        assert_eq!(file.len(), 0);
        assert_eq!(resp.remaining(), total - 10);
        resp.advance(usize::MAX / 2);
        assert!(resp.is_complete());
    }

    #[test]
    fn partial_writes_with_would_block_reassemble_exactly() {
        for chunk in [1, 3, 7, 64, 1000] {
            let mut resp = Response::build(HttpCode::ForbiddenRequest, true, None).unwrap();
            let mut sink = Trickle::new(chunk, true);
            let mut rounds = 0;
            while resp.write_to(&mut sink).unwrap() == WriteProgress::Pending {
                rounds += 1;
                assert!(rounds < 10_000);
            }
            let expected = format!(
                "HTTP/1.1 403 Forbidden\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n{}",
                ERROR_403_FORM.len(),
                ERROR_403_FORM
            );
            assert_eq!(text(&sink.out), expected, "chunk {chunk}");
        }
    }

    fn mapped(name: &str, contents: &[u8]) -> Resource {
        let path = std::env::temp_dir().join(format!(
            "tinyserve-resp-{}-{name}",
            std::process::id()
        ));
        std::fs::write(&path, contents).unwrap();
        let file = std::fs::File::open(&path).unwrap();
        let body = MappedFile::map(&file, contents.len()).unwrap();
        std::fs::remove_file(&path).unwrap();
        Resource {
            size: contents.len() as u64,
            body: Some(body),
        }
    }

    #[test]
    fn file_segment_advances_past_header_across_partial_writes() {
        let contents: Vec<u8> = (0..5000u32).map(|i| (i % 251) as u8).collect();
        for chunk in [1, 5, 61, 200, 4096] {
            let resource = mapped(&format!("chunk{chunk}"), &contents);
            let mut resp = Response::build(HttpCode::FileRequest, true, Some(resource)).unwrap();
            let header_len = resp.header_len();
            assert_eq!(resp.file_len(), contents.len());

            let mut sink = Trickle::new(chunk, true);
            let mut rounds = 0;
            while resp.write_to(&mut sink).unwrap() == WriteProgress::Pending {
                rounds += 1;
                assert!(rounds < 100_000);
                let [head, file] = resp.segments();
                let sent = resp.bytes_sent();
                if sent < header_len {
                    assert_eq!(head.len(), header_len - sent);
                    assert_eq!(file.len(), contents.len());
                } else {
                    assert_eq!(head.len(), 0);
                    assert_eq!(&file[..], &contents[sent - header_len..]);
                }
            }

            assert!(resp.is_complete());
            assert_eq!(resp.remaining(), 0);
            let (head, body) = sink.out.split_at(header_len);
            assert_eq!(
                text(head),
                format!(
                    "HTTP/1.1 200 OK\r\nContent-Length: {}\r\nConnection: keep-alive\r\n\r\n",
                    contents.len()
                ),
                "chunk {chunk}"
            );
            assert_eq!(body, &contents[..], "chunk {chunk}");
        }
    }

    #[test]
    fn hard_error_is_propagated() {
        struct Broken;
        impl Write for Broken {
            fn write(&mut self, _: &[u8]) -> io::Result<usize> {
                Err(io::ErrorKind::BrokenPipe.into())
            }
            fn flush(&mut self) -> io::Result<()> {
                Ok(())
            }
        }
        let mut resp = Response::build(HttpCode::NoResource, false, None).unwrap();
        let err = resp.write_to(&mut Broken).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
        assert_eq!(resp.bytes_sent(), 0);
    }
}
