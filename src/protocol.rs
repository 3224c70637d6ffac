//! HTTP/1.1 request parsing as two nested state machines over one append-only
//! read buffer.
//!
//! The line sub-machine ([`parse_line`]) finds the next `\r\n` starting at a
//! cursor. The main machine ([`RequestParser`]) walks request line, headers
//! and body. Neither mutates the buffer; the parser only records offsets, so
//! feeding the same bytes in any number of fragments yields the same result.

use std::ops::Range;

use tracing::debug;

use crate::config::MAX_REQUEST_BYTES;

/// Target served when the request asks for `/`.
pub const LANDING_PAGE: &str = "/judge.html";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

impl Method {
    pub fn as_str(self) -> &'static str {
        match self {
            Method::Get => "GET",
            Method::Post => "POST",
        }
    }
}

/// Main machine state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CheckState {
    RequestLine,
    Header,
    Content,
}

/// Line sub-machine result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LineStatus {
    /// A full line was found; the cursor now sits past its terminator.
    Ok,
    /// Malformed terminator.
    Bad,
    /// Need more bytes.
    Open,
}

/// Outcome of parsing and resolving a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpCode {
    NoRequest,
    GetRequest,
    BadRequest,
    NoResource,
    ForbiddenRequest,
    FileRequest,
    InternalError,
}

/// Scan `buf` from `*cursor` for the next line terminator.
///
/// On [`LineStatus::Ok`] the terminator occupies `*cursor - 2..*cursor`. On
/// [`LineStatus::Open`] the cursor is left on an unterminated trailing `\r` (or
/// at the end of the buffer) so the next call resumes there.
pub fn parse_line(buf: &[u8], cursor: &mut usize) -> LineStatus {
    while *cursor < buf.len() {
        match buf[*cursor] {
            b'\r' => {
                if *cursor + 1 == buf.len() {
                    return LineStatus::Open;
                }
                if buf[*cursor + 1] == b'\n' {
                    *cursor += 2;
                    return LineStatus::Ok;
                }
                return LineStatus::Bad;
            }
            b'\n' => {
                if *cursor > 0 && buf[*cursor - 1] == b'\r' {
                    *cursor += 1;
                    return LineStatus::Ok;
                }
                return LineStatus::Bad;
            }
            _ => *cursor += 1,
        }
    }
    LineStatus::Open
}

fn is_blank(c: char) -> bool {
    c == ' ' || c == '\t'
}

fn strip_prefix_ignore_case<'a>(s: &'a str, prefix: &str) -> Option<&'a str> {
    let head = s.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &s[prefix.len()..])
}

/// Incremental request parser. Call [`RequestParser::advance`] with the whole
/// buffer every time new bytes have been appended to it.
#[derive(Debug)]
pub struct RequestParser {
    state: CheckState,
    cursor: usize,
    line_start: usize,
    method: Method,
    target: String,
    host: Option<String>,
    content_length: usize,
    keep_alive: bool,
    body: Option<Range<usize>>,
}

impl Default for RequestParser {
    fn default() -> Self {
        Self::new()
    }
}

impl RequestParser {
    pub fn new() -> Self {
        Self {
            state: CheckState::RequestLine,
            cursor: 0,
            line_start: 0,
            method: Method::Get,
            target: String::new(),
            host: None,
            content_length: 0,
            keep_alive: false,
            body: None,
        }
    }

    pub fn reset(&mut self) {
        *self = Self::new();
    }

    pub fn state(&self) -> CheckState {
        self.state
    }

    pub fn method(&self) -> Method {
        self.method
    }

    /// Normalized absolute target.
    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn host(&self) -> Option<&str> {
        self.host.as_deref()
    }

    pub fn content_length(&self) -> usize {
        self.content_length
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Request body, bounded to `Content-Length`, once the request is complete.
    pub fn body<'a>(&self, buf: &'a [u8]) -> Option<&'a [u8]> {
        self.body.clone().map(|r| &buf[r])
    }

    /// Drive the machine over `buf`. Returns [`HttpCode::NoRequest`] while more
    /// bytes are needed, [`HttpCode::GetRequest`] once a full request is parsed
    /// and [`HttpCode::BadRequest`] on any syntax violation.
    pub fn advance(&mut self, buf: &[u8]) -> HttpCode {
        if self.body.is_some() {
            return HttpCode::GetRequest;
        }
        loop {
            if self.state == CheckState::Content {
                return self.parse_content(buf);
            }
            match parse_line(buf, &mut self.cursor) {
                LineStatus::Open => return HttpCode::NoRequest,
                LineStatus::Bad => return HttpCode::BadRequest,
                LineStatus::Ok => {}
            }
            let line = &buf[self.line_start..self.cursor - 2];
            self.line_start = self.cursor;

            let Ok(text) = std::str::from_utf8(line) else {
                return HttpCode::BadRequest;
            };
            debug!(line = text, "parsed line");

            let code = match self.state {
                CheckState::RequestLine => self.parse_request_line(text),
                CheckState::Header => self.parse_header(text),
                CheckState::Content => unreachable!("content handled above"),
            };
            match code {
                HttpCode::NoRequest => {}
                HttpCode::GetRequest => {
                    self.body = Some(self.cursor..self.cursor);
                    return code;
                }
                other => return other,
            }
        }
    }

    fn parse_request_line(&mut self, text: &str) -> HttpCode {
        let Some((method, rest)) = text.split_once(is_blank) else {
            return HttpCode::BadRequest;
        };
        self.method = if method.eq_ignore_ascii_case("GET") {
            Method::Get
        } else if method.eq_ignore_ascii_case("POST") {
            Method::Post
        } else {
            return HttpCode::BadRequest;
        };

        let rest = rest.trim_start_matches(is_blank);
        let Some((target, version)) = rest.split_once(is_blank) else {
            return HttpCode::BadRequest;
        };
        if version.trim_start_matches(is_blank) != "HTTP/1.1" {
            return HttpCode::BadRequest;
        }

        let mut target = target;
        for scheme in ["http://", "https://"] {
            if let Some(authority) = strip_prefix_ignore_case(target, scheme) {
                let Some(slash) = authority.find('/') else {
                    return HttpCode::BadRequest;
                };
                target = &authority[slash..];
            }
        }
        if !target.starts_with('/') {
            return HttpCode::BadRequest;
        }

        self.target = if target == "/" {
            LANDING_PAGE.to_string()
        } else {
            target.to_string()
        };
        self.state = CheckState::Header;
        HttpCode::NoRequest
    }

    fn parse_header(&mut self, text: &str) -> HttpCode {
        if text.is_empty() {
            if self.content_length > 0 {
                self.state = CheckState::Content;
                return HttpCode::NoRequest;
            }
            return HttpCode::GetRequest;
        }

        if let Some(value) = strip_prefix_ignore_case(text, "Connection:") {
            if value.trim_matches(is_blank).eq_ignore_ascii_case("keep-alive") {
                self.keep_alive = true;
            }
        } else if let Some(value) = strip_prefix_ignore_case(text, "Content-Length:") {
            match value.trim_matches(is_blank).parse::<usize>() {
                // A body that cannot fit the read buffer would never complete.
                Ok(n) if n <= MAX_REQUEST_BYTES => self.content_length = n,
                _ => return HttpCode::BadRequest,
            }
        } else if let Some(value) = strip_prefix_ignore_case(text, "Host:") {
            self.host = Some(value.trim_matches(is_blank).to_string());
        } else {
            debug!(header = text, "unknown header");
        }
        HttpCode::NoRequest
    }

    fn parse_content(&mut self, buf: &[u8]) -> HttpCode {
        let Some(end) = self.cursor.checked_add(self.content_length) else {
            return HttpCode::BadRequest;
        };
        if buf.len() >= end {
            self.body = Some(self.cursor..end);
            return HttpCode::GetRequest;
        }
        HttpCode::NoRequest
    }
}
