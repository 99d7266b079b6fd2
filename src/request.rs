use core::fmt;

use tokio::io::AsyncRead;

use crate::error::DecodeError;
use crate::headers::Headers;
use crate::reader::BufferedReader;

const HEAD_TERMINATOR: &[u8] = b"\r\n\r\n";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    method: String,
    target: String,
    version: String,
}

impl fmt::Display for RequestLine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} {} {}", self.method, self.target, self.version)
    }
}

impl RequestLine {
    pub fn parse(line: &str) -> Result<Self, DecodeError> {
        let mut parts = line.split_whitespace();
        let (Some(method), Some(target), Some(version), None) =
            (parts.next(), parts.next(), parts.next(), parts.next())
        else {
            return Err(DecodeError::MalformedStartLine);
        };
        if !version.starts_with("HTTP/") {
            return Err(DecodeError::MalformedStartLine);
        }

        Ok(Self {
            method: method.to_string(),
            target: target.to_string(),
            version: version.to_string(),
        })
    }
}

/// How the body of a request is delimited on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BodyFraming {
    Chunked,
    Length(usize),
    Empty,
}

impl BodyFraming {
    /// Transfer-Encoding decides alone when present: chunked, or no body at
    /// all. Content-Length is only consulted without it.
    pub fn from_headers(headers: &Headers) -> Result<Self, DecodeError> {
        if let Some(te) = headers.get("transfer-encoding") {
            let last = te.rsplit(',').next().unwrap_or_default().trim();
            if last.eq_ignore_ascii_case("chunked") {
                return Ok(Self::Chunked);
            }
            return Ok(Self::Empty);
        }
        match headers.get("content-length") {
            Some(raw) => raw
                .parse::<usize>()
                .map(Self::Length)
                .map_err(|_| DecodeError::InvalidContentLength(raw.to_string())),
            None => Ok(Self::Empty),
        }
    }
}

/// One decoded request. Built once per connection and never mutated.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    request_line: RequestLine,
    headers: Headers,
    body: Vec<u8>,
}

impl HttpRequest {
    pub async fn parse_from<R: AsyncRead + Unpin>(conn: &mut R) -> Result<Self, DecodeError> {
        let mut reader = BufferedReader::new(conn);
        Self::parse_buffered(&mut reader).await
    }

    pub async fn parse_buffered<R: AsyncRead + Unpin>(
        reader: &mut BufferedReader<'_, R>,
    ) -> Result<Self, DecodeError> {
        let head = reader.read_until(HEAD_TERMINATOR).await?;
        let head = String::from_utf8_lossy(&head);

        let Some((start_line, rest)) = head.split_once("\r\n") else {
            return Err(DecodeError::MalformedStartLine);
        };
        let request_line = RequestLine::parse(start_line)?;
        if !head.ends_with("\r\n\r\n") {
            return Err(DecodeError::UnterminatedHeaders);
        }
        let headers = Headers::parse_lines(rest);

        let body = match BodyFraming::from_headers(&headers)? {
            BodyFraming::Chunked => reader.read_chunked().await?,
            BodyFraming::Length(len) => reader.read_fixed(len).await?,
            BodyFraming::Empty => Vec::new(),
        };

        Ok(Self {
            request_line,
            headers,
            body,
        })
    }

    pub fn method(&self) -> &str {
        &self.request_line.method
    }

    pub fn target(&self) -> &str {
        &self.request_line.target
    }

    pub fn version(&self) -> &str {
        &self.request_line.version
    }

    pub fn request_line(&self) -> &RequestLine {
        &self.request_line
    }

    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn body(&self) -> &[u8] {
        &self.body
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use tokio_test::io::Builder;

    async fn parse(data: &[u8]) -> Result<HttpRequest, DecodeError> {
        let mut reader = std::io::Cursor::new(data.to_vec());
        HttpRequest::parse_from(&mut reader).await
    }

    #[test]
    fn request_line_basics() {
        let rl = RequestLine::parse("GET /coffee HTTP/1.1").unwrap();
        assert_eq!(rl.method, "GET");
        assert_eq!(rl.target, "/coffee");
        assert_eq!(rl.version, "HTTP/1.1");
        assert_eq!(rl.to_string(), "GET /coffee HTTP/1.1");

        let bad = [
            "/coffee HTTP/1.1",             // no method
            "GET POST /coffee HTTP/1.1",    // too many elements
            "GET /coffee SPDY/3",           // not http
            "",
        ];
        for line in bad {
            assert!(matches!(RequestLine::parse(line), Err(DecodeError::MalformedStartLine)), "{line:?}");
        }
    }

    #[tokio::test]
    async fn parse_with_headers() {
        let request = parse(b"GET / HTTP/1.1\r\nHost: localhost:42069\r\nUser-Agent: curl/7.81.0\r\nAccept: */*\r\n\r\n")
            .await
            .unwrap();
        assert_eq!(request.method(), "GET");
        assert_eq!(request.target(), "/");
        assert_eq!(request.version(), "HTTP/1.1");
        assert_eq!(request.header("Host"), Some("localhost:42069"));
        assert_eq!(request.headers().len(), 3);
        assert!(request.body().is_empty());
    }

    #[tokio::test]
    async fn parse_without_headers() {
        let request = parse(b"GET /coffee HTTP/1.0\r\n\r\n").await.unwrap();
        assert_eq!(request.target(), "/coffee");
        assert_eq!(request.version(), "HTTP/1.0");
        assert!(request.headers().is_empty());
    }

    #[tokio::test]
    async fn parse_content_length_body() {
        let request = parse(b"POST /echo HTTP/1.1\r\nContent-Length: 11\r\n\r\nhello world").await.unwrap();
        assert_eq!(request.body(), b"hello world");
    }

    #[tokio::test]
    async fn content_length_key_is_case_insensitive() {
        let upper = parse(b"POST / HTTP/1.1\r\nContent-Length: 5\r\n\r\nabcde").await.unwrap();
        let lower = parse(b"POST / HTTP/1.1\r\ncontent-length: 5\r\n\r\nabcde").await.unwrap();
        assert_eq!(
            BodyFraming::from_headers(upper.headers()).unwrap(),
            BodyFraming::from_headers(lower.headers()).unwrap(),
        );
        assert_eq!(upper.body(), lower.body());
    }

    #[tokio::test]
    async fn parse_chunked_body() {
        let mut conn = Builder::new()
            .read(b"POST /upload HTTP/1.1\r\nTransfer-Encoding: chunked\r\n\r\n")
            .read(b"5\r\nhello\r\n")
            .read(b"6\r\n world\r\n0\r\n\r\n")
            .build();
        let request = HttpRequest::parse_from(&mut conn).await.unwrap();
        assert_eq!(request.body(), b"hello world");
    }

    #[tokio::test]
    async fn chunked_wins_over_content_length() {
        let request = parse(
            b"POST / HTTP/1.1\r\nContent-Length: 100\r\nTransfer-Encoding: Chunked\r\n\r\n3\r\nabc\r\n0\r\n\r\n",
        )
        .await
        .unwrap();
        assert_eq!(request.body(), b"abc");
    }

    #[tokio::test]
    async fn unknown_transfer_encoding_ignores_content_length() {
        let request = parse(
            b"POST / HTTP/1.1\r\nTransfer-Encoding: gzip\r\nContent-Length: 5\r\n\r\nabcde",
        )
        .await
        .unwrap();
        assert_eq!(BodyFraming::from_headers(request.headers()).unwrap(), BodyFraming::Empty);
        assert!(request.body().is_empty());
    }

    #[tokio::test]
    async fn body_ignored_without_framing_headers() {
        let request = parse(b"POST / HTTP/1.1\r\nHost: x\r\n\r\nstray bytes").await.unwrap();
        assert!(request.body().is_empty());
    }

    #[tokio::test]
    async fn no_crlf_is_malformed_start_line() {
        assert!(matches!(parse(b"GET / HTTP/1.1").await, Err(DecodeError::MalformedStartLine)));
        assert!(matches!(parse(b"").await, Err(DecodeError::MalformedStartLine)));
    }

    #[tokio::test]
    async fn truncated_head_is_rejected() {
        let result = parse(b"GET / HTTP/1.1\r\nHost: x\r\n").await;
        assert!(matches!(result, Err(DecodeError::UnterminatedHeaders)));
    }

    #[tokio::test]
    async fn bad_content_length() {
        let result = parse(b"POST / HTTP/1.1\r\nContent-Length: -3\r\n\r\n").await;
        assert!(matches!(result, Err(DecodeError::InvalidContentLength(ref v)) if v == "-3"));
    }

    #[tokio::test]
    async fn body_shorter_than_content_length() {
        let result = parse(b"POST / HTTP/1.1\r\nContent-Length: 10\r\n\r\nabc").await;
        assert!(matches!(result, Err(DecodeError::ShortRead { expected: 10, received: 3 })));
    }

    #[tokio::test]
    async fn parse_head_split_across_reads() {
        let mut conn = Builder::new()
            .read(b"PUT /x HTTP/1.1\r\nContent-Le")
            .read(b"ngth: 4\r\n\r")
            .read(b"\nda")
            .read(b"ta")
            .build();
        let mut reader = BufferedReader::with_capacity(&mut conn, 8);
        let request = HttpRequest::parse_buffered(&mut reader).await.unwrap();
        assert_eq!(request.method(), "PUT");
        assert_eq!(request.body(), b"data");
    }
}
