use std::net::SocketAddr;

use sha2::{Digest, Sha256};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::error::ConnectionError;
use crate::reader::BufferedReader;
use crate::request::HttpRequest;
use crate::response::{HttpResponse, HttpStatus, ResponseWriter};

/// An accepted connection. Whoever holds it is responsible for closing it.
#[derive(Debug)]
pub struct Connection {
    stream: TcpStream,
    peer: SocketAddr,
}

impl Connection {
    pub fn new(stream: TcpStream, peer: SocketAddr) -> Self {
        Self { stream, peer }
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Shuts the stream down and drops it.
    pub async fn close(mut self) {
        if let Err(e) = self.stream.shutdown().await {
            debug!(peer = %self.peer, error = %e, "shutdown on close failed");
        }
    }
}

/// Builds the reply for a decoded request: the request body echoed back,
/// tagged with its SHA-256 digest.
pub fn echo_response(request: &HttpRequest) -> HttpResponse {
    let digest = Sha256::digest(request.body());
    HttpResponse::new()
        .with_status(HttpStatus::OK)
        .with_body(request.body())
        .with_header("X-Content-SHA256", &format!("{:x}", digest))
}

/// Reads one request from `conn` and writes one response.
///
/// A request that fails to decode still gets a bare 500 if the peer is
/// listening; the decode error is what gets returned.
pub async fn serve<S: AsyncRead + AsyncWrite + Unpin>(
    conn: &mut S,
    buffer_size: usize,
) -> Result<HttpRequest, ConnectionError> {
    let decoded = {
        let mut reader = BufferedReader::with_capacity(conn, buffer_size);
        HttpRequest::parse_buffered(&mut reader).await
    };

    let mut writer = ResponseWriter::from(conn);
    match decoded {
        Ok(request) => {
            debug!(
                request = %request.request_line(),
                headers = %request.headers(),
                body_len = request.body().len(),
                "decoded request"
            );
            writer
                .write_all(&echo_response(&request))
                .await
                .map_err(ConnectionError::Send)?;
            Ok(request)
        }
        Err(e) => {
            let response = HttpResponse::new().with_status(HttpStatus::INTERNAL_SERVER_ERROR);
            if let Err(send) = writer.write_all(&response).await {
                debug!(error = %send, "could not deliver error response");
            }
            Err(e.into())
        }
    }
}

/// Worker entry point for one dequeued connection. The connection is closed
/// on every path.
pub async fn handle_connection(worker: usize, mut conn: Connection, buffer_size: usize) {
    let peer = conn.peer;
    debug!(worker, %peer, "handling connection");

    match serve(&mut conn.stream, buffer_size).await {
        Ok(request) => debug!(worker, %peer, "{} -> 200", request.request_line()),
        Err(ConnectionError::Decode(e)) => warn!(worker, %peer, error = %e, "bad request"),
        Err(ConnectionError::Send(e)) => warn!(worker, %peer, error = %e, "failed to send response"),
    }

    conn.close().await;
    debug!(worker, %peer, "connection closed");
}
