use std::io;
use std::net::SocketAddr;

use thiserror::Error;

/// Failures that abort the process before it serves anything.
#[derive(Debug, Error)]
pub enum StartupError {
    #[error("worker pool size must be at least 1 (got {0})")]
    InvalidWorkerCount(usize),

    #[error("read buffer size must be at least 1 byte (got {0})")]
    InvalidBufferSize(usize),

    #[error("socket creation failed: {0}")]
    Socket(#[source] io::Error),

    #[error("setting SO_REUSEADDR failed: {0}")]
    ReuseAddr(#[source] io::Error),

    #[error("bind failed on {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    #[error("listen failed: {0}")]
    Listen(#[source] io::Error),
}

/// Failures while reading one request off a connection.
#[derive(Debug, Error)]
pub enum DecodeError {
    #[error("malformed start line")]
    MalformedStartLine,

    #[error("header block ended before the blank line")]
    UnterminatedHeaders,

    #[error("invalid chunk size: {0:?}")]
    InvalidChunkSize(String),

    #[error("invalid content-length: {0:?}")]
    InvalidContentLength(String),

    #[error("short read: expected {expected} bytes, received {received}")]
    ShortRead { expected: usize, received: usize },

    #[error("unexpected end of stream")]
    UnexpectedEof,

    #[error("read error: {0}")]
    Io(#[from] io::Error),
}

/// Failures scoped to a single connection. None of these ever stop a worker.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("decode failed: {0}")]
    Decode(#[from] DecodeError),

    #[error("send failed: {0}")]
    Send(#[source] io::Error),
}
