use std::net::{IpAddr, Ipv4Addr, SocketAddr};

use clap::Parser;

use crate::error::StartupError;
use crate::reader::DEFAULT_BUFFER_SIZE;

pub const DEFAULT_PORT: u16 = 8080;
pub const DEFAULT_WORKERS: usize = 4;

/// Command line / environment configuration.
#[derive(Debug, Clone, Parser)]
#[command(name = "pooled-http-server", version, about = "Minimal HTTP/1.x server backed by a fixed worker pool")]
pub struct Config {
    /// Address to listen on
    #[arg(long, env = "HTTP_HOST", default_value_t = IpAddr::V4(Ipv4Addr::UNSPECIFIED))]
    pub host: IpAddr,

    /// TCP port to listen on
    #[arg(short, long, env = "HTTP_PORT", default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// Number of worker tasks handling connections
    #[arg(short, long, env = "HTTP_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Per-connection read buffer size in bytes
    #[arg(long, env = "HTTP_BUFFER_SIZE", default_value_t = DEFAULT_BUFFER_SIZE)]
    pub buffer_size: usize,

    /// Log level used when RUST_LOG is not set
    #[arg(long, env = "HTTP_LOG_LEVEL", default_value = "info")]
    pub log_level: String,
}

impl Config {
    pub fn server_config(&self) -> ServerConfig {
        ServerConfig {
            addr: SocketAddr::new(self.host, self.port),
            workers: self.workers,
            buffer_size: self.buffer_size,
        }
    }
}

/// What the server itself needs to start.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
    pub workers: usize,
    pub buffer_size: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), DEFAULT_PORT),
            workers: DEFAULT_WORKERS,
            buffer_size: DEFAULT_BUFFER_SIZE,
        }
    }
}

impl ServerConfig {
    pub fn validate(&self) -> Result<(), StartupError> {
        if self.workers == 0 {
            return Err(StartupError::InvalidWorkerCount(self.workers));
        }
        if self.buffer_size == 0 {
            return Err(StartupError::InvalidBufferSize(self.buffer_size));
        }
        Ok(())
    }
}
