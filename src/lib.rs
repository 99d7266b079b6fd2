pub mod config;
pub mod error;
pub mod headers;
pub mod queue;
pub mod reader;
pub mod request;
pub mod response;
pub mod server;
pub mod worker;
