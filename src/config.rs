//! # Server Configuration
//!
//! Command-line options for the `mukv` binary.

use crate::{DEFAULT_HOST, DEFAULT_PORT};
use clap::Parser;

#[derive(Debug, Clone, Parser)]
#[command(name = "mukv")]
#[command(author, version, about, long_about = None)]
pub struct ServerConfig {
    /// The port to listen on
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The host to bind to
    #[arg(short = 'H', long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// Log filter used when RUST_LOG is not set
    #[arg(long, default_value = "info")]
    pub log_level: String,
}

impl ServerConfig {
    /// Returns the bind address as `host:port`.
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
