//! # MuKV - An In-Memory Key-Value Store with Per-Key TTL
//!
//! MuKV keeps byte values under string keys, each with a metadata record that
//! tracks when it was written, how long it may live and how often it was read.
//! Clients talk to it over TCP using a subset of RESP, so `redis-cli` works.
//!
//! ## Architecture
//!
//! ```text
//! ┌───────────────────────────────────────────────────────────────────┐
//! │                               MuKV                                │
//! │                                                                   │
//! │  ┌─────────────┐    ┌─────────────┐    ┌─────────────┐            │
//! │  │ TCP Server  │───>│ Connection  │───>│  Command    │            │
//! │  │ (Listener)  │    │  Handler    │    │  Handler    │            │
//! │  └─────────────┘    └─────────────┘    └──────┬──────┘            │
//! │                                               │                   │
//! │                                               ▼                   │
//! │  ┌─────────────┐    ┌────────────────────────────────────────┐    │
//! │  │  Request    │    │             StorageEngine              │    │
//! │  │  Parser     │    │  RwLock { values, records }            │    │
//! │  └─────────────┘    │  ExpiryQueue (min-heap of tickets)     │    │
//! │                     └────────────────────────────────────────┘    │
//! │                                               ▲                   │
//! │                     ┌─────────────────────────┴─────────────┐     │
//! │                     │           ExpiryScheduler             │     │
//! │                     │       (Background Tokio Task)         │     │
//! │                     └───────────────────────────────────────┘     │
//! └───────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```ignore
//! use mukv::storage::{StorageEngine, start_expiry_scheduler};
//! use mukv::commands::CommandHandler;
//! use mukv::connection::{handle_connection, ConnectionStats};
//! use std::sync::Arc;
//! use tokio::net::TcpListener;
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let storage = Arc::new(StorageEngine::new());
//!     let _scheduler = start_expiry_scheduler(Arc::clone(&storage));
//!     let stats = Arc::new(ConnectionStats::new());
//!
//!     let listener = TcpListener::bind("127.0.0.1:6480").await?;
//!     loop {
//!         let (stream, addr) = listener.accept().await?;
//!         let handler = CommandHandler::new(Arc::clone(&storage));
//!         tokio::spawn(handle_connection(stream, addr, handler, Arc::clone(&stats)));
//!     }
//! }
//! ```
//!
//! ## Supported Commands
//!
//! - `PING`, `QUIT`
//! - `SET key value [EX seconds | PX milliseconds]`
//! - `GET key`, `TTL key`, `TOUCH key`, `DEL key`
//!
//! ## Module Overview
//!
//! - [`protocol`]: request parser and reply encoding
//! - [`storage`]: the record store, TTL parsing and the expiry scheduler
//! - [`commands`]: maps commands onto the store
//! - [`connection`]: per-client read/execute/reply loop
//! - [`config`]: command-line options
//!
//! ## Expiry
//!
//! Expiry is active only. Every write with a TTL queues a ticket; the
//! scheduler removes the key once the ticket comes due, unless the key was
//! deleted or rewritten in the meantime. Reads never check deadlines, so an
//! overdue key stays readable until the scheduler gets to it.

pub mod commands;
pub mod config;
pub mod connection;
pub mod protocol;
pub mod storage;

// Re-export commonly used types for convenience
pub use commands::{CommandHandler, Outcome};
pub use config::ServerConfig;
pub use connection::{handle_connection, ConnectionStats};
pub use protocol::{Command, ParseError, RequestParser, RespValue};
pub use storage::{
    parse_ttl, start_expiry_scheduler, ExpiryConfig, ExpiryScheduler, StorageEngine, StoreError,
};

/// The default port MuKV listens on
pub const DEFAULT_PORT: u16 = 6480;

/// The default host MuKV binds to
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Version of MuKV
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
