//! Connection Handler Module
//!
//! One async task per client. The task reads bytes, decodes commands, runs
//! them through the [`CommandHandler`](crate::commands::CommandHandler) and
//! writes the replies back in order.
//!
//! ```text
//! TcpListener::accept()  (main.rs)
//!          │
//!          │ spawn task
//!          ▼
//! ┌───────────────────────────────────────────────────────┐
//! │                  ConnectionHandler                    │
//! │                                                       │
//! │  Read bytes ──> Parse request ──> Execute ──> Reply   │
//! │      ▲                                          │     │
//! │      └──────────────────────────────────────────┘     │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! Pipelined commands in one packet are all executed before the next read.

pub mod handler;

// Re-export commonly used types
pub use handler::{handle_connection, ConnectionError, ConnectionHandler, ConnectionStats};
