//! Storage Module
//!
//! The record store and the background expiry scheduler.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     StorageEngine                           │
//! │   RwLock { values: key -> Bytes, records: key -> Record }   │
//! │   ExpiryQueue (tickets ordered by deadline)                 │
//! └─────────────────────────────────────────────────────────────┘
//!                            ▲
//!                            │ resolve(ticket)
//!              ┌─────────────┴─────────────┐
//!              │     ExpiryScheduler       │
//!              │  (Background Tokio Task)  │
//!              └───────────────────────────┘
//! ```
//!
//! ## Example
//!
//! ```
//! use mukv::storage::StorageEngine;
//! use bytes::Bytes;
//!
//! let engine = StorageEngine::new();
//!
//! engine.write("name", Bytes::from("blue"), "").unwrap();
//! assert_eq!(engine.read("name").unwrap(), Bytes::from("blue"));
//!
//! // Expires in an hour once a scheduler is running
//! engine.write("session", Bytes::from("token123"), "3600s").unwrap();
//! assert!(engine.delete("session"));
//! ```

pub mod engine;
pub mod error;
pub mod expiry;
pub mod record;
pub mod ttl;

// Re-export commonly used types
pub use engine::{StorageEngine, StorageStats};
pub use error::{StoreError, StoreResult};
pub use expiry::{
    start_expiry_scheduler, AbandonReason, ExpiryConfig, ExpiryQueue, ExpiryScheduler, Resolution,
};
pub use record::{Record, Ticket};
pub use ttl::parse_ttl;
