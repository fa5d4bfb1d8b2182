//! RESP Protocol Implementation
//!
//! Just enough of the Redis Serialization Protocol (RESP) for MuKV's command
//! set: decoding requests and encoding replies.
//!
//! ## Modules
//!
//! - `types`: The decoded [`Command`] and the [`RespValue`] reply type
//! - `parser`: Incremental request parser
//!
//! ## Example
//!
//! ```
//! use mukv::protocol::{RequestParser, RespValue};
//! use bytes::Bytes;
//!
//! let mut parser = RequestParser::new();
//! let (command, _) = parser.parse(b"GET name\r\n").unwrap().unwrap();
//! assert_eq!(command.name, "get");
//!
//! let reply = RespValue::bulk_string(Bytes::from("blue"));
//! assert_eq!(reply.serialize(), b"$4\r\nblue\r\n");
//! ```

pub mod parser;
pub mod types;

// Re-export commonly used types for convenience
pub use parser::{ParseError, ParseResult, RequestParser};
pub use types::{Command, RespValue};
