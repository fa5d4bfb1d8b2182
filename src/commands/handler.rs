//! Command Handler
//!
//! Maps decoded commands onto [`StorageEngine`] calls and turns the results
//! into RESP replies.
//!
//! ## Supported Commands
//!
//! - `PING` - replies `PONG`
//! - `QUIT` - replies `OK`, then the connection is closed
//! - `SET key value [EX seconds | PX milliseconds]` - store a value
//! - `GET key` - fetch a value, counting the hit
//! - `TTL key` - remaining lifetime in whole seconds, `0` without a TTL
//! - `TOUCH key` - reset the hit counter
//! - `DEL key` - remove a key, replies `1` or `0`
//!
//! Lookups of missing keys reply with a null bulk string, never an error.

use crate::protocol::{Command, RespValue};
use crate::storage::{StorageEngine, StoreError};
use bytes::Bytes;
use std::sync::Arc;

/// What the connection should do after a command ran.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outcome {
    /// Send the reply and keep reading.
    Reply(RespValue),
    /// Send the reply, then close the connection.
    Close(RespValue),
}

impl Outcome {
    /// The reply to send, regardless of what happens next.
    pub fn reply(&self) -> &RespValue {
        match self {
            Outcome::Reply(value) | Outcome::Close(value) => value,
        }
    }

    pub fn closes_connection(&self) -> bool {
        matches!(self, Outcome::Close(_))
    }
}

impl From<RespValue> for Outcome {
    fn from(value: RespValue) -> Self {
        Outcome::Reply(value)
    }
}

/// Handles client commands by dispatching them to the record store.
#[derive(Clone)]
pub struct CommandHandler {
    storage: Arc<StorageEngine>,
}

impl CommandHandler {
    pub fn new(storage: Arc<StorageEngine>) -> Self {
        Self { storage }
    }

    /// Executes a command and returns the reply.
    pub fn execute(&self, command: Command) -> Outcome {
        let args = &command.args;

        match command.name.as_str() {
            "ping" => self.cmd_ping(args).into(),
            "quit" => self.cmd_quit(args),
            "set" => self.cmd_set(args).into(),
            "get" => self.cmd_get(args).into(),
            "ttl" => self.cmd_ttl(args).into(),
            "touch" => self.cmd_touch(args).into(),
            "del" => self.cmd_del(args).into(),
            other => RespValue::error(format!("ERR unknown command '{}'", other)).into(),
        }
    }

    // ========================================================================
    // Helpers
    // ========================================================================

    fn wrong_arity(cmd: &str) -> RespValue {
        RespValue::error(format!(
            "ERR wrong number of arguments for '{}' command",
            cmd
        ))
    }

    /// Extracts a key. Keys are strings; invalid UTF-8 is replaced rather than
    /// rejected.
    fn key(arg: &Bytes) -> String {
        String::from_utf8_lossy(arg).into_owned()
    }

    /// Extracts a protocol word as text.
    fn text(arg: &Bytes) -> Option<&str> {
        std::str::from_utf8(arg).ok()
    }

    // ========================================================================
    // Commands
    // ========================================================================

    /// PING
    fn cmd_ping(&self, args: &[Bytes]) -> RespValue {
        if !args.is_empty() {
            return Self::wrong_arity("ping");
        }
        RespValue::pong()
    }

    /// QUIT
    fn cmd_quit(&self, args: &[Bytes]) -> Outcome {
        if !args.is_empty() {
            return Self::wrong_arity("quit").into();
        }
        Outcome::Close(RespValue::ok())
    }

    /// SET key value [EX seconds | PX milliseconds]
    fn cmd_set(&self, args: &[Bytes]) -> RespValue {
        let ttl_spec = match args.len() {
            2 => String::new(),
            4 => {
                let unit = match Self::text(&args[2]).map(str::to_ascii_uppercase).as_deref() {
                    Some("EX") => "s",
                    Some("PX") => "ms",
                    _ => return RespValue::error("ERR syntax error"),
                };
                let amount = match Self::text(&args[3]) {
                    Some(amount) => amount,
                    None => return RespValue::error("ERR syntax error"),
                };
                format!("{}{}", amount, unit)
            }
            _ => return Self::wrong_arity("set"),
        };

        let key = Self::key(&args[0]);
        match self.storage.write(key, args[1].clone(), &ttl_spec) {
            Ok(_) => RespValue::ok(),
            Err(e) => RespValue::error(format!("ERR {}", e)),
        }
    }

    /// GET key
    fn cmd_get(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 1 {
            return Self::wrong_arity("get");
        }

        let key = Self::key(&args[0]);
        match self.storage.read(&key) {
            Ok(value) => RespValue::bulk_string(value),
            Err(e) => Self::lookup_error(e),
        }
    }

    /// TTL key
    fn cmd_ttl(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 1 {
            return Self::wrong_arity("ttl");
        }

        match self.storage.time_to_expiry(&Self::key(&args[0])) {
            // Truncates toward zero, so overdue keys can report a negative value.
            Ok(seconds) => RespValue::integer(seconds.trunc() as i64),
            Err(e) => Self::lookup_error(e),
        }
    }

    /// TOUCH key
    fn cmd_touch(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 1 {
            return Self::wrong_arity("touch");
        }

        match self.storage.touch(&Self::key(&args[0])) {
            Ok(hits) => RespValue::integer(hits as i64),
            Err(e) => Self::lookup_error(e),
        }
    }

    /// DEL key
    fn cmd_del(&self, args: &[Bytes]) -> RespValue {
        if args.len() != 1 {
            return Self::wrong_arity("del");
        }

        let existed = self.storage.delete(&Self::key(&args[0]));
        RespValue::integer(i64::from(existed))
    }

    fn lookup_error(err: StoreError) -> RespValue {
        match err {
            StoreError::NotFound(_) => RespValue::null(),
            other => RespValue::error(format!("ERR {}", other)),
        }
    }
}
