//! Connection Handler
//!
//! Each client gets its own handler task that runs in a loop, reading commands
//! and sending replies.
//!
//! ## Connection Lifecycle
//!
//! ```text
//! 1. Client connects
//!        │
//!        ▼
//! 2. ┌──────────────────────────────┐
//!    │  Read bytes into buffer      │◄─┐
//!    │  Parse every full command    │  │
//!    │  Execute, send each reply    │──┘
//!    └──────────────────────────────┘
//!        │
//!        ▼
//! 3. QUIT, client disconnect, or protocol error
//!        │
//!        ▼
//! 4. Handler task ends
//! ```
//!
//! TCP is a stream protocol: one read may hold half a command, or several
//! pipelined ones. Incoming bytes accumulate in a `BytesMut` until the parser
//! can take a full command off the front.

use crate::commands::CommandHandler;
use crate::protocol::parser::MAX_BULK_SIZE;
use crate::protocol::types::prefix;
use crate::protocol::{Command, ParseError, RequestParser, RespValue};
use bytes::{Buf, BytesMut};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt, BufWriter};
use tracing::{debug, error, info, trace, warn};

/// Maximum size for the read buffer while an inline command is pending (64 KB)
const MAX_BUFFER_SIZE: usize = 64 * 1024;

/// Maximum size for the read buffer while a RESP array is pending: one bulk
/// string of the largest allowed size, plus room for headers and short words.
const MAX_REQUEST_SIZE: usize = MAX_BULK_SIZE + MAX_BUFFER_SIZE;

/// Initial buffer capacity
const INITIAL_BUFFER_SIZE: usize = 4096;

/// Statistics for connection handling
#[derive(Debug, Default)]
pub struct ConnectionStats {
    /// Total number of connections accepted
    pub connections_accepted: AtomicU64,
    /// Currently active connections
    pub active_connections: AtomicU64,
    /// Total commands processed
    pub commands_processed: AtomicU64,
    /// Total bytes read
    pub bytes_read: AtomicU64,
    /// Total bytes written
    pub bytes_written: AtomicU64,
}

impl ConnectionStats {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn connection_opened(&self) {
        self.connections_accepted.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn connection_closed(&self) {
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn command_processed(&self) {
        self.commands_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn bytes_read(&self, count: usize) {
        self.bytes_read.fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn bytes_written(&self, count: usize) {
        self.bytes_written.fetch_add(count as u64, Ordering::Relaxed);
    }
}

/// Handles a single client connection.
///
/// Generic over the transport so it can run on a `TcpStream` or on any other
/// duplex byte stream.
pub struct ConnectionHandler<S> {
    stream: BufWriter<S>,

    /// Client's address (for logging)
    addr: SocketAddr,

    /// Bytes received but not yet parsed
    buffer: BytesMut,

    command_handler: CommandHandler,

    parser: RequestParser,

    /// Connection statistics (shared)
    stats: Arc<ConnectionStats>,
}

impl<S> ConnectionHandler<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        addr: SocketAddr,
        command_handler: CommandHandler,
        stats: Arc<ConnectionStats>,
    ) -> Self {
        stats.connection_opened();

        Self {
            stream: BufWriter::new(stream),
            addr,
            buffer: BytesMut::with_capacity(INITIAL_BUFFER_SIZE),
            command_handler,
            parser: RequestParser::new(),
            stats,
        }
    }

    /// Runs the connection until the client quits, disconnects, or sends
    /// something that is not RESP.
    pub async fn run(mut self) -> Result<(), ConnectionError> {
        info!(client = %self.addr, "Client connected");

        let result = self.main_loop().await;

        match &result {
            Ok(()) => info!(client = %self.addr, "Client disconnected gracefully"),
            Err(e) => match e {
                ConnectionError::ClientDisconnected => {
                    debug!(client = %self.addr, "Client disconnected")
                }
                ConnectionError::IoError(io_err)
                    if io_err.kind() == std::io::ErrorKind::ConnectionReset =>
                {
                    debug!(client = %self.addr, "Connection reset by client")
                }
                _ => warn!(client = %self.addr, error = %e, "Connection error"),
            },
        }

        self.stats.connection_closed();
        result
    }

    /// The main read-execute-respond loop.
    async fn main_loop(&mut self) -> Result<(), ConnectionError> {
        loop {
            while let Some(command) = self.try_parse_command().await? {
                trace!(client = %self.addr, command = %command.name, "Executing command");

                let outcome = self.command_handler.execute(command);
                self.stats.command_processed();
                self.send_response(outcome.reply()).await?;

                if outcome.closes_connection() {
                    self.close().await;
                    return Ok(());
                }
            }

            self.read_more_data().await?;
        }
    }

    /// Attempts to parse a command from the buffer.
    ///
    /// On a protocol error the client is told why before the error is returned.
    async fn try_parse_command(&mut self) -> Result<Option<Command>, ConnectionError> {
        if self.buffer.is_empty() {
            return Ok(None);
        }

        match self.parser.parse(&self.buffer) {
            Ok(Some((command, consumed))) => {
                self.buffer.advance(consumed);
                trace!(
                    client = %self.addr,
                    consumed = consumed,
                    remaining = self.buffer.len(),
                    "Parsed command"
                );
                Ok(Some(command))
            }
            Ok(None) => {
                trace!(
                    client = %self.addr,
                    buffered = self.buffer.len(),
                    "Incomplete command, need more data"
                );
                Ok(None)
            }
            Err(e) => {
                warn!(client = %self.addr, error = %e, "Parse error");
                let reply = RespValue::error(format!("ERR Protocol error: {}", e));
                self.send_response(&reply).await?;
                Err(ConnectionError::ParseError(e))
            }
        }
    }

    /// How far the buffer may grow before the pending request is refused.
    ///
    /// Array requests carry length-prefixed values, which the parser already
    /// bounds, so they may grow far past the limit for inline lines.
    fn buffer_limit(&self) -> usize {
        match self.buffer.first() {
            Some(&prefix::ARRAY) => MAX_REQUEST_SIZE,
            _ => MAX_BUFFER_SIZE,
        }
    }

    /// Reads more data from the socket into the buffer.
    async fn read_more_data(&mut self) -> Result<(), ConnectionError> {
        if self.buffer.len() >= self.buffer_limit() {
            error!(
                client = %self.addr,
                size = self.buffer.len(),
                "Buffer size limit exceeded"
            );
            self.send_response(&RespValue::error("ERR request too large"))
                .await?;
            return Err(ConnectionError::BufferFull);
        }

        if self.buffer.capacity() - self.buffer.len() < 1024 {
            self.buffer.reserve(INITIAL_BUFFER_SIZE);
        }

        let n = self.stream.get_mut().read_buf(&mut self.buffer).await?;

        if n == 0 {
            return if self.buffer.is_empty() {
                Err(ConnectionError::ClientDisconnected)
            } else {
                Err(ConnectionError::UnexpectedEof)
            };
        }

        self.stats.bytes_read(n);
        trace!(client = %self.addr, bytes = n, "Read data");

        Ok(())
    }

    /// Sends a response to the client.
    async fn send_response(&mut self, response: &RespValue) -> Result<(), ConnectionError> {
        let bytes = response.serialize();
        self.stream.write_all(&bytes).await?;
        self.stream.flush().await?;
        self.stats.bytes_written(bytes.len());
        trace!(client = %self.addr, bytes = bytes.len(), "Sent response");
        Ok(())
    }

    /// Shuts down the write half after `QUIT`.
    ///
    /// A failure here only concerns this client, so it is logged and dropped.
    async fn close(&mut self) {
        if let Err(e) = self.stream.shutdown().await {
            warn!(client = %self.addr, error = %e, "Failed to close connection");
        }
    }
}

/// Errors that can occur while handling a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    /// I/O error (network issue)
    #[error("I/O error: {0}")]
    IoError(#[from] std::io::Error),

    /// RESP parse error
    #[error("Parse error: {0}")]
    ParseError(#[from] ParseError),

    /// Client disconnected normally
    #[error("Client disconnected")]
    ClientDisconnected,

    /// Unexpected end of stream (partial command)
    #[error("Unexpected end of stream")]
    UnexpectedEof,

    /// Buffer size limit exceeded
    #[error("Buffer size limit exceeded")]
    BufferFull,
}

/// Handles a client connection to completion.
///
/// Ordinary disconnects are not reported; anything else is logged at debug
/// level since [`ConnectionHandler::run`] already warned about it.
pub async fn handle_connection<S>(
    stream: S,
    addr: SocketAddr,
    command_handler: CommandHandler,
    stats: Arc<ConnectionStats>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let handler = ConnectionHandler::new(stream, addr, command_handler, stats);
    if let Err(e) = handler.run().await {
        match e {
            ConnectionError::ClientDisconnected => {}
            ConnectionError::IoError(ref io_err)
                if io_err.kind() == std::io::ErrorKind::ConnectionReset => {}
            _ => {
                debug!(client = %addr, error = %e, "Connection ended with error");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::{start_expiry_scheduler, StorageEngine};
    use std::time::Duration;
    use tokio::net::{TcpListener, TcpStream};
    use tokio_test::io::Builder;

    fn test_addr() -> SocketAddr {
        "127.0.0.1:50000".parse().unwrap()
    }

    fn mock_handler(
        mock: tokio_test::io::Mock,
    ) -> (
        ConnectionHandler<tokio_test::io::Mock>,
        Arc<StorageEngine>,
        Arc<ConnectionStats>,
    ) {
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());
        let handler = ConnectionHandler::new(
            mock,
            test_addr(),
            CommandHandler::new(Arc::clone(&storage)),
            Arc::clone(&stats),
        );
        (handler, storage, stats)
    }

    #[tokio::test]
    async fn test_ping_pong() {
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nPING\r\n")
            .write(b"+PONG\r\n")
            .build();
        let (handler, _, _) = mock_handler(mock);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ClientDisconnected)
        ));
    }

    #[tokio::test]
    async fn test_command_split_across_reads() {
        let mock = Builder::new()
            .read(b"*3\r\n$3\r\nSET\r\n$4\r\nna")
            .read(b"me\r\n$4\r\nblue\r\n")
            .write(b"+OK\r\n")
            .build();
        let (handler, storage, _) = mock_handler(mock);

        let _ = handler.run().await;
        assert_eq!(storage.read("name").unwrap(), bytes::Bytes::from("blue"));
    }

    #[tokio::test]
    async fn test_pipelined_commands() {
        let mock = Builder::new()
            .read(b"SET k v\r\nGET k\r\nTOUCH k\r\nDEL k\r\nGET k\r\n")
            .write(b"+OK\r\n")
            .write(b"$1\r\nv\r\n")
            .write(b":0\r\n")
            .write(b":1\r\n")
            .write(b"$-1\r\n")
            .build();
        let (handler, _, stats) = mock_handler(mock);

        let _ = handler.run().await;
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 5);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_quit_closes_connection() {
        // The PING after QUIT must never be answered.
        let mock = Builder::new()
            .read(b"*1\r\n$4\r\nQUIT\r\n*1\r\n$4\r\nPING\r\n")
            .write(b"+OK\r\n")
            .build();
        let (handler, _, stats) = mock_handler(mock);

        assert!(handler.run().await.is_ok());
        assert_eq!(stats.commands_processed.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_protocol_error_reply() {
        let mock = Builder::new()
            .read(b"*1\r\n:1\r\n")
            .write(b"-ERR Protocol error: expected bulk string, got type prefix 0x3a\r\n")
            .build();
        let (handler, _, _) = mock_handler(mock);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ParseError(ParseError::UnexpectedType(b':')))
        ));
    }

    #[tokio::test]
    async fn test_value_larger_than_inline_limit() {
        let value = vec![b'x'; 100 * 1024];
        let mut request =
            format!("*3\r\n$3\r\nSET\r\n$1\r\nk\r\n${}\r\n", value.len()).into_bytes();
        request.extend_from_slice(&value);
        request.extend_from_slice(b"\r\n");

        let mock = Builder::new().read(&request).write(b"+OK\r\n").build();
        let (handler, storage, _) = mock_handler(mock);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::ClientDisconnected)
        ));
        assert_eq!(storage.read("k").unwrap().len(), 100 * 1024);
    }

    #[tokio::test]
    async fn test_oversized_inline_line_is_refused() {
        let line = vec![b'a'; MAX_BUFFER_SIZE];
        let mock = Builder::new()
            .read(&line)
            .write(b"-ERR request too large\r\n")
            .build();
        let (handler, _, _) = mock_handler(mock);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::BufferFull)
        ));
    }

    #[tokio::test]
    async fn test_partial_command_at_eof() {
        let mock = Builder::new().read(b"*2\r\n$3\r\nGET").build();
        let (handler, _, _) = mock_handler(mock);

        assert!(matches!(
            handler.run().await,
            Err(ConnectionError::UnexpectedEof)
        ));
    }

    async fn create_test_server() -> (SocketAddr, Arc<StorageEngine>, Arc<ConnectionStats>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let storage = Arc::new(StorageEngine::new());
        let stats = Arc::new(ConnectionStats::new());

        let storage_clone = Arc::clone(&storage);
        let stats_clone = Arc::clone(&stats);

        tokio::spawn(async move {
            let _scheduler = start_expiry_scheduler(Arc::clone(&storage_clone));
            while let Ok((stream, client_addr)) = listener.accept().await {
                let handler = CommandHandler::new(Arc::clone(&storage_clone));
                let stats = Arc::clone(&stats_clone);
                tokio::spawn(handle_connection(stream, client_addr, handler, stats));
            }
        });

        (addr, storage, stats)
    }

    async fn roundtrip(client: &mut TcpStream, request: &[u8]) -> Vec<u8> {
        client.write_all(request).await.unwrap();
        let mut buf = [0u8; 256];
        let n = client.read(&mut buf).await.unwrap();
        buf[..n].to_vec()
    }

    #[tokio::test]
    async fn test_tcp_set_with_expiry() {
        let (addr, storage, stats) = create_test_server().await;
        let mut client = TcpStream::connect(addr).await.unwrap();

        assert_eq!(
            roundtrip(&mut client, b"*5\r\n$3\r\nSET\r\n$1\r\nk\r\n$1\r\nv\r\n$2\r\nPX\r\n$3\r\n150\r\n").await,
            b"+OK\r\n"
        );
        assert_eq!(roundtrip(&mut client, b"TTL k\r\n").await, b":0\r\n");
        assert_eq!(roundtrip(&mut client, b"GET k\r\n").await, b"$1\r\nv\r\n");
        assert_eq!(storage.hits("k"), Some(1));

        tokio::time::sleep(Duration::from_millis(300)).await;
        assert_eq!(roundtrip(&mut client, b"GET k\r\n").await, b"$-1\r\n");

        assert_eq!(roundtrip(&mut client, b"QUIT\r\n").await, b"+OK\r\n");
        let mut buf = [0u8; 16];
        assert_eq!(client.read(&mut buf).await.unwrap(), 0);

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(stats.connections_accepted.load(Ordering::Relaxed), 1);
        assert_eq!(stats.active_connections.load(Ordering::Relaxed), 0);
    }
}
