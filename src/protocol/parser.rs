//! Incremental RESP Request Parser
//!
//! Clients send commands either as RESP arrays of bulk strings
//! (`*2\r\n$3\r\nGET\r\n$4\r\nname\r\n`) or as inline text lines
//! (`GET name\r\n`), which is what `telnet` or `nc` produce.
//!
//! The parser reads from a buffer and returns either:
//! - `Ok(Some((command, consumed)))` - a full command, `consumed` bytes were used
//! - `Ok(None)` - the command is incomplete, read more data and try again
//! - `Err(ParseError)` - the data is not valid RESP
//!
//! The caller owns the buffer: append network data, call [`RequestParser::parse`],
//! and advance the buffer by `consumed` on success.

use crate::protocol::types::{prefix, Command, CRLF};
use bytes::Bytes;
use thiserror::Error;

/// Errors that can occur while decoding a request.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum ParseError {
    /// A length header was not a valid integer
    #[error("invalid length: {0}")]
    InvalidLength(String),

    /// An array element was not a bulk string
    #[error("expected bulk string, got type prefix {0:#04x}")]
    UnexpectedType(u8),

    /// The request carried no words
    #[error("empty command")]
    EmptyCommand,

    /// Protocol violation (missing CRLF, etc.)
    #[error("protocol error: {0}")]
    ProtocolError(String),

    /// A bulk string or array exceeds the allowed size
    #[error("message too large: {size} (max: {max})")]
    MessageTooLarge { size: usize, max: usize },
}

/// Result type for parsing operations.
pub type ParseResult<T> = Result<T, ParseError>;

/// Maximum size for a single bulk string (512 MB, same as Redis)
pub const MAX_BULK_SIZE: usize = 512 * 1024 * 1024;

/// Maximum number of words in one request
pub const MAX_ARRAY_LEN: usize = 1024 * 1024;

/// Decodes client requests into [`Command`]s.
///
/// # Example
///
/// ```
/// use mukv::protocol::RequestParser;
///
/// let mut parser = RequestParser::new();
/// let (command, consumed) = parser
///     .parse(b"*2\r\n$3\r\nGET\r\n$4\r\nname\r\n")
///     .unwrap()
///     .unwrap();
///
/// assert_eq!(command.name, "get");
/// assert_eq!(consumed, 23);
/// ```
#[derive(Debug, Default)]
pub struct RequestParser;

impl RequestParser {
    pub fn new() -> Self {
        Self
    }

    /// Attempts to decode one command from the front of `buf`.
    ///
    /// Blank inline lines before the command are consumed and ignored.
    pub fn parse(&mut self, buf: &[u8]) -> ParseResult<Option<(Command, usize)>> {
        let mut skipped = 0;

        loop {
            let rest = &buf[skipped..];
            if rest.is_empty() {
                return Ok(None);
            }

            let parsed = if rest[0] == prefix::ARRAY {
                parse_array(rest)?
            } else {
                match parse_inline(rest)? {
                    Some((words, consumed)) if words.is_empty() => {
                        skipped += consumed;
                        continue;
                    }
                    other => other,
                }
            };

            return match parsed {
                Some((words, consumed)) => {
                    let command = Command::from_words(words).ok_or(ParseError::EmptyCommand)?;
                    Ok(Some((command, skipped + consumed)))
                }
                None => Ok(None),
            };
        }
    }
}

/// Parses `*<count>\r\n` followed by `count` bulk strings.
fn parse_array(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    debug_assert!(buf[0] == prefix::ARRAY);

    let (count, mut consumed) = match parse_length(buf)? {
        Some(header) => header,
        None => return Ok(None),
    };

    if count > MAX_ARRAY_LEN {
        return Err(ParseError::MessageTooLarge {
            size: count,
            max: MAX_ARRAY_LEN,
        });
    }

    let mut words = Vec::with_capacity(count);
    for _ in 0..count {
        match parse_bulk_string(&buf[consumed..])? {
            Some((word, word_len)) => {
                words.push(word);
                consumed += word_len;
            }
            None => return Ok(None),
        }
    }

    Ok(Some((words, consumed)))
}

/// Parses `$<length>\r\n<data>\r\n`.
fn parse_bulk_string(buf: &[u8]) -> ParseResult<Option<(Bytes, usize)>> {
    match buf.first() {
        None => return Ok(None),
        Some(&prefix::BULK_STRING) => {}
        Some(&other) => return Err(ParseError::UnexpectedType(other)),
    }

    let (length, data_start) = match parse_length(buf)? {
        Some(header) => header,
        None => return Ok(None),
    };

    if length > MAX_BULK_SIZE {
        return Err(ParseError::MessageTooLarge {
            size: length,
            max: MAX_BULK_SIZE,
        });
    }

    let total = data_start + length + CRLF.len();
    if buf.len() < total {
        return Ok(None);
    }

    if &buf[data_start + length..total] != CRLF {
        return Err(ParseError::ProtocolError(
            "bulk string missing trailing CRLF".to_string(),
        ));
    }

    let data = Bytes::copy_from_slice(&buf[data_start..data_start + length]);
    Ok(Some((data, total)))
}

/// Parses the `<prefix><n>\r\n` header shared by arrays and bulk strings.
///
/// Returns the length and the number of header bytes.
fn parse_length(buf: &[u8]) -> ParseResult<Option<(usize, usize)>> {
    let end = match find_crlf(&buf[1..]) {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let text = std::str::from_utf8(&buf[1..1 + end])
        .map_err(|_| ParseError::InvalidLength(String::from_utf8_lossy(&buf[1..1 + end]).into()))?;

    // Negative lengths (null arrays and bulk strings) are not valid in requests.
    let length = text
        .parse::<usize>()
        .map_err(|_| ParseError::InvalidLength(text.to_string()))?;

    Ok(Some((length, 1 + end + CRLF.len())))
}

/// Parses a whitespace-separated inline command terminated by `\n` or `\r\n`.
fn parse_inline(buf: &[u8]) -> ParseResult<Option<(Vec<Bytes>, usize)>> {
    let newline = match buf.iter().position(|&b| b == b'\n') {
        Some(pos) => pos,
        None => return Ok(None),
    };

    let line = buf[..newline].strip_suffix(b"\r").unwrap_or(&buf[..newline]);

    let words = line
        .split(|b| b.is_ascii_whitespace())
        .filter(|word| !word.is_empty())
        .map(Bytes::copy_from_slice)
        .collect();

    Ok(Some((words, newline + 1)))
}

/// Finds the position of CRLF in the buffer.
#[inline]
fn find_crlf(buf: &[u8]) -> Option<usize> {
    buf.windows(CRLF.len()).position(|window| window == CRLF)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(input: &[u8]) -> ParseResult<Option<(Command, usize)>> {
        RequestParser::new().parse(input)
    }

    #[test]
    fn test_parse_array_command() {
        let input = b"*3\r\n$3\r\nSET\r\n$8\r\nuser:101\r\n$4\r\nblue\r\n";
        let (command, consumed) = parse(input).unwrap().unwrap();

        assert_eq!(command.name, "set");
        assert_eq!(
            command.args,
            vec![Bytes::from("user:101"), Bytes::from("blue")]
        );
        assert_eq!(consumed, input.len());
    }

    #[test]
    fn test_parse_incomplete() {
        assert!(parse(b"*2\r\n$3\r\nGET\r\n").unwrap().is_none());
        assert!(parse(b"*2\r\n$3\r\nGET\r\n$4\r\nna").unwrap().is_none());
        assert!(parse(b"*2").unwrap().is_none());
        assert!(parse(b"GET name").unwrap().is_none());
        assert!(parse(b"").unwrap().is_none());
    }

    #[test]
    fn test_parse_pipelined_consumes_one() {
        let input = b"*1\r\n$4\r\nPING\r\n*1\r\n$4\r\nPING\r\n";
        let (command, consumed) = parse(input).unwrap().unwrap();
        assert_eq!(command.name, "ping");
        assert_eq!(consumed, 14);
    }

    #[test]
    fn test_parse_inline_command() {
        let (command, consumed) = parse(b"set k  v EX 10\r\n").unwrap().unwrap();
        assert_eq!(command.name, "set");
        assert_eq!(command.args.len(), 4);
        assert_eq!(consumed, 16);

        let (command, consumed) = parse(b"PING\n").unwrap().unwrap();
        assert_eq!(command.name, "ping");
        assert_eq!(consumed, 5);
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let (command, consumed) = parse(b"\r\n\r\nPING\r\n").unwrap().unwrap();
        assert_eq!(command.name, "ping");
        assert_eq!(consumed, 10);

        assert!(parse(b"\r\n").unwrap().is_none());
    }

    #[test]
    fn test_binary_safe_bulk_string() {
        let input = b"*2\r\n$3\r\nGET\r\n$5\r\nhel\x00o\r\n";
        let (command, _) = parse(input).unwrap().unwrap();
        assert_eq!(command.args[0], Bytes::from(&b"hel\x00o"[..]));
    }

    #[test]
    fn test_parse_errors() {
        assert_eq!(parse(b"*0\r\n"), Err(ParseError::EmptyCommand));
        assert!(matches!(
            parse(b"*x\r\n"),
            Err(ParseError::InvalidLength(_))
        ));
        assert!(matches!(
            parse(b"*-1\r\n"),
            Err(ParseError::InvalidLength(_))
        ));
        assert_eq!(
            parse(b"*1\r\n:1\r\n"),
            Err(ParseError::UnexpectedType(b':'))
        );
        assert!(matches!(
            parse(b"*1\r\n$3\r\nGETX\r\n"),
            Err(ParseError::ProtocolError(_))
        ));
    }
}
