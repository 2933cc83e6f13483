//! Newline-delimited JSON framing for protocol messages.
//!
//! Each exchange is one request line followed by one reply line. Lines are
//! bounded so a misbehaving peer cannot make the reader buffer without limit.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Maximum accepted size of a single message line, newline included.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

/// Errors raised while framing protocol messages.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The message could not be serialised.
    #[error("failed to serialise message: {0}")]
    Serialise(#[source] serde_json::Error),
    /// Writing the line failed.
    #[error("failed to write message: {0}")]
    Write(#[source] io::Error),
    /// Reading the line failed.
    #[error("failed to read message: {0}")]
    Read(#[source] io::Error),
    /// The line exceeded [`MAX_LINE_BYTES`].
    #[error("message exceeds the 64 KiB line limit")]
    TooLarge,
    /// The line was blank.
    #[error("empty message line")]
    Empty,
    /// The line was not valid JSON for the expected schema.
    #[error("malformed message: {0}")]
    Malformed(#[source] serde_json::Error),
}

/// Serialises `message` as one JSON line and flushes the writer.
///
/// # Errors
///
/// Returns [`CodecError::Serialise`] or [`CodecError::Write`].
pub fn write_message<W, T>(writer: &mut W, message: &T) -> Result<(), CodecError>
where
    W: Write,
    T: Serialize,
{
    let mut line = serde_json::to_vec(message).map_err(CodecError::Serialise)?;
    line.push(b'\n');
    writer.write_all(&line).map_err(CodecError::Write)?;
    writer.flush().map_err(CodecError::Write)
}

/// Reads one line and decodes it. Returns `Ok(None)` when the peer closed the
/// stream before sending anything.
///
/// # Errors
///
/// Returns [`CodecError`] on I/O failure, oversize lines, or schema mismatch.
pub fn read_message<R, T>(reader: &mut R) -> Result<Option<T>, CodecError>
where
    R: Read,
    T: DeserializeOwned,
{
    match read_line(reader)? {
        Some(line) => decode(&line).map(Some),
        None => Ok(None),
    }
}

/// Decodes a single line, ignoring trailing whitespace.
///
/// # Errors
///
/// Returns [`CodecError::Empty`] for blank lines and
/// [`CodecError::Malformed`] when the JSON does not match `T`.
pub fn decode<T>(line: &[u8]) -> Result<T, CodecError>
where
    T: DeserializeOwned,
{
    let trimmed = trim_trailing_whitespace(line);
    if trimmed.is_empty() {
        return Err(CodecError::Empty);
    }
    serde_json::from_slice(trimmed).map_err(CodecError::Malformed)
}

/// Reads bytes up to and including the first newline.
///
/// Bytes are consumed one chunk at a time straight from the stream, so the
/// reader must not be shared with another consumer after the line.
///
/// # Errors
///
/// Returns [`CodecError::Read`] or [`CodecError::TooLarge`].
pub fn read_line<R>(reader: &mut R) -> Result<Option<Vec<u8>>, CodecError>
where
    R: Read,
{
    let mut buffer = Vec::new();
    let mut chunk = [0_u8; 1024];
    loop {
        let bytes_read = read_chunk_with_retry(reader, &mut chunk).map_err(CodecError::Read)?;
        if bytes_read == 0 {
            return Ok((!buffer.is_empty()).then_some(buffer));
        }

        let received = chunk.get(..bytes_read).unwrap_or_default();
        if let Some(position) = received.iter().position(|byte| *byte == b'\n') {
            buffer.extend_from_slice(received.get(..=position).unwrap_or_default());
            enforce_line_limit(buffer.len())?;
            return Ok(Some(buffer));
        }

        buffer.extend_from_slice(received);
        enforce_line_limit(buffer.len())?;
    }
}

fn read_chunk_with_retry<R: Read>(reader: &mut R, chunk: &mut [u8]) -> io::Result<usize> {
    loop {
        match reader.read(chunk) {
            Ok(read) => return Ok(read),
            Err(error) if error.kind() == io::ErrorKind::Interrupted => {}
            Err(error) => return Err(error),
        }
    }
}

fn enforce_line_limit(size: usize) -> Result<(), CodecError> {
    if size > MAX_LINE_BYTES {
        return Err(CodecError::TooLarge);
    }
    Ok(())
}

fn trim_trailing_whitespace(bytes: &[u8]) -> &[u8] {
    let end = bytes
        .iter()
        .rposition(|byte| !byte.is_ascii_whitespace())
        .map_or(0, |position| position + 1);
    bytes.get(..end).unwrap_or_default()
}
