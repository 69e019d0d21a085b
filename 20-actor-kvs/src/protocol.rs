//! Wire format of the TCP line protocol.
//!
//! Every request and every response is one JSON object on its own line:
//!
//! ```text
//! → {"reqId":"1","op":"STORE","val":"x"}
//! ← {"reqId":"1","res":"67e55044-10b1-426f-9247-bb680e5fe0c8","success":true}
//! ```
//!
//! All request fields are optional on the wire. A line that is not a JSON
//! object of that shape is malformed and gets no response at all. So is a
//! line that is not UTF-8 or is longer than [`MAX_LINE_BYTES`].

use std::{fmt, io, string::FromUtf8Error};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, AsyncWrite, AsyncWriteExt};

const LINE_ENDINGS: &[char] = &['\n', '\r'];

/// Longest line accepted, not counting its line ending.
pub const MAX_LINE_BYTES: usize = 64 * 1024;

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Request {
    #[serde(rename = "reqId", default)]
    pub req_id: String,
    #[serde(default)]
    pub op: String,
    #[serde(default)]
    pub val: Value,
    #[serde(default)]
    pub id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Response {
    #[serde(rename = "reqId")]
    pub req_id: String,
    pub res: Value,
    pub success: bool,
}

impl Response {
    pub fn success(req_id: String, res: Value) -> Self {
        Self {
            req_id,
            res,
            success: true,
        }
    }

    pub fn failure(req_id: String, message: impl fmt::Display) -> Self {
        Self {
            req_id,
            res: Value::String(message.to_string()),
            success: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Store,
    Fetch,
    Update,
    Delete,
    Stop,
}

/// An `op` string outside the protocol's vocabulary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid operation '{0}'")]
pub struct UnknownOp(pub String);

/// Why [`read_line`] could not produce a line.
#[derive(Debug, Error)]
pub enum LineError {
    #[error(transparent)]
    Io(#[from] io::Error),

    #[error("line is not valid UTF-8")]
    NotUtf8(#[source] FromUtf8Error),

    #[error("line exceeds {limit} bytes")]
    TooLong { limit: usize },
}

impl LineError {
    /// True when only the offending line is lost and the stream can still be
    /// read from.
    pub fn is_malformed_line(&self) -> bool {
        !matches!(self, LineError::Io(_))
    }
}

impl Request {
    /// Operation names are matched exactly, as sent by clients.
    pub fn operation(&self) -> Result<Op, UnknownOp> {
        match self.op.as_str() {
            "STORE" => Ok(Op::Store),
            "FETCH" => Ok(Op::Fetch),
            "UPDATE" => Ok(Op::Update),
            "DELETE" => Ok(Op::Delete),
            "STOP" => Ok(Op::Stop),
            other => Err(UnknownOp(other.to_string())),
        }
    }
}

/// Parses one line into a request.
pub fn decode_request(line: &str) -> serde_json::Result<Request> {
    serde_json::from_str(line.trim_end_matches(LINE_ENDINGS))
}

/// Reads the next non-blank line, without its line ending.
///
/// Returns `Ok(None)` once the peer has closed its side. A line that is not
/// UTF-8 or is too long is consumed in full and reported as an error for
/// which [`LineError::is_malformed_line`] holds; the next call starts on the
/// following line.
pub async fn read_line<R>(reader: &mut R) -> Result<Option<String>, LineError>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    loop {
        buf.clear();
        let bytes = (&mut *reader)
            .take(MAX_LINE_BYTES as u64 + 1)
            .read_until(b'\n', &mut buf)
            .await?;
        if bytes == 0 {
            return Ok(None);
        }
        if !buf.ends_with(b"\n") && buf.len() > MAX_LINE_BYTES {
            discard_line(reader).await?;
            return Err(LineError::TooLong {
                limit: MAX_LINE_BYTES,
            });
        }

        let line = String::from_utf8(std::mem::take(&mut buf)).map_err(LineError::NotUtf8)?;
        let trimmed = line.trim_end_matches(LINE_ENDINGS);
        if trimmed.trim().is_empty() {
            continue;
        }
        return Ok(Some(trimmed.to_string()));
    }
}

/// Skips the rest of the current line without buffering it.
async fn discard_line<R>(reader: &mut R) -> io::Result<()>
where
    R: AsyncBufRead + Unpin,
{
    loop {
        let (used, found_end) = {
            let available = reader.fill_buf().await?;
            if available.is_empty() {
                return Ok(());
            }
            match available.iter().position(|&b| b == b'\n') {
                Some(end) => (end + 1, true),
                None => (available.len(), false),
            }
        };
        reader.consume(used);
        if found_end {
            return Ok(());
        }
    }
}

pub async fn write_message<W, T>(writer: &mut W, message: &T) -> io::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let mut encoded = serde_json::to_vec(message).map_err(to_io_error)?;
    encoded.push(b'\n');
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}

fn to_io_error(err: serde_json::Error) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, err)
}
