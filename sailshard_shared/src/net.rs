//! Wire protocol.
//!
//! Every message travels as one JSON object terminated by a single `\n`.
//! The `type` field tells the variants apart:
//!
//! ```text
//! {"type":"tick","tick":42,"ts":1700000000000}
//! {"type":"echo","from":"127.0.0.1:50412","body":"hello","ts":1700000000000}
//! {"type":"server_line","from":"server","body":"maintenance in 5m","ts":1700000000000}
//! ```
//!
//! JSON string escaping guarantees that an encoded frame never contains a raw
//! newline, so splitting the stream on `\n` always yields whole messages.

use std::fmt;

use anyhow::Context;
use bytes::{BufMut, Bytes, BytesMut};
use serde::{Deserialize, Serialize};

/// Sender identifier used for operator broadcasts.
pub const OPERATOR_ID: &str = "server";

/// Frame terminator.
pub const FRAME_DELIMITER: u8 = b'\n';

/// Default TCP port of the broadcast server.
pub const DEFAULT_PORT: u16 = 27015;

/// Room for the envelope around an escaped body: `type`, `from`, `ts`.
const FRAME_OVERHEAD: usize = 1024;

/// Longest frame the server can emit for a body of at most `max_line_len`
/// bytes. JSON escapes a control byte as `\u00XX`, six bytes for one.
pub fn max_frame_len(max_line_len: usize) -> usize {
    max_line_len.saturating_mul(6).saturating_add(FRAME_OVERHEAD)
}

/// Periodic heartbeat.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct TickMsg {
    /// Server-wide counter, starts at 1.
    pub tick: u64,
    /// Milliseconds since the Unix epoch at send time.
    pub ts: i64,
}

/// A line of text attributed to a sender.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EchoMsg {
    /// Remote peer address for client echoes, [`OPERATOR_ID`] for operator lines.
    pub from: String,
    pub body: String,
    /// Milliseconds since the Unix epoch at send time.
    pub ts: i64,
}

/// Message envelope, tagged by `type` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum WireMsg {
    /// Server -> all clients, periodic.
    Tick(TickMsg),
    /// Server -> originating client only.
    Echo(EchoMsg),
    /// Server -> all clients, one per operator input line.
    ServerLine(EchoMsg),
}

impl WireMsg {
    /// Builds a tick stamped with the current time.
    pub fn tick(tick: u64) -> Self {
        WireMsg::Tick(TickMsg {
            tick,
            ts: now_millis(),
        })
    }

    /// Builds an echo reply for `from`, stamped with the current time.
    pub fn echo(from: impl Into<String>, body: impl Into<String>) -> Self {
        WireMsg::Echo(EchoMsg {
            from: from.into(),
            body: body.into(),
            ts: now_millis(),
        })
    }

    /// Builds an operator broadcast, stamped with the current time.
    pub fn server_line(body: impl Into<String>) -> Self {
        WireMsg::ServerLine(EchoMsg {
            from: OPERATOR_ID.to_string(),
            body: body.into(),
            ts: now_millis(),
        })
    }

    /// The wire discriminant of this message.
    pub fn kind(&self) -> &'static str {
        match self {
            WireMsg::Tick(_) => "tick",
            WireMsg::Echo(_) => "echo",
            WireMsg::ServerLine(_) => "server_line",
        }
    }

    pub fn ts(&self) -> i64 {
        match self {
            WireMsg::Tick(t) => t.ts,
            WireMsg::Echo(e) | WireMsg::ServerLine(e) => e.ts,
        }
    }
}

/// Milliseconds since the Unix epoch.
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Serializes a message into one newline-terminated frame.
pub fn encode(msg: &WireMsg) -> anyhow::Result<Bytes> {
    let payload = serde_json::to_vec(msg).context("serialize frame")?;
    let mut buf = BytesMut::with_capacity(payload.len() + 1);
    buf.extend_from_slice(&payload);
    buf.put_u8(FRAME_DELIMITER);
    Ok(buf.freeze())
}

/// Parses one line (without its terminator) into a message.
pub fn decode(line: &str) -> Result<WireMsg, DecodeError> {
    if line.as_bytes().contains(&FRAME_DELIMITER) {
        return Err(DecodeError::EmbeddedNewline);
    }
    serde_json::from_str(line).map_err(|e| DecodeError::Malformed(e.to_string()))
}

/// Why a line could not be decoded. Callers skip the line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DecodeError {
    /// The input held more than one line.
    EmbeddedNewline,
    /// Not JSON, unknown `type`, or missing fields.
    Malformed(String),
}

impl fmt::Display for DecodeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DecodeError::EmbeddedNewline => write!(f, "line contains an embedded newline"),
            DecodeError::Malformed(reason) => write!(f, "malformed frame: {}", reason),
        }
    }
}

impl std::error::Error for DecodeError {}
