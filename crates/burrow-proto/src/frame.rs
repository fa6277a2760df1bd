//! Tunnel command frames
//!
//! A frame on the tunnel is an ordered sequence of opaque parts. The first
//! part is always an empty delimiter, the second is the command byte, and
//! the rest are command arguments. The peer-identity routing part that the
//! server's accepting socket prepends is consumed by the transport layer and
//! never reaches this codec.

use bytes::Bytes;
use thiserror::Error;

/// Tunnel command bytes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Command {
    Heartbeat = 0x00,
    Logon = 0x01,
    Logout = 0x02,
    Exception = 0x03,
    Relay = 0x04,
}

impl TryFrom<u8> for Command {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0x00 => Ok(Command::Heartbeat),
            0x01 => Ok(Command::Logon),
            0x02 => Ok(Command::Logout),
            0x03 => Ok(Command::Exception),
            0x04 => Ok(Command::Relay),
            _ => Err(CodecError::MalformedFrame(format!(
                "unknown command byte 0x{value:02x}"
            ))),
        }
    }
}

/// Codec errors
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("malformed frame: {0}")]
    MalformedFrame(String),

    #[error("message too large: {0} bytes")]
    MessageTooLarge(usize),

    #[error("incomplete message")]
    IncompleteMessage,
}

/// A decoded tunnel frame.
///
/// `Logon` and `Logout` are reserved by the wire protocol: peer registration
/// is implicit in the first inbound frame, so the current design never emits
/// them, but they decode cleanly so a future sender does not break us.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TunnelFrame {
    Heartbeat,
    Logon,
    Logout,
    Exception { message: String },
    Relay { client_addr: Bytes, payload: Bytes },
}

impl TunnelFrame {
    /// Build a `RELAY` frame. Payloads must be non-empty: EOF is signalled
    /// by session teardown, never by an empty relay.
    pub fn relay(client_addr: Bytes, payload: Bytes) -> Result<Self, CodecError> {
        if payload.is_empty() {
            return Err(CodecError::MalformedFrame(
                "relay payload must not be empty".into(),
            ));
        }
        Ok(TunnelFrame::Relay {
            client_addr,
            payload,
        })
    }

    pub fn exception(message: impl Into<String>) -> Self {
        TunnelFrame::Exception {
            message: message.into(),
        }
    }

    pub fn command(&self) -> Command {
        match self {
            TunnelFrame::Heartbeat => Command::Heartbeat,
            TunnelFrame::Logon => Command::Logon,
            TunnelFrame::Logout => Command::Logout,
            TunnelFrame::Exception { .. } => Command::Exception,
            TunnelFrame::Relay { .. } => Command::Relay,
        }
    }

    /// Encode to multipart form: `[empty, cmd, ...args]`.
    pub fn encode(&self) -> Vec<Bytes> {
        let cmd = Bytes::from(vec![self.command() as u8]);
        match self {
            TunnelFrame::Heartbeat | TunnelFrame::Logon | TunnelFrame::Logout => {
                vec![Bytes::new(), cmd]
            }
            TunnelFrame::Exception { message } => {
                vec![Bytes::new(), cmd, Bytes::from(message.clone().into_bytes())]
            }
            TunnelFrame::Relay {
                client_addr,
                payload,
            } => vec![Bytes::new(), cmd, client_addr.clone(), payload.clone()],
        }
    }

    /// Decode from multipart form.
    ///
    /// Fails with `MalformedFrame` on an unknown command byte, a missing
    /// delimiter, a `RELAY` with fewer than four parts or an empty payload,
    /// or a non-UTF-8 `EXCEPTION` message.
    pub fn decode(parts: &[Bytes]) -> Result<Self, CodecError> {
        if parts.len() < 2 {
            return Err(CodecError::MalformedFrame(format!(
                "expected at least 2 parts, got {}",
                parts.len()
            )));
        }
        if !parts[0].is_empty() {
            return Err(CodecError::MalformedFrame(
                "missing empty delimiter part".into(),
            ));
        }
        if parts[1].len() != 1 {
            return Err(CodecError::MalformedFrame(format!(
                "command part must be 1 byte, got {}",
                parts[1].len()
            )));
        }

        match Command::try_from(parts[1][0])? {
            Command::Heartbeat => Ok(TunnelFrame::Heartbeat),
            // Reserved commands: extra parts are parsed and discarded.
            Command::Logon => Ok(TunnelFrame::Logon),
            Command::Logout => Ok(TunnelFrame::Logout),
            Command::Exception => {
                let raw = parts.get(2).cloned().unwrap_or_default();
                let message = String::from_utf8(raw.to_vec()).map_err(|_| {
                    CodecError::MalformedFrame("exception message is not UTF-8".into())
                })?;
                Ok(TunnelFrame::Exception { message })
            }
            Command::Relay => {
                if parts.len() < 4 {
                    return Err(CodecError::MalformedFrame(format!(
                        "relay frame needs 4 parts, got {}",
                        parts.len()
                    )));
                }
                if parts[3].is_empty() {
                    return Err(CodecError::MalformedFrame(
                        "relay payload must not be empty".into(),
                    ));
                }
                Ok(TunnelFrame::Relay {
                    client_addr: parts[2].clone(),
                    payload: parts[3].clone(),
                })
            }
        }
    }
}
