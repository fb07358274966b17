//! Error types for the transport.
//!
//! Nothing on the inbound path surfaces as an error: malformed or foreign
//! segments are logged and counted by the dispatcher, which uses
//! [`DecodeError`] only to describe the drop. [`TransportError`] covers the
//! application-facing calls and configuration loading.

use thiserror::Error;

use crate::connection::{ConnectionId, ConnectionState};

// ── Errors ──────────────────────────────────────────────────────────

/// Reasons a raw segment could not be decoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    #[error("segment too short for a header ({len} bytes)")]
    Truncated { len: usize },
    #[error("data offset {offset} invalid for a {len}-byte segment")]
    BadDataOffset { offset: u8, len: usize },
    #[error("checksum verification failed")]
    Checksum,
}

#[derive(Debug, Error)]
pub enum TransportError {
    #[error("cannot {op} on connection {id} in state {state:?}")]
    InvalidState {
        id: ConnectionId,
        state: ConnectionState,
        op: &'static str,
    },
    #[error("unknown connection {0}")]
    UnknownConnection(ConnectionId),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("config parse error: {0}")]
    ConfigParse(#[from] toml::de::Error),
}

pub type TransportResult<T> = Result<T, TransportError>;
