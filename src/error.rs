//! Error types shared by every layer of the client.
//!
//! Errors come in three tiers:
//!
//! - connection-fatal ([`RaaError::is_fatal`]): the socket is gone or the server
//!   announced it is stopping. The session refuses further requests.
//! - protocol-level: the server answered with a numeric code. The session stays
//!   usable and the caller may retry with other parameters.
//! - decode failures: an answer did not match the schema of the command sent.
//!   Nothing partially parsed reaches a cache.
//!
//! Absence (unknown name, end of list, empty feature set) is never an error and
//! is reported through `Option` or empty collections.
use std::{fmt, io};

use thiserror::Error;

/// Numeric result codes returned while opening a socket or a database.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProtocolCode {
    BadServerName,
    CannotOpenSocket,
    UnknownDatabase,
    DatabaseUnavailable,
    DatabaseAlreadyOpen,
    BadPassword,
    OutOfMemory,
    BadConfiguration,
    NoSocket,
    Other(i32),
}

impl From<i32> for ProtocolCode {
    fn from(value: i32) -> Self {
        match value {
            1 => ProtocolCode::BadServerName,
            2 => ProtocolCode::CannotOpenSocket,
            3 => ProtocolCode::UnknownDatabase,
            4 => ProtocolCode::DatabaseUnavailable,
            5 => ProtocolCode::DatabaseAlreadyOpen,
            6 => ProtocolCode::BadPassword,
            7 => ProtocolCode::OutOfMemory,
            8 => ProtocolCode::BadConfiguration,
            9 => ProtocolCode::NoSocket,
            other => ProtocolCode::Other(other),
        }
    }
}

impl From<ProtocolCode> for i32 {
    fn from(value: ProtocolCode) -> Self {
        match value {
            ProtocolCode::BadServerName => 1,
            ProtocolCode::CannotOpenSocket => 2,
            ProtocolCode::UnknownDatabase => 3,
            ProtocolCode::DatabaseUnavailable => 4,
            ProtocolCode::DatabaseAlreadyOpen => 5,
            ProtocolCode::BadPassword => 6,
            ProtocolCode::OutOfMemory => 7,
            ProtocolCode::BadConfiguration => 8,
            ProtocolCode::NoSocket => 9,
            ProtocolCode::Other(code) => code,
        }
    }
}

impl fmt::Display for ProtocolCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = match self {
            ProtocolCode::BadServerName => "bad server name",
            ProtocolCode::CannotOpenSocket => "cannot open socket",
            ProtocolCode::UnknownDatabase => "unknown database",
            ProtocolCode::DatabaseUnavailable => "database is currently unavailable",
            ProtocolCode::DatabaseAlreadyOpen => "a database is already open on this connection",
            ProtocolCode::BadPassword => "bad password",
            ProtocolCode::OutOfMemory => "out of memory",
            ProtocolCode::BadConfiguration => "missing or invalid connection configuration",
            ProtocolCode::NoSocket => "no open socket for this operation",
            ProtocolCode::Other(code) => return write!(f, "server code {code}"),
        };
        write!(f, "{text} (code {})", i32::from(*self))
    }
}

#[derive(Debug, Error)]
pub enum RaaError {
    #[error("connection to acnuc server is down")]
    ConnectionDown,

    #[error("acnuc server is down for database update")]
    ServerUpdate,

    #[error("malformed server banner: {0:?}")]
    BadBanner(String),

    #[error("session was terminated by an earlier fatal error")]
    SessionClosed,

    #[error("transport IO error: {0}")]
    Io(#[from] io::Error),

    /// A caller-supplied writer failed; the connection itself is unaffected.
    #[error("cannot write output: {0}")]
    Output(io::Error),

    #[error("{0}")]
    Protocol(ProtocolCode),

    #[error("server rejected `{command}` with code {code}{}", .message.as_deref().map(|m| format!(": {m}")).unwrap_or_default())]
    Rejected {
        command: &'static str,
        code: i32,
        message: Option<String>,
    },

    #[error("failed to decode `{command}` response: {reason}")]
    Decode {
        command: &'static str,
        reason: String,
    },
}

impl RaaError {
    /// True for errors after which the connection must not be used again.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RaaError::ConnectionDown
                | RaaError::ServerUpdate
                | RaaError::BadBanner(_)
                | RaaError::SessionClosed
                | RaaError::Io(_)
        )
    }

    pub(crate) fn decode(command: &'static str, reason: impl Into<String>) -> Self {
        RaaError::Decode {
            command,
            reason: reason.into(),
        }
    }
}
