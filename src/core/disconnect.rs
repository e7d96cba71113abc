// src/core/disconnect.rs

//! The closed set of reasons a client connection can be terminated for.

use crate::core::protocol::ResultCode;
use serde::Serialize;
use strum_macros::{AsRefStr, Display, EnumIter};

/// Why a connection was (or is being) closed.
///
/// Drives both the result code of the notice of disconnection and the server
/// log entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, AsRefStr, Display, EnumIter)]
#[strum(serialize_all = "snake_case")]
#[serde(rename_all = "snake_case")]
pub enum DisconnectReason {
    ProtocolError,
    ClientDisconnect,
    Unbind,
    ServerError,
    ServerShutdown,
    IoError,
    IoTimeout,
    AdminLimitExceeded,
    IdleTimeLimitExceeded,
    InvalidCredentials,
    ConnectionRejected,
    MaxRequestSizeExceeded,
    SecurityProblem,
}

impl DisconnectReason {
    /// The message logged and sent to the client for this reason.
    pub fn closure_message(self) -> &'static str {
        match self {
            DisconnectReason::ProtocolError => "The client sent a request that violated the LDAP protocol",
            DisconnectReason::ClientDisconnect => "The client closed the connection",
            DisconnectReason::Unbind => "The client sent an unbind request",
            DisconnectReason::ServerError => "An internal error occurred in the server",
            DisconnectReason::ServerShutdown => "The server is shutting down",
            DisconnectReason::IoError => "An I/O error occurred while communicating with the client",
            DisconnectReason::IoTimeout => "A write to the client did not complete within the allowed time",
            DisconnectReason::AdminLimitExceeded => "An administrative limit was exceeded",
            DisconnectReason::IdleTimeLimitExceeded => "The connection was idle for too long",
            DisconnectReason::InvalidCredentials => "The client provided invalid credentials",
            DisconnectReason::ConnectionRejected => "The server rejected the connection",
            DisconnectReason::MaxRequestSizeExceeded => "The client sent a request larger than the maximum allowed size",
            DisconnectReason::SecurityProblem => "A problem occurred in the connection security layer",
        }
    }

    /// The result code carried by the notice of disconnection.
    ///
    /// `server_error` is the listener's configured code for internal errors.
    pub fn notification_result_code(self, server_error: ResultCode) -> ResultCode {
        match self {
            DisconnectReason::ProtocolError => ResultCode::PROTOCOL_ERROR,
            DisconnectReason::ServerShutdown => ResultCode::UNAVAILABLE,
            DisconnectReason::ServerError => server_error,
            DisconnectReason::AdminLimitExceeded
            | DisconnectReason::IdleTimeLimitExceeded
            | DisconnectReason::MaxRequestSizeExceeded
            | DisconnectReason::IoTimeout => ResultCode::ADMIN_LIMIT_EXCEEDED,
            DisconnectReason::ConnectionRejected => ResultCode::CONSTRAINT_VIOLATION,
            DisconnectReason::InvalidCredentials => ResultCode::INVALID_CREDENTIALS,
            _ => ResultCode::OTHER,
        }
    }

    /// Builds the full message, appending the optional detail.
    pub fn message_with_detail(self, detail: Option<&str>) -> String {
        match detail {
            Some(detail) if !detail.is_empty() => format!("{}: {detail}", self.closure_message()),
            _ => self.closure_message().to_string(),
        }
    }
}
