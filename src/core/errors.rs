// src/core/errors.rs

//! Defines the primary error type for the connection layer.

use crate::core::protocol::ResultCode;
use std::sync::Arc;
use thiserror::Error;

/// The main error enum, representing all failures the connection layer can observe.
/// `std::io::Error` is wrapped in an `Arc` so the enum stays cheaply cloneable.
#[derive(Error, Debug, Clone)]
pub enum LdapError {
    #[error("IO Error: {0}")]
    Io(Arc<std::io::Error>),

    #[error("Malformed LDAP message: {0}")]
    Decode(String),

    #[error("Request of {size} bytes exceeds the maximum allowed request size of {max} bytes")]
    MaxRequestSizeExceeded { size: usize, max: usize },

    #[error("TLS Error: {0}")]
    Tls(String),

    #[error("SASL Error: {0}")]
    Sasl(String),

    #[error("Channel closed: {0}")]
    ChannelClosed(String),

    /// A blocked write exceeded the configured maximum. The channel is closed
    /// when this is returned.
    #[error("Channel closed: write blocked for more than {timeout_ms} ms")]
    WriteTimedOut { timeout_ms: u64 },

    /// An error with an explicit wire result code, returned to the client as-is.
    #[error("{message}")]
    Directory { code: ResultCode, message: String },

    #[error("Internal Server Error: {0}")]
    Internal(String),
}

impl LdapError {
    /// Builds a `Directory` error.
    pub fn directory(code: ResultCode, message: impl Into<String>) -> Self {
        LdapError::Directory {
            code,
            message: message.into(),
        }
    }

    /// Returns the result code a client should see for this error.
    pub fn result_code(&self, server_error: ResultCode) -> ResultCode {
        match self {
            LdapError::Directory { code, .. } => *code,
            LdapError::Decode(_) => ResultCode::PROTOCOL_ERROR,
            LdapError::MaxRequestSizeExceeded { .. } => ResultCode::ADMIN_LIMIT_EXCEEDED,
            _ => server_error,
        }
    }

    /// True for failures of the encryption layer itself. These are never
    /// treated as a clean client disconnect.
    pub fn is_encryption_error(&self) -> bool {
        matches!(self, LdapError::Tls(_))
    }

    /// True when the underlying channel can no longer be used.
    pub fn is_channel_closed(&self) -> bool {
        matches!(
            self,
            LdapError::ChannelClosed(_) | LdapError::WriteTimedOut { .. }
        )
    }
}

/// Why an operation could not be admitted on a connection.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AdmissionError {
    #[error("The connection is being closed and cannot accept new operations")]
    AlreadyDisconnecting,

    #[error("There is already an operation in progress with message ID {0}")]
    DuplicateCorrelationId(i32),

    #[error("The work queue rejected the operation: {0}")]
    QueueRejected(String),
}

impl AdmissionError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            AdmissionError::AlreadyDisconnecting => ResultCode::UNWILLING_TO_PERFORM,
            AdmissionError::DuplicateCorrelationId(_) => ResultCode::PROTOCOL_ERROR,
            AdmissionError::QueueRejected(_) => ResultCode::BUSY,
        }
    }
}

/// Why a TLS or SASL security layer could not be started.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SecurityNegotiationError {
    #[error("TLS is already active on this connection")]
    TlsAlreadyActive,

    #[error("A security layer negotiation is already pending on this connection")]
    NegotiationPending,

    #[error("StartTLS is not allowed on this listener")]
    StartTlsNotAllowed,

    #[error("No TLS key material is configured on this listener")]
    TlsUnavailable,

    #[error("Unable to create the security provider: {0}")]
    ProviderCreation(String),
}

impl SecurityNegotiationError {
    pub fn result_code(&self) -> ResultCode {
        match self {
            SecurityNegotiationError::TlsAlreadyActive
            | SecurityNegotiationError::NegotiationPending => ResultCode::OPERATIONS_ERROR,
            SecurityNegotiationError::StartTlsNotAllowed
            | SecurityNegotiationError::TlsUnavailable => ResultCode::UNAVAILABLE,
            SecurityNegotiationError::ProviderCreation(_) => ResultCode::OTHER,
        }
    }
}

impl PartialEq for LdapError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (LdapError::Io(e1), LdapError::Io(e2)) => e1.to_string() == e2.to_string(),
            (LdapError::Decode(s1), LdapError::Decode(s2)) => s1 == s2,
            (
                LdapError::MaxRequestSizeExceeded { size: s1, max: m1 },
                LdapError::MaxRequestSizeExceeded { size: s2, max: m2 },
            ) => s1 == s2 && m1 == m2,
            (LdapError::Tls(s1), LdapError::Tls(s2)) => s1 == s2,
            (LdapError::Sasl(s1), LdapError::Sasl(s2)) => s1 == s2,
            (LdapError::ChannelClosed(s1), LdapError::ChannelClosed(s2)) => s1 == s2,
            (
                LdapError::WriteTimedOut { timeout_ms: t1 },
                LdapError::WriteTimedOut { timeout_ms: t2 },
            ) => t1 == t2,
            (
                LdapError::Directory { code: c1, message: m1 },
                LdapError::Directory { code: c2, message: m2 },
            ) => c1 == c2 && m1 == m2,
            (LdapError::Internal(s1), LdapError::Internal(s2)) => s1 == s2,
            _ => false,
        }
    }
}

// --- From trait implementations for easy error conversion ---

impl From<std::io::Error> for LdapError {
    fn from(e: std::io::Error) -> Self {
        LdapError::Io(Arc::new(e))
    }
}

impl From<rustls::Error> for LdapError {
    fn from(e: rustls::Error) -> Self {
        LdapError::Tls(e.to_string())
    }
}

impl From<std::string::FromUtf8Error> for LdapError {
    fn from(e: std::string::FromUtf8Error) -> Self {
        LdapError::Decode(format!("invalid UTF-8 in string value: {e}"))
    }
}
