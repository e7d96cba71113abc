// src/channel/mod.rs

//! The layered byte channels a connection reads and writes through.
//!
//! Traffic flows socket -> `TimeoutWriteChannel` -> TLS stage -> SASL stage.
//! Each stage is a `RedirectingChannel` that passes data straight through
//! until a security provider is promoted into it.

mod redirect;
mod sasl;
mod timeout;
mod tls;

pub use redirect::{RedirectingChannel, SecurityProvider, SecurityStage};
pub use sasl::{SaslChannel, SaslSecurityProvider};
pub use timeout::{DEFAULT_MAX_BLOCKED_WRITE_TIME, TimeoutWriteChannel};
pub use tls::{TlsChannel, TlsProviderFactory};

use crate::core::LdapError;
use bytes::BytesMut;

/// The outcome of a non-blocking read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadStatus {
    /// This many bytes were appended to the buffer.
    Data(usize),
    /// Nothing is available right now.
    WouldBlock,
    /// The peer closed the stream.
    Eof,
}

/// A bidirectional byte stream shared between the request-handler thread
/// (reads) and worker threads (writes).
pub trait ByteChannel: Send + Sync {
    /// Appends everything currently readable to `buf` without blocking.
    fn read(&self, buf: &mut BytesMut) -> Result<ReadStatus, LdapError>;

    /// Writes all of `data`, blocking for at most the channel's configured
    /// write timeout. Returns the number of bytes accepted.
    fn write(&self, data: &[u8]) -> Result<usize, LdapError>;

    fn is_open(&self) -> bool;

    fn close(&self);
}

pub(crate) fn closed_error(what: &str) -> LdapError {
    LdapError::ChannelClosed(format!("{what} is closed"))
}
