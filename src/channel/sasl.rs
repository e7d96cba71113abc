// src/channel/sasl.rs

//! A SASL integrity/confidentiality layer. Each wrapped buffer travels as a
//! four-octet big-endian length followed by the wrapped bytes (RFC 4422
//! section 3.7).

use super::{ByteChannel, ReadStatus, SecurityProvider};
use crate::core::LdapError;
use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use std::sync::Arc;

const LENGTH_PREFIX: usize = 4;

/// The mechanism-specific half of a SASL security layer, supplied by the
/// bind handler once negotiation succeeds.
pub trait SaslSecurityProvider: Send + Sync {
    fn mechanism(&self) -> &str;

    fn ssf(&self) -> u32;

    /// True when the layer encrypts, false for integrity-only protection.
    fn is_confidential(&self) -> bool;

    /// The largest cleartext buffer that may be wrapped at once.
    fn max_buffer_size(&self) -> usize;

    fn wrap(&self, clear: &[u8]) -> Result<Vec<u8>, LdapError>;

    fn unwrap(&self, wrapped: &[u8]) -> Result<Vec<u8>, LdapError>;
}

pub struct SaslChannel {
    inner: Arc<dyn ByteChannel>,
    provider: Box<dyn SaslSecurityProvider>,
    /// Wrapped bytes read from `inner` that do not yet form a whole buffer.
    incoming: Mutex<BytesMut>,
    write_lock: Mutex<()>,
}

impl SaslChannel {
    pub fn new(inner: Arc<dyn ByteChannel>, provider: Box<dyn SaslSecurityProvider>) -> Self {
        Self {
            inner,
            provider,
            incoming: Mutex::new(BytesMut::new()),
            write_lock: Mutex::new(()),
        }
    }

    pub fn is_confidential(&self) -> bool {
        self.provider.is_confidential()
    }
}

impl ByteChannel for SaslChannel {
    fn read(&self, buf: &mut BytesMut) -> Result<ReadStatus, LdapError> {
        let mut incoming = self.incoming.lock();
        let status = self.inner.read(&mut incoming)?;

        let max = self.provider.max_buffer_size();
        let mut total = 0;
        while incoming.len() >= LENGTH_PREFIX {
            let len = u32::from_be_bytes([incoming[0], incoming[1], incoming[2], incoming[3]])
                as usize;
            if max > 0 && len > max {
                return Err(LdapError::Sasl(format!(
                    "wrapped buffer of {len} bytes exceeds the negotiated maximum of {max}"
                )));
            }
            if incoming.len() < LENGTH_PREFIX + len {
                break;
            }
            incoming.advance(LENGTH_PREFIX);
            let wrapped = incoming.split_to(len);
            let clear = self.provider.unwrap(&wrapped)?;
            buf.extend_from_slice(&clear);
            total += clear.len();
        }

        Ok(match (total, status) {
            (0, ReadStatus::Eof) => ReadStatus::Eof,
            (0, _) => ReadStatus::WouldBlock,
            (n, _) => ReadStatus::Data(n),
        })
    }

    fn write(&self, data: &[u8]) -> Result<usize, LdapError> {
        let _guard = self.write_lock.lock();
        let chunk_size = match self.provider.max_buffer_size() {
            0 => data.len().max(1),
            n => n,
        };
        for chunk in data.chunks(chunk_size) {
            let wrapped = self.provider.wrap(chunk)?;
            let mut frame = Vec::with_capacity(LENGTH_PREFIX + wrapped.len());
            frame.extend_from_slice(&(wrapped.len() as u32).to_be_bytes());
            frame.extend_from_slice(&wrapped);
            self.inner.write(&frame)?;
        }
        Ok(data.len())
    }

    fn is_open(&self) -> bool {
        self.inner.is_open()
    }

    fn close(&self) {
        self.inner.close();
    }
}

impl SecurityProvider for SaslChannel {
    fn name(&self) -> &str {
        self.provider.mechanism()
    }

    fn ssf(&self) -> u32 {
        self.provider.ssf()
    }

    fn is_secure(&self) -> bool {
        self.provider.is_confidential()
    }
}
