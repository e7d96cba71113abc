// src/core/protocol/codec.rs

//! A `tokio_util::codec` implementation that frames `LDAPMessage` PDUs out of
//! a continuous byte stream and serializes responses back into bytes.

use super::ber::{BerWriter, TAG_SEQUENCE, read_header};
use super::message::LdapMessage;
use crate::core::LdapError;
use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

const MAX_RESERVE: usize = 64 * 1024;

/// Frames and encodes `LdapMessage`s.
///
/// A `max_request_size` of zero disables the size limit.
#[derive(Debug, Clone, Copy, Default)]
pub struct LdapMessageCodec {
    max_request_size: usize,
}

impl LdapMessageCodec {
    pub fn new(max_request_size: usize) -> Self {
        Self { max_request_size }
    }

    pub fn max_request_size(&self) -> usize {
        self.max_request_size
    }

    /// Returns the total length of the next PDU once its header is buffered.
    ///
    /// The size limit is enforced as soon as the length is known, so an
    /// oversized request is rejected before its body is read.
    pub fn frame_length(&self, buf: &[u8]) -> Result<Option<usize>, LdapError> {
        let Some(&tag) = buf.first() else {
            return Ok(None);
        };
        if tag != TAG_SEQUENCE {
            return Err(LdapError::Decode(format!(
                "expected an LDAPMessage sequence but found tag 0x{tag:02x}"
            )));
        }
        let Some((header, len)) = read_header(buf)? else {
            return Ok(None);
        };
        let total = header + len;
        if self.max_request_size > 0 && total > self.max_request_size {
            return Err(LdapError::MaxRequestSizeExceeded {
                size: total,
                max: self.max_request_size,
            });
        }
        Ok(Some(total))
    }

    /// True when `buf` holds at least one complete PDU.
    pub fn has_complete_message(&self, buf: &[u8]) -> Result<bool, LdapError> {
        Ok(matches!(self.frame_length(buf)?, Some(total) if buf.len() >= total))
    }
}

impl Decoder for LdapMessageCodec {
    type Item = LdapMessage;
    type Error = LdapError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>, Self::Error> {
        let Some(total) = self.frame_length(src)? else {
            return Ok(None);
        };
        if src.len() < total {
            // An unlimited codec trusts the peer's length only this far.
            src.reserve((total - src.len()).min(MAX_RESERVE));
            return Ok(None);
        }
        // `frame_length` succeeded, so the header is complete.
        let header = read_header(src)?.map(|(h, _)| h).unwrap_or(0);
        let frame = src.split_to(total);
        // The frame is consumed either way; a malformed PDU is never retried.
        LdapMessage::decode(&frame[header..]).map(Some)
    }
}

impl Encoder<LdapMessage> for LdapMessageCodec {
    type Error = LdapError;

    fn encode(&mut self, item: LdapMessage, dst: &mut BytesMut) -> Result<(), Self::Error> {
        encode_message(&item, dst);
        Ok(())
    }
}

/// Appends the BER encoding of `message` to `dst`.
pub fn encode_message(message: &LdapMessage, dst: &mut BytesMut) {
    message.encode(&mut BerWriter::new(dst));
}
