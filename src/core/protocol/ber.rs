// src/core/protocol/ber.rs

//! Minimal BER (X.690 basic encoding rules) primitives for the LDAP message
//! envelope: definite-length TLV framing, INTEGER/ENUMERATED/BOOLEAN and
//! OCTET STRING values, and nested constructed elements.

use crate::core::LdapError;
use bytes::{BufMut, BytesMut};

pub const TAG_BOOLEAN: u8 = 0x01;
pub const TAG_INTEGER: u8 = 0x02;
pub const TAG_OCTET_STRING: u8 = 0x04;
pub const TAG_ENUMERATED: u8 = 0x0A;
pub const TAG_SEQUENCE: u8 = 0x30;

/// Lengths above this many octets are never legitimate for an LDAP element.
const MAX_LENGTH_OCTETS: usize = 4;

/// Parses the tag and length of the element at the start of `buf`.
///
/// Returns `Ok(None)` when the header is not fully buffered yet, otherwise the
/// header size and the content length.
pub fn read_header(buf: &[u8]) -> Result<Option<(usize, usize)>, LdapError> {
    if buf.len() < 2 {
        return Ok(None);
    }
    let first = buf[1];
    if first & 0x80 == 0 {
        return Ok(Some((2, first as usize)));
    }
    let count = (first & 0x7F) as usize;
    if count == 0 {
        return Err(LdapError::Decode(
            "indefinite-length encoding is not allowed".into(),
        ));
    }
    if count > MAX_LENGTH_OCTETS {
        return Err(LdapError::Decode(format!(
            "length field of {count} octets is too large"
        )));
    }
    if buf.len() < 2 + count {
        return Ok(None);
    }
    let len = buf[2..2 + count]
        .iter()
        .fold(0usize, |acc, b| (acc << 8) | *b as usize);
    Ok(Some((2 + count, len)))
}

/// Decodes a two's-complement big-endian integer of 1 to 8 octets.
pub fn decode_integer(content: &[u8]) -> Result<i64, LdapError> {
    if content.is_empty() || content.len() > 8 {
        return Err(LdapError::Decode(format!(
            "invalid integer length {}",
            content.len()
        )));
    }
    let mut value: i64 = if content[0] & 0x80 != 0 { -1 } else { 0 };
    for b in content {
        value = (value << 8) | *b as i64;
    }
    Ok(value)
}

/// A cursor over a buffer of consecutive BER elements.
#[derive(Debug, Clone, Copy)]
pub struct BerReader<'a> {
    data: &'a [u8],
}

impl<'a> BerReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data }
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the tag of the next element without consuming it.
    pub fn peek_tag(&self) -> Option<u8> {
        self.data.first().copied()
    }

    /// Reads the next complete element, returning its tag and content.
    pub fn read_element(&mut self) -> Result<(u8, &'a [u8]), LdapError> {
        let (header, len) = read_header(self.data)?
            .ok_or_else(|| LdapError::Decode("truncated element header".into()))?;
        let end = header
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or_else(|| LdapError::Decode("element length exceeds available data".into()))?;
        let tag = self.data[0];
        let content = &self.data[header..end];
        self.data = &self.data[end..];
        Ok((tag, content))
    }

    /// Reads the next element and checks that it carries `tag`.
    pub fn expect(&mut self, tag: u8) -> Result<&'a [u8], LdapError> {
        let (actual, content) = self.read_element()?;
        if actual != tag {
            return Err(LdapError::Decode(format!(
                "expected tag 0x{tag:02x} but found 0x{actual:02x}"
            )));
        }
        Ok(content)
    }

    pub fn read_integer(&mut self) -> Result<i64, LdapError> {
        decode_integer(self.expect(TAG_INTEGER)?)
    }

    pub fn read_enumerated(&mut self) -> Result<i64, LdapError> {
        decode_integer(self.expect(TAG_ENUMERATED)?)
    }

    pub fn read_boolean(&mut self) -> Result<bool, LdapError> {
        let content = self.expect(TAG_BOOLEAN)?;
        match content {
            [b] => Ok(*b != 0),
            _ => Err(LdapError::Decode("invalid boolean length".into())),
        }
    }

    pub fn read_octet_string(&mut self) -> Result<&'a [u8], LdapError> {
        self.expect(TAG_OCTET_STRING)
    }

    pub fn read_string(&mut self) -> Result<String, LdapError> {
        self.read_string_with_tag(TAG_OCTET_STRING)
    }

    pub fn read_string_with_tag(&mut self, tag: u8) -> Result<String, LdapError> {
        Ok(String::from_utf8(self.expect(tag)?.to_vec())?)
    }
}

/// Appends BER elements to a `BytesMut`.
pub struct BerWriter<'a> {
    buf: &'a mut BytesMut,
}

impl<'a> BerWriter<'a> {
    pub fn new(buf: &'a mut BytesMut) -> Self {
        Self { buf }
    }

    fn write_header(&mut self, tag: u8, len: usize) {
        self.buf.put_u8(tag);
        if len < 0x80 {
            self.buf.put_u8(len as u8);
        } else {
            let bytes = (len as u32).to_be_bytes();
            let skip = bytes.iter().take_while(|b| **b == 0).count();
            self.buf.put_u8(0x80 | (4 - skip) as u8);
            self.buf.extend_from_slice(&bytes[skip..]);
        }
    }

    /// Writes a primitive element with arbitrary content.
    pub fn write_primitive(&mut self, tag: u8, content: &[u8]) {
        self.write_header(tag, content.len());
        self.buf.extend_from_slice(content);
    }

    pub fn write_integer_with_tag(&mut self, tag: u8, value: i64) {
        let bytes = value.to_be_bytes();
        // Drop leading octets that carry only sign extension.
        let mut start = 0;
        while start < 7 {
            let cur = bytes[start];
            let next_high = bytes[start + 1] & 0x80;
            if (cur == 0x00 && next_high == 0) || (cur == 0xFF && next_high != 0) {
                start += 1;
            } else {
                break;
            }
        }
        self.write_primitive(tag, &bytes[start..]);
    }

    pub fn write_integer(&mut self, value: i64) {
        self.write_integer_with_tag(TAG_INTEGER, value);
    }

    pub fn write_enumerated(&mut self, value: i64) {
        self.write_integer_with_tag(TAG_ENUMERATED, value);
    }

    pub fn write_boolean(&mut self, value: bool) {
        self.write_primitive(TAG_BOOLEAN, &[if value { 0xFF } else { 0x00 }]);
    }

    pub fn write_octet_string(&mut self, value: &[u8]) {
        self.write_primitive(TAG_OCTET_STRING, value);
    }

    /// Writes a constructed element whose content is produced by `f`.
    pub fn write_constructed<F>(&mut self, tag: u8, f: F)
    where
        F: FnOnce(&mut BerWriter<'_>),
    {
        let mut content = BytesMut::new();
        f(&mut BerWriter::new(&mut content));
        self.write_header(tag, content.len());
        self.buf.extend_from_slice(&content);
    }
}
