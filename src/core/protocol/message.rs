// src/core/protocol/message.rs

//! The LDAPMessage envelope (RFC 4511 section 4.1.1) and its protocol ops.
//!
//! Only the fields the connection layer acts on are decoded structurally.
//! Search, add, delete, modify, modify-DN and compare request bodies are kept
//! as opaque content octets for the execution layer, and search result
//! entries are sent as pre-encoded content.

use super::ber::{BerReader, BerWriter, TAG_OCTET_STRING, TAG_SEQUENCE};
use super::result_code::ResultCode;
use crate::core::LdapError;
use bytes::Bytes;

pub const OP_BIND_REQUEST: u8 = 0x60;
pub const OP_BIND_RESPONSE: u8 = 0x61;
pub const OP_UNBIND_REQUEST: u8 = 0x42;
pub const OP_SEARCH_REQUEST: u8 = 0x63;
pub const OP_SEARCH_RESULT_ENTRY: u8 = 0x64;
pub const OP_SEARCH_RESULT_DONE: u8 = 0x65;
pub const OP_SEARCH_RESULT_REFERENCE: u8 = 0x73;
pub const OP_MODIFY_REQUEST: u8 = 0x66;
pub const OP_MODIFY_RESPONSE: u8 = 0x67;
pub const OP_ADD_REQUEST: u8 = 0x68;
pub const OP_ADD_RESPONSE: u8 = 0x69;
pub const OP_DELETE_REQUEST: u8 = 0x4A;
pub const OP_DELETE_RESPONSE: u8 = 0x6B;
pub const OP_MODIFY_DN_REQUEST: u8 = 0x6C;
pub const OP_MODIFY_DN_RESPONSE: u8 = 0x6D;
pub const OP_COMPARE_REQUEST: u8 = 0x6E;
pub const OP_COMPARE_RESPONSE: u8 = 0x6F;
pub const OP_ABANDON_REQUEST: u8 = 0x50;
pub const OP_EXTENDED_REQUEST: u8 = 0x77;
pub const OP_EXTENDED_RESPONSE: u8 = 0x78;
pub const OP_INTERMEDIATE_RESPONSE: u8 = 0x79;

const TAG_CONTROLS: u8 = 0xA0;
const TAG_AUTH_SIMPLE: u8 = 0x80;
const TAG_AUTH_SASL: u8 = 0xA3;
const TAG_REFERRAL: u8 = 0xA3;
const TAG_SERVER_SASL_CREDS: u8 = 0x87;
const TAG_EXT_REQ_NAME: u8 = 0x80;
const TAG_EXT_REQ_VALUE: u8 = 0x81;
const TAG_EXT_RESP_NAME: u8 = 0x8A;
const TAG_EXT_RESP_VALUE: u8 = 0x8B;
const TAG_INTERMEDIATE_NAME: u8 = 0x80;
const TAG_INTERMEDIATE_VALUE: u8 = 0x81;

/// A request or response control.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Control {
    pub oid: String,
    pub critical: bool,
    pub value: Option<Bytes>,
}

impl Control {
    pub fn new(oid: impl Into<String>, critical: bool, value: Option<Bytes>) -> Self {
        Self {
            oid: oid.into(),
            critical,
            value,
        }
    }
}

/// The authentication choice of a bind request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BindAuthentication {
    Simple(Bytes),
    Sasl {
        mechanism: String,
        credentials: Option<Bytes>,
    },
    /// An authentication choice this server does not recognise. Carrying it
    /// through decoding lets the connection answer with a protocol error
    /// instead of dropping the message.
    Unknown(u8),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BindRequest {
    pub version: i64,
    pub name: String,
    pub authentication: BindAuthentication,
}

impl BindRequest {
    pub fn is_sasl(&self) -> bool {
        matches!(self.authentication, BindAuthentication::Sasl { .. })
    }
}

/// The common `LDAPResult` body of most responses.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct LdapResult {
    pub code: ResultCode,
    pub matched_dn: String,
    pub diagnostic: String,
    pub referrals: Vec<String>,
}

impl LdapResult {
    pub fn new(code: ResultCode, diagnostic: impl Into<String>) -> Self {
        Self {
            code,
            matched_dn: String::new(),
            diagnostic: diagnostic.into(),
            referrals: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProtocolOp {
    BindRequest(BindRequest),
    BindResponse {
        result: LdapResult,
        server_sasl_credentials: Option<Bytes>,
    },
    UnbindRequest,
    SearchRequest(Bytes),
    SearchResultEntry(Bytes),
    SearchResultDone(LdapResult),
    SearchResultReference(Vec<String>),
    ModifyRequest(Bytes),
    ModifyResponse(LdapResult),
    AddRequest(Bytes),
    AddResponse(LdapResult),
    DeleteRequest(Bytes),
    DeleteResponse(LdapResult),
    ModifyDnRequest(Bytes),
    ModifyDnResponse(LdapResult),
    CompareRequest(Bytes),
    CompareResponse(LdapResult),
    AbandonRequest(i32),
    ExtendedRequest {
        oid: String,
        value: Option<Bytes>,
    },
    ExtendedResponse {
        result: LdapResult,
        oid: Option<String>,
        value: Option<Bytes>,
    },
    IntermediateResponse {
        oid: Option<String>,
        value: Option<Bytes>,
    },
}

impl ProtocolOp {
    /// The ASN.1 name of the op, used in log and diagnostic messages.
    pub fn name(&self) -> &'static str {
        match self {
            ProtocolOp::BindRequest(_) => "bindRequest",
            ProtocolOp::BindResponse { .. } => "bindResponse",
            ProtocolOp::UnbindRequest => "unbindRequest",
            ProtocolOp::SearchRequest(_) => "searchRequest",
            ProtocolOp::SearchResultEntry(_) => "searchResEntry",
            ProtocolOp::SearchResultDone(_) => "searchResDone",
            ProtocolOp::SearchResultReference(_) => "searchResRef",
            ProtocolOp::ModifyRequest(_) => "modifyRequest",
            ProtocolOp::ModifyResponse(_) => "modifyResponse",
            ProtocolOp::AddRequest(_) => "addRequest",
            ProtocolOp::AddResponse(_) => "addResponse",
            ProtocolOp::DeleteRequest(_) => "delRequest",
            ProtocolOp::DeleteResponse(_) => "delResponse",
            ProtocolOp::ModifyDnRequest(_) => "modDNRequest",
            ProtocolOp::ModifyDnResponse(_) => "modDNResponse",
            ProtocolOp::CompareRequest(_) => "compareRequest",
            ProtocolOp::CompareResponse(_) => "compareResponse",
            ProtocolOp::AbandonRequest(_) => "abandonRequest",
            ProtocolOp::ExtendedRequest { .. } => "extendedReq",
            ProtocolOp::ExtendedResponse { .. } => "extendedResp",
            ProtocolOp::IntermediateResponse { .. } => "intermediateResponse",
        }
    }

    /// The result carried by a response op, if any.
    pub fn result(&self) -> Option<&LdapResult> {
        match self {
            ProtocolOp::BindResponse { result, .. }
            | ProtocolOp::ExtendedResponse { result, .. }
            | ProtocolOp::SearchResultDone(result)
            | ProtocolOp::ModifyResponse(result)
            | ProtocolOp::AddResponse(result)
            | ProtocolOp::DeleteResponse(result)
            | ProtocolOp::ModifyDnResponse(result)
            | ProtocolOp::CompareResponse(result) => Some(result),
            _ => None,
        }
    }

    fn encode(&self, w: &mut BerWriter<'_>) {
        match self {
            ProtocolOp::BindRequest(bind) => w.write_constructed(OP_BIND_REQUEST, |w| {
                w.write_integer(bind.version);
                w.write_octet_string(bind.name.as_bytes());
                match &bind.authentication {
                    BindAuthentication::Simple(password) => {
                        w.write_primitive(TAG_AUTH_SIMPLE, password)
                    }
                    BindAuthentication::Sasl {
                        mechanism,
                        credentials,
                    } => w.write_constructed(TAG_AUTH_SASL, |w| {
                        w.write_octet_string(mechanism.as_bytes());
                        if let Some(creds) = credentials {
                            w.write_octet_string(creds);
                        }
                    }),
                    BindAuthentication::Unknown(tag) => w.write_primitive(*tag, &[]),
                }
            }),
            ProtocolOp::BindResponse {
                result,
                server_sasl_credentials,
            } => w.write_constructed(OP_BIND_RESPONSE, |w| {
                encode_result(w, result);
                if let Some(creds) = server_sasl_credentials {
                    w.write_primitive(TAG_SERVER_SASL_CREDS, creds);
                }
            }),
            ProtocolOp::UnbindRequest => w.write_primitive(OP_UNBIND_REQUEST, &[]),
            ProtocolOp::SearchRequest(body) => w.write_primitive(OP_SEARCH_REQUEST, body),
            ProtocolOp::SearchResultEntry(body) => w.write_primitive(OP_SEARCH_RESULT_ENTRY, body),
            ProtocolOp::SearchResultDone(result) => {
                w.write_constructed(OP_SEARCH_RESULT_DONE, |w| encode_result(w, result))
            }
            ProtocolOp::SearchResultReference(urls) => {
                w.write_constructed(OP_SEARCH_RESULT_REFERENCE, |w| {
                    for url in urls {
                        w.write_octet_string(url.as_bytes());
                    }
                })
            }
            ProtocolOp::ModifyRequest(body) => w.write_primitive(OP_MODIFY_REQUEST, body),
            ProtocolOp::ModifyResponse(result) => {
                w.write_constructed(OP_MODIFY_RESPONSE, |w| encode_result(w, result))
            }
            ProtocolOp::AddRequest(body) => w.write_primitive(OP_ADD_REQUEST, body),
            ProtocolOp::AddResponse(result) => {
                w.write_constructed(OP_ADD_RESPONSE, |w| encode_result(w, result))
            }
            ProtocolOp::DeleteRequest(body) => w.write_primitive(OP_DELETE_REQUEST, body),
            ProtocolOp::DeleteResponse(result) => {
                w.write_constructed(OP_DELETE_RESPONSE, |w| encode_result(w, result))
            }
            ProtocolOp::ModifyDnRequest(body) => w.write_primitive(OP_MODIFY_DN_REQUEST, body),
            ProtocolOp::ModifyDnResponse(result) => {
                w.write_constructed(OP_MODIFY_DN_RESPONSE, |w| encode_result(w, result))
            }
            ProtocolOp::CompareRequest(body) => w.write_primitive(OP_COMPARE_REQUEST, body),
            ProtocolOp::CompareResponse(result) => {
                w.write_constructed(OP_COMPARE_RESPONSE, |w| encode_result(w, result))
            }
            ProtocolOp::AbandonRequest(id) => {
                w.write_integer_with_tag(OP_ABANDON_REQUEST, *id as i64)
            }
            ProtocolOp::ExtendedRequest { oid, value } => {
                w.write_constructed(OP_EXTENDED_REQUEST, |w| {
                    w.write_primitive(TAG_EXT_REQ_NAME, oid.as_bytes());
                    if let Some(value) = value {
                        w.write_primitive(TAG_EXT_REQ_VALUE, value);
                    }
                })
            }
            ProtocolOp::ExtendedResponse { result, oid, value } => {
                w.write_constructed(OP_EXTENDED_RESPONSE, |w| {
                    encode_result(w, result);
                    if let Some(oid) = oid {
                        w.write_primitive(TAG_EXT_RESP_NAME, oid.as_bytes());
                    }
                    if let Some(value) = value {
                        w.write_primitive(TAG_EXT_RESP_VALUE, value);
                    }
                })
            }
            ProtocolOp::IntermediateResponse { oid, value } => {
                w.write_constructed(OP_INTERMEDIATE_RESPONSE, |w| {
                    if let Some(oid) = oid {
                        w.write_primitive(TAG_INTERMEDIATE_NAME, oid.as_bytes());
                    }
                    if let Some(value) = value {
                        w.write_primitive(TAG_INTERMEDIATE_VALUE, value);
                    }
                })
            }
        }
    }

    fn decode(tag: u8, content: &[u8]) -> Result<Self, LdapError> {
        let body = || Bytes::copy_from_slice(content);
        let mut r = BerReader::new(content);
        let op = match tag {
            OP_BIND_REQUEST => {
                let version = r.read_integer()?;
                let name = r.read_string()?;
                let (auth_tag, auth) = r.read_element()?;
                let authentication = match auth_tag {
                    TAG_AUTH_SIMPLE => BindAuthentication::Simple(Bytes::copy_from_slice(auth)),
                    TAG_AUTH_SASL => {
                        let mut sasl = BerReader::new(auth);
                        let mechanism = sasl.read_string()?;
                        let credentials = if sasl.is_empty() {
                            None
                        } else {
                            Some(Bytes::copy_from_slice(sasl.read_octet_string()?))
                        };
                        BindAuthentication::Sasl {
                            mechanism,
                            credentials,
                        }
                    }
                    other => BindAuthentication::Unknown(other),
                };
                ProtocolOp::BindRequest(BindRequest {
                    version,
                    name,
                    authentication,
                })
            }
            OP_BIND_RESPONSE => {
                let result = decode_result(&mut r)?;
                let server_sasl_credentials = match r.peek_tag() {
                    Some(TAG_SERVER_SASL_CREDS) => {
                        Some(Bytes::copy_from_slice(r.expect(TAG_SERVER_SASL_CREDS)?))
                    }
                    _ => None,
                };
                ProtocolOp::BindResponse {
                    result,
                    server_sasl_credentials,
                }
            }
            OP_UNBIND_REQUEST => ProtocolOp::UnbindRequest,
            OP_SEARCH_REQUEST => ProtocolOp::SearchRequest(body()),
            OP_SEARCH_RESULT_ENTRY => ProtocolOp::SearchResultEntry(body()),
            OP_SEARCH_RESULT_DONE => ProtocolOp::SearchResultDone(decode_result(&mut r)?),
            OP_SEARCH_RESULT_REFERENCE => {
                let mut urls = Vec::new();
                while !r.is_empty() {
                    urls.push(r.read_string()?);
                }
                ProtocolOp::SearchResultReference(urls)
            }
            OP_MODIFY_REQUEST => ProtocolOp::ModifyRequest(body()),
            OP_MODIFY_RESPONSE => ProtocolOp::ModifyResponse(decode_result(&mut r)?),
            OP_ADD_REQUEST => ProtocolOp::AddRequest(body()),
            OP_ADD_RESPONSE => ProtocolOp::AddResponse(decode_result(&mut r)?),
            OP_DELETE_REQUEST => ProtocolOp::DeleteRequest(body()),
            OP_DELETE_RESPONSE => ProtocolOp::DeleteResponse(decode_result(&mut r)?),
            OP_MODIFY_DN_REQUEST => ProtocolOp::ModifyDnRequest(body()),
            OP_MODIFY_DN_RESPONSE => ProtocolOp::ModifyDnResponse(decode_result(&mut r)?),
            OP_COMPARE_REQUEST => ProtocolOp::CompareRequest(body()),
            OP_COMPARE_RESPONSE => ProtocolOp::CompareResponse(decode_result(&mut r)?),
            OP_ABANDON_REQUEST => {
                let id = super::ber::decode_integer(content)?;
                ProtocolOp::AbandonRequest(message_id_from(id)?)
            }
            OP_EXTENDED_REQUEST => {
                let oid = r.read_string_with_tag(TAG_EXT_REQ_NAME)?;
                let value = match r.peek_tag() {
                    Some(TAG_EXT_REQ_VALUE) => {
                        Some(Bytes::copy_from_slice(r.expect(TAG_EXT_REQ_VALUE)?))
                    }
                    _ => None,
                };
                ProtocolOp::ExtendedRequest { oid, value }
            }
            OP_EXTENDED_RESPONSE => {
                let result = decode_result(&mut r)?;
                let oid = match r.peek_tag() {
                    Some(TAG_EXT_RESP_NAME) => Some(r.read_string_with_tag(TAG_EXT_RESP_NAME)?),
                    _ => None,
                };
                let value = match r.peek_tag() {
                    Some(TAG_EXT_RESP_VALUE) => {
                        Some(Bytes::copy_from_slice(r.expect(TAG_EXT_RESP_VALUE)?))
                    }
                    _ => None,
                };
                ProtocolOp::ExtendedResponse { result, oid, value }
            }
            OP_INTERMEDIATE_RESPONSE => {
                let oid = match r.peek_tag() {
                    Some(TAG_INTERMEDIATE_NAME) => {
                        Some(r.read_string_with_tag(TAG_INTERMEDIATE_NAME)?)
                    }
                    _ => None,
                };
                let value = match r.peek_tag() {
                    Some(TAG_INTERMEDIATE_VALUE) => {
                        Some(Bytes::copy_from_slice(r.expect(TAG_INTERMEDIATE_VALUE)?))
                    }
                    _ => None,
                };
                ProtocolOp::IntermediateResponse { oid, value }
            }
            other => {
                return Err(LdapError::Decode(format!(
                    "unknown protocol op type 0x{other:02x}"
                )));
            }
        };
        Ok(op)
    }
}

/// One complete LDAP PDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LdapMessage {
    pub message_id: i32,
    pub op: ProtocolOp,
    pub controls: Vec<Control>,
}

impl LdapMessage {
    pub fn new(message_id: i32, op: ProtocolOp) -> Self {
        Self {
            message_id,
            op,
            controls: Vec::new(),
        }
    }

    pub fn with_controls(mut self, controls: Vec<Control>) -> Self {
        self.controls = controls;
        self
    }

    /// Writes the complete `LDAPMessage` SEQUENCE.
    pub fn encode(&self, w: &mut BerWriter<'_>) {
        w.write_constructed(TAG_SEQUENCE, |w| {
            w.write_integer(self.message_id as i64);
            self.op.encode(w);
            if !self.controls.is_empty() {
                w.write_constructed(TAG_CONTROLS, |w| {
                    for control in &self.controls {
                        w.write_constructed(TAG_SEQUENCE, |w| {
                            w.write_octet_string(control.oid.as_bytes());
                            if control.critical {
                                w.write_boolean(true);
                            }
                            if let Some(value) = &control.value {
                                w.write_octet_string(value);
                            }
                        });
                    }
                });
            }
        });
    }

    /// Decodes the content octets of an `LDAPMessage` SEQUENCE.
    pub fn decode(content: &[u8]) -> Result<Self, LdapError> {
        let mut r = BerReader::new(content);
        let message_id = message_id_from(r.read_integer()?)?;
        let (tag, op_content) = r.read_element()?;
        let op = ProtocolOp::decode(tag, op_content)?;

        let mut controls = Vec::new();
        if !r.is_empty() {
            let mut seq = BerReader::new(r.expect(TAG_CONTROLS)?);
            while !seq.is_empty() {
                let mut c = BerReader::new(seq.expect(TAG_SEQUENCE)?);
                let oid = c.read_string()?;
                let critical = match c.peek_tag() {
                    Some(super::ber::TAG_BOOLEAN) => c.read_boolean()?,
                    _ => false,
                };
                let value = match c.peek_tag() {
                    Some(TAG_OCTET_STRING) => Some(Bytes::copy_from_slice(c.read_octet_string()?)),
                    _ => None,
                };
                controls.push(Control {
                    oid,
                    critical,
                    value,
                });
            }
        }

        Ok(Self {
            message_id,
            op,
            controls,
        })
    }
}

fn message_id_from(value: i64) -> Result<i32, LdapError> {
    i32::try_from(value)
        .ok()
        .filter(|id| *id >= 0)
        .ok_or_else(|| LdapError::Decode(format!("message id {value} is out of range")))
}

fn encode_result(w: &mut BerWriter<'_>, result: &LdapResult) {
    w.write_enumerated(result.code.value() as i64);
    w.write_octet_string(result.matched_dn.as_bytes());
    w.write_octet_string(result.diagnostic.as_bytes());
    if !result.referrals.is_empty() {
        w.write_constructed(TAG_REFERRAL, |w| {
            for url in &result.referrals {
                w.write_octet_string(url.as_bytes());
            }
        });
    }
}

fn decode_result(r: &mut BerReader<'_>) -> Result<LdapResult, LdapError> {
    let code = ResultCode(r.read_enumerated()? as i32);
    let matched_dn = r.read_string()?;
    let diagnostic = r.read_string()?;
    let mut referrals = Vec::new();
    if r.peek_tag() == Some(TAG_REFERRAL) {
        let mut urls = BerReader::new(r.expect(TAG_REFERRAL)?);
        while !urls.is_empty() {
            referrals.push(urls.read_string()?);
        }
    }
    Ok(LdapResult {
        code,
        matched_dn,
        diagnostic,
        referrals,
    })
}
