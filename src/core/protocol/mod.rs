// src/core/protocol/mod.rs

pub mod ber;
pub mod codec;
pub mod message;
pub mod result_code;

pub use codec::{LdapMessageCodec, encode_message};
pub use message::{
    BindAuthentication, BindRequest, Control, LdapMessage, LdapResult, ProtocolOp,
};
pub use result_code::ResultCode;

/// The LDAP protocol version negotiated when a client never binds.
pub const LDAP_VERSION_3: i32 = 3;
/// The legacy protocol version, which cannot carry controls or referrals.
pub const LDAP_VERSION_2: i32 = 2;

/// OID of the StartTLS extended operation (RFC 4511 section 4.14).
pub const OID_START_TLS: &str = "1.3.6.1.4.1.1466.20037";
/// OID of the unsolicited notice of disconnection (RFC 4511 section 4.4.1).
pub const OID_NOTICE_OF_DISCONNECTION: &str = "1.3.6.1.4.1.1466.20036";
