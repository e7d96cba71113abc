// tests/integration/mod.rs

//! Integration tests for ldapgate
//!
//! These tests drive client sessions end-to-end over loopback sockets.

pub mod ldap_session_test;
pub mod test_helpers;
