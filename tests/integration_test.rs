// tests/integration_test.rs

//! Integration tests for ldapgate
//!
//! These tests drive the connection layer end-to-end over loopback sockets,
//! with a real request handler thread and work queue.

mod integration {
    pub mod ldap_session_test;
    pub mod test_helpers;
}
