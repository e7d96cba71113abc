// tests/property/mod.rs

//! Property-based tests for ldapgate
//!
//! These tests use property-based testing to verify invariants and properties
//! that should always hold, regardless of input values.

pub mod framing_test;
pub mod ready_queue_test;
