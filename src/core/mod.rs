// src/core/mod.rs

//! The central module containing the connection layer's protocol model,
//! operation bookkeeping and shared state.

pub mod disconnect;
pub mod encoder;
pub mod errors;
pub mod executor;
pub mod metrics;
pub mod operation;
pub mod protocol;
pub mod state;
pub mod tasks;
pub mod workqueue;

pub use disconnect::DisconnectReason;
pub use errors::{AdmissionError, LdapError, SecurityNegotiationError};
pub use protocol::ResultCode;
