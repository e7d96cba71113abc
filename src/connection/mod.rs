// src/connection/mod.rs

//! Manages the state of a single client connection: its channel stack,
//! request dispatch, operation tracking, and response delivery.

mod client;
mod dispatch;
mod response;
mod session;

pub use client::{
    ClientConnection, ConnectionScheduler, DataRead, NegotiationKind, TlsCapability,
};
pub use session::{AuthMethod, SessionState};
