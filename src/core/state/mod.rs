// src/core/state/mod.rs

//! Defines the server-wide `ServerContext` and the listener statistics it
//! carries.

mod core;
mod stats;

pub use core::{DisconnectListener, FinalizerJob, LogReloadHandle, ServerContext, ServerInit};
pub use stats::{LdapStatistics, StatisticsSnapshot};
