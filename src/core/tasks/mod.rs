// src/core/tasks/mod.rs

//! Long-running background tasks supporting the connection layer.

pub mod finalizer;
pub mod idle_reaper;
