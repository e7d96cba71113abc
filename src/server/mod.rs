// src/server/mod.rs

use crate::config::Config;
use crate::core::state::LogReloadHandle;
use anyhow::Result;
use std::sync::Arc;

mod connection_loop;
mod context;
mod initialization;
mod metrics_server;
mod request_handler;
mod spawner;

pub use connection_loop::accept_client;
pub use initialization::setup_tls;
pub use metrics_server::router as monitoring_router;
pub use request_handler::{ReadyQueue, ReadySource, RequestHandler};

/// The listener startup function, orchestrating all setup phases.
pub async fn run(config: Config, log_reload_handle: Arc<LogReloadHandle>) -> Result<()> {
    // 1. Initialize the server context, request handlers, TLS and the socket.
    let mut listener_context = initialization::setup(config, log_reload_handle).await?;

    // 2. Spawn all background tasks.
    spawner::spawn_all(&mut listener_context)?;

    // 3. Accept connections until shutdown.
    connection_loop::run(listener_context).await
}
