// src/server/context.rs

use super::request_handler::RequestHandler;
use crate::config::MetricsConfig;
use crate::core::state::{FinalizerJob, ServerContext};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinSet;

/// Holds all the initialized state required to run the listener's main loop.
pub struct ListenerContext {
    pub context: Arc<ServerContext>,
    /// Taken by the spawner when it starts the finalizer task.
    pub finalizer_rx: Option<mpsc::UnboundedReceiver<FinalizerJob>>,
    pub listener: TcpListener,
    pub handlers: Vec<Arc<RequestHandler>>,
    pub metrics: MetricsConfig,
    pub shutdown_tx: broadcast::Sender<()>,
    pub background_tasks: JoinSet<Result<(), anyhow::Error>>,
}
