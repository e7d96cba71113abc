// src/core/state/core.rs

//! Defines `ServerContext`, the shared handle every connection is built with.

use super::stats::LdapStatistics;
use crate::channel::TlsProviderFactory;
use crate::config::{Config, ListenerSettings};
use crate::connection::ClientConnection;
use crate::core::LdapError;
use crate::core::disconnect::DisconnectReason;
use crate::core::encoder::EncoderPool;
use crate::core::workqueue::WorkQueue;
use arc_swap::ArcSwap;
use dashmap::DashMap;
use parking_lot::RwLock;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use tracing_subscriber::{filter::EnvFilter, reload};

/// The handle used to change the log filter at runtime.
pub type LogReloadHandle = reload::Handle<EnvFilter, tracing_subscriber::Registry>;

/// Notified after every connection has been disconnected.
pub trait DisconnectListener: Send + Sync {
    fn connection_closed(
        &self,
        connection: &ClientConnection,
        reason: DisconnectReason,
        message: Option<&str>,
    );
}

/// A disconnected connection whose channels are due to be closed.
pub struct FinalizerJob {
    pub connection: Arc<ClientConnection>,
    pub due: Instant,
}

/// Contains everything produced by `ServerContext::initialize` that the
/// background tasks consume.
pub struct ServerInit {
    /// The fully initialized, shared context.
    pub context: Arc<ServerContext>,
    /// Receives connections waiting for their channels to be closed.
    pub finalizer_rx: mpsc::UnboundedReceiver<FinalizerJob>,
}

/// Server-wide connection state: the registry of live connections, the
/// listener policy, and the collaborators every connection calls into.
pub struct ServerContext {
    /// Listener policy. Swapped as a whole when the configuration changes.
    settings: ArcSwap<ListenerSettings>,
    max_clients: usize,
    next_connection_id: AtomicU64,
    /// All registered connections, keyed by connection ID.
    pub clients: DashMap<u64, Arc<ClientConnection>>,
    pub stats: Arc<LdapStatistics>,
    pub encoder_pool: EncoderPool,
    work_queue: Arc<dyn WorkQueue>,
    tls: Option<TlsProviderFactory>,
    disconnect_listeners: RwLock<Vec<Arc<dyn DisconnectListener>>>,
    shutting_down: AtomicBool,
    finalizer_tx: mpsc::UnboundedSender<FinalizerJob>,
    log_reload_handle: Option<Arc<LogReloadHandle>>,
}

impl std::fmt::Debug for ServerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerContext")
            .field("max_clients", &self.max_clients)
            .field("clients", &self.clients.len())
            .field("shutting_down", &self.is_shutting_down())
            .finish_non_exhaustive()
    }
}

impl ServerContext {
    /// Builds the context from the resolved configuration.
    pub fn initialize(
        config: &Config,
        work_queue: Arc<dyn WorkQueue>,
        tls: Option<TlsProviderFactory>,
        log_reload_handle: Option<Arc<LogReloadHandle>>,
    ) -> ServerInit {
        let (finalizer_tx, finalizer_rx) = mpsc::unbounded_channel();
        let settings = config.listener.clone();

        let context = Arc::new(Self {
            stats: Arc::new(LdapStatistics::new(settings.keep_stats)),
            encoder_pool: EncoderPool::new(settings.buffer_size),
            settings: ArcSwap::from_pointee(settings),
            max_clients: config.max_clients,
            next_connection_id: AtomicU64::new(1),
            clients: DashMap::new(),
            work_queue,
            tls,
            disconnect_listeners: RwLock::new(Vec::new()),
            shutting_down: AtomicBool::new(false),
            finalizer_tx,
            log_reload_handle,
        });

        ServerInit {
            context,
            finalizer_rx,
        }
    }

    pub fn settings(&self) -> Arc<ListenerSettings> {
        self.settings.load_full()
    }

    /// Applies new listener settings. Connections observe the change on
    /// their next policy query; pooled encoders are rebuilt for the new
    /// buffer size.
    pub fn update_settings(&self, settings: ListenerSettings) {
        self.encoder_pool.set_buffer_size(settings.buffer_size);
        self.stats.set_enabled(settings.keep_stats);
        self.settings.store(Arc::new(settings));
        info!("Listener settings updated.");
    }

    /// Hands out connection IDs. IDs start at 1 and never repeat.
    pub fn next_connection_id(&self) -> u64 {
        self.next_connection_id.fetch_add(1, Ordering::Relaxed)
    }

    pub fn work_queue(&self) -> &Arc<dyn WorkQueue> {
        &self.work_queue
    }

    pub fn tls(&self) -> Option<&TlsProviderFactory> {
        self.tls.as_ref()
    }

    /// Adds a connection to the registry. Returns false if the server is
    /// shutting down or `max_clients` connections are already registered;
    /// the caller is then expected to disconnect it.
    pub fn register_connection(&self, connection: &Arc<ClientConnection>) -> bool {
        if self.is_shutting_down() {
            return false;
        }
        if self.clients.len() >= self.max_clients {
            warn!(
                "Rejecting connection {}: the limit of {} clients has been reached.",
                connection.connection_id(),
                self.max_clients
            );
            return false;
        }
        self.clients
            .insert(connection.connection_id(), connection.clone());
        self.stats.update_connect();
        true
    }

    /// Removes a disconnected connection from the registry and runs the
    /// post-disconnect listeners.
    pub fn connection_closed(
        &self,
        connection: &ClientConnection,
        reason: DisconnectReason,
        message: Option<&str>,
    ) {
        if self
            .clients
            .remove(&connection.connection_id())
            .is_some()
        {
            self.stats.update_disconnect();
        }
        let listeners = self.disconnect_listeners.read().clone();
        for listener in listeners {
            listener.connection_closed(connection, reason, message);
        }
    }

    pub fn add_disconnect_listener(&self, listener: Arc<dyn DisconnectListener>) {
        self.disconnect_listeners.write().push(listener);
    }

    /// Queues `connection` for closure after the configured finalizer delay.
    /// If the finalizer task is gone the channels are closed right away.
    pub fn schedule_finalizer(&self, connection: Arc<ClientConnection>) {
        let due = Instant::now() + self.settings().finalizer_delay;
        if let Err(mpsc::error::SendError(job)) =
            self.finalizer_tx.send(FinalizerJob { connection, due })
        {
            debug!(
                "Finalizer unavailable; closing connection {} immediately.",
                job.connection.connection_id()
            );
            job.connection.finalize();
        }
    }

    /// A point-in-time copy of the registered connections.
    pub fn connections(&self) -> Vec<Arc<ClientConnection>> {
        self.clients.iter().map(|entry| entry.value().clone()).collect()
    }

    pub fn connection_count(&self) -> usize {
        self.clients.len()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Stops further registrations.
    pub fn begin_shutdown(&self) {
        if !self.shutting_down.swap(true, Ordering::AcqRel) {
            info!("Server context entering shutdown; no new connections will be registered.");
        }
    }

    /// Replaces the active log filter, e.g. `"info,ldapgate::connection=debug"`.
    pub fn set_log_level(&self, directives: &str) -> Result<(), LdapError> {
        let handle = self
            .log_reload_handle
            .as_ref()
            .ok_or_else(|| LdapError::Internal("log level reloading is not available".into()))?;
        let filter = EnvFilter::try_new(directives)
            .map_err(|e| LdapError::Internal(format!("invalid log filter '{directives}': {e}")))?;
        handle
            .reload(filter)
            .map_err(|e| LdapError::Internal(format!("failed to reload log filter: {e}")))?;
        info!("Log level changed to '{}'.", directives);
        Ok(())
    }
}
