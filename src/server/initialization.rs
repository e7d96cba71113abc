// src/server/initialization.rs

//! Handles listener initialization: TLS key material, the work queue, the
//! shared server context, the request-handler threads and the socket.

use super::context::ListenerContext;
use super::request_handler::RequestHandler;
use crate::channel::TlsProviderFactory;
use crate::config::{Config, TlsConfig};
use crate::core::executor::BasicExecutor;
use crate::core::state::{LogReloadHandle, ServerContext};
use crate::core::workqueue;
use anyhow::{Result, anyhow};
use std::fs::File;
use std::io::BufReader;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tokio::task::JoinSet;
use tracing::{info, warn};

/// Initializes all listener components before starting the main loop.
pub async fn setup(config: Config, log_reload_handle: Arc<LogReloadHandle>) -> Result<ListenerContext> {
    log_startup_info(&config);
    let (shutdown_tx, _) = broadcast::channel(1);

    let tls = setup_tls(&config.tls)?;

    let executor = Arc::new(BasicExecutor);
    let work_queue =
        workqueue::for_listener(&config.listener, config.work_queue.max_capacity, executor)?;

    let server_init = ServerContext::initialize(&config, work_queue, tls, Some(log_reload_handle));
    info!("Server context initialized.");

    let mut handlers = Vec::with_capacity(config.listener.num_request_handlers);
    for id in 0..config.listener.num_request_handlers {
        handlers.push(Arc::new(RequestHandler::start(id)?));
    }
    info!("Started {} request handler(s).", handlers.len());

    let listener = TcpListener::bind((config.host.as_str(), config.port)).await?;
    info!(
        "ldapgate listening on {}:{}{}",
        config.host,
        config.port,
        if config.listener.use_ssl { " (LDAPS)" } else { "" }
    );

    Ok(ListenerContext {
        context: server_init.context,
        finalizer_rx: Some(server_init.finalizer_rx),
        listener,
        handlers,
        metrics: config.metrics.clone(),
        shutdown_tx,
        background_tasks: JoinSet::new(),
    })
}

/// Builds the TLS provider factory if key material is configured.
pub fn setup_tls(tls: &TlsConfig) -> Result<Option<TlsProviderFactory>> {
    if !tls.is_configured() {
        return Ok(None);
    }
    info!("TLS key material configured. Loading certificate and key.");
    let certs = load_certs(&tls.cert_path)?;
    let key = load_key(&tls.key_path)?;
    let server_config = rustls::ServerConfig::builder()
        .with_no_client_auth()
        .with_single_cert(certs, key)?;
    Ok(Some(TlsProviderFactory::new(Arc::new(server_config))))
}

/// Loads TLS certificates from a PEM file.
fn load_certs(path: &str) -> Result<Vec<rustls::pki_types::CertificateDer<'static>>> {
    let cert_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open certificate file '{}': {}", path, e))?;
    let mut cert_reader = BufReader::new(cert_file);
    let certs = rustls_pemfile::certs(&mut cert_reader).collect::<Result<Vec<_>, _>>()?;
    if certs.is_empty() {
        return Err(anyhow!("No certificates found in '{}'", path));
    }
    Ok(certs)
}

/// Loads a private key from a PEM file.
fn load_key(path: &str) -> Result<rustls::pki_types::PrivateKeyDer<'static>> {
    let key_file = File::open(path)
        .map_err(|e| anyhow!("Failed to open private key file '{}': {}", path, e))?;
    let mut key_reader = BufReader::new(key_file);
    rustls_pemfile::private_key(&mut key_reader)?
        .ok_or_else(|| anyhow!("No private key found in key file '{}'", path))
}

/// Logs key configuration parameters at startup.
fn log_startup_info(config: &Config) {
    let listener = &config.listener;
    info!(
        "Listener policy: {} request handler(s), max request size {} bytes, max blocked write time {:?}.",
        listener.num_request_handlers, listener.max_request_size, listener.max_blocked_write_time
    );
    if listener.admin_connector {
        info!("Administration connector: operations run synchronously on the request handler.");
    }
    if listener.allow_ldap_v2 {
        warn!("LDAPv2 clients are allowed on this listener.");
    }
    if listener.idle_time_limit.is_zero() {
        info!("No idle time limit is configured.");
    }
    info!("Accepting at most {} concurrent clients.", config.max_clients);
}
