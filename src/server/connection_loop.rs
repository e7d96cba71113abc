// src/server/connection_loop.rs

//! Contains the listener's accept loop and its graceful shutdown.

use super::context::ListenerContext;
use super::request_handler::RequestHandler;
use crate::connection::ClientConnection;
use crate::core::LdapError;
use crate::core::disconnect::DisconnectReason;
use crate::core::state::ServerContext;
use anyhow::{Result, anyhow};
use std::sync::Arc;
use std::time::Duration;
use tokio::signal::unix::{SignalKind, signal};
use tracing::{debug, error, info, warn};

/// Wraps an accepted socket in a client connection and registers it with the
/// server context.
///
/// Returns `Ok(None)` if the context refused the connection (shutdown in
/// progress or the client limit reached); the client has been sent a notice
/// of disconnection in that case.
pub fn accept_client(
    context: &Arc<ServerContext>,
    socket: std::net::TcpStream,
) -> Result<Option<Arc<ClientConnection>>, LdapError> {
    socket.set_nonblocking(true)?;
    socket.set_nodelay(true)?;
    let stream = mio::net::TcpStream::from_std(socket);
    let connection = ClientConnection::new(context.clone(), stream)?;

    if !context.register_connection(&connection) {
        let detail = if context.is_shutting_down() {
            "The server is shutting down"
        } else {
            "Too many client connections"
        };
        connection.disconnect(DisconnectReason::ConnectionRejected, true, Some(detail));
        return Ok(None);
    }
    Ok(Some(connection))
}

/// The main loop: accepts connections, spreads them across the request
/// handlers, and performs the graceful shutdown.
pub async fn run(mut ctx: ListenerContext) -> Result<()> {
    let mut next_handler: usize = 0;

    let mut sigint = signal(SignalKind::interrupt())
        .map_err(|e| anyhow!("Failed to register SIGINT handler: {}", e))?;
    let mut sigterm = signal(SignalKind::terminate())
        .map_err(|e| anyhow!("Failed to register SIGTERM handler: {}", e))?;

    loop {
        tokio::select! {
            biased;

            _ = sigint.recv() => {
                info!("SIGINT received, initiating graceful shutdown.");
                break;
            }
            _ = sigterm.recv() => {
                info!("SIGTERM received, initiating graceful shutdown.");
                break;
            }

            Some(res) = ctx.background_tasks.join_next() => {
                match res {
                    Ok(Ok(())) => warn!("A background task finished unexpectedly without an error."),
                    Ok(Err(e)) => { error!("CRITICAL: Background task failed: {}. Shutting down.", e); break; }
                    Err(e) => { error!("CRITICAL: Background task panicked: {e:?}. Shutting down."); break; }
                }
            },

            res = ctx.listener.accept() => {
                match res {
                    Ok((socket, addr)) => {
                        debug!("Accepted new connection from: {}", addr);
                        let socket = match socket.into_std() {
                            Ok(s) => s,
                            Err(e) => { warn!("Failed to take ownership of the socket from {}: {}", addr, e); continue; }
                        };
                        match accept_client(&ctx.context, socket) {
                            Ok(Some(connection)) => {
                                let handler = pick_handler(&ctx.handlers, &mut next_handler);
                                info!(
                                    "New connection {} from {} assigned to request handler {}.",
                                    connection.connection_id(), addr, handler.handler_id()
                                );
                                handler.register_client(connection);
                            }
                            Ok(None) => {}
                            Err(e) => warn!("Failed to set up connection from {}: {}", addr, e),
                        }
                    }
                    Err(e) => error!("Failed to accept connection: {}", e),
                }
            },
        }
    }

    shutdown(ctx).await;
    Ok(())
}

fn pick_handler<'a>(handlers: &'a [Arc<RequestHandler>], next: &mut usize) -> &'a Arc<RequestHandler> {
    let handler = &handlers[*next % handlers.len()];
    *next = next.wrapping_add(1);
    handler
}

async fn shutdown(mut ctx: ListenerContext) {
    info!("Shutting down. No new connections will be accepted.");
    ctx.context.begin_shutdown();

    // Each handler disconnects the clients it owns before its thread exits.
    for handler in &ctx.handlers {
        let handler = handler.clone();
        if let Err(e) = tokio::task::spawn_blocking(move || handler.shutdown()).await {
            error!("Failed to stop a request handler: {e:?}");
        }
    }
    for connection in ctx.context.connections() {
        connection.disconnect(DisconnectReason::ServerShutdown, true, None);
    }
    info!("All client connections closed.");

    if ctx.shutdown_tx.send(()).is_err() {
        error!("Failed to send shutdown signal. Some tasks may not terminate gracefully.");
    }

    info!("Waiting for background tasks to finish...");
    if tokio::time::timeout(Duration::from_secs(10), async {
        while ctx.background_tasks.join_next().await.is_some() {}
    })
    .await
    .is_err()
    {
        warn!("Timed out waiting for background tasks to finish cleanly.");
    };
    info!("Server shutdown complete.");
}
