// src/server/spawner.rs

//! Spawns all of the listener's long-running background tasks.

use super::context::ListenerContext;
use super::metrics_server;
use crate::core::tasks::{finalizer::ConnectionFinalizer, idle_reaper::IdleConnectionReaper};
use anyhow::{Result, anyhow};
use tracing::info;

/// Spawns all background tasks into the listener's JoinSet.
pub fn spawn_all(ctx: &mut ListenerContext) -> Result<()> {
    let shutdown_tx = &ctx.shutdown_tx;
    let background_tasks = &mut ctx.background_tasks;

    // --- Metrics Server ---
    if ctx.metrics.enabled {
        let metrics_context = ctx.context.clone();
        let port = ctx.metrics.port;
        let shutdown_rx_metrics = shutdown_tx.subscribe();
        background_tasks.spawn(async move {
            metrics_server::run_metrics_server(metrics_context, port, shutdown_rx_metrics).await
        });
    } else {
        info!("Prometheus metrics server is disabled in the configuration.");
    }

    // --- Connection Finalizer ---
    let finalizer_rx = ctx
        .finalizer_rx
        .take()
        .ok_or_else(|| anyhow!("The connection finalizer has already been started"))?;
    let finalizer = ConnectionFinalizer::new(finalizer_rx);
    let shutdown_rx_finalizer = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        finalizer.run(shutdown_rx_finalizer).await;
        Ok(())
    });

    // --- Idle Connection Reaper ---
    let reaper = IdleConnectionReaper::new(ctx.context.clone());
    let shutdown_rx_reaper = shutdown_tx.subscribe();
    background_tasks.spawn(async move {
        reaper.run(shutdown_rx_reaper).await;
        Ok(())
    });

    info!("All background tasks have been spawned.");
    Ok(())
}
