// src/core/tasks/finalizer.rs

use crate::core::state::FinalizerJob;
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

/// Closes the channels of disconnected connections once their quiesce delay
/// has passed. Closing never happens on the thread that disconnected.
pub struct ConnectionFinalizer {
    pub rx: mpsc::UnboundedReceiver<FinalizerJob>,
}

impl ConnectionFinalizer {
    pub fn new(rx: mpsc::UnboundedReceiver<FinalizerJob>) -> Self {
        Self { rx }
    }

    /// Runs the main loop for the finalizer.
    pub async fn run(mut self, mut shutdown_rx: broadcast::Receiver<()>) {
        debug!("Connection finalizer task started.");
        loop {
            tokio::select! {
                Some(job) = self.rx.recv() => {
                    // Jobs are queued with a constant delay, so they arrive in due order.
                    tokio::select! {
                        _ = tokio::time::sleep_until(job.due) => job.connection.finalize(),
                        _ = shutdown_rx.recv() => {
                            job.connection.finalize();
                            self.drain().await;
                            return;
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    self.drain().await;
                    return;
                }
            }
        }
    }

    /// Closes every queued connection without waiting for its delay.
    async fn drain(&mut self) {
        info!("Connection finalizer shutting down.");
        self.rx.close();
        let mut drained = 0usize;
        while let Some(job) = self.rx.recv().await {
            job.connection.finalize();
            drained += 1;
        }
        debug!("Closed {} pending connections on shutdown.", drained);
    }
}
