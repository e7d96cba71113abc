// src/core/tasks/idle_reaper.rs

use crate::core::disconnect::DisconnectReason;
use crate::core::state::ServerContext;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// Disconnects clients that have been idle for longer than the listener's
/// idle time limit.
pub struct IdleConnectionReaper {
    context: Arc<ServerContext>,
}

impl IdleConnectionReaper {
    pub fn new(context: Arc<ServerContext>) -> Self {
        Self { context }
    }

    /// How often connections are checked for a given limit.
    fn check_interval(limit: Duration) -> Duration {
        (limit / 4).clamp(Duration::from_millis(100), Duration::from_secs(5))
    }

    /// Disconnects every connection idle for longer than `limit`. Returns the
    /// number of connections closed.
    pub fn reap(&self, limit: Duration) -> usize {
        let mut reaped = 0;
        for connection in self.context.connections() {
            let idle = connection.idle_time();
            if idle > limit {
                let detail = format!(
                    "The client connection has been idle for {} ms, exceeding the limit of {} ms",
                    idle.as_millis(),
                    limit.as_millis()
                );
                connection.disconnect(DisconnectReason::IdleTimeLimitExceeded, true, Some(&detail));
                reaped += 1;
            }
        }
        reaped
    }

    pub async fn run(self, mut shutdown_rx: broadcast::Receiver<()>) {
        let limit = self.context.settings().idle_time_limit;
        info!("Idle connection reaper started with a limit of {:?}.", limit);
        let mut interval = tokio::time::interval(Self::check_interval(limit));

        loop {
            tokio::select! {
                _ = interval.tick() => {
                    // Re-read so a settings update takes effect.
                    let limit = self.context.settings().idle_time_limit;
                    if limit.is_zero() {
                        continue;
                    }
                    let reaped = self.reap(limit);
                    if reaped > 0 {
                        debug!("Disconnected {} idle connections.", reaped);
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Idle connection reaper shutting down.");
                    return;
                }
            }
        }
    }
}
