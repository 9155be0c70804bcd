//! Reclaims destroyed sessions once their grace period is over

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::watch;

use crate::registry::SessionRegistry;
use crate::session::Session;

/// Sweep the retiring list every `interval` until `shutdown` flips to true.
pub async fn run(
    registry: Arc<SessionRegistry>,
    interval: Duration,
    grace: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    tracing::info!("Session watchdog started");

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let expired = registry.sweep(Instant::now(), grace);
                if expired.is_empty() {
                    continue;
                }
                // Joining relay workers blocks
                if let Err(e) = tokio::task::spawn_blocking(move || reclaim(expired)).await {
                    tracing::error!("Session reclaim task failed: {}", e);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
            }
        }
    }

    tracing::info!("Session watchdog stopped");
}

/// Release the resources of sessions that are no longer reachable
pub fn reclaim(sessions: Vec<Arc<Session>>) {
    for session in sessions {
        tracing::debug!("Freeing session {}", session.handle());
        session.close();
    }
}
