// src/server/reclaimer.rs

use std::sync::Arc;
use std::time::Duration;

use log::{debug, info};
use tokio::select;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::server::store::SessionStore;

pub const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Periodically purges expired sessions until `cancel` fires.
///
/// Only bounds memory: `fetch` re-checks deadlines on its own.
pub fn spawn(
    store: Arc<SessionStore>,
    every: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    let purged = store.sweep_expired();
                    if purged > 0 {
                        debug!("reclaimer purged {purged} expired session(s), {} remaining", store.len());
                    }
                }
            }
        }

        info!("reclaimer stopped");
    })
}
