// src/server/mod.rs

pub mod error;
pub mod http;
pub mod pin;
pub mod rate_limit;
pub mod reclaimer;
pub mod store;

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::{Context, Result, bail};
use log::{error, info};
use tokio_util::sync::CancellationToken;

use crate::config::Config;
use rate_limit::RateLimiter;
use store::SessionStore;

/// Serves the API until `shutdown` is cancelled, then waits for the
/// reclaimer to stop. A reclaimer that dies early takes the server down with it.
pub async fn run_server(cfg: Config, shutdown: CancellationToken) -> Result<()> {
    let store = Arc::new(SessionStore::new(cfg.store_config()));
    let limiter = Arc::new(RateLimiter::new(cfg.rate_limit_max, cfg.rate_limit_window));

    let mut reclaimer = reclaimer::spawn(store.clone(), cfg.sweep_interval, shutdown.clone());
    let routes = http::routes(store, limiter, cfg.frontend_url.clone());

    let addr = SocketAddr::new(cfg.host, cfg.port);
    let signal = shutdown.clone();
    let (bound, server) = warp::serve(routes)
        .try_bind_with_graceful_shutdown(addr, async move {
            signal.cancelled().await;
            info!("Graceful shutdown signal received, draining requests...");
        })
        .with_context(|| format!("failed to bind {addr}"))?;

    info!("MicroSync backend running on http://{bound}");
    info!("CORS enabled for: {}", cfg.frontend_url);
    info!(
        "Default TTL {}s, sweep every {}s",
        cfg.default_ttl.as_secs(),
        cfg.sweep_interval.as_secs()
    );

    tokio::pin!(server);
    tokio::select! {
        _ = &mut server => {
            // the server only returns once `shutdown` fired, so the reclaimer is exiting too
            reclaimer.await.context("reclaimer task failed")?;
        }
        res = &mut reclaimer => {
            if let Err(e) = res {
                error!("Reclaimer task failed: {e}");
                shutdown.cancel();
                return Err(e).context("reclaimer task failed");
            }
            if !shutdown.is_cancelled() {
                shutdown.cancel();
                bail!("reclaimer stopped before shutdown was requested");
            }
            server.await;
        }
    }
    Ok(())
}
