// src/config.rs

use std::env;
use std::net::IpAddr;
use std::str::FromStr;
use std::time::Duration;

use log::warn;

use crate::server::rate_limit::{RL_MAX_REQUESTS, RL_WINDOW};
use crate::server::reclaimer::SWEEP_INTERVAL;
use crate::server::store::{StoreConfig, DEFAULT_TTL};

// upper bound for every duration knob; larger values overflow Instant math
pub const MAX_DURATION_SECS: u64 = 30 * 24 * 60 * 60;

#[derive(Clone, Debug)]
pub struct Config {
    pub host: IpAddr,
    pub port: u16,
    /// Allowed CORS origin; `*` allows any.
    pub frontend_url: String,
    pub default_ttl: Duration,
    pub sweep_interval: Duration,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 4000,
            frontend_url: "http://localhost:5173".to_string(),
            default_ttl: DEFAULT_TTL,
            sweep_interval: SWEEP_INTERVAL,
            rate_limit_max: RL_MAX_REQUESTS,
            rate_limit_window: RL_WINDOW,
        }
    }
}

impl Config {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let mut c = Self::default();

        if let Some(v) = parse(&get, "HOST") {
            c.host = v;
        }
        if let Some(v) = parse(&get, "PORT") {
            c.port = v;
        }
        if let Some(v) = get("FRONTEND_URL") {
            let origin = v.trim().trim_end_matches('/');
            if is_origin(origin) {
                c.frontend_url = origin.to_string();
            } else {
                warn!("ignoring invalid FRONTEND_URL={v:?}, expected scheme://host[:port] or *");
            }
        }
        if let Some(v) = positive_secs(&get, "MICROSYNC_DEFAULT_TTL_SECS") {
            c.default_ttl = v;
        }
        if let Some(v) = positive_secs(&get, "MICROSYNC_SWEEP_INTERVAL_SECS") {
            c.sweep_interval = v;
        }
        if let Some(v) = parse(&get, "MICROSYNC_RATE_LIMIT_MAX") {
            c.rate_limit_max = v;
        }
        if let Some(v) = positive_secs(&get, "MICROSYNC_RATE_LIMIT_WINDOW_SECS") {
            c.rate_limit_window = v;
        }
        c
    }

    pub fn store_config(&self) -> StoreConfig {
        StoreConfig {
            default_ttl: self.default_ttl,
            ..StoreConfig::default()
        }
    }
}

// warp's CORS builder panics on anything that is not a bare origin
fn is_origin(v: &str) -> bool {
    if v == "*" {
        return true;
    }
    match v.split_once("://") {
        Some(("http" | "https", host)) => !host.is_empty() && !host.contains('/'),
        _ => false,
    }
}

fn parse<T: FromStr>(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<T> {
    let raw = get(key)?;
    match raw.trim().parse() {
        Ok(v) => Some(v),
        Err(_) => {
            warn!("ignoring invalid {key}={raw:?}, using default");
            None
        }
    }
}

fn positive_secs(get: &impl Fn(&str) -> Option<String>, key: &str) -> Option<Duration> {
    match parse::<u64>(get, key)? {
        0 => {
            warn!("{key} must be positive, using default");
            None
        }
        secs if secs > MAX_DURATION_SECS => {
            warn!("{key}={secs} exceeds {MAX_DURATION_SECS}s, using default");
            None
        }
        secs => Some(Duration::from_secs(secs)),
    }
}
