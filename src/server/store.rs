// src/server/store.rs

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::time::Instant;

use crate::server::error::StoreError;
use crate::server::pin::PinSpace;

pub const DEFAULT_TTL: Duration = Duration::from_secs(600);
pub const MAX_PIN_ATTEMPTS: u32 = 10;
pub const MAX_TEXT_BYTES: usize = 10 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PayloadKind {
    Text,
    /// Accepted on the wire, refused by `create` until something can deliver it.
    Image,
}

impl PayloadKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            PayloadKind::Text => "text",
            PayloadKind::Image => "image",
        }
    }
}

impl fmt::Display for PayloadKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PayloadKind {
    type Err = StoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "text" => Ok(PayloadKind::Text),
            "image" => Ok(PayloadKind::Image),
            _ => Err(StoreError::invalid("type must be either text or image")),
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub pin_space: PinSpace,
    pub max_pin_attempts: u32,
    pub default_ttl: Duration,
    pub max_text_bytes: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            pin_space: PinSpace::default(),
            max_pin_attempts: MAX_PIN_ATTEMPTS,
            default_ttl: DEFAULT_TTL,
            max_text_bytes: MAX_TEXT_BYTES,
        }
    }
}

#[derive(Debug)]
pub struct SessionEntry {
    pub pin: String,
    pub kind: PayloadKind,
    pub content: String,
    pub created_at: Instant,
    pub expires_at: Instant,
    pub consumed: bool,
}

impl SessionEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Created {
    pub pin: String,
    pub expires_in: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Payload {
    pub kind: PayloadKind,
    pub content: String,
}

/// PIN -> entry map with consume-once reads.
///
/// Every mutation holds the PIN's shard lock for its whole step, so
/// operations on one PIN are linearizable and a consume can never be
/// observed twice.
pub struct SessionStore {
    map: DashMap<String, SessionEntry>,
    cfg: StoreConfig,
}

impl Default for SessionStore {
    fn default() -> Self {
        Self::new(StoreConfig::default())
    }
}

impl SessionStore {
    pub fn new(cfg: StoreConfig) -> Self {
        Self {
            map: DashMap::new(),
            cfg,
        }
    }

    pub fn create(
        &self,
        kind: PayloadKind,
        content: String,
        ttl_secs: Option<u64>,
    ) -> Result<Created, StoreError> {
        self.validate(kind, &content)?;

        let ttl = match ttl_secs {
            Some(0) => return Err(StoreError::invalid("ttlSeconds must be a positive integer")),
            Some(secs) => Duration::from_secs(secs),
            None => self.cfg.default_ttl,
        };

        let created_at = Instant::now();
        let expires_at = created_at
            .checked_add(ttl)
            .ok_or_else(|| StoreError::invalid("ttlSeconds is too large"))?;

        for _ in 0..self.cfg.max_pin_attempts {
            let pin = self.cfg.pin_space.generate();

            let slot = self.map.entry(pin.clone());
            // an expired holder no longer owns the PIN
            if let Entry::Occupied(held) = &slot {
                if !held.get().is_expired(created_at) {
                    continue;
                }
            }
            slot.insert(SessionEntry {
                pin: pin.clone(),
                kind,
                content,
                created_at,
                expires_at,
                consumed: false,
            });

            debug!("created {kind} session, ttl {}s", ttl.as_secs());
            return Ok(Created {
                pin,
                expires_in: ttl.as_secs(),
            });
        }

        let attempts = self.cfg.max_pin_attempts;
        warn!(
            "PIN space exhausted after {attempts} attempts ({} entries held, {} PINs in space)",
            self.map.len(),
            self.cfg.pin_space.size()
        );
        Err(StoreError::PinSpaceExhausted { attempts })
    }

    pub fn fetch(&self, pin: &str) -> Result<Payload, StoreError> {
        if pin.is_empty() {
            return Err(StoreError::invalid("PIN is required"));
        }
        if !self.cfg.pin_space.is_well_formed(pin) {
            return Err(StoreError::invalid(format!(
                "PIN must be exactly {} digits",
                self.cfg.pin_space.width()
            )));
        }

        // Removal is the consume step: whoever gets the entry out of the map
        // is the only caller that will ever see it.
        let (_, mut entry) = self.map.remove(pin).ok_or(StoreError::NotFound)?;
        debug_assert_eq!(entry.pin, pin);

        if entry.is_expired(Instant::now()) {
            debug!("purged expired session on fetch");
            return Err(StoreError::NotFound);
        }
        if entry.consumed {
            return Err(StoreError::AlreadyConsumed);
        }
        entry.consumed = true;
        debug!(
            "delivered {} session after {}s",
            entry.kind,
            entry.created_at.elapsed().as_secs()
        );

        Ok(Payload {
            kind: entry.kind,
            content: entry.content,
        })
    }

    /// Removes the entry if present. Returns whether anything was removed.
    pub fn delete(&self, pin: &str) -> bool {
        self.map.remove(pin).is_some()
    }

    pub fn sweep_expired(&self) -> usize {
        let now = Instant::now();
        let mut purged = 0;
        self.map.retain(|_, entry| {
            let live = !entry.is_expired(now);
            if !live {
                purged += 1;
            }
            live
        });
        purged
    }

    /// Entries currently held, including expired ones not yet swept.
    pub fn len(&self) -> usize {
        self.map.len()
    }

    fn validate(&self, kind: PayloadKind, content: &str) -> Result<(), StoreError> {
        if content.is_empty() {
            return Err(StoreError::invalid("type and content are required"));
        }
        match kind {
            PayloadKind::Text => {
                if content.len() > self.cfg.max_text_bytes {
                    return Err(StoreError::invalid(format!(
                        "Text content exceeds {}KB limit",
                        self.cfg.max_text_bytes / 1024
                    )));
                }
                Ok(())
            }
            PayloadKind::Image => Err(StoreError::invalid("image payloads are not supported")),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::future::join_all;
    use std::collections::HashSet;
    use std::sync::Arc;

    fn small_store(size: u32) -> SessionStore {
        SessionStore::new(StoreConfig {
            pin_space: PinSpace::new(100_000, size),
            ..StoreConfig::default()
        })
    }

    #[tokio::test]
    async fn create_then_fetch_delivers_once() {
        let store = SessionStore::default();

        let created = store.create(PayloadKind::Text, "hello".into(), Some(5)).unwrap();
        assert_eq!(created.pin.len(), 6);
        assert!(created.pin.bytes().all(|b| b.is_ascii_digit()));
        assert_eq!(created.expires_in, 5);

        let payload = store.fetch(&created.pin).unwrap();
        assert_eq!(payload.kind, PayloadKind::Text);
        assert_eq!(payload.content, "hello");

        assert_eq!(store.fetch(&created.pin), Err(StoreError::NotFound));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn default_ttl_applies_when_omitted() {
        let store = SessionStore::default();
        let created = store.create(PayloadKind::Text, "x".into(), None).unwrap();
        assert_eq!(created.expires_in, 600);
    }

    #[tokio::test(start_paused = true)]
    async fn expired_entry_is_not_found_without_a_sweep() {
        let store = SessionStore::default();
        let created = store.create(PayloadKind::Text, "x".into(), Some(1)).unwrap();

        tokio::time::advance(Duration::from_secs(2)).await;

        assert_eq!(store.fetch(&created.pin), Err(StoreError::NotFound));
        // the failed lookup purged it
        assert_eq!(store.len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_exactly_at_deadline_is_expired() {
        let store = SessionStore::default();
        let created = store.create(PayloadKind::Text, "x".into(), Some(3)).unwrap();

        tokio::time::advance(Duration::from_secs(3)).await;

        assert_eq!(store.fetch(&created.pin), Err(StoreError::NotFound));
    }

    #[tokio::test(start_paused = true)]
    async fn fetch_just_before_deadline_succeeds() {
        let store = SessionStore::default();
        let created = store.create(PayloadKind::Text, "x".into(), Some(3)).unwrap();

        tokio::time::advance(Duration::from_millis(2_999)).await;

        assert!(store.fetch(&created.pin).is_ok());
    }

    #[tokio::test]
    async fn rejects_invalid_input() {
        let store = SessionStore::default();

        let too_big = "a".repeat(MAX_TEXT_BYTES + 1);
        assert!(matches!(
            store.create(PayloadKind::Text, too_big, None),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            store.create(PayloadKind::Text, String::new(), None),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            store.create(PayloadKind::Text, "x".into(), Some(0)),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            store.create(PayloadKind::Image, "data:image/png;base64,AAAA".into(), None),
            Err(StoreError::InvalidInput(_))
        ));
        assert!(matches!(
            store.create(PayloadKind::Text, "x".into(), Some(u64::MAX)),
            Err(StoreError::InvalidInput(_))
        ));
        assert_eq!(store.len(), 0);
    }

    #[tokio::test]
    async fn accepts_content_at_the_size_bound() {
        let store = SessionStore::default();
        let exact = "a".repeat(MAX_TEXT_BYTES);
        assert!(store.create(PayloadKind::Text, exact, None).is_ok());
    }

    #[tokio::test]
    async fn fetch_validates_pin_format() {
        let store = SessionStore::default();
        for bad in ["", "12345", "abcdef", "1234567"] {
            assert!(matches!(store.fetch(bad), Err(StoreError::InvalidInput(_))), "{bad:?}");
        }
        assert_eq!(store.fetch("123456"), Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn delete_is_idempotent() {
        let store = SessionStore::default();
        assert!(!store.delete("123456"));

        let created = store.create(PayloadKind::Text, "x".into(), None).unwrap();
        assert!(store.delete(&created.pin));
        assert!(!store.delete(&created.pin));
        assert_eq!(store.fetch(&created.pin), Err(StoreError::NotFound));
    }

    #[tokio::test]
    async fn operations_on_one_pin_leave_others_alone() {
        let store = SessionStore::default();
        let a = store.create(PayloadKind::Text, "alpha".into(), None).unwrap();
        let b = store.create(PayloadKind::Text, "beta".into(), None).unwrap();
        assert_ne!(a.pin, b.pin);

        assert_eq!(store.fetch(&a.pin).unwrap().content, "alpha");
        store.delete(&a.pin);
        assert_eq!(store.len(), 1);
        assert_eq!(store.fetch(&b.pin).unwrap().content, "beta");
    }

    #[tokio::test]
    async fn full_space_reports_exhaustion() {
        let store = small_store(1);
        store.create(PayloadKind::Text, "first".into(), None).unwrap();

        assert_eq!(
            store.create(PayloadKind::Text, "second".into(), None),
            Err(StoreError::PinSpaceExhausted { attempts: MAX_PIN_ATTEMPTS })
        );
    }

    #[tokio::test(start_paused = true)]
    async fn expired_pin_can_be_reissued_before_sweep() {
        let store = small_store(1);
        let first = store.create(PayloadKind::Text, "old".into(), Some(1)).unwrap();

        tokio::time::advance(Duration::from_secs(1)).await;

        let second = store.create(PayloadKind::Text, "new".into(), None).unwrap();
        assert_eq!(first.pin, second.pin);
        assert_eq!(store.fetch(&second.pin).unwrap().content, "new");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_only_expired_entries() {
        let store = SessionStore::default();
        store.create(PayloadKind::Text, "short".into(), Some(1)).unwrap();
        let long = store.create(PayloadKind::Text, "long".into(), Some(60)).unwrap();

        assert_eq!(store.sweep_expired(), 0);
        tokio::time::advance(Duration::from_secs(1)).await;
        assert_eq!(store.sweep_expired(), 1);

        assert_eq!(store.len(), 1);
        assert_eq!(store.fetch(&long.pin).unwrap().content, "long");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_fetches_deliver_exactly_once() {
        let store = Arc::new(SessionStore::default());

        for round in 0..20 {
            let created = store
                .create(PayloadKind::Text, format!("payload {round}"), None)
                .unwrap();

            let results = join_all((0..16).map(|_| {
                let store = store.clone();
                let pin = created.pin.clone();
                tokio::spawn(async move { store.fetch(&pin) })
            }))
            .await;

            let mut delivered = 0;
            for res in results {
                match res.unwrap() {
                    Ok(p) => {
                        assert_eq!(p.content, format!("payload {round}"));
                        delivered += 1;
                    }
                    Err(e) => assert_eq!(e, StoreError::NotFound),
                }
            }
            assert_eq!(delivered, 1);
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_creates_in_a_tiny_space_never_share_a_pin() {
        let store = Arc::new(small_store(10));

        let results = join_all((0..50).map(|i| {
            let store = store.clone();
            tokio::spawn(async move { store.create(PayloadKind::Text, format!("{i}"), None) })
        }))
        .await;

        let mut pins = HashSet::new();
        let mut exhausted = 0;
        for res in results {
            match res.unwrap() {
                Ok(created) => assert!(pins.insert(created.pin), "duplicate live pin"),
                Err(StoreError::PinSpaceExhausted { .. }) => exhausted += 1,
                Err(e) => panic!("unexpected error: {e}"),
            }
        }

        assert!(!pins.is_empty());
        assert!(pins.len() <= 10);
        assert_eq!(pins.len() + exhausted, 50);
        assert!(exhausted >= 40);
        assert_eq!(store.len(), pins.len());
    }
}
