//! # Availability Cache
//!
//! Availability as a storefront process last heard it, plus tentative holds
//! shown to the shopper before the engine answers.
//!
//! ## Tentative Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  shopper clicks "add 2"                                                 │
//! │       │                                                                 │
//! │       ├── apply_tentative(key, 2) → token     badge shows 3 - 2 = 1    │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  InventoryService::reserve_line                                        │
//! │       │                                                                 │
//! │       ├── Ok((reservation, level)) → confirm(token, &level)            │
//! │       │                     tentative dropped, committed row kept      │
//! │       └── Err(_)          → revert(token)                              │
//! │                             badge back to 3                            │
//! │                                                                         │
//! │  StockChangeEvent (any shopper) → apply_event                          │
//! │       └── version <= cached version → ignored                          │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Nothing here is authoritative. Losing the whole cache costs a refresh,
//! never a wrong sale.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{debug, info};

use stockline_core::{StockChangeEvent, StockKey, StockRecord};

use crate::notifier::StockSubscription;

/// Identifies one tentative hold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TentativeToken(u64);

#[derive(Debug, Clone, Copy)]
struct CachedLevel {
    available: i64,
    version: i64,
}

#[derive(Debug, Clone)]
struct TentativeHold {
    key: StockKey,
    quantity: i64,
}

#[derive(Debug, Default)]
struct CacheState {
    levels: HashMap<StockKey, CachedLevel>,
    tentative: HashMap<TentativeToken, TentativeHold>,
}

/// Per-key cached availability with optimistic local holds.
#[derive(Debug, Default)]
pub struct AvailabilityCache {
    state: RwLock<CacheState>,
    next_token: AtomicU64,
}

impl AvailabilityCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records an event unless a newer version is already cached.
    ///
    /// Returns whether the cache changed.
    pub async fn apply_event(&self, event: &StockChangeEvent) -> bool {
        self.apply(event.key(), event.available_quantity, event.version)
            .await
    }

    /// Records an authoritative ledger row, same version rule as events.
    pub async fn apply_record(&self, record: &StockRecord) -> bool {
        self.apply(record.key(), record.available_quantity(), record.version)
            .await
    }

    async fn apply(&self, key: StockKey, available: i64, version: i64) -> bool {
        let mut state = self.state.write().await;
        let cached_version = state.levels.get(&key).map(|cached| cached.version);
        if let Some(cached) = cached_version.filter(|cached| *cached >= version) {
            debug!(%key, cached, incoming = version, "Ignoring stale availability");
            return false;
        }
        state.levels.insert(key, CachedLevel { available, version });
        true
    }

    /// Cached availability minus local tentative holds.
    ///
    /// `None` when nothing is cached for the key. May go negative when
    /// tentative holds outrun the last known level.
    pub async fn available(&self, key: &StockKey) -> Option<i64> {
        let state = self.state.read().await;
        let level = state.levels.get(key)?;
        let held: i64 = state
            .tentative
            .values()
            .filter(|hold| &hold.key == key)
            .map(|hold| hold.quantity)
            .sum();
        Some(level.available - held)
    }

    /// Version of the cached row, if any.
    pub async fn version(&self, key: &StockKey) -> Option<i64> {
        self.state.read().await.levels.get(key).map(|l| l.version)
    }

    /// Shows `quantity` units as taken before the engine has answered.
    pub async fn apply_tentative(&self, key: StockKey, quantity: i64) -> TentativeToken {
        let token = TentativeToken(self.next_token.fetch_add(1, Ordering::Relaxed));
        self.state
            .write()
            .await
            .tentative
            .insert(token, TentativeHold { key, quantity });
        token
    }

    /// Replaces a tentative hold with the engine's answer, the level
    /// returned by `reserve_line`.
    ///
    /// Returns false if the token was unknown (already confirmed or
    /// reverted); the record is applied either way.
    pub async fn confirm(&self, token: TentativeToken, authoritative: &StockRecord) -> bool {
        let removed = self.state.write().await.tentative.remove(&token).is_some();
        self.apply_record(authoritative).await;
        removed
    }

    /// Drops a tentative hold after the engine refused it.
    pub async fn revert(&self, token: TentativeToken) -> bool {
        self.state.write().await.tentative.remove(&token).is_some()
    }

    /// Forgets every cached level. Tentative holds stay.
    pub async fn clear(&self) {
        self.state.write().await.levels.clear();
    }

    /// Feeds the cache from a subscription until the notifier goes away.
    ///
    /// After a lag the cache is cleared, since skipped events may have
    /// carried the latest level for any key.
    pub async fn follow(self: Arc<Self>, mut subscription: StockSubscription) {
        let mut missed = subscription.missed_events();
        while let Some(event) = subscription.recv().await {
            if subscription.missed_events() > missed {
                missed = subscription.missed_events();
                info!(missed, "Availability cache fell behind, clearing");
                self.clear().await;
            }
            self.apply_event(&event).await;
        }
        debug!("Availability feed closed");
    }
}
