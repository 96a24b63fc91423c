//! # Stock Change Notifier
//!
//! Fans out a [`StockChangeEvent`] after every committed ledger delta.
//!
//! ## Delivery
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                                                                         │
//! │  ReservationManager ── tx.commit() ──► publish(event)                  │
//! │                                            │                            │
//! │                              tokio::sync::broadcast                     │
//! │                 ┌──────────────────┬───────┴──────────┐                 │
//! │                 ▼                  ▼                  ▼                 │
//! │         product badge       cart validator      low-stock alert        │
//! │         subscribe_key()      subscribe()        (WARN log)             │
//! │                                                                         │
//! │  • Best effort: no subscribers → event dropped                         │
//! │  • Slow subscriber → oldest events overwritten, subscriber told        │
//! │    how many it missed and continues                                    │
//! │  • Per key, a subscriber never sees a version go backwards             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Events are published after the transaction commits, from whichever task
//! committed it. Two writers on one key can therefore send in the opposite
//! order to the one SQLite serialized. Ordering comes from `version`, which
//! the ledger bumps inside the write: each [`StockSubscription`] remembers the
//! highest version delivered per key and drops anything at or below it. An
//! overtaken event carries an older level than one already delivered, so
//! dropping it loses nothing a subscriber needs. Nothing reads events back
//! for correctness.

use std::collections::HashMap;

use tokio::sync::broadcast;
use tracing::{debug, warn};

use stockline_core::{StockChangeEvent, StockKey};

/// Publish side of the stock change stream. Cheap to clone.
#[derive(Debug, Clone)]
pub struct StockChangeNotifier {
    tx: broadcast::Sender<StockChangeEvent>,
    low_stock_threshold: i64,
}

impl StockChangeNotifier {
    /// Creates a notifier buffering `capacity` events per subscriber.
    pub fn new(capacity: usize, low_stock_threshold: i64) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        StockChangeNotifier {
            tx,
            low_stock_threshold,
        }
    }

    /// Sends an event to every current subscriber.
    ///
    /// Returns how many subscribers it reached.
    pub fn publish(&self, event: StockChangeEvent) -> usize {
        if event.available_quantity <= self.low_stock_threshold {
            warn!(
                product_id = %event.product_id,
                size = %event.size,
                available = event.available_quantity,
                threshold = self.low_stock_threshold,
                "Low stock"
            );
        }

        match self.tx.send(event) {
            Ok(receivers) => receivers,
            Err(broadcast::error::SendError(event)) => {
                debug!(
                    product_id = %event.product_id,
                    size = %event.size,
                    version = event.version,
                    "No stock subscribers, event dropped"
                );
                0
            }
        }
    }

    /// Subscribes to changes on every key.
    pub fn subscribe(&self) -> StockSubscription {
        StockSubscription {
            rx: self.tx.subscribe(),
            key: None,
            missed: 0,
            stale: 0,
            delivered: HashMap::new(),
        }
    }

    /// Subscribes to changes on one key.
    pub fn subscribe_key(&self, key: StockKey) -> StockSubscription {
        StockSubscription {
            rx: self.tx.subscribe(),
            key: Some(key),
            missed: 0,
            stale: 0,
            delivered: HashMap::new(),
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

/// Receive side of the stock change stream.
#[derive(Debug)]
pub struct StockSubscription {
    rx: broadcast::Receiver<StockChangeEvent>,
    key: Option<StockKey>,
    missed: u64,
    stale: u64,
    /// Highest version handed out per key.
    delivered: HashMap<StockKey, i64>,
}

impl StockSubscription {
    /// Waits for the next matching event.
    ///
    /// Returns `None` once the notifier is gone. Lag is absorbed here and
    /// counted in [`StockSubscription::missed_events`].
    pub async fn recv(&mut self) -> Option<StockChangeEvent> {
        loop {
            match self.rx.recv().await {
                Ok(event) if self.accept(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => self.record_lag(n),
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Returns the next matching event already buffered, without waiting.
    pub fn try_recv(&mut self) -> Option<StockChangeEvent> {
        loop {
            match self.rx.try_recv() {
                Ok(event) if self.accept(&event) => return Some(event),
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => self.record_lag(n),
                Err(_) => return None,
            }
        }
    }

    /// Events overwritten before this subscriber read them. A non-zero value
    /// means cached availability should be refreshed from the ledger.
    pub fn missed_events(&self) -> u64 {
        self.missed
    }

    /// Events dropped because a newer version of the same key had already
    /// been delivered.
    pub fn stale_events(&self) -> u64 {
        self.stale
    }

    fn matches(&self, event: &StockChangeEvent) -> bool {
        self.key.as_ref().map_or(true, |key| {
            key.product_id == event.product_id && key.size == event.size
        })
    }

    /// Filters by key, then drops events overtaken by a newer version.
    fn accept(&mut self, event: &StockChangeEvent) -> bool {
        if !self.matches(event) {
            return false;
        }
        let key = event.key();
        match self.delivered.get(&key) {
            Some(&last) if event.version <= last => {
                self.stale += 1;
                debug!(
                    %key,
                    last_delivered = last,
                    version = event.version,
                    "Dropping overtaken stock event"
                );
                false
            }
            _ => {
                self.delivered.insert(key, event.version);
                true
            }
        }
    }

    fn record_lag(&mut self, n: u64) {
        self.missed += n;
        warn!(
            missed = n,
            total_missed = self.missed,
            key = ?self.key,
            "Stock subscriber lagged"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use stockline_core::{MoveType, StockRecord};

    fn event(size: &str, quantity: i64, version: i64) -> StockChangeEvent {
        let mut record = StockRecord::new("SNEAKER-001", size, quantity);
        record.version = version;
        StockChangeEvent::from_record(&record, MoveType::Restock, Utc::now())
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_is_fine() {
        let notifier = StockChangeNotifier::new(8, 0);
        assert_eq!(notifier.publish(event("10", 5, 1)), 0);
    }

    #[tokio::test]
    async fn test_key_subscription_filters() {
        let notifier = StockChangeNotifier::new(8, 0);
        let mut all = notifier.subscribe();
        let mut only_ten = notifier.subscribe_key(StockKey::new("SNEAKER-001", "10"));

        notifier.publish(event("11", 5, 1));
        notifier.publish(event("10", 4, 2));

        assert_eq!(all.recv().await.unwrap().size, "11");
        assert_eq!(all.recv().await.unwrap().size, "10");

        let got = only_ten.recv().await.unwrap();
        assert_eq!((got.size.as_str(), got.version), ("10", 2));
        assert!(only_ten.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_lagging_subscriber_continues() {
        let notifier = StockChangeNotifier::new(2, 0);
        let mut sub = notifier.subscribe();

        for v in 1..=5 {
            notifier.publish(event("10", 5, v));
        }

        let next = sub.recv().await.unwrap();
        assert_eq!(next.version, 4);
        assert_eq!(sub.missed_events(), 3);
        assert_eq!(sub.try_recv().unwrap().version, 5);
    }

    #[tokio::test]
    async fn test_overtaken_events_are_dropped() {
        let notifier = StockChangeNotifier::new(8, 0);
        let mut sub = notifier.subscribe();

        notifier.publish(event("10", 3, 5));
        notifier.publish(event("10", 4, 4));
        notifier.publish(event("11", 2, 1));
        notifier.publish(event("10", 2, 6));

        let got: Vec<_> = std::iter::from_fn(|| sub.try_recv())
            .map(|e| (e.size, e.version))
            .collect();
        assert_eq!(
            got,
            vec![("10".to_string(), 5), ("11".to_string(), 1), ("10".to_string(), 6)]
        );
        assert_eq!(sub.stale_events(), 1);
    }

    #[tokio::test]
    async fn test_closed_notifier_ends_stream() {
        let notifier = StockChangeNotifier::new(2, 0);
        let mut sub = notifier.subscribe();
        drop(notifier);
        assert!(sub.recv().await.is_none());
    }
}
