//! Two-speed coalescing of high-frequency updates into bounded-rate batches.
//!
//! Two independent latest-value-wins queues: "priority" for currently
//! displayed instruments (fast cadence) and "background" for the rest
//! (slow cadence). The batcher is passive - it tracks deadlines and the
//! orchestrator's event loop sleeps until [`UpdateBatcher::next_deadline`]
//! and drains with [`UpdateBatcher::flush_due`]. Keeping timers out of this
//! type keeps the cadence logic testable in isolation.

use crate::market::{Bar, Timeframe};
use fnv::{FnvHashMap, FnvHashSet};
use serde::Serialize;
use smol_str::SmolStr;
use std::time::Duration;
use tokio::time::Instant;

/// Delivery-rate class, determined by current display visibility.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryClass {
    Priority,
    Background,
}

/// The latest state of one instrument, delivered to the display layer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct InstrumentUpdate {
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
    pub bar: Bar,
    pub last_price: f64,
}

/// One flushed batch of coalesced updates.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct UpdateBatch {
    pub class: DeliveryClass,
    pub updates: Vec<InstrumentUpdate>,
}

/// Latest-value-wins map with a single pending flush deadline.
#[derive(Debug)]
struct CoalescingQueue {
    interval: Duration,
    pending: FnvHashMap<SmolStr, InstrumentUpdate>,
    /// First-insertion order, so flush output is deterministic.
    order: Vec<SmolStr>,
    deadline: Option<Instant>,
}

impl CoalescingQueue {
    fn new(interval: Duration) -> Self {
        Self {
            interval,
            pending: FnvHashMap::default(),
            order: Vec::new(),
            deadline: None,
        }
    }

    fn push(&mut self, update: InstrumentUpdate, now: Instant) {
        let symbol = update.symbol.clone();
        if self.pending.insert(symbol.clone(), update).is_none() {
            self.order.push(symbol);
        }
        // At most one pending timer per queue.
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
    }

    fn flush(&mut self) -> Vec<InstrumentUpdate> {
        self.deadline = None;
        let mut pending = std::mem::take(&mut self.pending);
        self.order
            .drain(..)
            .filter_map(|symbol| pending.remove(&symbol))
            .collect()
    }
}

/// Coalesces per-instrument updates into priority/background batches.
#[derive(Debug)]
pub struct UpdateBatcher {
    priority_keys: FnvHashSet<SmolStr>,
    priority: CoalescingQueue,
    background: CoalescingQueue,
}

impl UpdateBatcher {
    pub fn new(priority_interval: Duration, background_interval: Duration) -> Self {
        Self {
            priority_keys: FnvHashSet::default(),
            priority: CoalescingQueue::new(priority_interval),
            background: CoalescingQueue::new(background_interval),
        }
    }

    /// Enqueue an update; multiple pushes for the same symbol before a flush
    /// collapse to the latest value.
    pub fn push(&mut self, update: InstrumentUpdate, now: Instant) {
        if self.priority_keys.contains(&update.symbol) {
            self.priority.push(update, now);
        } else {
            self.background.push(update, now);
        }
    }

    /// Atomically reclassify which instruments are priority.
    ///
    /// Entries already pending stay where they are; keys removed from
    /// priority simply drain through the slower queue on their next update.
    pub fn set_priority_keys(&mut self, keys: FnvHashSet<SmolStr>) {
        self.priority_keys = keys;
    }

    /// Earliest pending flush deadline across both queues, if any.
    pub fn next_deadline(&self) -> Option<Instant> {
        match (self.priority.deadline, self.background.deadline) {
            (Some(a), Some(b)) => Some(a.min(b)),
            (a, b) => a.or(b),
        }
    }

    /// Drain every queue whose deadline has passed.
    pub fn flush_due(&mut self, now: Instant) -> Vec<UpdateBatch> {
        let mut batches = Vec::new();
        if self.priority.deadline.is_some_and(|deadline| deadline <= now) {
            batches.push(UpdateBatch {
                class: DeliveryClass::Priority,
                updates: self.priority.flush(),
            });
        }
        if self.background.deadline.is_some_and(|deadline| deadline <= now) {
            batches.push(UpdateBatch {
                class: DeliveryClass::Background,
                updates: self.background.flush(),
            });
        }
        batches
    }

    pub fn pending_len(&self) -> usize {
        self.priority.pending.len() + self.background.pending.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, TimeDelta, Utc};

    fn update(symbol: &str, close: f64) -> InstrumentUpdate {
        let open_time = DateTime::<Utc>::UNIX_EPOCH + TimeDelta::minutes(1);
        InstrumentUpdate {
            symbol: SmolStr::new(symbol),
            timeframe: Timeframe::M1,
            bar: Bar::new(
                open_time,
                open_time + TimeDelta::minutes(1),
                close,
                close,
                close,
                close,
                1.0,
                close,
                None,
                false,
            ),
            last_price: close,
        }
    }

    fn batcher() -> UpdateBatcher {
        UpdateBatcher::new(Duration::from_millis(16), Duration::from_millis(1000))
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_updates_coalesce_to_latest() {
        let mut batcher = batcher();
        let mut priority = FnvHashSet::default();
        priority.insert(SmolStr::new("BTCUSDT"));
        batcher.set_priority_keys(priority);

        let now = Instant::now();
        for close in [1.0, 2.0, 3.0, 4.0, 5.0] {
            batcher.push(update("BTCUSDT", close), now);
        }

        let flush_at = now + Duration::from_millis(16);
        let batches = batcher.flush_due(flush_at);
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].class, DeliveryClass::Priority);
        assert_eq!(batches[0].updates.len(), 1);
        assert_eq!(batches[0].updates[0].last_price, 5.0);

        // Nothing pending afterwards, and no deadline armed.
        assert_eq!(batcher.pending_len(), 0);
        assert!(batcher.next_deadline().is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn test_queues_flush_on_independent_cadences() {
        let mut batcher = batcher();
        let mut priority = FnvHashSet::default();
        priority.insert(SmolStr::new("BTCUSDT"));
        batcher.set_priority_keys(priority);

        let now = Instant::now();
        batcher.push(update("BTCUSDT", 1.0), now);
        batcher.push(update("DOGEUSDT", 2.0), now);

        // At the priority deadline only the priority queue is due.
        let batches = batcher.flush_due(now + Duration::from_millis(16));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].class, DeliveryClass::Priority);

        let batches = batcher.flush_due(now + Duration::from_millis(1000));
        assert_eq!(batches.len(), 1);
        assert_eq!(batches[0].class, DeliveryClass::Background);
        assert_eq!(batches[0].updates[0].symbol, "DOGEUSDT");
    }

    #[tokio::test(start_paused = true)]
    async fn test_reclassified_key_drains_via_slow_queue_on_next_update() {
        let mut batcher = batcher();
        let mut priority = FnvHashSet::default();
        priority.insert(SmolStr::new("BTCUSDT"));
        batcher.set_priority_keys(priority);

        let now = Instant::now();
        batcher.push(update("BTCUSDT", 1.0), now);

        // Dropped from priority: the already-pending entry still flushes
        // through the fast queue, the next update lands in background.
        batcher.set_priority_keys(FnvHashSet::default());
        batcher.push(update("BTCUSDT", 2.0), now);

        let batches = batcher.flush_due(now + Duration::from_millis(1000));
        assert_eq!(batches.len(), 2);
        assert_eq!(batches[0].class, DeliveryClass::Priority);
        assert_eq!(batches[0].updates[0].last_price, 1.0);
        assert_eq!(batches[1].class, DeliveryClass::Background);
        assert_eq!(batches[1].updates[0].last_price, 2.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_pending_timer_per_queue() {
        let mut batcher = batcher();
        let now = Instant::now();

        batcher.push(update("AUSDT", 1.0), now);
        let first_deadline = batcher.next_deadline();

        // Later pushes must not move the armed deadline.
        batcher.push(update("BUSDT", 1.0), now + Duration::from_millis(500));
        assert_eq!(batcher.next_deadline(), first_deadline);
    }
}
