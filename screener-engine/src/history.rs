//! Bounded per-(instrument, timeframe) rolling bar history.
//!
//! Fixed capacity ring buffers: O(1) append/replace, O(capacity)
//! materialisation, no implicit resizing. Memory stays bounded regardless
//! of instrument count.

use crate::market::{Bar, Timeframe};
use fnv::FnvHashMap;
use smol_str::SmolStr;
use std::collections::VecDeque;

/// How an incoming bar was absorbed by a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppendOutcome {
    /// New open time, appended at the tail (oldest evicted if at capacity).
    Appended,
    /// Same open time as the tail: in-place update of the still-open bar.
    Replaced,
    /// Open time older than the tail: stale or out-of-order, dropped.
    Discarded,
}

/// Fixed-capacity rolling buffer of bars, oldest-first, strictly increasing
/// `open_time`.
#[derive(Debug, Clone)]
pub struct BarBuffer {
    bars: VecDeque<Bar>,
    capacity: usize,
}

impl BarBuffer {
    pub fn new(capacity: usize) -> Self {
        Self {
            // One slot of headroom so push-then-evict never reallocates.
            bars: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    /// Apply the replace-or-append-or-discard rule.
    pub fn apply(&mut self, bar: Bar) -> AppendOutcome {
        let Some(last_open) = self.bars.back().map(|last| last.open_time) else {
            self.bars.push_back(bar);
            return AppendOutcome::Appended;
        };

        if bar.open_time == last_open {
            if let Some(slot) = self.bars.back_mut() {
                *slot = bar;
            }
            AppendOutcome::Replaced
        } else if bar.open_time > last_open {
            self.bars.push_back(bar);
            if self.bars.len() > self.capacity {
                self.bars.pop_front();
            }
            AppendOutcome::Appended
        } else {
            AppendOutcome::Discarded
        }
    }

    /// Bars oldest-first.
    pub fn bars(&self) -> impl Iterator<Item = &Bar> {
        self.bars.iter()
    }

    /// Materialise an owned oldest-first snapshot.
    pub fn to_vec(&self) -> Vec<Bar> {
        self.bars.iter().copied().collect()
    }

    pub fn last(&self) -> Option<&Bar> {
        self.bars.back()
    }

    pub fn len(&self) -> usize {
        self.bars.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bars.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }
}

/// Per-(instrument, timeframe) store of [`BarBuffer`]s.
///
/// Capacity is fixed per timeframe at construction; buffers are created on
/// first append and released by the `clear_*` methods when an instrument or
/// timeframe stops being tracked.
#[derive(Debug)]
pub struct HistoryStore {
    default_capacity: usize,
    capacity_overrides: FnvHashMap<Timeframe, usize>,
    buffers: FnvHashMap<(SmolStr, Timeframe), BarBuffer>,
}

impl HistoryStore {
    pub fn new(default_capacity: usize) -> Self {
        Self {
            default_capacity,
            capacity_overrides: FnvHashMap::default(),
            buffers: FnvHashMap::default(),
        }
    }

    /// Override the fixed capacity for one timeframe. Only affects buffers
    /// created after the call.
    pub fn with_capacity_for(mut self, timeframe: Timeframe, capacity: usize) -> Self {
        self.capacity_overrides.insert(timeframe, capacity);
        self
    }

    fn capacity_for(&self, timeframe: Timeframe) -> usize {
        self.capacity_overrides
            .get(&timeframe)
            .copied()
            .unwrap_or(self.default_capacity)
    }

    pub fn append(&mut self, symbol: &SmolStr, timeframe: Timeframe, bar: Bar) -> AppendOutcome {
        let capacity = self.capacity_for(timeframe);
        self.buffers
            .entry((symbol.clone(), timeframe))
            .or_insert_with(|| BarBuffer::new(capacity))
            .apply(bar)
    }

    /// Seed a buffer from a snapshot fetch. Bars are applied in order, so a
    /// snapshot that overlaps streamed data obeys the same replace/append/
    /// discard rule as live updates.
    pub fn seed(&mut self, symbol: &SmolStr, timeframe: Timeframe, bars: Vec<Bar>) {
        for bar in bars {
            self.append(symbol, timeframe, bar);
        }
    }

    pub fn buffer(&self, symbol: &str, timeframe: Timeframe) -> Option<&BarBuffer> {
        self.buffers.get(&(SmolStr::new(symbol), timeframe))
    }

    /// Ordered snapshot of one buffer, oldest-first. Empty when untracked.
    pub fn read(&self, symbol: &str, timeframe: Timeframe) -> Vec<Bar> {
        self.buffer(symbol, timeframe)
            .map(BarBuffer::to_vec)
            .unwrap_or_default()
    }

    pub fn contains(&self, symbol: &str, timeframe: Timeframe) -> bool {
        self.buffers.contains_key(&(SmolStr::new(symbol), timeframe))
    }

    /// Release every buffer belonging to an instrument.
    pub fn clear_instrument(&mut self, symbol: &str) {
        self.buffers.retain(|(held, _), _| held != symbol);
    }

    /// Release every buffer in a timeframe.
    pub fn clear_timeframe(&mut self, timeframe: Timeframe) {
        self.buffers.retain(|(_, held), _| *held != timeframe);
    }

    pub fn buffer_count(&self) -> usize {
        self.buffers.len()
    }
}
