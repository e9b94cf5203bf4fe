//! Subscription bookkeeping for the multiplexed stream.

use crate::market::Timeframe;
use fnv::FnvHashMap;
use itertools::Itertools;
use smol_str::SmolStr;

/// One (instrument, timeframe) stream.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct StreamKey {
    pub symbol: SmolStr,
    pub timeframe: Timeframe,
}

impl StreamKey {
    pub fn new(symbol: impl Into<SmolStr>, timeframe: Timeframe) -> Self {
        Self {
            symbol: symbol.into(),
            timeframe,
        }
    }

    /// Wire form: `lowercase(symbol)@bar_<timeframe>`.
    pub fn stream_name(&self) -> String {
        format!(
            "{}@bar_{}",
            self.symbol.to_lowercase(),
            self.timeframe.as_str()
        )
    }
}

impl std::fmt::Display for StreamKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.stream_name())
    }
}

/// Reference-counted desired-subscription set.
///
/// Multiple consumers (visible set, chart view) may want the same stream;
/// a key stays desired until every interest is released.
#[derive(Debug, Default)]
pub struct DesiredSubscriptions {
    refs: FnvHashMap<StreamKey, usize>,
}

impl DesiredSubscriptions {
    /// Register interest. Returns true if the key is newly desired.
    pub fn subscribe(&mut self, key: StreamKey) -> bool {
        let count = self.refs.entry(key).or_insert(0);
        *count += 1;
        *count == 1
    }

    /// Release interest. Returns true if the key is no longer desired.
    pub fn unsubscribe(&mut self, key: &StreamKey) -> bool {
        match self.refs.get_mut(key) {
            Some(count) if *count > 1 => {
                *count -= 1;
                false
            }
            Some(_) => {
                self.refs.remove(key);
                true
            }
            None => false,
        }
    }

    /// Replace the whole desired set (each key at refcount 1). Returns the
    /// keys that were desired before but are not any more.
    pub fn replace(&mut self, keys: impl IntoIterator<Item = StreamKey>) -> Vec<StreamKey> {
        let mut next = FnvHashMap::default();
        for key in keys {
            *next.entry(key).or_insert(0) += 1;
        }
        let stale = self
            .refs
            .keys()
            .filter(|key| !next.contains_key(*key))
            .cloned()
            .sorted()
            .collect();
        self.refs = next;
        stale
    }

    pub fn contains(&self, key: &StreamKey) -> bool {
        self.refs.contains_key(key)
    }

    /// Desired keys in deterministic order.
    pub fn keys(&self) -> Vec<StreamKey> {
        self.refs.keys().cloned().sorted().collect()
    }

    pub fn len(&self) -> usize {
        self.refs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.refs.is_empty()
    }

    pub fn clear(&mut self) {
        self.refs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stream_name_is_lowercase() {
        let key = StreamKey::new("BTCUSDT", Timeframe::M1);
        assert_eq!(key.stream_name(), "btcusdt@bar_1m");
    }

    #[test]
    fn test_refcount_lifecycle() {
        let mut desired = DesiredSubscriptions::default();
        let key = StreamKey::new("BTCUSDT", Timeframe::M1);

        assert!(desired.subscribe(key.clone()));
        assert!(!desired.subscribe(key.clone()));
        assert_eq!(desired.len(), 1);

        assert!(!desired.unsubscribe(&key));
        assert!(desired.contains(&key));
        assert!(desired.unsubscribe(&key));
        assert!(desired.is_empty());

        // Releasing an unknown key is a no-op.
        assert!(!desired.unsubscribe(&key));
    }

    #[test]
    fn test_replace_reports_stale_keys() {
        let mut desired = DesiredSubscriptions::default();
        desired.subscribe(StreamKey::new("BTCUSDT", Timeframe::M1));
        desired.subscribe(StreamKey::new("ETHUSDT", Timeframe::M1));

        let stale = desired.replace([
            StreamKey::new("BTCUSDT", Timeframe::M15),
            StreamKey::new("ETHUSDT", Timeframe::M1),
        ]);

        assert_eq!(stale, vec![StreamKey::new("BTCUSDT", Timeframe::M1)]);
        assert!(desired.contains(&StreamKey::new("BTCUSDT", Timeframe::M15)));
        assert_eq!(desired.len(), 2);
    }
}
