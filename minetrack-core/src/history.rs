//! Per-device bounded position history.
//!
//! Insertion-ordered ring buffer; once full, every append evicts the oldest
//! entry. Readers get a restartable oldest→newest view.

use std::collections::VecDeque;

use crate::types::Position;

/// Maximum positions retained per device.
pub const HISTORY_CAPACITY: usize = 200;

#[derive(Debug, Clone)]
pub struct HistoryStore {
    positions: VecDeque<Position>,
    capacity: usize,
}

impl HistoryStore {
    pub fn new() -> Self {
        Self::with_capacity(HISTORY_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        HistoryStore {
            positions: VecDeque::with_capacity(capacity),
            capacity: capacity.max(1),
        }
    }

    /// Append to the tail. Returns `true` if the head was evicted.
    pub fn append(&mut self, position: Position) -> bool {
        self.positions.push_back(position);
        if self.positions.len() > self.capacity {
            self.positions.pop_front();
            return true;
        }
        false
    }

    /// Newest position, if any.
    pub fn current(&self) -> Option<&Position> {
        self.positions.back()
    }

    pub fn get(&self, index: usize) -> Option<&Position> {
        self.positions.get(index)
    }

    /// Oldest→newest. Each call starts a fresh iteration.
    pub fn all(&self) -> impl Iterator<Item = &Position> + '_ {
        self.positions.iter()
    }

    pub fn len(&self) -> usize {
        self.positions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.positions.is_empty()
    }

    pub fn contains_id(&self, id: &str) -> bool {
        self.positions.iter().rev().any(|p| p.id == id)
    }

    pub fn to_vec(&self) -> Vec<Position> {
        self.positions.iter().cloned().collect()
    }
}

impl Default for HistoryStore {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    pub(crate) fn fix(device: &str, seq: usize, lat: f64, lng: f64) -> Position {
        Position {
            id: format!("{device}-{seq}"),
            device_id: device.to_string(),
            lat,
            lng,
            timestamp: seq as f64,
            speed_kmh: 0.0,
            heading: 0.0,
            altitude: 0.0,
            accuracy: 5.0,
            battery: 100.0,
            depth: 0.0,
            zone: crate::zones::SURFACE.to_string(),
            signal: 100.0,
        }
    }

    #[test]
    fn test_empty() {
        let h = HistoryStore::new();
        assert!(h.is_empty());
        assert!(h.current().is_none());
        assert_eq!(h.all().count(), 0);
    }

    #[test]
    fn test_append_and_current() {
        let mut h = HistoryStore::new();
        assert!(!h.append(fix("a", 0, 0.0, 0.0)));
        assert!(!h.append(fix("a", 1, 0.0, 0.0)));
        assert_eq!(h.len(), 2);
        assert_eq!(h.current().unwrap().id, "a-1");
    }

    #[test]
    fn test_bounded_keeps_most_recent_in_order() {
        let mut h = HistoryStore::new();
        let n = 537;
        let mut evictions = 0;
        for i in 0..n {
            if h.append(fix("a", i, 0.0, 0.0)) {
                evictions += 1;
            }
        }
        assert_eq!(h.len(), HISTORY_CAPACITY);
        assert_eq!(evictions, n - HISTORY_CAPACITY);

        let ids: Vec<String> = h.all().map(|p| p.id.clone()).collect();
        let expected: Vec<String> = (n - HISTORY_CAPACITY..n).map(|i| format!("a-{i}")).collect();
        assert_eq!(ids, expected);
    }

    #[test]
    fn test_all_is_restartable() {
        let mut h = HistoryStore::new();
        for i in 0..5 {
            h.append(fix("a", i, 0.0, 0.0));
        }
        assert_eq!(h.all().count(), 5);
        assert_eq!(h.all().count(), 5);
        assert_eq!(h.all().next().unwrap().id, "a-0");
    }

    #[test]
    fn test_contains_id() {
        let mut h = HistoryStore::with_capacity(2);
        h.append(fix("a", 0, 0.0, 0.0));
        h.append(fix("a", 1, 0.0, 0.0));
        h.append(fix("a", 2, 0.0, 0.0));
        assert!(!h.contains_id("a-0"));
        assert!(h.contains_id("a-2"));
    }
}
