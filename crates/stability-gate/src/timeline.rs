use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::signals::StabilityStatus;

pub const TIMELINE_CAPACITY: usize = 50;

/// Which signals were blocking at one poll
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimelineEntry {
    pub timestamp: DateTime<Utc>,
    pub blocking: Vec<String>,
}

impl TimelineEntry {
    pub fn from_status(status: &StabilityStatus) -> Self {
        Self {
            timestamp: status.timestamp,
            blocking: status.blocking_names(),
        }
    }
}

/// Fixed-capacity history of unstable polls; oldest entries are dropped first
#[derive(Debug, Clone, PartialEq)]
pub struct Timeline {
    capacity: usize,
    entries: VecDeque<TimelineEntry>,
}

impl Default for Timeline {
    fn default() -> Self {
        Self::new(TIMELINE_CAPACITY)
    }
}

impl Timeline {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    pub fn push(&mut self, entry: TimelineEntry) {
        if self.capacity == 0 {
            return;
        }
        if self.entries.len() >= self.capacity {
            self.entries.pop_front();
        }
        self.entries.push_back(entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn snapshot(&self) -> Vec<TimelineEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Most recent `limit` entries, oldest first
    pub fn tail(&self, limit: usize) -> Vec<TimelineEntry> {
        let skip = self.entries.len().saturating_sub(limit);
        self.entries.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn entry(ms: i64) -> TimelineEntry {
        TimelineEntry {
            timestamp: Utc.timestamp_millis_opt(ms).unwrap(),
            blocking: vec!["network-requests".to_string()],
        }
    }

    #[test]
    fn test_drops_oldest_on_overflow() {
        let mut timeline = Timeline::new(3);
        for ms in 0..5 {
            timeline.push(entry(ms));
        }

        assert_eq!(timeline.len(), 3);
        let kept: Vec<i64> = timeline
            .snapshot()
            .iter()
            .map(|e| e.timestamp.timestamp_millis())
            .collect();
        assert_eq!(kept, vec![2, 3, 4]);
    }

    #[test]
    fn test_default_capacity_is_bounded() {
        let mut timeline = Timeline::default();
        for ms in 0..200 {
            timeline.push(entry(ms));
        }
        assert_eq!(timeline.len(), TIMELINE_CAPACITY);
        assert_eq!(timeline.capacity(), TIMELINE_CAPACITY);
        assert_eq!(timeline.snapshot()[0].timestamp.timestamp_millis(), 150);
    }

    #[test]
    fn test_tail() {
        let mut timeline = Timeline::new(10);
        for ms in 0..4 {
            timeline.push(entry(ms));
        }
        let tail = timeline.tail(2);
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].timestamp.timestamp_millis(), 2);
        assert_eq!(timeline.tail(10).len(), 4);
    }

    #[test]
    fn test_zero_capacity_keeps_nothing() {
        let mut timeline = Timeline::new(0);
        timeline.push(entry(1));
        assert!(timeline.is_empty());
    }
}
