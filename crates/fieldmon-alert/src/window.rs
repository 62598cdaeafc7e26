use chrono::{DateTime, Duration, Utc};
use fieldmon_common::types::Reading;
use std::collections::{HashSet, VecDeque};

/// Hard cap on readings kept per device regardless of retention.
const MAX_READINGS_PER_DEVICE: usize = 4096;

/// Recent readings of one device in arrival order.
///
/// Also remembers which reading ids it holds, so a redelivered reading can
/// be recognised before it is evaluated a second time.
pub struct DeviceWindow {
    data: VecDeque<Reading>,
    ids: HashSet<String>,
}

impl DeviceWindow {
    pub fn new() -> Self {
        Self {
            data: VecDeque::new(),
            ids: HashSet::new(),
        }
    }

    /// Appends `reading` and evicts entries older than `retention` before
    /// `now`. Returns `false` without modifying the window if the reading id
    /// is already present.
    pub fn push(&mut self, reading: Reading, now: DateTime<Utc>, retention: Duration) -> bool {
        if self.ids.contains(&reading.id) {
            return false;
        }
        self.ids.insert(reading.id.clone());
        self.data.push_back(reading);
        self.evict(now - retention);
        true
    }

    fn evict(&mut self, cutoff: DateTime<Utc>) {
        while let Some(front) = self.data.front() {
            if front.timestamp < cutoff || self.data.len() > MAX_READINGS_PER_DEVICE {
                if let Some(old) = self.data.pop_front() {
                    self.ids.remove(&old.id);
                }
            } else {
                break;
            }
        }
    }

    pub fn contains(&self, reading_id: &str) -> bool {
        self.ids.contains(reading_id)
    }

    /// Contiguous view of the window, oldest arrival first.
    pub fn as_contiguous_slice(&mut self) -> &[Reading] {
        self.data.make_contiguous()
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Default for DeviceWindow {
    fn default() -> Self {
        Self::new()
    }
}
