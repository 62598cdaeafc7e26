//! Per-(rule, device) suppression windows.
//!
//! Entries live in a [`DashMap`], whose sharded locks stripe the key space:
//! unrelated keys never wait on each other, while the check-and-set for a
//! single key happens under that key's shard lock.

use chrono::{DateTime, Duration, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use fieldmon_common::types::FiringRecord;

/// Key: (rule_id, device_id)
type CooldownKey = (String, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CooldownEntry {
    pub fired_at: DateTime<Utc>,
    /// Reading that caused the firing, if any.
    pub reading_id: Option<String>,
}

/// Result of [`CooldownTracker::try_acquire`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Gate {
    /// The caller won the key and must persist the alert. `previous` is the
    /// entry that was replaced, needed by [`CooldownTracker::restore`].
    Open { previous: Option<CooldownEntry> },
    Suppressed { last_fired: DateTime<Utc> },
}

#[derive(Default)]
pub struct CooldownTracker {
    entries: DashMap<CooldownKey, CooldownEntry>,
}

fn key(rule_id: &str, device_id: &str) -> CooldownKey {
    (rule_id.to_string(), device_id.to_string())
}

fn in_window(entry: &CooldownEntry, cooldown: Duration, now: DateTime<Utc>) -> bool {
    now - entry.fired_at < cooldown
}

impl CooldownTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-binding check: false iff the key fired less than `cooldown` ago.
    ///
    /// Only [`try_acquire`](Self::try_acquire) decides whether an alert may
    /// be written.
    pub fn allow(
        &self,
        rule_id: &str,
        device_id: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
    ) -> bool {
        !self
            .entries
            .get(&key(rule_id, device_id))
            .is_some_and(|entry| in_window(&entry, cooldown, now))
    }

    /// Unconditionally records a firing for the key.
    pub fn record(
        &self,
        rule_id: &str,
        device_id: &str,
        now: DateTime<Utc>,
        reading_id: Option<&str>,
    ) {
        self.entries.insert(
            key(rule_id, device_id),
            CooldownEntry {
                fired_at: now,
                reading_id: reading_id.map(str::to_string),
            },
        );
    }

    /// Atomic check-then-record. Of any number of concurrent callers for the
    /// same key inside one window, exactly one gets [`Gate::Open`].
    ///
    /// A reading that already fired for this key is suppressed even when the
    /// cooldown is zero.
    pub fn try_acquire(
        &self,
        rule_id: &str,
        device_id: &str,
        cooldown: Duration,
        now: DateTime<Utc>,
        reading_id: Option<&str>,
    ) -> Gate {
        let fresh = CooldownEntry {
            fired_at: now,
            reading_id: reading_id.map(str::to_string),
        };
        match self.entries.entry(key(rule_id, device_id)) {
            Entry::Occupied(mut occupied) => {
                let current = occupied.get();
                let same_reading = reading_id.is_some() && current.reading_id.as_deref() == reading_id;
                if same_reading || in_window(current, cooldown, now) {
                    return Gate::Suppressed {
                        last_fired: current.fired_at,
                    };
                }
                let previous = occupied.insert(fresh);
                Gate::Open {
                    previous: Some(previous),
                }
            }
            Entry::Vacant(vacant) => {
                vacant.insert(fresh);
                Gate::Open { previous: None }
            }
        }
    }

    /// Undoes a firing recorded at `fired_at` if no later firing replaced it.
    /// Returns whether the entry was restored.
    pub fn restore(
        &self,
        rule_id: &str,
        device_id: &str,
        fired_at: DateTime<Utc>,
        previous: Option<CooldownEntry>,
    ) -> bool {
        match self.entries.entry(key(rule_id, device_id)) {
            Entry::Occupied(mut occupied) if occupied.get().fired_at == fired_at => {
                match previous {
                    Some(entry) => {
                        occupied.insert(entry);
                    }
                    None => {
                        occupied.remove();
                    }
                }
                true
            }
            _ => false,
        }
    }

    /// Loads past firings, keeping the latest per key. Returns the number of
    /// entries that changed.
    pub fn seed<I>(&self, records: I) -> usize
    where
        I: IntoIterator<Item = FiringRecord>,
    {
        let mut changed = 0;
        for record in records {
            let entry = CooldownEntry {
                fired_at: record.triggered_at,
                reading_id: record.reading_id,
            };
            match self.entries.entry((record.rule_id, record.device_id)) {
                Entry::Occupied(mut occupied) => {
                    if occupied.get().fired_at < entry.fired_at {
                        occupied.insert(entry);
                        changed += 1;
                    }
                }
                Entry::Vacant(vacant) => {
                    vacant.insert(entry);
                    changed += 1;
                }
            }
        }
        changed
    }

    pub fn last_fired(&self, rule_id: &str, device_id: &str) -> Option<DateTime<Utc>> {
        self.entries
            .get(&key(rule_id, device_id))
            .map(|entry| entry.fired_at)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
