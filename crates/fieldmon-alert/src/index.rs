//! In-memory index of enabled rules by scope.
//!
//! Readers load the current [`RuleSnapshot`] without locking; a reload
//! builds a new snapshot off to the side and swaps it in atomically.

use crate::error::RuleConfigError;
use crate::rules;
use arc_swap::ArcSwap;
use chrono::{DateTime, Duration, Utc};
use fieldmon_common::types::{AlertRule, CheckKind, RuleScope};
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

/// Immutable view of the active rules at one point in time.
pub struct RuleSnapshot {
    by_device: HashMap<String, Vec<Arc<AlertRule>>>,
    by_location: HashMap<String, Vec<Arc<AlertRule>>>,
    global: Vec<Arc<AlertRule>>,
    len: usize,
    max_window: Option<Duration>,
    loaded_at: DateTime<Utc>,
}

impl RuleSnapshot {
    fn empty() -> Self {
        Self {
            by_device: HashMap::new(),
            by_location: HashMap::new(),
            global: Vec::new(),
            len: 0,
            max_window: None,
            loaded_at: Utc::now(),
        }
    }

    fn all(&self) -> impl Iterator<Item = &Arc<AlertRule>> {
        self.by_device
            .values()
            .chain(self.by_location.values())
            .flatten()
            .chain(self.global.iter())
    }
}

/// Outcome of loading a rule set.
#[derive(Debug, Default)]
pub struct LoadReport {
    pub accepted: usize,
    pub disabled: usize,
    pub rejected: Vec<RuleConfigError>,
}

pub struct RuleIndex {
    snapshot: ArcSwap<RuleSnapshot>,
}

impl RuleIndex {
    pub fn new() -> Self {
        Self {
            snapshot: ArcSwap::from_pointee(RuleSnapshot::empty()),
        }
    }

    /// Builds an index from `rules`, logging rejected ones.
    pub fn from_rules(rules: Vec<AlertRule>) -> (Self, LoadReport) {
        let index = Self::new();
        let report = index.replace(rules);
        (index, report)
    }

    /// Validates `rules` and swaps them in as the active set.
    ///
    /// Disabled rules are skipped; invalid rules are excluded and logged
    /// with their reason.
    pub fn replace(&self, rules: Vec<AlertRule>) -> LoadReport {
        let mut report = LoadReport::default();
        let mut next = RuleSnapshot::empty();
        let mut seen = HashSet::new();

        for rule in rules {
            if !rule.enabled {
                report.disabled += 1;
                continue;
            }
            let checked = if seen.insert(rule.id.clone()) {
                rules::validate(&rule)
            } else {
                Err(RuleConfigError::DuplicateId {
                    rule_id: rule.id.clone(),
                })
            };
            if let Err(e) = checked {
                tracing::warn!(
                    rule_id = %rule.id,
                    rule_name = %rule.name,
                    check_type = %rule.kind,
                    error = %e,
                    "Skipping invalid alert rule"
                );
                report.rejected.push(e);
                continue;
            }

            if let Some(window) = rule.time_window() {
                next.max_window = Some(next.max_window.map_or(window, |w| w.max(window)));
            }
            let rule = Arc::new(rule);
            let group = match &rule.scope {
                RuleScope::Device(id) => next.by_device.entry(id.clone()).or_default(),
                RuleScope::Location(id) => next.by_location.entry(id.clone()).or_default(),
                RuleScope::Global => &mut next.global,
            };
            group.push(rule);
            report.accepted += 1;
        }

        for group in next
            .by_device
            .values_mut()
            .chain(next.by_location.values_mut())
            .chain(std::iter::once(&mut next.global))
        {
            group.sort_by(|a, b| a.id.cmp(&b.id));
        }
        next.len = report.accepted;
        next.loaded_at = Utc::now();
        self.snapshot.store(Arc::new(next));
        report
    }

    /// All enabled rules applicable to a device: device-scoped first, then
    /// location-scoped, then global. Every rule is evaluated on its own;
    /// there is no precedence between them.
    pub fn rules_for(&self, device_id: &str, location_id: Option<&str>) -> Vec<Arc<AlertRule>> {
        let snapshot = self.snapshot.load();
        let mut out = Vec::new();
        if let Some(rules) = snapshot.by_device.get(device_id) {
            out.extend(rules.iter().cloned());
        }
        if let Some(rules) = location_id.and_then(|id| snapshot.by_location.get(id)) {
            out.extend(rules.iter().cloned());
        }
        out.extend(snapshot.global.iter().cloned());
        out
    }

    /// All active `DEVICE_OFFLINE` rules.
    pub fn offline_rules(&self) -> Vec<Arc<AlertRule>> {
        self.snapshot
            .load()
            .all()
            .filter(|rule| rule.kind == CheckKind::DeviceOffline)
            .cloned()
            .collect()
    }

    /// Smallest `time_window_minutes` among offline rules. The sweep interval
    /// must not exceed it.
    pub fn min_offline_window(&self) -> Option<Duration> {
        self.offline_rules()
            .iter()
            .filter_map(|rule| rule.time_window())
            .min()
    }

    /// Longest time window of any active rule, used to size reading history.
    pub fn max_window(&self) -> Option<Duration> {
        self.snapshot.load().max_window
    }

    /// Longest cooldown of any active rule. Firings older than this cannot
    /// suppress anything.
    pub fn max_cooldown(&self) -> Option<Duration> {
        self.snapshot.load().all().map(|rule| rule.cooldown()).max()
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.snapshot.load().loaded_at
    }

    pub fn len(&self) -> usize {
        self.snapshot.load().len
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for RuleIndex {
    fn default() -> Self {
        Self::new()
    }
}
