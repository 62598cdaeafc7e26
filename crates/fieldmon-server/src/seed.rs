use crate::config::SeedFile;
use crate::rule_loader;
use fieldmon_alert::index::RuleIndex;
use fieldmon_storage::memory::MemoryStore;
use std::time::Duration;

/// Loads seed devices and rules into the store. Rules are stored as given;
/// invalid ones are rejected later when the index loads them.
pub fn apply_seed(store: &MemoryStore, seed: SeedFile) -> (usize, usize) {
    let devices = seed.devices.len();
    let rules = seed.rules.len();
    for device in seed.devices {
        store.upsert_device(device);
    }
    for rule in seed.rules {
        store.upsert_rule(rule);
    }
    tracing::info!(devices, rules, "Seed data loaded");
    (devices, rules)
}

/// Result of checking a seed file against a configuration.
#[derive(Debug, Default)]
pub struct SeedCheck {
    /// One line per rejected rule.
    pub rejected: Vec<String>,
    /// The sweep interval is longer than the smallest offline window.
    pub sweep_too_slow: bool,
}

/// Validates seed rules without touching any store.
pub fn check_seed(seed: &SeedFile, sweep_interval: Duration) -> SeedCheck {
    let (index, report) = RuleIndex::from_rules(seed.rules.clone());
    SeedCheck {
        rejected: report.rejected.iter().map(ToString::to_string).collect(),
        sweep_too_slow: !rule_loader::sweep_covers_offline_windows(&index, sweep_interval),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fieldmon_storage::{DeviceRepository, RuleRepository};

    fn seed() -> SeedFile {
        serde_json::from_str(
            r#"{
                "devices": [{"id": "D", "created_at": "2026-01-01T00:00:00Z"}],
                "rules": [
                    {"id": "ok", "check_type": "ABOVE", "variable_key": "temp_c",
                     "threshold_value": 8, "scope": {"type": "global"}},
                    {"id": "bad-range", "check_type": "RANGE", "variable_key": "temp_c",
                     "threshold_min": 10, "threshold_max": 2, "scope": {"type": "global"}}
                ]
            }"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn apply_seed_fills_store() {
        let store = MemoryStore::new();
        assert_eq!(apply_seed(&store, seed()), (1, 2));
        assert_eq!(store.list_devices().await.unwrap().len(), 1);
        assert_eq!(store.list_enabled_rules().await.unwrap().len(), 2);
    }

    #[test]
    fn check_reports_invalid_rules() {
        let check = check_seed(&seed(), Duration::from_secs(60));
        assert_eq!(check.rejected.len(), 1);
        assert!(check.rejected[0].contains("bad-range"));
        assert!(!check.sweep_too_slow);
    }

    #[test]
    fn check_flags_sweep_slower_than_offline_window() {
        let seed: SeedFile = serde_json::from_str(
            r#"{
                "devices": [],
                "rules": [
                    {"id": "offline", "check_type": "DEVICE_OFFLINE", "time_window_minutes": 1,
                     "scope": {"type": "global"}}
                ]
            }"#,
        )
        .unwrap();

        let slow = check_seed(&seed, Duration::from_secs(120));
        assert!(slow.rejected.is_empty());
        assert!(slow.sweep_too_slow);

        assert!(!check_seed(&seed, Duration::from_secs(60)).sweep_too_slow);
    }
}
