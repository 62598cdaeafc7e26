use fieldmon_alert::index::{LoadReport, RuleIndex};
use fieldmon_storage::error::StorageError;
use fieldmon_storage::RuleRepository;
use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Reloads the rule index from the repository. Invalid rules are excluded
/// by the index and logged there.
pub async fn reload_rules(
    repo: &dyn RuleRepository,
    index: &RuleIndex,
    sweep_interval: Duration,
) -> Result<LoadReport, StorageError> {
    let rules = repo.list_enabled_rules().await?;
    let report = index.replace(rules);
    sweep_covers_offline_windows(index, sweep_interval);

    tracing::info!(
        rule_count = report.accepted,
        rejected = report.rejected.len(),
        "Rule index reloaded"
    );
    Ok(report)
}

/// Warns when the sweep runs less often than the tightest offline window.
/// Returns false in that case.
pub fn sweep_covers_offline_windows(index: &RuleIndex, sweep_interval: Duration) -> bool {
    let Some(window) = index.min_offline_window() else {
        return true;
    };
    let sweep_secs = i64::try_from(sweep_interval.as_secs()).unwrap_or(i64::MAX);
    if sweep_secs > window.num_seconds() {
        tracing::warn!(
            sweep_interval_secs = sweep_secs,
            min_offline_window_secs = window.num_seconds(),
            "Sweep interval exceeds the smallest DEVICE_OFFLINE window, offline devices may be detected late"
        );
        return false;
    }
    true
}

/// Periodically swaps in the current rule set until `cancel` fires.
pub async fn run_refresh(
    repo: Arc<dyn RuleRepository>,
    index: Arc<RuleIndex>,
    refresh: Duration,
    sweep_interval: Duration,
    cancel: CancellationToken,
) {
    tracing::info!(
        interval_secs = refresh.as_secs(),
        "Rule refresh loop started"
    );

    let mut interval = tokio::time::interval(refresh);
    // The first tick fires immediately; startup already loaded the rules
    interval.tick().await;

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Rule refresh loop stopping");
                break;
            }
            _ = interval.tick() => {
                // On failure the previous snapshot stays active
                if let Err(e) = reload_rules(repo.as_ref(), &index, sweep_interval).await {
                    tracing::warn!(error = %e, transient = e.is_transient(), "Rule reload failed, keeping current rules");
                }
            }
        }
    }
}
