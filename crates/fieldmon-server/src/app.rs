use crate::config::ServerConfig;
use crate::dispatch::{DispatchPool, DispatchQueue, DispatchSettings};
use crate::rule_loader;
use crate::scheduler::{self, Pipeline, ReactionSettings};
use crate::stats::{PipelineStats, StatsSnapshot};
use crate::writer::{AlertWriter, WriterPolicy};
use anyhow::Context;
use chrono::Utc;
use fieldmon_alert::cooldown::CooldownTracker;
use fieldmon_alert::engine::AlertEngine;
use fieldmon_alert::index::RuleIndex;
use fieldmon_alert::rules::anomaly::ZScoreScorer;
use fieldmon_notify::dispatcher::NotificationDispatcher;
use fieldmon_notify::plugin::ChannelRegistry;
use fieldmon_notify::registry::SenderRegistry;
use fieldmon_storage::memory::MemoryStore;
use fieldmon_storage::{AlertSink, DeviceRepository, ReadingFeed, RuleRepository};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;

/// Channel registered when the configuration names none.
pub const DEFAULT_CHANNEL: &str = "log";

/// The storage seams the pipeline runs against.
#[derive(Clone)]
pub struct Repositories {
    pub rules: Arc<dyn RuleRepository>,
    pub devices: Arc<dyn DeviceRepository>,
    pub feed: Arc<dyn ReadingFeed>,
    pub sink: Arc<dyn AlertSink>,
}

impl Repositories {
    pub fn memory(store: &Arc<MemoryStore>) -> Self {
        Self {
            rules: store.clone(),
            devices: store.clone(),
            feed: store.clone(),
            sink: store.clone(),
        }
    }
}

/// Builds the channel senders named in the configuration, or the log
/// channel alone when there are none.
pub fn build_senders(config: &ServerConfig, plugins: &ChannelRegistry) -> anyhow::Result<SenderRegistry> {
    let mut senders = SenderRegistry::new();
    if config.channels.is_empty() {
        senders.register_from_config(plugins, DEFAULT_CHANNEL, DEFAULT_CHANNEL, &serde_json::Value::Null)?;
        tracing::info!("No notification channels configured, alerts go to the log channel");
        return Ok(senders);
    }
    for channel in &config.channels {
        senders
            .register_from_config(plugins, &channel.name, &channel.channel_type, &channel.config)
            .with_context(|| format!("Failed to create channel '{}'", channel.name))?;
    }
    tracing::info!(channels = ?senders.names(), "Notification channels ready");
    Ok(senders)
}

/// A running alerting pipeline.
pub struct Service {
    cancel: CancellationToken,
    engine: Arc<AlertEngine>,
    pipeline: Arc<Pipeline>,
    stats: Arc<PipelineStats>,
    evaluation: JoinSet<()>,
    dispatch: JoinSet<()>,
}

impl Service {
    /// Loads rules, warms the cooldown tracker from recent alerts and
    /// spawns every loop. All loops stop when `cancel` fires.
    pub async fn start(
        config: &ServerConfig,
        repos: Repositories,
        senders: SenderRegistry,
        cancel: CancellationToken,
    ) -> anyhow::Result<Self> {
        let sweep_interval = config.sweep_interval();

        let index = Arc::new(RuleIndex::new());
        let report = rule_loader::reload_rules(repos.rules.as_ref(), &index, sweep_interval)
            .await
            .context("Failed to load alert rules")?;
        if !report.rejected.is_empty() {
            tracing::warn!(rejected = report.rejected.len(), "Some alert rules were rejected");
        }

        let cooldowns = Arc::new(CooldownTracker::new());
        if let Some(max_cooldown) = index.max_cooldown() {
            let since = Utc::now() - max_cooldown;
            let firings = repos
                .sink
                .recent_firings(since)
                .await
                .context("Failed to read recent alerts")?;
            let restored = cooldowns.seed(firings);
            tracing::info!(restored, since = %since, "Cooldown tracker warmed from alert history");
        }

        let mut engine = AlertEngine::new(Arc::clone(&index), cooldowns).with_history_retention(
            chrono::Duration::minutes(i64::from(config.history_retention_minutes)),
        );
        if config.anomaly.enabled {
            engine = engine.with_scorer(Arc::new(ZScoreScorer {
                min_samples: config.anomaly.min_samples,
                scale: config.anomaly.z_score_scale,
            }));
        }
        let engine = Arc::new(engine);
        let stats = Arc::new(PipelineStats::new());

        let dispatcher = Arc::new(NotificationDispatcher::new(Arc::new(senders), config.retry_policy()));
        let (queue, dispatch) = DispatchPool::start(
            dispatcher,
            Arc::clone(&repos.sink),
            Arc::clone(&stats),
            DispatchSettings {
                workers: config.dispatch_workers,
                queue_capacity: config.queue_capacity,
                resume_interval: Duration::from_secs(config.resume_interval_secs),
                shutdown_grace: Duration::from_secs(config.shutdown_grace_secs),
            },
            cancel.clone(),
        );

        let writer = AlertWriter::new(
            Arc::clone(&repos.sink),
            Arc::clone(&engine),
            Arc::clone(&stats),
            WriterPolicy {
                max_attempts: config.writer_max_attempts,
                backoff_base: Duration::from_millis(config.writer_backoff_ms),
            },
        );
        let pipeline = Arc::new(Pipeline {
            engine: Arc::clone(&engine),
            devices: Arc::clone(&repos.devices),
            feed: Arc::clone(&repos.feed),
            writer,
            dispatch: queue,
            stats: Arc::clone(&stats),
        });

        let mut evaluation = scheduler::spawn_reaction(
            Arc::clone(&pipeline),
            ReactionSettings {
                workers: config.reaction_workers,
                queue_capacity: config.queue_capacity,
                batch_size: config.feed_batch_size,
                poll_interval: Duration::from_millis(config.feed_poll_ms),
            },
            cancel.clone(),
        );
        evaluation.spawn(scheduler::run_sweep(
            Arc::clone(&pipeline),
            sweep_interval,
            cancel.clone(),
        ));
        evaluation.spawn(rule_loader::run_refresh(
            Arc::clone(&repos.rules),
            Arc::clone(&index),
            Duration::from_secs(config.rule_refresh_secs),
            sweep_interval,
            cancel.clone(),
        ));

        tracing::info!(
            rules = index.len(),
            sweep_interval_secs = config.sweep_interval_secs,
            "Alerting pipeline started"
        );

        Ok(Self {
            cancel,
            engine,
            pipeline,
            stats,
            evaluation,
            dispatch,
        })
    }

    pub fn engine(&self) -> &Arc<AlertEngine> {
        &self.engine
    }

    pub fn pipeline(&self) -> &Arc<Pipeline> {
        &self.pipeline
    }

    pub fn dispatch_queue(&self) -> &DispatchQueue {
        &self.pipeline.dispatch
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    /// Stops every loop and waits for them. Evaluations in progress finish;
    /// deliveries still running after the grace period stay pending.
    pub async fn shutdown(mut self) -> StatsSnapshot {
        self.cancel.cancel();
        join_all(&mut self.evaluation, "evaluation").await;
        join_all(&mut self.dispatch, "dispatch").await;
        self.stats.log_summary();
        tracing::info!("Alerting pipeline stopped");
        self.stats.snapshot()
    }
}

async fn join_all(tasks: &mut JoinSet<()>, group: &str) {
    while let Some(joined) = tasks.join_next().await {
        if let Err(e) = joined {
            tracing::error!(group, error = %e, "Pipeline task ended abnormally");
        }
    }
}
