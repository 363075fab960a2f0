// SPDX-License-Identifier: GPL-3.0-or-later
//! The task catalog. Every task is one `PipelineTask` dispatching on its
//! `TaskKind`; task names are stable identifiers used for cadence config
//! and the admin surface.

use crate::pause::{HealthProbe, PauseControl, PauseReason};
use crate::task::{Task, TaskOutcome};
use anyhow::Result;
use fetcharr_application::breaker::BreakerState;
use fetcharr_application::events::EventPublisher;
use fetcharr_application::Pipeline;
use fetcharr_infrastructure::repositories::{NotificationRepository, StatisticsRepository};
use fetcharr_infrastructure::sqlite_adapters::{
    SqliteNotificationRepository, SqliteStatisticsRepository,
};
use fetcharr_realtime::{broadcast_json, RealtimeHub};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// How many items a queue drainer takes per tick.
const DRAIN_BATCH: usize = 50;
/// Pending notifications flushed per tick.
const NOTIFICATION_BATCH: i64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskKind {
    WantedRefresh,
    PlexFullScan,
    PlexRecentScan,
    ProcessScraping,
    ProcessAdding,
    ProcessChecking,
    ReleaseDateRefresh,
    UpgradeSweep,
    StatisticsRefresh,
    SendNotifications,
    ProcessPendingRclonePaths,
}

impl TaskKind {
    pub const ALL: [TaskKind; 11] = [
        TaskKind::WantedRefresh,
        TaskKind::PlexFullScan,
        TaskKind::PlexRecentScan,
        TaskKind::ProcessScraping,
        TaskKind::ProcessAdding,
        TaskKind::ProcessChecking,
        TaskKind::ReleaseDateRefresh,
        TaskKind::UpgradeSweep,
        TaskKind::StatisticsRefresh,
        TaskKind::SendNotifications,
        TaskKind::ProcessPendingRclonePaths,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Self::WantedRefresh => "task_wanted_refresh",
            Self::PlexFullScan => "task_plex_full_scan",
            Self::PlexRecentScan => "task_plex_recent_scan",
            Self::ProcessScraping => "task_process_scraping",
            Self::ProcessAdding => "task_process_adding",
            Self::ProcessChecking => "task_process_checking",
            Self::ReleaseDateRefresh => "task_release_date_refresh",
            Self::UpgradeSweep => "task_upgrade_sweep",
            Self::StatisticsRefresh => "task_statistics_refresh",
            Self::SendNotifications => "task_send_notifications",
            Self::ProcessPendingRclonePaths => "task_process_pending_rclone_paths",
        }
    }

    pub fn default_interval_secs(&self) -> u64 {
        match self {
            Self::WantedRefresh => 15 * 60,
            Self::PlexFullScan => 60 * 60,
            Self::PlexRecentScan => 5 * 60,
            Self::ProcessScraping => 60,
            Self::ProcessAdding => 30,
            Self::ProcessChecking => 60,
            Self::ReleaseDateRefresh => 60 * 60,
            Self::UpgradeSweep => 4 * 60 * 60,
            Self::StatisticsRefresh => 5 * 60,
            Self::SendNotifications => 30,
            Self::ProcessPendingRclonePaths => 60,
        }
    }
}

/// Everything the task catalog needs to run.
pub struct TaskDeps<E: EventPublisher> {
    pub pipeline: Arc<Pipeline<E>>,
    pub statistics: Arc<SqliteStatisticsRepository>,
    pub notifications: Arc<SqliteNotificationRepository>,
    pub hub: Arc<dyn RealtimeHub>,
    pub pause: PauseControl,
}

impl<E: EventPublisher> Clone for TaskDeps<E> {
    fn clone(&self) -> Self {
        Self {
            pipeline: self.pipeline.clone(),
            statistics: self.statistics.clone(),
            notifications: self.notifications.clone(),
            hub: self.hub.clone(),
            pause: self.pause.clone(),
        }
    }
}

pub struct PipelineTask<E: EventPublisher> {
    kind: TaskKind,
    deps: TaskDeps<E>,
}

impl<E: EventPublisher + 'static> PipelineTask<E> {
    pub fn new(kind: TaskKind, deps: TaskDeps<E>) -> Self {
        Self { kind, deps }
    }

    async fn dispatch(&self) -> Result<()> {
        let pipeline = &self.deps.pipeline;
        match self.kind {
            TaskKind::WantedRefresh => {
                let outcome = pipeline.refresh_wanted().await?;
                if outcome.added > 0 {
                    info!(target: "tasks", added = outcome.added, "new wanted items ingested");
                }
                pipeline.process_wanted(DRAIN_BATCH).await?;
            }
            TaskKind::PlexFullScan => {
                let outcome = pipeline.reconcile_library().await?;
                if outcome.reverted > 0 || outcome.deleted > 0 {
                    info!(
                        target: "tasks",
                        reverted = outcome.reverted,
                        deleted = outcome.deleted,
                        "library reconciliation found missing files"
                    );
                }
            }
            TaskKind::PlexRecentScan => {
                let files = pipeline.refresh_mount_snapshot();
                debug!(target: "tasks", files, "mount snapshot refreshed");
            }
            TaskKind::ProcessScraping => {
                pipeline.process_sleeping(DRAIN_BATCH).await?;
                pipeline.process_scraping(DRAIN_BATCH).await?;
            }
            TaskKind::ProcessAdding => {
                pipeline.process_adding(DRAIN_BATCH).await?;
                pipeline.process_pending_uncached(DRAIN_BATCH).await?;
            }
            TaskKind::ProcessChecking => {
                pipeline.process_checking(DRAIN_BATCH).await?;
                pipeline.process_upgrading(DRAIN_BATCH).await?;
                // Collections and upgrade commits land here, so the summary
                // is refreshed without waiting for the statistics cadence.
                if let Err(err) = self.deps.statistics.refresh().await {
                    warn!(target: "scheduler", error = %err, "statistics refresh after checking drain failed");
                }
            }
            TaskKind::ReleaseDateRefresh => {
                pipeline.process_unreleased(DRAIN_BATCH).await?;
            }
            TaskKind::UpgradeSweep => {
                let promoted = pipeline.upgrade_sweep().await?;
                if promoted > 0 {
                    info!(target: "tasks", promoted, "items promoted for upgrade");
                }
            }
            TaskKind::StatisticsRefresh => {
                self.deps.statistics.refresh().await?;
            }
            TaskKind::SendNotifications => {
                let pending = self.deps.notifications.list_unsent(NOTIFICATION_BATCH).await?;
                if pending.is_empty() {
                    return Ok(());
                }
                let mut sent = Vec::with_capacity(pending.len());
                for notification in &pending {
                    broadcast_json(self.deps.hub.as_ref(), "notifications", notification).await;
                    sent.push(notification.id);
                }
                self.deps.notifications.mark_sent(&sent).await?;
                debug!(target: "tasks", count = sent.len(), "notifications flushed");
            }
            TaskKind::ProcessPendingRclonePaths => {
                let resolved = pipeline.process_pending_rclone_paths().await?;
                if resolved > 0 {
                    debug!(target: "tasks", resolved, "rclone paths resolved");
                }
            }
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl<E: EventPublisher + 'static> Task for PipelineTask<E> {
    fn id(&self) -> &'static str {
        self.kind.name()
    }

    async fn run(&self) -> TaskOutcome {
        let result = self.dispatch().await;

        // A tripped provider breaker pauses the whole scheduler; the
        // supervisor probes the provider and resumes.
        if self.deps.pipeline.debrid_breaker().state() == BreakerState::Open {
            self.deps.pause.pause_system(PauseReason::ConnectionError);
        }

        match result {
            Ok(()) => TaskOutcome::Completed,
            Err(error) => {
                if !self.deps.pipeline.store_healthy().await {
                    self.deps.pause.pause_system(PauseReason::DbHealth);
                }
                TaskOutcome::failed(format!("{error:#}"))
            }
        }
    }
}

/// Probe backing the supervisor's auto-resume.
pub struct PipelineProbe<E: EventPublisher> {
    pipeline: Arc<Pipeline<E>>,
}

impl<E: EventPublisher + 'static> PipelineProbe<E> {
    pub fn new(pipeline: Arc<Pipeline<E>>) -> Self {
        Self { pipeline }
    }
}

#[async_trait::async_trait]
impl<E: EventPublisher + 'static> HealthProbe for PipelineProbe<E> {
    async fn probe(&self, reason: PauseReason) -> bool {
        match reason {
            PauseReason::ConnectionError => self.pipeline.debrid_healthy().await,
            PauseReason::DbHealth => self.pipeline.store_healthy().await,
            // Scheduled windows clear on their own clock; the supervisor
            // just keeps asking.
            PauseReason::SystemScheduled => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_names_are_stable() {
        let names: Vec<&str> = TaskKind::ALL.iter().map(|k| k.name()).collect();
        assert_eq!(names.len(), 11);
        assert!(names.contains(&"task_wanted_refresh"));
        assert!(names.contains(&"task_process_pending_rclone_paths"));
        for name in names {
            assert!(name.starts_with("task_"));
        }
    }
}
