// SPDX-License-Identifier: GPL-3.0-or-later
pub mod pause;
pub mod registry;
pub mod task;
pub mod tasks;

use anyhow::Result;
use fetcharr_application::events::EventPublisher;
use fetcharr_config::AppConfig;
use pause::{spawn_supervisor, PauseControl};
use registry::TaskRegistry;
use std::sync::Arc;
use std::time::Duration;
use tasks::{PipelineProbe, PipelineTask, TaskDeps, TaskKind};
use tokio::task::JoinHandle;
use tracing::info;

pub use pause::{HealthProbe, PauseReason, PauseState};
pub use task::{Task, TaskOutcome};

pub struct Scheduler<E: EventPublisher + 'static> {
    config: AppConfig,
    registry: Arc<TaskRegistry>,
    deps: TaskDeps<E>,
    supervisor: Option<JoinHandle<()>>,
}

impl<E: EventPublisher + 'static> Scheduler<E> {
    pub fn new(config: AppConfig, deps: TaskDeps<E>) -> Self {
        let registry = Arc::new(TaskRegistry::new(
            config.scheduler.max_concurrent_tasks,
            deps.pause.clone(),
        ));
        Self {
            config,
            registry,
            deps,
            supervisor: None,
        }
    }

    pub fn pause_control(&self) -> &PauseControl {
        self.registry.pause()
    }

    /// Register the whole task catalog with its configured cadences.
    pub async fn register_tasks(&self) {
        for kind in TaskKind::ALL {
            let interval = self
                .config
                .task_interval_secs(kind.name(), kind.default_interval_secs());
            self.registry
                .register(PipelineTask::new(kind, self.deps.clone()), interval)
                .await;
        }
        info!(target: "scheduler", tasks = TaskKind::ALL.len(), "task catalog registered");
    }

    /// Start every ticker and the pause supervisor.
    pub async fn start(&mut self) -> Result<()> {
        self.registry.start().await;
        let probe = Arc::new(PipelineProbe::new(self.deps.pipeline.clone()));
        self.supervisor = Some(spawn_supervisor(
            self.deps.pause.clone(),
            probe,
            Duration::from_secs(self.config.scheduler.pause_recheck_secs),
            self.config.scheduler.max_resume_attempts,
            self.registry.shutdown_signal(),
        ));
        Ok(())
    }

    /// Stop all tickers, honoring the configured grace window.
    pub async fn stop(&mut self) {
        self.registry
            .stop(Duration::from_secs(self.config.scheduler.shutdown_grace_secs))
            .await;
        if let Some(supervisor) = self.supervisor.take() {
            supervisor.abort();
        }
    }
}
