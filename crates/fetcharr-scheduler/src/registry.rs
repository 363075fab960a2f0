// SPDX-License-Identifier: GPL-3.0-or-later
use crate::pause::PauseControl;
use crate::task::{Task, TaskOutcome};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{watch, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{error, info, warn};

struct RegisteredTask {
    task: Arc<dyn Task>,
    interval_secs: u64,
}

/// Runs registered tasks on their cadence. Concurrency is bounded by a
/// semaphore; a paused scheduler skips ticks instead of queueing them, and
/// `MissedTickBehavior::Delay` coalesces missed intervals into one run.
pub struct TaskRegistry {
    tasks: RwLock<HashMap<String, RegisteredTask>>,
    max_concurrent: usize,
    pause: PauseControl,
    shutdown: watch::Sender<bool>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskRegistry {
    pub fn new(max_concurrent: usize, pause: PauseControl) -> Self {
        let (shutdown, _rx) = watch::channel(false);
        Self {
            tasks: RwLock::new(HashMap::new()),
            max_concurrent,
            pause,
            shutdown,
            handles: Mutex::new(Vec::new()),
        }
    }

    pub fn pause(&self) -> &PauseControl {
        &self.pause
    }

    pub fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub async fn register(&self, task: impl Task + 'static, interval_secs: u64) {
        let task_id = task.id().to_string();
        info!(
            target: "registry",
            %task_id,
            interval_secs,
            "registering task"
        );
        self.tasks.write().await.insert(
            task_id,
            RegisteredTask {
                task: Arc::new(task) as Arc<dyn Task>,
                interval_secs,
            },
        );
    }

    /// Spawn one ticker per registered task. Idempotent only in the sense
    /// that calling it twice doubles the tickers; callers start once.
    pub async fn start(self: &Arc<Self>) {
        let semaphore = Arc::new(Semaphore::new(self.max_concurrent));
        let tasks = self.tasks.read().await;
        info!(
            target: "registry",
            tasks = tasks.len(),
            max_concurrent = self.max_concurrent,
            "starting task registry"
        );

        for registered in tasks.values() {
            let task = registered.task.clone();
            let period = Duration::from_secs(registered.interval_secs.max(1));
            let semaphore = semaphore.clone();
            let pause = self.pause.clone();
            let mut shutdown = self.shutdown.subscribe();

            let handle = tokio::spawn(async move {
                let mut ticker = interval(period);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
                loop {
                    tokio::select! {
                        _ = ticker.tick() => {}
                        _ = shutdown.changed() => {
                            if *shutdown.borrow() {
                                break;
                            }
                            continue;
                        }
                    }
                    if !pause.state().is_running() {
                        continue;
                    }
                    let Ok(permit) = semaphore.clone().acquire_owned().await else {
                        break;
                    };
                    let task = task.clone();
                    tokio::spawn(async move {
                        let _permit = permit;
                        Self::run_task(task).await;
                    });
                }
            });
            self.handles.lock().expect("handle lock").push(handle);
        }
    }

    /// Signal every ticker, wait out the grace window, then abort whatever
    /// is still running.
    pub async fn stop(&self, grace: Duration) {
        info!(target: "registry", grace_secs = grace.as_secs(), "stopping task registry");
        let _ = self.shutdown.send(true);
        tokio::time::sleep(grace).await;
        let mut handles = self.handles.lock().expect("handle lock");
        for handle in handles.drain(..) {
            if !handle.is_finished() {
                handle.abort();
            }
        }
    }

    /// One run, plus at most one delayed rerun when the outcome asks for
    /// it. Anything beyond that waits for the next tick.
    async fn run_task(task: Arc<dyn Task>) {
        match task.run().await {
            TaskOutcome::Completed => return,
            TaskOutcome::Failed { error, rerun_after } => {
                error!(target: "registry", task_id = task.id(), %error, "task failed");
                let Some(delay) = rerun_after else {
                    return;
                };
                warn!(target: "registry", task_id = task.id(), ?delay, "rerunning task after delay");
                tokio::time::sleep(delay).await;
            }
        }
        if let TaskOutcome::Failed { error, .. } = task.run().await {
            error!(target: "registry", task_id = task.id(), %error, "task rerun failed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct CountingTask {
        runs: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Task for CountingTask {
        fn id(&self) -> &'static str {
            "counting"
        }
        async fn run(&self) -> TaskOutcome {
            self.runs.fetch_add(1, Ordering::SeqCst);
            TaskOutcome::Completed
        }
    }

    struct FlakyTask {
        runs: Arc<AtomicU32>,
    }

    #[async_trait::async_trait]
    impl Task for FlakyTask {
        fn id(&self) -> &'static str {
            "flaky"
        }
        async fn run(&self) -> TaskOutcome {
            if self.runs.fetch_add(1, Ordering::SeqCst) == 0 {
                TaskOutcome::Failed {
                    error: "transient".to_string(),
                    rerun_after: Some(Duration::from_secs(2)),
                }
            } else {
                TaskOutcome::Completed
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn tasks_tick_on_their_interval() {
        let registry = Arc::new(TaskRegistry::new(4, PauseControl::new()));
        let runs = Arc::new(AtomicU32::new(0));
        registry
            .register(CountingTask { runs: runs.clone() }, 10)
            .await;
        registry.start().await;

        // First tick fires immediately, then every 10 seconds.
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 3);

        registry.stop(Duration::from_secs(0)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn paused_scheduler_skips_ticks() {
        let pause = PauseControl::new();
        let registry = Arc::new(TaskRegistry::new(4, pause.clone()));
        let runs = Arc::new(AtomicU32::new(0));
        registry
            .register(CountingTask { runs: runs.clone() }, 10)
            .await;

        pause.pause_user();
        registry.start().await;
        tokio::time::sleep(Duration::from_secs(25)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 0);

        pause.resume();
        tokio::time::sleep(Duration::from_secs(11)).await;
        assert!(runs.load(Ordering::SeqCst) >= 1);

        registry.stop(Duration::from_secs(0)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn failed_task_gets_one_delayed_rerun() {
        let registry = Arc::new(TaskRegistry::new(4, PauseControl::new()));
        let runs = Arc::new(AtomicU32::new(0));
        registry
            .register(FlakyTask { runs: runs.clone() }, 60)
            .await;
        registry.start().await;

        // One tick: the failing run plus its requested rerun, nothing more.
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(runs.load(Ordering::SeqCst), 2);

        registry.stop(Duration::from_secs(0)).await;
    }
}
