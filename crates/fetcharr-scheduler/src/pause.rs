// SPDX-License-Identifier: GPL-3.0-or-later
//! Scheduler pause model. Three states: running, user-paused (only an
//! operator resumes), system-paused with a reason (the supervisor probes
//! the failed dependency and auto-resumes, up to a bounded number of
//! attempts).

use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseReason {
    ConnectionError,
    DbHealth,
    SystemScheduled,
}

impl PauseReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ConnectionError => "CONNECTION_ERROR",
            Self::DbHealth => "DB_HEALTH",
            Self::SystemScheduled => "SYSTEM_SCHEDULED",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PauseState {
    Running,
    UserPaused,
    SystemPaused(PauseReason),
}

impl PauseState {
    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn describe(&self) -> String {
        match self {
            Self::Running => "running".to_string(),
            Self::UserPaused => "user_paused".to_string(),
            Self::SystemPaused(reason) => format!("system_paused({})", reason.as_str()),
        }
    }
}

/// Shared pause switch. Tasks read it before every tick; the admin API and
/// the pipeline's failure handling write it.
#[derive(Clone)]
pub struct PauseControl {
    tx: Arc<watch::Sender<PauseState>>,
}

impl PauseControl {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(PauseState::Running);
        Self { tx: Arc::new(tx) }
    }

    pub fn state(&self) -> PauseState {
        *self.tx.borrow()
    }

    pub fn subscribe(&self) -> watch::Receiver<PauseState> {
        self.tx.subscribe()
    }

    /// Operator pause. Overrides any system pause; only `resume` lifts it.
    pub fn pause_user(&self) {
        info!(target: "scheduler", "paused by operator");
        self.tx.send_replace(PauseState::UserPaused);
    }

    /// System pause. Never downgrades an operator pause.
    pub fn pause_system(&self, reason: PauseReason) {
        let previous = self.state();
        if previous == PauseState::UserPaused {
            return;
        }
        if previous != PauseState::SystemPaused(reason) {
            warn!(target: "scheduler", reason = reason.as_str(), "system paused");
        }
        self.tx.send_replace(PauseState::SystemPaused(reason));
    }

    /// Operator resume, lifts any pause.
    pub fn resume(&self) {
        info!(target: "scheduler", "resumed");
        self.tx.send_replace(PauseState::Running);
    }

    /// Supervisor resume; a user pause stays in place.
    pub fn resume_system(&self) {
        if matches!(self.state(), PauseState::SystemPaused(_)) {
            info!(target: "scheduler", "auto-resumed after health probe");
            self.tx.send_replace(PauseState::Running);
        }
    }
}

impl Default for PauseControl {
    fn default() -> Self {
        Self::new()
    }
}

/// Probes the dependency behind a system pause.
#[async_trait::async_trait]
pub trait HealthProbe: Send + Sync {
    async fn probe(&self, reason: PauseReason) -> bool;
}

/// Supervisor loop: while system-paused, probe the failed dependency every
/// `recheck` and resume when it answers. After `max_attempts` consecutive
/// failed probes the supervisor stops probing that pause; an operator
/// resume or a new pause reason re-arms it.
pub fn spawn_supervisor(
    control: PauseControl,
    probe: Arc<dyn HealthProbe>,
    recheck: Duration,
    max_attempts: u32,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut attempts: u32 = 0;
        let mut last_reason: Option<PauseReason> = None;

        loop {
            tokio::select! {
                _ = tokio::time::sleep(recheck) => {}
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }

            let PauseState::SystemPaused(reason) = control.state() else {
                attempts = 0;
                last_reason = None;
                continue;
            };

            if last_reason != Some(reason) {
                attempts = 0;
                last_reason = Some(reason);
            }
            if attempts >= max_attempts {
                continue;
            }
            attempts += 1;

            if probe.probe(reason).await {
                control.resume_system();
                attempts = 0;
                last_reason = None;
            } else if attempts >= max_attempts {
                error!(
                    target: "scheduler",
                    reason = reason.as_str(),
                    attempts,
                    "auto-resume attempts exhausted, staying paused"
                );
            } else {
                warn!(
                    target: "scheduler",
                    reason = reason.as_str(),
                    attempt = attempts,
                    max_attempts,
                    "health probe failed"
                );
            }
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedProbe {
        healthy_after: u32,
        calls: AtomicU32,
    }

    #[async_trait::async_trait]
    impl HealthProbe for ScriptedProbe {
        async fn probe(&self, _reason: PauseReason) -> bool {
            self.calls.fetch_add(1, Ordering::SeqCst) + 1 >= self.healthy_after
        }
    }

    #[test]
    fn user_pause_is_not_downgraded_by_system_pause() {
        let control = PauseControl::new();
        control.pause_user();
        control.pause_system(PauseReason::ConnectionError);
        assert_eq!(control.state(), PauseState::UserPaused);

        control.resume();
        assert!(control.state().is_running());
    }

    #[test]
    fn system_resume_does_not_lift_user_pause() {
        let control = PauseControl::new();
        control.pause_user();
        control.resume_system();
        assert_eq!(control.state(), PauseState::UserPaused);
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_resumes_once_the_probe_passes() {
        let control = PauseControl::new();
        control.pause_system(PauseReason::ConnectionError);

        let probe = Arc::new(ScriptedProbe {
            healthy_after: 3,
            calls: AtomicU32::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_supervisor(
            control.clone(),
            probe.clone(),
            Duration::from_secs(1),
            10,
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_secs(5)).await;
        assert!(control.state().is_running());
        assert!(probe.calls.load(Ordering::SeqCst) >= 3);

        shutdown_tx.send(true).expect("signal shutdown");
        handle.await.expect("supervisor exits");
    }

    #[tokio::test(start_paused = true)]
    async fn supervisor_gives_up_after_max_attempts() {
        let control = PauseControl::new();
        control.pause_system(PauseReason::DbHealth);

        let probe = Arc::new(ScriptedProbe {
            healthy_after: u32::MAX,
            calls: AtomicU32::new(0),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = spawn_supervisor(
            control.clone(),
            probe.clone(),
            Duration::from_secs(1),
            2,
            shutdown_rx,
        );

        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(
            control.state(),
            PauseState::SystemPaused(PauseReason::DbHealth)
        );
        assert_eq!(probe.calls.load(Ordering::SeqCst), 2);

        shutdown_tx.send(true).expect("signal shutdown");
        handle.await.expect("supervisor exits");
    }
}
