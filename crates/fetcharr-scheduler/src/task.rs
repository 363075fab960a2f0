// SPDX-License-Identifier: GPL-3.0-or-later
use std::fmt;
use std::time::Duration;

/// Outcome of one task run. A failure may ask for a single delayed rerun
/// within the same tick; recurring work otherwise waits for its next tick.
#[derive(Debug)]
pub enum TaskOutcome {
    Completed,
    Failed {
        error: String,
        rerun_after: Option<Duration>,
    },
}

impl TaskOutcome {
    pub fn failed(error: impl Into<String>) -> Self {
        Self::Failed {
            error: error.into(),
            rerun_after: None,
        }
    }
}

/// A unit of recurring background work.
#[async_trait::async_trait]
pub trait Task: Send + Sync {
    /// Stable identifier, used for cadence config and reporting.
    fn id(&self) -> &'static str;

    async fn run(&self) -> TaskOutcome;
}

impl fmt::Debug for dyn Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task").field("id", &self.id()).finish()
    }
}
