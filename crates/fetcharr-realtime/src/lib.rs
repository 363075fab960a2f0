// SPDX-License-Identifier: GPL-3.0-or-later
//! Outbound fan-out for item lifecycle updates. The scheduler's
//! notification task pushes collected/blacklisted transitions through a
//! hub; sinks must never block the pipeline.

use serde::Serialize;
use tracing::{info, warn};

#[async_trait::async_trait]
pub trait RealtimeHub: Send + Sync + 'static {
    async fn broadcast(&self, channel: &str, payload: &str);
}

/// Serialize and broadcast in one step. Serialization failures are logged
/// and swallowed; a bad payload must not stall the notification queue.
pub async fn broadcast_json<T: Serialize + Sync>(hub: &dyn RealtimeHub, channel: &str, value: &T) {
    match serde_json::to_string(value) {
        Ok(payload) => hub.broadcast(channel, &payload).await,
        Err(error) => {
            warn!(target: "realtime", %channel, %error, "failed to serialize broadcast payload");
        }
    }
}

/// Hub that writes every broadcast to the log. The default sink until a
/// websocket or webhook hub is wired in.
pub struct LogRealtimeHub;

#[async_trait::async_trait]
impl RealtimeHub for LogRealtimeHub {
    async fn broadcast(&self, channel: &str, payload: &str) {
        info!(target: "realtime", %channel, %payload, "broadcast");
    }
}

/// Hub that drops everything, for tests and headless runs.
pub struct NoopRealtimeHub;

#[async_trait::async_trait]
impl RealtimeHub for NoopRealtimeHub {
    async fn broadcast(&self, _channel: &str, _payload: &str) {}
}
