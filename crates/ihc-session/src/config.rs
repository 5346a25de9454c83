use std::time::Duration;

use serde::Deserialize;

/// Dispatcher timing and channel sizing, in milliseconds where timed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct SessionConfig {
    /// Idle window before a keepalive while connected.
    pub keepalive_connected_ms: u64,
    /// Idle window before a keepalive while disconnected.
    pub keepalive_disconnected_ms: u64,
    /// How long the dispatcher waits for a listing reply.
    pub response_timeout_ms: u64,
    /// How long the dispatcher waits for a history reply.
    pub history_poll_ms: u64,
    /// How long a history caller waits for its result.
    pub history_wait_ms: u64,
    /// How long the image loader waits for one image.
    pub image_timeout_ms: u64,
    /// Capacity of the notification channel. Slow subscribers lag.
    pub notification_capacity: usize,
}

impl SessionConfig {
    /// Idle window for the current connectivity.
    pub fn keepalive_interval(&self, connected: bool) -> Duration {
        Duration::from_millis(if connected {
            self.keepalive_connected_ms
        } else {
            self.keepalive_disconnected_ms
        })
    }

    pub fn response_timeout(&self) -> Duration {
        Duration::from_millis(self.response_timeout_ms)
    }

    pub fn history_poll(&self) -> Duration {
        Duration::from_millis(self.history_poll_ms)
    }

    pub fn history_wait(&self) -> Duration {
        Duration::from_millis(self.history_wait_ms)
    }

    pub fn image_timeout(&self) -> Duration {
        Duration::from_millis(self.image_timeout_ms)
    }
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            keepalive_connected_ms: 7_500,
            keepalive_disconnected_ms: 2_500,
            response_timeout_ms: 5_000,
            history_poll_ms: 5_000,
            history_wait_ms: 7_500,
            image_timeout_ms: 5_000,
            notification_capacity: 256,
        }
    }
}
