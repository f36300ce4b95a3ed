//! Acknowledgment flow control
//!
//! One line is in flight at a time. The next line is written only after the
//! printer acknowledges the last one, or after the expected wait for that kind
//! of command elapses, in which case the last line is sent again.

use super::gcode;
use serde::{Deserialize, Serialize};
use std::time::{Duration, Instant};

/// Acknowledgment wait limits
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FlowControlConfig {
    /// Wait for `G0`/`G1` in milliseconds
    pub motion_timeout_ms: u64,
    /// Wait for any other command in milliseconds
    pub command_timeout_ms: u64,
    /// Wait for `G28` in milliseconds
    pub homing_timeout_ms: u64,
    /// Wait for `M109`/`M190` in milliseconds
    pub heating_timeout_ms: u64,
    /// Longest hold for a position report after `M114`, in milliseconds
    pub position_timeout_ms: u64,
}

impl Default for FlowControlConfig {
    fn default() -> Self {
        Self {
            motion_timeout_ms: 2_000,
            command_timeout_ms: 10_000,
            homing_timeout_ms: 30_000,
            heating_timeout_ms: 60_000,
            position_timeout_ms: 60_000,
        }
    }
}

/// Tracks the line waiting for acknowledgment
#[derive(Debug, Clone, Default)]
pub struct AckTracker {
    config: FlowControlConfig,
    waiting_since: Option<Instant>,
    waiting_for: String,
    no_ok_resend_count: u32,
    position_wait_since: Option<Instant>,
}

impl AckTracker {
    /// Create a tracker with the given limits
    pub fn new(config: FlowControlConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    /// Start waiting for the acknowledgment of `line`
    pub fn start(&mut self, line: &str, now: Instant) {
        self.waiting_since = Some(now);
        self.waiting_for = line.to_string();
    }

    /// The printer acknowledged the line in flight
    pub fn acknowledge(&mut self) {
        self.waiting_since = None;
        self.no_ok_resend_count = 0;
    }

    /// Whether a line is waiting for acknowledgment
    pub fn is_waiting(&self) -> bool {
        self.waiting_since.is_some()
    }

    /// Line currently waiting for acknowledgment
    pub fn waiting_for(&self) -> Option<&str> {
        self.waiting_since.map(|_| self.waiting_for.as_str())
    }

    /// Consecutive timeouts without an acknowledgment
    pub fn no_ok_resend_count(&self) -> u32 {
        self.no_ok_resend_count
    }

    /// How long to wait for the acknowledgment of `line`.
    ///
    /// Motion and generic waits grow with each silent timeout.
    pub fn expected_wait(&self, line: &str) -> Duration {
        let multiple = u64::from(self.no_ok_resend_count) + 1;
        let ms = match gcode::command(line).as_str() {
            "G0" | "G1" | "G00" | "G01" => self.config.motion_timeout_ms * multiple,
            "M109" | "M190" => self.config.heating_timeout_ms,
            "G28" => self.config.homing_timeout_ms,
            _ => self.config.command_timeout_ms * multiple,
        };
        Duration::from_millis(ms)
    }

    /// Whether the wait for the line in flight has run out
    pub fn timed_out(&self, now: Instant) -> bool {
        match self.waiting_since {
            Some(since) => now.saturating_duration_since(since) > self.expected_wait(&self.waiting_for),
            None => false,
        }
    }

    /// Record a timeout-driven resend and restart the wait
    pub fn record_timeout(&mut self, now: Instant) {
        self.no_ok_resend_count += 1;
        self.waiting_since = Some(now);
    }

    /// Hold writes until a position report arrives
    pub fn start_position_wait(&mut self, now: Instant) {
        self.position_wait_since = Some(now);
    }

    /// A position report arrived
    pub fn position_received(&mut self) {
        self.position_wait_since = None;
    }

    /// Whether writes are held waiting for a position report
    pub fn awaiting_position(&self, now: Instant) -> bool {
        self.position_wait_since.is_some_and(|since| {
            now.saturating_duration_since(since)
                < Duration::from_millis(self.config.position_timeout_ms)
        })
    }

    /// Forget everything in flight
    pub fn reset(&mut self) {
        self.waiting_since = None;
        self.no_ok_resend_count = 0;
        self.position_wait_since = None;
        self.waiting_for.clear();
    }
}
