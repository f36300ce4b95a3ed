//! Pause handling stage
//!
//! Pausing injects the configured pause code followed by a position query and
//! an internal marker. When the marker comes up the position is recorded and
//! the source is held. Resuming moves back to that position, runs the resume
//! code and releases the source at exactly the next unread line.

use super::{PipelineStage, StageCommand, StageContext, StageSignal, Upstream};
use crate::protocol::gcode::{self, PositionTracker};
use printlink_core::{keys, Move, PauseReason, SettingsSource};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

const PAUSE_MARKER: &str = "MH_PAUSE";
const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(10);

/// Holds the source while paused and injects pause and resume code
#[derive(Debug)]
pub struct PauseStage {
    injected: VecDeque<String>,
    paused: bool,
    pending: Option<(PauseReason, Option<u32>)>,
    tracker: PositionTracker,
    pause_position: Move,
    last_source_line: Option<Instant>,
}

impl PauseStage {
    /// Create an unpaused stage
    pub fn new() -> Self {
        Self {
            injected: VecDeque::new(),
            paused: false,
            pending: None,
            tracker: PositionTracker::new(),
            pause_position: Move::default(),
            last_source_line: None,
        }
    }

    /// Whether the source is held
    pub fn is_paused(&self) -> bool {
        self.paused
    }

    fn inject(&mut self, code: &str) {
        for line in gcode::split_lines(code) {
            let line = gcode::strip_comment(&line).to_ascii_uppercase();
            if !line.is_empty() {
                self.injected.push_back(line);
            }
        }
    }

    fn begin_pause(&mut self, reason: PauseReason, layer: Option<u32>, settings: &dyn SettingsSource) {
        tracing::info!("Pausing ({})", reason);
        self.pending = Some((reason, layer));
        self.inject(&settings.get_string(keys::PAUSE_GCODE));
        self.inject("M114");
        self.inject(PAUSE_MARKER);
    }

    fn begin_resume(&mut self, settings: &dyn SettingsSource) {
        let position = self.pause_position;
        let xy_speed = settings.get_f64_or(keys::MANUAL_SPEED_XY, 3000.0);
        let perimeter_speed = settings.get_f64_or(keys::PERIMETER_SPEED, 30.0) * 60.0;

        self.inject(&format!("G92 E{}", gcode::format_number(position.e)));
        let nudged = Move::new(position.x + 0.01, position.y + 0.01, position.z + 0.01)
            .with_feed_rate(xy_speed + 1.0);
        self.inject(&gcode::movement_line(&nudged));
        let back = Move::new(position.x, position.y, position.z).with_feed_rate(xy_speed);
        self.inject(&gcode::movement_line(&back));
        self.inject(&settings.get_string(keys::RESUME_GCODE));
        self.inject("M114");
        self.inject("G91");
        self.inject(&format!("G1 X.1 F{}", gcode::format_number(perimeter_speed)));
        self.inject(&format!("G1 X-.1 F{}", gcode::format_number(perimeter_speed)));
        self.inject("G90");
        self.paused = false;
        tracing::info!("Resuming at {}", position);
    }

    fn pause_on_layer(layer_index: u32, ctx: &StageContext<'_>) -> bool {
        let layer = layer_index + 1;
        !ctx.flags.recovering
            && ctx
                .settings
                .get_f64_list(keys::LAYERS_TO_PAUSE)
                .iter()
                .any(|l| *l as u32 == layer)
    }
}

impl Default for PauseStage {
    fn default() -> Self {
        Self::new()
    }
}

impl PipelineStage for PauseStage {
    fn name(&self) -> &'static str {
        "pause"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        let line = match self.injected.pop_front() {
            Some(line) => line,
            None if self.paused => {
                let idle_for = self
                    .last_source_line
                    .map(|at| ctx.now.saturating_duration_since(at))
                    .unwrap_or_default();
                if idle_for >= KEEP_ALIVE_INTERVAL {
                    // Keeps the steppers energized while waiting.
                    let speed = ctx.settings.get_f64_or(keys::MANUAL_SPEED_XY, 3000.0);
                    self.inject("G91");
                    self.inject(&format!("G1 X.1 F{}", gcode::format_number(speed)));
                    self.inject(&format!("G1 X-.1 F{}", gcode::format_number(speed)));
                    self.inject("G90");
                    self.last_source_line = Some(ctx.now);
                }
                return self.injected.pop_front();
            }
            None => {
                let line = upstream.next_line(ctx)?;
                self.last_source_line = Some(ctx.now);
                line
            }
        };

        if let Some(layer_index) = gcode::layer_number(&line) {
            if Self::pause_on_layer(layer_index, ctx) {
                self.begin_pause(PauseReason::PauseLayerReached, Some(layer_index + 1), ctx.settings);
            }
            return Some(line);
        }

        let command = gcode::command(&line);
        if command == "M226" || command.eq_ignore_ascii_case("@pause") {
            self.begin_pause(PauseReason::GCodeRequest, None, ctx.settings);
            return Some(String::new());
        }
        if line == PAUSE_MARKER {
            self.pause_position = self.tracker.position();
            self.paused = true;
            self.last_source_line = Some(ctx.now);
            let (reason, layer) = self.pending.take().unwrap_or((PauseReason::UserRequested, None));
            ctx.signals.push(StageSignal::PauseReached {
                reason,
                layer,
                position: self.pause_position,
            });
            return Some(String::new());
        }

        self.tracker.apply(&line);
        Some(line)
    }

    fn control(&mut self, command: StageCommand, ctx: &mut StageContext<'_>) -> bool {
        match command {
            StageCommand::Pause(reason) => {
                if self.paused || self.pending.is_some() {
                    return false;
                }
                self.begin_pause(reason, None, ctx.settings);
                true
            }
            StageCommand::Resume => {
                if !self.paused {
                    return false;
                }
                self.begin_resume(ctx.settings);
                true
            }
        }
    }

    fn set_position(&mut self, position: &Move) -> Move {
        self.tracker.set_position(*position);
        *position
    }

    fn is_idle(&self) -> bool {
        self.injected.is_empty() && !self.paused
    }
}
