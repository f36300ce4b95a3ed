//! Motion rewriting stages
//!
//! By the time a line leaves [`RelativeToAbsoluteStage`] every move is
//! absolute, so the stages after it only need to rewrite the words present on
//! the line.

use super::{PipelineStage, StageContext, Upstream};
use crate::protocol::gcode::{self, PositionTracker};
use printlink_core::{keys, Axis, Move, PositionMode, SettingsSource};
use std::sync::Arc;

const XYZ: [Axis; 3] = [Axis::X, Axis::Y, Axis::Z];

fn has_xyz(line: &str) -> bool {
    XYZ.iter().any(|axis| gcode::has_word(line, axis.letter()))
}

/// Rewrites relative moves into absolute ones
#[derive(Debug, Default)]
pub struct RelativeToAbsoluteStage {
    tracker: PositionTracker,
    printer_extrusion_relative: bool,
}

impl RelativeToAbsoluteStage {
    /// Start in absolute mode at the origin
    pub fn new() -> Self {
        Self::default()
    }

    fn convert(&self, line: &str) -> String {
        let destination = self.tracker.destination_of(line);
        let mut out = line.to_string();
        if self.tracker.motion_mode() == PositionMode::Relative {
            for axis in XYZ {
                if gcode::has_word(line, axis.letter()) {
                    out = gcode::replace_word(&out, axis.letter(), destination.axis(axis));
                }
            }
        }
        // The printer never sees G91, so E is only relative if M83 said so.
        if gcode::has_word(line, 'E')
            && self.tracker.extrusion_mode() == PositionMode::Relative
            && !self.printer_extrusion_relative
        {
            out = gcode::replace_word(&out, 'E', destination.e);
        }
        out
    }
}

impl PipelineStage for RelativeToAbsoluteStage {
    fn name(&self) -> &'static str {
        "relative_to_absolute"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        let line = upstream.next_line(ctx)?;
        let out = match gcode::command(&line).as_str() {
            "G91" => String::new(),
            "G90" | "M82" => {
                self.printer_extrusion_relative = false;
                line.clone()
            }
            "M83" => {
                self.printer_extrusion_relative = true;
                line.clone()
            }
            "G0" | "G1" | "G00" | "G01" => self.convert(&line),
            _ => line.clone(),
        };
        self.tracker.apply(&line);
        Some(out)
    }

    fn set_position(&mut self, position: &Move) -> Move {
        self.tracker.set_position(*position);
        *position
    }
}

/// Bed compensation applied to absolute destinations
pub trait LevelingSolution: Send + Sync {
    /// Compensated destination
    fn apply(&self, destination: &Move) -> Move;

    /// Logical position of a compensated one.
    ///
    /// The default assumes the correction depends on X and Y only and
    /// subtracts the correction found at height zero.
    fn unapply(&self, leveled: &Move) -> Move {
        let base = Move {
            z: 0.0,
            ..*leveled
        };
        let shift = self.apply(&base);
        let mut logical = *leveled;
        for axis in XYZ {
            logical.set_axis(axis, leveled.axis(axis) - (shift.axis(axis) - base.axis(axis)));
        }
        logical
    }
}

/// Leaves destinations unchanged
#[derive(Debug, Clone, Copy, Default)]
pub struct NoLeveling;

impl LevelingSolution for NoLeveling {
    fn apply(&self, destination: &Move) -> Move {
        *destination
    }
}

/// Applies a leveling solution when enabled and allowed
pub struct LevelingStage {
    solution: Arc<dyn LevelingSolution>,
    tracker: PositionTracker,
    active: bool,
}

impl LevelingStage {
    /// Use a leveling solution
    pub fn new(solution: Arc<dyn LevelingSolution>) -> Self {
        Self {
            solution,
            tracker: PositionTracker::new(),
            active: false,
        }
    }
}

impl std::fmt::Debug for LevelingStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LevelingStage")
            .field("position", &self.tracker.position())
            .finish()
    }
}

impl PipelineStage for LevelingStage {
    fn name(&self) -> &'static str {
        "leveling"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        let line = upstream.next_line(ctx)?;
        let enabled = ctx.settings.get_bool(keys::PRINT_LEVELING_ENABLED) && ctx.flags.leveling_allowed;
        self.active = enabled;
        if !(enabled && gcode::is_move(&line) && has_xyz(&line)) {
            self.tracker.apply(&line);
            return Some(line);
        }

        let leveled = self.solution.apply(&self.tracker.destination_of(&line));
        let mut out = line.clone();
        for axis in [Axis::X, Axis::Y] {
            if gcode::has_word(&line, axis.letter()) {
                out = gcode::replace_word(&out, axis.letter(), leveled.axis(axis));
            }
        }
        out = gcode::replace_word(&out, 'Z', leveled.z);
        self.tracker.apply(&line);
        Some(out)
    }

    fn set_position(&mut self, position: &Move) -> Move {
        let logical = if self.active {
            self.solution.unapply(position)
        } else {
            *position
        };
        self.tracker.set_position(logical);
        logical
    }
}

/// Adds the baby-step Z nudge and the active tool's offset to moves
#[derive(Debug, Default)]
pub struct BabyStepStage {
    tracker: PositionTracker,
    active_tool: usize,
    applied: [f64; 3],
}

impl BabyStepStage {
    /// Start with no offset applied
    pub fn new() -> Self {
        Self::default()
    }

    fn offsets(&self, settings: &dyn SettingsSource) -> [f64; 3] {
        let tool = settings.get_f64_list(&format!("{}{}", keys::EXTRUDER_OFFSET_PREFIX, self.active_tool));
        let tool_offset = |i: usize| tool.get(i).copied().unwrap_or(0.0);
        [
            tool_offset(0),
            tool_offset(1),
            tool_offset(2) + settings.get_f64_or(keys::BABY_STEP_Z_OFFSET, 0.0),
        ]
    }
}

impl PipelineStage for BabyStepStage {
    fn name(&self) -> &'static str {
        "baby_steps"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        let line = upstream.next_line(ctx)?;
        let command = gcode::command(&line);
        if let Some(tool) = command.strip_prefix('T').and_then(|t| t.parse::<usize>().ok()) {
            self.active_tool = tool;
        }
        if !(gcode::is_move(&line) && has_xyz(&line)) {
            self.tracker.apply(&line);
            return Some(line);
        }

        let offsets = self.offsets(ctx.settings);
        let destination = self.tracker.destination_of(&line);
        let mut out = line.clone();
        for (i, axis) in XYZ.into_iter().enumerate() {
            let present = gcode::has_word(&line, axis.letter());
            if present || offsets[i] != self.applied[i] {
                out = gcode::replace_word(&out, axis.letter(), destination.axis(axis) + offsets[i]);
            }
        }
        self.applied = offsets;
        self.tracker.apply(&line);
        Some(out)
    }

    fn set_position(&mut self, position: &Move) -> Move {
        let mut unshifted = *position;
        for (i, axis) in XYZ.into_iter().enumerate() {
            unshifted.set_axis(axis, position.axis(axis) - self.applied[i]);
        }
        self.tracker.set_position(unshifted);
        unshifted
    }
}

/// Scales extrusion by the configured ratio
#[derive(Debug, Default)]
pub struct ExtrusionRatioStage {
    source_e: f64,
    output_e: f64,
    relative: bool,
}

impl ExtrusionRatioStage {
    /// Start at zero extrusion in absolute mode
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineStage for ExtrusionRatioStage {
    fn name(&self) -> &'static str {
        "extrusion_ratio"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        let line = upstream.next_line(ctx)?;
        match gcode::command(&line).as_str() {
            "M82" | "G90" => self.relative = false,
            "M83" => self.relative = true,
            "G92" => {
                if let Some(e) = gcode::word_value(&line, 'E') {
                    self.source_e = e;
                    self.output_e = e;
                } else if !has_xyz(&line) {
                    self.source_e = 0.0;
                    self.output_e = 0.0;
                }
            }
            "G0" | "G1" | "G00" | "G01" => {
                let Some(e) = gcode::word_value(&line, 'E') else {
                    return Some(line);
                };
                let ratio = ctx.settings.get_f64_or(keys::EXTRUSION_RATIO, 1.0);
                if self.relative {
                    if ratio == 1.0 {
                        return Some(line);
                    }
                    return Some(gcode::replace_word(&line, 'E', e * ratio));
                }
                if ratio == 1.0 && (self.output_e - self.source_e).abs() < 1e-9 {
                    self.source_e = e;
                    self.output_e = e;
                    return Some(line);
                }
                self.output_e += (e - self.source_e) * ratio;
                self.source_e = e;
                return Some(gcode::replace_word(&line, 'E', self.output_e));
            }
            _ => {}
        }
        Some(line)
    }

    fn set_position(&mut self, position: &Move) -> Move {
        self.source_e = position.e;
        self.output_e = position.e;
        *position
    }
}

/// Scales move feed rates by the configured ratio
#[derive(Debug, Default)]
pub struct FeedRateRatioStage;

impl FeedRateRatioStage {
    /// Create the stage
    pub fn new() -> Self {
        Self
    }
}

impl PipelineStage for FeedRateRatioStage {
    fn name(&self) -> &'static str {
        "feed_rate_ratio"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        let line = upstream.next_line(ctx)?;
        let ratio = ctx.settings.get_f64_or(keys::FEED_RATE_RATIO, 1.0);
        if ratio == 1.0 || !gcode::is_move(&line) {
            return Some(line);
        }
        match gcode::word_value(&line, 'F') {
            Some(feed) => Some(gcode::replace_word(&line, 'F', feed * ratio)),
            None => Some(line),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{GcodeJob, JobSource, Pipeline};
    use printlink_core::TemperatureState;
    use std::collections::HashMap;
    use std::time::Instant;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn run(lines: &[&str], stage: Box<dyn PipelineStage>, config: &HashMap<String, String>) -> Vec<String> {
        let job = GcodeJob::from_lines("job", lines.iter().copied());
        let mut pipeline = Pipeline::new(Box::new(JobSource::new(job)), vec![stage]);
        let temps = TemperatureState::new();
        let mut out = Vec::new();
        while let Some(line) = pipeline.pull(config, &temps, Instant::now()) {
            out.push(line);
        }
        out
    }

    #[test]
    fn test_relative_moves_become_absolute() {
        let out = run(
            &["G1 X10 Y10 Z0.2 E1", "G91", "G1 X5 E0.5", "G1 Y-2.5", "G90", "G1 X0"],
            Box::new(RelativeToAbsoluteStage::new()),
            &settings(&[]),
        );
        assert_eq!(
            out,
            vec!["G1 X10 Y10 Z0.2 E1", "G1 X15 E1.5", "G1 Y7.5", "G90", "G1 X0"]
        );
    }

    #[test]
    fn test_printer_relative_extrusion_left_alone() {
        let out = run(
            &["M83", "G91", "G1 X1 E0.5", "G1 X1 E0.5"],
            Box::new(RelativeToAbsoluteStage::new()),
            &settings(&[]),
        );
        assert_eq!(out, vec!["M83", "G1 X1 E0.5", "G1 X2 E0.5"]);
    }

    struct Tilt;

    impl LevelingSolution for Tilt {
        fn apply(&self, destination: &Move) -> Move {
            let mut leveled = *destination;
            leveled.z += destination.x * 0.01;
            leveled
        }
    }

    #[test]
    fn test_leveling_only_when_enabled() {
        let lines = ["G1 X10 Y0 Z0.2", "G1 X20", "G1 E5"];
        let off = run(&lines, Box::new(LevelingStage::new(Arc::new(Tilt))), &settings(&[]));
        assert_eq!(off, lines);

        let on = run(
            &lines,
            Box::new(LevelingStage::new(Arc::new(Tilt))),
            &settings(&[(keys::PRINT_LEVELING_ENABLED, "1")]),
        );
        assert_eq!(on, vec!["G1 X10 Y0 Z0.3", "G1 X20 Z0.4", "G1 E5"]);
    }

    #[test]
    fn test_reported_position_is_unleveled() {
        let config = settings(&[(keys::PRINT_LEVELING_ENABLED, "1")]);
        let job = GcodeJob::from_lines("job", ["G1 X100 Y0 Z0.2", "G1 X110"]);
        let mut pipeline = Pipeline::new(
            Box::new(JobSource::new(job)),
            vec![Box::new(LevelingStage::new(Arc::new(Tilt)))],
        );
        let temps = TemperatureState::new();
        let now = Instant::now();

        assert_eq!(pipeline.pull(&config, &temps, now).as_deref(), Some("G1 X100 Y0 Z1.2"));
        pipeline.set_position(&Move {
            x: 100.0,
            y: 0.0,
            z: 1.2,
            ..Move::default()
        });
        assert_eq!(pipeline.pull(&config, &temps, now).as_deref(), Some("G1 X110 Z1.3"));
    }

    #[test]
    fn test_default_unapply_inverts_xy_correction() {
        let leveled = Tilt.apply(&Move {
            x: 50.0,
            y: 20.0,
            z: 0.3,
            ..Move::default()
        });
        let logical = Tilt.unapply(&leveled);
        assert!((logical.z - 0.3).abs() < 1e-9);
        assert_eq!(logical.x, 50.0);
        assert_eq!(logical.y, 20.0);
    }

    #[test]
    fn test_baby_step_and_tool_offset() {
        let config = settings(&[
            (keys::BABY_STEP_Z_OFFSET, "0.1"),
            ("extruder_offset_1", "20,0,0"),
        ]);
        let out = run(
            &["G1 X10 Y10 Z0.2", "G1 X20", "T1", "G1 X30"],
            Box::new(BabyStepStage::new()),
            &config,
        );
        assert_eq!(out, vec!["G1 X10 Y10 Z0.3", "G1 X20", "T1", "G1 X50"]);
    }

    #[test]
    fn test_extrusion_ratio_absolute_and_relative() {
        let config = settings(&[(keys::EXTRUSION_RATIO, "0.5")]);
        let out = run(
            &["G1 X1 E2", "G1 X2 E4", "G92 E0", "G1 X3 E2", "M83", "G1 X4 E1"],
            Box::new(ExtrusionRatioStage::new()),
            &config,
        );
        assert_eq!(
            out,
            vec!["G1 X1 E1", "G1 X2 E2", "G92 E0", "G1 X3 E1", "M83", "G1 X4 E0.5"]
        );
    }

    #[test]
    fn test_feed_rate_ratio() {
        let config = settings(&[(keys::FEED_RATE_RATIO, "0.5")]);
        let out = run(
            &["G1 X10 F3000", "G1 X20", "G28"],
            Box::new(FeedRateRatioStage::new()),
            &config,
        );
        assert_eq!(out, vec!["G1 X10 F1500", "G1 X20", "G28"]);
    }
}
