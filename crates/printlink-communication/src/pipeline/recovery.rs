//! Print recovery source
//!
//! Replaces the job source when a print is resumed after an interruption. It
//! lifts the nozzle off the part, rehomes, replays only the state-setting
//! lines of the part already printed, primes, and prints the first recovered
//! layer slowly before handing over to the plain job.

use super::source::JobSource;
use super::{LineSource, StageContext};
use crate::protocol::gcode::{self, PositionTracker};
use printlink_core::{keys, Move, SettingsSource};
use std::collections::VecDeque;
use std::fmt;

/// Lines skipped before skipped positions start counting toward the bounds
const BOUNDS_WARMUP_LINES: usize = 100;
/// First-layer speed in mm/s when none is configured
const DEFAULT_RECOVER_SPEED: f64 = 10.0;

/// Recovery progress
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecoveryState {
    /// Reset modes and reheat
    RemoveHeating,
    /// Lift off the part
    Raising,
    /// Home the axes
    Homing,
    /// Fast-forward through the printed part
    SkippingGCode,
    /// Prime away from the part and move to the resume point
    PrimingAndMovingToStart,
    /// Print the rest of the current layer slowly
    PrintingSlow,
    /// Plain printing
    PrintingToEnd,
}

impl fmt::Display for RecoveryState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RemoveHeating => "removing heating",
            Self::Raising => "raising",
            Self::Homing => "homing",
            Self::SkippingGCode => "skipping printed G-code",
            Self::PrimingAndMovingToStart => "priming",
            Self::PrintingSlow => "printing slowly",
            Self::PrintingToEnd => "printing",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Copy)]
struct Bounds {
    min_x: f64,
    min_y: f64,
    max_y: f64,
}

impl Bounds {
    fn include(bounds: &mut Option<Bounds>, x: f64, y: f64) {
        match bounds {
            Some(b) => {
                b.min_x = b.min_x.min(x);
                b.min_y = b.min_y.min(y);
                b.max_y = b.max_y.max(y);
            }
            None => {
                *bounds = Some(Bounds {
                    min_x: x,
                    min_y: y,
                    max_y: y,
                })
            }
        }
    }
}

/// Source that resumes a job from a completion percentage
#[derive(Debug)]
pub struct RecoverySource {
    job: JobSource,
    percent_done: f64,
    state: RecoveryState,
    queued: VecDeque<String>,
    tracker: PositionTracker,
    bounds: Option<Bounds>,
}

impl RecoverySource {
    /// Recover `job` from `percent_done`
    pub fn new(job: JobSource, percent_done: f64) -> Self {
        Self {
            job,
            percent_done,
            state: RecoveryState::RemoveHeating,
            queued: VecDeque::new(),
            tracker: PositionTracker::new(),
            bounds: None,
        }
    }

    /// Current recovery state
    pub fn state(&self) -> RecoveryState {
        self.state
    }

    fn enter(&mut self, state: RecoveryState) {
        tracing::info!("Print recovery: {}", state);
        self.state = state;
    }

    fn queue(&mut self, line: impl Into<String>) {
        self.queued.push_back(line.into());
    }

    fn remove_heating(&mut self, settings: &dyn SettingsSource) {
        for line in ["G21", "M107", "T0", "G90", "G92 E0", "M82"] {
            self.queue(line);
        }
        let heated_bed = settings.get_bool(keys::HAS_HEATED_BED);
        let bed = settings.get_f64_or(keys::BED_TEMPERATURE, 0.0);
        if heated_bed && bed > 0.0 {
            self.queue(format!("M140 S{}", gcode::format_number(bed)));
        }
        let hotend = settings.get_f64_or(keys::EXTRUDER_TEMPERATURE, 0.0);
        self.queue(format!("M109 S{}", gcode::format_number(hotend)));
        if heated_bed && bed > 0.0 {
            self.queue(format!("M190 S{}", gcode::format_number(bed)));
        }
    }

    fn raise(&mut self, settings: &dyn SettingsSource) {
        let z_speed = settings.get_f64_or(keys::MANUAL_SPEED_Z, 600.0);
        self.queue("M114");
        self.queue("G91");
        self.queue(format!("G1 Z10 F{}", gcode::format_number(z_speed)));
        self.queue("G90");
    }

    fn home(&mut self, settings: &dyn SettingsSource) {
        if settings.get_bool(keys::Z_HOMES_TO_MAX) {
            self.queue("G28");
        } else {
            let xy_speed = settings.get_f64_or(keys::MANUAL_SPEED_XY, 3000.0);
            let (x, y) = recover_xy(settings);
            self.queue("G28 X0");
            self.queue("G28 Y0");
            self.queue(format!(
                "G1 X{} Y{} F{}",
                gcode::format_number(x),
                gcode::format_number(y),
                gcode::format_number(xy_speed)
            ));
            self.queue("G28 Z0");
        }
    }

    /// Read through the printed part, returning any state-setting line found
    fn skip_printed(&mut self) -> Option<String> {
        let mut skipped = 0;
        while self.job.progress().percent() < self.percent_done {
            let Some(line) = self.job.read_line() else {
                break;
            };
            skipped += 1;
            let code = gcode::strip_comment(&line).to_string();
            self.tracker.apply(&code);
            if skipped > BOUNDS_WARMUP_LINES {
                let position = self.tracker.position();
                Bounds::include(&mut self.bounds, position.x, position.y);
            }
            let command = gcode::command(&code);
            let keeps_state = matches!(
                command.as_str(),
                "M104" | "M109" | "M140" | "M190" | "M106" | "M107" | "G92"
            ) || (command.starts_with('T') && command.len() > 1);
            if keeps_state {
                return Some(code);
            }
        }
        None
    }

    fn prime(&mut self, settings: &dyn SettingsSource) {
        let position = self.tracker.position();
        Bounds::include(&mut self.bounds, position.x, position.y);
        let xy_speed = settings.get_f64_or(keys::MANUAL_SPEED_XY, 3000.0);
        let z_speed = settings.get_f64_or(keys::MANUAL_SPEED_Z, 600.0);
        let e_speed = settings.get_f64_or(keys::MANUAL_SPEED_E, 300.0);

        if !settings.get_bool(keys::Z_HOMES_TO_MAX) {
            let (x, y) = recover_xy(settings);
            let line = gcode::movement_line(&Move::new(x, y, position.z).with_feed_rate(z_speed));
            self.queue(line);
        }

        if let Some(bounds) = self.bounds {
            let nozzle = settings.get_f64_or(keys::NOZZLE_DIAMETER, 0.4);
            let outside = Move::new(
                bounds.min_x - nozzle * 2.0,
                bounds.min_y + (bounds.max_y - bounds.min_y) / 2.0,
                position.z,
            )
            .with_feed_rate(xy_speed);
            self.queue(gcode::movement_line(&outside));
        }
        self.queue(format!("G1 E10 F{}", gcode::format_number(e_speed)));
        self.queue("G1 E9");
        self.queue(gcode::movement_line(
            &Move::new(position.x, position.y, position.z).with_feed_rate(xy_speed),
        ));
        self.queue(format!("G92 E{}", gcode::format_number(position.e)));
    }

    fn print_slow(&mut self, settings: &dyn SettingsSource) -> Option<String> {
        let line = self.job.read_line()?;
        if gcode::is_layer_change(&line) {
            self.enter(RecoveryState::PrintingToEnd);
            return Some(line);
        }
        if gcode::is_move(&line) {
            let speed = match settings.get_f64_or(keys::RECOVER_FIRST_LAYER_SPEED, 0.0) {
                s if s > 0.0 => s * 60.0,
                _ => DEFAULT_RECOVER_SPEED * 60.0,
            };
            let code = gcode::strip_comment(&line);
            return Some(gcode::replace_word(code, 'F', speed));
        }
        Some(line)
    }
}

fn recover_xy(settings: &dyn SettingsSource) -> (f64, f64) {
    let xy = settings.get_f64_list(keys::RECOVER_POSITION_BEFORE_Z_HOME);
    (
        xy.first().copied().unwrap_or(0.0),
        xy.get(1).copied().unwrap_or(0.0),
    )
}

impl LineSource for RecoverySource {
    fn next_line(&mut self, ctx: &mut StageContext<'_>) -> Option<String> {
        ctx.flags.recovering = self.state != RecoveryState::PrintingToEnd;
        if let Some(line) = self.queued.pop_front() {
            return Some(line);
        }

        match self.state {
            RecoveryState::RemoveHeating => {
                self.remove_heating(ctx.settings);
                self.enter(RecoveryState::Raising);
                Some(String::new())
            }
            RecoveryState::Raising => {
                ctx.flags.leveling_allowed = false;
                self.raise(ctx.settings);
                self.enter(RecoveryState::Homing);
                Some(String::new())
            }
            RecoveryState::Homing => {
                self.home(ctx.settings);
                self.enter(RecoveryState::SkippingGCode);
                Some(String::new())
            }
            RecoveryState::SkippingGCode => {
                ctx.flags.leveling_allowed = true;
                if let Some(line) = self.skip_printed() {
                    return Some(line);
                }
                self.enter(RecoveryState::PrimingAndMovingToStart);
                Some(String::new())
            }
            RecoveryState::PrimingAndMovingToStart => {
                self.prime(ctx.settings);
                self.enter(RecoveryState::PrintingSlow);
                Some(String::new())
            }
            RecoveryState::PrintingSlow => {
                let line = self.print_slow(ctx.settings);
                ctx.flags.recovering = self.state != RecoveryState::PrintingToEnd;
                line
            }
            RecoveryState::PrintingToEnd => self.job.read_line(),
        }
    }

    fn is_finished(&self) -> bool {
        self.queued.is_empty()
            && matches!(
                self.state,
                RecoveryState::PrintingSlow | RecoveryState::PrintingToEnd
            )
            && self.job.is_finished()
    }

    fn set_position(&mut self, position: &Move) {
        if self.state != RecoveryState::SkippingGCode {
            self.tracker.set_position(*position);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{GcodeJob, Pipeline};
    use printlink_core::TemperatureState;
    use std::collections::HashMap;
    use std::time::Instant;

    fn settings(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect()
    }

    fn job() -> GcodeJob {
        GcodeJob::from_lines(
            "part",
            [
                "M104 S200",
                "G28",
                ";LAYER:0",
                "G1 Z0.2 F600",
                "G1 X10 Y10 E1",
                "M106 S255",
                "G1 X20 Y10 E2",
                ";LAYER:1",
                "G1 Z0.4",
                "G1 X10 Y20 E3 F1800",
                ";LAYER:2",
                "G1 X30 Y30 E4",
            ],
        )
    }

    #[test]
    fn test_recovery_sequence() {
        let config = settings(&[
            (keys::EXTRUDER_TEMPERATURE, "210"),
            (keys::HAS_HEATED_BED, "0"),
            (keys::RECOVER_POSITION_BEFORE_Z_HOME, "5,5"),
            (keys::RECOVER_FIRST_LAYER_SPEED, "15"),
        ]);
        let source = RecoverySource::new(JobSource::new(job()), 60.0);
        let mut pipeline = Pipeline::new(Box::new(source), Vec::new());
        let temps = TemperatureState::new();

        let mut out = Vec::new();
        while let Some(line) = pipeline.pull(&config, &temps, Instant::now()) {
            out.push(line);
        }

        let expected_start = [
            "G21", "M107", "T0", "G90", "G92 E0", "M82", "M109 S210", "M114", "G91", "G1 Z10 F600",
            "G90", "G28 X0", "G28 Y0", "G1 X5 Y5 F3000", "G28 Z0", "M104 S200", "M106 S255",
        ];
        assert_eq!(&out[..expected_start.len()], expected_start);

        let rest = &out[expected_start.len()..];
        assert_eq!(rest[0], "G1 X5 Y5 Z0.2 F600");
        assert_eq!(rest[1], "G1 X19.2 Y10 Z0.2 F3000");
        assert!(rest.contains(&"G1 E10 F300".to_string()));
        assert!(rest.contains(&"G92 E2".to_string()));
        assert!(rest.contains(&"G1 Z0.4 F900".to_string()));
        assert!(rest.contains(&"G1 X10 Y20 E3 F900".to_string()));
        assert_eq!(out.last().map(String::as_str), Some("G1 X30 Y30 E4"));
        assert!(pipeline.is_drained());
        assert!(!pipeline.flags().recovering);
    }

    #[test]
    fn test_recovery_blocks_leveling_until_homed() {
        let config = settings(&[(keys::Z_HOMES_TO_MAX, "1")]);
        let source = RecoverySource::new(JobSource::new(job()), 0.0);
        let mut pipeline = Pipeline::new(Box::new(source), Vec::new());
        let temps = TemperatureState::new();
        let now = Instant::now();

        while let Some(line) = pipeline.pull(&config, &temps, now) {
            if line == "G28" {
                assert!(!pipeline.flags().leveling_allowed);
                break;
            }
        }
        while pipeline.pull(&config, &temps, now).is_some() {}
        assert!(pipeline.flags().leveling_allowed);
    }
}
