//! Command, macro and temperature stages

use super::{PipelineStage, StageContext, Upstream};
use crate::protocol::gcode;
use parking_lot::Mutex;
use printlink_core::{keys, SettingsSource, TemperatureState};
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Out-of-band commands shared between the link and the pipeline
pub type CommandQueue = Arc<Mutex<VecDeque<String>>>;

/// Create an empty command queue
pub fn new_command_queue() -> CommandQueue {
    Arc::new(Mutex::new(VecDeque::new()))
}

/// Interleaves queued commands ahead of the stream
#[derive(Debug)]
pub struct QueuedCommandsStage {
    queue: CommandQueue,
}

impl QueuedCommandsStage {
    /// Read from a shared queue
    pub fn new(queue: CommandQueue) -> Self {
        Self { queue }
    }
}

impl PipelineStage for QueuedCommandsStage {
    fn name(&self) -> &'static str {
        "queued_commands"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        let queued = self.queue.lock().pop_front();
        match queued {
            Some(line) => Some(line),
            None => upstream.next_line(ctx),
        }
    }

    fn is_idle(&self) -> bool {
        self.queue.lock().is_empty()
    }
}

/// Replace `[setting_key]` placeholders with settings values.
///
/// Unknown keys are left as written.
pub fn expand_placeholders(line: &str, settings: &dyn SettingsSource) -> String {
    let mut out = String::with_capacity(line.len());
    let mut rest = line;
    while let Some(open) = rest.find('[') {
        let Some(close) = rest[open..].find(']').map(|c| open + c) else {
            break;
        };
        out.push_str(&rest[..open]);
        let key = &rest[open + 1..close];
        match settings.get(key) {
            Some(value) => out.push_str(&value),
            None => out.push_str(&rest[open..=close]),
        }
        rest = &rest[close + 1..];
    }
    out.push_str(rest);
    out
}

/// Expands settings placeholders and named macros
#[derive(Debug, Default)]
pub struct MacroStage {
    pending: VecDeque<String>,
}

impl MacroStage {
    /// Create a stage with nothing pending
    pub fn new() -> Self {
        Self::default()
    }

    fn macro_body(name: &str, settings: &dyn SettingsSource) -> Option<String> {
        settings
            .get(&format!("{}{}", keys::MACRO_PREFIX, name))
            .or_else(|| (name == "home").then(|| "G28".to_string()))
    }
}

impl PipelineStage for MacroStage {
    fn name(&self) -> &'static str {
        "macros"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        if let Some(line) = self.pending.pop_front() {
            return Some(line);
        }
        let line = upstream.next_line(ctx)?;
        if !line.contains('[') && !line.trim_start().starts_with('@') {
            return Some(line);
        }

        let line = expand_placeholders(&line, ctx.settings);
        let Some(token) = gcode::strip_comment(&line).split_whitespace().next() else {
            return Some(line);
        };
        let is_named = token.starts_with('@');
        let name = token.trim_start_matches('@').to_ascii_lowercase();
        match Self::macro_body(&name, ctx.settings) {
            Some(body) => {
                tracing::debug!("Expanding macro {}", name);
                self.pending.extend(
                    gcode::split_lines(&body)
                        .iter()
                        .map(|l| expand_placeholders(l, ctx.settings)),
                );
                Some(self.pending.pop_front().unwrap_or_default())
            }
            None if is_named => {
                tracing::warn!("Unknown macro {}, dropping line", token);
                Some(String::new())
            }
            None => Some(line),
        }
    }

    fn is_idle(&self) -> bool {
        self.pending.is_empty()
    }
}

const HOTEND_TOLERANCE: f64 = 1.0;
const BED_TOLERANCE: f64 = 3.0;

#[derive(Debug, Clone, Copy, PartialEq)]
enum Heater {
    Hotend { index: usize, target: f64 },
    Bed { target: f64 },
}

impl Heater {
    fn ready(&self, temperatures: &TemperatureState) -> bool {
        match *self {
            Heater::Hotend { index, target } => {
                (temperatures.hotend_actual(index) - target).abs() <= HOTEND_TOLERANCE
            }
            Heater::Bed { target } => temperatures.bed_actual() >= target - BED_TOLERANCE,
        }
    }
}

/// Turns blocking heat commands into non-blocking ones plus a hold
#[derive(Debug, Default)]
pub struct TemperatureWaitStage {
    waiting_for: Option<Heater>,
    held_line: Option<String>,
    heating_before_extrusion: Option<Heater>,
    active_tool: usize,
}

impl TemperatureWaitStage {
    /// Create a stage with no holds
    pub fn new() -> Self {
        Self::default()
    }

    fn hotend_index(&self, line: &str) -> usize {
        gcode::word_value(line, 'T')
            .map(|t| t.max(0.0) as usize)
            .unwrap_or(self.active_tool)
    }

    fn target(line: &str) -> f64 {
        gcode::word_value(line, 'S')
            .or_else(|| gcode::word_value(line, 'R'))
            .unwrap_or(0.0)
    }

    /// Same line with its command word swapped
    fn with_command(line: &str, command: &str) -> String {
        let trimmed = line.trim_start();
        let end = trimmed
            .find(|c: char| c.is_whitespace() || c == ';')
            .unwrap_or(trimmed.len());
        format!("{}{}", command, &trimmed[end..])
    }
}

impl PipelineStage for TemperatureWaitStage {
    fn name(&self) -> &'static str {
        "temperature_wait"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        if let Some(heater) = self.waiting_for {
            if !heater.ready(ctx.temperatures) {
                return None;
            }
            tracing::debug!("Heater ready: {:?}", heater);
            self.waiting_for = None;
            if let Some(line) = self.held_line.take() {
                return Some(line);
            }
        }

        let line = upstream.next_line(ctx)?;
        let command = gcode::command(&line);
        match command.as_str() {
            "M109" => {
                let index = self.hotend_index(&line);
                let target = Self::target(&line);
                if target > 0.0 {
                    self.waiting_for = Some(Heater::Hotend { index, target });
                }
                self.heating_before_extrusion = None;
                Some(Self::with_command(&line, "M104"))
            }
            "M190" => {
                let target = Self::target(&line);
                if ctx.temperatures.bed_actual() < target - BED_TOLERANCE {
                    self.waiting_for = Some(Heater::Bed { target });
                }
                Some(Self::with_command(&line, "M140"))
            }
            "M104" => {
                let target = Self::target(&line);
                self.heating_before_extrusion = (target > 0.0).then(|| Heater::Hotend {
                    index: self.hotend_index(&line),
                    target,
                });
                Some(line)
            }
            "G0" | "G1" | "G00" | "G01" if gcode::has_word(&line, 'E') => {
                match self.heating_before_extrusion.take() {
                    Some(heater) if !heater.ready(ctx.temperatures) => {
                        tracing::debug!("Holding first extrusion until heater is ready");
                        self.waiting_for = Some(heater);
                        self.held_line = Some(line);
                        None
                    }
                    _ => Some(line),
                }
            }
            tool if tool.len() > 1 && tool.starts_with('T') => {
                if let Ok(index) = tool[1..].parse::<usize>() {
                    self.active_tool = index;
                }
                Some(line)
            }
            _ => Some(line),
        }
    }

    fn is_idle(&self) -> bool {
        self.waiting_for.is_none() && self.held_line.is_none()
    }
}

const DEFAULT_POLL_INTERVAL_MS: u32 = 1000;

/// Periodically injects a temperature report request
#[derive(Debug, Default)]
pub struct TemperatureRequestStage {
    last_request: Option<Instant>,
}

impl TemperatureRequestStage {
    /// Create a stage that first asks one interval from now
    pub fn new() -> Self {
        Self::default()
    }
}

impl PipelineStage for TemperatureRequestStage {
    fn name(&self) -> &'static str {
        "temperature_request"
    }

    fn next_line(&mut self, upstream: &mut dyn Upstream, ctx: &mut StageContext<'_>) -> Option<String> {
        let interval_ms = ctx
            .settings
            .get_u32_or(keys::TEMPERATURE_POLL_INTERVAL_MS, DEFAULT_POLL_INTERVAL_MS);
        let last = *self.last_request.get_or_insert(ctx.now);
        if interval_ms > 0
            && ctx.now.saturating_duration_since(last) >= Duration::from_millis(u64::from(interval_ms))
        {
            self.last_request = Some(ctx.now);
            return Some("M105".to_string());
        }

        let line = upstream.next_line(ctx)?;
        if gcode::is_command(&line, "M105") {
            self.last_request = Some(ctx.now);
        }
        Some(line)
    }
}
