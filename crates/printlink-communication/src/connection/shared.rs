//! Engine state behind the connection lock
//!
//! `LinkCore` is the one owned mutable struct the read loop, the connect task
//! and the public API share. Everything that reads then writes link state
//! (position, temperatures, the resend archive, the pipeline, flow control)
//! does so through it while holding the lock.

use crate::callbacks::{CallbackRegistry, FoundLine, MatchRule};
use crate::pipeline::regex_rules::RuleCache;
use crate::pipeline::{
    CommandQueue, IdleSource, JobProgress, LevelingSolution, LineSource, Pipeline, StageCommand,
    StageSignal,
};
use crate::protocol::{codec, gcode, responses, AckTracker, PositionTracker, ResendArchive};
use crate::transport::Transport;
use printlink_core::{
    keys, FirmwareIdentity, LinkState, Move, Notification, NotificationDispatcher, PrintTask,
    SettingsSource, TemperatureState,
};
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Substrings the firmware prints when the hardware is in trouble
pub const HARDWARE_FAULTS: &[&str] = &[
    "T:inf",
    "B:inf",
    "MINTEMP",
    "MAXTEMP",
    "M999",
    "Thermal Runaway",
    "Heating failed",
    "Heater decoupled",
    "cold extrusion prevented",
    "Extruder switched off",
    "ZProbe not triggered",
    "Bot is Shutdown due to Overheat",
    "Printer halted",
    "temp sensor defect",
    "Homing cycle failed",
    "dry run mode",
];

/// Firmware complaints about framing, answered by a resend request
const PROTOCOL_COMPLAINTS: &[&str] = &[
    "checksum",
    "Line Number",
    "No Line Number",
    "Last Line",
    "No Checksum",
];

const MEDIA_POLL_INTERVAL: Duration = Duration::from_secs(2);

/// Shared engine state
pub(crate) struct LinkCore {
    pub(crate) state: LinkState,
    pub(crate) settings: Arc<dyn SettingsSource>,
    pub(crate) dispatcher: NotificationDispatcher,
    pub(crate) transport: Option<Box<dyn Transport>>,
    pub(crate) temperatures: TemperatureState,
    pub(crate) destination: PositionTracker,
    pub(crate) last_reported_position: Move,
    pub(crate) archive: ResendArchive,
    pub(crate) ack: AckTracker,
    pub(crate) last_sent: Option<String>,
    pub(crate) pending_reset: bool,
    pub(crate) pipeline: Pipeline,
    pub(crate) queue: CommandQueue,
    pub(crate) leveling: Arc<dyn LevelingSolution>,
    pub(crate) callbacks: CallbackRegistry<LinkCore>,
    pub(crate) read_rules: RuleCache,
    pub(crate) firmware: FirmwareIdentity,
    pub(crate) latched_faults: HashSet<String>,
    pub(crate) print_task: Option<PrintTask>,
    pub(crate) progress: Option<Arc<JobProgress>>,
    pub(crate) paused_from: Option<LinkState>,
    pub(crate) active_tool: usize,
    pub(crate) fan_speed: f64,
    pub(crate) aux_power: bool,
    pub(crate) media_progress: Option<(u64, u64)>,
    pub(crate) last_media_poll: Option<Instant>,
    pub(crate) heard_from_printer: bool,
    pub(crate) handshake_failure: Option<String>,
}

impl LinkCore {
    pub(crate) fn new(
        settings: Arc<dyn SettingsSource>,
        dispatcher: NotificationDispatcher,
        queue: CommandQueue,
        leveling: Arc<dyn LevelingSolution>,
    ) -> Self {
        let pipeline = Pipeline::standard(Box::new(IdleSource), queue.clone(), leveling.clone());
        let mut core = Self {
            state: LinkState::Disconnected,
            settings,
            dispatcher,
            transport: None,
            temperatures: TemperatureState::new(),
            destination: PositionTracker::new(),
            last_reported_position: Move::default(),
            archive: ResendArchive::default(),
            ack: AckTracker::default(),
            last_sent: None,
            pending_reset: false,
            pipeline,
            queue,
            leveling,
            callbacks: CallbackRegistry::new(),
            read_rules: RuleCache::new(),
            firmware: FirmwareIdentity::default(),
            latched_faults: HashSet::new(),
            print_task: None,
            progress: None,
            paused_from: None,
            active_tool: 0,
            fan_speed: 0.0,
            aux_power: false,
            media_progress: None,
            last_media_poll: None,
            heard_from_printer: false,
            handshake_failure: None,
        };
        register_handlers(&mut core.callbacks);
        core
    }

    pub(crate) fn publish(&self, notification: Notification) {
        self.dispatcher.publish(notification);
    }

    pub(crate) fn checksums_enabled(&self) -> bool {
        self.settings.get_bool(keys::SEND_WITH_CHECKSUM)
    }

    pub(crate) fn extruder_count(&self) -> usize {
        let configured = self.settings.get_u32_or(keys::EXTRUDER_COUNT, 1);
        let reported = self.firmware.extruder_count.unwrap_or(0);
        configured.max(reported).max(1) as usize
    }

    /// Take ownership of a freshly opened transport and forget the last session
    pub(crate) fn attach(&mut self, transport: Box<dyn Transport>) {
        tracing::debug!("Attached transport {}", transport.name());
        self.transport = Some(transport);
        self.archive.reset(1);
        self.ack.reset();
        self.last_sent = None;
        self.pending_reset = self.checksums_enabled();
        self.heard_from_printer = false;
        self.handshake_failure = None;
        self.firmware = FirmwareIdentity::default();
        self.media_progress = None;
        self.load_idle_pipeline();
    }

    pub(crate) fn close_transport(&mut self) {
        if let Some(mut transport) = self.transport.take() {
            if let Err(e) = transport.close() {
                tracing::debug!("Closing {} failed: {}", transport.name(), e);
            }
        }
    }

    pub(crate) fn transport_is_open(&self) -> bool {
        self.transport.as_ref().is_some_and(|t| t.is_open())
    }

    pub(crate) fn port_name(&self) -> String {
        self.transport
            .as_ref()
            .map(|t| t.name())
            .unwrap_or_else(|| self.settings.get_string(keys::PORT_NAME))
    }

    /// Write text followed by a newline, bypassing framing and flow control
    pub(crate) fn write_raw(&mut self, text: &str) -> io::Result<()> {
        let transport = self
            .transport
            .as_mut()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotConnected, "no transport"))?;
        transport.write_all(format!("{}\n", text).as_bytes())
    }

    pub(crate) fn read_transport(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self.transport.as_mut() {
            Some(transport) => transport.read(buf),
            None => Err(io::Error::new(io::ErrorKind::NotConnected, "no transport")),
        }
    }

    pub(crate) fn load_idle_pipeline(&mut self) {
        self.load_pipeline(Box::new(IdleSource));
        self.progress = None;
    }

    pub(crate) fn load_pipeline(&mut self, source: Box<dyn LineSource>) {
        self.pipeline = Pipeline::standard(source, self.queue.clone(), self.leveling.clone());
    }

    pub(crate) fn control_pipeline(&mut self, command: StageCommand, now: Instant) -> bool {
        let settings = Arc::clone(&self.settings);
        self.pipeline
            .control(command, settings.as_ref(), &self.temperatures, now)
    }

    /// Frame, mirror and send one line.
    ///
    /// Returns the exact text written. Write callbacks see the unframed line.
    pub(crate) fn send_line(&mut self, line: &str, now: Instant) -> io::Result<String> {
        let wire = if self.checksums_enabled() {
            self.archive.record(line).framed
        } else {
            line.to_string()
        };
        self.write_raw(&wire)?;
        self.mirror_written(line);

        if gcode::is_command(line, "M114") {
            self.ack.start_position_wait(now);
        }
        self.ack.start(line, now);
        self.last_sent = Some(wire.clone());
        self.publish(Notification::LineWritten(wire.clone()));
        Ok(wire)
    }

    /// Send a line unframed without waiting for its acknowledgment.
    ///
    /// Used while the device prints from its own media and ignores the stream.
    pub(crate) fn send_unacknowledged(&mut self, line: &str) -> io::Result<()> {
        self.write_raw(line)?;
        self.mirror_written(line);
        self.publish(Notification::LineWritten(line.to_string()));
        Ok(())
    }

    fn mirror_written(&mut self, line: &str) {
        let mut found = FoundLine::new(line);
        for handler in self.callbacks.write_handlers(line) {
            handler(self, &mut found);
        }
    }

    /// Write opportunity: resend, replay or pull the next pipeline line
    pub(crate) fn try_write_next(&mut self, now: Instant) -> io::Result<()> {
        if !accepts_pipeline_writes(self.state) {
            return Ok(());
        }

        if self.ack.timed_out(now) {
            if let Some(last) = self.last_sent.clone() {
                tracing::warn!(
                    "No acknowledgment for '{}', sending it again",
                    self.ack.waiting_for().unwrap_or_default()
                );
                self.write_raw(&last)?;
                self.publish(Notification::LineWritten(last));
            }
            self.ack.record_timeout(now);
            return Ok(());
        }
        if self.ack.is_waiting() || self.ack.awaiting_position(now) {
            return Ok(());
        }

        if self.pending_reset {
            self.pending_reset = false;
            let reset = codec::reset_line(1);
            tracing::debug!("Re-basing line numbers with {}", reset);
            self.send_line(&reset, now)?;
            return Ok(());
        }

        if self.archive.is_replaying() {
            if let Some(pending) = self.archive.next_replay() {
                tracing::debug!("Replaying line {}", pending.seq);
                self.write_raw(&pending.framed)?;
                self.ack.start(&pending.line, now);
                self.last_sent = Some(pending.framed.clone());
                self.publish(Notification::LineWritten(pending.framed));
                return Ok(());
            }
        }

        let settings = Arc::clone(&self.settings);
        let pulled = self
            .pipeline
            .pull(settings.as_ref(), &self.temperatures, now);
        self.handle_signals();

        match pulled.as_deref().and_then(codec::prepare_line) {
            Some(line) => {
                self.send_line(&line, now)?;
                self.update_progress();
            }
            None => self.check_finished(),
        }
        Ok(())
    }

    /// Poll status while the device prints from its own media
    pub(crate) fn poll_removable_media(&mut self, now: Instant) -> io::Result<()> {
        if self.state != LinkState::PrintingFromRemovableMedia {
            return Ok(());
        }
        let due = self
            .last_media_poll
            .is_none_or(|last| now.saturating_duration_since(last) >= MEDIA_POLL_INTERVAL);
        if due {
            self.last_media_poll = Some(now);
            self.write_raw("M105")?;
            self.write_raw("M27")?;
        }
        Ok(())
    }

    fn handle_signals(&mut self) {
        for signal in self.pipeline.take_signals() {
            match signal {
                StageSignal::PauseReached {
                    reason,
                    layer,
                    position,
                } => {
                    tracing::info!("Print paused ({}) at {}", reason, position);
                    if self.state == LinkState::Printing {
                        self.set_state(LinkState::Paused);
                    }
                    self.publish(Notification::PrintPaused { reason, layer });
                }
            }
        }
    }

    fn update_progress(&mut self) {
        let Some(progress) = self.progress.as_ref() else {
            return;
        };
        let percent = progress.percent();
        if let Some(task) = self.print_task.as_mut() {
            task.set_progress(percent);
        }
    }

    fn check_finished(&mut self) {
        if self.state == LinkState::Printing
            && self.pipeline.is_drained()
            && !self.ack.is_waiting()
            && !self.archive.is_replaying()
        {
            self.set_state(LinkState::FinishedPrint);
            self.load_idle_pipeline();
        }
    }

    /// Run one received line through the read rules and the callbacks
    pub(crate) fn process_line(&mut self, raw: &str) {
        self.publish(Notification::LineRead(raw.to_string()));

        let config = self.settings.get_string(keys::READ_REGEX);
        let lines = self.read_rules.rules(&config).apply(raw);
        for line in lines {
            let mut found = FoundLine::new(line);
            for handler in self.callbacks.read_handlers(&found.line) {
                handler(self, &mut found);
            }
            if !found.consumed {
                self.publish(Notification::LineReceived(found.line));
            }
        }
    }

    pub(crate) fn clear_errors(&mut self) {
        self.latched_faults.clear();
    }

    /// Lines that turn every heater off
    pub(crate) fn heater_off_lines(&self) -> Vec<String> {
        let mut lines: Vec<String> = (0..self.extruder_count())
            .map(|index| format!("M104 T{} S0", index))
            .collect();
        if self.settings.get_bool(keys::HAS_HEATED_BED) {
            lines.push("M140 S0".to_string());
        }
        lines
    }

    fn report_fault(&mut self, key: &str, line: &str) {
        if self.latched_faults.insert(key.to_string()) {
            tracing::error!("Printer reported a hardware fault: {}", line);
            self.publish(Notification::ErrorReported(line.to_string()));
        }
    }
}

fn accepts_pipeline_writes(state: LinkState) -> bool {
    matches!(
        state,
        LinkState::Connected
            | LinkState::PreparingToPrint
            | LinkState::Printing
            | LinkState::Paused
            | LinkState::FinishedPrint
    )
}

fn register_handlers(callbacks: &mut CallbackRegistry<LinkCore>) {
    use MatchRule::{ReadContains, ReadPrefix, WritePrefix};

    callbacks.register_all(ReadPrefix, &["ok", "wait"], |core, _| {
        core.heard_from_printer = true;
        core.ack.acknowledge();
    });
    callbacks.register(ReadPrefix, "start", |core, _| {
        core.heard_from_printer = true;
        core.ack.acknowledge();
        if core.state.is_connected() {
            tracing::info!("Printer restarted, line numbers restart at 1");
            core.archive.reset(1);
            core.last_sent = None;
        }
    });

    callbacks.register_all(ReadPrefix, &["T:", "B:"], read_temperatures);
    callbacks.register_all(ReadContains, &["T0:", "T:"], read_temperatures);

    callbacks.register_all(ReadPrefix, &["C:", "X:", "ok C:", "ok X:"], |core, found| {
        let Some(position) = responses::parse_position(&found.line) else {
            return;
        };
        core.last_reported_position = position;
        core.destination.set_position(position);
        core.pipeline.set_position(&position);
        core.ack.position_received();
        core.publish(Notification::PositionRead(position));
        core.publish(Notification::DestinationChanged(position));
    });

    callbacks.register_all(ReadPrefix, &["rs ", "RS:"], read_resend);
    callbacks.register(ReadContains, "Resend:", read_resend);

    callbacks.register(ReadContains, "FIRMWARE_NAME:", |core, found| {
        if responses::parse_firmware(&found.line, &mut core.firmware) {
            tracing::info!(
                "Firmware identified as {} {}",
                core.firmware.name,
                core.firmware.version.as_deref().unwrap_or("")
            );
            core.publish(Notification::FirmwareIdentified(core.firmware.clone()));
        }
    });

    callbacks.register(ReadPrefix, "SD printing byte", |core, found| {
        if let Some((printed, total)) = responses::parse_media_progress(&found.line) {
            core.media_progress = Some((printed, total));
            if total > 0 {
                if let Some(task) = core.print_task.as_mut() {
                    task.set_progress(printed as f64 * 100.0 / total as f64);
                }
            }
            core.publish(Notification::RemovableMediaProgress { printed, total });
        }
    });
    callbacks.register(ReadPrefix, "Done printing file", |core, _| {
        if core.state == LinkState::PrintingFromRemovableMedia {
            core.set_state(LinkState::FinishedPrint);
        }
    });
    callbacks.register(ReadPrefix, "Done saving file", |_, found| {
        tracing::info!("{}", found.line);
    });

    callbacks.register(ReadPrefix, "Error:", |core, found| {
        let line = found.line.clone();
        if HARDWARE_FAULTS.iter().any(|marker| line.contains(marker)) {
            return;
        }
        if PROTOCOL_COMPLAINTS.iter().any(|marker| line.contains(marker)) {
            tracing::warn!("Printer rejected a line: {}", line);
            return;
        }
        core.report_fault(&line, &line);
    });
    for marker in HARDWARE_FAULTS {
        callbacks.register(ReadContains, *marker, move |core, found| {
            let line = found.line.clone();
            core.report_fault(marker, &line);
        });
    }

    callbacks.register_all(WritePrefix, &["M104", "M109"], |core, found| {
        if !(gcode::is_command(&found.line, "M104") || gcode::is_command(&found.line, "M109")) {
            return;
        }
        let Some(value) = gcode::word_value(&found.line, 'S') else {
            return;
        };
        let index = gcode::word_value(&found.line, 'T')
            .map(|t| t as usize)
            .unwrap_or(core.active_tool);
        if core.temperatures.set_hotend_target(index, value) {
            core.publish(Notification::HotendTargetSet { index, value });
        }
    });
    callbacks.register_all(WritePrefix, &["M140", "M190"], |core, found| {
        let Some(value) = gcode::word_value(&found.line, 'S') else {
            return;
        };
        if core.temperatures.set_bed_target(value) {
            core.publish(Notification::BedTargetSet(value));
        }
    });
    callbacks.register(WritePrefix, "M106", |core, found| {
        if gcode::is_command(&found.line, "M106") {
            let speed = gcode::word_value(&found.line, 'S').unwrap_or(255.0);
            core.fan_speed = speed;
            core.publish(Notification::FanSpeedSet(speed));
        }
    });
    callbacks.register(WritePrefix, "M107", |core, found| {
        if gcode::is_command(&found.line, "M107") {
            core.fan_speed = 0.0;
            core.publish(Notification::FanSpeedSet(0.0));
        }
    });
    callbacks.register_all(WritePrefix, &["M80", "M81"], |core, found| {
        let on = gcode::is_command(&found.line, "M80");
        if on || gcode::is_command(&found.line, "M81") {
            core.aux_power = on;
            core.publish(Notification::AuxPowerChanged(on));
        }
    });
    callbacks.register_all(
        WritePrefix,
        &["G0", "G1", "G90", "G91", "G92", "M82", "M83"],
        |core, found| {
            let before = core.destination.position();
            core.destination.apply(&found.line);
            let after = core.destination.position();
            if after != before {
                core.publish(Notification::DestinationChanged(after));
            }
        },
    );
    callbacks.register(WritePrefix, "T", |core, found| {
        let command = gcode::command(&found.line);
        if let Some(tool) = command.strip_prefix('T').and_then(|n| n.parse::<usize>().ok()) {
            core.active_tool = tool;
        }
    });
    callbacks.register_all(WritePrefix, &["G28", "G29", "G30"], |core, found| {
        let line = found.line.clone();
        if ["G28", "G29", "G30"]
            .iter()
            .any(|word| gcode::is_command(&line, word))
        {
            core.destination.apply(&line);
            core.queue.lock().push_front("M114".to_string());
        }
    });
}

fn read_temperatures(core: &mut LinkCore, found: &mut FoundLine) {
    let report = responses::parse_temperatures(&found.line);
    if report.is_empty() {
        return;
    }
    core.heard_from_printer = true;
    for (index, value) in report.hotends {
        if core.temperatures.set_hotend_actual(index, value) {
            core.publish(Notification::HotendTemperatureRead { index, value });
        }
    }
    if let Some(value) = report.bed {
        if core.temperatures.set_bed_actual(value) {
            core.publish(Notification::BedTemperatureRead(value));
        }
    }
}

fn read_resend(core: &mut LinkCore, found: &mut FoundLine) {
    let Some(request) = responses::parse_resend(&found.line) else {
        tracing::debug!("Unparseable resend request: {}", found.line);
        return;
    };
    if request.implies_ack {
        core.ack.acknowledge();
    }
    if !core.checksums_enabled() {
        tracing::debug!("Resend of {} requested without checksums, ignored", request.seq);
        return;
    }

    let next = core.archive.next_seq();
    if request.seq >= next {
        tracing::debug!(
            "Resend of {} requested, nothing sent past {}",
            request.seq,
            next.saturating_sub(1)
        );
        return;
    }
    match core.archive.rewind_to(request.seq) {
        Ok(()) => tracing::warn!("Printer requested resend from line {}", request.seq),
        Err(e) => {
            tracing::warn!("{}, resetting line numbers", e);
            core.pending_reset = true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::{new_command_queue, NoLeveling};
    use crate::transport::MockTransport;
    use std::collections::HashMap;

    fn connected_core(pairs: &[(&str, &str)]) -> (LinkCore, MockTransport) {
        let settings: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        let mut core = LinkCore::new(
            Arc::new(settings),
            NotificationDispatcher::new(64),
            new_command_queue(),
            Arc::new(NoLeveling),
        );
        let mock = MockTransport::new();
        core.attach(Box::new(mock.clone()));
        core.set_state(LinkState::Connecting);
        core.set_state(LinkState::Connected);
        mock.clear_written();
        (core, mock)
    }

    fn drain(rx: &mut tokio::sync::broadcast::Receiver<Notification>) -> Vec<Notification> {
        let mut seen = Vec::new();
        while let Ok(notification) = rx.try_recv() {
            seen.push(notification);
        }
        seen
    }

    #[test]
    fn test_hardware_fault_latches_until_cleared() {
        let (mut core, _) = connected_core(&[]);
        let mut rx = core.dispatcher.subscribe();
        let fault = "Error:Thermal Runaway, system stopped! Heater_ID: 0";

        core.process_line(fault);
        core.process_line(fault);
        let reported = |seen: &[Notification]| {
            seen.iter()
                .filter(|n| matches!(n, Notification::ErrorReported(_)))
                .count()
        };
        assert_eq!(reported(&drain(&mut rx)), 1);

        core.clear_errors();
        core.process_line(fault);
        assert_eq!(reported(&drain(&mut rx)), 1);
    }

    #[test]
    fn test_protocol_complaint_is_not_a_fault() {
        let (mut core, _) = connected_core(&[]);
        core.process_line("Error:checksum mismatch, Last Line: 7");
        assert!(core.latched_faults.is_empty());
    }

    #[test]
    fn test_temperature_report_updates_readings() {
        let (mut core, _) = connected_core(&[]);
        let mut rx = core.dispatcher.subscribe();
        core.ack.start("M105", Instant::now());

        core.process_line("ok T:201.5 /210.0 B:59.8 /60.0");
        assert_eq!(core.temperatures.hotend_actual(0), 201.5);
        assert_eq!(core.temperatures.bed_actual(), 59.8);
        assert!(!core.ack.is_waiting());

        let seen = drain(&mut rx);
        assert!(seen.contains(&Notification::HotendTemperatureRead {
            index: 0,
            value: 201.5
        }));
        assert!(seen.contains(&Notification::BedTemperatureRead(59.8)));

        core.process_line("T:201.5 /210.0 B:59.8 /60.0");
        assert!(!drain(&mut rx)
            .iter()
            .any(|n| matches!(n, Notification::HotendTemperatureRead { .. })));
    }

    #[test]
    fn test_position_report_releases_position_wait() {
        let (mut core, _) = connected_core(&[]);
        let now = Instant::now();
        core.ack.start_position_wait(now);
        assert!(core.ack.awaiting_position(now));

        core.process_line("X:10.00 Y:20.00 Z:0.30 E:1.50 Count X:800 Y:1600 Z:120");
        assert!(!core.ack.awaiting_position(now));
        assert_eq!(core.last_reported_position.x, 10.0);
        assert_eq!(core.last_reported_position.z, 0.3);
        assert_eq!(core.destination.position().y, 20.0);
    }

    #[test]
    fn test_resend_replays_after_ok() {
        let (mut core, mock) = connected_core(&[(keys::SEND_WITH_CHECKSUM, "1")]);
        core.pending_reset = false;
        let now = Instant::now();
        for line in ["G1 X1", "G1 X2", "G1 X3"] {
            core.send_line(line, now).unwrap();
        }

        core.process_line("Resend: 2");
        assert!(core.archive.is_replaying());
        assert!(core.ack.is_waiting());
        core.try_write_next(now).unwrap();
        assert_eq!(mock.written_lines().len(), 3);

        core.process_line("ok");
        core.try_write_next(now).unwrap();
        assert_eq!(
            mock.written_lines().last().cloned(),
            Some(codec::frame(2, "G1 X2"))
        );
    }

    #[test]
    fn test_resend_beyond_sent_lines_is_ignored() {
        let (mut core, _) = connected_core(&[(keys::SEND_WITH_CHECKSUM, "1")]);
        core.pending_reset = false;
        core.send_line("G1 X1", Instant::now()).unwrap();

        core.process_line("rs N5");
        assert!(!core.archive.is_replaying());
        assert!(!core.ack.is_waiting());
    }

    #[test]
    fn test_pending_reset_goes_out_first() {
        let (mut core, mock) = connected_core(&[(keys::SEND_WITH_CHECKSUM, "1")]);
        core.try_write_next(Instant::now()).unwrap();
        let written = mock.written_lines();
        assert_eq!(written.len(), 1);
        assert!(written[0].starts_with("N0 M110 N0*"), "{}", written[0]);
    }

    #[test]
    fn test_done_printing_file_finishes_media_print() {
        let (mut core, _) = connected_core(&[]);
        core.set_state(LinkState::PrintingFromRemovableMedia);
        core.process_line("SD printing byte 50/100");
        assert_eq!(core.media_progress, Some((50, 100)));

        core.process_line("Done printing file");
        assert_eq!(core.state, LinkState::FinishedPrint);
    }

    #[test]
    fn test_done_printing_file_ignored_while_paused() {
        let (mut core, _) = connected_core(&[]);
        core.set_state(LinkState::PrintingFromRemovableMedia);
        core.set_state(LinkState::Paused);
        core.process_line("Done printing file");
        assert_eq!(core.state, LinkState::Paused);
    }
}
