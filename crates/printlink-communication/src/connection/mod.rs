//! Printer connection
//!
//! [`PrinterConnection`] owns one link to one printer. It runs the connect
//! attempt and the read loop as blocking tokio tasks, keeps every piece of
//! shared state behind a single lock, and exposes the lifecycle, printing and
//! machine-control operations callers use.
//!
//! ```no_run
//! # async fn demo() -> printlink_core::Result<()> {
//! use printlink_communication::PrinterConnection;
//! use printlink_core::{keys, LinkState};
//! use std::collections::HashMap;
//! use std::sync::Arc;
//!
//! let mut settings = HashMap::new();
//! settings.insert(keys::PORT_NAME.to_string(), "/dev/ttyUSB0".to_string());
//! let connection = PrinterConnection::new(Arc::new(settings));
//! connection.connect()?;
//! connection
//!     .wait_for_state(&[LinkState::Connected], std::time::Duration::from_secs(10))
//!     .await;
//! # Ok(())
//! # }
//! ```

mod handshake;
mod read_loop;
mod shared;
mod state;

pub use handshake::{DEFAULT_CONNECT_TIMEOUT_MS, PROBE};
pub use read_loop::{LineAssembler, MAX_HANDSHAKE_UNKNOWN};
pub use shared::HARDWARE_FAULTS;

use crate::pipeline::{
    new_command_queue, CommandQueue, GcodeJob, JobSource, LevelingSolution, LineSource,
    NoLeveling, RecoverySource, StageCommand,
};
use crate::protocol::{codec, gcode};
use crate::transport::{DefaultTransportFactory, TransportFactory};
use parking_lot::Mutex;
use printlink_core::{
    keys, Axis, ConnectionError, Error, FirmwareIdentity, LinkState, Move, Notification,
    NotificationDispatcher, PauseReason, PrintTask, Result, SettingsSource, TemperatureState,
};
use shared::LinkCore;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::runtime::Handle;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

/// Longest wait for a background task to stop
const JOIN_TIMEOUT: Duration = Duration::from_secs(5);
const STATE_POLL_INTERVAL: Duration = Duration::from_millis(10);

type TaskSlot = Arc<Mutex<Option<JoinHandle<()>>>>;

/// One link to one printer
pub struct PrinterConnection {
    core: Arc<Mutex<LinkCore>>,
    factory: Arc<dyn TransportFactory>,
    dispatcher: NotificationDispatcher,
    queue: CommandQueue,
    halt: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    connect_task: TaskSlot,
    read_task: TaskSlot,
}

impl PrinterConnection {
    /// Create a connection that opens serial or TCP transports
    pub fn new(settings: Arc<dyn SettingsSource>) -> Self {
        Self::with_transport_factory(settings, Arc::new(DefaultTransportFactory))
    }

    /// Create a connection that opens transports through `factory`
    pub fn with_transport_factory(
        settings: Arc<dyn SettingsSource>,
        factory: Arc<dyn TransportFactory>,
    ) -> Self {
        let dispatcher = NotificationDispatcher::default();
        let queue = new_command_queue();
        let core = LinkCore::new(
            settings,
            dispatcher.clone(),
            queue.clone(),
            Arc::new(NoLeveling),
        );
        Self {
            core: Arc::new(Mutex::new(core)),
            factory,
            dispatcher,
            queue,
            halt: Arc::new(AtomicBool::new(false)),
            shutdown: Arc::new(AtomicBool::new(false)),
            connect_task: Arc::new(Mutex::new(None)),
            read_task: Arc::new(Mutex::new(None)),
        }
    }

    /// Subscribe to link notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.dispatcher.subscribe()
    }

    /// Replace the leveling compensation used by the next loaded pipeline
    pub fn set_leveling_solution(&self, leveling: Arc<dyn LevelingSolution>) {
        let mut core = self.core.lock();
        core.leveling = leveling;
        if !core.state.is_printing() && core.state != LinkState::Paused {
            core.load_idle_pipeline();
        }
    }

    /// Start a connect attempt in the background.
    ///
    /// Fails immediately if the transport is already open. The outcome is
    /// reported as a state change to `Connected` or `FailedToConnect`.
    pub fn connect(&self) -> Result<()> {
        let handle = Handle::try_current().map_err(|e| ConnectionError::NoRuntime {
            reason: e.to_string(),
        })?;

        {
            let mut core = self.core.lock();
            if core.transport_is_open() || core.state.keeps_reading() {
                return Err(ConnectionError::AlreadyOpen {
                    port: core.port_name(),
                }
                .into());
            }
            core.transition(LinkState::Connecting)?;
        }

        self.halt.store(false, Ordering::SeqCst);
        self.shutdown.store(false, Ordering::SeqCst);

        let attempt = ConnectAttempt {
            core: Arc::clone(&self.core),
            factory: Arc::clone(&self.factory),
            halt: Arc::clone(&self.halt),
            shutdown: Arc::clone(&self.shutdown),
            read_task: Arc::clone(&self.read_task),
            handle: handle.clone(),
        };
        let task = handle.spawn_blocking(move || attempt.run());
        *self.connect_task.lock() = Some(task);
        Ok(())
    }

    /// Stop retrying the handshake; the attempt ends as failed
    pub fn halt_connection_thread(&self) {
        tracing::debug!("Halting connection attempt");
        self.halt.store(true, Ordering::SeqCst);
    }

    /// Abandon the connect attempt, close the transport and stop the tasks
    pub async fn abort_connection_attempt(&self, reason: &str) -> Result<()> {
        tracing::warn!("Aborting connection attempt: {}", reason);
        self.halt.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
        {
            let mut core = self.core.lock();
            core.set_state(LinkState::Disconnected);
            core.close_transport();
        }
        self.join_tasks().await;
        Ok(())
    }

    /// Turn the heaters off, stop the read loop and close the transport
    pub async fn disconnect(&self) -> Result<()> {
        {
            let mut core = self.core.lock();
            if core.state == LinkState::Disconnected {
                return Ok(());
            }
            core.set_state(LinkState::Disconnecting);
        }

        self.halt.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
        self.join_tasks().await;

        let mut core = self.core.lock();
        core.set_state(LinkState::Disconnected);
        core.close_transport();
        core.queue.lock().clear();
        core.load_idle_pipeline();
        Ok(())
    }

    /// Wait until the link is in one of `states`, returning the state reached
    pub async fn wait_for_state(
        &self,
        states: &[LinkState],
        timeout: Duration,
    ) -> Option<LinkState> {
        let deadline = Instant::now() + timeout;
        loop {
            let current = self.state();
            if states.contains(&current) {
                return Some(current);
            }
            if Instant::now() >= deadline {
                return None;
            }
            tokio::time::sleep(STATE_POLL_INTERVAL).await;
        }
    }

    async fn join_tasks(&self) {
        for slot in [&self.connect_task, &self.read_task] {
            let task = slot.lock().take();
            let Some(task) = task else {
                continue;
            };
            match tokio::time::timeout(JOIN_TIMEOUT, task).await {
                Ok(Ok(())) => {}
                Ok(Err(e)) => tracing::warn!("Link task ended abnormally: {}", e),
                Err(_) => tracing::warn!(
                    "Link task did not stop within {}s, leaving it behind",
                    JOIN_TIMEOUT.as_secs()
                ),
            }
        }
    }

    /// Queue commands behind anything already queued.
    ///
    /// Multi-line text (real or literal `\n`) is split into lines.
    pub fn queue_line(&self, text: &str) -> Result<()> {
        self.enqueue(text, false)
    }

    /// Queue commands ahead of anything already queued
    pub fn queue_line_front(&self, text: &str) -> Result<()> {
        self.enqueue(text, true)
    }

    fn enqueue(&self, text: &str, front: bool) -> Result<()> {
        let lines = gcode::split_lines(text);
        let mut core = self.core.lock();
        if !core.state.is_connected() {
            return Err(ConnectionError::NotConnected.into());
        }

        if core.state == LinkState::PrintingFromRemovableMedia {
            for line in lines.iter().filter_map(|line| codec::prepare_line(line)) {
                core.send_unacknowledged(&line).map_err(io_error)?;
            }
            return Ok(());
        }

        let mut queue = self.queue.lock();
        if front {
            for line in lines.into_iter().rev() {
                queue.push_front(line);
            }
        } else {
            queue.extend(lines);
        }
        Ok(())
    }

    /// Stream a job through the write pipeline.
    ///
    /// When `interrupted` is a recoverable task and print recovery is enabled,
    /// the job resumes from the task's progress instead of the first line.
    pub fn start_print(&self, job: GcodeJob, interrupted: Option<PrintTask>) -> Result<()> {
        let mut core = self.core.lock();
        if !matches!(core.state, LinkState::Connected | LinkState::FinishedPrint) {
            return Err(Error::illegal_in_state("start a print", core.state));
        }
        core.transition(LinkState::PreparingToPrint)?;

        let name = job.name().to_string();
        let job_source = JobSource::new(job);
        let progress = job_source.progress();
        let recover_enabled = core.settings.get_bool(keys::RECOVER_ENABLED);

        let recoverable = interrupted.filter(|task| recover_enabled && task.is_recoverable());
        let (source, task): (Box<dyn LineSource>, PrintTask) = match recoverable {
            Some(mut task) => {
                task.recovery_count += 1;
                tracing::info!(
                    "Recovering {} from {:.1}% (recovery {})",
                    name,
                    task.percent_done,
                    task.recovery_count
                );
                let source: Box<dyn LineSource> =
                    Box::new(RecoverySource::new(job_source, task.percent_done));
                (source, task)
            }
            None => {
                tracing::info!("Starting print of {}", name);
                let source: Box<dyn LineSource> = Box::new(job_source);
                (source, PrintTask::new(name))
            }
        };

        core.load_pipeline(source);
        core.progress = Some(progress);
        core.print_task = Some(task);
        core.transition(LinkState::Printing)?;
        Ok(())
    }

    /// Have the device print a file from its own removable media
    pub fn start_removable_media_print(&self, file_name: &str) -> Result<()> {
        let mut core = self.core.lock();
        if !matches!(core.state, LinkState::Connected | LinkState::FinishedPrint) {
            return Err(Error::illegal_in_state("start a media print", core.state));
        }

        core.ack.reset();
        core.send_unacknowledged(&format!("M23 {}", file_name))
            .map_err(io_error)?;
        core.send_unacknowledged("M24").map_err(io_error)?;
        core.media_progress = None;
        core.print_task = Some(PrintTask::new(file_name));
        core.transition(LinkState::PrintingFromRemovableMedia)?;
        Ok(())
    }

    /// Pause the running print; a no-op when nothing is printing
    pub fn request_pause(&self) -> Result<()> {
        let mut core = self.core.lock();
        match core.state {
            LinkState::PrintingFromRemovableMedia => {
                core.send_unacknowledged("M25").map_err(io_error)?;
                core.transition(LinkState::Paused)?;
                core.publish(Notification::PrintPaused {
                    reason: PauseReason::UserRequested,
                    layer: None,
                });
            }
            LinkState::Printing => {
                core.control_pipeline(
                    StageCommand::Pause(PauseReason::UserRequested),
                    Instant::now(),
                );
            }
            other => tracing::debug!("Pause ignored while {}", other),
        }
        Ok(())
    }

    /// Resume a paused print; a no-op when not paused
    pub fn resume(&self) -> Result<()> {
        let mut core = self.core.lock();
        if core.state != LinkState::Paused {
            tracing::debug!("Resume ignored while {}", core.state);
            return Ok(());
        }

        if core.paused_from == Some(LinkState::PrintingFromRemovableMedia) {
            core.send_unacknowledged("M24").map_err(io_error)?;
            core.transition(LinkState::PrintingFromRemovableMedia)?;
        } else {
            core.control_pipeline(StageCommand::Resume, Instant::now());
            core.transition(LinkState::Printing)?;
        }
        tracing::info!("Print resumed");
        Ok(())
    }

    /// Abandon the running print and queue the cancel code
    pub fn cancel_print(&self) -> Result<()> {
        let mut core = self.core.lock();
        let state = core.state;
        if !matches!(
            state,
            LinkState::PreparingToPrint
                | LinkState::Printing
                | LinkState::PrintingFromRemovableMedia
                | LinkState::Paused
        ) {
            return Err(Error::illegal_in_state("cancel a print", state));
        }

        let from_media = state == LinkState::PrintingFromRemovableMedia
            || core.paused_from == Some(LinkState::PrintingFromRemovableMedia);
        self.queue.lock().clear();
        if from_media {
            core.send_unacknowledged("M25").map_err(io_error)?;
        }
        core.load_idle_pipeline();
        core.paused_from = None;
        if let Some(task) = core.print_task.as_mut() {
            task.ended_at = Some(chrono::Utc::now());
        }
        core.transition(LinkState::Connected)?;

        let cancel = gcode::split_lines(&core.settings.get_string(keys::CANCEL_GCODE));
        self.queue.lock().extend(cancel);
        tracing::info!("Print canceled");
        core.publish(Notification::PrintCanceled);
        Ok(())
    }

    /// Bring the link back to a settled state from wherever it is
    pub async fn stop(&self) -> Result<()> {
        let state = self.state();
        match state {
            LinkState::Disconnected | LinkState::FailedToConnect => Ok(()),
            LinkState::Connecting => self.abort_connection_attempt("stopped").await,
            LinkState::Disconnecting | LinkState::ConnectionLost => self.disconnect().await,
            LinkState::PreparingToPrint
            | LinkState::Printing
            | LinkState::PrintingFromRemovableMedia
            | LinkState::Paused => self.cancel_print(),
            LinkState::Connected | LinkState::FinishedPrint => {
                self.reset_to_ready_state();
                Ok(())
            }
        }
    }

    /// Leave the finished state so the next print can start
    pub fn reset_to_ready_state(&self) {
        let mut core = self.core.lock();
        if core.state == LinkState::FinishedPrint {
            core.set_state(LinkState::Connected);
        }
    }

    /// Set a hot-end target in degrees Celsius
    pub fn set_hotend_target(&self, index: usize, temperature: f64) -> Result<()> {
        self.queue_line(&format!(
            "M104 T{} S{}",
            index,
            gcode::format_number(temperature)
        ))
    }

    /// Set the bed target in degrees Celsius
    pub fn set_bed_target(&self, temperature: f64) -> Result<()> {
        self.queue_line(&format!("M140 S{}", gcode::format_number(temperature)))
    }

    /// Turn every heater off
    pub fn turn_off_heaters(&self) -> Result<()> {
        let lines = self.core.lock().heater_off_lines();
        self.queue_line(&lines.join("\n"))
    }

    /// Ask the printer where it is
    pub fn read_position(&self) -> Result<()> {
        self.queue_line("M114")
    }

    /// Disable the stepper motors
    pub fn release_motors(&self) -> Result<()> {
        self.queue_line("M84")
    }

    /// Home the given axes, or every axis when `axes` is empty
    pub fn home_axes(&self, axes: &[Axis]) -> Result<()> {
        let mut line = "G28".to_string();
        for axis in axes.iter().filter(|axis| **axis != Axis::E) {
            line.push_str(&format!(" {}0", axis.letter()));
        }
        self.queue_line(&line)
    }

    /// Set the part-cooling fan speed (0-255)
    pub fn set_fan_speed(&self, speed: f64) -> Result<()> {
        let speed = speed.clamp(0.0, 255.0);
        if speed <= 0.0 {
            self.queue_line("M107")
        } else {
            self.queue_line(&format!("M106 S{}", gcode::format_number(speed.round())))
        }
    }

    /// Move one axis by `distance` millimeters at `feed_rate` mm/min
    pub fn move_relative(&self, axis: Axis, distance: f64, feed_rate: f64) -> Result<()> {
        self.queue_line(&format!(
            "G91\nG1 {}{} F{}\nG90",
            axis.letter(),
            gcode::format_number(distance),
            gcode::format_number(feed_rate)
        ))
    }

    /// Forget latched hardware faults so they are reported again
    pub fn clear_errors(&self) {
        self.core.lock().clear_errors();
    }

    /// Current link state
    pub fn state(&self) -> LinkState {
        self.core.lock().state
    }

    /// Latest temperatures
    pub fn temperatures(&self) -> TemperatureState {
        self.core.lock().temperatures.clone()
    }

    /// Actual temperature of a hot-end
    pub fn hotend_temperature(&self, index: usize) -> f64 {
        self.core.lock().temperatures.hotend_actual(index)
    }

    /// Actual bed temperature
    pub fn bed_temperature(&self) -> f64 {
        self.core.lock().temperatures.bed_actual()
    }

    /// Position from the last printer report
    pub fn last_reported_position(&self) -> Move {
        self.core.lock().last_reported_position
    }

    /// Where the commands sent so far leave the machine
    pub fn destination(&self) -> Move {
        self.core.lock().destination.position()
    }

    /// Firmware identification, once reported
    pub fn firmware(&self) -> FirmwareIdentity {
        self.core.lock().firmware.clone()
    }

    /// Bookkeeping for the current or last print
    pub fn print_task(&self) -> Option<PrintTask> {
        self.core.lock().print_task.clone()
    }

    /// Completion of the current print in percent
    pub fn percent_complete(&self) -> f64 {
        let core = self.core.lock();
        if let Some((printed, total)) = core.media_progress.filter(|(_, total)| *total > 0) {
            return printed as f64 * 100.0 / total as f64;
        }
        match (&core.progress, &core.print_task) {
            (Some(progress), _) => progress.percent(),
            (None, Some(task)) => task.percent_done,
            (None, None) => 0.0,
        }
    }

    /// Last fan speed sent
    pub fn fan_speed(&self) -> f64 {
        self.core.lock().fan_speed
    }

    /// Whether auxiliary power was last switched on
    pub fn aux_power(&self) -> bool {
        self.core.lock().aux_power
    }

    /// Tool selected by the last `T<n>` sent
    pub fn active_tool(&self) -> usize {
        self.core.lock().active_tool
    }

    /// Hardware faults reported since the last [`PrinterConnection::clear_errors`]
    pub fn active_faults(&self) -> Vec<String> {
        let mut faults: Vec<String> = self.core.lock().latched_faults.iter().cloned().collect();
        faults.sort();
        faults
    }

    /// Whether the link is talking to a printer
    pub fn is_connected(&self) -> bool {
        self.state().is_connected()
    }
}

impl Drop for PrinterConnection {
    fn drop(&mut self) {
        self.halt.store(true, Ordering::SeqCst);
        self.shutdown.store(true, Ordering::SeqCst);
    }
}

impl std::fmt::Debug for PrinterConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let core = self.core.lock();
        f.debug_struct("PrinterConnection")
            .field("state", &core.state)
            .field("port", &core.port_name())
            .field("pipeline", &core.pipeline)
            .finish()
    }
}

fn io_error(e: std::io::Error) -> Error {
    ConnectionError::Io {
        message: e.to_string(),
    }
    .into()
}

/// Everything the background connect task needs
struct ConnectAttempt {
    core: Arc<Mutex<LinkCore>>,
    factory: Arc<dyn TransportFactory>,
    halt: Arc<AtomicBool>,
    shutdown: Arc<AtomicBool>,
    read_task: TaskSlot,
    handle: Handle,
}

impl ConnectAttempt {
    fn run(self) {
        let settings = Arc::clone(&self.core.lock().settings);
        let mut transport = match self.factory.open(settings.as_ref()) {
            Ok(transport) => transport,
            Err(e) => {
                self.core.lock().connection_failed(&e.to_string());
                return;
            }
        };

        if self.halt.load(Ordering::SeqCst) {
            if let Err(e) = transport.close() {
                tracing::debug!("Closing abandoned transport failed: {}", e);
            }
            return;
        }
        tracing::info!("Opened {}", transport.name());
        self.core.lock().attach(transport);

        let core = Arc::clone(&self.core);
        let shutdown = Arc::clone(&self.shutdown);
        let reader = self
            .handle
            .spawn_blocking(move || read_loop::run(core, shutdown));
        *self.read_task.lock() = Some(reader);

        let timeout_ms = settings
            .get(keys::CONNECT_TIMEOUT_MS)
            .and_then(|v| v.trim().parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .unwrap_or(DEFAULT_CONNECT_TIMEOUT_MS);

        match handshake::run(&self.core, &self.halt, Duration::from_millis(timeout_ms)) {
            Ok(()) => self.core.lock().complete_handshake(),
            Err(e) => self.core.lock().connection_failed(&e.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::{MockTransport, MockTransportFactory};
    use std::collections::HashMap;

    fn connection(pairs: &[(&str, &str)], mock: MockTransport) -> PrinterConnection {
        let settings: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        PrinterConnection::with_transport_factory(
            Arc::new(settings),
            Arc::new(MockTransportFactory::new(mock)),
        )
    }

    #[test]
    fn test_connect_needs_runtime() {
        let conn = connection(&[], MockTransport::new());
        let err = conn.connect().unwrap_err();
        assert!(matches!(
            err,
            Error::Connection(ConnectionError::NoRuntime { .. })
        ));
        assert_eq!(conn.state(), LinkState::Disconnected);
    }

    #[test]
    fn test_commands_need_a_connection() {
        let conn = connection(&[], MockTransport::new());
        assert!(matches!(
            conn.queue_line("G28"),
            Err(Error::Connection(ConnectionError::NotConnected))
        ));
        assert!(conn.start_print(GcodeJob::from_lines("j", ["G28"]), None).is_err());
    }

    #[test]
    fn test_pause_and_resume_are_noops_when_idle() {
        let conn = connection(&[], MockTransport::new());
        assert!(conn.request_pause().is_ok());
        assert!(conn.resume().is_ok());
        assert_eq!(conn.state(), LinkState::Disconnected);
    }

    #[tokio::test]
    async fn test_failed_open_reports_failure() {
        let factory = MockTransportFactory::new(MockTransport::new());
        factory.fail_open(true);
        let conn = PrinterConnection::with_transport_factory(
            Arc::new(HashMap::<String, String>::new()),
            Arc::new(factory),
        );
        let mut rx = conn.subscribe();
        conn.connect().unwrap();
        let reached = conn
            .wait_for_state(&[LinkState::FailedToConnect], Duration::from_secs(2))
            .await;
        assert_eq!(reached, Some(LinkState::FailedToConnect));

        let mut failed = false;
        while let Ok(notification) = rx.try_recv() {
            failed |= matches!(notification, Notification::ConnectionFailed { .. });
        }
        assert!(failed);
    }
}
