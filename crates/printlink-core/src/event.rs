//! Notification stream for link observers
//!
//! Provides:
//! - A single typed `Notification` enum that observers pattern-match on
//! - `NotificationKind` for coarse filtering
//! - `NotificationDispatcher` fanning notifications out over a broadcast channel

use crate::data::{FirmwareIdentity, LinkState, Move, PauseReason};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

/// Everything the link tells its observers
#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    /// The link state changed
    StateChanged {
        /// Previous state.
        from: LinkState,
        /// New state.
        to: LinkState,
    },
    /// The connect handshake succeeded
    ConnectionSucceeded,
    /// A connect attempt failed or an open link was lost
    ConnectionFailed {
        /// Human-readable reason.
        reason: String,
    },
    /// A hot-end temperature report changed
    HotendTemperatureRead {
        /// Hot-end index.
        index: usize,
        /// Reported temperature in degrees Celsius.
        value: f64,
    },
    /// A bed temperature report changed
    BedTemperatureRead(f64),
    /// A hot-end target was sent to the printer
    HotendTargetSet {
        /// Hot-end index.
        index: usize,
        /// Target temperature in degrees Celsius.
        value: f64,
    },
    /// A bed target was sent to the printer
    BedTargetSet(f64),
    /// The printer reported its position
    PositionRead(Move),
    /// The commanded destination changed
    DestinationChanged(Move),
    /// A fan speed was sent (0-255)
    FanSpeedSet(f64),
    /// Auxiliary (ATX) power was switched
    AuxPowerChanged(bool),
    /// The printer identified its firmware
    FirmwareIdentified(FirmwareIdentity),
    /// A print ran to completion
    PrintFinished {
        /// Job name.
        job_name: String,
    },
    /// A print was cancelled
    PrintCanceled,
    /// A print was paused
    PrintPaused {
        /// Why the print paused.
        reason: PauseReason,
        /// One-based layer number for layer pauses.
        layer: Option<u32>,
    },
    /// Removable-media print progress
    RemovableMediaProgress {
        /// Bytes printed so far.
        printed: u64,
        /// Total bytes of the file.
        total: u64,
    },
    /// The firmware reported a hardware fault
    ErrorReported(String),
    /// Every line read from the printer, before any filtering
    LineRead(String),
    /// A line read from the printer that no handler consumed
    LineReceived(String),
    /// Exact text written to the transport
    LineWritten(String),
}

/// Coarse category of a notification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum NotificationKind {
    /// Link state changes
    State,
    /// Connect success and failure
    Connection,
    /// Temperature readings and targets
    Temperature,
    /// Position reports and destination changes
    Position,
    /// Fans and auxiliary power
    Peripheral,
    /// Firmware identification
    Firmware,
    /// Print lifecycle
    Print,
    /// Hardware faults
    Error,
    /// Raw terminal traffic
    Terminal,
}

impl Notification {
    /// Get the category of this notification
    pub fn kind(&self) -> NotificationKind {
        match self {
            Notification::StateChanged { .. } => NotificationKind::State,
            Notification::ConnectionSucceeded | Notification::ConnectionFailed { .. } => {
                NotificationKind::Connection
            }
            Notification::HotendTemperatureRead { .. }
            | Notification::BedTemperatureRead(_)
            | Notification::HotendTargetSet { .. }
            | Notification::BedTargetSet(_) => NotificationKind::Temperature,
            Notification::PositionRead(_) | Notification::DestinationChanged(_) => {
                NotificationKind::Position
            }
            Notification::FanSpeedSet(_) | Notification::AuxPowerChanged(_) => {
                NotificationKind::Peripheral
            }
            Notification::FirmwareIdentified(_) => NotificationKind::Firmware,
            Notification::PrintFinished { .. }
            | Notification::PrintCanceled
            | Notification::PrintPaused { .. }
            | Notification::RemovableMediaProgress { .. } => NotificationKind::Print,
            Notification::ErrorReported(_) => NotificationKind::Error,
            Notification::LineRead(_)
            | Notification::LineReceived(_)
            | Notification::LineWritten(_) => NotificationKind::Terminal,
        }
    }
}

impl std::fmt::Display for Notification {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Notification::StateChanged { from, to } => write!(f, "State: {} -> {}", from, to),
            Notification::ConnectionSucceeded => write!(f, "Connected"),
            Notification::ConnectionFailed { reason } => write!(f, "Connection failed: {}", reason),
            Notification::HotendTemperatureRead { index, value } => {
                write!(f, "Hot-end {}: {:.1}C", index, value)
            }
            Notification::BedTemperatureRead(value) => write!(f, "Bed: {:.1}C", value),
            Notification::HotendTargetSet { index, value } => {
                write!(f, "Hot-end {} target: {:.1}C", index, value)
            }
            Notification::BedTargetSet(value) => write!(f, "Bed target: {:.1}C", value),
            Notification::PositionRead(pos) => write!(f, "Position: {}", pos),
            Notification::DestinationChanged(pos) => write!(f, "Destination: {}", pos),
            Notification::FanSpeedSet(speed) => write!(f, "Fan: {:.0}", speed),
            Notification::AuxPowerChanged(on) => {
                write!(f, "Aux power {}", if *on { "on" } else { "off" })
            }
            Notification::FirmwareIdentified(identity) => write!(f, "Firmware: {}", identity),
            Notification::PrintFinished { job_name } => write!(f, "Print finished: {}", job_name),
            Notification::PrintCanceled => write!(f, "Print canceled"),
            Notification::PrintPaused { reason, layer } => match layer {
                Some(layer) => write!(f, "Paused ({}) at layer {}", reason, layer),
                None => write!(f, "Paused ({})", reason),
            },
            Notification::RemovableMediaProgress { printed, total } => {
                write!(f, "Media print: {}/{}", printed, total)
            }
            Notification::ErrorReported(msg) => write!(f, "Printer error: {}", msg),
            Notification::LineRead(line) => write!(f, "<- {}", line),
            Notification::LineReceived(line) => write!(f, "<= {}", line),
            Notification::LineWritten(line) => write!(f, "-> {}", line),
        }
    }
}

/// Dispatcher for publishing notifications to subscribers
#[derive(Clone)]
pub struct NotificationDispatcher {
    /// Broadcast sender channel for notifications.
    tx: broadcast::Sender<Notification>,
}

impl NotificationDispatcher {
    /// Create a new dispatcher
    ///
    /// # Arguments
    /// * `buffer_size` - Size of the broadcast buffer (default 256)
    pub fn new(buffer_size: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer_size);
        Self { tx }
    }

    /// Subscribe to notifications
    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }

    /// Publish a notification to all subscribers.
    ///
    /// Returns the number of receivers, or 0 when nobody is listening.
    pub fn publish(&self, notification: Notification) -> usize {
        tracing::trace!("notify: {}", notification);
        self.tx.send(notification).unwrap_or(0)
    }

    /// Get number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl Default for NotificationDispatcher {
    fn default() -> Self {
        Self::new(256)
    }
}

impl std::fmt::Debug for NotificationDispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NotificationDispatcher")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}
