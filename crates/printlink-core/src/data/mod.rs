//! Data models for link state, positions, temperatures and print bookkeeping
//!
//! This module provides:
//! - The link state machine states and their legal transitions
//! - Believed machine position (`Move`) and motion modes
//! - Heater telemetry (`TemperatureState`)
//! - Firmware identification
//! - Print task bookkeeping used for progress and recovery

pub mod firmware;
pub mod print_task;
pub mod temperature;

pub use firmware::FirmwareIdentity;
pub use print_task::PrintTask;
pub use temperature::{TemperatureState, MAX_EXTRUDERS};

use serde::{Deserialize, Serialize};
use std::fmt;

/// State of the printer link
///
/// Exactly one value is active at a time; the connection changes it only
/// through transitions accepted by [`LinkState::can_transition_to`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum LinkState {
    /// No transport open
    #[default]
    Disconnected,
    /// Transport opening and handshake in progress
    Connecting,
    /// The last connect attempt failed
    FailedToConnect,
    /// Connected and idle
    Connected,
    /// A print job is being prepared
    PreparingToPrint,
    /// Streaming a job through the write pipeline
    Printing,
    /// The device prints a job from its own removable media
    PrintingFromRemovableMedia,
    /// A print is paused
    Paused,
    /// The last print completed
    FinishedPrint,
    /// Shutting the link down
    Disconnecting,
    /// The transport failed while connected
    ConnectionLost,
}

impl LinkState {
    /// Check if the printer can currently be talked to
    pub fn is_connected(&self) -> bool {
        matches!(
            self,
            LinkState::Connected
                | LinkState::PreparingToPrint
                | LinkState::Printing
                | LinkState::PrintingFromRemovableMedia
                | LinkState::Paused
                | LinkState::FinishedPrint
        )
    }

    /// Check if a print is actively running
    pub fn is_printing(&self) -> bool {
        matches!(
            self,
            LinkState::Printing | LinkState::PrintingFromRemovableMedia
        )
    }

    /// Check if the read loop should keep running in this state
    pub fn keeps_reading(&self) -> bool {
        self.is_connected() || matches!(self, LinkState::Connecting)
    }

    /// Check if a transition from this state to `target` is valid.
    ///
    /// - Disconnected can only start connecting
    /// - Connecting ends connected, failed, or torn down
    /// - Any connected state can be lost or disconnected
    /// - Printing states pause, finish, or are cancelled back to Connected
    pub fn can_transition_to(&self, target: LinkState) -> bool {
        use LinkState::*;
        if *self == target {
            return true;
        }
        match (self, target) {
            (_, Disconnected) => true,
            (Disconnected, Connecting) => true,
            (Disconnected, _) => false,
            (Connecting, Connected | FailedToConnect | Disconnecting | ConnectionLost) => true,
            (Connecting, _) => false,
            (FailedToConnect, Connecting | Disconnecting) => true,
            (FailedToConnect, _) => false,
            (Disconnecting, _) => false,
            (ConnectionLost, Connecting | Disconnecting) => true,
            (ConnectionLost, _) => false,
            (_, Disconnecting | ConnectionLost) => true,
            (Connected, PreparingToPrint | Printing | PrintingFromRemovableMedia) => true,
            (PreparingToPrint, Printing | Connected) => true,
            (Printing | PrintingFromRemovableMedia, Paused | FinishedPrint | Connected) => true,
            (Paused, Printing | PrintingFromRemovableMedia | Connected) => true,
            (FinishedPrint, Connected | PreparingToPrint | PrintingFromRemovableMedia) => true,
            _ => false,
        }
    }
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Disconnected => write!(f, "Disconnected"),
            Self::Connecting => write!(f, "Connecting"),
            Self::FailedToConnect => write!(f, "FailedToConnect"),
            Self::Connected => write!(f, "Connected"),
            Self::PreparingToPrint => write!(f, "PreparingToPrint"),
            Self::Printing => write!(f, "Printing"),
            Self::PrintingFromRemovableMedia => write!(f, "PrintingFromRemovableMedia"),
            Self::Paused => write!(f, "Paused"),
            Self::FinishedPrint => write!(f, "FinishedPrint"),
            Self::Disconnecting => write!(f, "Disconnecting"),
            Self::ConnectionLost => write!(f, "ConnectionLost"),
        }
    }
}

/// Why a print was paused
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PauseReason {
    /// The user asked for a pause
    UserRequested,
    /// A configured pause layer was reached
    PauseLayerReached,
    /// The job itself asked for a pause (`M226`, `@pause`)
    GCodeRequest,
}

impl fmt::Display for PauseReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::UserRequested => write!(f, "user request"),
            Self::PauseLayerReached => write!(f, "pause layer reached"),
            Self::GCodeRequest => write!(f, "G-code request"),
        }
    }
}

/// Machine axis
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Axis {
    /// X axis
    X,
    /// Y axis
    Y,
    /// Z axis
    Z,
    /// Extruder axis
    E,
}

impl Axis {
    /// The G-code letter for this axis
    pub fn letter(&self) -> char {
        match self {
            Axis::X => 'X',
            Axis::Y => 'Y',
            Axis::Z => 'Z',
            Axis::E => 'E',
        }
    }
}

impl fmt::Display for Axis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

/// Absolute or relative positioning
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum PositionMode {
    /// Coordinates are absolute (`G90` / `M82`)
    #[default]
    Absolute,
    /// Coordinates are offsets from the current position (`G91` / `M83`)
    Relative,
}

/// Believed machine position
///
/// Updated by outgoing G0/G1 lines and by parsed position reports.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Move {
    /// X position in millimeters
    pub x: f64,
    /// Y position in millimeters
    pub y: f64,
    /// Z position in millimeters
    pub z: f64,
    /// Extruder position in millimeters of filament
    pub e: f64,
    /// Feed rate in millimeters per minute
    pub feed_rate: f64,
}

impl Move {
    /// Create a move at the given position with no extrusion or feed rate
    pub fn new(x: f64, y: f64, z: f64) -> Self {
        Self {
            x,
            y,
            z,
            ..Self::default()
        }
    }

    /// Set the extruder position
    pub fn with_e(mut self, e: f64) -> Self {
        self.e = e;
        self
    }

    /// Set the feed rate
    pub fn with_feed_rate(mut self, feed_rate: f64) -> Self {
        self.feed_rate = feed_rate;
        self
    }

    /// Get an axis value
    pub fn axis(&self, axis: Axis) -> f64 {
        match axis {
            Axis::X => self.x,
            Axis::Y => self.y,
            Axis::Z => self.z,
            Axis::E => self.e,
        }
    }

    /// Set an axis value
    pub fn set_axis(&mut self, axis: Axis, value: f64) {
        match axis {
            Axis::X => self.x = value,
            Axis::Y => self.y = value,
            Axis::Z => self.z = value,
            Axis::E => self.e = value,
        }
    }

    /// Straight-line XYZ distance to another move
    pub fn distance_to(&self, other: &Move) -> f64 {
        let dx = other.x - self.x;
        let dy = other.y - self.y;
        let dz = other.z - self.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }

    /// Check if the XYZE position equals another within a small tolerance
    pub fn same_position(&self, other: &Move) -> bool {
        const EPSILON: f64 = 1e-6;
        (self.x - other.x).abs() < EPSILON
            && (self.y - other.y).abs() < EPSILON
            && (self.z - other.z).abs() < EPSILON
            && (self.e - other.e).abs() < EPSILON
    }
}

impl fmt::Display for Move {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "X:{:.3} Y:{:.3} Z:{:.3} E:{:.3} F:{:.0}",
            self.x, self.y, self.z, self.e, self.feed_rate
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_disconnected_only_connects() {
        let from = LinkState::Disconnected;
        assert!(from.can_transition_to(LinkState::Connecting));
        assert!(!from.can_transition_to(LinkState::Connected));
        assert!(!from.can_transition_to(LinkState::Printing));
        assert!(!from.can_transition_to(LinkState::Paused));
    }

    #[test]
    fn test_print_lifecycle_transitions() {
        assert!(LinkState::Connected.can_transition_to(LinkState::PreparingToPrint));
        assert!(LinkState::PreparingToPrint.can_transition_to(LinkState::Printing));
        assert!(LinkState::Printing.can_transition_to(LinkState::Paused));
        assert!(LinkState::Paused.can_transition_to(LinkState::PrintingFromRemovableMedia));
        assert!(LinkState::Printing.can_transition_to(LinkState::FinishedPrint));
        assert!(LinkState::FinishedPrint.can_transition_to(LinkState::Connected));
        assert!(!LinkState::Paused.can_transition_to(LinkState::FinishedPrint));
    }

    #[test]
    fn test_any_connected_state_can_be_lost() {
        for state in [
            LinkState::Connected,
            LinkState::Printing,
            LinkState::Paused,
            LinkState::FinishedPrint,
        ] {
            assert!(state.can_transition_to(LinkState::ConnectionLost));
            assert!(state.can_transition_to(LinkState::Disconnecting));
        }
        assert!(!LinkState::Disconnecting.can_transition_to(LinkState::Connected));
    }

    #[test]
    fn test_state_predicates() {
        assert!(LinkState::Paused.is_connected());
        assert!(!LinkState::Connecting.is_connected());
        assert!(LinkState::Connecting.keeps_reading());
        assert!(LinkState::PrintingFromRemovableMedia.is_printing());
        assert!(!LinkState::Paused.is_printing());
    }

    #[test]
    fn test_move_axes() {
        let mut m = Move::new(1.0, 2.0, 3.0).with_e(4.0);
        assert_eq!(m.axis(Axis::Z), 3.0);
        m.set_axis(Axis::X, 10.0);
        assert_eq!(m.x, 10.0);
        assert!((Move::new(0.0, 0.0, 0.0).distance_to(&Move::new(3.0, 4.0, 0.0)) - 5.0).abs() < 1e-9);
    }
}
