//! # PrintLink Core
//!
//! Core types, traits, and utilities for PrintLink.
//! Provides the error taxonomy, the link state model, the notification
//! stream, and the settings lookup the communication engine consumes.

pub mod data;
pub mod error;
pub mod event;
pub mod settings;

pub use data::{
    Axis, FirmwareIdentity, LinkState, Move, PauseReason, PositionMode, PrintTask,
    TemperatureState, MAX_EXTRUDERS,
};

pub use error::{
    ConnectionError, Error, PipelineError, ProtocolError, Result, StateError,
};

pub use event::{Notification, NotificationDispatcher, NotificationKind};

pub use settings::{keys, EmptySettings, SettingsSource};
