//! Error handling for PrintLink
//!
//! Provides error types for every layer of the printer link:
//! - Connection errors (transport and handshake faults)
//! - Protocol errors (line framing, resend window, binary packets)
//! - State errors (operations requested in the wrong link state)
//! - Pipeline errors (write stage configuration and job sources)
//!
//! All error types use `thiserror` for ergonomic error handling.

use thiserror::Error;

/// Connection error type
///
/// Represents faults of the underlying transport and of the connect handshake.
/// Every connection error ends in a deterministic state transition and a
/// human-readable reason.
#[derive(Error, Debug, Clone)]
pub enum ConnectionError {
    /// The transport is already open
    #[error("Connection already open on {port}")]
    AlreadyOpen {
        /// The port that is already open.
        port: String,
    },

    /// The link is not connected
    #[error("Printer not connected")]
    NotConnected,

    /// Port could not be opened
    #[error("Port unavailable: {port} ({reason})")]
    PortUnavailable {
        /// The port name or address.
        port: String,
        /// The reason the port could not be opened.
        reason: String,
    },

    /// The connect handshake failed
    #[error("Handshake failed: {reason}")]
    HandshakeFailed {
        /// The reason the handshake was rejected.
        reason: String,
    },

    /// The connect attempt was halted or aborted
    #[error("Connection attempt aborted: {reason}")]
    Aborted {
        /// The reason the attempt was aborted.
        reason: String,
    },

    /// The connect attempt did not complete in time
    #[error("Connection timed out after {timeout_ms}ms")]
    Timeout {
        /// The timeout duration in milliseconds.
        timeout_ms: u64,
    },

    /// An established link was lost
    #[error("Connection lost: {reason}")]
    Lost {
        /// The reason the link was lost.
        reason: String,
    },

    /// Transport I/O failure
    #[error("Transport I/O error: {message}")]
    Io {
        /// The I/O error message.
        message: String,
    },

    /// No async runtime is available to run the link tasks
    #[error("No tokio runtime available: {reason}")]
    NoRuntime {
        /// The reason reported by the runtime lookup.
        reason: String,
    },
}

/// Protocol error type
///
/// Protocol faults are recovered locally by the resend and timeout logic and
/// are normally only logged.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProtocolError {
    /// A framed line carried the wrong checksum
    #[error("Checksum mismatch on line {line_number}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        /// The sequence number of the line.
        line_number: u64,
        /// The computed checksum.
        expected: u8,
        /// The checksum carried by the line.
        actual: u8,
    },

    /// A framed line could not be parsed
    #[error("Malformed framed line: {line}")]
    MalformedLine {
        /// The offending line.
        line: String,
    },

    /// A resend was requested for a line no longer retained
    #[error("Resend of line {requested} requested outside the retained window")]
    ResendOutOfWindow {
        /// The requested sequence number.
        requested: u64,
    },

    /// A binary packet failed its integrity check
    #[error("Packet CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    CrcMismatch {
        /// The computed CRC.
        expected: u8,
        /// The CRC carried by the packet.
        actual: u8,
    },

    /// A binary packet was structurally invalid
    #[error("Malformed packet: {reason}")]
    MalformedPacket {
        /// The reason the packet was rejected.
        reason: String,
    },

    /// The command has no binary translation
    #[error("Unsupported command for binary protocol: {command}")]
    UnsupportedCommand {
        /// The command text.
        command: String,
    },
}

/// State error type
///
/// Raised when an operation is requested in a link state where it is not legal.
#[derive(Error, Debug, Clone)]
pub enum StateError {
    /// Operation not legal in the current state
    #[error("Cannot {operation} while {state}")]
    IllegalInState {
        /// The requested operation.
        operation: String,
        /// The current state name.
        state: String,
    },

    /// Invalid state transition
    #[error("Invalid state transition from {current} to {requested}")]
    InvalidTransition {
        /// The current state name.
        current: String,
        /// The requested state name.
        requested: String,
    },
}

/// Pipeline error type
#[derive(Error, Debug, Clone)]
pub enum PipelineError {
    /// A regex rule could not be parsed or compiled
    #[error("Invalid regex rule '{rule}': {reason}")]
    InvalidRegexRule {
        /// The rule text.
        rule: String,
        /// The reason the rule was rejected.
        reason: String,
    },

    /// A job could not be loaded
    #[error("Failed to load job {name}: {reason}")]
    JobLoad {
        /// The job name or path.
        name: String,
        /// The reason loading failed.
        reason: String,
    },
}

/// Main error type for PrintLink
///
/// A unified error type that can represent any error from all layers.
/// This is the primary error type used in public APIs.
#[derive(Error, Debug)]
pub enum Error {
    /// Connection error
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    /// Protocol error
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// State error
    #[error(transparent)]
    State(#[from] StateError),

    /// Pipeline error
    #[error(transparent)]
    Pipeline(#[from] PipelineError),

    /// Standard I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Generic error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Create an error from a string message
    pub fn other(msg: impl Into<String>) -> Self {
        Error::Other(msg.into())
    }

    /// Create an illegal-state error for an operation
    pub fn illegal_in_state(operation: impl Into<String>, state: impl std::fmt::Display) -> Self {
        Error::State(StateError::IllegalInState {
            operation: operation.into(),
            state: state.to_string(),
        })
    }

    /// Check if this is a timeout error
    pub fn is_timeout(&self) -> bool {
        matches!(self, Error::Connection(ConnectionError::Timeout { .. }))
    }

    /// Check if this is a connection error
    pub fn is_connection_error(&self) -> bool {
        matches!(self, Error::Connection(_) | Error::Io(_))
    }

    /// Check if this is a protocol error
    pub fn is_protocol_error(&self) -> bool {
        matches!(self, Error::Protocol(_))
    }

    /// Check if this is a state error
    pub fn is_state_error(&self) -> bool {
        matches!(self, Error::State(_))
    }
}

/// Result type using Error
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_error_display() {
        let err = ConnectionError::HandshakeFailed {
            reason: "too many invalid characters".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Handshake failed: too many invalid characters"
        );
    }

    #[test]
    fn test_error_conversion() {
        let err: Error = ProtocolError::ResendOutOfWindow { requested: 3 }.into();
        assert!(err.is_protocol_error());
        assert!(!err.is_connection_error());

        let err: Error = ConnectionError::Timeout { timeout_ms: 100 }.into();
        assert!(err.is_timeout());
        assert!(err.is_connection_error());
    }

    #[test]
    fn test_illegal_in_state() {
        let err = Error::illegal_in_state("start a print", "Disconnected");
        assert!(err.is_state_error());
        assert_eq!(err.to_string(), "Cannot start a print while Disconnected");
    }

    #[test]
    fn test_crc_mismatch_display() {
        let err = ProtocolError::CrcMismatch {
            expected: 0x1f,
            actual: 0x02,
        };
        assert_eq!(
            err.to_string(),
            "Packet CRC mismatch: expected 0x1f, got 0x02"
        );
    }
}
