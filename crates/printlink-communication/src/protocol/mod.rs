//! Text protocol: G-code helpers, line framing, resend archive, flow control
//! and report parsers.

pub mod archive;
pub mod codec;
pub mod flow;
pub mod gcode;
pub mod responses;

pub use archive::{PendingLine, ResendArchive};
pub use codec::{checksum, frame, parse_framed, FramedLine};
pub use flow::{AckTracker, FlowControlConfig};
pub use gcode::PositionTracker;
pub use responses::{ResendRequest, TemperatureReport};
